// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Implementations of [`crypto`](crate::crypto) based on `ring`.
//!
//! These are the implementations used by the test suite and by `std`
//! integrations; device firmware is expected to substitute its own,
//! hardware-backed engines.

use core::convert::TryInto as _;
use core::mem;

use ring::digest;
use ring::signature::EcdsaVerificationAlgorithm;
use ring::signature::KeyPair as _;
use ring::signature::VerificationAlgorithm as _;

use crate::crypto::ecdsa;
use crate::crypto::hash;
use crate::Result;

/// A `ring`-based [`hash::Engine`].
pub struct Engine {
    inner: Inner,
}

enum Inner {
    Idle,
    Hash(digest::Context),
}

impl Engine {
    /// Creates a new `Engine`.
    pub fn new() -> Self {
        Self { inner: Inner::Idle }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl hash::Engine for Engine {
    fn supports(&mut self, _: hash::Algo) -> bool {
        true
    }

    fn start_raw(&mut self, algo: hash::Algo) -> Result<(), hash::Error> {
        self.inner = Inner::Hash(digest::Context::new(match algo {
            hash::Algo::Sha256 => &digest::SHA256,
            hash::Algo::Sha384 => &digest::SHA384,
        }));
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), hash::Error> {
        match &mut self.inner {
            Inner::Idle => Err(fail!(hash::Error::Idle)),
            Inner::Hash(c) => {
                c.update(data);
                Ok(())
            }
        }
    }

    fn finish_raw(&mut self, out: &mut [u8]) -> Result<(), hash::Error> {
        match mem::replace(&mut self.inner, Inner::Idle) {
            Inner::Idle => Err(fail!(hash::Error::Idle)),
            Inner::Hash(c) => {
                check!(
                    out.len() == c.algorithm().output_len,
                    hash::Error::WrongSize
                );
                let digest = c.finish();
                out.copy_from_slice(digest.as_ref());
                Ok(())
            }
        }
    }

    fn compare_raw(&mut self, expected: &[u8]) -> Result<(), hash::Error> {
        match mem::replace(&mut self.inner, Inner::Idle) {
            Inner::Idle => Err(fail!(hash::Error::Idle)),
            Inner::Hash(c) => {
                check!(
                    expected.len() == c.algorithm().output_len,
                    hash::Error::WrongSize
                );
                let digest = c.finish();
                check!(digest.as_ref() == expected, hash::Error::Unspecified);
                Ok(())
            }
        }
    }
}

/// Maximum size of an uncompressed P-384 point: a tag byte plus two
/// 48-byte coordinates.
const MAX_POINT: usize = 1 + 48 * 2;

/// A `ring`-based [`ecdsa::Verify`], using the raw `(r, s)` signature
/// encoding.
pub struct Verify {
    key: [u8; MAX_POINT],
    key_len: usize,
    curve: ecdsa::Curve,
    algo: &'static EcdsaVerificationAlgorithm,
}

impl Verify {
    /// Creates a new P-256 verifier from the given public-key coordinates.
    pub fn p256(x: &[u8; 32], y: &[u8; 32]) -> Self {
        let mut key = [0; MAX_POINT];
        key[0] = 4;
        key[1..33].copy_from_slice(x);
        key[33..65].copy_from_slice(y);

        Self {
            key,
            key_len: 65,
            curve: ecdsa::Curve::P256,
            algo: &ring::signature::ECDSA_P256_SHA256_FIXED,
        }
    }

    /// Creates a new P-384 verifier from the given public-key coordinates.
    pub fn p384(x: &[u8; 48], y: &[u8; 48]) -> Self {
        let mut key = [0; MAX_POINT];
        key[0] = 4;
        key[1..49].copy_from_slice(x);
        key[49..97].copy_from_slice(y);

        Self {
            key,
            key_len: 97,
            curve: ecdsa::Curve::P384,
            algo: &ring::signature::ECDSA_P384_SHA384_FIXED,
        }
    }
}

impl ecdsa::Verify for Verify {
    fn curve(&self) -> ecdsa::Curve {
        self.curve
    }

    fn verify(
        &mut self,
        message: &[u8],
        r: &[u8],
        s: &[u8],
    ) -> Result<(), ecdsa::Error> {
        let scalar = self.curve.scalar_bytes();
        check!(r.len() == scalar, ecdsa::Error::WrongCurve);
        check!(s.len() == scalar, ecdsa::Error::WrongCurve);

        let mut signature = [0; 48 * 2];
        signature[..scalar].copy_from_slice(r);
        signature[scalar..scalar * 2].copy_from_slice(s);

        self.algo
            .verify(
                untrusted::Input::from(&self.key[..self.key_len]),
                untrusted::Input::from(message),
                untrusted::Input::from(&signature[..scalar * 2]),
            )
            .map_err(|_| fail!(ecdsa::Error::BadSignature))
    }
}

/// A `ring`-based [`ecdsa::Ciphers`], handing out [`Verify`] engines.
#[derive(Default)]
pub struct Ciphers {
    verifier: Option<Verify>,
}

impl Ciphers {
    /// Creates a new `Ciphers`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ecdsa::Ciphers for Ciphers {
    fn verifier(
        &mut self,
        curve: ecdsa::Curve,
        x: &[u8],
        y: &[u8],
    ) -> Option<&mut dyn ecdsa::Verify> {
        let verifier = match curve {
            ecdsa::Curve::P256 => {
                Verify::p256(x.try_into().ok()?, y.try_into().ok()?)
            }
            ecdsa::Curve::P384 => {
                Verify::p384(x.try_into().ok()?, y.try_into().ok()?)
            }
        };
        self.verifier = Some(verifier);
        self.verifier.as_mut().map(|v| v as _)
    }
}

/// A `ring`-based [`ecdsa::Sign`], producing raw `(r, s)` signatures.
pub struct Sign {
    keypair: ring::signature::EcdsaKeyPair,
    curve: ecdsa::Curve,
}

impl Sign {
    /// Creates a new P-256 signer from the given PKCS#8-encoded private key.
    pub fn p256_from_pkcs8(pkcs8: &[u8]) -> Result<Self, ecdsa::Error> {
        let keypair = ring::signature::EcdsaKeyPair::from_pkcs8(
            &ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            pkcs8,
        )
        .map_err(|_| fail!(ecdsa::Error::Unspecified))?;
        Ok(Self {
            keypair,
            curve: ecdsa::Curve::P256,
        })
    }

    /// Creates a new P-384 signer from the given PKCS#8-encoded private key.
    pub fn p384_from_pkcs8(pkcs8: &[u8]) -> Result<Self, ecdsa::Error> {
        let keypair = ring::signature::EcdsaKeyPair::from_pkcs8(
            &ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING,
            pkcs8,
        )
        .map_err(|_| fail!(ecdsa::Error::Unspecified))?;
        Ok(Self {
            keypair,
            curve: ecdsa::Curve::P384,
        })
    }

    /// Generates a fresh keypair on `curve`, returning the PKCS#8 blob it
    /// was built from alongside the signer.
    #[cfg(feature = "std")]
    pub fn generate(
        curve: ecdsa::Curve,
    ) -> Result<(Self, Vec<u8>), ecdsa::Error> {
        let algo = match curve {
            ecdsa::Curve::P256 => {
                &ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING
            }
            ecdsa::Curve::P384 => {
                &ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING
            }
        };
        let rng = ring::rand::SystemRandom::new();
        let pkcs8 = ring::signature::EcdsaKeyPair::generate_pkcs8(algo, &rng)
            .map_err(|_| fail!(ecdsa::Error::Unspecified))?;
        let keypair =
            ring::signature::EcdsaKeyPair::from_pkcs8(algo, pkcs8.as_ref())
                .map_err(|_| fail!(ecdsa::Error::Unspecified))?;
        Ok((Self { keypair, curve }, pkcs8.as_ref().to_vec()))
    }

    /// Returns the public key's coordinates, as `(x, y)` slices of
    /// [`ecdsa::Curve::scalar_bytes()`] bytes each.
    pub fn public_key(&self) -> (&[u8], &[u8]) {
        // Uncompressed point encoding: `04 || x || y`.
        let scalar = self.curve.scalar_bytes();
        let point = self.keypair.public_key().as_ref();
        (&point[1..1 + scalar], &point[1 + scalar..1 + scalar * 2])
    }
}

impl ecdsa::Sign for Sign {
    fn curve(&self) -> ecdsa::Curve {
        self.curve
    }

    fn sign(
        &mut self,
        message: &[u8],
        r: &mut [u8],
        s: &mut [u8],
    ) -> Result<(), ecdsa::Error> {
        let scalar = self.curve.scalar_bytes();
        check!(r.len() == scalar, ecdsa::Error::WrongCurve);
        check!(s.len() == scalar, ecdsa::Error::WrongCurve);

        let rng = ring::rand::SystemRandom::new();
        let signature = self
            .keypair
            .sign(&rng, message)
            .map_err(|_| fail!(ecdsa::Error::Unspecified))?;

        // Fixed encoding is `r || s`.
        r.copy_from_slice(&signature.as_ref()[..scalar]);
        s.copy_from_slice(&signature.as_ref()[scalar..]);
        Ok(())
    }
}
