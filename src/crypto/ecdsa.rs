// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Algorithm-generic ECDSA traits.
//!
//! Signatures in firmware manifests are stored as raw `(r, s)` scalar
//! pairs, not as ASN.1; the traits here speak that representation
//! directly.

use static_assertions::assert_obj_safe;

use crate::crypto::hash;
use crate::Result;

/// An elliptic curve supported for manifest signatures.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Curve {
    /// NIST P-256, paired with SHA-256.
    P256,
    /// NIST P-384, paired with SHA-384.
    P384,
}

impl Curve {
    /// The width, in bytes, of a scalar (key coordinate or signature
    /// component) on this curve.
    #[inline]
    pub const fn scalar_bytes(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }

    /// The hashing algorithm this curve is always paired with.
    #[inline]
    pub const fn digest_algo(self) -> hash::Algo {
        match self {
            Self::P256 => hash::Algo::Sha256,
            Self::P384 => hash::Algo::Sha384,
        }
    }
}

/// An error returned by a signature operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// Indicates that the signature did not check out against the message.
    BadSignature,

    /// Indicates that a key, signature, or scalar had the wrong length for
    /// the engine's curve.
    WrongCurve,

    /// Indicates an unspecified, internal error.
    Unspecified,
}

/// A signature-verification engine, already primed with a public key.
///
/// There is no way to extract the key back out of a `Verify` value.
pub trait Verify {
    /// Returns the curve this engine's key lives on.
    fn curve(&self) -> Curve;

    /// Verifies that `(r, s)` is a valid signature over `message` with
    /// this engine's key.
    ///
    /// `r` and `s` must each be exactly [`Curve::scalar_bytes()`] long,
    /// in big-endian order.
    ///
    /// If the underlying cryptographic operation succeeds, returns `Ok(())`.
    /// Failures, including signature check failures, are included in the
    /// `Err` variant.
    fn verify(
        &mut self,
        message: &[u8],
        r: &[u8],
        s: &[u8],
    ) -> Result<(), Error>;
}
assert_obj_safe!(Verify);

/// A source of [`Verify`] engines.
///
/// Manifest verification discovers public keys as it walks a signature
/// chain; this trait is the seam through which it asks the crypto layer
/// to prime an engine with each discovered key.
pub trait Ciphers {
    /// Returns a verification engine for the public key `(x, y)` on
    /// `curve`, or `None` if the key or curve is unsupported.
    ///
    /// `x` and `y` must each be exactly [`Curve::scalar_bytes()`] long,
    /// in big-endian order.
    fn verifier(
        &mut self,
        curve: Curve,
        x: &[u8],
        y: &[u8],
    ) -> Option<&mut dyn Verify>;
}
assert_obj_safe!(Ciphers);

/// A signing engine, already primed with a keypair.
///
/// There is no way to extract the keypair back out of a `Sign` value.
/// This half of the module is only used by tooling and tests; the device
/// itself never signs anything.
pub trait Sign {
    /// Returns the curve this engine's keypair lives on.
    fn curve(&self) -> Curve;

    /// Uses this signer to create a signature over `message`, writing the
    /// raw scalars to `r` and `s`.
    ///
    /// `r` and `s` must each be exactly [`Curve::scalar_bytes()`] long.
    fn sign(
        &mut self,
        message: &[u8],
        r: &mut [u8],
        s: &mut [u8],
    ) -> Result<(), Error>;
}
assert_obj_safe!(Sign);
