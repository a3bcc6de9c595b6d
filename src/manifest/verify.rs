// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Signature-block verification: the chain walk.
//!
//! Verification establishes, in order:
//! 1. block 0 is well-formed and claims the content type the caller
//!    expects;
//! 2. the root key entry is well-formed, and its public key hashes to
//!    the provisioned root key hash;
//! 3. the CSK entry, when present, is root-signed, authorized for this
//!    content type, and not cancelled;
//! 4. the block 0 entry is signed by the CSK (or by the root key, for
//!    root-signed certificate types);
//! 5. block 0's digest over the protected content matches.
//!
//! Nothing before step 5 has read a single content byte, so a manifest
//! is never acted on before its whole chain checks out.

use core::convert::TryFrom as _;

use zerocopy::AsBytes;

use crate::crypto::ecdsa;
use crate::crypto::hash;
use crate::crypto::hash::EngineExt as _;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::manifest::block0::Block0;
use crate::manifest::block1;
use crate::manifest::Error;
use crate::manifest::PcType;
use crate::manifest::SIG_BLOCK_SIZE;
use crate::provision;
use crate::wire::WireEnum as _;
use crate::Result;

/// A record of a successful verification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Verified {
    /// The verified content type.
    pub pc_type: PcType,
    /// The length, in bytes, of the protected content.
    pub pc_length: u32,
    /// The curve the whole chain was signed on.
    pub curve: ecdsa::Curve,
}

/// Reads the content type claimed by the signature block at `base`,
/// without verifying anything.
///
/// This is how update capsules are dispatched; the claim is then pinned
/// down by passing it back to [`verify()`] as `expected`.
pub fn pc_type<F: Flash + ?Sized>(
    flash: &F,
    base: Ptr,
) -> Result<PcType, Error> {
    let block0: Block0 = flash.read_object(base)?;
    block0.validate()?;
    PcType::from_wire_value(block0.pc_type)
        .ok_or_else(|| fail!(Error::UnsupportedPcType(block0.pc_type)))
}

/// Verifies the signature block at `base` in `flash` against the
/// provisioned root of trust.
pub fn verify<F, P>(
    flash: &F,
    base: Ptr,
    expected: PcType,
    store: &provision::Store<P>,
    hasher: &mut dyn hash::Engine,
    ciphers: &mut dyn ecdsa::Ciphers,
) -> Result<Verified, Error>
where
    F: Flash + ?Sized,
    P: Flash,
{
    let block0: Block0 = flash.read_object(base)?;
    block0.validate()?;
    let pc_type = PcType::from_wire_value(block0.pc_type)
        .ok_or_else(|| fail!(Error::UnsupportedPcType(block0.pc_type)))?;
    check!(pc_type == expected, Error::UnsupportedPcType(block0.pc_type));

    check!(block0.pc_length != 0, Error::BadLength);
    let content_end = base
        .address
        .checked_add(SIG_BLOCK_SIZE)
        .and_then(|x| x.checked_add(block0.pc_length))
        .ok_or_else(|| fail!(Error::BadLength))?;
    check!(content_end <= flash.size()?, Error::BadLength);

    let header: block1::Header =
        flash.read_object(Ptr::new(base.address + block1::BLOCK1_OFFSET))?;
    header.validate()?;

    let root: block1::KeyEntry = flash
        .read_object(Ptr::new(base.address + block1::ROOT_ENTRY_OFFSET))?;
    let curve = root.validate_as_root()?;
    let (x, y) = root.coordinates(curve);

    // The root entry is data, not policy: it only becomes trusted once
    // its key hashes to the provisioned value.
    let algo = curve.digest_algo();
    let mut digest = [0; 48];
    let mut h = hasher.new_hash(algo)?;
    h.write(x)?;
    h.write(y)?;
    h.finish(&mut digest[..algo.bytes()])?;
    let provisioned = store.root_key_hash()?;
    check!(digest[..32] == provisioned[..], Error::NotRootKey);

    // Root-signed certificate types have no CSK entry; the block 0 entry
    // takes its place.
    let root_signed =
        pc_type.is_key_cancellation() || pc_type == PcType::Decommission;

    let mut csk_key = None;
    let entry_offset = if root_signed {
        base.address + block1::CSK_ENTRY_OFFSET
    } else {
        let csk: block1::CskEntry = flash
            .read_object(Ptr::new(base.address + block1::CSK_ENTRY_OFFSET))?;
        check!(
            csk.key.tag == block1::CSK_ENTRY_TAG,
            Error::BadTag(csk.key.tag)
        );
        check!(csk.key.curve()? == curve, Error::CurveMismatch);
        check!(
            csk.key.permissions & pc_type.permission_bit() != 0,
            Error::PermissionDenied
        );

        let key_id = u8::try_from(csk.key.key_id)
            .map_err(|_| fail!(Error::Provision(provision::Error::OutOfRange)))?;
        if store.key_cancelled(pc_type.key_class(), key_id)? {
            return Err(fail!(Error::KeyCancelled(key_id)));
        }

        let sig_curve = csk.signature.curve_checked(curve)?;
        let (r, s) = csk.signature.scalars(sig_curve);
        let verifier = ciphers
            .verifier(curve, x, y)
            .ok_or_else(|| fail!(Error::Sig(ecdsa::Error::WrongCurve)))?;
        verifier.verify(csk.key.body(), r, s)?;

        csk_key = Some(csk.key);
        base.address + block1::BLOCK0_ENTRY_OFFSET
    };

    let entry: block1::Block0Entry =
        flash.read_object(Ptr::new(entry_offset))?;
    entry.validate()?;
    let sig_curve = entry.signature.curve_checked(curve)?;
    let (r, s) = entry.signature.scalars(sig_curve);
    let (kx, ky) = match &csk_key {
        Some(key) => key.coordinates(curve),
        None => (x, y),
    };
    let verifier = ciphers
        .verifier(curve, kx, ky)
        .ok_or_else(|| fail!(Error::Sig(ecdsa::Error::WrongCurve)))?;
    verifier.verify(block0.as_bytes(), r, s)?;

    // Only now is block 0's digest trustworthy; check the content.
    hasher.start_raw(algo)?;
    let mut buf = [0; 256];
    let mut offset = base.address + SIG_BLOCK_SIZE;
    let mut left = block0.pc_length as usize;
    while left > 0 {
        let chunk = left.min(buf.len());
        flash.read(Ptr::new(offset), &mut buf[..chunk])?;
        hasher.write_raw(&buf[..chunk])?;
        offset += chunk as u32;
        left -= chunk;
    }
    if hasher.compare_raw(block0.digest(curve)).is_err() {
        return Err(fail!(Error::HashMismatch));
    }

    info!(
        "verified {:?} capsule, {} content bytes",
        pc_type, block0.pc_length
    );
    Ok(Verified {
        pc_type,
        pc_length: block0.pc_length,
        curve,
    })
}

/// Reads the key id named by a key-cancellation certificate's payload.
///
/// The certificate must already have been verified.
pub fn cancelled_key_id<F: Flash + ?Sized>(
    flash: &F,
    base: Ptr,
) -> Result<u8, Error> {
    let id: [u8; 4] =
        flash.read_object(Ptr::new(base.address + SIG_BLOCK_SIZE))?;
    u8::try_from(u32::from_le_bytes(id))
        .map_err(|_| fail!(Error::Provision(provision::Error::OutOfRange)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::ring;
    use crate::hardware::flash::Ram;
    use crate::manifest::testutil;

    #[test]
    fn valid_chain() {
        for &curve in &[ecdsa::Curve::P256, ecdsa::Curve::P384] {
            let mut keys = testutil::KeyChain::generate(curve);
            let store = testutil::provisioned_store(&keys.root);
            let capsule = keys.sign_capsule(PcType::BmcUpdate, b"payload");
            let flash = Ram(&capsule);

            let verified = verify(
                &flash,
                Ptr::new(0),
                PcType::BmcUpdate,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .unwrap();
            assert_eq!(verified.pc_type, PcType::BmcUpdate);
            assert_eq!(verified.pc_length, 7);
            assert_eq!(verified.curve, curve);
        }
    }

    #[test]
    fn pc_type_must_match_expectation() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
        let store = testutil::provisioned_store(&keys.root);
        let capsule = keys.sign_capsule(PcType::BmcUpdate, b"payload");
        let flash = Ram(&capsule);

        assert_eq!(pc_type(&flash, Ptr::new(0)).unwrap(), PcType::BmcUpdate);
        assert_eq!(
            verify(
                &flash,
                Ptr::new(0),
                PcType::PchUpdate,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .err()
            .unwrap()
            .into_inner(),
            Error::UnsupportedPcType(PcType::BmcUpdate as u32),
        );
    }

    #[test]
    fn wrong_root_key_is_rejected() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
        let other = testutil::KeyChain::generate(ecdsa::Curve::P256);
        let store = testutil::provisioned_store(&other.root);
        let capsule = keys.sign_capsule(PcType::BmcUpdate, b"payload");

        assert_eq!(
            verify(
                &Ram(&capsule),
                Ptr::new(0),
                PcType::BmcUpdate,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .err()
            .unwrap()
            .into_inner(),
            Error::NotRootKey,
        );
    }

    #[test]
    fn unprovisioned_store_fails_closed() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
        let store = testutil::unprovisioned_store();
        let capsule = keys.sign_capsule(PcType::BmcUpdate, b"payload");

        assert_eq!(
            verify(
                &Ram(&capsule),
                Ptr::new(0),
                PcType::BmcUpdate,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .err()
            .unwrap()
            .into_inner(),
            Error::Provision(provision::Error::NotProvisioned),
        );
    }

    #[test]
    fn csk_permission_is_enforced() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
        keys.csk_permissions = PcType::PchUpdate.permission_bit();
        let store = testutil::provisioned_store(&keys.root);
        let capsule = keys.sign_capsule(PcType::BmcUpdate, b"payload");

        assert_eq!(
            verify(
                &Ram(&capsule),
                Ptr::new(0),
                PcType::BmcUpdate,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .err()
            .unwrap()
            .into_inner(),
            Error::PermissionDenied,
        );
    }

    #[test]
    fn cancelled_csk_is_rejected() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
        keys.csk_id = 3;
        let mut store = testutil::provisioned_store(&keys.root);
        let capsule = keys.sign_capsule(PcType::BmcUpdate, b"payload");

        store
            .cancel_key(provision::KeyClass::BmcUpdate, 3)
            .unwrap();
        assert_eq!(
            verify(
                &Ram(&capsule),
                Ptr::new(0),
                PcType::BmcUpdate,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .err()
            .unwrap()
            .into_inner(),
            Error::KeyCancelled(3),
        );

        // The same key id in another class is unaffected.
        store
            .cancel_key(provision::KeyClass::PchUpdate, 4)
            .unwrap();
        let capsule = keys.sign_capsule(PcType::BmcUpdate, b"payload");
        verify(
            &Ram(&capsule),
            Ptr::new(0),
            PcType::BmcUpdate,
            &store,
            &mut ring::Engine::new(),
            &mut ring::Ciphers::new(),
        )
        .unwrap();
    }

    #[test]
    fn tampered_content_is_rejected() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P384);
        let store = testutil::provisioned_store(&keys.root);
        let mut capsule = keys.sign_capsule(PcType::PchUpdate, b"payload");
        *capsule.last_mut().unwrap() ^= 1;

        assert_eq!(
            verify(
                &Ram(&capsule),
                Ptr::new(0),
                PcType::PchUpdate,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .err()
            .unwrap()
            .into_inner(),
            Error::HashMismatch,
        );
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
        let store = testutil::provisioned_store(&keys.root);
        let mut capsule = keys.sign_capsule(PcType::BmcPfm, b"payload");
        // Flip a bit of the block 0 entry's `r` scalar.
        capsule[(block1::BLOCK0_ENTRY_OFFSET + 8) as usize] ^= 1;

        assert_eq!(
            verify(
                &Ram(&capsule),
                Ptr::new(0),
                PcType::BmcPfm,
                &store,
                &mut ring::Engine::new(),
                &mut ring::Ciphers::new(),
            )
            .err()
            .unwrap()
            .into_inner(),
            Error::Sig(ecdsa::Error::BadSignature),
        );
    }

    #[test]
    fn root_signed_cancellation_skips_csk() {
        let mut keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
        let store = testutil::provisioned_store(&keys.root);
        let capsule =
            keys.sign_cancellation(PcType::BmcUpdateKeyCancel, 7);
        let flash = Ram(&capsule);

        verify(
            &flash,
            Ptr::new(0),
            PcType::BmcUpdateKeyCancel,
            &store,
            &mut ring::Engine::new(),
            &mut ring::Ciphers::new(),
        )
        .unwrap();
        assert_eq!(cancelled_key_id(&flash, Ptr::new(0)).unwrap(), 7);
    }
}
