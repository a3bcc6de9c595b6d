// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Authentication profiles.
//!
//! The orchestrator and dispatcher never call the verifier directly;
//! they go through [`Profile`], so that a platform signed under a
//! different manifest scheme can substitute its own implementation
//! without touching the control flow. The crate ships [`Intel`], the
//! signature-block scheme implemented by [`manifest`](crate::manifest).

use crate::crypto::ecdsa;
use crate::crypto::hash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::Ptr;
use crate::manifest;
use crate::manifest::pfm;
use crate::manifest::PcType;
use crate::provision;
use crate::Result;

/// An authentication profile: how signed firmware is validated on this
/// platform.
///
/// `P` is the flash type backing the provisioning store.
pub trait Profile<P: Flash> {
    /// Verifies the signature block at `base` in `flash`, expecting it
    /// to carry content of type `expected`.
    fn verify_capsule(
        &mut self,
        flash: &dyn Flash,
        base: Ptr,
        expected: PcType,
        store: &provision::Store<P>,
    ) -> Result<manifest::Verified, manifest::Error>;

    /// Parses the PFM at `pfm_base` in `flash` and checks every pinned
    /// SPI region of `device` against it.
    ///
    /// The PFM's own signature block must already have been verified via
    /// [`verify_capsule()`](Self::verify_capsule).
    fn verify_pfm(
        &mut self,
        flash: &dyn Flash,
        pfm_base: Ptr,
        device: &dyn Flash,
    ) -> Result<pfm::Pfm, manifest::Error>;

    /// Reads the key id named by a verified key-cancellation
    /// certificate at `base`.
    fn cancelled_key_id(
        &mut self,
        flash: &dyn Flash,
        base: Ptr,
    ) -> Result<u8, manifest::Error>;
}

/// The Intel-layout [`Profile`]: 1 KiB signature blocks with a
/// root/CSK/content chain, as implemented by [`manifest`].
pub struct Intel<H, C> {
    hasher: H,
    ciphers: C,
}

impl<H, C> Intel<H, C> {
    /// Creates a new profile around the given crypto engines.
    pub fn new(hasher: H, ciphers: C) -> Self {
        Self { hasher, ciphers }
    }
}

#[cfg(feature = "ring")]
impl Intel<crate::crypto::ring::Engine, crate::crypto::ring::Ciphers> {
    /// Creates a new profile backed by `ring`.
    pub fn ring() -> Self {
        Self::new(
            crate::crypto::ring::Engine::new(),
            crate::crypto::ring::Ciphers::new(),
        )
    }
}

impl<P, H, C> Profile<P> for Intel<H, C>
where
    P: Flash,
    H: hash::Engine,
    C: ecdsa::Ciphers,
{
    fn verify_capsule(
        &mut self,
        flash: &dyn Flash,
        base: Ptr,
        expected: PcType,
        store: &provision::Store<P>,
    ) -> Result<manifest::Verified, manifest::Error> {
        manifest::verify(
            flash,
            base,
            expected,
            store,
            &mut self.hasher,
            &mut self.ciphers,
        )
    }

    fn verify_pfm(
        &mut self,
        flash: &dyn Flash,
        pfm_base: Ptr,
        device: &dyn Flash,
    ) -> Result<pfm::Pfm, manifest::Error> {
        let pfm = pfm::Pfm::read(flash, pfm_base)?;
        pfm.verify_regions(&mut self.hasher, flash, device)?;
        Ok(pfm)
    }

    fn cancelled_key_id(
        &mut self,
        flash: &dyn Flash,
        base: Ptr,
    ) -> Result<u8, manifest::Error> {
        manifest::cancelled_key_id(flash, base)
    }
}
