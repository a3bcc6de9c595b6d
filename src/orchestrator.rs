// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Recovery and update orchestration.
//!
//! This module composes the [`profile`](crate::profile) verifier and the
//! [`copier`](crate::copier) into the three destructive operations of
//! the resilience model:
//!
//! - repairing a corrupt active image from the recovery capsule;
//! - repairing a corrupt recovery capsule from staging;
//! - applying a staged update (firmware, RoT image, key cancellation,
//!   or decommission).
//!
//! Nothing here retries or transitions state; every operation returns a
//! typed error for the dispatcher to act on.

use crate::copier;
use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::Component;
use crate::manifest;
use crate::manifest::pfm;
use crate::manifest::PcType;
use crate::manifest::SIG_BLOCK_SIZE;
use crate::policy;
use crate::profile::Profile;
use crate::provision;
use crate::provision::KeyClass;
use crate::provision::Pending;
use crate::Result;

/// Offset of the PCH staging relay within the BMC's staging region:
/// a host without direct PCH flash access parks the PCH capsule here,
/// 32 MiB past the BMC's own staging capsule.
pub const BMC_STAGING_RELAY_OFFSET: u32 = 0x0200_0000;

/// Reserved bytes between an RoT capsule's SVN word and its image.
const ROT_CAPSULE_RESERVED: u32 = 32;

/// An orchestrator error: which layer of an operation failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A signature block or PFM failed authentication.
    Auth(manifest::Error),
    /// An authentic capsule was rejected by update policy.
    Policy(policy::Error),
    /// A region copy failed.
    Copy(copier::Error),
    /// A wrapped flash error.
    Flash(flash::Error),
    /// A wrapped provisioning-store error.
    Provision(provision::Error),
}

impl From<manifest::Error> for Error {
    fn from(e: manifest::Error) -> Self {
        Self::Auth(e)
    }
}

impl From<policy::Error> for Error {
    fn from(e: policy::Error) -> Self {
        Self::Policy(e)
    }
}

impl From<copier::Error> for Error {
    fn from(e: copier::Error) -> Self {
        Self::Copy(e)
    }
}

impl From<flash::Error> for Error {
    fn from(e: flash::Error) -> Self {
        Self::Flash(e)
    }
}

impl From<provision::Error> for Error {
    fn from(e: provision::Error) -> Self {
        Self::Provision(e)
    }
}

debug_from!(Error => manifest::Error, policy::Error, copier::Error, flash::Error, provision::Error);

/// A firmware image the orchestrator can operate on: one of the two
/// protected components, or the RoT itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// The BMC's firmware.
    Bmc,
    /// The PCH's firmware.
    Pch,
    /// This device's own firmware.
    Rot,
}

impl From<Component> for Target {
    fn from(c: Component) -> Self {
        match c {
            Component::Bmc => Self::Bmc,
            Component::Pch => Self::Pch,
        }
    }
}

/// Which of a target's two image slots an update is aimed at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    /// The image the component boots from.
    Active,
    /// The last-known-good backup.
    Recovery,
}

/// The RoT's own flash layout; fixed by the firmware image rather than
/// provisioned.
#[derive(Copy, Clone, Debug)]
pub struct RotLayout {
    /// Base of the running image.
    pub active: Ptr,
    /// Base of the backup image.
    pub recovery: Ptr,
    /// Size of each image slot, in bytes.
    pub size: u32,
}

/// The flash devices the orchestrator drives.
pub struct Platform<F> {
    /// The BMC's flash.
    pub bmc: F,
    /// The PCH's flash.
    pub pch: F,
    /// The RoT's own flash.
    pub rot: F,
    /// The RoT flash layout.
    pub rot_layout: RotLayout,
    /// Where RoT update capsules are staged, within the BMC's flash.
    pub rot_staging: Ptr,
}

impl<F: Flash> Platform<F> {
    /// The flash device `component` boots from.
    pub fn device(&self, component: Component) -> &F {
        match component {
            Component::Bmc => &self.bmc,
            Component::Pch => &self.pch,
        }
    }

    fn device_mut(&mut self, component: Component) -> &mut F {
        match component {
            Component::Bmc => &mut self.bmc,
            Component::Pch => &mut self.pch,
        }
    }
}

/// The recovery/update orchestrator.
///
/// This is a short-lived view over the dispatcher's state, constructed
/// per operation.
pub struct Orchestrator<'a, Pr, F, P> {
    profile: &'a mut Pr,
    store: &'a mut provision::Store<P>,
    platform: &'a mut Platform<F>,
}

impl<'a, Pr, F, P> Orchestrator<'a, Pr, F, P>
where
    Pr: Profile<P>,
    F: Flash,
    P: Flash,
{
    /// Creates a new `Orchestrator`.
    pub fn new(
        profile: &'a mut Pr,
        store: &'a mut provision::Store<P>,
        platform: &'a mut Platform<F>,
    ) -> Self {
        Self {
            profile,
            store,
            platform,
        }
    }

    /// Verifies `component`'s active image: its signed PFM, and every
    /// flash region the PFM pins.
    pub fn verify_active(
        &mut self,
        component: Component,
    ) -> Result<pfm::Pfm, Error> {
        let offsets = self.store.offsets(component)?;
        let dev = self.platform.device(component);
        self.profile.verify_capsule(
            dev,
            Ptr::new(offsets.active_pfm),
            PcType::pfm_for(component),
            self.store,
        )?;
        let pfm = self.profile.verify_pfm(
            dev,
            Ptr::new(offsets.active_pfm + SIG_BLOCK_SIZE),
            dev,
        )?;
        Ok(pfm)
    }

    /// Verifies `component`'s recovery capsule and the signed PFM
    /// inside it.
    pub fn verify_recovery(
        &mut self,
        component: Component,
    ) -> Result<manifest::Verified, Error> {
        let offsets = self.store.offsets(component)?;
        let dev = self.platform.device(component);
        let verified = self.profile.verify_capsule(
            dev,
            Ptr::new(offsets.recovery),
            PcType::update_for(component),
            self.store,
        )?;
        self.profile.verify_capsule(
            dev,
            Ptr::new(offsets.recovery + SIG_BLOCK_SIZE),
            PcType::pfm_for(component),
            self.store,
        )?;
        Ok(verified)
    }

    /// Verifies the staging capsule for `component` and the signed PFM
    /// inside it.
    pub fn verify_staging(
        &mut self,
        component: Component,
    ) -> Result<manifest::Verified, Error> {
        let offsets = self.store.offsets(component)?;
        let dev = self.platform.device(component);
        let verified = self.profile.verify_capsule(
            dev,
            Ptr::new(offsets.staging),
            PcType::update_for(component),
            self.store,
        )?;
        self.profile.verify_capsule(
            dev,
            Ptr::new(offsets.staging + SIG_BLOCK_SIZE),
            PcType::pfm_for(component),
            self.store,
        )?;
        Ok(verified)
    }

    /// Repairs `component`'s active image from its (already verified)
    /// recovery capsule: a sparse copy of the image pages, then a
    /// rewrite of the active PFM from the capsule's inner PFM.
    ///
    /// The caller re-verifies the active image afterwards; this
    /// operation does not declare success on its own.
    pub fn recover_active_region(
        &mut self,
        component: Component,
    ) -> Result<(), Error> {
        let offsets = self.store.offsets(component)?;
        let dev = self.platform.device_mut(component);

        copier::decompress_within(dev, Ptr::new(offsets.recovery))?;

        let pfm = pfm::Pfm::read(
            &*dev,
            Ptr::new(offsets.recovery + 2 * SIG_BLOCK_SIZE),
        )?;
        copier::copy_within(
            dev,
            Ptr::new(offsets.recovery + SIG_BLOCK_SIZE),
            Ptr::new(offsets.active_pfm),
            SIG_BLOCK_SIZE + pfm.header.length,
        )?;

        info!("repaired {:?} active region from recovery", component);
        Ok(())
    }

    /// Repairs `component`'s recovery capsule from its staging area.
    ///
    /// If direct staging verification fails for the PCH and the pending
    /// record says the capsule was parked in the BMC's staging relay,
    /// the relay copy is verified, pulled across to PCH staging, and
    /// verification retried once.
    pub fn recover_recovery_region(
        &mut self,
        component: Component,
    ) -> Result<(), Error> {
        let verified = match self.verify_staging(component) {
            Ok(v) => v,
            Err(e) => {
                let relayed = component == Component::Pch
                    && self.store.pending()?.contains(Pending::BmcToPchRelay);
                if !relayed {
                    return Err(e);
                }
                self.fetch_pch_relay()?;
                self.store.clear_pending(Pending::BmcToPchRelay)?;
                self.verify_staging(component)?
            }
        };

        let offsets = self.store.offsets(component)?;
        let dev = self.platform.device_mut(component);
        copier::copy_within(
            dev,
            Ptr::new(offsets.staging),
            Ptr::new(offsets.recovery),
            SIG_BLOCK_SIZE + verified.pc_length,
        )?;

        info!("rebuilt {:?} recovery region from staging", component);
        Ok(())
    }

    /// Verifies the PCH capsule in the BMC's staging relay and copies
    /// it across to the PCH's staging area.
    fn fetch_pch_relay(&mut self) -> Result<(), Error> {
        let bmc_offsets = self.store.offsets(Component::Bmc)?;
        let pch_offsets = self.store.offsets(Component::Pch)?;
        let relay =
            Ptr::new(bmc_offsets.staging + BMC_STAGING_RELAY_OFFSET);

        let verified = self.profile.verify_capsule(
            &self.platform.bmc,
            relay,
            PcType::PchUpdate,
            self.store,
        )?;
        copier::copy_region(
            &self.platform.bmc,
            relay,
            &mut self.platform.pch,
            Ptr::new(pch_offsets.staging),
            SIG_BLOCK_SIZE + verified.pc_length,
        )?;

        info!("pulled PCH staging capsule from BMC relay");
        Ok(())
    }

    /// Applies whatever is staged for `target` to `slot`.
    ///
    /// The capsule's claimed content type steers dispatch: firmware
    /// update capsules are copied to the requested slot under the SVN
    /// policy, while key-cancellation and decommission certificates
    /// mutate the provisioning store instead.
    pub fn apply_update(
        &mut self,
        target: Target,
        slot: Slot,
    ) -> Result<(), Error> {
        match target {
            Target::Rot => self.apply_rot_update(),
            Target::Bmc => self.apply_firmware_update(Component::Bmc, slot),
            Target::Pch => self.apply_firmware_update(Component::Pch, slot),
        }
    }

    fn apply_firmware_update(
        &mut self,
        component: Component,
        slot: Slot,
    ) -> Result<(), Error> {
        if component == Component::Pch
            && self.store.pending()?.contains(Pending::BmcToPchRelay)
        {
            self.fetch_pch_relay()?;
            self.store.clear_pending(Pending::BmcToPchRelay)?;
        }

        let offsets = self.store.offsets(component)?;
        let staging = Ptr::new(offsets.staging);

        // Key cancellations arrive through the same staging path as
        // ordinary updates.
        let claimed =
            manifest::pc_type(self.platform.device(component), staging)?;
        if claimed.is_key_cancellation() {
            self.profile.verify_capsule(
                self.platform.device(component),
                staging,
                claimed,
                self.store,
            )?;
            let id = self
                .profile
                .cancelled_key_id(self.platform.device(component), staging)?;
            self.store.cancel_key(claimed.key_class(), id)?;
            return Ok(());
        }

        let verified = self.verify_staging(component)?;

        // An active update overwrites the image recovery would repair
        // from, so a broken recovery region vetoes it.
        if slot == Slot::Active {
            self.verify_recovery(component)?;
        }

        let pfm = pfm::Pfm::read(
            self.platform.device(component),
            Ptr::new(offsets.staging + 2 * SIG_BLOCK_SIZE),
        )?;
        let class = match component {
            Component::Pch => KeyClass::PchUpdate,
            Component::Bmc => KeyClass::BmcUpdate,
        };
        policy::check_svn_update(self.store.svn(class)?, pfm.header.svn)?;
        self.store.set_svn(class, pfm.header.svn)?;

        let dev = self.platform.device_mut(component);
        match slot {
            Slot::Active => {
                copier::decompress_within(dev, staging)?;
                copier::copy_within(
                    dev,
                    Ptr::new(offsets.staging + SIG_BLOCK_SIZE),
                    Ptr::new(offsets.active_pfm),
                    SIG_BLOCK_SIZE + pfm.header.length,
                )?;
            }
            Slot::Recovery => {
                copier::copy_within(
                    dev,
                    staging,
                    Ptr::new(offsets.recovery),
                    SIG_BLOCK_SIZE + verified.pc_length,
                )?;
            }
        }

        self.store.clear_pending(pending_bit(component, slot))?;
        info!("applied {:?} update to {:?} {:?}", verified.pc_type, component, slot);
        Ok(())
    }

    fn apply_rot_update(&mut self) -> Result<(), Error> {
        let staging = self.platform.rot_staging;
        let claimed = manifest::pc_type(&self.platform.bmc, staging)?;

        match claimed {
            PcType::Decommission => {
                self.profile.verify_capsule(
                    &self.platform.bmc,
                    staging,
                    claimed,
                    self.store,
                )?;
                self.store.erase()?;
                let pending = self.store.pending()? | Pending::Decommission;
                self.store.set_pending(pending)?;
                warn!("decommissioned; provisioning store erased");
                Ok(())
            }

            t if t.is_key_cancellation() => {
                self.profile.verify_capsule(
                    &self.platform.bmc,
                    staging,
                    t,
                    self.store,
                )?;
                let id = self
                    .profile
                    .cancelled_key_id(&self.platform.bmc, staging)?;
                self.store.cancel_key(t.key_class(), id)?;
                Ok(())
            }

            PcType::RotUpdate => {
                let verified = self.profile.verify_capsule(
                    &self.platform.bmc,
                    staging,
                    claimed,
                    self.store,
                )?;
                check!(
                    verified.pc_length > 4 + ROT_CAPSULE_RESERVED,
                    Error::Auth(manifest::Error::BadLength)
                );

                // The capsule payload opens with the image's SVN word.
                let payload = staging.address + SIG_BLOCK_SIZE;
                let svn_word: [u8; 4] =
                    self.platform.bmc.read_object(Ptr::new(payload))?;
                let proposed =
                    u32::from_le_bytes(svn_word).min(u8::MAX as u32) as u8;
                let current = self.store.svn(KeyClass::RotUpdate)?;
                policy::check_svn_update(current, proposed)?;
                self.store.set_svn(KeyClass::RotUpdate, proposed)?;

                // Back up the running image, then install over it.
                let layout = self.platform.rot_layout;
                copier::copy_within(
                    &mut self.platform.rot,
                    layout.active,
                    layout.recovery,
                    layout.size,
                )?;
                copier::copy_region(
                    &self.platform.bmc,
                    Ptr::new(payload + 4 + ROT_CAPSULE_RESERVED),
                    &mut self.platform.rot,
                    layout.active,
                    verified.pc_length - (4 + ROT_CAPSULE_RESERVED),
                )?;

                info!("installed RoT update, svn {}", proposed);
                Ok(())
            }

            _ => Err(fail!(Error::Policy(policy::Error::UnsupportedCapsule))),
        }
    }
}

/// The pending-record bit for an update of `component`'s `slot`.
pub(crate) fn pending_bit(component: Component, slot: Slot) -> Pending {
    match (component, slot) {
        (Component::Pch, Slot::Active) => Pending::PchActive,
        (Component::Pch, Slot::Recovery) => Pending::PchRecovery,
        (Component::Bmc, Slot::Active) => Pending::BmcActive,
        (Component::Bmc, Slot::Recovery) => Pending::BmcRecovery,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use zerocopy::AsBytes;

    use super::*;
    use crate::copier::COMPRESSION_TAG;
    use crate::crypto::ecdsa;
    use crate::crypto::hash::Algo;
    use crate::crypto::hash::EngineExt as _;
    use crate::crypto::ring;
    use crate::hardware::flash::RamMut;
    use crate::hardware::flash::PAGE_SIZE;
    use crate::manifest::testutil;
    use crate::profile::Intel;

    const PAGE: usize = PAGE_SIZE as usize;

    // Test flash layout, all within a 64-page device:
    //   pages 0-1   firmware (pinned by the PFM)
    //   page  4     active PFM
    //   page  8     recovery capsule
    //   page  16    staging area
    const FIRMWARE_PAGES: u32 = 2;
    const ACTIVE_PFM: u32 = 4 * PAGE_SIZE;
    const RECOVERY: u32 = 8 * PAGE_SIZE;
    const STAGING: u32 = 16 * PAGE_SIZE;
    const DEVICE_PAGES: usize = 64;

    fn offsets() -> provision::Offsets {
        provision::Offsets {
            active_pfm: ACTIVE_PFM,
            recovery: RECOVERY,
            staging: STAGING,
        }
    }

    fn firmware_digest(firmware: &[u8]) -> [u8; 32] {
        let mut digest = [0; 32];
        ring::Engine::new()
            .contiguous_hash(Algo::Sha256, firmware, &mut digest)
            .unwrap();
        digest
    }

    /// A PFM pinning pages 0..FIRMWARE_PAGES to `digest`.
    fn pfm_bytes(svn: u8, digest: &[u8; 32]) -> Vec<u8> {
        let region = [
            &[1u8, 0b11][..],
            &1u16.to_le_bytes(),
            &0u32.to_le_bytes(),
            &0u32.to_le_bytes(),
            &(FIRMWARE_PAGES * PAGE_SIZE).to_le_bytes(),
        ]
        .concat();

        let header = [
            &pfm::PFM_TAG.to_le_bytes()[..],
            &[svn, 1, 1, 0],
            &0u32.to_le_bytes(),
            &[0; 16],
            &((32 + region.len() + 32) as u32).to_le_bytes(),
        ]
        .concat();

        [&header[..], &region, digest].concat()
    }

    /// A signed update capsule: inner signed PFM, then a compressed
    /// image covering the firmware pages.
    fn update_capsule(
        keys: &mut testutil::KeyChain,
        component: Component,
        svn: u8,
        firmware: &[u8],
    ) -> Vec<u8> {
        let digest = firmware_digest(firmware);
        let inner =
            keys.sign_capsule(PcType::pfm_for(component), &pfm_bytes(svn, &digest));

        // One erase/write bit per device page; rewrite the firmware pages.
        let mut erase = vec![0u8; DEVICE_PAGES / 8];
        for page in 0..FIRMWARE_PAGES {
            erase[(page / 8) as usize] |= 0x80 >> (page % 8);
        }
        let header = copier::CompressionHeader {
            tag: COMPRESSION_TAG,
            version: 2,
            page_size: PAGE_SIZE,
            pattern_size: 1,
            pattern: 0xff,
            bitmap_bits: DEVICE_PAGES as u32,
            payload_length: firmware.len() as u32,
            reserved: [0; 100],
        };

        let content = [
            &inner[..],
            header.as_bytes(),
            &erase,
            &erase,
            firmware,
        ]
        .concat();
        keys.sign_capsule(PcType::update_for(component), &content)
    }

    struct Rig {
        keys: testutil::KeyChain,
        profile: Intel<ring::Engine, ring::Ciphers>,
        store: provision::Store<RamMut<Vec<u8>>>,
        platform: Platform<RamMut<Vec<u8>>>,
    }

    impl Rig {
        fn new() -> Self {
            let keys = testutil::KeyChain::generate(ecdsa::Curve::P256);
            let store =
                testutil::store_with_offsets(&keys.root, offsets(), offsets());
            Self {
                keys,
                profile: Intel::ring(),
                store,
                platform: Platform {
                    bmc: RamMut(vec![0xff; DEVICE_PAGES * PAGE]),
                    pch: RamMut(vec![0xff; DEVICE_PAGES * PAGE]),
                    rot: RamMut(vec![0xff; DEVICE_PAGES * PAGE]),
                    rot_layout: RotLayout {
                        active: Ptr::new(0),
                        recovery: Ptr::new(8 * PAGE_SIZE),
                        size: 4 * PAGE_SIZE,
                    },
                    rot_staging: Ptr::new(32 * PAGE_SIZE),
                },
            }
        }

        fn orchestrator(
            &mut self,
        ) -> Orchestrator<
            '_,
            Intel<ring::Engine, ring::Ciphers>,
            RamMut<Vec<u8>>,
            RamMut<Vec<u8>>,
        > {
            Orchestrator::new(
                &mut self.profile,
                &mut self.store,
                &mut self.platform,
            )
        }

        /// Installs firmware, a signed active PFM, and a recovery
        /// capsule for `component`.
        fn install(&mut self, component: Component, svn: u8) -> Vec<u8> {
            let firmware = vec![0x5a; (FIRMWARE_PAGES as usize) * PAGE];
            let digest = firmware_digest(&firmware);
            let pfm_blob = self
                .keys
                .sign_capsule(PcType::pfm_for(component), &pfm_bytes(svn, &digest));
            let capsule =
                update_capsule(&mut self.keys, component, svn, &firmware);

            let dev = self.platform.device_mut(component);
            dev.0[..firmware.len()].copy_from_slice(&firmware);
            dev.0[ACTIVE_PFM as usize..][..pfm_blob.len()]
                .copy_from_slice(&pfm_blob);
            dev.0[RECOVERY as usize..][..capsule.len()]
                .copy_from_slice(&capsule);
            firmware
        }
    }

    #[test]
    fn clean_verify() {
        let mut rig = Rig::new();
        rig.install(Component::Bmc, 1);

        let mut orch = rig.orchestrator();
        let pfm = orch.verify_active(Component::Bmc).unwrap();
        assert_eq!(pfm.header.svn, 1);
        orch.verify_recovery(Component::Bmc).unwrap();
    }

    #[test]
    fn corrupt_active_repaired_from_recovery() {
        let mut rig = Rig::new();
        let firmware = rig.install(Component::Bmc, 1);

        // Corrupt a firmware byte and the PFM page.
        rig.platform.bmc.0[100] ^= 0xff;
        rig.platform.bmc.0[ACTIVE_PFM as usize + 50] ^= 0xff;

        let mut orch = rig.orchestrator();
        assert!(orch.verify_active(Component::Bmc).is_err());
        orch.verify_recovery(Component::Bmc).unwrap();

        orch.recover_active_region(Component::Bmc).unwrap();
        orch.verify_active(Component::Bmc).unwrap();
        assert_eq!(&rig.platform.bmc.0[..firmware.len()], &firmware[..]);
    }

    #[test]
    fn recovery_rebuilt_from_staging() {
        let mut rig = Rig::new();
        rig.install(Component::Pch, 1);

        // Wipe the recovery region, stage a fresh capsule.
        let capsule = update_capsule(
            &mut rig.keys,
            Component::Pch,
            1,
            &vec![0x5a; (FIRMWARE_PAGES as usize) * PAGE],
        );
        for b in
            &mut rig.platform.pch.0[RECOVERY as usize..STAGING as usize]
        {
            *b = 0;
        }
        rig.platform.pch.0[STAGING as usize..][..capsule.len()]
            .copy_from_slice(&capsule);

        let mut orch = rig.orchestrator();
        assert!(orch.verify_recovery(Component::Pch).is_err());
        orch.recover_recovery_region(Component::Pch).unwrap();
        orch.verify_recovery(Component::Pch).unwrap();
    }

    #[test]
    fn update_to_recovery_slot() {
        let mut rig = Rig::new();
        rig.install(Component::Bmc, 1);
        rig.store.set_svn(KeyClass::BmcUpdate, 1).unwrap();

        let new_firmware = vec![0xa5; (FIRMWARE_PAGES as usize) * PAGE];
        let capsule =
            update_capsule(&mut rig.keys, Component::Bmc, 2, &new_firmware);
        rig.platform.bmc.0[STAGING as usize..][..capsule.len()]
            .copy_from_slice(&capsule);
        rig.store
            .set_pending(Pending::BmcRecovery.into())
            .unwrap();

        let mut orch = rig.orchestrator();
        orch.apply_update(Target::Bmc, Slot::Recovery).unwrap();

        assert_eq!(
            &rig.platform.bmc.0[RECOVERY as usize..][..capsule.len()],
            &capsule[..]
        );
        assert_eq!(rig.store.svn(KeyClass::BmcUpdate).unwrap(), 2);
        assert!(rig.store.pending().unwrap().is_empty());
    }

    #[test]
    fn update_to_active_slot() {
        let mut rig = Rig::new();
        rig.install(Component::Bmc, 1);
        rig.store.set_svn(KeyClass::BmcUpdate, 1).unwrap();

        let new_firmware = vec![0xa5; (FIRMWARE_PAGES as usize) * PAGE];
        let capsule =
            update_capsule(&mut rig.keys, Component::Bmc, 2, &new_firmware);
        rig.platform.bmc.0[STAGING as usize..][..capsule.len()]
            .copy_from_slice(&capsule);

        let mut orch = rig.orchestrator();
        orch.apply_update(Target::Bmc, Slot::Active).unwrap();
        orch.verify_active(Component::Bmc).unwrap();
        assert_eq!(
            &rig.platform.bmc.0[..new_firmware.len()],
            &new_firmware[..]
        );
    }

    #[test]
    fn stale_svn_is_rejected() {
        let mut rig = Rig::new();
        rig.install(Component::Bmc, 2);
        rig.store.set_svn(KeyClass::BmcUpdate, 2).unwrap();

        let capsule = update_capsule(
            &mut rig.keys,
            Component::Bmc,
            2,
            &vec![0xa5; (FIRMWARE_PAGES as usize) * PAGE],
        );
        rig.platform.bmc.0[STAGING as usize..][..capsule.len()]
            .copy_from_slice(&capsule);

        let mut orch = rig.orchestrator();
        assert_eq!(
            orch.apply_update(Target::Bmc, Slot::Recovery)
                .err()
                .unwrap()
                .into_inner(),
            Error::Policy(policy::Error::SvnRollback {
                current: 2,
                proposed: 2
            }),
        );
        assert_eq!(rig.store.svn(KeyClass::BmcUpdate).unwrap(), 2);
    }

    #[test]
    fn broken_recovery_vetoes_active_update() {
        let mut rig = Rig::new();
        rig.install(Component::Bmc, 1);

        let capsule = update_capsule(
            &mut rig.keys,
            Component::Bmc,
            2,
            &vec![0xa5; (FIRMWARE_PAGES as usize) * PAGE],
        );
        rig.platform.bmc.0[STAGING as usize..][..capsule.len()]
            .copy_from_slice(&capsule);
        rig.platform.bmc.0[RECOVERY as usize] ^= 0xff;

        let mut orch = rig.orchestrator();
        assert!(orch.apply_update(Target::Bmc, Slot::Active).is_err());
        // Recovery-slot updates are still allowed; that is how the
        // broken region gets fixed.
        orch.apply_update(Target::Bmc, Slot::Recovery).unwrap();
    }

    #[test]
    fn key_cancellation_via_staging() {
        let mut rig = Rig::new();
        rig.keys.csk_id = 5;
        rig.install(Component::Bmc, 1);

        let cert = rig
            .keys
            .sign_cancellation(PcType::BmcUpdateKeyCancel, 5);
        rig.platform.bmc.0[STAGING as usize..][..cert.len()]
            .copy_from_slice(&cert);

        let mut orch = rig.orchestrator();
        orch.apply_update(Target::Bmc, Slot::Active).unwrap();
        assert!(rig
            .store
            .key_cancelled(KeyClass::BmcUpdate, 5)
            .unwrap());

        // The cancelled CSK can no longer sign updates.
        let capsule = update_capsule(
            &mut rig.keys,
            Component::Bmc,
            2,
            &vec![0xa5; (FIRMWARE_PAGES as usize) * PAGE],
        );
        rig.platform.bmc.0[STAGING as usize..][..capsule.len()]
            .copy_from_slice(&capsule);
        let mut orch = rig.orchestrator();
        assert_eq!(
            orch.apply_update(Target::Bmc, Slot::Recovery)
                .err()
                .unwrap()
                .into_inner(),
            Error::Auth(manifest::Error::KeyCancelled(5)),
        );
    }

    #[test]
    fn decommission_erases_provisioning() {
        let mut rig = Rig::new();
        let cert = rig.keys.sign_decommission();
        let staging = rig.platform.rot_staging.address as usize;
        rig.platform.bmc.0[staging..][..cert.len()]
            .copy_from_slice(&cert);

        let mut orch = rig.orchestrator();
        orch.apply_update(Target::Rot, Slot::Active).unwrap();

        assert!(!rig.store.is_provisioned().unwrap());
        assert!(rig
            .store
            .pending()
            .unwrap()
            .contains(Pending::Decommission));
    }

    #[test]
    fn rot_update_backs_up_and_installs() {
        let mut rig = Rig::new();
        for b in &mut rig.platform.rot.0[..4 * PAGE] {
            *b = 0x11;
        }

        let image = vec![0x99u8; PAGE];
        let mut content = 42u32.to_le_bytes().to_vec();
        content.extend_from_slice(&[0; ROT_CAPSULE_RESERVED as usize]);
        content.extend_from_slice(&image);
        let capsule = rig.keys.sign_capsule(PcType::RotUpdate, &content);

        let staging = rig.platform.rot_staging.address as usize;
        rig.platform.bmc.0[staging..][..capsule.len()]
            .copy_from_slice(&capsule);

        let mut orch = rig.orchestrator();
        orch.apply_update(Target::Rot, Slot::Active).unwrap();

        // Old image backed up, new image installed.
        assert!(rig.platform.rot.0[8 * PAGE..12 * PAGE]
            .iter()
            .all(|&b| b == 0x11));
        assert_eq!(&rig.platform.rot.0[..PAGE], &image[..]);
        assert_eq!(rig.store.svn(KeyClass::RotUpdate).unwrap(), 42);
    }

    #[test]
    fn pch_update_via_bmc_relay() {
        let mut rig = Rig::new();
        rig.install(Component::Pch, 1);
        rig.store.set_svn(KeyClass::PchUpdate, 1).unwrap();

        let capsule = update_capsule(
            &mut rig.keys,
            Component::Pch,
            2,
            &vec![0xa5; (FIRMWARE_PAGES as usize) * PAGE],
        );
        // Park the capsule in the BMC relay, not PCH staging.
        let relay = (STAGING + BMC_STAGING_RELAY_OFFSET) as usize;
        rig.platform
            .bmc
            .0
            .resize(relay + capsule.len() + PAGE, 0xff);
        rig.platform.bmc.0[relay..][..capsule.len()]
            .copy_from_slice(&capsule);
        rig.store
            .set_pending(Pending::PchRecovery | Pending::BmcToPchRelay)
            .unwrap();

        let mut orch = rig.orchestrator();
        orch.apply_update(Target::Pch, Slot::Recovery).unwrap();

        assert_eq!(
            &rig.platform.pch.0[RECOVERY as usize..][..capsule.len()],
            &capsule[..]
        );
        assert!(rig.store.pending().unwrap().is_empty());
    }
}
