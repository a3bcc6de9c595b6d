// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The provisioning store: the non-volatile root of the root of trust.
//!
//! Two small flash regions back this module. The *provisioning region*
//! holds everything burned in at manufacturing: the root key hash, the
//! flash layout of each protected component, the minimum security version
//! numbers, and the key-cancellation policies. The *update-status region*
//! holds the pending-update record, which must survive a reset in the
//! middle of an update.
//!
//! Both regions are plain [`Flash`] devices, so the encodings below are
//! chosen to respect flash physics: an erased field is all-ones, and
//! updates that must be monotone (SVN bumps, key cancellations) only ever
//! clear bits.

use enumflags2::bitflags;
use enumflags2::BitFlags;

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::flash::PAGE_SIZE;
use crate::hardware::Component;
use crate::Result;

/// The highest security version number a capsule may carry.
///
/// SVN policies are 64-bit one-hot-threshold masks, so version 64 would
/// leave no room to revoke anything beyond it.
pub const MAX_SVN: u8 = 63;

/// The number of key-id bits in each cancellation policy field.
const CANCELLATION_BITS: u8 = 128;

// Provisioning-region layout. Everything lives in the first erase page.
const STATUS_OFFSET: u32 = 0x000;
const ROOT_KEY_HASH_OFFSET: u32 = 0x004;
const PCH_OFFSETS_OFFSET: u32 = 0x024;
const BMC_OFFSETS_OFFSET: u32 = 0x030;
const ROT_SVN_OFFSET: u32 = 0x084;
const PCH_SVN_OFFSET: u32 = 0x08c;
const BMC_SVN_OFFSET: u32 = 0x094;
const CANCELLATION_OFFSET: u32 = 0x09c;
const CANCELLATION_STRIDE: u32 = 0x10;

// Status-word bits. An erased (all-ones) word reads as "no bits set".
const STATUS_LOCKED: u32 = 1 << 0;
const STATUS_PROVISIONED: u32 = 1 << 5;

/// Tag marking a valid update-status record.
const UPDATE_STATUS_TAG: u32 = 0x7464_7075;

/// A provisioning-store error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The store is locked, and the requested mutation is only legal
    /// before locking.
    Locked,

    /// The store has not been provisioned, so the requested field does
    /// not have a meaningful value.
    NotProvisioned,

    /// A key id or version number was out of its field's range.
    OutOfRange,

    /// A wrapped flash error.
    Flash(flash::Error),
}

impl From<flash::Error> for Error {
    fn from(e: flash::Error) -> Self {
        Self::Flash(e)
    }
}

debug_from!(Error => flash::Error);

/// A class of signing keys, one per signable content type.
///
/// Each class has its own cancellation policy field; both capsule types
/// of a component share that component's SVN policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyClass {
    /// Keys that sign this device's own update capsules.
    RotUpdate,
    /// Keys that sign PCH firmware manifests.
    PchPfm,
    /// Keys that sign PCH update capsules.
    PchUpdate,
    /// Keys that sign BMC firmware manifests.
    BmcPfm,
    /// Keys that sign BMC update capsules.
    BmcUpdate,
}

impl KeyClass {
    fn cancellation_offset(self) -> u32 {
        let index = match self {
            Self::RotUpdate => 0,
            Self::PchPfm => 1,
            Self::PchUpdate => 2,
            Self::BmcPfm => 3,
            Self::BmcUpdate => 4,
        };
        CANCELLATION_OFFSET + index * CANCELLATION_STRIDE
    }

    fn svn_offset(self) -> u32 {
        match self {
            Self::RotUpdate => ROT_SVN_OFFSET,
            Self::PchPfm | Self::PchUpdate => PCH_SVN_OFFSET,
            Self::BmcPfm | Self::BmcUpdate => BMC_SVN_OFFSET,
        }
    }
}

/// The provisioned flash layout of one protected component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, AsBytes, FromBytes)]
#[repr(C)]
pub struct Offsets {
    /// Offset of the active firmware's signed PFM.
    pub active_pfm: u32,
    /// Offset of the recovery capsule.
    pub recovery: u32,
    /// Offset of the staging area updates are written to.
    pub staging: u32,
}

/// A pending operation recorded in the update-status region.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pending {
    /// A PCH active-firmware update is staged.
    PchActive = 1 << 0,
    /// A PCH recovery-capsule update is staged.
    PchRecovery = 1 << 1,
    /// A BMC active-firmware update is staged.
    BmcActive = 1 << 2,
    /// A BMC recovery-capsule update is staged.
    BmcRecovery = 1 << 3,
    /// The PCH staging capsule lives in the BMC's staging relay.
    BmcToPchRelay = 1 << 4,
    /// The device has been decommissioned.
    Decommission = 1 << 5,
}

#[derive(Copy, Clone, AsBytes, FromBytes)]
#[repr(C)]
struct RawUpdateStatus {
    tag: u32,
    flags: u8,
    reserved: [u8; 3],
}

/// The provisioning store.
///
/// Provisioning proper is a three-command handshake: the root key hash,
/// the PCH offsets, and the BMC offsets are each staged in RAM, and the
/// store commits to flash only once all three have arrived. Until then
/// nothing is written and the store stays unprovisioned.
pub struct Store<F> {
    ufm: F,
    status: F,
    staged_root: Option<[u8; 32]>,
    staged_pch: Option<Offsets>,
    staged_bmc: Option<Offsets>,
}

impl<F: Flash> Store<F> {
    /// Creates a new `Store` over the given provisioning and
    /// update-status regions.
    pub fn new(ufm: F, status: F) -> Self {
        Self {
            ufm,
            status,
            staged_root: None,
            staged_pch: None,
            staged_bmc: None,
        }
    }

    /// Reads the provisioning page, applies `f` to it, and writes it
    /// back with an erase cycle in between.
    fn update(
        &mut self,
        f: impl FnOnce(&mut [u8]),
    ) -> Result<(), Error> {
        let mut page = [0xff; PAGE_SIZE as usize];
        self.ufm.read(Ptr::new(0), &mut page)?;
        f(&mut page);
        self.ufm.erase(Ptr::new(0))?;
        self.ufm.program(Ptr::new(0), &page)?;
        self.ufm.flush()?;
        Ok(())
    }

    fn status_word(&self) -> Result<u32, Error> {
        let word: [u8; 4] = self.ufm.read_object(Ptr::new(STATUS_OFFSET))?;
        let word = u32::from_le_bytes(word);
        // An erased status word means nothing has happened yet.
        Ok(if word == !0 { 0 } else { word })
    }

    /// Returns whether the store has been locked.
    pub fn is_locked(&self) -> Result<bool, Error> {
        Ok(self.status_word()? & STATUS_LOCKED != 0)
    }

    /// Returns whether the store has been provisioned.
    pub fn is_provisioned(&self) -> Result<bool, Error> {
        Ok(self.status_word()? & STATUS_PROVISIONED != 0)
    }

    /// Permanently locks the store against re-provisioning.
    ///
    /// SVN bumps and key cancellations remain possible after locking;
    /// they are monotone, not re-provisioning.
    pub fn lock(&mut self) -> Result<(), Error> {
        check!(self.is_provisioned()?, Error::NotProvisioned);
        let word = self.status_word()? | STATUS_LOCKED;
        self.update(|page| {
            page[STATUS_OFFSET as usize..][..4]
                .copy_from_slice(&word.to_le_bytes())
        })
    }

    /// Erases the provisioning region and any staged handshake state.
    ///
    /// This is deliberately legal even when locked: it is the erase half
    /// of decommissioning, which is authorized by a root-signed capsule
    /// rather than by the lock bit.
    pub fn erase(&mut self) -> Result<(), Error> {
        self.staged_root = None;
        self.staged_pch = None;
        self.staged_bmc = None;
        self.ufm.erase(Ptr::new(0))?;
        self.ufm.flush()?;
        Ok(())
    }

    /// Stages the root key hash. Returns whether this completed the
    /// provisioning handshake.
    pub fn stage_root_key_hash(
        &mut self,
        hash: [u8; 32],
    ) -> Result<bool, Error> {
        check!(!self.is_locked()?, Error::Locked);
        self.staged_root = Some(hash);
        self.try_commit()
    }

    /// Stages the PCH flash layout. Returns whether this completed the
    /// provisioning handshake.
    pub fn stage_pch_offsets(
        &mut self,
        offsets: Offsets,
    ) -> Result<bool, Error> {
        check!(!self.is_locked()?, Error::Locked);
        self.staged_pch = Some(offsets);
        self.try_commit()
    }

    /// Stages the BMC flash layout. Returns whether this completed the
    /// provisioning handshake.
    pub fn stage_bmc_offsets(
        &mut self,
        offsets: Offsets,
    ) -> Result<bool, Error> {
        check!(!self.is_locked()?, Error::Locked);
        self.staged_bmc = Some(offsets);
        self.try_commit()
    }

    fn try_commit(&mut self) -> Result<bool, Error> {
        let (root, pch, bmc) =
            match (self.staged_root, self.staged_pch, self.staged_bmc) {
                (Some(r), Some(p), Some(b)) => (r, p, b),
                _ => return Ok(false),
            };

        let word = self.status_word()? | STATUS_PROVISIONED;
        self.update(|page| {
            page[STATUS_OFFSET as usize..][..4]
                .copy_from_slice(&word.to_le_bytes());
            page[ROOT_KEY_HASH_OFFSET as usize..][..32].copy_from_slice(&root);
            page[PCH_OFFSETS_OFFSET as usize..][..12]
                .copy_from_slice(pch.as_bytes());
            page[BMC_OFFSETS_OFFSET as usize..][..12]
                .copy_from_slice(bmc.as_bytes());
        })?;

        self.staged_root = None;
        self.staged_pch = None;
        self.staged_bmc = None;
        info!("provisioning store committed");
        Ok(true)
    }

    /// Returns the provisioned root key hash.
    pub fn root_key_hash(&self) -> Result<[u8; 32], Error> {
        check!(self.is_provisioned()?, Error::NotProvisioned);
        Ok(self.ufm.read_object(Ptr::new(ROOT_KEY_HASH_OFFSET))?)
    }

    /// Returns the provisioned flash layout for `component`.
    pub fn offsets(&self, component: Component) -> Result<Offsets, Error> {
        check!(self.is_provisioned()?, Error::NotProvisioned);
        let offset = match component {
            Component::Pch => PCH_OFFSETS_OFFSET,
            Component::Bmc => BMC_OFFSETS_OFFSET,
        };
        Ok(self.ufm.read_object(Ptr::new(offset))?)
    }

    /// Returns the minimum acceptable SVN for `class`.
    ///
    /// The policy is a 64-bit mask whose lowest set bit is the minimum;
    /// a fully-cleared mask (every version revoked) reads as 64, which
    /// no capsule can satisfy.
    pub fn svn(&self, class: KeyClass) -> Result<u8, Error> {
        let mask: [u8; 8] = self.ufm.read_object(Ptr::new(class.svn_offset()))?;
        for (i, byte) in mask.iter().enumerate() {
            if *byte != 0 {
                return Ok(i as u8 * 8 + byte.trailing_zeros() as u8);
            }
        }
        Ok(64)
    }

    /// Raises the minimum acceptable SVN for `class` to `svn`.
    ///
    /// This only ever clears policy bits, so a power cut mid-write can
    /// never lower the minimum.
    pub fn set_svn(&mut self, class: KeyClass, svn: u8) -> Result<(), Error> {
        check!(svn <= MAX_SVN + 1, Error::OutOfRange);
        let base = class.svn_offset() as usize;
        self.update(|page| {
            for i in 0..(svn / 8) as usize {
                page[base + i] = 0;
            }
            let partial = svn % 8;
            if partial != 0 {
                page[base + (svn / 8) as usize] &= !((1u8 << partial) - 1);
            }
        })
    }

    /// Returns whether `key_id` has been cancelled for `class`.
    pub fn key_cancelled(
        &self,
        class: KeyClass,
        key_id: u8,
    ) -> Result<bool, Error> {
        check!(key_id < CANCELLATION_BITS, Error::OutOfRange);
        let mut byte = [0];
        self.ufm.read(
            Ptr::new(class.cancellation_offset() + key_id as u32 / 8),
            &mut byte,
        )?;
        // A cleared bit is a cancelled key; erased flash cancels nothing.
        Ok(byte[0] & (0x80 >> (key_id % 8)) == 0)
    }

    /// Cancels `key_id` for `class`. Irreversible.
    pub fn cancel_key(
        &mut self,
        class: KeyClass,
        key_id: u8,
    ) -> Result<(), Error> {
        check!(key_id < CANCELLATION_BITS, Error::OutOfRange);
        let offset =
            (class.cancellation_offset() + key_id as u32 / 8) as usize;
        let mask = 0x80 >> (key_id % 8);
        warn!("cancelling key {} for {:?}", key_id, class);
        self.update(|page| page[offset] &= !mask)
    }

    /// Reads the pending-update record.
    pub fn pending(&self) -> Result<BitFlags<Pending>, Error> {
        let raw: RawUpdateStatus = self.status.read_object(Ptr::new(0))?;
        if raw.tag != UPDATE_STATUS_TAG {
            return Ok(BitFlags::empty());
        }
        Ok(BitFlags::from_bits_truncate(raw.flags))
    }

    /// Replaces the pending-update record.
    pub fn set_pending(
        &mut self,
        flags: BitFlags<Pending>,
    ) -> Result<(), Error> {
        let raw = RawUpdateStatus {
            tag: UPDATE_STATUS_TAG,
            flags: flags.bits(),
            reserved: [0; 3],
        };
        self.status.erase(Ptr::new(0))?;
        self.status.program(Ptr::new(0), raw.as_bytes())?;
        self.status.flush()?;
        Ok(())
    }

    /// Clears `flag` from the pending-update record.
    pub fn clear_pending(&mut self, flag: Pending) -> Result<(), Error> {
        let flags = self.pending()?;
        self.set_pending(flags & !BitFlags::from_flag(flag))
    }
}
