// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Signed firmware manifest manipulation.
//!
//! Every signable blob in the system, whether a firmware manifest proper
//! or a multi-megabyte update capsule, carries the same 1 KiB *signature
//! block* in front of its protected content:
//!
//! ```text
//! offset 0    Block 0 (128 bytes): content descriptor
//!               tag, pc_length, pc_type, SHA-256 digest, SHA-384 digest
//! offset 128  Block 1: signature chain
//!               header (16 bytes)
//!               root key entry (132 bytes)
//!               CSK entry (232 bytes)     -- absent for key cancellation
//!               block 0 entry (104 bytes)
//! offset 1024 protected content (pc_length bytes)
//! ```
//!
//! All integers are little-endian; key coordinates and signature scalars
//! are big-endian, as the ECDSA engines consume them.
//!
//! The chain is rooted in a hash of the root public key held in the
//! provisioning store: the root key signs the CSK, the CSK signs block 0,
//! and block 0's digest covers the content. [`verify`] walks this chain.

use crate::crypto::ecdsa;
use crate::crypto::hash;
use crate::hardware::flash;
use crate::hardware::Component;
use crate::provision;

pub mod block0;
pub mod block1;
pub mod pfm;

mod verify;
pub use verify::cancelled_key_id;
pub use verify::pc_type;
pub use verify::verify;
pub use verify::Verified;

#[cfg(test)]
pub(crate) mod testutil;

/// The size, in bytes, of a full signature block, including both blocks'
/// padding.
pub const SIG_BLOCK_SIZE: u32 = 1024;

wire_enum! {
    /// A protected-content type: what a signature block claims to carry.
    ///
    /// The numbering is fixed by the capsule format. Values with bit 8 set
    /// are key-cancellation certificates for the corresponding base type.
    pub enum PcType: u32 {
        /// An update capsule for this device's own firmware.
        RotUpdate = 0x000,
        /// The PCH's firmware manifest.
        PchPfm = 0x001,
        /// An update capsule for the PCH.
        PchUpdate = 0x002,
        /// The BMC's firmware manifest.
        BmcPfm = 0x003,
        /// An update capsule for the BMC.
        BmcUpdate = 0x004,
        /// A key-cancellation certificate for RoT update capsules.
        RotUpdateKeyCancel = 0x100,
        /// A key-cancellation certificate for PCH PFMs.
        PchPfmKeyCancel = 0x101,
        /// A key-cancellation certificate for PCH update capsules.
        PchUpdateKeyCancel = 0x102,
        /// A key-cancellation certificate for BMC PFMs.
        BmcPfmKeyCancel = 0x103,
        /// A key-cancellation certificate for BMC update capsules.
        BmcUpdateKeyCancel = 0x104,
        /// A decommission capsule, which wipes the provisioning store.
        Decommission = 0x200,
    }
}

impl PcType {
    /// The PFM content type for `component`.
    pub fn pfm_for(component: Component) -> Self {
        match component {
            Component::Pch => Self::PchPfm,
            Component::Bmc => Self::BmcPfm,
        }
    }

    /// The update-capsule content type for `component`.
    pub fn update_for(component: Component) -> Self {
        match component {
            Component::Pch => Self::PchUpdate,
            Component::Bmc => Self::BmcUpdate,
        }
    }

    /// Returns whether this is a key-cancellation certificate.
    pub fn is_key_cancellation(self) -> bool {
        (self as u32) & 0x100 != 0
    }

    /// Returns the key class a signature of this type draws its signing
    /// key from.
    ///
    /// For a key-cancellation certificate, this is the class whose key is
    /// being cancelled; the certificate itself is root-signed.
    pub fn key_class(self) -> provision::KeyClass {
        match self {
            Self::RotUpdate | Self::RotUpdateKeyCancel | Self::Decommission => {
                provision::KeyClass::RotUpdate
            }
            Self::PchPfm | Self::PchPfmKeyCancel => provision::KeyClass::PchPfm,
            Self::PchUpdate | Self::PchUpdateKeyCancel => {
                provision::KeyClass::PchUpdate
            }
            Self::BmcPfm | Self::BmcPfmKeyCancel => provision::KeyClass::BmcPfm,
            Self::BmcUpdate | Self::BmcUpdateKeyCancel => {
                provision::KeyClass::BmcUpdate
            }
        }
    }

    /// The CSK permission-mask bit that authorizes signing content of this
    /// type.
    pub fn permission_bit(self) -> u32 {
        match self.key_class() {
            provision::KeyClass::PchPfm => 1 << 0,
            provision::KeyClass::PchUpdate => 1 << 1,
            provision::KeyClass::BmcPfm => 1 << 2,
            provision::KeyClass::BmcUpdate => 1 << 3,
            provision::KeyClass::RotUpdate => 1 << 4,
        }
    }
}

/// An authentication error: why a signature block was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A structure's magic tag did not match; the payload is not what the
    /// caller claimed it is. Carries the tag that was found.
    BadTag(u32),

    /// The content type in block 0 is not one this device understands,
    /// or does not match what the caller expected at this location.
    UnsupportedPcType(u32),

    /// A curve magic along the chain disagreed with the curve established
    /// by the root key.
    CurveMismatch,

    /// The CSK's permission mask does not allow it to sign this content
    /// type.
    PermissionDenied,

    /// The CSK's key id has been cancelled. Carries the key id.
    KeyCancelled(u8),

    /// The root public key does not hash to the provisioned value.
    NotRootKey,

    /// The root entry is malformed: a real root key carries all-ones
    /// permissions and key id.
    BadRootEntry,

    /// Block 0's digest over the protected content did not match.
    HashMismatch,

    /// A digest over one of the flash regions named by a firmware manifest
    /// did not match. Carries the index of the offending region.
    RegionHashMismatch {
        /// The position of the failing region in the manifest's list.
        index: usize,
    },

    /// The protected content length is implausible for the region that
    /// holds it.
    BadLength,

    /// A firmware manifest's region definition list is malformed.
    BadRegionDef,

    /// A wrapped flash error.
    Flash(flash::Error),

    /// A wrapped hashing error.
    Hash(hash::Error),

    /// A wrapped signature-verification error.
    Sig(ecdsa::Error),

    /// A wrapped provisioning-store error.
    Provision(provision::Error),
}

impl From<flash::Error> for Error {
    fn from(e: flash::Error) -> Self {
        Self::Flash(e)
    }
}

impl From<hash::Error> for Error {
    fn from(e: hash::Error) -> Self {
        Self::Hash(e)
    }
}

impl From<ecdsa::Error> for Error {
    fn from(e: ecdsa::Error) -> Self {
        Self::Sig(e)
    }
}

impl From<provision::Error> for Error {
    fn from(e: provision::Error) -> Self {
        Self::Provision(e)
    }
}

debug_from!(Error => flash::Error, hash::Error, ecdsa::Error, provision::Error);
