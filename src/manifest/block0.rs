// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Block 0: the content descriptor at the head of every signature block.

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::crypto::ecdsa;
use crate::manifest::Error;
use crate::Result;

/// The magic tag at the start of every block 0.
pub const BLOCK0_TAG: u32 = 0xb6ea_fd19;

/// Block 0 of a signature block.
///
/// This is a plain wire struct: 128 little-endian bytes, exactly as found
/// in flash.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct Block0 {
    /// Must be [`BLOCK0_TAG`].
    pub tag: u32,
    /// The length, in bytes, of the protected content following the
    /// signature block.
    pub pc_length: u32,
    /// The content type; see [`PcType`](crate::manifest::PcType).
    pub pc_type: u32,
    /// Reserved; zero.
    pub reserved0: u32,
    /// SHA-256 digest of the protected content.
    pub sha256: [u8; 32],
    /// SHA-384 digest of the protected content.
    pub sha384: [u8; 48],
    /// Reserved; zero.
    pub reserved1: [u8; 32],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Block0>(), 128);

impl Block0 {
    /// Checks this block's magic tag.
    pub fn validate(&self) -> Result<(), Error> {
        check!(self.tag == BLOCK0_TAG, Error::BadTag(self.tag));
        Ok(())
    }

    /// Returns the content digest appropriate for `curve`'s paired hash
    /// algorithm.
    pub fn digest(&self, curve: ecdsa::Curve) -> &[u8] {
        match curve {
            ecdsa::Curve::P256 => &self.sha256[..],
            ecdsa::Curve::P384 => &self.sha384[..],
        }
    }
}
