// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Block 1: the signature chain of a signature block.
//!
//! Block 1 holds, in order, a header, the root key entry, an optional CSK
//! (code-signing key) entry, and the "block 0 entry", a signature over
//! block 0 itself. Key-cancellation and decommission certificates omit
//! the CSK entry; the root key signs block 0 directly.

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::crypto::ecdsa;
use crate::manifest::Error;
use crate::Result;

/// The magic tag of the block 1 header.
pub const BLOCK1_TAG: u32 = 0xf27f_28d7;
/// The magic tag of the root key entry.
pub const ROOT_ENTRY_TAG: u32 = 0xa757_a046;
/// The magic tag of a CSK entry.
pub const CSK_ENTRY_TAG: u32 = 0x1471_1c2f;
/// The magic tag of the block 0 entry.
pub const BLOCK0_ENTRY_TAG: u32 = 0x1536_4367;

/// Curve magic for a P-256 public key.
pub const PUBKEY_P256_MAGIC: u32 = 0xc7b8_8c74;
/// Curve magic for a P-384 public key.
pub const PUBKEY_P384_MAGIC: u32 = 0x08f0_7b47;
/// Curve magic for a P-256 signature.
pub const SIG_P256_MAGIC: u32 = 0xde64_437d;
/// Curve magic for a P-384 signature.
pub const SIG_P384_MAGIC: u32 = 0xea2a_50e9;

/// Offset of block 1 within a signature block.
pub const BLOCK1_OFFSET: u32 = 128;
/// Offset of the root key entry within a signature block.
pub const ROOT_ENTRY_OFFSET: u32 = BLOCK1_OFFSET + 16;
/// Offset of the CSK entry (when present) within a signature block.
pub const CSK_ENTRY_OFFSET: u32 = ROOT_ENTRY_OFFSET + 132;
/// Offset of the block 0 entry within a signature block that carries a
/// CSK entry. Without one, the block 0 entry sits at
/// [`CSK_ENTRY_OFFSET`] instead.
pub const BLOCK0_ENTRY_OFFSET: u32 = CSK_ENTRY_OFFSET + 232;

/// Maps a public-key curve magic to its curve.
pub fn curve_from_pubkey_magic(magic: u32) -> Option<ecdsa::Curve> {
    match magic {
        PUBKEY_P256_MAGIC => Some(ecdsa::Curve::P256),
        PUBKEY_P384_MAGIC => Some(ecdsa::Curve::P384),
        _ => None,
    }
}

/// Maps a signature curve magic to its curve.
pub fn curve_from_sig_magic(magic: u32) -> Option<ecdsa::Curve> {
    match magic {
        SIG_P256_MAGIC => Some(ecdsa::Curve::P256),
        SIG_P384_MAGIC => Some(ecdsa::Curve::P384),
        _ => None,
    }
}

/// The block 1 header: a tag and reserved padding.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct Header {
    /// Must be [`BLOCK1_TAG`].
    pub tag: u32,
    /// Reserved; zero.
    pub reserved: [u8; 12],
}

/// A key entry: the root key entry verbatim, and the key half of a CSK
/// entry.
///
/// Key coordinates are big-endian and left-aligned; a P-256 key occupies
/// the first 32 bytes of each coordinate field, the rest zero.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct KeyEntry {
    /// [`ROOT_ENTRY_TAG`] or [`CSK_ENTRY_TAG`].
    pub tag: u32,
    /// The public-key curve magic.
    pub curve_magic: u32,
    /// Which content types this key may sign; all-ones for the root key.
    pub permissions: u32,
    /// This key's cancellation id; all-ones for the root key.
    pub key_id: u32,
    /// Public-key x coordinate.
    pub x: [u8; 48],
    /// Public-key y coordinate.
    pub y: [u8; 48],
    /// Reserved; zero.
    pub reserved: [u8; 20],
}

static_assertions::const_assert_eq!(core::mem::size_of::<KeyEntry>(), 132);

/// A signature: the tail of a CSK entry or a block 0 entry.
///
/// Scalars are big-endian and left-aligned, like key coordinates.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct Signature {
    /// The signature curve magic.
    pub sig_magic: u32,
    /// Signature scalar `r`.
    pub r: [u8; 48],
    /// Signature scalar `s`.
    pub s: [u8; 48],
}

/// A CSK entry: an intermediate key, root-signed over its 128-byte body
/// (everything in the [`KeyEntry`] after the tag).
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct CskEntry {
    /// The key being delegated to.
    pub key: KeyEntry,
    /// The root key's signature over `key`'s body.
    pub signature: Signature,
}

static_assertions::const_assert_eq!(core::mem::size_of::<CskEntry>(), 232);

/// The block 0 entry: a signature over the 128-byte block 0.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct Block0Entry {
    /// Must be [`BLOCK0_ENTRY_TAG`].
    pub tag: u32,
    /// The signature over block 0.
    pub signature: Signature,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Block0Entry>(), 104);

impl Header {
    /// Checks this header's magic tag.
    pub fn validate(&self) -> Result<(), Error> {
        check!(self.tag == BLOCK1_TAG, Error::BadTag(self.tag));
        Ok(())
    }
}

impl KeyEntry {
    /// Validates this entry as a root key entry.
    ///
    /// A root entry must carry all-ones permissions and key id: the root
    /// key is not subject to permission masks or cancellation.
    pub fn validate_as_root(&self) -> Result<ecdsa::Curve, Error> {
        check!(self.tag == ROOT_ENTRY_TAG, Error::BadTag(self.tag));
        check!(self.permissions == !0, Error::BadRootEntry);
        check!(self.key_id == !0, Error::BadRootEntry);
        curve_from_pubkey_magic(self.curve_magic)
            .ok_or_else(|| fail!(Error::CurveMismatch))
    }

    /// Returns the curve this key lives on.
    pub fn curve(&self) -> Result<ecdsa::Curve, Error> {
        curve_from_pubkey_magic(self.curve_magic)
            .ok_or_else(|| fail!(Error::CurveMismatch))
    }

    /// Returns the signed body of this entry: everything after the tag.
    pub fn body(&self) -> &[u8] {
        &self.as_bytes()[4..]
    }

    /// Returns the `(x, y)` coordinate slices, trimmed to the curve's
    /// scalar width.
    pub fn coordinates(&self, curve: ecdsa::Curve) -> (&[u8], &[u8]) {
        let scalar = curve.scalar_bytes();
        (&self.x[..scalar], &self.y[..scalar])
    }
}

impl Signature {
    /// Returns the curve this signature claims, checking it against the
    /// curve established earlier in the chain.
    pub fn curve_checked(
        &self,
        expected: ecdsa::Curve,
    ) -> Result<ecdsa::Curve, Error> {
        let curve = curve_from_sig_magic(self.sig_magic)
            .ok_or_else(|| fail!(Error::CurveMismatch))?;
        check!(curve == expected, Error::CurveMismatch);
        Ok(curve)
    }

    /// Returns the `(r, s)` scalar slices, trimmed to the curve's scalar
    /// width.
    pub fn scalars(&self, curve: ecdsa::Curve) -> (&[u8], &[u8]) {
        let scalar = curve.scalar_bytes();
        (&self.r[..scalar], &self.s[..scalar])
    }
}

impl Block0Entry {
    /// Checks this entry's magic tag.
    pub fn validate(&self) -> Result<(), Error> {
        check!(self.tag == BLOCK0_ENTRY_TAG, Error::BadTag(self.tag));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn root_entry_validation() {
        let mut entry = KeyEntry::new_zeroed();
        entry.tag = ROOT_ENTRY_TAG;
        entry.curve_magic = PUBKEY_P384_MAGIC;
        entry.permissions = !0;
        entry.key_id = !0;
        assert_eq!(entry.validate_as_root().unwrap(), ecdsa::Curve::P384);

        entry.permissions = 0x10;
        assert_eq!(
            entry.validate_as_root().err().unwrap().into_inner(),
            Error::BadRootEntry
        );
    }

    #[test]
    fn key_entry_body_excludes_tag() {
        let mut entry = KeyEntry::new_zeroed();
        entry.tag = CSK_ENTRY_TAG;
        entry.curve_magic = PUBKEY_P256_MAGIC;
        assert_eq!(entry.body().len(), 128);
        assert_eq!(&entry.body()[..4], &PUBKEY_P256_MAGIC.to_le_bytes());
    }

    #[test]
    fn signature_curve_check() {
        let mut sig = Signature::new_zeroed();
        sig.sig_magic = SIG_P256_MAGIC;
        assert!(sig.curve_checked(ecdsa::Curve::P256).is_ok());
        assert_eq!(
            sig.curve_checked(ecdsa::Curve::P384)
                .err()
                .unwrap()
                .into_inner(),
            Error::CurveMismatch
        );
    }
}
