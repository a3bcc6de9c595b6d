// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The platform firmware manifest (PFM) proper: the protected content of
//! a `PchPfm` or `BmcPfm` signature block.
//!
//! A PFM is a 32-byte header followed by a list of variable-length
//! definitions. The only definition this crate acts on is the *SPI
//! region*: an address range of the protected device's flash, optionally
//! pinned to a digest. At boot, every pinned region is hashed and
//! compared; a mismatch is what sends a component into recovery.

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::crypto::hash;
use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::manifest::Error;
use crate::Result;

/// The magic tag at the start of every PFM.
pub const PFM_TAG: u32 = 0x02b3_ce1d;

/// Definition type byte for an SPI region.
const SPI_REGION_DEF: u8 = 1;
/// Definition type byte for an SMBus filter rule, which this crate skips
/// over but does not interpret.
const SMBUS_RULE_DEF: u8 = 2;
/// The fixed size of an SMBus filter rule definition.
const SMBUS_RULE_LEN: u32 = 40;

/// The PFM header.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct Header {
    /// Must be [`PFM_TAG`].
    pub tag: u32,
    /// This firmware's security version number.
    pub svn: u8,
    /// The "best known configuration" version.
    pub bkc_version: u8,
    /// Firmware major version, surfaced through the mailbox.
    pub version_major: u8,
    /// Firmware minor version.
    pub version_minor: u8,
    /// Reserved; zero.
    pub reserved: u32,
    /// Uninterpreted platform-specific bytes.
    pub oem_data: [u8; 16],
    /// Total length of the PFM in bytes, header included.
    pub length: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Header>(), 32);

impl Header {
    /// Checks this header's magic tag and length field.
    pub fn validate(&self) -> Result<(), Error> {
        check!(self.tag == PFM_TAG, Error::BadTag(self.tag));
        check!(
            self.length as usize >= core::mem::size_of::<Self>(),
            Error::BadLength
        );
        Ok(())
    }
}

/// An SPI region definition, as encoded in a PFM.
///
/// The digest, when present, immediately follows the fixed part.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
struct RawSpiRegion {
    def_type: u8,
    protection: u8,
    hash_info: u16,
    reserved: u32,
    start: u32,
    end: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawSpiRegion>(), 16);

/// A decoded SPI region definition.
#[derive(Copy, Clone, Debug)]
pub struct SpiRegion {
    /// The protection mask: which bus masters may read and write this
    /// region. Passed through to the platform's flash filter, not
    /// interpreted here.
    pub protection: u8,
    /// The digest algorithm this region is pinned to, if any.
    pub hash_algo: Option<hash::Algo>,
    /// The range of device flash this region covers.
    pub range: flash::Region,
    digest: [u8; 48],
}

impl SpiRegion {
    /// Returns the digest this region is pinned to, if any.
    pub fn digest(&self) -> Option<&[u8]> {
        self.hash_algo.map(|a| &self.digest[..a.bytes()])
    }
}

/// A PFM located at some offset of a flash device.
#[derive(Copy, Clone, Debug)]
pub struct Pfm {
    /// The PFM's header.
    pub header: Header,
    base: Ptr,
}

impl Pfm {
    /// Reads and validates the PFM header at `base` in `flash`.
    pub fn read<F: Flash + ?Sized>(
        flash: &F,
        base: Ptr,
    ) -> Result<Self, Error> {
        let header: Header = flash.read_object(base)?;
        header.validate()?;
        Ok(Self { header, base })
    }

    /// Returns an iterator-like walker over this PFM's SPI region
    /// definitions in `flash`.
    pub fn regions<'f, F: Flash + ?Sized>(
        &self,
        flash: &'f F,
    ) -> Regions<'f, F> {
        Regions {
            flash,
            cursor: self.base.address + core::mem::size_of::<Header>() as u32,
            end: self.base.address + self.header.length,
            index: 0,
        }
    }

    /// Hashes every pinned SPI region of `device` and compares it against
    /// the digest recorded in this PFM (which lives in `pfm_flash`).
    ///
    /// Returns the index of the first mismatching region via
    /// [`Error::RegionHashMismatch`].
    pub fn verify_regions<F1, F2>(
        &self,
        hasher: &mut dyn hash::Engine,
        pfm_flash: &F1,
        device: &F2,
    ) -> Result<(), Error>
    where
        F1: Flash + ?Sized,
        F2: Flash + ?Sized,
    {
        let mut regions = self.regions(pfm_flash);
        while let Some((index, region)) = regions.next_region()? {
            let algo = match region.hash_algo {
                Some(a) => a,
                None => continue,
            };
            let digest = match region.digest() {
                Some(d) => d,
                None => continue,
            };

            hasher.start_raw(algo)?;
            let mut buf = [0; 256];
            let mut offset = region.range.ptr.address;
            let mut left = region.range.len as usize;
            while left > 0 {
                let chunk = left.min(buf.len());
                device.read(Ptr::new(offset), &mut buf[..chunk])?;
                hasher.write_raw(&buf[..chunk])?;
                offset += chunk as u32;
                left -= chunk;
            }
            if hasher.compare_raw(digest).is_err() {
                return Err(fail!(Error::RegionHashMismatch { index }));
            }
        }
        Ok(())
    }
}

/// A walker over the SPI region definitions of a [`Pfm`].
///
/// This is not an `Iterator`, since each step can fail; call
/// [`next_region()`](Self::next_region) until it yields `None`.
pub struct Regions<'f, F: ?Sized> {
    flash: &'f F,
    cursor: u32,
    end: u32,
    index: usize,
}

impl<F: Flash + ?Sized> Regions<'_, F> {
    /// Decodes the next SPI region definition, skipping definitions of
    /// other types, along with its index in the region list.
    pub fn next_region(
        &mut self,
    ) -> Result<Option<(usize, SpiRegion)>, Error> {
        while self.cursor < self.end {
            let mut def_type = [0];
            self.flash.read(Ptr::new(self.cursor), &mut def_type)?;
            match def_type[0] {
                SPI_REGION_DEF => {
                    let raw: RawSpiRegion =
                        self.flash.read_object(Ptr::new(self.cursor))?;
                    self.cursor += core::mem::size_of::<RawSpiRegion>() as u32;

                    check!(raw.end > raw.start, Error::BadRegionDef);
                    let hash_algo = match raw.hash_info & 0b11 {
                        0b00 => None,
                        0b01 => Some(hash::Algo::Sha256),
                        0b10 => Some(hash::Algo::Sha384),
                        _ => return Err(fail!(Error::BadRegionDef)),
                    };

                    let mut digest = [0; 48];
                    if let Some(algo) = hash_algo {
                        let len = algo.bytes();
                        self.flash
                            .read(Ptr::new(self.cursor), &mut digest[..len])?;
                        self.cursor += len as u32;
                    }
                    check!(self.cursor <= self.end, Error::BadRegionDef);

                    let index = self.index;
                    self.index += 1;
                    return Ok(Some((
                        index,
                        SpiRegion {
                            protection: raw.protection,
                            hash_algo,
                            range: flash::Region::new(
                                raw.start,
                                raw.end - raw.start,
                            ),
                            digest,
                        },
                    )));
                }
                SMBUS_RULE_DEF => {
                    self.cursor += SMBUS_RULE_LEN;
                    check!(self.cursor <= self.end, Error::BadRegionDef);
                }
                // Trailing padding; definitions are 0xff-padded out to a
                // page boundary.
                0xff => return Ok(None),
                _ => return Err(fail!(Error::BadRegionDef)),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::ring;
    use crate::crypto::hash::EngineExt as _;
    use crate::hardware::flash::Ram;

    fn test_pfm(regions: &[(u32, u32, Option<&[u8]>)]) -> Vec<u8> {
        let mut body = vec![];
        for &(start, end, digest) in regions {
            let raw = RawSpiRegion {
                def_type: SPI_REGION_DEF,
                protection: 0b11,
                hash_info: match digest.map(<[u8]>::len) {
                    None => 0,
                    Some(32) => 0b01,
                    Some(48) => 0b10,
                    _ => panic!("bad digest length"),
                },
                reserved: 0,
                start,
                end,
            };
            body.extend_from_slice(raw.as_bytes());
            body.extend_from_slice(digest.unwrap_or(&[]));
        }

        let header = Header {
            tag: PFM_TAG,
            svn: 1,
            bkc_version: 1,
            version_major: 2,
            version_minor: 7,
            reserved: 0,
            oem_data: [0; 16],
            length: (core::mem::size_of::<Header>() + body.len()) as u32,
        };
        let mut pfm = header.as_bytes().to_vec();
        pfm.extend_from_slice(&body);
        pfm
    }

    #[test]
    fn walk_regions() {
        let digest = [0xaa; 32];
        let pfm_bytes = test_pfm(&[
            (0x0, 0x1000, Some(&digest)),
            (0x1000, 0x3000, None),
        ]);
        let flash = Ram(&pfm_bytes);

        let pfm = Pfm::read(&flash, Ptr::new(0)).unwrap();
        assert_eq!(pfm.header.version_major, 2);

        let mut regions = pfm.regions(&flash);
        let (index, first) = regions.next_region().unwrap().unwrap();
        assert_eq!(index, 0);
        assert_eq!(first.hash_algo, Some(hash::Algo::Sha256));
        assert_eq!(first.digest().unwrap(), &digest);
        assert_eq!(first.range, flash::Region::new(0, 0x1000));

        let (_, second) = regions.next_region().unwrap().unwrap();
        assert_eq!(second.hash_algo, None);
        assert_eq!(second.digest(), None);
        assert_eq!(second.range, flash::Region::new(0x1000, 0x2000));

        assert!(regions.next_region().unwrap().is_none());
    }

    #[test]
    fn verify_pinned_regions() {
        let device = Ram(vec![0x5a; 0x2000]);
        let mut engine = ring::Engine::new();
        let mut digest = [0; 32];
        engine
            .contiguous_hash(
                hash::Algo::Sha256,
                &vec![0x5a; 0x1000],
                &mut digest,
            )
            .unwrap();

        let pfm_bytes = test_pfm(&[(0x1000, 0x2000, Some(&digest))]);
        let flash = Ram(&pfm_bytes);
        let pfm = Pfm::read(&flash, Ptr::new(0)).unwrap();
        pfm.verify_regions(&mut engine, &flash, &device).unwrap();

        let bad_pfm = test_pfm(&[(0x1000, 0x2000, Some(&[0x11; 32]))]);
        let bad_flash = Ram(&bad_pfm);
        let pfm = Pfm::read(&bad_flash, Ptr::new(0)).unwrap();
        assert_eq!(
            pfm.verify_regions(&mut engine, &bad_flash, &device)
                .err()
                .unwrap()
                .into_inner(),
            Error::RegionHashMismatch { index: 0 },
        );
    }

    #[test]
    fn reject_garbage_definition() {
        let mut pfm_bytes = test_pfm(&[(0x0, 0x1000, None)]);
        pfm_bytes[32] = 0x33;
        let flash = Ram(&pfm_bytes);
        let pfm = Pfm::read(&flash, Ptr::new(0)).unwrap();
        assert_eq!(
            pfm.regions(&flash)
                .next_region()
                .err()
                .unwrap()
                .into_inner(),
            Error::BadRegionDef,
        );
    }
}
