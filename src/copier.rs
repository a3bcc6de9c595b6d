// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Destructive flash-to-flash copies.
//!
//! Everything here obeys one invariant: a destination page is erased
//! immediately before it is rewritten, never earlier. A power cut can
//! therefore leave at most one page in a half-written state, and
//! re-running the same copy converges on the same final image.
//!
//! [`sparse_copy`] implements the bitmap-compressed form used by update
//! capsules: most pages of a firmware image are unchanged between
//! versions, so the capsule carries two one-bit-per-page maps (pages to
//! erase, pages to rewrite) and a payload stream holding only the
//! rewritten pages.

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::flash::PAGE_SIZE;
use crate::manifest::SIG_BLOCK_SIZE;
use crate::Result;

/// The magic tag of a compression header.
pub const COMPRESSION_TAG: u32 = 0x5f50_4243;

/// A region-copier error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// No valid compression header was found in a capsule.
    BadHeader,

    /// A wrapped flash error.
    Flash(flash::Error),
}

impl From<flash::Error> for Error {
    fn from(e: flash::Error) -> Self {
        Self::Flash(e)
    }
}

debug_from!(Error => flash::Error);

/// The compression header of a bitmap-compressed capsule.
#[derive(Copy, Clone, AsBytes, FromBytes)]
#[repr(C)]
pub struct CompressionHeader {
    /// Must be [`COMPRESSION_TAG`].
    pub tag: u32,
    /// Format version.
    pub version: u32,
    /// The page size the bitmaps are expressed in.
    pub page_size: u32,
    /// Length of the fill pattern, in bytes.
    pub pattern_size: u32,
    /// The fill pattern erased pages are assumed to hold.
    pub pattern: u32,
    /// The number of bits in each of the two bitmaps.
    pub bitmap_bits: u32,
    /// The length of the page payload stream.
    pub payload_length: u32,
    /// Reserved; zero.
    pub reserved: [u8; 100],
}

static_assertions::const_assert_eq!(
    core::mem::size_of::<CompressionHeader>(),
    128
);

/// Copies `len` bytes from `src_base` in `src` to `dst_base` in `dst`,
/// which must be page-aligned.
///
/// Each destination page is erased immediately before it is rewritten,
/// so a partial failure can be retried by re-running the whole copy.
pub fn copy_region<Src, Dst>(
    src: &Src,
    src_base: Ptr,
    dst: &mut Dst,
    dst_base: Ptr,
    len: u32,
) -> Result<(), flash::Error>
where
    Src: Flash + ?Sized,
    Dst: Flash + ?Sized,
{
    let mut buf = [0; 256];
    let mut copied = 0;
    while copied < len {
        dst.erase(Ptr::new(dst_base.address + copied))?;

        let page_end = (copied + PAGE_SIZE).min(len);
        while copied < page_end {
            let chunk = ((page_end - copied) as usize).min(buf.len());
            src.read(Ptr::new(src_base.address + copied), &mut buf[..chunk])?;
            dst.program(
                Ptr::new(dst_base.address + copied),
                &buf[..chunk],
            )?;
            copied += chunk as u32;
        }
    }
    dst.flush()
}

/// Copies `len` bytes between two spans of the same device, erasing
/// each destination page immediately before rewriting it.
///
/// The spans must not overlap; the source span is read after pages of
/// the destination span have been erased.
pub fn copy_within<F: Flash + ?Sized>(
    dev: &mut F,
    src_base: Ptr,
    dst_base: Ptr,
    len: u32,
) -> Result<(), flash::Error> {
    let mut buf = [0; 256];
    let mut copied = 0;
    while copied < len {
        dev.erase(Ptr::new(dst_base.address + copied))?;

        let page_end = (copied + PAGE_SIZE).min(len);
        while copied < page_end {
            let chunk = ((page_end - copied) as usize).min(buf.len());
            dev.read(Ptr::new(src_base.address + copied), &mut buf[..chunk])?;
            dev.program(
                Ptr::new(dst_base.address + copied),
                &buf[..chunk],
            )?;
            copied += chunk as u32;
        }
    }
    dev.flush()
}

/// Walks the set bits of a bitmap in flash, MSB-first within each byte,
/// calling `visit` with each set bit's index.
fn for_each_set_bit<F, V>(
    flash: &F,
    bitmap: Ptr,
    bits: u32,
    mut visit: V,
) -> Result<(), flash::Error>
where
    F: Flash + ?Sized,
    V: FnMut(u32) -> Result<(), flash::Error>,
{
    let mut buf = [0; 64];
    let mut bit = 0;
    while bit < bits {
        let chunk = (((bits - bit) / 8) as usize).max(1).min(buf.len());
        flash.read(Ptr::new(bitmap.address + bit / 8), &mut buf[..chunk])?;
        for byte in &buf[..chunk] {
            for j in 0..8 {
                if bit >= bits {
                    break;
                }
                if byte & (0x80 >> j) != 0 {
                    visit(bit)?;
                }
                bit += 1;
            }
        }
    }
    Ok(())
}

/// Performs a bitmap-driven sparse copy into `dst`.
///
/// Pages selected by the bitmap at `erase_bitmap` are erased; pages
/// selected by the bitmap at `write_bitmap` are then rewritten from the
/// payload stream at `payload`, which advances one page per set bit.
/// Bit `i` of either bitmap names the page at `i * PAGE_SIZE` of `dst`.
pub fn sparse_copy<Src, Dst>(
    src: &Src,
    erase_bitmap: Ptr,
    write_bitmap: Ptr,
    payload: Ptr,
    bits: u32,
    dst: &mut Dst,
) -> Result<(), flash::Error>
where
    Src: Flash + ?Sized,
    Dst: Flash + ?Sized,
{
    for_each_set_bit(src, erase_bitmap, bits, |bit| {
        dst.erase(Ptr::new(bit * PAGE_SIZE))
    })?;

    let mut payload_cursor = payload.address;
    let mut buf = [0; 256];
    for_each_set_bit(src, write_bitmap, bits, |bit| {
        let dst_page = bit * PAGE_SIZE;
        // The erase pass above covers every written page; pages whose
        // erase bit is set but whose write bit is not are left erased.
        for chunk_start in (0..PAGE_SIZE).step_by(buf.len()) {
            let chunk = ((PAGE_SIZE - chunk_start) as usize).min(buf.len());
            src.read(
                Ptr::new(payload_cursor + chunk_start),
                &mut buf[..chunk],
            )?;
            dst.program(
                Ptr::new(dst_page + chunk_start),
                &buf[..chunk],
            )?;
        }
        payload_cursor += PAGE_SIZE;
        Ok(())
    })?;

    dst.flush()
}

/// Locates the compression header of the capsule at `capsule` by
/// scanning forward past its two signature blocks.
///
/// The header's offset varies with the inner manifest's length, so it is
/// found by its tag rather than computed.
pub fn find_compression_header<F: Flash + ?Sized>(
    flash: &F,
    capsule: Ptr,
) -> Result<(Ptr, CompressionHeader), Error> {
    let mut offset = capsule.address + 2 * SIG_BLOCK_SIZE;
    let end = flash.size()?;
    while offset + 4 <= end {
        let word: [u8; 4] = flash.read_object(Ptr::new(offset))?;
        if u32::from_le_bytes(word) == COMPRESSION_TAG {
            let header: CompressionHeader =
                flash.read_object(Ptr::new(offset))?;
            check!(header.page_size == PAGE_SIZE, Error::BadHeader);
            check!(header.bitmap_bits % 8 == 0, Error::BadHeader);
            return Ok((Ptr::new(offset), header));
        }
        offset += 1;
    }
    Err(fail!(Error::BadHeader))
}

/// Decompresses the capsule at `capsule` in `src` onto `dst`.
///
/// This is [`sparse_copy`] with the bitmap and payload locations taken
/// from the capsule's compression header.
pub fn decompress<Src, Dst>(
    src: &Src,
    capsule: Ptr,
    dst: &mut Dst,
) -> Result<(), Error>
where
    Src: Flash + ?Sized,
    Dst: Flash + ?Sized,
{
    let (base, header) = find_compression_header(src, capsule)?;
    let bitmap_len = header.bitmap_bits / 8;

    let erase_bitmap = base.address + 128;
    let write_bitmap = erase_bitmap + bitmap_len;
    let payload = write_bitmap + bitmap_len;

    sparse_copy(
        src,
        Ptr::new(erase_bitmap),
        Ptr::new(write_bitmap),
        Ptr::new(payload),
        header.bitmap_bits,
        dst,
    )?;
    Ok(())
}

/// Decompresses a capsule onto the very device that holds it.
///
/// This is the shape active-region repair takes: the recovery capsule
/// and the active image live on the same chip, and the capsule's page
/// indices address the device from offset zero. The capsule span itself
/// must not be selected by either bitmap.
pub fn decompress_within<F: Flash + ?Sized>(
    dev: &mut F,
    capsule: Ptr,
) -> Result<(), Error> {
    let (base, header) = find_compression_header(&*dev, capsule)?;
    let bits = header.bitmap_bits;
    let bitmap_len = bits / 8;

    let erase_bitmap = base.address + 128;
    let write_bitmap = erase_bitmap + bitmap_len;
    let mut payload = write_bitmap + bitmap_len;

    let mut buf = [0; 64];

    // Erase pass.
    let mut bit = 0;
    while bit < bits {
        let chunk = (((bits - bit) / 8).max(1) as usize).min(buf.len());
        dev.read(Ptr::new(erase_bitmap + bit / 8), &mut buf[..chunk])?;
        for i in 0..chunk {
            let byte = buf[i];
            for j in 0..8 {
                if bit >= bits {
                    break;
                }
                if byte & (0x80 >> j) != 0 {
                    dev.erase(Ptr::new(bit * PAGE_SIZE))?;
                }
                bit += 1;
            }
        }
    }

    // Write pass; the payload advances one page per set bit.
    let mut page = [0; 256];
    let mut bit = 0;
    while bit < bits {
        let chunk = (((bits - bit) / 8).max(1) as usize).min(buf.len());
        dev.read(Ptr::new(write_bitmap + bit / 8), &mut buf[..chunk])?;
        for i in 0..chunk {
            let byte = buf[i];
            for j in 0..8 {
                if bit >= bits {
                    break;
                }
                if byte & (0x80 >> j) != 0 {
                    let dst_page = bit * PAGE_SIZE;
                    for off in (0..PAGE_SIZE).step_by(page.len()) {
                        let n =
                            ((PAGE_SIZE - off) as usize).min(page.len());
                        dev.read(
                            Ptr::new(payload + off),
                            &mut page[..n],
                        )?;
                        dev.program(
                            Ptr::new(dst_page + off),
                            &page[..n],
                        )?;
                    }
                    payload += PAGE_SIZE;
                }
                bit += 1;
            }
        }
    }

    dev.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::flash::Ram;
    use crate::hardware::flash::RamMut;

    /// A flash wrapper that fails each `program()` after a budget of
    /// successes, simulating a power cut mid-copy.
    struct Flaky<F> {
        inner: F,
        programs_left: usize,
    }

    impl<F: Flash> Flash for Flaky<F> {
        fn size(&self) -> crate::Result<u32, flash::Error> {
            self.inner.size()
        }
        fn read(
            &self,
            offset: Ptr,
            out: &mut [u8],
        ) -> crate::Result<(), flash::Error> {
            self.inner.read(offset, out)
        }
        fn program(
            &mut self,
            offset: Ptr,
            buf: &[u8],
        ) -> crate::Result<(), flash::Error> {
            if self.programs_left == 0 {
                return Err(fail!(flash::Error::Unspecified));
            }
            self.programs_left -= 1;
            self.inner.program(offset, buf)
        }
        fn erase(&mut self, offset: Ptr) -> crate::Result<(), flash::Error> {
            self.inner.erase(offset)
        }
    }

    const PAGE: usize = PAGE_SIZE as usize;

    #[test]
    fn copy_region_basics() {
        let src = Ram(vec![0x5a; PAGE * 2 + 100]);
        let mut dst = RamMut(vec![0; PAGE * 4]);

        copy_region(
            &src,
            Ptr::new(0),
            &mut dst,
            Ptr::new(PAGE_SIZE),
            PAGE as u32 * 2 + 100,
        )
        .unwrap();

        assert!(dst.0[..PAGE].iter().all(|&b| b == 0));
        assert!(dst.0[PAGE..PAGE * 3 + 100].iter().all(|&b| b == 0x5a));
        // The tail of the last touched page reads erased, not stale.
        assert!(dst.0[PAGE * 3 + 100..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn copy_region_retry_after_fault_converges() {
        let src = Ram((0..PAGE * 3).map(|i| i as u8).collect::<Vec<_>>());

        let mut clean = RamMut(vec![0xab; PAGE * 3]);
        copy_region(&src, Ptr::new(0), &mut clean, Ptr::new(0), (PAGE * 3) as u32)
            .unwrap();

        for &fault_after in &[0, 1, 16, 17, 33] {
            let mut flaky = Flaky {
                inner: RamMut(vec![0xab; PAGE * 3]),
                programs_left: fault_after,
            };
            assert!(copy_region(
                &src,
                Ptr::new(0),
                &mut flaky,
                Ptr::new(0),
                (PAGE * 3) as u32
            )
            .is_err());

            // Retry with the fault gone; result must match the clean run.
            let mut dst = flaky.inner;
            copy_region(&src, Ptr::new(0), &mut dst, Ptr::new(0), (PAGE * 3) as u32)
                .unwrap();
            assert_eq!(dst.0, clean.0);
        }
    }

    fn compressed_capsule(
        erase_bits: &[u8],
        write_bits: &[u8],
        payload: &[u8],
    ) -> Vec<u8> {
        assert_eq!(erase_bits.len(), write_bits.len());
        let mut capsule = vec![0u8; 2 * SIG_BLOCK_SIZE as usize];
        let header = CompressionHeader {
            tag: COMPRESSION_TAG,
            version: 2,
            page_size: PAGE_SIZE,
            pattern_size: 1,
            pattern: 0xff,
            bitmap_bits: erase_bits.len() as u32 * 8,
            payload_length: payload.len() as u32,
            reserved: [0; 100],
        };
        capsule.extend_from_slice(header.as_bytes());
        capsule.extend_from_slice(erase_bits);
        capsule.extend_from_slice(write_bits);
        capsule.extend_from_slice(payload);
        capsule
    }

    #[test]
    fn sparse_copy_touches_only_selected_pages() {
        // Pages 0 and 2 erased; only page 2 rewritten.
        let mut payload = vec![0x11; PAGE];
        payload[0] = 0x22;
        let capsule =
            compressed_capsule(&[0b1010_0000], &[0b0010_0000], &payload);
        let src = Ram(&capsule);

        let mut dst = RamMut(vec![0x77; PAGE * 8]);
        decompress(&src, Ptr::new(0), &mut dst).unwrap();

        // Page 0: erased, not rewritten.
        assert!(dst.0[..PAGE].iter().all(|&b| b == 0xff));
        // Page 1: untouched.
        assert!(dst.0[PAGE..PAGE * 2].iter().all(|&b| b == 0x77));
        // Page 2: rewritten from the payload.
        assert_eq!(dst.0[PAGE * 2], 0x22);
        assert!(dst.0[PAGE * 2 + 1..PAGE * 3].iter().all(|&b| b == 0x11));
        // Everything beyond: untouched.
        assert!(dst.0[PAGE * 3..].iter().all(|&b| b == 0x77));

        // Re-running converges on the same image.
        let snapshot = dst.0.clone();
        decompress(&src, Ptr::new(0), &mut dst).unwrap();
        assert_eq!(dst.0, snapshot);
    }

    #[test]
    fn copy_within_same_device() {
        let mut dev = RamMut(vec![0u8; PAGE * 4]);
        for (i, b) in dev.0[..PAGE].iter_mut().enumerate() {
            *b = i as u8;
        }

        copy_within(&mut dev, Ptr::new(0), Ptr::new(2 * PAGE_SIZE), PAGE as u32)
            .unwrap();
        assert_eq!(&dev.0[..PAGE], &dev.0[PAGE * 2..PAGE * 3]);
        assert!(dev.0[PAGE..PAGE * 2].iter().all(|&b| b == 0));
    }

    #[test]
    fn decompress_within_same_device() {
        // Capsule at page 8; bitmaps cover pages 0-7.
        let payload = vec![0x42u8; PAGE];
        let capsule =
            compressed_capsule(&[0b1100_0000], &[0b0100_0000], &payload);
        let mut image = vec![0x77u8; PAGE * 16];
        image[PAGE * 8..PAGE * 8 + capsule.len()].copy_from_slice(&capsule);

        let mut dev = RamMut(image);
        decompress_within(&mut dev, Ptr::new((PAGE * 8) as u32)).unwrap();

        assert!(dev.0[..PAGE].iter().all(|&b| b == 0xff));
        assert!(dev.0[PAGE..PAGE * 2].iter().all(|&b| b == 0x42));
        assert!(dev.0[PAGE * 2..PAGE * 8].iter().all(|&b| b == 0x77));
    }

    #[test]
    fn missing_compression_header_is_rejected() {
        let src = Ram(vec![0u8; 3 * SIG_BLOCK_SIZE as usize]);
        let mut dst = RamMut(vec![0u8; PAGE]);
        assert_eq!(
            decompress(&src, Ptr::new(0), &mut dst)
                .err()
                .unwrap()
                .into_inner(),
            Error::BadHeader,
        );
    }
}
