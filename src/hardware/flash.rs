// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! External, remote flash abstraction.
//!
//! This module provides the [`Flash`] (and related) traits, which represent
//! *abstract flash devices*. An abstract flash device is a region of memory
//! that can be read, programmed, and erased. Such a "device" can range from
//! a simple Rust slice to a remote SPI flash device (or even a subregion of
//! it!).
//!
//! Unlike RAM, flash is erased in coarse, [`PAGE_SIZE`]-sized units, and a
//! page must be erased before it can be reprogrammed; the copy routines in
//! [`copier`](crate::copier) are built around this constraint.

use core::convert::TryInto;

use static_assertions::assert_obj_safe;

use zerocopy::AsBytes;
use zerocopy::FromBytes;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Result;

/// The size, in bytes, of a flash erase page.
///
/// Every device this crate drives erases in 4 KiB sectors; offsets handed to
/// [`Flash::erase()`] must be aligned to this value.
pub const PAGE_SIZE: u32 = 0x1000;

/// A [`Flash`] error.
///
/// All of these errors are non-retryable; a [`Flash`] implementation should
/// block until the operation succeeds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates that an operation failed because the requested
    /// operation was outside of the device's address space.
    OutOfRange,

    /// Indicates that the device is locked in some manner and cannot
    /// be affected by the operation.
    Locked,

    /// Indicates that an erase offset was not aligned to [`PAGE_SIZE`].
    Misaligned,

    /// Indicates that an unspecified error occured.
    Unspecified,
}

/// Provides access to a flash-like storage device.
///
/// This trait provides abstract operations on a device, as if it were a
/// block of random-access memory. It is the implementation's responsibility
/// to implement these operations efficiently with respect to the underlying
/// device.
pub trait Flash {
    /// Returns the size, in bytes, of this device.
    fn size(&self) -> Result<u32, Error>;

    /// Attempts to read `out.len()` bytes starting at `offset`.
    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error>;

    /// Attempts to write `buf.len()` bytes starting at `offset`.
    ///
    /// Note that this function is not guaranteed to succeed (and be
    /// reflected in the return value of `read`) until `flush()` is called.
    /// This is to permit a `Flash` implementation to buffer writes before
    /// sending them out.
    ///
    /// Programming a page that has not been erased since it was last
    /// programmed has device-dependent (but non-catastrophic) results.
    fn program(&mut self, offset: Ptr, buf: &[u8]) -> Result<(), Error>;

    /// Erases the [`PAGE_SIZE`]-byte page beginning at `offset`, which must
    /// be page-aligned.
    ///
    /// After this call, every byte of the page reads as `0xff`.
    fn erase(&mut self, offset: Ptr) -> Result<(), Error>;

    /// Flushes any pending `program()` operations.
    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
assert_obj_safe!(Flash);

impl<F: Flash> Flash for &F {
    #[inline]
    fn size(&self) -> Result<u32, Error> {
        F::size(self)
    }

    #[inline]
    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        F::read(self, offset, out)
    }

    #[inline]
    fn program(&mut self, _: Ptr, _: &[u8]) -> Result<(), Error> {
        Err(fail!(Error::Locked))
    }

    #[inline]
    fn erase(&mut self, _: Ptr) -> Result<(), Error> {
        Err(fail!(Error::Locked))
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Error> {
        Err(fail!(Error::Locked))
    }
}

impl<F: Flash + ?Sized> Flash for &mut F {
    #[inline]
    fn size(&self) -> Result<u32, Error> {
        F::size(self)
    }

    #[inline]
    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        F::read(self, offset, out)
    }

    #[inline]
    fn program(&mut self, offset: Ptr, buf: &[u8]) -> Result<(), Error> {
        F::program(self, offset, buf)
    }

    #[inline]
    fn erase(&mut self, offset: Ptr) -> Result<(), Error> {
        F::erase(self, offset)
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Error> {
        F::flush(self)
    }
}

/// Convenience functions for flash reads, exposed as an extension trait.
#[extend::ext(name = FlashExt)]
pub impl<F: Flash + ?Sized> F {
    /// Reads a value of type `T` at `offset`, by value.
    ///
    /// `T` is required to have no alignment or validity requirements, which
    /// is true of all the wire structs in this crate.
    fn read_object<T: AsBytes + FromBytes>(
        &self,
        offset: Ptr,
    ) -> Result<T, Error> {
        let mut val = T::new_zeroed();
        self.read(offset, val.as_bytes_mut())?;
        Ok(val)
    }
}

/// Adapter for working with a sub-region of a [`Flash`] type.
///
/// Reads and writes on the device will be constrained to a given [`Region`].
/// This is especially useful for operating on a blob contained within another
/// region of flash.
///
/// There is no requirement that [`Region`] actually overlap with the address
/// space of `F`; the [`Flash`] implementation is still responsible for doing
/// bounds checks, after offsets are bounds-checked within `Region`.
#[derive(Copy, Clone)]
pub struct SubFlash<F>(pub F, pub Region);

impl<F: Flash> SubFlash<F> {
    /// Creates a new `SubFlash` representing the entirety of the given device.
    pub fn full(flash: F) -> Result<Self, Error> {
        let region = Region::new(0, flash.size()?);
        Ok(Self(flash, region))
    }
}

impl<F: Flash> Flash for SubFlash<F> {
    #[inline]
    fn size(&self) -> Result<u32, Error> {
        Ok(self.1.len)
    }

    #[inline]
    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        check!(offset.address < self.1.len, Error::OutOfRange);
        let offset = offset
            .address
            .checked_add(self.1.ptr.address)
            .ok_or_else(|| fail!(Error::OutOfRange))?;

        self.0.read(Ptr::new(offset), out)
    }

    #[inline]
    fn program(&mut self, offset: Ptr, buf: &[u8]) -> Result<(), Error> {
        check!(offset.address < self.1.len, Error::OutOfRange);
        let offset = offset
            .address
            .checked_add(self.1.ptr.address)
            .ok_or_else(|| fail!(Error::OutOfRange))?;

        self.0.program(Ptr::new(offset), buf)
    }

    #[inline]
    fn erase(&mut self, offset: Ptr) -> Result<(), Error> {
        check!(offset.address < self.1.len, Error::OutOfRange);
        let offset = offset
            .address
            .checked_add(self.1.ptr.address)
            .ok_or_else(|| fail!(Error::OutOfRange))?;

        self.0.erase(Ptr::new(offset))
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Error> {
        self.0.flush()
    }
}

/// Adapter for converting RAM-backed storage into a read-only [`Flash`].
///
/// For the purposes of this type, "RAM-backed" means that `AsRef<[u8]>`
/// is implemented.
#[derive(Copy, Clone)]
pub struct Ram<Bytes>(pub Bytes);

impl<Bytes: AsRef<[u8]>> Flash for Ram<Bytes> {
    fn size(&self) -> Result<u32, Error> {
        self.0
            .as_ref()
            .len()
            .try_into()
            .map_err(|_| fail!(Error::Unspecified))
    }

    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        let start = offset.address as usize;
        let end = start
            .checked_add(out.len())
            .ok_or_else(|| fail!(Error::OutOfRange))?;
        check!(end <= self.0.as_ref().len(), Error::OutOfRange);

        out.copy_from_slice(&self.0.as_ref()[start..end]);
        Ok(())
    }

    fn program(&mut self, _: Ptr, _: &[u8]) -> Result<(), Error> {
        Err(fail!(Error::Locked))
    }

    fn erase(&mut self, _: Ptr) -> Result<(), Error> {
        Err(fail!(Error::Locked))
    }
}

/// Adapter for converting mutable, RAM-backed storage into a [`Flash`].
///
/// For the purposes of this type, "RAM-backed" means that `AsRef<[u8]>`
/// and `AsMut<[u8]>` are implemented.
#[derive(Copy, Clone)]
pub struct RamMut<Bytes>(pub Bytes);

impl<Bytes: AsRef<[u8]> + AsMut<[u8]>> Flash for RamMut<Bytes> {
    fn size(&self) -> Result<u32, Error> {
        self.0
            .as_ref()
            .len()
            .try_into()
            .map_err(|_| fail!(Error::Unspecified))
    }

    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        let start = offset.address as usize;
        let end = start
            .checked_add(out.len())
            .ok_or_else(|| fail!(Error::OutOfRange))?;
        check!(end <= self.0.as_ref().len(), Error::OutOfRange);

        out.copy_from_slice(&self.0.as_ref()[start..end]);
        Ok(())
    }

    fn program(&mut self, offset: Ptr, buf: &[u8]) -> Result<(), Error> {
        let start = offset.address as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| fail!(Error::OutOfRange))?;
        check!(end <= self.0.as_ref().len(), Error::OutOfRange);

        self.0.as_mut()[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn erase(&mut self, offset: Ptr) -> Result<(), Error> {
        check!(offset.address % PAGE_SIZE == 0, Error::Misaligned);
        let start = offset.address as usize;
        let end = start
            .checked_add(PAGE_SIZE as usize)
            .ok_or_else(|| fail!(Error::OutOfRange))?;
        check!(end <= self.0.as_ref().len(), Error::OutOfRange);

        for byte in &mut self.0.as_mut()[start..end] {
            *byte = 0xff;
        }
        Ok(())
    }
}

/// An abstract pointer into a [`Flash`] type.
///
/// A `Ptr` needs to be used in conjunction with a [`Flash`]
/// implementation to be read from or written to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsBytes, FromBytes)]
#[repr(transparent)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ptr {
    /// The abstract address of this pointer.
    pub address: u32,
}

impl Ptr {
    /// Convenience method for creating a `Ptr` without having to use
    /// a struct literal.
    pub const fn new(address: u32) -> Self {
        Self { address }
    }
}

/// A region within a [`Flash`] type.
///
/// Much like a [`Ptr`], a `Region` needs to be interpreted with
/// respect to a [`Flash`] implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsBytes, FromBytes)]
#[repr(C)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Region {
    /// The base pointer for this slice.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub ptr: Ptr,
    /// The length of the slice, in bytes.
    pub len: u32,
}

impl Region {
    /// Convenience method for creating a `Region` without having to use
    /// a struct literal.
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self {
            ptr: Ptr::new(ptr),
            len,
        }
    }
}
