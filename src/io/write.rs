// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Provides the [`Write`] trait, analogous to [`std::io::Write`].

use core::mem;

use static_assertions::assert_obj_safe;

use crate::io;
use crate::io::endian::LeInt;
use crate::Result;

/// Represents a place that bytes can be written to, such as a `&mut [u8]`.
pub trait Write {
    /// Attempt to write `buf` exactly to `self`.
    ///
    /// This function does not perform partial writes: it will either block
    /// until completion or return an error.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), io::Error>;

    /// Writes a little-endian integer.
    ///
    /// # Note
    /// Do not implement this function yourself. Callers are not required to
    /// call it in order to actually perform a write, so whether or not it is
    /// called is an implementation detail.
    #[inline]
    fn write_le<I: LeInt>(&mut self, val: I) -> Result<(), io::Error>
    where
        Self: Sized,
    {
        val.write_to(self)
    }
}
assert_obj_safe!(Write);

impl<W: Write + ?Sized> Write for &'_ mut W {
    #[inline]
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), io::Error> {
        W::write_bytes(*self, buf)
    }
}

impl Write for &'_ mut [u8] {
    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), io::Error> {
        let n = buf.len();
        check!(self.len() >= n, io::Error::BufferExhausted);

        let (dest, rest) = mem::replace(self, &mut []).split_at_mut(n);
        dest.copy_from_slice(buf);
        *self = rest;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_bytes() {
        let mut buf = [0; 6];
        let mut bytes = &mut buf[..];
        bytes.write_bytes(b"Wo").unwrap();
        bytes.write_bytes(b"r").unwrap();
        assert_eq!(bytes.len(), 3);
        bytes.write_le::<u16>(0x646c).unwrap();
        assert_eq!(bytes.len(), 1);
        assert!(bytes.write_bytes(b"!!").is_err());
        bytes.write_le::<u8>(b'!').unwrap();
        assert_eq!(bytes.len(), 0);
        assert_eq!(&buf, b"World!");
    }
}
