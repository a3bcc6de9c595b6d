// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic primitives, as abstract traits.
//!
//! The manifest authentication chain needs exactly two primitives: SHA-2
//! hashing and ECDSA signature verification. Both are expressed as
//! object-safe traits, so that implementations can range from pure
//! software (see [`ring`]) to a memory-mapped accelerator block.

pub mod ecdsa;
pub mod hash;

#[cfg(feature = "ring")]
pub mod ring;
