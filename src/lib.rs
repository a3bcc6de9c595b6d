// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! `wyvern` is an implementation of the *Platform Firmware Resilience*
//! pattern for Root of Trust devices: a device that sits between a
//! platform's SPI flash devices and the components that boot from them,
//! and refuses to release those components from reset until their
//! firmware has been authenticated against a signed manifest.
//!
//! `wyvern` is a library, not a firmware image: all hardware access goes
//! through traits ([`hardware::flash::Flash`], [`hardware::BootControl`],
//! [`hardware::Watchdog`]), so that the same logic can be driven by a
//! bare-metal event loop or by a test harness backed by RAM.
//!
//! The major pieces are:
//! - [`manifest`]: parsing and authentication of signed firmware capsules.
//! - [`provision`]: the non-volatile store of root-of-trust policy: the
//!   root key hash, flash layout offsets, minimum security versions, and
//!   key cancellations.
//! - [`copier`]: destructive flash-to-flash copies, including the sparse
//!   bitmap-compressed form used by update capsules.
//! - [`orchestrator`]: recovery and update flows built on the above.
//! - [`mailbox`]: the byte-register command interface exposed to the host.
//! - [`engine`]: the boot-time state machine that ties it all together.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

#[macro_use]
pub mod debug;
#[macro_use]
pub mod wire;

pub mod copier;
pub mod crypto;
pub mod engine;
pub mod hardware;
pub mod io;
pub mod mailbox;
pub mod manifest;
pub mod orchestrator;
pub mod policy;
pub mod profile;
pub mod provision;

pub use debug::Error;

/// The result type used throughout the crate: an ordinary [`Result`] whose
/// error is wrapped for logging purposes. See [`debug`].
pub type Result<T, E> = core::result::Result<T, Error<E>>;
