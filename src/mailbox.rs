// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The host-facing mailbox register file.
//!
//! The transport layer delivers raw `(address, value)` pairs from the
//! bus; this module owns the 32-byte register window they land in, the
//! two provisioning FIFOs behind the data-port registers, and the
//! execution of provisioning commands against the
//! [`provision::Store`].
//!
//! The mailbox never calls into verification or update logic. A write
//! that requires the engine's attention (a command trigger, a boot
//! checkpoint, an update intent) is surfaced as an [`Event`] for the
//! dispatcher to pick up; everything else is plain register state.
//!
//! ```text
//! 0x00-0x09  identity, counters, error codes   (read-only from bus)
//! 0x0a       provisioning status               (read-only from bus)
//! 0x0b       provisioning command opcode
//! 0x0c       trigger: execute / flush FIFOs
//! 0x0d/0x0e  write-FIFO / read-FIFO data ports
//! 0x0f-0x11  boot checkpoints (BMC, ACM, BIOS)
//! 0x12-0x13  update intents (PCH-origin, BMC-origin)
//! 0x14-0x1f  cached firmware SVN/version fields (read-only from bus)
//! ```

use arrayvec::ArrayVec;
use enumflags2::bitflags;
use enumflags2::BitFlags;

use crate::hardware::flash::Flash;
use crate::hardware::Component;
use crate::io;
use crate::io::Read as _;
use crate::io::Write as _;
use crate::provision;
use crate::wire::WireEnum;
use crate::Result;

/// The number of bus-addressable mailbox registers.
pub const REGISTER_COUNT: usize = 0x20;

/// The capacity of each provisioning FIFO, in bytes.
pub const FIFO_DEPTH: usize = 64;

// Register addresses.
const CPLD_ID: usize = 0x00;
const RELEASE_VERSION: usize = 0x01;
const ROT_SVN: usize = 0x02;
const PLATFORM_STATE: usize = 0x03;
const RECOVERY_COUNT: usize = 0x04;
const LAST_RECOVERY_REASON: usize = 0x05;
const PANIC_COUNT: usize = 0x06;
const LAST_PANIC_REASON: usize = 0x07;
const MAJOR_ERROR: usize = 0x08;
const MINOR_ERROR: usize = 0x09;
const UFM_STATUS: usize = 0x0a;
const UFM_COMMAND: usize = 0x0b;
const UFM_TRIGGER: usize = 0x0c;
const WRITE_FIFO: usize = 0x0d;
const READ_FIFO: usize = 0x0e;
const BMC_CHECKPOINT: usize = 0x0f;
const ACM_CHECKPOINT: usize = 0x10;
const BIOS_CHECKPOINT: usize = 0x11;
const PCH_UPDATE_INTENT: usize = 0x12;
const BMC_UPDATE_INTENT: usize = 0x13;
const VERSION_CACHE: usize = 0x14;

// Trigger bits.
const TRIGGER_EXECUTE: u8 = 1 << 0;
const TRIGGER_FLUSH_WRITE: u8 = 1 << 1;
const TRIGGER_FLUSH_READ: u8 = 1 << 2;

/// A mailbox error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The command register holds an opcode this device does not
    /// implement. Carries the opcode.
    UnknownCommand(u8),

    /// The write FIFO did not hold enough bytes for the command's
    /// argument.
    FifoUnderflow,

    /// A wrapped I/O error from FIFO argument encoding.
    Io(io::Error),

    /// A wrapped provisioning-store error.
    Provision(provision::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<provision::Error> for Error {
    fn from(e: provision::Error) -> Self {
        Self::Provision(e)
    }
}

debug_from!(Error => io::Error, provision::Error);

wire_enum! {
    /// A provisioning command opcode, as written to the command
    /// register.
    pub enum Command: u8 {
        /// Erase the provisioning store.
        Erase = 0x00,
        /// Stage the root key hash from the write FIFO.
        RootKeyHash = 0x01,
        /// Stage the PCH flash layout from the write FIFO.
        PchOffsets = 0x05,
        /// Stage the BMC flash layout from the write FIFO.
        BmcOffsets = 0x06,
        /// Permanently lock the store.
        Lock = 0x07,
        /// Read the root key hash back through the read FIFO.
        ReadRootKeyHash = 0x08,
        /// Read the PCH flash layout back through the read FIFO.
        ReadPchOffsets = 0x0c,
        /// Read the BMC flash layout back through the read FIFO.
        ReadBmcOffsets = 0x0d,
    }
}

wire_enum! {
    /// A coarse platform state, as exposed in the platform-state
    /// register.
    pub enum PlatformState: u8 {
        /// The RoT has started but not yet gated anything.
        Started = 0x01,
        /// Firmware verification is in progress.
        Verify = 0x04,
        /// A recovery operation is in progress.
        Recovery = 0x05,
        /// An update is being applied.
        Update = 0x06,
        /// All gated components have been released.
        Runtime = 0x09,
        /// A component is locked down.
        Lockdown = 0x0a,
    }
}

/// An update intent, as written to one of the two update-intent
/// registers.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateIntent {
    /// Update the PCH's active image.
    PchActive = 1 << 0,
    /// Update the PCH's recovery capsule.
    PchRecovery = 1 << 1,
    /// Update this device's own firmware.
    RotActive = 1 << 3,
    /// Update the BMC's active image.
    BmcActive = 1 << 4,
    /// Update the BMC's recovery capsule.
    BmcRecovery = 1 << 5,
    /// A seamless (no-reset) update. Acknowledged but not supported.
    Dynamic = 1 << 6,
    /// Defer the update until the next platform reset.
    AtReset = 1 << 7,
}

/// The provisioning-status register, as a newtype with explicit bit
/// accessors; the bus contract fixes the bit order, so the layout is
/// spelled out rather than derived.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UfmStatus(u8);

impl UfmStatus {
    /// Returns whether the store is locked.
    pub fn locked(self) -> bool {
        self.0 & (1 << 0) != 0
    }

    /// Returns whether a command is executing.
    pub fn busy(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    /// Returns whether the last command completed.
    pub fn done(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    /// Returns whether the last command failed.
    pub fn error(self) -> bool {
        self.0 & (1 << 3) != 0
    }

    /// Returns whether the store is provisioned.
    pub fn provisioned(self) -> bool {
        self.0 & (1 << 5) != 0
    }

    fn with(self, bit: u8, set: bool) -> Self {
        if set {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }
}

/// An event surfaced by a bus write, for the dispatcher to consume.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The execute-command trigger bit was written; the command
    /// register holds the opcode to run.
    Command,

    /// A boot checkpoint was written.
    Checkpoint {
        /// Which checkpoint register was written.
        source: CheckpointSource,
        /// The checkpoint value.
        value: u8,
    },

    /// An update-intent register was written.
    UpdateIntent {
        /// The component whose register was written; updates staged by
        /// the host land in this component's flash.
        origin: Component,
        /// The intent bits, with unknown bits dropped.
        intents: BitFlags<UpdateIntent>,
    },
}

/// The three boot-checkpoint registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CheckpointSource {
    /// The BMC's boot progress.
    Bmc,
    /// The ACM's boot progress.
    Acm,
    /// The BIOS's boot progress.
    Bios,
}

/// A boot-checkpoint value signalling that a boot phase has begun;
/// arms the watchdog.
pub const CHECKPOINT_START: u8 = 0x01;

/// A boot-checkpoint value signalling that boot has finished; disarms
/// the watchdog.
pub const CHECKPOINT_DONE: u8 = 0x09;

/// The mailbox: the register window plus the FIFOs behind its two data
/// ports.
pub struct Mailbox {
    regs: [u8; REGISTER_COUNT],
    write_fifo: ArrayVec<u8, FIFO_DEPTH>,
    read_fifo: ArrayVec<u8, FIFO_DEPTH>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    /// Creates a new, zeroed `Mailbox`.
    pub fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
            write_fifo: ArrayVec::new(),
            read_fifo: ArrayVec::new(),
        }
    }

    /// Services a bus read of `addr`.
    ///
    /// Reading the read-FIFO data port pops a byte; every other
    /// register reads back its current value. Out-of-window addresses
    /// read as zero.
    pub fn bus_read(&mut self, addr: u8) -> u8 {
        match addr as usize {
            READ_FIFO => self.pop_read_fifo(),
            WRITE_FIFO => 0,
            a if a < REGISTER_COUNT => self.regs[a],
            _ => 0,
        }
    }

    /// Services a bus write of `value` to `addr`, returning the event
    /// the write produced, if any.
    ///
    /// Writes to read-only registers (identity, status, version cache)
    /// and out-of-window addresses are dropped.
    pub fn bus_write(&mut self, addr: u8, value: u8) -> Option<Event> {
        match addr as usize {
            UFM_COMMAND => {
                self.regs[UFM_COMMAND] = value;
                None
            }
            UFM_TRIGGER => self.trigger(value),
            WRITE_FIFO => {
                if self.write_fifo.try_push(value).is_err() {
                    warn!("write FIFO overflow; byte dropped");
                    self.set_status(|s| s.with(1 << 3, true));
                }
                None
            }
            BMC_CHECKPOINT | ACM_CHECKPOINT | BIOS_CHECKPOINT => {
                self.regs[addr as usize] = value;
                let source = match addr as usize {
                    BMC_CHECKPOINT => CheckpointSource::Bmc,
                    ACM_CHECKPOINT => CheckpointSource::Acm,
                    _ => CheckpointSource::Bios,
                };
                Some(Event::Checkpoint { source, value })
            }
            PCH_UPDATE_INTENT | BMC_UPDATE_INTENT => {
                self.regs[addr as usize] = value;
                let origin = if addr as usize == PCH_UPDATE_INTENT {
                    Component::Pch
                } else {
                    Component::Bmc
                };
                Some(Event::UpdateIntent {
                    origin,
                    intents: BitFlags::from_bits_truncate(value),
                })
            }
            _ => None,
        }
    }

    fn trigger(&mut self, value: u8) -> Option<Event> {
        if value & TRIGGER_FLUSH_WRITE != 0 {
            self.write_fifo.clear();
        }
        if value & TRIGGER_FLUSH_READ != 0 {
            self.read_fifo.clear();
        }
        if value & TRIGGER_EXECUTE != 0 {
            // Busy until the dispatcher runs the command.
            self.set_status(|s| {
                s.with(1 << 1, true).with(1 << 2, false).with(1 << 3, false)
            });
            return Some(Event::Command);
        }
        None
    }

    /// Runs the command currently in the command register against
    /// `store`.
    ///
    /// The dispatcher calls this when it services [`Event::Command`];
    /// a locked-down component's commands are never executed, which is
    /// how lockdown denies bus work. Status and error registers are
    /// updated either way.
    pub fn execute<F: Flash>(
        &mut self,
        store: &mut provision::Store<F>,
    ) -> Result<(), Error> {
        let result = self.execute_inner(store);
        let failed = result.is_err();
        let locked = store.is_locked().unwrap_or(false);
        let provisioned = store.is_provisioned().unwrap_or(false);
        self.set_status(|s| {
            s.with(1 << 0, locked)
                .with(1 << 1, false)
                .with(1 << 2, !failed)
                .with(1 << 3, failed)
                .with(1 << 5, provisioned)
        });
        result
    }

    fn execute_inner<F: Flash>(
        &mut self,
        store: &mut provision::Store<F>,
    ) -> Result<(), Error> {
        let opcode = self.regs[UFM_COMMAND];
        let command = match Command::from_wire_value(opcode) {
            Some(c) => c,
            None => return Err(fail!(Error::UnknownCommand(opcode))),
        };

        match command {
            Command::Erase => store.erase()?,
            Command::RootKeyHash => {
                let mut hash = [0; 32];
                self.pop_argument(&mut hash)?;
                store.stage_root_key_hash(hash)?;
            }
            Command::PchOffsets => {
                let offsets = self.pop_offsets()?;
                store.stage_pch_offsets(offsets)?;
            }
            Command::BmcOffsets => {
                let offsets = self.pop_offsets()?;
                store.stage_bmc_offsets(offsets)?;
            }
            Command::Lock => store.lock()?,
            Command::ReadRootKeyHash => {
                self.push_result(&store.root_key_hash()?)
            }
            Command::ReadPchOffsets => {
                let offsets = store.offsets(Component::Pch)?;
                self.push_offsets(&offsets)?;
            }
            Command::ReadBmcOffsets => {
                let offsets = store.offsets(Component::Bmc)?;
                self.push_offsets(&offsets)?;
            }
        }
        Ok(())
    }

    /// Fails the queued command without running it.
    ///
    /// The dispatcher calls this instead of [`execute()`](Self::execute)
    /// while command service is suspended, such as under lockdown.
    pub fn deny_command(&mut self) {
        self.set_status(|s| {
            s.with(1 << 1, false).with(1 << 2, false).with(1 << 3, true)
        });
    }

    fn pop_argument(&mut self, out: &mut [u8]) -> Result<(), Error> {
        check!(self.write_fifo.len() >= out.len(), Error::FifoUnderflow);
        let len = out.len();
        for (dst, src) in out.iter_mut().zip(self.write_fifo.drain(..len)) {
            *dst = src;
        }
        Ok(())
    }

    fn pop_offsets(&mut self) -> Result<provision::Offsets, Error> {
        let mut raw = [0; 12];
        self.pop_argument(&mut raw)?;
        let mut r = &raw[..];
        Ok(provision::Offsets {
            active_pfm: r.read_le()?,
            recovery: r.read_le()?,
            staging: r.read_le()?,
        })
    }

    fn push_offsets(
        &mut self,
        offsets: &provision::Offsets,
    ) -> Result<(), Error> {
        let mut raw = [0; 12];
        let mut w = &mut raw[..];
        w.write_le(offsets.active_pfm)?;
        w.write_le(offsets.recovery)?;
        w.write_le(offsets.staging)?;
        self.push_result(&raw);
        Ok(())
    }

    fn push_result(&mut self, bytes: &[u8]) {
        self.read_fifo.clear();
        let room = self.read_fifo.remaining_capacity();
        self.read_fifo
            .extend(bytes.iter().copied().take(room));
    }

    fn pop_read_fifo(&mut self) -> u8 {
        if self.read_fifo.is_empty() {
            return 0;
        }
        self.read_fifo.remove(0)
    }

    fn set_status(&mut self, f: impl FnOnce(UfmStatus) -> UfmStatus) {
        self.regs[UFM_STATUS] = f(UfmStatus(self.regs[UFM_STATUS])).0;
    }

    /// The current provisioning-status register.
    pub fn status(&self) -> UfmStatus {
        UfmStatus(self.regs[UFM_STATUS])
    }

    /// Sets the identity registers: device id, release version, and
    /// this device's own firmware SVN.
    pub fn set_identity(&mut self, id: u8, release: u8, rot_svn: u8) {
        self.regs[CPLD_ID] = id;
        self.regs[RELEASE_VERSION] = release;
        self.regs[ROT_SVN] = rot_svn;
    }

    /// Sets the platform-state register.
    pub fn set_platform_state(&mut self, state: PlatformState) {
        self.regs[PLATFORM_STATE] = state.to_wire_value();
    }

    /// Records a recovery: bumps the recovery counter and stores the
    /// reason code.
    pub fn note_recovery(&mut self, reason: u8) {
        self.regs[RECOVERY_COUNT] =
            self.regs[RECOVERY_COUNT].wrapping_add(1);
        self.regs[LAST_RECOVERY_REASON] = reason;
    }

    /// Records a panic condition: bumps the panic counter and stores
    /// the reason code.
    pub fn note_panic(&mut self, reason: u8) {
        self.regs[PANIC_COUNT] = self.regs[PANIC_COUNT].wrapping_add(1);
        self.regs[LAST_PANIC_REASON] = reason;
    }

    /// Sets the major/minor error-code registers.
    pub fn set_error_code(&mut self, major: u8, minor: u8) {
        self.regs[MAJOR_ERROR] = major;
        self.regs[MINOR_ERROR] = minor;
    }

    /// Refreshes the cached SVN and version fields for one of
    /// `component`'s firmware images, as read from its verified PFM.
    ///
    /// `recovery` selects between the active-image cache and the
    /// recovery-image cache.
    pub fn cache_firmware_version(
        &mut self,
        component: Component,
        recovery: bool,
        svn: u8,
        major: u8,
        minor: u8,
    ) {
        let mut base = VERSION_CACHE;
        if component == Component::Bmc {
            base += 6;
        }
        if recovery {
            base += 3;
        }
        self.regs[base] = svn;
        self.regs[base + 1] = major;
        self.regs[base + 2] = minor;
    }
}
