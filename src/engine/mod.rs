// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The boot-time state machine.
//!
//! The engine is an active object: interrupt-context producers (the bus
//! transport, the reset-detect line, the watchdog driver) construct
//! typed [`Event`]s and enqueue them; a single cooperative loop pops
//! one event at a time and runs it to completion. Verification, repair,
//! and update work is synchronous from the loop's point of view, so the
//! two flash chips are never touched by two operations at once.
//!
//! Every operation roots back in `Idle`. A verification failure posts a
//! recovery event rather than recursing; a repaired region is always
//! re-verified before its component is released. When neither the
//! active image nor the recovery capsule of a component can be
//! authenticated, that component enters lockdown: its reset line stays
//! held and its bus commands are denied. The BMC's lockdown is terminal
//! until reprovisioning; the PCH's is lifted if the BMC subsequently
//! authenticates, restoring default trust.

use core::time::Duration;

use enumflags2::BitFlags;

use crate::hardware::flash::Flash;
use crate::hardware::flash::Ptr;
use crate::hardware::BootControl;
use crate::hardware::Component;
use crate::hardware::Watchdog;
use crate::mailbox;
use crate::mailbox::Mailbox;
use crate::mailbox::PlatformState;
use crate::mailbox::UpdateIntent;
use crate::manifest::pfm::Pfm;
use crate::manifest::SIG_BLOCK_SIZE;
use crate::orchestrator;
use crate::orchestrator::Orchestrator;
use crate::orchestrator::Platform;
use crate::orchestrator::Slot;
use crate::orchestrator::Target;
use crate::policy;
use crate::profile::Profile;
use crate::provision;
use crate::provision::Pending;

mod queue;
pub use queue::Queue;

/// The number of events the queue can hold.
pub const QUEUE_DEPTH: usize = 16;

/// How long a released component has to checkpoint a completed boot
/// before its watchdog fires.
pub const BOOT_TIMEOUT: Duration = Duration::from_secs(25);

// Major error codes surfaced through the mailbox.
const MAJOR_BMC_AUTH: u8 = 0x01;
const MAJOR_PCH_AUTH: u8 = 0x02;
const MAJOR_PCH_UPDATE: u8 = 0x03;
const MAJOR_BMC_UPDATE: u8 = 0x04;
const MAJOR_ROT_UPDATE: u8 = 0x05;

// Minor error codes under the authentication majors.
const MINOR_ACTIVE_AUTH: u8 = 0x01;
const MINOR_RECOVERY_AUTH: u8 = 0x02;
const MINOR_ALL_REGIONS_AUTH: u8 = 0x03;

// Minor error codes under the update majors.
const MINOR_UPDATE_AUTH: u8 = 0x01;
const MINOR_SVN_ROLLBACK: u8 = 0x02;
const MINOR_UNSUPPORTED: u8 = 0x03;
const MINOR_UPDATE_FLASH: u8 = 0x04;

// Last-recovery-reason codes.
const REASON_PCH_ACTIVE: u8 = 0x01;
const REASON_PCH_RECOVERY: u8 = 0x02;
const REASON_BMC_ACTIVE: u8 = 0x03;
const REASON_BMC_RECOVERY: u8 = 0x04;
const REASON_WATCHDOG: u8 = 0x07;

// Last-panic-reason codes.
const PANIC_BMC_LOCKDOWN: u8 = 0x01;
const PANIC_PCH_LOCKDOWN: u8 = 0x02;

/// An event consumed by the engine's dispatch loop.
///
/// Producers only construct and enqueue these; all logic runs in the
/// dispatcher.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Cold-boot entry; posted once at startup.
    Init,

    /// A mailbox register write needs servicing.
    Mailbox(mailbox::Event),

    /// The platform reset line for `component`'s domain toggled; its
    /// firmware must be re-verified before it runs again.
    ResetDetected(Component),

    /// The boot watchdog for `component` expired.
    WatchdogExpired(Component),

    /// Verify `component`'s active image and recovery capsule.
    Verify(Component),

    /// Repair one of `component`'s regions.
    Recover {
        /// The component to repair.
        component: Component,
        /// Which of its regions to repair.
        slot: Slot,
    },

    /// Apply a staged update.
    Update {
        /// What the update is aimed at.
        target: Target,
        /// Which slot it lands in.
        slot: Slot,
    },
}

/// A coarse engine state. All non-idle states return to [`State::Idle`]
/// when their event completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// Nothing in flight.
    Idle,
    /// Cold-boot decision-making.
    Init,
    /// Draining a mailbox command.
    I2c,
    /// Verifying a component's firmware.
    Verify,
    /// Repairing a region.
    Recovery,
    /// Applying a staged update.
    Update,
    /// A component is locked down.
    Lockdown,
}

/// What the engine currently believes about one firmware image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageStatus {
    /// Not yet checked this boot.
    Unknown,
    /// Authenticated.
    Valid,
    /// Failed authentication.
    Invalid,
}

/// Per-component transient dispatcher state. Never persisted.
#[derive(Copy, Clone, Debug)]
pub struct Context {
    /// The state that most recently acted on this component; used to
    /// bound repair loops to one attempt per verification failure.
    pub previous: State,
    /// What is known about the active image.
    pub active: ImageStatus,
    /// What is known about the recovery capsule.
    pub recovery: ImageStatus,
    /// Whether a bus command arrived since the last dispatch.
    pub has_new_command: bool,
    /// Whether this component is locked down.
    pub lockdown: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            previous: State::Idle,
            active: ImageStatus::Unknown,
            recovery: ImageStatus::Unknown,
            has_new_command: false,
            lockdown: false,
        }
    }
}

/// The engine: the dispatcher loop plus everything it owns.
///
/// All mutable state, the mailbox register file included, lives inside
/// this struct; interrupt context reaches it only through
/// [`post()`](Self::post), [`bus_read()`](Self::bus_read) and
/// [`bus_write()`](Self::bus_write).
pub struct Engine<Pr, F, P, B, W> {
    profile: Pr,
    store: provision::Store<P>,
    platform: Platform<F>,
    mailbox: Mailbox,
    boot: B,
    watchdog: W,
    queue: Queue<Event, QUEUE_DEPTH>,
    state: State,
    bmc: Context,
    pch: Context,
    // One forced recovery per component per boot window.
    watchdog_spent: [bool; 2],
}

impl<Pr, F, P, B, W> Engine<Pr, F, P, B, W>
where
    Pr: Profile<P>,
    F: Flash,
    P: Flash,
    B: BootControl,
    W: Watchdog,
{
    /// Creates a new `Engine` over the given collaborators, with an
    /// [`Event::Init`] already queued.
    pub fn new(
        profile: Pr,
        store: provision::Store<P>,
        platform: Platform<F>,
        boot: B,
        watchdog: W,
    ) -> Self {
        let mut engine = Self {
            profile,
            store,
            platform,
            mailbox: Mailbox::new(),
            boot,
            watchdog,
            queue: Queue::new(),
            state: State::Idle,
            bmc: Context::default(),
            pch: Context::default(),
            watchdog_spent: [false; 2],
        };
        engine.post(Event::Init);
        engine
    }

    /// The mailbox register file, for identity setup and inspection.
    pub fn mailbox(&mut self) -> &mut Mailbox {
        &mut self.mailbox
    }

    /// The provisioning store.
    pub fn store(&self) -> &provision::Store<P> {
        &self.store
    }

    /// The boot controller.
    pub fn boot(&self) -> &B {
        &self.boot
    }

    /// The watchdog driver.
    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }

    /// The dispatcher state for `component`.
    pub fn context(&self, component: Component) -> &Context {
        match component {
            Component::Bmc => &self.bmc,
            Component::Pch => &self.pch,
        }
    }

    fn ctx(&mut self, component: Component) -> &mut Context {
        match component {
            Component::Bmc => &mut self.bmc,
            Component::Pch => &mut self.pch,
        }
    }

    /// Enqueues `event`. A full queue drops the event with a log line,
    /// since producers run in interrupt context and cannot wait.
    pub fn post(&mut self, event: Event) {
        if self.queue.push(event).is_err() {
            error!("event queue full; dropping {:?}", event);
        }
    }

    /// Services a bus read of mailbox register `addr`.
    pub fn bus_read(&mut self, addr: u8) -> u8 {
        self.mailbox.bus_read(addr)
    }

    /// Services a bus write of mailbox register `addr`, queueing
    /// whatever event the write produces.
    pub fn bus_write(&mut self, addr: u8, value: u8) {
        if let Some(event) = self.mailbox.bus_write(addr, value) {
            if let mailbox::Event::Command = event {
                self.bmc.has_new_command = true;
            }
            self.post(Event::Mailbox(event));
        }
    }

    /// Pops and dispatches one event. Returns whether one was pending.
    pub fn pump(&mut self) -> bool {
        let event = match self.queue.pop() {
            Some(e) => e,
            None => return false,
        };
        trace!("dispatch {:?}", event);
        self.handle(event);
        self.state = State::Idle;
        true
    }

    /// Dispatches events until the queue is empty.
    pub fn run_until_idle(&mut self) {
        while self.pump() {}
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Init => self.on_init(),
            Event::Verify(c) => self.on_verify(c),
            Event::Recover { component, slot } => {
                self.on_recover(component, slot)
            }
            Event::Update { target, slot } => self.on_update(target, slot),
            Event::Mailbox(e) => self.on_mailbox(e),
            Event::ResetDetected(c) => self.on_reset(c),
            Event::WatchdogExpired(c) => self.on_watchdog(c),
        }
    }

    fn on_init(&mut self) {
        self.state = State::Init;
        self.mailbox.set_platform_state(PlatformState::Started);

        let provisioned = self.store.is_provisioned().unwrap_or(false);
        if !provisioned {
            // An unprovisioned device has no root of trust to verify
            // against; it gates nothing.
            info!("unprovisioned; releasing all components ungated");
            for c in Component::ALL {
                if self.boot.release(c).is_err() {
                    error!("failed to release {:?}", c);
                }
            }
            self.mailbox.set_platform_state(PlatformState::Runtime);
            return;
        }

        for c in Component::ALL {
            if self.boot.hold(c).is_err() {
                error!("failed to hold {:?}", c);
            }
        }

        // Updates that were staged at-reset run before verification, so
        // the images verified are the post-update ones.
        let pending = self.store.pending().unwrap_or_else(|_| BitFlags::empty());
        for &(bit, target, slot) in &[
            (Pending::BmcActive, Target::Bmc, Slot::Active),
            (Pending::BmcRecovery, Target::Bmc, Slot::Recovery),
            (Pending::PchActive, Target::Pch, Slot::Active),
            (Pending::PchRecovery, Target::Pch, Slot::Recovery),
        ] {
            if pending.contains(bit) {
                self.post(Event::Update { target, slot });
            }
        }

        for c in Component::ALL {
            self.post(Event::Verify(c));
        }
    }

    fn on_verify(&mut self, component: Component) {
        if self.ctx(component).lockdown {
            return;
        }
        self.state = State::Verify;
        self.mailbox.set_platform_state(PlatformState::Verify);

        let active = Orchestrator::new(
            &mut self.profile,
            &mut self.store,
            &mut self.platform,
        )
        .verify_active(component);
        let active_ok = match active {
            Ok(pfm) => {
                self.mailbox.cache_firmware_version(
                    component,
                    false,
                    pfm.header.svn,
                    pfm.header.version_major,
                    pfm.header.version_minor,
                );
                true
            }
            Err(e) => {
                error!("{:?} active image rejected: {:?}", component, e);
                false
            }
        };
        self.ctx(component).active = status(active_ok);

        let recovery = Orchestrator::new(
            &mut self.profile,
            &mut self.store,
            &mut self.platform,
        )
        .verify_recovery(component);
        let recovery_ok = match recovery {
            Ok(_) => {
                self.cache_recovery_version(component);
                true
            }
            Err(e) => {
                error!("{:?} recovery capsule rejected: {:?}", component, e);
                false
            }
        };
        self.ctx(component).recovery = status(recovery_ok);

        let repaired = self.ctx(component).previous == State::Recovery;
        match (active_ok, recovery_ok) {
            (true, true) => self.release(component),
            (true, false) if repaired => {
                // The backup could not be rebuilt, but the image the
                // component actually boots from is authentic.
                self.mailbox
                    .set_error_code(auth_major(component), MINOR_RECOVERY_AUTH);
                self.release(component);
            }
            (true, false) => {
                self.mailbox
                    .note_recovery(recovery_reason(component, Slot::Recovery));
                self.post(Event::Recover {
                    component,
                    slot: Slot::Recovery,
                });
            }
            (false, _) if repaired => {
                // One repair attempt per failure; a second identical
                // failure means the flash cannot be trusted at all.
                self.lockdown(component);
            }
            (false, _) => {
                let minor = if recovery_ok {
                    MINOR_ACTIVE_AUTH
                } else {
                    MINOR_ALL_REGIONS_AUTH
                };
                self.mailbox.set_error_code(auth_major(component), minor);
                self.mailbox
                    .note_recovery(recovery_reason(component, Slot::Active));
                self.post(Event::Recover {
                    component,
                    slot: Slot::Active,
                });
            }
        }
    }

    fn on_recover(&mut self, component: Component, slot: Slot) {
        if self.ctx(component).lockdown {
            return;
        }
        self.state = State::Recovery;
        self.mailbox.set_platform_state(PlatformState::Recovery);
        self.ctx(component).previous = State::Recovery;

        // An active-region repair copies out of the recovery capsule,
        // so the capsule must be made trustworthy first.
        if slot == Slot::Active
            && self.ctx(component).recovery != ImageStatus::Valid
        {
            let rebuilt = Orchestrator::new(
                &mut self.profile,
                &mut self.store,
                &mut self.platform,
            )
            .recover_recovery_region(component);
            match rebuilt {
                Ok(()) => self.ctx(component).recovery = ImageStatus::Valid,
                Err(e) => {
                    error!(
                        "{:?} has no usable recovery source: {:?}",
                        component, e
                    );
                    self.lockdown(component);
                    return;
                }
            }
        }

        let result = match slot {
            Slot::Active => Orchestrator::new(
                &mut self.profile,
                &mut self.store,
                &mut self.platform,
            )
            .recover_active_region(component),
            Slot::Recovery => Orchestrator::new(
                &mut self.profile,
                &mut self.store,
                &mut self.platform,
            )
            .recover_recovery_region(component),
        };

        match result {
            Ok(()) => {
                if slot == Slot::Recovery {
                    self.ctx(component).recovery = ImageStatus::Valid;
                }
                // The repaired region proves itself by re-verifying.
                self.post(Event::Verify(component));
            }
            Err(e) => {
                error!("{:?} {:?} repair failed: {:?}", component, slot, e);
                if slot == Slot::Recovery
                    && self.ctx(component).active == ImageStatus::Valid
                {
                    // Re-verification will release on the strength of
                    // the active image alone.
                    self.post(Event::Verify(component));
                } else {
                    self.lockdown(component);
                }
            }
        }
    }

    fn on_update(&mut self, target: Target, slot: Slot) {
        // RoT capsules are staged in the BMC's flash, so BMC lockdown
        // gates them too.
        let gate = match target {
            Target::Bmc | Target::Rot => Component::Bmc,
            Target::Pch => Component::Pch,
        };
        if self.ctx(gate).lockdown {
            warn!("update for {:?} denied under lockdown", target);
            self.mailbox
                .set_error_code(update_major(target), MINOR_UNSUPPORTED);
            return;
        }

        self.state = State::Update;
        self.mailbox.set_platform_state(PlatformState::Update);

        let result = Orchestrator::new(
            &mut self.profile,
            &mut self.store,
            &mut self.platform,
        )
        .apply_update(target, slot);
        match result {
            Ok(()) => {
                info!("update applied for {:?} {:?}", target, slot);
                match target {
                    Target::Bmc => self.post(Event::Verify(Component::Bmc)),
                    Target::Pch => self.post(Event::Verify(Component::Pch)),
                    // A new RoT image takes effect at the next reset.
                    Target::Rot => {}
                }
            }
            Err(e) => {
                let minor = match e.into_inner() {
                    orchestrator::Error::Policy(
                        policy::Error::SvnRollback { .. },
                    ) => MINOR_SVN_ROLLBACK,
                    orchestrator::Error::Policy(_) => MINOR_UNSUPPORTED,
                    orchestrator::Error::Auth(_) => MINOR_UPDATE_AUTH,
                    _ => MINOR_UPDATE_FLASH,
                };
                self.mailbox.set_error_code(update_major(target), minor);
            }
        }
    }

    fn on_mailbox(&mut self, event: mailbox::Event) {
        match event {
            mailbox::Event::Command => {
                self.state = State::I2c;
                self.bmc.has_new_command = false;
                if self.bmc.lockdown {
                    warn!("mailbox command denied under lockdown");
                    self.mailbox.deny_command();
                    return;
                }
                if let Err(e) = self.mailbox.execute(&mut self.store) {
                    warn!("mailbox command failed: {:?}", e);
                }
            }
            mailbox::Event::Checkpoint { source, value } => {
                let component = match source {
                    mailbox::CheckpointSource::Bmc => Component::Bmc,
                    _ => Component::Pch,
                };
                match value {
                    mailbox::CHECKPOINT_START => {
                        if self
                            .watchdog
                            .arm(component, BOOT_TIMEOUT)
                            .is_err()
                        {
                            error!("failed to arm {:?} watchdog", component);
                        }
                    }
                    mailbox::CHECKPOINT_DONE => {
                        if self.watchdog.disarm(component).is_err() {
                            error!(
                                "failed to disarm {:?} watchdog",
                                component
                            );
                        }
                        self.mailbox
                            .set_platform_state(PlatformState::Runtime);
                    }
                    // Intermediate progress values restart the window.
                    _ => {
                        if self
                            .watchdog
                            .arm(component, BOOT_TIMEOUT)
                            .is_err()
                        {
                            error!(
                                "failed to re-arm {:?} watchdog",
                                component
                            );
                        }
                    }
                }
            }
            mailbox::Event::UpdateIntent { origin, intents } => {
                self.on_intent(origin, intents)
            }
        }
    }

    fn on_intent(
        &mut self,
        origin: Component,
        intents: BitFlags<UpdateIntent>,
    ) {
        if intents.contains(UpdateIntent::Dynamic) {
            // Seamless updates are acknowledged but not supported.
            warn!("dynamic update intent from {:?} rejected", origin);
            self.mailbox.set_error_code(
                update_major(origin.into()),
                MINOR_UNSUPPORTED,
            );
            return;
        }

        let at_reset = intents.contains(UpdateIntent::AtReset);
        let mut pending =
            self.store.pending().unwrap_or_else(|_| BitFlags::empty());
        let before = pending;

        for &(intent, target, slot) in &[
            (UpdateIntent::PchActive, Target::Pch, Slot::Active),
            (UpdateIntent::PchRecovery, Target::Pch, Slot::Recovery),
            (UpdateIntent::RotActive, Target::Rot, Slot::Active),
            (UpdateIntent::BmcActive, Target::Bmc, Slot::Active),
            (UpdateIntent::BmcRecovery, Target::Bmc, Slot::Recovery),
        ] {
            if !intents.contains(intent) {
                continue;
            }
            // A PCH update announced through the BMC's register was
            // parked in the BMC's staging relay.
            if origin == Component::Bmc && target == Target::Pch {
                pending |= Pending::BmcToPchRelay;
            }
            let component = match target {
                Target::Pch => Some(Component::Pch),
                Target::Bmc => Some(Component::Bmc),
                // RoT updates have no at-reset form; the new image
                // takes effect at the RoT's own next reset anyway.
                Target::Rot => None,
            };
            match (at_reset, component) {
                (true, Some(c)) => {
                    pending |= orchestrator::pending_bit(c, slot)
                }
                _ => self.post(Event::Update { target, slot }),
            }
        }

        if pending != before && self.store.set_pending(pending).is_err() {
            error!("failed to persist pending-update record");
        }
    }

    fn on_reset(&mut self, component: Component) {
        info!("reset detected for {:?}", component);
        self.watchdog_spent[index(component)] = false;
        let ctx = self.ctx(component);
        ctx.active = ImageStatus::Unknown;
        ctx.recovery = ImageStatus::Unknown;
        ctx.previous = State::Idle;
        if self.boot.hold(component).is_err() {
            error!("failed to hold {:?}", component);
        }

        // Updates deferred to "the next platform reset" run now, ahead
        // of the verification that gates the component's release.
        let pending =
            self.store.pending().unwrap_or_else(|_| BitFlags::empty());
        for &slot in &[Slot::Active, Slot::Recovery] {
            if pending.contains(orchestrator::pending_bit(component, slot)) {
                self.post(Event::Update {
                    target: component.into(),
                    slot,
                });
            }
        }

        self.post(Event::Verify(component));
    }

    fn on_watchdog(&mut self, component: Component) {
        if self.ctx(component).lockdown {
            return;
        }
        let spent = &mut self.watchdog_spent[index(component)];
        if *spent {
            // Only one forced recovery per boot window; a component
            // that cannot boot a freshly repaired image stays held.
            warn!("{:?} watchdog expired again; giving up", component);
            if self.boot.hold(component).is_err() {
                error!("failed to hold {:?}", component);
            }
            return;
        }
        *spent = true;

        warn!("{:?} watchdog expired; forcing recovery", component);
        if self.boot.hold(component).is_err() {
            error!("failed to hold {:?}", component);
        }
        self.mailbox.note_recovery(REASON_WATCHDOG);
        self.post(Event::Recover {
            component,
            slot: Slot::Active,
        });
    }

    fn release(&mut self, component: Component) {
        if self.boot.release(component).is_err() {
            error!("failed to release {:?}", component);
            return;
        }
        if self.watchdog.arm(component, BOOT_TIMEOUT).is_err() {
            error!("failed to arm {:?} watchdog", component);
        }
        self.ctx(component).previous = State::Idle;
        info!("released {:?} from reset", component);

        if component == Component::Bmc && self.pch.lockdown {
            // An authenticated BMC restores default trust in the PCH.
            info!("lifting PCH lockdown");
            self.pch.lockdown = false;
            self.release(Component::Pch);
        }
    }

    fn lockdown(&mut self, component: Component) {
        error!("{:?} entering lockdown", component);
        self.state = State::Lockdown;
        self.ctx(component).lockdown = true;
        self.mailbox.set_platform_state(PlatformState::Lockdown);
        self.mailbox.note_panic(match component {
            Component::Bmc => PANIC_BMC_LOCKDOWN,
            Component::Pch => PANIC_PCH_LOCKDOWN,
        });
        if self.boot.hold(component).is_err() {
            error!("failed to hold {:?}", component);
        }
    }

    fn cache_recovery_version(&mut self, component: Component) {
        let offsets = match self.store.offsets(component) {
            Ok(o) => o,
            Err(_) => return,
        };
        let pfm = Pfm::read(
            self.platform.device(component),
            Ptr::new(offsets.recovery + 2 * SIG_BLOCK_SIZE),
        );
        if let Ok(pfm) = pfm {
            self.mailbox.cache_firmware_version(
                component,
                true,
                pfm.header.svn,
                pfm.header.version_major,
                pfm.header.version_minor,
            );
        }
    }
}

fn status(ok: bool) -> ImageStatus {
    if ok {
        ImageStatus::Valid
    } else {
        ImageStatus::Invalid
    }
}

fn index(component: Component) -> usize {
    match component {
        Component::Bmc => 0,
        Component::Pch => 1,
    }
}

fn auth_major(component: Component) -> u8 {
    match component {
        Component::Bmc => MAJOR_BMC_AUTH,
        Component::Pch => MAJOR_PCH_AUTH,
    }
}

fn update_major(target: Target) -> u8 {
    match target {
        Target::Pch => MAJOR_PCH_UPDATE,
        Target::Bmc => MAJOR_BMC_UPDATE,
        Target::Rot => MAJOR_ROT_UPDATE,
    }
}

fn recovery_reason(component: Component, slot: Slot) -> u8 {
    match (component, slot) {
        (Component::Pch, Slot::Active) => REASON_PCH_ACTIVE,
        (Component::Pch, Slot::Recovery) => REASON_PCH_RECOVERY,
        (Component::Bmc, Slot::Active) => REASON_BMC_ACTIVE,
        (Component::Bmc, Slot::Recovery) => REASON_BMC_RECOVERY,
    }
}
