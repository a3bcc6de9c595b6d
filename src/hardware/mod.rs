// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable hardware functionality.
//!
//! This module provides traits for plugging in OS or driver calls to
//! specialized hardware functions: flash access, reset gating, and the
//! boot watchdogs. `wyvern` never touches a peripheral register itself;
//! everything goes through these seams, which is also what makes the
//! rest of the crate testable on a host machine.

use core::time::Duration;

use static_assertions::assert_obj_safe;

use crate::Result;

pub mod flash;

/// A hardware error.
///
/// Hardware collaborators are expected to retry transient conditions
/// themselves; an error reported here is treated as unrecoverable for the
/// current boot attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates that an unspecified error occured.
    Unspecified,
}

/// A platform component whose firmware this device polices.
///
/// The device sits on the reset line of each of these; neither boots until
/// its flash has been authenticated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// The Board Management Controller.
    Bmc,
    /// The Platform Controller Hub (the host CPU's chipset).
    Pch,
}

impl Component {
    /// All components, in the order they are released at boot.
    ///
    /// The BMC comes first: its flash can hold a staging relay for the PCH,
    /// so its verdict must be known before the PCH is decided.
    pub const ALL: [Component; 2] = [Component::Bmc, Component::Pch];
}

/// Controls the reset lines of the platform components.
///
/// Implementations must make `hold()` effective before the component has a
/// chance to fetch its first instruction; in practice this means the
/// hardware strap defaults to held and `release()` is the only interesting
/// edge.
pub trait BootControl {
    /// Holds `component` in reset.
    fn hold(&mut self, component: Component) -> Result<(), Error>;

    /// Releases `component` from reset, allowing it to boot.
    fn release(&mut self, component: Component) -> Result<(), Error>;
}
assert_obj_safe!(BootControl);

/// A boot-progress watchdog for a platform component.
///
/// The watchdog is armed when a component is released from reset and
/// disarmed when the component checkpoints a completed boot through the
/// mailbox. Expiry must *not* call back into this crate; the driver is
/// expected to surface it as an event through the engine's queue.
pub trait Watchdog {
    /// Arms the watchdog for `component` with the given `timeout`.
    ///
    /// Re-arming an armed watchdog restarts its countdown.
    fn arm(&mut self, component: Component, timeout: Duration)
        -> Result<(), Error>;

    /// Disarms the watchdog for `component`, if it is armed.
    fn disarm(&mut self, component: Component) -> Result<(), Error>;
}
assert_obj_safe!(Watchdog);

#[cfg(test)]
pub(crate) mod fake {
    use core::time::Duration;

    use super::Component;
    use super::Error;
    use crate::Result;

    /// A fake `BootControl` that records the order of operations applied
    /// to it.
    #[derive(Default)]
    pub struct BootControl {
        /// Every `(component, released?)` edge, in order.
        pub log: Vec<(Component, bool)>,
    }

    impl BootControl {
        /// Creates a new `fake::BootControl` with everything held in reset.
        pub fn new() -> Self {
            Default::default()
        }

        /// Returns whether `component` is currently released.
        pub fn is_released(&self, component: Component) -> bool {
            self.log
                .iter()
                .rev()
                .find(|(c, _)| *c == component)
                .map(|(_, released)| *released)
                .unwrap_or(false)
        }
    }

    impl super::BootControl for BootControl {
        fn hold(&mut self, component: Component) -> Result<(), Error> {
            self.log.push((component, false));
            Ok(())
        }

        fn release(&mut self, component: Component) -> Result<(), Error> {
            self.log.push((component, true));
            Ok(())
        }
    }

    /// A fake `Watchdog` that records its armed state.
    #[derive(Default)]
    pub struct Watchdog {
        /// The currently armed timeouts, if any.
        pub armed: Vec<(Component, Duration)>,
    }

    impl Watchdog {
        /// Creates a new, disarmed `fake::Watchdog`.
        pub fn new() -> Self {
            Default::default()
        }

        /// Returns whether the watchdog is armed for `component`.
        pub fn is_armed(&self, component: Component) -> bool {
            self.armed.iter().any(|(c, _)| *c == component)
        }
    }

    impl super::Watchdog for Watchdog {
        fn arm(
            &mut self,
            component: Component,
            timeout: Duration,
        ) -> Result<(), Error> {
            self.armed.retain(|(c, _)| *c != component);
            self.armed.push((component, timeout));
            Ok(())
        }

        fn disarm(&mut self, component: Component) -> Result<(), Error> {
            self.armed.retain(|(c, _)| *c != component);
            Ok(())
        }
    }
}
