// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Update-policy decisions that sit between a verified capsule and the
//! flash operations it requests.
//!
//! Authentication says a capsule is *genuine*; policy says whether this
//! device will *accept* it. The two are deliberately separate error
//! domains: an authentic capsule carrying a stale SVN is not an attack
//! on the signature chain, and is reported differently.

use crate::provision::MAX_SVN;
use crate::Result;

/// A policy error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The capsule's SVN does not move the stored SVN strictly forward,
    /// or exceeds the representable maximum.
    SvnRollback {
        /// The SVN currently stored in the provisioning store.
        current: u8,
        /// The SVN the capsule carries.
        proposed: u8,
    },

    /// The capsule's content type is not acceptable for the requested
    /// operation.
    UnsupportedCapsule,

    /// A mailbox command opcode this device does not implement.
    UnsupportedCommand,
}

/// Checks the anti-rollback rule: an update may only move the stored
/// SVN strictly forward, and never beyond [`MAX_SVN`].
pub fn check_svn_update(current: u8, proposed: u8) -> Result<(), Error> {
    check!(
        proposed <= MAX_SVN && proposed > current,
        Error::SvnRollback { current, proposed }
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn svn_boundaries() {
        assert!(check_svn_update(0, 1).is_ok());
        assert!(check_svn_update(0, 63).is_ok());
        assert!(check_svn_update(62, 63).is_ok());

        // Equal is a rollback; so is anything below or above the cap.
        for &(current, proposed) in
            &[(0, 0), (5, 5), (5, 4), (63, 63), (0, 64), (63, 255)]
        {
            assert_eq!(
                check_svn_update(current, proposed)
                    .err()
                    .unwrap()
                    .into_inner(),
                Error::SvnRollback { current, proposed },
            );
        }
    }
}
