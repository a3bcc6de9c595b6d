// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Test helpers that build and sign real capsules with fresh keys.

use core::convert::TryInto as _;

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::crypto::ecdsa;
use crate::crypto::ecdsa::Sign as _;
use crate::crypto::hash::EngineExt as _;
use crate::crypto::ring;
use crate::hardware::flash::RamMut;
use crate::hardware::flash::PAGE_SIZE;
use crate::manifest::block0::Block0;
use crate::manifest::block0::BLOCK0_TAG;
use crate::manifest::block1;
use crate::manifest::PcType;
use crate::manifest::SIG_BLOCK_SIZE;
use crate::provision;
use crate::wire::WireEnum as _;

/// A freshly-generated root key and CSK, plus the CSK's entry fields.
pub struct KeyChain {
    pub root: ring::Sign,
    pub csk: ring::Sign,
    pub csk_id: u32,
    pub csk_permissions: u32,
}

impl KeyChain {
    /// Generates a new chain on `curve`, with an uncancelled,
    /// all-permissions CSK.
    pub fn generate(curve: ecdsa::Curve) -> Self {
        Self {
            root: ring::Sign::generate(curve).unwrap().0,
            csk: ring::Sign::generate(curve).unwrap().0,
            csk_id: 0,
            csk_permissions: !0,
        }
    }

    /// Builds a fully-signed capsule of the given type around `content`.
    pub fn sign_capsule(
        &mut self,
        pc_type: PcType,
        content: &[u8],
    ) -> Vec<u8> {
        let mut capsule = vec![0u8; SIG_BLOCK_SIZE as usize];

        let mut block0 = Block0::new_zeroed();
        block0.tag = BLOCK0_TAG;
        block0.pc_length = content.len() as u32;
        block0.pc_type = pc_type.to_wire_value();
        let mut engine = ring::Engine::new();
        engine
            .contiguous_hash(
                crate::crypto::hash::Algo::Sha256,
                content,
                &mut block0.sha256,
            )
            .unwrap();
        engine
            .contiguous_hash(
                crate::crypto::hash::Algo::Sha384,
                content,
                &mut block0.sha384,
            )
            .unwrap();
        capsule[..128].copy_from_slice(block0.as_bytes());

        let mut header = block1::Header::new_zeroed();
        header.tag = block1::BLOCK1_TAG;
        capsule[block1::BLOCK1_OFFSET as usize..][..16]
            .copy_from_slice(header.as_bytes());

        let root_entry = key_entry(block1::ROOT_ENTRY_TAG, &self.root, !0, !0);
        capsule[block1::ROOT_ENTRY_OFFSET as usize..][..132]
            .copy_from_slice(root_entry.as_bytes());

        let root_signed =
            pc_type.is_key_cancellation() || pc_type == PcType::Decommission;
        let entry_offset = if root_signed {
            block1::CSK_ENTRY_OFFSET
        } else {
            let key = key_entry(
                block1::CSK_ENTRY_TAG,
                &self.csk,
                self.csk_permissions,
                self.csk_id,
            );
            let signature = sign_with(&mut self.root, key.body());
            let csk = block1::CskEntry { key, signature };
            capsule[block1::CSK_ENTRY_OFFSET as usize..][..232]
                .copy_from_slice(csk.as_bytes());
            block1::BLOCK0_ENTRY_OFFSET
        };

        let signer = if root_signed {
            &mut self.root
        } else {
            &mut self.csk
        };
        let entry = block1::Block0Entry {
            tag: block1::BLOCK0_ENTRY_TAG,
            signature: sign_with(signer, block0.as_bytes()),
        };
        capsule[entry_offset as usize..][..104]
            .copy_from_slice(entry.as_bytes());

        capsule.extend_from_slice(content);
        capsule
    }

    /// Builds a signed key-cancellation certificate naming `key_id`.
    pub fn sign_cancellation(
        &mut self,
        pc_type: PcType,
        key_id: u8,
    ) -> Vec<u8> {
        let mut content = [0u8; 128];
        content[..4].copy_from_slice(&(key_id as u32).to_le_bytes());
        self.sign_capsule(pc_type, &content)
    }

    /// Builds a signed decommission capsule.
    pub fn sign_decommission(&mut self) -> Vec<u8> {
        self.sign_capsule(PcType::Decommission, &[0u8; 128])
    }
}

/// Builds a key entry for `sign`'s public key.
pub fn key_entry(
    tag: u32,
    sign: &ring::Sign,
    permissions: u32,
    key_id: u32,
) -> block1::KeyEntry {
    let curve = sign.curve();
    let (x, y) = sign.public_key();

    let mut entry = block1::KeyEntry::new_zeroed();
    entry.tag = tag;
    entry.curve_magic = match curve {
        ecdsa::Curve::P256 => block1::PUBKEY_P256_MAGIC,
        ecdsa::Curve::P384 => block1::PUBKEY_P384_MAGIC,
    };
    entry.permissions = permissions;
    entry.key_id = key_id;
    entry.x[..curve.scalar_bytes()].copy_from_slice(x);
    entry.y[..curve.scalar_bytes()].copy_from_slice(y);
    entry
}

/// Signs `message` with `sign`, producing a wire signature.
pub fn sign_with(sign: &mut ring::Sign, message: &[u8]) -> block1::Signature {
    let curve = sign.curve();
    let scalar = curve.scalar_bytes();

    let mut sig = block1::Signature::new_zeroed();
    sig.sig_magic = match curve {
        ecdsa::Curve::P256 => block1::SIG_P256_MAGIC,
        ecdsa::Curve::P384 => block1::SIG_P384_MAGIC,
    };
    sign.sign(message, &mut sig.r[..scalar], &mut sig.s[..scalar])
        .unwrap();
    sig
}

/// Computes the provisioning-store hash of `sign`'s public key.
pub fn root_key_hash(sign: &ring::Sign) -> [u8; 32] {
    let curve = sign.curve();
    let algo = curve.digest_algo();
    let (x, y) = sign.public_key();

    let mut engine = ring::Engine::new();
    let mut digest = [0; 48];
    let mut h = engine.new_hash(algo).unwrap();
    h.write(x).unwrap();
    h.write(y).unwrap();
    h.finish(&mut digest[..algo.bytes()]).unwrap();
    digest[..32].try_into().unwrap()
}

/// An empty, RAM-backed provisioning store.
pub fn unprovisioned_store() -> provision::Store<RamMut<Vec<u8>>> {
    provision::Store::new(
        RamMut(vec![0xff; PAGE_SIZE as usize]),
        RamMut(vec![0xff; PAGE_SIZE as usize]),
    )
}

/// A RAM-backed store provisioned to trust `root`, with the given flash
/// layouts.
pub fn store_with_offsets(
    root: &ring::Sign,
    pch: provision::Offsets,
    bmc: provision::Offsets,
) -> provision::Store<RamMut<Vec<u8>>> {
    let mut store = unprovisioned_store();
    store.stage_root_key_hash(root_key_hash(root)).unwrap();
    store.stage_pch_offsets(pch).unwrap();
    assert!(store.stage_bmc_offsets(bmc).unwrap());
    store
}

/// A RAM-backed store provisioned to trust `root`, with an arbitrary
/// flash layout.
pub fn provisioned_store(
    root: &ring::Sign,
) -> provision::Store<RamMut<Vec<u8>>> {
    store_with_offsets(
        root,
        provision::Offsets {
            active_pfm: 0x0000_1000,
            recovery: 0x0000_2000,
            staging: 0x0000_3000,
        },
        provision::Offsets {
            active_pfm: 0x0000_1000,
            recovery: 0x0000_2000,
            staging: 0x0000_3000,
        },
    )
}
