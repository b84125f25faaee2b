// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pointer authentication with a placeholder MAC.
//!
//! Codes live in bits [54:48] of the pointer; bit 55 selects the address
//! extension, so user-space and kernel-space pointers both strip cleanly.
//! Authentication failure poisons bits [54:53] so that any later indirect
//! use of the pointer faults.

use crate::inst::{PacKey, PointerType};

/// Key material for one PAC key. The values are fixed: this is a
/// simulation MAC, not a cryptographic one, and determinism matters more
/// than secrecy.
#[derive(Debug, Clone, Copy)]
pub struct PacKeyValue {
    pub high: u64,
    pub low: u64,
}

pub const KEY_IA: PacKeyValue = PacKeyValue { high: 0x64d6_1a0a_8545_e048, low: 0x27cd_c720_ffe2_b490 };
pub const KEY_IB: PacKeyValue = PacKeyValue { high: 0xd344_b588_9b31_4b65, low: 0x3718_aacb_5667_2ca6 };
pub const KEY_DA: PacKeyValue = PacKeyValue { high: 0x772c_9a0e_18d5_ea5d, low: 0xcf1f_c6a7_5b2e_0049 };
pub const KEY_DB: PacKeyValue = PacKeyValue { high: 0x4a4e_8a2b_533e_1b0c, low: 0xa4f9_00d3_7b45_9ed4 };
pub const KEY_GA: PacKeyValue = PacKeyValue { high: 0x89d5_3d07_23b0_102a, low: 0x2d18_6cfd_0a54_1f25 };

pub fn key_value(key: PacKey) -> PacKeyValue {
    match key {
        PacKey::IA => KEY_IA,
        PacKey::IB => KEY_IB,
        PacKey::DA => KEY_DA,
        PacKey::DB => KEY_DB,
        PacKey::GA => KEY_GA,
    }
}

/// Lowest bit of the PAC field, assuming a 48-bit virtual address space.
const BOTTOM_PAC_BIT: u32 = 48;
/// Bit selecting the address extension; excluded from the PAC field.
const EXTENSION_BIT: u32 = 55;
/// Bits [54:48].
const PAC_FIELD: u64 = ((1u64 << EXTENSION_BIT) - 1) & !((1u64 << BOTTOM_PAC_BIT) - 1);

/// The placeholder MAC over {pointer, modifier, key}: a few rounds of
/// xor-rotate-multiply mixing. Stable across runs.
pub fn compute_pac(data: u64, modifier: u64, key: PacKeyValue) -> u64 {
    let mut h = data ^ key.high;
    h = h.rotate_left(13) ^ modifier;
    h = h.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    h ^= h >> 29;
    h = h.wrapping_add(key.low).rotate_left(31);
    h = h.wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
    h ^ (h >> 32)
}

/// Replace the PAC field with the address extension implied by bit 55.
pub fn strip_pac(ptr: u64, _ptr_type: PointerType) -> u64 {
    let extension = if ptr & (1 << EXTENSION_BIT) != 0 { PAC_FIELD } else { 0 };
    (ptr & !PAC_FIELD) | extension
}

/// Insert the authentication code for {pointer, modifier, key} into the
/// PAC field.
pub fn add_pac(ptr: u64, modifier: u64, key: PacKey, ptr_type: PointerType) -> u64 {
    let stripped = strip_pac(ptr, ptr_type);
    let pac = compute_pac(stripped, modifier, key_value(key));
    (stripped & !PAC_FIELD) | (pac & PAC_FIELD)
}

/// Authenticate: recompute and zero-tag on success, poison on failure so
/// that subsequent use of the pointer faults.
pub fn auth_pac(ptr: u64, modifier: u64, key: PacKey, ptr_type: PointerType) -> u64 {
    let stripped = strip_pac(ptr, ptr_type);
    let pac = compute_pac(stripped, modifier, key_value(key));
    if (ptr & PAC_FIELD) == (pac & PAC_FIELD) {
        stripped
    } else {
        let error_code: u64 = match ptr_type {
            PointerType::Instruction => 0b01,
            PointerType::Data => 0b10,
        };
        (stripped & !(0x3 << (EXTENSION_BIT - 2))) | (error_code << (EXTENSION_BIT - 2))
    }
}

/// True when the diagnostic bits of an authenticated pointer are set,
/// i.e. a previous authentication failed.
pub fn auth_failed(ptr: u64) -> bool {
    (ptr >> (EXTENSION_BIT - 2)) & 0x3 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_auth_round_trips() {
        let ptr = 0x0000_1234_5678_9ABC;
        let signed = add_pac(ptr, 42, PacKey::IA, PointerType::Instruction);
        assert_ne!(signed, ptr); // tag inserted
        assert_eq!(signed & !PAC_FIELD, ptr & !PAC_FIELD);
        let authed = auth_pac(signed, 42, PacKey::IA, PointerType::Instruction);
        assert_eq!(authed, ptr);
        assert!(!auth_failed(authed));
    }

    #[test]
    fn test_wrong_modifier_poisons() {
        let ptr = 0x0000_1234_5678_9ABC;
        let signed = add_pac(ptr, 42, PacKey::IA, PointerType::Instruction);
        let authed = auth_pac(signed, 43, PacKey::IA, PointerType::Instruction);
        assert!(auth_failed(authed));
        // Low address bits survive, so diagnostics can name the target.
        assert_eq!(authed & 0xFFFF_FFFF_FFFF, ptr & 0xFFFF_FFFF_FFFF);
    }

    #[test]
    fn test_wrong_key_poisons() {
        let ptr = 0x0000_1234_5678_9ABC;
        let signed = add_pac(ptr, 0, PacKey::IA, PointerType::Instruction);
        let authed = auth_pac(signed, 0, PacKey::IB, PointerType::Instruction);
        assert!(auth_failed(authed));
    }

    #[test]
    fn test_strip_clears_tag() {
        let ptr = 0x0000_1234_5678_9ABC;
        let signed = add_pac(ptr, 7, PacKey::DA, PointerType::Data);
        assert_eq!(strip_pac(signed, PointerType::Data), ptr);
    }

    #[test]
    fn test_strip_sign_extends_kernel_pointers() {
        let ptr = 0xFFFF_8000_0000_1234;
        assert_eq!(strip_pac(ptr, PointerType::Data), 0xFFFF_8000_0000_1234);
        // A corrupted tag on a bit-55 pointer strips back to all-ones.
        let corrupt = ptr ^ (1 << 50);
        assert_eq!(strip_pac(corrupt, PointerType::Data), ptr);
    }

    #[test]
    fn test_keys_distinct() {
        let ptr = 0x7000_0000_0000;
        let a = compute_pac(ptr, 0, KEY_IA);
        let b = compute_pac(ptr, 0, KEY_IB);
        assert_ne!(a, b);
    }
}
