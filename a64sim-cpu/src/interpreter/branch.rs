// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Branch execution: PC-relative, conditional, compare/test, and the
//! register-indirect forms with optional pointer authentication and
//! branch-target state.

use a64sim_common::INSTRUCTION_SIZE;

use crate::inst::{Condition, PacKey, PointerType};
use crate::state::{BType, CpuState, Reg31Mode, RegLog, LR};

use super::pac;
use super::{ExitReason, StepResult};

/// Set the PC and flag the modification for the driver.
fn write_pc(state: &mut CpuState, target: u64) {
    state.pc = target;
    state.pc_modified = true;
}

pub fn exec_branch(state: &mut CpuState, link: bool, offset: i64) -> StepResult {
    if link {
        state.set_lr(state.pc.wrapping_add(INSTRUCTION_SIZE));
    }
    write_pc(state, (state.pc as i64).wrapping_add(offset) as u64);
    StepResult::Continue
}

pub fn exec_branch_cond(state: &mut CpuState, cond: Condition, offset: i64) -> StepResult {
    if state.condition_passed(cond) {
        write_pc(state, (state.pc as i64).wrapping_add(offset) as u64);
    }
    StepResult::Continue
}

pub fn exec_compare_branch(
    state: &mut CpuState,
    sf: bool,
    nonzero: bool,
    rt: u8,
    offset: i64,
) -> StepResult {
    let value = state.read_sized(sf, rt, Reg31Mode::ZeroRegister);
    if (value == 0) != nonzero {
        write_pc(state, (state.pc as i64).wrapping_add(offset) as u64);
    }
    StepResult::Continue
}

pub fn exec_test_branch(
    state: &mut CpuState,
    nonzero: bool,
    rt: u8,
    bit: u8,
    offset: i64,
) -> StepResult {
    let value = state.read_x(rt, Reg31Mode::ZeroRegister);
    if ((value >> bit) & 1 != 0) == nonzero {
        write_pc(state, (state.pc as i64).wrapping_add(offset) as u64);
    }
    StepResult::Continue
}

/// The BType handed to the successor depends only on the branch class and
/// the target register.
fn btype_for_branch(op: u8, rn: u8, guarded: bool) -> BType {
    match op {
        1 => BType::BranchAndLink,
        0 => {
            if rn == 16 || rn == 17 || !guarded {
                BType::BranchFromUnguardedOrToIP
            } else {
                BType::BranchFromGuardedNotToIP
            }
        }
        _ => BType::Default,
    }
}

/// BR/BLR/RET and their authenticated forms.
pub fn exec_branch_reg(
    state: &mut CpuState,
    op: u8,
    rn: u8,
    auth: Option<(PacKey, bool)>,
    rm: u8,
    guarded: bool,
) -> StepResult {
    let is_ret = op == 2;
    let link = op == 1;

    let mut addr = state.read_x(rn, Reg31Mode::ZeroRegister);
    let context = match auth {
        Some((_, true)) => 0,
        Some((_, false)) => {
            if is_ret {
                // RETAA/RETAB authenticate LR against SP.
                state.read_x(31, Reg31Mode::StackPointer)
            } else {
                state.read_x(rm, Reg31Mode::ZeroRegister)
            }
        }
        None => 0,
    };
    if is_ret && auth.is_some() {
        addr = state.read_x(LR, Reg31Mode::ZeroRegister);
    }

    if link {
        state.set_lr(state.pc.wrapping_add(INSTRUCTION_SIZE));
    }

    if let Some((key, _)) = auth {
        addr = pac::auth_pac(addr, context, key, PointerType::Instruction);
        if pac::auth_failed(addr) {
            return StepResult::Fatal(ExitReason::AuthFailure { pc: state.pc, addr });
        }
    }

    write_pc(state, addr);
    state.next_btype = btype_for_branch(op, rn, guarded);
    StepResult::Continue
}
