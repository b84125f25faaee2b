// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Load/store unit: plain, pair, literal, SIMD, exclusive, atomic and
//! RCpc forms, with the exclusive-monitor choreography and the alignment
//! rules for SP-based and atomic accesses.

use std::sync::atomic::{fence, Ordering};

use a64sim_common::{is_aligned, INSTRUCTION_SIZE};

use crate::inst::{AddrMode, AtomicOp, ExtendType, PacKey, PointerType};
use crate::memory::MemoryAccess;
use crate::state::{Reg31Mode, RegLog, REG31};
use crate::trace::{wreg_name, xreg_name};

use super::pac;
use super::{ExitReason, Simulator, StepResult};

/// Read 1 << `size` bytes, optionally sign-extending into a W or X view.
fn read_int(
    mem: &mut dyn MemoryAccess,
    addr: u64,
    size: u8,
    sign_extend: bool,
    to64: bool,
) -> Result<u64, StepResult> {
    let raw = mem
        .read_sized(addr, size)
        .map_err(|_| StepResult::Fatal(ExitReason::DataAbort { addr }))?;
    if !sign_extend {
        return Ok(raw);
    }
    let wide = match size {
        0 => raw as u8 as i8 as i64 as u64,
        1 => raw as u16 as i16 as i64 as u64,
        2 => raw as u32 as i32 as i64 as u64,
        _ => raw,
    };
    Ok(if to64 { wide } else { wide & 0xFFFF_FFFF })
}

fn write_int(mem: &mut dyn MemoryAccess, addr: u64, value: u64, size: u8) -> Result<(), StepResult> {
    mem.write_sized(addr, value, size)
        .map_err(|_| StepResult::Fatal(ExitReason::DataAbort { addr }))
}

/// Base register read with the SP 16-byte alignment rule.
fn read_base(sim: &Simulator, rn: u8) -> Result<u64, StepResult> {
    let base = sim.state.read_x(rn, Reg31Mode::StackPointer);
    if rn == REG31 && !is_aligned(base, 16) {
        return Err(StepResult::Fatal(ExitReason::StackAlignment { addr: base }));
    }
    Ok(base)
}

/// Atomics additionally may not cross a 16-byte line.
fn check_atomic_access(sim: &Simulator, rn: u8, addr: u64, access_size: u64) -> Result<(), StepResult> {
    if rn == REG31 && !is_aligned(addr, 16) {
        return Err(StepResult::Fatal(ExitReason::StackAlignment { addr }));
    }
    if (addr % 16) + access_size > 16 {
        return Err(StepResult::Fatal(ExitReason::AtomicAlignment { addr }));
    }
    Ok(())
}

/// Write-back for pre/post-indexed forms; the register update is logged
/// normally, the access itself gets the richer memory trace line.
fn write_back(sim: &mut Simulator, rn: u8, value: u64) {
    sim.state.write_x(rn, value, Reg31Mode::StackPointer, RegLog::Log);
}

fn reg_name(size: u8, to64: bool, code: u8) -> String {
    if size == 3 || to64 {
        xreg_name(code, Reg31Mode::ZeroRegister)
    } else {
        wreg_name(code, Reg31Mode::ZeroRegister)
    }
}

// ---------------------------------------------------------------------------
// Plain integer loads and stores
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn exec_load_store_imm(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    load: bool,
    sign_extend: bool,
    to64: bool,
    rt: u8,
    rn: u8,
    imm: i64,
    mode: AddrMode,
) -> StepResult {
    let base = match read_base(sim, rn) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let wb = (base as i64).wrapping_add(imm) as u64;
    let addr = match mode {
        AddrMode::Offset => wb,
        AddrMode::PreIndex => {
            write_back(sim, rn, wb);
            wb
        }
        AddrMode::PostIndex => base,
    };

    let result = if load {
        match read_int(mem, addr, size, sign_extend, to64) {
            Ok(value) => {
                sim.state.write_x(rt, value, Reg31Mode::ZeroRegister, RegLog::NoLog);
                sim.trace.log_read(&reg_name(size, to64, rt), value, addr);
                StepResult::Continue
            }
            Err(r) => r,
        }
    } else {
        // A non-exclusive store may clear the local monitor.
        sim.local_monitor.maybe_clear();
        let value = sim.state.read_x(rt, Reg31Mode::ZeroRegister);
        match write_int(mem, addr, value, size) {
            Ok(()) => {
                sim.trace.log_write(&reg_name(size, false, rt), value, addr);
                StepResult::Continue
            }
            Err(r) => r,
        }
    };

    if matches!(result, StepResult::Continue) && mode == AddrMode::PostIndex {
        write_back(sim, rn, wb);
    }
    result
}

#[allow(clippy::too_many_arguments)]
pub fn exec_load_store_reg(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    load: bool,
    sign_extend: bool,
    to64: bool,
    rt: u8,
    rn: u8,
    rm: u8,
    extend: ExtendType,
    shift: bool,
) -> StepResult {
    let offset = super::alu::extend_value(
        true,
        sim.state.read_x(rm, Reg31Mode::ZeroRegister),
        extend,
        if shift { size as u32 } else { 0 },
    );
    let base = match read_base(sim, rn) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let addr = base.wrapping_add(offset);

    if load {
        match read_int(mem, addr, size, sign_extend, to64) {
            Ok(value) => {
                sim.state.write_x(rt, value, Reg31Mode::ZeroRegister, RegLog::NoLog);
                sim.trace.log_read(&reg_name(size, to64, rt), value, addr);
                StepResult::Continue
            }
            Err(r) => r,
        }
    } else {
        // A non-exclusive store may clear the local monitor.
        sim.local_monitor.maybe_clear();
        let value = sim.state.read_x(rt, Reg31Mode::ZeroRegister);
        match write_int(mem, addr, value, size) {
            Ok(()) => {
                sim.trace.log_write(&reg_name(size, false, rt), value, addr);
                StepResult::Continue
            }
            Err(r) => r,
        }
    }
}

pub fn exec_load_literal(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    sign_extend: bool,
    rt: u8,
    offset: i64,
) -> StepResult {
    // The decoder supplies the PC-relative offset.
    let addr = (sim.state.pc as i64).wrapping_add(offset) as u64;
    match read_int(mem, addr, size, sign_extend, true) {
        Ok(value) => {
            sim.state.write_x(rt, value, Reg31Mode::ZeroRegister, RegLog::NoLog);
            sim.trace.log_read(&reg_name(size, sign_extend, rt), value, addr);
            StepResult::Continue
        }
        Err(r) => r,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn exec_load_store_pair(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    load: bool,
    sign_extend: bool,
    rt: u8,
    rt2: u8,
    rn: u8,
    imm: i64,
    mode: AddrMode,
) -> StepResult {
    let base = match read_base(sim, rn) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let wb = (base as i64).wrapping_add(imm) as u64;
    let addr = match mode {
        AddrMode::Offset => wb,
        AddrMode::PreIndex => {
            write_back(sim, rn, wb);
            wb
        }
        AddrMode::PostIndex => base,
    };
    let element = 1u64 << size;
    let addr2 = addr.wrapping_add(element);

    let result = if load {
        match (
            read_int(mem, addr, size, sign_extend, true),
            read_int(mem, addr2, size, sign_extend, true),
        ) {
            (Ok(v1), Ok(v2)) => {
                sim.state.write_x(rt, v1, Reg31Mode::ZeroRegister, RegLog::NoLog);
                sim.state.write_x(rt2, v2, Reg31Mode::ZeroRegister, RegLog::NoLog);
                sim.trace.log_read(&reg_name(size, sign_extend, rt), v1, addr);
                sim.trace.log_read(&reg_name(size, sign_extend, rt2), v2, addr2);
                StepResult::Continue
            }
            (Err(r), _) | (_, Err(r)) => r,
        }
    } else {
        // Pair stores permit rt == rt2; they may clear the monitor too.
        sim.local_monitor.maybe_clear();
        let v1 = sim.state.read_x(rt, Reg31Mode::ZeroRegister);
        let v2 = sim.state.read_x(rt2, Reg31Mode::ZeroRegister);
        match write_int(mem, addr, v1, size).and_then(|()| write_int(mem, addr2, v2, size)) {
            Ok(()) => {
                sim.trace.log_write(&reg_name(size, false, rt), v1, addr);
                sim.trace.log_write(&reg_name(size, false, rt2), v2, addr2);
                StepResult::Continue
            }
            Err(r) => r,
        }
    };

    if matches!(result, StepResult::Continue) && mode == AddrMode::PostIndex {
        write_back(sim, rn, wb);
    }
    result
}

// ---------------------------------------------------------------------------
// SIMD loads and stores
// ---------------------------------------------------------------------------

fn read_simd(
    mem: &mut dyn MemoryAccess,
    addr: u64,
    size: u8,
) -> Result<u128, StepResult> {
    if size == 4 {
        mem.read_u128(addr)
            .map_err(|_| StepResult::Fatal(ExitReason::DataAbort { addr }))
    } else {
        read_int(mem, addr, size, false, false).map(u128::from)
    }
}

fn write_simd(
    mem: &mut dyn MemoryAccess,
    addr: u64,
    value: u128,
    size: u8,
) -> Result<(), StepResult> {
    if size == 4 {
        mem.write_u128(addr, value)
            .map_err(|_| StepResult::Fatal(ExitReason::DataAbort { addr }))
    } else {
        write_int(mem, addr, value as u64, size)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn exec_load_store_simd(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    load: bool,
    rt: u8,
    rn: u8,
    imm: i64,
    mode: AddrMode,
) -> StepResult {
    let base = match read_base(sim, rn) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let wb = (base as i64).wrapping_add(imm) as u64;
    let addr = match mode {
        AddrMode::Offset => wb,
        AddrMode::PreIndex => {
            write_back(sim, rn, wb);
            wb
        }
        AddrMode::PostIndex => base,
    };

    let result = if load {
        match read_simd(mem, addr, size) {
            Ok(value) => {
                sim.state.write_q(rt, value, RegLog::NoLog);
                sim.trace.log_read(&format!("v{rt}"), value as u64, addr);
                StepResult::Continue
            }
            Err(r) => r,
        }
    } else {
        sim.local_monitor.maybe_clear();
        let value = sim.state.read_q(rt) & (u128::MAX >> (128 - 8 * (1u32 << size)));
        match write_simd(mem, addr, value, size) {
            Ok(()) => {
                sim.trace.log_write(&format!("v{rt}"), value as u64, addr);
                StepResult::Continue
            }
            Err(r) => r,
        }
    };

    if matches!(result, StepResult::Continue) && mode == AddrMode::PostIndex {
        write_back(sim, rn, wb);
    }
    result
}

#[allow(clippy::too_many_arguments)]
pub fn exec_load_store_pair_simd(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    load: bool,
    rt: u8,
    rt2: u8,
    rn: u8,
    imm: i64,
    mode: AddrMode,
) -> StepResult {
    let base = match read_base(sim, rn) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let wb = (base as i64).wrapping_add(imm) as u64;
    let addr = match mode {
        AddrMode::Offset => wb,
        AddrMode::PreIndex => {
            write_back(sim, rn, wb);
            wb
        }
        AddrMode::PostIndex => base,
    };
    let element = 1u64 << size;
    let addr2 = addr.wrapping_add(element);

    let result = if load {
        match (read_simd(mem, addr, size), read_simd(mem, addr2, size)) {
            (Ok(v1), Ok(v2)) => {
                sim.state.write_q(rt, v1, RegLog::NoLog);
                sim.state.write_q(rt2, v2, RegLog::NoLog);
                sim.trace.log_read(&format!("v{rt}"), v1 as u64, addr);
                sim.trace.log_read(&format!("v{rt2}"), v2 as u64, addr2);
                StepResult::Continue
            }
            (Err(r), _) | (_, Err(r)) => r,
        }
    } else {
        sim.local_monitor.maybe_clear();
        let mask = u128::MAX >> (128 - 8 * (1u32 << size));
        let v1 = sim.state.read_q(rt) & mask;
        let v2 = sim.state.read_q(rt2) & mask;
        match write_simd(mem, addr, v1, size).and_then(|()| write_simd(mem, addr2, v2, size)) {
            Ok(()) => {
                sim.trace.log_write(&format!("v{rt}"), v1 as u64, addr);
                sim.trace.log_write(&format!("v{rt2}"), v2 as u64, addr2);
                StepResult::Continue
            }
            Err(r) => r,
        }
    };

    if matches!(result, StepResult::Continue) && mode == AddrMode::PostIndex {
        write_back(sim, rn, wb);
    }
    result
}

// ---------------------------------------------------------------------------
// PAC-indexed loads
// ---------------------------------------------------------------------------

pub fn exec_load_pac_indexed(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    key: PacKey,
    rt: u8,
    rn: u8,
    imm: i64,
    writeback: bool,
) -> StepResult {
    let base = sim.state.read_x(rn, Reg31Mode::StackPointer);
    let authed = pac::auth_pac(base, 0, key, PointerType::Data);
    if pac::auth_failed(authed) {
        return StepResult::Fatal(ExitReason::AuthFailure { pc: sim.state.pc, addr: authed });
    }
    let addr = (authed as i64).wrapping_add(imm) as u64;
    if rn == REG31 && !is_aligned(addr, 16) {
        return StepResult::Fatal(ExitReason::StackAlignment { addr });
    }
    match read_int(mem, addr, 3, false, true) {
        Ok(value) => {
            sim.state.write_x(rt, value, Reg31Mode::ZeroRegister, RegLog::NoLog);
            sim.trace.log_read(&xreg_name(rt, Reg31Mode::ZeroRegister), value, addr);
            if writeback {
                write_back(sim, rn, addr);
            }
            StepResult::Continue
        }
        Err(r) => r,
    }
}

// ---------------------------------------------------------------------------
// Exclusives
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn exec_load_store_exclusive(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    load: bool,
    exclusive: bool,
    acquire_release: bool,
    pair: bool,
    rs: u8,
    rt: u8,
    rt2: u8,
    rn: u8,
) -> StepResult {
    let element = 1u64 << size;
    let access_size = if pair { element * 2 } else { element };
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    if let Err(r) = check_atomic_access(sim, rn, addr, access_size) {
        return r;
    }

    if load {
        if exclusive {
            // The single-processor global monitor follows the local one.
            sim.local_monitor.mark_exclusive(addr, access_size);
            sim.global_monitor.mark_exclusive(addr, access_size);
        } else {
            // A non-exclusive load may clear the monitor; do it always to
            // stress LL/SC loops in the simulated code.
            sim.local_monitor.clear();
        }

        let v1 = match read_int(mem, addr, size, false, false) {
            Ok(v) => v,
            Err(r) => return r,
        };
        sim.state.write_x(rt, v1, Reg31Mode::ZeroRegister, RegLog::NoLog);
        let mut v2 = 0;
        if pair {
            v2 = match read_int(mem, addr.wrapping_add(element), size, false, false) {
                Ok(v) => v,
                Err(r) => return r,
            };
            sim.state.write_x(rt2, v2, Reg31Mode::ZeroRegister, RegLog::NoLog);
        }

        if acquire_release {
            // Load-acquire: full fence after the load.
            fence(Ordering::SeqCst);
        }
        sim.trace.log_read(&reg_name(size, false, rt), v1, addr);
        if pair {
            sim.trace.log_read(&reg_name(size, false, rt2), v2, addr.wrapping_add(element));
        }
        StepResult::Continue
    } else {
        if acquire_release {
            // Store-release: full fence before the store.
            fence(Ordering::SeqCst);
        }

        let mut do_store = true;
        if exclusive {
            do_store = sim.local_monitor.is_exclusive(addr, access_size)
                && sim.global_monitor.is_exclusive(addr, access_size);
            sim.state.write_w(rs, if do_store { 0 } else { 1 }, Reg31Mode::ZeroRegister, RegLog::Log);
            // Exclusive stores always clear the local monitor.
            sim.local_monitor.clear();
        } else {
            sim.local_monitor.maybe_clear();
        }

        if do_store {
            let v1 = sim.state.read_x(rt, Reg31Mode::ZeroRegister);
            if let Err(r) = write_int(mem, addr, v1, size) {
                return r;
            }
            sim.trace.log_write(&reg_name(size, false, rt), v1, addr);
            if pair {
                let v2 = sim.state.read_x(rt2, Reg31Mode::ZeroRegister);
                if let Err(r) = write_int(mem, addr.wrapping_add(element), v2, size) {
                    return r;
                }
                sim.trace.log_write(&reg_name(size, false, rt2), v2, addr.wrapping_add(element));
            }
        }
        StepResult::Continue
    }
}

// ---------------------------------------------------------------------------
// CAS / SWP / LD<op>
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn exec_cas(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    acquire: bool,
    release: bool,
    pair: bool,
    rs: u8,
    rt: u8,
    rn: u8,
) -> StepResult {
    let element = 1u64 << size;
    let access_size = if pair { element * 2 } else { element };
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    if let Err(r) = check_atomic_access(sim, rn, addr, access_size) {
        return r;
    }

    let old1 = match read_int(mem, addr, size, false, false) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let old2 = if pair {
        match read_int(mem, addr.wrapping_add(element), size, false, false) {
            Ok(v) => v,
            Err(r) => return r,
        }
    } else {
        0
    };
    if acquire {
        fence(Ordering::SeqCst);
    }

    let cmp1 = sim.state.read_x(rs, Reg31Mode::ZeroRegister) & element_mask(size);
    let matches = if pair {
        let cmp2 = sim.state.read_x(rs + 1, Reg31Mode::ZeroRegister) & element_mask(size);
        old1 == cmp1 && old2 == cmp2
    } else {
        old1 == cmp1
    };

    if matches {
        if release {
            fence(Ordering::SeqCst);
        }
        let new1 = sim.state.read_x(rt, Reg31Mode::ZeroRegister);
        if let Err(r) = write_int(mem, addr, new1, size) {
            return r;
        }
        sim.trace.log_write(&reg_name(size, false, rt), new1, addr);
        if pair {
            let new2 = sim.state.read_x(rt + 1, Reg31Mode::ZeroRegister);
            if let Err(r) = write_int(mem, addr.wrapping_add(element), new2, size) {
                return r;
            }
            sim.trace.log_write(&reg_name(size, false, rt + 1), new2, addr.wrapping_add(element));
        }
    }

    // Rs always receives the observed value.
    sim.state.write_x(rs, old1, Reg31Mode::ZeroRegister, RegLog::NoLog);
    sim.trace.log_read(&reg_name(size, false, rs), old1, addr);
    if pair {
        sim.state.write_x(rs + 1, old2, Reg31Mode::ZeroRegister, RegLog::NoLog);
        sim.trace.log_read(&reg_name(size, false, rs + 1), old2, addr.wrapping_add(element));
    }
    StepResult::Continue
}

fn element_mask(size: u8) -> u64 {
    match size {
        0 => 0xFF,
        1 => 0xFFFF,
        2 => 0xFFFF_FFFF,
        _ => u64::MAX,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn exec_swp(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    acquire: bool,
    release: bool,
    rs: u8,
    rt: u8,
    rn: u8,
) -> StepResult {
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    if let Err(r) = check_atomic_access(sim, rn, addr, 1 << size) {
        return r;
    }
    let old = match read_int(mem, addr, size, false, false) {
        Ok(v) => v,
        Err(r) => return r,
    };
    if acquire {
        fence(Ordering::SeqCst);
    }
    if release {
        fence(Ordering::SeqCst);
    }
    let new = sim.state.read_x(rs, Reg31Mode::ZeroRegister);
    if let Err(r) = write_int(mem, addr, new, size) {
        return r;
    }
    sim.state.write_x(rt, old, Reg31Mode::ZeroRegister, RegLog::NoLog);
    sim.trace.log_read(&reg_name(size, false, rt), old, addr);
    sim.trace.log_write(&reg_name(size, false, rs), new, addr);
    StepResult::Continue
}

#[allow(clippy::too_many_arguments)]
pub fn exec_atomic_rmw(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    op: AtomicOp,
    acquire: bool,
    release: bool,
    rs: u8,
    rt: u8,
    rn: u8,
) -> StepResult {
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    if let Err(r) = check_atomic_access(sim, rn, addr, 1 << size) {
        return r;
    }
    let old = match read_int(mem, addr, size, false, false) {
        Ok(v) => v,
        Err(r) => return r,
    };
    if acquire {
        fence(Ordering::SeqCst);
    }

    let operand = sim.state.read_x(rs, Reg31Mode::ZeroRegister) & element_mask(size);
    let esize_bits = 8u32 << size;
    let sext = |v: u64| a64sim_common::sign_extend(v, esize_bits);
    let new = match op {
        AtomicOp::Add => old.wrapping_add(operand),
        AtomicOp::Clr => old & !operand,
        AtomicOp::Eor => old ^ operand,
        AtomicOp::Set => old | operand,
        AtomicOp::Smax => if sext(old) >= sext(operand) { old } else { operand },
        AtomicOp::Smin => if sext(old) <= sext(operand) { old } else { operand },
        AtomicOp::Umax => old.max(operand),
        AtomicOp::Umin => old.min(operand),
    } & element_mask(size);

    if release {
        fence(Ordering::SeqCst);
    }
    if let Err(r) = write_int(mem, addr, new, size) {
        return r;
    }

    // Rt receives the pre-value.
    sim.state.write_x(rt, old, Reg31Mode::ZeroRegister, RegLog::NoLog);
    sim.trace.log_read(&reg_name(size, false, rt), old, addr);
    sim.trace.log_write(&reg_name(size, false, rs), new, addr);
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// RCpc loads and stores
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn exec_load_acquire_rcpc(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    size: u8,
    load: bool,
    sign_extend: bool,
    to64: bool,
    rt: u8,
    rn: u8,
    imm: i64,
) -> StepResult {
    let base = sim.state.read_x(rn, Reg31Mode::StackPointer);
    let addr = (base as i64).wrapping_add(imm) as u64;
    if let Err(r) = check_atomic_access(sim, rn, addr, 1 << size) {
        return r;
    }

    if load {
        let value = match read_int(mem, addr, size, sign_extend, to64) {
            Ok(v) => v,
            Err(r) => return r,
        };
        fence(Ordering::SeqCst);
        sim.state.write_x(rt, value, Reg31Mode::ZeroRegister, RegLog::NoLog);
        sim.trace.log_read(&reg_name(size, to64, rt), value, addr);
    } else {
        sim.local_monitor.maybe_clear();
        fence(Ordering::SeqCst);
        let value = sim.state.read_x(rt, Reg31Mode::ZeroRegister);
        if let Err(r) = write_int(mem, addr, value, size) {
            return r;
        }
        sim.trace.log_write(&reg_name(size, false, rt), value, addr);
    }
    StepResult::Continue
}

/// The driver uses this to fetch instruction words.
pub fn fetch_instruction(mem: &mut dyn MemoryAccess, pc: u64) -> Result<u32, ExitReason> {
    debug_assert!(is_aligned(pc, INSTRUCTION_SIZE));
    mem.read_u32(pc).map_err(|_| ExitReason::InstructionAbort { addr: pc })
}
