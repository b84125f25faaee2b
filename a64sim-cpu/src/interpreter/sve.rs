// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! SVE engine: scalable vector and predicate operations.
//!
//! Z registers hold VL bits, P registers VL/8; one predicate bit gates
//! each byte lane, so for element size L bytes the bit at offset L*k
//! gates lane k. Merge predication keeps destination lanes, zeroing
//! predication clears them.

use a64sim_common::{sign_extend, uint_mask};

use crate::inst::{PredLogicalOp, PredPattern, SveBinOp, SveCmpCond, VectorFormat, WhileCond};
use crate::memory::MemoryAccess;
use crate::state::{CpuState, PRegister, Reg31Mode, RegLog};

use super::{ExitReason, Simulator, StepResult};

// ---------------------------------------------------------------------------
// Predicate plumbing
// ---------------------------------------------------------------------------

/// Set NZCV from a predicate under a governing mask: N is the first
/// active lane's value, Z reports no active true lane, C is the
/// complement of the last active lane's value.
pub fn pred_test(state: &mut CpuState, vform: VectorFormat, pg: PRegister, pn: PRegister) {
    let count = vform.lane_count(state.vl_bits());
    let mut first: Option<bool> = None;
    let mut last = false;
    let mut none = true;
    for lane in 0..count {
        if pg.active(vform, lane) {
            let v = pn.active(vform, lane);
            if first.is_none() {
                first = Some(v);
            }
            last = v;
            if v {
                none = false;
            }
        }
    }
    state.nzcv.set_n(first.unwrap_or(false));
    state.nzcv.set_z(none);
    state.nzcv.set_c(!last);
    state.nzcv.set_v(false);
    state.mark_nzcv_written();
}

/// A predicate with every lane-gating bit set.
fn all_true(state: &CpuState) -> PRegister {
    let mut p = PRegister::default();
    for bit in 0..(state.vl_bits() / 8) {
        p.set_bit(bit, true);
    }
    p
}

fn count_active(state: &CpuState, vform: VectorFormat, pg: &PRegister) -> u64 {
    let count = vform.lane_count(state.vl_bits());
    (0..count).filter(|&lane| pg.active(vform, lane)).count() as u64
}

/// Lanes selected by a PTRUE pattern, given the available lane count.
fn pattern_lane_count(available: u32, pattern: PredPattern) -> u32 {
    use PredPattern::*;
    let fixed = |n: u32| if n <= available { n } else { 0 };
    match pattern {
        Pow2 => {
            let mut n = 1;
            while n * 2 <= available {
                n *= 2;
            }
            n
        }
        Vl1 => fixed(1),
        Vl2 => fixed(2),
        Vl3 => fixed(3),
        Vl4 => fixed(4),
        Vl5 => fixed(5),
        Vl6 => fixed(6),
        Vl7 => fixed(7),
        Vl8 => fixed(8),
        Vl16 => fixed(16),
        Vl32 => fixed(32),
        Vl64 => fixed(64),
        Vl128 => fixed(128),
        Vl256 => fixed(256),
        Mul4 => available - (available % 4),
        Mul3 => available - (available % 3),
        All => available,
    }
}

// ---------------------------------------------------------------------------
// Vector generation and moves
// ---------------------------------------------------------------------------

pub fn exec_sve_index(
    state: &mut CpuState,
    vform: VectorFormat,
    zd: u8,
    start: u64,
    step: u64,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let reg = state.vreg_mut(zd, RegLog::Log);
    for lane in 0..count {
        let value = start.wrapping_add(step.wrapping_mul(lane as u64));
        reg.set_lane(lane, esize, value & uint_mask(esize));
    }
    StepResult::Continue
}

pub fn exec_sve_dup_imm(state: &mut CpuState, vform: VectorFormat, zd: u8, imm: i64) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let reg = state.vreg_mut(zd, RegLog::Log);
    for lane in 0..count {
        reg.set_lane(lane, esize, (imm as u64) & uint_mask(esize));
    }
    StepResult::Continue
}

pub fn exec_sve_dup_scalar(state: &mut CpuState, vform: VectorFormat, zd: u8, rn: u8) -> StepResult {
    let value = state.read_x(rn, Reg31Mode::StackPointer);
    exec_sve_dup_imm(state, vform, zd, value as i64)
}

pub fn exec_sve_dup_element(
    state: &mut CpuState,
    vform: VectorFormat,
    zd: u8,
    zn: u8,
    lane: u32,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    // An out-of-range index yields zero.
    let value = if lane < (state.vl_bits() / esize) {
        state.read_lane(zn, lane, esize)
    } else {
        0
    };
    let reg = state.vreg_mut(zd, RegLog::Log);
    for i in 0..count {
        reg.set_lane(i, esize, value);
    }
    StepResult::Continue
}

/// Shift every lane up by one and insert the new value at lane zero.
pub fn exec_sve_insr(state: &mut CpuState, vform: VectorFormat, zd: u8, value: u64) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let mut lanes: Vec<u64> = (0..count).map(|i| state.read_lane(zd, i, esize)).collect();
    lanes.rotate_right(1);
    lanes[0] = value & uint_mask(esize);
    let reg = state.vreg_mut(zd, RegLog::Log);
    for (i, v) in lanes.iter().enumerate() {
        reg.set_lane(i as u32, esize, *v);
    }
    StepResult::Continue
}

pub fn exec_sve_unpk(
    state: &mut CpuState,
    signed: bool,
    high: bool,
    vform_dst: VectorFormat,
    zd: u8,
    zn: u8,
) -> StepResult {
    let wide_esize = vform_dst.lane_bits();
    let narrow_esize = wide_esize / 2;
    let count = vform_dst.lane_count(state.vl_bits());
    let base = if high { count } else { 0 };
    let values: Vec<u64> = (0..count)
        .map(|i| {
            let v = state.read_lane(zn, base + i, narrow_esize);
            if signed {
                (sign_extend(v, narrow_esize) as u64) & uint_mask(wide_esize)
            } else {
                v
            }
        })
        .collect();
    let reg = state.vreg_mut(zd, RegLog::Log);
    for (i, v) in values.iter().enumerate() {
        reg.set_lane(i as u32, wide_esize, *v);
    }
    StepResult::Continue
}

pub fn exec_sve_sel(
    state: &mut CpuState,
    vform: VectorFormat,
    zd: u8,
    pg: u8,
    zn: u8,
    zm: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let pg = *state.preg(pg);
    let values: Vec<u64> = (0..count)
        .map(|i| {
            if pg.active(vform, i) {
                state.read_lane(zn, i, esize)
            } else {
                state.read_lane(zm, i, esize)
            }
        })
        .collect();
    let reg = state.vreg_mut(zd, RegLog::Log);
    for (i, v) in values.iter().enumerate() {
        reg.set_lane(i as u32, esize, *v);
    }
    StepResult::Continue
}

/// Predicated destructive binary arithmetic; inactive lanes keep the
/// destination value (merge predication).
pub fn exec_sve_bin(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SveBinOp,
    zdn: u8,
    pg: u8,
    zm: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let ones = uint_mask(esize);
    let pg = *state.preg(pg);
    let sx = |v: u64| sign_extend(v, esize);

    let values: Vec<u64> = (0..count)
        .map(|i| {
            let d = state.read_lane(zdn, i, esize);
            if !pg.active(vform, i) {
                return d;
            }
            let m = state.read_lane(zm, i, esize);
            match op {
                SveBinOp::Add => d.wrapping_add(m) & ones,
                SveBinOp::Sub => d.wrapping_sub(m) & ones,
                SveBinOp::Mul => d.wrapping_mul(m) & ones,
                SveBinOp::Smax => if sx(d) >= sx(m) { d } else { m },
                SveBinOp::Smin => if sx(d) <= sx(m) { d } else { m },
                SveBinOp::Umax => d.max(m),
                SveBinOp::Umin => d.min(m),
                SveBinOp::And => d & m,
                SveBinOp::Orr => d | m,
                SveBinOp::Eor => d ^ m,
            }
        })
        .collect();
    let reg = state.vreg_mut(zdn, RegLog::Log);
    for (i, v) in values.iter().enumerate() {
        reg.set_lane(i as u32, esize, *v);
    }
    StepResult::Continue
}

pub fn exec_sve_add_sub_vec(
    state: &mut CpuState,
    vform: VectorFormat,
    sub: bool,
    zd: u8,
    zn: u8,
    zm: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let ones = uint_mask(esize);
    let values: Vec<u64> = (0..count)
        .map(|i| {
            let n = state.read_lane(zn, i, esize);
            let m = state.read_lane(zm, i, esize);
            if sub { n.wrapping_sub(m) & ones } else { n.wrapping_add(m) & ones }
        })
        .collect();
    let reg = state.vreg_mut(zd, RegLog::Log);
    for (i, v) in values.iter().enumerate() {
        reg.set_lane(i as u32, esize, *v);
    }
    StepResult::Continue
}

/// MOVPRFX: a copy (optionally predicated) that the driver latches so
/// the next destructive instruction is treated as prefixed. Executing
/// the copy up front is all the latch needs.
pub fn exec_sve_movprfx(
    state: &mut CpuState,
    predicated: bool,
    merging: bool,
    vform: VectorFormat,
    zd: u8,
    pg: u8,
    zn: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let pg = *state.preg(pg);
    let values: Vec<u64> = (0..count)
        .map(|i| {
            if !predicated || pg.active(vform, i) {
                state.read_lane(zn, i, esize)
            } else if merging {
                state.read_lane(zd, i, esize)
            } else {
                0
            }
        })
        .collect();
    let reg = state.vreg_mut(zd, RegLog::Log);
    for (i, v) in values.iter().enumerate() {
        reg.set_lane(i as u32, esize, *v);
    }
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// Predicate generation
// ---------------------------------------------------------------------------

pub fn exec_sve_ptrue(
    state: &mut CpuState,
    vform: VectorFormat,
    pd: u8,
    pattern: PredPattern,
    set_flags: bool,
) -> StepResult {
    let available = vform.lane_count(state.vl_bits());
    let active = pattern_lane_count(available, pattern);
    let reg = state.preg_mut(pd, RegLog::Log);
    reg.clear();
    for lane in 0..available {
        reg.set_active(vform, lane, lane < active);
    }
    if set_flags {
        let pd_val = *state.preg(pd);
        pred_test(state, vform, pd_val, pd_val);
    }
    StepResult::Continue
}

pub fn exec_sve_pfalse(state: &mut CpuState, pd: u8) -> StepResult {
    state.preg_mut(pd, RegLog::Log).clear();
    StepResult::Continue
}

pub fn exec_sve_ptest(state: &mut CpuState, pg: u8, pn: u8) -> StepResult {
    let pg = *state.preg(pg);
    let pn = *state.preg(pn);
    pred_test(state, VectorFormat::VnB, pg, pn);
    StepResult::Continue
}

#[allow(clippy::too_many_arguments)]
pub fn exec_sve_pred_logical(
    state: &mut CpuState,
    op: PredLogicalOp,
    set_flags: bool,
    pd: u8,
    pg: u8,
    pn: u8,
    pm: u8,
) -> StepResult {
    let bits = state.vl_bits() / 8;
    let pg_val = *state.preg(pg);
    let pn_val = *state.preg(pn);
    let pm_val = *state.preg(pm);
    let reg = state.preg_mut(pd, RegLog::Log);
    reg.clear();
    for i in 0..bits {
        let (g, n, m) = (pg_val.bit(i), pn_val.bit(i), pm_val.bit(i));
        let value = match op {
            PredLogicalOp::And => n & m,
            PredLogicalOp::Bic => n & !m,
            PredLogicalOp::Eor => n ^ m,
            PredLogicalOp::Nand => !(n & m),
            PredLogicalOp::Nor => !(n | m),
            PredLogicalOp::Orn => n | !m,
            PredLogicalOp::Orr => n | m,
            PredLogicalOp::Sel => if g { n } else { m },
        };
        // SEL merges through the governor; the rest zero inactive bits.
        let gated = if op == PredLogicalOp::Sel { value } else { value & g };
        reg.set_bit(i, gated);
    }
    if set_flags {
        let pd_val = *state.preg(pd);
        pred_test(state, VectorFormat::VnB, pg_val, pd_val);
    }
    StepResult::Continue
}

pub fn exec_sve_while(
    state: &mut CpuState,
    vform: VectorFormat,
    cond: WhileCond,
    sf: bool,
    pd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    let mut src1 = if sf {
        state.read_x(rn, Reg31Mode::ZeroRegister) as i64
    } else {
        state.read_w(rn, Reg31Mode::ZeroRegister) as i32 as i64
    };
    let src2 = if sf {
        state.read_x(rm, Reg31Mode::ZeroRegister) as i64
    } else {
        state.read_w(rm, Reg31Mode::ZeroRegister) as i32 as i64
    };

    let count = vform.lane_count(state.vl_bits());
    let mut last = true;
    let reg = state.preg_mut(pd, RegLog::Log);
    reg.clear();
    for lane in 0..count {
        let pass = match cond {
            WhileCond::Lt => src1 < src2,
            WhileCond::Le => src1 <= src2,
            WhileCond::Lo => (src1 as u64) < (src2 as u64),
            WhileCond::Ls => (src1 as u64) <= (src2 as u64),
        };
        // Once false, every later lane is false.
        last = last && pass;
        reg.set_active(vform, lane, last);
        src1 = src1.wrapping_add(1);
    }

    let ones = all_true(state);
    let pd_val = *state.preg(pd);
    pred_test(state, vform, ones, pd_val);
    StepResult::Continue
}

pub fn exec_sve_cterm(state: &mut CpuState, ne: bool, sf: bool, rn: u8, rm: u8) -> StepResult {
    let src1 = state.read_sized(sf, rn, Reg31Mode::ZeroRegister);
    let src2 = state.read_sized(sf, rm, Reg31Mode::ZeroRegister);
    let term = if ne { src1 != src2 } else { src1 == src2 };
    state.nzcv.set_n(term);
    state.nzcv.set_v(if term { false } else { !state.nzcv.c() });
    state.mark_nzcv_written();
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// Vector comparison
// ---------------------------------------------------------------------------

fn cmp_lane(cond: SveCmpCond, n: u64, m: u64, esize: u32) -> bool {
    let sn = sign_extend(n, esize);
    let sm = sign_extend(m, esize);
    match cond {
        SveCmpCond::Eq => n == m,
        SveCmpCond::Ne => n != m,
        SveCmpCond::Ge => sn >= sm,
        SveCmpCond::Gt => sn > sm,
        SveCmpCond::Le => sn <= sm,
        SveCmpCond::Lt => sn < sm,
        SveCmpCond::Hs => n >= m,
        SveCmpCond::Hi => n > m,
        SveCmpCond::Ls => n <= m,
        SveCmpCond::Lo => n < m,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn exec_sve_cmp_vec(
    state: &mut CpuState,
    vform: VectorFormat,
    cond: SveCmpCond,
    wide: bool,
    pd: u8,
    pg: u8,
    zn: u8,
    zm: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let pg_val = *state.preg(pg);

    let mut results = vec![false; count as usize];
    for lane in 0..count {
        if !pg_val.active(vform, lane) {
            continue;
        }
        let n = state.read_lane(zn, lane, esize);
        let m = if wide {
            // Wide forms compare against the containing D element,
            // truncated to the lane width for the comparison domain.
            let d = state.read_lane(zm, lane * esize / 64, 64);
            let sn = sign_extend(n, esize) as i128;
            let signed = matches!(
                cond,
                SveCmpCond::Ge | SveCmpCond::Gt | SveCmpCond::Le | SveCmpCond::Lt
            );
            let (a, b): (i128, i128) = if signed {
                (sn, d as i64 as i128)
            } else {
                (n as i128, d as i128)
            };
            results[lane as usize] = match cond {
                SveCmpCond::Eq => a == b,
                SveCmpCond::Ne => a != b,
                SveCmpCond::Ge | SveCmpCond::Hs => a >= b,
                SveCmpCond::Gt | SveCmpCond::Hi => a > b,
                SveCmpCond::Le | SveCmpCond::Ls => a <= b,
                SveCmpCond::Lt | SveCmpCond::Lo => a < b,
            };
            continue;
        } else {
            state.read_lane(zm, lane, esize)
        };
        results[lane as usize] = cmp_lane(cond, n, m, esize);
    }

    let reg = state.preg_mut(pd, RegLog::Log);
    reg.clear();
    for lane in 0..count {
        reg.set_active(vform, lane, results[lane as usize]);
    }
    let pd_val = *state.preg(pd);
    pred_test(state, vform, pg_val, pd_val);
    StepResult::Continue
}

pub fn exec_sve_cmp_imm(
    state: &mut CpuState,
    vform: VectorFormat,
    cond: SveCmpCond,
    pd: u8,
    pg: u8,
    zn: u8,
    imm: i64,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let pg_val = *state.preg(pg);
    let m = (imm as u64) & uint_mask(esize);

    let results: Vec<bool> = (0..count)
        .map(|lane| {
            pg_val.active(vform, lane) && cmp_lane(cond, state.read_lane(zn, lane, esize), m, esize)
        })
        .collect();
    let reg = state.preg_mut(pd, RegLog::Log);
    reg.clear();
    for lane in 0..count {
        reg.set_active(vform, lane, results[lane as usize]);
    }
    let pd_val = *state.preg(pd);
    pred_test(state, vform, pg_val, pd_val);
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// Predicate counting
// ---------------------------------------------------------------------------

/// `acc ± delta` within `n` bits, with optional signed or unsigned
/// saturation, sign-extending a saturated signed W result into X.
pub fn inc_dec_n(acc: u64, delta: i64, n: u32, saturating: bool, signed: bool) -> u64 {
    let sign_mask = 1u64 << (n - 1);
    let mask = uint_mask(n);

    let acc = acc & mask;
    let mut result = acc.wrapping_add(delta as u64) & mask;

    let acc_negative = acc & sign_mask != 0;
    let delta_negative = delta < 0;
    let mut result_negative = result & sign_mask != 0;

    if saturating {
        if signed {
            // Same-signed operands with a differently-signed result
            // overflowed.
            if acc_negative == delta_negative && acc_negative != result_negative {
                if result_negative {
                    result_negative = false;
                    result = mask & !sign_mask;
                } else {
                    result_negative = true;
                    result = sign_mask;
                }
            }
        } else if delta_negative && result > acc {
            result = 0;
        } else if !delta_negative && result < acc {
            result = mask;
        }
    }

    if result_negative && signed {
        result |= !mask;
    }
    result
}

#[allow(clippy::too_many_arguments)]
pub fn exec_sve_inc_dec_reg(
    state: &mut CpuState,
    vform: VectorFormat,
    decrement: bool,
    saturating: bool,
    signed: bool,
    sf: bool,
    rdn: u8,
    pg: u8,
) -> StepResult {
    let count = count_active(state, vform, state.preg(pg)) as i64;
    let delta = if decrement { -count } else { count };
    let width = if sf { 64 } else { 32 };
    let acc = state.read_x(rdn, Reg31Mode::ZeroRegister);
    let result = inc_dec_n(acc, delta, width, saturating, signed);
    let result = if sf || (saturating && signed) { result } else { result & 0xFFFF_FFFF };
    state.write_x(rdn, result, Reg31Mode::ZeroRegister, RegLog::Log);
    StepResult::Continue
}

#[allow(clippy::too_many_arguments)]
pub fn exec_sve_inc_dec_vec(
    state: &mut CpuState,
    vform: VectorFormat,
    decrement: bool,
    saturating: bool,
    signed: bool,
    zdn: u8,
    pg: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(state.vl_bits());
    let active = count_active(state, vform, state.preg(pg)) as i64;
    let delta = if decrement { -active } else { active };

    let values: Vec<u64> = (0..count)
        .map(|i| {
            let v = state.read_lane(zdn, i, esize);
            inc_dec_n(v, delta, esize, saturating, signed) & uint_mask(esize)
        })
        .collect();
    let reg = state.vreg_mut(zdn, RegLog::Log);
    for (i, v) in values.iter().enumerate() {
        reg.set_lane(i as u32, esize, *v);
    }
    StepResult::Continue
}

pub fn exec_sve_cntp(state: &mut CpuState, vform: VectorFormat, rd: u8, pg: u8, pn: u8) -> StepResult {
    let count = vform.lane_count(state.vl_bits());
    let pg = *state.preg(pg);
    let pn = *state.preg(pn);
    let total = (0..count)
        .filter(|&lane| pg.active(vform, lane) && pn.active(vform, lane))
        .count() as u64;
    state.write_x(rd, total, Reg31Mode::ZeroRegister, RegLog::Log);
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// Vector-length arithmetic
// ---------------------------------------------------------------------------

pub fn exec_sve_rdvl(state: &mut CpuState, rd: u8, scale: i64) -> StepResult {
    let value = (state.vl_bytes() as i64).wrapping_mul(scale);
    state.write_x(rd, value as u64, Reg31Mode::ZeroRegister, RegLog::Log);
    StepResult::Continue
}

pub fn exec_sve_addvl(state: &mut CpuState, rd: u8, rn: u8, scale: i64) -> StepResult {
    let base = state.read_x(rn, Reg31Mode::StackPointer);
    let value = base.wrapping_add((state.vl_bytes() as i64).wrapping_mul(scale) as u64);
    state.write_x(rd, value, Reg31Mode::StackPointer, RegLog::Log);
    StepResult::Continue
}

pub fn exec_sve_addpl(state: &mut CpuState, rd: u8, rn: u8, scale: i64) -> StepResult {
    let base = state.read_x(rn, Reg31Mode::StackPointer);
    let value = base.wrapping_add((state.pl_bytes() as i64).wrapping_mul(scale) as u64);
    state.write_x(rd, value, Reg31Mode::StackPointer, RegLog::Log);
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// Whole-register loads and stores
// ---------------------------------------------------------------------------

// Byte-by-byte copies keep the emulated image endian-neutral.

pub fn exec_sve_ldr_z(sim: &mut Simulator, mem: &mut dyn MemoryAccess, zt: u8, rn: u8) -> StepResult {
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    let len = sim.state.vl_bytes();
    let mut bytes = vec![0u8; len];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = match mem.read_u8(addr + i as u64) {
            Ok(v) => v,
            Err(_) => return StepResult::Fatal(ExitReason::DataAbort { addr: addr + i as u64 }),
        };
    }
    let reg = sim.state.vreg_mut(zt, RegLog::NoLog);
    reg.byte_slice_mut(len).copy_from_slice(&bytes);
    sim.trace.log_read(&format!("z{zt}"), u64::from_le_bytes(bytes[..8.min(len)].try_into().unwrap_or([0; 8])), addr);
    StepResult::Continue
}

pub fn exec_sve_str_z(sim: &mut Simulator, mem: &mut dyn MemoryAccess, zt: u8, rn: u8) -> StepResult {
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    let len = sim.state.vl_bytes();
    let bytes: Vec<u8> = sim.state.vreg(zt).byte_slice(len).to_vec();
    for (i, b) in bytes.iter().enumerate() {
        if mem.write_u8(addr + i as u64, *b).is_err() {
            return StepResult::Fatal(ExitReason::DataAbort { addr: addr + i as u64 });
        }
    }
    sim.trace.log_write(&format!("z{zt}"), u64::from_le_bytes(bytes[..8.min(len)].try_into().unwrap_or([0; 8])), addr);
    StepResult::Continue
}

pub fn exec_sve_ldr_p(sim: &mut Simulator, mem: &mut dyn MemoryAccess, pt: u8, rn: u8) -> StepResult {
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    let len = sim.state.pl_bytes();
    let mut bytes = vec![0u8; len];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = match mem.read_u8(addr + i as u64) {
            Ok(v) => v,
            Err(_) => return StepResult::Fatal(ExitReason::DataAbort { addr: addr + i as u64 }),
        };
    }
    let reg = sim.state.preg_mut(pt, RegLog::NoLog);
    reg.byte_slice_mut(len).copy_from_slice(&bytes);
    sim.trace.log_read(&format!("p{pt}"), bytes[0] as u64, addr);
    StepResult::Continue
}

pub fn exec_sve_str_p(sim: &mut Simulator, mem: &mut dyn MemoryAccess, pt: u8, rn: u8) -> StepResult {
    let addr = sim.state.read_x(rn, Reg31Mode::StackPointer);
    let len = sim.state.pl_bytes();
    let bytes: Vec<u8> = sim.state.preg(pt).byte_slice(len).to_vec();
    for (i, b) in bytes.iter().enumerate() {
        if mem.write_u8(addr + i as u64, *b).is_err() {
            return StepResult::Fatal(ExitReason::DataAbort { addr: addr + i as u64 });
        }
    }
    sim.trace.log_write(&format!("p{pt}"), bytes[0] as u64, addr);
    StepResult::Continue
}
