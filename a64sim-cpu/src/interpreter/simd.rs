// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Advanced SIMD lane engine.
//!
//! Every kernel reads its source lanes first (destinations may alias
//! sources), computes per-lane results in a double-width intermediate,
//! then applies post-processing in a fixed order: primary arithmetic,
//! rounding, halving, saturation. The post-processing is an explicit
//! [`PostOp`] mask rather than chained combinators.

use a64sim_common::{sign_extend, uint_mask};

use crate::inst::{
    SimdBitwiseOp, SimdFpOp, SimdIntOp, SimdPermuteOp, SimdReduceOp, SimdShiftImmOp,
    SimdUnaryOp, SimdWideOp, VectorFormat,
};
use crate::state::{CpuState, RegLog, Reg31Mode};

use super::fp;
use super::StepResult;

// ---------------------------------------------------------------------------
// Lane plumbing
// ---------------------------------------------------------------------------

/// Read the lanes of a NEON-format source as raw bits.
fn read_lanes(state: &CpuState, code: u8, vform: VectorFormat) -> Vec<u64> {
    let esize = vform.lane_bits();
    (0..vform.lane_count(0)).map(|i| state.read_lane(code, i, esize)).collect()
}

/// Assemble lanes into the register, zeroing everything the format does
/// not cover (the architected effect of a vector write).
fn write_lanes(state: &mut CpuState, code: u8, vform: VectorFormat, lanes: &[u64]) {
    let esize = vform.lane_bits();
    if vform.is_scalar() {
        state.write_scalar(code, esize, lanes[0], RegLog::Log);
        return;
    }
    let mut q: u128 = 0;
    for (i, lane) in lanes.iter().enumerate() {
        let masked = lane & uint_mask(esize);
        q |= (masked as u128) << (i as u32 * esize);
    }
    state.write_q(code, q, RegLog::Log);
}

/// Write lanes into one half of the register, preserving the other half
/// (the second-half narrowing forms).
fn write_lanes_half(state: &mut CpuState, code: u8, vform: VectorFormat, lanes: &[u64], upper: bool) {
    let esize = vform.lane_bits();
    let half_bits = 64;
    let mut half: u64 = 0;
    for (i, lane) in lanes.iter().enumerate() {
        half |= (lane & uint_mask(esize)) << (i as u32 * esize);
    }
    let old = state.read_q(code);
    let q = if upper {
        (old & uint_mask(half_bits) as u128) | ((half as u128) << 64)
    } else {
        half as u128
    };
    state.write_q(code, q, RegLog::Log);
}

fn min_int(esize: u32) -> i128 {
    -(1i128 << (esize - 1))
}

fn max_int(esize: u32) -> i128 {
    (1i128 << (esize - 1)) - 1
}

fn max_uint(esize: u32) -> i128 {
    (1i128 << esize) - 1
}

/// Post-processing applied to the double-width intermediate, in order:
/// rounding, halving, saturation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostOp {
    pub round: bool,
    pub halve: bool,
    pub sat_signed: bool,
    pub sat_unsigned: bool,
}

impl PostOp {
    fn apply(self, mut wide: i128, esize: u32) -> u64 {
        if self.round {
            wide += 1;
        }
        if self.halve {
            wide >>= 1;
        }
        if self.sat_signed {
            wide = wide.clamp(min_int(esize), max_int(esize));
        }
        if self.sat_unsigned {
            wide = wide.clamp(0, max_uint(esize));
        }
        (wide as u64) & uint_mask(esize)
    }
}

const SAT_SIGNED: PostOp = PostOp { round: false, halve: false, sat_signed: true, sat_unsigned: false };
const SAT_UNSIGNED: PostOp = PostOp { round: false, halve: false, sat_signed: false, sat_unsigned: true };

// ---------------------------------------------------------------------------
// Integer three-same
// ---------------------------------------------------------------------------

pub fn exec_simd_int_3same(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SimdIntOp,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    use SimdIntOp::*;
    let esize = vform.lane_bits();
    let a = read_lanes(state, rn, vform);
    let b = read_lanes(state, rm, vform);
    let d = read_lanes(state, rd, vform);
    let count = a.len();

    let sx = |v: u64| sign_extend(v, esize) as i128;
    let zx = |v: u64| v as i128;
    let ones = uint_mask(esize);

    let mut out = vec![0u64; count];
    let mut post = PostOp::default();

    // Pairwise forms concatenate rn:rm and reduce adjacent pairs.
    let pairwise = matches!(op, Addp | Smaxp | Sminp | Umaxp | Uminp);
    if pairwise {
        let concat: Vec<u64> = a.iter().chain(b.iter()).copied().collect();
        for (i, out_lane) in out.iter_mut().enumerate() {
            let (x, y) = (concat[2 * i], concat[2 * i + 1]);
            *out_lane = match op {
                Addp => (zx(x) + zx(y)) as u64 & ones,
                Smaxp => if sx(x) >= sx(y) { x } else { y },
                Sminp => if sx(x) <= sx(y) { x } else { y },
                Umaxp => x.max(y),
                _ => x.min(y),
            };
        }
        write_lanes(state, rd, vform, &out);
        return StepResult::Continue;
    }

    for i in 0..count {
        let (x, y) = (a[i], b[i]);
        let wide: i128 = match op {
            Add => zx(x) + zx(y),
            Sub => zx(x) - zx(y),
            Mul => zx(x).wrapping_mul(zx(y)),
            Mla => zx(d[i]) + zx(x).wrapping_mul(zx(y)),
            Mls => zx(d[i]) - zx(x).wrapping_mul(zx(y)),
            SqAdd => {
                post = SAT_SIGNED;
                sx(x) + sx(y)
            }
            UqAdd => {
                post = SAT_UNSIGNED;
                zx(x) + zx(y)
            }
            SqSub => {
                post = SAT_SIGNED;
                sx(x) - sx(y)
            }
            UqSub => {
                post = SAT_UNSIGNED;
                zx(x) - zx(y)
            }
            SHAdd => {
                post.halve = true;
                sx(x) + sx(y)
            }
            UHAdd => {
                post.halve = true;
                zx(x) + zx(y)
            }
            SHSub => {
                post.halve = true;
                sx(x) - sx(y)
            }
            UHSub => {
                post.halve = true;
                zx(x) - zx(y)
            }
            SRHAdd => {
                post.round = true;
                post.halve = true;
                sx(x) + sx(y)
            }
            URHAdd => {
                post.round = true;
                post.halve = true;
                zx(x) + zx(y)
            }
            Smax => if sx(x) >= sx(y) { zx(x) } else { zx(y) },
            Smin => if sx(x) <= sx(y) { zx(x) } else { zx(y) },
            Umax => zx(x.max(y)),
            Umin => zx(x.min(y)),
            Sabd => (sx(x) - sx(y)).abs(),
            Uabd => (zx(x) - zx(y)).abs(),
            Saba => zx(d[i]) + (sx(x) - sx(y)).abs(),
            Uaba => zx(d[i]) + (zx(x) - zx(y)).abs(),
            CmEq => if x == y { ones as i128 } else { 0 },
            CmGe => if sx(x) >= sx(y) { ones as i128 } else { 0 },
            CmGt => if sx(x) > sx(y) { ones as i128 } else { 0 },
            CmHi => if x > y { ones as i128 } else { 0 },
            CmHs => if x >= y { ones as i128 } else { 0 },
            CmTst => if x & y != 0 { ones as i128 } else { 0 },
            Sshl => shift_by_register(sx(x), y, esize, false),
            Ushl => shift_by_register(zx(x), y, esize, false),
            Srshl => shift_by_register(sx(x), y, esize, true),
            Urshl => shift_by_register(zx(x), y, esize, true),
            SqShl => {
                post = SAT_SIGNED;
                shift_by_register(sx(x), y, esize, false)
            }
            UqShl => {
                post = SAT_UNSIGNED;
                shift_by_register(zx(x), y, esize, false)
            }
            Pmul => poly_mul(x, y) as i128,
            Addp | Smaxp | Sminp | Umaxp | Uminp => unreachable!(),
        };
        out[i] = post.apply(wide, esize);
    }
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

/// Shift by the signed low byte of the second operand; negative shifts
/// right. The wide result is left unclamped so the caller's saturation
/// post-processing sees any left-shift overflow.
fn shift_by_register(value: i128, shift_reg: u64, esize: u32, rounding: bool) -> i128 {
    let shift = shift_reg as u8 as i8 as i32;
    if shift >= 0 {
        // One past the lane width is enough to clear the lane and to
        // push any nonzero value outside the saturation range.
        let shift = shift.min(esize as i32 + 1) as u32;
        value << shift
    } else {
        let shift = (-shift).min(esize as i32 + 1) as u32;
        let rounded = if rounding {
            value + (1i128 << (shift - 1))
        } else {
            value
        };
        rounded >> shift
    }
}

/// Carry-less 8-bit multiply.
fn poly_mul(a: u64, b: u64) -> u64 {
    let (a, b) = (a & 0xFF, b & 0xFF);
    let mut result = 0u64;
    for bit in 0..8 {
        if b & (1 << bit) != 0 {
            result ^= a << bit;
        }
    }
    result & 0xFF
}

/// Carry-less widening multiply, up to 64x64 -> 128.
fn poly_mul_wide(a: u64, b: u64, esize: u32) -> u128 {
    let mask = uint_mask(esize);
    let (a, b) = ((a & mask) as u128, (b & mask) as u128);
    let mut result = 0u128;
    for bit in 0..esize {
        if b & (1 << bit) != 0 {
            result ^= a << bit;
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Bitwise three-same
// ---------------------------------------------------------------------------

pub fn exec_simd_bitwise_3same(
    state: &mut CpuState,
    q: bool,
    op: SimdBitwiseOp,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    let a = state.read_q(rn);
    let b = state.read_q(rm);
    let d = state.read_q(rd);
    let result = match op {
        SimdBitwiseOp::And => a & b,
        SimdBitwiseOp::Bic => a & !b,
        SimdBitwiseOp::Orr => a | b,
        SimdBitwiseOp::Orn => a | !b,
        SimdBitwiseOp::Eor => a ^ b,
        // Bit selects keep one input in the destination.
        SimdBitwiseOp::Bsl => (d & a) | (!d & b),
        SimdBitwiseOp::Bit => (a & b) | (d & !b),
        SimdBitwiseOp::Bif => (d & b) | (a & !b),
    };
    let masked = if q { result } else { result & u64::MAX as u128 };
    state.write_q(rd, masked, RegLog::Log);
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// FP three-same
// ---------------------------------------------------------------------------

fn lane_fp_bin(
    state: &mut CpuState,
    esize: u32,
    a: u64,
    b: u64,
    op32: impl Fn(&mut CpuState, f32, f32) -> f32,
    op64: impl Fn(&mut CpuState, f64, f64) -> f64,
) -> u64 {
    if esize == 32 {
        op32(state, f32::from_bits(a as u32), f32::from_bits(b as u32)).to_bits() as u64
    } else {
        op64(state, f64::from_bits(a), f64::from_bits(b)).to_bits()
    }
}

pub fn exec_simd_fp_3same(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SimdFpOp,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    use SimdFpOp::*;
    fp::assert_supported_fpcr(state);
    let esize = vform.lane_bits();
    debug_assert!(esize == 32 || esize == 64);
    let a = read_lanes(state, rn, vform);
    let b = read_lanes(state, rm, vform);
    let d = read_lanes(state, rd, vform);
    let count = a.len();
    let ones = uint_mask(esize);

    let pairwise = matches!(op, FAddp | FMaxp | FMinp | FMaxNmp | FMinNmp);
    let mut out = vec![0u64; count];

    if pairwise {
        let concat: Vec<u64> = a.iter().chain(b.iter()).copied().collect();
        for i in 0..count {
            let (x, y) = (concat[2 * i], concat[2 * i + 1]);
            out[i] = match op {
                FAddp => lane_fp_bin(state, esize, x, y, fp::fp_add_f32, fp::fp_add_f64),
                FMaxp => lane_fp_bin(state, esize, x, y, fp::fp_max_f32, fp::fp_max_f64),
                FMinp => lane_fp_bin(state, esize, x, y, fp::fp_min_f32, fp::fp_min_f64),
                FMaxNmp => lane_fp_bin(state, esize, x, y, fp::fp_maxnm_f32, fp::fp_maxnm_f64),
                _ => lane_fp_bin(state, esize, x, y, fp::fp_minnm_f32, fp::fp_minnm_f64),
            };
        }
        write_lanes(state, rd, vform, &out);
        return StepResult::Continue;
    }

    for i in 0..count {
        let (x, y) = (a[i], b[i]);
        out[i] = match op {
            FAdd => lane_fp_bin(state, esize, x, y, fp::fp_add_f32, fp::fp_add_f64),
            FSub => lane_fp_bin(state, esize, x, y, fp::fp_sub_f32, fp::fp_sub_f64),
            FMul => lane_fp_bin(state, esize, x, y, fp::fp_mul_f32, fp::fp_mul_f64),
            FDiv => lane_fp_bin(state, esize, x, y, fp::fp_div_f32, fp::fp_div_f64),
            FMax => lane_fp_bin(state, esize, x, y, fp::fp_max_f32, fp::fp_max_f64),
            FMin => lane_fp_bin(state, esize, x, y, fp::fp_min_f32, fp::fp_min_f64),
            FMaxNm => lane_fp_bin(state, esize, x, y, fp::fp_maxnm_f32, fp::fp_maxnm_f64),
            FMinNm => lane_fp_bin(state, esize, x, y, fp::fp_minnm_f32, fp::fp_minnm_f64),
            FMla => {
                if esize == 32 {
                    fp::fp_fma_f32(
                        state,
                        f32::from_bits(d[i] as u32),
                        f32::from_bits(x as u32),
                        f32::from_bits(y as u32),
                    )
                    .to_bits() as u64
                } else {
                    fp::fp_fma_f64(state, f64::from_bits(d[i]), f64::from_bits(x), f64::from_bits(y))
                        .to_bits()
                }
            }
            FMls => {
                if esize == 32 {
                    let n = f32::from_bits(x as u32);
                    let n = if n.is_nan() { n } else { -n };
                    fp::fp_fma_f32(state, f32::from_bits(d[i] as u32), n, f32::from_bits(y as u32))
                        .to_bits() as u64
                } else {
                    let n = f64::from_bits(x);
                    let n = if n.is_nan() { n } else { -n };
                    fp::fp_fma_f64(state, f64::from_bits(d[i]), n, f64::from_bits(y)).to_bits()
                }
            }
            FAbd => {
                let r = lane_fp_bin(state, esize, x, y, fp::fp_sub_f32, fp::fp_sub_f64);
                // Clear the sign bit unless the result is NaN.
                if esize == 32 {
                    let v = f32::from_bits(r as u32);
                    if v.is_nan() { r } else { (r & !(1 << 31)) & ones }
                } else {
                    let v = f64::from_bits(r);
                    if v.is_nan() { r } else { r & !(1 << 63) }
                }
            }
            FCmEq => fp_compare_lane(esize, x, y, |o| o == std::cmp::Ordering::Equal),
            FCmGe => fp_compare_lane(esize, x, y, |o| o != std::cmp::Ordering::Less),
            FCmGt => fp_compare_lane(esize, x, y, |o| o == std::cmp::Ordering::Greater),
            FAddp | FMaxp | FMinp | FMaxNmp | FMinNmp => unreachable!(),
        };
    }
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

fn fp_compare_lane(esize: u32, a: u64, b: u64, pass: impl Fn(std::cmp::Ordering) -> bool) -> u64 {
    let ord = if esize == 32 {
        f32::from_bits(a as u32).partial_cmp(&f32::from_bits(b as u32))
    } else {
        f64::from_bits(a).partial_cmp(&f64::from_bits(b))
    };
    match ord {
        Some(o) if pass(o) => uint_mask(esize),
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Two-register misc
// ---------------------------------------------------------------------------

pub fn exec_simd_unary(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SimdUnaryOp,
    upper: bool,
    rd: u8,
    rn: u8,
) -> StepResult {
    use SimdUnaryOp::*;
    let esize = vform.lane_bits();
    let ones = uint_mask(esize);
    let sx = |v: u64| sign_extend(v, esize) as i128;

    // Narrowing forms read wide sources and write a destination half.
    if matches!(op, Xtn | SqXtn | UqXtn | SqXtun) {
        let wide_vform = vform.widen();
        let src = read_lanes(state, rn, wide_vform);
        let wide_esize = wide_vform.lane_bits();
        let out: Vec<u64> = src
            .iter()
            .map(|&v| {
                let post = match op {
                    SqXtn => SAT_SIGNED,
                    UqXtn | SqXtun => SAT_UNSIGNED,
                    _ => PostOp::default(),
                };
                let wide = match op {
                    UqXtn => v as i128,
                    _ => sign_extend(v, wide_esize) as i128,
                };
                post.apply(wide, esize)
            })
            .collect();
        write_lanes_half(state, rd, vform, &out, upper);
        return StepResult::Continue;
    }

    // Element reversal within 16-, 32- or 64-bit containers.
    if matches!(op, Rev16 | Rev32 | Rev64) {
        let container = match op {
            Rev16 => 16,
            Rev32 => 32,
            _ => 64,
        };
        let src = read_lanes(state, rn, vform);
        let per_group = (container / esize) as usize;
        let out: Vec<u64> = (0..src.len())
            .map(|i| {
                let group = i / per_group;
                let pos = i % per_group;
                src[group * per_group + (per_group - 1 - pos)]
            })
            .collect();
        write_lanes(state, rd, vform, &out);
        return StepResult::Continue;
    }

    // Widening FP conversion reads a source half.
    if matches!(op, Fcvtl) {
        let (narrow_esize, count) = if esize == 64 { (32, 2) } else { (16, 4) };
        let base = if upper { count } else { 0 };
        let mut out = vec![0u64; count as usize];
        for i in 0..count {
            let bits = state.read_lane(rn, base + i, narrow_esize);
            out[i as usize] = if esize == 64 {
                (f32::from_bits(bits as u32) as f64).to_bits()
            } else {
                fp::f16_to_f32(bits as u16, state.fpcr.ahp()).to_bits() as u64
            };
        }
        write_lanes(state, rd, vform, &out);
        return StepResult::Continue;
    }
    if matches!(op, Fcvtn) {
        // vform names the narrow destination lanes.
        let (wide_esize, count) = if esize == 32 { (64, 2) } else { (32, 4) };
        let mut out = vec![0u64; count as usize];
        for i in 0..count {
            let bits = state.read_lane(rn, i, wide_esize);
            out[i as usize] = if esize == 32 {
                ((f64::from_bits(bits) as f32).to_bits()) as u64
            } else {
                fp::f32_to_f16(state, f32::from_bits(bits as u32)) as u64
            };
        }
        write_lanes_half(state, rd, vform, &out, upper);
        return StepResult::Continue;
    }

    let src = read_lanes(state, rn, vform);
    let out: Vec<u64> = src
        .iter()
        .map(|&v| match op {
            Abs => (sx(v).abs() as u64) & ones,
            Neg => (sx(v).wrapping_neg() as u64) & ones,
            SqAbs => SAT_SIGNED.apply(sx(v).abs(), esize),
            SqNeg => SAT_SIGNED.apply(-sx(v), esize),
            Not => !v & ones,
            Rbit => (v as u8).reverse_bits() as u64,
            Cnt => (v & ones).count_ones() as u64,
            Clz => ((v & ones) as u64).leading_zeros().saturating_sub(64 - esize) as u64,
            Cls => clz_cls_lane(v, esize),
            CmEq0 => if v & ones == 0 { ones } else { 0 },
            CmGe0 => if sx(v) >= 0 { ones } else { 0 },
            CmGt0 => if sx(v) > 0 { ones } else { 0 },
            CmLe0 => if sx(v) <= 0 { ones } else { 0 },
            CmLt0 => if sx(v) < 0 { ones } else { 0 },
            FAbs => v & !(1 << (esize - 1)),
            FNeg => v ^ (1 << (esize - 1)),
            FSqrt => {
                if esize == 32 {
                    let x = f32::from_bits(v as u32);
                    let r = if x.is_nan() || x < 0.0 {
                        if x < 0.0 || fp::is_signalling_f32(x) {
                            state.fpsr.set_ioc();
                        }
                        f32::from_bits(fp::DEFAULT_NAN_F32)
                    } else {
                        x.sqrt()
                    };
                    r.to_bits() as u64
                } else {
                    let x = f64::from_bits(v);
                    let r = if x.is_nan() || x < 0.0 {
                        if x < 0.0 || fp::is_signalling_f64(x) {
                            state.fpsr.set_ioc();
                        }
                        f64::from_bits(fp::DEFAULT_NAN_F64)
                    } else {
                        x.sqrt()
                    };
                    r.to_bits()
                }
            }
            FCmEq0 => fp_compare_lane(esize, v, zero_bits(esize), |o| o == std::cmp::Ordering::Equal),
            FCmGe0 => fp_compare_lane(esize, v, zero_bits(esize), |o| o != std::cmp::Ordering::Less),
            FCmGt0 => fp_compare_lane(esize, v, zero_bits(esize), |o| o == std::cmp::Ordering::Greater),
            FCmLe0 => fp_compare_lane(esize, v, zero_bits(esize), |o| o != std::cmp::Ordering::Greater),
            FCmLt0 => fp_compare_lane(esize, v, zero_bits(esize), |o| o == std::cmp::Ordering::Less),
            Scvtf => int_to_fp_lane(v, esize, true),
            Ucvtf => int_to_fp_lane(v, esize, false),
            FcvtzsVec => fp_to_int_lane(state, v, esize, true),
            FcvtzuVec => fp_to_int_lane(state, v, esize, false),
            FrintVec(mode) => {
                if esize == 32 {
                    let x = f32::from_bits(v as u32) as f64;
                    (fp::round_to_integral(x, mode, state.fpcr.rmode()) as f32).to_bits() as u64
                } else {
                    fp::round_to_integral(f64::from_bits(v), mode, state.fpcr.rmode()).to_bits()
                }
            }
            Xtn | SqXtn | UqXtn | SqXtun | Fcvtl | Fcvtn | Rev16 | Rev32 | Rev64 => unreachable!(),
        })
        .collect();
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

fn zero_bits(_esize: u32) -> u64 {
    0
}

fn clz_cls_lane(v: u64, esize: u32) -> u64 {
    let sign = (v >> (esize - 1)) & 1;
    let mut count = 0;
    for bit in (0..esize - 1).rev() {
        if (v >> bit) & 1 != sign {
            break;
        }
        count += 1;
    }
    count
}

fn int_to_fp_lane(v: u64, esize: u32, signed: bool) -> u64 {
    if esize == 32 {
        let x = if signed { v as u32 as i32 as f32 } else { (v as u32) as f32 };
        x.to_bits() as u64
    } else {
        let x = if signed { v as i64 as f64 } else { v as f64 };
        x.to_bits()
    }
}

fn fp_to_int_lane(state: &mut CpuState, v: u64, esize: u32, signed: bool) -> u64 {
    if esize == 32 {
        let x = f32::from_bits(v as u32) as f64;
        if signed {
            fp::f64_to_i32(state, x, crate::inst::FpRounding::Zero) as u32 as u64
        } else {
            fp::f64_to_u32(state, x, crate::inst::FpRounding::Zero) as u64
        }
    } else {
        let x = f64::from_bits(v);
        if signed {
            fp::f64_to_i64(state, x, crate::inst::FpRounding::Zero) as u64
        } else {
            fp::f64_to_u64(state, x, crate::inst::FpRounding::Zero)
        }
    }
}

// ---------------------------------------------------------------------------
// Across-lanes reductions
// ---------------------------------------------------------------------------

pub fn exec_simd_across(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SimdReduceOp,
    rd: u8,
    rn: u8,
) -> StepResult {
    use SimdReduceOp::*;
    let esize = vform.lane_bits();
    let lanes = read_lanes(state, rn, vform);
    let sx = |v: u64| sign_extend(v, esize);

    match op {
        AddV => {
            let sum: u64 = lanes.iter().fold(0u64, |acc, &v| acc.wrapping_add(v));
            state.write_scalar(rd, esize, sum & uint_mask(esize), RegLog::Log);
        }
        SMaxV => {
            let m = lanes.iter().map(|&v| sx(v)).max().unwrap();
            state.write_scalar(rd, esize, m as u64 & uint_mask(esize), RegLog::Log);
        }
        SMinV => {
            let m = lanes.iter().map(|&v| sx(v)).min().unwrap();
            state.write_scalar(rd, esize, m as u64 & uint_mask(esize), RegLog::Log);
        }
        UMaxV => {
            let m = *lanes.iter().max().unwrap();
            state.write_scalar(rd, esize, m, RegLog::Log);
        }
        UMinV => {
            let m = *lanes.iter().min().unwrap();
            state.write_scalar(rd, esize, m, RegLog::Log);
        }
        SAddLV => {
            let sum: i64 = lanes.iter().map(|&v| sx(v)).sum();
            state.write_scalar(rd, esize * 2, sum as u64 & uint_mask(esize * 2), RegLog::Log);
        }
        UAddLV => {
            let sum: u64 = lanes.iter().sum();
            state.write_scalar(rd, esize * 2, sum & uint_mask(esize * 2), RegLog::Log);
        }
        FAddV | FMaxV | FMinV | FMaxNmV | FMinNmV => {
            let mut acc = lanes[0];
            for &l in &lanes[1..] {
                acc = match op {
                    FAddV => lane_fp_bin(state, esize, acc, l, fp::fp_add_f32, fp::fp_add_f64),
                    FMaxV => lane_fp_bin(state, esize, acc, l, fp::fp_max_f32, fp::fp_max_f64),
                    FMinV => lane_fp_bin(state, esize, acc, l, fp::fp_min_f32, fp::fp_min_f64),
                    FMaxNmV => {
                        lane_fp_bin(state, esize, acc, l, fp::fp_maxnm_f32, fp::fp_maxnm_f64)
                    }
                    _ => lane_fp_bin(state, esize, acc, l, fp::fp_minnm_f32, fp::fp_minnm_f64),
                };
            }
            state.write_scalar(rd, esize, acc, RegLog::Log);
        }
    }
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// Three-different (widening / narrowing)
// ---------------------------------------------------------------------------

pub fn exec_simd_3diff(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SimdWideOp,
    upper: bool,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    use SimdWideOp::*;
    // `vform` names the narrow lanes; the destination (or wide source)
    // uses the widened format with the same lane count.
    let narrow = vform;
    let wide = vform.widen();
    let esize = narrow.lane_bits();
    let wide_esize = wide.lane_bits();
    let count = narrow.lane_count(0);
    let base = if upper { count } else { 0 };

    let signed = matches!(op, Saddl | Ssubl | Saddw | Ssubw | Smull | Smlal | Smlsl | Sabdl);
    let extend = |v: u64| -> i128 {
        if signed { sign_extend(v, esize) as i128 } else { v as i128 }
    };

    let narrowing = matches!(op, Addhn | Raddhn | Subhn | Rsubhn);
    if narrowing {
        // Wide sources, narrow result into one destination half.
        let a = read_lanes(state, rn, wide);
        let b = read_lanes(state, rm, wide);
        let round = matches!(op, Raddhn | Rsubhn);
        let out: Vec<u64> = (0..count as usize)
            .map(|i| {
                let mut wide_val = if matches!(op, Addhn | Raddhn) {
                    (a[i] as i128) + (b[i] as i128)
                } else {
                    (a[i] as i128) - (b[i] as i128)
                };
                if round {
                    wide_val += 1i128 << (esize - 1);
                }
                ((wide_val >> esize) as u64) & uint_mask(esize)
            })
            .collect();
        write_lanes_half(state, rd, narrow, &out, upper);
        return StepResult::Continue;
    }

    let wide_ops_first = matches!(op, Saddw | Uaddw | Ssubw | Usubw);
    let d = read_lanes(state, rd, wide);
    let mut out = vec![0u64; count as usize];
    for i in 0..count {
        let n = if wide_ops_first {
            state.read_lane(rn, i, wide_esize) as i128
        } else {
            extend(state.read_lane(rn, base + i, esize))
        };
        let m = extend(state.read_lane(rm, base + i, esize));
        let n_signed = if wide_ops_first && signed {
            sign_extend(n as u64, wide_esize) as i128
        } else {
            n
        };
        let result: i128 = match op {
            Saddl | Uaddl => n + m,
            Ssubl | Usubl => n - m,
            Saddw | Uaddw => n_signed + m,
            Ssubw | Usubw => n_signed - m,
            Smull | Umull => n * m,
            Smlal | Umlal => sign_extend(d[i as usize], wide_esize) as i128 + n * m,
            Smlsl | Umlsl => sign_extend(d[i as usize], wide_esize) as i128 - n * m,
            Sabdl | Uabdl => (n - m).abs(),
            Pmull => poly_mul_wide(n as u64, m as u64, esize) as i128,
            Addhn | Raddhn | Subhn | Rsubhn => unreachable!(),
        };
        out[i as usize] = (result as u64) & uint_mask(wide_esize);
    }
    write_lanes(state, rd, wide, &out);
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// Shift by immediate
// ---------------------------------------------------------------------------

pub fn exec_simd_shift_imm(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SimdShiftImmOp,
    shift: u8,
    upper: bool,
    rd: u8,
    rn: u8,
) -> StepResult {
    use SimdShiftImmOp::*;
    let esize = vform.lane_bits();
    let shift = shift as u32;
    let ones = uint_mask(esize);
    let sx = |v: u64| sign_extend(v, esize) as i128;
    let zx = |v: u64| v as i128;

    // Narrowing shifts: wide source, narrow destination half.
    if matches!(op, Shrn | Rshrn | Sqshrn | Uqshrn | Sqrshrn | Uqrshrn | Sqshrun | Sqrshrun) {
        let wide_vform = vform.widen();
        let wide_esize = wide_vform.lane_bits();
        let src = read_lanes(state, rn, wide_vform);
        let round = matches!(op, Rshrn | Sqrshrn | Uqrshrn | Sqrshrun);
        let out: Vec<u64> = src
            .iter()
            .map(|&v| {
                let signed_src = matches!(op, Sqshrn | Sqrshrn | Sqshrun | Sqrshrun);
                let mut wide = if signed_src {
                    sign_extend(v, wide_esize) as i128
                } else {
                    v as i128
                };
                if round {
                    wide += 1i128 << (shift - 1);
                }
                wide >>= shift;
                let post = match op {
                    Sqshrn | Sqrshrn => SAT_SIGNED,
                    Uqshrn | Uqrshrn | Sqshrun | Sqrshrun => SAT_UNSIGNED,
                    _ => PostOp::default(),
                };
                post.apply(wide, esize)
            })
            .collect();
        write_lanes_half(state, rd, vform, &out, upper);
        return StepResult::Continue;
    }

    // Widening shifts: narrow source half, wide destination.
    if matches!(op, Sshll | Ushll) {
        let wide_vform = vform.widen();
        let count = vform.lane_count(0);
        let base = if upper { count } else { 0 };
        let out: Vec<u64> = (0..count)
            .map(|i| {
                let v = state.read_lane(rn, base + i, esize);
                let wide = if matches!(op, Sshll) { sx(v) } else { zx(v) };
                ((wide << shift) as u64) & uint_mask(wide_vform.lane_bits())
            })
            .collect();
        write_lanes(state, rd, wide_vform, &out);
        return StepResult::Continue;
    }

    let src = read_lanes(state, rn, vform);
    let dst = read_lanes(state, rd, vform);
    let out: Vec<u64> = src
        .iter()
        .enumerate()
        .map(|(i, &v)| match op {
            Shl => (v << shift) & ones,
            Sshr => (sx(v) >> shift.min(esize - 1)) as u64 & ones,
            Ushr => if shift >= esize { 0 } else { (v & ones) >> shift },
            Ssra => {
                let shifted = sx(v) >> shift.min(esize - 1);
                (dst[i] as i128 + shifted) as u64 & ones
            }
            Usra => {
                let shifted = if shift >= esize { 0 } else { (v & ones) >> shift };
                dst[i].wrapping_add(shifted) & ones
            }
            Srshr => (((sx(v) + (1i128 << (shift - 1))) >> shift) as u64) & ones,
            Urshr => (((zx(v) + (1i128 << (shift - 1))) >> shift) as u64) & ones,
            Srsra => {
                let shifted = (sx(v) + (1i128 << (shift - 1))) >> shift;
                (dst[i] as i128 + shifted) as u64 & ones
            }
            Ursra => {
                let shifted = (zx(v) + (1i128 << (shift - 1))) >> shift;
                (dst[i] as i128 + shifted) as u64 & ones
            }
            Sqshl => SAT_SIGNED.apply(sx(v) << shift, esize),
            Uqshl => SAT_UNSIGNED.apply(zx(v) << shift, esize),
            Sqshlu => SAT_UNSIGNED.apply(sx(v) << shift, esize),
            Sli => {
                let mask = ones << shift & ones;
                (dst[i] & !mask) | ((v << shift) & mask)
            }
            Sri => {
                let mask = if shift >= esize { 0 } else { ones >> shift };
                (dst[i] & !mask) | (((v & ones) >> shift.min(esize - 1)) & mask)
            }
            ScvtfFixed => fixed_to_fp_lane(state, v, esize, shift, true),
            UcvtfFixed => fixed_to_fp_lane(state, v, esize, shift, false),
            FcvtzsFixed => fp_to_fixed_lane(state, v, esize, shift, true),
            FcvtzuFixed => fp_to_fixed_lane(state, v, esize, shift, false),
            _ => unreachable!(),
        })
        .collect();
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

fn fixed_to_fp_lane(state: &mut CpuState, v: u64, esize: u32, fbits: u32, signed: bool) -> u64 {
    let _ = state;
    let scale = f64::from_bits(((1023 - fbits as i64) as u64) << 52);
    if esize == 32 {
        let x = if signed { v as u32 as i32 as f64 } else { (v as u32) as f64 };
        ((x * scale) as f32).to_bits() as u64
    } else {
        let x = if signed { v as i64 as f64 } else { v as f64 };
        (x * scale).to_bits()
    }
}

fn fp_to_fixed_lane(state: &mut CpuState, v: u64, esize: u32, fbits: u32, signed: bool) -> u64 {
    let scale = f64::from_bits(((1023 + fbits as i64) as u64) << 52);
    if esize == 32 {
        let x = f32::from_bits(v as u32) as f64 * scale;
        if signed {
            fp::f64_to_i32(state, x, crate::inst::FpRounding::Zero) as u32 as u64
        } else {
            fp::f64_to_u32(state, x, crate::inst::FpRounding::Zero) as u64
        }
    } else {
        let x = f64::from_bits(v) * scale;
        if signed {
            fp::f64_to_i64(state, x, crate::inst::FpRounding::Zero) as u64
        } else {
            fp::f64_to_u64(state, x, crate::inst::FpRounding::Zero)
        }
    }
}

// ---------------------------------------------------------------------------
// Copy, modified immediate, permute, extract, table
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub fn exec_simd_copy(
    state: &mut CpuState,
    op: u8,
    q: bool,
    esize: u8,
    dst_lane: u8,
    src_lane: u8,
    rd: u8,
    rn: u8,
) -> StepResult {
    let esize = esize as u32;
    match op {
        // DUP element: broadcast one source lane.
        0 => {
            let v = state.read_lane(rn, src_lane as u32, esize);
            let vform = VectorFormat::neon(esize, q);
            let out = vec![v; vform.lane_count(0) as usize];
            write_lanes(state, rd, vform, &out);
        }
        // DUP general: broadcast an X/W value.
        1 => {
            let v = state.read_x(rn, Reg31Mode::ZeroRegister) & uint_mask(esize);
            let vform = VectorFormat::neon(esize, q);
            let out = vec![v; vform.lane_count(0) as usize];
            write_lanes(state, rd, vform, &out);
        }
        // INS element: one lane from another, rest intact.
        2 => {
            let v = state.read_lane(rn, src_lane as u32, esize);
            let reg = state.vreg_mut(rd, RegLog::Log);
            reg.set_lane(dst_lane as u32, esize, v);
        }
        // INS general.
        3 => {
            let v = state.read_x(rn, Reg31Mode::ZeroRegister);
            let reg = state.vreg_mut(rd, RegLog::Log);
            reg.set_lane(dst_lane as u32, esize, v & uint_mask(esize));
        }
        // UMOV: lane to general, zero-extended.
        4 => {
            let v = state.read_lane(rn, src_lane as u32, esize);
            state.write_sized(q, rd, v, Reg31Mode::ZeroRegister, RegLog::Log);
        }
        // SMOV: lane to general, sign-extended.
        _ => {
            let v = sign_extend(state.read_lane(rn, src_lane as u32, esize), esize) as u64;
            state.write_sized(q, rd, v, Reg31Mode::ZeroRegister, RegLog::Log);
        }
    }
    StepResult::Continue
}

pub fn exec_simd_mod_imm(
    state: &mut CpuState,
    q: bool,
    op: u8,
    vform: VectorFormat,
    imm: u64,
    rd: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let count = vform.lane_count(0) as usize;
    let imm = imm & uint_mask(esize);
    let out: Vec<u64> = match op {
        // MOVI / FMOV immediate.
        0 | 4 => vec![imm; count],
        // MVNI.
        1 => vec![!imm & uint_mask(esize); count],
        // ORR immediate merges with the destination.
        2 => read_lanes(state, rd, vform).iter().map(|&d| d | imm).collect(),
        // BIC immediate.
        _ => read_lanes(state, rd, vform).iter().map(|&d| d & !imm).collect(),
    };
    let _ = q;
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

pub fn exec_simd_permute(
    state: &mut CpuState,
    vform: VectorFormat,
    op: SimdPermuteOp,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    let a = read_lanes(state, rn, vform);
    let b = read_lanes(state, rm, vform);
    let count = a.len();
    let half = count / 2;
    let mut out = vec![0u64; count];
    match op {
        SimdPermuteOp::Zip1 => {
            for i in 0..half {
                out[2 * i] = a[i];
                out[2 * i + 1] = b[i];
            }
        }
        SimdPermuteOp::Zip2 => {
            for i in 0..half {
                out[2 * i] = a[half + i];
                out[2 * i + 1] = b[half + i];
            }
        }
        SimdPermuteOp::Uzp1 => {
            for i in 0..count {
                out[i] = if i < half { a[2 * i] } else { b[2 * (i - half)] };
            }
        }
        SimdPermuteOp::Uzp2 => {
            for i in 0..count {
                out[i] = if i < half { a[2 * i + 1] } else { b[2 * (i - half) + 1] };
            }
        }
        SimdPermuteOp::Trn1 => {
            for i in 0..half {
                out[2 * i] = a[2 * i];
                out[2 * i + 1] = b[2 * i];
            }
        }
        SimdPermuteOp::Trn2 => {
            for i in 0..half {
                out[2 * i] = a[2 * i + 1];
                out[2 * i + 1] = b[2 * i + 1];
            }
        }
    }
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

pub fn exec_simd_ext(
    state: &mut CpuState,
    q: bool,
    index: u8,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    let vform = VectorFormat::neon(8, q);
    let a = read_lanes(state, rn, vform);
    let b = read_lanes(state, rm, vform);
    let count = a.len();
    let concat: Vec<u64> = a.into_iter().chain(b).collect();
    let out: Vec<u64> = (0..count).map(|i| concat[index as usize + i]).collect();
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

#[allow(clippy::too_many_arguments)]
pub fn exec_simd_tbl(
    state: &mut CpuState,
    q: bool,
    len: u8,
    extension: bool,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    let vform = VectorFormat::neon(8, q);
    let indices = read_lanes(state, rm, vform);
    let dst = read_lanes(state, rd, vform);
    let table_bytes = len as u32 * 16;

    let out: Vec<u64> = indices
        .iter()
        .enumerate()
        .map(|(i, &index)| {
            if (index as u32) < table_bytes {
                // Table registers are consecutive modulo 32.
                let reg = (rn as u32 + index as u32 / 16) % 32;
                state.read_lane(reg as u8, index as u32 % 16, 8)
            } else if extension {
                // TBX leaves the destination byte.
                dst[i]
            } else {
                0
            }
        })
        .collect();
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}

#[allow(clippy::too_many_arguments)]
pub fn exec_simd_mul_element(
    state: &mut CpuState,
    vform: VectorFormat,
    op: u8,
    rd: u8,
    rn: u8,
    rm: u8,
    lane: u8,
) -> StepResult {
    let esize = vform.lane_bits();
    let element = state.read_lane(rm, lane as u32, esize);
    let a = read_lanes(state, rn, vform);
    let d = read_lanes(state, rd, vform);
    let ones = uint_mask(esize);

    let out: Vec<u64> = a
        .iter()
        .enumerate()
        .map(|(i, &x)| match op {
            0 => x.wrapping_mul(element) & ones,
            1 => d[i].wrapping_add(x.wrapping_mul(element)) & ones,
            2 => d[i].wrapping_sub(x.wrapping_mul(element)) & ones,
            3 => lane_fp_bin(state, esize, x, element, fp::fp_mul_f32, fp::fp_mul_f64),
            4 | 5 => {
                let (n, m) = (x, element);
                if esize == 32 {
                    let mut nf = f32::from_bits(n as u32);
                    if op == 5 && !nf.is_nan() {
                        nf = -nf;
                    }
                    fp::fp_fma_f32(state, f32::from_bits(d[i] as u32), nf, f32::from_bits(m as u32))
                        .to_bits() as u64
                } else {
                    let mut nf = f64::from_bits(n);
                    if op == 5 && !nf.is_nan() {
                        nf = -nf;
                    }
                    fp::fp_fma_f64(state, f64::from_bits(d[i]), nf, f64::from_bits(m)).to_bits()
                }
            }
            _ => x,
        })
        .collect();
    write_lanes(state, rd, vform, &out);
    StepResult::Continue
}
