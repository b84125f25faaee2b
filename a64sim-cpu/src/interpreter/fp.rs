// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Scalar floating-point: FPCR-honoring arithmetic, NaN propagation,
//! half-precision conversion, rounding-mode integer conversion, and the
//! execution functions for the scalar FP instruction groups.
//!
//! Arithmetic runs on host IEEE-754 operations, which matches the
//! architecture while FPCR.RMode is round-to-nearest-even; conversions
//! take their rounding mode explicitly. Half-precision arithmetic routes
//! through single precision, which rounds identically for the binary
//! operations.

use crate::inst::{Condition, FpBinOp, FpRounding, FpType};
use crate::state::{CpuState, RMode, Reg31Mode, RegLog};

use super::StepResult;

pub const DEFAULT_NAN_F64: u64 = 0x7FF8_0000_0000_0000;
pub const DEFAULT_NAN_F32: u32 = 0x7FC0_0000;
pub const DEFAULT_NAN_F16: u16 = 0x7E00;

/// All FP instructions require a supported FPCR: round-to-nearest for
/// arithmetic, no trapping. Directed modes are honored by the explicit
/// conversion paths.
pub fn assert_supported_fpcr(state: &CpuState) {
    if state.fpcr.rmode() != RMode::TieEven {
        log::warn!("FPCR.RMode is not round-to-nearest; arithmetic results follow the host");
    }
}

// ---------------------------------------------------------------------------
// NaN classification and propagation
// ---------------------------------------------------------------------------

pub fn is_signalling_f64(v: f64) -> bool {
    let bits = v.to_bits();
    v.is_nan() && bits & (1 << 51) == 0
}

pub fn is_signalling_f32(v: f32) -> bool {
    let bits = v.to_bits();
    v.is_nan() && bits & (1 << 22) == 0
}

pub fn is_signalling_f16(bits: u16) -> bool {
    (bits & 0x7C00) == 0x7C00 && (bits & 0x03FF) != 0 && (bits & 0x0200) == 0
}

macro_rules! fp_impl {
    ($ty:ty, $bits:ty, $quiet_bit:expr, $default_nan:expr, $is_signalling:ident,
     $process_nans:ident, $process_nans3:ident, $quiet:ident, $flush:ident,
     $add:ident, $sub:ident, $mul:ident, $div:ident,
     $max:ident, $min:ident, $maxnm:ident, $minnm:ident, $fma:ident) => {
        fn $quiet(v: $ty) -> $ty {
            <$ty>::from_bits(v.to_bits() | $quiet_bit)
        }

        /// Flush denormal inputs and outputs to signed zero under FPCR.FZ.
        pub fn $flush(state: &CpuState, v: $ty) -> $ty {
            if state.fpcr.fz() && v.is_subnormal() {
                if v.is_sign_negative() { -0.0 } else { 0.0 }
            } else {
                v
            }
        }

        /// AArch64 NaN propagation for two operands: a signalling NaN wins
        /// over a quiet one, the first operand wins within a class, and
        /// FPCR.DN replaces the outcome with the default NaN.
        pub fn $process_nans(state: &mut CpuState, a: $ty, b: $ty) -> Option<$ty> {
            let result = if $is_signalling(a) {
                Some($quiet(a))
            } else if $is_signalling(b) {
                Some($quiet(b))
            } else if a.is_nan() {
                Some(a)
            } else if b.is_nan() {
                Some(b)
            } else {
                None
            };
            if $is_signalling(a) || $is_signalling(b) {
                state.fpsr.set_ioc();
            }
            result.map(|n| if state.fpcr.dn() { <$ty>::from_bits($default_nan) } else { n })
        }

        /// Three-operand propagation; the first operand has priority.
        pub fn $process_nans3(state: &mut CpuState, a: $ty, b: $ty, c: $ty) -> Option<$ty> {
            let result = if $is_signalling(a) {
                Some($quiet(a))
            } else if $is_signalling(b) {
                Some($quiet(b))
            } else if $is_signalling(c) {
                Some($quiet(c))
            } else if a.is_nan() {
                Some(a)
            } else if b.is_nan() {
                Some(b)
            } else if c.is_nan() {
                Some(c)
            } else {
                None
            };
            if $is_signalling(a) || $is_signalling(b) || $is_signalling(c) {
                state.fpsr.set_ioc();
            }
            result.map(|n| if state.fpcr.dn() { <$ty>::from_bits($default_nan) } else { n })
        }

        pub fn $add(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            let (a, b) = ($flush(state, a), $flush(state, b));
            if let Some(n) = $process_nans(state, a, b) {
                return n;
            }
            if a.is_infinite() && b.is_infinite() && a.is_sign_positive() != b.is_sign_positive() {
                state.fpsr.set_ioc();
                return <$ty>::from_bits($default_nan);
            }
            $flush(state, a + b)
        }

        pub fn $sub(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            let (a, b) = ($flush(state, a), $flush(state, b));
            if let Some(n) = $process_nans(state, a, b) {
                return n;
            }
            if a.is_infinite() && b.is_infinite() && a.is_sign_positive() == b.is_sign_positive() {
                state.fpsr.set_ioc();
                return <$ty>::from_bits($default_nan);
            }
            $flush(state, a - b)
        }

        pub fn $mul(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            let (a, b) = ($flush(state, a), $flush(state, b));
            if let Some(n) = $process_nans(state, a, b) {
                return n;
            }
            if (a.is_infinite() && b == 0.0) || (a == 0.0 && b.is_infinite()) {
                state.fpsr.set_ioc();
                return <$ty>::from_bits($default_nan);
            }
            $flush(state, a * b)
        }

        pub fn $div(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            let (a, b) = ($flush(state, a), $flush(state, b));
            if let Some(n) = $process_nans(state, a, b) {
                return n;
            }
            if (a == 0.0 && b == 0.0) || (a.is_infinite() && b.is_infinite()) {
                state.fpsr.set_ioc();
                return <$ty>::from_bits($default_nan);
            }
            $flush(state, a / b)
        }

        pub fn $max(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            let (a, b) = ($flush(state, a), $flush(state, b));
            if let Some(n) = $process_nans(state, a, b) {
                return n;
            }
            // max(+0, -0) is +0.
            if a == 0.0 && b == 0.0 {
                return if a.is_sign_positive() || b.is_sign_positive() { 0.0 } else { -0.0 };
            }
            if a > b { a } else { b }
        }

        pub fn $min(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            let (a, b) = ($flush(state, a), $flush(state, b));
            if let Some(n) = $process_nans(state, a, b) {
                return n;
            }
            if a == 0.0 && b == 0.0 {
                return if a.is_sign_negative() || b.is_sign_negative() { -0.0 } else { 0.0 };
            }
            if a < b { a } else { b }
        }

        /// maxNM: a quiet NaN on one side yields the other operand.
        pub fn $maxnm(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            if a.is_nan() && !b.is_nan() && !$is_signalling(a) {
                return $flush(state, b);
            }
            if b.is_nan() && !a.is_nan() && !$is_signalling(b) {
                return $flush(state, a);
            }
            $max(state, a, b)
        }

        pub fn $minnm(state: &mut CpuState, a: $ty, b: $ty) -> $ty {
            if a.is_nan() && !b.is_nan() && !$is_signalling(a) {
                return $flush(state, b);
            }
            if b.is_nan() && !a.is_nan() && !$is_signalling(b) {
                return $flush(state, a);
            }
            $min(state, a, b)
        }

        /// Fused multiply-add `addend + op1 * op2`; the addend has NaN
        /// priority, and an invalid product poisons a quiet-NaN addend.
        pub fn $fma(state: &mut CpuState, addend: $ty, op1: $ty, op2: $ty) -> $ty {
            let (addend, op1, op2) = ($flush(state, addend), $flush(state, op1), $flush(state, op2));
            let product_invalid = (op1.is_infinite() && op2 == 0.0) || (op1 == 0.0 && op2.is_infinite());
            if addend.is_nan() && !$is_signalling(addend) && product_invalid {
                state.fpsr.set_ioc();
                return <$ty>::from_bits($default_nan);
            }
            if let Some(n) = $process_nans3(state, addend, op1, op2) {
                return n;
            }
            if product_invalid {
                state.fpsr.set_ioc();
                return <$ty>::from_bits($default_nan);
            }
            // Opposite-signed infinities between product and addend. Only
            // an infinite operand makes the product architecturally
            // infinite; host overflow does not count.
            let product_inf = op1.is_infinite() || op2.is_infinite();
            let product_negative = op1.is_sign_negative() != op2.is_sign_negative();
            if addend.is_infinite() && product_inf
                && addend.is_sign_negative() != product_negative
            {
                state.fpsr.set_ioc();
                return <$ty>::from_bits($default_nan);
            }
            $flush(state, op1.mul_add(op2, addend))
        }
    };
}

fp_impl!(
    f64, u64, 1u64 << 51, DEFAULT_NAN_F64, is_signalling_f64,
    process_nans_f64, process_nans3_f64, quiet_f64, flush_f64,
    fp_add_f64, fp_sub_f64, fp_mul_f64, fp_div_f64,
    fp_max_f64, fp_min_f64, fp_maxnm_f64, fp_minnm_f64, fp_fma_f64
);

fp_impl!(
    f32, u32, 1u32 << 22, DEFAULT_NAN_F32, is_signalling_f32,
    process_nans_f32, process_nans3_f32, quiet_f32, flush_f32,
    fp_add_f32, fp_sub_f32, fp_mul_f32, fp_div_f32,
    fp_max_f32, fp_min_f32, fp_maxnm_f32, fp_minnm_f32, fp_fma_f32
);

// ---------------------------------------------------------------------------
// Half-precision conversion
// ---------------------------------------------------------------------------

/// Widen an IEEE half to single. With FPCR.AHP set, the maximum exponent
/// encodes normal values instead of infinities and NaNs.
pub fn f16_to_f32(bits: u16, ahp: bool) -> f32 {
    let sign = ((bits as u32) << 16) & 0x8000_0000;
    let exp = ((bits >> 10) & 0x1F) as u32;
    let frac = (bits & 0x3FF) as u32;

    if exp == 0 {
        if frac == 0 {
            return f32::from_bits(sign);
        }
        // Subnormal half: renormalize.
        let shift = frac.leading_zeros() - 21;
        let frac = (frac << shift) & 0x3FF;
        let exp = 127 - 15 + 1 - shift;
        return f32::from_bits(sign | (exp << 23) | (frac << 13));
    }
    if exp == 0x1F && !ahp {
        // Infinity or NaN.
        return f32::from_bits(sign | 0x7F80_0000 | (frac << 13));
    }
    f32::from_bits(sign | ((exp + 127 - 15) << 23) | (frac << 13))
}

pub fn f16_to_f64(bits: u16, ahp: bool) -> f64 {
    f16_to_f32(bits, ahp) as f64
}

/// Narrow a single to half with round-to-nearest-even. With AHP set
/// there are no half infinities: overflow and NaN saturate to the
/// maximum magnitude and set the invalid-operation flag.
pub fn f32_to_f16(state: &mut CpuState, v: f32) -> u16 {
    let ahp = state.fpcr.ahp();
    let bits = v.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let mag = bits & 0x7FFF_FFFF;

    if mag > 0x7F80_0000 {
        // NaN input.
        if is_signalling_f32(v) {
            state.fpsr.set_ioc();
        }
        if ahp {
            state.fpsr.set_ioc();
            return sign | 0x7FFF;
        }
        if state.fpcr.dn() {
            return DEFAULT_NAN_F16;
        }
        let payload = ((mag >> 13) & 0x3FF) as u16;
        return sign | 0x7C00 | 0x0200 | payload;
    }
    if mag == 0x7F80_0000 {
        if ahp {
            state.fpsr.set_ioc();
            return sign | 0x7FFF;
        }
        return sign | 0x7C00;
    }

    let exp = (mag >> 23) as i32 - 127 + 15;
    let frac = mag & 0x7F_FFFF;
    if exp >= 0x1F {
        // Overflow.
        if ahp {
            state.fpsr.set_ioc();
            return sign | 0x7FFF;
        }
        return sign | 0x7C00;
    }
    if exp <= 0 {
        // Result is subnormal in half precision.
        if exp < -10 {
            return sign;
        }
        let frac = frac | 0x80_0000;
        let shift = (14 - exp) as u32;
        let mut half = (frac >> shift) as u16;
        let round_mask = (1u32 << shift) - 1;
        let round = frac & round_mask;
        let halfway = 1u32 << (shift - 1);
        if round > halfway || (round == halfway && half & 1 == 1) {
            half += 1;
        }
        return sign | half;
    }

    let mut half = sign | ((exp as u16) << 10) | ((frac >> 13) as u16);
    let round = frac & 0x1FFF;
    if round > 0x1000 || (round == 0x1000 && half & 1 == 1) {
        // Carry may ripple into the exponent; that is the correct
        // round-up-to-infinity behavior.
        half = half.wrapping_add(1);
        if ahp && half & 0x7C00 == 0x7C00 && half & 0x3FF == 0 {
            state.fpsr.set_ioc();
            return sign | 0x7FFF;
        }
    }
    half
}

pub fn f64_to_f16(state: &mut CpuState, v: f64) -> u16 {
    f32_to_f16(state, v as f32)
}

// ---------------------------------------------------------------------------
// Rounding and integer conversion
// ---------------------------------------------------------------------------

/// Round to an integer-valued f64 in the given mode.
pub fn round_to_integral(value: f64, rounding: FpRounding, fpcr_mode: RMode) -> f64 {
    if value.is_nan() || value.is_infinite() || value == 0.0 {
        return value;
    }
    let rounding = resolve_rounding(rounding, fpcr_mode);
    let result = match rounding {
        FpRounding::TieEven => {
            let floor = value.floor();
            let diff = value - floor;
            if diff > 0.5 {
                floor + 1.0
            } else if diff < 0.5 {
                floor
            } else if (floor * 0.5).fract() == 0.0 {
                // floor is even.
                floor
            } else {
                floor + 1.0
            }
        }
        FpRounding::TieAway => {
            let floor = value.floor();
            let diff = value - floor;
            if diff >= 0.5 { floor + 1.0 } else { floor }
        }
        FpRounding::PlusInfinity => value.ceil(),
        FpRounding::MinusInfinity => value.floor(),
        _ => value.trunc(),
    };
    // Rounding to zero magnitude keeps the sign.
    if result == 0.0 && value.is_sign_negative() { -0.0 } else { result }
}

fn resolve_rounding(rounding: FpRounding, fpcr_mode: RMode) -> FpRounding {
    match rounding {
        FpRounding::Current => match fpcr_mode {
            RMode::TieEven => FpRounding::TieEven,
            RMode::PlusInfinity => FpRounding::PlusInfinity,
            RMode::MinusInfinity => FpRounding::MinusInfinity,
            RMode::Zero => FpRounding::Zero,
        },
        other => other,
    }
}

/// FP to signed 64-bit with saturation at the type bounds.
pub fn f64_to_i64(state: &mut CpuState, value: f64, rounding: FpRounding) -> i64 {
    if value.is_nan() {
        state.fpsr.set_ioc();
        return 0;
    }
    let rounded = round_to_integral(value, rounding, state.fpcr.rmode());
    if rounded >= 9_223_372_036_854_775_808.0 {
        state.fpsr.set_ioc();
        i64::MAX
    } else if rounded < -9_223_372_036_854_775_808.0 {
        state.fpsr.set_ioc();
        i64::MIN
    } else {
        rounded as i64
    }
}

pub fn f64_to_u64(state: &mut CpuState, value: f64, rounding: FpRounding) -> u64 {
    if value.is_nan() {
        state.fpsr.set_ioc();
        return 0;
    }
    let rounded = round_to_integral(value, rounding, state.fpcr.rmode());
    if rounded >= 18_446_744_073_709_551_616.0 {
        state.fpsr.set_ioc();
        u64::MAX
    } else if rounded < 0.0 {
        state.fpsr.set_ioc();
        0
    } else {
        rounded as u64
    }
}

pub fn f64_to_i32(state: &mut CpuState, value: f64, rounding: FpRounding) -> i32 {
    if value.is_nan() {
        state.fpsr.set_ioc();
        return 0;
    }
    let rounded = round_to_integral(value, rounding, state.fpcr.rmode());
    if rounded > i32::MAX as f64 {
        state.fpsr.set_ioc();
        i32::MAX
    } else if rounded < i32::MIN as f64 {
        state.fpsr.set_ioc();
        i32::MIN
    } else {
        rounded as i32
    }
}

pub fn f64_to_u32(state: &mut CpuState, value: f64, rounding: FpRounding) -> u32 {
    if value.is_nan() {
        state.fpsr.set_ioc();
        return 0;
    }
    let rounded = round_to_integral(value, rounding, state.fpcr.rmode());
    if rounded > u32::MAX as f64 {
        state.fpsr.set_ioc();
        u32::MAX
    } else if rounded < 0.0 {
        state.fpsr.set_ioc();
        0
    } else {
        rounded as u32
    }
}

// ---------------------------------------------------------------------------
// Register access helpers
// ---------------------------------------------------------------------------

/// Read a scalar FP operand widened to f64. Half reads honor AHP.
pub fn read_fp(state: &CpuState, code: u8, fp_type: FpType) -> f64 {
    match fp_type {
        FpType::Half => f16_to_f64(state.read_lane(code, 0, 16) as u16, state.fpcr.ahp()),
        FpType::Single => f32::from_bits(state.read_lane(code, 0, 32) as u32) as f64,
        FpType::Double => f64::from_bits(state.read_lane(code, 0, 64)),
    }
}

pub fn read_f32(state: &CpuState, code: u8) -> f32 {
    f32::from_bits(state.read_lane(code, 0, 32) as u32)
}

pub fn read_f64(state: &CpuState, code: u8) -> f64 {
    f64::from_bits(state.read_lane(code, 0, 64))
}

pub fn write_f32(state: &mut CpuState, code: u8, value: f32) {
    state.write_scalar(code, 32, value.to_bits() as u64, RegLog::Log);
}

pub fn write_f64(state: &mut CpuState, code: u8, value: f64) {
    state.write_scalar(code, 64, value.to_bits(), RegLog::Log);
}

pub fn write_f16_bits(state: &mut CpuState, code: u8, bits: u16) {
    state.write_scalar(code, 16, bits as u64, RegLog::Log);
}

// ---------------------------------------------------------------------------
// Execution functions
// ---------------------------------------------------------------------------

pub fn exec_fp_immediate(state: &mut CpuState, fp_type: FpType, rd: u8, imm: f64) -> StepResult {
    assert_supported_fpcr(state);
    match fp_type {
        FpType::Half => {
            let bits = f64_to_f16(state, imm);
            write_f16_bits(state, rd, bits);
        }
        FpType::Single => write_f32(state, rd, imm as f32),
        FpType::Double => write_f64(state, rd, imm),
    }
    StepResult::Continue
}

pub fn exec_fp_mov_reg(state: &mut CpuState, fp_type: FpType, rd: u8, rn: u8) -> StepResult {
    let bits = state.read_lane(rn, 0, fp_type.size_bits());
    state.write_scalar(rd, fp_type.size_bits(), bits, RegLog::Log);
    StepResult::Continue
}

pub fn exec_fp_mov_gp(
    state: &mut CpuState,
    fp_type: FpType,
    to_fp: bool,
    sf: bool,
    top_half: bool,
    rd: u8,
    rn: u8,
) -> StepResult {
    if to_fp {
        let value = state.read_x(rn, Reg31Mode::ZeroRegister);
        if top_half {
            // FMOV Vd.D[1], Xn keeps the low half intact.
            let reg = state.vreg_mut(rd, RegLog::Log);
            reg.set_lane(1, 64, value);
        } else {
            let bits = if sf { value } else { value & 0xFFFF_FFFF };
            let size = fp_type.size_bits();
            state.write_scalar(rd, size, bits & a64sim_common::uint_mask(size), RegLog::Log);
        }
    } else {
        let value = if top_half {
            state.read_lane(rn, 1, 64)
        } else {
            state.read_lane(rn, 0, fp_type.size_bits())
        };
        state.write_sized(sf, rd, value, Reg31Mode::ZeroRegister, RegLog::Log);
    }
    StepResult::Continue
}

pub fn exec_fp_unary(state: &mut CpuState, fp_type: FpType, op: u8, rd: u8, rn: u8) -> StepResult {
    assert_supported_fpcr(state);
    match fp_type {
        FpType::Double => {
            let v = read_f64(state, rn);
            let result = match op {
                0 => f64::from_bits(v.to_bits() & !(1u64 << 63)),
                1 => f64::from_bits(v.to_bits() ^ (1u64 << 63)),
                _ => {
                    let v = flush_f64(state, v);
                    if let Some(n) = process_nans_f64(state, v, 0.0) {
                        n
                    } else if v < 0.0 {
                        state.fpsr.set_ioc();
                        f64::from_bits(DEFAULT_NAN_F64)
                    } else {
                        v.sqrt()
                    }
                }
            };
            write_f64(state, rd, result);
        }
        FpType::Single => {
            let v = read_f32(state, rn);
            let result = match op {
                0 => f32::from_bits(v.to_bits() & !(1u32 << 31)),
                1 => f32::from_bits(v.to_bits() ^ (1u32 << 31)),
                _ => {
                    let v = flush_f32(state, v);
                    if let Some(n) = process_nans_f32(state, v, 0.0) {
                        n
                    } else if v < 0.0 {
                        state.fpsr.set_ioc();
                        f32::from_bits(DEFAULT_NAN_F32)
                    } else {
                        v.sqrt()
                    }
                }
            };
            write_f32(state, rd, result);
        }
        FpType::Half => {
            let bits = state.read_lane(rn, 0, 16) as u16;
            let result = match op {
                0 => bits & !(1 << 15),
                1 => bits ^ (1 << 15),
                _ => {
                    let v = f16_to_f32(bits, state.fpcr.ahp());
                    let r = if v.is_nan() || v < 0.0 {
                        if is_signalling_f16(bits) || v < 0.0 {
                            state.fpsr.set_ioc();
                        }
                        f32::from_bits(DEFAULT_NAN_F32)
                    } else {
                        v.sqrt()
                    };
                    f32_to_f16(state, r)
                }
            };
            write_f16_bits(state, rd, result);
        }
    }
    StepResult::Continue
}

pub fn exec_fp_convert(state: &mut CpuState, dst: FpType, src: FpType, rd: u8, rn: u8) -> StepResult {
    assert_supported_fpcr(state);
    let wide = read_fp(state, rn, src);
    // Quieting and IOC for signalling inputs.
    let wide = match src {
        FpType::Double => {
            let v = read_f64(state, rn);
            match process_nans_f64(state, v, 0.0) {
                Some(n) => n,
                None => wide,
            }
        }
        FpType::Single => {
            let v = read_f32(state, rn);
            match process_nans_f32(state, v, 0.0) {
                Some(n) => n as f64,
                None => wide,
            }
        }
        FpType::Half => {
            let bits = state.read_lane(rn, 0, 16) as u16;
            if is_signalling_f16(bits) {
                state.fpsr.set_ioc();
                if state.fpcr.dn() {
                    f64::from_bits(DEFAULT_NAN_F64)
                } else {
                    f64::from_bits(f16_to_f64(bits | 0x0200, state.fpcr.ahp()).to_bits())
                }
            } else {
                wide
            }
        }
    };
    match dst {
        FpType::Half => {
            let bits = f64_to_f16(state, wide);
            write_f16_bits(state, rd, bits);
        }
        FpType::Single => {
            let narrowed = if wide.is_nan() && state.fpcr.dn() {
                f32::from_bits(DEFAULT_NAN_F32)
            } else {
                wide as f32
            };
            write_f32(state, rd, narrowed);
        }
        FpType::Double => {
            let v = if wide.is_nan() && state.fpcr.dn() {
                f64::from_bits(DEFAULT_NAN_F64)
            } else {
                wide
            };
            write_f64(state, rd, v);
        }
    }
    StepResult::Continue
}

pub fn exec_fp_round(
    state: &mut CpuState,
    fp_type: FpType,
    rounding: FpRounding,
    _exact: bool,
    rd: u8,
    rn: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    match fp_type {
        FpType::Double => {
            let v = read_f64(state, rn);
            let result = match process_nans_f64(state, v, 0.0) {
                Some(n) => n,
                None => round_to_integral(v, rounding, state.fpcr.rmode()),
            };
            write_f64(state, rd, result);
        }
        FpType::Single => {
            let v = read_f32(state, rn);
            let result = match process_nans_f32(state, v, 0.0) {
                Some(n) => n,
                None => round_to_integral(v as f64, rounding, state.fpcr.rmode()) as f32,
            };
            write_f32(state, rd, result);
        }
        FpType::Half => {
            let bits = state.read_lane(rn, 0, 16) as u16;
            let v = f16_to_f64(bits, state.fpcr.ahp());
            let rounded = round_to_integral(v, rounding, state.fpcr.rmode());
            let bits = f64_to_f16(state, rounded);
            write_f16_bits(state, rd, bits);
        }
    }
    StepResult::Continue
}

pub fn exec_fp_binary(
    state: &mut CpuState,
    fp_type: FpType,
    op: FpBinOp,
    rd: u8,
    rn: u8,
    rm: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    match fp_type {
        FpType::Double => {
            let (a, b) = (read_f64(state, rn), read_f64(state, rm));
            let result = match op {
                FpBinOp::Add => fp_add_f64(state, a, b),
                FpBinOp::Sub => fp_sub_f64(state, a, b),
                FpBinOp::Mul => fp_mul_f64(state, a, b),
                FpBinOp::Div => fp_div_f64(state, a, b),
                FpBinOp::Max => fp_max_f64(state, a, b),
                FpBinOp::Min => fp_min_f64(state, a, b),
                FpBinOp::MaxNm => fp_maxnm_f64(state, a, b),
                FpBinOp::MinNm => fp_minnm_f64(state, a, b),
                FpBinOp::NMul => {
                    let r = fp_mul_f64(state, a, b);
                    if r.is_nan() { r } else { -r }
                }
            };
            write_f64(state, rd, result);
        }
        FpType::Single => {
            let (a, b) = (read_f32(state, rn), read_f32(state, rm));
            let result = match op {
                FpBinOp::Add => fp_add_f32(state, a, b),
                FpBinOp::Sub => fp_sub_f32(state, a, b),
                FpBinOp::Mul => fp_mul_f32(state, a, b),
                FpBinOp::Div => fp_div_f32(state, a, b),
                FpBinOp::Max => fp_max_f32(state, a, b),
                FpBinOp::Min => fp_min_f32(state, a, b),
                FpBinOp::MaxNm => fp_maxnm_f32(state, a, b),
                FpBinOp::MinNm => fp_minnm_f32(state, a, b),
                FpBinOp::NMul => {
                    let r = fp_mul_f32(state, a, b);
                    if r.is_nan() { r } else { -r }
                }
            };
            write_f32(state, rd, result);
        }
        FpType::Half => {
            let ahp = state.fpcr.ahp();
            let (an, am) = (
                state.read_lane(rn, 0, 16) as u16,
                state.read_lane(rm, 0, 16) as u16,
            );
            let (a, b) = (f16_to_f32(an, ahp), f16_to_f32(am, ahp));
            let result = match op {
                FpBinOp::Add => fp_add_f32(state, a, b),
                FpBinOp::Sub => fp_sub_f32(state, a, b),
                FpBinOp::Mul => fp_mul_f32(state, a, b),
                FpBinOp::Div => fp_div_f32(state, a, b),
                FpBinOp::Max => fp_max_f32(state, a, b),
                FpBinOp::Min => fp_min_f32(state, a, b),
                FpBinOp::MaxNm => fp_maxnm_f32(state, a, b),
                FpBinOp::MinNm => fp_minnm_f32(state, a, b),
                FpBinOp::NMul => {
                    let r = fp_mul_f32(state, a, b);
                    if r.is_nan() { r } else { -r }
                }
            };
            let bits = f32_to_f16(state, result);
            write_f16_bits(state, rd, bits);
        }
    }
    StepResult::Continue
}

#[allow(clippy::too_many_arguments)]
pub fn exec_fp_fma(
    state: &mut CpuState,
    fp_type: FpType,
    negate_product: bool,
    negate_addend: bool,
    rd: u8,
    rn: u8,
    rm: u8,
    ra: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    match fp_type {
        FpType::Double => {
            let mut n = read_f64(state, rn);
            let m = read_f64(state, rm);
            let mut a = read_f64(state, ra);
            if negate_product && !n.is_nan() {
                n = -n;
            }
            if negate_addend && !a.is_nan() {
                a = -a;
            }
            let result = fp_fma_f64(state, a, n, m);
            write_f64(state, rd, result);
        }
        FpType::Single => {
            let mut n = read_f32(state, rn);
            let m = read_f32(state, rm);
            let mut a = read_f32(state, ra);
            if negate_product && !n.is_nan() {
                n = -n;
            }
            if negate_addend && !a.is_nan() {
                a = -a;
            }
            let result = fp_fma_f32(state, a, n, m);
            write_f32(state, rd, result);
        }
        FpType::Half => {
            let ahp = state.fpcr.ahp();
            let mut n = f16_to_f32(state.read_lane(rn, 0, 16) as u16, ahp);
            let m = f16_to_f32(state.read_lane(rm, 0, 16) as u16, ahp);
            let mut a = f16_to_f32(state.read_lane(ra, 0, 16) as u16, ahp);
            if negate_product && !n.is_nan() {
                n = -n;
            }
            if negate_addend && !a.is_nan() {
                a = -a;
            }
            let result = fp_fma_f32(state, a, n, m);
            let bits = f32_to_f16(state, result);
            write_f16_bits(state, rd, bits);
        }
    }
    StepResult::Continue
}

/// Flag encodings for FP comparison outcomes.
const FP_LESS: u8 = 0b1000;
const FP_EQUAL: u8 = 0b0110;
const FP_GREATER: u8 = 0b0010;
const FP_UNORDERED: u8 = 0b0011;

fn fp_compare_common(state: &mut CpuState, a: f64, b: f64, signalling_input: bool) {
    let nibble = if a.is_nan() || b.is_nan() {
        if signalling_input {
            state.fpsr.set_ioc();
        }
        FP_UNORDERED
    } else if a < b {
        FP_LESS
    } else if a > b {
        FP_GREATER
    } else {
        FP_EQUAL
    };
    state.nzcv.set_nibble(nibble);
    state.mark_nzcv_written();
}

pub fn exec_fp_compare(state: &mut CpuState, fp_type: FpType, rn: u8, rm: u8, with_zero: bool) -> StepResult {
    assert_supported_fpcr(state);
    let a = read_fp(state, rn, fp_type);
    let b = if with_zero { 0.0 } else { read_fp(state, rm, fp_type) };
    let signalling = match fp_type {
        FpType::Double => {
            is_signalling_f64(read_f64(state, rn))
                || (!with_zero && is_signalling_f64(read_f64(state, rm)))
        }
        FpType::Single => {
            is_signalling_f32(read_f32(state, rn))
                || (!with_zero && is_signalling_f32(read_f32(state, rm)))
        }
        FpType::Half => {
            is_signalling_f16(state.read_lane(rn, 0, 16) as u16)
                || (!with_zero && is_signalling_f16(state.read_lane(rm, 0, 16) as u16))
        }
    };
    fp_compare_common(state, a, b, signalling);
    StepResult::Continue
}

pub fn exec_fp_cond_compare(
    state: &mut CpuState,
    fp_type: FpType,
    rn: u8,
    rm: u8,
    cond: Condition,
    nzcv: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    if state.condition_passed(cond) {
        exec_fp_compare(state, fp_type, rn, rm, false)
    } else {
        state.nzcv.set_nibble(nzcv);
        state.mark_nzcv_written();
        StepResult::Continue
    }
}

pub fn exec_fp_cond_select(
    state: &mut CpuState,
    fp_type: FpType,
    rd: u8,
    rn: u8,
    rm: u8,
    cond: Condition,
) -> StepResult {
    let src = if state.condition_passed(cond) { rn } else { rm };
    let bits = state.read_lane(src, 0, fp_type.size_bits());
    state.write_scalar(rd, fp_type.size_bits(), bits, RegLog::Log);
    StepResult::Continue
}

pub fn exec_fp_to_int(
    state: &mut CpuState,
    fp_type: FpType,
    sf: bool,
    unsigned: bool,
    rounding: FpRounding,
    rd: u8,
    rn: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    let value = read_fp(state, rn, fp_type);
    let result = match (sf, unsigned) {
        (true, false) => f64_to_i64(state, value, rounding) as u64,
        (true, true) => f64_to_u64(state, value, rounding),
        (false, false) => f64_to_i32(state, value, rounding) as u32 as u64,
        (false, true) => f64_to_u32(state, value, rounding) as u64,
    };
    state.write_sized(sf, rd, result, Reg31Mode::ZeroRegister, RegLog::Log);
    StepResult::Continue
}

pub fn exec_int_to_fp(
    state: &mut CpuState,
    fp_type: FpType,
    sf: bool,
    unsigned: bool,
    rd: u8,
    rn: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    let raw = state.read_sized(sf, rn, Reg31Mode::ZeroRegister);
    let wide = if unsigned {
        raw as f64
    } else if sf {
        raw as i64 as f64
    } else {
        raw as u32 as i32 as f64
    };
    match fp_type {
        FpType::Half => {
            let bits = f64_to_f16(state, wide);
            write_f16_bits(state, rd, bits);
        }
        FpType::Single => {
            // Round through the 64-bit source directly to keep the single
            // rounding step on the host conversion.
            let v = if unsigned {
                raw as f32
            } else if sf {
                raw as i64 as f32
            } else {
                raw as u32 as i32 as f32
            };
            write_f32(state, rd, v);
        }
        FpType::Double => write_f64(state, rd, wide),
    }
    StepResult::Continue
}

pub fn exec_fp_to_fixed(
    state: &mut CpuState,
    fp_type: FpType,
    sf: bool,
    unsigned: bool,
    fbits: u8,
    rd: u8,
    rn: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    let value = read_fp(state, rn, fp_type) * (fbits as i32).exp2_scale();
    let result = match (sf, unsigned) {
        (true, false) => f64_to_i64(state, value, FpRounding::Zero) as u64,
        (true, true) => f64_to_u64(state, value, FpRounding::Zero),
        (false, false) => f64_to_i32(state, value, FpRounding::Zero) as u32 as u64,
        (false, true) => f64_to_u32(state, value, FpRounding::Zero) as u64,
    };
    state.write_sized(sf, rd, result, Reg31Mode::ZeroRegister, RegLog::Log);
    StepResult::Continue
}

pub fn exec_fixed_to_fp(
    state: &mut CpuState,
    fp_type: FpType,
    sf: bool,
    unsigned: bool,
    fbits: u8,
    rd: u8,
    rn: u8,
) -> StepResult {
    assert_supported_fpcr(state);
    let raw = state.read_sized(sf, rn, Reg31Mode::ZeroRegister);
    let int_val = if unsigned {
        raw as f64
    } else if sf {
        raw as i64 as f64
    } else {
        raw as u32 as i32 as f64
    };
    let wide = int_val * (-(fbits as i32)).exp2_scale();
    match fp_type {
        FpType::Half => {
            let bits = f64_to_f16(state, wide);
            write_f16_bits(state, rd, bits);
        }
        FpType::Single => write_f32(state, rd, wide as f32),
        FpType::Double => write_f64(state, rd, wide),
    }
    StepResult::Continue
}

/// FJCVTZS: JavaScript's ToInt32. Truncate toward zero, wrap modulo
/// 2^32; Z is set only when the conversion was exact.
pub fn exec_fp_to_js_int(state: &mut CpuState, rd: u8, rn: u8) -> StepResult {
    assert_supported_fpcr(state);
    let value = read_f64(state, rn);
    let (result, exact) = if value.is_nan() || value.is_infinite() {
        if value.is_nan() {
            state.fpsr.set_ioc();
        }
        (0u32, false)
    } else {
        let truncated = value.trunc();
        let wrapped = truncated.rem_euclid(4_294_967_296.0) as u64 as u32;
        (wrapped, truncated == value && (i32::MIN as f64..=i32::MAX as f64).contains(&truncated))
    };
    state.write_w(rd, result, Reg31Mode::ZeroRegister, RegLog::Log);
    state.nzcv.set_nibble(if exact { 0b0100 } else { 0b0000 });
    state.mark_nzcv_written();
    StepResult::Continue
}

/// Scale helper: 2^n as f64 without going through powi's rounding.
trait Exp2Scale {
    fn exp2_scale(self) -> f64;
}

impl Exp2Scale for i32 {
    fn exp2_scale(self) -> f64 {
        f64::from_bits(((1023 + self) as u64) << 52)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CpuState;

    fn state() -> CpuState {
        CpuState::new(128)
    }

    #[test]
    fn test_nan_propagation_priority() {
        let mut s = state();
        let snan = f64::from_bits(0x7FF0_0000_0000_0001);
        let qnan = f64::from_bits(0x7FF8_0000_0000_0002);
        // Signalling beats quiet and is returned quieted.
        let r = process_nans_f64(&mut s, qnan, snan).unwrap();
        assert_eq!(r.to_bits(), 0x7FF8_0000_0000_0001);
        assert!(s.fpsr.ioc());
        // First quiet NaN wins otherwise.
        let r = process_nans_f64(&mut s, qnan, f64::NAN).unwrap();
        assert_eq!(r.to_bits(), qnan.to_bits());
    }

    #[test]
    fn test_default_nan_mode() {
        let mut s = state();
        s.fpcr.set_raw(1 << 25); // DN
        let qnan = f64::from_bits(0x7FF8_dead_beef_0000);
        let r = process_nans_f64(&mut s, qnan, 1.0).unwrap();
        assert_eq!(r.to_bits(), DEFAULT_NAN_F64);
    }

    #[test]
    fn test_invalid_operations_produce_default_nan() {
        let mut s = state();
        let r = fp_add_f64(&mut s, f64::INFINITY, f64::NEG_INFINITY);
        assert_eq!(r.to_bits(), DEFAULT_NAN_F64);
        assert!(s.fpsr.ioc());
        let r = fp_mul_f64(&mut s, 0.0, f64::INFINITY);
        assert_eq!(r.to_bits(), DEFAULT_NAN_F64);
        let r = fp_div_f64(&mut s, 0.0, 0.0);
        assert_eq!(r.to_bits(), DEFAULT_NAN_F64);
    }

    #[test]
    fn test_div_by_zero_is_infinity() {
        let mut s = state();
        assert_eq!(fp_div_f64(&mut s, 1.0, 0.0), f64::INFINITY);
        assert_eq!(fp_div_f64(&mut s, -1.0, 0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_minnm_maxnm_ignore_quiet_nan() {
        let mut s = state();
        assert_eq!(fp_maxnm_f64(&mut s, f64::NAN, 3.0), 3.0);
        assert_eq!(fp_minnm_f64(&mut s, 3.0, f64::NAN), 3.0);
        // Plain max propagates instead.
        assert!(fp_max_f64(&mut s, f64::NAN, 3.0).is_nan());
    }

    #[test]
    fn test_flush_to_zero() {
        let mut s = state();
        s.fpcr.set_raw(1 << 24); // FZ
        let denormal = f64::from_bits(1);
        assert_eq!(flush_f64(&s, denormal), 0.0);
        assert!(flush_f64(&s, -denormal).is_sign_negative());
        let r = fp_add_f64(&mut s, denormal, 0.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_f16_conversion_round_trip() {
        let mut s = state();
        for &(half, single) in &[
            (0x3C00u16, 1.0f32),
            (0xBC00, -1.0),
            (0x3555, 0.333_251_95),
            (0x7BFF, 65504.0),
            (0x0001, 5.960_464_5e-8),
            (0x0000, 0.0),
        ] {
            assert_eq!(f16_to_f32(half, false), single, "widening {half:#06x}");
            assert_eq!(f32_to_f16(&mut s, single), half, "narrowing {single}");
        }
    }

    #[test]
    fn test_f16_narrowing_rounds_to_even() {
        let mut s = state();
        // Halfway between 1.0 (0x3C00) and 1.0009765625 (0x3C01).
        let halfway = f32::from_bits(0x3F80_1000);
        assert_eq!(f32_to_f16(&mut s, halfway), 0x3C00);
        // Just above rounds up.
        let above = f32::from_bits(0x3F80_1001);
        assert_eq!(f32_to_f16(&mut s, above), 0x3C01);
    }

    #[test]
    fn test_f16_overflow_and_ahp() {
        let mut s = state();
        assert_eq!(f32_to_f16(&mut s, 1.0e6), 0x7C00);
        assert_eq!(f32_to_f16(&mut s, f32::NEG_INFINITY), 0xFC00);
        s.fpcr.set_raw(1 << 26); // AHP
        assert_eq!(f32_to_f16(&mut s, 1.0e6), 0x7FFF);
        assert!(s.fpsr.ioc());
        // With AHP, the top exponent is a normal number when widening.
        assert!(f16_to_f32(0x7C00, true).is_finite());
    }

    #[test]
    fn test_round_to_integral_modes() {
        let m = RMode::TieEven;
        assert_eq!(round_to_integral(2.5, FpRounding::TieEven, m), 2.0);
        assert_eq!(round_to_integral(3.5, FpRounding::TieEven, m), 4.0);
        assert_eq!(round_to_integral(-2.5, FpRounding::TieEven, m), -2.0);
        assert_eq!(round_to_integral(2.5, FpRounding::TieAway, m), 3.0);
        assert_eq!(round_to_integral(-2.5, FpRounding::TieAway, m), -2.0);
        assert_eq!(round_to_integral(2.1, FpRounding::PlusInfinity, m), 3.0);
        assert_eq!(round_to_integral(2.9, FpRounding::MinusInfinity, m), 2.0);
        assert_eq!(round_to_integral(-2.9, FpRounding::Zero, m), -2.0);
        // Current mode follows FPCR.
        assert_eq!(round_to_integral(2.1, FpRounding::Current, RMode::PlusInfinity), 3.0);
        // Negative values rounding to zero keep the sign.
        assert!(round_to_integral(-0.4, FpRounding::TieEven, m).is_sign_negative());
    }

    #[test]
    fn test_fp_to_int_saturation() {
        let mut s = state();
        assert_eq!(f64_to_i64(&mut s, f64::NAN, FpRounding::Zero), 0);
        assert_eq!(f64_to_i64(&mut s, 1e30, FpRounding::Zero), i64::MAX);
        assert_eq!(f64_to_i64(&mut s, -1e30, FpRounding::Zero), i64::MIN);
        assert_eq!(f64_to_u64(&mut s, -1.0, FpRounding::Zero), 0);
        assert_eq!(f64_to_u64(&mut s, 1e30, FpRounding::Zero), u64::MAX);
        assert_eq!(f64_to_i32(&mut s, 3e10, FpRounding::Zero), i32::MAX);
        assert_eq!(f64_to_u32(&mut s, 5e9, FpRounding::Zero), u32::MAX);
        assert_eq!(f64_to_i64(&mut s, -1.5, FpRounding::Zero), -1);
        assert_eq!(f64_to_i64(&mut s, -1.5, FpRounding::MinusInfinity), -2);
    }

    #[test]
    fn test_fcmp_flags() {
        let mut s = state();
        write_f64(&mut s, 0, 1.0);
        write_f64(&mut s, 1, 2.0);
        exec_fp_compare(&mut s, FpType::Double, 0, 1, false);
        assert_eq!(s.nzcv.nibble(), 0b1000); // less
        exec_fp_compare(&mut s, FpType::Double, 1, 0, false);
        assert_eq!(s.nzcv.nibble(), 0b0010); // greater
        exec_fp_compare(&mut s, FpType::Double, 0, 0, false);
        assert_eq!(s.nzcv.nibble(), 0b0110); // equal
        write_f64(&mut s, 2, f64::NAN);
        exec_fp_compare(&mut s, FpType::Double, 0, 2, false);
        assert_eq!(s.nzcv.nibble(), 0b0011); // unordered
        // Compare against literal zero.
        write_f64(&mut s, 3, 0.0);
        exec_fp_compare(&mut s, FpType::Double, 3, 0, true);
        assert_eq!(s.nzcv.nibble(), 0b0110);
    }

    #[test]
    fn test_fccmp_failed_condition_loads_nibble() {
        let mut s = state();
        s.nzcv.set_nibble(0);
        write_f64(&mut s, 0, 1.0);
        write_f64(&mut s, 1, 1.0);
        // Z is clear, so EQ fails and the immediate nibble is loaded.
        exec_fp_cond_compare(&mut s, FpType::Double, 0, 1, Condition::Eq, 0b0101);
        assert_eq!(s.nzcv.nibble(), 0b0101);
        // A passing condition performs the comparison instead.
        exec_fp_cond_compare(&mut s, FpType::Double, 0, 1, Condition::Vs, 0b0000);
        assert_eq!(s.nzcv.nibble(), 0b0110);
    }

    #[test]
    fn test_scalar_write_clears_upper() {
        let mut s = state();
        s.write_q(0, u128::MAX, RegLog::Log);
        write_f32(&mut s, 0, 1.5);
        assert_eq!(s.read_lane(0, 0, 32), 1.5f32.to_bits() as u64);
        assert_eq!(s.read_lane(0, 1, 32), 0);
    }

    #[test]
    fn test_fmov_gp_transfers_raw_bits() {
        let mut s = state();
        s.write_x(1, 0x4048_F5C3, Reg31Mode::ZeroRegister, RegLog::Log);
        exec_fp_mov_gp(&mut s, FpType::Single, true, false, false, 0, 1);
        assert_eq!(read_f32(&s, 0), 3.14f32);
        exec_fp_mov_gp(&mut s, FpType::Single, false, false, false, 2, 0);
        assert_eq!(s.read_x(2, Reg31Mode::ZeroRegister), 0x4048_F5C3);
    }

    #[test]
    fn test_fmov_top_half() {
        let mut s = state();
        s.write_x(1, 0x1234_5678_9ABC_DEF0, Reg31Mode::ZeroRegister, RegLog::Log);
        write_f64(&mut s, 0, 1.0);
        exec_fp_mov_gp(&mut s, FpType::Double, true, true, true, 0, 1);
        assert_eq!(s.read_lane(0, 1, 64), 0x1234_5678_9ABC_DEF0);
        assert_eq!(read_f64(&s, 0), 1.0); // low half intact
        exec_fp_mov_gp(&mut s, FpType::Double, false, true, true, 2, 0);
        assert_eq!(s.read_x(2, Reg31Mode::ZeroRegister), 0x1234_5678_9ABC_DEF0);
    }

    #[test]
    fn test_fma_negations() {
        let mut s = state();
        write_f64(&mut s, 1, 3.0);
        write_f64(&mut s, 2, 4.0);
        write_f64(&mut s, 3, 10.0);
        exec_fp_fma(&mut s, FpType::Double, false, false, 0, 1, 2, 3);
        assert_eq!(read_f64(&s, 0), 22.0); // fmadd
        exec_fp_fma(&mut s, FpType::Double, true, false, 0, 1, 2, 3);
        assert_eq!(read_f64(&s, 0), -2.0); // fmsub: a - n*m
        exec_fp_fma(&mut s, FpType::Double, true, true, 0, 1, 2, 3);
        assert_eq!(read_f64(&s, 0), -22.0); // fnmadd
        exec_fp_fma(&mut s, FpType::Double, false, true, 0, 1, 2, 3);
        assert_eq!(read_f64(&s, 0), 2.0); // fnmsub
    }

    #[test]
    fn test_fixed_point_conversions() {
        let mut s = state();
        // 1.5 with 8 fractional bits is 384.
        write_f64(&mut s, 0, 1.5);
        exec_fp_to_fixed(&mut s, FpType::Double, true, false, 8, 1, 0);
        assert_eq!(s.read_x(1, Reg31Mode::ZeroRegister), 384);
        // And back.
        s.write_x(2, 384, Reg31Mode::ZeroRegister, RegLog::Log);
        exec_fixed_to_fp(&mut s, FpType::Double, true, false, 8, 3, 2);
        assert_eq!(read_f64(&s, 3), 1.5);
    }

    #[test]
    fn test_js_convert() {
        let mut s = state();
        write_f64(&mut s, 0, 3.0);
        exec_fp_to_js_int(&mut s, 1, 0);
        assert_eq!(s.read_x(1, Reg31Mode::ZeroRegister), 3);
        assert_eq!(s.nzcv.nibble(), 0b0100); // exact

        // 2^32 + 5 wraps to 5, inexact flagging per ToInt32.
        write_f64(&mut s, 0, 4_294_967_301.0);
        exec_fp_to_js_int(&mut s, 1, 0);
        assert_eq!(s.read_x(1, Reg31Mode::ZeroRegister), 5);
        assert_eq!(s.nzcv.nibble(), 0b0000);

        write_f64(&mut s, 0, f64::NAN);
        exec_fp_to_js_int(&mut s, 1, 0);
        assert_eq!(s.read_x(1, Reg31Mode::ZeroRegister), 0);

        write_f64(&mut s, 0, -1.0);
        exec_fp_to_js_int(&mut s, 1, 0);
        assert_eq!(s.read_x(1, Reg31Mode::ZeroRegister), 0xFFFF_FFFF);
        assert_eq!(s.nzcv.nibble(), 0b0100);
    }

    #[test]
    fn test_int_to_fp() {
        let mut s = state();
        s.write_x(0, (-42i64) as u64, Reg31Mode::ZeroRegister, RegLog::Log);
        exec_int_to_fp(&mut s, FpType::Double, true, false, 1, 0);
        assert_eq!(read_f64(&s, 1), -42.0);
        exec_int_to_fp(&mut s, FpType::Double, true, true, 1, 0);
        assert_eq!(read_f64(&s, 1), (-42i64 as u64) as f64);
        s.write_w(0, (-7i32) as u32, Reg31Mode::ZeroRegister, RegLog::Log);
        exec_int_to_fp(&mut s, FpType::Single, false, false, 1, 0);
        assert_eq!(read_f32(&s, 1), -7.0);
    }

    #[test]
    fn test_fsqrt_negative_is_invalid() {
        let mut s = state();
        write_f64(&mut s, 0, -4.0);
        exec_fp_unary(&mut s, FpType::Double, 2, 1, 0);
        assert_eq!(read_f64(&s, 1).to_bits(), DEFAULT_NAN_F64);
        assert!(s.fpsr.ioc());
    }

    #[test]
    fn test_fabs_fneg_are_bit_ops() {
        let mut s = state();
        write_f64(&mut s, 0, -0.0);
        exec_fp_unary(&mut s, FpType::Double, 0, 1, 0);
        assert!(read_f64(&s, 1).is_sign_positive());
        // FNEG of a NaN just flips the sign bit, no quieting.
        let snan = f64::from_bits(0x7FF0_0000_0000_0001);
        write_f64(&mut s, 0, snan);
        exec_fp_unary(&mut s, FpType::Double, 1, 1, 0);
        assert_eq!(read_f64(&s, 1).to_bits(), 0xFFF0_0000_0000_0001);
    }

    #[test]
    fn test_fcvt_widen_narrow() {
        let mut s = state();
        write_f32(&mut s, 0, 1.5);
        exec_fp_convert(&mut s, FpType::Double, FpType::Single, 1, 0);
        assert_eq!(read_f64(&s, 1), 1.5);
        exec_fp_convert(&mut s, FpType::Half, FpType::Double, 2, 1);
        assert_eq!(s.read_lane(2, 0, 16), 0x3E00); // 1.5 as half
        exec_fp_convert(&mut s, FpType::Single, FpType::Half, 3, 2);
        assert_eq!(read_f32(&s, 3), 1.5);
    }
}
