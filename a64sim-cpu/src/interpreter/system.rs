// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! System instruction surface: MRS/MSR, hints (including BTI), barriers,
//! CLREX, flag manipulation, and the HLT host-trap services.

use std::sync::atomic::{fence, Ordering};

use a64sim_common::{align_up, CpuFeature, CpuFeatures, INSTRUCTION_SIZE};

use crate::inst::{Hint, PacKey, PacModifier, PointerType, SystemReg};
use crate::memory::MemoryAccess;
use crate::state::{BType, Reg31Mode, RegLog};
use crate::trace::TraceParams;

use super::pac;
use super::{ExitReason, Simulator, StepResult};

// HLT immediates carrying host services.
pub const HLT_UNREACHABLE: u16 = 0xdeb0;
pub const HLT_PRINTF: u16 = 0xdeb1;
pub const HLT_TRACE: u16 = 0xdeb2;
pub const HLT_LOG: u16 = 0xdeb3;
pub const HLT_RUNTIME_CALL: u16 = 0xdeb4;
pub const HLT_SET_CPU_FEATURES: u16 = 0xdeb5;
pub const HLT_ENABLE_CPU_FEATURES: u16 = 0xdeb6;
pub const HLT_DISABLE_CPU_FEATURES: u16 = 0xdeb7;
pub const HLT_SAVE_CPU_FEATURES: u16 = 0xdeb8;
pub const HLT_RESTORE_CPU_FEATURES: u16 = 0xdeb9;

// Payload layout, in bytes from the HLT instruction itself.
pub const TRACE_PARAMS_OFFSET: u64 = 4;
pub const TRACE_COMMAND_OFFSET: u64 = 8;
pub const TRACE_LENGTH: u64 = 12;
pub const LOG_PARAMS_OFFSET: u64 = 4;
pub const LOG_LENGTH: u64 = 8;
pub const PRINTF_ARG_COUNT_OFFSET: u64 = 4;
pub const PRINTF_ARG_PATTERN_LIST_OFFSET: u64 = 8;
pub const PRINTF_LENGTH: u64 = 12;
pub const PRINTF_MAX_ARG_COUNT: u32 = 4;
pub const PRINTF_ARG_PATTERN_BITS: u32 = 2;
pub const RUNTIME_CALL_HANDLE_OFFSET: u64 = 4;
pub const RUNTIME_CALL_LENGTH: u64 = 24;
pub const CPU_FEATURES_LIST_OFFSET: u64 = 4;

pub const TRACE_ENABLE: u32 = 1;
pub const TRACE_DISABLE: u32 = 2;

// Printf argument patterns.
pub const PRINTF_ARG_W: u32 = 0;
pub const PRINTF_ARG_X: u32 = 1;
pub const PRINTF_ARG_D: u32 = 2;

/// Advance a 48-bit linear congruential generator and return the high 32
/// bits of the new state.
fn jrand48(state: &mut [u16; 3]) -> u64 {
    let x = ((state[2] as u64) << 32) | ((state[1] as u64) << 16) | state[0] as u64;
    let x = x.wrapping_mul(0x5DEE_CE66D).wrapping_add(0xB) & 0xFFFF_FFFF_FFFF;
    state[0] = x as u16;
    state[1] = (x >> 16) as u16;
    state[2] = (x >> 32) as u16;
    x >> 16
}

pub fn exec_mrs(sim: &mut Simulator, rt: u8, reg: SystemReg) -> StepResult {
    let value = match reg {
        SystemReg::Nzcv => sim.state.nzcv.raw() as u64,
        SystemReg::Fpcr => sim.state.fpcr.raw() as u64,
        SystemReg::Rndr | SystemReg::Rndrrs => {
            let high = jrand48(&mut sim.state.rndr_state);
            let low = jrand48(&mut sim.state.rndr_state);
            // Generation never fails here; clear the flags to say so.
            sim.state.nzcv.set_raw(0);
            sim.state.mark_nzcv_written();
            (high << 32) | (low & 0xFFFF_FFFF)
        }
        SystemReg::Other(enc) => {
            log::warn!("MRS from unmodeled system register 0x{enc:04x} at pc 0x{:x}", sim.state.pc);
            0
        }
    };
    sim.state.write_x(rt, value, Reg31Mode::ZeroRegister, RegLog::Log);
    StepResult::Continue
}

pub fn exec_msr(sim: &mut Simulator, rt: u8, reg: SystemReg) -> StepResult {
    let value = sim.state.read_w(rt, Reg31Mode::ZeroRegister);
    match reg {
        SystemReg::Nzcv => {
            sim.state.nzcv.set_raw(value);
            sim.state.mark_nzcv_written();
        }
        SystemReg::Fpcr => {
            sim.state.fpcr.set_raw(value);
            sim.state.fpcr_written = true;
        }
        SystemReg::Rndr | SystemReg::Rndrrs => {
            log::warn!("MSR to read-only random register at pc 0x{:x}", sim.state.pc);
        }
        SystemReg::Other(enc) => {
            log::warn!(
                "MSR to unmodeled system register 0x{enc:04x} = 0x{value:08x} at pc 0x{:x}",
                sim.state.pc
            );
        }
    }
    StepResult::Continue
}

/// Hints. The BTI variants validate the incoming branch type when the
/// page is guarded; a mismatch is fatal.
pub fn exec_hint(sim: &mut Simulator, hint: Hint) -> StepResult {
    let btype = sim.state.btype;
    let guarded = sim.guard_pages;
    let violation = match hint {
        Hint::Bti => guarded && btype != BType::Default,
        Hint::BtiC => guarded && btype == BType::BranchFromGuardedNotToIP,
        Hint::BtiJ => guarded && btype == BType::BranchAndLink,
        // BTI jc accepts everything; the rest are plain no-ops.
        _ => false,
    };
    if violation {
        return StepResult::Fatal(ExitReason::BtiViolation { pc: sim.state.pc, btype });
    }
    StepResult::Continue
}

pub fn exec_barrier() -> StepResult {
    fence(Ordering::SeqCst);
    StepResult::Continue
}

pub fn exec_clrex(sim: &mut Simulator) -> StepResult {
    // Only the local monitor; the global monitor is not affected.
    sim.local_monitor.clear();
    StepResult::Continue
}

pub fn exec_sys(sim: &mut Simulator, op: u16, rt: u8) -> StepResult {
    // Cache and TLB maintenance is a no-op against a flat memory image.
    let _ = sim.state.read_x(rt, Reg31Mode::ZeroRegister);
    log::trace!("SYS op 0x{op:04x} ignored");
    StepResult::Continue
}

pub fn exec_cfinv(sim: &mut Simulator) -> StepResult {
    let c = sim.state.nzcv.c();
    sim.state.nzcv.set_c(!c);
    sim.state.mark_nzcv_written();
    StepResult::Continue
}

pub fn exec_axflag(sim: &mut Simulator) -> StepResult {
    let nzcv = &mut sim.state.nzcv;
    let (z, c, v) = (nzcv.z(), nzcv.c(), nzcv.v());
    nzcv.set_n(false);
    nzcv.set_z(z | v);
    nzcv.set_c(c & !v);
    nzcv.set_v(false);
    sim.state.mark_nzcv_written();
    StepResult::Continue
}

pub fn exec_xaflag(sim: &mut Simulator) -> StepResult {
    let nzcv = &mut sim.state.nzcv;
    let (z, c) = (nzcv.z(), nzcv.c());
    let n = !c & !z;
    let new_z = z & c;
    let new_c = c | z;
    let v = !c & z;
    nzcv.set_n(n);
    nzcv.set_z(new_z);
    nzcv.set_c(new_c);
    nzcv.set_v(v);
    sim.state.mark_nzcv_written();
    StepResult::Continue
}

pub fn exec_xpaclri(sim: &mut Simulator) -> StepResult {
    let lr = sim.state.lr();
    let stripped = pac::strip_pac(lr, PointerType::Instruction);
    sim.state.set_lr(stripped);
    StepResult::Continue
}

pub fn exec_pac_hint(
    sim: &mut Simulator,
    auth: bool,
    key: PacKey,
    rd: u8,
    modifier: PacModifier,
) -> StepResult {
    let modifier = match modifier {
        PacModifier::Zero => 0,
        PacModifier::X16 => sim.state.read_x(16, Reg31Mode::ZeroRegister),
        PacModifier::Sp => sim.state.read_x(31, Reg31Mode::StackPointer),
    };
    let ptr = sim.state.read_x(rd, Reg31Mode::ZeroRegister);
    let result = if auth {
        pac::auth_pac(ptr, modifier, key, PointerType::Instruction)
    } else {
        pac::add_pac(ptr, modifier, key, PointerType::Instruction)
    };
    sim.state.write_x(rd, result, Reg31Mode::ZeroRegister, RegLog::Log);
    StepResult::Continue
}

// ---------------------------------------------------------------------------
// HLT host traps
// ---------------------------------------------------------------------------

pub fn exec_hlt(sim: &mut Simulator, mem: &mut dyn MemoryAccess, imm: u16) -> StepResult {
    match imm {
        HLT_UNREACHABLE => StepResult::Fatal(ExitReason::Unreachable { pc: sim.state.pc }),
        HLT_PRINTF => do_printf(sim, mem),
        HLT_TRACE => do_trace(sim, mem),
        HLT_LOG => do_log(sim, mem),
        HLT_RUNTIME_CALL => do_runtime_call(sim, mem),
        HLT_SET_CPU_FEATURES | HLT_ENABLE_CPU_FEATURES | HLT_DISABLE_CPU_FEATURES => {
            do_configure_cpu_features(sim, mem, imm)
        }
        HLT_SAVE_CPU_FEATURES => {
            let features = sim.cpu_features;
            sim.saved_cpu_features.push(features);
            StepResult::Continue
        }
        HLT_RESTORE_CPU_FEATURES => match sim.saved_cpu_features.pop() {
            Some(features) => {
                sim.cpu_features = features;
                StepResult::Continue
            }
            None => StepResult::Fatal(ExitReason::Breakpoint { pc: sim.state.pc, imm }),
        },
        _ => StepResult::Fatal(ExitReason::Breakpoint { pc: sim.state.pc, imm }),
    }
}

fn read_payload_u32(sim: &Simulator, mem: &mut dyn MemoryAccess, offset: u64) -> Result<u32, StepResult> {
    let addr = sim.state.pc + offset;
    mem.read_u32(addr)
        .map_err(|_| StepResult::Fatal(ExitReason::DataAbort { addr }))
}

fn skip_payload(sim: &mut Simulator, length: u64) {
    sim.state.pc += length;
    sim.state.pc_modified = true;
}

fn do_trace(sim: &mut Simulator, mem: &mut dyn MemoryAccess) -> StepResult {
    let parameters = match read_payload_u32(sim, mem, TRACE_PARAMS_OFFSET) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let command = match read_payload_u32(sim, mem, TRACE_COMMAND_OFFSET) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let parameters = TraceParams::from_bits_truncate(parameters);
    let current = sim.trace.params();
    match command {
        TRACE_ENABLE => sim.trace.set_params(current | parameters),
        TRACE_DISABLE => sim.trace.set_params(current - parameters),
        _ => {
            return StepResult::Fatal(ExitReason::Unreachable { pc: sim.state.pc });
        }
    }
    skip_payload(sim, TRACE_LENGTH);
    StepResult::Continue
}

fn do_log(sim: &mut Simulator, mem: &mut dyn MemoryAccess) -> StepResult {
    let parameters = match read_payload_u32(sim, mem, LOG_PARAMS_OFFSET) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let parameters = TraceParams::from_bits_truncate(parameters);
    sim.dump_registers(parameters);
    skip_payload(sim, LOG_LENGTH);
    StepResult::Continue
}

/// Read a NUL-terminated string from the emulated image.
fn read_c_string(mem: &mut dyn MemoryAccess, addr: u64) -> Result<String, StepResult> {
    let mut bytes = Vec::new();
    let mut cursor = addr;
    loop {
        let byte = mem
            .read_u8(cursor)
            .map_err(|_| StepResult::Fatal(ExitReason::DataAbort { addr: cursor }))?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
        cursor += 1;
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Format one printf chunk whose placeholder consumes `value`.
fn format_chunk_int(chunk: &str, value: u64, signed_width: u32) -> String {
    let conversion = chunk.chars().last().unwrap_or('d');
    match conversion {
        'x' => format!("{value:x}"),
        'X' => format!("{value:X}"),
        'u' => format!("{value}"),
        'c' => ((value as u8) as char).to_string(),
        'p' => format!("0x{value:x}"),
        _ => {
            let signed = if signed_width == 32 {
                value as u32 as i32 as i64
            } else {
                value as i64
            };
            format!("{signed}")
        }
    }
}

fn do_printf(sim: &mut Simulator, mem: &mut dyn MemoryAccess) -> StepResult {
    let arg_count = match read_payload_u32(sim, mem, PRINTF_ARG_COUNT_OFFSET) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let arg_pattern_list = match read_payload_u32(sim, mem, PRINTF_ARG_PATTERN_LIST_OFFSET) {
        Ok(v) => v,
        Err(r) => return r,
    };
    if arg_count > PRINTF_MAX_ARG_COUNT {
        return StepResult::Fatal(ExitReason::Unreachable { pc: sim.state.pc });
    }

    let format = match read_c_string(mem, sim.state.read_x(0, Reg31Mode::ZeroRegister)) {
        Ok(s) => s,
        Err(r) => return r,
    };

    // Split the format string into chunks, each ending with exactly one
    // placeholder; "%%" is literal.
    let mut chunks: Vec<String> = vec![String::new()];
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            chunks.last_mut().unwrap().push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            chunks.last_mut().unwrap().push('%');
            continue;
        }
        // Consume the placeholder up to its conversion character.
        let mut placeholder = String::from("%");
        for c in chars.by_ref() {
            placeholder.push(c);
            if c.is_ascii_alphabetic() {
                break;
            }
        }
        chunks.last_mut().unwrap().push_str(&placeholder);
        chunks.push(String::new());
    }
    let placeholder_count = chunks.len() as u32 - 1;
    if placeholder_count != arg_count {
        return StepResult::Fatal(ExitReason::Unreachable { pc: sim.state.pc });
    }

    // The leading chunk has no placeholder and prints literally; each
    // following argument consumes the next W/X or D register.
    let mut output = String::new();
    let mut pcs_r = 1; // x1 onwards; x0 holds the format string.
    let mut pcs_f = 0; // d0 onwards.
    for (i, chunk) in chunks.iter().enumerate() {
        let (text, placeholder) = match chunk.rfind('%') {
            Some(pos) if i < chunks.len() - 1 => (&chunk[..pos], &chunk[pos..]),
            _ => (chunk.as_str(), ""),
        };
        output.push_str(text);
        if placeholder.is_empty() {
            continue;
        }
        let pattern = (arg_pattern_list >> (i as u32 * PRINTF_ARG_PATTERN_BITS))
            & ((1 << PRINTF_ARG_PATTERN_BITS) - 1);
        match pattern {
            PRINTF_ARG_W => {
                let value = sim.state.read_w(pcs_r, Reg31Mode::ZeroRegister) as u64;
                pcs_r += 1;
                output.push_str(&format_chunk_int(placeholder, value, 32));
            }
            PRINTF_ARG_X => {
                let value = sim.state.read_x(pcs_r, Reg31Mode::ZeroRegister);
                pcs_r += 1;
                if placeholder.ends_with('s') {
                    match read_c_string(mem, value) {
                        Ok(s) => output.push_str(&s),
                        Err(r) => return r,
                    }
                } else {
                    output.push_str(&format_chunk_int(placeholder, value, 64));
                }
            }
            PRINTF_ARG_D => {
                let value = f64::from_bits(sim.state.read_lane(pcs_f, 0, 64));
                pcs_f += 1;
                output.push_str(&format!("{value}"));
            }
            _ => return StepResult::Fatal(ExitReason::Unreachable { pc: sim.state.pc }),
        }
    }

    sim.trace.print(&output);

    // Printf returns its byte count in x0, like the C library's.
    sim.state.write_x(0, output.len() as u64, Reg31Mode::ZeroRegister, RegLog::Log);

    // Skip the inlined parameters and set LR as if a native printf
    // had just returned.
    skip_payload(sim, PRINTF_LENGTH);
    let pc = sim.state.pc;
    sim.state.set_lr(pc);
    StepResult::Continue
}

fn do_runtime_call(sim: &mut Simulator, mem: &mut dyn MemoryAccess) -> StepResult {
    let handle = match read_payload_u32(sim, mem, RUNTIME_CALL_HANDLE_OFFSET) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let mut handler = match sim.runtime_calls.get_mut(handle as usize) {
        Some(slot) => slot.take().expect("runtime call re-entered"),
        None => {
            log::error!("runtime call handle {handle} is not registered");
            return StepResult::Fatal(ExitReason::Unreachable { pc: sim.state.pc });
        }
    };

    // The return address is set as for a native call; the handler may
    // redirect by writing LR.
    sim.state.set_lr(sim.state.pc + RUNTIME_CALL_LENGTH);
    handler(sim, mem);
    sim.runtime_calls[handle as usize] = Some(handler);

    sim.state.pc = sim.state.lr();
    sim.state.pc_modified = true;
    StepResult::Continue
}

fn do_configure_cpu_features(
    sim: &mut Simulator,
    mem: &mut dyn MemoryAccess,
    opcode: u16,
) -> StepResult {
    // The list is byte elements terminated by the None sentinel.
    let mut offset = CPU_FEATURES_LIST_OFFSET;
    let mut parameters = CpuFeatures::none();
    loop {
        let addr = sim.state.pc + offset;
        let byte = match mem.read_u8(addr) {
            Ok(v) => v,
            Err(_) => return StepResult::Fatal(ExitReason::DataAbort { addr }),
        };
        offset += 1;
        if byte == CpuFeature::None as u8 {
            break;
        }
        match CpuFeature::from_byte(byte) {
            Some(feature) => parameters.combine(feature),
            None => log::warn!("unknown feature byte 0x{byte:02x} in feature list"),
        }
    }

    match opcode {
        HLT_SET_CPU_FEATURES => sim.cpu_features = parameters,
        HLT_ENABLE_CPU_FEATURES => sim.cpu_features.combine_all(parameters),
        _ => sim.cpu_features.remove_all(parameters),
    }

    skip_payload(sim, align_up(offset, INSTRUCTION_SIZE));
    StepResult::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::PacKey;

    fn sim() -> Simulator {
        Simulator::new(CpuFeatures::all())
    }

    #[test]
    fn test_jrand48_matches_lcg() {
        let mut state = [11u16, 22, 33];
        let x0 = ((33u64) << 32) | ((22u64) << 16) | 11;
        let x1 = x0.wrapping_mul(0x5DEE_CE66D).wrapping_add(0xB) & 0xFFFF_FFFF_FFFF;
        assert_eq!(jrand48(&mut state), x1 >> 16);
        // State advanced in place.
        let x2 = x1.wrapping_mul(0x5DEE_CE66D).wrapping_add(0xB) & 0xFFFF_FFFF_FFFF;
        assert_eq!(jrand48(&mut state), x2 >> 16);
    }

    #[test]
    fn test_cfinv_inverts_carry() {
        let mut s = sim();
        assert!(!s.state.nzcv.c());
        exec_cfinv(&mut s);
        assert!(s.state.nzcv.c());
        exec_cfinv(&mut s);
        assert!(!s.state.nzcv.c());
    }

    #[test]
    fn test_axflag_xaflag() {
        // FP "greater than" (C set) converts to Arm-style and back.
        let mut s = sim();
        s.state.nzcv.set_nibble(0b0010);
        exec_axflag(&mut s);
        assert_eq!(s.state.nzcv.nibble(), 0b0010);

        // Unordered (C and V) collapses to C under AXFLAG.
        s.state.nzcv.set_nibble(0b0011);
        exec_axflag(&mut s);
        assert_eq!(s.state.nzcv.nibble(), 0b0100); // Z from V

        // XAFLAG of "equal" (Z:C) keeps Z and C.
        s.state.nzcv.set_nibble(0b0110);
        exec_xaflag(&mut s);
        assert_eq!(s.state.nzcv.nibble(), 0b0110);
        // XAFLAG of all-clear yields N.
        s.state.nzcv.set_nibble(0b0000);
        exec_xaflag(&mut s);
        assert_eq!(s.state.nzcv.nibble(), 0b1000);
    }

    #[test]
    fn test_pac_hint_round_trip() {
        let mut s = sim();
        s.state.set_sp(0x7000);
        s.state.write_x(30, 0x4000, Reg31Mode::ZeroRegister, RegLog::Log);
        exec_pac_hint(&mut s, false, PacKey::IA, 30, crate::inst::PacModifier::Sp);
        let signed = s.state.read_x(30, Reg31Mode::ZeroRegister);
        assert_ne!(signed, 0x4000);
        exec_pac_hint(&mut s, true, PacKey::IA, 30, crate::inst::PacModifier::Sp);
        assert_eq!(s.state.read_x(30, Reg31Mode::ZeroRegister), 0x4000);
    }

    #[test]
    fn test_xpaclri_strips_lr() {
        let mut s = sim();
        s.state.set_lr(0x4000 | (0x3F << 48));
        exec_xpaclri(&mut s);
        assert_eq!(s.state.lr(), 0x4000);
    }
}
