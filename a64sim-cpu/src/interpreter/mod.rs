// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The execution core: a fetch-execute driver over pre-decoded
//! instructions, dispatching to the per-group execution modules.

pub mod alu;
pub mod branch;
pub mod fp;
pub mod mem;
pub mod pac;
pub mod simd;
pub mod sve;
pub mod system;

use a64sim_common::{align_down, CpuFeature, CpuFeatures, VAddr, INSTRUCTION_SIZE, VL_MAX_BITS, VL_MIN_BITS};

use crate::inst::{Decoder, Instruction, PointerType};
use crate::memory::MemoryAccess;
use crate::monitor::ExclusiveMonitor;
use crate::state::{
    BType, CpuState, Reg31Mode, RegLog, END_OF_SIM_ADDRESS, NUM_PREGISTERS, NUM_REGISTERS,
    NUM_VREGISTERS,
};
use crate::trace::{Trace, TraceParams};

/// Why `run` stopped. Architectural corner cases never appear here; the
/// fatal categories carry the faulting location for the host's report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The program returned to the end-of-simulation sentinel.
    Done,
    /// An SVC was executed; the PC has advanced past it.
    Svc { pc: VAddr, imm: u16 },
    /// BRK, or an HLT immediate with no host service attached.
    Breakpoint { pc: VAddr, imm: u16 },
    DataAbort { addr: VAddr },
    InstructionAbort { addr: VAddr },
    /// SP-based access with a misaligned stack pointer.
    StackAlignment { addr: VAddr },
    /// Atomic access crossing a 16-byte line.
    AtomicAlignment { addr: VAddr },
    /// Pointer authentication left the diagnostic bits set.
    AuthFailure { pc: VAddr, addr: u64 },
    /// A BTI landing pad rejected the incoming branch type.
    BtiViolation { pc: VAddr, btype: BType },
    /// The decoder dispatched an undefined encoding.
    Unallocated { pc: VAddr, raw: u32 },
    /// A corner the core does not model yet.
    Unimplemented { pc: VAddr, raw: u32 },
    /// The architected permanently-undefined instruction.
    Udf { pc: VAddr, raw: u32 },
    /// The unreachable-marker host trap.
    Unreachable { pc: VAddr },
}

impl ExitReason {
    /// True for the categories that indicate a simulation error rather
    /// than a cooperative stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExitReason::Done | ExitReason::Svc { .. } | ExitReason::Breakpoint { .. })
    }
}

/// Result of one instruction execution.
pub(crate) enum StepResult {
    /// Advance sequentially unless the instruction moved the PC.
    Continue,
    /// Stop the driver loop with the given reason.
    Fatal(ExitReason),
}

/// Host callback invoked by the runtime-call trap.
pub type RuntimeCallHandler = Box<dyn FnMut(&mut Simulator, &mut dyn MemoryAccess) + Send>;

/// Default protection pad at each end of the configured stack region.
pub const STACK_PROTECTION_SIZE: u64 = 0x1000;

/// The instruction interpreter: owns all register state, the exclusive
/// monitors, the trace writer and the feature set. The decoder and the
/// memory image are borrowed per run and never owned.
pub struct Simulator {
    pub state: CpuState,
    pub(crate) trace: Trace,
    pub(crate) local_monitor: ExclusiveMonitor,
    pub(crate) global_monitor: ExclusiveMonitor,
    pub(crate) guard_pages: bool,
    pub(crate) cpu_features: CpuFeatures,
    pub(crate) saved_cpu_features: Vec<CpuFeatures>,
    pub(crate) runtime_calls: Vec<Option<RuntimeCallHandler>>,
    movprfx_active: bool,
    has_run: bool,
    stack_region: Option<(VAddr, u64)>,
}

impl Simulator {
    pub fn new(cpu_features: CpuFeatures) -> Self {
        Simulator {
            state: CpuState::new(VL_MIN_BITS),
            trace: Trace::disabled(),
            local_monitor: ExclusiveMonitor::new(),
            global_monitor: ExclusiveMonitor::new(),
            guard_pages: false,
            cpu_features,
            saved_cpu_features: Vec::new(),
            runtime_calls: Vec::new(),
            movprfx_active: false,
            has_run: false,
            stack_region: None,
        }
    }

    /// Route trace output to the given sink.
    pub fn set_trace_sink(&mut self, sink: Box<dyn std::io::Write + Send>) {
        let params = self.trace.params();
        self.trace = Trace::new(sink);
        self.trace.set_params(params);
    }

    pub fn set_trace_params(&mut self, params: TraceParams) {
        self.trace.set_params(params);
    }

    pub fn trace_params(&self) -> TraceParams {
        self.trace.params()
    }

    pub fn cpu_features(&self) -> CpuFeatures {
        self.cpu_features
    }

    /// Mark the emulated text as guarded, enabling BTI checking.
    pub fn set_guard_pages(&mut self, value: bool) {
        self.guard_pages = value;
    }

    /// Whether the one-instruction MOVPRFX latch is currently set.
    pub fn movprfx_latched(&self) -> bool {
        self.movprfx_active
    }

    /// Register a host callback for the runtime-call trap; the returned
    /// handle is what the inline payload names.
    pub fn register_runtime_call(&mut self, handler: RuntimeCallHandler) -> u32 {
        self.runtime_calls.push(Some(handler));
        (self.runtime_calls.len() - 1) as u32
    }

    /// Change the vector length. Only allowed before the first run, and
    /// only when SVE is available; resets the V and P registers.
    pub fn set_vector_length(&mut self, vl_bits: u32) -> bool {
        let valid = (VL_MIN_BITS..=VL_MAX_BITS).contains(&vl_bits) && vl_bits % VL_MIN_BITS == 0;
        let allowed = vl_bits == VL_MIN_BITS || self.cpu_features.has(CpuFeature::Sve);
        if self.has_run || !valid || !allowed {
            return false;
        }
        self.state.set_vl_bits(vl_bits);
        true
    }

    /// Describe the stack region inside the memory image. SP is placed
    /// 16-byte aligned just below the top protection pad.
    pub fn configure_stack(&mut self, base: VAddr, size: u64) {
        debug_assert!(size > 2 * STACK_PROTECTION_SIZE);
        self.stack_region = Some((base, size));
        let tos = base + size - STACK_PROTECTION_SIZE;
        self.state.set_sp(align_down(tos, 16));
    }

    /// Reset all register state to the diagnostic seeds; keeps the
    /// configured VL and stack.
    pub fn reset(&mut self) {
        self.state.reset();
        self.local_monitor.clear();
        self.global_monitor.clear();
        self.movprfx_active = false;
        if let Some((base, size)) = self.stack_region {
            let tos = base + size - STACK_PROTECTION_SIZE;
            self.state.set_sp(align_down(tos, 16));
        }
    }

    /// Run from the current PC until the end sentinel or a stop.
    pub fn run(&mut self, decoder: &dyn Decoder, memory: &mut dyn MemoryAccess) -> ExitReason {
        self.has_run = true;
        // Flush manually-set registers so they are logged before the
        // first instruction.
        self.log_written_registers();

        loop {
            if self.state.pc == END_OF_SIM_ADDRESS {
                return ExitReason::Done;
            }
            let raw = match mem::fetch_instruction(memory, self.state.pc) {
                Ok(word) => word,
                Err(reason) => {
                    self.report_fatal(reason, 0);
                    return reason;
                }
            };
            let inst = decoder.decode(raw);
            self.state.pc_modified = false;

            let result = self.execute(memory, &inst);
            match result {
                StepResult::Continue => {
                    if !self.state.pc_modified {
                        self.state.pc += INSTRUCTION_SIZE;
                    } else if self.trace.enabled(TraceParams::BRANCH) {
                        self.trace.log_branch(self.state.pc);
                    }
                }
                StepResult::Fatal(reason) => {
                    if let ExitReason::Svc { .. } = reason {
                        // Resume past the SVC on re-entry.
                        self.state.pc += INSTRUCTION_SIZE;
                    } else if reason.is_fatal() {
                        self.report_fatal(reason, raw);
                    }
                    return reason;
                }
            }

            // The MOVPRFX latch lives for exactly one following
            // instruction.
            self.movprfx_active = matches!(inst, Instruction::SveMovprfx { .. });

            // The branch-target state written by this instruction
            // becomes current for its successor.
            self.state.btype = self.state.next_btype;
            self.state.next_btype = BType::Default;

            self.log_written_registers();
        }
    }

    /// Set the PC and run.
    pub fn run_from(
        &mut self,
        decoder: &dyn Decoder,
        memory: &mut dyn MemoryAccess,
        entry: VAddr,
    ) -> ExitReason {
        self.state.pc = entry;
        self.run(decoder, memory)
    }

    fn report_fatal(&mut self, reason: ExitReason, raw: u32) {
        log::error!(
            "simulation stopped: {:?} at pc 0x{:016x} (opcode 0x{raw:08x})",
            reason,
            self.state.pc
        );
        self.dump_registers(TraceParams::STATE);
    }

    /// Print whole register banks to the trace sink, selected by the
    /// category mask. Used by the log trap and fatal reports.
    pub(crate) fn dump_registers(&mut self, banks: TraceParams) {
        let saved = self.trace.params();
        self.trace.set_params(saved | banks);
        if banks.intersects(TraceParams::REGS) {
            for i in 0..NUM_REGISTERS as u8 {
                let value = self.state.read_x(i, Reg31Mode::ZeroRegister);
                self.trace.log_xreg(i, value);
            }
            self.trace.log_sp(self.state.sp());
        }
        if banks.intersects(TraceParams::VREGS) {
            for i in 0..NUM_VREGISTERS as u8 {
                self.trace.log_vreg(i, self.state.read_q(i));
            }
        }
        if banks.intersects(TraceParams::PREGS) {
            let pl = self.state.pl_bytes();
            for i in 0..NUM_PREGISTERS as u8 {
                let bytes: Vec<u8> = self.state.preg(i).byte_slice(pl).to_vec();
                self.trace.log_preg(i, &bytes);
            }
        }
        if banks.intersects(TraceParams::SYSREGS) {
            self.trace.log_sysreg("nzcv", self.state.nzcv.raw());
            self.trace.log_sysreg("fpcr", self.state.fpcr.raw());
        }
        self.trace.set_params(saved);
    }

    /// Drain the written-since-last-log markers into trace lines.
    fn log_written_registers(&mut self) {
        if !self.trace.enabled(TraceParams::STATE) {
            let _ = self.state.take_written();
            return;
        }
        let (x, v, p, nzcv, fpcr) = self.state.take_written();
        for (i, written) in x.iter().enumerate().take(NUM_REGISTERS) {
            if *written {
                let value = self.state.read_x(i as u8, Reg31Mode::ZeroRegister);
                self.trace.log_xreg(i as u8, value);
            }
        }
        if x[NUM_REGISTERS] {
            self.trace.log_sp(self.state.sp());
        }
        for (i, written) in v.iter().enumerate() {
            if *written {
                self.trace.log_vreg(i as u8, self.state.read_q(i as u8));
            }
        }
        let pl = self.state.pl_bytes();
        for (i, written) in p.iter().enumerate() {
            if *written {
                let bytes: Vec<u8> = self.state.preg(i as u8).byte_slice(pl).to_vec();
                self.trace.log_preg(i as u8, &bytes);
            }
        }
        if nzcv {
            self.trace.log_sysreg("nzcv", self.state.nzcv.raw());
        }
        if fpcr {
            self.trace.log_sysreg("fpcr", self.state.fpcr.raw());
        }
    }

    /// Execute one decoded instruction against the machine state.
    pub(crate) fn execute(&mut self, memory: &mut dyn MemoryAccess, inst: &Instruction) -> StepResult {
        use Instruction::*;
        let state = &mut self.state;
        match *inst {
            Adr { rd, imm } => alu::exec_adr(state, rd, false, imm),
            Adrp { rd, imm } => alu::exec_adr(state, rd, true, imm),

            AddSubImm { sf, sub, set_flags, rd, rn, imm12, shift12 } => {
                alu::exec_add_sub_imm(state, sf, sub, set_flags, rd, rn, imm12, shift12)
            }
            AddSubShifted { sf, sub, set_flags, rd, rn, rm, shift, amount } => {
                alu::exec_add_sub_shifted(state, sf, sub, set_flags, rd, rn, rm, shift, amount)
            }
            AddSubExtended { sf, sub, set_flags, rd, rn, rm, extend, left_shift } => {
                alu::exec_add_sub_extended(state, sf, sub, set_flags, rd, rn, rm, extend, left_shift)
            }
            AddSubWithCarry { sf, sub, set_flags, rd, rn, rm } => {
                alu::exec_add_sub_with_carry(state, sf, sub, set_flags, rd, rn, rm)
            }

            LogicalImm { sf, opc, rd, rn, imm } => alu::exec_logical_imm(state, sf, opc, rd, rn, imm),
            LogicalShifted { sf, opc, invert, rd, rn, rm, shift, amount } => {
                alu::exec_logical_shifted(state, sf, opc, invert, rd, rn, rm, shift, amount)
            }

            CondCompare { sf, negate, rn, rm_or_imm, is_imm, cond, nzcv } => {
                alu::exec_cond_compare(state, sf, negate, rn, rm_or_imm, is_imm, cond, nzcv)
            }
            CondSelect { sf, rd, rn, rm, cond, op2 } => {
                alu::exec_cond_select(state, sf, rd, rn, rm, cond, op2)
            }

            MovWide { sf, opc, rd, imm16, hw } => alu::exec_mov_wide(state, sf, opc, rd, imm16, hw),
            Bitfield { sf, opc, rd, rn, immr, imms } => {
                alu::exec_bitfield(state, sf, opc, rd, rn, immr, imms)
            }
            Extract { sf, rd, rn, rm, lsb } => alu::exec_extract(state, sf, rd, rn, rm, lsb),

            Clz { sf, rd, rn } => alu::exec_clz(state, sf, rd, rn),
            Cls { sf, rd, rn } => alu::exec_cls(state, sf, rd, rn),
            Rbit { sf, rd, rn } => alu::exec_rbit(state, sf, rd, rn),
            Rev { sf, rd, rn, opc } => alu::exec_rev(state, sf, rd, rn, opc),

            PacAdd { rd, rn, key, zero_modifier } => {
                let modifier = if zero_modifier {
                    0
                } else {
                    state.read_x(rn, Reg31Mode::StackPointer)
                };
                let ptr = state.read_x(rd, Reg31Mode::ZeroRegister);
                let ptr_type = pac_pointer_type(key);
                let result = pac::add_pac(ptr, modifier, key, ptr_type);
                state.write_x(rd, result, Reg31Mode::ZeroRegister, RegLog::Log);
                StepResult::Continue
            }
            PacAuth { rd, rn, key, zero_modifier } => {
                let modifier = if zero_modifier {
                    0
                } else {
                    state.read_x(rn, Reg31Mode::StackPointer)
                };
                let ptr = state.read_x(rd, Reg31Mode::ZeroRegister);
                let ptr_type = pac_pointer_type(key);
                let result = pac::auth_pac(ptr, modifier, key, ptr_type);
                state.write_x(rd, result, Reg31Mode::ZeroRegister, RegLog::Log);
                StepResult::Continue
            }
            PacStrip { rd, data } => {
                let ptr_type = if data { PointerType::Data } else { PointerType::Instruction };
                let ptr = state.read_x(rd, Reg31Mode::ZeroRegister);
                state.write_x(rd, pac::strip_pac(ptr, ptr_type), Reg31Mode::ZeroRegister, RegLog::Log);
                StepResult::Continue
            }

            Div { sf, signed, rd, rn, rm } => alu::exec_div(state, sf, signed, rd, rn, rm),
            VarShift { sf, rd, rn, rm, shift } => alu::exec_var_shift(state, sf, rd, rn, rm, shift),
            Crc32 { sz, castagnoli, rd, rn, rm } => {
                alu::exec_crc32(state, sz, castagnoli, rd, rn, rm)
            }
            PacGa { rd, rn, rm } => {
                let src = state.read_x(rn, Reg31Mode::ZeroRegister);
                let modifier = state.read_x(rm, Reg31Mode::StackPointer);
                let code = pac::compute_pac(src, modifier, pac::key_value(crate::inst::PacKey::GA));
                state.write_x(rd, code & 0xFFFF_FFFF_0000_0000, Reg31Mode::ZeroRegister, RegLog::Log);
                StepResult::Continue
            }
            MulAdd { sf, sub, rd, rn, rm, ra } => alu::exec_mul_add(state, sf, sub, rd, rn, rm, ra),
            MulAddLong { signed, sub, rd, rn, rm, ra } => {
                alu::exec_mul_add_long(state, signed, sub, rd, rn, rm, ra)
            }
            MulHigh { signed, rd, rn, rm } => alu::exec_mul_high(state, signed, rd, rn, rm),

            Rmif { rn, rotation, mask } => alu::exec_rmif(state, rn, rotation, mask),
            SetF { sixteen_bit, rn } => alu::exec_setf(state, sixteen_bit, rn),
            Cfinv => system::exec_cfinv(self),
            AxFlag => system::exec_axflag(self),
            XaFlag => system::exec_xaflag(self),

            Branch { link, offset } => branch::exec_branch(state, link, offset),
            BranchCond { cond, offset } => branch::exec_branch_cond(state, cond, offset),
            CompareBranch { sf, nonzero, rt, offset } => {
                branch::exec_compare_branch(state, sf, nonzero, rt, offset)
            }
            TestBranch { nonzero, rt, bit, offset } => {
                branch::exec_test_branch(state, nonzero, rt, bit, offset)
            }
            BranchReg { op, rn, auth, rm } => {
                branch::exec_branch_reg(state, op, rn, auth, rm, self.guard_pages)
            }

            LoadStoreImm { size, load, sign_extend, to64, rt, rn, imm, mode } => {
                mem::exec_load_store_imm(self, memory, size, load, sign_extend, to64, rt, rn, imm, mode)
            }
            LoadStoreReg { size, load, sign_extend, to64, rt, rn, rm, extend, shift } => {
                mem::exec_load_store_reg(self, memory, size, load, sign_extend, to64, rt, rn, rm, extend, shift)
            }
            LoadLiteral { size, sign_extend, rt, offset } => {
                mem::exec_load_literal(self, memory, size, sign_extend, rt, offset)
            }
            LoadStorePair { size, load, sign_extend, rt, rt2, rn, imm, mode } => {
                mem::exec_load_store_pair(self, memory, size, load, sign_extend, rt, rt2, rn, imm, mode)
            }
            LoadStoreSimd { size, load, rt, rn, imm, mode } => {
                mem::exec_load_store_simd(self, memory, size, load, rt, rn, imm, mode)
            }
            LoadStorePairSimd { size, load, rt, rt2, rn, imm, mode } => {
                mem::exec_load_store_pair_simd(self, memory, size, load, rt, rt2, rn, imm, mode)
            }
            LoadPacIndexed { key, rt, rn, imm, writeback } => {
                mem::exec_load_pac_indexed(self, memory, key, rt, rn, imm, writeback)
            }
            LoadStoreExclusive { size, load, exclusive, acquire_release, pair, rs, rt, rt2, rn } => {
                mem::exec_load_store_exclusive(
                    self, memory, size, load, exclusive, acquire_release, pair, rs, rt, rt2, rn,
                )
            }
            Cas { size, acquire, release, pair, rs, rt, rn } => {
                mem::exec_cas(self, memory, size, acquire, release, pair, rs, rt, rn)
            }
            Swp { size, acquire, release, rs, rt, rn } => {
                mem::exec_swp(self, memory, size, acquire, release, rs, rt, rn)
            }
            AtomicRmw { size, op, acquire, release, rs, rt, rn } => {
                mem::exec_atomic_rmw(self, memory, size, op, acquire, release, rs, rt, rn)
            }
            LoadAcquireRcpc { size, load, sign_extend, to64, rt, rn, imm } => {
                mem::exec_load_acquire_rcpc(self, memory, size, load, sign_extend, to64, rt, rn, imm)
            }

            FpImmediate { fp_type, rd, imm } => fp::exec_fp_immediate(state, fp_type, rd, imm),
            FpMovReg { fp_type, rd, rn } => fp::exec_fp_mov_reg(state, fp_type, rd, rn),
            FpMovGp { fp_type, to_fp, sf, top_half, rd, rn } => {
                fp::exec_fp_mov_gp(state, fp_type, to_fp, sf, top_half, rd, rn)
            }
            FpUnary { fp_type, op, rd, rn } => fp::exec_fp_unary(state, fp_type, op, rd, rn),
            FpConvert { dst, src, rd, rn } => fp::exec_fp_convert(state, dst, src, rd, rn),
            FpRound { fp_type, rounding, exact, rd, rn } => {
                fp::exec_fp_round(state, fp_type, rounding, exact, rd, rn)
            }
            FpBinary { fp_type, op, rd, rn, rm } => fp::exec_fp_binary(state, fp_type, op, rd, rn, rm),
            FpFma { fp_type, negate_product, negate_addend, rd, rn, rm, ra } => {
                fp::exec_fp_fma(state, fp_type, negate_product, negate_addend, rd, rn, rm, ra)
            }
            FpCompare { fp_type, rn, rm, with_zero } => {
                fp::exec_fp_compare(state, fp_type, rn, rm, with_zero)
            }
            FpCondCompare { fp_type, rn, rm, cond, nzcv } => {
                fp::exec_fp_cond_compare(state, fp_type, rn, rm, cond, nzcv)
            }
            FpCondSelect { fp_type, rd, rn, rm, cond } => {
                fp::exec_fp_cond_select(state, fp_type, rd, rn, rm, cond)
            }
            FpToInt { fp_type, sf, unsigned, rounding, rd, rn } => {
                fp::exec_fp_to_int(state, fp_type, sf, unsigned, rounding, rd, rn)
            }
            IntToFp { fp_type, sf, unsigned, rd, rn } => {
                fp::exec_int_to_fp(state, fp_type, sf, unsigned, rd, rn)
            }
            FpToFixed { fp_type, sf, unsigned, fbits, rd, rn } => {
                fp::exec_fp_to_fixed(state, fp_type, sf, unsigned, fbits, rd, rn)
            }
            FixedToFp { fp_type, sf, unsigned, fbits, rd, rn } => {
                fp::exec_fixed_to_fp(state, fp_type, sf, unsigned, fbits, rd, rn)
            }
            FpToJsInt { rd, rn } => fp::exec_fp_to_js_int(state, rd, rn),

            SimdInt3Same { vform, op, rd, rn, rm } => {
                simd::exec_simd_int_3same(state, vform, op, rd, rn, rm)
            }
            SimdBitwise3Same { q, op, rd, rn, rm } => {
                simd::exec_simd_bitwise_3same(state, q, op, rd, rn, rm)
            }
            SimdFp3Same { vform, op, rd, rn, rm } => {
                simd::exec_simd_fp_3same(state, vform, op, rd, rn, rm)
            }
            SimdUnary { vform, op, upper, rd, rn } => {
                simd::exec_simd_unary(state, vform, op, upper, rd, rn)
            }
            SimdAcross { vform, op, rd, rn } => simd::exec_simd_across(state, vform, op, rd, rn),
            Simd3Diff { vform, op, upper, rd, rn, rm } => {
                simd::exec_simd_3diff(state, vform, op, upper, rd, rn, rm)
            }
            SimdShiftImm { vform, op, shift, upper, rd, rn } => {
                simd::exec_simd_shift_imm(state, vform, op, shift, upper, rd, rn)
            }
            SimdCopy { op, q, esize, dst_lane, src_lane, rd, rn } => {
                simd::exec_simd_copy(state, op, q, esize, dst_lane, src_lane, rd, rn)
            }
            SimdModImm { q, op, vform, imm, rd } => {
                simd::exec_simd_mod_imm(state, q, op, vform, imm, rd)
            }
            SimdPermute { vform, op, rd, rn, rm } => {
                simd::exec_simd_permute(state, vform, op, rd, rn, rm)
            }
            SimdExt { q, index, rd, rn, rm } => simd::exec_simd_ext(state, q, index, rd, rn, rm),
            SimdTbl { q, len, extension, rd, rn, rm } => {
                simd::exec_simd_tbl(state, q, len, extension, rd, rn, rm)
            }
            SimdMulElement { vform, op, rd, rn, rm, lane } => {
                simd::exec_simd_mul_element(state, vform, op, rd, rn, rm, lane)
            }

            SveIndex { vform, zd, start_reg, start_imm, step_reg, step_imm } => {
                let start = match start_reg {
                    Some(r) => state.read_x(r, Reg31Mode::ZeroRegister),
                    None => start_imm as u64,
                };
                let step = match step_reg {
                    Some(r) => state.read_x(r, Reg31Mode::ZeroRegister),
                    None => step_imm as u64,
                };
                sve::exec_sve_index(state, vform, zd, start, step)
            }
            SveDupImm { vform, zd, imm } => sve::exec_sve_dup_imm(state, vform, zd, imm),
            SveDupScalar { vform, zd, rn } => sve::exec_sve_dup_scalar(state, vform, zd, rn),
            SveDupElement { vform, zd, zn, lane } => {
                sve::exec_sve_dup_element(state, vform, zd, zn, lane)
            }
            SveInsr { vform, zd, rn, from_simd } => {
                let value = if from_simd {
                    state.read_lane(rn, 0, vform.lane_bits())
                } else {
                    state.read_x(rn, Reg31Mode::ZeroRegister)
                };
                sve::exec_sve_insr(state, vform, zd, value)
            }
            SveUnpk { signed, high, vform_dst, zd, zn } => {
                sve::exec_sve_unpk(state, signed, high, vform_dst, zd, zn)
            }
            SveSel { vform, zd, pg, zn, zm } => sve::exec_sve_sel(state, vform, zd, pg, zn, zm),
            SveBin { vform, op, zdn, pg, zm } => sve::exec_sve_bin(state, vform, op, zdn, pg, zm),
            SveAddSubVec { vform, sub, zd, zn, zm } => {
                sve::exec_sve_add_sub_vec(state, vform, sub, zd, zn, zm)
            }
            SveMovprfx { predicated, merging, vform, zd, pg, zn } => {
                sve::exec_sve_movprfx(state, predicated, merging, vform, zd, pg, zn)
            }
            SvePtrue { vform, pd, pattern, set_flags } => {
                sve::exec_sve_ptrue(state, vform, pd, pattern, set_flags)
            }
            SvePfalse { pd } => sve::exec_sve_pfalse(state, pd),
            SvePtest { pg, pn } => sve::exec_sve_ptest(state, pg, pn),
            SvePredLogical { op, set_flags, pd, pg, pn, pm } => {
                sve::exec_sve_pred_logical(state, op, set_flags, pd, pg, pn, pm)
            }
            SveWhile { vform, cond, sf, pd, rn, rm } => {
                sve::exec_sve_while(state, vform, cond, sf, pd, rn, rm)
            }
            SveCterm { ne, sf, rn, rm } => sve::exec_sve_cterm(state, ne, sf, rn, rm),
            SveCmpVec { vform, cond, wide, pd, pg, zn, zm } => {
                sve::exec_sve_cmp_vec(state, vform, cond, wide, pd, pg, zn, zm)
            }
            SveCmpImm { vform, cond, pd, pg, zn, imm } => {
                sve::exec_sve_cmp_imm(state, vform, cond, pd, pg, zn, imm)
            }
            SveIncDecReg { vform, decrement, saturating, signed, sf, rdn, pg } => {
                sve::exec_sve_inc_dec_reg(state, vform, decrement, saturating, signed, sf, rdn, pg)
            }
            SveIncDecVec { vform, decrement, saturating, signed, zdn, pg } => {
                sve::exec_sve_inc_dec_vec(state, vform, decrement, saturating, signed, zdn, pg)
            }
            SveCntp { vform, rd, pg, pn } => sve::exec_sve_cntp(state, vform, rd, pg, pn),
            SveRdvl { rd, scale } => sve::exec_sve_rdvl(state, rd, scale),
            SveAddvl { rd, rn, scale } => sve::exec_sve_addvl(state, rd, rn, scale),
            SveAddpl { rd, rn, scale } => sve::exec_sve_addpl(state, rd, rn, scale),
            SveLdrZ { zt, rn } => sve::exec_sve_ldr_z(self, memory, zt, rn),
            SveStrZ { zt, rn } => sve::exec_sve_str_z(self, memory, zt, rn),
            SveLdrP { pt, rn } => sve::exec_sve_ldr_p(self, memory, pt, rn),
            SveStrP { pt, rn } => sve::exec_sve_str_p(self, memory, pt, rn),

            Mrs { rt, reg } => system::exec_mrs(self, rt, reg),
            Msr { rt, reg } => system::exec_msr(self, rt, reg),
            SysHint(hint) => system::exec_hint(self, hint),
            Barrier => system::exec_barrier(),
            Clrex => system::exec_clrex(self),
            Sys { op, rt } => system::exec_sys(self, op, rt),
            XpacLri => system::exec_xpaclri(self),
            PacHint { auth, key, rd, modifier } => {
                system::exec_pac_hint(self, auth, key, rd, modifier)
            }

            Hlt { imm } => system::exec_hlt(self, memory, imm),
            Brk { imm } => StepResult::Fatal(ExitReason::Breakpoint { pc: self.state.pc, imm }),
            Svc { imm } => StepResult::Fatal(ExitReason::Svc { pc: self.state.pc, imm }),
            Udf { raw } => StepResult::Fatal(ExitReason::Udf { pc: self.state.pc, raw }),

            Unallocated { raw } => {
                StepResult::Fatal(ExitReason::Unallocated { pc: self.state.pc, raw })
            }
            Unimplemented { raw } => {
                StepResult::Fatal(ExitReason::Unimplemented { pc: self.state.pc, raw })
            }
        }
    }
}

fn pac_pointer_type(key: crate::inst::PacKey) -> PointerType {
    match key {
        crate::inst::PacKey::IA | crate::inst::PacKey::IB => PointerType::Instruction,
        _ => PointerType::Data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{
        AddrMode, AtomicOp, Condition, Hint, PacKey, PredPattern, ShiftType, SveBinOp,
        VectorFormat,
    };
    use crate::memory::FlatMemory;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    const BASE: VAddr = 0x1000;
    const DATA: VAddr = 0x8000;

    /// Table-backed stand-in for the external decoder: each program slot
    /// gets a unique raw word mapping to its prebuilt instruction.
    struct MapDecoder(HashMap<u32, Instruction>);

    impl Decoder for MapDecoder {
        fn decode(&self, raw: u32) -> Instruction {
            self.0.get(&raw).cloned().unwrap_or(Instruction::Unallocated { raw })
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn setup(program: &[Instruction]) -> (Simulator, FlatMemory, MapDecoder) {
        let mut memory = FlatMemory::new(0, 0x1_0000);
        let mut map = HashMap::new();
        for (i, inst) in program.iter().enumerate() {
            let raw = 0xE000_0000 + i as u32;
            memory.write_inst(BASE + 4 * i as u64, raw);
            map.insert(raw, inst.clone());
        }
        let mut sim = Simulator::new(CpuFeatures::all());
        sim.state.pc = BASE;
        (sim, memory, MapDecoder(map))
    }

    fn movz(rd: u8, imm16: u16) -> Instruction {
        Instruction::MovWide { sf: true, opc: 0b10, rd, imm16, hw: 0 }
    }

    fn ret() -> Instruction {
        Instruction::BranchReg { op: 2, rn: 30, auth: None, rm: 0 }
    }

    fn svc() -> Instruction {
        Instruction::Svc { imm: 0 }
    }

    fn set_x(sim: &mut Simulator, code: u8, value: u64) {
        sim.state.write_x(code, value, Reg31Mode::ZeroRegister, RegLog::Log);
    }

    fn x(sim: &Simulator, code: u8) -> u64 {
        sim.state.read_x(code, Reg31Mode::ZeroRegister)
    }

    #[test]
    fn test_run_simple_program() {
        // MOV X0, #42; RET exits via the reset LR sentinel.
        let (mut sim, mut memory, decoder) = setup(&[movz(0, 42), ret()]);
        let reason = sim.run(&decoder, &mut memory);
        assert_eq!(reason, ExitReason::Done);
        assert_eq!(x(&sim, 0), 42);
    }

    #[test]
    fn test_run_loop_with_flags() {
        // X0 = 3; loop: SUBS X0, X0, #1; B.NE loop; SVC.
        let (mut sim, mut memory, decoder) = setup(&[
            movz(0, 3),
            Instruction::AddSubImm {
                sf: true,
                sub: true,
                set_flags: true,
                rd: 0,
                rn: 0,
                imm12: 1,
                shift12: false,
            },
            Instruction::BranchCond { cond: Condition::Ne, offset: -4 },
            svc(),
        ]);
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { imm: 0, .. }));
        assert_eq!(x(&sim, 0), 0);
        assert!(sim.state.nzcv.z());
        // The SVC exit leaves the PC past the SVC for resumption.
        assert_eq!(sim.state.pc, BASE + 16);
    }

    #[test]
    fn test_instruction_abort() {
        let (mut sim, mut memory, decoder) = setup(&[]);
        sim.state.pc = 0xFFFF_0000;
        let reason = sim.run(&decoder, &mut memory);
        assert_eq!(reason, ExitReason::InstructionAbort { addr: 0xFFFF_0000 });
    }

    #[test]
    fn test_unallocated_is_fatal() {
        let mut memory = FlatMemory::new(0, 0x1_0000);
        memory.write_inst(BASE, 0x1234_5678);
        let decoder = MapDecoder(HashMap::new());
        let mut sim = Simulator::new(CpuFeatures::all());
        sim.state.pc = BASE;
        let reason = sim.run(&decoder, &mut memory);
        assert_eq!(reason, ExitReason::Unallocated { pc: BASE, raw: 0x1234_5678 });
        assert!(reason.is_fatal());
    }

    #[test]
    fn test_udf_and_brk_and_unreachable() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Udf { raw: 0 }]);
        assert_eq!(sim.run(&decoder, &mut memory), ExitReason::Udf { pc: BASE, raw: 0 });

        let (mut sim, mut memory, decoder) = setup(&[Instruction::Brk { imm: 7 }]);
        assert_eq!(
            sim.run(&decoder, &mut memory),
            ExitReason::Breakpoint { pc: BASE, imm: 7 }
        );

        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_UNREACHABLE }]);
        assert_eq!(sim.run(&decoder, &mut memory), ExitReason::Unreachable { pc: BASE });
    }

    // -- Loads, stores and addressing modes ---------------------------------

    #[test]
    fn test_load_store_round_trip() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::LoadStoreImm {
                size: 3,
                load: false,
                sign_extend: false,
                to64: false,
                rt: 0,
                rn: 2,
                imm: 0,
                mode: AddrMode::Offset,
            },
            Instruction::LoadStoreImm {
                size: 3,
                load: true,
                sign_extend: false,
                to64: false,
                rt: 1,
                rn: 2,
                imm: 0,
                mode: AddrMode::Offset,
            },
            svc(),
        ]);
        set_x(&mut sim, 0, 0xDEAD_BEEF_CAFE_F00D);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 1), 0xDEAD_BEEF_CAFE_F00D);
        assert_eq!(memory.read_u64(DATA).unwrap(), 0xDEAD_BEEF_CAFE_F00D);
    }

    #[test]
    fn test_sign_extending_load() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::LoadStoreImm {
                size: 0,
                load: true,
                sign_extend: true,
                to64: true,
                rt: 0,
                rn: 2,
                imm: 0,
                mode: AddrMode::Offset,
            },
            svc(),
        ]);
        memory.write_u8(DATA, 0x80).unwrap();
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 0), 0xFFFF_FFFF_FFFF_FF80);
    }

    #[test]
    fn test_pre_and_post_index() {
        let (mut sim, mut memory, decoder) = setup(&[
            // Pre-index: write-back before the access.
            Instruction::LoadStoreImm {
                size: 2,
                load: true,
                sign_extend: false,
                to64: false,
                rt: 0,
                rn: 2,
                imm: 4,
                mode: AddrMode::PreIndex,
            },
            // Post-index: access first.
            Instruction::LoadStoreImm {
                size: 2,
                load: true,
                sign_extend: false,
                to64: false,
                rt: 1,
                rn: 2,
                imm: 8,
                mode: AddrMode::PostIndex,
            },
            svc(),
        ]);
        memory.write_u32(DATA + 4, 0x11).unwrap();
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 0), 0x11);
        // Post-index read the same address, then moved the base.
        assert_eq!(x(&sim, 1), 0x11);
        assert_eq!(x(&sim, 2), DATA + 12);
    }

    #[test]
    fn test_pair_store_same_register() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::LoadStorePair {
                size: 3,
                load: false,
                sign_extend: false,
                rt: 0,
                rt2: 0,
                rn: 2,
                imm: 0,
                mode: AddrMode::Offset,
            },
            svc(),
        ]);
        set_x(&mut sim, 0, 0x42);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(memory.read_u64(DATA).unwrap(), 0x42);
        assert_eq!(memory.read_u64(DATA + 8).unwrap(), 0x42);
    }

    #[test]
    fn test_load_literal() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::LoadLiteral { size: 3, sign_extend: false, rt: 0, offset: 0x100 },
            svc(),
        ]);
        memory.write_u64(BASE + 0x100, 0xABCD).unwrap();
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 0), 0xABCD);
    }

    #[test]
    fn test_stack_alignment_abort() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::LoadStoreImm {
            size: 3,
            load: true,
            sign_extend: false,
            to64: false,
            rt: 0,
            rn: 31,
            imm: 0,
            mode: AddrMode::Offset,
        }]);
        sim.state.set_sp(DATA + 1);
        let reason = sim.run(&decoder, &mut memory);
        assert_eq!(reason, ExitReason::StackAlignment { addr: DATA + 1 });
    }

    #[test]
    fn test_simd_load_store_q() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::LoadStoreSimd {
                size: 4,
                load: false,
                rt: 0,
                rn: 2,
                imm: 0,
                mode: AddrMode::Offset,
            },
            Instruction::LoadStoreSimd {
                size: 4,
                load: true,
                rt: 1,
                rn: 2,
                imm: 0,
                mode: AddrMode::Offset,
            },
            svc(),
        ]);
        sim.state.write_q(0, 0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00, RegLog::Log);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(sim.state.read_q(1), 0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00);
    }

    // -- Exclusives and atomics ---------------------------------------------

    fn ldxr(rt: u8, rn: u8) -> Instruction {
        Instruction::LoadStoreExclusive {
            size: 2,
            load: true,
            exclusive: true,
            acquire_release: false,
            pair: false,
            rs: 0,
            rt,
            rt2: 0,
            rn,
        }
    }

    fn stxr(rs: u8, rt: u8, rn: u8) -> Instruction {
        Instruction::LoadStoreExclusive {
            size: 2,
            load: false,
            exclusive: true,
            acquire_release: false,
            pair: false,
            rs,
            rt,
            rt2: 0,
            rn,
        }
    }

    #[test]
    fn test_ldxr_stxr_scenario() {
        // Scenario: LDXR reads the stored value, STXR succeeds, a second
        // STXR without a new LDXR fails.
        let (mut sim, mut memory, decoder) = setup(&[
            ldxr(1, 4),
            stxr(2, 3, 4),
            stxr(5, 3, 4),
            svc(),
        ]);
        memory.write_u32(DATA, 0xDEAD_BEEF).unwrap();
        set_x(&mut sim, 3, 0x1234);
        set_x(&mut sim, 4, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 1), 0xDEAD_BEEF);
        assert_eq!(x(&sim, 2), 0); // success
        assert_eq!(memory.read_u32(DATA).unwrap(), 0x1234);
        assert_eq!(x(&sim, 5), 1); // no monitor, fails
    }

    #[test]
    fn test_plain_store_clears_monitor() {
        let (mut sim, mut memory, decoder) = setup(&[
            ldxr(1, 4),
            Instruction::LoadStoreImm {
                size: 2,
                load: false,
                sign_extend: false,
                to64: false,
                rt: 3,
                rn: 4,
                imm: 0,
                mode: AddrMode::Offset,
            },
            stxr(2, 3, 4),
            svc(),
        ]);
        set_x(&mut sim, 4, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 2), 1); // the intervening store cleared it
    }

    #[test]
    fn test_clrex_always_clears() {
        let (mut sim, mut memory, decoder) = setup(&[ldxr(1, 4), Instruction::Clrex, stxr(2, 3, 4), svc()]);
        set_x(&mut sim, 4, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 2), 1);
    }

    #[test]
    fn test_global_monitor_gates_store_exclusive() {
        // Pause at the SVC, drop the global monitor, resume: the
        // store-exclusive must fail even though the local monitor holds.
        let (mut sim, mut memory, decoder) = setup(&[ldxr(1, 4), svc(), stxr(2, 3, 4), svc()]);
        set_x(&mut sim, 4, DATA);
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { .. }));
        sim.global_monitor.clear();
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 2), 1);
    }

    #[test]
    fn test_cas_scenario() {
        let cas = Instruction::Cas {
            size: 2,
            acquire: false,
            release: false,
            pair: false,
            rs: 0,
            rt: 1,
            rn: 2,
        };
        let (mut sim, mut memory, decoder) = setup(&[cas.clone(), svc()]);
        memory.write_u32(DATA, 0x5).unwrap();
        set_x(&mut sim, 0, 0x5);
        set_x(&mut sim, 1, 0x9);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 0), 0x5); // observed pre-value
        assert_eq!(memory.read_u32(DATA).unwrap(), 0x9);

        // Repeat with a stale expectation: memory keeps 0x9.
        let (mut sim, mut memory2, decoder) = setup(&[cas, svc()]);
        memory2.write_u32(DATA, 0x9).unwrap();
        set_x(&mut sim, 0, 0x5);
        set_x(&mut sim, 1, 0xA);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory2);
        assert_eq!(x(&sim, 0), 0x9);
        assert_eq!(memory2.read_u32(DATA).unwrap(), 0x9);
    }

    #[test]
    fn test_atomic_rmw_family() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::AtomicRmw {
                size: 3,
                op: AtomicOp::Add,
                acquire: false,
                release: false,
                rs: 1,
                rt: 0,
                rn: 2,
            },
            Instruction::AtomicRmw {
                size: 3,
                op: AtomicOp::Smax,
                acquire: false,
                release: false,
                rs: 3,
                rt: 4,
                rn: 2,
            },
            svc(),
        ]);
        memory.write_u64(DATA, 100).unwrap();
        set_x(&mut sim, 1, 11);
        set_x(&mut sim, 2, DATA);
        set_x(&mut sim, 3, (-5i64) as u64);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 0), 100); // pre-value
        assert_eq!(x(&sim, 4), 111); // pre-value of the second op
        assert_eq!(memory.read_u64(DATA).unwrap(), 111); // smax(111, -5)
    }

    #[test]
    fn test_swp() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::Swp { size: 2, acquire: true, release: true, rs: 1, rt: 0, rn: 2 },
            svc(),
        ]);
        memory.write_u32(DATA, 7).unwrap();
        set_x(&mut sim, 1, 9);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 0), 7);
        assert_eq!(memory.read_u32(DATA).unwrap(), 9);
    }

    #[test]
    fn test_atomic_crossing_line_aborts() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Cas {
            size: 2,
            acquire: false,
            release: false,
            pair: false,
            rs: 0,
            rt: 1,
            rn: 2,
        }]);
        set_x(&mut sim, 2, DATA + 14); // 14 + 4 crosses the line
        let reason = sim.run(&decoder, &mut memory);
        assert_eq!(reason, ExitReason::AtomicAlignment { addr: DATA + 14 });
    }

    #[test]
    fn test_ldapr_and_stlur() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::LoadAcquireRcpc {
                size: 2,
                load: false,
                sign_extend: false,
                to64: false,
                rt: 0,
                rn: 2,
                imm: 4,
            },
            Instruction::LoadAcquireRcpc {
                size: 2,
                load: true,
                sign_extend: false,
                to64: false,
                rt: 1,
                rn: 2,
                imm: 4,
            },
            svc(),
        ]);
        set_x(&mut sim, 0, 0x77);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 1), 0x77);
    }

    // -- BType and BTI -------------------------------------------------------

    #[test]
    fn test_bti_violation_on_guarded_page() {
        // BLR lands on BTI j, which rejects BranchAndLink.
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::BranchReg { op: 1, rn: 5, auth: None, rm: 0 },
            svc(), // never reached
            Instruction::SysHint(Hint::BtiJ),
        ]);
        sim.set_guard_pages(true);
        set_x(&mut sim, 5, BASE + 8);
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(
            reason,
            ExitReason::BtiViolation { btype: BType::BranchAndLink, .. }
        ));
    }

    #[test]
    fn test_bti_c_accepts_call() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::BranchReg { op: 1, rn: 5, auth: None, rm: 0 },
            svc(),
            Instruction::SysHint(Hint::BtiC),
            ret(), // LR points past the BLR, back to the SVC
        ]);
        sim.set_guard_pages(true);
        set_x(&mut sim, 5, BASE + 8);
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { .. }));
    }

    #[test]
    fn test_bti_ignored_when_unguarded() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::BranchReg { op: 1, rn: 5, auth: None, rm: 0 },
            svc(),
            Instruction::SysHint(Hint::Bti),
            ret(),
        ]);
        set_x(&mut sim, 5, BASE + 8);
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { .. }));
    }

    #[test]
    fn test_btype_resets_after_one_instruction() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::BranchReg { op: 1, rn: 5, auth: None, rm: 0 },
            svc(),
            movz(0, 1), // consumes the BranchAndLink BType
            Instruction::SysHint(Hint::Bti), // would reject if BType persisted
            ret(),
        ]);
        sim.set_guard_pages(true);
        set_x(&mut sim, 5, BASE + 8);
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { .. }));
    }

    #[test]
    fn test_authenticated_branch_failure() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::BranchReg {
            op: 0,
            rn: 5,
            auth: Some((PacKey::IA, true)),
            rm: 0,
        }]);
        // An unsigned pointer fails authentication.
        set_x(&mut sim, 5, BASE + 8 + (0x55 << 48));
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::AuthFailure { .. }));
    }

    // -- MOVPRFX latch -------------------------------------------------------

    fn movprfx(zd: u8, zn: u8) -> Instruction {
        Instruction::SveMovprfx {
            predicated: false,
            merging: false,
            vform: VectorFormat::VnD,
            zd,
            pg: 0,
            zn,
        }
    }

    #[test]
    fn test_movprfx_latch_set_and_cleared() {
        // The latch is set right after MOVPRFX.
        let (mut sim, mut memory, decoder) = setup(&[movprfx(0, 1), svc()]);
        sim.run(&decoder, &mut memory);
        assert!(sim.movprfx_latched());

        // Any following instruction clears it.
        let (mut sim, mut memory, decoder) = setup(&[
            movprfx(0, 1),
            Instruction::SveBin {
                vform: VectorFormat::VnD,
                op: SveBinOp::Add,
                zdn: 0,
                pg: 0,
                zm: 2,
            },
            svc(),
        ]);
        sim.run(&decoder, &mut memory);
        assert!(!sim.movprfx_latched());
    }

    // -- Host traps ----------------------------------------------------------

    #[test]
    fn test_printf_trap() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_PRINTF }]);
        // Payload: two arguments, patterns W then X.
        memory.write_u32(BASE + 4, 2).unwrap();
        memory
            .write_u32(BASE + 8, system::PRINTF_ARG_W | (system::PRINTF_ARG_X << 2))
            .unwrap();
        // The continuation slot after the payload.
        memory.write_inst(BASE + 12, 0xE100_0000);
        let mut map = decoder.0;
        map.insert(0xE100_0000, svc());
        let decoder = MapDecoder(map);

        memory.load_bytes(DATA, b"count=%d hex=%x done\0");
        set_x(&mut sim, 0, DATA);
        set_x(&mut sim, 1, 42);
        set_x(&mut sim, 2, 0xbeef);

        let sink = SharedSink::default();
        sim.set_trace_sink(Box::new(sink.clone()));
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { .. }));
        assert_eq!(sink.contents(), "count=42 hex=beef done");
        assert_eq!(x(&sim, 0), sink.contents().len() as u64);
        assert_eq!(sim.state.lr(), BASE + 12);
    }

    #[test]
    fn test_printf_float_and_string() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_PRINTF }]);
        memory.write_u32(BASE + 4, 2).unwrap();
        memory
            .write_u32(BASE + 8, system::PRINTF_ARG_D | (system::PRINTF_ARG_X << 2))
            .unwrap();
        memory.write_inst(BASE + 12, 0xE100_0000);
        let mut map = decoder.0;
        map.insert(0xE100_0000, svc());
        let decoder = MapDecoder(map);

        memory.load_bytes(DATA, b"v=%f s=%s!\0");
        memory.load_bytes(DATA + 0x100, b"hello\0");
        set_x(&mut sim, 0, DATA);
        set_x(&mut sim, 1, DATA + 0x100);
        sim.state.write_scalar(0, 64, 1.5f64.to_bits(), RegLog::Log);

        let sink = SharedSink::default();
        sim.set_trace_sink(Box::new(sink.clone()));
        sim.run(&decoder, &mut memory);
        assert_eq!(sink.contents(), "v=1.5 s=hello!");
    }

    #[test]
    fn test_trace_trap_toggles_params() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_TRACE }]);
        memory.write_u32(BASE + 4, TraceParams::REGS.bits()).unwrap();
        memory.write_u32(BASE + 8, system::TRACE_ENABLE).unwrap();
        memory.write_inst(BASE + 12, 0xE100_0000);
        let mut map = decoder.0;
        map.insert(0xE100_0000, svc());
        let decoder = MapDecoder(map);
        sim.run(&decoder, &mut memory);
        assert!(sim.trace_params().contains(TraceParams::REGS));

        // And disable again.
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_TRACE }]);
        sim.set_trace_params(TraceParams::REGS | TraceParams::WRITE);
        memory.write_u32(BASE + 4, TraceParams::REGS.bits()).unwrap();
        memory.write_u32(BASE + 8, system::TRACE_DISABLE).unwrap();
        memory.write_inst(BASE + 12, 0xE100_0000);
        let mut map = decoder.0;
        map.insert(0xE100_0000, svc());
        let decoder = MapDecoder(map);
        sim.run(&decoder, &mut memory);
        assert_eq!(sim.trace_params(), TraceParams::WRITE);
    }

    #[test]
    fn test_log_trap_dumps_registers() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_LOG }]);
        memory.write_u32(BASE + 4, TraceParams::REGS.bits()).unwrap();
        memory.write_inst(BASE + 8, 0xE100_0000);
        let mut map = decoder.0;
        map.insert(0xE100_0000, svc());
        let decoder = MapDecoder(map);
        set_x(&mut sim, 7, 0x7777);
        let sink = SharedSink::default();
        sim.set_trace_sink(Box::new(sink.clone()));
        sim.run(&decoder, &mut memory);
        assert!(sink.contents().contains("x7"));
        assert!(sink.contents().contains("0x0000000000007777"));
    }

    #[test]
    fn test_cpu_features_traps() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::Hlt { imm: system::HLT_SAVE_CPU_FEATURES },
            Instruction::Hlt { imm: system::HLT_SET_CPU_FEATURES },
        ]);
        // Feature list for the HLT at BASE+4: bytes at its offset 4,
        // padded to a word; execution resumes at BASE+12.
        memory.load_bytes(BASE + 8, &[CpuFeature::Crc32 as u8, CpuFeature::Lse as u8, 0, 0]);
        memory.write_inst(BASE + 12, 0xE100_0000);
        memory.write_inst(BASE + 16, 0xE100_0001);
        let mut map = decoder.0;
        map.insert(0xE100_0000, Instruction::Hlt { imm: system::HLT_RESTORE_CPU_FEATURES });
        map.insert(0xE100_0001, svc());
        let decoder = MapDecoder(map);

        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { .. }));
        // The restore undid the narrowed set.
        assert_eq!(sim.cpu_features(), CpuFeatures::all());
    }

    #[test]
    fn test_cpu_features_set_narrows() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_SET_CPU_FEATURES }]);
        memory.load_bytes(BASE + 4, &[CpuFeature::Crc32 as u8, 0, 0, 0]);
        memory.write_inst(BASE + 8, 0xE100_0000);
        let mut map = decoder.0;
        map.insert(0xE100_0000, svc());
        let decoder = MapDecoder(map);
        sim.run(&decoder, &mut memory);
        assert!(sim.cpu_features().has(CpuFeature::Crc32));
        assert!(!sim.cpu_features().has(CpuFeature::Sve));
    }

    #[test]
    fn test_runtime_call_trap() {
        let (mut sim, mut memory, decoder) = setup(&[Instruction::Hlt { imm: system::HLT_RUNTIME_CALL }]);
        let handle = sim.register_runtime_call(Box::new(|sim, _mem| {
            let v = sim.state.read_x(0, Reg31Mode::ZeroRegister);
            sim.state.write_x(0, v + 1, Reg31Mode::ZeroRegister, RegLog::Log);
        }));
        memory.write_u32(BASE + 4, handle).unwrap();
        memory.write_inst(BASE + system::RUNTIME_CALL_LENGTH, 0xE100_0000);
        let mut map = decoder.0;
        map.insert(0xE100_0000, svc());
        let decoder = MapDecoder(map);

        set_x(&mut sim, 0, 41);
        let reason = sim.run(&decoder, &mut memory);
        assert!(matches!(reason, ExitReason::Svc { .. }));
        assert_eq!(x(&sim, 0), 42);
    }

    // -- System registers ----------------------------------------------------

    #[test]
    fn test_mrs_msr_nzcv_round_trip() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::Msr { rt: 0, reg: crate::inst::SystemReg::Nzcv },
            Instruction::Mrs { rt: 1, reg: crate::inst::SystemReg::Nzcv },
            svc(),
        ]);
        set_x(&mut sim, 0, 0x6000_0000);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 1), 0x6000_0000);
        assert!(sim.state.nzcv.z());
        assert!(sim.state.nzcv.c());
    }

    #[test]
    fn test_rndr_is_deterministic_and_clears_flags() {
        let program = [
            Instruction::Mrs { rt: 0, reg: crate::inst::SystemReg::Rndr },
            Instruction::Mrs { rt: 1, reg: crate::inst::SystemReg::Rndr },
            svc(),
        ];
        let (mut sim, mut memory, decoder) = setup(&program);
        sim.state.nzcv.set_nibble(0xF);
        sim.run(&decoder, &mut memory);
        let (a, b) = (x(&sim, 0), x(&sim, 1));
        assert_ne!(a, b);
        assert_eq!(sim.state.nzcv.nibble(), 0);

        // Same seed, same draws.
        let (mut sim2, mut memory2, decoder2) = setup(&program);
        sim2.run(&decoder2, &mut memory2);
        assert_eq!(x(&sim2, 0), a);
        assert_eq!(x(&sim2, 1), b);
    }

    // -- Trace integration ---------------------------------------------------

    #[test]
    fn test_trace_logs_register_writes() {
        let (mut sim, mut memory, decoder) = setup(&[movz(0, 42), ret()]);
        let sink = SharedSink::default();
        sim.set_trace_sink(Box::new(sink.clone()));
        sim.set_trace_params(TraceParams::REGS);
        sim.run(&decoder, &mut memory);
        let out = sink.contents();
        assert!(out.contains("x0"));
        assert!(out.contains("0x000000000000002a"));
    }

    #[test]
    fn test_trace_memory_write_lines() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::LoadStoreImm {
                size: 3,
                load: false,
                sign_extend: false,
                to64: false,
                rt: 0,
                rn: 2,
                imm: 0,
                mode: AddrMode::Offset,
            },
            svc(),
        ]);
        let sink = SharedSink::default();
        sim.set_trace_sink(Box::new(sink.clone()));
        sim.set_trace_params(TraceParams::WRITE);
        set_x(&mut sim, 0, 0x42);
        set_x(&mut sim, 2, DATA);
        sim.run(&decoder, &mut memory);
        assert!(sink.contents().contains("-> 0x0000000000008000"));
    }

    // -- Configuration -------------------------------------------------------

    #[test]
    fn test_vl_only_changes_before_first_run() {
        let mut sim = Simulator::new(CpuFeatures::all());
        assert!(sim.set_vector_length(256));
        assert_eq!(sim.state.vl_bits(), 256);
        assert!(!sim.set_vector_length(100)); // not a multiple of 128
        assert!(!sim.set_vector_length(4096)); // out of range

        let mut memory = FlatMemory::new(0, 0x1_0000);
        let decoder = MapDecoder(HashMap::new());
        sim.state.pc = END_OF_SIM_ADDRESS;
        assert_eq!(sim.run(&decoder, &mut memory), ExitReason::Done);
        assert!(!sim.set_vector_length(128)); // locked after the first run
    }

    #[test]
    fn test_vl_requires_sve_feature() {
        let mut sim = Simulator::new(CpuFeatures::none());
        assert!(!sim.set_vector_length(256));
        assert!(sim.set_vector_length(128));
    }

    #[test]
    fn test_configure_stack_aligns_sp() {
        let mut sim = Simulator::new(CpuFeatures::all());
        sim.configure_stack(0x2_0000, 0x4000);
        let sp = sim.state.sp();
        assert_eq!(sp % 16, 0);
        assert!(sp <= 0x2_4000 - STACK_PROTECTION_SIZE);
        assert!(sp >= 0x2_0000 + STACK_PROTECTION_SIZE);
        // Reset keeps the configured stack.
        sim.state.set_sp(0);
        sim.reset();
        assert_eq!(sim.state.sp(), sp);
    }

    #[test]
    fn test_reset_reseeds_state() {
        let mut sim = Simulator::new(CpuFeatures::all());
        set_x(&mut sim, 0, 7);
        sim.local_monitor.mark_exclusive(DATA, 4);
        sim.reset();
        assert_eq!(x(&sim, 0), 0xbadbeef);
        assert_eq!(sim.state.lr(), END_OF_SIM_ADDRESS);
        assert!(!sim.local_monitor.is_marked());
    }

    // -- Driver-level SVE smoke ---------------------------------------------

    #[test]
    fn test_sve_program_end_to_end() {
        // INDEX Z0.S, #0, #1; DUP Z1.S, #2; PTRUE P0.S; CMPLT P1.S;
        // CNTP X0, P0, P1; SVC.
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::SveIndex {
                vform: VectorFormat::VnS,
                zd: 0,
                start_reg: None,
                start_imm: 0,
                step_reg: None,
                step_imm: 1,
            },
            Instruction::SveDupImm { vform: VectorFormat::VnS, zd: 1, imm: 2 },
            Instruction::SvePtrue {
                vform: VectorFormat::VnS,
                pd: 0,
                pattern: PredPattern::All,
                set_flags: false,
            },
            Instruction::SveCmpVec {
                vform: VectorFormat::VnS,
                cond: crate::inst::SveCmpCond::Lt,
                wide: false,
                pd: 1,
                pg: 0,
                zn: 0,
                zm: 1,
            },
            Instruction::SveCntp { vform: VectorFormat::VnS, rd: 0, pg: 0, pn: 1 },
            svc(),
        ]);
        sim.run(&decoder, &mut memory);
        // Lanes 0 and 1 are below 2.
        assert_eq!(x(&sim, 0), 2);
    }

    #[test]
    fn test_sve_ldr_str_round_trip() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::SveStrZ { zt: 0, rn: 2 },
            Instruction::SveLdrZ { zt: 1, rn: 2 },
            Instruction::SveStrP { pt: 0, rn: 3 },
            Instruction::SveLdrP { pt: 1, rn: 3 },
            svc(),
        ]);
        sim.state.write_q(0, 0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10, RegLog::Log);
        sim.state.preg_mut(0, RegLog::Log).set_bit(3, true);
        set_x(&mut sim, 2, DATA);
        set_x(&mut sim, 3, DATA + 0x100);
        sim.run(&decoder, &mut memory);
        assert_eq!(sim.state.read_q(1), 0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10);
        assert!(sim.state.preg(1).bit(3));
    }

    #[test]
    fn test_integer_shift_through_driver() {
        let (mut sim, mut memory, decoder) = setup(&[
            Instruction::AddSubShifted {
                sf: true,
                sub: false,
                set_flags: false,
                rd: 0,
                rn: 1,
                rm: 2,
                shift: ShiftType::LSL,
                amount: 4,
            },
            svc(),
        ]);
        set_x(&mut sim, 1, 0x100);
        set_x(&mut sim, 2, 0x2);
        sim.run(&decoder, &mut memory);
        assert_eq!(x(&sim, 0), 0x120);
    }
}
