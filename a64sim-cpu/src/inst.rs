// SPDX-FileCopyrightText: 2026 a64sim contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Decoded-instruction contract between the external decoder and the core.
//!
//! The decoder turns each raw 32-bit A64 word into one [`Instruction`]
//! variant with all fields already parsed (register codes, immediates,
//! size/shift/extend/condition). The core matches on the variant exactly
//! once per executed instruction.

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Shift type used by data-processing (register) instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftType {
    LSL = 0,
    LSR = 1,
    ASR = 2,
    ROR = 3,
}

/// Extend type used by load/store and extended-register instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendType {
    UXTB = 0,
    UXTH = 1,
    UXTW = 2,
    UXTX = 3,
    SXTB = 4,
    SXTH = 5,
    SXTW = 6,
    SXTX = 7,
}

/// Addressing mode for load/store instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// Base + offset, no write-back.
    Offset,
    /// Write-back before the access.
    PreIndex,
    /// Access first, then write back.
    PostIndex,
}

/// A64 condition codes. The low bit inverts the predicate of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq = 0,
    Ne = 1,
    Hs = 2,
    Lo = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
    Nv = 15,
}

impl Condition {
    pub fn from_bits(bits: u8) -> Condition {
        match bits & 0xF {
            0 => Condition::Eq,
            1 => Condition::Ne,
            2 => Condition::Hs,
            3 => Condition::Lo,
            4 => Condition::Mi,
            5 => Condition::Pl,
            6 => Condition::Vs,
            7 => Condition::Vc,
            8 => Condition::Hi,
            9 => Condition::Ls,
            10 => Condition::Ge,
            11 => Condition::Lt,
            12 => Condition::Gt,
            13 => Condition::Le,
            14 => Condition::Al,
            _ => Condition::Nv,
        }
    }
}

/// Lane arrangement of a SIMD or SVE operation: element width plus count.
///
/// NEON forms fix the count; the `Vn*` forms scale with the configured
/// vector length and are resolved against it at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    V8B,
    V16B,
    V4H,
    V8H,
    V2S,
    V4S,
    V1D,
    V2D,
    /// Scalar forms: one active lane of the named width.
    B,
    H,
    S,
    D,
    /// SVE forms: VL/esize lanes.
    VnB,
    VnH,
    VnS,
    VnD,
}

impl VectorFormat {
    /// Lane width in bits.
    pub fn lane_bits(self) -> u32 {
        use VectorFormat::*;
        match self {
            V8B | V16B | B | VnB => 8,
            V4H | V8H | H | VnH => 16,
            V2S | V4S | S | VnS => 32,
            V1D | V2D | D | VnD => 64,
        }
    }

    /// Lane width in bytes.
    pub fn lane_bytes(self) -> u32 {
        self.lane_bits() / 8
    }

    /// Number of lanes given the configured vector length in bits.
    /// NEON and scalar forms ignore `vl_bits`.
    pub fn lane_count(self, vl_bits: u32) -> u32 {
        use VectorFormat::*;
        match self {
            V8B => 8,
            V16B => 16,
            V4H => 4,
            V8H => 8,
            V2S => 2,
            V4S => 4,
            V1D => 1,
            V2D => 2,
            B | H | S | D => 1,
            VnB | VnH | VnS | VnD => vl_bits / self.lane_bits(),
        }
    }

    /// Total register bits touched by this format (NEON forms only).
    pub fn reg_bits(self) -> u32 {
        use VectorFormat::*;
        match self {
            V8B | V4H | V2S | V1D => 64,
            V16B | V8H | V4S | V2D => 128,
            B => 8,
            H => 16,
            S => 32,
            D => 64,
            VnB | VnH | VnS | VnD => 0,
        }
    }

    /// True for the one-lane scalar forms.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            VectorFormat::B | VectorFormat::H | VectorFormat::S | VectorFormat::D
        )
    }

    /// True for the VL-scaled SVE forms.
    pub fn is_sve(self) -> bool {
        matches!(
            self,
            VectorFormat::VnB | VectorFormat::VnH | VectorFormat::VnS | VectorFormat::VnD
        )
    }

    /// The NEON vector form with the given lane size and register width.
    pub fn neon(esize_bits: u32, q: bool) -> VectorFormat {
        use VectorFormat::*;
        match (esize_bits, q) {
            (8, false) => V8B,
            (8, true) => V16B,
            (16, false) => V4H,
            (16, true) => V8H,
            (32, false) => V2S,
            (32, true) => V4S,
            (64, false) => V1D,
            (64, true) => V2D,
            _ => unreachable!("bad lane size {esize_bits}"),
        }
    }

    /// The scalar form with the given lane size.
    pub fn scalar(esize_bits: u32) -> VectorFormat {
        match esize_bits {
            8 => VectorFormat::B,
            16 => VectorFormat::H,
            32 => VectorFormat::S,
            64 => VectorFormat::D,
            _ => unreachable!("bad lane size {esize_bits}"),
        }
    }

    /// The SVE form with the given lane size.
    pub fn sve(esize_bits: u32) -> VectorFormat {
        match esize_bits {
            8 => VectorFormat::VnB,
            16 => VectorFormat::VnH,
            32 => VectorFormat::VnS,
            64 => VectorFormat::VnD,
            _ => unreachable!("bad lane size {esize_bits}"),
        }
    }

    /// The format with lanes twice as wide and the same register width.
    pub fn widen(self) -> VectorFormat {
        use VectorFormat::*;
        match self {
            V8B | V16B => V8H,
            V4H | V8H => V4S,
            V2S | V4S => V2D,
            B => H,
            H => S,
            S => D,
            VnB => VnH,
            VnH => VnS,
            VnS => VnD,
            _ => unreachable!("cannot widen {self:?}"),
        }
    }
}

/// FP precision selector for scalar FP instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpType {
    Half,
    Single,
    Double,
}

impl FpType {
    pub fn size_bits(self) -> u32 {
        match self {
            FpType::Half => 16,
            FpType::Single => 32,
            FpType::Double => 64,
        }
    }
}

/// Rounding mode for FP conversions and FRINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpRounding {
    TieEven,
    TieAway,
    PlusInfinity,
    MinusInfinity,
    Zero,
    /// Use the mode currently configured in FPCR.
    Current,
}

/// Two-operand scalar FP arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    MaxNm,
    MinNm,
    /// Negated multiply.
    NMul,
}

/// Pointer-authentication key selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacKey {
    IA,
    IB,
    DA,
    DB,
    GA,
}

/// Data or instruction pointer, for PAC tag layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerType {
    Data,
    Instruction,
}

/// Atomic read-modify-write operation (LD<op> family).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Clr,
    Eor,
    Set,
    Smax,
    Smin,
    Umax,
    Umin,
}

/// Hint-space instructions, including the BTI variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Nop,
    Yield,
    Esb,
    Csdb,
    Bti,
    BtiC,
    BtiJ,
    BtiJc,
}

/// System registers the core models for MRS/MSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemReg {
    Nzcv,
    Fpcr,
    Rndr,
    Rndrrs,
    /// Anything else; the raw packed (op0:op1:CRn:CRm:op2) encoding.
    Other(u16),
}

/// PTRUE lane-count pattern constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredPattern {
    Pow2,
    Vl1,
    Vl2,
    Vl3,
    Vl4,
    Vl5,
    Vl6,
    Vl7,
    Vl8,
    Vl16,
    Vl32,
    Vl64,
    Vl128,
    Vl256,
    Mul4,
    Mul3,
    All,
}

/// SVE predicate-generating comparison conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SveCmpCond {
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    Hs,
    Hi,
    Ls,
    Lo,
}

/// SVE predicate logical operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredLogicalOp {
    And,
    Bic,
    Eor,
    Nand,
    Nor,
    Orn,
    Orr,
    Sel,
}

/// Scalar-driven WHILE loop conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhileCond {
    Lt,
    Le,
    Lo,
    Ls,
}

/// SVE predicated destructive binary integer ops (MOVPRFX consumers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SveBinOp {
    Add,
    Sub,
    Mul,
    Smax,
    Smin,
    Umax,
    Umin,
    And,
    Orr,
    Eor,
}

/// NEON three-same integer ops, with the post-processing already named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdIntOp {
    Add,
    Sub,
    Mul,
    Mla,
    Mls,
    SqAdd,
    UqAdd,
    SqSub,
    UqSub,
    SHAdd,
    UHAdd,
    SHSub,
    UHSub,
    SRHAdd,
    URHAdd,
    Smax,
    Smin,
    Umax,
    Umin,
    Sabd,
    Uabd,
    Saba,
    Uaba,
    Addp,
    Smaxp,
    Sminp,
    Umaxp,
    Uminp,
    CmEq,
    CmGe,
    CmGt,
    CmHi,
    CmHs,
    CmTst,
    Sshl,
    Ushl,
    SqShl,
    UqShl,
    Srshl,
    Urshl,
    Pmul,
}

/// NEON three-same bitwise ops (size field repurposed by the encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdBitwiseOp {
    And,
    Bic,
    Orr,
    Orn,
    Eor,
    Bsl,
    Bit,
    Bif,
}

/// NEON three-same FP lane ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdFpOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FMax,
    FMin,
    FMaxNm,
    FMinNm,
    FMla,
    FMls,
    FAbd,
    FAddp,
    FMaxp,
    FMinp,
    FMaxNmp,
    FMinNmp,
    FCmEq,
    FCmGe,
    FCmGt,
}

/// NEON two-register misc ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdUnaryOp {
    Abs,
    Neg,
    SqAbs,
    SqNeg,
    Not,
    Rbit,
    Rev16,
    Rev32,
    Rev64,
    Cnt,
    Clz,
    Cls,
    Xtn,
    SqXtn,
    UqXtn,
    SqXtun,
    CmEq0,
    CmGe0,
    CmGt0,
    CmLe0,
    CmLt0,
    FAbs,
    FNeg,
    FSqrt,
    FCmEq0,
    FCmGe0,
    FCmGt0,
    FCmLe0,
    FCmLt0,
    Scvtf,
    Ucvtf,
    FcvtzsVec,
    FcvtzuVec,
    Fcvtl,
    Fcvtn,
    FrintVec(FpRounding),
}

/// NEON across-lanes reductions, including the scalar-pairwise forms
/// (FADDP Dd, Vn.2D and friends reduce exactly two lanes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdReduceOp {
    AddV,
    SMaxV,
    SMinV,
    UMaxV,
    UMinV,
    SAddLV,
    UAddLV,
    FAddV,
    FMaxV,
    FMinV,
    FMaxNmV,
    FMinNmV,
}

/// NEON three-different (widening/narrowing) ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdWideOp {
    Saddl,
    Uaddl,
    Ssubl,
    Usubl,
    Saddw,
    Uaddw,
    Ssubw,
    Usubw,
    Smull,
    Umull,
    Smlal,
    Umlal,
    Smlsl,
    Umlsl,
    Pmull,
    Addhn,
    Raddhn,
    Subhn,
    Rsubhn,
    Sabdl,
    Uabdl,
}

/// NEON shift-by-immediate ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdShiftImmOp {
    Shl,
    Sshr,
    Ushr,
    Ssra,
    Usra,
    Srshr,
    Urshr,
    Srsra,
    Ursra,
    Sqshl,
    Uqshl,
    Sqshlu,
    Sli,
    Sri,
    Shrn,
    Rshrn,
    Sqshrn,
    Uqshrn,
    Sqrshrn,
    Uqrshrn,
    Sqshrun,
    Sqrshrun,
    Sshll,
    Ushll,
    ScvtfFixed,
    UcvtfFixed,
    FcvtzsFixed,
    FcvtzuFixed,
}

/// NEON permute ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdPermuteOp {
    Zip1,
    Zip2,
    Uzp1,
    Uzp2,
    Trn1,
    Trn2,
}

// ---------------------------------------------------------------------------
// Instruction enum
// ---------------------------------------------------------------------------

/// A decoded A64 instruction.
///
/// Register fields are 5-bit codes; code 31 resolves to the zero register
/// or the stack pointer according to the architectural rule for the
/// instruction group, which the execution functions apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // -- PC-relative addressing --------------------------------------------
    Adr { rd: u8, imm: i64 },
    Adrp { rd: u8, imm: i64 },

    // -- Add/subtract ------------------------------------------------------
    AddSubImm {
        sf: bool,
        sub: bool,
        set_flags: bool,
        rd: u8,
        rn: u8,
        imm12: u32,
        shift12: bool,
    },
    AddSubShifted {
        sf: bool,
        sub: bool,
        set_flags: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        shift: ShiftType,
        amount: u8,
    },
    AddSubExtended {
        sf: bool,
        sub: bool,
        set_flags: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        extend: ExtendType,
        left_shift: u8,
    },
    AddSubWithCarry {
        sf: bool,
        sub: bool,
        set_flags: bool,
        rd: u8,
        rn: u8,
        rm: u8,
    },

    // -- Logical -----------------------------------------------------------
    LogicalImm {
        sf: bool,
        opc: u8,
        rd: u8,
        rn: u8,
        imm: u64,
    },
    LogicalShifted {
        sf: bool,
        opc: u8,
        invert: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        shift: ShiftType,
        amount: u8,
    },

    // -- Conditional -------------------------------------------------------
    CondCompare {
        sf: bool,
        negate: bool,
        rn: u8,
        /// Register code or 5-bit immediate, per `is_imm`.
        rm_or_imm: u8,
        is_imm: bool,
        cond: Condition,
        nzcv: u8,
    },
    CondSelect {
        sf: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        cond: Condition,
        /// 0 = CSEL, 1 = CSINC, 2 = CSINV, 3 = CSNEG.
        op2: u8,
    },

    // -- Move wide / bitfield / extract ------------------------------------
    MovWide {
        sf: bool,
        /// 0 = MOVN, 2 = MOVZ, 3 = MOVK.
        opc: u8,
        rd: u8,
        imm16: u16,
        hw: u8,
    },
    Bitfield {
        sf: bool,
        /// 0 = SBFM, 1 = BFM, 2 = UBFM.
        opc: u8,
        rd: u8,
        rn: u8,
        immr: u8,
        imms: u8,
    },
    Extract {
        sf: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        lsb: u8,
    },

    // -- Data processing (1/2/3 source) ------------------------------------
    Clz { sf: bool, rd: u8, rn: u8 },
    Cls { sf: bool, rd: u8, rn: u8 },
    Rbit { sf: bool, rd: u8, rn: u8 },
    Rev { sf: bool, rd: u8, rn: u8, opc: u8 },
    PacAdd { rd: u8, rn: u8, key: PacKey, zero_modifier: bool },
    PacAuth { rd: u8, rn: u8, key: PacKey, zero_modifier: bool },
    PacStrip { rd: u8, data: bool },
    Div { sf: bool, signed: bool, rd: u8, rn: u8, rm: u8 },
    VarShift { sf: bool, rd: u8, rn: u8, rm: u8, shift: ShiftType },
    Crc32 { sz: u8, castagnoli: bool, rd: u8, rn: u8, rm: u8 },
    PacGa { rd: u8, rn: u8, rm: u8 },
    MulAdd {
        sf: bool,
        sub: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        ra: u8,
    },
    MulAddLong {
        signed: bool,
        sub: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        ra: u8,
    },
    MulHigh { signed: bool, rd: u8, rn: u8, rm: u8 },

    // -- Flag manipulation -------------------------------------------------
    Rmif { rn: u8, rotation: u8, mask: u8 },
    SetF { sixteen_bit: bool, rn: u8 },
    Cfinv,
    AxFlag,
    XaFlag,

    // -- Branches ----------------------------------------------------------
    Branch { link: bool, offset: i64 },
    BranchCond { cond: Condition, offset: i64 },
    CompareBranch { sf: bool, nonzero: bool, rt: u8, offset: i64 },
    TestBranch { nonzero: bool, rt: u8, bit: u8, offset: i64 },
    BranchReg {
        /// 0 = BR, 1 = BLR, 2 = RET.
        op: u8,
        rn: u8,
        /// PAC authentication: key and whether the modifier is zero
        /// (BRAAZ-style) or comes from Rm/SP (BRAA/RETAA-style).
        auth: Option<(PacKey, bool)>,
        rm: u8,
    },

    // -- Loads and stores --------------------------------------------------
    LoadStoreImm {
        /// log2 of the element size in bytes (0..=3).
        size: u8,
        load: bool,
        sign_extend: bool,
        /// Sign-extended loads target a 64-bit register when set.
        to64: bool,
        rt: u8,
        rn: u8,
        imm: i64,
        mode: AddrMode,
    },
    LoadStoreReg {
        size: u8,
        load: bool,
        sign_extend: bool,
        to64: bool,
        rt: u8,
        rn: u8,
        rm: u8,
        extend: ExtendType,
        shift: bool,
    },
    LoadLiteral {
        /// 2 = 32-bit, 3 = 64-bit.
        size: u8,
        sign_extend: bool,
        rt: u8,
        offset: i64,
    },
    LoadStorePair {
        size: u8,
        load: bool,
        sign_extend: bool,
        rt: u8,
        rt2: u8,
        rn: u8,
        imm: i64,
        mode: AddrMode,
    },
    LoadStoreSimd {
        /// log2 of the element size in bytes (0..=4; 4 is the Q form).
        size: u8,
        load: bool,
        rt: u8,
        rn: u8,
        imm: i64,
        mode: AddrMode,
    },
    LoadStorePairSimd {
        /// log2 of the element size in bytes (2..=4).
        size: u8,
        load: bool,
        rt: u8,
        rt2: u8,
        rn: u8,
        imm: i64,
        mode: AddrMode,
    },
    /// LDRAA/LDRAB: PAC-authenticated base plus scaled offset.
    LoadPacIndexed {
        key: PacKey,
        rt: u8,
        rn: u8,
        imm: i64,
        writeback: bool,
    },
    LoadStoreExclusive {
        size: u8,
        load: bool,
        exclusive: bool,
        acquire_release: bool,
        pair: bool,
        rs: u8,
        rt: u8,
        rt2: u8,
        rn: u8,
    },
    Cas {
        size: u8,
        acquire: bool,
        release: bool,
        pair: bool,
        rs: u8,
        rt: u8,
        rn: u8,
    },
    Swp {
        size: u8,
        acquire: bool,
        release: bool,
        rs: u8,
        rt: u8,
        rn: u8,
    },
    AtomicRmw {
        size: u8,
        op: AtomicOp,
        acquire: bool,
        release: bool,
        rs: u8,
        rt: u8,
        rn: u8,
    },
    /// LDAPR and the LDAPUR/STLUR unscaled-offset RCpc forms.
    LoadAcquireRcpc {
        size: u8,
        load: bool,
        sign_extend: bool,
        to64: bool,
        rt: u8,
        rn: u8,
        imm: i64,
    },

    // -- Scalar FP ---------------------------------------------------------
    FpImmediate { fp_type: FpType, rd: u8, imm: f64 },
    FpMovReg { fp_type: FpType, rd: u8, rn: u8 },
    /// Raw-bit moves between general and FP registers, including the
    /// FMOV Xd, Vn.D[1] forms (`top_half`).
    FpMovGp {
        fp_type: FpType,
        to_fp: bool,
        sf: bool,
        top_half: bool,
        rd: u8,
        rn: u8,
    },
    FpUnary {
        fp_type: FpType,
        /// 0 = FABS, 1 = FNEG, 2 = FSQRT.
        op: u8,
        rd: u8,
        rn: u8,
    },
    FpConvert { dst: FpType, src: FpType, rd: u8, rn: u8 },
    FpRound { fp_type: FpType, rounding: FpRounding, exact: bool, rd: u8, rn: u8 },
    FpBinary { fp_type: FpType, op: FpBinOp, rd: u8, rn: u8, rm: u8 },
    FpFma {
        fp_type: FpType,
        negate_product: bool,
        negate_addend: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        ra: u8,
    },
    FpCompare { fp_type: FpType, rn: u8, rm: u8, with_zero: bool },
    FpCondCompare { fp_type: FpType, rn: u8, rm: u8, cond: Condition, nzcv: u8 },
    FpCondSelect { fp_type: FpType, rd: u8, rn: u8, rm: u8, cond: Condition },
    FpToInt {
        fp_type: FpType,
        sf: bool,
        unsigned: bool,
        rounding: FpRounding,
        rd: u8,
        rn: u8,
    },
    IntToFp { fp_type: FpType, sf: bool, unsigned: bool, rd: u8, rn: u8 },
    FpToFixed {
        fp_type: FpType,
        sf: bool,
        unsigned: bool,
        fbits: u8,
        rd: u8,
        rn: u8,
    },
    FixedToFp {
        fp_type: FpType,
        sf: bool,
        unsigned: bool,
        fbits: u8,
        rd: u8,
        rn: u8,
    },
    /// FJCVTZS: JavaScript ToInt32 conversion.
    FpToJsInt { rd: u8, rn: u8 },

    // -- Advanced SIMD -----------------------------------------------------
    SimdInt3Same { vform: VectorFormat, op: SimdIntOp, rd: u8, rn: u8, rm: u8 },
    SimdBitwise3Same { q: bool, op: SimdBitwiseOp, rd: u8, rn: u8, rm: u8 },
    SimdFp3Same { vform: VectorFormat, op: SimdFpOp, rd: u8, rn: u8, rm: u8 },
    SimdUnary {
        vform: VectorFormat,
        op: SimdUnaryOp,
        /// Second-half forms (XTN2, FCVTL2, ...) touch the upper lanes.
        upper: bool,
        rd: u8,
        rn: u8,
    },
    SimdAcross { vform: VectorFormat, op: SimdReduceOp, rd: u8, rn: u8 },
    Simd3Diff {
        vform: VectorFormat,
        op: SimdWideOp,
        /// Second-half forms (SADDL2 etc.) read the upper source lanes.
        upper: bool,
        rd: u8,
        rn: u8,
        rm: u8,
    },
    SimdShiftImm {
        vform: VectorFormat,
        op: SimdShiftImmOp,
        shift: u8,
        upper: bool,
        rd: u8,
        rn: u8,
    },
    SimdCopy {
        /// 0 = DUP element, 1 = DUP general, 2 = INS element,
        /// 3 = INS general, 4 = UMOV, 5 = SMOV.
        op: u8,
        q: bool,
        esize: u8,
        dst_lane: u8,
        src_lane: u8,
        rd: u8,
        rn: u8,
    },
    SimdModImm {
        q: bool,
        /// 0 = MOVI, 1 = MVNI, 2 = ORR, 3 = BIC, 4 = FMOV.
        op: u8,
        vform: VectorFormat,
        imm: u64,
        rd: u8,
    },
    SimdPermute { vform: VectorFormat, op: SimdPermuteOp, rd: u8, rn: u8, rm: u8 },
    SimdExt { q: bool, index: u8, rd: u8, rn: u8, rm: u8 },
    SimdTbl { q: bool, len: u8, extension: bool, rd: u8, rn: u8, rm: u8 },
    SimdMulElement {
        vform: VectorFormat,
        /// 0 = MUL, 1 = MLA, 2 = MLS, 3 = FMUL, 4 = FMLA, 5 = FMLS.
        op: u8,
        rd: u8,
        rn: u8,
        rm: u8,
        lane: u8,
    },

    // -- SVE ---------------------------------------------------------------
    SveIndex {
        vform: VectorFormat,
        zd: u8,
        /// Register code when the bit is set, else the signed immediate.
        start_reg: Option<u8>,
        start_imm: i64,
        step_reg: Option<u8>,
        step_imm: i64,
    },
    SveDupImm { vform: VectorFormat, zd: u8, imm: i64 },
    SveDupScalar { vform: VectorFormat, zd: u8, rn: u8 },
    SveDupElement { vform: VectorFormat, zd: u8, zn: u8, lane: u32 },
    SveInsr { vform: VectorFormat, zd: u8, rn: u8, from_simd: bool },
    SveUnpk { signed: bool, high: bool, vform_dst: VectorFormat, zd: u8, zn: u8 },
    SveSel { vform: VectorFormat, zd: u8, pg: u8, zn: u8, zm: u8 },
    SveBin {
        vform: VectorFormat,
        op: SveBinOp,
        zdn: u8,
        pg: u8,
        zm: u8,
    },
    SveAddSubVec { vform: VectorFormat, sub: bool, zd: u8, zn: u8, zm: u8 },
    SveMovprfx { predicated: bool, merging: bool, vform: VectorFormat, zd: u8, pg: u8, zn: u8 },
    SvePtrue { vform: VectorFormat, pd: u8, pattern: PredPattern, set_flags: bool },
    SvePfalse { pd: u8 },
    SvePtest { pg: u8, pn: u8 },
    SvePredLogical {
        op: PredLogicalOp,
        set_flags: bool,
        pd: u8,
        pg: u8,
        pn: u8,
        pm: u8,
    },
    SveWhile { vform: VectorFormat, cond: WhileCond, sf: bool, pd: u8, rn: u8, rm: u8 },
    SveCterm { ne: bool, sf: bool, rn: u8, rm: u8 },
    SveCmpVec {
        vform: VectorFormat,
        cond: SveCmpCond,
        /// Wide forms treat Zm as D lanes broadcast across Zn's lanes.
        wide: bool,
        pd: u8,
        pg: u8,
        zn: u8,
        zm: u8,
    },
    SveCmpImm { vform: VectorFormat, cond: SveCmpCond, pd: u8, pg: u8, zn: u8, imm: i64 },
    SveIncDecReg {
        vform: VectorFormat,
        decrement: bool,
        saturating: bool,
        signed: bool,
        sf: bool,
        rdn: u8,
        pg: u8,
    },
    SveIncDecVec {
        vform: VectorFormat,
        decrement: bool,
        saturating: bool,
        signed: bool,
        zdn: u8,
        pg: u8,
    },
    SveCntp { vform: VectorFormat, rd: u8, pg: u8, pn: u8 },
    SveRdvl { rd: u8, scale: i64 },
    SveAddvl { rd: u8, rn: u8, scale: i64 },
    SveAddpl { rd: u8, rn: u8, scale: i64 },
    SveLdrZ { zt: u8, rn: u8 },
    SveStrZ { zt: u8, rn: u8 },
    SveLdrP { pt: u8, rn: u8 },
    SveStrP { pt: u8, rn: u8 },

    // -- System ------------------------------------------------------------
    Mrs { rt: u8, reg: SystemReg },
    Msr { rt: u8, reg: SystemReg },
    SysHint(Hint),
    Barrier,
    Clrex,
    Sys { op: u16, rt: u8 },
    XpacLri,
    /// PACIASP/AUTIASP and friends from the hint space.
    PacHint {
        auth: bool,
        key: PacKey,
        /// Target register code (17 for the 1716 forms, 30 otherwise).
        rd: u8,
        /// Modifier: X16, SP, or zero.
        modifier: PacModifier,
    },

    // -- Exception generation ----------------------------------------------
    Hlt { imm: u16 },
    Brk { imm: u16 },
    Svc { imm: u16 },
    Udf { raw: u32 },

    // -- Decoder fallthrough -----------------------------------------------
    Unallocated { raw: u32 },
    Unimplemented { raw: u32 },
}

/// Modifier source for the hint-space PAC forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacModifier {
    Zero,
    X16,
    Sp,
}

// ---------------------------------------------------------------------------
// Decoder contract
// ---------------------------------------------------------------------------

/// The narrow interface the driver loop calls on the external decoder.
///
/// Exactly one [`Instruction`] is produced per raw word; undefined
/// encodings map to [`Instruction::Unallocated`].
pub trait Decoder {
    fn decode(&self, raw: u32) -> Instruction;
}

/// Decode an A64 logical immediate from its (N, immr, imms) fields.
///
/// Returns `None` for the reserved encodings. Decoders use this when
/// building [`Instruction::LogicalImm`]; it lives here so the contract is
/// self-contained.
pub fn decode_bitmask_imm(sf: bool, n: u8, immr: u8, imms: u8) -> Option<u64> {
    let imms = imms as u32;
    let immr = immr as u32;

    // Concatenate N and NOT(imms) to find the element size.
    let nimms = ((n as u32) << 6) | ((imms ^ 0x3F) & 0x3F);
    if nimms == 0 {
        return None;
    }
    let len = 31 - nimms.leading_zeros();
    let esize = 1u32 << len;
    let levels = esize - 1;

    if !sf && n != 0 {
        return None;
    }

    let s = imms & levels;
    let r = immr & levels;
    if s == levels {
        return None;
    }

    let welem: u64 = (1u64 << (s + 1)) - 1;
    let mask = if esize == 64 { u64::MAX } else { (1u64 << esize) - 1 };
    let rotated = if r == 0 {
        welem
    } else {
        ((welem >> r) | (welem << (esize - r))) & mask
    };

    // Replicate the element to fill 64 bits.
    let mut result = rotated;
    let mut size = esize;
    while size < 64 {
        result |= result << size;
        size *= 2;
    }

    Some(if sf { result } else { result & 0xFFFF_FFFF })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmask_imm_common_patterns() {
        // 0x5555...: esize 2, one bit set.
        assert_eq!(decode_bitmask_imm(true, 0, 0, 0x3C), Some(0x5555_5555_5555_5555));
        // All-ones is reserved.
        assert_eq!(decode_bitmask_imm(true, 1, 0, 0x3F), None);
        // 32-bit with N set is reserved.
        assert_eq!(decode_bitmask_imm(false, 1, 0, 0), None);
        // esize 8 with 7 ones per element.
        assert_eq!(decode_bitmask_imm(true, 0, 0, 0x36), Some(0x7F7F_7F7F_7F7F_7F7F));
    }

    #[test]
    fn test_vector_format_lanes() {
        assert_eq!(VectorFormat::V16B.lane_count(0), 16);
        assert_eq!(VectorFormat::V2D.lane_count(0), 2);
        assert_eq!(VectorFormat::VnS.lane_count(128), 4);
        assert_eq!(VectorFormat::VnS.lane_count(256), 8);
        assert_eq!(VectorFormat::VnB.lane_count(2048), 256);
        assert_eq!(VectorFormat::S.lane_count(128), 1);
    }

    #[test]
    fn test_vector_format_widen() {
        assert_eq!(VectorFormat::V8B.widen(), VectorFormat::V8H);
        assert_eq!(VectorFormat::V2S.widen(), VectorFormat::V2D);
        assert_eq!(VectorFormat::VnH.widen(), VectorFormat::VnS);
    }

    #[test]
    fn test_condition_from_bits() {
        assert_eq!(Condition::from_bits(0), Condition::Eq);
        assert_eq!(Condition::from_bits(0b1110), Condition::Al);
        assert_eq!(Condition::from_bits(0b1111), Condition::Nv);
    }
}
