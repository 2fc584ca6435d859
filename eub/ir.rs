// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! The machine-instruction data model consumed by the encoder.
//!
//! Instructions arrive fully scheduled and register-allocated; nothing here
//! is rewritten during encoding.  Numeric codes follow the EU native
//! instruction layout for Gen8 through Gen11.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Platform {
    Gen8,
    Gen9,
    Gen11,
}

impl Platform {
    /// Gen9 moved the extended-descriptor function control of plain sends
    /// into nibbles scattered over the source-1 region.
    pub fn spreads_send_ex_desc(&self) -> bool {
        *self >= Platform::Gen9
    }

    /// Send instructions only compact on Gen8.
    pub fn compacts_send(&self) -> bool {
        *self == Platform::Gen8
    }
}

pub const GRF_SIZE: u32 = 32;
pub const INST_SIZE: u32 = 16;

/// Branch offsets are expressed in 8-byte units, half of a native
/// instruction.
pub const JUMP_UNIT: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Illegal,
    Mov,
    Sel,
    Movi,
    Not,
    And,
    Or,
    Xor,
    Shr,
    Shl,
    Asr,
    Ror,
    Rol,
    Cmp,
    Cmpn,
    Csel,
    Bfrev,
    Bfe,
    Bfi1,
    Bfi2,
    Jmpi,
    If,
    Else,
    Endif,
    While,
    Break,
    Cont,
    Halt,
    Call,
    Ret,
    Goto,
    Join,
    Wait,
    Send,
    Sendc,
    Sends,
    Sendsc,
    Math,
    Add,
    Mul,
    Avg,
    Frc,
    Rndu,
    Rndd,
    Rnde,
    Rndz,
    Mac,
    Mach,
    Lzd,
    Fbh,
    Fbl,
    Cbit,
    Addc,
    Subb,
    Sad2,
    Sada2,
    Dp4,
    Dph,
    Dp3,
    Dp2,
    Dp4a,
    Line,
    Pln,
    Mad,
    Lrp,
    Madm,
    Nop,
}

impl Opcode {
    /// The 7-bit hardware opcode, or `None` when the opcode does not exist
    /// on the given platform.
    pub fn hw_code(&self, platform: Platform) -> Option<u8> {
        use Opcode::*;
        let code = match self {
            Illegal => 0x00,
            Mov => 0x01,
            Sel => 0x02,
            Movi => 0x03,
            Not => 0x04,
            And => 0x05,
            Or => 0x06,
            Xor => 0x07,
            Shr => 0x08,
            Shl => 0x09,
            Asr => 0x0c,
            Ror if platform >= Platform::Gen11 => 0x0e,
            Rol if platform >= Platform::Gen11 => 0x0f,
            Ror | Rol => return None,
            Cmp => 0x10,
            Cmpn => 0x11,
            Csel => 0x12,
            Bfrev => 0x17,
            Bfe => 0x18,
            Bfi1 => 0x19,
            Bfi2 => 0x1a,
            Jmpi => 0x20,
            If => 0x22,
            Else => 0x24,
            Endif => 0x25,
            While => 0x27,
            Break => 0x28,
            Cont => 0x29,
            Halt => 0x2a,
            Call => 0x2c,
            Ret => 0x2d,
            Goto => 0x2e,
            Join => 0x2f,
            Wait => 0x30,
            Send => 0x31,
            Sendc => 0x32,
            Sends if platform >= Platform::Gen9 => 0x33,
            Sendsc if platform >= Platform::Gen9 => 0x34,
            Sends | Sendsc => return None,
            Math => 0x38,
            Add => 0x40,
            Mul => 0x41,
            Avg => 0x42,
            Frc => 0x43,
            Rndu => 0x44,
            Rndd => 0x45,
            Rnde => 0x46,
            Rndz => 0x47,
            Mac => 0x48,
            Mach => 0x49,
            Lzd => 0x4a,
            Fbh => 0x4b,
            Fbl => 0x4c,
            Cbit => 0x4d,
            Addc => 0x4e,
            Subb => 0x4f,
            Sad2 => 0x50,
            Sada2 => 0x51,
            Dp4 => 0x54,
            Dph => 0x55,
            Dp3 => 0x56,
            Dp2 => 0x57,
            Dp4a if platform >= Platform::Gen11 => 0x58,
            Dp4a => return None,
            Line => 0x59,
            Pln => 0x5a,
            Mad => 0x5b,
            Lrp => 0x5c,
            Madm => 0x5d,
            Nop => 0x7e,
        };
        Some(code)
    }

    pub fn is_send(&self) -> bool {
        matches!(
            self,
            Opcode::Send | Opcode::Sendc | Opcode::Sends | Opcode::Sendsc
        )
    }

    pub fn is_split_send(&self) -> bool {
        matches!(self, Opcode::Sends | Opcode::Sendsc)
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Opcode::Jmpi
                | Opcode::If
                | Opcode::Else
                | Opcode::Endif
                | Opcode::While
                | Opcode::Break
                | Opcode::Cont
                | Opcode::Halt
                | Opcode::Call
                | Opcode::Ret
                | Opcode::Goto
                | Opcode::Join
        )
    }

    /// Branches carrying a JIP field in the last DWORD.
    pub fn has_jip(&self) -> bool {
        matches!(
            self,
            Opcode::If
                | Opcode::While
                | Opcode::Else
                | Opcode::Break
                | Opcode::Cont
                | Opcode::Halt
                | Opcode::Goto
                | Opcode::Endif
                | Opcode::Join
        )
    }

    /// Branches carrying a second, UIP field.
    pub fn has_uip(&self) -> bool {
        matches!(
            self,
            Opcode::Break
                | Opcode::Cont
                | Opcode::Halt
                | Opcode::If
                | Opcode::Else
                | Opcode::Goto
        )
    }

    /// The JIP lives in the src1 immediate slot for these; everything else
    /// branch-like uses src0.
    pub fn jip_in_src1(&self) -> bool {
        matches!(self, Opcode::While | Opcode::Endif | Opcode::Join)
    }

    /// Opcodes the compactor must leave in native form.
    pub fn never_compacts(&self) -> bool {
        matches!(
            self,
            Opcode::If
                | Opcode::Else
                | Opcode::Endif
                | Opcode::While
                | Opcode::Halt
                | Opcode::Break
                | Opcode::Cont
                | Opcode::Goto
                | Opcode::Join
                | Opcode::Call
                | Opcode::Ret
                | Opcode::Nop
        )
    }

    /// These always execute as a single channel regardless of the stated
    /// execution size.
    pub fn forces_exec1(&self) -> bool {
        matches!(self, Opcode::Nop | Opcode::Wait | Opcode::Jmpi)
    }
}

/// Operand data types.  `Uv`, `V` and `Vf` are packed-vector immediate
/// types and never name a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Ub,
    B,
    Uw,
    W,
    Ud,
    D,
    Uq,
    Q,
    Hf,
    F,
    Df,
    Uv,
    V,
    Vf,
}

impl DataType {
    pub fn bytes(&self) -> u32 {
        match self {
            DataType::Ub | DataType::B => 1,
            DataType::Uw | DataType::W | DataType::Hf => 2,
            DataType::Ud
            | DataType::D
            | DataType::F
            | DataType::Uv
            | DataType::V
            | DataType::Vf => 4,
            DataType::Uq | DataType::Q | DataType::Df => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            DataType::Hf | DataType::F | DataType::Df | DataType::Vf
        )
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self, DataType::Uq | DataType::Q | DataType::Df)
    }

    /// Destination and source-register encodings share one table.
    pub fn reg_code(&self) -> Option<u64> {
        let code = match self {
            DataType::Ud => 0,
            DataType::D => 1,
            DataType::Uw => 2,
            DataType::W => 3,
            DataType::Ub => 4,
            DataType::B => 5,
            DataType::Df => 6,
            DataType::F => 7,
            DataType::Uq => 8,
            DataType::Q => 9,
            DataType::Hf => 10,
            DataType::Uv | DataType::V | DataType::Vf => return None,
        };
        Some(code)
    }

    /// Immediate sources use a distinct table; note HF and DF trade places
    /// relative to the register table.
    pub fn imm_code(&self) -> Option<u64> {
        let code = match self {
            DataType::Ud => 0,
            DataType::D => 1,
            DataType::Uw => 2,
            DataType::W => 3,
            DataType::Uv => 4,
            DataType::Vf => 5,
            DataType::V => 6,
            DataType::F => 7,
            DataType::Uq => 8,
            DataType::Q => 9,
            DataType::Df => 10,
            DataType::Hf => 11,
            DataType::Ub | DataType::B => return None,
        };
        Some(code)
    }

    /// Relative type code for the dense three-source layouts.
    pub fn ternary_code(&self) -> Option<u64> {
        let code = match self {
            DataType::F => 0,
            DataType::D => 1,
            DataType::Ud => 2,
            DataType::Df => 3,
            DataType::Hf => 4,
            _ => return None,
        };
        Some(code)
    }
}

/// Architectural register files and their 4-bit selector codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchFile {
    Null,
    Addr,
    Acc,
    Flag,
    ChanEn,
    Msg,
    Sp,
    State,
    Cntl,
    NotCnt,
    Ip,
    Tdr,
    Tm,
    Fc,
    Dbg,
}

impl ArchFile {
    pub fn code(&self) -> u64 {
        match self {
            ArchFile::Null => 0x0,
            ArchFile::Addr => 0x1,
            ArchFile::Acc => 0x2,
            ArchFile::Flag => 0x3,
            ArchFile::ChanEn => 0x4,
            ArchFile::Msg => 0x5,
            ArchFile::Sp => 0x6,
            ArchFile::State => 0x7,
            ArchFile::Cntl => 0x8,
            ArchFile::NotCnt => 0x9,
            ArchFile::Ip => 0xa,
            ArchFile::Tdr => 0xb,
            ArchFile::Tm => 0xc,
            ArchFile::Fc => 0xd,
            ArchFile::Dbg => 0xf,
        }
    }
}

/// Where an operand's bits live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegBase {
    /// Direct GRF access; `subreg` counts elements of the operand type.
    Grf { reg: u16, subreg: u16 },
    /// Architectural register; `subreg` counts elements of the operand type.
    Arch { file: ArchFile, num: u8, subreg: u16 },
    /// Register-indirect through an address subregister plus a signed byte
    /// offset.
    Indirect { addr_subreg: u8, offset: i16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Align1,
    Align16,
}

/// An explicit align1 region, element-count units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub vert: u8,
    pub width: u8,
    pub horz: u8,
}

impl Region {
    pub const SCALAR: Region = Region {
        vert: 0,
        width: 1,
        horz: 0,
    };
}

/// A 4-channel align16 select.  `Swizzle::ID` leaves channels in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swizzle(pub [u8; 4]);

impl Swizzle {
    pub const ID: Swizzle = Swizzle([0, 1, 2, 3]);

    /// Broadcast of channel 0, the replicate form of three-source math.
    pub const REP: Swizzle = Swizzle([0, 0, 0, 0]);

    pub fn is_rep(&self) -> bool {
        self.0 == [0, 0, 0, 0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcMod {
    None,
    Abs,
    Neg,
    NegAbs,
    /// Bitwise NOT of logic opcodes; shares the negate encoding.
    Not,
}

impl SrcMod {
    pub fn code(&self) -> u64 {
        match self {
            SrcMod::None => 0,
            SrcMod::Abs => 1,
            SrcMod::Neg | SrcMod::Not => 2,
            SrcMod::NegAbs => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dst {
    pub base: RegBase,
    pub dtype: DataType,
    /// Element stride, 1/2/4.  Ignored under align16.
    pub horz_stride: u8,
    /// Align16 channel-enable mask, X..W low to high.
    pub write_mask: u8,
    /// Special accumulator selector (acc2..acc9 overlay) for the multi-phase
    /// math forms; repurposes the channel-enable bits.
    pub acc_sel: Option<u8>,
}

impl Dst {
    pub fn grf(reg: u16, subreg: u16, dtype: DataType) -> Dst {
        Dst {
            base: RegBase::Grf { reg, subreg },
            dtype,
            horz_stride: 1,
            write_mask: 0xf,
            acc_sel: None,
        }
    }

    pub fn null(dtype: DataType) -> Dst {
        Dst {
            base: RegBase::Arch {
                file: ArchFile::Null,
                num: 0,
                subreg: 0,
            },
            dtype,
            horz_stride: 1,
            write_mask: 0xf,
            acc_sel: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SrcReg {
    pub base: RegBase,
    pub dtype: DataType,
    pub modifier: SrcMod,
    /// `None` lets the encoder derive the documented default region.
    pub region: Option<Region>,
    pub swizzle: Swizzle,
    pub acc_sel: Option<u8>,
}

impl SrcReg {
    pub fn grf(reg: u16, subreg: u16, dtype: DataType) -> SrcReg {
        SrcReg {
            base: RegBase::Grf { reg, subreg },
            dtype,
            modifier: SrcMod::None,
            region: None,
            swizzle: Swizzle::ID,
            acc_sel: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Src {
    Reg(SrcReg),
    Imm { bits: u64, dtype: DataType },
    /// A symbolic branch target, filled in by label resolution.
    Target(Label),
}

impl Src {
    pub fn imm_f(f: f32) -> Src {
        Src::Imm {
            bits: u64::from(f.to_bits()),
            dtype: DataType::F,
        }
    }

    pub fn imm_d(v: i32) -> Src {
        Src::Imm {
            bits: v as u32 as u64,
            dtype: DataType::D,
        }
    }

    pub fn imm_w(v: i16) -> Src {
        Src::Imm {
            bits: v as u16 as u64,
            dtype: DataType::W,
        }
    }
}

/// Predicate-control modes.  The horizontal any/all group is align1-only;
/// the channel-select group is align16-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredCtrl {
    Default,
    AnyV,
    AllV,
    Any2H,
    All2H,
    Any4H,
    All4H,
    Any8H,
    All8H,
    Any16H,
    All16H,
    Any32H,
    All32H,
    X,
    Y,
    Z,
    W,
}

#[derive(Debug, Clone, Copy)]
pub struct Predicate {
    pub ctrl: PredCtrl,
    pub invert: bool,
}

/// Semantic condition modifiers.  Zero/Equal and NotZero/NotEqual are
/// distinct upstream but collapse to one hardware code each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondMod {
    Zero,
    Equal,
    NotZero,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Overflow,
    Any,
    All,
}

impl CondMod {
    pub fn code(&self) -> u64 {
        match self {
            CondMod::Zero | CondMod::Equal => 1,
            CondMod::NotZero | CondMod::NotEqual => 2,
            CondMod::Greater => 3,
            CondMod::GreaterEqual => 4,
            CondMod::Less => 5,
            CondMod::LessEqual => 6,
            CondMod::Overflow => 8,
            CondMod::Any => 9,
            CondMod::All => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagRef {
    pub reg: u8,
    pub subreg: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCtrl {
    Normal,
    Atomic,
    Switch,
    NoPreempt,
}

impl ThreadCtrl {
    pub fn code(&self) -> u64 {
        match self {
            ThreadCtrl::Normal => 0,
            ThreadCtrl::Atomic => 1,
            ThreadCtrl::Switch => 2,
            ThreadCtrl::NoPreempt => 3,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InstOpts: u32 {
        const ACC_WR_EN = 1 << 0;
        const NO_DD_CLR = 1 << 1;
        const NO_DD_CHK = 1 << 2;
        const WE_ALL = 1 << 3;
        const BREAKPOINT = 1 << 4;
        const EOT = 1 << 5;
        const NO_SRC_DEP_SET = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPolicy {
    Normal,
    MustNot,
    Must,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFunc {
    Inv,
    Log,
    Exp,
    Sqrt,
    Rsq,
    Sin,
    Cos,
    Fdiv,
    Pow,
    IntDivBoth,
    IntDivQuot,
    IntDivRem,
    Invm,
    Rsqrtm,
}

impl MathFunc {
    pub fn code(&self) -> u64 {
        match self {
            MathFunc::Inv => 1,
            MathFunc::Log => 2,
            MathFunc::Exp => 3,
            MathFunc::Sqrt => 4,
            MathFunc::Rsq => 5,
            MathFunc::Sin => 6,
            MathFunc::Cos => 7,
            MathFunc::Fdiv => 9,
            MathFunc::Pow => 10,
            MathFunc::IntDivBoth => 11,
            MathFunc::IntDivQuot => 12,
            MathFunc::IntDivRem => 13,
            MathFunc::Invm => 14,
            MathFunc::Rsqrtm => 15,
        }
    }

    /// The multi-phase forms read their extra operands through the special
    /// accumulator overlay.
    pub fn uses_acc_overlay(&self) -> bool {
        matches!(self, MathFunc::Invm | MathFunc::Rsqrtm)
    }
}

/// Message descriptor or extended descriptor: an inline constant or a read
/// of address subregister a0.N.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDesc {
    Imm(u32),
    A0 { subreg: u8 },
}

#[derive(Debug, Clone, Copy)]
pub struct SendInfo {
    pub desc: SendDesc,
    pub ex_desc: SendDesc,
    /// Half-precision input format, descriptor bit 29.
    pub input_16bit: bool,
    /// Half-precision return format, descriptor bit 30.
    pub return_16bit: bool,
}

impl SendInfo {
    pub fn new(desc: SendDesc, ex_desc: SendDesc) -> SendInfo {
        SendInfo {
            desc,
            ex_desc,
            input_16bit: false,
            return_16bit: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    None,
    Math {
        func: MathFunc,
        partial_precision: bool,
    },
    Send(SendInfo),
}

#[derive(Debug, Clone)]
pub struct Inst {
    pub op: Opcode,
    /// Channel count, 1/2/4/8/16/32.
    pub exec_size: u8,
    /// Channel-mask offset, a multiple of 4 in 0..32.
    pub chan_offset: u8,
    pub access: AccessMode,
    pub pred: Option<Predicate>,
    pub cond_mod: Option<CondMod>,
    pub flag: Option<FlagRef>,
    pub thread_ctrl: ThreadCtrl,
    pub saturate: bool,
    pub opts: InstOpts,
    pub dst: Option<Dst>,
    pub srcs: Vec<Src>,
    pub payload: Payload,
    pub compaction: CompactionPolicy,
}

impl Inst {
    pub fn new(op: Opcode, exec_size: u8) -> Inst {
        Inst {
            op,
            exec_size,
            chan_offset: 0,
            access: AccessMode::Align1,
            pred: None,
            cond_mod: None,
            flag: None,
            thread_ctrl: ThreadCtrl::Normal,
            saturate: false,
            opts: InstOpts::empty(),
            dst: None,
            srcs: Vec::new(),
            payload: Payload::None,
            compaction: CompactionPolicy::Normal,
        }
    }

    /// Three-source arithmetic shape; sends with three operands use their
    /// own layout instead.
    pub fn is_ternary(&self) -> bool {
        self.srcs.len() == 3 && !self.op.is_send()
    }

    pub fn branch_target(&self) -> Option<Label> {
        self.srcs.iter().find_map(|s| match s {
            Src::Target(l) => Some(*l),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub label: Option<Label>,
    pub insts: Vec<Inst>,
}

#[derive(Debug, Clone)]
pub struct Kernel {
    pub platform: Platform,
    pub blocks: Vec<BasicBlock>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_platform_gating() {
        assert_eq!(Opcode::Ror.hw_code(Platform::Gen8), None);
        assert_eq!(Opcode::Ror.hw_code(Platform::Gen11), Some(0x0e));
        assert_eq!(Opcode::Sends.hw_code(Platform::Gen8), None);
        assert_eq!(Opcode::Sends.hw_code(Platform::Gen9), Some(0x33));
        assert_eq!(Opcode::Dp4a.hw_code(Platform::Gen9), None);
        assert_eq!(Opcode::Mov.hw_code(Platform::Gen8), Some(0x01));
    }

    #[test]
    fn test_type_tables_disagree() {
        // The register and immediate tables are distinct; HF is the
        // loudest example.
        assert_eq!(DataType::Hf.reg_code(), Some(10));
        assert_eq!(DataType::Hf.imm_code(), Some(11));
        assert_eq!(DataType::Df.reg_code(), Some(6));
        assert_eq!(DataType::Df.imm_code(), Some(10));
        // Packed vectors never name registers.
        assert_eq!(DataType::Vf.reg_code(), None);
        assert_eq!(DataType::B.imm_code(), None);
    }

    #[test]
    fn test_cond_mod_collapse() {
        assert_eq!(CondMod::Zero.code(), CondMod::Equal.code());
        assert_eq!(CondMod::NotZero.code(), CondMod::NotEqual.code());
        assert_ne!(CondMod::Zero.code(), CondMod::NotZero.code());
    }

    #[test]
    fn test_not_shares_negate_encoding() {
        assert_eq!(SrcMod::Not.code(), SrcMod::Neg.code());
    }

    #[test]
    fn test_branch_classification() {
        assert!(Opcode::Jmpi.is_branch());
        assert!(!Opcode::Jmpi.has_jip());
        assert!(Opcode::Endif.has_jip());
        assert!(!Opcode::Endif.has_uip());
        assert!(Opcode::Endif.jip_in_src1());
        assert!(Opcode::If.has_uip());
        assert!(!Opcode::If.jip_in_src1());
    }
}
