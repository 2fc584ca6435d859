// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Per-instruction encoding: format selection, the header, and the
//! destination/source operand encoders of the native layout.

use bitview::{BitMutViewable, BitViewable, SetBit, SetFieldU64};
use std::ops::Range;
use tracing::trace;

use crate::error::EncodeError;
use crate::ir::*;
use crate::layout::{basic, hdr, SrcSlot, SRC0, SRC1};
use crate::send;
use crate::three_src;

/// One encoded instruction: a 128-bit native record, possibly rewritten in
/// place into its 64-bit compact form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedInst {
    pub(crate) words: [u32; 4],
    compacted: bool,
}

impl EncodedInst {
    pub fn new() -> EncodedInst {
        EncodedInst {
            words: [0; 4],
            compacted: false,
        }
    }

    pub fn words(&self) -> &[u32; 4] {
        &self.words
    }

    pub fn is_compacted(&self) -> bool {
        self.compacted
    }

    pub(crate) fn set_compacted(&mut self, compacted: bool) {
        self.compacted = compacted;
    }

    /// Size in 8-byte jump-granularity units.
    pub fn half_slots(&self) -> u32 {
        if self.compacted {
            1
        } else {
            2
        }
    }

    pub fn size_bytes(&self) -> u32 {
        self.half_slots() * (INST_SIZE / 2)
    }

    pub fn append_bytes(&self, out: &mut Vec<u8>) {
        let words = if self.compacted {
            &self.words[0..2]
        } else {
            &self.words[0..4]
        };
        for w in words {
            out.extend_from_slice(&w.to_le_bytes());
        }
    }
}

impl Default for EncodedInst {
    fn default() -> Self {
        EncodedInst::new()
    }
}

impl BitViewable for EncodedInst {
    fn bits(&self) -> usize {
        128
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        self.words.get_bit_range_u64(range)
    }
}

impl BitMutViewable for EncodedInst {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        self.words.set_bit_range_u64(range, val);
    }
}

/// The layout an instruction encodes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstFormat {
    /// Header-only instructions (nop, illegal).
    Bare,
    /// The native one/two-source layout, branches included.
    Basic,
    TernaryAlign16,
    TernaryAlign1,
    Send,
    SplitSend,
}

pub fn classify(inst: &Inst) -> InstFormat {
    if matches!(inst.op, Opcode::Nop | Opcode::Illegal) {
        InstFormat::Bare
    } else if inst.op.is_split_send() {
        InstFormat::SplitSend
    } else if inst.op.is_send() {
        InstFormat::Send
    } else if inst.is_ternary() {
        match inst.access {
            AccessMode::Align16 => InstFormat::TernaryAlign16,
            AccessMode::Align1 => InstFormat::TernaryAlign1,
        }
    } else {
        InstFormat::Basic
    }
}

pub fn exec_size_code(channels: u8) -> Result<u64, EncodeError> {
    match channels {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        16 => Ok(4),
        32 => Ok(5),
        n => Err(EncodeError::invariant(format!(
            "execution size {n} is not a power of two in 1..32"
        ))),
    }
}

pub fn vert_stride_code(elems: u8) -> Result<u64, EncodeError> {
    match elems {
        0 => Ok(0),
        1 => Ok(1),
        2 => Ok(2),
        4 => Ok(3),
        8 => Ok(4),
        16 => Ok(5),
        32 => Ok(6),
        n => Err(EncodeError::invariant(format!("bad vertical stride {n}"))),
    }
}

/// Indirect sources always use the one-dimensional vertical-stride code.
pub const VERT_STRIDE_ONE_DIMEN: u64 = 0xf;

pub fn width_code(elems: u8) -> Result<u64, EncodeError> {
    match elems {
        1 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        16 => Ok(4),
        n => Err(EncodeError::invariant(format!("bad region width {n}"))),
    }
}

pub fn horz_stride_code(elems: u8) -> Result<u64, EncodeError> {
    match elems {
        0 => Ok(0),
        1 => Ok(1),
        2 => Ok(2),
        4 => Ok(3),
        n => Err(EncodeError::invariant(format!("bad horizontal stride {n}"))),
    }
}

// Default region components indexed by execution-size code.
const DEFAULT_WIDTH: [u8; 6] = [1, 2, 4, 8, 8, 16];
const DEFAULT_HORZ: [u8; 6] = [0, 1, 1, 1, 1, 1];
const DEFAULT_VERT: [u8; 6] = [0, 2, 4, 8, 8, 16];

pub(crate) const REG_FILE_ARCH: u64 = 0;
pub(crate) const REG_FILE_GRF: u64 = 1;
pub(crate) const REG_FILE_IMM: u64 = 3;

fn byte_addr(reg: u16, subreg: u16, dtype: DataType) -> u64 {
    u64::from(reg) * u64::from(GRF_SIZE) + u64::from(subreg) * u64::from(dtype.bytes())
}

fn reg_type_code(dtype: DataType) -> Result<u64, EncodeError> {
    dtype.reg_code().ok_or_else(|| {
        EncodeError::invariant(format!("{dtype:?} is not a register type"))
    })
}

fn pred_ctrl_code(
    ctrl: PredCtrl,
    access: AccessMode,
) -> Result<u64, EncodeError> {
    let code = match access {
        AccessMode::Align1 => match ctrl {
            PredCtrl::Default => 1,
            PredCtrl::AnyV => 2,
            PredCtrl::AllV => 3,
            PredCtrl::Any2H => 4,
            PredCtrl::All2H => 5,
            PredCtrl::Any4H => 6,
            PredCtrl::All4H => 7,
            PredCtrl::Any8H => 8,
            PredCtrl::All8H => 9,
            PredCtrl::Any16H => 10,
            PredCtrl::All16H => 11,
            PredCtrl::Any32H => 12,
            PredCtrl::All32H => 13,
            c => {
                return Err(EncodeError::invariant(format!(
                    "predicate control {c:?} requires align16"
                )))
            }
        },
        AccessMode::Align16 => match ctrl {
            PredCtrl::Default => 1,
            PredCtrl::X => 2,
            PredCtrl::Y => 3,
            PredCtrl::Z => 4,
            PredCtrl::W => 5,
            PredCtrl::Any4H => 6,
            PredCtrl::All4H => 7,
            c => {
                return Err(EncodeError::invariant(format!(
                    "predicate control {c:?} requires align1"
                )))
            }
        },
    };
    Ok(code)
}

/// The acc2..acc9 overlay repurposes channel-select bits; only madm and
/// the multi-phase math forms read operands through it.
fn check_acc_overlay(inst: &Inst) -> Result<(), EncodeError> {
    let allowed = match &inst.payload {
        Payload::Math { func, .. } => func.uses_acc_overlay(),
        _ => inst.op == Opcode::Madm,
    };
    if allowed {
        return Ok(());
    }
    let uses = inst.dst.as_ref().map_or(false, |d| d.acc_sel.is_some())
        || inst
            .srcs
            .iter()
            .any(|s| matches!(s, Src::Reg(r) if r.acc_sel.is_some()));
    if uses {
        return Err(EncodeError::invariant(format!(
            "{:?} cannot take special-accumulator operands",
            inst.op
        )));
    }
    Ok(())
}

/// Encodes one instruction into its native 128-bit record.  Branch target
/// fields are left zero here; label resolution fills them in afterwards.
pub fn encode_inst(
    platform: Platform,
    inst: &Inst,
) -> Result<EncodedInst, EncodeError> {
    let mut bin = EncodedInst::new();

    let opc = inst.op.hw_code(platform).ok_or(
        EncodeError::UnsupportedOpcode {
            op: inst.op,
            platform,
        },
    )?;
    bin.set_field_u64(hdr::OPCODE, u64::from(opc));
    check_acc_overlay(inst)?;

    let format = classify(inst);
    if format == InstFormat::Bare {
        return Ok(bin);
    }

    encode_header(&mut bin, platform, inst)?;

    match format {
        InstFormat::Bare => unreachable!(),
        InstFormat::TernaryAlign16 => {
            three_src::encode_align16(&mut bin, inst)?
        }
        InstFormat::TernaryAlign1 => three_src::encode_align1(&mut bin, inst)?,
        InstFormat::SplitSend => send::encode_split_send(&mut bin, platform, inst)?,
        InstFormat::Send => {
            encode_operands(&mut bin, inst)?;
            send::encode_send(&mut bin, platform, inst)?;
        }
        InstFormat::Basic => encode_operands(&mut bin, inst)?,
    }

    Ok(bin)
}

fn encode_header(
    bin: &mut EncodedInst,
    platform: Platform,
    inst: &Inst,
) -> Result<(), EncodeError> {
    if inst.access == AccessMode::Align16 {
        bin.set_bit(hdr::ACCESS_MODE.start, true);
    }

    let es = if inst.op.forces_exec1() {
        0
    } else {
        exec_size_code(inst.exec_size)?
    };
    bin.set_field_u64(hdr::EXEC_SIZE, es);

    // Channel-group selection from the mask offset.
    if inst.chan_offset != 0 {
        if inst.chan_offset % 4 != 0 || inst.chan_offset >= 32 {
            return Err(EncodeError::invariant(format!(
                "channel offset {} is not a multiple of 4 below 32",
                inst.chan_offset
            )));
        }
        bin.set_field_u64(hdr::QTR_CTRL, u64::from(inst.chan_offset / 8));
        bin.set_bit(hdr::NIB_CTRL.start, inst.chan_offset % 8 != 0);
    }

    if let Some(flag) = inst.flag {
        if flag.reg > 1 || flag.subreg > 1 {
            return Err(EncodeError::invariant(format!(
                "flag register f{}.{} out of range",
                flag.reg, flag.subreg
            )));
        }
        bin.set_bit(hdr::FLAG_REG, flag.reg != 0);
        bin.set_bit(hdr::FLAG_SUBREG, flag.subreg != 0);
    }

    if let Some(pred) = inst.pred {
        let code = pred_ctrl_code(pred.ctrl, inst.access)?;
        if pred.ctrl == PredCtrl::Default {
            trace!("predicate control defaulted to sequential mapping");
        }
        bin.set_field_u64(hdr::PRED_CTRL, code);
        bin.set_bit(hdr::PRED_INV, pred.invert);
    }

    match &inst.payload {
        Payload::Math {
            func,
            partial_precision,
        } => {
            if inst.op != Opcode::Math {
                return Err(EncodeError::invariant(
                    "math payload on a non-math opcode".to_string(),
                ));
            }
            if inst.cond_mod.is_some() {
                return Err(EncodeError::invariant(
                    "math cannot update flags".to_string(),
                ));
            }
            bin.set_field_u64(hdr::MATH_FUNC, func.code());
            bin.set_bit(hdr::MATH_PART_PREC, *partial_precision);
        }
        Payload::Send(_) => {
            if !inst.op.is_send() {
                return Err(EncodeError::invariant(
                    "send payload on a non-send opcode".to_string(),
                ));
            }
            if inst.cond_mod.is_some() {
                return Err(EncodeError::invariant(
                    "send cannot update flags".to_string(),
                ));
            }
            // The SFID nibble is filled in by the descriptor encoder.
        }
        Payload::None => {
            if inst.op.is_send() {
                return Err(EncodeError::MalformedSend(
                    "missing message descriptor".to_string(),
                ));
            }
            if let Some(cm) = inst.cond_mod {
                bin.set_field_u64(hdr::COND_MOD, cm.code());
            }
        }
    }

    bin.set_bit(hdr::SATURATE, inst.saturate);

    // Atomic/switch thread control is meaningless on the structured
    // control-flow markers.
    let skip_thread_ctrl =
        matches!(inst.op, Opcode::If | Opcode::Else | Opcode::Endif);
    if !skip_thread_ctrl && inst.payload_is_not_math() {
        bin.set_field_u64(hdr::THREAD_CTRL, inst.thread_ctrl.code());
    }

    let mut dep = 0u64;
    if inst.opts.contains(InstOpts::NO_DD_CLR) {
        dep |= 1;
    }
    if inst.opts.contains(InstOpts::NO_DD_CHK) {
        dep |= 2;
    }
    bin.set_field_u64(hdr::DEP_CTRL, dep);

    // jmpi always runs in the whole-quad domain.
    let we_all = inst.opts.contains(InstOpts::WE_ALL) || inst.op == Opcode::Jmpi;
    bin.set_bit(hdr::MASK_CTRL, we_all);

    bin.set_bit(hdr::DEBUG_CTRL, inst.opts.contains(InstOpts::BREAKPOINT));

    if inst.op.is_send() && platform >= Platform::Gen9 {
        bin.set_bit(
            hdr::NO_SRC_DEP_SET,
            inst.opts.contains(InstOpts::NO_SRC_DEP_SET),
        );
    } else {
        bin.set_bit(hdr::ACC_WR_CTRL, inst.opts.contains(InstOpts::ACC_WR_EN));
    }

    Ok(())
}

impl Inst {
    fn payload_is_not_math(&self) -> bool {
        !matches!(self.payload, Payload::Math { .. })
    }
}

fn encode_operands(
    bin: &mut EncodedInst,
    inst: &Inst,
) -> Result<(), EncodeError> {
    // wait has no destination of its own; the notify register is mirrored
    // from src0.
    if inst.op == Opcode::Wait {
        let src = wait_notify_src(inst)?;
        let dst = Dst {
            base: src.base,
            dtype: src.dtype,
            horz_stride: 1,
            write_mask: 0xf,
            acc_sel: None,
        };
        encode_dst(bin, inst, &dst)?;
        encode_src(bin, inst, 0, &Src::Reg(src))?;
        return Ok(());
    }

    if inst.op == Opcode::Jmpi {
        return encode_jmpi_operands(bin, inst);
    }

    if let Some(dst) = &inst.dst {
        encode_dst(bin, inst, dst)?;
    }

    if inst.srcs.len() > 2 {
        return Err(EncodeError::invariant(format!(
            "{:?} cannot take {} sources in the native layout",
            inst.op,
            inst.srcs.len()
        )));
    }
    for (i, src) in inst.srcs.iter().enumerate() {
        encode_src(bin, inst, i, src)?;
    }

    Ok(())
}

fn wait_notify_src(inst: &Inst) -> Result<SrcReg, EncodeError> {
    match inst.srcs.first() {
        Some(Src::Reg(r)) if matches!(r.base, RegBase::Arch { .. }) => {
            Ok(r.clone())
        }
        _ => Err(EncodeError::invariant(
            "wait requires a notify-register source".to_string(),
        )),
    }
}

/// jmpi addresses relative to the instruction pointer: both the
/// destination and source 0 are pinned to the IP register, and a register
/// jump target goes in the src1 slot.
fn encode_jmpi_operands(
    bin: &mut EncodedInst,
    inst: &Inst,
) -> Result<(), EncodeError> {
    let ip = RegBase::Arch {
        file: ArchFile::Ip,
        num: 0,
        subreg: 0,
    };
    let dst = Dst {
        base: ip,
        dtype: DataType::Ud,
        horz_stride: 1,
        write_mask: 0xf,
        acc_sel: None,
    };
    encode_dst(bin, inst, &dst)?;

    let ip_src = SrcReg {
        base: ip,
        dtype: DataType::Ud,
        modifier: SrcMod::None,
        region: Some(Region::SCALAR),
        swizzle: Swizzle::ID,
        acc_sel: None,
    };
    encode_src(bin, inst, 0, &Src::Reg(ip_src))?;

    match inst.srcs.first() {
        Some(Src::Target(_)) | None => Ok(()),
        Some(src @ Src::Reg(_)) => encode_src(bin, inst, 1, src),
        Some(Src::Imm { .. }) => Err(EncodeError::invariant(
            "jmpi takes a label or register target".to_string(),
        )),
    }
}

pub fn encode_dst(
    bin: &mut EncodedInst,
    inst: &Inst,
    dst: &Dst,
) -> Result<(), EncodeError> {
    bin.set_field_u64(basic::DST_TYPE, reg_type_code(dst.dtype)?);

    match dst.base {
        RegBase::Grf { reg, subreg } => {
            bin.set_field_u64(basic::DST_REG_FILE, REG_FILE_GRF);
            let byte = byte_addr(reg, subreg, dst.dtype);
            match inst.access {
                AccessMode::Align1 => {
                    bin.set_field_u64(basic::DST_REG_BYTE, byte);
                }
                AccessMode::Align16 => {
                    bin.set_field_u64(basic::DST_REG_OWORD, byte >> 4);
                    let en = dst.acc_sel.map_or(dst.write_mask, |a| a);
                    bin.set_field_u64(basic::DST_CHAN_EN, u64::from(en) & 0xf);
                }
            }
        }
        RegBase::Arch { file, num, subreg } => {
            bin.set_field_u64(basic::DST_REG_FILE, REG_FILE_ARCH);
            bin.set_field_u64(basic::DST_ARCH_FILE, file.code());
            bin.set_field_u64(basic::DST_ARCH_NUM, u64::from(num) & 0xf);
            let sub_byte = u64::from(subreg) * u64::from(dst.dtype.bytes());
            let sub = match inst.access {
                AccessMode::Align1 => sub_byte,
                AccessMode::Align16 => sub_byte >> 4,
            };
            bin.set_field_u64(basic::DST_ARCH_SUBREG_BYTE, sub);
            if inst.access == AccessMode::Align16 {
                bin.set_field_u64(
                    basic::DST_CHAN_EN,
                    u64::from(dst.write_mask) & 0xf,
                );
            }
        }
        RegBase::Indirect {
            addr_subreg,
            offset,
        } => {
            bin.set_field_u64(basic::DST_REG_FILE, REG_FILE_GRF);
            bin.set_bit(basic::DST_ADDR_MODE, true);
            bin.set_field_u64(basic::DST_IDX_REG, u64::from(addr_subreg) & 0xf);
            let off = offset as i64;
            if !(-512..512).contains(&off) {
                return Err(EncodeError::invariant(format!(
                    "indirect destination offset {off} out of range"
                )));
            }
            match inst.access {
                AccessMode::Align1 => {
                    bin.set_field_u64(
                        basic::DST_IDX_IMM_BYTE,
                        (off as u64) & 0x1ff,
                    );
                }
                AccessMode::Align16 => {
                    bin.set_field_u64(
                        basic::DST_IDX_IMM_OWORD,
                        ((off as u64) >> 4) & 0x1f,
                    );
                    bin.set_field_u64(
                        basic::DST_CHAN_EN,
                        u64::from(dst.write_mask) & 0xf,
                    );
                }
            }
            bin.set_bit(basic::DST_IDX_IMM_MSB, (off >> 9) & 1 != 0);
        }
    }

    // Hardware treats the align16 destination stride as don't-care but
    // still requires the fixed encoding.
    let hs = match inst.access {
        AccessMode::Align16 => match dst.horz_stride {
            1 => 0,
            2 => 2,
            4 => 3,
            _ => 1,
        },
        AccessMode::Align1 => match dst.horz_stride {
            1 => 1,
            2 => 2,
            4 => 3,
            n => {
                return Err(EncodeError::invariant(format!(
                    "destination stride {n} is not 1, 2 or 4"
                )))
            }
        },
    };
    bin.set_field_u64(basic::DST_HORZ_STRIDE, hs);

    Ok(())
}

fn slot_layout(slot: usize) -> &'static SrcSlot {
    if slot == 0 {
        &SRC0
    } else {
        &SRC1
    }
}

pub fn encode_src(
    bin: &mut EncodedInst,
    inst: &Inst,
    slot: usize,
    src: &Src,
) -> Result<(), EncodeError> {
    match src {
        Src::Reg(reg) => encode_src_reg(bin, inst, slot, reg),
        Src::Imm { bits, dtype } => {
            encode_src_imm(bin, inst, slot, *bits, *dtype)
        }
        // Branch targets are filled in during label resolution.
        Src::Target(_) => Ok(()),
    }
}

fn encode_src_reg(
    bin: &mut EncodedInst,
    inst: &Inst,
    slot: usize,
    src: &SrcReg,
) -> Result<(), EncodeError> {
    let sl = slot_layout(slot);

    bin.set_field_u64(sl.dtype.clone(), reg_type_code(src.dtype)?);
    bin.set_field_u64(sl.modifier.clone(), src.modifier.code());

    let mut indirect = false;
    match src.base {
        RegBase::Grf { reg, subreg } => {
            bin.set_field_u64(sl.reg_file.clone(), REG_FILE_GRF);
            let byte = byte_addr(reg, subreg, src.dtype);
            match inst.access {
                AccessMode::Align1 => {
                    bin.set_field_u64(sl.reg_byte.clone(), byte);
                }
                AccessMode::Align16 => {
                    bin.set_field_u64(sl.reg_oword.clone(), byte >> 4);
                    encode_chan_sel(bin, sl, src);
                }
            }
        }
        RegBase::Arch { file, num, subreg } => {
            bin.set_field_u64(sl.reg_file.clone(), REG_FILE_ARCH);
            bin.set_field_u64(sl.arch_file.clone(), file.code());
            bin.set_field_u64(sl.arch_num.clone(), u64::from(num) & 0xf);
            let sub_byte = u64::from(subreg) * u64::from(src.dtype.bytes());
            let sub = match inst.access {
                AccessMode::Align1 => sub_byte,
                AccessMode::Align16 => sub_byte >> 4,
            };
            bin.set_field_u64(sl.arch_subreg_byte.clone(), sub);
        }
        RegBase::Indirect {
            addr_subreg,
            offset,
        } => {
            indirect = true;
            bin.set_field_u64(sl.reg_file.clone(), REG_FILE_GRF);
            bin.set_bit(sl.addr_mode, true);
            bin.set_field_u64(sl.idx_reg.clone(), u64::from(addr_subreg) & 0xf);
            let off = offset as i64;
            if !(-512..512).contains(&off) {
                return Err(EncodeError::invariant(format!(
                    "indirect source offset {off} out of range"
                )));
            }
            match inst.access {
                AccessMode::Align1 => {
                    bin.set_field_u64(
                        sl.idx_imm_byte.clone(),
                        (off as u64) & 0x1ff,
                    );
                }
                AccessMode::Align16 => {
                    bin.set_field_u64(
                        sl.idx_imm_oword.clone(),
                        ((off as u64) >> 4) & 0x1f,
                    );
                    encode_chan_sel(bin, sl, src);
                }
            }
            bin.set_bit(sl.idx_imm_msb, (off >> 9) & 1 != 0);
        }
    }

    encode_src_region(bin, inst, sl, src, indirect)
}

fn encode_chan_sel(bin: &mut EncodedInst, sl: &SrcSlot, src: &SrcReg) {
    // The acc2..acc9 overlay of the multi-phase math forms repurposes the
    // low channel selects.
    if let Some(acc) = src.acc_sel {
        let a = u64::from(acc);
        bin.set_field_u64(
            sl.chan_sel_lo.clone(),
            (a & 0x3) | (((a >> 2) & 0x3) << 2),
        );
        bin.set_field_u64(sl.chan_sel_hi.clone(), 0);
        return;
    }
    let s = src.swizzle.0;
    let lo = u64::from(s[0] & 3) | (u64::from(s[1] & 3) << 2);
    let hi = u64::from(s[2] & 3) | (u64::from(s[3] & 3) << 2);
    bin.set_field_u64(sl.chan_sel_lo.clone(), lo);
    bin.set_field_u64(sl.chan_sel_hi.clone(), hi);
}

fn encode_src_region(
    bin: &mut EncodedInst,
    inst: &Inst,
    sl: &SrcSlot,
    src: &SrcReg,
    indirect: bool,
) -> Result<(), EncodeError> {
    match inst.access {
        AccessMode::Align1 => {
            let (vs, w, hs) = if let Some(r) = src.region {
                (
                    if indirect {
                        VERT_STRIDE_ONE_DIMEN
                    } else {
                        vert_stride_code(r.vert)?
                    },
                    width_code(r.width)?,
                    horz_stride_code(r.horz)?,
                )
            } else if has_subreg(&src.base) {
                // A non-default subregister defaults to the scalar region.
                trace!("defaulting to scalar region for offset subregister");
                (0, 0, 0)
            } else {
                let es = if inst.op.forces_exec1() {
                    0
                } else {
                    exec_size_code(inst.exec_size)?
                } as usize;
                (
                    if indirect {
                        VERT_STRIDE_ONE_DIMEN
                    } else {
                        vert_stride_code(DEFAULT_VERT[es])?
                    },
                    width_code(DEFAULT_WIDTH[es])?,
                    horz_stride_code(DEFAULT_HORZ[es])?,
                )
            };
            bin.set_field_u64(sl.vert_stride.clone(), vs);
            bin.set_field_u64(sl.width.clone(), w);
            bin.set_field_u64(sl.horz_stride.clone(), hs);
        }
        AccessMode::Align16 => {
            // Only the vertical stride survives under align16; a stride-0
            // region pins it to zero and everything else runs at four.
            let vs = if indirect {
                VERT_STRIDE_ONE_DIMEN
            } else {
                match src.region {
                    Some(r) if r.horz == 0 => 0,
                    _ => 3,
                }
            };
            bin.set_field_u64(sl.vert_stride.clone(), vs);
        }
    }
    Ok(())
}

fn has_subreg(base: &RegBase) -> bool {
    match base {
        RegBase::Grf { subreg, .. } => *subreg != 0,
        RegBase::Arch { subreg, .. } => *subreg != 0,
        RegBase::Indirect { .. } => false,
    }
}

fn encode_src_imm(
    bin: &mut EncodedInst,
    inst: &Inst,
    slot: usize,
    bits: u64,
    dtype: DataType,
) -> Result<(), EncodeError> {
    let sl = slot_layout(slot);
    let code = dtype.imm_code().ok_or_else(|| {
        EncodeError::invariant(format!("{dtype:?} is not an immediate type"))
    })?;

    if dtype.is_64bit() {
        // The 8-DWORD form only exists for the sole source of a move.
        if slot != 0 || inst.op != Opcode::Mov {
            return Err(EncodeError::invariant(
                "64-bit immediate must be the sole source of mov".to_string(),
            ));
        }
        bin.set_field_u64(sl.reg_file.clone(), REG_FILE_IMM);
        bin.set_field_u64(sl.dtype.clone(), code);
        bin.set_field_u64(basic::SRC_IMM64_LO, bits & 0xffff_ffff);
        bin.set_field_u64(basic::SRC_IMM64_HI, bits >> 32);
        return Ok(());
    }

    if slot == 0 && inst.srcs.len() > 1 {
        return Err(EncodeError::invariant(
            "an immediate source 0 leaves no room for source 1".to_string(),
        ));
    }

    bin.set_field_u64(sl.reg_file.clone(), REG_FILE_IMM);
    bin.set_field_u64(sl.dtype.clone(), code);

    let val = match dtype {
        // Word immediates are replicated into both halves.
        DataType::Uw | DataType::W | DataType::Hf => {
            let w = bits & 0xffff;
            (w << 16) | w
        }
        _ => bits & 0xffff_ffff,
    };
    bin.set_field_u64(basic::SRC_IMM32, val);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitview::GetField;

    fn mov_f(exec: u8, dreg: u16, sreg: u16) -> Inst {
        let mut inst = Inst::new(Opcode::Mov, exec);
        inst.dst = Some(Dst::grf(dreg, 0, DataType::F));
        inst.srcs = vec![Src::Reg(SrcReg::grf(sreg, 0, DataType::F))];
        inst
    }

    #[test]
    fn test_mov_r10_r20_scenario() {
        let bin = encode_inst(Platform::Gen9, &mov_f(8, 10, 20)).unwrap();

        assert_eq!(bin.get_field_u64(hdr::OPCODE), 0x01);
        assert_eq!(bin.get_field_u64(hdr::EXEC_SIZE), 3);
        assert_eq!(bin.get_field_u64(hdr::ACCESS_MODE), 0);
        // r10.0 and r20.0, float, direct GRF.
        assert_eq!(bin.get_field_u64(basic::DST_REG_FILE), 1);
        assert_eq!(bin.get_field_u64(basic::DST_TYPE), 7);
        assert_eq!(bin.get_field_u64(basic::DST_REG_BYTE), 10 * 32);
        assert_eq!(bin.get_field_u64(basic::DST_HORZ_STRIDE), 1);
        assert_eq!(bin.get_field_u64(SRC0.reg_file), 1);
        assert_eq!(bin.get_field_u64(SRC0.dtype), 7);
        assert_eq!(bin.get_field_u64(SRC0.reg_byte), 20 * 32);
        // Default region for SIMD8: <8;8,1>.
        assert_eq!(bin.get_field_u64(SRC0.vert_stride), 4);
        assert_eq!(bin.get_field_u64(SRC0.width), 3);
        assert_eq!(bin.get_field_u64(SRC0.horz_stride), 1);
    }

    #[test]
    fn test_chan_offset_quarter_and_nibble() {
        let mut inst = mov_f(4, 10, 20);
        inst.chan_offset = 12;
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        // M12 = Q1 plus the odd nibble.
        assert_eq!(bin.get_field_u64(hdr::QTR_CTRL), 1);
        assert_eq!(bin.get_field_u64(hdr::NIB_CTRL), 1);

        inst.chan_offset = 8;
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        assert_eq!(bin.get_field_u64(hdr::QTR_CTRL), 1);
        assert_eq!(bin.get_field_u64(hdr::NIB_CTRL), 0);
    }

    #[test]
    fn test_acc_overlay_rejected_outside_macros() {
        let mut inst = mov_f(8, 1, 2);
        inst.srcs = vec![Src::Reg(SrcReg {
            acc_sel: Some(2),
            ..SrcReg::grf(2, 0, DataType::F)
        })];
        inst.access = AccessMode::Align16;
        assert!(matches!(
            encode_inst(Platform::Gen9, &inst),
            Err(EncodeError::InvariantViolation(_))
        ));

        // The multi-phase math forms keep it.
        let mut math = Inst::new(Opcode::Math, 8);
        math.access = AccessMode::Align16;
        math.dst = Some(Dst::grf(1, 0, DataType::F));
        math.payload = Payload::Math {
            func: MathFunc::Invm,
            partial_precision: false,
        };
        math.srcs = vec![
            Src::Reg(SrcReg {
                acc_sel: Some(2),
                ..SrcReg::grf(2, 0, DataType::F)
            }),
            Src::Reg(SrcReg::grf(3, 0, DataType::F)),
        ];
        assert!(encode_inst(Platform::Gen9, &math).is_ok());
    }

    #[test]
    fn test_determinism() {
        let a = encode_inst(Platform::Gen9, &mov_f(16, 3, 4)).unwrap();
        let b = encode_inst(Platform::Gen9, &mov_f(16, 3, 4)).unwrap();
        assert_eq!(a.words(), b.words());
    }

    #[test]
    fn test_opcode_totality() {
        use Opcode::*;
        let all = [
            Illegal, Mov, Sel, Movi, Not, And, Or, Xor, Shr, Shl, Asr, Ror,
            Rol, Cmp, Cmpn, Csel, Bfrev, Bfe, Bfi1, Bfi2, Jmpi, If, Else,
            Endif, While, Break, Cont, Halt, Call, Ret, Goto, Join, Wait,
            Send, Sendc, Sends, Sendsc, Math, Add, Mul, Avg, Frc, Rndu, Rndd,
            Rnde, Rndz, Mac, Mach, Lzd, Fbh, Fbl, Cbit, Addc, Subb, Sad2,
            Sada2, Dp4, Dph, Dp3, Dp2, Dp4a, Line, Pln, Mad, Lrp, Madm, Nop,
        ];
        for op in all {
            assert!(
                op.hw_code(Platform::Gen11).is_some(),
                "{op:?} missing on Gen11"
            );
        }
        // Off-platform opcodes fail loudly.
        let mut inst = Inst::new(Ror, 8);
        inst.dst = Some(Dst::grf(1, 0, DataType::Ud));
        inst.srcs = vec![
            Src::Reg(SrcReg::grf(2, 0, DataType::Ud)),
            Src::Reg(SrcReg::grf(3, 0, DataType::Ud)),
        ];
        assert!(matches!(
            encode_inst(Platform::Gen8, &inst),
            Err(EncodeError::UnsupportedOpcode { .. })
        ));
    }

    #[test]
    fn test_indirect_dst_offset_reconstruction() {
        let mut inst = Inst::new(Opcode::Mov, 8);
        inst.dst = Some(Dst {
            base: RegBase::Indirect {
                addr_subreg: 2,
                offset: 37,
            },
            dtype: DataType::F,
            horz_stride: 1,
            write_mask: 0xf,
            acc_sel: None,
        });
        inst.srcs = vec![Src::Reg(SrcReg::grf(4, 0, DataType::F))];
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();

        assert_eq!(bin.get_field_u64(basic::DST_ADDR_MODE..64), 1);
        let lo = bin.get_field_u64(basic::DST_IDX_IMM_BYTE);
        let sign = bin.get_field_u64(
            basic::DST_IDX_IMM_MSB..basic::DST_IDX_IMM_MSB + 1,
        );
        let full = ((sign << 9) | lo) as i64;
        let off = (full << 54) >> 54;
        assert_eq!(off, 37);
    }

    #[test]
    fn test_indirect_dst_negative_offset_reconstruction() {
        let mut inst = Inst::new(Opcode::Mov, 8);
        inst.dst = Some(Dst {
            base: RegBase::Indirect {
                addr_subreg: 0,
                offset: -64,
            },
            dtype: DataType::F,
            horz_stride: 1,
            write_mask: 0xf,
            acc_sel: None,
        });
        inst.srcs = vec![Src::Reg(SrcReg::grf(4, 0, DataType::F))];
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();

        let lo = bin.get_field_u64(basic::DST_IDX_IMM_BYTE);
        let sign = bin.get_field_u64(
            basic::DST_IDX_IMM_MSB..basic::DST_IDX_IMM_MSB + 1,
        );
        let off = ((((sign << 9) | lo) as i64) << 54) >> 54;
        assert_eq!(off, -64);
    }

    #[test]
    fn test_word_imm_replication() {
        let mut inst = Inst::new(Opcode::Mov, 8);
        inst.dst = Some(Dst::grf(1, 0, DataType::W));
        inst.srcs = vec![Src::imm_w(-2)];
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        assert_eq!(bin.get_field_u64(basic::SRC_IMM32), 0xfffe_fffe);
        assert_eq!(bin.get_field_u64(SRC0.reg_file), 3);
        assert_eq!(bin.get_field_u64(SRC0.dtype), 3);
    }

    #[test]
    fn test_64bit_imm_only_as_mov_src0() {
        let mut inst = Inst::new(Opcode::Add, 1);
        inst.dst = Some(Dst::grf(1, 0, DataType::Df));
        inst.srcs = vec![
            Src::Reg(SrcReg::grf(2, 0, DataType::Df)),
            Src::Imm {
                bits: 0x3ff0_0000_0000_0000,
                dtype: DataType::Df,
            },
        ];
        assert!(matches!(
            encode_inst(Platform::Gen9, &inst),
            Err(EncodeError::InvariantViolation(_))
        ));

        let mut mov = Inst::new(Opcode::Mov, 1);
        mov.dst = Some(Dst::grf(1, 0, DataType::Df));
        mov.srcs = vec![Src::Imm {
            bits: 0x3ff0_0000_0000_0000,
            dtype: DataType::Df,
        }];
        let bin = encode_inst(Platform::Gen9, &mov).unwrap();
        assert_eq!(bin.get_field_u64(basic::SRC_IMM64_HI), 0x3ff0_0000);
        assert_eq!(bin.get_field_u64(basic::SRC_IMM64_LO), 0);
    }

    #[test]
    fn test_scalar_region_for_offset_subreg() {
        let mut inst = Inst::new(Opcode::Add, 8);
        inst.dst = Some(Dst::grf(1, 0, DataType::F));
        inst.srcs = vec![
            Src::Reg(SrcReg::grf(2, 3, DataType::F)),
            Src::Reg(SrcReg::grf(3, 0, DataType::F)),
        ];
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        // src0 collapses to <0;1,0>, src1 keeps the SIMD8 default.
        assert_eq!(bin.get_field_u64(SRC0.vert_stride), 0);
        assert_eq!(bin.get_field_u64(SRC0.width), 0);
        assert_eq!(bin.get_field_u64(SRC0.horz_stride), 0);
        assert_eq!(bin.get_field_u64(SRC1.vert_stride), 4);
    }

    #[test]
    fn test_jmpi_pins_ip_and_forces_exec1() {
        let mut inst = Inst::new(Opcode::Jmpi, 8);
        inst.srcs = vec![Src::Target(Label(0))];
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        assert_eq!(bin.get_field_u64(hdr::EXEC_SIZE), 0);
        assert_eq!(bin.get_field_u64(hdr::MASK_CTRL..35), 1);
        assert_eq!(bin.get_field_u64(basic::DST_REG_FILE), 0);
        assert_eq!(
            bin.get_field_u64(basic::DST_ARCH_FILE),
            ArchFile::Ip.code()
        );
        assert_eq!(bin.get_field_u64(SRC0.arch_file), ArchFile::Ip.code());
    }

    #[test]
    fn test_predicate_and_cond_mod() {
        let mut inst = Inst::new(Opcode::Cmp, 8);
        inst.dst = Some(Dst::null(DataType::F));
        inst.cond_mod = Some(CondMod::Greater);
        inst.flag = Some(FlagRef { reg: 1, subreg: 0 });
        inst.srcs = vec![
            Src::Reg(SrcReg::grf(2, 0, DataType::F)),
            Src::Reg(SrcReg::grf(3, 0, DataType::F)),
        ];
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        assert_eq!(bin.get_field_u64(hdr::COND_MOD), 3);
        assert_eq!(bin.get_field_u64(hdr::FLAG_REG..34), 1);

        let mut pinst = Inst::new(Opcode::Sel, 8);
        pinst.dst = Some(Dst::grf(1, 0, DataType::F));
        pinst.pred = Some(Predicate {
            ctrl: PredCtrl::Default,
            invert: true,
        });
        pinst.srcs = vec![
            Src::Reg(SrcReg::grf(2, 0, DataType::F)),
            Src::Reg(SrcReg::grf(3, 0, DataType::F)),
        ];
        let bin = encode_inst(Platform::Gen9, &pinst).unwrap();
        assert_eq!(bin.get_field_u64(hdr::PRED_CTRL), 1);
        assert_eq!(bin.get_field_u64(hdr::PRED_INV..21), 1);
    }

    #[test]
    fn test_flag_reg_out_of_range() {
        let mut inst = Inst::new(Opcode::Cmp, 8);
        inst.dst = Some(Dst::null(DataType::F));
        inst.cond_mod = Some(CondMod::Less);
        inst.flag = Some(FlagRef { reg: 2, subreg: 0 });
        inst.srcs = vec![
            Src::Reg(SrcReg::grf(2, 0, DataType::F)),
            Src::Reg(SrcReg::grf(3, 0, DataType::F)),
        ];
        assert!(matches!(
            encode_inst(Platform::Gen9, &inst),
            Err(EncodeError::InvariantViolation(_))
        ));
    }
}
