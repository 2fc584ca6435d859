// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Message-send encoding: plain send/sendc on the native two-source
//! layout, and the dedicated split-send (sends/sendsc) layout.

use bitview::{SetBit, SetField2, SetFieldU64};

use crate::encode::{EncodedInst, REG_FILE_ARCH, REG_FILE_IMM};
use crate::error::EncodeError;
use crate::ir::*;
use crate::layout::{basic, hdr, sends, SRC1};

/// UD is code 0 in both the register and immediate type tables; message
/// descriptors are always typed as it.
const TYPE_UD: u64 = 0;

fn send_info(inst: &Inst) -> Result<&SendInfo, EncodeError> {
    match &inst.payload {
        Payload::Send(info) => Ok(info),
        _ => Err(EncodeError::MalformedSend(
            "missing message descriptor".to_string(),
        )),
    }
}

/// The hardware copies only bits 28:0 of a register-held message
/// descriptor, so the half-precision input/return flags (descriptor bits
/// 29 and 30) are written into the top DWORD directly.  An immediate
/// descriptor already lands them there.
fn encode_desc_29_30(bin: &mut EncodedInst, info: &SendInfo) {
    if let SendDesc::A0 { .. } = info.desc {
        bin.set_bit(basic::DESC_BIT_29, info.input_16bit);
        bin.set_bit(basic::DESC_BIT_30, info.return_16bit);
    }
}

/// Finishes a plain send/sendc whose payload operand was already encoded
/// through the native two-source path.
pub fn encode_send(
    bin: &mut EncodedInst,
    platform: Platform,
    inst: &Inst,
) -> Result<(), EncodeError> {
    let info = *send_info(inst)?;

    if inst.srcs.is_empty() {
        return Err(EncodeError::MalformedSend(
            "send requires a payload source".to_string(),
        ));
    }

    match info.desc {
        SendDesc::Imm(d) => {
            bin.set_field_u64(SRC1.reg_file, REG_FILE_IMM);
            bin.set_field_u64(SRC1.dtype, TYPE_UD);
            bin.set_field_u64(basic::SRC_IMM32, u64::from(d) & 0x7fff_ffff);
        }
        SendDesc::A0 { subreg } => {
            bin.set_field_u64(SRC1.reg_file, REG_FILE_ARCH);
            bin.set_field_u64(SRC1.dtype, TYPE_UD);
            bin.set_field_u64(SRC1.arch_file, ArchFile::Addr.code());
            bin.set_field_u64(SRC1.arch_subreg_byte, u64::from(subreg) * 2);
        }
    }
    encode_desc_29_30(bin, &info);

    match info.ex_desc {
        SendDesc::Imm(x) => {
            let x = u64::from(x);
            bin.set_field_u64(hdr::SFID, x & 0xf);
            bin.set_bit(basic::EOT, (x >> 5) & 1 != 0);
            if platform.spreads_send_ex_desc() {
                // Function control moved out of the descriptor DWORD and
                // into four scattered nibbles.
                bin.set_field_u64(basic::EX_DESC_NIB0, (x >> 16) & 0xf);
                bin.set_field_u64(basic::EX_DESC_NIB1, (x >> 20) & 0xf);
                bin.set_field_u64(basic::EX_DESC_NIB2, (x >> 24) & 0xf);
                bin.set_field_u64(basic::EX_DESC_NIB3, (x >> 28) & 0xf);
            } else {
                bin.set_field_u64(basic::EX_MSG_LENGTH, (x >> 6) & 0xf);
            }
        }
        SendDesc::A0 { .. } => {
            return Err(EncodeError::MalformedSend(
                "plain send requires an immediate extended descriptor; use \
                 split send for a register one"
                    .to_string(),
            ));
        }
    }

    if inst.opts.contains(InstOpts::EOT) {
        bin.set_bit(basic::EOT, true);
    }

    Ok(())
}

fn grf_byte(base: &RegBase, dtype: DataType) -> u64 {
    match base {
        RegBase::Grf { reg, subreg } => {
            u64::from(*reg) * u64::from(GRF_SIZE)
                + u64::from(*subreg) * u64::from(dtype.bytes())
        }
        _ => 0,
    }
}

fn split_send_payload<'a>(
    inst: &'a Inst,
    slot: usize,
) -> Result<&'a SrcReg, EncodeError> {
    match inst.srcs.get(slot) {
        Some(Src::Reg(r)) => Ok(r),
        _ => Err(EncodeError::MalformedSend(format!(
            "split send requires a register payload in source {slot}"
        ))),
    }
}

pub fn encode_split_send(
    bin: &mut EncodedInst,
    _platform: Platform,
    inst: &Inst,
) -> Result<(), EncodeError> {
    let info = *send_info(inst)?;

    let dst = inst.dst.as_ref().ok_or_else(|| {
        EncodeError::MalformedSend(
            "split send requires a destination".to_string(),
        )
    })?;
    bin.set_field_u64(
        sends::DST_TYPE,
        dst.dtype.reg_code().ok_or_else(|| {
            EncodeError::invariant(format!(
                "{:?} is not a register type",
                dst.dtype
            ))
        })?,
    );
    match dst.base {
        RegBase::Grf { .. } => {
            bin.set_bit(sends::DST_REG_FILE, true);
            // One oword address split across the subregister bit and the
            // register number.
            let byte = grf_byte(&dst.base, dst.dtype);
            bin.set_field2(
                sends::DST_SUBREG..sends::DST_SUBREG + 1,
                sends::DST_REG,
                byte >> 4,
            );
        }
        RegBase::Arch { file, num, .. } => {
            bin.set_bit(sends::DST_REG_FILE, false);
            bin.set_field_u64(sends::DST_REG, (file.code() << 4) | u64::from(num) & 0xf);
        }
        RegBase::Indirect {
            addr_subreg,
            offset,
        } => {
            bin.set_bit(sends::DST_REG_FILE, true);
            bin.set_bit(sends::DST_ADDR_MODE, true);
            bin.set_field_u64(sends::DST_ADDR_SUBREG, u64::from(addr_subreg) & 0xf);
            let off = offset as i64;
            bin.set_field_u64(sends::DST_IDX_IMM, ((off as u64) >> 4) & 0x1f);
            bin.set_bit(sends::DST_IDX_IMM_SIGN, (off >> 9) & 1 != 0);
        }
    }

    // Source 0: the primary payload, always a 32-byte-aligned GRF range
    // (or null when the message carries no payload there).
    let src0 = split_send_payload(inst, 0)?;
    match src0.base {
        RegBase::Grf { .. } => {
            bin.set_field_u64(sends::SRC0_REG_FILE, 1);
            let byte = grf_byte(&src0.base, src0.dtype);
            if byte % u64::from(GRF_SIZE) != 0 {
                return Err(EncodeError::invariant(
                    "split-send source 0 must be GRF-aligned".to_string(),
                ));
            }
            bin.set_field_u64(sends::SRC0_REG, byte >> 5);
        }
        RegBase::Arch {
            file: ArchFile::Null,
            ..
        } => {
            bin.set_field_u64(sends::SRC0_REG_FILE, 0);
        }
        RegBase::Indirect {
            addr_subreg,
            offset,
        } => {
            bin.set_field_u64(sends::SRC0_REG_FILE, 1);
            bin.set_bit(sends::SRC0_ADDR_MODE, true);
            bin.set_field_u64(sends::SRC0_ADDR_SUBREG, u64::from(addr_subreg) & 0xf);
            let off = offset as i64;
            bin.set_field_u64(sends::SRC0_IDX_IMM, ((off as u64) >> 4) & 0x1f);
            bin.set_bit(sends::SRC0_IDX_IMM_SIGN, (off >> 9) & 1 != 0);
        }
        ref other => {
            return Err(EncodeError::MalformedSend(format!(
                "split-send source 0 cannot live in {other:?}"
            )))
        }
    }

    // Source 1: the secondary payload, GRF or null.
    let src1 = split_send_payload(inst, 1)?;
    match src1.base {
        RegBase::Grf { .. } => {
            bin.set_bit(sends::SRC1_REG_FILE, true);
            let byte = grf_byte(&src1.base, src1.dtype);
            if byte % u64::from(GRF_SIZE) != 0 {
                return Err(EncodeError::invariant(
                    "split-send source 1 must be GRF-aligned".to_string(),
                ));
            }
            bin.set_field_u64(sends::SRC1_REG, byte >> 5);
        }
        RegBase::Arch {
            file: ArchFile::Null,
            ..
        } => {
            bin.set_bit(sends::SRC1_REG_FILE, false);
        }
        RegBase::Indirect {
            addr_subreg,
            offset,
        } => {
            bin.set_bit(sends::SRC1_REG_FILE, true);
            bin.set_bit(sends::SRC1_ADDR_MODE, true);
            bin.set_field_u64(sends::SRC1_ADDR_SUBREG, u64::from(addr_subreg) & 0xf);
            let off = offset as i64;
            bin.set_field_u64(sends::SRC1_IDX_IMM, ((off as u64) >> 4) & 0x1f);
            bin.set_bit(sends::SRC1_IDX_IMM_SIGN, (off >> 9) & 1 != 0);
        }
        ref other => {
            return Err(EncodeError::MalformedSend(format!(
                "split-send source 1 cannot live in {other:?}"
            )))
        }
    }

    match info.desc {
        SendDesc::Imm(d) => {
            bin.set_field_u64(sends::DESC, u64::from(d) & 0x7fff_ffff);
        }
        SendDesc::A0 { .. } => {
            bin.set_bit(sends::SEL_REG32_DESC, true);
        }
    }
    encode_desc_29_30(bin, &info);

    match info.ex_desc {
        SendDesc::Imm(x) => {
            let x = u64::from(x);
            bin.set_field_u64(hdr::SFID, x & 0xf);
            bin.set_field_u64(sends::EX_MSG_LENGTH, (x >> 6) & 0xf);
            bin.set_field_u64(sends::EX_DESC_FUNC_CTRL, (x >> 16) & 0xffff);
            bin.set_bit(basic::EOT, (x >> 5) & 1 != 0);
        }
        SendDesc::A0 { subreg } => {
            bin.set_bit(sends::SEL_REG32_EX_DESC, true);
            patch_ex_desc_reg_num(bin, subreg);
        }
    }

    if inst.opts.contains(InstOpts::EOT) {
        bin.set_bit(basic::EOT, true);
    }

    Ok(())
}

/// The address subregister of a register-sourced extended descriptor has
/// no slot in the declarative field layout; the hardware steals the low
/// three function-control bits for it.  Kept as its own step so platforms
/// that close this gap can drop it.
pub fn patch_ex_desc_reg_num(bin: &mut EncodedInst, a0_subreg: u8) {
    bin.set_field_u64(sends::EX_DESC_REG_NUM, u64::from(a0_subreg) & 0x7);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_inst;
    use bitview::{GetField, GetField2};

    fn split_send(desc: SendDesc, ex_desc: SendDesc) -> Inst {
        let mut inst = Inst::new(Opcode::Sends, 16);
        inst.dst = Some(Dst::grf(12, 0, DataType::Ud));
        inst.srcs = vec![
            Src::Reg(SrcReg::grf(4, 0, DataType::Ud)),
            Src::Reg(SrcReg::grf(6, 0, DataType::Ud)),
        ];
        inst.payload = Payload::Send(SendInfo::new(desc, ex_desc));
        inst
    }

    #[test]
    fn test_split_send_imm_descriptors() {
        let inst = split_send(
            SendDesc::Imm(0x0208_0200),
            SendDesc::Imm(0x0000_0a45),
        );
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();

        assert_eq!(bin.get_field_u64(hdr::OPCODE), 0x33);
        assert_eq!(bin.get_field_u64(sends::DESC), 0x0208_0200);
        // SFID 5, ex message length 9.
        assert_eq!(bin.get_field_u64(hdr::SFID), 0x5);
        assert_eq!(bin.get_field_u64(sends::EX_MSG_LENGTH), 0x9);
        assert_eq!(bin.get_field_u64(sends::SRC0_REG), 4);
        assert_eq!(bin.get_field_u64(sends::SRC1_REG), 6);
        assert_eq!(bin.get_field_u64(sends::DST_REG), 12);
        assert_eq!(bin.get_field_u64(sends::DST_REG_FILE..36), 1);
        assert_eq!(bin.get_field_u64(sends::SRC1_REG_FILE..37), 1);
    }

    #[test]
    fn test_split_send_dst_subreg_split() {
        let mut inst = split_send(
            SendDesc::Imm(0x0208_0200),
            SendDesc::Imm(0x0000_0a45),
        );
        // r12.4:ud starts half a GRF in.
        inst.dst = Some(Dst::grf(12, 4, DataType::Ud));
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        assert_eq!(
            bin.get_field2_u64(
                sends::DST_SUBREG..sends::DST_SUBREG + 1,
                sends::DST_REG,
            ),
            (12 * 32 + 16) >> 4
        );
    }

    #[test]
    fn test_split_send_reg_ex_desc_patch() {
        let inst = split_send(
            SendDesc::Imm(0x0208_0200),
            SendDesc::A0 { subreg: 2 },
        );
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        assert_eq!(bin.get_field_u64(sends::SEL_REG32_EX_DESC..62), 1);
        assert_eq!(bin.get_field_u64(sends::EX_DESC_REG_NUM), 2);
    }

    #[test]
    fn test_split_send_null_src1() {
        let mut inst = split_send(
            SendDesc::Imm(0x0208_0200),
            SendDesc::Imm(0x0000_0045),
        );
        inst.srcs[1] = Src::Reg(SrcReg {
            base: RegBase::Arch {
                file: ArchFile::Null,
                num: 0,
                subreg: 0,
            },
            ..SrcReg::grf(0, 0, DataType::Ud)
        });
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        assert_eq!(bin.get_field_u64(sends::SRC1_REG_FILE..37), 0);
        assert_eq!(bin.get_field_u64(sends::SRC1_REG), 0);
    }

    #[test]
    fn test_split_send_missing_source_is_status_failure() {
        let mut inst = split_send(
            SendDesc::Imm(0x0208_0200),
            SendDesc::Imm(0x0000_0045),
        );
        inst.srcs.truncate(1);
        assert!(matches!(
            encode_inst(Platform::Gen9, &inst),
            Err(EncodeError::MalformedSend(_))
        ));
    }

    #[test]
    fn test_split_send_unaligned_payload() {
        let mut inst = split_send(
            SendDesc::Imm(0x0208_0200),
            SendDesc::Imm(0x0000_0045),
        );
        inst.srcs[0] = Src::Reg(SrcReg::grf(4, 3, DataType::Ud));
        assert!(matches!(
            encode_inst(Platform::Gen9, &inst),
            Err(EncodeError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_plain_send_gen9_nibble_spread() {
        let mut inst = Inst::new(Opcode::Send, 16);
        inst.dst = Some(Dst::grf(20, 0, DataType::Ud));
        inst.srcs = vec![Src::Reg(SrcReg::grf(2, 0, DataType::Ud))];
        inst.payload = Payload::Send(SendInfo::new(
            SendDesc::Imm(0x0408_1001),
            SendDesc::Imm(0xabcd_0024),
        ));
        inst.opts |= InstOpts::EOT;
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();

        assert_eq!(bin.get_field_u64(hdr::SFID), 0x4);
        assert_eq!(bin.get_field_u64(basic::EX_DESC_NIB0), 0xd);
        assert_eq!(bin.get_field_u64(basic::EX_DESC_NIB1), 0xc);
        assert_eq!(bin.get_field_u64(basic::EX_DESC_NIB2), 0xb);
        assert_eq!(bin.get_field_u64(basic::EX_DESC_NIB3), 0xa);
        assert_eq!(bin.get_field_u64(basic::EOT..128), 1);
        // The descriptor rides in the src1 immediate slot.
        assert_eq!(bin.get_field_u64(SRC1.reg_file), 3);
        assert_eq!(
            bin.get_field_u64(96..125),
            0x0408_1001 & 0x1fff_ffff
        );
    }

    #[test]
    fn test_desc_bits_29_30_from_immediate() {
        let mut inst = Inst::new(Opcode::Send, 8);
        inst.dst = Some(Dst::grf(20, 0, DataType::Ud));
        inst.srcs = vec![Src::Reg(SrcReg::grf(2, 0, DataType::Ud))];
        inst.payload = Payload::Send(SendInfo::new(
            SendDesc::Imm(0x6000_0000),
            SendDesc::Imm(0x0000_0004),
        ));
        let bin = encode_inst(Platform::Gen8, &inst).unwrap();
        assert_eq!(bin.get_field_u64(basic::DESC_BIT_29..126), 1);
        assert_eq!(bin.get_field_u64(basic::DESC_BIT_30..127), 1);
    }

    #[test]
    fn test_desc_bits_29_30_for_register_descriptor() {
        let mut inst = Inst::new(Opcode::Send, 8);
        inst.dst = Some(Dst::grf(20, 0, DataType::Ud));
        inst.srcs = vec![Src::Reg(SrcReg::grf(2, 0, DataType::Ud))];
        inst.payload = Payload::Send(SendInfo {
            desc: SendDesc::A0 { subreg: 0 },
            ex_desc: SendDesc::Imm(0x0000_0004),
            input_16bit: true,
            return_16bit: true,
        });
        let bin = encode_inst(Platform::Gen9, &inst).unwrap();
        // a0 only has its low 29 bits read; the flags ride along here.
        assert_eq!(bin.get_field_u64(basic::DESC_BIT_29..126), 1);
        assert_eq!(bin.get_field_u64(basic::DESC_BIT_30..127), 1);

        let mut plain = inst.clone();
        plain.payload = Payload::Send(SendInfo::new(
            SendDesc::A0 { subreg: 0 },
            SendDesc::Imm(0x0000_0004),
        ));
        let bin = encode_inst(Platform::Gen9, &plain).unwrap();
        assert_eq!(bin.get_field_u64(basic::DESC_BIT_29..126), 0);
        assert_eq!(bin.get_field_u64(basic::DESC_BIT_30..127), 0);
    }
}
