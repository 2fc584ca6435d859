// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Three-source arithmetic (mad, lrp, bfe, madm, ...) in both of its
//! structurally different layouts.

use bitview::{SetBit, SetField2, SetFieldU64};

use crate::encode::{horz_stride_code, EncodedInst};
use crate::error::EncodeError;
use crate::ir::*;
use crate::layout::{tsrc1, tsrc16};

fn ternary_type_code(dtype: DataType) -> Result<u64, EncodeError> {
    dtype.ternary_code().ok_or_else(|| {
        EncodeError::invariant(format!(
            "{dtype:?} cannot appear in a three-source instruction"
        ))
    })
}

/// Destination and all sources must execute in one pipe; a mix of float
/// and integer types is never silently coerced.
fn check_type_class(inst: &Inst, dst: &Dst) -> Result<(), EncodeError> {
    let class = dst.dtype.is_float();
    for (i, src) in inst.srcs.iter().enumerate() {
        let sty = match src {
            Src::Reg(r) => r.dtype,
            Src::Imm { dtype, .. } => *dtype,
            Src::Target(_) => {
                return Err(EncodeError::invariant(
                    "label operand in a three-source instruction".to_string(),
                ))
            }
        };
        if sty.is_float() != class {
            return Err(EncodeError::invariant(format!(
                "three-source datatype mismatch: destination {:?} vs \
                 source {} {:?}",
                dst.dtype, i, sty
            )));
        }
    }
    Ok(())
}

fn ternary_dst(inst: &Inst) -> Result<&Dst, EncodeError> {
    if inst.srcs.len() != 3 {
        return Err(EncodeError::invariant(format!(
            "{:?} takes three sources, got {}",
            inst.op,
            inst.srcs.len()
        )));
    }
    inst.dst.as_ref().ok_or_else(|| {
        EncodeError::invariant(
            "three-source instruction without a destination".to_string(),
        )
    })
}

fn grf_byte_addr(
    base: &RegBase,
    dtype: DataType,
) -> Result<u64, EncodeError> {
    match base {
        RegBase::Grf { reg, subreg } => Ok(u64::from(*reg)
            * u64::from(GRF_SIZE)
            + u64::from(*subreg) * u64::from(dtype.bytes())),
        other => Err(EncodeError::invariant(format!(
            "three-source operands must live in the GRF, not {other:?}"
        ))),
    }
}

pub fn encode_align16(
    bin: &mut EncodedInst,
    inst: &Inst,
) -> Result<(), EncodeError> {
    let dst = ternary_dst(inst)?;
    check_type_class(inst, dst)?;

    // One shared type field: the sources must agree exactly here.
    let src_types: Vec<DataType> = inst
        .srcs
        .iter()
        .map(|s| match s {
            Src::Reg(r) => Ok(r.dtype),
            _ => Err(EncodeError::invariant(
                "align16 three-source operands must be registers".to_string(),
            )),
        })
        .collect::<Result<_, _>>()?;
    if src_types[1] != src_types[0] || src_types[2] != src_types[0] {
        return Err(EncodeError::invariant(format!(
            "align16 three-source sources must share one type, got {:?}",
            src_types
        )));
    }

    bin.set_field_u64(tsrc16::SRC_TYPE, ternary_type_code(src_types[0])?);
    bin.set_field_u64(tsrc16::DST_TYPE, ternary_type_code(dst.dtype)?);

    let en = dst.acc_sel.map_or(dst.write_mask, |a| a);
    bin.set_field_u64(tsrc16::DST_CHAN_EN, u64::from(en) & 0xf);
    let dst_byte = grf_byte_addr(&dst.base, dst.dtype)?;
    bin.set_field_u64(tsrc16::DST_REG_DWORD, dst_byte >> 2);

    const MOD: [std::ops::Range<usize>; 3] =
        [tsrc16::SRC0_MOD, tsrc16::SRC1_MOD, tsrc16::SRC2_MOD];
    const REP: [usize; 3] = [
        tsrc16::SRC0_REP_CTRL,
        tsrc16::SRC1_REP_CTRL,
        tsrc16::SRC2_REP_CTRL,
    ];
    const SEL: [std::ops::Range<usize>; 3] = [
        tsrc16::SRC0_CHAN_SEL,
        tsrc16::SRC1_CHAN_SEL,
        tsrc16::SRC2_CHAN_SEL,
    ];
    const REG: [std::ops::Range<usize>; 3] = [
        tsrc16::SRC0_REG_DWORD,
        tsrc16::SRC1_REG_DWORD,
        tsrc16::SRC2_REG_DWORD,
    ];
    const SUBW: [usize; 3] = [
        tsrc16::SRC0_SUBREG_W,
        tsrc16::SRC1_SUBREG_W,
        tsrc16::SRC2_SUBREG_W,
    ];

    for (i, src) in inst.srcs.iter().enumerate() {
        let Src::Reg(reg) = src else { unreachable!() };

        bin.set_field_u64(MOD[i].clone(), reg.modifier.code());
        bin.set_bit(REP[i], reg.swizzle.is_rep());

        let sel = if let Some(acc) = reg.acc_sel {
            // acc2..acc9 overlay for madm operands.
            u64::from(acc & 0x3) | (u64::from((acc >> 2) & 0x3) << 2)
        } else {
            let s = reg.swizzle.0;
            u64::from(s[0] & 3)
                | (u64::from(s[1] & 3) << 2)
                | (u64::from(s[2] & 3) << 4)
                | (u64::from(s[3] & 3) << 6)
        };
        bin.set_field_u64(SEL[i].clone(), sel);

        // A word address split across the subregister bit and the dword
        // register field.
        let byte = grf_byte_addr(&reg.base, reg.dtype)?;
        bin.set_field2(SUBW[i]..SUBW[i] + 1, REG[i].clone(), byte >> 1);
    }

    Ok(())
}

fn tsrc1_vert_code(elems: u8) -> Result<u64, EncodeError> {
    match elems {
        0 => Ok(0),
        2 => Ok(1),
        4 => Ok(2),
        8 => Ok(3),
        n => Err(EncodeError::invariant(format!(
            "ternary vertical stride {n} is not 0, 2, 4 or 8"
        ))),
    }
}

fn tsrc1_horz_code(elems: u8) -> Result<u64, EncodeError> {
    match elems {
        0 => Ok(0),
        1 => Ok(1),
        2 => Ok(2),
        4 => Ok(3),
        n => Err(EncodeError::invariant(format!(
            "ternary horizontal stride {n} is not 0, 1, 2 or 4"
        ))),
    }
}

pub fn encode_align1(
    bin: &mut EncodedInst,
    inst: &Inst,
) -> Result<(), EncodeError> {
    let dst = ternary_dst(inst)?;
    check_type_class(inst, dst)?;

    bin.set_bit(tsrc1::EXEC_TYPE, dst.dtype.is_float());
    bin.set_field_u64(tsrc1::DST_TYPE, ternary_type_code(dst.dtype)?);

    match dst.base {
        RegBase::Grf { reg, subreg } => {
            let sub_byte =
                u64::from(subreg) * u64::from(dst.dtype.bytes());
            if sub_byte >= u64::from(GRF_SIZE) {
                return Err(EncodeError::invariant(format!(
                    "destination subregister byte {sub_byte} exceeds one GRF"
                )));
            }
            bin.set_field_u64(tsrc1::DST_SUBREG_BYTE, sub_byte);
            bin.set_field_u64(tsrc1::DST_REG, u64::from(reg));
        }
        ref other => {
            return Err(EncodeError::invariant(format!(
                "align1 ternary destination must be a GRF, not {other:?}"
            )))
        }
    }
    bin.set_field_u64(
        tsrc1::DST_HORZ_STRIDE,
        horz_stride_code(dst.horz_stride)?,
    );

    const TYPE: [std::ops::Range<usize>; 3] =
        [tsrc1::SRC0_TYPE, tsrc1::SRC1_TYPE, tsrc1::SRC2_TYPE];

    for (i, src) in inst.srcs.iter().enumerate() {
        match src {
            Src::Reg(reg) => {
                bin.set_field_u64(TYPE[i].clone(), ternary_type_code(reg.dtype)?);
                bin.set_field_u64(
                    tsrc1::modifier(i),
                    reg.modifier.code(),
                );

                let (vert, horz) = match reg.region {
                    Some(r) => (r.vert, r.horz),
                    None => (8, 1),
                };
                bin.set_field_u64(tsrc1::vert_stride(i), tsrc1_vert_code(vert)?);
                bin.set_field_u64(tsrc1::horz_stride(i), tsrc1_horz_code(horz)?);

                match reg.base {
                    RegBase::Grf { reg: r, subreg } => {
                        bin.set_bit(tsrc1::reg_file(i), true);
                        let sub_byte = u64::from(subreg)
                            * u64::from(reg.dtype.bytes());
                        if sub_byte >= u64::from(GRF_SIZE) {
                            return Err(EncodeError::invariant(format!(
                                "source {i} subregister byte {sub_byte} \
                                 exceeds one GRF"
                            )));
                        }
                        bin.set_field_u64(tsrc1::subreg_byte(i), sub_byte);
                        bin.set_field_u64(tsrc1::reg(i), u64::from(r));
                    }
                    RegBase::Arch {
                        file: ArchFile::Acc,
                        num,
                        subreg,
                    } => {
                        // File bit 0 selects the accumulator.
                        let sub_byte = u64::from(subreg)
                            * u64::from(reg.dtype.bytes());
                        bin.set_field_u64(tsrc1::subreg_byte(i), sub_byte);
                        bin.set_field_u64(tsrc1::reg(i), u64::from(num));
                    }
                    ref other => {
                        return Err(EncodeError::invariant(format!(
                            "align1 ternary source {i} must be GRF or \
                             accumulator, not {other:?}"
                        )))
                    }
                }
            }
            Src::Imm { bits, dtype } => {
                if i == 1 {
                    return Err(EncodeError::invariant(
                        "immediate not allowed in ternary source 1"
                            .to_string(),
                    ));
                }
                bin.set_field_u64(TYPE[i].clone(), ternary_type_code(*dtype)?);
                let imm = match dtype {
                    // Signed immediates carry their 32-bit pattern; check
                    // the value, not the raw bits.
                    DataType::D => {
                        let v = *bits as u32 as i32;
                        let v = i16::try_from(v).map_err(|_| {
                            EncodeError::invariant(format!(
                                "ternary immediate {v} does not fit 16 bits"
                            ))
                        })?;
                        u64::from(v as u16)
                    }
                    _ => {
                        if *bits > 0xffff {
                            return Err(EncodeError::invariant(format!(
                                "ternary immediate {bits:#x} does not fit \
                                 16 bits"
                            )));
                        }
                        *bits
                    }
                };
                bin.set_bit(tsrc1::is_imm(i), true);
                bin.set_field_u64(tsrc1::imm16(i), imm);
            }
            Src::Target(_) => {
                return Err(EncodeError::invariant(
                    "label operand in a three-source instruction".to_string(),
                ))
            }
        }
    }

    Ok(())
}
