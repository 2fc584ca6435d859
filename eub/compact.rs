// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Table-driven instruction compaction.
//!
//! A fully encoded 128-bit instruction compacts to 64 bits only when each
//! of four independent bit groups (control, datatype, subregister, source)
//! matches a lookup-table entry exactly; the compact form then stores the
//! table indices instead of the bits.  The table data is fixed hardware
//! ABI and must match the decoder's copy bit for bit.

use bitview::{BitMutViewable, BitViewable, SetBit, SetFieldU64};
use rustc_hash::FxHashMap;
use std::ops::Range;

use crate::encode::EncodedInst;
use crate::error::EncodeError;
use crate::ir::{Opcode, Platform};
use crate::layout::compact as cl;

pub const COMPACT_TABLE_SIZE: usize = 32;

#[rustfmt::skip]
const CONTROL_TABLE: [u32; COMPACT_TABLE_SIZE] = [
    0x00000002, 0x00004000, 0x00004001, 0x00004002,
    0x00004003, 0x00004004, 0x00004005, 0x00004007,
    0x00004008, 0x00004009, 0x0000400D, 0x00006000,
    0x00006001, 0x00006002, 0x00006003, 0x00006004,
    0x00006005, 0x00006007, 0x00006009, 0x0000600D,
    0x00006010, 0x00006100, 0x00008000, 0x00008002,
    0x00008004, 0x00008100, 0x00016000, 0x00016010,
    0x00018000, 0x00018100, 0x00028000, 0x00028100,
];

#[rustfmt::skip]
const SOURCE_TABLE: [u32; COMPACT_TABLE_SIZE] = [
    0x00000000, 0x00000002, 0x00000010, 0x00000012,
    0x00000018, 0x00000020, 0x00000028, 0x00000048,
    0x00000050, 0x00000070, 0x00000078, 0x00000300,
    0x00000302, 0x00000308, 0x00000310, 0x00000312,
    0x00000320, 0x00000328, 0x00000338, 0x00000340,
    0x00000342, 0x00000348, 0x00000350, 0x00000360,
    0x00000368, 0x00000370, 0x00000371, 0x00000378,
    0x00000468, 0x00000469, 0x0000046A, 0x00000588,
];

#[rustfmt::skip]
const SUBREG_TABLE: [u32; COMPACT_TABLE_SIZE] = [
    0x00000000, 0x00000001, 0x00000008, 0x0000000F,
    0x00000010, 0x00000080, 0x00000100, 0x00000180,
    0x00000200, 0x00000210, 0x00000280, 0x00001000,
    0x00001001, 0x00001081, 0x00001082, 0x00001083,
    0x00001084, 0x00001087, 0x00001088, 0x0000108E,
    0x0000108F, 0x00001180, 0x000011E8, 0x00002000,
    0x00002180, 0x00003000, 0x00003C87, 0x00004000,
    0x00005000, 0x00006000, 0x00007000, 0x0000701C,
];

#[rustfmt::skip]
const BDW_DATATYPE_TABLE: [u32; COMPACT_TABLE_SIZE] = [
    0x00040001, 0x00040040, 0x00040041, 0x000400C1,
    0x0004015D, 0x000405DD, 0x00040741, 0x00040745,
    0x0004075D, 0x00041041, 0x00043040, 0x00043041,
    0x00045145, 0x00047144, 0x00047145, 0x0005C75D,
    0x0005D71D, 0x0005D75C, 0x0005D75D, 0x0005F75C,
    0x0000040C, 0x0004005D, 0x00040145, 0x00041040,
    0x00045144, 0x00047104, 0x00049209, 0x0005775D,
    0x0005F75D, 0x0004F34C, 0x00049248, 0x0004B248,
];

#[rustfmt::skip]
const ICL_DATATYPE_TABLE: [u32; COMPACT_TABLE_SIZE] = [
    0x00040001, 0x00040040, 0x00040041, 0x000400C1,
    0x00040165, 0x00040BE5, 0x00040941, 0x00040945,
    0x00040965, 0x00041041, 0x00043040, 0x00043041,
    0x00045145, 0x00047144, 0x00047145, 0x00064965,
    0x00065925, 0x00065964, 0x00065965, 0x00067964,
    0x0000040C, 0x00040065, 0x00040145, 0x00041040,
    0x00045144, 0x00047104, 0x00049209, 0x0006F965,
    0x00067965, 0x0004F34C, 0x00049248, 0x0004B248,
];

const CONTROL_TABLE_3SRC: [u32; 4] =
    [0x00806001, 0x00006001, 0x00008001, 0x00008021];

const SOURCE_TABLE_3SRC: [u64; 4] = [
    0x07272720F000,
    0x07272720F002,
    0x07272720F008,
    0x07272720F020,
];

/// An immediate survives compaction when it is a sign-extension of its low
/// 13 bits: the compact form only stores those.
pub fn compactable_immediate(imm: u32) -> bool {
    let top = imm >> 12;
    top == 0 || top == 0xf_ffff
}

/// Reverse indexes over the platform's table set, built once per session.
pub struct CompactionTables {
    control: FxHashMap<u32, u8>,
    source: FxHashMap<u32, u8>,
    subreg: FxHashMap<u32, u8>,
    datatype: FxHashMap<u32, u8>,
    datatype_values: &'static [u32; COMPACT_TABLE_SIZE],
}

impl CompactionTables {
    pub fn new(platform: Platform) -> CompactionTables {
        let datatype_values = if platform >= Platform::Gen11 {
            &ICL_DATATYPE_TABLE
        } else {
            &BDW_DATATYPE_TABLE
        };

        let index = |values: &[u32]| -> FxHashMap<u32, u8> {
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| (v, i as u8))
                .collect()
        };

        CompactionTables {
            control: index(&CONTROL_TABLE),
            source: index(&SOURCE_TABLE),
            subreg: index(&SUBREG_TABLE),
            datatype: index(datatype_values),
            datatype_values,
        }
    }

    /// First table entry whose destination-subregister bits match; used
    /// when source 0 is an immediate and the source subregister groups are
    /// meaningless.
    fn subreg_index_dst_only(&self, bits_52_48: u32) -> Option<u8> {
        SUBREG_TABLE
            .iter()
            .position(|&v| v & 0x1f == bits_52_48)
            .map(|i| i as u8)
    }

    fn subreg_index_dst_src0(&self, bits_10: u32) -> Option<u8> {
        SUBREG_TABLE
            .iter()
            .position(|&v| v & 0x3ff == bits_10)
            .map(|i| i as u8)
    }
}

fn get(bin: &EncodedInst, range: Range<usize>) -> u64 {
    bin.get_bit_range_u64(range)
}

fn get_bit(bin: &EncodedInst, bit: usize) -> u64 {
    bin.get_bit_range_u64(bit..bit + 1)
}

/// Attempts to rewrite `bin` into its 64-bit compact form.  Returns
/// whether it compacted; `must` turns a miss into a hard error.
pub fn try_compact(
    tables: &CompactionTables,
    platform: Platform,
    op: Opcode,
    is_ternary: bool,
    must: bool,
    bin: &mut EncodedInst,
) -> Result<bool, EncodeError> {
    let compacted = if is_ternary {
        compact_ternary(platform, bin)
    } else if op.is_send() && !platform.compacts_send() {
        false
    } else {
        compact_basic(tables, bin)
    };

    if must && !compacted {
        return Err(EncodeError::CompactionRequired);
    }
    Ok(compacted)
}

fn compact_basic(tables: &CompactionTables, bin: &mut EncodedInst) -> bool {
    let src0_imm = get(bin, 41..43) == 3;
    let src1_imm = get(bin, 89..91) == 3;

    let control_key = (get_bit(bin, 8)
        | (get_bit(bin, 34) << 1)
        | (get(bin, 9..11) << 2)
        | (get(bin, 12..24) << 4)
        | (get_bit(bin, 31) << 16)
        | (get(bin, 32..34) << 17)) as u32;
    let Some(&control_index) = tables.control.get(&control_key) else {
        return false;
    };

    let datatype_key = (get(bin, 35..47)
        | (get(bin, 89..95) << 12)
        | (get(bin, 61..64) << 18)) as u32;
    let Some(&datatype_index) = tables.datatype.get(&datatype_key) else {
        return false;
    };

    let bits_52_48 = get(bin, 48..53) as u32;
    let bits_68_64 = get(bin, 64..69) as u32;
    let bits_100_96 = get(bin, 96..101) as u32;
    let subreg_index = if src0_imm {
        tables.subreg_index_dst_only(bits_52_48)
    } else if src1_imm {
        tables.subreg_index_dst_src0(bits_52_48 | (bits_68_64 << 5))
    } else {
        let key = bits_52_48 | (bits_68_64 << 5) | (bits_100_96 << 10);
        tables.subreg.get(&key).copied()
    };
    let Some(subreg_index) = subreg_index else {
        return false;
    };

    let src0_index = if src0_imm {
        0
    } else {
        let key = get(bin, 77..89) as u32;
        match tables.source.get(&key) {
            Some(&i) => i,
            None => return false,
        }
    };

    let mut src1_index = if !src0_imm && !src1_imm {
        let key = get(bin, 109..121) as u32;
        match tables.source.get(&key) {
            Some(&i) => i,
            None => return false,
        }
    } else {
        0
    };

    let mut imm = 0u32;
    if src0_imm || src1_imm {
        imm = get(bin, 96..128) as u32;
        if !compactable_immediate(imm) {
            return false;
        }
        src1_index = ((imm >> 8) & 0x1f) as u8;
    }

    // Gather everything before the rewrite starts clobbering fields.
    let debug_ctrl = get_bit(bin, 30);
    let acc_wr_ctrl = get_bit(bin, 28);
    let cond_mod = get(bin, 24..28);
    let dst_reg = get(bin, 53..61);
    let src0_reg = if src0_imm { 0 } else { get(bin, 69..77) };
    let src1_reg = if src0_imm || src1_imm {
        u64::from(imm & 0xff)
    } else {
        get(bin, 101..109)
    };

    bin.set_bit(cl::DEBUG_CTRL, debug_ctrl != 0);
    bin.set_field_u64(cl::CONTROL_INDEX, u64::from(control_index));
    bin.set_field_u64(cl::DATA_TYPE_INDEX, u64::from(datatype_index));
    bin.set_field_u64(cl::SUB_REG_INDEX, u64::from(subreg_index));
    bin.set_bit(cl::ACC_WR_CTRL, acc_wr_ctrl != 0);
    bin.set_field_u64(cl::COND_MOD, cond_mod);
    bin.set_bit(28, false);
    bin.set_bit(cl::CMPT_CTRL, true);
    bin.set_field_u64(cl::SRC0_INDEX, u64::from(src0_index));
    bin.set_field_u64(cl::SRC1_INDEX, u64::from(src1_index));
    bin.set_field_u64(cl::DST_REG, dst_reg);
    bin.set_field_u64(cl::SRC0_REG, src0_reg);
    bin.set_field_u64(cl::SRC1_REG, src1_reg);

    bin.set_compacted(true);
    true
}

fn compact_ternary(platform: Platform, bin: &mut EncodedInst) -> bool {
    // CHV and newer share the BDW tables but reserve a wider control group
    // and two-bit source-register top fields; compaction there requires
    // the extra bits clear.
    if platform >= Platform::Gen9
        && (get(bin, 35..37) != 0
            || get_bit(bin, 126) != 0
            || get_bit(bin, 105) != 0
            || get_bit(bin, 84) != 0)
    {
        return false;
    }

    let control_key =
        ((get(bin, 32..35) << 21) | get(bin, 8..29)) as u32;
    let Some(control_index) =
        CONTROL_TABLE_3SRC.iter().position(|&v| v == control_key)
    else {
        return false;
    };

    let source_key = get(bin, 37..56)
        | (get(bin, 65..73) << 19)
        | (get(bin, 86..94) << 27)
        | (get(bin, 107..115) << 35)
        | (get_bit(bin, 83) << 43)
        | (get_bit(bin, 104) << 44)
        | (get_bit(bin, 125) << 45);
    let Some(source_index) =
        SOURCE_TABLE_3SRC.iter().position(|&v| v == source_key)
    else {
        return false;
    };

    let bits_63_56 = get(bin, 56..64);
    let bit_64 = get_bit(bin, 64);
    let bit_85 = get_bit(bin, 85);
    let bit_106 = get_bit(bin, 106);
    let bits_75_73 = get(bin, 73..76);
    let bits_96_94 = get(bin, 94..97);
    let bits_117_115 = get(bin, 115..118);
    let bits_82_76 = get(bin, 76..83);
    let bits_103_97 = get(bin, 97..104);
    let bits_124_118 = get(bin, 118..125);

    bin.set_field_u64(8..10, control_index as u64);
    bin.set_field_u64(10..12, source_index as u64);
    bin.set_field_u64(12..20, bits_63_56);
    bin.set_field_u64(20..28, 0);
    bin.set_bit(28, bit_64 != 0);
    bin.set_bit(cl::CMPT_CTRL, true);
    bin.set_bit(32, bit_85 != 0);
    bin.set_bit(33, bit_106 != 0);
    bin.set_field_u64(34..37, bits_75_73);
    bin.set_field_u64(37..40, bits_96_94);
    bin.set_field_u64(40..43, bits_117_115);
    bin.set_field_u64(43..50, bits_82_76);
    bin.set_field_u64(50..57, bits_103_97);
    bin.set_field_u64(57..64, bits_124_118);

    bin.set_compacted(true);
    true
}

/// Expands a compacted two-source instruction back to its native form.
/// The inverse of `compact_basic`; three-source forms are not expanded.
pub fn uncompact(
    tables: &CompactionTables,
    bin: &EncodedInst,
) -> Option<EncodedInst> {
    if !bin.is_compacted() {
        return None;
    }

    let control_index = get(bin, cl::CONTROL_INDEX) as usize;
    let datatype_index = get(bin, cl::DATA_TYPE_INDEX) as usize;
    let subreg_index = get(bin, cl::SUB_REG_INDEX) as usize;
    let src0_index = get(bin, cl::SRC0_INDEX) as usize;
    let src1_index = get(bin, cl::SRC1_INDEX) as usize;

    let control = u64::from(CONTROL_TABLE[control_index]);
    let datatype = u64::from(tables.datatype_values[datatype_index]);
    let subreg = u64::from(SUBREG_TABLE[subreg_index]);
    let src0 = u64::from(SOURCE_TABLE[src0_index]);
    let src1 = u64::from(SOURCE_TABLE[src1_index]);

    let mut out = EncodedInst::new();
    out.set_field_u64(0..7, get(bin, cl::OPCODE));
    out.set_bit(30, get_bit(bin, cl::DEBUG_CTRL) != 0);

    // Scatter the table entries back into their native groups.
    out.set_bit(8, control & 1 != 0);
    out.set_bit(34, (control >> 1) & 1 != 0);
    out.set_field_u64(9..11, (control >> 2) & 0x3);
    out.set_field_u64(12..24, (control >> 4) & 0xfff);
    out.set_bit(31, (control >> 16) & 1 != 0);
    out.set_field_u64(32..34, (control >> 17) & 0x3);

    out.set_field_u64(35..47, datatype & 0xfff);
    out.set_field_u64(89..95, (datatype >> 12) & 0x3f);
    out.set_field_u64(61..64, (datatype >> 18) & 0x7);

    out.set_field_u64(48..53, subreg & 0x1f);
    out.set_field_u64(64..69, (subreg >> 5) & 0x1f);
    out.set_field_u64(96..101, (subreg >> 10) & 0x1f);

    out.set_field_u64(77..89, src0);
    out.set_field_u64(109..121, src1);

    out.set_field_u64(24..28, get(bin, cl::COND_MOD));
    out.set_bit(28, get_bit(bin, cl::ACC_WR_CTRL) != 0);
    out.set_field_u64(53..61, get(bin, cl::DST_REG));
    out.set_field_u64(69..77, get(bin, cl::SRC0_REG));
    out.set_field_u64(101..109, get(bin, cl::SRC1_REG));

    // Immediate sources rebuild their value from the sign-extended index
    // plus low byte.
    let src0_imm = out.get_bit_range_u64(41..43) == 3;
    let src1_imm = out.get_bit_range_u64(89..91) == 3;
    if src0_imm || src1_imm {
        let mut hi = get(bin, cl::SRC1_INDEX) as u32;
        if hi & 0x10 != 0 {
            hi |= 0xe0;
        }
        let mut imm = (get(bin, cl::SRC1_REG) as u32) | (hi << 8);
        if imm & 0x8000 != 0 {
            imm |= 0xffff_0000;
        }
        out.set_field_u64(96..128, u64::from(imm));
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_inst;
    use crate::ir::*;

    fn mov_f(dreg: u16, sreg: u16) -> Inst {
        let mut inst = Inst::new(Opcode::Mov, 8);
        inst.dst = Some(Dst::grf(dreg, 0, DataType::F));
        inst.srcs = vec![Src::Reg(SrcReg::grf(sreg, 0, DataType::F))];
        inst
    }

    #[test]
    fn test_compactable_immediate() {
        assert!(compactable_immediate(0));
        assert!(compactable_immediate(0xfff));
        assert!(compactable_immediate(0xffff_f000));
        assert!(compactable_immediate(0xffff_ffff));
        assert!(!compactable_immediate(0x1000));
        assert!(!compactable_immediate(0x8000_0000));
        assert!(!compactable_immediate(0xffff_f000 - 1));
    }

    #[test]
    fn test_simple_mov_compacts() {
        let tables = CompactionTables::new(Platform::Gen9);
        let mut bin = encode_inst(Platform::Gen9, &mov_f(10, 20)).unwrap();
        let done = try_compact(
            &tables,
            Platform::Gen9,
            Opcode::Mov,
            false,
            false,
            &mut bin,
        )
        .unwrap();
        assert!(done);
        assert!(bin.is_compacted());
        assert_eq!(bin.half_slots(), 1);
        // Register numbers ride along in the compact form.
        assert_eq!(get(&bin, cl::DST_REG), 10);
        assert_eq!(get(&bin, cl::SRC0_REG), 20);
        assert_eq!(get(&bin, cl::OPCODE), 0x01);
        assert_eq!(get_bit(&bin, cl::CMPT_CTRL), 1);
    }

    #[test]
    fn test_compaction_round_trip() {
        let tables = CompactionTables::new(Platform::Gen9);
        let native = encode_inst(Platform::Gen9, &mov_f(10, 20)).unwrap();

        let mut compacted = native;
        assert!(try_compact(
            &tables,
            Platform::Gen9,
            Opcode::Mov,
            false,
            false,
            &mut compacted,
        )
        .unwrap());

        let expanded = uncompact(&tables, &compacted).unwrap();
        assert_eq!(expanded.words(), native.words());

        // Idempotence: the expanded form is eligible all over again.
        let mut again = expanded;
        assert!(try_compact(
            &tables,
            Platform::Gen9,
            Opcode::Mov,
            false,
            false,
            &mut again,
        )
        .unwrap());
        assert_eq!(again.words(), compacted.words());
    }

    fn add_d_imm(imm: i32) -> Inst {
        let mut inst = Inst::new(Opcode::Add, 8);
        inst.dst = Some(Dst::grf(5, 0, DataType::D));
        inst.srcs = vec![
            Src::Reg(SrcReg::grf(6, 0, DataType::D)),
            Src::imm_d(imm),
        ];
        inst
    }

    #[test]
    fn test_immediate_compaction_round_trip() {
        let tables = CompactionTables::new(Platform::Gen9);
        let native =
            encode_inst(Platform::Gen9, &add_d_imm(-3)).unwrap();

        let mut compacted = native;
        assert!(try_compact(
            &tables,
            Platform::Gen9,
            Opcode::Add,
            false,
            false,
            &mut compacted,
        )
        .unwrap());
        // Sign-extended 13-bit immediate survives in the index fields.
        assert_eq!(get(&compacted, cl::SRC1_REG), 0xfd);
        assert_eq!(get(&compacted, cl::SRC1_INDEX), 0x1f);

        let expanded = uncompact(&tables, &compacted).unwrap();
        assert_eq!(
            expanded.get_bit_range_u64(96..128),
            0xffff_fffd
        );
        assert_eq!(expanded.words(), native.words());
    }

    #[test]
    fn test_large_immediate_blocks_compaction() {
        let tables = CompactionTables::new(Platform::Gen9);
        let mut bin =
            encode_inst(Platform::Gen9, &add_d_imm(0x12345)).unwrap();
        assert!(!try_compact(
            &tables,
            Platform::Gen9,
            Opcode::Add,
            false,
            false,
            &mut bin,
        )
        .unwrap());
        assert!(!bin.is_compacted());
    }

    #[test]
    fn test_send_never_compacts_after_gen8() {
        let tables = CompactionTables::new(Platform::Gen9);
        let mut bin = EncodedInst::new();
        assert!(!try_compact(
            &tables,
            Platform::Gen9,
            Opcode::Send,
            false,
            false,
            &mut bin,
        )
        .unwrap());
    }

    #[test]
    fn test_must_compact_failure_is_fatal() {
        let tables = CompactionTables::new(Platform::Gen9);
        let mut bin =
            encode_inst(Platform::Gen9, &add_d_imm(0x12345)).unwrap();
        assert!(matches!(
            try_compact(
                &tables,
                Platform::Gen9,
                Opcode::Add,
                false,
                true,
                &mut bin,
            ),
            Err(EncodeError::CompactionRequired)
        ));
    }

    #[test]
    fn test_odd_subregister_blocks_compaction() {
        let tables = CompactionTables::new(Platform::Gen9);
        let mut inst = mov_f(10, 20);
        inst.srcs = vec![Src::Reg(SrcReg::grf(20, 5, DataType::F))];
        let mut bin = encode_inst(Platform::Gen9, &inst).unwrap();
        // r20.5:f has subregister byte 20, absent from the table.
        assert!(!try_compact(
            &tables,
            Platform::Gen9,
            Opcode::Mov,
            false,
            false,
            &mut bin,
        )
        .unwrap());
    }
}
