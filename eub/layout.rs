// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Bit positions for every instruction layout.
//!
//! All ranges are absolute bit offsets into the 128-bit native record
//! (64-bit for the compact layout), low bit first, end-exclusive.  Fields
//! that overlay each other keyed by addressing mode (direct GRF vs
//! architectural vs indirect) are all declared; the coverage tables at the
//! bottom enumerate one non-overlapping partition per layout for the static
//! layout tests.

use std::ops::Range;

/// Header fields shared by every 128-bit layout.
pub mod hdr {
    use super::Range;

    pub const OPCODE: Range<usize> = 0..7;
    pub const ACCESS_MODE: Range<usize> = 8..9;
    pub const DEP_CTRL: Range<usize> = 9..11;
    pub const NIB_CTRL: Range<usize> = 11..12;
    pub const QTR_CTRL: Range<usize> = 12..14;
    pub const THREAD_CTRL: Range<usize> = 14..16;
    /// Partial-precision bit of math instructions, overlaying thread
    /// control.
    pub const MATH_PART_PREC: usize = 14;
    pub const PRED_CTRL: Range<usize> = 16..20;
    pub const PRED_INV: usize = 20;
    pub const EXEC_SIZE: Range<usize> = 21..24;
    pub const COND_MOD: Range<usize> = 24..28;
    /// Math function selector and send SFID reuse the condition-modifier
    /// nibble.
    pub const MATH_FUNC: Range<usize> = 24..28;
    pub const SFID: Range<usize> = 24..28;
    pub const ACC_WR_CTRL: usize = 28;
    /// Gen9+ sends carry NoSrcDepSet where AccWrCtrl would be.
    pub const NO_SRC_DEP_SET: usize = 28;
    pub const CMPT_CTRL: usize = 29;
    pub const DEBUG_CTRL: usize = 30;
    pub const SATURATE: usize = 31;
    pub const FLAG_SUBREG: usize = 32;
    pub const FLAG_REG: usize = 33;
    pub const MASK_CTRL: usize = 34;
}

/// The native one/two-source layout.
pub mod basic {
    use super::Range;

    pub const DST_REG_FILE: Range<usize> = 35..37;
    pub const DST_TYPE: Range<usize> = 37..41;

    pub const DST_CHAN_EN: Range<usize> = 48..52;
    /// Direct align1: the full 13-bit byte address.
    pub const DST_REG_BYTE: Range<usize> = 48..61;
    /// Direct align16: byte address in 16-byte units.
    pub const DST_REG_OWORD: Range<usize> = 52..61;
    pub const DST_ARCH_SUBREG_BYTE: Range<usize> = 48..53;
    pub const DST_ARCH_NUM: Range<usize> = 53..57;
    pub const DST_ARCH_FILE: Range<usize> = 57..61;
    pub const DST_IDX_REG: Range<usize> = 57..61;
    pub const DST_IDX_IMM_BYTE: Range<usize> = 48..57;
    pub const DST_IDX_IMM_OWORD: Range<usize> = 52..57;
    pub const DST_IDX_IMM_MSB: usize = 47;
    pub const DST_HORZ_STRIDE: Range<usize> = 61..63;
    pub const DST_ADDR_MODE: usize = 63;

    pub const SRC_IMM32: Range<usize> = 96..128;
    pub const SRC_IMM64_LO: Range<usize> = 64..96;
    pub const SRC_IMM64_HI: Range<usize> = 96..128;

    pub const JIP: Range<usize> = 96..128;
    pub const UIP: Range<usize> = 64..96;

    pub const EOT: usize = 127;
    pub const EX_MSG_LENGTH: Range<usize> = 64..68;
    /// Gen9+ spread of a plain send's extended-descriptor function control,
    /// nibble by nibble (descriptor bits 16..32).
    pub const EX_DESC_NIB0: Range<usize> = 64..68;
    pub const EX_DESC_NIB1: Range<usize> = 80..84;
    pub const EX_DESC_NIB2: Range<usize> = 85..89;
    pub const EX_DESC_NIB3: Range<usize> = 91..95;
    /// Message-descriptor bits 29 and 30 are mirrored here even when the
    /// descriptor itself comes from a register.
    pub const DESC_BIT_29: usize = 125;
    pub const DESC_BIT_30: usize = 126;
}

/// Per-slot field positions of the native layout.  Slot 1 is slot 0
/// shifted up one DWORD except for its register-file/type pair and the
/// indirect sign bit.
pub struct SrcSlot {
    pub reg_file: Range<usize>,
    pub dtype: Range<usize>,
    pub chan_sel_lo: Range<usize>,
    pub chan_sel_hi: Range<usize>,
    pub reg_byte: Range<usize>,
    pub reg_oword: Range<usize>,
    pub arch_subreg_byte: Range<usize>,
    pub arch_num: Range<usize>,
    pub arch_file: Range<usize>,
    pub idx_reg: Range<usize>,
    pub idx_imm_byte: Range<usize>,
    pub idx_imm_oword: Range<usize>,
    pub idx_imm_msb: usize,
    pub modifier: Range<usize>,
    pub addr_mode: usize,
    pub horz_stride: Range<usize>,
    pub width: Range<usize>,
    pub vert_stride: Range<usize>,
}

pub const SRC0: SrcSlot = SrcSlot {
    reg_file: 41..43,
    dtype: 43..47,
    chan_sel_lo: 64..68,
    chan_sel_hi: 80..84,
    reg_byte: 64..77,
    reg_oword: 68..77,
    arch_subreg_byte: 64..69,
    arch_num: 69..73,
    arch_file: 73..77,
    idx_reg: 73..77,
    idx_imm_byte: 64..73,
    idx_imm_oword: 68..73,
    idx_imm_msb: 95,
    modifier: 77..79,
    addr_mode: 79,
    horz_stride: 80..82,
    width: 82..85,
    vert_stride: 85..89,
};

pub const SRC1: SrcSlot = SrcSlot {
    reg_file: 89..91,
    dtype: 91..95,
    chan_sel_lo: 96..100,
    chan_sel_hi: 112..116,
    reg_byte: 96..109,
    reg_oword: 100..109,
    arch_subreg_byte: 96..101,
    arch_num: 101..105,
    arch_file: 105..109,
    idx_reg: 105..109,
    idx_imm_byte: 96..105,
    idx_imm_oword: 100..105,
    idx_imm_msb: 121,
    modifier: 109..111,
    addr_mode: 111,
    horz_stride: 112..114,
    width: 114..117,
    vert_stride: 117..121,
};

/// The dense align16 three-source layout.
pub mod tsrc16 {
    use super::Range;

    pub const SRC0_MOD: Range<usize> = 37..39;
    pub const SRC1_MOD: Range<usize> = 39..41;
    pub const SRC2_MOD: Range<usize> = 41..43;
    /// One relative type code shared by all three sources.
    pub const SRC_TYPE: Range<usize> = 43..46;
    pub const DST_TYPE: Range<usize> = 46..49;
    pub const DST_CHAN_EN: Range<usize> = 49..53;
    /// Destination byte address in DWORD units.
    pub const DST_REG_DWORD: Range<usize> = 53..64;

    pub const SRC0_REP_CTRL: usize = 64;
    pub const SRC0_CHAN_SEL: Range<usize> = 65..73;
    pub const SRC0_REG_DWORD: Range<usize> = 73..84;
    pub const SRC0_SUBREG_W: usize = 84;

    pub const SRC1_REP_CTRL: usize = 85;
    pub const SRC1_CHAN_SEL: Range<usize> = 86..94;
    pub const SRC1_REG_DWORD: Range<usize> = 94..105;
    pub const SRC1_SUBREG_W: usize = 105;

    pub const SRC2_REP_CTRL: usize = 106;
    pub const SRC2_CHAN_SEL: Range<usize> = 107..115;
    pub const SRC2_REG_DWORD: Range<usize> = 115..126;
    pub const SRC2_SUBREG_W: usize = 126;
}

/// The align1 ternary layout: one 21-bit block per source on top of a
/// shared type/stride prefix.
pub mod tsrc1 {
    use super::Range;

    /// 0 = integer pipe, 1 = floating-point pipe.
    pub const EXEC_TYPE: usize = 35;
    pub const DST_TYPE: Range<usize> = 36..39;
    pub const SRC0_TYPE: Range<usize> = 39..42;
    pub const SRC1_TYPE: Range<usize> = 42..45;
    pub const SRC2_TYPE: Range<usize> = 45..48;
    pub const DST_SUBREG_BYTE: Range<usize> = 48..53;
    pub const DST_REG: Range<usize> = 53..61;
    pub const DST_HORZ_STRIDE: Range<usize> = 61..63;

    pub const BLOCK_BITS: usize = 21;
    pub const SRC_BLOCK: [usize; 3] = [64, 85, 106];

    pub fn modifier(slot: usize) -> Range<usize> {
        let b = SRC_BLOCK[slot];
        b..b + 2
    }

    pub fn vert_stride(slot: usize) -> Range<usize> {
        let b = SRC_BLOCK[slot];
        b + 2..b + 4
    }

    pub fn horz_stride(slot: usize) -> Range<usize> {
        let b = SRC_BLOCK[slot];
        b + 4..b + 6
    }

    pub fn reg_file(slot: usize) -> usize {
        SRC_BLOCK[slot] + 6
    }

    pub fn subreg_byte(slot: usize) -> Range<usize> {
        let b = SRC_BLOCK[slot];
        b + 7..b + 12
    }

    pub fn reg(slot: usize) -> Range<usize> {
        let b = SRC_BLOCK[slot];
        b + 12..b + 20
    }

    pub fn is_imm(slot: usize) -> usize {
        SRC_BLOCK[slot] + 20
    }

    /// The 16-bit signed immediate overlays the stride and register
    /// fields of its slot.
    pub fn imm16(slot: usize) -> Range<usize> {
        let b = SRC_BLOCK[slot];
        b + 4..b + 20
    }
}

/// The split-send layout.
pub mod sends {
    use super::Range;

    pub const DST_REG_FILE: usize = 35;
    pub const SRC1_REG_FILE: usize = 36;
    pub const DST_TYPE: Range<usize> = 37..41;
    pub const SRC0_REG_FILE: Range<usize> = 41..43;
    pub const SRC0_TYPE: usize = 43;
    pub const SRC1_REG: Range<usize> = 44..52;
    pub const SRC1_ADDR_SUBREG: Range<usize> = 48..52;
    pub const SRC1_IDX_IMM: Range<usize> = 43..48;
    pub const SRC1_IDX_IMM_SIGN: usize = 41;
    pub const SRC1_ADDR_MODE: usize = 42;
    pub const DST_SUBREG: usize = 52;
    pub const DST_REG: Range<usize> = 53..61;
    pub const DST_ADDR_SUBREG: Range<usize> = 57..61;
    pub const DST_IDX_IMM: Range<usize> = 52..57;
    pub const DST_IDX_IMM_SIGN: usize = 62;
    pub const SEL_REG32_EX_DESC: usize = 61;
    pub const DST_ADDR_MODE: usize = 63;
    pub const EX_MSG_LENGTH: Range<usize> = 64..68;
    pub const SRC0_REG: Range<usize> = 69..77;
    pub const SRC0_ADDR_SUBREG: Range<usize> = 73..77;
    pub const SRC0_IDX_IMM: Range<usize> = 68..73;
    pub const SRC0_IDX_IMM_SIGN: usize = 78;
    pub const SEL_REG32_DESC: usize = 77;
    pub const SRC0_ADDR_MODE: usize = 79;
    pub const EX_DESC_FUNC_CTRL: Range<usize> = 80..96;
    /// The declarative table cannot express the a0 subregister of a
    /// register-sourced extended descriptor; it is patched into the low
    /// three function-control bits after the fact.
    pub const EX_DESC_REG_NUM: Range<usize> = 80..83;
    pub const DESC: Range<usize> = 96..128;
}

/// The 64-bit compact layout.
pub mod compact {
    use super::Range;

    pub const OPCODE: Range<usize> = 0..7;
    pub const DEBUG_CTRL: usize = 7;
    pub const CONTROL_INDEX: Range<usize> = 8..13;
    pub const DATA_TYPE_INDEX: Range<usize> = 13..18;
    pub const SUB_REG_INDEX: Range<usize> = 18..23;
    pub const ACC_WR_CTRL: usize = 23;
    pub const COND_MOD: Range<usize> = 24..28;
    pub const CMPT_CTRL: usize = 29;
    pub const SRC0_INDEX: Range<usize> = 30..35;
    pub const SRC1_INDEX: Range<usize> = 35..40;
    pub const DST_REG: Range<usize> = 40..48;
    pub const SRC0_REG: Range<usize> = 48..56;
    pub const SRC1_REG: Range<usize> = 56..64;
}

pub type FieldTable = &'static [(&'static str, Range<usize>)];

/// One non-overlapping partition of the native two-source layout (direct
/// align1 form).
pub const NATIVE_FIELDS: FieldTable = &[
    ("opcode", 0..7),
    ("reserved7", 7..8),
    ("access_mode", 8..9),
    ("dep_ctrl", 9..11),
    ("nib_ctrl", 11..12),
    ("qtr_ctrl", 12..14),
    ("thread_ctrl", 14..16),
    ("pred_ctrl", 16..20),
    ("pred_inv", 20..21),
    ("exec_size", 21..24),
    ("cond_mod", 24..28),
    ("acc_wr_ctrl", 28..29),
    ("cmpt_ctrl", 29..30),
    ("debug_ctrl", 30..31),
    ("saturate", 31..32),
    ("flag_subreg", 32..33),
    ("flag_reg", 33..34),
    ("mask_ctrl", 34..35),
    ("dst_reg_file", 35..37),
    ("dst_type", 37..41),
    ("src0_reg_file", 41..43),
    ("src0_type", 43..47),
    ("reserved47", 47..48),
    ("dst_reg_byte", 48..61),
    ("dst_horz_stride", 61..63),
    ("dst_addr_mode", 63..64),
    ("src0_reg_byte", 64..77),
    ("src0_mod", 77..79),
    ("src0_addr_mode", 79..80),
    ("src0_horz_stride", 80..82),
    ("src0_width", 82..85),
    ("src0_vert_stride", 85..89),
    ("src1_reg_file", 89..91),
    ("src1_type", 91..95),
    ("reserved95", 95..96),
    ("src1_reg_byte", 96..109),
    ("src1_mod", 109..111),
    ("src1_addr_mode", 111..112),
    ("src1_horz_stride", 112..114),
    ("src1_width", 114..117),
    ("src1_vert_stride", 117..121),
    ("reserved121", 121..122),
    ("reserved122", 122..128),
];

pub const TSRC16_FIELDS: FieldTable = &[
    ("opcode", 0..7),
    ("reserved7", 7..8),
    ("access_mode", 8..9),
    ("dep_ctrl", 9..11),
    ("nib_ctrl", 11..12),
    ("qtr_ctrl", 12..14),
    ("thread_ctrl", 14..16),
    ("pred_ctrl", 16..20),
    ("pred_inv", 20..21),
    ("exec_size", 21..24),
    ("cond_mod", 24..28),
    ("acc_wr_ctrl", 28..29),
    ("cmpt_ctrl", 29..30),
    ("debug_ctrl", 30..31),
    ("saturate", 31..32),
    ("flag_subreg", 32..33),
    ("flag_reg", 33..34),
    ("mask_ctrl", 34..35),
    ("reserved35", 35..37),
    ("src0_mod", 37..39),
    ("src1_mod", 39..41),
    ("src2_mod", 41..43),
    ("src_type", 43..46),
    ("dst_type", 46..49),
    ("dst_chan_en", 49..53),
    ("dst_reg_dword", 53..64),
    ("src0_rep_ctrl", 64..65),
    ("src0_chan_sel", 65..73),
    ("src0_reg_dword", 73..84),
    ("src0_subreg_w", 84..85),
    ("src1_rep_ctrl", 85..86),
    ("src1_chan_sel", 86..94),
    ("src1_reg_dword", 94..105),
    ("src1_subreg_w", 105..106),
    ("src2_rep_ctrl", 106..107),
    ("src2_chan_sel", 107..115),
    ("src2_reg_dword", 115..126),
    ("src2_subreg_w", 126..127),
    ("reserved127", 127..128),
];

pub const TSRC1_FIELDS: FieldTable = &[
    ("opcode", 0..7),
    ("reserved7", 7..8),
    ("access_mode", 8..9),
    ("dep_ctrl", 9..11),
    ("nib_ctrl", 11..12),
    ("qtr_ctrl", 12..14),
    ("thread_ctrl", 14..16),
    ("pred_ctrl", 16..20),
    ("pred_inv", 20..21),
    ("exec_size", 21..24),
    ("cond_mod", 24..28),
    ("acc_wr_ctrl", 28..29),
    ("cmpt_ctrl", 29..30),
    ("debug_ctrl", 30..31),
    ("saturate", 31..32),
    ("flag_subreg", 32..33),
    ("flag_reg", 33..34),
    ("mask_ctrl", 34..35),
    ("exec_type", 35..36),
    ("dst_type", 36..39),
    ("src0_type", 39..42),
    ("src1_type", 42..45),
    ("src2_type", 45..48),
    ("dst_subreg_byte", 48..53),
    ("dst_reg", 53..61),
    ("dst_horz_stride", 61..63),
    ("reserved63", 63..64),
    ("src0_mod", 64..66),
    ("src0_vert_stride", 66..68),
    ("src0_horz_stride", 68..70),
    ("src0_reg_file", 70..71),
    ("src0_subreg_byte", 71..76),
    ("src0_reg", 76..84),
    ("src0_is_imm", 84..85),
    ("src1_mod", 85..87),
    ("src1_vert_stride", 87..89),
    ("src1_horz_stride", 89..91),
    ("src1_reg_file", 91..92),
    ("src1_subreg_byte", 92..97),
    ("src1_reg", 97..105),
    ("src1_is_imm", 105..106),
    ("src2_mod", 106..108),
    ("src2_vert_stride", 108..110),
    ("src2_horz_stride", 110..112),
    ("src2_reg_file", 112..113),
    ("src2_subreg_byte", 113..118),
    ("src2_reg", 118..126),
    ("src2_is_imm", 126..127),
    ("reserved127", 127..128),
];

pub const SENDS_FIELDS: FieldTable = &[
    ("opcode", 0..7),
    ("reserved7", 7..8),
    ("access_mode", 8..9),
    ("dep_ctrl", 9..11),
    ("nib_ctrl", 11..12),
    ("qtr_ctrl", 12..14),
    ("thread_ctrl", 14..16),
    ("pred_ctrl", 16..20),
    ("pred_inv", 20..21),
    ("exec_size", 21..24),
    ("sfid", 24..28),
    ("no_src_dep_set", 28..29),
    ("cmpt_ctrl", 29..30),
    ("debug_ctrl", 30..31),
    ("saturate", 31..32),
    ("flag_subreg", 32..33),
    ("flag_reg", 33..34),
    ("mask_ctrl", 34..35),
    ("dst_reg_file", 35..36),
    ("src1_reg_file", 36..37),
    ("dst_type", 37..41),
    ("src0_reg_file", 41..43),
    ("src0_type", 43..44),
    ("src1_reg", 44..52),
    ("dst_subreg", 52..53),
    ("dst_reg", 53..61),
    ("sel_reg32_ex_desc", 61..62),
    ("reserved62", 62..63),
    ("dst_addr_mode", 63..64),
    ("ex_msg_length", 64..68),
    ("reserved68", 68..69),
    ("src0_reg", 69..77),
    ("sel_reg32_desc", 77..78),
    ("reserved78", 78..79),
    ("src0_addr_mode", 79..80),
    ("ex_desc_func_ctrl", 80..96),
    ("desc", 96..128),
];

pub const COMPACT_FIELDS: FieldTable = &[
    ("opcode", 0..7),
    ("debug_ctrl", 7..8),
    ("control_index", 8..13),
    ("data_type_index", 13..18),
    ("sub_reg_index", 18..23),
    ("acc_wr_ctrl", 23..24),
    ("cond_mod", 24..28),
    ("reserved28", 28..29),
    ("cmpt_ctrl", 29..30),
    ("src0_index", 30..35),
    ("src1_index", 35..40),
    ("dst_reg", 40..48),
    ("src0_reg", 48..56),
    ("src1_reg", 56..64),
];

pub const ALL_FORMATS: &[(&str, FieldTable, usize)] = &[
    ("native", NATIVE_FIELDS, 128),
    ("ternary_align16", TSRC16_FIELDS, 128),
    ("ternary_align1", TSRC1_FIELDS, 128),
    ("split_send", SENDS_FIELDS, 128),
    ("compact", COMPACT_FIELDS, 64),
];
