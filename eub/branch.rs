// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Branch target resolution.
//!
//! Targets are symbolic labels until the whole kernel is laid out, since
//! compaction changes instruction positions.  The resolver runs as a small
//! state machine: while scanning, labels seen so far patch immediately and
//! forward references queue up; finalizing drains the queue once every
//! position is fixed.
//!
//! All offsets are in 8-byte units ([`JUMP_UNIT`]): half of a native
//! instruction, the granularity compaction moves code by.

use bitview::{SetBit, SetField, SetFieldU64};
use rustc_hash::FxHashMap;

use crate::encode::{EncodedInst, REG_FILE_IMM};
use crate::error::EncodeError;
use crate::ir::{Label, Opcode, JUMP_UNIT};
use crate::layout::compact as cl;
use crate::layout::{basic, hdr, SrcSlot, SRC0, SRC1};

/// Immediate-table code for the D type, what every branch offset field
/// is typed as.
const IMM_TYPE_D: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scanning,
    Finalizing,
    Done,
}

#[derive(Debug)]
struct Fixup {
    inst_index: usize,
    half_pos: i64,
    op: Opcode,
    jip: Label,
    uip: Option<Label>,
}

#[derive(Debug)]
pub struct BranchResolver {
    state: State,
    labels: FxHashMap<Label, i64>,
    pending: Vec<Fixup>,
}

impl BranchResolver {
    pub fn new() -> BranchResolver {
        BranchResolver {
            state: State::Scanning,
            labels: FxHashMap::default(),
            pending: Vec::new(),
        }
    }

    /// Pins `label` at `half_pos`, in half-instruction units from the
    /// start of the kernel.
    pub fn define_label(
        &mut self,
        label: Label,
        half_pos: i64,
    ) -> Result<(), EncodeError> {
        if self.state != State::Scanning {
            return Err(EncodeError::invariant(
                "labels cannot be defined after scanning".to_string(),
            ));
        }
        if self.labels.insert(label, half_pos).is_some() {
            return Err(EncodeError::invariant(format!(
                "label L{} defined twice",
                label.0
            )));
        }
        Ok(())
    }

    /// Records a just-encoded branch at `half_pos`.  Backward branches
    /// patch on the spot; forward references wait for [`Self::finalize`].
    pub fn branch_encoded(
        &mut self,
        inst_index: usize,
        op: Opcode,
        half_pos: i64,
        jip: Label,
        uip: Option<Label>,
        insts: &mut [EncodedInst],
    ) -> Result<(), EncodeError> {
        if self.state != State::Scanning {
            return Err(EncodeError::invariant(
                "branches cannot be added after scanning".to_string(),
            ));
        }
        let fixup = Fixup {
            inst_index,
            half_pos,
            op,
            jip,
            uip,
        };
        if !self.try_patch(&fixup, insts)? {
            self.pending.push(fixup);
        }
        Ok(())
    }

    /// Drains the forward-reference queue.  Every target must be defined
    /// by now.
    pub fn finalize(
        &mut self,
        insts: &mut [EncodedInst],
    ) -> Result<(), EncodeError> {
        if self.state != State::Scanning {
            return Err(EncodeError::invariant(
                "resolver finalized twice".to_string(),
            ));
        }
        self.state = State::Finalizing;

        for fixup in std::mem::take(&mut self.pending) {
            if !self.try_patch(&fixup, insts)? {
                let missing = if self.labels.contains_key(&fixup.jip) {
                    // try_patch only fails on an unknown label, so it
                    // must be the UIP.
                    fixup.uip.unwrap_or(fixup.jip)
                } else {
                    fixup.jip
                };
                return Err(EncodeError::DanglingLabel(missing));
            }
        }

        self.state = State::Done;
        Ok(())
    }

    fn try_patch(
        &self,
        fixup: &Fixup,
        insts: &mut [EncodedInst],
    ) -> Result<bool, EncodeError> {
        let Some(&jip_half) = self.labels.get(&fixup.jip) else {
            return Ok(false);
        };
        let uip_half = match fixup.uip {
            Some(uip) => match self.labels.get(&uip) {
                Some(&h) => Some(h),
                None => return Ok(false),
            },
            None => None,
        };

        let bin = &mut insts[fixup.inst_index];
        if fixup.op == Opcode::Jmpi {
            patch_jmpi(bin, fixup.half_pos, jip_half)
        } else {
            patch_branch(bin, fixup.op, fixup.half_pos, jip_half, uip_half)
        }
        .map(|()| true)
    }
}

fn branch_offset(from_half: i64, to_half: i64) -> Result<i64, EncodeError> {
    let bytes = (to_half - from_half) * JUMP_UNIT;
    if i32::try_from(bytes).is_err() {
        return Err(EncodeError::invariant(format!(
            "branch offset {bytes} out of range"
        )));
    }
    Ok(bytes)
}

fn set_imm_d(bin: &mut EncodedInst, slot: &SrcSlot) {
    bin.set_field_u64(slot.reg_file.clone(), REG_FILE_IMM);
    bin.set_field_u64(slot.dtype.clone(), IMM_TYPE_D);
}

/// jmpi offsets are relative to the *next* instruction since the
/// hardware has already advanced IP, so the branch distance shrinks by
/// however many half-slots this instruction occupies.
fn patch_jmpi(
    bin: &mut EncodedInst,
    half_pos: i64,
    target_half: i64,
) -> Result<(), EncodeError> {
    let delta = target_half - half_pos - i64::from(bin.half_slots());
    let off = delta * JUMP_UNIT;

    if bin.is_compacted() {
        // The compact form only keeps 13 significant immediate bits.
        if off < -(1 << 12) || off >= (1 << 12) {
            return Err(EncodeError::invariant(format!(
                "jmpi offset {off} exceeds the compacted immediate"
            )));
        }
        let off = off as u32;
        bin.set_field_u64(cl::SRC1_REG, u64::from(off & 0xff));
        bin.set_field_u64(cl::SRC1_INDEX, u64::from((off >> 8) & 0x1f));
    } else {
        let off = i32::try_from(off).map_err(|_| {
            EncodeError::invariant(format!(
                "jmpi offset {off} out of range"
            ))
        })?;
        set_imm_d(bin, &SRC1);
        bin.set_field(basic::JIP, off);
    }
    Ok(())
}

fn patch_branch(
    bin: &mut EncodedInst,
    op: Opcode,
    half_pos: i64,
    jip_half: i64,
    uip_half: Option<i64>,
) -> Result<(), EncodeError> {
    let mut jip = branch_offset(half_pos, jip_half)?;

    // An endif that falls straight through still encodes a step over
    // itself.
    if op == Opcode::Endif && jip == 0 {
        jip = 2 * JUMP_UNIT;
    }

    if op.jip_in_src1() {
        set_imm_d(bin, &SRC1);
    } else if op == Opcode::Call {
        // call stores the return address through src0 with a fixed
        // <4;4,1> region (raw codes 2/2/1) and keeps its offset in the
        // src1 immediate.
        bin.set_field_u64(SRC0.vert_stride, 2);
        bin.set_field_u64(SRC0.width, 2);
        bin.set_field_u64(SRC0.horz_stride, 1);
        set_imm_d(bin, &SRC1);
    } else {
        set_imm_d(bin, &SRC0);
    }
    bin.set_field(basic::JIP, jip as i32);

    if let Some(uip_half) = uip_half {
        let uip = branch_offset(half_pos, uip_half)?;
        bin.set_field(basic::UIP, uip as i32);
    }

    // Backward branches flag their direction for the EU.
    if jip < 0 {
        bin.set_bit(hdr::ACC_WR_CTRL, true);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitview::GetField;

    use crate::encode::encode_inst;
    use crate::ir::{Inst, Platform, Src};

    fn encode_branch(op: Opcode) -> EncodedInst {
        let mut inst = Inst::new(op, 8);
        inst.srcs = vec![Src::Target(Label(0))];
        encode_inst(Platform::Gen9, &inst).unwrap()
    }

    #[test]
    fn test_backward_branch_patches_immediately() {
        let mut r = BranchResolver::new();
        r.define_label(Label(7), 0).unwrap();
        let mut insts = vec![encode_branch(Opcode::While)];
        r.branch_encoded(0, Opcode::While, 4, Label(7), None, &mut insts)
            .unwrap();

        // while keeps its JIP in the src1 immediate slot.
        assert_eq!(insts[0].get_field_u64(SRC1.reg_file), REG_FILE_IMM);
        assert_eq!(insts[0].get_field_i64(basic::JIP), -32);
        assert!(insts[0].get_bit(hdr::ACC_WR_CTRL));
        r.finalize(&mut insts).unwrap();
    }

    #[test]
    fn test_forward_branch_defers_to_finalize() {
        let mut r = BranchResolver::new();
        let mut insts = vec![encode_branch(Opcode::Endif)];
        r.branch_encoded(0, Opcode::Endif, 0, Label(1), None, &mut insts)
            .unwrap();
        // Nothing written yet.
        assert_eq!(insts[0].get_field_u64(SRC1.reg_file), 0);

        r.define_label(Label(1), 6).unwrap();
        r.finalize(&mut insts).unwrap();
        assert_eq!(insts[0].get_field_i64(basic::JIP), 48);
        assert!(!insts[0].get_bit(hdr::ACC_WR_CTRL));
    }

    #[test]
    fn test_endif_step_over_itself() {
        let mut r = BranchResolver::new();
        r.define_label(Label(0), 2).unwrap();
        let mut insts = vec![encode_branch(Opcode::Endif)];
        r.branch_encoded(0, Opcode::Endif, 2, Label(0), None, &mut insts)
            .unwrap();
        assert_eq!(insts[0].get_field_i64(basic::JIP), 16);
    }

    #[test]
    fn test_dual_offset_branch() {
        let mut r = BranchResolver::new();
        let mut insts = vec![encode_branch(Opcode::If)];
        r.branch_encoded(
            0,
            Opcode::If,
            0,
            Label(1),
            Some(Label(2)),
            &mut insts,
        )
        .unwrap();
        r.define_label(Label(1), 4).unwrap();
        r.define_label(Label(2), 10).unwrap();
        r.finalize(&mut insts).unwrap();

        assert_eq!(insts[0].get_field_u64(SRC0.reg_file), REG_FILE_IMM);
        assert_eq!(insts[0].get_field_i64(basic::JIP), 32);
        assert_eq!(insts[0].get_field_i64(basic::UIP), 80);
    }

    #[test]
    fn test_call_region_and_offset_slot() {
        let mut r = BranchResolver::new();
        r.define_label(Label(0), 8).unwrap();
        let mut insts = vec![encode_branch(Opcode::Call)];
        r.branch_encoded(0, Opcode::Call, 0, Label(0), None, &mut insts)
            .unwrap();

        assert_eq!(insts[0].get_field_u64(SRC0.vert_stride), 2);
        assert_eq!(insts[0].get_field_u64(SRC0.width), 2);
        assert_eq!(insts[0].get_field_u64(SRC0.horz_stride), 1);
        assert_eq!(insts[0].get_field_u64(SRC1.reg_file), REG_FILE_IMM);
        assert_eq!(insts[0].get_field_i64(basic::JIP), 64);
    }

    #[test]
    fn test_dangling_label() {
        let mut r = BranchResolver::new();
        let mut insts = vec![encode_branch(Opcode::While)];
        r.branch_encoded(0, Opcode::While, 0, Label(9), None, &mut insts)
            .unwrap();
        assert!(matches!(
            r.finalize(&mut insts),
            Err(EncodeError::DanglingLabel(Label(9)))
        ));
    }

    #[test]
    fn test_native_jmpi_offset_counts_past_itself() {
        let mut r = BranchResolver::new();
        r.define_label(Label(0), 8).unwrap();
        let mut inst = Inst::new(Opcode::Jmpi, 1);
        inst.srcs = vec![Src::Target(Label(0))];
        let mut insts =
            vec![encode_inst(Platform::Gen9, &inst).unwrap()];
        r.branch_encoded(0, Opcode::Jmpi, 2, Label(0), None, &mut insts)
            .unwrap();
        // (8 - 2 - 2 own halves) * 8 bytes
        assert_eq!(insts[0].get_field_i64(basic::JIP), 32);
    }

    #[test]
    fn test_compacted_jmpi_offset_in_index_fields() {
        let mut bin = EncodedInst::new();
        bin.set_compacted(true);

        let mut r = BranchResolver::new();
        r.define_label(Label(0), 0).unwrap();
        let mut insts = vec![bin];
        r.branch_encoded(0, Opcode::Jmpi, 6, Label(0), None, &mut insts)
            .unwrap();
        // (0 - 6 - 1 own half) * 8 = -56 = 0x...fc8
        assert_eq!(insts[0].get_field_u64(cl::SRC1_REG), 0xc8);
        assert_eq!(insts[0].get_field_u64(cl::SRC1_INDEX), 0x1f);
    }

    #[test]
    fn test_resolver_rejects_late_definitions() {
        let mut r = BranchResolver::new();
        let mut insts = Vec::new();
        r.finalize(&mut insts).unwrap();
        assert!(r.define_label(Label(0), 0).is_err());
        assert!(r.finalize(&mut insts).is_err());
    }
}
