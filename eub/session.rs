// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Kernel-level encoding session.
//!
//! Drives the per-instruction encoder over a kernel in two passes: a
//! scanning pass that encodes and compacts every instruction while
//! collecting label positions, and a finalizing pass that patches the
//! forward branches compaction made impossible to place earlier.

use tracing::{debug, info};

use crate::branch::BranchResolver;
use crate::compact::{try_compact, CompactionTables};
use crate::encode::{encode_inst, EncodedInst};
use crate::error::EncodeError;
use crate::ir::{CompactionPolicy, Inst, Kernel, Platform, Src, JUMP_UNIT};

/// The flat output of a session: raw instruction bytes plus the counts a
/// runtime needs to size and patch dispatch state.
#[derive(Debug, Clone)]
pub struct EncodedProgram {
    pub bytes: Vec<u8>,
    pub inst_count: u32,
    pub half_inst_count: u32,
}

pub struct EncodingSession {
    platform: Platform,
    tables: CompactionTables,
    resolver: BranchResolver,
    insts: Vec<EncodedInst>,
    half_pos: i64,
}

impl EncodingSession {
    pub fn new(platform: Platform) -> EncodingSession {
        EncodingSession {
            platform,
            tables: CompactionTables::new(platform),
            resolver: BranchResolver::new(),
            insts: Vec::new(),
            half_pos: 0,
        }
    }

    pub fn encode_kernel(
        mut self,
        kernel: &Kernel,
    ) -> Result<EncodedProgram, EncodeError> {
        for (b, block) in kernel.blocks.iter().enumerate() {
            if let Some(label) = block.label {
                self.resolver.define_label(label, self.half_pos)?;
            }
            debug!(
                block = b,
                insts = block.insts.len(),
                half_pos = self.half_pos,
                "scanning block"
            );
            for inst in &block.insts {
                let ip = self.insts.len();
                self.encode_one(inst).map_err(|e| e.at(ip))?;
            }
        }

        self.resolver.finalize(&mut self.insts)?;

        let mut bytes =
            Vec::with_capacity(self.half_pos as usize * JUMP_UNIT as usize);
        for inst in &self.insts {
            inst.append_bytes(&mut bytes);
        }

        info!(
            instructions = self.insts.len(),
            half_slots = self.half_pos,
            bytes = bytes.len(),
            "kernel encoded"
        );
        Ok(EncodedProgram {
            bytes,
            inst_count: self.insts.len() as u32,
            half_inst_count: self.half_pos as u32,
        })
    }

    fn encode_one(&mut self, inst: &Inst) -> Result<(), EncodeError> {
        let mut bin = encode_inst(self.platform, inst)?;

        match inst.compaction {
            CompactionPolicy::MustNot => {}
            CompactionPolicy::Must => {
                try_compact(
                    &self.tables,
                    self.platform,
                    inst.op,
                    inst.is_ternary(),
                    true,
                    &mut bin,
                )?;
            }
            CompactionPolicy::Normal => {
                if !inst.op.never_compacts() {
                    try_compact(
                        &self.tables,
                        self.platform,
                        inst.op,
                        inst.is_ternary(),
                        false,
                        &mut bin,
                    )?;
                }
            }
        }

        let index = self.insts.len();
        let half_pos = self.half_pos;
        self.insts.push(bin);
        self.half_pos += i64::from(bin.half_slots());

        let mut targets = inst.srcs.iter().filter_map(|s| match s {
            Src::Target(l) => Some(*l),
            _ => None,
        });
        if let Some(jip) = targets.next() {
            let uip = if inst.op.has_uip() {
                // A single-target dual-offset branch reconverges where it
                // jumps.
                Some(targets.next().unwrap_or(jip))
            } else {
                None
            };
            self.resolver.branch_encoded(
                index,
                inst.op,
                half_pos,
                jip,
                uip,
                &mut self.insts,
            )?;
        }
        Ok(())
    }
}

/// One-shot convenience wrapper over [`EncodingSession`].
pub fn encode_kernel(kernel: &Kernel) -> Result<EncodedProgram, EncodeError> {
    EncodingSession::new(kernel.platform).encode_kernel(kernel)
}
