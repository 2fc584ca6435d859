// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

use crate::ir::{Label, Opcode, Platform};
use thiserror::Error;

/// Errors produced while encoding one kernel.
///
/// Any of these aborts the kernel's encoding; no partially-encoded output is
/// ever returned.  Default-region and default-predicate fallbacks are not
/// errors and are handled inline by the operand encoders.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("opcode {op:?} has no encoding on {platform:?}")]
    UnsupportedOpcode { op: Opcode, platform: Platform },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("branch target {0:?} was never defined")]
    DanglingLabel(Label),

    #[error("malformed send: {0}")]
    MalformedSend(String),

    #[error("instruction requires compaction but no table entry matches")]
    CompactionRequired,

    #[error("instruction {ip}: {inner}")]
    AtInstruction {
        ip: usize,
        #[source]
        inner: Box<EncodeError>,
    },
}

impl EncodeError {
    pub(crate) fn invariant(what: impl Into<String>) -> Self {
        EncodeError::InvariantViolation(what.into())
    }

    pub(crate) fn at(self, ip: usize) -> Self {
        match self {
            EncodeError::AtInstruction { .. } => self,
            inner => EncodeError::AtInstruction {
                ip,
                inner: Box::new(inner),
            },
        }
    }
}
