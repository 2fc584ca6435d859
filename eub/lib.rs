// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Binary encoding for Gen8 through Gen11 EU instructions.
//!
//! The input is a kernel of scheduled, register-allocated instructions
//! ([`ir::Kernel`]); the output is the exact byte image the hardware
//! fetches, with eligible instructions compacted to 64 bits and branch
//! offsets resolved across the compacted layout.  [`encode_kernel`] is
//! the whole pipeline; the lower-level pieces are exported for tools
//! that want to encode or compact single instructions.

mod branch;
mod compact;
mod encode;
mod error;
pub mod ir;
mod layout;
mod send;
mod session;
mod three_src;

pub use crate::branch::BranchResolver;
pub use crate::compact::{
    compactable_immediate, try_compact, CompactionTables,
};
pub use crate::encode::{encode_inst, EncodedInst, InstFormat};
pub use crate::error::EncodeError;
pub use crate::session::{encode_kernel, EncodedProgram, EncodingSession};
