pub mod color;
pub mod flow;
pub mod graph;
pub mod liveness;
pub mod reg_alloc;

use thiserror::Error;

use crate::{asm::Reg, common::VReg};

/// Fatal allocator failures. Running out of colours is not one of them:
/// that feeds the spill-and-retry loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("node {0} has no colour assigned")]
    UncoloredNode(Reg),
    #[error("spilled register {0} has no stack slot recorded")]
    MissingSpillSlot(VReg),
}
