mod riscv;

use crate::{
    asm::StackOperand,
    common::{RegClass, VReg},
};
pub use riscv::{PhyReg, RiscvFrame};

/// Machine/ABI collaborator of the register allocator.
pub trait Frame {
    /// Allocatable registers of `class`, in colour-priority order.
    /// The length of this list is the `k` of the colouring for that
    /// class.
    fn registers(class: RegClass) -> &'static [PhyReg];

    /// The frame pointer; spill slots are addressed relative to it.
    fn fp() -> PhyReg;

    /// Return the stack slot backing `vreg`, allocating one on the first
    /// call and reusing it afterwards.
    fn spill(&mut self, vreg: VReg) -> StackOperand;
}
