use std::collections::HashMap;

use once_cell::sync::Lazy;
use strum::{EnumIter, IntoEnumIterator};

use crate::{
    asm::{Reg, StackOperand},
    common::{RegClass, VReg},
};

use super::Frame;

/// The RV64 register file. The float bank follows the integer bank in
/// declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum PhyReg {
    Zero,
    Ra,
    Sp,
    Gp,
    Tp,
    T0,
    T1,
    T2,
    S0,
    S1,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5,
    T6,
    Ft0,
    Ft1,
    Ft2,
    Ft3,
    Ft4,
    Ft5,
    Ft6,
    Ft7,
    Fs0,
    Fs1,
    Fa0,
    Fa1,
    Fa2,
    Fa3,
    Fa4,
    Fa5,
    Fa6,
    Fa7,
    Fs2,
    Fs3,
    Fs4,
    Fs5,
    Fs6,
    Fs7,
    Fs8,
    Fs9,
    Fs10,
    Fs11,
    Ft8,
    Ft9,
    Ft10,
    Ft11,
}

impl PhyReg {
    pub fn class(self) -> RegClass {
        if (self as u8) < (PhyReg::Ft0 as u8) {
            RegClass::Int
        } else {
            RegClass::Float
        }
    }

    /// `zero`/`ra`/`sp`/`gp`/`tp` are reserved and `s0` is the frame
    /// pointer.
    pub fn is_allocatable(self) -> bool {
        !matches!(
            self,
            PhyReg::Zero | PhyReg::Ra | PhyReg::Sp | PhyReg::Gp | PhyReg::Tp | PhyReg::S0
        )
    }
}

static REG_LIST_INT: Lazy<Vec<PhyReg>> = Lazy::new(|| {
    PhyReg::iter()
        .filter(|r| r.class() == RegClass::Int && r.is_allocatable())
        .collect()
});

static REG_LIST_FLOAT: Lazy<Vec<PhyReg>> = Lazy::new(|| {
    PhyReg::iter()
        .filter(|r| r.class() == RegClass::Float && r.is_allocatable())
        .collect()
});

/// RV64 frame. Spill slots grow downward from the frame pointer.
#[derive(Debug, Clone, Default)]
pub struct RiscvFrame {
    offset: i32,
    slots: HashMap<VReg, StackOperand>,
}

impl RiscvFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of stack currently claimed by spill slots.
    pub fn frame_size(&self) -> u32 {
        (-self.offset) as u32
    }
}

impl Frame for RiscvFrame {
    fn registers(class: RegClass) -> &'static [PhyReg] {
        match class {
            RegClass::Int => REG_LIST_INT.as_slice(),
            RegClass::Float => REG_LIST_FLOAT.as_slice(),
        }
    }

    fn fp() -> PhyReg {
        PhyReg::S0
    }

    fn spill(&mut self, vreg: VReg) -> StackOperand {
        if let Some(slot) = self.slots.get(&vreg) {
            return *slot;
        }
        let size = match vreg.class() {
            RegClass::Int => 8,
            RegClass::Float => 4,
        };
        self.offset -= size;
        // keep slots naturally aligned
        self.offset &= !(size - 1);
        let slot = StackOperand {
            base: Reg::Physical(Self::fp()),
            offset: self.offset,
        };
        self.slots.insert(vreg, slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_banks() {
        assert_eq!(PhyReg::A0.class(), RegClass::Int);
        assert_eq!(PhyReg::T6.class(), RegClass::Int);
        assert_eq!(PhyReg::Ft0.class(), RegClass::Float);
        assert_eq!(PhyReg::Fs11.class(), RegClass::Float);

        assert!(!PhyReg::Zero.is_allocatable());
        assert!(!PhyReg::S0.is_allocatable());
        assert!(PhyReg::A0.is_allocatable());

        assert!(RiscvFrame::registers(RegClass::Int)
            .iter()
            .all(|r| r.class() == RegClass::Int && r.is_allocatable()));
        assert_eq!(RiscvFrame::registers(RegClass::Int).len(), 26);
        assert_eq!(RiscvFrame::registers(RegClass::Float).len(), 32);
    }

    #[test]
    fn test_spill_slot_reuse() {
        let mut frame = RiscvFrame::new();
        let v = VReg::new(RegClass::Int);
        let w = VReg::new(RegClass::Int);

        let slot_v = frame.spill(v);
        assert_eq!(slot_v, frame.spill(v));
        assert_eq!(slot_v.base, Reg::Physical(PhyReg::S0));

        let slot_w = frame.spill(w);
        assert_ne!(slot_v.offset, slot_w.offset);
        assert_eq!(frame.frame_size(), 16);
    }
}
