use std::{fmt::Display, sync::atomic::AtomicU32};

/// Register classes coloured independently of each other.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub enum RegClass {
    /// Integer and pointer values.
    Int,
    /// Single-precision float values.
    Float,
}

static VREG_GLOBAL: AtomicU32 = AtomicU32::new(0);

/// A virtual register. It has no physical location until the allocator
/// assigns one.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
pub struct VReg {
    num: u32,
    class: RegClass,
}

impl VReg {
    pub fn new(class: RegClass) -> Self {
        VReg {
            num: VREG_GLOBAL.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
            class,
        }
    }

    pub fn class(&self) -> RegClass {
        self.class
    }
}

impl Display for VReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.num)
    }
}

static LABEL_GLOBAL: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    num: u32,
}

impl Label {
    pub fn new() -> Self {
        Self {
            num: LABEL_GLOBAL.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ".L{}", self.num)
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

static INSTR_GLOBAL: AtomicU32 = AtomicU32::new(0);

/// Stable identity of an instruction, independent of its position in a
/// block. Move bookkeeping in the allocator is keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(u32);

impl InstrId {
    pub fn new() -> Self {
        Self(INSTR_GLOBAL.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
    }
}

impl Default for InstrId {
    fn default() -> Self {
        Self::new()
    }
}
