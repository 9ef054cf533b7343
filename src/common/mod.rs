mod temp;

pub use temp::{InstrId, Label, RegClass, VReg};
