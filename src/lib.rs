pub mod asm;
pub mod codegen;
pub mod common;
pub mod frame;

pub use codegen::{reg_alloc::alloc, AllocError};
