//! The user trap path is provided by [`crate::hal::Hal::enter_user`]; this
//! module only owns the register layout it shares with the process table.

pub mod context;

pub use context::TrapFrame;
