//! Operator CLI library: the runtime bootstrap plus command handlers
//! exercised by `main.rs`.

pub mod commands;
pub mod runtime;

pub use runtime::Runtime;

pub type Result<T> = anyhow::Result<T>;
