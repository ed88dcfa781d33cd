//! Command implementations for the audit operator CLI.

pub mod dlq;
pub mod gdpr;
pub mod retention;
pub mod verify;
