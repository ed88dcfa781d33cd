//! Postgres-backed `StorageAdapter` implementation.

pub mod postgres;

pub use postgres::PostgresStorageAdapter;
