//! Placement Database: SurrealDB connection management and repository
//! implementations.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Write transactions and numeric key sequences ([`WriteTxn`])
//! - Error types ([`DbError`])
//! - Repository implementations of the `placement-core` traits
//!   ([`repository`])

mod connection;
mod error;
pub mod repository;
mod schema;
mod txn;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use schema::{run_migrations, schema_v1};
pub use txn::{WriteTxn, next_ids};
