//! Database Module
//!
//! The coordination layer over the SQLite engine, split by concern:
//! - **Engine boundary** (`engine.rs`): raw handles and statements; the only `unsafe` code
//! - **Handle registry** (`registry.rs`): per-handle shared state keyed by handle identity
//! - **Connection management** (`connection.rs`): counted handle aliases and transaction bracketing
//! - **Busy retry** (`retry.rs`): bounded retry with a pluggable wait
//! - **Units of work** (`transaction.rs`, `unit_of_work.rs`): prepare/bind/execute/finish
//!
//! ## Error Handling
//!
//! All public operations return the crate-wide `Sql3Error`. Engine results
//! stay internal so that busy detection is ordinary control flow.

mod engine;

pub mod connection;
pub mod registry;
pub mod retry;
pub mod transaction;
pub mod unit_of_work;
pub mod value;

pub use connection::Connection;
pub use registry::{HandleId, HandleState, Registry};
pub use retry::{BusyRetry, Sleeper, ThreadSleeper, DEFAULT_BUSY_RETRIES, DEFAULT_BUSY_WAIT_MS};
pub use transaction::{Transaction, TransactionState};
pub use unit_of_work::UnitOfWork;
pub use value::Value;
