// Core infrastructure modules
pub mod core;

// Configuration loading
pub mod config;

pub use crate::core::db::{
    BusyRetry, Connection, HandleId, HandleState, Registry, Sleeper, ThreadSleeper, Transaction,
    TransactionState, UnitOfWork, Value,
};
pub use crate::core::{Result, Sql3Error};
