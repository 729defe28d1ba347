//! Core Module for sql3wrap
//!
//! Shared infrastructure: the database coordination layer and the crate
//! error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, Sql3Error};
