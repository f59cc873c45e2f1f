//! Centralized error handling for tsmonitor
//!
//! # Error Categories
//!
//! - **Configuration Errors**: missing fields, out-of-range values (fatal)
//! - **Registration Errors**: metric family conflicts (fatal)
//! - **Supervisor Errors**: analyzer spawn and lifecycle failures (retried)
//! - **Parse Errors**: malformed numeric fields in analyzer output (cycle skipped)
//!
//! # Usage
//!
//! ```rust
//! use tsmonitor::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<u16> {
//!     Err(AppError::configuration("metrics_port is required"))
//! }
//! assert!(example_function().is_err());
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for supervisor Results
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Convenience type alias for parser Results
pub type ParseResult<T> = Result<T, ParseError>;
