//! Error types shared across the flexibility estimator crates.
//!
//! [`FlexError`] separates the failures a caller must react to differently:
//! a bad scenario configuration is reported before any trial runs, a missing or
//! corrupt persisted result stops a reuse run, and solver or network problems
//! surface from the power flow layer. Non-convergence of a single Monte Carlo
//! trial is *not* an error; it is recorded as an infeasible outcome by the
//! evaluator.
//!
//! # Example
//!
//! ```ignore
//! use flex_core::{FlexError, FlexResult};
//!
//! fn check_samples(no_samples: usize) -> FlexResult<()> {
//!     if no_samples == 0 {
//!         return Err(FlexError::Configuration("no_samples must be positive".into()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for flexibility estimation.
#[derive(Error, Debug)]
pub enum FlexError {
    /// I/O errors (file access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid, missing or contradictory scenario settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing or corrupt persisted labeled point set
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Structural power flow failures (empty network, no slack)
    #[error("Solver error: {0}")]
    Solver(String),

    /// Network model errors (dangling references, islands)
    #[error("Network error: {0}")]
    Network(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

impl FlexError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        FlexError::Configuration(msg.into())
    }

    /// Shorthand for a persistence error.
    pub fn persistence(msg: impl Into<String>) -> Self {
        FlexError::Persistence(msg.into())
    }

    /// True for errors that must stop a scenario before any trial runs.
    pub fn is_configuration(&self) -> bool {
        matches!(self, FlexError::Configuration(_))
    }
}

/// Convenience type alias for Results using FlexError.
pub type FlexResult<T> = Result<T, FlexError>;

impl From<anyhow::Error> for FlexError {
    fn from(err: anyhow::Error) -> Self {
        FlexError::Other(err.to_string())
    }
}

impl From<String> for FlexError {
    fn from(s: String) -> Self {
        FlexError::Other(s)
    }
}

impl From<&str> for FlexError {
    fn from(s: &str) -> Self {
        FlexError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for FlexError {
    fn from(err: serde_json::Error) -> Self {
        FlexError::Parse(err.to_string())
    }
}
