// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for ProofPress.
//!
//! Two documents exist:
//!
//! - [`Settings`] — orchestrator-level tunables loaded from an optional
//!   TOML file with environment overrides. This is the single
//!   authoritative source for verdict bands, the world-class floor, and
//!   every scoring-scale constant; jobs can only tune their own per-layer
//!   `{enabled, min_score, weight}` block.
//! - The job file — one JSON document per run, loaded by [`load_job`].
//!   Strict mode rejects unknown fields; lenient mode strips them with a
//!   warning. Deprecated field names are recognized and rewritten with a
//!   warning before parsing.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod job_loader;
mod settings;

pub use job_loader::{load_job, load_job_str, JobLoadOptions};
pub use settings::{RetrySettings, Settings};

use std::fmt;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// A threshold was given without a resolvable scale.
    #[error("ambiguous threshold: {reason}")]
    AmbiguousThreshold {
        /// Why the scale could not be resolved.
        reason: String,
    },
}

/// Advisory-level issues that do not prevent operation but deserve
/// attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deprecated field was used and rewritten.
    DeprecatedField {
        /// Name of the deprecated field.
        field: String,
        /// The replacement it was rewritten to.
        replacement: String,
    },
    /// An unknown field was ignored (lenient mode only).
    UnknownField {
        /// Dotted path of the ignored field.
        path: String,
    },
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// The wall-clock budget is unusually large.
    LargeBudget {
        /// Budget in seconds.
        secs: u64,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::DeprecatedField { field, replacement } => {
                write!(f, "deprecated field '{field}' rewritten to '{replacement}'")
            }
            ConfigWarning::UnknownField { path } => {
                write!(f, "unknown field '{path}' ignored")
            }
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeBudget { secs } => {
                write!(f, "wall-clock budget is unusually large ({secs}s)")
            }
        }
    }
}
