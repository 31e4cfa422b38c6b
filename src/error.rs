//! Custom error types for the conversion pipeline.
//!
//! This module defines the primary error type, `RepackError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes the pipeline distinguishes:
//!
//! - **`Precondition`**: a fatal violation of an input invariant (wrong
//!   cardinality of devices/planes/tables, an ID pairing mismatch between a
//!   container and its catalog row). Aborts the current session only; the
//!   batch driver logs it and moves on to the next session.
//! - **`ReferenceIntegrity`**: an electrode ID resolved to zero or multiple
//!   rows of the target table. Always fatal for the session, because a
//!   partially remapped reference silently corrupts downstream data.
//! - **`Format`**: the byte source was not a valid container of the
//!   expected family.
//! - **`Transport`**: the remote metadata service could not be reached.
//!   Callers at the service boundary convert this to "no record" plus a
//!   warning; it never aborts a session.
//! - **`Validation`**: a service payload could not build a valid record
//!   even after the fixed repair pass, or a metadata record failed its
//!   serialize/deserialize round-trip gate. Fatal for the session.
//! - **`Parse`**: a fixed-format string (age duration, imaging plane
//!   description) did not match its expected pattern.
//!
//! By using `#[from]`, `RepackError` can be seamlessly created from
//! underlying I/O and serialization errors with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, RepackError>;

#[derive(Error, Debug)]
pub enum RepackError {
    #[error("Precondition violation: {0}")]
    Precondition(String),

    #[error("Reference integrity error: expected exactly one match for ID {id}, found {matches}")]
    ReferenceIntegrity { id: i64, matches: usize },

    #[error("Container format error: {0}")]
    Format(String),

    #[error("Metadata service transport error: {0}")]
    Transport(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
