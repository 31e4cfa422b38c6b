//! # nwb-repack
//!
//! Reconciliation and re-encoding of hierarchical scientific-recording
//! containers. A recording session is often delivered as several
//! independently-authored files: a base session container plus probe
//! satellites carrying derived electrophysiology signals, or a set of
//! per-plane imaging containers. This crate merges those into one
//! logically consistent container, verifies the result structurally, and
//! emits schema metadata records for each converted session.
//!
//! The main pieces:
//!
//! - [`model`]: the in-memory container graph and its explicit field
//!   schema.
//! - [`codec`]: the decode/encode boundary and the JSON tree store.
//! - [`resolve`]: electrode index remapping between containers.
//! - [`merge`]: the probe and plane merge paths.
//! - [`compare`]: the recursive structural equality checker.
//! - [`extract`], [`records`], [`service`], [`catalog`]: metadata
//!   extraction, record building and the external lookups feeding them.
//! - [`driver`]: the batch conversion loop used by the CLI.

pub mod catalog;
pub mod codec;
pub mod compare;
pub mod driver;
pub mod error;
pub mod extract;
pub mod merge;
pub mod model;
pub mod records;
pub mod resolve;
pub mod service;
pub mod settings;
pub mod trace;

pub use error::{RepackError, Result};
