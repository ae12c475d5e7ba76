//! Core data model for LogHouse.
//!
//! This crate defines the canonical log-record shape and its line-delimited
//! textual encoding. It deliberately performs no I/O: everything that touches
//! disk or spawns tasks lives in `loghouse-storage`.

pub mod error;
pub mod record;
pub mod severity;

pub use error::{CodecError, Result};
pub use record::LogRecord;
pub use severity::Severity;
