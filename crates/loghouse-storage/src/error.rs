//! Storage Error Types
//!
//! This module defines all error kinds surfaced by the aggregator.
//!
//! ## Error Categories
//!
//! ### Write-path errors (surfaced to producers)
//! - `Closed`: the aggregator has been closed; writes are rejected
//! - `Encode`: a record could not be serialized; the rest of its batch is
//!   discarded
//! - `Write`: an append to the open shard failed
//! - `Rotate`: a rotation could not complete; the old shard remains open
//!
//! ### Read-path errors
//! - `Query`: a query could not be planned or executed (bad regex, directory
//!   not listable)
//!
//! ### Suppressed errors
//! - `Index`: an index operation failed. Never propagated to producers; the
//!   write path logs it and the query planner falls back to scanning.
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, Error>`. Every variant is a structured kind a caller can match
//! on without string comparison.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("aggregator is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to encode record: {0}")]
    Encode(#[from] loghouse_core::CodecError),

    #[error("failed to append to shard: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to rotate shard: {0}")]
    Rotate(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("index operation failed: {0}")]
    Index(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
