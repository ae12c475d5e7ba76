//! LogHouse Storage Layer
//!
//! This crate implements the aggregation engine for LogHouse: the component
//! that accepts structured log records from many concurrent producers,
//! appends them durably to an append-only family of shard files, maintains
//! secondary indexes for fast point lookup, compresses and expires old
//! shards, and serves queries back to readers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐
//! │  Producers  │
//! └──────┬──────┘
//!        │ write(record)
//!        ▼
//! ┌─────────────────┐    batch threshold / flush ticker
//! │   Aggregator    │ ───────────────────────────────────┐
//! │ - batch buffer  │                                    ▼
//! │ - shard writer  │                          ┌──────────────────┐
//! │ - index queue   │                          │   shard files    │
//! └────────┬────────┘                          │ <svc>_<day>_NNN  │
//!          │ try_send (best effort)            └──────────────────┘
//!          ▼
//! ┌─────────────────┐                          ┌──────────────────┐
//! │  index workers  │ ───────────────────────► │  sled index db   │
//! └─────────────────┘    one txn per record    └──────────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`Aggregator`]: write pipeline and lifecycle owner
//! - [`ShardWriter`]: the currently-open append shard and its rotation
//! - [`LogIndex`]: embedded KV store with one keyspace per attribute kind
//! - [`maintenance`]: compression, retention, stats and cleanup
//! - [`query`]: index-assisted or scanning query execution
//!
//! ## Usage
//!
//! ```ignore
//! use loghouse_core::{LogRecord, Severity};
//! use loghouse_storage::{Aggregator, AggregatorConfig, LogQuery};
//!
//! let aggregator = Aggregator::open(AggregatorConfig::new("/var/log/agg", "checkout")).await?;
//!
//! aggregator.write(LogRecord::new(Severity::Info, "order placed")
//!     .with_trace_id("t-42")).await?;
//!
//! let result = aggregator.query(LogQuery {
//!     trace_id: Some("t-42".to_string()),
//!     use_index: true,
//!     ..Default::default()
//! }).await?;
//!
//! aggregator.close().await?;
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod index;
pub mod maintenance;
pub mod query;
pub mod shard;
pub mod shutdown;
pub mod writer;

pub use aggregator::Aggregator;
pub use config::AggregatorConfig;
pub use error::{Error, Result};
pub use index::{AttributeKind, Locator, LogIndex};
pub use maintenance::{cleanup, stats, DirStats};
pub use query::{LogQuery, QueryResult};
pub use shard::{ShardFile, ShardId};
pub use shutdown::ShutdownHandle;
pub use writer::ShardWriter;
