//! Record Data Structure and Line Codec
//!
//! This module defines `LogRecord` - the fundamental unit of data in LogHouse -
//! and its on-disk encoding.
//!
//! ## Structure
//! Each record carries:
//! - **timestamp**: when the event happened (RFC 3339 with offset)
//! - **level**: severity, one of the fixed ordered set
//! - **msg**: free-form message text
//! - **trace_id / span_id**: optional distributed-trace identifiers
//! - **service**: optional emitting service name
//! - **caller**: optional `file:line` call site
//! - **fields**: optional map of auxiliary key/value pairs
//! - **file_id / offset**: the shard identity and byte offset stamped by the
//!   write path once the record lands on disk
//!
//! ## Encoding
//! One JSON object per line, UTF-8, LF-terminated. Field names are fixed and
//! stable; unset optional fields are omitted entirely. Decoding tolerates
//! unknown fields so newer writers stay readable by older readers.
//!
//! ## Example
//! ```ignore
//! let record = LogRecord::new(Severity::Info, "user logged in")
//!     .with_trace_id("t-123")
//!     .with_service("auth");
//! let line = record.encode()?;
//! let back = LogRecord::decode(&line)?;
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CodecError, Result};
use crate::severity::Severity;

/// A single structured log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Event time, serialized as RFC 3339 with offset. Any other textual
    /// form fails decoding.
    pub timestamp: DateTime<FixedOffset>,

    /// Severity, serialized lowercase.
    pub level: Severity,

    /// Free-form message text.
    pub msg: String,

    /// Distributed-trace identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Span identifier within a trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Name of the emitting service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Call site as `file:line`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,

    /// Shard identity, stamped at serialize time by the write path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,

    /// Byte offset within the shard, stamped together with `file_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Auxiliary structured fields.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, Value>,
}

impl LogRecord {
    /// Create a record with the given severity and message, timestamped now.
    pub fn new(level: Severity, msg: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().fixed_offset(),
            level,
            msg: msg.into(),
            trace_id: None,
            span_id: None,
            service: None,
            caller: None,
            file_id: None,
            offset: None,
            fields: HashMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Encode this record as one LF-terminated JSON line.
    pub fn encode(&self) -> Result<Bytes> {
        let mut line = serde_json::to_vec(self).map_err(CodecError::Encode)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }

    /// Decode one line (with or without the trailing LF) back into a record.
    ///
    /// Unknown fields are ignored; a missing required field or a timestamp in
    /// any format other than RFC 3339 with offset is a decode error.
    pub fn decode(line: &[u8]) -> Result<Self> {
        serde_json::from_slice(line).map_err(CodecError::Decode)
    }
}
