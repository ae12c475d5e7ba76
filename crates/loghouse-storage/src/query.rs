//! Query Engine
//!
//! Serves a query description against a shard directory, either through the
//! secondary index (point lookup) or by scanning shards with predicates.
//!
//! ## Planning
//!
//! The index plan is chosen only when the caller asked for it (`use_index`),
//! exactly one of the indexed attributes (trace id, span id, severity,
//! service) is specified, and no predicate outside the index (message regex,
//! time window) is present. Everything else scans.
//!
//! The index keeps a single posting per key, so an index query returns at
//! most one record; queries that need every match must scan.
//!
//! ## Fallback
//!
//! An unavailable or failing index never surfaces to the caller: the plan
//! silently degrades to a scan. A key that was simply never indexed returns
//! an empty result.
//!
//! ## Scan semantics
//!
//! Shards are visited newest-modification first; within one shard, records
//! appear in file order. Compressed shards are decoded on the fly. Lines
//! that fail to decode are skipped; shards that fail to open or read are
//! skipped whole. Pagination applies after the full match set is known, and
//! `total` reports the pre-pagination count. A `limit` of zero means no
//! limit.

use std::fs;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset};
use flate2::read::GzDecoder;
use loghouse_core::LogRecord;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::index::{AttributeKind, Locator, LogIndex};
use crate::shard::ShardId;

/// A query description. All predicates are optional and conjunctive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    /// Exact trace-id match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Exact span-id match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Severity match, case-insensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Exact service match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Regular expression over the message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Inclusive lower bound on the record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<FixedOffset>>,

    /// Inclusive upper bound on the record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<FixedOffset>>,

    /// Maximum records returned; zero means no limit.
    #[serde(default)]
    pub limit: usize,

    /// Records to skip before returning.
    #[serde(default)]
    pub offset: usize,

    /// Prefer the secondary index when the query shape allows it.
    #[serde(default)]
    pub use_index: bool,
}

/// A paginated query result. `total` is the match count before pagination.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub entries: Vec<LogRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// How a query will be executed.
#[derive(Debug, PartialEq, Eq)]
enum Plan {
    Index { kind: AttributeKind, key: String },
    Scan,
}

fn plan(query: &LogQuery) -> Plan {
    if !query.use_index {
        return Plan::Scan;
    }
    // predicates the index cannot answer force a scan
    if query.message.is_some() || query.start_time.is_some() || query.end_time.is_some() {
        return Plan::Scan;
    }

    let mut candidates = Vec::new();
    if let Some(trace_id) = &query.trace_id {
        candidates.push((AttributeKind::TraceId, trace_id.clone()));
    }
    if let Some(span_id) = &query.span_id {
        candidates.push((AttributeKind::SpanId, span_id.clone()));
    }
    if let Some(level) = &query.level {
        candidates.push((AttributeKind::Level, level.to_ascii_lowercase()));
    }
    if let Some(service) = &query.service {
        candidates.push((AttributeKind::Service, service.clone()));
    }

    match candidates.len() {
        1 => {
            let (kind, key) = candidates.pop().expect("one candidate");
            Plan::Index { kind, key }
        }
        _ => Plan::Scan,
    }
}

/// Execute `query` against the shard files in `dir`, consulting `index` when
/// the plan allows it.
pub fn execute(dir: &Path, query: &LogQuery, index: Option<&LogIndex>) -> Result<QueryResult> {
    let matcher = Matcher::compile(query)?;

    if let Plan::Index { kind, key } = plan(query) {
        if let Some(index) = index {
            match index.lookup(kind, &key) {
                Ok(None) => return Ok(paginate(Vec::new(), query)),
                Ok(Some(locator)) => match read_record_at(dir, &locator) {
                    Ok(record) => return Ok(paginate(vec![record], query)),
                    Err(error) => {
                        debug!(locator = %locator, error = %error, "positioned read failed, scanning");
                    }
                },
                Err(error) => {
                    debug!(error = %error, "index unavailable, scanning");
                }
            }
        }
    }

    let matches = scan(dir, &matcher)?;
    Ok(paginate(matches, query))
}

/// Compiled predicate set of one query.
struct Matcher<'a> {
    query: &'a LogQuery,
    message: Option<Regex>,
}

impl<'a> Matcher<'a> {
    fn compile(query: &'a LogQuery) -> Result<Self> {
        let message = match &query.message {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .map_err(|e| Error::Query(format!("invalid message pattern: {e}")))?,
            ),
            None => None,
        };
        Ok(Self { query, message })
    }

    fn matches(&self, record: &LogRecord) -> bool {
        if let Some(trace_id) = &self.query.trace_id {
            if record.trace_id.as_deref() != Some(trace_id.as_str()) {
                return false;
            }
        }
        if let Some(span_id) = &self.query.span_id {
            if record.span_id.as_deref() != Some(span_id.as_str()) {
                return false;
            }
        }
        if let Some(level) = &self.query.level {
            if !record.level.as_str().eq_ignore_ascii_case(level) {
                return false;
            }
        }
        if let Some(service) = &self.query.service {
            if record.service.as_deref() != Some(service.as_str()) {
                return false;
            }
        }
        if let Some(regex) = &self.message {
            if !regex.is_match(&record.msg) {
                return false;
            }
        }
        if let Some(start) = &self.query.start_time {
            if record.timestamp < *start {
                return false;
            }
        }
        if let Some(end) = &self.query.end_time {
            if record.timestamp > *end {
                return false;
            }
        }
        true
    }
}

/// Scan every shard file in `dir`, newest-modification first, collecting
/// records that satisfy the matcher.
fn scan(dir: &Path, matcher: &Matcher<'_>) -> Result<Vec<LogRecord>> {
    let mut files: Vec<(PathBuf, SystemTime, bool)> = Vec::new();
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::Query(format!("failed to list {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Query(format!("failed to list directory: {e}")))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((_, compressed)) = ShardId::parse_file_name(name) else {
            continue;
        };
        let Ok(metadata) = entry.metadata() else { continue };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((entry.path(), modified, compressed));
    }
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut matches = Vec::new();
    for (path, _, compressed) in files {
        match scan_file(&path, compressed, matcher) {
            Ok(records) => matches.extend(records),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping unreadable shard");
            }
        }
    }
    Ok(matches)
}

fn scan_file(path: &Path, compressed: bool, matcher: &Matcher<'_>) -> io::Result<Vec<LogRecord>> {
    let file = fs::File::open(path)?;
    let reader: Box<dyn BufRead> = if compressed {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // undecodable lines are tolerated, the shard may predate this reader
        let Ok(record) = LogRecord::decode(line.as_bytes()) else {
            continue;
        };
        if matcher.matches(&record) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Read and decode the single record at `locator`.
fn read_record_at(dir: &Path, locator: &Locator) -> io::Result<LogRecord> {
    let mut file = fs::File::open(locator.shard.path_in(dir))?;
    file.seek(SeekFrom::Start(locator.offset))?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;
    LogRecord::decode(line.as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn paginate(matches: Vec<LogRecord>, query: &LogQuery) -> QueryResult {
    let total = matches.len();
    let entries = if query.offset >= total {
        Vec::new()
    } else {
        let end = if query.limit == 0 {
            total
        } else {
            (query.offset + query.limit).min(total)
        };
        matches[query.offset..end].to_vec()
    };
    QueryResult {
        entries,
        total,
        limit: query.limit,
        offset: query.offset,
    }
}
