//! Secondary Index Subsystem
//!
//! Maintains point-lookup indexes over already-appended records in an
//! embedded key-value store, fed by a bounded queue and a small pool of
//! asynchronous workers.
//!
//! ## Storage layout
//!
//! One `sled` database per aggregator at `<dir>/index/<service>.db`, with one
//! named tree per attribute kind: `trace_id`, `span_id`, `level`, `service`
//! and `time`. Each entry maps the attribute value to a locator string
//! `"<shardId>:<offset>"`. Only the most recent locator per key is kept, so
//! index lookups return at most one record; queries that need every match go
//! through the scan path.
//!
//! ## Write behavior
//!
//! Indexing is best effort by design: the write pipeline enqueues records
//! without blocking and drops the enqueue when the queue is full, and worker
//! failures are logged, never surfaced to producers. Every applicable tree is
//! updated in a single transaction per record.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loghouse_core::LogRecord;
use sled::transaction::TransactionError;
use sled::Transactional;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::shard::ShardId;
use crate::shutdown::ShutdownHandle;

/// The attribute kinds with a dedicated keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    TraceId,
    SpanId,
    Level,
    Service,
    Time,
}

impl AttributeKind {
    fn tree_name(&self) -> &'static str {
        match self {
            AttributeKind::TraceId => "trace_id",
            AttributeKind::SpanId => "span_id",
            AttributeKind::Level => "level",
            AttributeKind::Service => "service",
            AttributeKind::Time => "time",
        }
    }
}

/// Physical position of one record: shard identity plus byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub shard: ShardId,
    pub offset: u64,
}

impl Locator {
    /// Parse the stored `"<shardId>:<offset>"` form.
    pub fn parse(s: &str) -> Option<Self> {
        let (stem, offset) = s.rsplit_once(':')?;
        Some(Self {
            shard: ShardId::parse(stem)?,
            offset: offset.parse().ok()?,
        })
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.shard, self.offset)
    }
}

/// The embedded index store and its keyspaces.
pub struct LogIndex {
    db: sled::Db,
    trace_id: sled::Tree,
    span_id: sled::Tree,
    level: sled::Tree,
    service: sled::Tree,
    time: sled::Tree,
    closed: AtomicBool,
}

impl LogIndex {
    /// Open (or create) the index store for `service` under `dir`.
    pub fn open(dir: &Path, service: &str) -> Result<Self> {
        let index_dir = dir.join("index");
        std::fs::create_dir_all(&index_dir)?;

        let db = sled::open(index_dir.join(format!("{service}.db")))
            .map_err(|e| Error::Index(format!("failed to open index store: {e}")))?;

        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| Error::Index(format!("failed to open index tree {name}: {e}")))
        };
        let trace_id = open_tree(AttributeKind::TraceId.tree_name())?;
        let span_id = open_tree(AttributeKind::SpanId.tree_name())?;
        let level = open_tree(AttributeKind::Level.tree_name())?;
        let service_tree = open_tree(AttributeKind::Service.tree_name())?;
        let time = open_tree(AttributeKind::Time.tree_name())?;

        Ok(Self {
            db,
            trace_id,
            span_id,
            level,
            service: service_tree,
            time,
            closed: AtomicBool::new(false),
        })
    }

    /// Index one appended record: write its locator into every applicable
    /// keyspace in a single transaction. Records without a stamp (never
    /// flushed) are skipped.
    pub fn apply(&self, record: &LogRecord) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Index("index store is closed".to_string()));
        }
        let (Some(file_id), Some(offset)) = (&record.file_id, record.offset) else {
            return Ok(());
        };
        let value = format!("{file_id}:{offset}");

        let result: std::result::Result<(), TransactionError<()>> = (
            &self.trace_id,
            &self.span_id,
            &self.level,
            &self.service,
            &self.time,
        )
            .transaction(|(trace_tree, span_tree, level_tree, service_tree, time_tree)| {
                if let Some(trace_id) = &record.trace_id {
                    trace_tree.insert(trace_id.as_bytes(), value.as_bytes())?;
                }
                if let Some(span_id) = &record.span_id {
                    span_tree.insert(span_id.as_bytes(), value.as_bytes())?;
                }
                level_tree.insert(record.level.as_str().as_bytes(), value.as_bytes())?;
                if let Some(service) = &record.service {
                    service_tree.insert(service.as_bytes(), value.as_bytes())?;
                }
                time_tree.insert(record.timestamp.to_rfc3339().as_bytes(), value.as_bytes())?;
                Ok(())
            });

        result.map_err(|e| Error::Index(format!("index transaction failed: {e:?}")))
    }

    /// Look up the locator stored under `key` in the given keyspace.
    ///
    /// Severity keys are normalized to lowercase. Returns `Ok(None)` when the
    /// key has never been indexed; an `Err` means the store itself is
    /// unavailable and the caller should fall back to scanning.
    pub fn lookup(&self, kind: AttributeKind, key: &str) -> Result<Option<Locator>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Index("index store is closed".to_string()));
        }
        let normalized;
        let key = if kind == AttributeKind::Level {
            normalized = key.to_ascii_lowercase();
            normalized.as_str()
        } else {
            key
        };

        let tree = match kind {
            AttributeKind::TraceId => &self.trace_id,
            AttributeKind::SpanId => &self.span_id,
            AttributeKind::Level => &self.level,
            AttributeKind::Service => &self.service,
            AttributeKind::Time => &self.time,
        };
        let value = tree
            .get(key.as_bytes())
            .map_err(|e| Error::Index(format!("index lookup failed: {e}")))?;

        match value {
            Some(raw) => {
                let text = std::str::from_utf8(&raw)
                    .map_err(|_| Error::Index("index value is not utf-8".to_string()))?;
                let locator = Locator::parse(text)
                    .ok_or_else(|| Error::Index(format!("malformed index value: {text}")))?;
                Ok(Some(locator))
            }
            None => Ok(None),
        }
    }

    /// Flush the store and reject further operations.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db
            .flush_async()
            .await
            .map_err(|e| Error::Index(format!("failed to flush index store: {e}")))?;
        Ok(())
    }
}

/// Spawn the index worker pool: `workers` tasks sharing the queue receiver,
/// each applying records until the queue closes or shutdown is signaled.
/// On shutdown, whatever is already queued is drained before exiting.
pub(crate) fn spawn_workers(
    index: Arc<LogIndex>,
    receiver: mpsc::Receiver<LogRecord>,
    shutdown: &ShutdownHandle,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..workers)
        .map(|worker| {
            let index = Arc::clone(&index);
            let receiver = Arc::clone(&receiver);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let record = {
                        let mut rx = receiver.lock().await;
                        tokio::select! {
                            record = rx.recv() => record,
                            _ = shutdown.wait() => None,
                        }
                    };
                    match record {
                        Some(record) => apply_logged(&index, &record),
                        None => {
                            // shutdown or closed queue: drain what is already
                            // buffered, then stop
                            let mut rx = receiver.lock().await;
                            while let Ok(record) = rx.try_recv() {
                                apply_logged(&index, &record);
                            }
                            break;
                        }
                    }
                }
                debug!(worker = worker, "index worker stopped");
            })
        })
        .collect()
}

fn apply_logged(index: &LogIndex, record: &LogRecord) {
    if let Err(error) = index.apply(record) {
        warn!(error = %error, "failed to index record");
    }
}
