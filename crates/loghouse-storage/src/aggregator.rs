//! Log Aggregator
//!
//! This module implements the top-level coordinator for one service's log
//! family: the concurrent write pipeline, the background tasks, and the
//! shutdown sequence.
//!
//! ## Architecture
//!
//! ```text
//! producers ──► batch buffer ──► shard writer ──► shard files
//!    (write)        │  flush           │ try_send
//!                   │                  ▼
//!            flush ticker        index queue ──► index workers ──► sled
//!
//!            maintenance ticker ──► compression + retention
//! ```
//!
//! ## Write path
//!
//! `write` appends the record to an in-memory batch buffer and returns; the
//! buffer is drained to disk either when it reaches `batch_size` records or
//! when the flush ticker fires. During a flush each record is stamped with
//! the shard identity and byte offset at which its encoded bytes land, then
//! handed to the index queue without blocking - indexing is best effort and
//! a full queue simply drops the update (the record stays durable and
//! scannable).
//!
//! ## Thread Safety
//!
//! The aggregator is shared as `Arc<Aggregator>`; all methods take `&self`.
//! The batch buffer and the shard writer have independent locks: producers
//! contend only on the brief buffer append, while flushes hold the shard
//! lock for the duration of the physical writes.
//!
//! ## Lifecycle
//!
//! `close` flips the closed flag (subsequent writes fail fast), signals
//! shutdown to every background task, waits up to `close_grace` for them to
//! drain, performs a final flush, and closes the shard writer and the index
//! store. Double close is a no-op.

use std::sync::Arc;

use chrono::Local;
use loghouse_core::LogRecord;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::AggregatorConfig;
use crate::error::{Error, Result};
use crate::index::{self, LogIndex};
use crate::maintenance;
use crate::query::{self, LogQuery, QueryResult};
use crate::shutdown::ShutdownHandle;
use crate::writer::ShardWriter;

/// Period of the background compression/retention cycle.
const MAINTENANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Per-service log aggregator: owns the write path, the shard family, and
/// the secondary index for one output directory.
pub struct Aggregator {
    config: AggregatorConfig,
    batch: Mutex<Vec<LogRecord>>,
    shard: Mutex<ShardWriter>,
    index: Arc<LogIndex>,
    index_tx: mpsc::Sender<LogRecord>,
    closed: Mutex<bool>,
    shutdown: ShutdownHandle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    compress_lock: Mutex<()>,
}

impl Aggregator {
    /// Open an aggregator for `config.service` in `config.output_dir`,
    /// starting the index workers, the flush ticker, and the maintenance
    /// loop.
    ///
    /// The returned handle must be closed with [`close`](Self::close);
    /// dropping it without closing leaves buffered records unflushed.
    pub async fn open(config: AggregatorConfig) -> Result<Arc<Self>> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        let index = Arc::new(LogIndex::open(&config.output_dir, &config.service)?);
        let shard = ShardWriter::open(
            &config.output_dir,
            &config.service,
            config.rotation_size,
            Local::now().date_naive(),
        )
        .await?;

        let (index_tx, index_rx) = mpsc::channel(config.index_queue_cap);
        let shutdown = ShutdownHandle::new();

        let aggregator = Arc::new(Self {
            batch: Mutex::new(Vec::with_capacity(config.batch_size)),
            shard: Mutex::new(shard),
            index: Arc::clone(&index),
            index_tx,
            closed: Mutex::new(false),
            shutdown: shutdown.clone(),
            tasks: Mutex::new(Vec::new()),
            compress_lock: Mutex::new(()),
            config,
        });

        let mut handles = index::spawn_workers(
            index,
            index_rx,
            &shutdown,
            aggregator.config.index_workers,
        );
        handles.push(Self::spawn_flush_ticker(Arc::clone(&aggregator)));
        handles.push(Self::spawn_maintenance(Arc::clone(&aggregator)));
        *aggregator.tasks.lock().await = handles;

        info!(
            service = %aggregator.config.service,
            dir = %aggregator.config.output_dir.display(),
            "aggregator opened"
        );
        Ok(aggregator)
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Accept one record into the batch buffer.
    ///
    /// Returns immediately unless the buffer reached `batch_size`, in which
    /// case the batch is flushed synchronously before returning. Fails with
    /// [`Error::Closed`] once the aggregator has been closed.
    pub async fn write(&self, record: LogRecord) -> Result<()> {
        if *self.closed.lock().await {
            return Err(Error::Closed);
        }

        let drained = {
            let mut batch = self.batch.lock().await;
            batch.push(record);
            if batch.len() >= self.config.batch_size {
                std::mem::take(&mut *batch)
            } else {
                Vec::new()
            }
        };

        if drained.is_empty() {
            return Ok(());
        }
        self.flush_records(drained).await
    }

    /// Drain the batch buffer to disk.
    pub async fn flush(&self) -> Result<()> {
        let drained = std::mem::take(&mut *self.batch.lock().await);
        if drained.is_empty() {
            return Ok(());
        }
        self.flush_records(drained).await
    }

    /// Write a drained batch through the shard writer, stamping each record
    /// with the position its bytes land at, and hand the stamped records to
    /// the index queue.
    async fn flush_records(&self, records: Vec<LogRecord>) -> Result<()> {
        let mut shard = self.shard.lock().await;

        let today = Local::now().date_naive();
        if shard.should_rotate(today) {
            shard.rotate(today).await?;
            // retention runs as part of rotation; failures never fail the flush
            if let Err(err) = maintenance::apply_retention(
                &self.config.output_dir,
                &self.config.service,
                Some(shard.id()),
                self.config.retention,
                self.config.max_backups,
            ) {
                warn!(error = %err, "retention during rotation failed");
            }
        }

        for mut record in records {
            record.file_id = Some(shard.id().to_string());
            record.offset = Some(shard.offset());
            // an encode failure aborts the batch here and discards the rest
            let line = record.encode()?;
            shard.append(&line).await?;

            match self.index_tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("index queue full, dropping index update");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        shard.flush().await
    }

    /// Execute a query against this aggregator's directory and index.
    ///
    /// Queries do arbitrary blocking I/O, so execution is moved to a
    /// blocking thread. Queries remain valid after `close`; the planner
    /// simply stops consulting the (closed) index and scans instead.
    pub async fn query(&self, query: LogQuery) -> Result<QueryResult> {
        let dir = self.config.output_dir.clone();
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || query::execute(&dir, &query, Some(index.as_ref())))
            .await
            .map_err(|e| Error::Query(format!("query task failed: {e}")))?
    }

    /// Close the aggregator: stop background tasks, flush the batch buffer,
    /// and close the shard writer and the index store. Idempotent.
    pub async fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.lock().await;
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        self.shutdown.shutdown();

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        let deadline = tokio::time::Instant::now() + self.config.close_grace;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("background task did not stop within the close grace period");
            }
        }

        self.flush().await?;
        self.shard.lock().await.close().await?;
        self.index.close().await?;

        info!(service = %self.config.service, "aggregator closed");
        Ok(())
    }

    fn spawn_flush_ticker(aggregator: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown = aggregator.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(aggregator.config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = aggregator.flush().await {
                            error!(error = %err, "periodic flush failed");
                        }
                    }
                    _ = shutdown.wait() => break,
                }
            }
        })
    }

    fn spawn_maintenance(aggregator: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown = aggregator.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(MAINTENANCE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => aggregator.run_maintenance().await,
                    _ = shutdown.wait() => break,
                }
            }
        })
    }

    /// One compression + retention cycle. Serialized against concurrent
    /// cycles by the compression lock; the blocking file work runs off the
    /// async threads. Never touches the currently-open shard.
    async fn run_maintenance(&self) {
        let _guard = self.compress_lock.lock().await;
        let current = self.shard.lock().await.id().clone();

        let dir = self.config.output_dir.clone();
        let service = self.config.service.clone();
        let compress_after = self.config.compress_after;
        let retention = self.config.retention;
        let max_backups = self.config.max_backups;

        let outcome = tokio::task::spawn_blocking(move || {
            maintenance::compress_old_shards(&dir, &service, &current, compress_after)?;
            maintenance::apply_retention(&dir, &service, Some(&current), retention, max_backups)
        })
        .await;

        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "maintenance cycle failed"),
            Err(err) => warn!(error = %err, "maintenance task failed to run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loghouse_core::Severity;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> AggregatorConfig {
        AggregatorConfig {
            // small batches so tests observe flushes without the ticker
            batch_size: 2,
            ..AggregatorConfig::new(dir.path(), "svc")
        }
    }

    #[tokio::test]
    async fn test_write_buffers_until_batch_size() {
        let dir = TempDir::new().unwrap();
        let aggregator = Aggregator::open(test_config(&dir)).await.unwrap();

        aggregator
            .write(LogRecord::new(Severity::Info, "one"))
            .await
            .unwrap();
        let shard_path = aggregator.shard.lock().await.id().path_in(dir.path());
        assert_eq!(std::fs::metadata(&shard_path).unwrap().len(), 0);

        aggregator
            .write(LogRecord::new(Severity::Info, "two"))
            .await
            .unwrap();
        assert!(std::fs::metadata(&shard_path).unwrap().len() > 0);

        aggregator.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_drains_partial_batch() {
        let dir = TempDir::new().unwrap();
        let aggregator = Aggregator::open(test_config(&dir)).await.unwrap();

        aggregator
            .write(LogRecord::new(Severity::Info, "lonely"))
            .await
            .unwrap();
        aggregator.flush().await.unwrap();

        let shard_path = aggregator.shard.lock().await.id().path_in(dir.path());
        let content = std::fs::read_to_string(&shard_path).unwrap();
        assert_eq!(content.lines().count(), 1);

        aggregator.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stamp_matches_disk_position() {
        let dir = TempDir::new().unwrap();
        let aggregator = Aggregator::open(test_config(&dir)).await.unwrap();

        for i in 0..4 {
            aggregator
                .write(LogRecord::new(Severity::Info, format!("record {i}")))
                .await
                .unwrap();
        }
        aggregator.close().await.unwrap();

        let shards = crate::shard::list_shards(dir.path(), "svc").unwrap();
        assert_eq!(shards.len(), 1);
        let bytes = std::fs::read(&shards[0].path).unwrap();

        for line in bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            let record = LogRecord::decode(line).unwrap();
            let offset = record.offset.unwrap() as usize;
            let end = offset + record.encode().unwrap().len();
            let slice = &bytes[offset..end];
            let reread = LogRecord::decode(slice).unwrap();
            assert_eq!(reread, record);
        }
    }

    #[tokio::test]
    async fn test_closed_aggregator_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let aggregator = Aggregator::open(test_config(&dir)).await.unwrap();
        aggregator.close().await.unwrap();

        let result = aggregator.write(LogRecord::new(Severity::Info, "late")).await;
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let aggregator = Aggregator::open(test_config(&dir)).await.unwrap();
        aggregator.close().await.unwrap();
        aggregator.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_flushes_buffered_records() {
        let dir = TempDir::new().unwrap();
        let aggregator = Aggregator::open(test_config(&dir)).await.unwrap();

        aggregator
            .write(LogRecord::new(Severity::Warn, "buffered"))
            .await
            .unwrap();
        aggregator.close().await.unwrap();

        let shards = crate::shard::list_shards(dir.path(), "svc").unwrap();
        let content = std::fs::read_to_string(&shards[0].path).unwrap();
        assert!(content.contains("buffered"));
    }

    #[tokio::test]
    async fn test_rotation_by_size_produces_contiguous_sequences() {
        let dir = TempDir::new().unwrap();
        let config = AggregatorConfig {
            rotation_size: 256,
            batch_size: 1,
            ..AggregatorConfig::new(dir.path(), "svc")
        };
        let aggregator = Aggregator::open(config).await.unwrap();

        for i in 0..20 {
            aggregator
                .write(LogRecord::new(Severity::Info, format!("padding padding padding {i}")))
                .await
                .unwrap();
        }
        aggregator.close().await.unwrap();

        let shards = crate::shard::list_shards(dir.path(), "svc").unwrap();
        assert!(shards.len() >= 2);
        let seqs: Vec<u32> = shards.iter().map(|s| s.id.seq).collect();
        let expected: Vec<u32> = (1..=seqs.len() as u32).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = AggregatorConfig::new("", "svc");
        assert!(matches!(
            Aggregator::open(config).await,
            Err(Error::Config(_))
        ));
    }
}
