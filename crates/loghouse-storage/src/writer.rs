//! Shard Writer
//!
//! Owns the currently-open append shard: its identity, its buffered file
//! handle, and its running byte offset. At most one shard is ever open for
//! append per aggregator; rotation closes the current shard and swaps in the
//! next sequence number.
//!
//! ## Offset tracking
//!
//! `offset` is the logical length of the shard in bytes. It starts at the
//! existing file length (create-or-append semantics) and advances by exactly
//! the number of bytes handed to [`append`](ShardWriter::append). The write
//! pipeline stamps each record with `(shard id, offset)` immediately before
//! appending its encoded bytes, so the stamp always matches the on-disk
//! position.
//!
//! ## Failure semantics
//!
//! Rotation opens the successor shard before touching the current one: if
//! the open fails, the current shard stays open and intact and the error is
//! propagated as a rotate-error.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

use crate::error::{Error, Result};
use crate::shard::{self, ShardId};

/// Buffer size of the append writer.
const WRITE_BUF_SIZE: usize = 32 * 1024;

/// The currently-open append shard.
pub struct ShardWriter {
    dir: PathBuf,
    rotation_size: u64,
    id: ShardId,
    writer: BufWriter<File>,
    offset: u64,
}

impl ShardWriter {
    /// Open the next shard of `service` in `dir` for appending.
    ///
    /// Scans the directory for same-day shards of this service and picks the
    /// sequence number one past the highest existing one. The file is opened
    /// in create-or-append mode and its current length becomes the starting
    /// offset.
    pub async fn open(
        dir: &Path,
        service: &str,
        rotation_size: u64,
        today: NaiveDate,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let seq = shard::next_sequence(dir, service, today)?;
        let id = ShardId::new(service, today, seq);
        let (writer, offset) = open_shard_file(dir, &id).await?;

        info!(shard = %id, offset = offset, "opened shard for append");

        Ok(Self {
            dir: dir.to_path_buf(),
            rotation_size,
            id,
            writer,
            offset,
        })
    }

    /// Identity of the open shard.
    pub fn id(&self) -> &ShardId {
        &self.id
    }

    /// Current logical length of the open shard in bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Append exactly `bytes` to the open shard and advance the offset.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await.map_err(Error::Write)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Flush the buffered writer to the file.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.map_err(Error::Write)
    }

    /// Whether the shard should be rotated before the next batch: either it
    /// reached the configured rotation size, or the calendar day moved past
    /// the day embedded in its identity.
    pub fn should_rotate(&self, today: NaiveDate) -> bool {
        self.offset >= self.rotation_size || today != self.id.day
    }

    /// Close the current shard and swap in the next sequence number.
    ///
    /// The successor is opened first; if that fails the current shard
    /// remains open and usable.
    pub async fn rotate(&mut self, today: NaiveDate) -> Result<()> {
        let seq = shard::next_sequence(&self.dir, &self.id.service, today)
            .map_err(|e| Error::Rotate(format!("failed to scan shard directory: {e}")))?;
        let next_id = ShardId::new(self.id.service.clone(), today, seq);

        let (next_writer, next_offset) = open_shard_file(&self.dir, &next_id)
            .await
            .map_err(|e| Error::Rotate(format!("failed to open shard {next_id}: {e}")))?;

        self.writer
            .flush()
            .await
            .map_err(|e| Error::Rotate(format!("failed to flush shard {}: {e}", self.id)))?;

        let previous = std::mem::replace(&mut self.id, next_id);
        self.writer = next_writer;
        self.offset = next_offset;

        info!(from = %previous, to = %self.id, "rotated shard");
        Ok(())
    }

    /// Flush and sync the open shard.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.flush().await.map_err(Error::Write)?;
        self.writer.get_ref().sync_all().await.map_err(Error::Write)
    }
}

async fn open_shard_file(dir: &Path, id: &ShardId) -> std::io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(id.path_in(dir))
        .await?;
    let offset = file.metadata().await?.len();
    Ok((BufWriter::with_capacity(WRITE_BUF_SIZE, file), offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    #[tokio::test]
    async fn test_open_creates_first_shard_of_day() {
        let dir = TempDir::new().unwrap();
        let writer = ShardWriter::open(dir.path(), "svc", 1024, today()).await.unwrap();
        assert_eq!(writer.id().seq, 1);
        assert_eq!(writer.offset(), 0);
        assert!(writer.id().path_in(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_open_continues_past_existing_shards() {
        let dir = TempDir::new().unwrap();
        let id = ShardId::new("svc", today(), 1);
        std::fs::write(id.path_in(dir.path()), b"previous\n").unwrap();

        let writer = ShardWriter::open(dir.path(), "svc", 1024, today()).await.unwrap();
        assert_eq!(writer.id().seq, 2);
    }

    #[tokio::test]
    async fn test_append_advances_offset_by_exact_length() {
        let dir = TempDir::new().unwrap();
        let mut writer = ShardWriter::open(dir.path(), "svc", 1024, today()).await.unwrap();

        writer.append(b"hello\n").await.unwrap();
        assert_eq!(writer.offset(), 6);
        writer.append(b"world!\n").await.unwrap();
        assert_eq!(writer.offset(), 13);

        writer.close().await.unwrap();
        let path = writer.id().path_in(dir.path());
        assert_eq!(std::fs::read(path).unwrap(), b"hello\nworld!\n");
    }

    #[tokio::test]
    async fn test_should_rotate_on_size() {
        let dir = TempDir::new().unwrap();
        let mut writer = ShardWriter::open(dir.path(), "svc", 8, today()).await.unwrap();
        assert!(!writer.should_rotate(today()));
        writer.append(b"0123456789\n").await.unwrap();
        assert!(writer.should_rotate(today()));
    }

    #[tokio::test]
    async fn test_should_rotate_on_day_change() {
        let dir = TempDir::new().unwrap();
        let writer = ShardWriter::open(dir.path(), "svc", 1024, today()).await.unwrap();
        let tomorrow = today().succ_opt().unwrap();
        assert!(writer.should_rotate(tomorrow));
    }

    #[tokio::test]
    async fn test_rotate_moves_to_next_sequence() {
        let dir = TempDir::new().unwrap();
        let mut writer = ShardWriter::open(dir.path(), "svc", 8, today()).await.unwrap();
        writer.append(b"0123456789\n").await.unwrap();

        writer.rotate(today()).await.unwrap();
        assert_eq!(writer.id().seq, 2);
        assert_eq!(writer.offset(), 0);

        // the first shard still holds its bytes
        let first = ShardId::new("svc", today(), 1);
        assert_eq!(std::fs::read(first.path_in(dir.path())).unwrap(), b"0123456789\n");
    }

    #[tokio::test]
    async fn test_rotate_on_day_change_restarts_sequence() {
        let dir = TempDir::new().unwrap();
        let mut writer = ShardWriter::open(dir.path(), "svc", 1024, today()).await.unwrap();
        writer.append(b"line\n").await.unwrap();

        let tomorrow = today().succ_opt().unwrap();
        writer.rotate(tomorrow).await.unwrap();
        assert_eq!(writer.id().day, tomorrow);
        assert_eq!(writer.id().seq, 1);
    }

    #[tokio::test]
    async fn test_sequences_are_contiguous_across_rotations() {
        let dir = TempDir::new().unwrap();
        let mut writer = ShardWriter::open(dir.path(), "svc", 4, today()).await.unwrap();
        for _ in 0..3 {
            writer.append(b"12345\n").await.unwrap();
            writer.rotate(today()).await.unwrap();
        }
        writer.close().await.unwrap();

        let shards = crate::shard::list_shards(dir.path(), "svc").unwrap();
        let seqs: Vec<u32> = shards.iter().map(|s| s.id.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }
}
