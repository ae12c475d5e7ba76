//! Shard Maintenance
//!
//! Age-based compression and retention for the shard family, plus the
//! directory-level `stats` and `cleanup` operations. These functions are
//! synchronous blocking I/O; the aggregator runs them from its hourly
//! maintenance task on a blocking thread, and `apply_retention` also runs as
//! part of rotation.
//!
//! ## Rules
//!
//! - The currently-open shard is never compressed or deleted.
//! - Compression replaces `<stem>.log` with `<stem>.log.gz`; the two forms
//!   never coexist. A failed compression removes the partial `.gz` and
//!   leaves the original in place.
//! - Retention deletes shards (either form) whose modification time is older
//!   than the horizon, then caps the number of surviving non-current shards
//!   at `max_backups`, dropping the oldest first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::shard::{self, ShardId};

/// Whether the file behind `metadata` was last modified at least `age` ago.
fn is_older_than(metadata: &fs::Metadata, age: Duration) -> bool {
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default()
        >= age
}

/// Gzip every uncompressed shard of `service` older than `older_than`,
/// excluding the currently-open shard. Per-shard failures are logged and do
/// not stop the sweep. Returns the number of shards compressed.
pub fn compress_old_shards(
    dir: &Path,
    service: &str,
    current: &ShardId,
    older_than: Duration,
) -> Result<usize> {
    let mut compressed = 0;
    for shard in shard::list_shards(dir, service)? {
        if shard.compressed || shard.id == *current {
            continue;
        }
        let Ok(metadata) = fs::metadata(&shard.path) else {
            continue;
        };
        if !is_older_than(&metadata, older_than) {
            continue;
        }
        match compress_shard(&shard.path) {
            Ok(_) => {
                compressed += 1;
                info!(shard = %shard.id, "compressed shard");
            }
            Err(error) => {
                warn!(shard = %shard.id, error = %error, "failed to compress shard");
            }
        }
    }
    Ok(compressed)
}

/// Gzip one shard file and delete the original. On failure the partial
/// `.gz` output is removed and the original is left untouched.
pub fn compress_shard(path: &Path) -> io::Result<PathBuf> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    if let Err(error) = write_gzip(path, &gz_path) {
        let _ = fs::remove_file(&gz_path);
        return Err(error);
    }
    fs::remove_file(path)?;
    Ok(gz_path)
}

fn write_gzip(src: &Path, dst: &Path) -> io::Result<()> {
    let mut input = fs::File::open(src)?;
    let output = fs::File::create(dst)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let output = encoder.finish()?;
    output.sync_all()
}

/// Delete shards of `service` past the retention horizon, then cap the
/// surviving non-current shard count at `max_backups` (oldest first). The
/// currently-open shard, when given, is never touched. Returns the number of
/// shards deleted.
pub fn apply_retention(
    dir: &Path,
    service: &str,
    current: Option<&ShardId>,
    retention: Duration,
    max_backups: usize,
) -> Result<usize> {
    let mut deleted = 0;
    let mut survivors = Vec::new();

    for shard in shard::list_shards(dir, service)? {
        if Some(&shard.id) == current {
            continue;
        }
        let Ok(metadata) = fs::metadata(&shard.path) else {
            continue;
        };
        if is_older_than(&metadata, retention) {
            match fs::remove_file(&shard.path) {
                Ok(()) => {
                    deleted += 1;
                    info!(shard = %shard.id, "deleted expired shard");
                }
                Err(error) => {
                    warn!(shard = %shard.id, error = %error, "failed to delete expired shard");
                }
            }
        } else {
            survivors.push(shard);
        }
    }

    // survivors are sorted by identity, so the front is the oldest
    if survivors.len() > max_backups {
        let excess = survivors.len() - max_backups;
        for shard in survivors.into_iter().take(excess) {
            match fs::remove_file(&shard.path) {
                Ok(()) => {
                    deleted += 1;
                    info!(shard = %shard.id, "deleted shard beyond backup cap");
                }
                Err(error) => {
                    warn!(shard = %shard.id, error = %error, "failed to delete shard");
                }
            }
        }
    }

    Ok(deleted)
}

/// Delete every shard file in `dir` (any service, compressed or not) older
/// than `days_to_keep` days. Returns the number of files deleted.
pub fn cleanup(dir: &Path, days_to_keep: u64) -> Result<usize> {
    let cutoff = Duration::from_secs(days_to_keep * 24 * 3600);
    let mut deleted = 0;
    for shard in shard::list_all_shards(dir)? {
        let Ok(metadata) = fs::metadata(&shard.path) else {
            continue;
        };
        if is_older_than(&metadata, cutoff) {
            match fs::remove_file(&shard.path) {
                Ok(()) => deleted += 1,
                Err(error) => {
                    warn!(shard = %shard.id, error = %error, "failed to delete shard");
                }
            }
        }
    }
    Ok(deleted)
}

/// Aggregate statistics over the shard files in a directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirStats {
    pub total_files: usize,
    pub total_size: u64,
    pub oldest_file: Option<String>,
    pub newest_file: Option<String>,
    pub oldest_time: Option<DateTime<Utc>>,
    pub newest_time: Option<DateTime<Utc>>,
}

/// Collect statistics over every shard file in `dir`.
pub fn stats(dir: &Path) -> Result<DirStats> {
    let mut stats = DirStats {
        total_files: 0,
        total_size: 0,
        oldest_file: None,
        newest_file: None,
        oldest_time: None,
        newest_time: None,
    };

    for shard in shard::list_all_shards(dir)? {
        let Ok(metadata) = fs::metadata(&shard.path) else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified: DateTime<Utc> = modified.into();
        let name = shard
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());

        stats.total_files += 1;
        stats.total_size += metadata.len();

        if stats.oldest_time.is_none_or(|t| modified < t) {
            stats.oldest_time = Some(modified);
            stats.oldest_file = name.clone();
        }
        if stats.newest_time.is_none_or(|t| modified > t) {
            stats.newest_time = Some(modified);
            stats.newest_file = name;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn make_shard(dir: &Path, service: &str, seq: u32, content: &[u8]) -> ShardId {
        let id = ShardId::new(service, Local::now().date_naive(), seq);
        fs::write(id.path_in(dir), content).unwrap();
        id
    }

    #[test]
    fn test_compress_shard_roundtrips_bytes() {
        let dir = TempDir::new().unwrap();
        let content = b"{\"msg\":\"a\"}\n{\"msg\":\"b\"}\n";
        let id = make_shard(dir.path(), "svc", 1, content);
        let path = id.path_in(dir.path());

        let gz_path = compress_shard(&path).unwrap();
        assert!(!path.exists());
        assert!(gz_path.exists());

        let mut decoded = Vec::new();
        GzDecoder::new(fs::File::open(&gz_path).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn test_compress_old_shards_skips_current_and_compressed() {
        let dir = TempDir::new().unwrap();
        let old = make_shard(dir.path(), "svc", 1, b"old\n");
        let current = make_shard(dir.path(), "svc", 2, b"current\n");
        fs::write(dir.path().join("svc_2024-01-01_001.log.gz"), b"x").unwrap();

        let compressed =
            compress_old_shards(dir.path(), "svc", &current, Duration::ZERO).unwrap();

        assert_eq!(compressed, 1);
        assert!(!old.path_in(dir.path()).exists());
        assert!(dir.path().join(format!("{old}.log.gz")).exists());
        assert!(current.path_in(dir.path()).exists());
    }

    #[test]
    fn test_retention_deletes_expired_but_never_current() {
        let dir = TempDir::new().unwrap();
        make_shard(dir.path(), "svc", 1, b"a\n");
        make_shard(dir.path(), "svc", 2, b"b\n");
        let current = make_shard(dir.path(), "svc", 3, b"c\n");

        // zero horizon: everything but the current shard is expired
        let deleted =
            apply_retention(dir.path(), "svc", Some(&current), Duration::ZERO, 10).unwrap();

        assert_eq!(deleted, 2);
        assert!(current.path_in(dir.path()).exists());
        assert_eq!(shard::list_shards(dir.path(), "svc").unwrap().len(), 1);
    }

    #[test]
    fn test_retention_caps_backup_count_oldest_first() {
        let dir = TempDir::new().unwrap();
        for seq in 1..=5 {
            make_shard(dir.path(), "svc", seq, b"x\n");
        }
        let current = make_shard(dir.path(), "svc", 6, b"x\n");

        let deleted = apply_retention(
            dir.path(),
            "svc",
            Some(&current),
            Duration::from_secs(3600),
            2,
        )
        .unwrap();

        assert_eq!(deleted, 3);
        let remaining: Vec<u32> = shard::list_shards(dir.path(), "svc")
            .unwrap()
            .iter()
            .map(|s| s.id.seq)
            .collect();
        assert_eq!(remaining, vec![4, 5, 6]);
    }

    #[test]
    fn test_retention_ignores_other_services() {
        let dir = TempDir::new().unwrap();
        make_shard(dir.path(), "svc", 1, b"a\n");
        make_shard(dir.path(), "other", 1, b"b\n");

        apply_retention(dir.path(), "svc", None, Duration::ZERO, 10).unwrap();

        assert!(shard::list_shards(dir.path(), "svc").unwrap().is_empty());
        assert_eq!(shard::list_shards(dir.path(), "other").unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        make_shard(dir.path(), "svc", 1, b"a\n");
        make_shard(dir.path(), "other", 1, b"b\n");

        assert_eq!(cleanup(dir.path(), 0).unwrap(), 2);
        assert_eq!(cleanup(dir.path(), 0).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_keeps_fresh_files() {
        let dir = TempDir::new().unwrap();
        make_shard(dir.path(), "svc", 1, b"a\n");
        assert_eq!(cleanup(dir.path(), 7).unwrap(), 0);
        assert_eq!(shard::list_shards(dir.path(), "svc").unwrap().len(), 1);
    }

    #[test]
    fn test_stats_counts_all_shard_forms() {
        let dir = TempDir::new().unwrap();
        make_shard(dir.path(), "svc", 1, b"12345\n");
        fs::write(dir.path().join("svc_2024-01-01_001.log.gz"), b"123").unwrap();
        fs::write(dir.path().join("notashard.txt"), b"ignored").unwrap();

        let stats = stats(dir.path()).unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 9);
        assert!(stats.oldest_file.is_some());
        assert!(stats.newest_file.is_some());
        assert!(stats.oldest_time.unwrap() <= stats.newest_time.unwrap());
    }

    #[test]
    fn test_stats_empty_dir() {
        let dir = TempDir::new().unwrap();
        let stats = stats(dir.path()).unwrap();
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_size, 0);
        assert!(stats.oldest_file.is_none());
        assert!(stats.newest_time.is_none());
    }
}
