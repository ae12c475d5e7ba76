//! Shard Identity and Directory Listing
//!
//! A shard is one append-only file in the family
//! `<service>_<YYYY-MM-DD>_<NNN>.log`, optionally carrying a `.gz` suffix
//! once compressed. This module owns the identity type and the directory
//! scanning helpers shared by the writer, the maintenance tasks, and the
//! query engine.
//!
//! ## Invariants
//! - `NNN` is a zero-padded width-3 decimal, starting at 001 per calendar day
//! - identifiers are totally ordered by (day, sequence)
//! - a compressed shard keeps the identifier of its uncompressed predecessor

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// File extension of an uncompressed shard.
pub const SHARD_SUFFIX: &str = ".log";

/// File extension of a compressed shard.
pub const COMPRESSED_SUFFIX: &str = ".log.gz";

/// Stable identifier of one shard: the filename stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId {
    pub service: String,
    pub day: NaiveDate,
    pub seq: u32,
}

impl ShardId {
    pub fn new(service: impl Into<String>, day: NaiveDate, seq: u32) -> Self {
        Self {
            service: service.into(),
            day,
            seq,
        }
    }

    /// Parse a filename stem like `checkout_2024-06-01_003`.
    ///
    /// The service name may itself contain underscores, so the stem is split
    /// from the right.
    pub fn parse(stem: &str) -> Option<Self> {
        let mut parts = stem.rsplitn(3, '_');
        let seq = parts.next()?.parse::<u32>().ok()?;
        let day = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let service = parts.next()?;
        if service.is_empty() {
            return None;
        }
        Some(Self::new(service, day, seq))
    }

    /// Parse a shard filename (`.log` or `.log.gz`), returning the identity
    /// and whether the file is compressed.
    pub fn parse_file_name(name: &str) -> Option<(Self, bool)> {
        if let Some(stem) = name.strip_suffix(COMPRESSED_SUFFIX) {
            Some((Self::parse(stem)?, true))
        } else if let Some(stem) = name.strip_suffix(SHARD_SUFFIX) {
            Some((Self::parse(stem)?, false))
        } else {
            None
        }
    }

    /// Filename of the uncompressed form.
    pub fn file_name(&self) -> String {
        format!("{}{}", self, SHARD_SUFFIX)
    }

    /// Full path of the uncompressed form under `dir`.
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{:03}",
            self.service,
            self.day.format("%Y-%m-%d"),
            self.seq
        )
    }
}

impl PartialOrd for ShardId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShardId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.day, self.seq, &self.service).cmp(&(other.day, other.seq, &other.service))
    }
}

/// One shard file found on disk.
#[derive(Debug, Clone)]
pub struct ShardFile {
    pub id: ShardId,
    pub path: PathBuf,
    pub compressed: bool,
}

/// List every shard file in `dir`, any service, compressed or not.
///
/// Files that do not parse as shard names are ignored. The result is sorted
/// by identity (day, sequence).
pub fn list_all_shards(dir: &Path) -> io::Result<Vec<ShardFile>> {
    let mut shards = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((id, compressed)) = ShardId::parse_file_name(name) else {
            continue;
        };
        shards.push(ShardFile {
            id,
            path: entry.path(),
            compressed,
        });
    }
    shards.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(shards)
}

/// List every shard file of `service` in `dir`, compressed or not.
pub fn list_shards(dir: &Path, service: &str) -> io::Result<Vec<ShardFile>> {
    let mut shards = list_all_shards(dir)?;
    shards.retain(|shard| shard.id.service == service);
    Ok(shards)
}

/// Next shard sequence number for `service` on `day`: one past the highest
/// existing sequence (compressed shards count), or 1 on a fresh day.
pub fn next_sequence(dir: &Path, service: &str, day: NaiveDate) -> io::Result<u32> {
    let max_seq = list_shards(dir, service)?
        .into_iter()
        .filter(|shard| shard.id.day == day)
        .map(|shard| shard.id.seq)
        .max()
        .unwrap_or(0);
    Ok(max_seq + 1)
}
