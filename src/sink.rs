//! Append-only per-feed entry logs.

use crate::types::{Entry, FeedId};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Accepts new entries for a feed. Must keep arrival order; an empty slice
/// is a no-op.
pub trait EntrySink {
    fn append(&mut self, feed: &FeedId, entries: &[Entry]) -> Result<(), SinkError>;
}

/// Writes `{dir}/{feed_id}.jsonl`, one JSON object per entry.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    /// Creates the output directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| SinkError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, feed: &FeedId) -> PathBuf {
        self.dir.join(format!("{feed}.jsonl"))
    }
}

impl EntrySink for JsonlSink {
    fn append(&mut self, feed: &FeedId, entries: &[Entry]) -> Result<(), SinkError> {
        if entries.is_empty() {
            tracing::debug!(feed = %feed, "No new entries, skipping write");
            return Ok(());
        }

        let path = self.path_for(feed);
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let mut writer = BufWriter::new(file);

        for entry in entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n").map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;

        tracing::info!(
            feed = %feed,
            count = entries.len(),
            path = %path.display(),
            "Wrote new entries"
        );
        Ok(())
    }
}

/// Collects appended batches in memory.
impl EntrySink for Vec<(FeedId, Vec<Entry>)> {
    fn append(&mut self, feed: &FeedId, entries: &[Entry]) -> Result<(), SinkError> {
        if !entries.is_empty() {
            self.push((feed.clone(), entries.to_vec()));
        }
        Ok(())
    }
}
