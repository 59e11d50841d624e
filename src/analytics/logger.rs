use std::fs::{self, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::expand_home;
use crate::config::schema::LoggingConfig;

// ---------------------------------------------------------------------------
// Refresh stages
// ---------------------------------------------------------------------------

/// One remote-fetching step of a dashboard refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Runs,
    Profiles,
    History,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Runs, Stage::Profiles, Stage::History];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Runs => "runs",
            Stage::Profiles => "profiles",
            Stage::History => "history",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Refresh log entry (JSONL)
// ---------------------------------------------------------------------------

/// A single entry in the refresh log (`~/.collabdash/refresh-log.jsonl`).
///
/// Each entry records one stage of a refresh: how long it took, how many
/// items it produced, and whether it was served from cache. Read back by the
/// reporter for `collabdash refreshes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshLogEntry {
    pub timestamp: String,
    /// `"runs"`, `"profiles"`, or `"history"`.
    pub stage: String,
    pub duration_ms: u64,
    /// Runs, profiles, or history rows produced.
    #[serde(default)]
    pub items: usize,
    /// Run records left out for missing fields, or profiles that fell back
    /// to the default avatar.
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl RefreshLogEntry {
    pub fn succeeded(
        stage: Stage,
        elapsed: Duration,
        items: usize,
        skipped: usize,
        cache_hit: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stage: stage.as_str().to_string(),
            duration_ms: elapsed.as_millis() as u64,
            items,
            skipped,
            cache_hit,
            success: true,
            error: None,
        }
    }

    pub fn failed(stage: Stage, elapsed: Duration, error: impl ToString) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stage: stage.as_str().to_string(),
            duration_ms: elapsed.as_millis() as u64,
            items: 0,
            skipped: 0,
            cache_hit: false,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Appends refresh entries to a JSONL file. A logger without a path is a
/// no-op.
#[derive(Debug, Clone, Default)]
pub struct RefreshLogger {
    path: Option<PathBuf>,
}

impl RefreshLogger {
    pub fn from_config(config: &LoggingConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self {
            path: expand_home(&config.path),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an entry. Write failures are ignored.
    pub fn log(&self, entry: &RefreshLogEntry) {
        if let Some(path) = &self.path {
            let _ = append_log_entry(path, entry);
        }
    }

    /// Read all entries, oldest first.
    ///
    /// Silently skips malformed lines. Returns an empty vec if the file does
    /// not exist or cannot be read.
    pub fn read_all(&self) -> Vec<RefreshLogEntry> {
        let Some(path) = &self.path else {
            return Vec::new();
        };

        let Ok(file) = fs::File::open(path) else {
            return Vec::new();
        };

        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str::<RefreshLogEntry>(&line).ok())
            .collect()
    }

    /// The newest `limit` entries, oldest first.
    pub fn read_recent(&self, limit: usize) -> Vec<RefreshLogEntry> {
        let mut entries = self.read_all();
        let skip = entries.len().saturating_sub(limit);
        entries.drain(..skip);
        entries
    }
}

fn append_log_entry(path: &Path, entry: &RefreshLogEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(entry)?;
    writeln!(file, "{json}")?;

    Ok(())
}
