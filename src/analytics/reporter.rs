//! Refresh reporter: per-stage timing summary over the refresh log.

use std::collections::HashMap;

use serde::Serialize;

use crate::analytics::logger::{RefreshLogEntry, RefreshLogger, Stage};

// ---------------------------------------------------------------------------
// Aggregated stats
// ---------------------------------------------------------------------------

/// Summary for `collabdash refreshes` and `/api/refreshes`.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub total_entries: usize,
    pub stages: Vec<StageStats>,
}

/// Per-stage aggregated statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStats {
    pub stage: String,
    pub count: usize,
    pub failures: usize,
    pub cache_hits: usize,
    /// Mean duration of the fetches that actually went to the network.
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
    /// Items produced by the most recent successful entry.
    pub last_items: usize,
    pub last_skipped: usize,
    pub last_at: Option<String>,
    pub last_error: Option<String>,
}

impl StageStats {
    /// Percentage of entries served from cache, 0.0 with no entries.
    pub fn cache_hit_pct(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / self.count as f64) * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

/// Summarize the newest `limit` entries of the log (all with `None`).
pub fn compute_summary(logger: &RefreshLogger, limit: Option<usize>) -> RefreshSummary {
    let entries = match limit {
        Some(limit) => logger.read_recent(limit),
        None => logger.read_all(),
    };
    summarize(&entries)
}

/// Group entries by stage. Known stages come first in pipeline order; any
/// other stage names follow alphabetically.
pub fn summarize(entries: &[RefreshLogEntry]) -> RefreshSummary {
    let mut groups: HashMap<&str, Vec<&RefreshLogEntry>> = HashMap::new();
    for entry in entries {
        groups.entry(entry.stage.as_str()).or_default().push(entry);
    }

    let mut names: Vec<&str> = Stage::ALL
        .iter()
        .map(|s| s.as_str())
        .filter(|name| groups.contains_key(name))
        .collect();
    let mut extra: Vec<&str> = groups
        .keys()
        .copied()
        .filter(|name| !Stage::ALL.iter().any(|s| s.as_str() == *name))
        .collect();
    extra.sort_unstable();
    names.extend(extra);

    let stages = names
        .into_iter()
        .filter_map(|name| groups.get(name).map(|group| stage_stats(name, group)))
        .collect();

    RefreshSummary {
        total_entries: entries.len(),
        stages,
    }
}

fn stage_stats(stage: &str, group: &[&RefreshLogEntry]) -> StageStats {
    let count = group.len();
    let failures = group.iter().filter(|e| !e.success).count();
    let cache_hits = group.iter().filter(|e| e.cache_hit).count();

    let fetched: Vec<u64> = group
        .iter()
        .filter(|e| !e.cache_hit)
        .map(|e| e.duration_ms)
        .collect();
    let avg_duration_ms = if fetched.is_empty() {
        0.0
    } else {
        fetched.iter().sum::<u64>() as f64 / fetched.len() as f64
    };
    let max_duration_ms = fetched.iter().copied().max().unwrap_or(0);

    let last_success = group.iter().rev().find(|e| e.success);
    let last_error = group
        .iter()
        .rev()
        .find_map(|e| if e.success { None } else { e.error.clone() });

    StageStats {
        stage: stage.to_string(),
        count,
        failures,
        cache_hits,
        avg_duration_ms,
        max_duration_ms,
        last_items: last_success.map(|e| e.items).unwrap_or(0),
        last_skipped: last_success.map(|e| e.skipped).unwrap_or(0),
        last_at: group.last().map(|e| e.timestamp.clone()),
        last_error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        stage: &str,
        duration_ms: u64,
        items: usize,
        cache_hit: bool,
        error: Option<&str>,
    ) -> RefreshLogEntry {
        RefreshLogEntry {
            timestamp: format!("2025-01-15T10:00:{duration_ms:02}+00:00"),
            stage: stage.to_string(),
            duration_ms,
            items,
            skipped: 1,
            cache_hit,
            success: error.is_none(),
            error: error.map(str::to_string),
        }
    }

    fn sample_entries() -> Vec<RefreshLogEntry> {
        vec![
            entry("profiles", 40, 12, false, None),
            entry("runs", 10, 30, false, None),
            entry("runs", 30, 31, false, None),
            entry("runs", 0, 31, true, None),
            entry("history", 5, 0, false, Some("HTTP 502")),
        ]
    }

    #[test]
    fn stages_in_pipeline_order() {
        let summary = summarize(&sample_entries());
        let names: Vec<&str> = summary.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["runs", "profiles", "history"]);
        assert_eq!(summary.total_entries, 5);
    }

    #[test]
    fn averages_exclude_cache_hits() {
        let summary = summarize(&sample_entries());
        let runs = &summary.stages[0];

        assert_eq!(runs.count, 3);
        assert_eq!(runs.cache_hits, 1);
        assert_eq!(runs.avg_duration_ms, 20.0);
        assert_eq!(runs.max_duration_ms, 30);
        assert_eq!(runs.last_items, 31);
        assert!((runs.cache_hit_pct() - 33.33).abs() < 0.01);
    }

    #[test]
    fn failures_are_counted() {
        let summary = summarize(&sample_entries());
        let history = &summary.stages[2];

        assert_eq!(history.failures, 1);
        assert_eq!(history.last_error.as_deref(), Some("HTTP 502"));
        assert_eq!(history.last_items, 0);
    }

    #[test]
    fn unknown_stages_follow_known_ones() {
        let entries = vec![entry("zeta", 1, 0, false, None), entry("runs", 1, 0, false, None)];
        let summary = summarize(&entries);
        let names: Vec<&str> = summary.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["runs", "zeta"]);
    }

    #[test]
    fn empty_log_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_entries, 0);
        assert!(summary.stages.is_empty());
    }
}
