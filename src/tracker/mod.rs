//! Run fetcher: pulls per-participant run summaries from the tracking
//! service.
//!
//! A refresh lists every run in the participants' project, then queries each
//! run's summary concurrently. Runs are grouped by their display name, which
//! participants set to their community username.
//!
//! ```text
//! ProjectRuns (paginated) ──▶ run names ──▶ Run × N (concurrent) ──▶ RunIndex
//! ```

pub mod client;
pub mod history;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::config::schema::TrackerConfig;
use crate::error::{FetchError, FetchResult};
use crate::utils::fanout::{DEFAULT_MAX_WORKERS, fan_out_ordered};

pub use client::{GraphqlClient, RunOrder};

const RUN_DETAIL_QUERY: &str = r#"
query Run($projectName: String!, $entityName: String, $runName: String!) {
  project(name: $projectName, entityName: $entityName) {
    run(name: $runName) {
      name
      displayName
      state
      summaryMetrics
      runInfo { gpu }
    }
  }
}
"#;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Lifecycle state reported by the tracker for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunState {
    Running,
    Finished,
    Crashed,
    Failed,
    Killed,
    Other(String),
}

impl RunState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "running" => Self::Running,
            "finished" => Self::Finished,
            "crashed" => Self::Crashed,
            "failed" => Self::Failed,
            "killed" => Self::Killed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
            Self::Killed => "killed",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RunState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// Summary of one training run contributed by a participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub participant_id: String,
    pub run_name: String,
    /// Last logged `_step`, i.e. batches processed by this run.
    pub step_count: u64,
    pub runtime_seconds: f64,
    /// Last logged `train/loss`, if the run reported one.
    pub loss: Option<f64>,
    pub state: RunState,
    pub gpu_type: Option<String>,
    /// Time of the run's last summary update.
    pub timestamp: DateTime<Utc>,
}

impl RunRecord {
    /// Steps per second over the run's lifetime; 0 for a run with no runtime.
    pub fn velocity(&self) -> f64 {
        if self.runtime_seconds > 0.0 {
            self.step_count as f64 / self.runtime_seconds
        } else {
            0.0
        }
    }
}

/// Why a run was left out of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The service returned no project or run for the name.
    NotFound,
    MissingState,
    MissingDisplayName,
    MissingSummary,
    /// Summary lacks `_timestamp` or `_step`.
    MissingFields,
    InvalidTimestamp,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "run not found"),
            Self::MissingState => write!(f, "no run state"),
            Self::MissingDisplayName => write!(f, "no display name"),
            Self::MissingSummary => write!(f, "no summary metrics"),
            Self::MissingFields => write!(f, "summary lacks _timestamp or _step"),
            Self::InvalidTimestamp => write!(f, "timestamp out of range"),
        }
    }
}

/// Result of fetching one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Record(RunRecord),
    Skipped(SkipReason),
}

// ---------------------------------------------------------------------------
// Run detail payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RunDetailData {
    project: Option<RunDetailProject>,
}

#[derive(Debug, Deserialize)]
struct RunDetailProject {
    run: Option<RunNode>,
}

/// A run as returned by the `Run` detail query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// JSON-encoded object of the run's latest logged values.
    #[serde(rename = "summaryMetrics", default)]
    pub summary_metrics: Option<String>,
    #[serde(rename = "runInfo", default)]
    pub run_info: Option<RunInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunInfo {
    #[serde(default)]
    pub gpu: Option<String>,
}

/// Turn a run node into a record, or the reason it cannot be one.
///
/// A summary string that is not valid JSON is a parse error and aborts the
/// refresh; every other gap only skips the run.
pub fn parse_run_node(node: RunNode) -> FetchResult<RunOutcome> {
    let Some(state) = node.state else {
        return Ok(RunOutcome::Skipped(SkipReason::MissingState));
    };
    let Some(participant_id) = node.display_name else {
        return Ok(RunOutcome::Skipped(SkipReason::MissingDisplayName));
    };
    let Some(raw_summary) = node.summary_metrics else {
        return Ok(RunOutcome::Skipped(SkipReason::MissingSummary));
    };

    let run_name = node.name.unwrap_or_else(|| participant_id.clone());
    let summary: Map<String, Value> = serde_json::from_str(&raw_summary)
        .map_err(|e| FetchError::parse(format!("summary metrics of run {run_name}"), e))?;

    let (Some(timestamp), Some(step_count)) = (
        summary.get("_timestamp").and_then(Value::as_f64),
        summary.get("_step").and_then(as_count),
    ) else {
        return Ok(RunOutcome::Skipped(SkipReason::MissingFields));
    };
    let Some(timestamp) = timestamp_from_secs(timestamp) else {
        return Ok(RunOutcome::Skipped(SkipReason::InvalidTimestamp));
    };

    Ok(RunOutcome::Record(RunRecord {
        participant_id,
        run_name,
        step_count,
        runtime_seconds: summary
            .get("_runtime")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        loss: summary.get("train/loss").and_then(Value::as_f64),
        state: RunState::parse(&state),
        gpu_type: node.run_info.and_then(|info| info.gpu),
        timestamp,
    }))
}

/// Step counters are logged as integers but may round-trip through floats.
pub(crate) fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Convert fractional epoch seconds to a UTC timestamp.
pub fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

// ---------------------------------------------------------------------------
// Run index
// ---------------------------------------------------------------------------

/// All runs of one participant, in fetch order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRuns {
    pub participant_id: String,
    pub runs: Vec<RunRecord>,
}

/// Runs grouped by participant, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunIndex {
    pub participants: Vec<ParticipantRuns>,
    /// Most recent update across all indexed runs.
    pub latest_timestamp: Option<DateTime<Utc>>,
    /// Runs left out, by reason.
    pub skipped: HashMap<SkipReason, usize>,
}

impl RunIndex {
    /// Group outcomes by participant. Identical input always yields an
    /// identical index.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = RunOutcome>) -> Self {
        let mut index = Self::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for outcome in outcomes {
            let record = match outcome {
                RunOutcome::Record(record) => record,
                RunOutcome::Skipped(reason) => {
                    *index.skipped.entry(reason).or_default() += 1;
                    continue;
                }
            };

            if index.latest_timestamp.is_none_or(|latest| record.timestamp > latest) {
                index.latest_timestamp = Some(record.timestamp);
            }

            match positions.get(&record.participant_id) {
                Some(&pos) => index.participants[pos].runs.push(record),
                None => {
                    positions.insert(record.participant_id.clone(), index.participants.len());
                    index.participants.push(ParticipantRuns {
                        participant_id: record.participant_id.clone(),
                        runs: vec![record],
                    });
                }
            }
        }

        index
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.participant_id.clone())
            .collect()
    }

    pub fn total_runs(&self) -> usize {
        self.participants.iter().map(|p| p.runs.len()).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Fetches and indexes every participant run of the configured project.
#[derive(Debug, Clone)]
pub struct RunFetcher {
    client: GraphqlClient,
    entity: String,
    project: String,
    page_size: u32,
    max_workers: usize,
}

impl RunFetcher {
    pub fn new(client: GraphqlClient, config: &TrackerConfig) -> Self {
        Self {
            client,
            entity: config.entity.clone(),
            project: config.project.clone(),
            page_size: config.page_size.max(1),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Cache key identifying this fetcher's query.
    pub fn cache_key(&self) -> String {
        format!("runs:{}:{}/{}", self.client.url(), self.entity, self.project)
    }

    /// List every run name in the project.
    pub fn list_run_names(&self) -> FetchResult<Vec<String>> {
        self.client.run_names(
            &self.entity,
            &self.project,
            self.page_size,
            RunOrder::StateDesc,
            None,
        )
    }

    /// Query a single run's summary.
    pub fn fetch_run(&self, run_name: &str) -> FetchResult<RunOutcome> {
        let variables = json!({
            "entityName": self.entity,
            "projectName": self.project,
            "runName": run_name,
        });
        let data: Option<RunDetailData> = self.client.query("Run", RUN_DETAIL_QUERY, variables)?;

        match data.and_then(|d| d.project).and_then(|p| p.run) {
            Some(node) => parse_run_node(node),
            None => Ok(RunOutcome::Skipped(SkipReason::NotFound)),
        }
    }

    /// Fetch every run concurrently and build the index.
    ///
    /// Results are collected as they complete, then restored to listing order
    /// before grouping. The first error (in listing order) aborts the fetch.
    pub fn fetch_all(&self) -> FetchResult<RunIndex> {
        let names = self.list_run_names()?;

        let outcomes = fan_out_ordered(&names, self.max_workers, |name| self.fetch_run(name))
            .into_iter()
            .collect::<FetchResult<Vec<_>>>()?;

        Ok(RunIndex::from_outcomes(outcomes))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
