//! Training-loss history of the coordinator run.
//!
//! The coordinator logs one row per global step with the averaged loss and the
//! number of peers alive at that step. The newest run in the main-metrics
//! project is the one the dashboard charts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::schema::MainMetricsConfig;
use crate::error::{FetchError, FetchResult};

use super::as_count;
use super::client::{GraphqlClient, RunOrder};

const RUN_HISTORY_QUERY: &str = r#"
query RunHistory($projectName: String!, $entityName: String, $runName: String!, $samples: Int) {
  project(name: $projectName, entityName: $entityName) {
    run(name: $runName) {
      history(samples: $samples)
    }
  }
}
"#;

const STEP_KEY: &str = "step";
const LOSS_KEY: &str = "loss";
const ALIVE_PEERS_KEY: &str = "alive peers";

/// Parallel series for the loss and alive-participants charts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossHistory {
    pub steps: Vec<u64>,
    pub losses: Vec<f64>,
    pub alive_peers: Vec<u64>,
}

impl LossHistory {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The most recent `(step, loss, alive_peers)` row.
    pub fn last(&self) -> Option<(u64, f64, u64)> {
        let i = self.steps.len().checked_sub(1)?;
        Some((self.steps[i], self.losses[i], self.alive_peers[i]))
    }
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    project: Option<HistoryProject>,
}

#[derive(Debug, Deserialize)]
struct HistoryProject {
    run: Option<HistoryRun>,
}

#[derive(Debug, Deserialize)]
struct HistoryRun {
    #[serde(default)]
    history: Vec<String>,
}

/// Build the series from JSON-encoded history rows.
///
/// Rows that do not carry all three keys are left out, mirroring a keyed
/// history scan. A row that is not valid JSON is a parse error.
pub fn parse_history_rows(rows: &[String]) -> FetchResult<LossHistory> {
    let mut history = LossHistory::default();

    for (i, raw) in rows.iter().enumerate() {
        let row: Map<String, Value> = serde_json::from_str(raw)
            .map_err(|e| FetchError::parse(format!("history row {i}"), e))?;

        let step = row.get(STEP_KEY).and_then(as_count);
        let loss = row.get(LOSS_KEY).and_then(Value::as_f64);
        let alive = row.get(ALIVE_PEERS_KEY).and_then(as_count);

        if let (Some(step), Some(loss), Some(alive)) = (step, loss, alive) {
            history.steps.push(step);
            history.losses.push(loss);
            history.alive_peers.push(alive);
        }
    }

    Ok(history)
}

/// Fetches the coordinator run's history.
#[derive(Debug, Clone)]
pub struct HistoryFetcher {
    client: GraphqlClient,
    entity: String,
    project: String,
    samples: u32,
}

impl HistoryFetcher {
    pub fn new(client: GraphqlClient, config: &MainMetricsConfig) -> Self {
        Self {
            client,
            entity: config.entity.clone(),
            project: config.project.clone(),
            samples: config.samples,
        }
    }

    pub fn cache_key(&self) -> String {
        format!(
            "history:{}:{}/{}:{}",
            self.client.url(),
            self.entity,
            self.project,
            self.samples
        )
    }

    /// Fetch the newest run's loss history. An empty project yields an empty
    /// history.
    pub fn fetch(&self) -> FetchResult<LossHistory> {
        let names = self.client.run_names(
            &self.entity,
            &self.project,
            1,
            RunOrder::CreatedDesc,
            Some(1),
        )?;
        let Some(run_name) = names.first() else {
            return Ok(LossHistory::default());
        };

        let variables = json!({
            "entityName": self.entity,
            "projectName": self.project,
            "runName": run_name,
            "samples": self.samples,
        });
        let data: Option<HistoryData> =
            self.client.query("RunHistory", RUN_HISTORY_QUERY, variables)?;

        let rows = data
            .and_then(|d| d.project)
            .and_then(|p| p.run)
            .map(|run| run.history)
            .unwrap_or_default();

        parse_history_rows(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn rows(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_rows_with_all_keys() {
        let history = parse_history_rows(&rows(&[
            r#"{"step": 1, "loss": 9.5, "alive peers": 4, "_runtime": 10}"#,
            r#"{"step": 2, "loss": 9.1}"#,
            r#"{"step": 3.0, "loss": 8.7, "alive peers": 5}"#,
        ]))
        .unwrap();

        assert_eq!(history.steps, vec![1, 3]);
        assert_eq!(history.losses, vec![9.5, 8.7]);
        assert_eq!(history.alive_peers, vec![4, 5]);
        assert_eq!(history.last(), Some((3, 8.7, 5)));
    }

    #[test]
    fn empty_rows_make_empty_history() {
        let history = parse_history_rows(&[]).unwrap();
        assert!(history.is_empty());
        assert_eq!(history.last(), None);
    }

    #[test]
    fn malformed_row_is_parse_error() {
        let err = parse_history_rows(&rows(&[r#"{"step": 1"#])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn history_serializes_as_parallel_arrays() {
        let history = LossHistory {
            steps: vec![1],
            losses: vec![2.0],
            alive_peers: vec![3],
        };
        let json = serde_json::to_string(&history).unwrap();
        assert_eq!(json, r#"{"steps":[1],"losses":[2.0],"alive_peers":[3]}"#);
    }
}
