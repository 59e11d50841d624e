//! Aggregator: one record per participant from their raw runs.

pub mod metrics;

use serde::Serialize;

use crate::tracker::{ParticipantRuns, RunIndex, RunRecord};

/// Per-participant totals for one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantAggregate {
    pub participant_id: String,
    /// Sum of step counts over all runs.
    pub total_batches: u64,
    /// Sum of runtimes over all runs (seconds).
    pub total_runtime: f64,
    /// Runs currently in the `running` state.
    pub active_runs: Vec<RunRecord>,
    /// Mean loss over active runs that reported one; 0 with none.
    pub mean_active_loss: f64,
    /// Summed steps/second of the active runs.
    pub active_velocity: f64,
}

impl ParticipantAggregate {
    pub fn has_active_runs(&self) -> bool {
        !self.active_runs.is_empty()
    }
}

/// Fold one participant's runs into an aggregate.
pub fn aggregate_participant(participant: &ParticipantRuns) -> ParticipantAggregate {
    let mut total_batches = 0u64;
    let mut total_runtime = 0.0;
    let mut active_runs = Vec::new();

    for run in &participant.runs {
        total_batches = total_batches.saturating_add(run.step_count);
        total_runtime += run.runtime_seconds;
        if run.state.is_running() {
            active_runs.push(run.clone());
        }
    }

    let losses: Vec<f64> = active_runs.iter().filter_map(|run| run.loss).collect();
    let mean_active_loss = if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f64>() / losses.len() as f64
    };
    let active_velocity = active_runs.iter().map(RunRecord::velocity).sum();

    ParticipantAggregate {
        participant_id: participant.participant_id.clone(),
        total_batches,
        total_runtime,
        active_runs,
        mean_active_loss,
        active_velocity,
    }
}

/// Aggregate every participant, preserving index order.
pub fn aggregate(index: &RunIndex) -> Vec<ParticipantAggregate> {
    index.participants.iter().map(aggregate_participant).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
