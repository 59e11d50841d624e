//! Presentation adapter: shapes aggregates for the participants bubble chart
//! and the leaderboard table.
//!
//! The bubble chart notebook expects camelCase keys and a single frame of
//! points wrapped in an outer list; field names here are part of that
//! contract.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::aggregate::ParticipantAggregate;
use crate::aggregate::metrics::LeaderboardRow;
use crate::profiles::Profile;
use crate::tracker::RunRecord;

/// Upper bound of the chart's velocity scale.
const MAX_VELOCITY: f64 = 1.0;

/// `serializedData` input of the bubble chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BubbleData {
    /// One frame of points; the chart animates over frames.
    pub points: Vec<Vec<BubblePoint>>,
    #[serde(rename = "maxVelocity")]
    pub max_velocity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BubblePoint {
    /// Latest update across all runs, shared by every point of the frame.
    pub date: String,
    #[serde(rename = "profileId")]
    pub profile_id: String,
    pub batches: u64,
    pub runtime: f64,
    #[serde(rename = "activeRuns")]
    pub active_runs: Vec<BubbleRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BubbleRun {
    pub batches: u64,
    pub runtime: f64,
    pub loss: Option<f64>,
    pub gpu_type: Option<String>,
    pub state: String,
    pub velocity: f64,
    pub date: String,
}

/// `profileSimple` input of the bubble chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEntry {
    pub id: String,
    pub name: String,
    pub src: String,
    pub url: String,
}

/// Everything the participants view needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BubbleView {
    #[serde(rename = "serializedData")]
    pub serialized_data: BubbleData,
    #[serde(rename = "profileSimple")]
    pub profiles: Vec<ProfileEntry>,
}

/// Leaderboard row as displayed in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    #[serde(rename = "Rank")]
    pub rank: usize,
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Total time contributed")]
    pub total_time: String,
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn bubble_run(run: &RunRecord) -> BubbleRun {
    BubbleRun {
        batches: run.step_count,
        runtime: run.runtime_seconds,
        loss: run.loss,
        gpu_type: run.gpu_type.clone(),
        state: run.state.to_string(),
        velocity: run.velocity(),
        date: iso(run.timestamp),
    }
}

/// Build the chart frame. `latest` is the newest update across all runs; the
/// epoch is used when there are none.
pub fn bubble_data(
    participants: &[ParticipantAggregate],
    latest: Option<DateTime<Utc>>,
) -> BubbleData {
    let date = iso(latest.unwrap_or(DateTime::UNIX_EPOCH));
    let points = participants
        .iter()
        .map(|p| BubblePoint {
            date: date.clone(),
            profile_id: p.participant_id.clone(),
            batches: p.total_batches,
            runtime: p.total_runtime,
            active_runs: p.active_runs.iter().map(bubble_run).collect(),
        })
        .collect();

    BubbleData {
        points: vec![points],
        max_velocity: MAX_VELOCITY,
    }
}

pub fn profile_entries(profiles: &[Profile]) -> Vec<ProfileEntry> {
    profiles
        .iter()
        .map(|p| ProfileEntry {
            id: p.id.clone(),
            name: p.display_name.clone(),
            src: p.avatar_url.clone(),
            url: p.profile_url.clone(),
        })
        .collect()
}

pub fn bubble_view(
    participants: &[ParticipantAggregate],
    latest: Option<DateTime<Utc>>,
    profiles: &[Profile],
) -> BubbleView {
    BubbleView {
        serialized_data: bubble_data(participants, latest),
        profiles: profile_entries(profiles),
    }
}

pub fn leaderboard_table(rows: &[LeaderboardRow]) -> Vec<LeaderboardEntry> {
    rows.iter()
        .map(|row| LeaderboardEntry {
            rank: row.rank,
            user: row.participant_id.clone(),
            total_time: row.formatted_runtime.clone(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
