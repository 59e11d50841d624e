//! Metrics reducer: dashboard scalars and the runtime leaderboard.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::ParticipantAggregate;

/// Headline numbers shown above the charts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalMetrics {
    pub num_contributing_users: usize,
    pub num_active_users: usize,
    /// Total contributed runtime across participants (seconds).
    pub total_runtime: f64,
}

impl GlobalMetrics {
    pub fn formatted_runtime(&self) -> String {
        format_runtime(self.total_runtime)
    }
}

/// One leaderboard line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardRow {
    /// 1-based position.
    pub rank: usize,
    pub participant_id: String,
    pub total_runtime: f64,
    /// `H:MM:SS`.
    pub formatted_runtime: String,
}

/// A participant is active when one of their running runs reported within
/// `window` of `now`.
pub fn is_active(participant: &ParticipantAggregate, now: DateTime<Utc>, window: Duration) -> bool {
    participant
        .active_runs
        .iter()
        .any(|run| now.signed_duration_since(run.timestamp) < window)
}

pub fn global_metrics(
    participants: &[ParticipantAggregate],
    now: DateTime<Utc>,
    window: Duration,
) -> GlobalMetrics {
    GlobalMetrics {
        num_contributing_users: participants.len(),
        num_active_users: participants
            .iter()
            .filter(|p| is_active(p, now, window))
            .count(),
        total_runtime: participants.iter().map(|p| p.total_runtime).sum(),
    }
}

/// Rank participants by cumulative runtime, highest first. Ties keep input
/// order.
pub fn leaderboard(participants: &[ParticipantAggregate]) -> Vec<LeaderboardRow> {
    let mut ranked: Vec<&ParticipantAggregate> = participants.iter().collect();
    // `sort_by` is stable.
    ranked.sort_by(|a, b| b.total_runtime.total_cmp(&a.total_runtime));

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, p)| LeaderboardRow {
            rank: i + 1,
            participant_id: p.participant_id.clone(),
            total_runtime: p.total_runtime,
            formatted_runtime: format_runtime(p.total_runtime),
        })
        .collect()
}

/// Format seconds as `H:MM:SS`. Hours are unbounded; fractions are dropped.
pub fn format_runtime(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours}:{minutes:02}:{secs:02}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_participant;
    use crate::aggregate::tests::run;
    use crate::tracker::{ParticipantRuns, RunState};

    const T: i64 = 1_700_000_000;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn participant(
        id: &str,
        runtime: f64,
        state: RunState,
        timestamp: i64,
    ) -> ParticipantAggregate {
        aggregate_participant(&ParticipantRuns {
            participant_id: id.to_string(),
            runs: vec![run(id, state, 10, runtime, Some(1.0), timestamp)],
        })
    }

    #[test]
    fn active_within_trailing_window() {
        let window = Duration::seconds(300);
        let recent = participant("a", 1.0, RunState::Running, T - 100);
        let stale = participant("b", 1.0, RunState::Running, T - 400);
        let finished = participant("c", 1.0, RunState::Finished, T - 10);

        assert!(is_active(&recent, at(T), window));
        assert!(!is_active(&stale, at(T), window));
        assert!(!is_active(&finished, at(T), window));
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let window = Duration::seconds(300);
        assert!(!is_active(&participant("a", 1.0, RunState::Running, T - 300), at(T), window));
        assert!(is_active(&participant("a", 1.0, RunState::Running, T - 299), at(T), window));
    }

    #[test]
    fn one_live_run_is_enough() {
        let agg = aggregate_participant(&ParticipantRuns {
            participant_id: "d".to_string(),
            runs: vec![
                run("d", RunState::Running, 1, 1.0, None, T - 4000),
                run("d", RunState::Running, 1, 1.0, None, T - 5),
            ],
        });
        assert!(is_active(&agg, at(T), Duration::seconds(300)));
    }

    #[test]
    fn global_metrics_sum_runtime_exactly() {
        let participants = vec![
            participant("a", 100.5, RunState::Running, T - 10),
            participant("b", 200.25, RunState::Finished, T - 10),
            participant("c", 0.25, RunState::Running, T - 1000),
        ];
        let metrics = global_metrics(&participants, at(T), Duration::seconds(300));

        assert_eq!(metrics.num_contributing_users, 3);
        assert_eq!(metrics.num_active_users, 1);
        let expected: f64 = participants.iter().map(|p| p.total_runtime).sum();
        assert_eq!(metrics.total_runtime, expected);
        assert_eq!(metrics.total_runtime, 301.0);
        assert_eq!(metrics.formatted_runtime(), "0:05:01");
    }

    #[test]
    fn empty_input_yields_zeroes() {
        let metrics = global_metrics(&[], at(T), Duration::seconds(300));
        assert_eq!(metrics.num_contributing_users, 0);
        assert_eq!(metrics.num_active_users, 0);
        assert_eq!(metrics.total_runtime, 0.0);
        assert!(leaderboard(&[]).is_empty());
    }

    #[test]
    fn leaderboard_sorts_descending_with_stable_ties() {
        let participants = vec![
            participant("low", 10.0, RunState::Finished, T),
            participant("tie-first", 50.0, RunState::Finished, T),
            participant("top", 90.0, RunState::Finished, T),
            participant("tie-second", 50.0, RunState::Finished, T),
        ];
        let rows = leaderboard(&participants);

        let order: Vec<&str> = rows.iter().map(|r| r.participant_id.as_str()).collect();
        assert_eq!(order, vec!["top", "tie-first", "tie-second", "low"]);
        let ranks: Vec<usize> = rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        for pair in rows.windows(2) {
            assert!(pair[0].total_runtime >= pair[1].total_runtime);
        }
    }

    #[test]
    fn format_runtime_hours_minutes_seconds() {
        assert_eq!(format_runtime(0.0), "0:00:00");
        assert_eq!(format_runtime(59.9), "0:00:59");
        assert_eq!(format_runtime(3661.0), "1:01:01");
        assert_eq!(format_runtime(90_000.0), "25:00:00");
        assert_eq!(format_runtime(-5.0), "0:00:00");
        assert_eq!(format_runtime(f64::NAN), "0:00:00");
    }
}
