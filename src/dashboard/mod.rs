//! Dashboard service: one refresh pipeline behind the CLI and the web server.
//!
//! A refresh fetches runs, aggregates them, reduces the headline metrics and
//! ranks the leaderboard. Each remote stage is memoized in its own
//! [`TtlCache`] and timed into the refresh log.

use std::convert::Infallible;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::aggregate::metrics::{GlobalMetrics, LeaderboardRow, global_metrics, leaderboard};
use crate::aggregate::{ParticipantAggregate, aggregate};
use crate::analytics::logger::{RefreshLogEntry, RefreshLogger, Stage};
use crate::cache::TtlCache;
use crate::config::schema::DashConfig;
use crate::error::FetchResult;
use crate::presentation::{BubbleView, bubble_view};
use crate::profiles::{Profile, ProfileResolver};
use crate::tracker::client::{GraphqlClient, RunOrder};
use crate::tracker::history::{HistoryFetcher, LossHistory};
use crate::tracker::{RunFetcher, RunIndex};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything derived from one run index at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    /// Newest update across all runs.
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub participants: Vec<ParticipantAggregate>,
    pub metrics: GlobalMetrics,
    pub leaderboard: Vec<LeaderboardRow>,
    /// Runs left out of the index for missing fields.
    pub skipped_runs: usize,
}

impl Snapshot {
    pub fn build(index: &RunIndex, now: DateTime<Utc>, window: Duration) -> Self {
        let participants = aggregate(index);
        let metrics = global_metrics(&participants, now, window);
        let leaderboard = leaderboard(&participants);

        Self {
            generated_at: now,
            latest_timestamp: index.latest_timestamp,
            participants,
            metrics,
            leaderboard,
            skipped_runs: index.total_skipped(),
        }
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.participant_id.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// One line of the health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthItem {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl HealthItem {
    fn new(name: &str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok,
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Fetchers, caches and the refresh log for one configuration.
#[derive(Debug)]
pub struct Dashboard {
    config: DashConfig,
    client: GraphqlClient,
    runs: RunFetcher,
    history: HistoryFetcher,
    profiles: ProfileResolver,
    run_cache: TtlCache<RunIndex>,
    profile_cache: TtlCache<Vec<Profile>>,
    history_cache: TtlCache<LossHistory>,
    logger: RefreshLogger,
}

impl Dashboard {
    pub fn new(config: DashConfig) -> Self {
        let logger = RefreshLogger::from_config(&config.logging);
        Self::with_logger(config, logger)
    }

    /// Build the service with an explicit refresh logger.
    pub fn with_logger(config: DashConfig, logger: RefreshLogger) -> Self {
        // One pool for every remote call of a refresh.
        let agent = ureq::AgentBuilder::new()
            .timeout(config.tracker.timeout())
            .user_agent(&config.tracker.user_agent)
            .build();

        let client = GraphqlClient::with_agent(agent.clone(), &config.tracker);
        let runs = RunFetcher::new(client.clone(), &config.tracker);
        let history = HistoryFetcher::new(client.clone(), &config.main_metrics);
        let profiles = ProfileResolver::with_agent(agent, &config.profiles);
        let ttl = config.cache.ttl();

        Self {
            client,
            runs,
            history,
            profiles,
            run_cache: TtlCache::new(ttl),
            profile_cache: TtlCache::new(ttl),
            history_cache: TtlCache::new(ttl),
            logger,
            config,
        }
    }

    pub fn config(&self) -> &DashConfig {
        &self.config
    }

    pub fn logger(&self) -> &RefreshLogger {
        &self.logger
    }

    /// Fetch (or reuse) the indexed runs of the tracked project.
    pub fn run_index(&mut self) -> FetchResult<RunIndex> {
        let key = self.runs.cache_key();
        let started = Instant::now();
        let result = self
            .run_cache
            .get_or_try_insert_with(&key, || self.runs.fetch_all());

        match &result {
            Ok((index, hit)) => self.logger.log(&RefreshLogEntry::succeeded(
                Stage::Runs,
                started.elapsed(),
                index.total_runs(),
                index.total_skipped(),
                *hit,
            )),
            Err(e) => self
                .logger
                .log(&RefreshLogEntry::failed(Stage::Runs, started.elapsed(), e)),
        }

        result.map(|(index, _)| index)
    }

    pub fn snapshot(&mut self) -> FetchResult<Snapshot> {
        self.snapshot_at(Utc::now())
    }

    /// Refresh as seen at `now`; activity is judged against that instant.
    pub fn snapshot_at(&mut self, now: DateTime<Utc>) -> FetchResult<Snapshot> {
        let index = self.run_index()?;
        Ok(Snapshot::build(&index, now, self.config.activity.window()))
    }

    /// Resolve profiles for `ids`. Never fails; misses get the default avatar.
    pub fn profiles(&mut self, ids: &[String]) -> Vec<Profile> {
        let key = self.profiles.cache_key(ids);
        let started = Instant::now();
        let (profiles, hit) = match self
            .profile_cache
            .get_or_try_insert_with::<Infallible, _>(&key, || Ok(self.profiles.resolve(ids)))
        {
            Ok(found) => found,
            Err(never) => match never {},
        };

        let fallbacks = profiles
            .iter()
            .filter(|p| p.avatar_url == self.profiles.default_avatar())
            .count();
        self.logger.log(&RefreshLogEntry::succeeded(
            Stage::Profiles,
            started.elapsed(),
            profiles.len(),
            fallbacks,
            hit,
        ));

        profiles
    }

    /// Bubble-chart input for the participants view.
    pub fn bubbles(&mut self) -> FetchResult<BubbleView> {
        self.bubbles_at(Utc::now())
    }

    pub fn bubbles_at(&mut self, now: DateTime<Utc>) -> FetchResult<BubbleView> {
        let snapshot = self.snapshot_at(now)?;
        let profiles = self.profiles(&snapshot.participant_ids());
        Ok(bubble_view(
            &snapshot.participants,
            snapshot.latest_timestamp,
            &profiles,
        ))
    }

    /// Loss and alive-peers series of the coordinator run.
    pub fn loss_history(&mut self) -> FetchResult<LossHistory> {
        let key = self.history.cache_key();
        let started = Instant::now();
        let result = self
            .history_cache
            .get_or_try_insert_with(&key, || self.history.fetch());

        match &result {
            Ok((history, hit)) => self.logger.log(&RefreshLogEntry::succeeded(
                Stage::History,
                started.elapsed(),
                history.len(),
                0,
                *hit,
            )),
            Err(e) => self
                .logger
                .log(&RefreshLogEntry::failed(Stage::History, started.elapsed(), e)),
        }

        result.map(|(history, _)| history)
    }

    /// Drop every cached fetch so the next call goes to the network.
    pub fn invalidate(&mut self) {
        self.run_cache.clear();
        self.profile_cache.clear();
        self.history_cache.clear();
    }

    /// Probe both remote services without touching the caches.
    pub fn health(&self) -> Vec<HealthItem> {
        let tracker = &self.config.tracker;
        let mut items = Vec::new();

        let project = format!("{}/{}", tracker.entity, tracker.project);
        items.push(
            match self
                .client
                .run_names(&tracker.entity, &tracker.project, 1, RunOrder::StateDesc, Some(1))
            {
                Ok(_) => HealthItem::new(
                    "Tracker",
                    true,
                    format!("{project} reachable at {}", tracker.graphql_url),
                ),
                Err(e) => HealthItem::new("Tracker", false, format!("{project}: {e}")),
            },
        );

        items.push(HealthItem::new(
            "API key",
            !tracker.api_key.is_empty(),
            if tracker.api_key.is_empty() {
                "not set (anonymous access)"
            } else {
                "configured"
            },
        ));

        items.push(match self.profiles.lookup(&tracker.entity) {
            Ok(_) => HealthItem::new(
                "Profile search",
                true,
                format!("reachable at {}", self.config.profiles.search_url),
            ),
            Err(e) => HealthItem::new("Profile search", false, e.to_string()),
        });

        items.push(HealthItem::new(
            "Cache TTL",
            true,
            format!("{}s", self.config.cache.ttl_secs),
        ));

        let log_detail = match self.logger.path() {
            Some(path) if path.exists() => {
                format!("{} entries in {}", self.logger.read_all().len(), path.display())
            }
            Some(_) => "no log file yet".to_string(),
            None => "disabled".to_string(),
        };
        items.push(HealthItem::new(
            "Refresh log",
            self.logger.path().is_some_and(|p| p.exists()),
            log_detail,
        ));

        items
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::run;
    use crate::tracker::{RunOutcome, RunState, SkipReason};

    const T: i64 = 1_700_000_000;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn index() -> RunIndex {
        RunIndex::from_outcomes(vec![
            RunOutcome::Record(run("alice", RunState::Running, 100, 50.0, Some(2.5), T - 100)),
            RunOutcome::Record(run("bob", RunState::Running, 10, 500.0, Some(3.0), T - 400)),
            RunOutcome::Record(run("alice", RunState::Finished, 40, 20.0, None, T - 9000)),
            RunOutcome::Skipped(SkipReason::MissingFields),
        ])
    }

    #[test]
    fn snapshot_combines_metrics_and_leaderboard() {
        let snapshot = Snapshot::build(&index(), at(T), Duration::seconds(300));

        assert_eq!(snapshot.metrics.num_contributing_users, 2);
        assert_eq!(snapshot.metrics.num_active_users, 1);
        assert_eq!(snapshot.metrics.total_runtime, 570.0);
        assert_eq!(snapshot.leaderboard[0].participant_id, "bob");
        assert_eq!(snapshot.leaderboard[1].participant_id, "alice");
        assert_eq!(snapshot.latest_timestamp, Some(at(T - 100)));
        assert_eq!(snapshot.skipped_runs, 1);
        assert_eq!(snapshot.participant_ids(), vec!["alice", "bob"]);
    }

    #[test]
    fn snapshot_of_empty_index() {
        let snapshot = Snapshot::build(&RunIndex::default(), at(T), Duration::seconds(300));
        assert_eq!(snapshot.metrics.num_contributing_users, 0);
        assert!(snapshot.leaderboard.is_empty());
        assert_eq!(snapshot.latest_timestamp, None);
    }

    #[test]
    fn fetch_failure_is_logged_and_not_cached() {
        let dir = std::env::temp_dir().join(format!("collabdash-dashboard-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut config = DashConfig::default();
        config.tracker.graphql_url = "http://127.0.0.1:1/graphql".to_string();
        config.tracker.timeout_secs = 1;
        config.tracker.max_retries = 0;
        let mut dashboard =
            Dashboard::with_logger(config, RefreshLogger::at(dir.join("log.jsonl")));

        assert!(dashboard.snapshot().is_err());
        assert!(dashboard.run_cache.is_empty());

        let entries = dashboard.logger().read_all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stage, "runs");
        assert!(!entries[0].success);

        let _ = std::fs::remove_dir_all(&dir);
    }

    fn offline_config(ttl_secs: u64) -> DashConfig {
        let mut config = DashConfig::default();
        config.cache.ttl_secs = ttl_secs;
        config.profiles.search_url = "http://127.0.0.1:1/api/quicksearch".to_string();
        config.profiles.timeout_secs = 1;
        config
    }

    #[test]
    fn zero_ttl_keeps_profile_cache_empty() {
        let mut dashboard = Dashboard::with_logger(offline_config(0), RefreshLogger::disabled());

        for i in 0..50 {
            let profiles = dashboard.profiles(&[format!("user{i}")]);
            assert_eq!(profiles.len(), 1);
        }
        assert!(dashboard.profile_cache.is_empty());
    }

    #[test]
    fn invalidate_drops_cached_profiles() {
        let mut dashboard = Dashboard::with_logger(offline_config(100), RefreshLogger::disabled());

        dashboard.profiles(&["alice".to_string()]);
        dashboard.profiles(&["alice".to_string(), "bob".to_string()]);
        assert_eq!(dashboard.profile_cache.len(), 2);

        dashboard.invalidate();
        assert!(dashboard.profile_cache.is_empty());
    }
}
