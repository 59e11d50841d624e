//! JSON API handlers for the web dashboard.
//!
//! Each handler corresponds to an API endpoint and returns a
//! `Response<Cursor<Vec<u8>>>` with JSON content.

use std::io::Cursor;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tiny_http::{Response, StatusCode};

use crate::aggregate::metrics::GlobalMetrics;
use crate::analytics::reporter;
use crate::config::schema::DashConfig;
use crate::dashboard::{Dashboard, HealthItem};
use crate::presentation::{LeaderboardEntry, leaderboard_table};

use super::content_type_json;

/// Entries summarized by `/api/refreshes` without `?limit=`.
const DEFAULT_REFRESH_WINDOW: usize = 500;

// ---------------------------------------------------------------------------
// JSON response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MetricsResponse {
    #[serde(flatten)]
    metrics: GlobalMetrics,
    formatted_runtime: String,
    latest_timestamp: Option<DateTime<Utc>>,
    generated_at: DateTime<Utc>,
    skipped_runs: usize,
}

#[derive(Serialize)]
struct LeaderboardResponse {
    total: usize,
    rows: Vec<LeaderboardEntry>,
}

/// Effective config (API key masked) plus its TOML rendering.
#[derive(Serialize)]
struct ConfigResponse {
    config: DashConfig,
    toml_text: String,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    items: Vec<HealthItem>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a JSON success response.
fn json_response<T: Serialize>(data: &T) -> Result<Response<Cursor<Vec<u8>>>> {
    let body = serde_json::to_string(data).context("failed to serialize JSON response")?;
    Ok(Response::from_data(body.into_bytes())
        .with_header(content_type_json())
        .with_status_code(StatusCode(200)))
}

/// Look up a query parameter's raw value.
fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    url.split('?').nth(1)?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Parse the `?limit=N` query parameter from a URL.
fn parse_limit_param(url: &str) -> Option<usize> {
    query_param(url, "limit")?.parse().ok()
}

/// Whether the request asks to bypass the caches with `?refresh=1`.
pub(super) fn wants_refresh(url: &str) -> bool {
    matches!(query_param(url, "refresh"), Some("1" | "true"))
}

// ---------------------------------------------------------------------------
// API Handlers
// ---------------------------------------------------------------------------

/// `GET /api/metrics`: contributing/active users and total runtime.
pub fn get_metrics(dashboard: &mut Dashboard) -> Result<Response<Cursor<Vec<u8>>>> {
    let snapshot = dashboard.snapshot().context("failed to refresh runs")?;

    let resp = MetricsResponse {
        formatted_runtime: snapshot.metrics.formatted_runtime(),
        metrics: snapshot.metrics,
        latest_timestamp: snapshot.latest_timestamp,
        generated_at: snapshot.generated_at,
        skipped_runs: snapshot.skipped_runs,
    };

    json_response(&resp)
}

/// `GET /api/leaderboard?limit=N`: ranked runtime table.
pub fn get_leaderboard(dashboard: &mut Dashboard, url: &str) -> Result<Response<Cursor<Vec<u8>>>> {
    let snapshot = dashboard.snapshot().context("failed to refresh runs")?;
    let mut rows = leaderboard_table(&snapshot.leaderboard);
    let total = rows.len();
    if let Some(limit) = parse_limit_param(url) {
        rows.truncate(limit);
    }

    json_response(&LeaderboardResponse { total, rows })
}

/// `GET /api/bubbles`: bubble-chart data and participant profiles.
pub fn get_bubbles(dashboard: &mut Dashboard) -> Result<Response<Cursor<Vec<u8>>>> {
    let view = dashboard.bubbles().context("failed to refresh runs")?;
    json_response(&view)
}

/// `GET /api/loss`: coordinator loss and alive-peers series.
pub fn get_loss(dashboard: &mut Dashboard) -> Result<Response<Cursor<Vec<u8>>>> {
    let history = dashboard
        .loss_history()
        .context("failed to fetch loss history")?;
    json_response(&history)
}

/// `GET /api/config`: effective configuration.
pub fn get_config(dashboard: &mut Dashboard) -> Result<Response<Cursor<Vec<u8>>>> {
    let config = dashboard.config().redacted();
    let toml_text = toml::to_string_pretty(&config).unwrap_or_default();

    json_response(&ConfigResponse { config, toml_text })
}

/// `GET /api/health`: remote service reachability.
pub fn get_health(dashboard: &mut Dashboard) -> Result<Response<Cursor<Vec<u8>>>> {
    let items = dashboard.health();
    let ok = items
        .iter()
        .filter(|item| matches!(item.name.as_str(), "Tracker" | "Profile search"))
        .all(|item| item.ok);

    json_response(&HealthResponse { ok, items })
}

/// `GET /api/refreshes?limit=N`: per-stage refresh timings.
pub fn get_refreshes(dashboard: &mut Dashboard, url: &str) -> Result<Response<Cursor<Vec<u8>>>> {
    let limit = parse_limit_param(url).unwrap_or(DEFAULT_REFRESH_WINDOW);
    let summary = reporter::compute_summary(dashboard.logger(), Some(limit));
    json_response(&summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
