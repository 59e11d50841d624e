/// End-to-end refresh tests.
///
/// A `tiny_http` fixture server on an ephemeral port plays both remote
/// services: the tracker's GraphQL endpoint and the profile search endpoint.
/// No test touches the real network.
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tiny_http::{Header, Method, Response, Server, StatusCode};

use collabdash::analytics::logger::RefreshLogger;
use collabdash::analytics::reporter;
use collabdash::config::schema::DashConfig;
use collabdash::dashboard::Dashboard;
use collabdash::error::ErrorKind;
use collabdash::presentation::leaderboard_table;
use collabdash::web;

const NOW: i64 = 1_700_000_000;

// ---------------------------------------------------------------------------
// Fixture server
// ---------------------------------------------------------------------------

struct Fixture {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
}

impl Fixture {
    fn start() -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        std::thread::spawn(move || {
            for mut request in server.incoming_requests() {
                counter.fetch_add(1, Ordering::SeqCst);
                let url = request.url().to_string();
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);

                let (status, payload) = route(request.method(), &url, &body);
                let header = Header::from_bytes("Content-Type", "application/json").unwrap();
                let resp = Response::from_string(payload)
                    .with_header(header)
                    .with_status_code(StatusCode(status));
                let _ = request.respond(resp);
            }
        });

        Self { addr, requests }
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn config(&self, project: &str) -> DashConfig {
        let mut config = DashConfig::default();
        config.tracker.graphql_url = format!("http://{}/graphql", self.addr);
        config.tracker.entity = "team".to_string();
        config.tracker.project = project.to_string();
        config.tracker.page_size = 2;
        config.tracker.timeout_secs = 5;
        config.main_metrics.entity = "team".to_string();
        config.main_metrics.project = "Main_metrics".to_string();
        config.profiles.search_url = format!("http://{}/api/quicksearch", self.addr);
        config.profiles.host = "https://hub.example".to_string();
        config.profiles.timeout_secs = 5;
        config
    }
}

fn route(method: &Method, url: &str, body: &str) -> (u16, String) {
    match (method, url.split('?').next().unwrap_or(url)) {
        (Method::Post, "/graphql") => graphql(body),
        (Method::Post, "/graphql-down") => (503, "unavailable".to_string()),
        (Method::Get, "/api/quicksearch") => (200, quicksearch(url).to_string()),
        _ => (404, "{}".to_string()),
    }
}

fn graphql(body: &str) -> (u16, String) {
    let request: Value = serde_json::from_str(body).unwrap();
    let vars = &request["variables"];
    let project = vars["projectName"].as_str().unwrap_or_default();

    let data = match request["operationName"].as_str().unwrap_or_default() {
        "ProjectRuns" => match project {
            "denied" => {
                return (
                    200,
                    json!({"data": null, "errors": [{"message": "permission denied"}]}).to_string(),
                );
            }
            "Main_metrics" => listing(&["coordinator-7"], None),
            "broken" => listing(&["run-x"], None),
            _ => match vars["cursor"].as_str() {
                None => listing(&["run-a", "run-b"], Some("page-2")),
                Some(_) => listing(&["run-c", "run-d"], None),
            },
        },
        "Run" => {
            json!({"project": {"run": run_node(vars["runName"].as_str().unwrap_or_default())}})
        }
        "RunHistory" => json!({"project": {"run": {"history": [
            json!({"step": 1, "loss": 9.5, "alive peers": 3}).to_string(),
            json!({"step": 2, "loss": 9.25}).to_string(),
            json!({"step": 3, "loss": 8.75, "alive peers": 4}).to_string(),
        ]}}}),
        _ => Value::Null,
    };

    (200, json!({ "data": data }).to_string())
}

fn listing(names: &[&str], next: Option<&str>) -> Value {
    let edges: Vec<Value> = names.iter().map(|n| json!({"node": {"name": n}})).collect();
    json!({"project": {"runs": {
        "edges": edges,
        "pageInfo": {"endCursor": next, "hasNextPage": next.is_some()},
    }}})
}

fn summary(step: u64, runtime: f64, loss: Option<f64>, ago: i64) -> String {
    let mut summary = json!({
        "_step": step,
        "_runtime": runtime,
        "_timestamp": (NOW - ago) as f64,
    });
    if let Some(loss) = loss {
        summary["train/loss"] = json!(loss);
    }
    summary.to_string()
}

fn run_node(name: &str) -> Value {
    match name {
        "run-a" => json!({
            "name": "run-a", "displayName": "alice", "state": "running",
            "summaryMetrics": summary(100, 50.0, Some(2.5), 60),
            "runInfo": {"gpu": "Tesla T4"},
        }),
        "run-b" => json!({
            "name": "run-b", "displayName": "bob", "state": "finished",
            "summaryMetrics": summary(300, 7200.0, Some(3.0), 5000),
        }),
        "run-c" => json!({
            "name": "run-c", "displayName": "alice", "state": "finished",
            "summaryMetrics": summary(20, 10.0, None, 9000),
        }),
        // No state: skipped.
        "run-d" => json!({
            "name": "run-d", "displayName": "carol",
            "summaryMetrics": summary(1, 1.0, None, 10),
        }),
        "run-x" => json!({
            "name": "run-x", "displayName": "dave", "state": "running",
            "summaryMetrics": "{not json",
        }),
        _ => Value::Null,
    }
}

fn quicksearch(url: &str) -> Value {
    let q = url
        .split('?')
        .nth(1)
        .and_then(|query| query.split('&').find_map(|pair| pair.strip_prefix("q=")))
        .unwrap_or_default();

    match q {
        "alice" => json!({"users": [
            {"user": "alice-fan", "avatarUrl": "/avatars/fan.png"},
            {"user": "alice", "avatarUrl": "/avatars/alice.png"},
        ]}),
        "bob" => json!({"users": [{"user": "bobby", "avatarUrl": "/avatars/bobby.png"}]}),
        _ => json!({"users": []}),
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn temp_log(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("collabdash-it-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("refresh-log.jsonl")
}

// ---------------------------------------------------------------------------
// Refresh pipeline
// ---------------------------------------------------------------------------

#[test]
fn refresh_aggregates_paginated_runs() {
    let fixture = Fixture::start();
    let mut dashboard =
        Dashboard::with_logger(fixture.config("trainers"), RefreshLogger::disabled());

    let index = dashboard.run_index().unwrap();
    assert_eq!(index.participant_ids(), vec!["alice", "bob"]);
    assert_eq!(index.total_runs(), 3);
    assert_eq!(index.total_skipped(), 1);
    assert_eq!(index.latest_timestamp, Some(at(NOW - 60)));

    let snapshot = dashboard.snapshot_at(at(NOW)).unwrap();
    let alice = &snapshot.participants[0];
    assert_eq!(alice.total_batches, 120);
    assert_eq!(alice.total_runtime, 60.0);
    assert_eq!(alice.active_runs.len(), 1);
    assert_eq!(alice.active_runs[0].gpu_type.as_deref(), Some("Tesla T4"));
    assert_eq!(alice.mean_active_loss, 2.5);
    assert_eq!(alice.active_velocity, 2.0);

    assert_eq!(snapshot.metrics.num_contributing_users, 2);
    assert_eq!(snapshot.metrics.num_active_users, 1);
    assert_eq!(snapshot.metrics.total_runtime, 7260.0);

    let table = leaderboard_table(&snapshot.leaderboard);
    assert_eq!(table[0].user, "bob");
    assert_eq!(table[0].total_time, "2:00:00");
    assert_eq!(table[1].user, "alice");
    assert_eq!(table[1].total_time, "0:01:00");
}

#[test]
fn activity_depends_on_evaluation_time() {
    let fixture = Fixture::start();
    let mut dashboard =
        Dashboard::with_logger(fixture.config("trainers"), RefreshLogger::disabled());

    let soon = dashboard.snapshot_at(at(NOW + 100)).unwrap();
    assert_eq!(soon.metrics.num_active_users, 1);

    let later = dashboard.snapshot_at(at(NOW + 400)).unwrap();
    assert_eq!(later.metrics.num_active_users, 0);
    assert_eq!(later.metrics.num_contributing_users, 2);
}

#[test]
fn repeated_refresh_within_ttl_reuses_cache() {
    let fixture = Fixture::start();
    let log = temp_log("cache");
    let mut dashboard = Dashboard::with_logger(fixture.config("trainers"), RefreshLogger::at(&log));

    let first = dashboard.snapshot_at(at(NOW)).unwrap();
    let after_first = fixture.requests();
    // Two listing pages plus four run queries.
    assert_eq!(after_first, 6);

    let second = dashboard.snapshot_at(at(NOW)).unwrap();
    assert_eq!(fixture.requests(), after_first);
    assert_eq!(first.participants, second.participants);

    let entries = dashboard.logger().read_all();
    assert_eq!(entries.len(), 2);
    assert!(!entries[0].cache_hit);
    assert_eq!(entries[0].items, 3);
    assert_eq!(entries[0].skipped, 1);
    assert!(entries[1].cache_hit);

    let summary = reporter::summarize(&entries);
    assert_eq!(summary.stages[0].stage, "runs");
    assert_eq!(summary.stages[0].cache_hits, 1);

    let _ = std::fs::remove_dir_all(log.parent().unwrap());
}

#[test]
fn zero_ttl_refetches_every_time() {
    let fixture = Fixture::start();
    let mut config = fixture.config("trainers");
    config.cache.ttl_secs = 0;
    let mut dashboard = Dashboard::with_logger(config, RefreshLogger::disabled());

    dashboard.run_index().unwrap();
    let after_first = fixture.requests();
    dashboard.run_index().unwrap();
    assert_eq!(fixture.requests(), after_first * 2);
}

// ---------------------------------------------------------------------------
// Profiles and presentation
// ---------------------------------------------------------------------------

#[test]
fn bubbles_resolve_profiles_with_default_fallback() {
    let fixture = Fixture::start();
    let mut dashboard =
        Dashboard::with_logger(fixture.config("trainers"), RefreshLogger::disabled());

    let view = dashboard.bubbles_at(at(NOW)).unwrap();
    let value = serde_json::to_value(&view).unwrap();

    let points = value["serializedData"]["points"][0].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["profileId"], "alice");
    assert_eq!(points[0]["batches"], 120);
    assert_eq!(points[0]["activeRuns"][0]["gpu_type"], "Tesla T4");
    assert_eq!(points[1]["activeRuns"], json!([]));
    assert_eq!(value["serializedData"]["maxVelocity"], 1.0);

    let mut profiles = view.profiles.clone();
    profiles.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0].src, "https://hub.example/avatars/alice.png");
    assert_eq!(profiles[0].url, "https://hub.example/alice");
    assert_eq!(
        profiles[1].src,
        "https://hub.example/avatars/57584cb934354663ac65baa04e6829bf.svg"
    );
}

#[test]
fn loss_history_follows_newest_coordinator_run() {
    let fixture = Fixture::start();
    let mut dashboard =
        Dashboard::with_logger(fixture.config("trainers"), RefreshLogger::disabled());

    let history = dashboard.loss_history().unwrap();
    assert_eq!(history.steps, vec![1, 3]);
    assert_eq!(history.losses, vec![9.5, 8.75]);
    assert_eq!(history.alive_peers, vec![3, 4]);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn malformed_summary_aborts_refresh_with_parse_error() {
    let fixture = Fixture::start();
    let mut dashboard = Dashboard::with_logger(fixture.config("broken"), RefreshLogger::disabled());

    let err = dashboard.snapshot_at(at(NOW)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[test]
fn graphql_errors_are_fetch_errors() {
    let fixture = Fixture::start();
    let mut dashboard = Dashboard::with_logger(fixture.config("denied"), RefreshLogger::disabled());

    let err = dashboard.run_index().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(err.to_string().contains("permission denied"));
}

#[test]
fn http_status_errors_are_not_retried() {
    let fixture = Fixture::start();
    let mut config = fixture.config("trainers");
    config.tracker.graphql_url = format!("http://{}/graphql-down", fixture.addr);
    let mut dashboard = Dashboard::with_logger(config, RefreshLogger::disabled());

    let err = dashboard.run_index().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert_eq!(fixture.requests(), 1);
}

// ---------------------------------------------------------------------------
// Web layer
// ---------------------------------------------------------------------------

#[test]
fn web_endpoints_answer_from_fixture() {
    let fixture = Fixture::start();
    let mut dashboard =
        Dashboard::with_logger(fixture.config("trainers"), RefreshLogger::disabled());

    for url in [
        "/",
        "/api/metrics",
        "/api/leaderboard?limit=1",
        "/api/bubbles",
        "/api/loss",
        "/api/config",
        "/api/health",
        "/api/refreshes",
    ] {
        let resp = web::handle(&mut dashboard, &Method::Get, url);
        assert_eq!(resp.status_code(), StatusCode(200), "{url}");
    }
}

#[test]
fn web_refresh_query_bypasses_cache() {
    let fixture = Fixture::start();
    let mut dashboard =
        Dashboard::with_logger(fixture.config("trainers"), RefreshLogger::disabled());

    let resp = web::handle(&mut dashboard, &Method::Get, "/api/metrics");
    assert_eq!(resp.status_code(), StatusCode(200));
    let after_first = fixture.requests();

    web::handle(&mut dashboard, &Method::Get, "/api/leaderboard");
    assert_eq!(fixture.requests(), after_first);

    let resp = web::handle(&mut dashboard, &Method::Get, "/api/metrics?refresh=1");
    assert_eq!(resp.status_code(), StatusCode(200));
    assert_eq!(fixture.requests(), after_first * 2);
}

#[test]
fn web_reports_failed_refresh_as_500() {
    let fixture = Fixture::start();
    let mut dashboard = Dashboard::with_logger(fixture.config("broken"), RefreshLogger::disabled());

    let resp = web::handle(&mut dashboard, &Method::Get, "/api/metrics");
    assert_eq!(resp.status_code(), StatusCode(500));
}
