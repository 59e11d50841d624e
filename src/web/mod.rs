//! Embedded web dashboard for collabdash.
//!
//! Provides a lightweight HTTP server (sync, via `tiny_http`) that serves:
//! - A single-page dashboard with the headline metrics, leaderboard, loss
//!   chart and participant list
//! - JSON API endpoints backed by the cached refresh pipeline
//!
//! Launched via `collabdash serve` (default: `http://127.0.0.1:9747`).

mod api;
mod frontend;

use std::io::Cursor;

use anyhow::{Context, Result};
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::dashboard::Dashboard;

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Start the web dashboard server on the given address.
///
/// Blocks the current thread. Requests are handled sequentially, so one
/// refresh at a time hits the remote services; the caches absorb redraws.
/// A failed refresh answers 500 and the server keeps running.
pub fn serve(mut dashboard: Dashboard, addr: &str, open: bool) -> Result<()> {
    let server = Server::http(addr)
        .map_err(|e| anyhow::anyhow!("failed to start HTTP server on {addr}: {e}"))?;

    println!("collabdash dashboard running at http://{addr}");
    println!("Press Ctrl+C to stop.\n");

    if open {
        let _ = open_browser(&format!("http://{addr}"));
    }

    for request in server.incoming_requests() {
        let method = request.method().clone();
        let url = request.url().to_string();

        let resp = handle(&mut dashboard, &method, &url);
        let status = resp.status_code().0;
        let _ = request.respond(resp);

        // Brief access log
        println!(
            "{} {} {} {}",
            method,
            url,
            status,
            chrono::Local::now().format("%H:%M:%S")
        );
    }

    Ok(())
}

/// Route one request, turning handler errors into a JSON 500.
pub fn handle(dashboard: &mut Dashboard, method: &Method, url: &str) -> Response<Cursor<Vec<u8>>> {
    match dispatch(dashboard, method, url) {
        Ok(resp) => resp,
        Err(e) => {
            let body = serde_json::json!({ "error": format!("{e:#}") }).to_string();
            Response::from_data(body.into_bytes())
                .with_header(content_type_json())
                .with_status_code(StatusCode(500))
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

fn dispatch(
    dashboard: &mut Dashboard,
    method: &Method,
    url: &str,
) -> Result<Response<Cursor<Vec<u8>>>> {
    // Strip query string for path matching
    let path = url.split('?').next().unwrap_or(url);

    if *method != Method::Get {
        return Ok(not_found());
    }

    if path.starts_with("/api/") && api::wants_refresh(url) {
        dashboard.invalidate();
    }

    match path {
        "/" | "/index.html" => Ok(serve_frontend()),

        // Refresh pipeline
        "/api/metrics" => api::get_metrics(dashboard),
        "/api/leaderboard" => api::get_leaderboard(dashboard, url),
        "/api/bubbles" => api::get_bubbles(dashboard),
        "/api/loss" => api::get_loss(dashboard),

        // Diagnostics
        "/api/config" => api::get_config(dashboard),
        "/api/health" => api::get_health(dashboard),
        "/api/refreshes" => api::get_refreshes(dashboard, url),

        _ => Ok(not_found()),
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Serve the embedded single-page frontend.
fn serve_frontend() -> Response<Cursor<Vec<u8>>> {
    Response::from_data(frontend::INDEX_HTML.as_bytes().to_vec())
        .with_header(content_type_html())
        .with_status_code(StatusCode(200))
}

/// 404 response.
fn not_found() -> Response<Cursor<Vec<u8>>> {
    let body = r#"{"error": "not found"}"#;
    Response::from_data(body.as_bytes().to_vec())
        .with_header(content_type_json())
        .with_status_code(StatusCode(404))
}

fn content_type(value: &'static str) -> Header {
    Header::from_bytes("Content-Type", value).expect("static header is valid ASCII")
}

/// JSON content type header.
pub(crate) fn content_type_json() -> Header {
    content_type("application/json; charset=utf-8")
}

/// HTML content type header.
fn content_type_html() -> Header {
    content_type("text/html; charset=utf-8")
}

/// Attempt to open a URL in the system default browser.
fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()
            .context("failed to open browser")?;
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()
            .context("failed to open browser")?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()
            .context("failed to open browser")?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
