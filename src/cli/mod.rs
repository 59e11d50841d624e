//! CLI command implementations for the collabdash dashboard.
//!
//! Provides subcommand handlers for:
//! - `collabdash metrics`: contributing/active users and total runtime
//! - `collabdash leaderboard`: participants ranked by contributed time
//! - `collabdash bubbles`: bubble-chart data with profiles (JSON)
//! - `collabdash loss`: coordinator loss history
//! - `collabdash refreshes`: refresh timing summary from the log
//! - `collabdash health`: tracker and profile-search reachability
//! - `collabdash config show|init|set|reset`: configuration management

use anyhow::{Context, Result};
use colored::Colorize;

use crate::analytics::reporter::{self, RefreshSummary};
use crate::config;
use crate::dashboard::{Dashboard, Snapshot};
use crate::presentation::{LeaderboardEntry, leaderboard_table};
use crate::tracker::history::LossHistory;

/// Output format for report commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn from_str_opt(s: Option<&str>) -> Self {
        match s {
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            _ => Self::Table,
        }
    }
}

// ---------------------------------------------------------------------------
// collabdash metrics
// ---------------------------------------------------------------------------

/// Show the headline metrics of one refresh.
pub fn run_metrics(dashboard: &mut Dashboard, format: OutputFormat) -> Result<()> {
    let snapshot = dashboard.snapshot().context("failed to refresh runs")?;

    match format {
        OutputFormat::Json => print_metrics_json(&snapshot)?,
        OutputFormat::Csv => print_metrics_csv(&snapshot),
        OutputFormat::Table => print_metrics_table(&snapshot),
    }

    Ok(())
}

fn print_metrics_table(snapshot: &Snapshot) {
    let m = &snapshot.metrics;
    println!("{}", "Collaborative Training".bold().cyan());
    println!("{}", "=".repeat(50));
    println!();
    println!("  {} {}", "Contributing users:".bold(), m.num_contributing_users);
    println!("  {} {}", "Active users:      ".bold(), m.num_active_users.to_string().green());
    println!("  {} {}", "Total runtime:     ".bold(), m.formatted_runtime());
    if let Some(latest) = snapshot.latest_timestamp {
        println!(
            "  {} {}",
            "Last update:       ".bold(),
            latest.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if snapshot.skipped_runs > 0 {
        println!();
        println!(
            "  {}",
            format!("{} runs skipped (incomplete summaries)", snapshot.skipped_runs).yellow()
        );
    }
}

fn print_metrics_json(snapshot: &Snapshot) -> Result<()> {
    let m = &snapshot.metrics;
    let value = serde_json::json!({
        "num_contributing_users": m.num_contributing_users,
        "num_active_users": m.num_active_users,
        "total_runtime": m.total_runtime,
        "formatted_runtime": m.formatted_runtime(),
        "latest_timestamp": snapshot.latest_timestamp,
        "skipped_runs": snapshot.skipped_runs,
    });

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_metrics_csv(snapshot: &Snapshot) {
    let m = &snapshot.metrics;
    println!("num_contributing_users,num_active_users,total_runtime,skipped_runs");
    println!(
        "{},{},{:.3},{}",
        m.num_contributing_users, m.num_active_users, m.total_runtime, snapshot.skipped_runs
    );
}

// ---------------------------------------------------------------------------
// collabdash leaderboard
// ---------------------------------------------------------------------------

/// Show participants ranked by contributed time.
pub fn run_leaderboard(
    dashboard: &mut Dashboard,
    format: OutputFormat,
    limit: Option<usize>,
) -> Result<()> {
    let snapshot = dashboard.snapshot().context("failed to refresh runs")?;
    let mut rows = leaderboard_table(&snapshot.leaderboard);
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    if rows.is_empty() {
        println!("{}", "No participant runs found.".yellow());
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Csv => print_leaderboard_csv(&rows),
        OutputFormat::Table => print_leaderboard_table(&rows),
    }

    Ok(())
}

fn print_leaderboard_table(rows: &[LeaderboardEntry]) {
    println!("{}", "Leaderboard".bold().cyan());
    println!("  {:>5}  {:<30} {:>14}", "Rank", "User", "Time");
    println!("  {}", "-".repeat(51));

    for (i, row) in rows.iter().enumerate() {
        let line = format!(
            "  {:>5}  {:<30} {:>14}",
            row.rank,
            truncate(&row.user, 30),
            row.total_time
        );
        if i % 2 == 0 {
            println!("{line}");
        } else {
            println!("{}", line.dimmed());
        }
    }
}

fn print_leaderboard_csv(rows: &[LeaderboardEntry]) {
    println!("rank,user,total_time");
    for row in rows {
        println!("{},{},{}", row.rank, row.user, row.total_time);
    }
}

// ---------------------------------------------------------------------------
// collabdash bubbles
// ---------------------------------------------------------------------------

/// Print bubble-chart data with resolved profiles as JSON.
pub fn run_bubbles(dashboard: &mut Dashboard) -> Result<()> {
    let view = dashboard.bubbles().context("failed to refresh runs")?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// collabdash loss
// ---------------------------------------------------------------------------

/// Show the coordinator run's loss history.
pub fn run_loss(dashboard: &mut Dashboard, format: OutputFormat) -> Result<()> {
    let history = dashboard
        .loss_history()
        .context("failed to fetch loss history")?;

    if history.is_empty() {
        println!("{}", "No loss history yet.".yellow());
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
        OutputFormat::Csv => print_loss_csv(&history),
        OutputFormat::Table => print_loss_table(&history),
    }

    Ok(())
}

/// Rows shown by the table view; the full series is in json/csv.
const LOSS_TABLE_ROWS: usize = 20;

fn print_loss_table(history: &LossHistory) {
    println!("{}", "Training Loss".bold().cyan());
    if let Some((step, loss, peers)) = history.last() {
        println!(
            "  {} step {}  loss {:.4}  {} alive peers",
            "Latest:".bold(),
            format_number(step as usize),
            loss,
            peers
        );
    }
    println!();
    println!("  {:>10} {:>10} {:>8}", "Step", "Loss", "Peers");
    println!("  {}", "-".repeat(30));

    let start = history.len().saturating_sub(LOSS_TABLE_ROWS);
    for i in start..history.len() {
        println!(
            "  {:>10} {:>10.4} {:>8}",
            history.steps[i], history.losses[i], history.alive_peers[i]
        );
    }
}

fn print_loss_csv(history: &LossHistory) {
    println!("step,loss,alive_peers");
    for i in 0..history.len() {
        println!(
            "{},{},{}",
            history.steps[i], history.losses[i], history.alive_peers[i]
        );
    }
}

// ---------------------------------------------------------------------------
// collabdash refreshes
// ---------------------------------------------------------------------------

/// Summarize refresh timings from the refresh log.
pub fn run_refreshes(
    dashboard: &Dashboard,
    format: OutputFormat,
    limit: Option<usize>,
) -> Result<()> {
    let summary = reporter::compute_summary(dashboard.logger(), limit);

    if summary.total_entries == 0 {
        println!(
            "{}",
            "No refreshes logged yet. Run `collabdash metrics` or `collabdash serve` first."
                .yellow()
        );
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Csv => print_refreshes_csv(&summary),
        OutputFormat::Table => print_refreshes_table(&summary),
    }

    Ok(())
}

fn print_refreshes_table(summary: &RefreshSummary) {
    println!("{}", "Refresh Timings".bold().cyan());
    println!("  {} {}", "Entries:".bold(), format_number(summary.total_entries));
    println!();
    println!(
        "  {:<10} {:>7} {:>9} {:>10} {:>10} {:>7}",
        "Stage", "Count", "Cache %", "Avg ms", "Max ms", "Failed"
    );
    println!("  {}", "-".repeat(58));

    for stage in &summary.stages {
        let failed = if stage.failures > 0 {
            stage.failures.to_string().red()
        } else {
            stage.failures.to_string().normal()
        };
        println!(
            "  {:<10} {:>7} {:>8.0}% {:>10.1} {:>10} {:>7}",
            colorize_stage(&stage.stage),
            stage.count,
            stage.cache_hit_pct(),
            stage.avg_duration_ms,
            stage.max_duration_ms,
            failed
        );
    }

    for stage in &summary.stages {
        if let Some(ref error) = stage.last_error {
            println!();
            println!("  {} {}: {}", "Last error".red().bold(), stage.stage, error.dimmed());
        }
    }
}

fn print_refreshes_csv(summary: &RefreshSummary) {
    println!("stage,count,cache_hits,failures,avg_duration_ms,max_duration_ms");
    for s in &summary.stages {
        println!(
            "{},{},{},{},{:.1},{}",
            s.stage, s.count, s.cache_hits, s.failures, s.avg_duration_ms, s.max_duration_ms
        );
    }
}

// ---------------------------------------------------------------------------
// collabdash health
// ---------------------------------------------------------------------------

/// Check config files and remote service reachability.
pub fn run_health(dashboard: &Dashboard) -> Result<()> {
    println!("{}", "collabdash Health Check".bold().cyan());
    println!("{}", "=".repeat(40));

    let global_exists = config::global_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    let project_exists = config::project_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    print_health_item(
        "Global config",
        global_exists,
        if global_exists {
            "~/.collabdash/config.toml found"
        } else {
            "not found (run `collabdash config init` to create)"
        },
    );
    print_health_item(
        "Project config",
        project_exists,
        if project_exists {
            ".collabdash.toml found"
        } else {
            "none (optional)"
        },
    );

    for item in dashboard.health() {
        print_health_item(&item.name, item.ok, &item.detail);
    }

    Ok(())
}

fn print_health_item(name: &str, ok: bool, detail: &str) {
    let status = if ok {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!("  {} {:<25} {}", status, name, detail.dimmed());
}

// ---------------------------------------------------------------------------
// collabdash config show | init | set | reset
// ---------------------------------------------------------------------------

/// Show the effective (merged) configuration as TOML.
pub fn run_config_show() -> Result<()> {
    let toml_str = config::show_effective_config()?;
    println!("{}", "Effective collabdash Configuration".bold().cyan());
    println!("{}", "=".repeat(50));
    println!();
    println!("{toml_str}");

    let global_exists = config::global_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    let project_exists = config::project_config_file()
        .map(|p| p.exists())
        .unwrap_or(false);
    println!("{}", "Sources (highest priority last):".dimmed());
    println!("  {} built-in defaults", "·".dimmed());
    print_source(global_exists, "~/.collabdash/config.toml");
    print_source(project_exists, ".collabdash.toml");
    println!(
        "  {} {}",
        "·".dimmed(),
        "COLLABDASH_* environment variables".dimmed()
    );

    Ok(())
}

fn print_source(exists: bool, name: &str) {
    if exists {
        println!("  {} {}", "✓".green(), name.dimmed());
    } else {
        println!("  {} {}", "·".dimmed(), format!("{name} (not found)").dimmed());
    }
}

/// Initialize a default config file at `~/.collabdash/config.toml`.
pub fn run_config_init(force: bool) -> Result<()> {
    let path = config::init_config(force)?;
    println!(
        "{} Config written to {}",
        "✓".green().bold(),
        path.display()
    );
    println!(
        "  {}",
        "Edit the file to point at your tracking project.".dimmed()
    );
    Ok(())
}

/// Set a single configuration value in the global config file.
pub fn run_config_set(key: &str, value: &str) -> Result<()> {
    config::set_config_value(key, value)?;
    println!("{} Set {} = {}", "✓".green().bold(), key.bold(), value);
    Ok(())
}

/// Reset configuration to defaults.
pub fn run_config_reset() -> Result<()> {
    let path = config::reset_config()?;
    println!(
        "{} Config reset to defaults at {}",
        "✓".green().bold(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Format a number with comma separators for readability.
fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

/// Truncate a string to `max_len` characters, appending "…" if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Colorize a refresh stage name.
fn colorize_stage(stage: &str) -> colored::ColoredString {
    match stage {
        "runs" => stage.green(),
        "profiles" => stage.blue(),
        "history" => stage.yellow(),
        _ => stage.normal(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
