use anyhow::Result;
use clap::{Parser, Subcommand};

use collabdash::cli::{self, OutputFormat};
use collabdash::config;
use collabdash::dashboard::Dashboard;
use collabdash::web;

#[derive(Debug, Parser)]
#[command(name = "collabdash")]
#[command(about = "Dashboard for collaborative training runs")]
struct App {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show contributing users, active users and total runtime
    Metrics {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Rank participants by contributed time
    Leaderboard {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
        /// Only show the top N rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print bubble-chart data and participant profiles as JSON
    Bubbles,
    /// Show the coordinator run's loss history
    Loss {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Serve the web dashboard
    Serve {
        /// Bind address (overrides server.addr)
        #[arg(long)]
        addr: Option<String>,
        /// Do not open a browser
        #[arg(long)]
        no_open: bool,
    },
    /// Summarize refresh timings from the refresh log
    Refreshes {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
        /// Only include the newest N log entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check config files and remote service reachability
    Health,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default config file to ~/.collabdash/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Set a dotted key, e.g. `collabdash config set tracker.project my-runs`
    Set { key: String, value: String },
    /// Reset the global config file to defaults
    Reset,
}

fn main() -> Result<()> {
    let app = App::parse();
    let dashboard = || Dashboard::new(config::load());

    match app.command {
        Commands::Metrics { format } => {
            cli::run_metrics(&mut dashboard(), OutputFormat::from_str_opt(Some(&format)))
        }
        Commands::Leaderboard { format, limit } => cli::run_leaderboard(
            &mut dashboard(),
            OutputFormat::from_str_opt(Some(&format)),
            limit,
        ),
        Commands::Bubbles => cli::run_bubbles(&mut dashboard()),
        Commands::Loss { format } => {
            cli::run_loss(&mut dashboard(), OutputFormat::from_str_opt(Some(&format)))
        }
        Commands::Serve { addr, no_open } => {
            let dashboard = dashboard();
            let addr = addr.unwrap_or_else(|| dashboard.config().server.addr.clone());
            let open = dashboard.config().server.open_browser && !no_open;
            web::serve(dashboard, &addr, open)
        }
        Commands::Refreshes { format, limit } => cli::run_refreshes(
            &dashboard(),
            OutputFormat::from_str_opt(Some(&format)),
            limit,
        ),
        Commands::Health => cli::run_health(&dashboard()),
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::run_config_show(),
            ConfigAction::Init { force } => cli::run_config_init(force),
            ConfigAction::Set { key, value } => cli::run_config_set(&key, &value),
            ConfigAction::Reset => cli::run_config_reset(),
        },
    }
}
