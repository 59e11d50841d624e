/// Configuration schema and defaults for the collabdash dashboard.
///
/// Defines the TOML-serializable configuration structure with all sections:
/// `[tracker]`, `[main_metrics]`, `[profiles]`, `[cache]`, `[activity]`,
/// `[server]`, and `[logging]`.
///
/// Every field has a sensible built-in default. Users only need to set the
/// values they want to override.
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level collabdash configuration.
///
/// Maps directly to the `~/.collabdash/config.toml` and `.collabdash.toml`
/// file schemas. All sections and fields are optional: missing values fall
/// back to built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    pub tracker: TrackerConfig,
    pub main_metrics: MainMetricsConfig,
    pub profiles: ProfilesConfig,
    pub cache: CacheConfig,
    pub activity: ActivityConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// [tracker]
// ---------------------------------------------------------------------------

/// Experiment-tracking service settings (per-participant runs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// GraphQL endpoint of the tracking service.
    pub graphql_url: String,
    /// Entity (team or user) owning the project.
    pub entity: String,
    /// Project holding one run per participant session.
    pub project: String,
    /// API key sent as HTTP Basic `api:<key>`. Empty means anonymous.
    pub api_key: String,
    /// Runs requested per listing page.
    pub page_size: u32,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
    /// Reconnect attempts on connection-level failures. HTTP status errors
    /// are never retried.
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            graphql_url: "https://api.wandb.ai/graphql".to_string(),
            entity: "learning-at-home".to_string(),
            project: "dalle-hivemind-trainers".to_string(),
            api_key: String::new(),
            page_size: 500,
            timeout_secs: 30,
            max_retries: 5,
            user_agent: concat!("collabdash/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// [main_metrics]
// ---------------------------------------------------------------------------

/// Coordinator run that logs the global loss and alive-peer count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainMetricsConfig {
    pub entity: String,
    pub project: String,
    /// Maximum history rows requested from the coordinator run.
    pub samples: u32,
}

impl Default for MainMetricsConfig {
    fn default() -> Self {
        Self {
            entity: "learning-at-home".to_string(),
            project: "Main_metrics".to_string(),
            samples: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// [profiles]
// ---------------------------------------------------------------------------

/// Community-profile lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Search endpoint, queried as `?type=user&q=<id>`.
    pub search_url: String,
    /// Host used to absolutize relative avatar paths and build profile URLs.
    pub host: String,
    /// Avatar used when no exact match is found or the lookup fails.
    pub default_avatar: String,
    pub timeout_secs: u64,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            search_url: "https://huggingface.co/api/quicksearch".to_string(),
            host: "https://huggingface.co".to_string(),
            default_avatar: "/avatars/57584cb934354663ac65baa04e6829bf.svg".to_string(),
            timeout_secs: 10,
        }
    }
}

impl ProfilesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// [cache]
// ---------------------------------------------------------------------------

/// Time-to-live memoization of remote queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a fetched result is reused (seconds). `0` disables reuse.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 100 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// ---------------------------------------------------------------------------
// [activity]
// ---------------------------------------------------------------------------

/// Active-participant detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// A running run counts as live if its last update is younger than this.
    pub window_secs: i64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { window_secs: 300 }
    }
}

impl ActivityConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs)
    }
}

// ---------------------------------------------------------------------------
// [server]
// ---------------------------------------------------------------------------

/// Embedded web dashboard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Open the dashboard in the default browser on start.
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9747".to_string(),
            open_browser: true,
        }
    }
}

// ---------------------------------------------------------------------------
// [logging]
// ---------------------------------------------------------------------------

/// Refresh log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Whether refresh timings are appended to the log file.
    pub enabled: bool,
    /// Path to the refresh log file. `~` is expanded to the home directory.
    pub path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "~/.collabdash/refresh-log.jsonl".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default TOML content
// ---------------------------------------------------------------------------

impl DashConfig {
    /// A copy safe to display: the API key is masked.
    pub fn redacted(&self) -> DashConfig {
        let mut config = self.clone();
        if !config.tracker.api_key.is_empty() {
            config.tracker.api_key = "********".to_string();
        }
        config
    }

    /// Generate the annotated default TOML config file content.
    ///
    /// Used by `collabdash config init` to create a starting config file with
    /// all settings documented.
    pub fn default_toml() -> String {
        r#"# collabdash Configuration
# Dashboard for collaborative training runs
#
# Configuration hierarchy (highest precedence wins):
#   1. Environment variables (COLLABDASH_*)
#   2. Project config (.collabdash.toml in current directory)
#   3. User global config (~/.collabdash/config.toml)
#   4. Built-in defaults

[tracker]
graphql_url = "https://api.wandb.ai/graphql"
entity = "learning-at-home"
project = "dalle-hivemind-trainers"   # one run per participant session
api_key = ""                          # or COLLABDASH_TRACKER_API_KEY
page_size = 500
timeout_secs = 30
max_retries = 5                       # reconnects on connection failures only

[main_metrics]
entity = "learning-at-home"
project = "Main_metrics"              # coordinator run: step / loss / alive peers
samples = 10000

[profiles]
search_url = "https://huggingface.co/api/quicksearch"
host = "https://huggingface.co"
default_avatar = "/avatars/57584cb934354663ac65baa04e6829bf.svg"
timeout_secs = 10

[cache]
ttl_secs = 100                        # reuse remote results for this long

[activity]
window_secs = 300                     # running runs updated within 5 min are live

[server]
addr = "127.0.0.1:9747"
open_browser = true

[logging]
enabled = true
path = "~/.collabdash/refresh-log.jsonl"
"#
        .to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_masks_only_a_set_key() {
        let mut config = DashConfig::default();
        assert_eq!(config.redacted().tracker.api_key, "");

        config.tracker.api_key = "secret".to_string();
        let shown = config.redacted();
        assert_eq!(shown.tracker.api_key, "********");
        assert_eq!(shown.tracker.entity, config.tracker.entity);
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = DashConfig::default();
        assert_eq!(config.tracker.entity, "learning-at-home");
        assert_eq!(config.tracker.project, "dalle-hivemind-trainers");
        assert_eq!(config.tracker.max_retries, 5);
        assert_eq!(config.main_metrics.project, "Main_metrics");
        assert_eq!(config.cache.ttl_secs, 100);
        assert_eq!(config.activity.window_secs, 300);
        assert!(config.logging.enabled);
    }

    #[test]
    fn deserialize_minimal_toml() {
        let toml_str = r#"
[cache]
ttl_secs = 10
"#;
        let config: DashConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.ttl_secs, 10);
        // All other sections fall back to defaults
        assert_eq!(config.activity.window_secs, 300);
        assert_eq!(config.profiles.host, "https://huggingface.co");
    }

    #[test]
    fn deserialize_partial_section_keeps_field_defaults() {
        let toml_str = r#"
[tracker]
project = "my-trainers"
"#;
        let config: DashConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tracker.project, "my-trainers");
        assert_eq!(config.tracker.graphql_url, "https://api.wandb.ai/graphql");
        assert_eq!(config.tracker.page_size, 500);
    }

    #[test]
    fn empty_toml_produces_defaults() {
        let config: DashConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.addr, "127.0.0.1:9747");
        assert_eq!(config.main_metrics.samples, 10_000);
    }

    #[test]
    fn default_toml_parses_back() {
        let config: DashConfig = toml::from_str(&DashConfig::default_toml()).unwrap();
        let defaults = DashConfig::default();
        assert_eq!(config.tracker.graphql_url, defaults.tracker.graphql_url);
        assert_eq!(config.profiles.default_avatar, defaults.profiles.default_avatar);
        assert_eq!(config.logging.path, defaults.logging.path);
    }

    #[test]
    fn duration_helpers() {
        let config = DashConfig::default();
        assert_eq!(config.cache.ttl(), Duration::from_secs(100));
        assert_eq!(config.activity.window(), chrono::Duration::seconds(300));
        assert_eq!(config.tracker.timeout(), Duration::from_secs(30));
    }
}
