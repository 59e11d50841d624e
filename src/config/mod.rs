/// Configuration system for collabdash.
///
/// Provides a layered configuration hierarchy:
///
/// 1. **Built-in defaults**: hardcoded in [`schema::DashConfig::default()`]
/// 2. **User global config**: `~/.collabdash/config.toml`
/// 3. **Project local config**: `.collabdash.toml` in the current working directory
/// 4. **Environment variables**: `COLLABDASH_*` overrides (highest precedence)
///
/// Later layers override earlier ones key by key. Keys no layer sets fall back
/// to the built-in defaults.
///
/// # Usage
///
/// ```rust,ignore
/// use collabdash::config;
///
/// let cfg = config::load();
/// let dashboard = Dashboard::new(cfg)?;
/// ```
pub mod schema;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

pub use schema::DashConfig;

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the fully resolved collabdash configuration.
///
/// Merges all layers in order: defaults → global TOML → project TOML → env
/// vars.
pub fn load() -> DashConfig {
    // Layers 2 and 3: user global config, then project local config
    let layers = [global_config_path(), project_config_path()]
        .into_iter()
        .filter_map(load_toml_file);
    let mut config = resolve_layers(layers);

    // Layer 4: environment variable overrides
    apply_env_overrides(&mut config);

    config
}

/// Load a TOML config file from the given path (if it exists).
///
/// Returns `None` if the path is `None`, the file doesn't exist, or the
/// content is malformed. A malformed file is reported on stderr and skipped
/// so the dashboard still comes up on the remaining layers.
fn load_toml_file(path: Option<PathBuf>) -> Option<toml::Table> {
    let path = path?;
    let content = fs::read_to_string(&path).ok()?;
    match parse_layer(&content) {
        Ok(table) => Some(table),
        Err(e) => {
            eprintln!("collabdash: ignoring malformed {}: {e}", path.display());
            None
        }
    }
}

/// Parse one layer, rejecting keys whose values don't fit the schema.
fn parse_layer(content: &str) -> Result<toml::Table, toml::de::Error> {
    let table: toml::Table = toml::from_str(content)?;
    DashConfig::deserialize(toml::Value::Table(table.clone()))?;
    Ok(table)
}

/// Fold config layers key by key, later layers winning, then fill the gaps
/// with the built-in defaults.
fn resolve_layers(layers: impl IntoIterator<Item = toml::Table>) -> DashConfig {
    let mut merged = toml::Table::new();
    for layer in layers {
        merge_tables(&mut merged, layer);
    }
    match DashConfig::deserialize(toml::Value::Table(merged)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("collabdash: falling back to default config: {e}");
            DashConfig::default()
        }
    }
}

/// Deep-merge `overlay` into `base`. Nested tables merge; any other value
/// replaces what was there.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// File paths
// ---------------------------------------------------------------------------

/// Path to the user global config: `~/.collabdash/config.toml`.
fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".collabdash").join("config.toml"))
}

/// Path to the project local config: `.collabdash.toml` in the current directory.
fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|cwd| cwd.join(".collabdash.toml"))
}

/// Return the path to the global config file for display/init purposes.
pub fn global_config_file() -> Option<PathBuf> {
    global_config_path()
}

/// Return the path to the project config file for display purposes.
pub fn project_config_file() -> Option<PathBuf> {
    project_config_path()
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None if path == "~" => dirs::home_dir(),
        None => Some(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides (highest precedence layer).
///
/// Supported variables:
/// - `COLLABDASH_TRACKER_URL`: GraphQL endpoint
/// - `COLLABDASH_TRACKER_ENTITY` / `COLLABDASH_TRACKER_PROJECT`
/// - `COLLABDASH_TRACKER_API_KEY`: API key (also `WANDB_API_KEY`)
/// - `COLLABDASH_PROFILES_URL`: profile search endpoint
/// - `COLLABDASH_CACHE_TTL_SECS`: cache time-to-live
/// - `COLLABDASH_ACTIVE_WINDOW_SECS`: active-run window
/// - `COLLABDASH_ADDR`: web dashboard bind address
/// - `COLLABDASH_LOGGING`: refresh log on/off
fn apply_env_overrides(config: &mut DashConfig) {
    // Tracker
    if let Ok(val) = std::env::var("COLLABDASH_TRACKER_URL")
        && !val.is_empty()
    {
        config.tracker.graphql_url = val;
    }
    if let Ok(val) = std::env::var("COLLABDASH_TRACKER_ENTITY")
        && !val.is_empty()
    {
        config.tracker.entity = val;
    }
    if let Ok(val) = std::env::var("COLLABDASH_TRACKER_PROJECT")
        && !val.is_empty()
    {
        config.tracker.project = val;
    }
    if let Some(key) = ["COLLABDASH_TRACKER_API_KEY", "WANDB_API_KEY"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
    {
        config.tracker.api_key = key;
    }

    // Profiles
    if let Ok(val) = std::env::var("COLLABDASH_PROFILES_URL")
        && !val.is_empty()
    {
        config.profiles.search_url = val;
    }

    // Cache / activity
    if let Ok(val) = std::env::var("COLLABDASH_CACHE_TTL_SECS")
        && let Ok(secs) = val.parse::<u64>()
    {
        config.cache.ttl_secs = secs;
    }
    if let Ok(val) = std::env::var("COLLABDASH_ACTIVE_WINDOW_SECS")
        && let Ok(secs) = val.parse::<i64>()
    {
        config.activity.window_secs = secs;
    }

    // Server / logging
    if let Ok(val) = std::env::var("COLLABDASH_ADDR")
        && !val.is_empty()
    {
        config.server.addr = val;
    }
    if let Ok(val) = std::env::var("COLLABDASH_LOGGING") {
        config.logging.enabled = is_truthy(&val);
    }
}

/// Check if a string value represents a truthy boolean.
fn is_truthy(val: &str) -> bool {
    matches!(
        val.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Config init / set / reset
// ---------------------------------------------------------------------------

/// Write the default annotated config to `~/.collabdash/config.toml`.
///
/// Creates the `~/.collabdash/` directory if it doesn't exist. Returns an
/// error if the file already exists (use `force = true` to overwrite).
pub fn init_config(force: bool) -> Result<PathBuf> {
    let path = global_config_path().context("could not determine home directory")?;

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create ~/.collabdash/ directory")?;
    }

    fs::write(&path, DashConfig::default_toml()).context("failed to write config file")?;

    Ok(path)
}

/// Set a single config key to a value in the global config file.
///
/// Reads the current global config (or defaults), updates the specified key,
/// and writes the result back. Supports dotted keys like `cache.ttl_secs`.
pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let path = global_config_path().context("could not determine home directory")?;

    let content = if path.exists() {
        fs::read_to_string(&path).context("failed to read config file")?
    } else {
        toml::to_string_pretty(&DashConfig::default())
            .context("failed to serialize default config")?
    };

    let updated = apply_config_update(&content, key, value)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    fs::write(&path, updated).context("failed to write config file")?;

    Ok(())
}

/// Apply a dotted-key update to TOML text and check the result still loads
/// as a [`DashConfig`].
fn apply_config_update(content: &str, key: &str, value: &str) -> Result<String> {
    let mut root: toml::Value =
        toml::from_str(content).context("failed to parse config as TOML value")?;

    set_toml_value(&mut root, key, value)?;

    let output = toml::to_string_pretty(&root).context("failed to serialize updated config")?;
    let _: DashConfig = toml::from_str(&output)
        .with_context(|| format!("'{value}' is not a valid value for '{key}'"))?;

    Ok(output)
}

/// Set a value in a TOML value tree using a dotted key path.
fn set_toml_value(root: &mut toml::Value, key: &str, raw_value: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        anyhow::bail!("invalid config key '{key}'");
    }

    // Navigate to the parent table
    let mut current = root;
    for &part in &parts[..parts.len() - 1] {
        current = current
            .get_mut(part)
            .with_context(|| format!("config key not found: section '{part}' in '{key}'"))?;
    }

    let leaf = parts[parts.len() - 1];

    let table = current.as_table_mut().with_context(|| {
        format!(
            "expected table at '{}'",
            key.rsplit_once('.').map(|(s, _)| s).unwrap_or("")
        )
    })?;

    // Parse according to the type of the existing value
    let new_value = match table.get(leaf) {
        Some(toml::Value::Boolean(_)) => toml::Value::Boolean(is_truthy(raw_value)),
        Some(toml::Value::Integer(_)) => {
            let n: i64 = raw_value
                .parse()
                .with_context(|| format!("expected integer for '{key}', got '{raw_value}'"))?;
            toml::Value::Integer(n)
        }
        Some(toml::Value::Float(_)) => {
            let f: f64 = raw_value
                .parse()
                .with_context(|| format!("expected float for '{key}', got '{raw_value}'"))?;
            toml::Value::Float(f)
        }
        Some(_) => toml::Value::String(raw_value.to_string()),
        None => anyhow::bail!("unknown config key '{key}'"),
    };

    table.insert(leaf.to_string(), new_value);
    Ok(())
}

/// Reset the global config to defaults (overwrite the file).
pub fn reset_config() -> Result<PathBuf> {
    init_config(true)
}

/// Show the effective (fully resolved) config as TOML.
pub fn show_effective_config() -> Result<String> {
    let config = load().redacted();
    toml::to_string_pretty(&config).context("failed to serialize effective config")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
