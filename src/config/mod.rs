/// Configuration system for vitalwatch.
///
/// Provides a layered configuration hierarchy:
///
/// 1. **Built-in defaults**: hardcoded in [`schema::VitalwatchConfig::default()`]
/// 2. **User global config**: `~/.vitalwatch/config.toml`
/// 3. **Project local config**: `.vitalwatch.toml` in the current working directory
/// 4. **Environment variables**: `VITALWATCH_*` overrides (highest precedence)
///
/// Later layers override earlier ones. Missing sections in a TOML file fall
/// back to built-in defaults.
///
/// # Usage
///
/// ```rust,ignore
/// use vitalwatch::config;
///
/// let cfg = config::load();
/// let backend = RestBackend::from_config(&cfg.backend);
/// ```
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use schema::VitalwatchConfig;

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the fully resolved configuration.
///
/// Merges all layers in order: defaults → global TOML → project TOML → env
/// vars.
pub fn load() -> VitalwatchConfig {
    let mut config = load_layers(&[global_config_path(), project_config_path()]);
    apply_env_overrides(&mut config);
    config
}

/// Deep-merge the TOML files at `paths` (later wins, key by key) and
/// deserialize the result once. Keys no file sets keep their defaults.
fn load_layers(paths: &[Option<PathBuf>]) -> VitalwatchConfig {
    let mut merged = toml::Value::Table(toml::map::Map::new());
    for path in paths.iter().flatten() {
        if let Some(layer) = load_toml_layer(path) {
            merge_toml(&mut merged, layer);
        }
    }
    merged.try_into::<VitalwatchConfig>().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "merged config is invalid, using defaults");
        VitalwatchConfig::default()
    })
}

/// Load one TOML config file as a raw value tree.
///
/// Returns `None` if the file doesn't exist or its content is malformed
/// (unparseable or not matching the schema). A malformed file is reported
/// but never fatal.
fn load_toml_layer(path: &Path) -> Option<toml::Value> {
    let content = fs::read_to_string(path).ok()?;
    let checked = toml::from_str::<VitalwatchConfig>(&content)
        .and_then(|_| toml::from_str::<toml::Value>(&content));
    match checked {
        Ok(layer) => Some(layer),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            None
        }
    }
}

/// Merge `overlay` into `base`: tables merge recursively, any other value
/// replaces what was there.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ---------------------------------------------------------------------------
// File paths
// ---------------------------------------------------------------------------

/// The per-user state directory: `~/.vitalwatch`.
pub fn vitalwatch_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".vitalwatch"))
}

fn global_config_path() -> Option<PathBuf> {
    vitalwatch_home().map(|dir| dir.join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|cwd| cwd.join(".vitalwatch.toml"))
}

/// Return the path to the global config file for display/init purposes.
pub fn global_config_file() -> Option<PathBuf> {
    global_config_path()
}

/// Return the path to the project config file for display purposes.
pub fn project_config_file() -> Option<PathBuf> {
    project_config_path()
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides (highest precedence layer).
///
/// Supported variables:
/// - `VITALWATCH_BACKEND_URL`: backend project URL
/// - `VITALWATCH_ANON_KEY`: backend anon API key
/// - `VITALWATCH_ACCESS_TOKEN`: user access token
/// - `VITALWATCH_GATEWAY_URL`: AI gateway chat-completions URL
/// - `VITALWATCH_GATEWAY_API_KEY`: AI gateway API key
/// - `VITALWATCH_GATEWAY_MODEL`: AI model identifier
/// - `VITALWATCH_FUNCTIONS_URL`: endpoint clients invoke functions at
/// - `VITALWATCH_BIND`: functions server bind address
/// - `VITALWATCH_ACTIVITY_LOG`: activity log toggle (`1`/`true`/`yes`/`on`)
fn apply_env_overrides(config: &mut VitalwatchConfig) {
    if let Ok(val) = std::env::var("VITALWATCH_BACKEND_URL")
        && !val.is_empty()
    {
        config.backend.url = val;
    }
    if let Ok(val) = std::env::var("VITALWATCH_ANON_KEY")
        && !val.is_empty()
    {
        config.backend.anon_key = val;
    }
    if let Ok(val) = std::env::var("VITALWATCH_ACCESS_TOKEN")
        && !val.is_empty()
    {
        config.backend.access_token = val;
    }

    if let Ok(val) = std::env::var("VITALWATCH_GATEWAY_URL")
        && !val.is_empty()
    {
        config.gateway.url = val;
    }
    if let Ok(val) = std::env::var("VITALWATCH_GATEWAY_API_KEY")
        && !val.is_empty()
    {
        config.gateway.api_key = val;
    }
    if let Ok(val) = std::env::var("VITALWATCH_GATEWAY_MODEL")
        && !val.is_empty()
    {
        config.gateway.model = val;
    }

    if let Ok(val) = std::env::var("VITALWATCH_FUNCTIONS_URL")
        && !val.is_empty()
    {
        config.functions.url = val;
    }
    if let Ok(val) = std::env::var("VITALWATCH_BIND")
        && !val.is_empty()
    {
        config.functions.bind = val;
    }
    if let Ok(val) = std::env::var("VITALWATCH_ACTIVITY_LOG") {
        config.logging.activity_log = is_truthy(&val);
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

/// Write the default annotated config to `~/.vitalwatch/config.toml`.
///
/// Returns an error if the file already exists (use `force = true` to
/// overwrite).
pub fn init_config(force: bool) -> Result<PathBuf> {
    let path = global_config_path().context("could not determine home directory")?;

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create ~/.vitalwatch/ directory")?;
    }

    fs::write(&path, VitalwatchConfig::default_toml()).context("failed to write config file")?;

    Ok(path)
}

/// Set a single config key to a value in the global config file.
///
/// Supports dotted keys like `gateway.model`. The existing value's type
/// decides how the raw string is parsed.
pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let path = global_config_path().context("could not determine home directory")?;

    let content = if path.exists() {
        fs::read_to_string(&path).context("failed to read config file")?
    } else {
        toml::to_string_pretty(&VitalwatchConfig::default())
            .context("failed to serialize default config")?
    };

    let mut root: toml::Value =
        toml::from_str(&content).context("failed to parse config as TOML value")?;
    set_toml_value(&mut root, key, value)?;

    // Reject edits that would no longer deserialize into the schema.
    let updated = toml::to_string_pretty(&root).context("failed to serialize config")?;
    toml::from_str::<VitalwatchConfig>(&updated)
        .with_context(|| format!("invalid value '{value}' for '{key}'"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    fs::write(&path, updated).context("failed to write config file")?;

    Ok(())
}

/// Set a value in a TOML value tree using a dotted key path.
fn set_toml_value(root: &mut toml::Value, key: &str, raw_value: &str) -> Result<()> {
    let Some((section_path, leaf)) = key.rsplit_once('.') else {
        anyhow::bail!("config keys take the form section.key, got '{key}'");
    };

    let mut current = root;
    for part in section_path.split('.') {
        current = current
            .get_mut(part)
            .with_context(|| format!("config key not found: section '{part}' in '{key}'"))?;
    }

    let table = current
        .as_table_mut()
        .with_context(|| format!("expected table at '{section_path}'"))?;

    let new_value = match table.get(leaf) {
        Some(toml::Value::Boolean(_)) => toml::Value::Boolean(is_truthy(raw_value)),
        Some(toml::Value::Integer(_)) => {
            let n: i64 = raw_value
                .parse()
                .with_context(|| format!("expected integer for '{key}', got '{raw_value}'"))?;
            toml::Value::Integer(n)
        }
        Some(toml::Value::String(_)) => toml::Value::String(raw_value.to_string()),
        Some(_) => anyhow::bail!("unsupported value type at '{key}'"),
        None => anyhow::bail!("config key not found: '{key}'"),
    };

    table.insert(leaf.to_string(), new_value);
    Ok(())
}

/// Reset the global config to defaults (overwrite the file).
pub fn reset_config() -> Result<PathBuf> {
    init_config(true)
}

/// Show the effective (fully resolved) config as TOML.
///
/// Secrets are masked so the output can be pasted into bug reports.
pub fn show_effective_config() -> Result<String> {
    let mut config = load();
    mask(&mut config.backend.access_token);
    mask(&mut config.gateway.api_key);
    toml::to_string_pretty(&config).context("failed to serialize effective config")
}

fn mask(secret: &mut String) {
    if !secret.is_empty() {
        *secret = "********".to_string();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_truthy_accepts_variants() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("YES"));
        assert!(is_truthy("on"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn set_toml_value_updates_string() {
        let mut root: toml::Value = toml::from_str(
            r#"
[gateway]
model = "google/gemini-2.5-flash"
"#,
        )
        .unwrap();
        set_toml_value(&mut root, "gateway.model", "openai/gpt-4o-mini").unwrap();
        assert_eq!(root["gateway"]["model"].as_str(), Some("openai/gpt-4o-mini"));
    }

    #[test]
    fn set_toml_value_updates_integer_and_bool() {
        let mut root: toml::Value = toml::from_str(
            r#"
[telemetry]
window_size = 50

[logging]
activity_log = true
"#,
        )
        .unwrap();
        set_toml_value(&mut root, "telemetry.window_size", "120").unwrap();
        set_toml_value(&mut root, "logging.activity_log", "off").unwrap();
        assert_eq!(root["telemetry"]["window_size"].as_integer(), Some(120));
        assert_eq!(root["logging"]["activity_log"].as_bool(), Some(false));
    }

    #[test]
    fn set_toml_value_rejects_bad_input() {
        let mut root: toml::Value = toml::from_str(
            r#"
[telemetry]
window_size = 50
"#,
        )
        .unwrap();
        assert!(set_toml_value(&mut root, "telemetry.window_size", "lots").is_err());
        assert!(set_toml_value(&mut root, "telemetry.unknown", "1").is_err());
        assert!(set_toml_value(&mut root, "nonexistent.key", "1").is_err());
        assert!(set_toml_value(&mut root, "toplevel", "1").is_err());
    }

    #[test]
    fn project_layer_overrides_only_the_keys_it_sets() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("config.toml");
        let project = dir.path().join(".vitalwatch.toml");
        fs::write(
            &global,
            r#"
[backend]
url = "https://global.example.co"
anon_key = "anon-global"

[telemetry]
window_size = 80
"#,
        )
        .unwrap();
        fs::write(&project, "[telemetry]\nwindow_size = 20\n").unwrap();

        let config = load_layers(&[Some(global), Some(project)]);

        assert_eq!(config.backend.url, "https://global.example.co");
        assert_eq!(config.backend.anon_key, "anon-global");
        assert_eq!(config.telemetry.window_size, 20);
        assert_eq!(config.gateway.model, VitalwatchConfig::default().gateway.model);
    }

    #[test]
    fn missing_and_malformed_layers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("config.toml");
        let broken = dir.path().join(".vitalwatch.toml");
        fs::write(&global, "[backend]\nurl = \"https://global.example.co\"\n").unwrap();
        fs::write(&broken, "[telemetry]\nwindow_size = \"many\"\n").unwrap();

        let config = load_layers(&[None, Some(global), Some(broken), Some(dir.path().join("absent.toml"))]);

        assert_eq!(config.backend.url, "https://global.example.co");
        assert_eq!(config.telemetry.window_size, VitalwatchConfig::default().telemetry.window_size);
    }

    #[test]
    fn mask_hides_only_present_secrets() {
        let mut present = "sk-live".to_string();
        let mut absent = String::new();
        mask(&mut present);
        mask(&mut absent);
        assert_eq!(present, "********");
        assert!(absent.is_empty());
    }
}
