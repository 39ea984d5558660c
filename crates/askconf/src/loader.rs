//! Config file discovery, loading, table merging, and environment variable overlay.

use crate::{AskConfig, ConfigError, FacingPreference};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli). Only existing files are returned.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/askcapture/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("askcapture/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("askcapture.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; anything else is replaced.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let toml::Value::Table(incoming) = value else {
            base.insert(key, value);
            continue;
        };

        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

/// Deserialize a merged table; missing sections and keys fall back to defaults.
pub(crate) fn from_table(
    table: toml::Table,
    origin: Option<&PathBuf>,
) -> Result<AskConfig, ConfigError> {
    let mut config: AskConfig = toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.cloned().unwrap_or_else(|| PathBuf::from("<merged>")),
            message: e.to_string(),
        })?;

    let store_dir = config.paths.store_dir.to_string_lossy().to_string();
    config.paths.store_dir = expand_path(&store_dir);
    Ok(config)
}

fn env_parse<T: std::str::FromStr>(name: &str, sources: &mut ConfigSources) -> Option<T> {
    let value = env::var(name).ok()?.parse().ok()?;
    sources.env_overrides.push(name.to_string());
    Some(value)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut AskConfig, sources: &mut ConfigSources) {
    // Limits
    if let Some(v) = env_parse("ASKCAPTURE_TOTAL_BUDGET_SECS", sources) {
        config.limits.total_budget_secs = v;
    }
    if let Some(v) = env_parse("ASKCAPTURE_MAX_SEGMENTS", sources) {
        config.limits.max_segments = v;
    }
    if let Some(v) = env_parse("ASKCAPTURE_MAX_ATTACHMENTS", sources) {
        config.limits.max_attachments = v;
    }
    if let Some(v) = env_parse("ASKCAPTURE_MAX_ATTACHMENT_BYTES", sources) {
        config.limits.max_attachment_bytes = v;
    }
    if let Some(v) = env_parse("ASKCAPTURE_MAX_TOTAL_ATTACHMENT_BYTES", sources) {
        config.limits.max_total_attachment_bytes = v;
    }

    // Capture
    if let Some(v) = env_parse("ASKCAPTURE_COUNTDOWN_SECS", sources) {
        config.capture.countdown_secs = v;
    }
    if let Ok(v) = env::var("ASKCAPTURE_DEFAULT_FACING") {
        let facing = match v.to_lowercase().as_str() {
            "user" | "front" => Some(FacingPreference::User),
            "environment" | "back" => Some(FacingPreference::Environment),
            _ => None,
        };
        if let Some(facing) = facing {
            config.capture.default_facing = facing;
            sources.env_overrides.push("ASKCAPTURE_DEFAULT_FACING".to_string());
        }
    }

    // Mixer
    if let Some(v) = env_parse("ASKCAPTURE_SYSTEM_GAIN", sources) {
        config.mixer.system_gain = v;
    }
    if let Some(v) = env_parse("ASKCAPTURE_MICROPHONE_GAIN", sources) {
        config.mixer.microphone_gain = v;
    }

    // Upload
    if let Some(v) = env_parse("ASKCAPTURE_UPLOAD_CONCURRENCY", sources) {
        config.upload.max_concurrent = v;
    }
    if let Some(v) = env_parse("ASKCAPTURE_UPLOAD_TIMEOUT_SECS", sources) {
        config.upload.timeout_secs = v;
    }

    // Paths
    if let Ok(v) = env::var("ASKCAPTURE_STORE_DIR") {
        config.paths.store_dir = expand_path(&v);
        sources.env_overrides.push("ASKCAPTURE_STORE_DIR".to_string());
    }

    // Telemetry
    if let Ok(v) = env::var("ASKCAPTURE_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("ASKCAPTURE_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn table(contents: &str) -> toml::Table {
        parse_table(contents, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_merge_nested_tables_key_by_key() {
        let mut base = table("[limits]\ntotal_budget_secs = 90\nmax_segments = 3\n");
        merge_tables(&mut base, table("[limits]\nmax_segments = 5\n"));

        let limits = base.get("limits").and_then(|v| v.as_table()).unwrap();
        assert_eq!(limits.get("total_budget_secs").unwrap().as_integer(), Some(90));
        assert_eq!(limits.get("max_segments").unwrap().as_integer(), Some(5));
    }

    #[test]
    fn test_merge_adds_new_sections() {
        let mut base = table("[limits]\nmax_segments = 3\n");
        merge_tables(&mut base, table("[upload]\ntimeout_secs = 10\n"));
        assert!(base.contains_key("limits"));
        assert!(base.contains_key("upload"));
    }

    #[test]
    fn test_load_table_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[upload]\nmax_concurrent = 2").unwrap();

        let loaded = load_table(file.path()).unwrap();
        let config = from_table(loaded, None).unwrap();
        assert_eq!(config.upload.max_concurrent, 2);
        assert_eq!(config.upload.timeout_secs, 120);
    }

    #[test]
    fn test_load_table_reports_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[upload\nmax_concurrent = ").unwrap();

        let result = load_table(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = load_table(Path::new("/nonexistent/askcapture.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_cli_path_is_discovered() {
        let file = NamedTempFile::new().unwrap();
        let files = discover_config_files_with_override(Some(file.path()));
        assert_eq!(files.last(), Some(&file.path().to_path_buf()));
    }

    #[test]
    fn test_expand_path_home() {
        let expanded = expand_path("~/media");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_store_dir_tilde_is_expanded() {
        let config = from_table(table("[paths]\nstore_dir = \"~/qa-store\"\n"), None).unwrap();
        assert!(config.paths.store_dir.ends_with("qa-store"));
        assert!(!config.paths.store_dir.to_string_lossy().starts_with('~'));
    }
}
