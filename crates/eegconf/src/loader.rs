//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, EegscopeConfig};
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
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/eegscope/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("eegscope/config.toml");
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

    let local = PathBuf::from("eegscope.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, recursing into sub-tables so that a file
/// setting only `[bind] http_port` keeps the `host` from earlier files.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table, filling missing fields with defaults.
pub fn from_table(
    table: toml::Table,
    origin: Option<&Path>,
) -> Result<EegscopeConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("<merged>")),
            message: e.to_string(),
        })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut EegscopeConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("EEGSCOPE_DATA_ROOT") {
        config.infra.paths.data_root = expand_path(&v);
        sources.env_overrides.push("EEGSCOPE_DATA_ROOT".to_string());
    }

    if let Ok(v) = env::var("EEGSCOPE_HOST") {
        config.infra.bind.host = v;
        sources.env_overrides.push("EEGSCOPE_HOST".to_string());
    }
    if let Ok(v) = env::var("EEGSCOPE_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.http_port = port;
            sources.env_overrides.push("EEGSCOPE_HTTP_PORT".to_string());
        }
    }

    if let Ok(v) = env::var("EEGSCOPE_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("EEGSCOPE_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("EEGSCOPE_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("EEGSCOPE_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Ok(v) = env::var("EEGSCOPE_IDLE_THRESHOLD") {
        config.bootstrap.sessions.idle_threshold = v;
        sources.env_overrides.push("EEGSCOPE_IDLE_THRESHOLD".to_string());
    }
    if let Ok(v) = env::var("EEGSCOPE_MONTAGE") {
        config.bootstrap.pipeline.montage = v;
        sources.env_overrides.push("EEGSCOPE_MONTAGE".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        PathBuf::from(path)
    } else if let Some(stripped) = path.strip_prefix('$') {
        // Handle $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            match env::var(var_name) {
                Ok(var_value) => PathBuf::from(var_value).join(&stripped[slash_pos + 1..]),
                Err(_) => PathBuf::from(path),
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Table {
        s.parse().unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = from_table(parse("[paths]\ndata_root = \"/custom/data\"\n"), None).unwrap();
        assert_eq!(config.infra.paths.data_root, PathBuf::from("/custom/data"));
        // Other values should be defaults
        assert_eq!(config.infra.bind.http_port, 8000);
        assert_eq!(config.bootstrap.sessions.idle_threshold, "5h");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[paths]
data_root = "/data/eeg"

[bind]
host = "127.0.0.1"
http_port = 9000

[telemetry]
log_level = "debug"
otlp_endpoint = "127.0.0.1:4317"

[sessions]
idle_threshold = "2h"
sweep_interval = "30s"

[pipeline]
montage = "standard_1020"
data_suffixes = ["data.bdf", ".edf"]
experiments = ["MI"]
"#;
        let config = from_table(parse(toml), None).unwrap();

        assert_eq!(config.infra.paths.data_root, PathBuf::from("/data/eeg"));
        assert_eq!(config.infra.bind.socket_addr(), "127.0.0.1:9000");
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert!(config.infra.telemetry.otlp_enabled());
        assert_eq!(
            config.bootstrap.sessions.idle_threshold().unwrap(),
            std::time::Duration::from_secs(7200)
        );
        assert_eq!(config.bootstrap.pipeline.data_suffixes.len(), 2);
        assert_eq!(config.bootstrap.pipeline.experiments, vec!["MI".to_string()]);
    }

    #[test]
    fn test_merge_keeps_sibling_keys() {
        let mut base = parse("[bind]\nhost = \"10.0.0.1\"\nhttp_port = 8000\n");
        merge_tables(&mut base, parse("[bind]\nhttp_port = 9100\n"));

        let config = from_table(base, None).unwrap();
        assert_eq!(config.infra.bind.host, "10.0.0.1");
        assert_eq!(config.infra.bind.http_port, 9100);
    }

    #[test]
    fn test_load_table_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[bind\nhttp_port = ").unwrap();

        match load_table(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eegscope.toml");
        std::fs::write(&path, "[sessions]\nidle_threshold = \"90m\"\n").unwrap();

        let (config, sources) = EegscopeConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.bootstrap.sessions.idle_threshold, "90m");
        assert!(sources.files.contains(&path));
    }
}
