//! Configuration loader
//!
//! ## Loading Strategy
//! 1. Environment variables, when `QRGEN_DB_BACKEND` or `QRGEN_DB_PATH` is set
//! 2. Otherwise the first config file found by [`probe_config_paths`]
//! 3. Otherwise built-in defaults
//!
//! Files may be JSON or TOML; missing sections and fields take their
//! defaults.
//!
//! ## Environment Variables
//! - `QRGEN_DB_BACKEND`: `sqlite` or `postgres`
//! - `QRGEN_DB_PATH`: SQLite database file
//! - `QRGEN_DB_URL`: Postgres connection URL
//! - `QRGEN_DB_POOL_SIZE`: SQLite connection pool size
//! - `QRGEN_JOBS_POLL_INTERVAL`: job worker interval in seconds
//! - `QRGEN_WEBHOOKS_POLL_INTERVAL`: outbox worker interval in seconds
//! - `QRGEN_WEBHOOKS_BATCH_SIZE`: entries claimed per outbox pass
//! - `QRGEN_LOG_LEVEL`: default tracing level
//! - `QRGEN_LOG_JSON`: JSON log lines (true/false)
//!
//! ## File Locations
//! `config.{json,toml}` then `qrgen.{json,toml}` in the working directory,
//! its parent and grandparent, then the same names next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use qrgen_domain::{Config, DatabaseBackend, QrGenError, Result};

const APP_NAME: &str = "qrgen";
const CONFIG_EXTENSIONS: [&str; 2] = ["json", "toml"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `QrGenError::Config` if an environment variable or config file is
/// present but invalid.
pub fn load() -> Result<Config> {
    if env_configured() {
        let config = load_from_env()?;
        tracing::info!("Configuration loaded from environment variables");
        return Ok(config);
    }

    match probe_config_paths() {
        Some(path) => load_from_file(Some(path)),
        None => {
            tracing::info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn env_configured() -> bool {
    std::env::var_os("QRGEN_DB_BACKEND").is_some() || std::env::var_os("QRGEN_DB_PATH").is_some()
}

/// Load configuration from environment variables
///
/// `QRGEN_DB_BACKEND` or `QRGEN_DB_PATH` must be set; every other variable
/// is optional and falls back to its default.
///
/// # Errors
/// Returns `QrGenError::Config` if neither anchor variable is set or a value
/// fails to parse.
pub fn load_from_env() -> Result<Config> {
    let backend = optional_env::<DatabaseBackend>("QRGEN_DB_BACKEND")?;
    let path = std::env::var("QRGEN_DB_PATH").ok();
    if backend.is_none() && path.is_none() {
        return Err(QrGenError::Config(
            "Missing required environment variable: QRGEN_DB_BACKEND or QRGEN_DB_PATH".into(),
        ));
    }

    let mut config = Config::default();

    if let Some(backend) = backend {
        config.database.backend = backend;
    }
    if let Some(path) = path {
        config.database.path = path;
    }
    config.database.url = std::env::var("QRGEN_DB_URL").ok().or(config.database.url);
    if let Some(pool_size) = optional_env::<u32>("QRGEN_DB_POOL_SIZE")? {
        config.database.pool_size = pool_size;
    }

    if let Some(interval) = optional_env::<u64>("QRGEN_JOBS_POLL_INTERVAL")? {
        config.jobs.poll_interval_seconds = interval;
    }
    if let Some(interval) = optional_env::<u64>("QRGEN_WEBHOOKS_POLL_INTERVAL")? {
        config.webhooks.poll_interval_seconds = interval;
    }
    if let Some(batch_size) = optional_env::<usize>("QRGEN_WEBHOOKS_BATCH_SIZE")? {
        config.webhooks.batch_size = batch_size;
    }

    if let Ok(level) = std::env::var("QRGEN_LOG_LEVEL") {
        config.logging.level = level;
    }
    config.logging.json = env_bool("QRGEN_LOG_JSON", config.logging.json);

    validate(&config)?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `QrGenError::Config` if the file is missing, unreadable or
/// invalid.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(QrGenError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            QrGenError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| QrGenError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| QrGenError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| QrGenError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(QrGenError::Config(format!("Unsupported config format: {extension}"))),
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.database.backend == DatabaseBackend::Postgres && config.database.url.is_none() {
        return Err(QrGenError::Config("postgres backend requires a database url".into()));
    }
    if config.database.pool_size == 0 {
        return Err(QrGenError::Config("database pool size must be positive".into()));
    }
    if config.webhooks.batch_size == 0 {
        return Err(QrGenError::Config("webhook batch size must be positive".into()));
    }
    if config.jobs.stale_after_ms <= config.jobs.processing_timeout_ms {
        return Err(QrGenError::Config(
            "jobs.stale_after_ms must exceed jobs.processing_timeout_ms".into(),
        ));
    }
    if config.webhooks.stale_after_ms <= config.webhooks.request_timeout_ms {
        return Err(QrGenError::Config(
            "webhooks.stale_after_ms must exceed webhooks.request_timeout_ms".into(),
        ));
    }
    Ok(())
}

/// Probe the standard locations for a config file
///
/// Returns the first file that exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots.iter().flat_map(|root| candidates_in(root)).find(|path| path.exists())
}

fn candidates_in(root: &Path) -> Vec<PathBuf> {
    ["config", APP_NAME]
        .iter()
        .flat_map(|stem| CONFIG_EXTENSIONS.iter().map(move |ext| root.join(format!("{stem}.{ext}"))))
        .collect()
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| QrGenError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::{Builder, TempDir};

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const ENV_KEYS: [&str; 9] = [
        "QRGEN_DB_BACKEND",
        "QRGEN_DB_PATH",
        "QRGEN_DB_URL",
        "QRGEN_DB_POOL_SIZE",
        "QRGEN_JOBS_POLL_INTERVAL",
        "QRGEN_WEBHOOKS_POLL_INTERVAL",
        "QRGEN_WEBHOOKS_BATCH_SIZE",
        "QRGEN_LOG_LEVEL",
        "QRGEN_LOG_JSON",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for value in ["1", "true", "yes", "on", "TRUE"] {
            std::env::set_var("QRGEN_TEST_BOOL", value);
            assert!(env_bool("QRGEN_TEST_BOOL", false), "{value} should be true");
        }
        for value in ["0", "false", "no", "off"] {
            std::env::set_var("QRGEN_TEST_BOOL", value);
            assert!(!env_bool("QRGEN_TEST_BOOL", true), "{value} should be false");
        }

        std::env::remove_var("QRGEN_TEST_BOOL");
        assert!(env_bool("QRGEN_TEST_BOOL", true));
        assert!(!env_bool("QRGEN_TEST_BOOL", false));
    }

    #[test]
    fn load_from_env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("QRGEN_DB_PATH", "/tmp/qrgen-test.db");
        std::env::set_var("QRGEN_DB_POOL_SIZE", "3");
        std::env::set_var("QRGEN_JOBS_POLL_INTERVAL", "2");
        std::env::set_var("QRGEN_WEBHOOKS_BATCH_SIZE", "25");
        std::env::set_var("QRGEN_LOG_JSON", "yes");

        let config = load_from_env().expect("config from env");
        clear_env();

        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert_eq!(config.database.path, "/tmp/qrgen-test.db");
        assert_eq!(config.database.pool_size, 3);
        assert_eq!(config.jobs.poll_interval_seconds, 2);
        assert_eq!(config.webhooks.batch_size, 25);
        assert_eq!(config.webhooks.poll_interval_seconds, 10);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_from_env_requires_anchor_variable() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        let err = load_from_env().unwrap_err();
        assert!(matches!(err, QrGenError::Config(msg) if msg.contains("QRGEN_DB_BACKEND")));
    }

    #[test]
    fn load_from_env_rejects_invalid_number() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("QRGEN_DB_PATH", "/tmp/qrgen-test.db");
        std::env::set_var("QRGEN_DB_POOL_SIZE", "lots");

        let result = load_from_env();
        clear_env();

        assert!(matches!(result, Err(QrGenError::Config(msg)) if msg.contains("QRGEN_DB_POOL_SIZE")));
    }

    #[test]
    fn load_surfaces_invalid_env_instead_of_falling_back() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("QRGEN_DB_PATH", "/tmp/qrgen-test.db");
        std::env::set_var("QRGEN_WEBHOOKS_BATCH_SIZE", "-1");

        let result = load();
        clear_env();

        assert!(matches!(result, Err(QrGenError::Config(_))));
    }

    #[test]
    fn postgres_backend_requires_url() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("QRGEN_DB_BACKEND", "postgres");
        assert!(matches!(load_from_env(), Err(QrGenError::Config(_))));

        std::env::set_var("QRGEN_DB_URL", "postgres://qrgen@localhost/qrgen");
        let config = load_from_env().expect("config with url");
        clear_env();

        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
        assert_eq!(config.database.url.as_deref(), Some("postgres://qrgen@localhost/qrgen"));
    }

    #[test]
    fn load_from_file_toml_with_partial_sections() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "data/qrgen.db"

[resilience]
max_retries = 5
failure_threshold = 3

[webhooks]
batch_size = 4
"#
        )
        .unwrap();

        let config = load_from_file(Some(file.path().to_path_buf())).expect("toml config");

        assert_eq!(config.database.path, "data/qrgen.db");
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.resilience.max_retries, 5);
        assert_eq!(config.resilience.failure_threshold, 3);
        assert_eq!(config.resilience.timeout_ms, 30_000);
        assert_eq!(config.webhooks.batch_size, 4);
        assert!(config.jobs.enabled);
    }

    #[test]
    fn load_from_file_json() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"jobs": {{"drain_limit": 20}}, "logging": {{"level": "debug"}}}}"#)
            .unwrap();

        let config = load_from_file(Some(file.path().to_path_buf())).expect("json config");

        assert_eq!(config.jobs.drain_limit, 20);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn load_from_file_rejects_bad_input() {
        let missing = load_from_file(Some(PathBuf::from("/definitely/not/here.toml")));
        assert!(matches!(missing, Err(QrGenError::Config(msg)) if msg.contains("not found")));

        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "database: {{}}").unwrap();
        let unsupported = load_from_file(Some(file.path().to_path_buf()));
        assert!(matches!(unsupported, Err(QrGenError::Config(msg)) if msg.contains("yaml")));

        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{not json").unwrap();
        let invalid = load_from_file(Some(file.path().to_path_buf()));
        assert!(matches!(invalid, Err(QrGenError::Config(msg)) if msg.contains("JSON")));
    }

    #[test]
    fn stale_window_must_outlast_the_timeouts() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[jobs]\nprocessing_timeout_ms = 60000\nstale_after_ms = 60000").unwrap();
        let jobs = load_from_file(Some(file.path().to_path_buf()));
        assert!(matches!(jobs, Err(QrGenError::Config(msg)) if msg.contains("jobs.stale_after_ms")));

        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[webhooks]\nstale_after_ms = 1000").unwrap();
        let webhooks = load_from_file(Some(file.path().to_path_buf()));
        assert!(
            matches!(webhooks, Err(QrGenError::Config(msg)) if msg.contains("webhooks.stale_after_ms"))
        );
    }

    #[test]
    fn candidates_prefer_config_then_app_name() {
        let dir = TempDir::new().unwrap();
        let names: Vec<_> = candidates_in(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["config.json", "config.toml", "qrgen.json", "qrgen.toml"]);
    }
}
