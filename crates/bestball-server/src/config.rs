// Configuration loading and validation (config/engine.toml).

use std::path::{Path, PathBuf};

use bestball_engine::draft::room::MAX_PICK_SECONDS;
use bestball_engine::supervisor::EngineSettings;
use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_port: u16,
    /// Resolved SQLite path.
    pub db_path: PathBuf,
    /// Defaults for rooms opened without explicit settings.
    pub draft: DraftDefaults,
    pub policy: PolicyConfig,
    /// Resolved path of the player pool CSV.
    pub players_csv: PathBuf,
    pub log_stdout: bool,
}

impl Config {
    /// Supervisor settings derived from the policy section.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            missed_picks_before_autodraft: self.policy.missed_picks_before_autodraft,
            ..EngineSettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DraftDefaults {
    pub pick_seconds: u64,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PolicyConfig {
    /// Consecutive missed picks before autodraft is switched on. Omit to
    /// disable.
    #[serde(default)]
    pub missed_picks_before_autodraft: Option<u32>,
}

// ---------------------------------------------------------------------------
// engine.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct EngineFile {
    server: ServerSection,
    database: DatabaseSection,
    draft: DraftDefaults,
    #[serde(default)]
    policy: PolicyConfig,
    pool: PoolSection,
    #[serde(default)]
    log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PoolSection {
    players_csv: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LogSection {
    #[serde(default)]
    stdout: bool,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/engine.toml` relative to `base_dir`.
///
/// Does not copy defaults; prefer `load_config()`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("engine.toml");
    let text = read_file(&path)?;
    let file: EngineFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        ws_port: file.server.port,
        db_path: resolve_data_path(base_dir, &file.database.path),
        draft: file.draft,
        policy: file.policy,
        players_csv: base_dir.join(&file.pool.players_csv),
        log_stdout: file.log.stdout,
    };

    validate(&config, &file.database.path)?;
    Ok(config)
}

/// Copy any file in `defaults/` that is missing from `config/`. Returns the
/// files that were copied. `.example` files are skipped.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the server crate or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let source = entry.path();
        if !source.is_file() {
            continue;
        }
        let Some(file_name) = source.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }

        let target = config_dir.join(file_name);
        if target.exists() {
            continue;
        }
        std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
        })?;
        copied.push(target);
    }

    Ok(copied)
}

/// Load config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

/// Absolute paths and ":memory:" are used as-is. A relative path is taken
/// relative to `base_dir` when its parent directory exists there, and
/// otherwise placed in the platform data directory.
fn resolve_data_path(base_dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if raw == ":memory:" || path.is_absolute() {
        return path.to_path_buf();
    }

    let local = base_dir.join(path);
    if local.parent().is_some_and(|p| p.exists()) {
        return local;
    }

    match directories::ProjectDirs::from("", "", "bestball") {
        Some(dirs) => dirs.data_dir().join(path),
        None => local,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config, raw_db_path: &str) -> Result<(), ConfigError> {
    if config.ws_port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if raw_db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.draft.pick_seconds == 0 {
        return Err(ConfigError::ValidationError {
            field: "draft.pick_seconds".into(),
            message: "must be greater than 0".into(),
        });
    }
    if config.draft.pick_seconds > MAX_PICK_SECONDS {
        return Err(ConfigError::ValidationError {
            field: "draft.pick_seconds".into(),
            message: format!("must be at most {MAX_PICK_SECONDS}"),
        });
    }

    if config.draft.total_rounds == 0 {
        return Err(ConfigError::ValidationError {
            field: "draft.total_rounds".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.policy.missed_picks_before_autodraft == Some(0) {
        return Err(ConfigError::ValidationError {
            field: "policy.missed_picks_before_autodraft".into(),
            message: "must be at least 1, or omitted to disable".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Path to the server crate root (works from the crate or the workspace
    /// root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/bestball-server/defaults").exists() {
            cwd.join("crates/bestball-server")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Fresh temp dir containing `config/engine.toml` with `body`.
    fn write_config(name: &str, body: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/engine.toml"), body).unwrap();
        tmp
    }

    const VALID: &str = r#"
[server]
port = 9100

[database]
path = "bestball.db"

[draft]
pick_seconds = 30
total_rounds = 18

[policy]
missed_picks_before_autodraft = 2

[pool]
players_csv = "data/players.csv"
"#;

    #[test]
    fn load_valid_config_from_project_files() {
        let root = project_root();
        let tmp = std::env::temp_dir().join("bestball_config_project_files");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(root.join("defaults/engine.toml"), tmp.join("defaults/engine.toml")).unwrap();

        ensure_config_files(&tmp).expect("should copy default config");
        let config = load_config_from(&tmp).expect("should load valid config");

        assert!(config.ws_port > 0);
        assert_eq!(config.draft.pick_seconds, 30);
        assert_eq!(config.draft.total_rounds, 3);
        assert_eq!(config.policy.missed_picks_before_autodraft, Some(2));
        assert!(config.players_csv.ends_with("data/players.csv"));
        assert!(!config.log_stdout);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn shipped_player_pool_fills_default_rooms() {
        let root = project_root();
        let players =
            bestball_engine::pool::load_players_csv(&root.join("data/players.csv")).unwrap();
        assert!(players.len() >= 24);
    }

    #[test]
    fn policy_section_is_optional() {
        let body = VALID.replace("[policy]\nmissed_picks_before_autodraft = 2\n", "");
        let tmp = write_config("bestball_config_no_policy", &body);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.policy.missed_picks_before_autodraft, None);
        assert_eq!(config.engine_settings(), EngineSettings::default());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn engine_settings_carry_policy() {
        let tmp = write_config("bestball_config_settings", VALID);
        let settings = load_config_from(&tmp).unwrap().engine_settings();
        assert_eq!(settings.missed_picks_before_autodraft, Some(2));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn relative_db_path_resolves_under_base_dir() {
        let tmp = write_config("bestball_config_db_path", VALID);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.db_path, tmp.join("bestball.db"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn memory_db_path_is_kept() {
        let body = VALID.replace("bestball.db", ":memory:");
        let tmp = write_config("bestball_config_memory_db", &body);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.db_path, PathBuf::from(":memory:"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn log_stdout_is_read() {
        let body = format!("{VALID}\n[log]\nstdout = true\n");
        let tmp = write_config("bestball_config_log", &body);
        assert!(load_config_from(&tmp).unwrap().log_stdout);
        let _ = fs::remove_dir_all(&tmp);
    }

    fn expect_validation(name: &str, body: &str, expected_field: &str) {
        let tmp = write_config(name, body);
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, expected_field),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_rounds() {
        expect_validation(
            "bestball_config_zero_rounds",
            &VALID.replace("total_rounds = 18", "total_rounds = 0"),
            "draft.total_rounds",
        );
    }

    #[test]
    fn rejects_zero_pick_seconds() {
        expect_validation(
            "bestball_config_zero_seconds",
            &VALID.replace("pick_seconds = 30", "pick_seconds = 0"),
            "draft.pick_seconds",
        );
    }

    #[test]
    fn rejects_pick_seconds_past_one_day() {
        expect_validation(
            "bestball_config_huge_seconds",
            &VALID.replace("pick_seconds = 30", "pick_seconds = 10000000000000"),
            "draft.pick_seconds",
        );
    }

    #[test]
    fn rejects_zero_port() {
        expect_validation(
            "bestball_config_zero_port",
            &VALID.replace("port = 9100", "port = 0"),
            "server.port",
        );
    }

    #[test]
    fn rejects_zero_missed_pick_threshold() {
        expect_validation(
            "bestball_config_zero_threshold",
            &VALID.replace(
                "missed_picks_before_autodraft = 2",
                "missed_picks_before_autodraft = 0",
            ),
            "policy.missed_picks_before_autodraft",
        );
    }

    #[test]
    fn rejects_empty_db_path() {
        expect_validation(
            "bestball_config_empty_db",
            &VALID.replace("\"bestball.db\"", "\"\""),
            "database.path",
        );
    }

    #[test]
    fn file_not_found_for_missing_engine_toml() {
        let tmp = std::env::temp_dir().join("bestball_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        match load_config_from(&tmp).unwrap_err() {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("config/engine.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = write_config("bestball_config_bad_toml", "[server\nport = ");
        assert!(matches!(
            load_config_from(&tmp).unwrap_err(),
            ConfigError::ParseError { .. }
        ));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_and_skips_existing() {
        let tmp = std::env::temp_dir().join("bestball_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/engine.toml"), VALID).unwrap();
        fs::write(tmp.join("defaults/extra.toml"), "# extra\n").unwrap();
        fs::write(tmp.join("defaults/engine.toml.example"), "# example\n").unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/extra.toml"), "# custom\n").unwrap();

        let copied = ensure_config_files(&tmp).unwrap();
        assert_eq!(copied.len(), 1);
        assert!(copied[0].ends_with("engine.toml"));
        assert!(!tmp.join("config/engine.toml.example").exists());
        assert_eq!(
            fs::read_to_string(tmp.join("config/extra.toml")).unwrap(),
            "# custom\n"
        );

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("bestball_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match ensure_config_files(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("neither defaults/ nor config/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }
}
