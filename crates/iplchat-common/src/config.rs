//! Configuration loading (C9).
//!
//! The on-disk formats here are fixed, not a free choice of ecosystem
//! format: a `startup.conf` indirection file containing `configPath=...`,
//! and a flat line-oriented `key=value` config file. Both are hand-parsed
//! here rather than pulled in via the `config`/`toml` crates, because
//! neither speaks this format. The *shape* — a process-wide [`AppConfig`]
//! populated once at startup and fetched through a `OnceLock`-backed
//! [`init`]/[`get`] pair — mirrors the reference stack's config singleton.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed line {line_no} in {path}: {line:?}")]
    MalformedLine {
        path: PathBuf,
        line_no: usize,
        line: String,
    },
    #[error("invalid value for key {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`] or [`init_default`].
pub fn get() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("config not initialized — call iplchat_common::config::init() first")
}

/// Parse a `startup.conf` file, which points at the real config file via a
/// single `configPath=...` line.
pub fn read_startup_file(startup_path: &Path) -> Result<PathBuf, ConfigError> {
    let entries = parse_key_value_file(startup_path)?;
    let config_path = entries
        .get("configPath")
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "configPath",
            value: String::new(),
        })?;
    Ok(PathBuf::from(config_path))
}

/// Load the flat config file at `path` and install it as the global config.
/// Called once at process startup.
pub fn init(path: &Path) -> Result<&'static AppConfig, ConfigError> {
    let cfg = AppConfig::load(path)?;
    Ok(CONFIG.get_or_init(|| cfg))
}

/// Install an all-defaults config — used by tests, and by a quick-start run
/// with no config file at all.
pub fn init_default() -> &'static AppConfig {
    CONFIG.get_or_init(AppConfig::default)
}

/// Parse `key=value` lines, skipping blank lines and `#`-prefixed comments.
fn parse_key_value_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = HashMap::new();
    for (line_no, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::MalformedLine {
                path: path.to_path_buf(),
                line_no: line_no + 1,
                line: raw_line.to_string(),
            });
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

/// Process-wide configuration, plus the bind address — the default port
/// (4589) is fixed but host binding is read from the same file under an
/// additional `bindHost`/`bindPort` pair.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_host: String,
    pub bind_port: u16,

    /// Hours between automatic snapshots.
    pub snapshot_timeout_hours: u64,
    pub snapshot_path: PathBuf,
    /// Size of the snapshot ring before the oldest is evicted.
    pub snapshot_backlog: usize,

    pub database_path: PathBuf,
    pub database_name: String,
    /// Whether `get_channel` reads through the channel cache.
    pub database_buffered_access: bool,
    pub database_queue_size: usize,
    /// Minutes between automatic write-queue flushes.
    pub database_flush_timeout_minutes: u64,

    /// Rate-limit/throttling fields; no policy is enforced here (left to
    /// the implementer).
    pub random_rate_limit: bool,
    pub rate_limit_secs: u64,
    pub rate_limit_multiplier: f64,

    pub logfile_path: PathBuf,
    pub log_verbose: bool,
    pub autosave: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            bind_port: 4589,
            snapshot_timeout_hours: 24,
            snapshot_path: PathBuf::from("./snapshots"),
            snapshot_backlog: 10,
            database_path: PathBuf::from("./data"),
            database_name: "iplchat.db".into(),
            database_buffered_access: true,
            database_queue_size: 256,
            database_flush_timeout_minutes: 5,
            random_rate_limit: false,
            rate_limit_secs: 1,
            rate_limit_multiplier: 1.0,
            logfile_path: PathBuf::from("./iplchat.log"),
            log_verbose: false,
            autosave: true,
        }
    }
}

impl AppConfig {
    pub fn database_file(&self) -> PathBuf {
        self.database_path.join(&self.database_name)
    }

    /// Parse the flat `key=value` file at `path`, falling back to
    /// [`AppConfig::default`] for any key that is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let entries = parse_key_value_file(path)?;
        let mut cfg = AppConfig::default();

        macro_rules! set_str {
            ($key:literal, $field:ident) => {
                if let Some(v) = entries.get($key) {
                    cfg.$field = v.clone();
                }
            };
        }
        macro_rules! set_path {
            ($key:literal, $field:ident) => {
                if let Some(v) = entries.get($key) {
                    cfg.$field = PathBuf::from(v);
                }
            };
        }
        macro_rules! set_num {
            ($key:literal, $field:ident) => {
                if let Some(v) = entries.get($key) {
                    cfg.$field = parse_num($key, v)?;
                }
            };
        }
        macro_rules! set_bool {
            ($key:literal, $field:ident) => {
                if let Some(v) = entries.get($key) {
                    cfg.$field = parse_bool($key, v)?;
                }
            };
        }

        set_str!("bindHost", bind_host);
        set_num!("bindPort", bind_port);
        set_num!("snapshotTimeout", snapshot_timeout_hours);
        set_path!("snapshotPath", snapshot_path);
        set_num!("snapshotBacklog", snapshot_backlog);
        set_path!("databasePath", database_path);
        set_str!("databaseName", database_name);
        set_bool!("databaseBufferedAccess", database_buffered_access);
        set_num!("databaseQueueSize", database_queue_size);
        set_num!("databaseFlushTimeout", database_flush_timeout_minutes);
        set_bool!("randomRateLimit", random_rate_limit);
        set_num!("rateLimit", rate_limit_secs);
        set_num!("rateLimitMultiplier", rate_limit_multiplier);
        set_path!("logfilePath", logfile_path);
        set_bool!("logVerbose", log_verbose);
        set_bool!("autosave", autosave);

        Ok(cfg)
    }

    /// Serialize back to the flat `key=value` format, for the admin
    /// console's `config` command and for writing a fresh file when an
    /// operator completes interactive configuration.
    pub fn to_key_value(&self) -> String {
        format!(
            "bindHost={}\nbindPort={}\nsnapshotTimeout={}\nsnapshotPath={}\nsnapshotBacklog={}\ndatabasePath={}\ndatabaseName={}\ndatabaseBufferedAccess={}\ndatabaseQueueSize={}\ndatabaseFlushTimeout={}\nrandomRateLimit={}\nrateLimit={}\nrateLimitMultiplier={}\nlogfilePath={}\nlogVerbose={}\nautosave={}\n",
            self.bind_host,
            self.bind_port,
            self.snapshot_timeout_hours,
            self.snapshot_path.display(),
            self.snapshot_backlog,
            self.database_path.display(),
            self.database_name,
            self.database_buffered_access,
            self.database_queue_size,
            self.database_flush_timeout_minutes,
            self.random_rate_limit,
            self.rate_limit_secs,
            self.rate_limit_multiplier,
            self.logfile_path.display(),
            self.log_verbose,
            self.autosave,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_recognized_keys_and_defaults_the_rest() {
        let mut tmp = tempfile_with_contents(
            "snapshotPath=/var/iplchat/snapshots\nsnapshotBacklog=5\ndatabaseFlushTimeout=10\nlogVerbose=true\n# a comment\n\ndatabaseName=chat.db\n",
        );
        let cfg = AppConfig::load(tmp.path()).unwrap();
        assert_eq!(cfg.snapshot_path, PathBuf::from("/var/iplchat/snapshots"));
        assert_eq!(cfg.snapshot_backlog, 5);
        assert_eq!(cfg.database_flush_timeout_minutes, 10);
        assert!(cfg.log_verbose);
        assert_eq!(cfg.database_name, "chat.db");
        // Unset keys keep their defaults.
        assert_eq!(cfg.bind_port, 4589);
        tmp.flush().unwrap();
    }

    #[test]
    fn malformed_line_is_rejected() {
        let tmp = tempfile_with_contents("not_a_key_value_line\n");
        assert!(AppConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn startup_file_points_at_config_path() {
        let tmp = tempfile_with_contents("configPath=/etc/iplchat/server.conf\n");
        let resolved = read_startup_file(tmp.path()).unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/iplchat/server.conf"));
    }

    fn tempfile_with_contents(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }
}
