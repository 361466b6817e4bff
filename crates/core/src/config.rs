// crates/core/src/config.rs
//! Pipeline configuration.
//!
//! Built once at startup: defaults, then the TOML file named by
//! `MESHLINE_CONFIG` (if any), then `MESHLINE_*` environment variables.
//! The result is handed to the store, supervisor and gateway constructors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::job::Stage;

pub const CONFIG_PATH_ENV: &str = "MESHLINE_CONFIG";
pub const JOBS_ROOT_ENV: &str = "MESHLINE_JOBS_ROOT";

/// External program a worker runs for each claimed job of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StageRuntime {
    /// Program followed by its arguments; the job directory is appended.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    /// Port for the worker's own Prometheus scrape endpoint.
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_upload_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub jobs_root: PathBuf,
    pub poll_interval_secs: f64,
    pub wait_poll_interval_secs: f64,
    pub wait_timeout_secs: u64,
    pub spawn_workers: bool,
    pub worker_binary: Option<PathBuf>,
    pub stop_timeout_secs: u64,
    pub server: ServerConfig,
    /// Keyed by stage name (`segmentation`, `reconstruction`, `conversion`).
    pub stages: BTreeMap<String, StageRuntime>,
    /// Absolute path of the TOML file this config was read from.
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jobs_root: PathBuf::from("jobs"),
            poll_interval_secs: 1.0,
            wait_poll_interval_secs: 0.5,
            wait_timeout_secs: 3600,
            spawn_workers: true,
            worker_binary: None,
            stop_timeout_secs: 10,
            server: ServerConfig::default(),
            stages: BTreeMap::new(),
            config_file: None,
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    ///
    /// Relative paths (`jobs_root`, the config file) are resolved against
    /// the current directory here, once, so child processes started in
    /// another directory see the same locations.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => {
                let path = absolutize(Path::new(&path))?;
                let mut config = Self::from_file(&path)?;
                config.config_file = Some(path);
                config
            }
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.jobs_root = absolutize(&config.jobs_root)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup(JOBS_ROOT_ENV) {
            self.jobs_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("MESHLINE_POLL_SECONDS") {
            self.poll_interval_secs = parse("MESHLINE_POLL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("MESHLINE_WAIT_POLL_SECONDS") {
            self.wait_poll_interval_secs = parse("MESHLINE_WAIT_POLL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("MESHLINE_WAIT_TIMEOUT_SECS") {
            self.wait_timeout_secs = parse("MESHLINE_WAIT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MESHLINE_SPAWN_WORKERS") {
            self.spawn_workers = parse_bool("MESHLINE_SPAWN_WORKERS", &v)?;
        }
        if let Some(v) = lookup("MESHLINE_WORKER_BIN") {
            self.worker_binary = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MESHLINE_STOP_TIMEOUT_SECS") {
            self.stop_timeout_secs = parse("MESHLINE_STOP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("MESHLINE_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("MESHLINE_PORT") {
            self.server.port = parse("MESHLINE_PORT", &v)?;
        }
        if let Some(v) = lookup("MESHLINE_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse("MESHLINE_MAX_UPLOAD_BYTES", &v)?;
        }
        for stage in Stage::ALL {
            let key = format!("MESHLINE_{}_COMMAND", stage.as_str().to_uppercase());
            if let Some(v) = lookup(&key) {
                self.stages.entry(stage.as_str().to_string()).or_default().command =
                    v.split_whitespace().map(str::to_owned).collect();
            }
            let key = format!("MESHLINE_{}_METRICS_PORT", stage.as_str().to_uppercase());
            if let Some(v) = lookup(&key) {
                self.stages.entry(stage.as_str().to_string()).or_default().metrics_port =
                    Some(parse(&key, &v)?);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = self.stages.keys().find(|k| k.parse::<Stage>().is_err()) {
            return Err(ConfigError::InvalidValue {
                key: "stages".into(),
                value: name.clone(),
            });
        }
        for (key, secs) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("wait_poll_interval_secs", self.wait_poll_interval_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    value: secs.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.wait_poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Runtime for `stage`; errors if no command is configured.
    pub fn stage_runtime(&self, stage: Stage) -> Result<&StageRuntime, ConfigError> {
        self.stages
            .get(stage.as_str())
            .filter(|r| !r.command.is_empty())
            .ok_or(ConfigError::MissingCommand(stage))
    }

    /// Environment a child worker needs to open the same store and config
    /// regardless of its working directory.
    pub fn worker_env(&self) -> BTreeMap<String, String> {
        let jobs_root = std::path::absolute(&self.jobs_root).unwrap_or_else(|_| self.jobs_root.clone());
        let mut env = BTreeMap::new();
        env.insert(JOBS_ROOT_ENV.to_string(), jobs_root.to_string_lossy().into_owned());
        if let Some(path) = &self.config_file {
            env.insert(CONFIG_PATH_ENV.to_string(), path.to_string_lossy().into_owned());
        }
        env
    }

    /// `worker_binary`, or `meshline-worker` next to the running executable.
    pub fn worker_binary(&self) -> PathBuf {
        if let Some(path) = &self.worker_binary {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("meshline-worker")))
            .unwrap_or_else(|| PathBuf::from("meshline-worker"))
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|source| ConfigError::Resolve {
        path: path.to_path_buf(),
        source,
    })
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.into(),
        value: value.into(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            value: value.into(),
        }),
    }
}
