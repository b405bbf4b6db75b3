//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FSMKIT_CONFIG or --config)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dedicated-thread actor configuration.
    pub actor: ActorConfig,
    /// Thread-pool actor configuration.
    pub pool: PoolConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FSMKIT_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.actor.apply_env_overrides();
        self.pool.apply_env_overrides();
    }

    /// Checks settings that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.actor.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Kind of command queue in front of a dedicated-thread actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// No capacity limit.
    Unbounded,
    /// Bounded; senders block until there is room.
    Blocking,
    /// Bounded; senders wait up to `send_timeout_ms`.
    Timeout,
    /// Bounded; senders fail immediately when full.
    NonBlocking,
}

/// Resolved queue behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Unbounded,
    Blocking { capacity: usize },
    Timeout { capacity: usize, timeout: Duration },
    NonBlocking { capacity: usize },
}

impl QueueMode {
    /// Capacity of the queue, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        match *self {
            QueueMode::Unbounded => None,
            QueueMode::Blocking { capacity }
            | QueueMode::Timeout { capacity, .. }
            | QueueMode::NonBlocking { capacity } => Some(capacity),
        }
    }
}

/// Dedicated-thread actor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    pub queue: QueueKind,
    /// Queue capacity for bounded kinds.
    pub capacity: usize,
    /// Send timeout for the `timeout` kind, in milliseconds.
    pub send_timeout_ms: u64,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            queue: QueueKind::Unbounded,
            capacity: 1024,
            send_timeout_ms: 100,
            thread_name: "fsmkit-actor".to_string(),
        }
    }
}

impl ActorConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(queue) = std::env::var("FSMKIT_ACTOR_QUEUE") {
            match queue.to_lowercase().as_str() {
                "unbounded" => self.queue = QueueKind::Unbounded,
                "blocking" => self.queue = QueueKind::Blocking,
                "timeout" => self.queue = QueueKind::Timeout,
                "non_blocking" | "nonblocking" => self.queue = QueueKind::NonBlocking,
                other => tracing::warn!(
                    "ignoring unknown FSMKIT_ACTOR_QUEUE '{}', keeping {:?}",
                    other,
                    self.queue
                ),
            }
        }

        if let Ok(capacity) = std::env::var("FSMKIT_ACTOR_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.capacity = n;
            }
        }

        if let Ok(timeout) = std::env::var("FSMKIT_ACTOR_SEND_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.send_timeout_ms = ms;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue != QueueKind::Unbounded && self.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "bounded actor queue needs a capacity above 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the send timeout as Duration.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn queue_mode(&self) -> QueueMode {
        let capacity = self.capacity.max(1);
        match self.queue {
            QueueKind::Unbounded => QueueMode::Unbounded,
            QueueKind::Blocking => QueueMode::Blocking { capacity },
            QueueKind::Timeout => QueueMode::Timeout {
                capacity,
                timeout: self.send_timeout(),
            },
            QueueKind::NonBlocking => QueueMode::NonBlocking { capacity },
        }
    }
}

/// Thread-pool actor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker threads of the shared pool (0 = one per CPU).
    pub threads: usize,
    /// Maximum not-yet-started commands per machine (0 = unlimited).
    pub backlog_capacity: usize,
}

impl PoolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(threads) = std::env::var("FSMKIT_POOL_THREADS") {
            if let Ok(n) = threads.parse() {
                self.threads = n;
            }
        }

        if let Ok(backlog) = std::env::var("FSMKIT_POOL_BACKLOG") {
            if let Ok(n) = backlog.parse() {
                self.backlog_capacity = n;
            }
        }
    }

    /// Returns the backlog bound, `None` when unlimited.
    pub fn backlog(&self) -> Option<usize> {
        (self.backlog_capacity > 0).then_some(self.backlog_capacity)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.actor.queue, QueueKind::Unbounded);
        assert_eq!(config.actor.queue_mode(), QueueMode::Unbounded);
        assert_eq!(config.actor.queue_mode().capacity(), None);
        assert_eq!(config.pool.backlog(), None);
    }

    #[test]
    fn test_queue_modes() {
        let actor = ActorConfig {
            queue: QueueKind::Timeout,
            capacity: 8,
            send_timeout_ms: 250,
            ..Default::default()
        };
        assert_eq!(
            actor.queue_mode(),
            QueueMode::Timeout {
                capacity: 8,
                timeout: Duration::from_millis(250)
            }
        );

        let actor = ActorConfig {
            queue: QueueKind::NonBlocking,
            capacity: 2,
            ..Default::default()
        };
        assert_eq!(actor.queue_mode().capacity(), Some(2));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fsmkit.yaml");

        let mut config = Config::default();
        config.actor.queue = QueueKind::Blocking;
        config.actor.capacity = 16;
        config.pool.threads = 3;
        config.pool.backlog_capacity = 64;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.actor.queue, QueueKind::Blocking);
        assert_eq!(loaded.actor.capacity, 16);
        assert_eq!(loaded.pool.threads, 3);
        assert_eq!(loaded.pool.backlog(), Some(64));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.yaml");
        std::fs::write(&path, "actor:\n  queue: non_blocking\n  capacity: 4\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.actor.queue, QueueKind::NonBlocking);
        assert_eq!(loaded.actor.thread_name, "fsmkit-actor");
        assert_eq!(loaded.pool.threads, 0);
    }

    #[test]
    fn test_invalid_files() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::IoError(..))
        ));

        let garbage = dir.path().join("garbage.yaml");
        std::fs::write(&garbage, "actor: [1, 2").unwrap();
        assert!(matches!(
            Config::from_file(&garbage),
            Err(ConfigError::ParseError(..))
        ));

        let zero = dir.path().join("zero.yaml");
        std::fs::write(&zero, "actor:\n  queue: blocking\n  capacity: 0\n").unwrap();
        let err = Config::from_file(&zero).unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    /// Serializes tests that touch process-wide environment variables.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn test_env_overrides() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("FSMKIT_POOL_BACKLOG", "32");
        std::env::set_var("FSMKIT_ACTOR_QUEUE", "non_blocking");
        let config = Config::from_env();
        std::env::remove_var("FSMKIT_POOL_BACKLOG");
        std::env::remove_var("FSMKIT_ACTOR_QUEUE");

        let config = config.unwrap();
        assert_eq!(config.pool.backlog(), Some(32));
        assert_eq!(config.actor.queue, QueueKind::NonBlocking);
    }

    #[test]
    fn test_unknown_env_queue_keeps_current() {
        let _env = ENV_LOCK.lock();
        std::env::set_var("FSMKIT_ACTOR_QUEUE", "nonblockng");
        let config = Config::from_env();
        std::env::remove_var("FSMKIT_ACTOR_QUEUE");

        assert_eq!(config.unwrap().actor.queue, QueueKind::Unbounded);
    }

    #[test]
    fn test_env_overrides_are_validated() {
        let _env = ENV_LOCK.lock();
        std::env::remove_var("FSMKIT_CONFIG");
        std::env::set_var("FSMKIT_ACTOR_QUEUE", "blocking");
        std::env::set_var("FSMKIT_ACTOR_CAPACITY", "0");
        let loaded = Config::load();
        let from_env = Config::from_env();
        std::env::remove_var("FSMKIT_ACTOR_QUEUE");
        std::env::remove_var("FSMKIT_ACTOR_CAPACITY");

        assert!(matches!(loaded, Err(ConfigError::ValidationError(_))));
        assert!(matches!(from_env, Err(ConfigError::ValidationError(_))));
    }
}
