//! TOML-backed configuration, grouped the way the teacher groups its config
//! sections (identity/memory/autonomy/...) — here: store/queue/server.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskFlowError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub workers: usize,
    pub max_concurrent: usize,
    pub task_timeout_ms: u64,
    pub stall_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 50,
            max_concurrent: 50,
            task_timeout_ms: 30_000,
            stall_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFlowConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskflow")
}

impl TaskFlowConfig {
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Load from the default path, falling back to defaults if it doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| TaskFlowError::Fatal(format!("failed to parse config: {e}")))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TaskFlowError::Fatal(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `TASKFLOW_*` environment variables onto an already-loaded config.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("TASKFLOW_DATA_DIR") {
            self.store.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TASKFLOW_RETENTION_DAYS")
            && let Ok(n) = v.parse()
        {
            self.store.retention_days = n;
        }
        if let Ok(v) = std::env::var("TASKFLOW_WORKERS")
            && let Ok(n) = v.parse()
        {
            self.queue.workers = n;
        }
        if let Ok(v) = std::env::var("TASKFLOW_MAX_CONCURRENT")
            && let Ok(n) = v.parse()
        {
            self.queue.max_concurrent = n;
        }
        if let Ok(v) = std::env::var("TASKFLOW_TASK_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.queue.task_timeout_ms = n;
        }
        if let Ok(v) = std::env::var("TASKFLOW_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("TASKFLOW_PORT")
            && let Ok(n) = v.parse()
        {
            self.server.port = n;
        }
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.store.data_dir.join("queue.db")
    }
}
