use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::language::Language;

#[derive(Parser)]
#[command(name = "judger", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c', env = "JUDGER_CONFIG")]
    pub config_path: Option<String>,

    /// Consume the job queue, or judge synchronously over HTTP
    #[arg(long, value_enum, env = "JUDGER_MODE", default_value_t = Mode::Worker)]
    pub mode: Mode,

    /// Number of concurrent workers, overrides the configuration file
    #[arg(long = "workers", short = 'w', env = "WORKER_CONCURRENCY")]
    pub workers: Option<usize>,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file, or defaults without one
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };

        if let Some(workers) = self.workers {
            config.worker.concurrency = workers;
        }
        if config.worker.concurrency == 0 {
            anyhow::bail!("the number of workers must not be 0");
        }

        Ok(config)
    }
}

#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Pull jobs from the durable queue
    Worker,
    /// Judge each HTTP request in place
    Sync,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Sync => "sync",
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// SQLite file, defaults to the platform data directory
    pub database: Option<PathBuf>,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// How long an active job stays owned without a heartbeat
    pub lease_secs: u64,
    pub stall_check_interval_secs: u64,
    /// Upper bound on how long an idle worker sleeps between claim attempts
    pub poll_interval_ms: u64,
    pub prune_interval_secs: u64,
    pub retention: RetentionConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            lease_secs: 60,
            stall_check_interval_secs: 30,
            poll_interval_ms: 500,
            prune_interval_secs: 600,
            retention: RetentionConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub completed_count: Option<u32>,
    pub completed_age_secs: Option<u64>,
    pub failed_count: Option<u32>,
    pub failed_age_secs: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_count: Some(1000),
            completed_age_secs: Some(24 * 3600),
            failed_count: Some(5000),
            failed_age_secs: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub rate_limit: RateLimitConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Job starts allowed inside one window
    pub max: usize,
    pub duration_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 10,
            duration_ms: 1000,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Docker daemon socket, the platform default when absent
    pub docker_socket: Option<String>,
    /// Root under which each judge run gets its own directory
    pub work_dir: Option<PathBuf>,
    /// Same root as seen by the daemon, when this process runs in a container
    pub host_work_dir: Option<PathBuf>,
    pub images: HashMap<Language, String>,
    pub user: String,
    pub cpu_limit: f64,
    pub pids_limit: i64,
    pub compile_timeout_secs: u64,
    pub compile_memory_limit_mb: u64,
    pub compile_pids_limit: i64,
    /// Grace added on top of the time limit before the host kills an instance
    pub safety_margin_secs: f64,
    pub memory_poll_interval_ms: u64,
    /// Cap on captured stdout and stderr, in bytes
    pub output_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_socket: None,
            work_dir: None,
            host_work_dir: None,
            images: HashMap::new(),
            user: "65534:65534".to_string(),
            cpu_limit: 1.0,
            pids_limit: 64,
            compile_timeout_secs: 30,
            compile_memory_limit_mb: 512,
            compile_pids_limit: 128,
            safety_margin_secs: 5.0,
            memory_poll_interval_ms: 50,
            output_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    pub fn image_for(&self, language: Language) -> &str {
        self.images
            .get(&language)
            .map(String::as_str)
            .unwrap_or_else(|| language.default_image())
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn memory_poll_interval(&self) -> Duration {
        Duration::from_millis(self.memory_poll_interval_ms.max(1))
    }

    /// Configured work root, or `runs` under the platform cache directory
    pub fn work_root(&self) -> anyhow::Result<PathBuf> {
        let root = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => directories::ProjectDirs::from("", "", "judger")
                .ok_or_else(|| anyhow::anyhow!("unable to find user cache directory"))?
                .cache_dir()
                .join("runs"),
        };
        std::fs::create_dir_all(&root)?;
        Ok(root)
    }
}
