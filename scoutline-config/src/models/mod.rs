pub mod sources;

use std::time::Duration;

use crate::util::redact_url;

pub const DEFAULT_JOB_QUEUE: &str = "jobs.asm";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_PIPELINE_NAMESPACE: &str = "asm";
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8090;

#[derive(Debug, Clone)]
pub struct Config {
    pub queue: QueueConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub pipeline: PipelineConfig,
    pub executor: ExecutorConfig,
    pub server: ServerConfig,
    /// Reconcile orphaned RUNNING jobs before consuming.
    pub recover_on_start: bool,
}

impl Config {
    /// One-line description safe for logs.
    pub fn summary(&self) -> String {
        format!(
            "queue={} ({}) postgres={} redis={} namespace={} listen={}",
            self.queue.name,
            redact_url(&self.queue.url),
            redact_url(&self.database.url),
            redact_url(&self.redis.url),
            self.pipeline.namespace,
            self.server.bind_address(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    pub name: String,
    /// Reject a failing message once the broker has delivered it this often.
    pub max_redeliveries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub op_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub op_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub namespace: String,
    pub ttl: Duration,
    pub retry_backoff: Duration,
    pub load_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub tool_timeout: Duration,
    pub subfinder_bin: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
