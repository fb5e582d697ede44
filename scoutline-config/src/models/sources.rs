use crate::util::non_empty;

/// Environment-derived configuration values, unparsed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub rabbitmq_url: Option<String>,
    pub job_queue: Option<String>,
    pub max_redeliveries: Option<String>,
    pub postgresql_url: Option<String>,
    pub redis_url: Option<String>,
    pub pipeline_namespace: Option<String>,
    pub pipeline_ttl: Option<String>,
    pub cache_op_timeout: Option<String>,
    pub record_op_timeout: Option<String>,
    pub pipeline_retry_backoff: Option<String>,
    pub pipeline_load_attempts: Option<String>,
    pub task_timeout_seconds: Option<String>,
    pub subfinder_bin: Option<String>,
    pub server_host: Option<String>,
    pub server_port: Option<String>,
    pub recover_on_start: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::gather_with(|key| std::env::var(key).ok())
    }

    /// Gather through an arbitrary lookup. Blank values count as unset.
    pub fn gather_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_empty(lookup(key));
        Self {
            rabbitmq_url: var("RABBITMQ_URL"),
            job_queue: var("ASM_RABBITMQ_JOB_QUEUE"),
            max_redeliveries: var("QUEUE_MAX_REDELIVERIES"),
            postgresql_url: var("POSTGRESQL_URL"),
            redis_url: var("REDIS_URL"),
            pipeline_namespace: var("PIPELINE_NAMESPACE"),
            pipeline_ttl: var("PIPELINE_TTL"),
            cache_op_timeout: var("CACHE_OP_TIMEOUT"),
            record_op_timeout: var("RECORD_OP_TIMEOUT"),
            pipeline_retry_backoff: var("PIPELINE_RETRY_BACKOFF"),
            pipeline_load_attempts: var("PIPELINE_LOAD_ATTEMPTS"),
            task_timeout_seconds: var("TASK_TIMEOUT_SECONDS"),
            subfinder_bin: var("SUBFINDER_BIN"),
            server_host: var("SERVER_HOST"),
            server_port: var("SERVER_PORT"),
            recover_on_start: var("RECOVER_ON_START"),
        }
    }
}
