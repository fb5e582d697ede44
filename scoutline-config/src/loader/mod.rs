pub mod error;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::models::sources::EnvConfig;
use crate::models::{
    Config, DEFAULT_JOB_QUEUE, DEFAULT_PIPELINE_NAMESPACE, DEFAULT_REDIS_URL,
    DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, DatabaseConfig, ExecutorConfig, PipelineConfig,
    QueueConfig, RedisConfig, ServerConfig,
};
use crate::util::parse_bool;

use self::error::ConfigLoadError;

#[derive(Debug, Clone)]
pub struct ConfigLoaderOptions {
    /// Explicit `.env` path. Unlike the implicit lookup, a missing file is an error.
    pub env_file: Option<PathBuf>,
    /// Search the working directory for `.env` when no explicit file is given.
    pub load_dotenv: bool,
}

impl Default for ConfigLoaderOptions {
    fn default() -> Self {
        Self {
            env_file: None,
            load_dotenv: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub env_file_loaded: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    /// Seed the environment from `.env` (existing variables win), then resolve.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        let config = resolve(EnvConfig::gather())?;
        Ok(ConfigLoad {
            config,
            env_file_loaded,
        })
    }

    fn load_env_file(&self) -> Result<Option<PathBuf>, ConfigLoadError> {
        if let Some(path) = &self.options.env_file {
            dotenvy::from_path(path).map_err(|source| ConfigLoadError::EnvFile {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "loaded env file");
            return Ok(Some(path.clone()));
        }

        if !self.options.load_dotenv {
            return Ok(None);
        }

        match dotenvy::dotenv() {
            Ok(path) => {
                debug!(path = %path.display(), "loaded .env");
                Ok(Some(path))
            }
            Err(err) if err.not_found() => Ok(None),
            Err(source) => Err(ConfigLoadError::EnvFile {
                path: PathBuf::from(".env"),
                source,
            }),
        }
    }
}

/// Build a [`Config`] from gathered values, applying defaults.
pub fn resolve(env: EnvConfig) -> Result<Config, ConfigLoadError> {
    let queue = QueueConfig {
        url: required("RABBITMQ_URL", env.rabbitmq_url)?,
        name: env
            .job_queue
            .unwrap_or_else(|| DEFAULT_JOB_QUEUE.to_string()),
        max_redeliveries: env
            .max_redeliveries
            .map(|raw| parse_number::<u32>("QUEUE_MAX_REDELIVERIES", raw))
            .transpose()?,
    };

    let database = DatabaseConfig {
        url: required("POSTGRESQL_URL", env.postgresql_url)?,
        op_timeout: duration_or("RECORD_OP_TIMEOUT", env.record_op_timeout, 5)?,
    };

    let redis = RedisConfig {
        url: env
            .redis_url
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
        op_timeout: duration_or("CACHE_OP_TIMEOUT", env.cache_op_timeout, 3)?,
    };

    let load_attempts = match env.pipeline_load_attempts {
        Some(raw) => parse_number::<u32>("PIPELINE_LOAD_ATTEMPTS", raw)?,
        None => 3,
    };
    if load_attempts == 0 {
        return Err(ConfigLoadError::InvalidValue {
            key: "PIPELINE_LOAD_ATTEMPTS",
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    let pipeline = PipelineConfig {
        namespace: env
            .pipeline_namespace
            .unwrap_or_else(|| DEFAULT_PIPELINE_NAMESPACE.to_string()),
        ttl: duration_or("PIPELINE_TTL", env.pipeline_ttl, 24 * 60 * 60)?,
        retry_backoff: duration_or("PIPELINE_RETRY_BACKOFF", env.pipeline_retry_backoff, 1)?,
        load_attempts,
    };

    let tool_timeout = match env.task_timeout_seconds {
        Some(raw) => Duration::from_secs(parse_number::<u64>("TASK_TIMEOUT_SECONDS", raw)?),
        None => Duration::from_secs(900),
    };

    let executor = ExecutorConfig {
        tool_timeout,
        subfinder_bin: env
            .subfinder_bin
            .unwrap_or_else(|| "subfinder".to_string()),
    };

    let server = ServerConfig {
        host: env
            .server_host
            .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
        port: match env.server_port {
            Some(raw) => parse_number::<u16>("SERVER_PORT", raw)?,
            None => DEFAULT_SERVER_PORT,
        },
    };

    let recover_on_start = match env.recover_on_start {
        Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigLoadError::InvalidValue {
            key: "RECOVER_ON_START",
            value: raw.clone(),
            reason: "expected a boolean".into(),
        })?,
        None => true,
    };

    Ok(Config {
        queue,
        database,
        redis,
        pipeline,
        executor,
        server,
        recover_on_start,
    })
}

fn required(key: &'static str, value: Option<String>) -> Result<String, ConfigLoadError> {
    value.ok_or(ConfigLoadError::Missing { key })
}

fn parse_number<T>(key: &'static str, raw: String) -> Result<T, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| ConfigLoadError::InvalidValue {
            key,
            reason: err.to_string(),
            value: raw,
        })
}

fn duration_or(
    key: &'static str,
    raw: Option<String>,
    default_secs: u64,
) -> Result<Duration, ConfigLoadError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs(default_secs));
    };
    humantime::parse_duration(&raw).map_err(|source| ConfigLoadError::InvalidDuration {
        key,
        value: raw,
        source,
    })
}
