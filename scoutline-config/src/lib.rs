//! Configuration library for Scoutline.
//!
//! Settings come from the process environment, optionally seeded from a
//! `.env` file. Durations accept human-readable values such as `3s` or `24h`.
//! Missing required keys and malformed values are reported as
//! [`ConfigLoadError`] and are fatal at startup.

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod util;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{
    Config, DatabaseConfig, ExecutorConfig, PipelineConfig, QueueConfig, RedisConfig,
    ServerConfig, sources::EnvConfig,
};
