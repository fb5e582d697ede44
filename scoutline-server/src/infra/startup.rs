use std::sync::Arc;

use anyhow::{Context, Result};
use scoutline_config::Config;
use scoutline_core::{
    Executor, ExecutorSettings, JobRegistry, PipelineGenerator, PipelineStore,
    PipelineStoreSettings, RegistrySettings,
    records::PostgresJobRecords,
    store::RedisPipelineCache,
    tools::ToolRegistry,
};
use tracing::{info, warn};

/// Wire the registry against Postgres and Redis. Connections are lazy; the
/// first registration (or the recovery pass) establishes them.
pub fn build_registry(config: &Config) -> Result<JobRegistry> {
    let records = PostgresJobRecords::connect_lazy(&config.database.url, config.database.op_timeout)
        .context("failed to configure PostgreSQL pool")?;
    let cache = RedisPipelineCache::new(&config.redis.url)
        .context("failed to configure Redis client")?;

    let store = PipelineStore::new(
        Arc::new(cache),
        PipelineStoreSettings {
            namespace: config.pipeline.namespace.clone(),
            ttl: config.pipeline.ttl,
            op_timeout: config.redis.op_timeout,
            backoff_step: config.pipeline.retry_backoff,
        },
    );

    let tools = ToolRegistry::builtin(&config.executor.subfinder_bin);
    info!(tools = ?tools.names(), "tool adapters registered");

    let executor = Executor::new(
        store.clone(),
        Arc::new(tools),
        ExecutorSettings {
            load_attempts: config.pipeline.load_attempts,
            tool_timeout: config.executor.tool_timeout,
        },
    );

    Ok(JobRegistry::new(
        Arc::new(records),
        store,
        PipelineGenerator::default(),
        executor,
        RegistrySettings {
            record_timeout: config.database.op_timeout,
        },
    ))
}

/// Mark jobs left RUNNING by a previous process as FAILED. Failure here is
/// logged; the process still starts consuming.
pub async fn recover_orphans(registry: &JobRegistry) -> usize {
    match registry.recover_orphaned_jobs().await {
        Ok(recovered) => {
            if recovered.is_empty() {
                info!("no orphaned jobs found");
            } else {
                warn!(count = recovered.len(), jobs = ?recovered, "orphaned RUNNING jobs marked FAILED");
            }
            recovered.len()
        }
        Err(err) => {
            warn!(error = %err, "orphaned job recovery failed");
            0
        }
    }
}
