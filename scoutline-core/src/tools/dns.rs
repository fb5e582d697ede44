use async_trait::async_trait;
use serde_json::{Value, json};
use std::{collections::BTreeSet, net::IpAddr};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ToolAdapter, ToolInput};
use crate::error::{OrchestratorError, Result};

/// `basic_dns`: resolves each host to its addresses.
///
/// Hosts come from the previous step's results when present, otherwise from
/// the job's targets. A host that fails to resolve is reported with an
/// `error` field rather than failing the step.
#[derive(Clone, Debug, Default)]
pub struct DnsResolveTool;

impl DnsResolveTool {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(host: &str) -> std::result::Result<Vec<IpAddr>, String> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| e.to_string())?;
        let unique: BTreeSet<IpAddr> = addrs.map(|addr| addr.ip()).collect();
        Ok(unique.into_iter().collect())
    }
}

#[async_trait]
impl ToolAdapter for DnsResolveTool {
    fn name(&self) -> &str {
        "basic_dns"
    }

    async fn run(&self, cancel: &CancellationToken, input: &ToolInput) -> Result<Vec<Value>> {
        let hosts = input.hosts();
        if hosts.is_empty() {
            return Err(OrchestratorError::tool(self.name(), "no hosts to resolve"));
        }

        let mut results = Vec::with_capacity(hosts.len());
        for host in hosts {
            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(OrchestratorError::Cancelled(format!("basic_dns for {host}")));
                }
                resolved = Self::resolve(&host) => resolved,
            };

            let entry = match resolved {
                Ok(addresses) => {
                    debug!(target: "orchestrator::executor", job_id = %input.job_id, %host, count = addresses.len(), "resolved");
                    json!({
                        "host": host,
                        "addresses": addresses.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    })
                }
                Err(error) => json!({ "host": host, "addresses": [], "error": error }),
            };
            results.push(entry);
        }
        Ok(results)
    }
}
