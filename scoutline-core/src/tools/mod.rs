//! Tool adapters: the named capabilities a pipeline step invokes.

mod command;
mod dns;

pub use command::CommandTool;
pub use dns::DnsResolveTool;

use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::pipeline::Pipeline;

/// What a tool sees of the job it runs for.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolInput {
    pub job_id: String,
    pub asset_type: String,
    pub intensity: String,
    pub targets: Vec<String>,
    /// Results of the step that ran immediately before this one.
    pub previous_results: Vec<Value>,
}

impl ToolInput {
    pub fn for_pipeline(pipeline: &Pipeline) -> Self {
        Self {
            job_id: pipeline.job_id.clone(),
            asset_type: pipeline.asset_type.clone(),
            intensity: pipeline.intensity.clone(),
            targets: pipeline.targets.clone(),
            previous_results: Vec::new(),
        }
    }

    /// String entries of the previous step's results, falling back to the
    /// job's own targets when the previous step produced none.
    pub fn hosts(&self) -> Vec<String> {
        let chained: Vec<String> = self
            .previous_results
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        if chained.is_empty() {
            self.targets.clone()
        } else {
            chained
        }
    }
}

/// A pluggable capability invoked by name for one pipeline step.
///
/// Implementations must return promptly once `cancel` fires and must not
/// leave child processes behind. Any error is terminal for the pipeline.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, cancel: &CancellationToken, input: &ToolInput) -> Result<Vec<Value>>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference adapters: `subfinder` (external binary)
    /// and `basic_dns`.
    pub fn builtin(subfinder_bin: &str) -> Self {
        Self::new()
            .with(Arc::new(CommandTool::subfinder(subfinder_bin)))
            .with(Arc::new(DnsResolveTool::new()))
    }

    /// Register `tool` under its own name, returning any adapter it replaced.
    pub fn register(&mut self, tool: Arc<dyn ToolAdapter>) -> Option<Arc<dyn ToolAdapter>> {
        self.tools.insert(tool.name().to_string(), tool)
    }

    pub fn with(mut self, tool: Arc<dyn ToolAdapter>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registers_reference_adapters() {
        let registry = ToolRegistry::builtin("subfinder");
        assert_eq!(registry.names(), vec!["basic_dns", "subfinder"]);
        assert!(registry.get("amass_active").is_none());
    }

    #[test]
    fn hosts_prefer_previous_string_results() {
        let mut input = ToolInput {
            targets: vec!["example.com".to_string()],
            ..ToolInput::default()
        };
        assert_eq!(input.hosts(), vec!["example.com"]);

        input.previous_results = vec![json!("a.example.com"), json!({"x": 1})];
        assert_eq!(input.hosts(), vec!["a.example.com"]);
    }
}
