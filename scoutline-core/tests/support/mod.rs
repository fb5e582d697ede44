#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;

use scoutline_core::{
    Executor, ExecutorSettings, JobRegistry, JobState, OrchestratorError, PipelineCache,
    PipelineGenerator, PipelineStore, PipelineStoreSettings, RegistrySettings, Result,
    queue::{Delivery, MessageSource},
    records::{DiscoveryRecord, InMemoryJobRecords, JobRecordStore},
    store::InMemoryPipelineCache,
    tools::{ToolAdapter, ToolInput, ToolRegistry},
};

/// Tool returning fixed results.
pub struct StaticTool {
    pub name: &'static str,
    pub results: Vec<Value>,
}

impl StaticTool {
    pub fn new(name: &'static str, results: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name,
            results: results.iter().map(|r| Value::from(*r)).collect(),
        })
    }
}

#[async_trait]
impl ToolAdapter for StaticTool {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _cancel: &CancellationToken, _input: &ToolInput) -> Result<Vec<Value>> {
        Ok(self.results.clone())
    }
}

pub struct FailingTool(pub &'static str);

#[async_trait]
impl ToolAdapter for FailingTool {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, _cancel: &CancellationToken, _input: &ToolInput) -> Result<Vec<Value>> {
        Err(OrchestratorError::tool(self.0, "exit status 1"))
    }
}

/// Blocks until cancelled.
pub struct BlockingTool(pub &'static str);

#[async_trait]
impl ToolAdapter for BlockingTool {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self, cancel: &CancellationToken, _input: &ToolInput) -> Result<Vec<Value>> {
        cancel.cancelled().await;
        Err(OrchestratorError::Cancelled(self.0.to_string()))
    }
}

/// Returns an empty result once the gate is opened.
pub struct GatedTool {
    pub name: &'static str,
    pub gate: Arc<Notify>,
}

#[async_trait]
impl ToolAdapter for GatedTool {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, _cancel: &CancellationToken, _input: &ToolInput) -> Result<Vec<Value>> {
        self.gate.notified().await;
        Ok(Vec::new())
    }
}

/// In-memory cache that can be told to fail a number of calls.
#[derive(Default)]
pub struct FlakyCache {
    pub inner: InMemoryPipelineCache,
    pub failing_gets: AtomicU32,
    pub failing_sets: AtomicU32,
    pub get_calls: AtomicU32,
    pub set_calls: AtomicU32,
    pub down: AtomicBool,
}

impl FlakyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PipelineCache for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) || Self::take_failure(&self.failing_gets) {
            return Err(OrchestratorError::TransientStore("connection refused".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) || Self::take_failure(&self.failing_sets) {
            return Err(OrchestratorError::TransientStore("connection refused".to_string()));
        }
        self.inner.set_with_ttl(key, value, ttl).await
    }
}

/// System of record that can refuse the RUNNING update.
#[derive(Default)]
pub struct GuardedRecords {
    pub inner: InMemoryJobRecords,
    pub refuse_running: AtomicBool,
}

#[async_trait]
impl JobRecordStore for GuardedRecords {
    async fn ensure_ready(&self) -> Result<()> {
        self.inner.ensure_ready().await
    }

    async fn fetch_discovery(&self, job_id: &str) -> Result<DiscoveryRecord> {
        self.inner.fetch_discovery(job_id).await
    }

    async fn update_status(&self, job_id: &str, state: JobState) -> Result<()> {
        if state == JobState::Running && self.refuse_running.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Internal("update rejected".to_string()));
        }
        self.inner.update_status(job_id, state).await
    }

    async fn list_ids_with_status(&self, state: JobState) -> Result<Vec<String>> {
        self.inner.list_ids_with_status(state).await
    }
}

pub fn fast_store(cache: Arc<dyn PipelineCache>) -> PipelineStore {
    PipelineStore::new(
        cache,
        PipelineStoreSettings {
            backoff_step: Duration::from_millis(1),
            ..PipelineStoreSettings::default()
        },
    )
}

pub fn build_registry(
    records: Arc<dyn JobRecordStore>,
    store: PipelineStore,
    tools: ToolRegistry,
) -> JobRegistry {
    let executor = Executor::new(
        store.clone(),
        Arc::new(tools),
        ExecutorSettings {
            load_attempts: 3,
            tool_timeout: Duration::from_secs(5),
        },
    );
    JobRegistry::new(
        records,
        store,
        PipelineGenerator::default(),
        executor,
        RegistrySettings::default(),
    )
}

/// Tools for the domain/LIGHT pipeline.
pub fn domain_light_tools() -> ToolRegistry {
    ToolRegistry::new()
        .with(StaticTool::new("subfinder", &["a.example.com", "b.example.com"]))
        .with(StaticTool::new("basic_dns", &["93.184.216.34"]))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Ack(u64),
    Nack { tag: u64, requeue: bool },
}

/// Message source fed through a channel, recording every ack and nack.
pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<Delivery>,
    pub settlements: Arc<Mutex<Vec<Settlement>>>,
    settled: watch::Sender<usize>,
    pub closed: Arc<AtomicBool>,
    fail_settlements: Arc<AtomicBool>,
}

pub struct SourceHandle {
    pub tx: mpsc::UnboundedSender<Delivery>,
    pub settlements: Arc<Mutex<Vec<Settlement>>>,
    pub settled: watch::Receiver<usize>,
    pub closed: Arc<AtomicBool>,
    /// When set, acks and nacks fail as if the channel had dropped.
    pub fail_settlements: Arc<AtomicBool>,
}

impl SourceHandle {
    pub fn send(&self, tag: u64, body: &str) {
        self.send_counted(tag, body, None);
    }

    pub fn send_counted(&self, tag: u64, body: &str, delivery_count: Option<u32>) {
        let _ = self.tx.send(Delivery {
            tag,
            body: body.as_bytes().to_vec(),
            delivery_count,
        });
    }

    /// Resolves once `n` messages have been settled.
    pub fn settled_after(&self, n: usize) -> impl Future<Output = ()> + use<> {
        let mut settled = self.settled.clone();
        async move {
            let _ = settled.wait_for(|count| *count >= n).await;
        }
    }
}

pub fn scripted_source() -> (ScriptedSource, SourceHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let settlements = Arc::new(Mutex::new(Vec::new()));
    let (settled_tx, settled_rx) = watch::channel(0);
    let closed = Arc::new(AtomicBool::new(false));
    let fail_settlements = Arc::new(AtomicBool::new(false));
    (
        ScriptedSource {
            rx,
            settlements: settlements.clone(),
            settled: settled_tx,
            closed: closed.clone(),
            fail_settlements: fail_settlements.clone(),
        },
        SourceHandle {
            tx,
            settlements,
            settled: settled_rx,
            closed,
            fail_settlements,
        },
    )
}

impl ScriptedSource {
    async fn settle(&self, settlement: Settlement) -> Result<()> {
        if self.fail_settlements.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Queue("channel closed".to_string()));
        }
        let mut log = self.settlements.lock().await;
        log.push(settlement);
        let _ = self.settled.send(log.len());
        Ok(())
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn recv(&mut self) -> Option<Result<Delivery>> {
        self.rx.recv().await.map(Ok)
    }

    async fn ack(&mut self, tag: u64) -> Result<()> {
        self.settle(Settlement::Ack(tag)).await
    }

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<()> {
        self.settle(Settlement::Nack { tag, requeue }).await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
        Ok(())
    }
}
