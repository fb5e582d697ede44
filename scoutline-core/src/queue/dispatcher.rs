use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::job::JobKind;
use crate::registry::JobRegistry;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<()>;
}

/// What the dispatcher did with a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// No route for this type; the message is dropped.
    Ignored(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Routes raw message bodies by their `type` field.
#[derive(Clone, Default)]
pub struct Dispatcher {
    routes: HashMap<String, Arc<dyn MessageHandler>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<&String> = self.routes.keys().collect();
        routes.sort();
        f.debug_struct("Dispatcher").field("routes", &routes).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the `job` route wired to `registry`.
    pub fn for_registry(registry: JobRegistry) -> Self {
        Self::new().route("job", Arc::new(JobMessageHandler::new(registry)))
    }

    pub fn route(mut self, message_type: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.routes.insert(message_type.into(), handler);
        self
    }

    pub async fn dispatch(&self, body: &[u8]) -> Result<Dispatch> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        match self.routes.get(&envelope.kind) {
            Some(handler) => {
                handler.handle(body).await?;
                Ok(Dispatch::Handled)
            }
            None => {
                warn!(target: "orchestrator::queue", message_type = %envelope.kind, "unknown message type");
                Ok(Dispatch::Ignored(envelope.kind))
            }
        }
    }
}

/// A job message. Producers send the job identifier as `job_id` or `id`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JobMessage {
    #[serde(alias = "id")]
    pub job_id: String,
    #[serde(default)]
    pub job_kind: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl JobMessage {
    pub fn kind(&self) -> Result<JobKind> {
        match self.job_kind.as_deref() {
            None | Some("") => Ok(JobKind::Asm),
            Some(kind) => kind.parse(),
        }
    }
}

/// Starts jobs from `job` messages.
#[derive(Clone, Debug)]
pub struct JobMessageHandler {
    registry: JobRegistry,
}

impl JobMessageHandler {
    pub fn new(registry: JobRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MessageHandler for JobMessageHandler {
    async fn handle(&self, body: &[u8]) -> Result<()> {
        let message: JobMessage = serde_json::from_slice(body)?;
        let kind = message.kind()?;
        info!(target: "orchestrator::queue", job_id = %message.job_id, kind = %kind, "received job");

        match self
            .registry
            .start_job(&message.job_id, kind, message.user_id.clone())
            .await
        {
            Ok(_) => Ok(()),
            // A redelivery of a message that was already accepted.
            Err(OrchestratorError::DuplicateJob(job_id)) => {
                info!(target: "orchestrator::queue", job_id, "job already registered, acknowledging");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _body: &[u8]) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_by_type_and_ignores_unknown_types() {
        let counter = Arc::new(Counting::default());
        let dispatcher = Dispatcher::new().route("job", counter.clone());

        assert_eq!(
            dispatcher.dispatch(br#"{"type":"job","job_id":"J1"}"#).await.unwrap(),
            Dispatch::Handled
        );
        assert_eq!(
            dispatcher.dispatch(br#"{"type":"metrics"}"#).await.unwrap(),
            Dispatch::Ignored("metrics".to_string())
        );
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_envelope_is_an_error() {
        let dispatcher = Dispatcher::new();
        assert!(matches!(
            dispatcher.dispatch(b"not json").await,
            Err(OrchestratorError::Serialization(_))
        ));
        assert!(dispatcher.dispatch(br#"{"job_id":"J1"}"#).await.is_err());
    }

    #[test]
    fn job_message_accepts_both_id_fields() {
        let a: JobMessage =
            serde_json::from_str(r#"{"type":"job","job_id":"J1","job_kind":"asm"}"#).unwrap();
        let b: JobMessage =
            serde_json::from_str(r#"{"type":"job","id":"J1","user_id":"u-7"}"#).unwrap();
        assert_eq!(a.job_id, b.job_id);
        assert_eq!(a.kind().unwrap(), JobKind::Asm);
        assert_eq!(b.kind().unwrap(), JobKind::Asm);
        assert_eq!(b.user_id.as_deref(), Some("u-7"));

        let vs: JobMessage =
            serde_json::from_str(r#"{"type":"job","job_id":"J2","job_kind":"vs"}"#).unwrap();
        assert!(matches!(vs.kind(), Err(OrchestratorError::Validation(_))));
    }
}
