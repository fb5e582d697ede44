//! # Scoutline Core
//!
//! Job orchestration and pipeline execution engine for attack-surface
//! discovery jobs.
//!
//! ## Overview
//!
//! A discovery job arrives as a queue message, is expanded into an ordered
//! pipeline of analysis tools chosen by asset type and intensity, and runs
//! step by step while every transition is persisted:
//!
//! - **Pipeline generation**: static asset type × intensity table ([`pipeline`])
//! - **Pipeline store**: TTL-bounded cache persistence with bounded retry ([`store`])
//! - **Tool adapters**: named capabilities invoked per step ([`tools`])
//! - **Executor**: sequential step runner ([`executor`])
//! - **Job registry**: tracked jobs and supervised executions ([`registry`])
//! - **Queue consumer**: type-routed ingestion with ack/nack ([`queue`])
//! - **System of record**: authoritative job attributes and status ([`records`])
//!
//! ## Feature Flags
//!
//! - `database`: Postgres system of record and Redis pipeline cache adapters
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use scoutline_core::{
//!     executor::{Executor, ExecutorSettings},
//!     job::JobKind,
//!     pipeline::PipelineGenerator,
//!     records::{DiscoveryRecord, InMemoryJobRecords},
//!     registry::{JobRegistry, RegistrySettings},
//!     store::{InMemoryPipelineCache, PipelineStore, PipelineStoreSettings},
//!     tools::ToolRegistry,
//! };
//!
//! async fn run_one() -> scoutline_core::Result<()> {
//!     let records = Arc::new(InMemoryJobRecords::new());
//!     records
//!         .insert(DiscoveryRecord::new("J1", "domain", "LIGHT").with_targets(["example.com"]))
//!         .await;
//!
//!     let store = PipelineStore::new(
//!         Arc::new(InMemoryPipelineCache::new()),
//!         PipelineStoreSettings::default(),
//!     );
//!     let executor = Executor::new(
//!         store.clone(),
//!         Arc::new(ToolRegistry::builtin("subfinder")),
//!         ExecutorSettings::default(),
//!     );
//!     let registry = JobRegistry::new(
//!         records,
//!         store,
//!         PipelineGenerator::default(),
//!         executor,
//!         RegistrySettings::default(),
//!     );
//!
//!     registry.start_job("J1", JobKind::Asm, None).await?;
//!     let result = registry.wait_for_completion("J1").await?;
//!     println!("J1 finished, success = {}", result.success);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod error;
pub mod executor;
pub mod job;
pub mod pipeline;
pub mod queue;
pub mod records;
pub mod registry;
pub mod store;
pub mod tools;

pub use error::{OrchestratorError, Result};
pub use executor::{ExecutionResult, Executor, ExecutorSettings};
pub use job::{Job, JobKind, JobState};
pub use pipeline::{Pipeline, PipelineGenerator, Step, StepOutcome, StepStatus};
pub use registry::{JobRegistry, RegistrySettings};
pub use store::{PipelineCache, PipelineStore, PipelineStoreSettings};
