//! Durable Multi-Phase Generation Job Engine
//!
//! Drives a long-running content generation job through a fixed sequence
//! of phases (research, strategy, writing, link enrichment, publish, ...),
//! each performed by an external worker that may be slow or flaky.
//!
//! # What the engine guarantees
//!
//! - Every completed phase is checkpointed, so a crashed job resumes at the
//!   first incomplete phase and never re-runs finished work
//! - Transient worker failures are retried with exponential backoff and
//!   per-attempt timeouts, driven by a classifier instead of message guessing
//! - Optional phases degrade to a warning; required phases fail the job
//! - Equivalent submissions are caught before any work is done
//! - Internal and external links are woven into the article without ever
//!   touching headings, code blocks or existing anchors
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use orchestrator::{EngineConfig, JobRequest, MemoryStore, Orchestrator};
//! use orchestrator::testing::ScriptedPipeline;
//!
//! let store = Arc::new(MemoryStore::new());
//! let pipeline = ScriptedPipeline::new();
//! let engine = Orchestrator::new(store, pipeline.registry(), EngineConfig::default());
//!
//! let outcome = engine.submit(JobRequest::new("tenant-1", "home espresso")).await?;
//! println!("published at {:?}", outcome.result().locator);
//! ```
//!
//! # Modules
//!
//! - [`orchestrator`] - Driver loop, submission and manual retry
//! - [`checkpoint`] - Versioned checkpoint/resume protocol
//! - [`retry`] - Retry executor and error classifier
//! - [`guard`] - Duplicate-submission guard
//! - [`links`] - Link Insertion Engine
//! - [`workers`] - Worker registry, bounded fan-out and built-in workers
//! - [`traits`] - Store and worker abstractions
//! - [`types`] - Phases, job state, outputs and configuration
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`events`] - Lifecycle events broadcast by the orchestrator
//! - [`testing`] - Scripted workers for tests

pub mod checkpoint;
pub mod error;
pub mod events;
pub mod guard;
pub mod links;
pub mod orchestrator;
pub mod retry;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod workers;

// Re-export core types at crate root
pub use checkpoint::{CheckpointManager, CheckpointRecord, ResumePoint, CHECKPOINT_VERSION};
pub use error::{
    CheckpointError, OrchestratorError, Result, StepError, StepResult, StoreError, StoreResult,
};
pub use events::JobEvent;
pub use guard::{normalize_subject, DuplicateCheck, DuplicateGuard};
pub use links::{
    insert_links, InsertedLink, LinkCandidate, LinkConfig, LinkInput, LinkKind, LinkResult,
    LinkStats,
};
pub use orchestrator::{JobOutcome, JobRequest, Orchestrator};
pub use retry::{
    ErrorCategory, ErrorClassifier, ErrorStats, RetryExecutor, RetryFailure, RetryStats, Severity,
};
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;
pub use traits::{
    store::{
        CheckpointStore, CompletedWork, EngineStore, JobRecord, JobStatus, LinkSource, ResultSink,
        SubmissionLedger,
    },
    worker::{StepInput, StepWorker},
};
pub use types::{
    config::{EngineConfig, GuardConfig, PhasePolicy, RetryPolicy},
    ids::JobId,
    job_state::{JobFailure, JobState, JobWarning, TargetConfig},
    output::{
        CategoryOutput, CompetitorOutput, ContentPlanOutput, GeneratedImage, ImageOutput,
        LinkEnrichmentOutput, MetaOutput, PhaseOutput, PhaseOutputs, PublishOutput,
        ResearchOutput, ResearchSource, StrategyOutput, WritingOutput,
    },
    phase::{Criticality, Phase},
    result::JobResult,
};
pub use workers::{join_bounded, try_join_bounded, LinkEnrichmentWorker, WorkerRegistry};
