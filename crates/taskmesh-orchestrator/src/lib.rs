//! Task orchestration for taskmesh.
//!
//! Turns decomposed prompts into dependency chains, dispatches their roots to
//! worker agents over the message bus, tracks completions until every chain has
//! resolved (or a deadline passes), and keeps a persisted per-agent reputation
//! table up to date.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Submission, completion handling, reaping, and lifecycle.
//! - [`ChainForest`]: Dispatchable chains built by [`build_forest`].
//! - [`TaskTracker`]: Live-task map with per-task deadlines.
//! - [`ReputationEngine`]: Trust score updates, persistence, and announcements.
//! - [`ResultsLog`]: Persisted finalized tasks and rolling summary statistics.

/// Dependency chain construction.
pub mod chain;
/// Orchestrator settings.
pub mod config;
/// Chain root publishing.
pub mod dispatcher;
/// The orchestrator engine.
pub mod engine;
/// Agent reputation policy, table, and engine.
pub mod reputation;
/// Results log and summary statistics.
pub mod results_log;
/// JSON file persistence.
pub mod store;
/// Task shape classification and timing.
pub mod telemetry;
/// Live-task tracking.
pub mod tracker;
/// Shared orchestration types.
pub mod types;

pub use chain::{build_forest, ChainForest, DropReason, DroppedSubtask, MAX_CHAIN_STEPS};
pub use config::OrchestratorSettings;
pub use dispatcher::Dispatcher;
pub use engine::{
    decode_completion, new_task_id, CompletionCallback, MessageError, MessageStats,
    MessageStatsSnapshot, Orchestrator,
};
pub use reputation::{
    resolve_agent_type, AgentRecord, FeedbackSource, NeutralFeedback, Outcome, ReputationEngine,
    ReputationPolicy, ReputationTable,
};
pub use results_log::{summarize, ResultsDocument, ResultsLog, ResultsSummary, ShapeSummary};
pub use store::{JsonFileReputationStore, MemoryReputationStore, ReputationStore};
pub use telemetry::{classify, finalize, network_overhead};
pub use tracker::{CompletionOutcome, TaskTracker};
pub use types::{
    FinalizedTask, ReceivedCompletion, ReputationUpdate, SubmitReceipt, SubtaskResult, TaskRecord,
    TaskShape, TaskStatus, Totals,
};
