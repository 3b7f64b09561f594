//! Core types and error definitions for the taskmesh orchestrator.
//!
//! This crate provides the foundational types shared across all taskmesh crates:
//! the unified error enum, the JSON wire format exchanged with worker agents over
//! the message bus, and the topic naming scheme.
//!
//! # Main types
//!
//! - [`TaskmeshError`]: Unified error enum for all taskmesh subsystems.
//! - [`TaskmeshResult`]: Convenience alias for `Result<T, TaskmeshError>`.
//! - [`CandidateSubtask`]: One subtask proposed by the decomposition oracle.
//! - [`ChainNode`]: A step of a dependency chain, as published to agents.
//! - [`CompletionEvent`]: Report that a chain has fully resolved.
//! - [`ReputationAnnouncement`]: Retained per-channel reputation snapshot.

/// Topic names used on the message bus.
pub mod topic;
/// JSON wire types exchanged with worker agents.
pub mod wire;

pub use topic::{channel_type, completed_topic, reputation_topic, request_topic, COMPLETED_TOPIC};
pub use wire::{
    AgentScore, AgentTiming, CandidateSubtask, ChainNode, ChainStep, CompletionEvent,
    ReputationAnnouncement,
};

// --- Error types ---

/// Top-level error type for taskmesh.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskmeshError {
    /// The decomposition oracle failed or returned something unusable.
    #[error("Decomposer error: {0}")]
    Decomposer(String),

    /// An error from an outbound HTTP request (e.g. the oracle endpoint).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error from the message bus.
    #[error("Bus error: {0}")]
    Bus(String),

    /// An error reading or writing persisted state.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the orchestrator engine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`TaskmeshError`].
pub type TaskmeshResult<T> = Result<T, TaskmeshError>;
