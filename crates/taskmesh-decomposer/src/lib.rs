//! Task decomposition through a text-generation oracle.
//!
//! The oracle is asked to split a user prompt into subtasks, each targeted at an
//! agent channel and optionally depending on earlier subtasks. Its output is parsed
//! tolerantly; anything unusable degrades to a single-subtask fallback so that
//! decomposition never fails from the caller's point of view.
//!
//! # Main types
//!
//! - [`DecomposerOracle`]: Trait for oracle backends.
//! - [`OpenAiCompatibleOracle`]: Backend for any OpenAI-compatible chat endpoint.
//! - [`Decomposer`]: Adapter that prompts the oracle and parses its output.
//! - [`Decomposition`]: Parsed subtasks plus how they were obtained.

/// Decomposer adapter with fallback.
pub mod adapter;
/// Oracle backends.
pub mod backends;
/// Oracle connection configuration.
pub mod config;
/// Tolerant oracle output parser.
pub mod parse;
/// Decomposition prompt template.
pub mod prompt;

pub use adapter::{fallback_subtasks, Decomposer, Decomposition, DecompositionOutcome};
pub use backends::openai::OpenAiCompatibleOracle;
pub use backends::DecomposerOracle;
pub use config::{OracleConfig, OracleProvider};
pub use parse::{parse_decomposition, ParseError};
