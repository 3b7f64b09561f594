use crate::backends::DecomposerOracle;
use crate::parse::parse_decomposition;
use crate::prompt::{user_message, SYSTEM_INSTRUCTIONS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskmesh_core::CandidateSubtask;
use tracing::{info, warn};

const DEFAULT_FALLBACK_CHANNEL: &str = "text";

/// How a [`Decomposition`] was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecompositionOutcome {
    /// The oracle output parsed cleanly.
    Parsed,
    /// The prompt was wrapped as a single subtask.
    Fallback {
        /// Oracle or parse failure that triggered the fallback.
        reason: String,
    },
}

/// Result of decomposing one prompt.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Candidate subtasks, never empty.
    pub subtasks: Vec<CandidateSubtask>,
    /// Whether the oracle output was used.
    pub outcome: DecompositionOutcome,
    /// Time spent waiting on the oracle and parsing.
    pub duration: Duration,
}

impl Decomposition {
    /// Whether the single-subtask fallback was used.
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, DecompositionOutcome::Fallback { .. })
    }
}

/// Wraps `prompt` as the single subtask of a decomposition.
pub fn fallback_subtasks(prompt: &str, channel: &str) -> Vec<CandidateSubtask> {
    vec![CandidateSubtask::new(1, channel, prompt)]
}

/// Prompts the oracle and parses its answer into candidate subtasks.
///
/// Decomposition never fails: oracle errors and unparseable output degrade to a
/// single subtask carrying the raw prompt.
pub struct Decomposer {
    oracle: Arc<dyn DecomposerOracle>,
    channels: Vec<String>,
    fallback_channel: String,
}

impl Decomposer {
    /// Creates an adapter advertising `channels` to the oracle.
    pub fn new(oracle: Arc<dyn DecomposerOracle>, channels: Vec<String>) -> Self {
        Self {
            oracle,
            channels,
            fallback_channel: DEFAULT_FALLBACK_CHANNEL.to_string(),
        }
    }

    /// Overrides the channel used for the fallback subtask.
    pub fn with_fallback_channel(mut self, channel: impl Into<String>) -> Self {
        self.fallback_channel = channel.into();
        self
    }

    /// Channels advertised to the oracle.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Decomposes `prompt`.
    pub async fn decompose(&self, prompt: &str) -> Decomposition {
        let start = Instant::now();
        let message = user_message(prompt, &self.channels);

        let parsed = match self.oracle.complete(SYSTEM_INSTRUCTIONS, &message).await {
            Ok(raw) => parse_decomposition(&raw)
                .map_err(|e| format!("Unparseable oracle output: {e}")),
            Err(e) => Err(e.to_string()),
        };

        let (subtasks, outcome) = match parsed {
            Ok(subtasks) => {
                for subtask in &subtasks {
                    if !self.channels.iter().any(|c| c == subtask.agent_type()) {
                        warn!(
                            subtask_id = subtask.id,
                            channel = %subtask.channel,
                            "Oracle targeted a channel that is not advertised"
                        );
                    }
                }
                (subtasks, DecompositionOutcome::Parsed)
            }
            Err(reason) => {
                warn!(reason = %reason, "Decomposition failed, falling back to a single subtask");
                (
                    fallback_subtasks(prompt, &self.fallback_channel),
                    DecompositionOutcome::Fallback { reason },
                )
            }
        };

        let duration = start.elapsed();
        info!(
            subtasks = subtasks.len(),
            duration_ms = duration.as_millis() as u64,
            fallback = matches!(outcome, DecompositionOutcome::Fallback { .. }),
            "Decomposition complete"
        );

        Decomposition {
            subtasks,
            outcome,
            duration,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskmesh_core::{TaskmeshError, TaskmeshResult};

    struct FixedOracle(TaskmeshResult<String>);

    #[async_trait]
    impl DecomposerOracle for FixedOracle {
        async fn complete(&self, system: &str, user: &str) -> TaskmeshResult<String> {
            assert!(system.contains("task decomposition assistant"));
            assert!(user.contains("Available agents"));
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(TaskmeshError::Http(e.to_string())),
            }
        }
    }

    fn decomposer(response: TaskmeshResult<String>) -> Decomposer {
        Decomposer::new(
            Arc::new(FixedOracle(response)),
            vec!["code".into(), "text".into(), "math".into(), "translate".into()],
        )
    }

    #[tokio::test]
    async fn test_parsed_decomposition() {
        let d = decomposer(Ok(r#"{"subtasks": [
            {"id": 1, "channel": "tasks/code", "sub-task": "Write code", "depends_on": []},
            {"id": 2, "channel": "tasks/text", "sub-task": "Explain code", "depends_on": [1]}
        ]}"#
        .to_string()));
        let result = d.decompose("Write code then explain it").await;
        assert_eq!(result.outcome, DecompositionOutcome::Parsed);
        assert_eq!(result.subtasks.len(), 2);
        assert!(!result.is_fallback());
    }

    #[tokio::test]
    async fn test_garbage_falls_back() {
        let d = decomposer(Ok("no idea".to_string()));
        let result = d.decompose("Define recursion").await;
        assert!(result.is_fallback());
        assert_eq!(result.subtasks.len(), 1);
        assert_eq!(result.subtasks[0].text, "Define recursion");
        assert_eq!(result.subtasks[0].channel, "text");
        assert!(result.subtasks[0].depends_on.is_empty());
    }

    #[tokio::test]
    async fn test_oracle_error_falls_back() {
        let d = decomposer(Err(TaskmeshError::Http("connection refused".into())))
            .with_fallback_channel("code");
        let result = d.decompose("Write a sort").await;
        match &result.outcome {
            DecompositionOutcome::Fallback { reason } => assert!(reason.contains("connection refused")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(result.subtasks[0].channel, "code");
    }
}
