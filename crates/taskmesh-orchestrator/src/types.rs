use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use taskmesh_core::{AgentTiming, CompletionEvent};

use crate::chain::DroppedSubtask;

/// Shape of a task's execution, derived from its chains and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskShape {
    /// One chain executed by one agent.
    SingleAgent,
    /// One chain passing through several agents.
    Sequential,
    /// Several chains running side by side.
    Parallel,
    /// Nothing was received (timed out before any completion).
    Unknown,
}

impl std::fmt::Display for TaskShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskShape::SingleAgent => write!(f, "single_agent"),
            TaskShape::Sequential => write!(f, "sequential"),
            TaskShape::Parallel => write!(f, "parallel"),
            TaskShape::Unknown => write!(f, "unknown"),
        }
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Every expected chain reported.
    Completed,
    /// The deadline elapsed first.
    TimedOut,
}

/// A completion together with its local receive time.
#[derive(Debug, Clone)]
pub struct ReceivedCompletion {
    pub event: CompletionEvent,
    pub received_at: Instant,
}

/// One per-agent reputation change caused by a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationUpdate {
    pub agent_id: String,
    pub agent_type: String,
    pub old_score: f64,
    pub new_score: f64,
    pub delta: f64,
}

/// In-flight state of one dispatched task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub prompt: String,
    /// Caller-supplied label, e.g. a prompt category.
    pub difficulty: String,
    pub decomposition_duration: Duration,
    /// Set after decomposition, before the first publish.
    pub dispatched_at: Instant,
    pub deadline: Instant,
    /// Terminal subtask ids of the dispatched forest. Only these complete a chain.
    pub leaf_subtask_ids: BTreeSet<u32>,
    /// Terminal nodes in the dispatched forest. Fixed at dispatch.
    pub expected_leaf_count: usize,
    /// Completions in arrival order.
    pub completions: Vec<ReceivedCompletion>,
    pub reputation_updates: Vec<ReputationUpdate>,
}

impl TaskRecord {
    /// Creates a record for a task dispatched at `dispatched_at`, awaiting one
    /// completion per id in `leaf_subtask_ids`.
    pub fn new(
        task_id: impl Into<String>,
        prompt: impl Into<String>,
        difficulty: impl Into<String>,
        decomposition_duration: Duration,
        leaf_subtask_ids: impl IntoIterator<Item = u32>,
        dispatched_at: Instant,
        timeout: Duration,
    ) -> Self {
        let leaf_subtask_ids: BTreeSet<u32> = leaf_subtask_ids.into_iter().collect();
        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            difficulty: difficulty.into(),
            decomposition_duration,
            dispatched_at,
            deadline: deadline_after(dispatched_at, timeout),
            expected_leaf_count: leaf_subtask_ids.len(),
            leaf_subtask_ids,
            completions: Vec::new(),
            reputation_updates: Vec::new(),
        }
    }

    pub fn received_count(&self) -> usize {
        self.completions.len()
    }

    /// Whether every expected chain has reported.
    pub fn is_complete(&self) -> bool {
        self.completions.len() >= self.expected_leaf_count
    }

    /// Whether `subtask_id` ends one of the dispatched chains.
    pub fn awaits_subtask(&self, subtask_id: u32) -> bool {
        self.leaf_subtask_ids.contains(&subtask_id)
    }

    /// Whether a completion for `subtask_id` was already received.
    pub fn has_subtask(&self, subtask_id: u32) -> bool {
        self.completions
            .iter()
            .any(|c| c.event.subtask_id == subtask_id)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Receive time of the latest completion.
    pub fn last_received_at(&self) -> Option<Instant> {
        self.completions.iter().map(|c| c.received_at).max()
    }
}

/// Deadlines past what `Instant` can represent are capped at about a century.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Result of one resolved chain, as reported in a finalized task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: u32,
    pub final_agent: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub result: String,
    pub agents_in_chain: Vec<AgentTiming>,
    pub chain_execution_s: f64,
    #[serde(default = "default_true")]
    pub completed: bool,
}

fn default_true() -> bool {
    true
}

/// Aggregate timings of a finalized task, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Sum of every agent's execution time.
    pub agent_execution_s: f64,
    pub network_overhead_s: f64,
    pub round_trip_s: f64,
    /// Slowest chain's execution time, parallel tasks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_execution_s: Option<f64>,
}

/// A task after completion or timeout, as handed to callers and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTask {
    pub task_id: String,
    pub prompt: String,
    pub difficulty: String,
    pub status: TaskStatus,
    pub task_type: TaskShape,
    pub completed_at: DateTime<Utc>,
    pub decomposition_time_s: f64,
    pub round_trip_s: f64,
    pub subtasks: Vec<SubtaskResult>,
    pub num_subtasks: usize,
    /// Agent executions across all chains.
    pub num_agents_total: usize,
    /// Chains awaited at dispatch.
    pub expected_chains: usize,
    pub totals: Totals,
    pub reputation_updates: Vec<ReputationUpdate>,
    /// Orchestrator run that produced this task.
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub run_timestamp: String,
}

impl FinalizedTask {
    pub fn is_timed_out(&self) -> bool {
        self.status == TaskStatus::TimedOut
    }
}

/// What `submit` reports back once a task is dispatched.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub task_id: String,
    pub subtask_count: usize,
    pub decomposition_duration: Duration,
    /// Chains published.
    pub chain_count: usize,
    /// Completions the task awaits.
    pub expected_leaf_count: usize,
    /// Whether the single-subtask fallback was used.
    pub fallback: bool,
    /// Candidates that were not dispatched.
    pub dropped: Vec<DroppedSubtask>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn event(subtask_id: u32) -> CompletionEvent {
        CompletionEvent {
            task_id: "t1".into(),
            subtask_id,
            agent_id: "text_agent_1".into(),
            agent_type: Some("text".into()),
            result: "ok".into(),
            agent_times: vec![AgentTiming::new("text_agent_1", 1.0)],
            completed: true,
        }
    }

    #[test]
    fn test_record_progress() {
        let now = Instant::now();
        let mut record = TaskRecord::new(
            "t1",
            "Define X",
            "simple",
            Duration::from_millis(20),
            [1, 2],
            now,
            Duration::from_secs(30),
        );
        assert_eq!(record.expected_leaf_count, 2);
        assert!(record.awaits_subtask(2));
        assert!(!record.awaits_subtask(3));
        assert!(!record.is_complete());
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::from_secs(30)));

        record.completions.push(ReceivedCompletion {
            event: event(1),
            received_at: now + Duration::from_millis(5),
        });
        assert!(record.has_subtask(1));
        assert!(!record.has_subtask(2));
        assert_eq!(record.received_count(), 1);
        assert!(!record.is_complete());

        record.completions.push(ReceivedCompletion {
            event: event(2),
            received_at: now + Duration::from_millis(9),
        });
        assert!(record.is_complete());
        assert_eq!(record.last_received_at(), Some(now + Duration::from_millis(9)));
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let now = Instant::now();
        let record = TaskRecord::new(
            "t1",
            "Define X",
            "simple",
            Duration::ZERO,
            [1],
            now,
            Duration::from_secs(u64::MAX),
        );
        assert!(record.deadline > now);
        assert!(!record.is_expired(now + Duration::from_secs(365 * 24 * 60 * 60)));
    }

    #[test]
    fn test_shape_serde() {
        assert_eq!(
            serde_json::to_string(&TaskShape::SingleAgent).unwrap(),
            "\"single_agent\""
        );
        assert_eq!(TaskShape::Parallel.to_string(), "parallel");
        assert_eq!(
            serde_json::to_string(&TaskStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }
}
