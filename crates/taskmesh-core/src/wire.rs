use crate::topic::request_topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// One subtask proposed by the decomposition oracle.
///
/// `id` is unique within one decomposition only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSubtask {
    /// Identifier local to the decomposition.
    pub id: u32,
    /// Target channel, either `tasks/<type>` or `<type>`.
    pub channel: String,
    /// Instruction text for the agent.
    #[serde(rename = "sub-task", alias = "task")]
    pub text: String,
    /// Ids of prerequisite subtasks.
    #[serde(default, deserialize_with = "nullable_id_set")]
    pub depends_on: BTreeSet<u32>,
}

impl CandidateSubtask {
    /// Creates a subtask without prerequisites.
    pub fn new(id: u32, channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            channel: channel.into(),
            text: text.into(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Adds prerequisites.
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    /// Bare agent type of the target channel.
    pub fn agent_type(&self) -> &str {
        crate::topic::channel_type(&self.channel)
    }
}

fn nullable_id_set<'de, D>(deserializer: D) -> Result<BTreeSet<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeSet<u32>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Execution time reported by one agent in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTiming {
    /// Reporting agent, e.g. `code_agent_1`.
    pub agent_id: String,
    /// Wall-clock compute time of the step, in seconds.
    #[serde(default)]
    pub execution_time_s: f64,
}

impl AgentTiming {
    /// Creates a timing entry.
    pub fn new(agent_id: impl Into<String>, execution_time_s: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            execution_time_s,
        }
    }
}

/// A step of a dependency chain.
///
/// Serialized as `{task_id, subtask_id, type, data, next}` with `next` nested
/// recursively or `null` on the terminal step. Agents forwarding a chain carry the
/// accumulated `agent_times` trace and the previous step's output in `context`.
///
/// Each step adds one level of JSON nesting and `serde_json` refuses input nested
/// deeper than 128 levels, so dispatched chains are kept well below that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainNode {
    /// Owning task.
    pub task_id: String,
    /// Subtask id from the decomposition.
    pub subtask_id: u32,
    /// Bare agent type that must execute this step.
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Instruction text.
    #[serde(rename = "data")]
    pub payload: String,
    /// Following step, `None` on the terminal step.
    pub next: Option<Box<ChainNode>>,
    /// Trace of agents that already executed earlier steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_times: Vec<AgentTiming>,
    /// Output of the previous step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// What an agent must do after executing a [`ChainNode`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChainStep {
    /// Publish `node` on `topic`.
    Forward {
        /// Request topic of the next agent type.
        topic: String,
        /// Remaining chain.
        node: ChainNode,
    },
    /// The chain is resolved; publish this on the completion topic.
    Complete(CompletionEvent),
}

impl ChainNode {
    /// Creates a terminal step.
    pub fn new(
        task_id: impl Into<String>,
        subtask_id: u32,
        agent_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            subtask_id,
            agent_type: agent_type.into(),
            payload: payload.into(),
            next: None,
            agent_times: Vec::new(),
            context: None,
        }
    }

    /// Sets the following step.
    pub fn with_next(mut self, next: ChainNode) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    /// Whether this is the last step of its chain.
    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }

    /// Request topic for this step.
    pub fn topic(&self) -> String {
        request_topic(&self.agent_type)
    }

    /// Iterates this step and every following one.
    pub fn iter(&self) -> impl Iterator<Item = &ChainNode> {
        std::iter::successors(Some(self), |node| node.next.as_deref())
    }

    /// Number of steps from here to the end of the chain.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always false; a chain has at least one step.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The terminal step of this chain.
    pub fn leaf(&self) -> &ChainNode {
        self.iter().last().unwrap_or(self)
    }

    /// Subtask ids in chain order.
    pub fn subtask_ids(&self) -> Vec<u32> {
        self.iter().map(|node| node.subtask_id).collect()
    }

    /// Agent-side contract: after executing this step, either forward the rest of
    /// the chain to the next agent type or report completion.
    pub fn advance(
        self,
        agent_id: impl Into<String>,
        execution_time_s: f64,
        result: impl Into<String>,
    ) -> ChainStep {
        let agent_id = agent_id.into();
        let result = result.into();
        let mut agent_times = self.agent_times;
        agent_times.push(AgentTiming::new(agent_id.clone(), execution_time_s));

        match self.next {
            Some(next) => {
                let mut node = *next;
                node.agent_times = agent_times;
                node.context = Some(result);
                ChainStep::Forward {
                    topic: node.topic(),
                    node,
                }
            }
            None => ChainStep::Complete(CompletionEvent {
                task_id: self.task_id,
                subtask_id: self.subtask_id,
                agent_id,
                agent_type: Some(self.agent_type),
                result,
                agent_times,
                completed: true,
            }),
        }
    }
}

fn default_completed() -> bool {
    true
}

/// Report that one chain of a task has resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Owning task.
    pub task_id: String,
    /// Subtask id of the terminal step.
    pub subtask_id: u32,
    /// Agent that executed the terminal step.
    pub agent_id: String,
    /// Agent type of the terminal step.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Output of the terminal step.
    #[serde(default)]
    pub result: String,
    /// Execution trace of every agent in the chain, in order.
    #[serde(default)]
    pub agent_times: Vec<AgentTiming>,
    /// Whether the chain produced a usable result.
    #[serde(default = "default_completed")]
    pub completed: bool,
}

impl CompletionEvent {
    /// Sum of the execution times in the trace.
    pub fn chain_execution_s(&self) -> f64 {
        self.agent_times.iter().map(|t| t.execution_time_s).sum()
    }
}

/// One agent's score in a [`ReputationAnnouncement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    /// Agent identifier.
    pub agent_id: String,
    /// Trust score in `[0, 1]`.
    pub score: f64,
}

/// Retained snapshot of one channel's reputation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationAnnouncement {
    /// Channel, e.g. `tasks/code`.
    pub channel: String,
    /// When the snapshot was taken.
    pub updated_at: DateTime<Utc>,
    /// Every known agent on the channel.
    pub reputations: Vec<AgentScore>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_accepts_task_alias_and_null_deps() {
        let json = r#"{"id": 2, "channel": "tasks/text", "task": "Explain it", "depends_on": null}"#;
        let subtask: CandidateSubtask = serde_json::from_str(json).unwrap();
        assert_eq!(subtask.text, "Explain it");
        assert!(subtask.depends_on.is_empty());
        assert_eq!(subtask.agent_type(), "text");
    }

    #[test]
    fn test_candidate_serializes_sub_task_key() {
        let subtask = CandidateSubtask::new(1, "tasks/math", "Calculate 2+2").depends_on([3]);
        let json = serde_json::to_value(&subtask).unwrap();
        assert_eq!(json["sub-task"], "Calculate 2+2");
        assert_eq!(json["depends_on"], serde_json::json!([3]));
    }

    #[test]
    fn test_chain_node_wire_shape() {
        let chain = ChainNode::new("t1", 1, "math", "Calculate")
            .with_next(ChainNode::new("t1", 2, "text", "Explain"));
        let json = serde_json::to_value(&chain).unwrap();
        assert_eq!(json["type"], "math");
        assert_eq!(json["data"], "Calculate");
        assert_eq!(json["next"]["subtask_id"], 2);
        assert!(json["next"]["next"].is_null());
        assert!(json.get("agent_times").is_none());
    }

    #[test]
    fn test_chain_iteration() {
        let chain = ChainNode::new("t1", 1, "code", "a").with_next(
            ChainNode::new("t1", 2, "text", "b").with_next(ChainNode::new("t1", 3, "translate", "c")),
        );
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.subtask_ids(), vec![1, 2, 3]);
        assert_eq!(chain.leaf().subtask_id, 3);
        assert!(!chain.is_terminal());
        assert!(chain.leaf().is_terminal());
    }

    #[test]
    fn test_advance_forwards_then_completes() {
        let chain = ChainNode::new("t1", 1, "math", "Calculate 2+2")
            .with_next(ChainNode::new("t1", 2, "text", "Explain the result"));

        let ChainStep::Forward { topic, node } = chain.advance("math_agent_1", 1.5, "4") else {
            panic!("expected forward");
        };
        assert_eq!(topic, "tasks/text/request");
        assert_eq!(node.context.as_deref(), Some("4"));
        assert_eq!(node.agent_times.len(), 1);

        let ChainStep::Complete(event) = node.advance("text_agent_1", 2.0, "Four is...") else {
            panic!("expected completion");
        };
        assert_eq!(event.subtask_id, 2);
        assert_eq!(event.agent_id, "text_agent_1");
        assert_eq!(event.agent_type.as_deref(), Some("text"));
        assert_eq!(event.agent_times.len(), 2);
        assert!((event.chain_execution_s() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_completion_event_defaults() {
        let json = r#"{"task_id": "t1", "subtask_id": 1, "agent_id": "code_agent_1"}"#;
        let event: CompletionEvent = serde_json::from_str(json).unwrap();
        assert!(event.completed);
        assert!(event.agent_times.is_empty());
        assert!(event.agent_type.is_none());
    }

    #[test]
    fn test_completion_event_rejects_missing_task_id() {
        let json = r#"{"subtask_id": 1, "agent_id": "code_agent_1"}"#;
        assert!(serde_json::from_str::<CompletionEvent>(json).is_err());
    }
}
