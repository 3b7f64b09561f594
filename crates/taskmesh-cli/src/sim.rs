//! Simulated worker agents.
//!
//! Each agent type gets one subscription on its request topic; steps are handed
//! to that type's agents in turn. An agent waits its configured latency, then
//! forwards the rest of the chain or reports completion, exactly as a real worker
//! would.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskmesh_bus::{publish_json, MessageBus, Subscription};
use taskmesh_core::{request_topic, ChainNode, ChainStep, TaskmeshResult, COMPLETED_TOPIC};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One simulated agent from `[[agents]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct SimAgentConfig {
    pub agent_id: String,
    pub agent_type: String,
    /// Simulated execution time per step.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

fn default_latency_ms() -> u64 {
    250
}

/// Running simulated agents.
pub struct AgentPool {
    workers: Vec<JoinHandle<()>>,
    agent_types: Vec<String>,
}

impl AgentPool {
    /// Subscribes every agent type and starts serving.
    ///
    /// Subscriptions are active when this returns.
    pub async fn spawn(
        bus: Arc<dyn MessageBus>,
        agents: &[SimAgentConfig],
    ) -> TaskmeshResult<Self> {
        let mut by_type: BTreeMap<String, Vec<SimAgentConfig>> = BTreeMap::new();
        for agent in agents {
            by_type
                .entry(agent.agent_type.clone())
                .or_default()
                .push(agent.clone());
        }

        let mut workers = Vec::with_capacity(by_type.len());
        let mut agent_types = Vec::with_capacity(by_type.len());
        for (agent_type, members) in by_type {
            let subscription = bus.subscribe(&request_topic(&agent_type)).await?;
            info!(agent_type = %agent_type, agents = members.len(), "Simulated agents ready");
            workers.push(tokio::spawn(serve(bus.clone(), subscription, members)));
            agent_types.push(agent_type);
        }

        Ok(Self {
            workers,
            agent_types,
        })
    }

    /// Agent types with at least one simulated agent.
    pub fn agent_types(&self) -> &[String] {
        &self.agent_types
    }

    pub fn shutdown(self) {
        for worker in self.workers {
            worker.abort();
        }
    }
}

async fn serve(
    bus: Arc<dyn MessageBus>,
    mut subscription: Subscription,
    members: Vec<SimAgentConfig>,
) {
    let mut turn = 0usize;
    while let Some(message) = subscription.recv().await {
        let node: ChainNode = match serde_json::from_str(&message.payload) {
            Ok(node) => node,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Ignoring malformed chain step");
                continue;
            }
        };
        let agent = members[turn % members.len()].clone();
        turn = turn.wrapping_add(1);
        tokio::spawn(execute(bus.clone(), agent, node));
    }
}

async fn execute(bus: Arc<dyn MessageBus>, agent: SimAgentConfig, node: ChainNode) {
    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(agent.latency_ms)).await;
    let result = simulated_result(&agent, &node);
    let execution_time_s = started.elapsed().as_secs_f64();

    debug!(
        agent_id = %agent.agent_id,
        task_id = %node.task_id,
        subtask_id = node.subtask_id,
        execution_time_s,
        "Step executed"
    );

    let published = match node.advance(agent.agent_id.as_str(), execution_time_s, result) {
        ChainStep::Forward { topic, node } => {
            publish_json(bus.as_ref(), &topic, &node, false).await
        }
        ChainStep::Complete(event) => {
            publish_json(bus.as_ref(), COMPLETED_TOPIC, &event, false).await
        }
    };
    if let Err(e) = published {
        warn!(agent_id = %agent.agent_id, error = %e, "Failed to publish step result");
    }
}

fn simulated_result(agent: &SimAgentConfig, node: &ChainNode) -> String {
    match &node.context {
        Some(context) => format!(
            "{} handled '{}' using: {context}",
            agent.agent_id, node.payload
        ),
        None => format!("{} handled '{}'", agent.agent_id, node.payload),
    }
}
