use crate::chain::ChainForest;
use std::sync::Arc;
use taskmesh_bus::{publish_json, MessageBus};
use taskmesh_core::TaskmeshResult;
use tracing::{debug, warn};

/// Publishes chain roots to their agent type's request topic.
///
/// Only roots are sent. Agents forward the rest of each chain themselves and
/// report the terminal step on the completion topic.
pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Publishes every root. Returns the number published; failures are logged
    /// and counted out.
    pub async fn dispatch(&self, forest: &ChainForest) -> usize {
        let mut published = 0;
        for root in &forest.roots {
            match self.publish_root(root).await {
                Ok(()) => published += 1,
                Err(e) => warn!(
                    task_id = %root.task_id,
                    subtask_id = root.subtask_id,
                    error = %e,
                    "Failed to dispatch chain"
                ),
            }
        }
        published
    }

    async fn publish_root(&self, root: &taskmesh_core::ChainNode) -> TaskmeshResult<()> {
        let topic = root.topic();
        debug!(
            task_id = %root.task_id,
            subtask_id = root.subtask_id,
            topic = %topic,
            steps = root.len(),
            "Dispatching chain"
        );
        publish_json(self.bus.as_ref(), &topic, root, false).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::chain::build_forest;
    use taskmesh_bus::InMemoryBus;
    use taskmesh_core::{CandidateSubtask, ChainNode};

    #[tokio::test]
    async fn test_only_roots_are_published() {
        let bus = Arc::new(InMemoryBus::default());
        let mut math = bus.subscribe("tasks/math/request").await.unwrap();
        let mut text = bus.subscribe("tasks/text/request").await.unwrap();
        let mut code = bus.subscribe("tasks/code/request").await.unwrap();

        let forest = build_forest(
            "t1",
            &[
                CandidateSubtask::new(1, "math", "Calculate 9 * 9"),
                CandidateSubtask::new(2, "text", "Explain the result").depends_on([1]),
                CandidateSubtask::new(3, "code", "Write a sort"),
            ],
        );
        let dispatcher = Dispatcher::new(bus.clone());
        assert_eq!(dispatcher.dispatch(&forest).await, 2);

        let msg = math.recv().await.unwrap();
        let node: ChainNode = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(node.subtask_ids(), vec![1, 2]);
        assert_eq!(node.next.as_ref().unwrap().agent_type, "text");

        let msg = code.recv().await.unwrap();
        let node: ChainNode = serde_json::from_str(&msg.payload).unwrap();
        assert!(node.is_terminal());

        assert!(text.try_recv().is_none());
    }
}
