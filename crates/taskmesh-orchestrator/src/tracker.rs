use crate::types::{ReceivedCompletion, ReputationUpdate, TaskRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use taskmesh_core::{CompletionEvent, TaskmeshError, TaskmeshResult};

/// What happened to an inbound completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// No live task with this id; stale or foreign delivery.
    UnknownTask,
    /// The subtask does not end any dispatched chain of the task.
    UnexpectedSubtask,
    /// This subtask already reported, or the task already has every completion.
    Duplicate,
    /// Appended to the task.
    Accepted {
        /// Completions received so far, including this one.
        received: usize,
        /// Completions the task awaits in total.
        expected: usize,
    },
}

/// Live-task map. Every method takes the lock once, so a completion and the
/// reaper never observe a half-updated record.
#[derive(Default)]
pub struct TaskTracker {
    live: Mutex<HashMap<String, TaskRecord>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a dispatched task.
    pub fn register(&self, record: TaskRecord) -> TaskmeshResult<()> {
        let mut live = self.live.lock();
        if live.contains_key(&record.task_id) {
            return Err(TaskmeshError::Orchestrator(format!(
                "Task {} is already in flight",
                record.task_id
            )));
        }
        live.insert(record.task_id.clone(), record);
        Ok(())
    }

    pub fn is_live(&self, task_id: &str) -> bool {
        self.live.lock().contains_key(task_id)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn live_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Appends a completion to its task, stamped with `received_at`.
    pub fn record_completion(
        &self,
        event: CompletionEvent,
        received_at: Instant,
    ) -> CompletionOutcome {
        let mut live = self.live.lock();
        let Some(record) = live.get_mut(&event.task_id) else {
            return CompletionOutcome::UnknownTask;
        };
        if !record.awaits_subtask(event.subtask_id) {
            return CompletionOutcome::UnexpectedSubtask;
        }
        if record.has_subtask(event.subtask_id) || record.is_complete() {
            return CompletionOutcome::Duplicate;
        }

        record.completions.push(ReceivedCompletion { event, received_at });
        CompletionOutcome::Accepted {
            received: record.received_count(),
            expected: record.expected_leaf_count,
        }
    }

    /// Attaches reputation updates to a task and, once every expected completion
    /// is in, removes and returns it.
    pub fn settle(&self, task_id: &str, updates: Vec<ReputationUpdate>) -> Option<TaskRecord> {
        let mut live = self.live.lock();
        let record = live.get_mut(task_id)?;
        record.reputation_updates.extend(updates);
        if record.is_complete() {
            live.remove(task_id)
        } else {
            None
        }
    }

    /// Removes and returns every task whose deadline is at or before `now`.
    pub fn reap_expired(&self, now: Instant) -> Vec<TaskRecord> {
        let mut live = self.live.lock();
        let expired: Vec<String> = live
            .iter()
            .filter(|(_, record)| record.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped: Vec<TaskRecord> = expired.iter().filter_map(|id| live.remove(id)).collect();
        reaped.sort_by_key(|r| r.deadline);
        reaped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskmesh_core::AgentTiming;

    fn record(task_id: &str, expected: u32, now: Instant) -> TaskRecord {
        TaskRecord::new(
            task_id,
            "prompt",
            "simple",
            Duration::from_millis(10),
            1..=expected,
            now,
            Duration::from_secs(60),
        )
    }

    fn event(task_id: &str, subtask_id: u32) -> CompletionEvent {
        CompletionEvent {
            task_id: task_id.into(),
            subtask_id,
            agent_id: "code_agent_1".into(),
            agent_type: Some("code".into()),
            result: "ok".into(),
            agent_times: vec![AgentTiming::new("code_agent_1", 1.0)],
            completed: true,
        }
    }

    #[test]
    fn test_register_rejects_duplicate_task() {
        let tracker = TaskTracker::new();
        let now = Instant::now();
        tracker.register(record("t1", 1, now)).unwrap();
        assert!(tracker.register(record("t1", 1, now)).is_err());
        assert_eq!(tracker.live_count(), 1);
    }

    #[test]
    fn test_unknown_task_is_ignored() {
        let tracker = TaskTracker::new();
        assert_eq!(
            tracker.record_completion(event("nope", 1), Instant::now()),
            CompletionOutcome::UnknownTask
        );
    }

    #[test]
    fn test_parallel_task_waits_for_every_chain() {
        let tracker = TaskTracker::new();
        let now = Instant::now();
        tracker.register(record("t1", 2, now)).unwrap();

        assert_eq!(
            tracker.record_completion(event("t1", 1), now),
            CompletionOutcome::Accepted {
                received: 1,
                expected: 2
            }
        );
        assert!(tracker.settle("t1", vec![]).is_none());
        assert!(tracker.is_live("t1"));

        assert_eq!(
            tracker.record_completion(event("t1", 1), now),
            CompletionOutcome::Duplicate
        );

        assert!(matches!(
            tracker.record_completion(event("t1", 2), now),
            CompletionOutcome::Accepted { received: 2, .. }
        ));
        let done = tracker.settle("t1", vec![]).unwrap();
        assert_eq!(done.received_count(), 2);
        assert!(!tracker.is_live("t1"));
    }

    #[test]
    fn test_only_leaf_subtasks_count() {
        let tracker = TaskTracker::new();
        let now = Instant::now();
        // Chains 1 -> 2 and 3: only 2 and 3 end a chain.
        let record = TaskRecord::new(
            "t1",
            "prompt",
            "parallel",
            Duration::ZERO,
            [2, 3],
            now,
            Duration::from_secs(60),
        );
        tracker.register(record).unwrap();

        for subtask_id in [1, 99] {
            assert_eq!(
                tracker.record_completion(event("t1", subtask_id), now),
                CompletionOutcome::UnexpectedSubtask
            );
        }
        assert!(tracker.settle("t1", vec![]).is_none());
        assert!(tracker.is_live("t1"));

        tracker.record_completion(event("t1", 2), now);
        assert!(tracker.settle("t1", vec![]).is_none());
        tracker.record_completion(event("t1", 3), now);
        let done = tracker.settle("t1", vec![]).unwrap();
        assert_eq!(done.received_count(), 2);
    }

    #[test]
    fn test_received_never_exceeds_expected() {
        let tracker = TaskTracker::new();
        let now = Instant::now();
        tracker.register(record("t1", 1, now)).unwrap();
        tracker.record_completion(event("t1", 1), now);
        assert_eq!(
            tracker.record_completion(event("t1", 1), now),
            CompletionOutcome::Duplicate
        );
        assert_eq!(tracker.settle("t1", vec![]).unwrap().received_count(), 1);
    }

    #[test]
    fn test_reap_expired_only() {
        let tracker = TaskTracker::new();
        let now = Instant::now();
        tracker.register(record("old", 1, now)).unwrap();
        tracker
            .register(record("new", 1, now + Duration::from_secs(30)))
            .unwrap();

        let reaped = tracker.reap_expired(now + Duration::from_secs(60));
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].task_id, "old");
        assert_eq!(tracker.live_task_ids(), vec!["new".to_string()]);
    }
}
