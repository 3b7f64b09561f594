use crate::types::{
    FinalizedTask, SubtaskResult, TaskRecord, TaskShape, TaskStatus, Totals,
};
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Classifies a task from its chain count and the agents seen in its traces.
pub fn classify(chain_count: usize, completions: usize, agents_in_traces: usize) -> TaskShape {
    match (chain_count, completions) {
        (_, 0) => TaskShape::Unknown,
        (1, _) if agents_in_traces <= 1 => TaskShape::SingleAgent,
        (1, _) => TaskShape::Sequential,
        _ => TaskShape::Parallel,
    }
}

/// Time not accounted for by agent compute, never negative.
///
/// Parallel chains overlap, so only the slowest one is subtracted.
pub fn network_overhead(shape: TaskShape, round_trip_s: f64, chain_execution_s: &[f64]) -> f64 {
    let busy = match shape {
        TaskShape::Parallel => chain_execution_s.iter().copied().fold(0.0, f64::max),
        _ => chain_execution_s.iter().sum(),
    };
    (round_trip_s - busy).max(0.0)
}

/// Turns a settled or reaped record into its final report.
///
/// `end` is the last completion's receive time for completed tasks and the reap
/// instant for timed-out ones.
pub fn finalize(
    record: TaskRecord,
    status: TaskStatus,
    end: Instant,
    completed_at: DateTime<Utc>,
) -> FinalizedTask {
    let round_trip_s = end.saturating_duration_since(record.dispatched_at).as_secs_f64();

    let subtasks: Vec<SubtaskResult> = record
        .completions
        .into_iter()
        .map(|received| {
            let event = received.event;
            let chain_execution_s = event.chain_execution_s();
            SubtaskResult {
                subtask_id: event.subtask_id,
                final_agent: event.agent_id,
                agent_type: event.agent_type,
                result: event.result,
                agents_in_chain: event.agent_times,
                chain_execution_s,
                completed: event.completed,
            }
        })
        .collect();

    let chain_times: Vec<f64> = subtasks.iter().map(|s| s.chain_execution_s).collect();
    let num_agents_total: usize = subtasks.iter().map(|s| s.agents_in_chain.len()).sum();
    let shape = classify(record.expected_leaf_count, subtasks.len(), num_agents_total);
    let agent_execution_s: f64 = chain_times.iter().sum();

    let max_parallel_execution_s = (shape == TaskShape::Parallel)
        .then(|| chain_times.iter().copied().fold(0.0, f64::max));

    FinalizedTask {
        task_id: record.task_id,
        prompt: record.prompt,
        difficulty: record.difficulty,
        status,
        task_type: shape,
        completed_at,
        decomposition_time_s: record.decomposition_duration.as_secs_f64(),
        round_trip_s,
        num_subtasks: subtasks.len(),
        num_agents_total,
        expected_chains: record.expected_leaf_count,
        totals: Totals {
            agent_execution_s,
            network_overhead_s: network_overhead(shape, round_trip_s, &chain_times),
            round_trip_s,
            max_parallel_execution_s,
        },
        subtasks,
        reputation_updates: record.reputation_updates,
        run_id: String::new(),
        run_timestamp: String::new(),
    }
}
