use std::fmt::Write;
use taskmesh_orchestrator::{ChainForest, FinalizedTask, ReputationTable, TaskStatus};

/// Human-readable report of one finalized task.
pub fn render_task(task: &FinalizedTask) -> String {
    let mut out = String::new();
    let status = match task.status {
        TaskStatus::Completed => "completed",
        TaskStatus::TimedOut => "TIMED OUT",
    };
    let _ = writeln!(out, "Task {} {status}", task.task_id);
    let _ = writeln!(out, "  Task type: {}", task.task_type);
    let _ = writeln!(out, "  Difficulty: {}", task.difficulty);
    let _ = writeln!(out, "  Prompt: {}", task.prompt);
    let _ = writeln!(out, "  Decomposition time: {:.3}s", task.decomposition_time_s);

    let _ = writeln!(
        out,
        "  Chains: {} of {} received",
        task.subtasks.len(),
        task.expected_chains
    );
    for subtask in &task.subtasks {
        let _ = writeln!(
            out,
            "  Subtask {} ({}) via {}: {:.3}s",
            subtask.subtask_id,
            subtask.agent_type.as_deref().unwrap_or("?"),
            subtask.final_agent,
            subtask.chain_execution_s
        );
        for timing in &subtask.agents_in_chain {
            let _ = writeln!(
                out,
                "    {}: {:.3}s",
                timing.agent_id, timing.execution_time_s
            );
        }
    }

    let totals = &task.totals;
    let _ = writeln!(
        out,
        "  Agent execution: {:.3}s",
        totals.agent_execution_s
    );
    if let Some(max) = totals.max_parallel_execution_s {
        let _ = writeln!(out, "  Max parallel execution: {max:.3}s");
    }
    let _ = writeln!(out, "  Network overhead: {:.3}s", totals.network_overhead_s);
    let _ = writeln!(out, "  Round trip: {:.3}s", totals.round_trip_s);

    if !task.reputation_updates.is_empty() {
        let _ = writeln!(out, "  Reputation updates:");
        for update in &task.reputation_updates {
            let _ = writeln!(
                out,
                "    {}: {:.4} -> {:.4} ({:+.4})",
                update.agent_id, update.old_score, update.new_score, update.delta
            );
        }
    }
    out
}

/// Chains of a planned task, one line per chain.
pub fn render_forest(forest: &ChainForest) -> String {
    let mut out = String::new();
    for (i, root) in forest.roots.iter().enumerate() {
        let steps: Vec<String> = root
            .iter()
            .map(|node| format!("{}:{}", node.subtask_id, node.agent_type))
            .collect();
        let _ = writeln!(out, "Chain {}: {}", i + 1, steps.join(" -> "));
        for node in root.iter() {
            let _ = writeln!(out, "  [{}] {}", node.subtask_id, node.payload);
        }
    }
    for dropped in &forest.dropped {
        let _ = writeln!(out, "Dropped {}: {:?}", dropped.subtask_id, dropped.reason);
    }
    if !forest.cycle_members.is_empty() {
        let _ = writeln!(out, "Cycle members: {:?}", forest.cycle_members);
    }
    if !forest.promoted.is_empty() {
        let _ = writeln!(out, "Promoted: {:?}", forest.promoted);
    }
    if !forest.split_at.is_empty() {
        let _ = writeln!(out, "Split at: {:?}", forest.split_at);
    }
    out
}

/// Scores and completion ratios per channel.
pub fn render_table(table: &ReputationTable) -> String {
    let mut out = String::new();
    for channel in table.channels() {
        let _ = writeln!(out, "{channel}");
        let Some(agents) = table.agents(channel) else {
            continue;
        };
        if agents.is_empty() {
            let _ = writeln!(out, "  (no agents)");
        }
        for (agent_id, record) in agents {
            let _ = writeln!(
                out,
                "  {agent_id:<24} score {:.4}  completion {:.2} over {} tasks",
                record.score,
                record.completion_ratio(),
                record.window.len()
            );
        }
    }
    out
}
