//! Turns a flat candidate subtask list into dispatchable dependency chains.
//!
//! The wire protocol only supports forward-only, single-successor chains: there is
//! no fork or join. The forest is therefore built under a deterministic policy:
//!
//! - Every candidate without prerequisites starts a chain (roots in id order).
//! - From each step, the lowest-id unplaced dependent continues the chain. Other
//!   dependents of the same step lose the tie-break and are dropped unless a later
//!   walk places them.
//! - Members of a dependency cycle become independent single-step chains and are
//!   never chosen as a successor.
//! - Prerequisites naming unknown ids are ignored.
//! - Anything still unplaced (and not dropped) afterwards is promoted to a root in
//!   id order and walked like the others.
//! - A walk longer than [`MAX_CHAIN_STEPS`] is cut into consecutive chains, each
//!   dispatched as its own root.
//!
//! A subtask appears in the forest at most once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use taskmesh_core::{CandidateSubtask, ChainNode};
use tracing::warn;

/// Longest chain dispatched as one nested message. Deeper nesting would exceed
/// the JSON recursion limit of receiving agents.
pub const MAX_CHAIN_STEPS: usize = 64;

/// Why a candidate was left out of the forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DropReason {
    /// Another dependent of the same prerequisite continued the chain.
    TieBreak {
        /// Shared prerequisite.
        prerequisite: u32,
        /// Subtask that was chosen instead.
        kept: u32,
    },
    /// An earlier candidate already used this id.
    DuplicateId,
}

/// A candidate that will not be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedSubtask {
    /// The dropped candidate's id.
    pub subtask_id: u32,
    /// Why it was dropped.
    #[serde(flatten)]
    pub reason: DropReason,
}

/// Dependency chains ready for dispatch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainForest {
    /// One root per chain.
    pub roots: Vec<ChainNode>,
    /// Candidates that will not run.
    pub dropped: Vec<DroppedSubtask>,
    /// Candidates found on a dependency cycle, dispatched as single-step chains.
    pub cycle_members: Vec<u32>,
    /// Candidates whose prerequisites never resolved, dispatched as roots.
    pub promoted: Vec<u32>,
    /// Subtasks that start a chain because the walk before them hit the step limit.
    pub split_at: Vec<u32>,
}

impl ChainForest {
    /// Number of terminal steps, i.e. completions to await.
    pub fn leaf_count(&self) -> usize {
        self.nodes().filter(|node| node.is_terminal()).count()
    }

    /// Subtask ids of the terminal steps, in chain order.
    pub fn leaf_subtask_ids(&self) -> Vec<u32> {
        self.nodes()
            .filter(|node| node.is_terminal())
            .map(|node| node.subtask_id)
            .collect()
    }

    /// Total number of steps across all chains.
    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Every step of every chain.
    pub fn nodes(&self) -> impl Iterator<Item = &ChainNode> {
        self.roots.iter().flat_map(ChainNode::iter)
    }

    /// Whether nothing is dispatchable.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Builds the chain forest for `task_id`.
pub fn build_forest(task_id: &str, candidates: &[CandidateSubtask]) -> ChainForest {
    let mut dropped = Vec::new();
    let mut by_id: BTreeMap<u32, &CandidateSubtask> = BTreeMap::new();
    for candidate in candidates {
        if by_id.contains_key(&candidate.id) {
            dropped.push(DroppedSubtask {
                subtask_id: candidate.id,
                reason: DropReason::DuplicateId,
            });
        } else {
            by_id.insert(candidate.id, candidate);
        }
    }

    let prerequisites: BTreeMap<u32, BTreeSet<u32>> = by_id
        .iter()
        .map(|(&id, c)| {
            let known = c
                .depends_on
                .iter()
                .copied()
                .filter(|dep| by_id.contains_key(dep))
                .collect();
            (id, known)
        })
        .collect();

    let mut dependents: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for (&id, deps) in &prerequisites {
        for &dep in deps {
            dependents.entry(dep).or_default().insert(id);
        }
    }

    let cycle = cycle_members(&prerequisites);
    if !cycle.is_empty() {
        warn!(task_id = %task_id, members = ?cycle, "Dependency cycle detected; members run independently");
    }

    let mut walker = Walker {
        dependents: &dependents,
        cycle: &cycle,
        placed: BTreeSet::new(),
        losers: BTreeMap::new(),
    };
    let mut paths: Vec<Vec<u32>> = Vec::new();

    let roots: Vec<u32> = prerequisites
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(&id, _)| id)
        .collect();
    for root in roots {
        paths.push(walker.walk(root));
    }

    for &member in &cycle {
        walker.placed.insert(member);
        paths.push(vec![member]);
    }

    let mut promoted = Vec::new();
    while let Some(orphan) = prerequisites
        .keys()
        .copied()
        .find(|id| !walker.placed.contains(id) && !walker.losers.contains_key(id))
    {
        promoted.push(orphan);
        paths.push(walker.walk(orphan));
    }
    if !promoted.is_empty() {
        warn!(task_id = %task_id, subtasks = ?promoted, "Unresolvable prerequisites; subtasks promoted to roots");
    }

    for (&id, &(prerequisite, kept)) in &walker.losers {
        if !walker.placed.contains(&id) {
            dropped.push(DroppedSubtask {
                subtask_id: id,
                reason: DropReason::TieBreak { prerequisite, kept },
            });
        }
    }
    if dropped
        .iter()
        .any(|d| matches!(d.reason, DropReason::TieBreak { .. }))
    {
        warn!(task_id = %task_id, dropped = ?dropped, "Fan-out is unsupported; extra dependents dropped");
    }

    let mut roots = Vec::with_capacity(paths.len());
    let mut split_at = Vec::new();
    for path in &paths {
        for (i, segment) in path.chunks(MAX_CHAIN_STEPS).enumerate() {
            if i > 0 {
                split_at.push(segment[0]);
            }
            roots.extend(link(task_id, segment, &by_id));
        }
    }
    if !split_at.is_empty() {
        warn!(task_id = %task_id, split_at = ?split_at, max_steps = MAX_CHAIN_STEPS, "Chain too long; continued as separate chains");
    }

    ChainForest {
        roots,
        dropped,
        cycle_members: cycle.into_iter().collect(),
        promoted,
        split_at,
    }
}

struct Walker<'a> {
    dependents: &'a BTreeMap<u32, BTreeSet<u32>>,
    cycle: &'a BTreeSet<u32>,
    placed: BTreeSet<u32>,
    /// Tie-break losers: id -> (prerequisite, kept).
    losers: BTreeMap<u32, (u32, u32)>,
}

impl Walker<'_> {
    /// Follows lowest-id successors from `start` until none is left.
    fn walk(&mut self, start: u32) -> Vec<u32> {
        self.placed.insert(start);
        let mut path = vec![start];
        let mut current = start;

        loop {
            let next: Vec<u32> = self
                .dependents
                .get(&current)
                .into_iter()
                .flatten()
                .copied()
                .filter(|id| !self.placed.contains(id) && !self.cycle.contains(id))
                .collect();

            let Some((&kept, rest)) = next.split_first() else {
                break;
            };
            for &other in rest {
                self.losers.entry(other).or_insert((current, kept));
            }
            self.placed.insert(kept);
            path.push(kept);
            current = kept;
        }

        path
    }
}

fn link(
    task_id: &str,
    path: &[u32],
    by_id: &BTreeMap<u32, &CandidateSubtask>,
) -> Option<ChainNode> {
    let mut chain: Option<ChainNode> = None;
    for id in path.iter().rev() {
        let candidate = by_id.get(id)?;
        let mut node = ChainNode::new(task_id, candidate.id, candidate.agent_type(), &candidate.text);
        node.next = chain.map(Box::new);
        chain = Some(node);
    }
    chain
}

/// Ids on a dependency cycle: members of strongly connected components with more
/// than one node, or that depend on themselves. Iterative Tarjan.
fn cycle_members(prerequisites: &BTreeMap<u32, BTreeSet<u32>>) -> BTreeSet<u32> {
    // id -> (index, lowlink)
    let mut marks: HashMap<u32, (usize, usize)> = HashMap::new();
    let mut on_stack: BTreeSet<u32> = BTreeSet::new();
    let mut stack: Vec<u32> = Vec::new();
    let mut next_index = 0usize;
    let mut members = BTreeSet::new();

    let successors = |id: u32| -> Vec<u32> {
        prerequisites
            .get(&id)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    };

    for &start in prerequisites.keys() {
        if marks.contains_key(&start) {
            continue;
        }

        marks.insert(start, (next_index, next_index));
        next_index += 1;
        stack.push(start);
        on_stack.insert(start);
        let mut work: Vec<(u32, Vec<u32>, usize)> = vec![(start, successors(start), 0)];

        while let Some(frame) = work.last_mut() {
            let node = frame.0;
            let child = frame.1.get(frame.2).copied();
            frame.2 += 1;

            match child {
                Some(child) => match marks.get(&child).copied() {
                    None => {
                        marks.insert(child, (next_index, next_index));
                        next_index += 1;
                        stack.push(child);
                        on_stack.insert(child);
                        work.push((child, successors(child), 0));
                    }
                    Some((child_index, _)) if on_stack.contains(&child) => {
                        if let Some(mark) = marks.get_mut(&node) {
                            mark.1 = mark.1.min(child_index);
                        }
                    }
                    Some(_) => {}
                },
                None => {
                    work.pop();
                    let Some(&(index, low)) = marks.get(&node) else {
                        continue;
                    };
                    if let Some(parent) = work.last() {
                        if let Some(mark) = marks.get_mut(&parent.0) {
                            mark.1 = mark.1.min(low);
                        }
                    }
                    if low == index {
                        let mut component = Vec::new();
                        while let Some(member) = stack.pop() {
                            on_stack.remove(&member);
                            component.push(member);
                            if member == node {
                                break;
                            }
                        }
                        let self_dependent = prerequisites
                            .get(&node)
                            .is_some_and(|deps| deps.contains(&node));
                        if component.len() > 1 || self_dependent {
                            members.extend(component);
                        }
                    }
                }
            }
        }
    }

    members
}
