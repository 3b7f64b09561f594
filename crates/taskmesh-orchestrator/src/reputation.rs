//! Per-agent trust scores.
//!
//! Every agent listed in a completion's execution trace gets its score nudged by a
//! weighted blend of three signals:
//!
//! - `feedback`: an external quality signal in `[0, 1]` (neutral 0.5 by default).
//! - `efficiency`: expected versus observed execution time, capped at 2x and mapped
//!   onto `[-1/3, 1]`.
//! - `completion_ratio`: share of completed outcomes in the agent's last
//!   `history_window` observations.
//!
//! Positive deltas move the score towards 1 with diminishing returns; non-positive
//! deltas shrink it multiplicatively towards 0. The table is persisted once per
//! event and each touched channel is re-announced on its retained reputation topic.

use crate::store::ReputationStore;
use crate::types::ReputationUpdate;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use taskmesh_bus::{publish_json, MessageBus};
use taskmesh_core::{
    reputation_topic, AgentScore, CompletionEvent, ReputationAnnouncement, TaskmeshResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Largest score an update may produce. Plain `f64` rounding would otherwise
/// land on exactly 1.0 after a few hundred strong updates.
const SCORE_CEILING: f64 = 1.0 - f64::EPSILON / 2.0;

// --- Policy ---

fn default_w_feedback() -> f64 {
    0.3
}
fn default_w_efficiency() -> f64 {
    0.4
}
fn default_w_completion() -> f64 {
    0.3
}
fn default_alpha() -> f64 {
    0.15
}
fn default_beta() -> f64 {
    0.85
}
fn default_baseline() -> f64 {
    0.35
}
fn default_window() -> usize {
    20
}
fn default_neutral_feedback() -> f64 {
    0.5
}
fn default_efficiency_cap() -> f64 {
    2.0
}
fn default_expected_time_ms() -> f64 {
    10_000.0
}
fn default_expected_times() -> BTreeMap<String, f64> {
    [
        ("code", 16_000.0),
        ("text", 12_500.0),
        ("math", 6_000.0),
        ("translate", 350.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Numeric policy of the reputation update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationPolicy {
    #[serde(default = "default_w_feedback")]
    pub w_feedback: f64,
    #[serde(default = "default_w_efficiency")]
    pub w_efficiency: f64,
    #[serde(default = "default_w_completion")]
    pub w_completion: f64,
    /// Step size for positive deltas.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Shrink factor for non-positive deltas.
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Score given to agents on first observation.
    #[serde(default = "default_baseline")]
    pub new_agent_baseline: f64,
    /// Outcomes kept per agent.
    #[serde(default = "default_window")]
    pub history_window: usize,
    #[serde(default = "default_neutral_feedback")]
    pub neutral_feedback: f64,
    #[serde(default = "default_efficiency_cap")]
    pub efficiency_cap: f64,
    /// Expected execution time per agent type, in milliseconds.
    #[serde(default = "default_expected_times")]
    pub expected_times_ms: BTreeMap<String, f64>,
    #[serde(default = "default_expected_time_ms")]
    pub default_expected_time_ms: f64,
}

impl Default for ReputationPolicy {
    fn default() -> Self {
        Self {
            w_feedback: default_w_feedback(),
            w_efficiency: default_w_efficiency(),
            w_completion: default_w_completion(),
            alpha: default_alpha(),
            beta: default_beta(),
            new_agent_baseline: default_baseline(),
            history_window: default_window(),
            neutral_feedback: default_neutral_feedback(),
            efficiency_cap: default_efficiency_cap(),
            expected_times_ms: default_expected_times(),
            default_expected_time_ms: default_expected_time_ms(),
        }
    }
}

impl ReputationPolicy {
    pub fn expected_time_ms(&self, agent_type: &str) -> f64 {
        self.expected_times_ms
            .get(agent_type)
            .copied()
            .unwrap_or(self.default_expected_time_ms)
    }

    /// Efficiency signal for one execution, in `[-1/3, 1]` with the default cap.
    pub fn efficiency(&self, agent_type: &str, execution_time_s: f64) -> f64 {
        let observed_ms = (execution_time_s * 1000.0).max(1.0);
        let ratio = self.expected_time_ms(agent_type) / observed_ms;
        (ratio.min(self.efficiency_cap) - 0.5) / 1.5
    }

    pub fn delta(&self, feedback: f64, efficiency: f64, completion_ratio: f64) -> f64 {
        self.w_feedback * feedback + self.w_efficiency * efficiency + self.w_completion * completion_ratio
    }

    /// Applies `delta` to `old`. The result stays in `[0, 1]`, and strictly inside
    /// it whenever `old` is.
    pub fn next_score(&self, old: f64, delta: f64) -> f64 {
        let raw = if delta > 0.0 {
            old + self.alpha * delta * (1.0 - old)
        } else {
            old * (1.0 + self.beta * delta)
        };
        let clamped = raw.clamp(0.0, 1.0);

        if clamped >= 1.0 && old < 1.0 {
            SCORE_CEILING.max(old)
        } else if clamped <= 0.0 && old > 0.0 {
            f64::MIN_POSITIVE.min(old)
        } else {
            clamped
        }
    }
}

// --- Table ---

/// One observed outcome in an agent's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub completed: bool,
}

/// Score and recent outcomes of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub score: f64,
    /// Most recent outcomes, oldest first. Older snapshots call this `history`.
    #[serde(rename = "TCR", alias = "history", default)]
    pub window: VecDeque<Outcome>,
}

impl AgentRecord {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            window: VecDeque::new(),
        }
    }

    /// Appends an outcome, evicting the oldest beyond `max_len`.
    pub fn push_outcome(&mut self, completed: bool, max_len: usize) {
        self.window.push_back(Outcome { completed });
        while self.window.len() > max_len.max(1) {
            self.window.pop_front();
        }
    }

    /// Share of completed outcomes in the window, 0 when empty.
    pub fn completion_ratio(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let completed = self.window.iter().filter(|o| o.completed).count();
        completed as f64 / self.window.len() as f64
    }
}

/// Channel type -> agent id -> record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReputationTable {
    channels: BTreeMap<String, BTreeMap<String, AgentRecord>>,
}

impl ReputationTable {
    /// Creates an empty table that accepts the given channel types.
    pub fn with_channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for channel in channels {
            table.ensure_channel(channel);
        }
        table
    }

    pub fn ensure_channel(&mut self, channel: impl Into<String>) {
        self.channels.entry(channel.into()).or_default();
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn agents(&self, channel: &str) -> Option<&BTreeMap<String, AgentRecord>> {
        self.channels.get(channel)
    }

    pub fn get(&self, channel: &str, agent_id: &str) -> Option<&AgentRecord> {
        self.channels.get(channel)?.get(agent_id)
    }

    pub fn score(&self, channel: &str, agent_id: &str) -> Option<f64> {
        self.get(channel, agent_id).map(|r| r.score)
    }

    /// Sets an agent's score and clears its window. Ignored for unknown channels.
    pub fn seed(&mut self, channel: &str, agent_id: &str, score: f64) -> bool {
        match self.channels.get_mut(channel) {
            Some(agents) => {
                agents.insert(agent_id.to_string(), AgentRecord::new(score.clamp(0.0, 1.0)));
                true
            }
            None => false,
        }
    }

    /// Record for `agent_id`, created at `baseline` on first observation.
    fn record_mut(&mut self, channel: &str, agent_id: &str, baseline: f64) -> Option<&mut AgentRecord> {
        let agents = self.channels.get_mut(channel)?;
        Some(
            agents
                .entry(agent_id.to_string())
                .or_insert_with(|| AgentRecord::new(baseline)),
        )
    }

    /// Snapshot of one channel for the retained announcement topic.
    pub fn announcement(&self, channel: &str) -> Option<ReputationAnnouncement> {
        let agents = self.channels.get(channel)?;
        Some(ReputationAnnouncement {
            channel: format!("tasks/{channel}"),
            updated_at: Utc::now(),
            reputations: agents
                .iter()
                .map(|(agent_id, record)| AgentScore {
                    agent_id: agent_id.clone(),
                    score: record.score,
                })
                .collect(),
        })
    }
}

/// Agent type of a trace entry: the prefix of `<type>_agent_<n>` identifiers, or
/// the event's declared type otherwise.
pub fn resolve_agent_type<'a>(agent_id: &'a str, declared: Option<&'a str>) -> Option<&'a str> {
    match agent_id.split_once("_agent_") {
        Some((prefix, _)) if !prefix.is_empty() => Some(prefix),
        _ => declared.filter(|t| !t.is_empty()),
    }
}

// --- Feedback ---

/// Source of the quality signal fed into each update.
pub trait FeedbackSource: Send + Sync {
    /// Quality of `agent_id`'s contribution to `event`, in `[0, 1]`.
    fn feedback(&self, event: &CompletionEvent, agent_id: &str) -> f64;
}

/// Returns the same value for every execution.
#[derive(Debug, Clone, Copy)]
pub struct NeutralFeedback(pub f64);

impl Default for NeutralFeedback {
    fn default() -> Self {
        Self(default_neutral_feedback())
    }
}

impl FeedbackSource for NeutralFeedback {
    fn feedback(&self, _event: &CompletionEvent, _agent_id: &str) -> f64 {
        self.0
    }
}

// --- Engine ---

/// Owns the reputation table and serializes every read-modify-write-persist cycle.
pub struct ReputationEngine {
    policy: ReputationPolicy,
    table: Mutex<ReputationTable>,
    store: Arc<dyn ReputationStore>,
    bus: Arc<dyn MessageBus>,
    feedback: Arc<dyn FeedbackSource>,
}

impl ReputationEngine {
    /// Loads the persisted table, accepting `channels` in addition to any already
    /// present in the snapshot.
    pub async fn load(
        policy: ReputationPolicy,
        channels: &[String],
        store: Arc<dyn ReputationStore>,
        bus: Arc<dyn MessageBus>,
    ) -> TaskmeshResult<Self> {
        let mut table = store.load().await?.unwrap_or_default();
        for channel in channels {
            table.ensure_channel(channel.as_str());
        }
        info!(
            channels = table.channels().count(),
            "Reputation table loaded"
        );

        let feedback = Arc::new(NeutralFeedback(policy.neutral_feedback));
        Ok(Self {
            policy,
            table: Mutex::new(table),
            store,
            bus,
            feedback,
        })
    }

    /// Replaces the feedback source.
    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackSource>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn policy(&self) -> &ReputationPolicy {
        &self.policy
    }

    pub async fn snapshot(&self) -> ReputationTable {
        self.table.lock().await.clone()
    }

    pub async fn score(&self, channel: &str, agent_id: &str) -> Option<f64> {
        self.table.lock().await.score(channel, agent_id)
    }

    /// Updates every agent in the event's trace. Entries of unknown agent types are
    /// skipped. Persists and announces once for the whole event.
    pub async fn apply_completion(&self, event: &CompletionEvent) -> Vec<ReputationUpdate> {
        let mut table = self.table.lock().await;
        let mut updates = Vec::new();
        let mut touched = BTreeSet::new();

        for timing in &event.agent_times {
            let Some(agent_type) =
                resolve_agent_type(&timing.agent_id, event.agent_type.as_deref())
            else {
                debug!(agent_id = %timing.agent_id, "Cannot resolve agent type; skipping");
                continue;
            };
            let feedback = self.feedback.feedback(event, &timing.agent_id);
            let Some(update) = self.update_agent(
                &mut table,
                agent_type,
                &timing.agent_id,
                timing.execution_time_s,
                event.completed,
                feedback,
            ) else {
                debug!(
                    agent_id = %timing.agent_id,
                    agent_type = %agent_type,
                    "No reputation table for agent type; skipping"
                );
                continue;
            };
            touched.insert(agent_type.to_string());
            updates.push(update);
        }

        if !updates.is_empty() {
            self.persist_and_announce(&table, &touched).await;
        }
        updates
    }

    /// Records a single outcome outside of a completion event.
    pub async fn record_outcome(
        &self,
        agent_type: &str,
        agent_id: &str,
        execution_time_s: f64,
        completed: bool,
        feedback: f64,
    ) -> Option<ReputationUpdate> {
        let mut table = self.table.lock().await;
        let update = self.update_agent(
            &mut table,
            agent_type,
            agent_id,
            execution_time_s,
            completed,
            feedback,
        )?;
        let touched = BTreeSet::from([agent_type.to_string()]);
        self.persist_and_announce(&table, &touched).await;
        Some(update)
    }

    /// Sets initial scores for known agents. Unknown channel types are ignored.
    /// Returns the number of agents seeded.
    pub async fn seed(&self, seeds: &BTreeMap<String, Vec<AgentScore>>) -> TaskmeshResult<usize> {
        let mut table = self.table.lock().await;
        let mut touched = BTreeSet::new();
        let mut seeded = 0;

        for (channel, agents) in seeds {
            if !table.has_channel(channel) {
                warn!(channel = %channel, "Ignoring seed for unknown channel");
                continue;
            }
            for agent in agents {
                table.seed(channel, &agent.agent_id, agent.score);
                seeded += 1;
            }
            touched.insert(channel.clone());
        }

        self.store.save(&table).await?;
        for channel in &touched {
            self.announce(&table, channel).await?;
        }
        info!(agents = seeded, channels = touched.len(), "Reputation seeded");
        Ok(seeded)
    }

    /// Announces every channel. The orchestrator calls this when it starts.
    pub async fn announce_all(&self) -> TaskmeshResult<()> {
        let table = self.table.lock().await;
        let channels: Vec<String> = table.channels().map(str::to_string).collect();
        for channel in &channels {
            self.announce(&table, channel).await?;
        }
        Ok(())
    }

    /// Writes the current table to the store.
    pub async fn flush(&self) -> TaskmeshResult<()> {
        let table = self.table.lock().await;
        self.store.save(&table).await
    }

    fn update_agent(
        &self,
        table: &mut ReputationTable,
        agent_type: &str,
        agent_id: &str,
        execution_time_s: f64,
        completed: bool,
        feedback: f64,
    ) -> Option<ReputationUpdate> {
        let policy = &self.policy;
        let record = table.record_mut(agent_type, agent_id, policy.new_agent_baseline)?;

        let old_score = record.score;
        let efficiency = policy.efficiency(agent_type, execution_time_s);
        record.push_outcome(completed, policy.history_window);
        let completion_ratio = record.completion_ratio();
        let delta = policy.delta(feedback.clamp(0.0, 1.0), efficiency, completion_ratio);
        let new_score = policy.next_score(old_score, delta);
        record.score = new_score;

        debug!(
            agent_id = %agent_id,
            agent_type = %agent_type,
            old_score,
            new_score,
            efficiency,
            completion_ratio,
            delta,
            "Reputation updated"
        );

        Some(ReputationUpdate {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            old_score,
            new_score,
            delta: new_score - old_score,
        })
    }

    async fn persist_and_announce(&self, table: &ReputationTable, channels: &BTreeSet<String>) {
        if let Err(e) = self.store.save(table).await {
            warn!(error = %e, "Failed to persist reputation table");
        }
        for channel in channels {
            if let Err(e) = self.announce(table, channel).await {
                warn!(channel = %channel, error = %e, "Failed to announce reputation");
            }
        }
    }

    async fn announce(&self, table: &ReputationTable, channel: &str) -> TaskmeshResult<()> {
        let Some(announcement) = table.announcement(channel) else {
            return Ok(());
        };
        publish_json(
            self.bus.as_ref(),
            &reputation_topic(channel),
            &announcement,
            true,
        )
        .await
    }
}
