use crate::chain::{build_forest, ChainForest};
use crate::config::OrchestratorSettings;
use crate::dispatcher::Dispatcher;
use crate::reputation::ReputationEngine;
use crate::results_log::ResultsLog;
use crate::store::{JsonFileReputationStore, ReputationStore};
use crate::telemetry::finalize;
use crate::tracker::{CompletionOutcome, TaskTracker};
use crate::types::{FinalizedTask, SubmitReceipt, TaskRecord, TaskStatus};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use taskmesh_bus::{BusMessage, MessageBus};
use taskmesh_core::{
    AgentScore, CompletionEvent, TaskmeshError, TaskmeshResult, COMPLETED_TOPIC,
};
use taskmesh_decomposer::{Decomposer, Decomposition};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Receives every finalized task, completed or timed out.
pub type CompletionCallback = Arc<dyn Fn(&FinalizedTask) + Send + Sync>;

/// Why an inbound completion message was rejected.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload is not a completion event.
    #[error("malformed completion on {topic}: {reason}")]
    Malformed {
        /// Topic the payload arrived on.
        topic: String,
        /// Decoder error.
        reason: String,
    },
}

/// Decodes a completion event from a bus message.
pub fn decode_completion(message: &BusMessage) -> Result<CompletionEvent, MessageError> {
    serde_json::from_str(&message.payload).map_err(|e| MessageError::Malformed {
        topic: message.topic.clone(),
        reason: e.to_string(),
    })
}

/// Counters for inbound completion traffic.
#[derive(Debug, Default)]
pub struct MessageStats {
    received: AtomicU64,
    accepted: AtomicU64,
    malformed: AtomicU64,
    unknown_task: AtomicU64,
    unexpected_subtask: AtomicU64,
    duplicate: AtomicU64,
}

/// Point-in-time copy of [`MessageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageStatsSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub malformed: u64,
    pub unknown_task: u64,
    pub unexpected_subtask: u64,
    pub duplicate: u64,
}

impl MessageStats {
    pub fn snapshot(&self) -> MessageStatsSnapshot {
        MessageStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_task: self.unknown_task.load(Ordering::Relaxed),
            unexpected_subtask: self.unexpected_subtask.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Generates a fresh task id.
pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// The task orchestrator.
///
/// `submit` decomposes a prompt, builds its chain forest, registers the task and
/// publishes the chain roots. Completions arrive on `tasks/completed`; each one
/// updates the reputation of every agent in its trace, and the task is finalized
/// once every chain has reported or its deadline elapses.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    bus: Arc<dyn MessageBus>,
    decomposer: Decomposer,
    dispatcher: Dispatcher,
    tracker: TaskTracker,
    reputation: ReputationEngine,
    results: ResultsLog,
    stats: MessageStats,
    callback: RwLock<Option<CompletionCallback>>,
    run_id: String,
    run_timestamp: String,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Held from recording a completion until its task settles, and while the
    /// reaper takes expired tasks.
    settle_gate: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    /// Creates an orchestrator persisting reputation under `settings.data_dir`.
    pub async fn open(
        settings: OrchestratorSettings,
        bus: Arc<dyn MessageBus>,
        decomposer: Decomposer,
    ) -> TaskmeshResult<Self> {
        let store = Arc::new(JsonFileReputationStore::new(settings.reputation_path()));
        Self::with_store(settings, bus, decomposer, store).await
    }

    /// Creates an orchestrator with an explicit reputation store.
    pub async fn with_store(
        settings: OrchestratorSettings,
        bus: Arc<dyn MessageBus>,
        decomposer: Decomposer,
        store: Arc<dyn ReputationStore>,
    ) -> TaskmeshResult<Self> {
        let reputation = ReputationEngine::load(
            settings.reputation.clone(),
            &settings.channels,
            store,
            bus.clone(),
        )
        .await?;
        let results = ResultsLog::open(settings.results_path()).await?;

        let now = Utc::now();
        let run_id = now.format("%Y%m%d_%H%M%S").to_string();
        info!(run_id = %run_id, bus = bus.name(), channels = ?settings.channels, "Orchestrator ready");

        Ok(Self {
            dispatcher: Dispatcher::new(bus.clone()),
            settings,
            bus,
            decomposer,
            tracker: TaskTracker::new(),
            reputation,
            results,
            stats: MessageStats::default(),
            callback: RwLock::new(None),
            run_id,
            run_timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            workers: Mutex::new(Vec::new()),
            settle_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Registers the callback invoked with every finalized task.
    pub fn on_task_complete<F>(&self, callback: F)
    where
        F: Fn(&FinalizedTask) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(callback));
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn reputation(&self) -> &ReputationEngine {
        &self.reputation
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn results(&self) -> &ResultsLog {
        &self.results
    }

    pub fn stats(&self) -> MessageStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Seeds initial scores for known agents, keyed by channel type.
    pub async fn seed_reputation(
        &self,
        seeds: &BTreeMap<String, Vec<AgentScore>>,
    ) -> TaskmeshResult<usize> {
        self.reputation.seed(seeds).await
    }

    /// Decomposes `prompt` and builds its chain forest without dispatching.
    pub async fn plan(&self, task_id: &str, prompt: &str) -> (Decomposition, ChainForest) {
        let decomposition = self.decomposer.decompose(prompt).await;
        let forest = build_forest(task_id, &decomposition.subtasks);
        (decomposition, forest)
    }

    /// Decomposes and dispatches one prompt.
    ///
    /// Returns once the chain roots are published; the finalized task is reported
    /// through the completion callback. Fails only if `task_id` is already in flight.
    pub async fn submit(
        &self,
        prompt: &str,
        task_id: impl Into<String>,
        label: &str,
    ) -> TaskmeshResult<SubmitReceipt> {
        let task_id = task_id.into();
        if self.tracker.is_live(&task_id) {
            return Err(TaskmeshError::Orchestrator(format!(
                "Task {task_id} is already in flight"
            )));
        }

        let (decomposition, forest) = self.plan(&task_id, prompt).await;
        let leaf_subtask_ids = forest.leaf_subtask_ids();
        let expected_leaf_count = leaf_subtask_ids.len();

        // Dispatch time is taken after decomposition so round trips exclude it.
        let record = TaskRecord::new(
            task_id.clone(),
            prompt,
            label,
            decomposition.duration,
            leaf_subtask_ids,
            Instant::now(),
            self.settings.task_timeout(),
        );
        self.tracker.register(record)?;

        let published = self.dispatcher.dispatch(&forest).await;
        if published < forest.roots.len() {
            warn!(
                task_id = %task_id,
                published,
                chains = forest.roots.len(),
                "Some chains were not dispatched; task will time out"
            );
        }

        info!(
            task_id = %task_id,
            label = %label,
            subtasks = decomposition.subtasks.len(),
            chains = forest.roots.len(),
            expected_leaf_count,
            dropped = forest.dropped.len(),
            fallback = decomposition.is_fallback(),
            decomposition_ms = decomposition.duration.as_millis() as u64,
            "Task dispatched"
        );

        Ok(SubmitReceipt {
            task_id,
            subtask_count: decomposition.subtasks.len(),
            decomposition_duration: decomposition.duration,
            chain_count: forest.roots.len(),
            expected_leaf_count,
            fallback: decomposition.is_fallback(),
            dropped: forest.dropped,
        })
    }

    /// Handles one message from the completion topic. Returns the finalized task
    /// if this message completed it.
    pub async fn handle_message(&self, message: &BusMessage) -> Option<FinalizedTask> {
        let received_at = Instant::now();
        MessageStats::bump(&self.stats.received);

        match decode_completion(message) {
            Ok(event) => self.handle_completion(event, received_at).await,
            Err(e) => {
                MessageStats::bump(&self.stats.malformed);
                warn!(error = %e, "Dropping malformed completion");
                None
            }
        }
    }

    /// Applies a decoded completion received at `received_at`.
    pub async fn handle_completion(
        &self,
        event: CompletionEvent,
        received_at: Instant,
    ) -> Option<FinalizedTask> {
        let task_id = event.task_id.clone();
        let gate = self.settle_gate.lock().await;

        match self.tracker.record_completion(event.clone(), received_at) {
            CompletionOutcome::UnknownTask => {
                MessageStats::bump(&self.stats.unknown_task);
                debug!(task_id = %task_id, subtask_id = event.subtask_id, "Completion for unknown task");
                None
            }
            CompletionOutcome::UnexpectedSubtask => {
                MessageStats::bump(&self.stats.unexpected_subtask);
                warn!(
                    task_id = %task_id,
                    subtask_id = event.subtask_id,
                    agent_id = %event.agent_id,
                    "Completion for a subtask that ends no dispatched chain"
                );
                None
            }
            CompletionOutcome::Duplicate => {
                MessageStats::bump(&self.stats.duplicate);
                debug!(task_id = %task_id, subtask_id = event.subtask_id, "Duplicate completion");
                None
            }
            CompletionOutcome::Accepted { received, expected } => {
                MessageStats::bump(&self.stats.accepted);
                debug!(
                    task_id = %task_id,
                    subtask_id = event.subtask_id,
                    agent_id = %event.agent_id,
                    received,
                    expected,
                    "Completion received"
                );

                let updates = self.reputation.apply_completion(&event).await;
                let record = self.tracker.settle(&task_id, updates)?;
                drop(gate);
                let end = record.last_received_at().unwrap_or(received_at);
                Some(self.finish(record, TaskStatus::Completed, end).await)
            }
        }
    }

    /// Finalizes every task whose deadline has passed at `now` as timed out.
    pub async fn reap_once(&self, now: Instant) -> Vec<FinalizedTask> {
        let expired = {
            let _gate = self.settle_gate.lock().await;
            self.tracker.reap_expired(now)
        };
        let mut finalized = Vec::with_capacity(expired.len());
        for record in expired {
            warn!(
                task_id = %record.task_id,
                received = record.received_count(),
                expected = record.expected_leaf_count,
                "Task timed out"
            );
            finalized.push(self.finish(record, TaskStatus::TimedOut, now).await);
        }
        finalized
    }

    async fn finish(&self, record: TaskRecord, status: TaskStatus, end: Instant) -> FinalizedTask {
        let mut task = finalize(record, status, end, Utc::now());
        task.run_id = self.run_id.clone();
        task.run_timestamp = self.run_timestamp.clone();

        if let Err(e) = self.results.append(task.clone()).await {
            error!(task_id = %task.task_id, error = %e, "Failed to write results log");
        }

        info!(
            task_id = %task.task_id,
            status = ?task.status,
            task_type = %task.task_type,
            round_trip_s = task.round_trip_s,
            network_overhead_s = task.totals.network_overhead_s,
            "Task finalized"
        );

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&task);
        }
        task
    }

    /// Subscribes to the completion topic and starts the listener and reaper.
    ///
    /// The subscription is active when this returns, so completions for tasks
    /// submitted afterwards cannot be missed.
    pub async fn start(self: &Arc<Self>) -> TaskmeshResult<()> {
        let mut subscription = self.bus.subscribe(COMPLETED_TOPIC).await?;
        self.reputation.announce_all().await?;

        let listener = {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(message) = subscription.recv().await {
                    this.handle_message(&message).await;
                }
                info!("Completion listener stopped");
            })
        };

        let reaper = {
            let this = Arc::clone(self);
            let interval = self.settings.reap_interval();
            tokio::spawn(async move {
                let mut timer = tokio::time::interval(interval);
                loop {
                    timer.tick().await;
                    this.reap_once(Instant::now()).await;
                }
            })
        };

        self.workers.lock().extend([listener, reaper]);
        info!(topic = COMPLETED_TOPIC, "Orchestrator started");
        Ok(())
    }

    /// Stops background work and flushes the reputation table.
    pub async fn shutdown(&self) -> TaskmeshResult<()> {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            worker.abort();
        }
        self.reputation.flush().await?;
        info!(
            live_tasks = self.tracker.live_count(),
            stats = ?self.stats.snapshot(),
            "Orchestrator stopped"
        );
        Ok(())
    }
}
