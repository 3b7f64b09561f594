use crate::store::{read_json_opt, write_json_atomic};
use crate::types::{FinalizedTask, TaskShape, TaskStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskmesh_core::{TaskmeshError, TaskmeshResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Averages for one task shape, rounded to milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeSummary {
    pub count: usize,
    pub avg_decomposition_s: f64,
    pub avg_execution_s: f64,
    pub avg_network_overhead_s: f64,
    pub avg_round_trip_s: f64,
}

/// Rolling statistics over every logged task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsSummary {
    pub total_tasks: usize,
    pub timed_out_tasks: usize,
    pub last_updated: String,
    pub single_agent_tasks: ShapeSummary,
    pub sequential_tasks: ShapeSummary,
    pub parallel_tasks: ShapeSummary,
}

/// The results log file: every finalized task plus its summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsDocument {
    #[serde(default)]
    pub tasks: Vec<FinalizedTask>,
    #[serde(default)]
    pub summary: ResultsSummary,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn shape_summary(tasks: &[&FinalizedTask]) -> ShapeSummary {
    if tasks.is_empty() {
        return ShapeSummary::default();
    }
    let n = tasks.len() as f64;
    let avg = |f: fn(&FinalizedTask) -> f64| round3(tasks.iter().map(|t| f(t)).sum::<f64>() / n);

    ShapeSummary {
        count: tasks.len(),
        avg_decomposition_s: avg(|t| t.decomposition_time_s),
        avg_execution_s: avg(|t| t.totals.agent_execution_s),
        avg_network_overhead_s: avg(|t| t.totals.network_overhead_s),
        avg_round_trip_s: avg(|t| t.totals.round_trip_s),
    }
}

/// Recomputes the summary. Timed-out tasks are counted but kept out of the
/// per-shape averages.
pub fn summarize(tasks: &[FinalizedTask]) -> ResultsSummary {
    let of_shape = |shape: TaskShape| -> Vec<&FinalizedTask> {
        tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed && t.task_type == shape)
            .collect()
    };

    ResultsSummary {
        total_tasks: tasks.len(),
        timed_out_tasks: tasks.iter().filter(|t| t.is_timed_out()).count(),
        last_updated: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        single_agent_tasks: shape_summary(&of_shape(TaskShape::SingleAgent)),
        sequential_tasks: shape_summary(&of_shape(TaskShape::Sequential)),
        parallel_tasks: shape_summary(&of_shape(TaskShape::Parallel)),
    }
}

/// Append-only log of finalized tasks, rewritten in full on every append.
pub struct ResultsLog {
    path: PathBuf,
    doc: Mutex<ResultsDocument>,
}

impl ResultsLog {
    /// Opens the log at `path`. A missing file starts empty; an unparseable one is
    /// replaced on the next append.
    pub async fn open(path: impl Into<PathBuf>) -> TaskmeshResult<Self> {
        let path = path.into();
        let doc = match read_json_opt::<ResultsDocument>(&path).await {
            Ok(Some(doc)) => doc,
            Ok(None) => ResultsDocument::default(),
            Err(TaskmeshError::Store(reason)) => {
                warn!(path = %path.display(), reason = %reason, "Results log unreadable; starting fresh");
                ResultsDocument::default()
            }
            Err(e) => return Err(e),
        };
        debug!(path = %path.display(), tasks = doc.tasks.len(), "Results log opened");

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `task`, refreshes the summary and rewrites the file.
    pub async fn append(&self, task: FinalizedTask) -> TaskmeshResult<()> {
        let mut doc = self.doc.lock().await;
        doc.tasks.push(task);
        doc.summary = summarize(&doc.tasks);
        write_json_atomic(&self.path, &*doc).await
    }

    pub async fn summary(&self) -> ResultsSummary {
        let doc = self.doc.lock().await;
        if doc.tasks.is_empty() {
            return doc.summary.clone();
        }
        summarize(&doc.tasks)
    }

    pub async fn len(&self) -> usize {
        self.doc.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn document(&self) -> ResultsDocument {
        self.doc.lock().await.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Totals;

    fn task(id: &str, shape: TaskShape, status: TaskStatus, round_trip_s: f64) -> FinalizedTask {
        FinalizedTask {
            task_id: id.into(),
            prompt: "p".into(),
            difficulty: "simple".into(),
            status,
            task_type: shape,
            completed_at: Utc::now(),
            decomposition_time_s: 1.0,
            round_trip_s,
            subtasks: vec![],
            num_subtasks: 0,
            num_agents_total: 0,
            expected_chains: 1,
            totals: Totals {
                agent_execution_s: round_trip_s / 2.0,
                network_overhead_s: round_trip_s / 2.0,
                round_trip_s,
                max_parallel_execution_s: None,
            },
            reputation_updates: vec![],
            run_id: "20260101_000000".into(),
            run_timestamp: "2026-01-01 00:00:00".into(),
        }
    }

    #[test]
    fn test_summary_groups_by_shape() {
        let tasks = vec![
            task("a", TaskShape::SingleAgent, TaskStatus::Completed, 2.0),
            task("b", TaskShape::SingleAgent, TaskStatus::Completed, 3.0),
            task("c", TaskShape::Parallel, TaskStatus::Completed, 1.2344),
            task("d", TaskShape::Unknown, TaskStatus::TimedOut, 300.0),
        ];
        let summary = summarize(&tasks);
        assert_eq!(summary.total_tasks, 4);
        assert_eq!(summary.timed_out_tasks, 1);
        assert_eq!(summary.single_agent_tasks.count, 2);
        assert_eq!(summary.single_agent_tasks.avg_round_trip_s, 2.5);
        assert_eq!(summary.parallel_tasks.avg_round_trip_s, 1.234);
        assert_eq!(summary.sequential_tasks, ShapeSummary::default());
    }

    #[tokio::test]
    async fn test_append_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/results.json");

        let log = ResultsLog::open(&path).await.unwrap();
        assert!(log.is_empty().await);
        log.append(task("a", TaskShape::Sequential, TaskStatus::Completed, 4.0))
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["summary"]["sequential_tasks"]["count"], 1);
        assert_eq!(raw["tasks"][0]["task_type"], "sequential");

        let reopened = ResultsLog::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.summary().await.sequential_tasks.avg_round_trip_s, 4.0);
    }

    #[tokio::test]
    async fn test_corrupt_log_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, "{\"tasks\": [oops").unwrap();

        let log = ResultsLog::open(&path).await.unwrap();
        assert!(log.is_empty().await);
        log.append(task("a", TaskShape::SingleAgent, TaskStatus::Completed, 1.0))
            .await
            .unwrap();
        assert_eq!(ResultsLog::open(&path).await.unwrap().len().await, 1);
    }

    #[test]
    fn test_empty_summary_object_parses() {
        let doc: ResultsDocument = serde_json::from_str(r#"{"tasks": [], "summary": {}}"#).unwrap();
        assert_eq!(doc.summary.total_tasks, 0);
    }
}
