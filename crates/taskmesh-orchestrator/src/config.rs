use crate::reputation::ReputationPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings of the [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Directory holding the reputation table and the results log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Seconds a dispatched task may wait for its completions.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Seconds between reaper sweeps.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
    /// Agent types advertised to the decomposer and tracked for reputation.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default)]
    pub reputation: ReputationPolicy,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_task_timeout() -> u64 {
    300
}

fn default_reap_interval() -> u64 {
    5
}

fn default_channels() -> Vec<String> {
    ["code", "text", "math", "translate"]
        .iter()
        .map(|c| (*c).to_string())
        .collect()
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            task_timeout_secs: default_task_timeout(),
            reap_interval_secs: default_reap_interval(),
            channels: default_channels(),
            reputation: ReputationPolicy::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn reputation_path(&self) -> PathBuf {
        self.data_dir.join("reputation_tables.json")
    }

    pub fn results_path(&self) -> PathBuf {
        self.data_dir.join("benchmark_results.json")
    }
}
