use crate::sim::SimAgentConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use taskmesh_core::AgentScore;
use taskmesh_decomposer::OracleConfig;
use taskmesh_orchestrator::OrchestratorSettings;

/// Environment variable consulted when `[oracle].api_key` is empty.
pub const API_KEY_ENV: &str = "TASKMESH_API_KEY";

/// Contents of `taskmesh.toml`.
#[derive(Debug, Deserialize)]
pub struct TaskmeshConfig {
    pub oracle: OracleConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Channel type -> initial agent scores.
    #[serde(default)]
    pub seed: BTreeMap<String, Vec<AgentScore>>,
    /// Simulated worker agents started by `run`.
    #[serde(default)]
    pub agents: Vec<SimAgentConfig>,
}

impl TaskmeshConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let mut config = Self::parse(&raw)?;
        config.apply_env_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Fills an empty oracle key from the environment.
    pub fn apply_env_key(&mut self, key: Option<String>) {
        if self.oracle.api_key.is_empty() {
            if let Some(key) = key.filter(|k| !k.is_empty()) {
                self.oracle.api_key = key;
            }
        }
    }
}

/// One category of benchmark prompts.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptCategory {
    /// Used as the difficulty label of every prompt in the category.
    pub name: String,
    pub prompts: Vec<String>,
}

/// A prompts file: categories in file order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptSet {
    #[serde(default)]
    pub category: Vec<PromptCategory>,
}

impl PromptSet {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read prompts file '{}': {}", path.display(), e)
        })?;
        Self::parse(&raw)
    }

    pub fn len(&self) -> usize {
        self.category.iter().map(|c| c.prompts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(category, index, prompt)` in replay order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, &str)> {
        self.category.iter().flat_map(|c| {
            c.prompts
                .iter()
                .enumerate()
                .map(move |(i, p)| (c.name.as_str(), i, p.as_str()))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskmesh_decomposer::OracleProvider;

    const SAMPLE: &str = r#"
        [oracle]
        provider = "ollama"
        model_id = "llama3.1:8b"

        [orchestrator]
        task_timeout_secs = 60

        [seed]
        code = [
            { agent_id = "code_agent_1", score = 0.35 },
            { agent_id = "code_agent_2", score = 0.2 },
        ]
        math = [{ agent_id = "math_agent_1", score = 0.35 }]

        [[agents]]
        agent_id = "code_agent_1"
        agent_type = "code"
        latency_ms = 50

        [[agents]]
        agent_id = "math_agent_1"
        agent_type = "math"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = TaskmeshConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.oracle.provider, OracleProvider::Ollama);
        assert_eq!(config.oracle.base_url(), "http://localhost:11434");
        assert_eq!(config.orchestrator.task_timeout_secs, 60);
        assert_eq!(config.orchestrator.channels.len(), 4);
        assert_eq!(config.seed["code"].len(), 2);
        assert_eq!(config.seed["code"][1].score, 0.2);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[1].latency_ms, 250);
    }

    #[test]
    fn test_oracle_section_is_required() {
        assert!(TaskmeshConfig::parse("[orchestrator]\n").is_err());
    }

    #[test]
    fn test_env_key_only_fills_empty_key() {
        let mut config = TaskmeshConfig::parse(SAMPLE).unwrap();
        config.apply_env_key(Some(String::new()));
        assert!(config.oracle.api_key.is_empty());
        config.apply_env_key(Some("sk-env".into()));
        assert_eq!(config.oracle.api_key, "sk-env");
        config.apply_env_key(Some("sk-other".into()));
        assert_eq!(config.oracle.api_key, "sk-env");
    }

    #[test]
    fn test_prompt_set_keeps_file_order() {
        let set = PromptSet::parse(
            r#"
            [[category]]
            name = "single_task"
            prompts = ["Calculate 2 + 2", "Translate hello to French"]

            [[category]]
            name = "two_dependent"
            prompts = ["Write a sort function and explain it"]
            "#,
        )
        .unwrap();
        assert_eq!(set.len(), 3);
        let order: Vec<_> = set.iter().map(|(c, i, _)| (c, i)).collect();
        assert_eq!(
            order,
            vec![("single_task", 0), ("single_task", 1), ("two_dependent", 0)]
        );
    }

    #[test]
    fn test_shipped_files_parse() {
        let config = TaskmeshConfig::parse(include_str!("../../../taskmesh.toml")).unwrap();
        assert_eq!(config.agents.len(), 5);
        assert_eq!(config.seed.len(), 4);
        let prompts = PromptSet::parse(include_str!("../../../prompts.toml")).unwrap();
        assert!(!prompts.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = PromptSet::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
