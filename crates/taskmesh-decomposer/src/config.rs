use serde::{Deserialize, Serialize};

/// Oracle endpoint flavour. All of them speak the OpenAI chat completions API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// api.openai.com or any hosted compatible service.
    OpenAi,
    /// A local Ollama daemon.
    Ollama,
    /// A local llama.cpp server.
    LlamaCpp,
}

/// Connection and generation settings for the decomposition oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Endpoint flavour.
    pub provider: OracleProvider,
    /// Model name sent with every request.
    pub model_id: String,
    /// Bearer token; empty means no `Authorization` header.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default base URL.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Generation cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Stop sequences forwarded to the endpoint.
    #[serde(default)]
    pub stop: Vec<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    120
}

impl OracleConfig {
    /// Creates a config with default generation settings.
    pub fn new(provider: OracleProvider, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                OracleProvider::OpenAi => "https://api.openai.com",
                OracleProvider::Ollama => "http://localhost:11434",
                OracleProvider::LlamaCpp => "http://localhost:8080",
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_toml() {
        let config: OracleConfig = toml::from_str(
            r#"
            provider = "llamacpp"
            model_id = "phi-3.5-mini-instruct"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider, OracleProvider::LlamaCpp);
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.max_tokens, 1024);
        assert!(config.api_key.is_empty());
        assert_eq!(config.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_base_url_override_strips_slash() {
        let mut config = OracleConfig::new(OracleProvider::OpenAi, "gpt-4o-mini");
        assert_eq!(config.base_url(), "https://api.openai.com");
        config.api_base_url = Some("http://10.0.0.5:8000/".to_string());
        assert_eq!(config.base_url(), "http://10.0.0.5:8000");
    }
}
