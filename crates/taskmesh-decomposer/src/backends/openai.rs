use super::DecomposerOracle;
use crate::config::OracleConfig;
use async_trait::async_trait;
use std::time::Duration;
use taskmesh_core::{TaskmeshError, TaskmeshResult};
use tracing::{debug, warn};

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, Ollama, llama.cpp's server, and any other endpoint that
/// implements `POST /v1/chat/completions`.
pub struct OpenAiCompatibleOracle {
    config: OracleConfig,
    http: reqwest::Client,
}

impl OpenAiCompatibleOracle {
    /// Builds the HTTP client with the configured timeout.
    pub fn new(config: OracleConfig) -> TaskmeshResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| TaskmeshError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn build_body(&self, system_instructions: &str, user_message: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": system_instructions },
                { "role": "user", "content": user_message },
            ],
        });
        if !self.config.stop.is_empty() {
            body["stop"] = serde_json::json!(self.config.stop);
        }
        body
    }

    fn add_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }
}

#[async_trait]
impl DecomposerOracle for OpenAiCompatibleOracle {
    async fn complete(
        &self,
        system_instructions: &str,
        user_message: &str,
    ) -> TaskmeshResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = self.build_body(system_instructions, user_message);

        debug!(url = %url, model = %self.config.model_id, "Requesting decomposition");

        let resp = self
            .add_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| TaskmeshError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TaskmeshError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(TaskmeshError::Http(format!(
                "Oracle API error {status}: {resp_body}"
            )));
        }

        parse_chat_response(&resp_body)
    }
}

/// Extracts the generated text from a chat completions response body.
pub fn parse_chat_response(body: &serde_json::Value) -> TaskmeshResult<String> {
    let choice = &body["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .or_else(|| choice["text"].as_str())
        .ok_or_else(|| {
            TaskmeshError::Decomposer("Oracle response has no message content".to_string())
        })?;

    if choice["finish_reason"].as_str() == Some("length") {
        warn!("Oracle output hit the token limit and may be truncated");
    }

    Ok(content.trim().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::OracleProvider;

    #[test]
    fn test_parse_chat_response() {
        let body = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  {\"subtasks\": []}\n" }, "finish_reason": "stop" }]
        });
        assert_eq!(parse_chat_response(&body).unwrap(), "{\"subtasks\": []}");
    }

    #[test]
    fn test_parse_completion_style_response() {
        let body = serde_json::json!({ "choices": [{ "text": "raw", "finish_reason": "length" }] });
        assert_eq!(parse_chat_response(&body).unwrap(), "raw");
    }

    #[test]
    fn test_parse_response_without_content() {
        let body = serde_json::json!({ "choices": [] });
        assert!(matches!(
            parse_chat_response(&body),
            Err(TaskmeshError::Decomposer(_))
        ));
    }

    #[test]
    fn test_body_includes_stop_only_when_configured() {
        let mut config = OracleConfig::new(OracleProvider::LlamaCpp, "phi");
        let oracle = OpenAiCompatibleOracle::new(config.clone()).unwrap();
        let body = oracle.build_body("sys", "user");
        assert!(body.get("stop").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");

        config.stop = vec!["<|end|>".to_string()];
        let oracle = OpenAiCompatibleOracle::new(config).unwrap();
        assert_eq!(oracle.build_body("s", "u")["stop"][0], "<|end|>");
    }
}
