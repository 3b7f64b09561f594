//! Decomposer against a mocked OpenAI-compatible endpoint.

use std::sync::Arc;
use taskmesh_decomposer::{
    Decomposer, DecomposerOracle, DecompositionOutcome, OpenAiCompatibleOracle, OracleConfig,
    OracleProvider,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> OracleConfig {
    let mut config = OracleConfig::new(OracleProvider::LlamaCpp, "phi-3.5-mini");
    config.api_base_url = Some(server.uri());
    config.timeout_secs = 5;
    config
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    }))
}

fn channels() -> Vec<String> {
    ["code", "text", "math", "translate"]
        .iter()
        .map(|c| (*c).to_string())
        .collect()
}

#[tokio::test]
async fn test_decomposes_fenced_reply() {
    let server = MockServer::start().await;
    let reply = "```json\n{\"subtasks\": [\
        {\"id\": 1, \"channel\": \"tasks/math\", \"sub-task\": \"Calculate 9 * 9\", \"depends_on\": []},\
        {\"id\": 2, \"channel\": \"tasks/translate\", \"sub-task\": \"Translate the result to Arabic\", \"depends_on\": [1]}\
    ]}\n```";

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({ "model": "phi-3.5-mini", "max_tokens": 1024 })))
        .respond_with(chat_reply(reply))
        .expect(1)
        .mount(&server)
        .await;

    let oracle = OpenAiCompatibleOracle::new(config(&server)).unwrap();
    let decomposer = Decomposer::new(Arc::new(oracle), channels());
    let result = decomposer
        .decompose("Calculate 9 multiplied by 9 then translate the result to Arabic")
        .await;

    assert_eq!(result.outcome, DecompositionOutcome::Parsed);
    assert_eq!(result.subtasks.len(), 2);
    assert_eq!(result.subtasks[0].channel, "math");
    assert_eq!(result.subtasks[1].channel, "translate");
    assert!(result.subtasks[1].depends_on.contains(&1));
}

#[tokio::test]
async fn test_sends_bearer_token_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(chat_reply("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.api_key = "sk-test".to_string();
    let oracle = OpenAiCompatibleOracle::new(cfg).unwrap();
    assert_eq!(oracle.complete("sys", "user").await.unwrap(), "ok");
}

#[tokio::test]
async fn test_server_error_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"error": "boom"})))
        .mount(&server)
        .await;

    let oracle = OpenAiCompatibleOracle::new(config(&server)).unwrap();
    let err = oracle.complete("sys", "user").await.unwrap_err();
    assert!(err.to_string().contains("500"));

    let decomposer = Decomposer::new(Arc::new(oracle), channels());
    let result = decomposer.decompose("Define blockchain").await;
    assert!(result.is_fallback());
    assert_eq!(result.subtasks[0].text, "Define blockchain");
}

#[tokio::test]
async fn test_truncated_reply_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(chat_reply(
            "{\"subtasks\": [{\"id\": 1, \"channel\": \"tasks/code\", \"sub-task\": \"Write",
        ))
        .mount(&server)
        .await;

    let oracle = OpenAiCompatibleOracle::new(config(&server)).unwrap();
    let decomposer = Decomposer::new(Arc::new(oracle), channels());
    let result = decomposer.decompose("Write Python code to sort a list").await;
    assert!(result.is_fallback());
    assert_eq!(result.subtasks.len(), 1);
}
