pub mod openai;

use async_trait::async_trait;
use taskmesh_core::TaskmeshResult;

/// Trait for text-generation backends used to decompose prompts.
///
/// The oracle is opaque: it receives system instructions and a user message and
/// returns raw generated text, which may or may not contain valid JSON.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `DecomposerOracle` for your struct
/// 3. Add the variant to `OracleProvider` in `config.rs`
#[async_trait]
pub trait DecomposerOracle: Send + Sync {
    /// Generates a completion for the given instructions and user message.
    async fn complete(&self, system_instructions: &str, user_message: &str)
        -> TaskmeshResult<String>;
}
