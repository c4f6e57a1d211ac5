// src/heuristics/mod.rs

mod generic;

use crate::llm_extract::{LlmError, TextGenerator};
use async_trait::async_trait;
use serde_json::Value;

/// Offline stand-in for the language model: keyword-anchored regexes that
/// emit the same JSON object shape a model would. Values are raw matches;
/// normalization happens in coercion like for any other generator output.
pub struct HeuristicGenerator;

#[async_trait]
impl TextGenerator for HeuristicGenerator {
    async fn generate(&self, document_text: &str) -> Result<String, LlmError> {
        Ok(extract_fields(document_text).to_string())
    }

    fn describe(&self) -> String {
        "heuristics".to_string()
    }
}

/// Extract a loosely-typed logistics object from raw document text.
pub fn extract_fields(text: &str) -> Value {
    generic::extract(text)
}
