// src/llm_extract.rs

use crate::config::{LlmBackend, LlmSection};
use crate::heuristics::HeuristicGenerator;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Instruction sent ahead of every document. The model is asked for bare
/// JSON; whatever it actually returns goes through recovery anyway.
pub const SYSTEM_PROMPT: &str = r#"You extract data from logistics documents.

First decide which kind of document the text is:
- a commercial invoice -> document_type "Invoice"
- a bill of lading -> document_type "Bill"
- a certificate of origin (C/O) -> document_type "CO"

Then fill in the fields that apply to that kind:
- Invoice: invoice_number, total_amount, currency, issue_date, supplier_name
- Bill: bill_number, etd, eta, vessel_name, port_of_loading, port_of_discharge
- CO: form_type, issue_date, exporter_name, importer_name, country_of_origin

Rules:
- Reply with one JSON object and nothing else. No markdown, no explanation.
- Always include all keys below. Use null for anything not in the document.
- Dates as YYYY-MM-DD.
- total_amount is a plain number: no thousands separators, no currency sign.
- currency is a 3-letter ISO code.

{
  "document_type": "",
  "invoice_number": null,
  "total_amount": null,
  "currency": null,
  "issue_date": null,
  "supplier_name": null,
  "bill_number": null,
  "etd": null,
  "eta": null,
  "vessel_name": null,
  "port_of_loading": null,
  "port_of_discharge": null,
  "form_type": null,
  "exporter_name": null,
  "importer_name": null,
  "country_of_origin": null
}"#;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("GROQ_API_KEY env var required for the groq backend")]
    MissingApiKey,
}

/// Anything that turns document text into (hopefully) a JSON object string.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, document_text: &str) -> Result<String, LlmError>;

    /// Backend/model label for logs.
    fn describe(&self) -> String;

    async fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
enum Endpoint {
    Groq {
        base_url: String,
        model: String,
        api_key: String,
        max_tokens: u32,
    },
    Ollama {
        base_url: String,
        model: String,
    },
}

/// HTTP client for the Groq (OpenAI-compatible) and Ollama chat APIs.
pub struct LlmClient {
    endpoint: Endpoint,
    client: Client,
    max_content_chars: usize,
}

/// Build the generator selected by `llm.backend`.
pub fn build_generator(llm: &LlmSection) -> Result<Arc<dyn TextGenerator>, LlmError> {
    match llm.backend {
        LlmBackend::Heuristics => {
            info!("Using heuristics (offline) backend");
            Ok(Arc::new(HeuristicGenerator))
        }
        _ => Ok(Arc::new(LlmClient::from_config(llm)?)),
    }
}

impl LlmClient {
    pub fn from_config(llm: &LlmSection) -> Result<Self, LlmError> {
        let endpoint = resolve_endpoint(llm)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(llm.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        Ok(Self {
            endpoint,
            client,
            max_content_chars: llm.max_content_chars,
        })
    }

    async fn call_groq(
        &self,
        base_url: &str,
        model: &str,
        api_key: &str,
        max_tokens: u32,
        text: &str,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model,
            messages: prompt_messages(text),
            max_tokens: Some(max_tokens),
            temperature: 0.0,
        };
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let response = ensure_success(response).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn call_ollama(&self, base_url: &str, model: &str, text: &str) -> Result<String, LlmError> {
        let request = OllamaChatRequest {
            model,
            messages: prompt_messages(text),
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
        };
        let url = format!("{}/api/chat", base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        let response = ensure_success(response).await?;

        let chat: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(chat.message.and_then(|m| m.content).unwrap_or_default())
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, document_text: &str) -> Result<String, LlmError> {
        let text = truncate_content(document_text, self.max_content_chars);
        if text.len() < document_text.len() {
            debug!(
                original_bytes = document_text.len(),
                kept_bytes = text.len(),
                "Truncated document text"
            );
        }

        match &self.endpoint {
            Endpoint::Groq {
                base_url,
                model,
                api_key,
                max_tokens,
            } => {
                self.call_groq(base_url, model, api_key, *max_tokens, text)
                    .await
            }
            Endpoint::Ollama { base_url, model } => self.call_ollama(base_url, model, text).await,
        }
    }

    fn describe(&self) -> String {
        match &self.endpoint {
            Endpoint::Groq { model, .. } => format!("groq/{model}"),
            Endpoint::Ollama { model, .. } => format!("ollama/{model}"),
        }
    }

    /// Ollama answers on its root URL; Groq on the models list.
    async fn is_available(&self) -> bool {
        let request = match &self.endpoint {
            Endpoint::Ollama { base_url, .. } => self.client.get(base_url.trim_end_matches('/')),
            Endpoint::Groq {
                base_url, api_key, ..
            } => self
                .client
                .get(format!("{}/models", base_url.trim_end_matches('/')))
                .bearer_auth(api_key),
        };

        match request.timeout(Duration::from_secs(3)).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(backend = %self.describe(), "LLM backend is reachable");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "LLM backend returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "LLM backend not reachable");
                false
            }
        }
    }
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(llm: &LlmSection) -> Result<Endpoint, LlmError> {
    let use_groq = match llm.backend {
        LlmBackend::Groq => true,
        LlmBackend::Ollama => false,
        LlmBackend::Auto | LlmBackend::Heuristics => llm.groq.api_key.is_some(),
    };

    if use_groq {
        let api_key = llm.groq.api_key.clone().ok_or(LlmError::MissingApiKey)?;
        info!(url = %llm.groq.base_url, model = %llm.groq.model, "Using Groq backend");
        Ok(Endpoint::Groq {
            base_url: llm.groq.base_url.clone(),
            model: llm.groq.model.clone(),
            api_key,
            max_tokens: llm.groq.max_tokens,
        })
    } else {
        info!(url = %llm.ollama.base_url, model = %llm.ollama.model, "Using Ollama (local) backend");
        Ok(Endpoint::Ollama {
            base_url: llm.ollama.base_url.clone(),
            model: llm.ollama.model.clone(),
        })
    }
}

fn prompt_messages(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: Some(SYSTEM_PROMPT.to_string()),
        },
        ChatMessage {
            role: "user".to_string(),
            content: Some(text.to_string()),
        },
    ]
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Api { status, body })
}

/// Cut to at most `max_chars` characters.
fn truncate_content(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
