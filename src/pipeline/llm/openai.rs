//! OpenAI-compatible chat-completions client.
//!
//! Works against api.openai.com and any server exposing the same
//! `/v1/chat/completions` surface (vLLM, LiteLLM proxies, ...).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::LlmError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request<'a>(model: &'a str, prompt: &'a str, system: &'a str) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: prompt,
    });
    ChatRequest {
        model,
        messages,
        temperature: 0.0,
    }
}

fn first_completion(response: ChatResponse, model: &str) -> Result<String, LlmError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::EmptyCompletion(model.to_string()))
}

impl LlmClient for OpenAiClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&build_request(model, prompt, system));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| LlmError::from_reqwest(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        first_completion(parsed, model)
    }
}
