//! OpenAI API provider.
//!
//! Diagnoses go through the Chat Completions API; key validation lists models,
//! which costs nothing and changes no state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{DiagnosisError, DiagnosticClient, KeyCheck, KeyValidator};
use crate::config::DiagnosisConfig;
use crate::credentials::Credential;

/// System prompt for failure diagnosis
const SYSTEM_PROMPT: &str = r#"You are a terminal copilot for experienced developers.
You see a command that just failed. Your job is to tell the developer what to do next.

You MUST respond in this exact format:

Issue:
<one clear sentence explaining the real problem>

Fix:
<one clear sentence describing the correct fix>

Command:
<one shell command OR "No command needed">

Critical rules:
- Do NOT blindly trust the error message.
- If a module name looks incorrect, outdated, or fake, say so.
- If the suggested package does not exist or is commonly mistaken, correct it.
- Prefer correcting the import over installing the wrong dependency.
- Be decisive, not obedient.
- Do NOT explain theory.
- Do NOT give multiple options.
- Do NOT use markdown code blocks."#;

/// OpenAI provider
pub struct OpenAIProvider {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIProvider {
    pub fn new(config: &DiagnosisConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder, key: &str) -> RequestBuilder {
        request.header("Authorization", format!("Bearer {key}"))
    }

    /// Build the request body
    fn build_request(&self, command: &str, output: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format_input(command, output),
                },
            ],
        }
    }
}

fn format_input(command: &str, output: &str) -> String {
    format!("Command run: {command}\n\nError output: {output}")
}

/// Turn a non-success response into an API error, preferring the service's
/// own `error.message` over the raw body.
async fn api_error(response: reqwest::Response) -> DiagnosisError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body.trim().to_string()
            }
        });

    DiagnosisError::Api {
        status: status.as_u16(),
        message,
    }
}

fn network_error(e: reqwest::Error) -> DiagnosisError {
    DiagnosisError::Network(e.to_string())
}

#[async_trait]
impl KeyValidator for OpenAIProvider {
    async fn validate_key(&self, key: &str) -> Result<KeyCheck, DiagnosisError> {
        let response = self
            .authorized(self.client.get(self.endpoint("models")), key)
            .send()
            .await
            .map_err(network_error)?;

        match response.status() {
            s if s.is_success() => Ok(KeyCheck::Accepted),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(KeyCheck::Rejected),
            _ => Err(api_error(response).await),
        }
    }
}

#[async_trait]
impl DiagnosticClient for OpenAIProvider {
    async fn diagnose(
        &self,
        credential: &Credential,
        command: &str,
        output: &str,
    ) -> Result<String, DiagnosisError> {
        let request = self.build_request(command, output);

        let response = self
            .authorized(
                self.client.post(self.endpoint("chat/completions")),
                credential.secret(),
            )
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let body: ChatCompletionResponse = response.json().await.map_err(network_error)?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(DiagnosisError::EmptyResponse);
        }
        Ok(content)
    }
}

// API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
