//! HTTP completion gateway for OpenAI-compatible, Anthropic and Ollama endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tempra_core::config::{LlmConfig, LlmProvider};
use tempra_core::{ChatMessage, GatewayError, Role};
use tracing::{debug, warn};

use crate::llm::{CompletionGateway, CompletionRequest, ModelHint};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const RETRY_BACKOFF_MS: u64 = 250;

pub struct HttpCompletionGateway {
    client: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    fast_model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl HttpCompletionGateway {
    pub fn from_config(config: &LlmConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| GatewayError::Configuration(error.to_string()))?;

        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(url)) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_owned(),
            (LlmProvider::OpenAi, _) => "https://api.openai.com/v1".to_owned(),
            (LlmProvider::Anthropic, _) => "https://api.anthropic.com".to_owned(),
            (LlmProvider::Ollama, _) => {
                return Err(GatewayError::Configuration(
                    "llm.base_url is required for ollama provider".to_owned(),
                ))
            }
        };

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            fast_model: config.fast_model().to_owned(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/v1/messages", self.base_url),
            LlmProvider::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn model_for(&self, hint: ModelHint) -> &str {
        match hint {
            ModelHint::Fast => &self.fast_model,
            ModelHint::Capable => &self.model,
        }
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let Some(key) = &self.api_key else {
            return Ok(headers);
        };
        let invalid = |error: reqwest::header::InvalidHeaderValue| {
            GatewayError::Configuration(format!("llm.api_key is not a valid header: {error}"))
        };
        match self.provider {
            LlmProvider::Anthropic => {
                headers.insert("x-api-key", HeaderValue::from_str(key.expose_secret()).map_err(invalid)?);
                headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
            }
            LlmProvider::OpenAi | LlmProvider::Ollama => {
                let bearer = format!("Bearer {}", key.expose_secret());
                headers.insert(AUTHORIZATION, HeaderValue::from_str(&bearer).map_err(invalid)?);
            }
        }
        Ok(headers)
    }

    fn body(&self, request: &CompletionRequest) -> Result<serde_json::Value, GatewayError> {
        let model = self.model_for(request.model);
        let encoded = match self.provider {
            LlmProvider::OpenAi => serde_json::to_value(OpenAiRequest {
                model,
                messages: wire_messages(&request.messages),
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            }),
            LlmProvider::Ollama => serde_json::to_value(OllamaRequest {
                model,
                messages: wire_messages(&request.messages),
                stream: false,
                options: OllamaOptions {
                    temperature: request.temperature,
                    num_predict: request.max_tokens,
                },
            }),
            LlmProvider::Anthropic => {
                let (system, messages) = anthropic_messages(&request.messages);
                serde_json::to_value(AnthropicRequest {
                    model,
                    max_tokens: request.max_tokens,
                    temperature: request.temperature,
                    system,
                    messages,
                })
            }
        };
        encoded.map_err(|error| GatewayError::Configuration(error.to_string()))
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(self.endpoint())
            .headers(self.headers()?)
            .json(&self.body(request)?)
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status: status.as_u16(), body });
        }

        let text = response.text().await.map_err(|error| self.transport_error(error))?;
        extract_content(self.provider, &text)
    }

    fn transport_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout { after_secs: self.timeout_secs }
        } else {
            GatewayError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl CompletionGateway for HttpCompletionGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(content) => {
                    debug!(
                        event_name = "llm.request.completed",
                        provider = ?self.provider,
                        model = self.model_for(request.model),
                        attempt,
                        "completion succeeded"
                    );
                    return Ok(content);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.request.retry",
                        provider = ?self.provider,
                        attempt,
                        error = %error,
                        "retrying completion request"
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt)))
                        .await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ContentMessage,
}

#[derive(Debug, Deserialize)]
struct ContentMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ContentMessage,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .filter(|message| !message.is_blank())
        .map(|message| WireMessage { role: message.role.as_str(), content: &message.content })
        .collect()
}

/// Anthropic takes system text separately and needs the conversation to open and close on a
/// user turn. A trailing assistant turn would be continued as a prefill, so it moves into the
/// system text instead.
fn anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage<'_>>) {
    let mut system: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == Role::System && !message.is_blank())
        .map(|message| message.content.as_str())
        .collect();

    let mut conversation: Vec<WireMessage<'_>> = messages
        .iter()
        .filter(|message| message.role != Role::System && !message.is_blank())
        .map(|message| WireMessage { role: message.role.as_str(), content: &message.content })
        .collect();
    let mut trailing = Vec::new();
    while conversation.last().map_or(false, |message| message.role != "user") {
        if let Some(message) = conversation.pop() {
            trailing.push(message.content);
        }
    }
    trailing.reverse();
    system.extend(trailing);

    if conversation.first().map(|message| message.role != "user").unwrap_or(true) {
        conversation.insert(0, WireMessage { role: "user", content: "(conversation so far)" });
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, conversation)
}

fn extract_content(provider: LlmProvider, body: &str) -> Result<String, GatewayError> {
    let malformed = |error: serde_json::Error| {
        GatewayError::Transport(format!("malformed completion payload: {error}"))
    };
    let content = match provider {
        LlmProvider::OpenAi => serde_json::from_str::<OpenAiResponse>(body)
            .map_err(malformed)?
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content),
        LlmProvider::Ollama => {
            serde_json::from_str::<OllamaResponse>(body).map_err(malformed)?.message.content
        }
        LlmProvider::Anthropic => {
            let blocks = serde_json::from_str::<AnthropicResponse>(body).map_err(malformed)?.content;
            let text: Vec<String> = blocks
                .into_iter()
                .filter(|block| block.kind == "text")
                .filter_map(|block| block.text)
                .collect();
            (!text.is_empty()).then(|| text.join(""))
        }
    };

    content.filter(|text| !text.trim().is_empty()).ok_or(GatewayError::EmptyResponse)
}
