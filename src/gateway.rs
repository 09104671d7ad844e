use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// LLM capability level selected per caller role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Standard,
    Advanced,
}

impl ModelTier {
    pub fn model_name(&self) -> &'static str {
        match self {
            ModelTier::Standard => "gpt-4o-mini",
            ModelTier::Advanced => "gpt-4o",
        }
    }
}

/// One entry of the transcript handed to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

/// Everything the gateway needs for one completion call: a synthesized
/// system preamble plus the bounded transcript window, oldest first.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    pub transcript: Vec<PromptMessage>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("completion request timed out or provider unreachable")]
    Timeout,

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider rejected credentials")]
    AuthError,

    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout => "timeout",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::AuthError => "auth_error",
            GatewayError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Boundary adapter for the chat-completion provider. No persistence, no
/// retries; failures map deterministically onto [`GatewayError`] so the
/// orchestrator can decide recoverability.
#[rocket::async_trait]
pub trait TutorGateway: Send + Sync {
    async fn complete(&self, tier: ModelTier, prompt: &ChatPrompt)
    -> Result<String, GatewayError>;
}

pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            warn!("OPENAI_API_KEY is not set; completion calls will be rejected upstream");
        }

        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let timeout_secs = std::env::var("ALERS_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            api_key,
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            max_tokens: 2048,
        }
    }
}

pub struct OpenAiGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<&'a PromptMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl OpenAiGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, config }
    }

    fn map_status(status: u16, body: &str) -> GatewayError {
        match status {
            429 => GatewayError::RateLimited,
            401 | 403 => GatewayError::AuthError,
            _ => GatewayError::InvalidResponse(format!("status {}: {}", status, body)),
        }
    }

    fn extract_reply(response: CompletionResponse) -> Result<String, GatewayError> {
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "completion had no content".to_string(),
            ));
        }

        Ok(content)
    }
}

#[rocket::async_trait]
impl TutorGateway for OpenAiGateway {
    #[instrument(skip_all, fields(model = tier.model_name(), transcript_len = prompt.transcript.len()))]
    async fn complete(
        &self,
        tier: ModelTier,
        prompt: &ChatPrompt,
    ) -> Result<String, GatewayError> {
        let system = PromptMessage {
            role: "system",
            content: prompt.system.clone(),
        };

        let mut messages = vec![&system];
        messages.extend(prompt.transcript.iter());

        let request = CompletionRequest {
            model: tier.model_name(),
            messages,
            temperature: 0.7,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                // Timeouts and transport failures are the same outcome to the
                // caller: no reply within the bounded wait.
                warn!(error = %e, "Completion request failed in transport");
                GatewayError::Timeout
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Self::map_status(status.as_u16(), &body));
        }

        let parsed = response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let reply = Self::extract_reply(parsed)?;
        info!(reply_len = reply.len(), "Completion received");

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_deterministic() {
        assert!(matches!(
            OpenAiGateway::map_status(429, ""),
            GatewayError::RateLimited
        ));
        assert!(matches!(
            OpenAiGateway::map_status(401, ""),
            GatewayError::AuthError
        ));
        assert!(matches!(
            OpenAiGateway::map_status(403, ""),
            GatewayError::AuthError
        ));
        assert!(matches!(
            OpenAiGateway::map_status(500, "boom"),
            GatewayError::InvalidResponse(_)
        ));
        assert!(matches!(
            OpenAiGateway::map_status(404, ""),
            GatewayError::InvalidResponse(_)
        ));
    }

    #[test]
    fn empty_completion_is_invalid() {
        let response = CompletionResponse { choices: vec![] };
        assert!(matches!(
            OpenAiGateway::extract_reply(response),
            Err(GatewayError::InvalidResponse(_))
        ));

        let response = CompletionResponse {
            choices: vec![CompletionChoice {
                message: CompletionMessage { content: None },
            }],
        };
        assert!(matches!(
            OpenAiGateway::extract_reply(response),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[test]
    fn completion_content_is_extracted() {
        let response = CompletionResponse {
            choices: vec![CompletionChoice {
                message: CompletionMessage {
                    content: Some("Recursion is...".to_string()),
                },
            }],
        };
        assert_eq!(
            OpenAiGateway::extract_reply(response).unwrap(),
            "Recursion is..."
        );
    }

    #[test]
    fn tiers_map_to_models() {
        assert_eq!(ModelTier::Standard.model_name(), "gpt-4o-mini");
        assert_eq!(ModelTier::Advanced.model_name(), "gpt-4o");
    }
}
