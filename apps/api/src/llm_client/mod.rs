//! LLM Client: the single point of entry for all text-generation calls.
//!
//! ARCHITECTURAL RULE: No other module may call the chat-completions API directly.
//! All LLM interactions MUST go through this module.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. Callers take the uniform
//! `GenerationOutcome` (never an error) and decode JSON payloads with `parse_json`.
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

pub mod prompts;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 1500;
const TEMPERATURE: f32 = 0.3;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM API key is not configured")]
    MissingApiKey,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatResponse {
    /// Extracts the text content of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Uniform result of a generation request: either content or an error message, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub success: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The single LLM client used by all services.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl LlmClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()?,
            api_url: api_url.into(),
            api_key,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Makes a raw chat-completions call with a system prompt and one user message.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub async fn call(
        &self,
        system: &str,
        user_content: &str,
        max_tokens: u32,
    ) -> Result<ChatResponse, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let request_body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            max_tokens,
            temperature: TEMPERATURE,
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let chat_response: ChatResponse = response.json().await?;

            if let Some(usage) = &chat_response.usage {
                debug!(
                    "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }

            return Ok(chat_response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    /// Calls the model and folds every failure into the returned outcome.
    pub async fn generate(
        &self,
        system: &str,
        user_content: &str,
        max_tokens: u32,
    ) -> GenerationOutcome {
        match self.call(system, user_content, max_tokens).await {
            Ok(response) => GenerationOutcome {
                success: true,
                content: response.text().unwrap_or_default().to_string(),
                usage: response.usage,
                error: None,
            },
            Err(e) => {
                error!("LLM API error: {e}");
                GenerationOutcome {
                    success: false,
                    content: String::new(),
                    usage: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Deserializes model output as JSON, tolerating markdown code fences around it.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let text = json_payload(text);
    if text.is_empty() {
        return Err(LlmError::EmptyContent);
    }
    serde_json::from_str(text).map_err(LlmError::Parse)
}

/// The JSON document inside model output: the body of the first code fence if there is
/// one, otherwise the span from the first `{` or `[` to the last `}` or `]`.
fn json_payload(text: &str) -> &str {
    let opens = |c: char| c == '{' || c == '[';
    let closes = |c: char| c == '}' || c == ']';

    if let Some(fence) = text.find("```") {
        let body = &text[fence + 3..];
        // An info string such as `json` sits on the fence line.
        let body = if body.trim_start().starts_with(opens) {
            body
        } else {
            body.split_once('\n').map_or("", |(_, rest)| rest)
        };
        let body = body.find("```").map_or(body, |end| &body[..end]);
        return body.trim();
    }

    match (text.find(opens), text.rfind(closes)) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_payload_inside_tagged_fence_after_prose() {
        let reply = "Here is the analysis:\n```json\n{\"matchScore\": 61}\n```\nGood luck!";
        assert_eq!(json_payload(reply), "{\"matchScore\": 61}");
    }

    #[test]
    fn test_payload_in_unterminated_fence() {
        assert_eq!(json_payload("```\n[\"a\", \"b\"]\n"), "[\"a\", \"b\"]");
    }

    #[test]
    fn test_payload_wrapped_in_prose_without_fence() {
        let reply = "Sure! {\"technical\": [\"Explain lifetimes\"]} Hope that helps.";
        assert_eq!(
            json_payload(reply),
            "{\"technical\": [\"Explain lifetimes\"]}"
        );
    }

    #[test]
    fn test_empty_fence_is_empty_content() {
        let err = parse_json::<serde_json::Value>("```json\n\n```").unwrap_err();
        assert!(matches!(err, LlmError::EmptyContent));
    }

    #[test]
    fn test_request_uses_fixed_temperature_and_two_messages() {
        let body = serde_json::to_value(ChatRequest {
            model: DEFAULT_MODEL,
            messages: [
                ChatMessage {
                    role: "system",
                    content: "be precise",
                },
                ChatMessage {
                    role: "user",
                    content: "cv text",
                },
            ],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: TEMPERATURE,
        })
        .unwrap();
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "cv text");
        assert_eq!(body["max_tokens"], 1500);
    }

    #[test]
    fn test_parse_json_rejects_empty_content() {
        let result = parse_json::<serde_json::Value>("  ");
        assert!(matches!(result, Err(LlmError::EmptyContent)));
    }

    #[tokio::test]
    async fn test_generate_returns_content_and_usage() {
        let llm = test_support::client_replying("hello").await;
        let outcome = llm.generate("system", "user", 100).await;
        assert!(outcome.success);
        assert_eq!(outcome.content, "hello");
        assert_eq!(outcome.usage.map(|u| u.total_tokens), Some(160));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_generate_translates_api_errors() {
        let llm = test_support::serve(
            StatusCode::BAD_REQUEST,
            json!({ "error": { "message": "context length exceeded" } }),
        )
        .await;
        let outcome = llm.generate("system", "user", 100).await;
        assert!(!outcome.success);
        assert!(outcome.content.is_empty());
        assert!(outcome
            .error
            .as_deref()
            .unwrap()
            .contains("context length exceeded"));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_without_a_request() {
        let llm = LlmClient::new("http://127.0.0.1:9/unused", None, DEFAULT_MODEL).unwrap();
        assert!(!llm.is_configured());
        let result = llm.call("system", "user", 10).await;
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_fenced_reply_parses_as_json() {
        let llm = test_support::client_replying("```json\n{\"matchScore\": 71}\n```").await;
        let outcome = llm.generate("system", "user", 100).await;
        let value: serde_json::Value = parse_json(&outcome.content).unwrap();
        assert_eq!(value["matchScore"], 71);
    }
}
