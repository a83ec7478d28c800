//! Gemini REST client
//!
//! Speaks `models/{model}:generateContent` for batched answers and
//! `models/{model}:streamGenerateContent?alt=sse` for streamed answers.
//! Images are sent inline as base64.

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use super::{FragmentStream, Reasoner, ReasonerError};
use crate::config::ReasonerConfig;
use crate::errors::{AppError, Result};
use crate::models::{ConversationTurn, Role};

const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Finish reasons that mean the provider withheld the answer for safety
const SAFETY_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Gemini reasoner client
pub struct GeminiReasoner {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    text_model: String,
    vision_model: String,
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

impl GeminiReasoner {
    /// Create a new Gemini client. Fails when no credential is configured.
    pub fn new(config: &ReasonerConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AppError::configuration("Gemini API key is not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE.to_string()),
            text_model: config.text_model.clone(),
            vision_model: config.vision_model.clone(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    fn text_request(&self, history: &[ConversationTurn], prompt: &str) -> GenerateContentRequest {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: Some(role_name(turn.role).to_string()),
                parts: vec![Part::text(turn.text.clone())],
            })
            .collect();

        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(prompt)],
        });

        GenerateContentRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateContentRequest,
    ) -> std::result::Result<Response, ReasonerError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        Ok(response)
    }

    async fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> std::result::Result<String, ReasonerError> {
        let url = self.endpoint(model, "generateContent");

        tracing::debug!(
            model = %model,
            contents = body.contents.len(),
            "Sending Gemini request"
        );

        let response = self.post(&url, body).await?;
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ReasonerError::unavailable(format!("Failed to parse response: {}", e)))?;

        match answer_text(&parsed)? {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(ReasonerError::unavailable("Empty response from reasoner")),
        }
    }

    /// Map a non-success HTTP response. Safety blocks arrive as 200 and are
    /// handled by `answer_text`, so every status here is a provider fault.
    async fn handle_error_response(response: Response) -> ReasonerError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        match status.as_u16() {
            401 | 403 => ReasonerError::unavailable(format!("Authentication failed: {}", detail)),
            429 => ReasonerError::unavailable(format!("Quota exceeded: {}", detail)),
            500..=599 => ReasonerError::unavailable(format!("Server error {}: {}", status, detail)),
            _ => ReasonerError::unavailable(format!("HTTP {}: {}", status, detail)),
        }
    }
}

#[async_trait]
impl Reasoner for GeminiReasoner {
    async fn generate_text(
        &self,
        history: &[ConversationTurn],
        prompt: &str,
    ) -> std::result::Result<String, ReasonerError> {
        let body = self.text_request(history, prompt);
        self.generate(&self.text_model, &body).await
    }

    async fn generate_from_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> std::result::Result<String, ReasonerError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        }),
                    },
                    Part::text(prompt),
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        self.generate(&self.vision_model, &body).await
    }

    async fn generate_stream(
        &self,
        history: &[ConversationTurn],
        prompt: &str,
    ) -> std::result::Result<FragmentStream, ReasonerError> {
        let body = self.text_request(history, prompt);
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&self.text_model, "streamGenerateContent")
        );

        let response = self.post(&url, &body).await?;
        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn transport_error(e: reqwest::Error) -> ReasonerError {
    if e.is_timeout() {
        ReasonerError::unavailable(format!("Request timed out: {}", e))
    } else {
        ReasonerError::unavailable(format!("Request failed: {}", e))
    }
}

/// Text of the first candidate, or a rejection when the provider blocked it
fn answer_text(
    response: &GenerateContentResponse,
) -> std::result::Result<Option<String>, ReasonerError> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_ref())
    {
        return Err(ReasonerError::rejected(reason.clone()));
    }

    let Some(candidate) = response.candidates.first() else {
        return Ok(None);
    };

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if SAFETY_FINISH_REASONS.contains(&reason) {
            return Err(ReasonerError::rejected(reason));
        }
    }

    let text: String = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    Ok(Some(text))
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Streaming
// ─────────────────────────────────────────────────────────────────────────────

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    /// Raw bytes not yet split into lines; a multibyte character may straddle chunks
    buffer: Vec<u8>,
    done: bool,
}

impl SseState {
    /// Take the next complete line, or the unterminated tail once the body has ended
    fn next_line(&mut self) -> Option<String> {
        let line_end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.done && !self.buffer.is_empty() => self.buffer.len(),
            None => return None,
        };
        let line: Vec<u8> = self.buffer.drain(..line_end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// Decode one SSE line. `None` means the line carries no answer text.
fn sse_event(line: &str) -> Option<std::result::Result<String, ReasonerError>> {
    let data = line.strip_prefix("data:")?;

    let parsed = match serde_json::from_str::<GenerateContentResponse>(data.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed SSE event");
            return None;
        }
    };

    match answer_text(&parsed) {
        Ok(Some(text)) if !text.is_empty() => Some(Ok(text)),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    }
}

fn parse_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> FragmentStream {
    Box::pin(futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: Vec::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                while let Some(line) = state.next_line() {
                    match sse_event(&line) {
                        Some(Ok(text)) => return Some((Ok(text), state)),
                        Some(Err(e)) => {
                            state.buffer.clear();
                            state.done = true;
                            return Some((Err(e), state));
                        }
                        None => continue,
                    }
                }

                if state.done {
                    return None;
                }

                // Need more data
                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        state.buffer.clear();
                        state.done = true;
                        return Some((Err(transport_error(e)), state));
                    }
                    None => state.done = true,
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> GenerateContentResponse {
        serde_json::from_str(json).unwrap()
    }

    fn config_with_key() -> ReasonerConfig {
        ReasonerConfig {
            api_key: Some("test-key".to_string()),
            ..ReasonerConfig::default()
        }
    }

    #[test]
    fn test_answer_text_joins_parts() {
        let response = parse(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hb "},{"text":"normal"}]},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(answer_text(&response).unwrap(), Some("Hb normal".to_string()));
    }

    #[test]
    fn test_prompt_block_is_rejection() {
        let response = parse(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        assert_eq!(
            answer_text(&response),
            Err(ReasonerError::rejected("SAFETY"))
        );
    }

    #[test]
    fn test_safety_finish_reason_is_rejection() {
        let response = parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        assert!(matches!(
            answer_text(&response),
            Err(ReasonerError::Rejected { .. })
        ));
    }

    #[test]
    fn test_text_request_maps_roles() {
        let reasoner = GeminiReasoner::new(&config_with_key()).unwrap();
        let history = vec![
            ConversationTurn::transient(Role::User, "question"),
            ConversationTurn::transient(Role::Assistant, "answer"),
        ];

        let request = reasoner.text_request(&history, "follow up");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "follow up");
        assert!(json["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn test_endpoint_trims_base() {
        let config = ReasonerConfig {
            api_base: Some("http://localhost:9999/v1beta/".to_string()),
            ..config_with_key()
        };
        let reasoner = GeminiReasoner::new(&config).unwrap();
        assert_eq!(
            reasoner.endpoint("gemini-1.5-flash", "generateContent"),
            "http://localhost:9999/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_sse_stream_yields_fragments() {
        let events: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from(
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Line one\\n\"}]}}]}\n\n",
            )),
            Ok(Bytes::from("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Line ")),
            Ok(Bytes::from("two\"}]},\"finishReason\":\"STOP\"}]}\n\n")),
        ];

        let stream = parse_sse_stream(futures::stream::iter(events));
        let fragments: Vec<_> = stream.collect().await;

        assert_eq!(
            fragments,
            vec![Ok("Line one\n".to_string()), Ok("Line two".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sse_stream_stops_on_rejection() {
        let events: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::from(
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n",
            )),
            Ok(Bytes::from("data: {\"candidates\":[{\"finishReason\":\"SAFETY\"}]}\n")),
            Ok(Bytes::from(
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"never\"}]}}]}\n",
            )),
        ];

        let fragments: Vec<_> = parse_sse_stream(futures::stream::iter(events)).collect().await;

        assert_eq!(fragments.len(), 2);
        assert!(matches!(fragments[1], Err(ReasonerError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_sse_stream_keeps_multibyte_split_across_chunks() {
        let event = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Creatinine 80 \u{00b5}mol/L\"}]}}]}\n";
        let bytes = event.as_bytes();
        let split = event.find('\u{00b5}').unwrap() + 1;

        let events: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&bytes[..split])),
            Ok(Bytes::copy_from_slice(&bytes[split..])),
        ];
        let fragments: Vec<_> = parse_sse_stream(futures::stream::iter(events)).collect().await;

        assert_eq!(fragments, vec![Ok("Creatinine 80 \u{00b5}mol/L".to_string())]);
    }

    #[tokio::test]
    async fn test_sse_stream_flushes_unterminated_last_line() {
        let events: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"tail\"}]}}]}",
        ))];

        let fragments: Vec<_> = parse_sse_stream(futures::stream::iter(events)).collect().await;

        assert_eq!(fragments, vec![Ok("tail".to_string())]);
    }
}
