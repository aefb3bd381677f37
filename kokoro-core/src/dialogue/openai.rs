//! OpenAI-compatible chat completions generator.
//!
//! Works against any server exposing `/v1/chat/completions` (OpenAI, Ollama,
//! vLLM, LM Studio). Replies are requested in JSON mode; a plain-text reply is
//! still accepted and tagged `neutral`.

use async_trait::async_trait;
use kokoro_common::LlmConfig;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::prompt::build_system_prompt;
use super::{DialogueError, DialogueGenerator, DialogueRequest, GeneratedReply};
use crate::emotion::Emotion;

/// Confidence assigned to replies that did not report one.
const DEFAULT_CONFIDENCE: f32 = 0.5;

pub struct OpenAiDialogue {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_history_messages: usize,
}

impl OpenAiDialogue {
    pub fn from_config(config: &LlmConfig, max_history_messages: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_history_messages,
        }
    }

    fn build_messages(&self, request: &DialogueRequest) -> Vec<ChatMessage> {
        let window_start = request
            .history
            .len()
            .saturating_sub(self.max_history_messages);
        let mut messages = Vec::with_capacity(request.history.len() - window_start + 1);
        messages.push(ChatMessage {
            role: "system",
            content: build_system_prompt(request),
        });
        messages.extend(request.history[window_start..].iter().map(|m| ChatMessage {
            role: if m.sender.is_user() { "user" } else { "assistant" },
            content: m.text.clone(),
        }));
        messages
    }
}

#[async_trait]
impl DialogueGenerator for OpenAiDialogue {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: DialogueRequest) -> Result<GeneratedReply, DialogueError> {
        let start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: self.build_messages(&request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DialogueError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(DialogueError::RateLimited(self.name().to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DialogueError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DialogueError::InvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DialogueError::InvalidResponse("no choices returned".into()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(DialogueError::ContentFiltered(
                "reply blocked by the provider's content filter".into(),
            ));
        }

        let reply = parse_reply(choice.message.content.as_deref().unwrap_or_default())?;
        tracing::debug!(
            model = %self.model,
            character = %request.character.id,
            emotion = %reply.emotion,
            latency_ms = start.elapsed().as_millis() as u64,
            "Generated reply"
        );
        Ok(reply)
    }
}

/// Decode the model's content into a reply.
///
/// Accepts a JSON object (optionally wrapped in a code fence) or plain text.
pub fn parse_reply(content: &str) -> Result<GeneratedReply, DialogueError> {
    let trimmed = strip_code_fence(content.trim());
    if trimmed.is_empty() {
        return Err(DialogueError::InvalidResponse("empty reply".into()));
    }

    if let Ok(payload) = serde_json::from_str::<ReplyPayload>(trimmed) {
        let text = payload.text.trim();
        if text.is_empty() {
            return Err(DialogueError::InvalidResponse("reply text is empty".into()));
        }
        return Ok(GeneratedReply {
            text: text.to_string(),
            emotion: payload
                .emotion
                .as_deref()
                .map(Emotion::parse_lenient)
                .unwrap_or_default(),
            confidence: payload
                .confidence
                .filter(|c| c.is_finite())
                .map_or(DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0)),
        });
    }

    Ok(GeneratedReply {
        text: trimmed.to_string(),
        emotion: Emotion::Neutral,
        confidence: DEFAULT_CONFIDENCE,
    })
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    text: String,
    emotion: Option<String>,
    confidence: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::{Character, CharacterId};
    use crate::message::Message;
    use crate::preferences::Relationship;
    use crate::scenario;

    #[test]
    fn test_parse_json_reply() {
        let reply =
            parse_reply(r#"{"text":"こんにちは！","emotion":"happy","confidence":0.9}"#).unwrap();
        assert_eq!(reply.text, "こんにちは！");
        assert_eq!(reply.emotion, Emotion::Happy);
        assert!((reply.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_fenced_reply_with_unknown_emotion() {
        let reply = parse_reply("```json\n{\"text\":\"hm\",\"emotion\":\"smug\"}\n```").unwrap();
        assert_eq!(reply.text, "hm");
        assert_eq!(reply.emotion, Emotion::Neutral);
        assert_eq!(reply.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_parse_plain_text_reply() {
        let reply = parse_reply("Sure, let's go!").unwrap();
        assert_eq!(reply.text, "Sure, let's go!");
        assert_eq!(reply.emotion, Emotion::Neutral);
    }

    #[test]
    fn test_parse_empty_reply() {
        assert!(matches!(parse_reply("  "), Err(DialogueError::InvalidResponse(_))));
        assert!(matches!(
            parse_reply(r#"{"text":"   "}"#),
            Err(DialogueError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_confidence_clamped() {
        let reply = parse_reply(r#"{"text":"ok","confidence":7}"#).unwrap();
        assert_eq!(reply.confidence, 1.0);
    }

    #[test]
    fn test_history_window_and_roles() {
        let generator = OpenAiDialogue::from_config(&LlmConfig::default(), 2);
        let request = DialogueRequest {
            character: Character::default_for(CharacterId::Aoi),
            scenario: *scenario::resolve("cafe"),
            relationship: Relationship::default(),
            user_name: "You".into(),
            history: vec![
                Message::user("one"),
                Message::character(CharacterId::Aoi, "two", Emotion::Happy),
                Message::user("three"),
            ],
        };
        let messages = generator.build_messages(&request);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[1].content, "two");
        assert_eq!(messages[2].role, "user");
    }
}
