//! OpenAI `/v1/audio/speech` synthesizer.
//!
//! Audio is written as MP3 into a local cache directory and the file path is
//! returned as the clip URL.

use anyhow::Context;
use async_trait::async_trait;
use kokoro_common::TtsConfig;
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::{estimate_duration_ms, SpeechClip, SpeechRequest, SpeechSynthesizer};

pub struct OpenAiSpeech {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    cache_dir: PathBuf,
}

impl OpenAiSpeech {
    pub fn new(config: &TtsConfig, api_key: Option<String>, cache_dir: PathBuf) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            cache_dir,
        }
    }

    /// Style hint for models that accept speaking instructions.
    fn instructions(&self, request: &SpeechRequest) -> Option<String> {
        self.model
            .starts_with("gpt-4o")
            .then(|| format!("Speak in a {} tone.", request.emotion))
    }
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<SpeechClip> {
        if request.text.trim().is_empty() {
            anyhow::bail!("Cannot synthesize empty text");
        }

        let speed = request.effective_speed();
        let body = SpeechBody {
            model: &self.model,
            input: &request.text,
            voice: &request.voice.voice_id,
            speed,
            response_format: "mp3",
            instructions: self.instructions(request),
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send speech request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Speech API error ({status}): {error_text}");
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read speech audio")?;

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.cache_dir.display()))?;
        let path = self
            .cache_dir
            .join(format!("{}-{}.mp3", request.character, Uuid::new_v4()));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(SpeechClip {
            audio_url: path.display().to_string(),
            duration_ms: estimate_duration_ms(&request.text, speed),
        })
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
