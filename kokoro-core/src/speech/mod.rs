//! Text-to-speech collaborator.
//!
//! Speech runs after a reply is stored and never affects conversation state.

pub mod openai;

use async_trait::async_trait;

use crate::character::{CharacterId, VoiceSettings};
use crate::emotion::Emotion;

pub use openai::OpenAiSpeech;

/// Average spoken characters per second at speed 1.0.
const CHARS_PER_SECOND: f32 = 12.0;

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub character: CharacterId,
    pub emotion: Emotion,
    pub voice: VoiceSettings,
    /// User speech-rate multiplier from audio preferences.
    pub rate: f32,
}

impl SpeechRequest {
    /// Effective playback speed: character voice speed times user rate.
    pub fn effective_speed(&self) -> f32 {
        (self.voice.speed * self.rate).clamp(0.25, 4.0)
    }
}

/// A synthesized clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechClip {
    pub audio_url: String,
    pub duration_ms: u64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<SpeechClip>;

    fn provider_name(&self) -> &str;
}

/// Rough playback length for `text` at `speed`.
pub fn estimate_duration_ms(text: &str, speed: f32) -> u64 {
    let chars = text.chars().filter(|c| !c.is_whitespace()).count() as f32;
    let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
    ((chars / (CHARS_PER_SECOND * speed)) * 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Character;

    #[test]
    fn test_estimate_duration() {
        assert_eq!(estimate_duration_ms("", 1.0), 0);
        assert_eq!(estimate_duration_ms(&"a".repeat(12), 1.0), 1000);
        assert_eq!(estimate_duration_ms(&"a".repeat(12), 2.0), 500);
        assert_eq!(estimate_duration_ms(&"a".repeat(12), 0.0), 1000);
    }

    #[test]
    fn test_effective_speed() {
        let request = SpeechRequest {
            text: "hi".into(),
            character: CharacterId::Aoi,
            emotion: Emotion::Neutral,
            voice: Character::default_for(CharacterId::Aoi).voice,
            rate: 2.0,
        };
        assert_eq!(request.effective_speed(), 2.0);
    }
}
