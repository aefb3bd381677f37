//! Wiring: configuration, storage, collaborators and the session controller.

use std::sync::Arc;

use anyhow::{Context, Result};
use kokoro_common::Config;
use kokoro_core::dialogue::OpenAiDialogue;
use kokoro_core::moderation::KeywordFilter;
use kokoro_core::speech::OpenAiSpeech;
use kokoro_core::{storage, ControllerOptions, Persistence, SessionController};
use tracing::{info, warn};

pub struct App {
    pub config: Config,
    pub controller: SessionController,
    /// Problems found while loading saved state.
    pub load_warnings: Vec<String>,
}

impl App {
    /// Open storage, load saved state and build the controller.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let storage = storage::open(&config.storage).with_context(|| {
            format!(
                "Failed to open {} storage in {}",
                config.storage.backend,
                config.storage.data_dir().display()
            )
        })?;
        let persistence = Arc::new(Persistence::new(storage, config.storage.backup_limit));

        let report = persistence.load().await;
        for warning in &report.warnings {
            warn!(warning = %warning, "Saved state partially recovered");
        }

        let dialogue = Arc::new(OpenAiDialogue::from_config(
            &config.llm,
            config.session.max_history_messages,
        ));
        let filter = Arc::new(KeywordFilter::with_default_terms()?);

        let mut controller = SessionController::new(report.store.into_shared(), dialogue)
            .with_persistence(persistence)
            .with_content_filter(filter)
            .with_options(ControllerOptions::from_settings(&config.session));

        if config.tts.enabled {
            let speech = OpenAiSpeech::new(
                &config.tts,
                config.tts_api_key().map(str::to_string),
                config.storage.audio_cache_dir(),
            );
            controller = controller.with_speech(Arc::new(speech));
        }

        info!(
            backend = %config.storage.backend,
            model = %config.llm.model,
            tts = config.tts.enabled,
            "Kokoro ready"
        );

        Ok(Self {
            config,
            controller,
            load_warnings: report.warnings,
        })
    }
}
