//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use kokoro_core::dialogue::{DialogueError, DialogueGenerator, DialogueRequest, GeneratedReply};
use kokoro_core::speech::{SpeechClip, SpeechRequest, SpeechSynthesizer};
use kokoro_core::storage::{KeyValueStorage, MemoryStorage};
use kokoro_core::{Action, AppStore, CharacterId, Emotion, SessionController};

// ============================================================================
// Dialogue
// ============================================================================

pub enum Behavior {
    Reply(&'static str, Emotion),
    Fail(DialogueError),
    /// Never completes.
    Hang,
    /// Replies once the test calls `release()`.
    Gated(&'static str, Emotion),
}

/// Generator that plays back a script, one behavior per call.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Behavior>>,
    calls: AtomicU32,
    started: Notify,
    release: Notify,
    last_request: Mutex<Option<DialogueRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            started: Notify::new(),
            release: Notify::new(),
            last_request: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until a generation call has begun.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn last_request(&self) -> Option<DialogueRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl DialogueGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: DialogueRequest) -> Result<GeneratedReply, DialogueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Reply("...", Emotion::Neutral));
        self.started.notify_one();

        let reply = |text: &str, emotion| GeneratedReply {
            text: text.to_string(),
            emotion,
            confidence: 0.9,
        };
        match behavior {
            Behavior::Reply(text, emotion) => Ok(reply(text, emotion)),
            Behavior::Fail(e) => Err(e),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Gated(text, emotion) => {
                self.release.notified().await;
                Ok(reply(text, emotion))
            }
        }
    }
}

// ============================================================================
// Speech
// ============================================================================

pub struct MockSpeech {
    pub fail: bool,
    pub calls: AtomicU32,
}

impl MockSpeech {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeech {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<SpeechClip> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("speech service unavailable");
        }
        Ok(SpeechClip {
            audio_url: format!("memory://{}/{}", request.character, request.emotion),
            duration_ms: 1200,
        })
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Storage whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    pub fail_writes: AtomicBool,
    pub writes: AtomicU32,
}

#[async_trait]
impl KeyValueStorage for FlakyStorage {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.remove(key).await
    }

    async fn keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.inner.keys(prefix).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn controller(generator: Arc<ScriptedGenerator>) -> SessionController {
    SessionController::new(AppStore::new().into_shared(), generator)
}

/// Start a conversation with a fixed id.
pub async fn start(controller: &SessionController, id: &str, character: CharacterId) {
    controller
        .dispatch(Action::StartConversation {
            conversation_id: id.to_string(),
            character,
            scenario_id: "cafe".into(),
            at: Utc::now(),
        })
        .await
        .expect("start conversation");
}

pub async fn message_texts(controller: &SessionController, id: &str) -> Vec<String> {
    let store = controller.store();
    let store = store.read().await;
    store
        .conversations
        .get(id)
        .map(|c| c.messages.iter().map(|m| m.text.clone()).collect())
        .unwrap_or_default()
}
