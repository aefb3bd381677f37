//! Session controller: the only writer of the app store.
//!
//! Lock order is always slots, then store. Neither lock is held while the
//! dialogue generator, speech synthesizer or storage backend is awaited.
//!
//! Exchanges are cancel-safe: dropping a `send_user_message` or `retry`
//! future before it settles moves the conversation to `Error`, from where the
//! user can retry, send again or acknowledge.

use chrono::Utc;
use kokoro_common::logging::generate_trace_id;
use kokoro_common::{Error, Result, SessionSettings};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{SessionSlot, SessionState, SessionStatus};
use crate::character::CharacterId;
use crate::dialogue::{DialogueGenerator, DialogueRequest, GeneratedReply};
use crate::message::{Message, Sender};
use crate::moderation::{ContentFilter, Verdict};
use crate::persistence::{PendingWrites, Persistence, StateKey};
use crate::preferences::ContentFilterLevel;
use crate::scenario;
use crate::speech::{SpeechClip, SpeechRequest, SpeechSynthesizer};
use crate::store::{Action, AppStore, SharedStore};

/// Relationship nudge applied after every successful exchange.
const EXCHANGE_INTIMACY_DELTA: i32 = 1;
const EXCHANGE_TRUST_DELTA: i32 = 1;

type Slots = Arc<Mutex<HashMap<String, SessionSlot>>>;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub generation_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl ControllerOptions {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            generation_timeout: Duration::from_secs(settings.generation_timeout_secs),
        }
    }
}

/// Outcome of a send or retry.
#[derive(Debug, Clone, PartialEq)]
pub enum Exchange {
    /// The reply was stored. `speech` is present when synthesis succeeded.
    Replied {
        reply: Message,
        speech: Option<SpeechClip>,
    },
    /// The conversation was closed, abandoned or deleted while generating;
    /// the reply was discarded.
    Abandoned,
}

/// A generation ready to run without any lock held.
struct PreparedGeneration {
    request: DialogueRequest,
    filter_level: ContentFilterLevel,
    epoch: u64,
    pending: Option<PendingWrites>,
}

/// Settles the slot if the exchange future is dropped mid-flight.
///
/// Disarmed once the exchange has taken the slots lock to record its outcome.
struct InFlight {
    slots: Slots,
    conversation_id: String,
    epoch: u64,
    armed: bool,
}

impl InFlight {
    fn new(slots: &Slots, conversation_id: &str, epoch: u64) -> Self {
        Self {
            slots: Arc::clone(slots),
            conversation_id: conversation_id.to_string(),
            epoch,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = std::mem::take(&mut self.conversation_id);
        let epoch = self.epoch;
        let settle = move |slots: &mut HashMap<String, SessionSlot>| {
            if slots.get_mut(&id).is_some_and(|s| s.cancel(epoch)) {
                info!(conversation_id = %id, epoch, "Exchange dropped before completion");
            }
        };
        match self.slots.try_lock() {
            Ok(mut slots) => settle(&mut slots),
            Err(_) => {
                // the lock holder is mid-update; settle once it lets go
                let slots = Arc::clone(&self.slots);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move { settle(&mut *slots.lock().await) });
                    }
                    Err(_) => warn!(epoch, "No runtime to settle a dropped exchange"),
                }
            }
        }
    }
}

pub struct SessionController {
    store: SharedStore,
    slots: Slots,
    /// Source of generation epochs, unique across all conversations.
    epochs: AtomicU64,
    dialogue: Arc<dyn DialogueGenerator>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    filter: Option<Arc<dyn ContentFilter>>,
    persistence: Option<Arc<Persistence>>,
    options: ControllerOptions,
}

impl SessionController {
    pub fn new(store: SharedStore, dialogue: Arc<dyn DialogueGenerator>) -> Self {
        Self {
            store,
            slots: Arc::new(Mutex::new(HashMap::new())),
            epochs: AtomicU64::new(0),
            dialogue,
            speech: None,
            filter: None,
            persistence: None,
            options: ControllerOptions::default(),
        }
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_content_filter(mut self, filter: Arc<dyn ContentFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    /// Shared handle for read-only views (history, settings display).
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn persistence_degraded(&self) -> bool {
        self.persistence.as_ref().is_some_and(|p| p.is_degraded())
    }

    pub async fn status(&self, conversation_id: &str) -> SessionStatus {
        self.slots
            .lock()
            .await
            .get(conversation_id)
            .map(SessionSlot::status)
            .unwrap_or_default()
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Apply an action and persist what it touched.
    ///
    /// Closing or deleting a conversation abandons its in-flight generation.
    /// Deleting also drops the conversation's slot.
    pub async fn dispatch(&self, action: Action) -> Result<()> {
        let name = action.name();
        let touches = action.touches();
        let ended = action.ends_conversation().map(str::to_string);
        let deleting = matches!(action, Action::DeleteConversation { .. });

        let pending = {
            let mut slots = self.slots.lock().await;
            if let Action::AppendMessage {
                conversation_id, ..
            } = &action
            {
                if slots
                    .get(conversation_id)
                    .is_some_and(|s| s.state == SessionState::Generating)
                {
                    return Err(Error::InvalidState(format!(
                        "conversation '{conversation_id}' is generating a reply"
                    )));
                }
            }

            let mut store = self.store.write().await;
            store.apply(action)?;

            if let Some(id) = &ended {
                let abandoned = if deleting {
                    slots.remove(id).is_some_and(|mut slot| slot.abandon())
                } else {
                    slots.get_mut(id).is_some_and(SessionSlot::abandon)
                };
                if abandoned {
                    info!(conversation_id = %id, action = name, "In-flight generation abandoned");
                }
            }
            self.encode(&store, touches)
        };

        debug!(action = name, "Action applied");
        self.persist(pending).await;
        Ok(())
    }

    pub async fn start_conversation(
        &self,
        character: CharacterId,
        scenario_id: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.dispatch(Action::StartConversation {
            conversation_id: id.clone(),
            character,
            scenario_id: scenario_id.to_string(),
            at: Utc::now(),
        })
        .await?;
        info!(conversation_id = %id, character = %character, scenario = scenario_id, "Conversation started");
        Ok(id)
    }

    pub async fn close_conversation(&self, conversation_id: &str) -> Result<()> {
        self.dispatch(Action::CloseConversation {
            conversation_id: conversation_id.to_string(),
            at: Utc::now(),
        })
        .await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.dispatch(Action::DeleteConversation {
            conversation_id: conversation_id.to_string(),
        })
        .await
    }

    /// Toggle the favorite flag and return the new value.
    pub async fn toggle_favorite(&self, conversation_id: &str) -> Result<bool> {
        self.dispatch(Action::ToggleFavorite {
            conversation_id: conversation_id.to_string(),
        })
        .await?;
        let store = self.store.read().await;
        Ok(store.conversations.require(conversation_id)?.is_favorite)
    }

    /// Abandon an in-flight generation without closing the conversation.
    /// Returns whether a generation was running.
    pub async fn abandon(&self, conversation_id: &str) -> bool {
        let abandoned = self
            .slots
            .lock()
            .await
            .get_mut(conversation_id)
            .is_some_and(SessionSlot::abandon);
        if abandoned {
            info!(conversation_id, "In-flight generation abandoned");
        }
        abandoned
    }

    // ========================================================================
    // Exchanges
    // ========================================================================

    /// Append a user message and generate the character's reply.
    ///
    /// The user message is kept even when generation fails; the conversation
    /// then sits in `Error` until the user retries, sends again, or
    /// acknowledges the error.
    pub async fn send_user_message(&self, conversation_id: &str, text: &str) -> Result<Exchange> {
        let trace_id = generate_trace_id();
        let prepared = {
            let mut slots = self.slots.lock().await;
            if slots
                .get(conversation_id)
                .is_some_and(|s| !s.state.can_send())
            {
                return Err(Error::InvalidState(format!(
                    "conversation '{conversation_id}' is already generating a reply"
                )));
            }

            let mut store = self.store.write().await;
            store.apply(Action::AppendMessage {
                conversation_id: conversation_id.to_string(),
                message: Message::user(text),
            })?;

            let (request, filter_level) = build_request(&store, conversation_id)?;
            let epoch = slots
                .entry(conversation_id.to_string())
                .or_default()
                .begin(self.next_epoch());
            PreparedGeneration {
                request,
                filter_level,
                epoch,
                pending: self.encode(&store, &[StateKey::Conversations]),
            }
        };

        info!(conversation_id, trace_id = %trace_id, epoch = prepared.epoch, "User message appended, generating reply");
        self.run_exchange(conversation_id, &trace_id, prepared).await
    }

    /// Re-request a reply to the trailing user message. Only valid in `Error`.
    pub async fn retry(&self, conversation_id: &str) -> Result<Exchange> {
        let trace_id = generate_trace_id();
        let prepared = {
            let mut slots = self.slots.lock().await;
            let state = slots
                .get(conversation_id)
                .map(|s| s.state)
                .unwrap_or_default();
            if !state.can_retry() {
                return Err(Error::InvalidState(format!(
                    "nothing to retry: conversation '{conversation_id}' is {}",
                    state.as_str()
                )));
            }

            let store = self.store.read().await;
            let conversation = store.conversations.require(conversation_id)?;
            if conversation.is_closed() {
                return Err(Error::InvalidState(format!(
                    "conversation '{conversation_id}' is closed"
                )));
            }
            if conversation.trailing_user_message().is_none() {
                return Err(Error::InvalidState(format!(
                    "conversation '{conversation_id}' has no unanswered message"
                )));
            }

            let (request, filter_level) = build_request(&store, conversation_id)?;
            let epoch = slots
                .entry(conversation_id.to_string())
                .or_default()
                .begin(self.next_epoch());
            PreparedGeneration {
                request,
                filter_level,
                epoch,
                pending: None,
            }
        };

        info!(conversation_id, trace_id = %trace_id, epoch = prepared.epoch, "Retrying reply generation");
        self.run_exchange(conversation_id, &trace_id, prepared).await
    }

    /// Leave `Error` without retrying.
    pub async fn acknowledge_error(&self, conversation_id: &str) -> Result<()> {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(conversation_id) {
            Some(slot) if slot.state == SessionState::Generating => Err(Error::InvalidState(
                format!("conversation '{conversation_id}' is generating a reply"),
            )),
            Some(slot) => {
                slot.finish();
                Ok(())
            }
            None => {
                self.store
                    .read()
                    .await
                    .conversations
                    .require(conversation_id)?;
                Ok(())
            }
        }
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn run_exchange(
        &self,
        conversation_id: &str,
        trace_id: &str,
        prepared: PreparedGeneration,
    ) -> Result<Exchange> {
        let PreparedGeneration {
            request,
            filter_level,
            epoch,
            pending,
        } = prepared;
        let mut in_flight = InFlight::new(&self.slots, conversation_id, epoch);
        self.persist(pending).await;

        let character = request.character.id;
        let started = Instant::now();
        let outcome = self.generate(request, filter_level).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (reply, confidence, pending, speech_request) = {
            let mut slots = self.slots.lock().await;
            in_flight.disarm();
            let Some(slot) = slots
                .get_mut(conversation_id)
                .filter(|s| s.is_current(epoch))
            else {
                info!(conversation_id, trace_id, epoch, "Discarding reply for abandoned generation");
                return Ok(Exchange::Abandoned);
            };

            let generated = match outcome {
                Ok(generated) => generated,
                Err(e) => {
                    warn!(conversation_id, trace_id, latency_ms, error = %e, "Reply generation failed");
                    slot.fail(e.user_message());
                    return Err(e);
                }
            };

            let confidence = generated.confidence;
            let reply = Message::character(character, generated.text, generated.emotion);
            let mut store = self.store.write().await;
            if let Err(e) = store.apply(Action::AppendMessage {
                conversation_id: conversation_id.to_string(),
                message: reply.clone(),
            }) {
                warn!(conversation_id, trace_id, error = %e, "Could not store reply");
                slot.fail(e.user_message());
                return Err(e);
            }
            if let Err(e) = store.apply(Action::AdjustRelationship {
                character,
                intimacy_delta: EXCHANGE_INTIMACY_DELTA,
                trust_delta: EXCHANGE_TRUST_DELTA,
            }) {
                warn!(conversation_id, error = %e, "Could not adjust relationship");
            }
            slot.finish();

            let pending = self.encode(&store, &[StateKey::Conversations, StateKey::Preferences]);
            let speech_request = self.speech_request(&store, &reply);
            (reply, confidence, pending, speech_request)
        };

        info!(
            conversation_id,
            trace_id,
            latency_ms,
            emotion = %reply.emotion,
            confidence,
            "Reply stored"
        );
        self.persist(pending).await;

        let speech = match speech_request {
            Some(request) => self.synthesize(request).await,
            None => None,
        };
        Ok(Exchange::Replied { reply, speech })
    }

    /// Call the generator under the configured timeout, then the content filter.
    async fn generate(
        &self,
        request: DialogueRequest,
        filter_level: ContentFilterLevel,
    ) -> Result<GeneratedReply> {
        let timeout = self.options.generation_timeout;
        let reply = match tokio::time::timeout(timeout, self.dialogue.generate(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::GenerationFailure(format!(
                    "no reply from {} within {}s",
                    self.dialogue.name(),
                    timeout.as_secs_f32()
                )))
            }
        };

        if reply.text.trim().is_empty() {
            return Err(Error::GenerationFailure("generator returned an empty reply".into()));
        }
        if let Some(filter) = &self.filter {
            if let Verdict::Rejected { reason } = filter.review(&reply.text, filter_level).await {
                return Err(Error::ContentFiltered(reason));
            }
        }
        Ok(reply)
    }

    // ========================================================================
    // Speech
    // ========================================================================

    /// Speech request for a stored reply, if voice output is on.
    fn speech_request(&self, store: &AppStore, reply: &Message) -> Option<SpeechRequest> {
        self.speech.as_ref()?;
        let audio = &store.preferences.audio;
        if !audio.voice_enabled {
            return None;
        }
        let Sender::Character(character) = reply.sender else {
            return None;
        };
        Some(SpeechRequest {
            text: reply.text.clone(),
            character,
            emotion: reply.emotion,
            voice: store.characters.get(character).voice.clone(),
            rate: audio.speech_rate,
        })
    }

    async fn synthesize(&self, request: SpeechRequest) -> Option<SpeechClip> {
        let speech = self.speech.as_ref()?;
        match speech.synthesize(&request).await {
            Ok(clip) => {
                debug!(
                    provider = speech.provider_name(),
                    duration_ms = clip.duration_ms,
                    "Speech synthesized"
                );
                Some(clip)
            }
            Err(e) => {
                warn!(provider = speech.provider_name(), error = %e, "Speech synthesis failed");
                None
            }
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn encode(&self, store: &AppStore, keys: &[StateKey]) -> Option<PendingWrites> {
        let persistence = self.persistence.as_ref()?;
        if persistence.is_degraded() {
            return None;
        }
        match persistence.encode(store, keys) {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!(error = %e, "Could not serialize state");
                None
            }
        }
    }

    async fn persist(&self, pending: Option<PendingWrites>) {
        let (Some(persistence), Some(pending)) = (&self.persistence, pending) else {
            return;
        };
        if let Err(e) = persistence.write(pending).await {
            warn!(error = %e, "Persistence failed; changes are kept in memory only");
        }
    }

    pub async fn create_backup(&self) -> Result<String> {
        let persistence = self.require_persistence()?;
        let snapshot = self.store.read().await.clone();
        persistence.create_backup(&snapshot).await
    }

    pub async fn list_backups(&self) -> Result<Vec<String>> {
        self.require_persistence()?.list_backups().await
    }

    /// Replace the whole store with a backup. Every in-flight generation is
    /// abandoned first.
    pub async fn restore_backup(&self, key: &str) -> Result<()> {
        let persistence = self.require_persistence()?;
        let restored = persistence.load_backup(key).await?;

        let pending = {
            let mut slots = self.slots.lock().await;
            for slot in slots.values_mut() {
                slot.abandon();
                slot.finish();
            }
            let mut store = self.store.write().await;
            *store = restored;
            self.encode(&store, &StateKey::ALL)
        };
        info!(key, "Backup restored");
        self.persist(pending).await;
        Ok(())
    }

    fn require_persistence(&self) -> Result<&Arc<Persistence>> {
        self.persistence
            .as_ref()
            .ok_or_else(|| Error::Storage("persistence is not configured".into()))
    }
}

/// Assemble the generator request from current store state.
fn build_request(
    store: &AppStore,
    conversation_id: &str,
) -> Result<(DialogueRequest, ContentFilterLevel)> {
    let conversation = store.conversations.require(conversation_id)?;
    let character = conversation.character_id;
    let request = DialogueRequest {
        character: store.characters.get(character).clone(),
        scenario: *scenario::resolve(&conversation.scenario_id),
        relationship: *store.preferences.relationship(character),
        user_name: store.profile.display_name.clone(),
        history: conversation.messages.as_slice().to_vec(),
    };
    Ok((request, store.preferences.privacy.content_filter))
}
