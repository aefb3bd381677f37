//! Per-conversation generation state.
//!
//! # State machine
//!
//! ```text
//!            send / retry
//!   Idle ─────────────────▶ Generating
//!    ▲                       │      │
//!    │        reply stored   │      │ failure / timeout / filtered
//!    └───────────────────────┘      ▼
//!    ▲                            Error ──── send (new message) ───▶ Generating
//!    └──── acknowledge_error ───────┘  ──── retry ─────────────────▶ Generating
//! ```
//!
//! Every generation gets an epoch that is unique across the controller.
//! Close and abandon bump the slot epoch, delete drops the slot, and a
//! generation that finishes under a stale epoch is discarded. Dropping an
//! exchange mid-flight cancels it into `Error`.

mod controller;

pub use controller::{ControllerOptions, Exchange, SessionController};

use serde::{Deserialize, Serialize};

/// Generation state of one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Generating,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Error => "error",
        }
    }

    /// A new user message may be sent.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    /// The trailing user message may be re-requested.
    pub fn can_retry(&self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Snapshot of a conversation's generation state for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_error: Option<String>,
}

const CANCELLED_MESSAGE: &str = "The reply was cancelled before it arrived.";

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionSlot {
    pub(crate) state: SessionState,
    pub(crate) epoch: u64,
    pub(crate) last_error: Option<String>,
}

impl SessionSlot {
    /// Enter `Generating` under `epoch` and return it; the result must match.
    pub(crate) fn begin(&mut self, epoch: u64) -> u64 {
        self.state = SessionState::Generating;
        self.last_error = None;
        self.epoch = epoch;
        epoch
    }

    pub(crate) fn finish(&mut self) {
        self.state = SessionState::Idle;
        self.last_error = None;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.state = SessionState::Error;
        self.last_error = Some(message);
    }

    /// Invalidate any in-flight generation. Returns whether one was running.
    pub(crate) fn abandon(&mut self) -> bool {
        self.epoch += 1;
        let was_generating = self.state == SessionState::Generating;
        if was_generating {
            self.state = SessionState::Idle;
        }
        was_generating
    }

    /// Settle a generation whose caller went away. No-op unless `epoch` is
    /// still the one generating.
    pub(crate) fn cancel(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.epoch += 1;
        self.fail(CANCELLED_MESSAGE.to_string());
        true
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.state == SessionState::Generating
    }

    pub(crate) fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            last_error: self.last_error.clone(),
        }
    }
}
