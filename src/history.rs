use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::BoardInfo;

/// One entry in the conversation log shared with the agent.
///
/// The agent keeps no state of its own; the transmitted log is everything
/// it knows beyond the capability results it asks for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Standing instruction seeded at session start, plus markers the
    /// arbitrator records (e.g. fallback substitutions).
    System { text: String },
    /// Per-turn request for a move.
    UserDirective { text: String },
    /// Free-form agent output, normally a move string.
    AssistantProposal { text: String },
    /// The agent invoked the board-info capability; `id` correlates the
    /// result that must follow immediately.
    CapabilityRequest { id: String, capability: String },
    /// The computed capability payload, paired to its request by `id`.
    CapabilityResult { id: String, info: BoardInfo },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("capability result {0:?} does not match a pending request")]
    UnmatchedResult(String),
    #[error("capability request {0:?} is still awaiting its result")]
    PendingRequest(String),
}

/// Ordered, append-only log of turn messages.
///
/// Prior entries are never mutated, reordered or dropped while a session
/// lives; a new session replaces the whole value. `append` enforces the
/// pairing invariant: a `CapabilityRequest` must be followed immediately
/// by exactly one `CapabilityResult` carrying the same id.
#[derive(Clone, Debug, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
    pending: Option<String>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a log seeded with the standing system directive.
    pub fn with_system(text: impl Into<String>) -> Self {
        let mut history = Self::default();
        history.messages.push(Message::System { text: text.into() });
        history
    }

    /// Append a message. O(1). Fails only when the message would break
    /// the request/result pairing invariant.
    pub fn append(&mut self, message: Message) -> Result<(), HistoryError> {
        match (&self.pending, &message) {
            (Some(pending), Message::CapabilityResult { id, .. }) => {
                if pending != id {
                    return Err(HistoryError::UnmatchedResult(id.clone()));
                }
                self.pending = None;
            }
            (Some(pending), _) => {
                return Err(HistoryError::PendingRequest(pending.clone()));
            }
            (None, Message::CapabilityResult { id, .. }) => {
                return Err(HistoryError::UnmatchedResult(id.clone()));
            }
            (None, Message::CapabilityRequest { id, .. }) => {
                self.pending = Some(id.clone());
            }
            (None, _) => {}
        }
        self.messages.push(message);
        Ok(())
    }

    /// The full ordered log, for transmission to the agent. Calling this
    /// twice without an intervening `append` yields identical sequences.
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
