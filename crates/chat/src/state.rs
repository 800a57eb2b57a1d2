use campusmind_api::{HistoryMessage, Role, Session, SessionId, SourceRef, StreamFrame};
use tokio::sync::oneshot;

use crate::message::{AssistantDraft, Message, MessageId, MessageStatus};

/// Identifier for one `send_message` stream.
///
/// A new ticket is minted on every send, so frames or cleanup from a stream that was
/// already stopped can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamTicket(u64);

impl StreamTicket {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Read-only view of controller state handed to rendering layers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatSnapshot {
    pub sessions: Vec<Session>,
    pub active_session_id: Option<SessionId>,
    /// Finalized transcript, followed by the in-flight assistant draft while streaming.
    pub messages: Vec<Message>,
    pub sources: Vec<SourceRef>,
    pub status: Option<String>,
    pub streaming: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl ChatSnapshot {
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
    }

    pub fn draft(&self) -> Option<&Message> {
        self.messages
            .last()
            .filter(|message| message.status == MessageStatus::Streaming)
    }
}

/// How a stream's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl StreamOutcome {
    fn message_status(&self) -> MessageStatus {
        match self {
            Self::Completed => MessageStatus::Complete,
            Self::Cancelled => MessageStatus::Cancelled,
            Self::Failed(_) => MessageStatus::Failed,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ActiveStream {
    ticket: StreamTicket,
    cancel_tx: Option<oneshot::Sender<()>>,
    draft: AssistantDraft,
}

/// Everything needed to run a stream after the synchronous part of a send.
#[derive(Debug)]
pub(crate) struct StreamStart {
    pub session_id: SessionId,
    pub ticket: StreamTicket,
    pub cancel_rx: oneshot::Receiver<()>,
}

#[derive(Debug, Default)]
pub(crate) struct ChatState {
    pub sessions: Vec<Session>,
    pub active_session_id: Option<SessionId>,
    pub messages: Vec<Message>,
    pub sources: Vec<SourceRef>,
    pub status: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
    active_stream: Option<ActiveStream>,
    next_message_seq: u64,
    next_ticket: u64,
    history_generation: u64,
}

impl ChatState {
    pub fn snapshot(&self) -> ChatSnapshot {
        let mut messages = self.messages.clone();
        if let Some(active) = &self.active_stream {
            messages.push(active.draft.preview());
        }

        ChatSnapshot {
            sessions: self.sessions.clone(),
            active_session_id: self.active_session_id.clone(),
            messages,
            sources: self.sources.clone(),
            status: self.status.clone(),
            streaming: self.active_stream.is_some(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }

    fn alloc_message_id(&mut self) -> MessageId {
        self.next_message_seq = self.next_message_seq.saturating_add(1);
        MessageId::live(self.next_message_seq)
    }

    /// Synchronous half of a send: appends the user turn and the empty assistant draft.
    ///
    /// Returns `None` without touching state when no session is active, its history is
    /// still loading, or a stream is already in flight.
    pub fn begin_stream(&mut self, query: &str) -> Option<StreamStart> {
        if self.active_stream.is_some() || self.loading {
            return None;
        }
        let session_id = self.active_session_id.clone()?;

        let user_id = self.alloc_message_id();
        self.messages.push(Message::user(user_id, query));
        let draft = AssistantDraft::new(self.alloc_message_id());

        self.error = None;
        self.sources.clear();
        self.status = None;

        self.next_ticket = self.next_ticket.saturating_add(1);
        let ticket = StreamTicket::new(self.next_ticket);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.active_stream = Some(ActiveStream {
            ticket,
            cancel_tx: Some(cancel_tx),
            draft,
        });

        Some(StreamStart {
            session_id,
            ticket,
            cancel_rx,
        })
    }

    /// Applies one frame to the stream identified by `ticket`. Returns `false` when that
    /// stream is no longer active and reading should stop.
    pub fn apply_frame(&mut self, ticket: StreamTicket, frame: StreamFrame) -> bool {
        let Some(active) = self
            .active_stream
            .as_mut()
            .filter(|active| active.ticket == ticket)
        else {
            return false;
        };

        match frame {
            StreamFrame::Status(status) => self.status = Some(status),
            StreamFrame::Token(fragment) => active.draft.push_token(&fragment),
            StreamFrame::Sources(sources) => {
                active.draft.attach_sources(sources.clone());
                self.sources = sources;
            }
            StreamFrame::Error(message) => {
                active.draft.mark_error_reported();
                self.error = Some(message);
            }
            StreamFrame::Done => {
                tracing::trace!(ticket = ticket.get(), "stream reported completion");
            }
            StreamFrame::Unknown { tag } => {
                tracing::debug!(ticket = ticket.get(), tag = %tag, "ignoring unknown stream frame");
            }
        }

        true
    }

    /// Common termination path. Only the first call for the active ticket has any effect.
    pub fn finish_stream(&mut self, ticket: StreamTicket, outcome: StreamOutcome) -> bool {
        if self
            .active_stream
            .as_ref()
            .is_none_or(|active| active.ticket != ticket)
        {
            return false;
        }

        if let StreamOutcome::Failed(message) = &outcome {
            self.error = Some(message.clone());
        }
        self.close_active_stream(outcome.message_status());
        true
    }

    /// Client-initiated stop. Signals the read loop and settles state immediately; the
    /// error field is left as it was.
    pub fn stop_stream(&mut self) -> Option<StreamTicket> {
        let ticket = self.active_stream.as_ref().map(|active| active.ticket);
        if ticket.is_some() {
            self.close_active_stream(MessageStatus::Cancelled);
        }
        self.status = None;
        ticket
    }

    fn close_active_stream(&mut self, status: MessageStatus) {
        let Some(mut active) = self.active_stream.take() else {
            return;
        };

        if let Some(cancel_tx) = active.cancel_tx.take() {
            // The read loop may already be gone; a closed receiver is fine.
            let _ = cancel_tx.send(());
        }

        self.messages.push(active.draft.finish(status));
        self.status = None;
    }

    /// Activates `session_id` with an empty transcript, as after creating a session.
    ///
    /// A stream still running for the previous session is stopped in the same step, and any
    /// history load still in flight is superseded.
    pub fn open_fresh_session(&mut self, session_id: SessionId) {
        if let Some(ticket) = self.stop_stream() {
            tracing::info!(
                ticket = ticket.get(),
                session_id = %session_id,
                "session switch stopped the active stream"
            );
        }
        self.history_generation = self.history_generation.saturating_add(1);
        self.active_session_id = Some(session_id);
        self.messages.clear();
        self.sources.clear();
        self.status = None;
        self.loading = false;
    }

    /// Activates `session_id` and clears what was shown, before its history is fetched.
    /// Returns the generation the eventual response must still match.
    pub fn begin_history_load(&mut self, session_id: SessionId) -> u64 {
        self.open_fresh_session(session_id);
        self.loading = true;
        self.error = None;
        self.history_generation
    }

    pub fn is_current_history_load(&self, generation: u64) -> bool {
        self.history_generation == generation
    }

    /// Installs fetched history. The latest assistant turn's citations become the current sources.
    pub fn hydrate_history(&mut self, history: Vec<HistoryMessage>) {
        self.messages = history
            .into_iter()
            .enumerate()
            .map(|(index, message)| Message::from_history(index, message))
            .collect();

        if let Some(sources) = self
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .and_then(Message::citations)
        {
            self.sources = sources.to_vec();
        }
    }
}
