use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use campusmind_api::{
    AuthToken, CREATE_SESSION_FALLBACK, ChatBackend, FileId, FrameStream, LOAD_HISTORY_FALLBACK,
    NewSession, SEND_MESSAGE_FALLBACK, SessionId, StreamFrame, TokenProvider,
};
use futures::StreamExt;
use tokio::sync::{oneshot, watch};

use crate::message::MessageStatus;
use crate::state::{ChatSnapshot, ChatState, StreamOutcome, StreamStart, StreamTicket};

pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Longest gap tolerated between two reads of the message stream. `None` waits forever.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            stream_idle_timeout: Some(DEFAULT_STREAM_IDLE_TIMEOUT),
        }
    }
}

/// One step of the stream read loop.
enum ReadStep {
    Frame(StreamFrame),
    Failed(String),
    Ended,
    IdleTimeout(Duration),
}

struct ControllerInner {
    backend: Arc<dyn ChatBackend>,
    tokens: Arc<dyn TokenProvider>,
    settings: ControllerSettings,
    state: Mutex<ChatState>,
    updates: watch::Sender<ChatSnapshot>,
}

/// Owns the session list, the transcript and the live token stream for one chat surface.
///
/// Clones share state, so one task can drive `send_message` while another calls
/// `stop_streaming`. Rendering layers read `snapshot()` or follow `subscribe()`.
#[derive(Clone)]
pub struct ChatStreamController {
    inner: Arc<ControllerInner>,
}

impl ChatStreamController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        tokens: Arc<dyn TokenProvider>,
        settings: ControllerSettings,
    ) -> Self {
        let state = ChatState::default();
        let (updates, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(ControllerInner {
                backend,
                tokens,
                settings,
                state: Mutex::new(state),
                updates,
            }),
        }
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.updates.borrow().clone()
    }

    /// Receiver that observes every state change in the order it happened.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.with_state(|state| state.is_streaming())
    }

    /// Replaces the session list with the server's current set, in server order.
    ///
    /// Best effort: failures are logged and never reach the error field.
    pub async fn list_sessions(&self) {
        let Some(token) = self.inner.tokens.token() else {
            tracing::debug!("skipping session listing without an auth token");
            return;
        };

        match self.inner.backend.list_sessions(&token).await {
            Ok(sessions) => self.update(|state| state.sessions = sessions),
            Err(error) => {
                tracing::warn!(
                    stage = error.stage(),
                    error = %error,
                    "failed to list chat sessions"
                );
            }
        }
    }

    /// Creates a session and makes it active with an empty transcript.
    ///
    /// Returns `None` when signed out or when the backend refuses; in the latter case the
    /// error field carries the backend's reason.
    pub async fn create_session(
        &self,
        title: Option<String>,
        file_id: Option<FileId>,
    ) -> Option<SessionId> {
        let token = self.inner.tokens.token()?;
        self.interrupt_stream("create-session");
        self.update(|state| state.error = None);

        let request = NewSession::new(title, file_id);
        match self.inner.backend.create_session(&token, request).await {
            Ok(session_id) => {
                self.update(|state| state.open_fresh_session(session_id.clone()));
                self.list_sessions().await;
                Some(session_id)
            }
            Err(error) => {
                tracing::warn!(
                    stage = error.stage(),
                    error = %error,
                    "failed to create chat session"
                );
                self.update(|state| {
                    state.error = Some(error.user_message(CREATE_SESSION_FALLBACK));
                });
                None
            }
        }
    }

    /// Activates `session_id` and replaces the transcript with its stored history.
    ///
    /// The transcript is cleared before the request so stale turns are never shown while
    /// loading. A response that arrives after another session became active is dropped.
    pub async fn load_history(&self, session_id: SessionId) {
        let Some(token) = self.inner.tokens.token() else {
            return;
        };
        self.interrupt_stream("load-history");

        let generation = self.update(|state| state.begin_history_load(session_id.clone()));
        let result = self.inner.backend.load_history(&token, &session_id).await;

        self.update(|state| {
            if !state.is_current_history_load(generation) {
                tracing::debug!(session_id = %session_id, "dropping superseded history response");
                return;
            }

            state.loading = false;
            match result {
                Ok(history) => state.hydrate_history(history),
                Err(error) => {
                    tracing::warn!(
                        session_id = %session_id,
                        stage = error.stage(),
                        error = %error,
                        "failed to load chat history"
                    );
                    state.error = Some(error.user_message(LOAD_HISTORY_FALLBACK));
                }
            }
        });
    }

    /// Sends `query` to the active session and streams the reply into the transcript.
    ///
    /// Silently does nothing when signed out, when no session is active, or while another
    /// stream is in flight. Resolves once the stream has terminated.
    pub async fn send_message(&self, query: impl Into<String>) {
        let query = query.into();
        let Some(token) = self.inner.tokens.token() else {
            tracing::debug!("ignoring send without an auth token");
            return;
        };

        let Some(StreamStart {
            session_id,
            ticket,
            cancel_rx,
        }) = self.update(|state| state.begin_stream(&query))
        else {
            tracing::debug!("ignoring send without an active session or while streaming");
            return;
        };

        tracing::info!(session_id = %session_id, ticket = ticket.get(), "streaming chat reply");
        let outcome = self
            .drive_stream(&token, &session_id, &query, ticket, cancel_rx)
            .await;

        match &outcome {
            StreamOutcome::Completed => {
                tracing::debug!(ticket = ticket.get(), "chat stream completed");
            }
            StreamOutcome::Cancelled => {
                tracing::debug!(ticket = ticket.get(), "chat stream cancelled");
            }
            StreamOutcome::Failed(message) => {
                tracing::warn!(ticket = ticket.get(), error = %message, "chat stream failed");
            }
        }

        self.update(|state| state.finish_stream(ticket, outcome));
        // Pick up the server's refreshed title and `updated_at`.
        self.list_sessions().await;
    }

    /// Cancels the in-flight stream, if any, without waiting for the transport to notice.
    ///
    /// Streaming and status are cleared at once; the error field is left untouched.
    pub fn stop_streaming(&self) {
        if let Some(ticket) = self.update(ChatState::stop_stream) {
            tracing::info!(ticket = ticket.get(), "chat stream stopped");
        }
    }

    fn interrupt_stream(&self, stage: &'static str) {
        if let Some(ticket) = self.update(ChatState::stop_stream) {
            tracing::info!(
                stage,
                ticket = ticket.get(),
                "session switch stopped the active stream"
            );
        }
    }

    async fn drive_stream(
        &self,
        token: &AuthToken,
        session_id: &SessionId,
        query: &str,
        ticket: StreamTicket,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> StreamOutcome {
        let opened = tokio::select! {
            _ = &mut cancel_rx => return StreamOutcome::Cancelled,
            opened = self.inner.backend.stream_message(token, session_id, query) => opened,
        };

        let mut frames = match opened {
            Ok(frames) => frames,
            Err(error) => {
                tracing::warn!(
                    session_id = %session_id,
                    stage = error.stage(),
                    error = %error,
                    "failed to open chat stream"
                );
                return StreamOutcome::Failed(error.user_message(SEND_MESSAGE_FALLBACK));
            }
        };

        loop {
            let step = tokio::select! {
                biased;
                _ = &mut cancel_rx => return StreamOutcome::Cancelled,
                step = self.next_step(&mut frames) => step,
            };

            match step {
                ReadStep::Frame(frame) => {
                    // A stopped stream no longer owns the transcript.
                    if !self.apply_frame(ticket, frame) {
                        return StreamOutcome::Cancelled;
                    }
                }
                ReadStep::Failed(message) => return StreamOutcome::Failed(message),
                ReadStep::Ended => return StreamOutcome::Completed,
                ReadStep::IdleTimeout(idle) => {
                    return StreamOutcome::Failed(format!(
                        "no response from the server for {} seconds",
                        idle.as_secs()
                    ));
                }
            }
        }
    }

    async fn next_step(&self, frames: &mut FrameStream) -> ReadStep {
        let next = match self.inner.settings.stream_idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, frames.next()).await {
                Ok(next) => next,
                Err(_) => return ReadStep::IdleTimeout(idle),
            },
            None => frames.next().await,
        };

        match next {
            Some(Ok(frame)) => ReadStep::Frame(frame),
            Some(Err(error)) => ReadStep::Failed(error.to_string()),
            None => ReadStep::Ended,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ChatState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(&self, read: impl FnOnce(&ChatState) -> R) -> R {
        read(&self.lock_state())
    }

    /// Applies one frame of the stream `ticket`. Returns `false` once that stream is no
    /// longer the active one.
    ///
    /// Token frames only grow the draft, which is always the last published message, so
    /// the published snapshot is patched in place rather than rebuilt from the transcript.
    fn apply_frame(&self, ticket: StreamTicket, frame: StreamFrame) -> bool {
        let fragment = match frame {
            StreamFrame::Token(fragment) => fragment,
            frame => return self.update(|state| state.apply_frame(ticket, frame)),
        };

        let mut state = self.lock_state();
        if !state.apply_frame(ticket, StreamFrame::Token(fragment.clone())) {
            return false;
        }
        self.inner.updates.send_if_modified(|snapshot| {
            match snapshot
                .messages
                .last_mut()
                .filter(|draft| draft.status == MessageStatus::Streaming)
            {
                Some(draft) => {
                    draft.content.push_str(&fragment);
                    !fragment.is_empty()
                }
                None => {
                    *snapshot = state.snapshot();
                    true
                }
            }
        });
        true
    }

    /// Mutates state and publishes the resulting snapshot while still holding the lock,
    /// so subscribers observe changes in order.
    fn update<R>(&self, mutate: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.lock_state();
        let result = mutate(&mut state);

        let next = state.snapshot();
        self.inner.updates.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        result
    }
}
