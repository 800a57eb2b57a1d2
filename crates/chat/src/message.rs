use std::fmt;

use campusmind_api::{HistoryMessage, Role, SourceRef};

/// Client-side message identifier.
///
/// History rows have no natural client id, so they are keyed by position; live turns use a
/// per-controller counter. The two prefixes never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn live(seq: u64) -> Self {
        Self(format!("msg_{seq}"))
    }

    pub fn history(index: usize) -> Self {
        Self(format!("hist_{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Lifecycle status for one transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Complete,
    /// Only ever reported for the in-flight assistant draft.
    Streaming,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub sources: Option<Vec<SourceRef>>,
    pub timestamp: Option<String>,
    pub status: MessageStatus,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            sources: None,
            timestamp: None,
            status: MessageStatus::Complete,
        }
    }

    pub fn from_history(index: usize, message: HistoryMessage) -> Self {
        Self {
            id: MessageId::history(index),
            role: message.role,
            content: message.content,
            sources: message.sources,
            timestamp: message.timestamp,
            status: MessageStatus::Complete,
        }
    }

    /// Citations attached to this message, treating an empty list as none.
    pub fn citations(&self) -> Option<&[SourceRef]> {
        self.sources
            .as_deref()
            .filter(|sources| !sources.is_empty())
    }
}

/// Accumulator for the assistant reply of the stream in flight.
///
/// Kept apart from the finalized transcript; it is spliced in exactly once when the
/// stream terminates.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantDraft {
    id: MessageId,
    content: String,
    sources: Option<Vec<SourceRef>>,
    error_reported: bool,
}

impl AssistantDraft {
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            content: String::new(),
            sources: None,
            error_reported: false,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn push_token(&mut self, fragment: &str) {
        self.content.push_str(fragment);
    }

    pub fn attach_sources(&mut self, sources: Vec<SourceRef>) {
        self.sources = Some(sources);
    }

    pub fn mark_error_reported(&mut self) {
        self.error_reported = true;
    }

    /// Renders the draft as it should appear while tokens are still arriving.
    pub fn preview(&self) -> Message {
        self.render(MessageStatus::Streaming)
    }

    /// Freezes the draft. A completed stream that carried an `error` frame is recorded as failed.
    pub fn finish(self, status: MessageStatus) -> Message {
        let status = match status {
            MessageStatus::Complete if self.error_reported => MessageStatus::Failed,
            other => other,
        };

        Message {
            id: self.id,
            role: Role::Assistant,
            content: self.content,
            sources: self.sources,
            timestamp: None,
            status,
        }
    }

    fn render(&self, status: MessageStatus) -> Message {
        Message {
            id: self.id.clone(),
            role: Role::Assistant,
            content: self.content.clone(),
            sources: self.sources.clone(),
            timestamp: None,
            status,
        }
    }
}
