#![deny(unsafe_code)]

//! Chat session state for CampusMind: the streaming controller, the transcript model and
//! client settings.

pub mod controller;
pub mod message;
pub mod settings;
pub mod state;

pub use controller::{ChatStreamController, ControllerSettings, DEFAULT_STREAM_IDLE_TIMEOUT};
pub use message::{AssistantDraft, Message, MessageId, MessageStatus};
pub use settings::{Settings, SettingsError, SettingsStore};
pub use state::{ChatSnapshot, StreamTicket};
