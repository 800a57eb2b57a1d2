#![deny(unsafe_code)]

//! Client side of the CampusMind chat backend: wire types, SSE framing and the HTTP transport.

pub mod auth;
pub mod backend;
pub mod error;
pub mod frame;
pub mod http;
pub mod ids;
pub mod types;

pub use auth::{AuthToken, SharedToken, StaticToken, TokenProvider};
pub use backend::{BoxFuture, ChatBackend, FrameStream};
pub use error::{
    ApiError, ApiResult, CREATE_SESSION_FALLBACK, LOAD_HISTORY_FALLBACK, SEND_MESSAGE_FALLBACK,
};
pub use frame::{DATA_PREFIX, FrameDecoder, StreamFrame, frame_stream};
pub use http::{BackendConfig, DEFAULT_BASE_URL, EVENT_STREAM_MIME, HttpChatBackend};
pub use ids::{FileId, SessionId};
pub use types::{
    CreatedSession, ErrorBody, History, HistoryMessage, MessageQuery, NewSession, Role, Session,
    SessionList, SourceRef,
};
