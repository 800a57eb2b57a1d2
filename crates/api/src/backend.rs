use std::future::Future;
use std::pin::Pin;

use futures::Stream;

use super::auth::AuthToken;
use super::error::ApiResult;
use super::frame::StreamFrame;
use super::ids::SessionId;
use super::types::{HistoryMessage, NewSession, Session};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = ApiResult<StreamFrame>> + Send + 'static>>;

/// Chat backend contract: session CRUD, transcript history and the per-session message stream.
///
/// The token is passed on every call; implementations never cache credentials.
pub trait ChatBackend: Send + Sync {
    fn list_sessions<'a>(&'a self, token: &'a AuthToken) -> BoxFuture<'a, ApiResult<Vec<Session>>>;

    fn create_session<'a>(
        &'a self,
        token: &'a AuthToken,
        request: NewSession,
    ) -> BoxFuture<'a, ApiResult<SessionId>>;

    fn load_history<'a>(
        &'a self,
        token: &'a AuthToken,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, ApiResult<Vec<HistoryMessage>>>;

    /// Opens the streaming response for `query`. Resolves once response headers arrive;
    /// frames are then pulled from the returned stream.
    fn stream_message<'a>(
        &'a self,
        token: &'a AuthToken,
        session_id: &'a SessionId,
        query: &'a str,
    ) -> BoxFuture<'a, ApiResult<FrameStream>>;
}
