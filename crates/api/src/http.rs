use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, Url};
use snafu::{ResultExt, ensure};

use super::auth::AuthToken;
use super::backend::{BoxFuture, ChatBackend, FrameStream};
use super::error::{
    ApiError, ApiResult, BuildClientSnafu, DecodeBodySnafu, InvalidBaseUrlSnafu, SendRequestSnafu,
    StatusSnafu,
};
use super::frame::frame_stream;
use super::ids::SessionId;
use super::types::{
    CreatedSession, ErrorBody, History, HistoryMessage, MessageQuery, NewSession, Session,
    SessionList,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
pub const EVENT_STREAM_MIME: &str = "text/event-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    /// Applied to the JSON endpoints only; the message stream is bounded by the caller.
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            request_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// reqwest-backed implementation of the chat REST + SSE contract.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: Client,
    base_url: Url,
    request_timeout: Option<Duration>,
}

impl HttpChatBackend {
    pub fn new(config: BackendConfig) -> ApiResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|error| ApiError::InvalidBaseUrl {
            stage: "parse-base-url",
            base_url: config.base_url.clone(),
            details: error.to_string(),
        })?;
        ensure!(
            !base_url.cannot_be_a_base(),
            InvalidBaseUrlSnafu {
                stage: "validate-base-url",
                base_url: config.base_url.clone(),
                details: "URL cannot carry path segments",
            }
        );

        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().context(BuildClientSnafu {
            stage: "build-http-client",
        })?;

        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Base URL was validated in `new`, so segment editing is always available.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, builder: RequestBuilder, token: &AuthToken) -> RequestBuilder {
        builder.header(AUTHORIZATION, token.bearer())
    }

    fn bounded(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    async fn ensure_success(response: Response, stage: &'static str) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = ErrorBody::parse(&body);
        tracing::warn!(
            stage,
            status = status.as_u16(),
            detail = ?detail,
            "chat backend rejected request"
        );

        StatusSnafu {
            stage,
            status: status.as_u16(),
            detail,
        }
        .fail()
    }

    async fn fetch_sessions(&self, token: &AuthToken) -> ApiResult<Vec<Session>> {
        let request = self.bounded(
            self.authorized(self.client.get(self.endpoint(&["chat", "sessions"])), token),
        );
        let response = request.send().await.context(SendRequestSnafu {
            stage: "list-sessions-send",
        })?;
        let response = Self::ensure_success(response, "list-sessions-status").await?;
        let payload = response.json::<SessionList>().await.context(DecodeBodySnafu {
            stage: "list-sessions-decode",
        })?;

        tracing::debug!(session_count = payload.sessions.len(), "listed chat sessions");
        Ok(payload.sessions)
    }

    async fn post_session(&self, token: &AuthToken, body: NewSession) -> ApiResult<SessionId> {
        let request = self.bounded(
            self.authorized(self.client.post(self.endpoint(&["chat", "sessions"])), token)
                .json(&body),
        );
        let response = request.send().await.context(SendRequestSnafu {
            stage: "create-session-send",
        })?;
        let response = Self::ensure_success(response, "create-session-status").await?;
        let created = response.json::<CreatedSession>().await.context(DecodeBodySnafu {
            stage: "create-session-decode",
        })?;

        tracing::info!(
            session_id = %created.session_id,
            file_id = ?created.file_id,
            "created chat session"
        );
        Ok(created.session_id)
    }

    async fn fetch_history(
        &self,
        token: &AuthToken,
        session_id: &SessionId,
    ) -> ApiResult<Vec<HistoryMessage>> {
        let url = self.endpoint(&["chat", "sessions", session_id.as_str(), "history"]);
        let request = self.bounded(self.authorized(self.client.get(url), token));
        let response = request.send().await.context(SendRequestSnafu {
            stage: "load-history-send",
        })?;
        let response = Self::ensure_success(response, "load-history-status").await?;
        let history = response.json::<History>().await.context(DecodeBodySnafu {
            stage: "load-history-decode",
        })?;

        tracing::debug!(
            session_id = %session_id,
            message_count = history.messages.len(),
            "loaded chat history"
        );
        Ok(history.messages)
    }

    async fn open_stream(
        &self,
        token: &AuthToken,
        session_id: &SessionId,
        query: &str,
    ) -> ApiResult<FrameStream> {
        let url = self.endpoint(&["chat", "sessions", session_id.as_str(), "message"]);
        let request = self
            .authorized(self.client.post(url), token)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .json(&MessageQuery {
                query: query.to_string(),
            });
        let response = request.send().await.context(SendRequestSnafu {
            stage: "send-message-send",
        })?;
        let response = Self::ensure_success(response, "send-message-status").await?;

        tracing::debug!(session_id = %session_id, "opened message stream");
        Ok(Box::pin(frame_stream(response.bytes_stream())))
    }
}

impl ChatBackend for HttpChatBackend {
    fn list_sessions<'a>(&'a self, token: &'a AuthToken) -> BoxFuture<'a, ApiResult<Vec<Session>>> {
        Box::pin(self.fetch_sessions(token))
    }

    fn create_session<'a>(
        &'a self,
        token: &'a AuthToken,
        request: NewSession,
    ) -> BoxFuture<'a, ApiResult<SessionId>> {
        Box::pin(self.post_session(token, request))
    }

    fn load_history<'a>(
        &'a self,
        token: &'a AuthToken,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, ApiResult<Vec<HistoryMessage>>> {
        Box::pin(self.fetch_history(token, session_id))
    }

    fn stream_message<'a>(
        &'a self,
        token: &'a AuthToken,
        session_id: &'a SessionId,
        query: &'a str,
    ) -> BoxFuture<'a, ApiResult<FrameStream>> {
        Box::pin(self.open_stream(token, session_id, query))
    }
}
