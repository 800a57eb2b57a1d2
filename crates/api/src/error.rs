use snafu::Snafu;

pub const CREATE_SESSION_FALLBACK: &str = "Failed to create session";
pub const LOAD_HISTORY_FALLBACK: &str = "Failed to load history";
pub const SEND_MESSAGE_FALLBACK: &str = "Chat request failed";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("backend base URL '{base_url}' is invalid: {details}"))]
    InvalidBaseUrl {
        stage: &'static str,
        base_url: String,
        details: String,
    },
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request failed on `{stage}`: {source}"))]
    SendRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} on `{stage}`"))]
    Status {
        stage: &'static str,
        status: u16,
        detail: Option<String>,
    },
    #[snafu(display("failed to decode response body on `{stage}`: {source}"))]
    DecodeBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("stream read failed on `{stage}`: {source}"))]
    ReadStream {
        stage: &'static str,
        source: reqwest::Error,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl { stage, .. }
            | Self::BuildClient { stage, .. }
            | Self::SendRequest { stage, .. }
            | Self::Status { stage, .. }
            | Self::DecodeBody { stage, .. }
            | Self::ReadStream { stage, .. } => *stage,
        }
    }

    /// Error text the backend supplied in its `detail` field, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }

    /// Message suitable for an inline error banner: backend detail verbatim, else `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        self.detail().unwrap_or(fallback).to_string()
    }
}
