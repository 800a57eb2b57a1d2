use serde::{Deserialize, Serialize};

use super::ids::{FileId, SessionId};

/// Server-tracked conversation scope, optionally bound to one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file_id: Option<FileId>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Pointer to a retrieved document chunk backing part of an answer.
///
/// Pages only exist for documents; video and audio chunks carry a time range instead, and
/// the server sends explicit nulls for whichever locator does not apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_preview: Option<String>,
}

/// Wire-level speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One persisted turn returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sources: Option<Vec<SourceRef>>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Routing label the backend assigned to the turn, when it recorded one.
    #[serde(default)]
    pub intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

impl NewSession {
    /// Builds a request body. Blank titles and file ids are dropped so the backend applies
    /// its defaults.
    pub fn new(title: Option<String>, file_id: Option<FileId>) -> Self {
        let title = title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());
        let file_id = file_id.filter(|file_id| !file_id.as_str().trim().is_empty());

        Self { title, file_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionList {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_id: Option<FileId>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct History {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub count: Option<usize>,
}

/// Error envelope; validation failures carry structured detail instead of a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Option<String> {
        let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
        match parsed.detail? {
            serde_json::Value::Null => None,
            serde_json::Value::String(detail) if detail.trim().is_empty() => None,
            serde_json::Value::String(detail) => Some(detail),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ignores_unknown_fields_and_defaults_missing_ones() {
        let session: Session = serde_json::from_str(
            r#"{"session_id":"sess_1","user_id":"u1","title":"Lecture 4","file_id":null,"created_at":"2024-01-01T00:00:00"}"#,
        )
        .expect("session should decode");

        assert_eq!(session.session_id.as_str(), "sess_1");
        assert_eq!(session.title, "Lecture 4");
        assert_eq!(session.file_id, None);
        assert_eq!(session.updated_at, "");
    }

    #[test]
    fn new_session_omits_blank_fields() {
        let body = NewSession::new(Some("   ".to_string()), Some(FileId::from("")));
        assert_eq!(serde_json::to_string(&body).expect("serialize"), "{}");

        let body = NewSession::new(Some(" Lecture 4 ".to_string()), Some(FileId::from("file_42")));
        assert_eq!(
            serde_json::to_value(&body).expect("serialize"),
            serde_json::json!({"title": "Lecture 4", "file_id": "file_42"})
        );
    }

    #[test]
    fn history_message_keeps_sources_and_intent() {
        let history: History = serde_json::from_str(
            r#"{"messages":[
                {"role":"user","content":"What is X?","timestamp":"t1"},
                {"role":"assistant","content":"X is...","intent":"RAG_SEARCH",
                 "sources":[{"file_name":"a.pdf","page_number":3,"relevance_score":0.91}]}
            ],"count":2}"#,
        )
        .expect("history should decode");

        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[0].role, Role::User);
        assert_eq!(history.messages[1].intent.as_deref(), Some("RAG_SEARCH"));
        let sources = history.messages[1].sources.as_ref().expect("sources");
        assert_eq!(sources[0].page_number, Some(3));
        assert_eq!(sources[0].chunk_preview, None);
    }

    #[test]
    fn history_accepts_media_sources_without_pages() {
        let history: History = serde_json::from_str(
            r#"{"messages":[
                {"role":"assistant","content":"See the lecture.",
                 "sources":[{"file_name":"lec.mp4","file_type":"video","page_number":null,
                             "timestamp_start":"00:12:30","timestamp_end":"00:13:05",
                             "relevance_score":null}]}
            ],"count":1}"#,
        )
        .expect("history with a null page should decode");

        let sources = history.messages[0].sources.as_ref().expect("sources");
        assert_eq!(
            sources[0],
            SourceRef {
                file_name: "lec.mp4".to_string(),
                file_type: Some("video".to_string()),
                timestamp_start: Some("00:12:30".to_string()),
                timestamp_end: Some("00:13:05".to_string()),
                ..SourceRef::default()
            }
        );
    }

    #[test]
    fn error_body_renders_string_and_structured_detail() {
        assert_eq!(
            ErrorBody::parse(r#"{"detail":"File file_42 not found"}"#).as_deref(),
            Some("File file_42 not found")
        );
        assert_eq!(
            ErrorBody::parse(r#"{"detail":[{"loc":["body","query"],"msg":"field required"}]}"#)
                .as_deref(),
            Some(r#"[{"loc":["body","query"],"msg":"field required"}]"#)
        );
        assert_eq!(ErrorBody::parse(r#"{"detail":""}"#), None);
        assert_eq!(ErrorBody::parse("internal error"), None);
    }
}
