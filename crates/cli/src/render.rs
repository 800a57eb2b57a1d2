use std::io::{self, Write};

use campusmind_api::{Role, Session, SourceRef};
use campusmind_chat::{ChatSnapshot, Message, MessageStatus};

pub fn session_line(session: &Session) -> String {
    let mut line = format!("{}  {}", session.session_id, session.title);
    if !session.updated_at.is_empty() {
        line.push_str(&format!("  (updated {})", session.updated_at));
    }
    if let Some(file_id) = &session.file_id {
        line.push_str(&format!("  [file {file_id}]"));
    }
    line
}

/// Where in the file a citation points: a page for documents, a time range for media.
fn locator(source: &SourceRef) -> Option<String> {
    if let Some(page) = source.page_number {
        return Some(format!("p.{page}"));
    }
    match (source.timestamp_start.as_deref(), source.timestamp_end.as_deref()) {
        (Some(start), Some(end)) => Some(format!("{start}-{end}")),
        (Some(start), None) => Some(start.to_string()),
        _ => None,
    }
}

pub fn citation_lines(sources: &[SourceRef]) -> Vec<String> {
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let mut line = format!("  [{}] {}", index + 1, source.file_name);
            if let Some(locator) = locator(source) {
                line.push_str(&format!(" {locator}"));
            }
            if let Some(score) = source.relevance_score {
                line.push_str(&format!(" ({score:.2})"));
            }
            line
        })
        .collect()
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

pub fn write_transcript(out: &mut impl Write, messages: &[Message]) -> io::Result<()> {
    for message in messages {
        let marker = match message.status {
            MessageStatus::Cancelled => " (stopped)",
            MessageStatus::Failed => " (failed)",
            MessageStatus::Complete | MessageStatus::Streaming => "",
        };
        writeln!(out, "{}{marker}> {}", speaker(message.role), message.content)?;
        if let Some(sources) = message.citations() {
            for line in citation_lines(sources) {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}

/// Prints one assistant reply incrementally as snapshots arrive.
///
/// Token text goes to `out`; status lines go to `notes` so piped output stays clean.
pub struct ReplyPrinter {
    assistant_index: usize,
    printed: usize,
    status: Option<String>,
}

impl ReplyPrinter {
    /// `transcript_len` is the transcript length observed before the send.
    pub fn new(transcript_len: usize) -> Self {
        Self {
            assistant_index: transcript_len + 1,
            printed: 0,
            status: None,
        }
    }

    pub fn render(
        &mut self,
        snapshot: &ChatSnapshot,
        out: &mut impl Write,
        notes: &mut impl Write,
    ) -> io::Result<()> {
        if snapshot.status != self.status {
            if let Some(status) = snapshot.status.as_deref() {
                writeln!(notes, "... {status}")?;
            }
            self.status = snapshot.status.clone();
        }

        let Some(reply) = snapshot
            .messages
            .get(self.assistant_index)
            .filter(|message| message.role == Role::Assistant)
        else {
            return Ok(());
        };

        if let Some(fresh) = reply.content.get(self.printed..)
            && !fresh.is_empty()
        {
            out.write_all(fresh.as_bytes())?;
            out.flush()?;
            self.printed = reply.content.len();
        }
        Ok(())
    }

    /// Ends the reply line and lists the citations of the finished turn.
    pub fn finish(&self, snapshot: &ChatSnapshot, out: &mut impl Write) -> io::Result<()> {
        if self.printed > 0 {
            writeln!(out)?;
        }
        if !snapshot.sources.is_empty() {
            writeln!(out, "sources:")?;
            for line in citation_lines(&snapshot.sources) {
                writeln!(out, "{line}")?;
            }
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use campusmind_api::SessionId;
    use campusmind_chat::MessageId;

    use super::*;

    fn assistant(content: &str, status: MessageStatus) -> Message {
        Message {
            id: MessageId::live(2),
            role: Role::Assistant,
            content: content.to_string(),
            sources: None,
            timestamp: None,
            status,
        }
    }

    fn snapshot(reply: &str, status: Option<&str>) -> ChatSnapshot {
        ChatSnapshot {
            active_session_id: Some(SessionId::from("sess_1")),
            messages: vec![
                Message::user(MessageId::live(1), "What is X?"),
                assistant(reply, MessageStatus::Streaming),
            ],
            status: status.map(str::to_string),
            streaming: true,
            ..ChatSnapshot::default()
        }
    }

    #[test]
    fn printer_emits_only_new_text() {
        let mut printer = ReplyPrinter::new(0);
        let mut out = Vec::new();
        let mut notes = Vec::new();

        printer
            .render(&snapshot("", Some("retrieving")), &mut out, &mut notes)
            .expect("render");
        printer
            .render(&snapshot("The ", Some("retrieving")), &mut out, &mut notes)
            .expect("render");
        printer
            .render(&snapshot("The answer", None), &mut out, &mut notes)
            .expect("render");

        assert_eq!(String::from_utf8(out).expect("utf8"), "The answer");
        assert_eq!(String::from_utf8(notes).expect("utf8"), "... retrieving\n");
    }

    #[test]
    fn finish_lists_citations() {
        let printer = ReplyPrinter::new(0);
        let mut finished = snapshot("done", None);
        finished.sources = vec![SourceRef {
            file_name: "notes.pdf".to_string(),
            page_number: Some(4),
            relevance_score: Some(0.876),
            ..SourceRef::default()
        }];

        let mut out = Vec::new();
        printer.finish(&finished, &mut out).expect("finish");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "sources:\n  [1] notes.pdf p.4 (0.88)\n"
        );
    }

    #[test]
    fn media_citations_show_time_range() {
        let sources = vec![
            SourceRef {
                file_name: "lec.mp4".to_string(),
                file_type: Some("video".to_string()),
                timestamp_start: Some("00:12:30".to_string()),
                timestamp_end: Some("00:13:05".to_string()),
                relevance_score: Some(0.7),
                ..SourceRef::default()
            },
            SourceRef {
                file_name: "memo.m4a".to_string(),
                ..SourceRef::default()
            },
        ];

        assert_eq!(
            citation_lines(&sources),
            vec![
                "  [1] lec.mp4 00:12:30-00:13:05 (0.70)".to_string(),
                "  [2] memo.m4a".to_string(),
            ]
        );
    }

    #[test]
    fn transcript_marks_stopped_replies() {
        let messages = vec![
            Message::user(MessageId::live(1), "hi"),
            assistant("Hel", MessageStatus::Cancelled),
        ];
        let mut out = Vec::new();
        write_transcript(&mut out, &messages).expect("write");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "you> hi\nassistant (stopped)> Hel\n"
        );
    }

    #[test]
    fn session_line_includes_optional_fields() {
        let session = Session {
            session_id: SessionId::from("sess_9"),
            title: "Lecture 4".to_string(),
            file_id: None,
            created_at: "2024-03-02T09:00:00".to_string(),
            updated_at: "2024-03-02T10:00:00".to_string(),
        };
        assert_eq!(
            session_line(&session),
            "sess_9  Lecture 4  (updated 2024-03-02T10:00:00)"
        );
    }
}
