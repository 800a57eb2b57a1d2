use futures::{Stream, StreamExt, future, stream};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};
use super::types::SourceRef;

pub const DATA_PREFIX: &str = "data: ";

/// One decoded `data: {"t": tag, "d": payload}` line from the message stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Status(String),
    Token(String),
    Sources(Vec<SourceRef>),
    Error(String),
    Done,
    /// Tag outside the known vocabulary; callers ignore it.
    Unknown { tag: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    t: String,
    #[serde(default)]
    d: serde_json::Value,
}

impl StreamFrame {
    /// Parses one complete line. Non-data lines and malformed frames yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let payload = line.trim().strip_prefix(DATA_PREFIX)?;

        let raw = match serde_json::from_str::<RawFrame>(payload) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::debug!(error = %error, "skipping malformed stream frame");
                return None;
            }
        };

        let frame = match raw.t.as_str() {
            "status" => Self::Status(expect_text(raw.d, "status")?),
            "token" => Self::Token(expect_text(raw.d, "token")?),
            "error" => Self::Error(expect_text(raw.d, "error")?),
            "done" => Self::Done,
            "sources" => {
                if raw.d.is_null() {
                    Self::Sources(Vec::new())
                } else {
                    match serde_json::from_value::<Vec<SourceRef>>(raw.d) {
                        Ok(sources) => Self::Sources(sources),
                        Err(error) => {
                            tracing::debug!(
                                error = %error,
                                "skipping sources frame with invalid payload"
                            );
                            return None;
                        }
                    }
                }
            }
            _ => Self::Unknown { tag: raw.t },
        };

        Some(frame)
    }
}

fn expect_text(payload: serde_json::Value, tag: &'static str) -> Option<String> {
    match payload {
        serde_json::Value::String(text) => Some(text),
        other => {
            tracing::debug!(tag, payload = %other, "skipping frame with non-string payload");
            None
        }
    }
}

/// Splits a chunked byte stream into frames, carrying unterminated lines between chunks.
///
/// Buffering happens on bytes rather than text so a multi-byte character split across
/// two reads is only decoded once its line is complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|byte| *byte == b'\n') {
            let line = &self.buffer[consumed..consumed + offset];
            consumed += offset + 1;

            if let Some(frame) = StreamFrame::parse_line(&String::from_utf8_lossy(line)) {
                frames.push(frame);
            }
        }

        self.buffer.drain(..consumed);
        frames
    }

    /// Number of buffered bytes still waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Ends decoding. Trailing bytes without a terminator are dropped; returns how many.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            tracing::debug!(dropped_bytes = dropped, "discarding unterminated stream tail");
        }
        self.buffer.clear();
        dropped
    }
}

/// Adapts a fallible byte-chunk stream into frames in arrival order.
pub fn frame_stream<S, B>(bytes: S) -> impl Stream<Item = ApiResult<StreamFrame>> + Send + 'static
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    bytes
        .map(Some)
        .chain(stream::once(future::ready(None)))
        .scan(FrameDecoder::new(), |decoder, chunk| {
            let batch: Vec<ApiResult<StreamFrame>> = match chunk {
                Some(Ok(bytes)) => decoder.push(bytes.as_ref()).into_iter().map(Ok).collect(),
                Some(Err(source)) => vec![Err(ApiError::ReadStream {
                    stage: "read-message-stream",
                    source,
                })],
                None => {
                    decoder.finish();
                    Vec::new()
                }
            };
            future::ready(Some(batch))
        })
        .flat_map(stream::iter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(file_name: &str, page_number: u32, relevance_score: f64) -> SourceRef {
        SourceRef {
            file_name: file_name.to_string(),
            page_number: Some(page_number),
            relevance_score: Some(relevance_score),
            ..SourceRef::default()
        }
    }

    #[test]
    fn parses_every_known_tag() {
        assert_eq!(
            StreamFrame::parse_line(r#"data: {"t":"status","d":"Searching knowledge base..."}"#),
            Some(StreamFrame::Status("Searching knowledge base...".to_string()))
        );
        assert_eq!(
            StreamFrame::parse_line(r#"data: {"t":"token","d":"The "}"#),
            Some(StreamFrame::Token("The ".to_string()))
        );
        assert_eq!(
            StreamFrame::parse_line(r#"data: {"t":"error","d":"Something went wrong"}"#),
            Some(StreamFrame::Error("Something went wrong".to_string()))
        );
        assert_eq!(
            StreamFrame::parse_line(r#"data: {"t":"done","d":""}"#),
            Some(StreamFrame::Done)
        );
        assert_eq!(
            StreamFrame::parse_line(
                r#"data: {"t":"sources","d":[{"file_name":"a.pdf","page_number":3,"relevance_score":0.91}]}"#
            ),
            Some(StreamFrame::Sources(vec![source("a.pdf", 3, 0.91)]))
        );
        assert_eq!(
            StreamFrame::parse_line(
                r#"data: {"t":"sources","d":[{"file_name":"lec.mp4","file_type":"video","page_number":null,"timestamp_start":"00:12:30","timestamp_end":"00:13:05","relevance_score":0.7}]}"#
            ),
            Some(StreamFrame::Sources(vec![SourceRef {
                file_name: "lec.mp4".to_string(),
                file_type: Some("video".to_string()),
                timestamp_start: Some("00:12:30".to_string()),
                timestamp_end: Some("00:13:05".to_string()),
                relevance_score: Some(0.7),
                ..SourceRef::default()
            }]))
        );
        assert_eq!(
            StreamFrame::parse_line(r#"data: {"t":"sources","d":null}"#),
            Some(StreamFrame::Sources(Vec::new()))
        );
        assert_eq!(
            StreamFrame::parse_line(r#"data: {"t":"thinking","d":"hmm"}"#),
            Some(StreamFrame::Unknown {
                tag: "thinking".to_string()
            })
        );
    }

    #[test]
    fn ignores_non_data_and_malformed_lines() {
        assert_eq!(StreamFrame::parse_line(""), None);
        assert_eq!(StreamFrame::parse_line(": keep-alive"), None);
        assert_eq!(StreamFrame::parse_line(r#"event: {"t":"token","d":"x"}"#), None);
        assert_eq!(StreamFrame::parse_line("data: not-json"), None);
        assert_eq!(StreamFrame::parse_line(r#"data: {"t":"token","d":42}"#), None);
        assert_eq!(StreamFrame::parse_line(r#"data: {"t":"sources","d":"a.pdf"}"#), None);
    }

    #[test]
    fn tolerates_carriage_returns() {
        assert_eq!(
            StreamFrame::parse_line("data: {\"t\":\"token\",\"d\":\"x\"}\r"),
            Some(StreamFrame::Token("x".to_string()))
        );
    }

    #[test]
    fn line_split_across_reads_yields_one_frame() {
        let mut decoder = FrameDecoder::new();

        assert!(decoder.push(br#"data: {"t":"tok"#).is_empty());
        assert_eq!(decoder.pending(), 15);

        let frames = decoder.push(b"en\",\"d\":\"answer\"}\n\n");
        assert_eq!(frames, vec![StreamFrame::Token("answer".to_string())]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn multibyte_character_split_across_reads_survives() {
        let line = "data: {\"t\":\"token\",\"d\":\"caf\u{e9} \u{1f4da}\"}\n".as_bytes();
        let split = line.len() - 5;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(
            decoder.push(&line[split..]),
            vec![StreamFrame::Token("caf\u{e9} \u{1f4da}".to_string())]
        );
    }

    #[test]
    fn malformed_frame_between_tokens_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(
            b"data: {\"t\":\"token\",\"d\":\"a\"}\n\ndata: not-json\n\ndata: {\"t\":\"token\",\"d\":\"b\"}\n\n",
        );
        assert_eq!(
            frames,
            vec![
                StreamFrame::Token("a".to_string()),
                StreamFrame::Token("b".to_string()),
            ]
        );
    }

    #[test]
    fn finish_drops_unterminated_tail() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(br#"data: {"t":"done","d":""}"#).is_empty());
        assert_eq!(decoder.finish(), 25);
        assert_eq!(decoder.pending(), 0);
    }

    #[tokio::test]
    async fn frame_stream_is_independent_of_chunk_boundaries() {
        let body = concat!(
            "data: {\"t\":\"status\",\"d\":\"retrieving\"}\n\n",
            "data: {\"t\":\"token\",\"d\":\"The \"}\n\n",
            ": keep-alive\n\n",
            "data: {\"t\":\"token\",\"d\":\"answer\"}\n\n",
            "data: {\"t\":\"done\",\"d\":\"\"}\n\n",
        )
        .as_bytes();

        for chunk_size in [1, 2, 3, 7, 16, body.len()] {
            let chunks = body
                .chunks(chunk_size)
                .map(|chunk| Ok::<_, reqwest::Error>(chunk.to_vec()))
                .collect::<Vec<_>>();

            let frames = frame_stream(stream::iter(chunks))
                .map(|frame| frame.expect("no transport errors in fixture"))
                .collect::<Vec<_>>()
                .await;

            assert_eq!(
                frames,
                vec![
                    StreamFrame::Status("retrieving".to_string()),
                    StreamFrame::Token("The ".to_string()),
                    StreamFrame::Token("answer".to_string()),
                    StreamFrame::Done,
                ],
                "chunk size {chunk_size}"
            );
        }
    }
}
