//! Incremental decoder for the ingestion event-stream protocol.
//!
//! The server answers one fan-out request with a chunked stream of
//! named frames. A frame is a group of `event:` / `data:` lines
//! terminated by a blank line; `data` may span several lines, which
//! are joined before JSON parsing. Frames arrive split across network
//! chunks arbitrarily, so the decoder buffers until it sees a frame
//! boundary.
//!
//! Frame names:
//! - `result` — one completed URL, `data` carries
//!   `{url, ok, json?, title?}`
//! - `error` — server-side failure, `data` carries `{error}`
//! - `done` — terminal, no payload; a stream that ends without it is
//!   treated as truncated by the client

use serde_json::Value;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A completed URL fetch.
    Result(UrlResult),
    /// A server-side error report.
    Error {
        /// Human-readable error message.
        message: String,
    },
    /// Terminal frame: no more results will arrive.
    Done,
}

/// Payload of a `result` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlResult {
    /// The URL this result is for.
    pub url: String,
    /// Whether the server-side fetch succeeded.
    pub ok: bool,
    /// The fetched JSON document, when `ok` and parseable.
    pub json: Option<Value>,
    /// Declared page title, when the server extracted one.
    pub title: Option<String>,
}

/// Buffers chunks and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some((end, skip)) = find_boundary(&self.buf) {
            let raw: Vec<u8> = self.buf.drain(..end + skip).collect();
            let text = String::from_utf8_lossy(&raw[..end]);
            if let Some(frame) = parse_frame(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Returns `true` if buffered bytes remain that never formed a
    /// complete frame (a truncation indicator).
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Finds the earliest frame boundary: `\n\n` or `\r\n\r\n`.
/// Returns `(frame_end, boundary_len)`.
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Parses one frame's text. Unknown event names are ignored (the
/// protocol may grow new frame types).
fn parse_frame(text: &str) -> Option<Frame> {
    let mut event: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    let data = data_lines.join("\n");

    match event? {
        "done" => Some(Frame::Done),
        "error" => {
            let message = serde_json::from_str::<Value>(&data)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| {
                    if data.is_empty() {
                        "unspecified stream error".to_string()
                    } else {
                        data.clone()
                    }
                });
            Some(Frame::Error { message })
        }
        "result" => {
            let value: Value = serde_json::from_str(&data).ok()?;
            let url = value.get("url")?.as_str()?.to_string();
            Some(Frame::Result(UrlResult {
                url,
                ok: value.get("ok").and_then(Value::as_bool).unwrap_or(false),
                json: value.get("json").cloned().filter(|j| !j.is_null()),
                title: value
                    .get("title")
                    .and_then(Value::as_str)
                    .map(String::from),
            }))
        }
        other => {
            log::debug!("Ignoring unknown stream frame '{other}'");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_result_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(
            b"event: result\ndata: {\"url\":\"https://a.example\",\"ok\":true,\"json\":[1,2]}\n\n",
        );
        assert_eq!(frames.len(), 1);
        let Frame::Result(result) = &frames[0] else {
            panic!("expected result frame");
        };
        assert_eq!(result.url, "https://a.example");
        assert!(result.ok);
        assert_eq!(result.json, Some(serde_json::json!([1, 2])));
    }

    #[test]
    fn tolerates_frames_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"event: res").is_empty());
        assert!(decoder.push(b"ult\ndata: {\"url\":\"https://b.example\",").is_empty());
        let frames = decoder.push(b"\"ok\":false}\n\nevent: done\n\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Result(_)));
        assert_eq!(frames[1], Frame::Done);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn decodes_multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(
            b"event: error\ndata: {\"error\":\"backend overloaded\"}\n\nevent: done\n\n",
        );
        assert_eq!(
            frames,
            vec![
                Frame::Error {
                    message: "backend overloaded".to_string()
                },
                Frame::Done
            ]
        );
    }

    #[test]
    fn handles_crlf_boundaries() {
        let mut decoder = FrameDecoder::new();
        let frames =
            decoder.push(b"event: result\r\ndata: {\"url\":\"https://c.example\"}\r\n\r\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(
            b"event: result\ndata: {\"url\":\"https://d.example\",\ndata: \"ok\":true}\n\n",
        );
        assert_eq!(frames.len(), 1);
        let Frame::Result(result) = &frames[0] else {
            panic!("expected result frame");
        };
        assert!(result.ok);
    }

    #[test]
    fn reports_partial_leftovers() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"event: result\ndata: {\"url\":");
        assert!(decoder.has_partial());
    }

    #[test]
    fn ignores_unknown_frame_names() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"event: heartbeat\ndata: {}\n\nevent: done\n\n");
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[test]
    fn missing_title_and_json_are_none() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder
            .push(b"event: result\ndata: {\"url\":\"https://e.example\",\"ok\":true,\"json\":null}\n\n");
        let Frame::Result(result) = &frames[0] else {
            panic!("expected result frame");
        };
        assert!(result.json.is_none());
        assert!(result.title.is_none());
    }
}
