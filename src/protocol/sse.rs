use tracing::warn;

use super::messages::StreamEvent;

/// Terminating chunk that ends a chunked request body.
pub const LAST_HTTP_CHUNK: &[u8] = b"0\r\n\r\n";

/// Length-prefixed audio frame for the local backend: 4-byte big-endian
/// length, then raw PCM bytes.
pub fn encode_audio_frame(pcm: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + pcm.len());
    frame.extend_from_slice(&(pcm.len() as u32).to_be_bytes());
    frame.extend_from_slice(pcm);
    frame
}

/// End-of-stream frame: a zero length and no payload.
pub fn encode_end_frame() -> [u8; 4] {
    [0, 0, 0, 0]
}

/// Wrap bytes in one HTTP chunked-transfer chunk.
pub fn encode_http_chunk(data: &[u8]) -> Vec<u8> {
    let mut chunk = format!("{:x}\r\n", data.len()).into_bytes();
    chunk.extend_from_slice(data);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// Request head for the streaming POST.
pub fn request_head(host: &str, port: u16, path: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         Content-Type: application/octet-stream\r\n\
         Transfer-Encoding: chunked\r\n\
         Connection: close\r\n\r\n"
    )
}

/// Incremental parser for the local backend's response stream.
///
/// Feed it whatever each read returns; it skips the HTTP header block up to
/// the blank line, splits the body into lines, and yields one event per
/// complete `data: {json}` line. An incomplete trailing line is carried over
/// to the next read. Lines without the `data: ` prefix (including the hex
/// size lines of a chunked response body) are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    headers_done: bool,
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes, returning every event it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        if !self.headers_done {
            match find_subsequence(&self.buffer, b"\r\n\r\n") {
                Some(pos) => {
                    self.buffer.drain(..pos + 4);
                    self.headers_done = true;
                }
                None => return events,
            }
        }

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }

        events
    }
}

fn parse_line(line: &[u8]) -> Option<StreamEvent> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.trim_end_matches('\n').trim_end_matches('\r');
    let json = line.strip_prefix("data: ")?;
    match serde_json::from_str(json) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Dropping unparseable stream event: {}", e);
            None
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
