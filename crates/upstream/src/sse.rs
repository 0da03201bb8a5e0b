//! Line-oriented parser over the upstream byte stream. Kept
//! hand-rolled rather than pulled from a generic SSE crate because of the
//! specific tolerance rules here: invalid JSON payloads are skipped rather
//! than surfaced, and an oversized line is dropped rather than buffered
//! without bound.

use protocol::responses::Event;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

const LINE_CAP: usize = 1024 * 1024;

pub struct SseReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> SseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Reads the next logical event. `Ok(None)` means the stream ended,
    /// either via the `data: [DONE]` sentinel or upstream EOF.
    pub async fn next_event(&mut self) -> std::io::Result<Option<Event>> {
        loop {
            let (data_lines, eof) = self.read_event_lines().await?;

            if data_lines.is_empty() {
                if eof {
                    return Ok(None);
                }
                continue;
            }

            let payload = data_lines.join("\n");
            if payload == "[DONE]" {
                return Ok(None);
            }

            match sonic_rs::from_str::<Event>(&payload) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => {
                    log::warn!("skipping unparsable upstream SSE event: {err}");
                    if eof {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn read_event_lines(&mut self) -> std::io::Result<(Vec<String>, bool)> {
        let mut data_lines = Vec::new();

        loop {
            match self.read_line_capped().await? {
                Some(line) if line.is_empty() => return Ok((data_lines, false)),
                Some(line) => {
                    if let Some(data) = line.strip_prefix("data:") {
                        data_lines.push(data.trim_start().to_string());
                    }
                    // other SSE fields (event:, id:, retry:, : comments) are
                    // not meaningful to this protocol and are ignored.
                }
                None => return Ok((data_lines, true)),
            }
        }
    }

    async fn read_line_capped(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;

        if n == 0 {
            return Ok(None);
        }

        if line.len() > LINE_CAP {
            log::warn!("dropping oversized SSE line ({} bytes)", line.len());
            return Ok(Some(String::new()));
        }

        while line.ends_with(['\n', '\r']) {
            line.pop();
        }

        Ok(Some(line))
    }
}
