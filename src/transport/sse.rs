use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::time::Duration;

use crate::transport::{LineStream, StreamRequest, StreamTransport, TransportContext, TransportError};

/// Incremental server-sent-event decoder.
///
/// Chunk boundaries are arbitrary, so partial lines stay buffered until the
/// terminating newline arrives. `data:` values of one event are joined with
/// `\n`; comment lines and fields other than `data` are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the payload of every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if line.is_empty() {
                if !self.data.is_empty() {
                    out.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // comments (`:`) and other fields (event/id/retry) are ignored
        }
        out
    }
}

/// reqwest-backed SSE subscription with explicit connect retries.
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(ctx: &TransportContext) -> Self {
        // No total request timeout: the stream stays open for the whole
        // download. Only the connect phase is bounded.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(ctx.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("reqwest client");
        Self { client }
    }

    fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
    }

    fn into_line_stream(resp: reqwest::Response) -> LineStream {
        let chunks = resp.bytes_stream().boxed();
        let state = (chunks, SseDecoder::new(), VecDeque::new(), false);
        futures::stream::unfold(state, |(mut chunks, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((Ok(line), (chunks, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match chunks.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        done = true;
                        return Some((Err(TransportError::Read(e)), (chunks, decoder, pending, done)));
                    }
                    None => done = true,
                }
            }
        })
        .boxed()
    }
}

#[async_trait::async_trait]
impl StreamTransport for SseTransport {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn open(
        &self,
        request: &StreamRequest,
        ctx: &TransportContext,
    ) -> Result<LineStream, TransportError> {
        let mut last_err: Option<TransportError> = None;
        for attempt in 0..=ctx.retries {
            if attempt > 0 {
                ctx.sleep_backoff(attempt - 1).await;
            }
            tracing::debug!(url = %request.url(), attempt, "opening event stream");

            let resp = match self
                .client
                .get(request.url().clone())
                .header(USER_AGENT, &ctx.user_agent)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(TransportError::Connect(e));
                    continue;
                }
            };

            let status = resp.status();
            if status.is_success() {
                return Ok(Self::into_line_stream(resp));
            }
            if Self::should_retry_status(status) {
                last_err = Some(TransportError::Status(status));
                continue;
            }
            return Err(TransportError::Status(status));
        }

        Err(last_err.unwrap_or(TransportError::Status(StatusCode::REQUEST_TIMEOUT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event_per_chunk() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data:hello\n\n"), vec!["hello".to_string()]);
    }

    #[test]
    fn payload_split_across_chunks() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data:[download]  12").is_empty());
        assert!(d.push(b".5% of 10MiB\n").is_empty());
        assert_eq!(d.push(b"\n"), vec!["[download]  12.5% of 10MiB".to_string()]);
    }

    #[test]
    fn several_events_in_one_chunk() {
        let mut d = SseDecoder::new();
        let out = d.push(b"data:a\n\ndata:b\n\ndata:__DONE__\n\n");
        assert_eq!(out, vec!["a".to_string(), "b".to_string(), "__DONE__".to_string()]);
    }

    #[test]
    fn multi_data_lines_join_with_newline() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data:one\ndata:two\n\n"), vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn leading_space_after_colon_stripped_once() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data:  padded\n\n"), vec![" padded".to_string()]);
    }

    #[test]
    fn comments_and_other_fields_ignored() {
        let mut d = SseDecoder::new();
        let out = d.push(b": keepalive\nevent: message\nid: 7\ndata:line\n\n");
        assert_eq!(out, vec!["line".to_string()]);
    }

    #[test]
    fn crlf_line_endings() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data:x\r\n\r\n"), vec!["x".to_string()]);
    }

    #[test]
    fn blank_lines_without_data_emit_nothing() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"\n\n: ping\n\n").is_empty());
    }
}
