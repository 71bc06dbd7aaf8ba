//! SSE relay for streamed chat completions.
//!
//! Upstream `data:` events are forwarded verbatim; the upstream `[DONE]`
//! sentinel is dropped and exactly one is emitted when the body ends.
//! Keep-alive comments are sent while the backend is idle.
//!
//! Each upstream `data:` line is re-framed as its own event, which assumes the
//! one-line-per-event framing OpenAI-style backends use. `event:`, `id:` and
//! comment lines are not forwarded, and a multi-line `data:` event becomes
//! several events.

use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures_util::Stream;
use tokio::time::interval;
use tracing::warn;

/// Keep-alive interval for SSE streams (prevents proxy/load balancer timeouts).
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSE keep-alive comment (ignored by clients but keeps connection alive).
const KEEP_ALIVE_COMMENT: &str = ": keep-alive\n\n";

const DONE_EVENT: &str = "data: [DONE]\n\n";

/// Payload of an SSE `data:` line, if it is one
fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Re-frame one upstream line; `None` for anything that is not a forwardable event
fn relay_line(line: &str) -> Option<Bytes> {
    let data = data_payload(line.trim_end_matches('\r'))?;
    if data.trim().is_empty() || data.trim() == "[DONE]" {
        return None;
    }
    Some(Bytes::from(format!("data: {data}\n\n")))
}

pub fn relay_chat_stream<S, E>(body: S) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    relay_with_keep_alive(body, KEEP_ALIVE_INTERVAL)
}

fn relay_with_keep_alive<S, E>(
    body: S,
    keep_alive_every: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    use futures_util::StreamExt;

    stream! {
        let mut body = std::pin::pin!(body);
        let mut buffer: Vec<u8> = Vec::new();
        let mut keep_alive = interval(keep_alive_every);
        keep_alive.reset(); // Don't fire immediately

        loop {
            tokio::select! {
                biased; // Prefer data over keep-alive when both ready

                chunk_opt = body.next() => {
                    let Some(chunk_result) = chunk_opt else {
                        break;
                    };

                    let chunk = match chunk_result {
                        Ok(c) => c,
                        Err(e) => {
                            warn!("Backend stream read failed: {e}");
                            yield Err(std::io::Error::other(e));
                            return;
                        }
                    };

                    buffer.extend_from_slice(&chunk);

                    // Split on raw bytes so multi-byte characters may straddle chunks
                    while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                        let line = match std::str::from_utf8(&line[..line.len() - 1]) {
                            Ok(line) => line,
                            Err(e) => {
                                warn!("Dropping non-UTF-8 line from backend stream: {e}");
                                continue;
                            }
                        };
                        if let Some(event) = relay_line(line) {
                            keep_alive.reset();
                            yield Ok(event);
                        }
                    }
                }

                _ = keep_alive.tick() => {
                    yield Ok(Bytes::from(KEEP_ALIVE_COMMENT));
                }
            }
        }

        // Flush a final line the backend did not terminate
        match std::str::from_utf8(&buffer) {
            Ok(line) => {
                if let Some(event) = relay_line(line) {
                    yield Ok(event);
                }
            }
            Err(e) => warn!("Dropping non-UTF-8 trailing line from backend stream: {e}"),
        }

        yield Ok(Bytes::from(DONE_EVENT));
    }
}
