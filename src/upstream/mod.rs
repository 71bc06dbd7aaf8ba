//! Access to the OpenAI-compatible backend provider.
//!
//! - `client`: request forwarding, status classification and timeouts
//! - `streaming`: SSE relay with keep-alive pings

pub mod client;
pub mod streaming;

pub use client::UpstreamClient;
pub use streaming::relay_chat_stream;
