//! The line-delimited JSON protocol: envelope, request parsing, engine.

pub mod engine;
pub mod envelope;
pub mod request;

pub use engine::Engine;
pub use envelope::{sanitize_error_text, Envelope, Metrics};
pub use request::{parse_request, McpRequest, Method, ParseError, MAX_LINE_BYTES};
