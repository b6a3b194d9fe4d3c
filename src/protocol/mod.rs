//! Wire protocol codecs
//!
//! Two transports feed the same session layer:
//! - `binary`: the cloud recognizer's fixed-header frame format with
//!   message-type/flag/serialization/compression bit-fields and big-endian
//!   length prefixes
//! - `sse`: the local recognizer's length-prefixed audio frames, HTTP
//!   chunked-transfer framing, and `data: {json}` response stream
//!
//! `gzip` wraps config and audio payloads in the envelope both sides expect;
//! `messages` holds the serde bodies carried by both protocols.

pub mod binary;
pub mod gzip;
pub mod messages;
pub mod sse;

pub use binary::{ClientFrame, ErrorFrame, FrameError, MessageType, ResultFrame, ServerMessage};
pub use messages::{
    AudioFormat, ConfigMessage, RequestOptions, ResultMessage, StreamEvent, StreamResult,
    Utterance,
};
pub use sse::SseParser;
