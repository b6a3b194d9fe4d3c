//! Streaming recognition session management
//!
//! This module provides the `SpeechSession` abstraction that manages:
//! - Transport setup against the cloud or local recognizer
//! - Audio buffering while the transport connects, then live streaming
//! - Incremental transcript accumulation from interim results
//! - Exactly-one-terminal-notification delivery per session
//! - Session statistics and state management

mod cloud;
mod config;
mod contract;
mod local;
mod stats;
mod transcript;

pub use cloud::CloudSession;
pub use config::{CloudSessionConfig, LocalSessionConfig};
pub use contract::{BackendKind, SessionEvent, SessionFactory, SessionState, SpeechSession};
pub use local::LocalSession;
pub use stats::SessionStats;
pub use transcript::TranscriptAccumulator;
