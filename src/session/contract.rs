use std::collections::VecDeque;

use anyhow::Result;
use tokio::sync::mpsc;

use super::config::{CloudSessionConfig, LocalSessionConfig};
use super::stats::SessionStats;

/// Notification delivered to the session owner.
///
/// Zero or more `Partial`s, then exactly one `Final` or `Error` unless the
/// session is cancelled first. Text is always the full accumulated
/// hypothesis, never a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// In-progress hypothesis update
    Partial { text: String },
    /// Terminal result for the utterance
    Final { text: String },
    /// Terminal failure, transport-level or server-reported
    Error { message: String },
}

/// Lifecycle states of one recognition session. `Finalized` and `Failed`
/// are terminal; the driver winds down after reaching either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Ending,
    AwaitingFinal,
    Finalized,
    Failed,
}

/// Commands posted from the session handle to its driver task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Audio(Vec<u8>),
    Finish,
    Cancel,
}

/// Audio buffered between `start()` and transport readiness.
///
/// Chunks drain in FIFO order exactly once, the end sentinel last.
#[derive(Debug, Default)]
pub(crate) struct PendingAudio {
    chunks: VecDeque<Vec<u8>>,
    end_queued: bool,
}

impl PendingAudio {
    pub(crate) fn push_chunk(&mut self, chunk: Vec<u8>) {
        self.chunks.push_back(chunk);
    }

    pub(crate) fn queue_end(&mut self) {
        self.end_queued = true;
    }

    pub(crate) fn end_queued(&self) -> bool {
        self.end_queued
    }

    pub(crate) fn take(&mut self) -> (VecDeque<Vec<u8>>, bool) {
        let chunks = std::mem::take(&mut self.chunks);
        let end_queued = self.end_queued;
        self.end_queued = false;
        (chunks, end_queued)
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
        self.end_queued = false;
    }
}

/// Streaming recognition session contract.
///
/// Both backends share one lifecycle: `start()` opens the transport and
/// returns the notification channel; `feed()` submits PCM chunks; `end()`
/// signals that no more audio will arrive; `cancel()` abandons the utterance
/// without further notifications. Sessions are single-use; create a new one
/// per utterance.
#[async_trait::async_trait]
pub trait SpeechSession: Send {
    /// Open the transport and return the notification channel.
    ///
    /// Valid once, from idle; later calls fail without disturbing the
    /// running session.
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<SessionEvent>>;

    /// Submit one PCM16 chunk. Empty chunks and calls outside an active
    /// session are ignored.
    fn feed(&mut self, chunk: Vec<u8>);

    /// Signal end of audio. Later calls are no-ops.
    fn end(&mut self);

    /// Abandon the session. No notifications are delivered afterwards.
    fn cancel(&mut self);

    /// Whether the session may still produce notifications.
    fn is_active(&self) -> bool;

    /// Snapshot of the session's counters.
    fn stats(&self) -> SessionStats;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Backend selection, carrying the per-backend configuration.
#[derive(Debug, Clone)]
pub enum BackendKind {
    /// Cloud recognizer speaking the binary frame protocol
    Cloud(CloudSessionConfig),
    /// Local recognizer speaking chunked HTTP with an SSE response
    Local(LocalSessionConfig),
}

/// Session factory
pub struct SessionFactory;

impl SessionFactory {
    /// Create a session for the chosen backend.
    pub fn create(kind: BackendKind) -> Box<dyn SpeechSession> {
        match kind {
            BackendKind::Cloud(config) => Box::new(super::cloud::CloudSession::new(config)),
            BackendKind::Local(config) => Box::new(super::local::LocalSession::new(config)),
        }
    }
}
