use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of one session's activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Utterance identifier
    pub session_id: String,

    /// Backend name ("cloud" or "local")
    pub backend: String,

    /// When the session started; None before `start()`
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since start
    pub duration_secs: f64,

    /// Whether the session may still produce notifications
    pub is_active: bool,

    /// Audio frames written to the transport
    pub frames_sent: usize,

    /// PCM bytes submitted to the transport
    pub bytes_sent: usize,

    /// Result messages decoded from the transport
    pub results_received: usize,
}

/// Counters shared between a session handle and its driver task
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    frames_sent: AtomicUsize,
    bytes_sent: AtomicUsize,
    results_received: AtomicUsize,
}

impl SessionCounters {
    pub(crate) fn record_frame(&self, pcm_bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(pcm_bytes, Ordering::SeqCst);
    }

    pub(crate) fn record_result(&self) {
        self.results_received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(
        &self,
        session_id: &str,
        backend: &str,
        started_at: Option<DateTime<Utc>>,
        is_active: bool,
    ) -> SessionStats {
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            session_id: session_id.to_string(),
            backend: backend.to_string(),
            started_at,
            duration_secs,
            is_active,
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            bytes_sent: self.bytes_sent.load(Ordering::SeqCst),
            results_received: self.results_received.load(Ordering::SeqCst),
        }
    }
}
