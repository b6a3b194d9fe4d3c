use serde::{Deserialize, Serialize};

/// Configuration for a cloud (binary protocol) session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSessionConfig {
    /// Unique utterance identifier, echoed in the config frame
    pub session_id: String,

    /// Recognizer host
    pub host: String,

    /// Recognizer port
    pub port: u16,

    /// Input sample rate in Hz (recognizers expect 16kHz)
    pub sample_rate: u32,

    /// Input channel count (1 = mono)
    pub channels: u16,

    /// Words to bias recognition towards; empty disables boosting
    pub boost_words: Vec<String>,
}

impl Default for CloudSessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("utt-{}", uuid::Uuid::new_v4()),
            host: "127.0.0.1".to_string(),
            port: 9100,
            sample_rate: 16000, // 16kHz mono PCM
            channels: 1,
            boost_words: Vec::new(),
        }
    }
}

/// Configuration for a local (chunked HTTP + SSE) session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSessionConfig {
    /// Unique utterance identifier (logging only; the wire carries no id)
    pub session_id: String,

    /// Recognizer host
    pub host: String,

    /// Recognizer port
    pub port: u16,

    /// Request path of the streaming endpoint
    pub path: String,
}

impl Default for LocalSessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("utt-{}", uuid::Uuid::new_v4()),
            host: "127.0.0.1".to_string(),
            port: 8090,
            path: "/stream".to_string(),
        }
    }
}
