use serde::{Deserialize, Serialize};

/// Configuration frame body sent to the cloud recognizer on connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub request: RequestOptions,
    pub audio: AudioFormat,
}

/// Recognition options for one utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOptions {
    pub session_id: String,
    pub enable_interim_results: bool,
    pub enable_punctuation: bool,
    /// Words to bias recognition towards; omitted when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boost_words: Vec<String>,
}

/// Input audio description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    pub format: String, // "pcm"
    pub rate: u32,
    pub bits: u16,
    pub channels: u16,
}

/// Recognition result decoded from a cloud server result frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Current best full-utterance hypothesis
    #[serde(default)]
    pub text: String,
    /// Sentence-level segments, settled or still provisional
    #[serde(default)]
    pub utterances: Vec<Utterance>,
}

/// One sentence-level segment of a cloud result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    /// Settled segments will not be revised by later results
    #[serde(default)]
    pub definite: bool,
}

/// One `data:` event from the local recognizer's response stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub results: Option<Vec<StreamResult>>,
    /// Terminal marker; the stream closing counts as terminal too
    #[serde(default)]
    pub done: bool,
    /// Status-only events ("ready") carry no transcript
    #[serde(default)]
    pub status: Option<String>,
}

/// One hypothesis in a local stream event's `results` array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamResult {
    pub text: String,
}

impl StreamEvent {
    /// Transcript carried by this event: the `text` of the last `results`
    /// element when present, else the top-level `text` field.
    pub fn transcript(&self) -> Option<&str> {
        if let Some(results) = &self.results {
            if let Some(last) = results.last() {
                return Some(last.text.as_str());
            }
        }
        self.text.as_deref()
    }
}
