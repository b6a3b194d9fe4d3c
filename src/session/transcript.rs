use crate::protocol::messages::ResultMessage;

/// Merges provisional hypotheses and settled segments into one growing
/// transcript.
///
/// The confirmed prefix never shrinks within a session. Merge methods return
/// the text to surface to the caller, or `None` when it would repeat the
/// previous emission.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    confirmed: String,
    last_emitted: Option<String>,
    current: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one cloud result. Settled segments append to the confirmed
    /// text (in arrival order) and supersede the provisional tail; without
    /// any settled segment the provisional hypothesis rides on top of the
    /// confirmed prefix. The dropped tail reappears in the next decode
    /// cycle, so text never rewinds past a confirmed boundary.
    pub fn merge_result(&mut self, result: &ResultMessage) -> Option<String> {
        let mut any_definite = false;
        for utterance in &result.utterances {
            if utterance.definite {
                self.confirmed.push_str(&utterance.text);
                any_definite = true;
            }
        }

        let text = if any_definite {
            self.confirmed.clone()
        } else {
            format!("{}{}", self.confirmed, result.text)
        };

        self.update(text)
    }

    /// Fold in one full-hypothesis update from the local backend, which
    /// always reports the best current text for the whole utterance.
    pub fn merge_hypothesis(&mut self, text: &str) -> Option<String> {
        self.update(text.to_string())
    }

    /// Settled prefix of the transcript.
    pub fn confirmed(&self) -> &str {
        &self.confirmed
    }

    /// Best full text seen so far, for the terminal notification.
    pub fn final_text(&self) -> String {
        self.current.clone()
    }

    fn update(&mut self, text: String) -> Option<String> {
        self.current = text.clone();
        if self.last_emitted.as_deref() == Some(text.as_str()) {
            return None;
        }
        self.last_emitted = Some(text.clone());
        Some(text)
    }
}
