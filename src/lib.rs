pub mod audio;
pub mod config;
pub mod protocol;
pub mod session;

pub use audio::AudioFile;
pub use config::Config;
pub use session::{
    BackendKind, CloudSession, CloudSessionConfig, LocalSession, LocalSessionConfig, SessionEvent,
    SessionFactory, SessionState, SessionStats, SpeechSession, TranscriptAccumulator,
};
