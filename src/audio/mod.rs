pub mod file;

pub use file::AudioFile;
