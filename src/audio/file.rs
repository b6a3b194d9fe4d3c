use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;
use tracing::info;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Samples as little-endian 16-bit PCM, the wire format both backends eat.
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Split the PCM bytes into feed-sized chunks of roughly `chunk_ms`
    /// milliseconds each. The last chunk may be shorter.
    pub fn pcm_chunks(&self, chunk_ms: u32) -> Vec<Vec<u8>> {
        let samples_per_chunk =
            (self.sample_rate as usize * self.channels as usize * chunk_ms as usize) / 1000;
        let bytes_per_chunk = (samples_per_chunk * 2).max(2);

        self.to_pcm_bytes()
            .chunks(bytes_per_chunk)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}
