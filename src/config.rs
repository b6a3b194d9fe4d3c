use anyhow::Result;
use serde::Deserialize;

use crate::session::{BackendKind, CloudSessionConfig, LocalSessionConfig};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub cloud: CloudConfig,
    pub local: LocalConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Which recognizer to stream to: "cloud" or "local"
    pub backend: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Milliseconds of audio per feed() call
    pub chunk_ms: u32,
}

#[derive(Debug, Deserialize)]
pub struct CloudConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub boost_words: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocalConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Resolve the configured backend into a session configuration.
    /// A fresh session id is minted on every call.
    pub fn backend_kind(&self) -> Result<BackendKind> {
        match self.service.backend.as_str() {
            "cloud" => Ok(BackendKind::Cloud(CloudSessionConfig {
                host: self.cloud.host.clone(),
                port: self.cloud.port,
                sample_rate: self.audio.sample_rate,
                channels: self.audio.channels,
                boost_words: self.cloud.boost_words.clone(),
                ..CloudSessionConfig::default()
            })),
            "local" => Ok(BackendKind::Local(LocalSessionConfig {
                host: self.local.host.clone(),
                port: self.local.port,
                path: self.local.path.clone(),
                ..LocalSessionConfig::default()
            })),
            other => anyhow::bail!("Unknown backend '{other}' (expected 'cloud' or 'local')"),
        }
    }
}
