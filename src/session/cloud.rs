use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::protocol::binary::{self, flags, Compression, MessageType, Serialization, ServerMessage};
use crate::protocol::gzip;
use crate::protocol::messages::{AudioFormat, ConfigMessage, RequestOptions, ResultMessage};

use super::config::CloudSessionConfig;
use super::contract::{PendingAudio, SessionCommand, SessionEvent, SessionState, SpeechSession};
use super::stats::{SessionCounters, SessionStats};
use super::transcript::TranscriptAccumulator;

/// Streaming session against the cloud recognizer's binary frame protocol.
///
/// The handle posts commands to a spawned driver task that exclusively owns
/// the connection, the state, and the pending-audio queue; notifications
/// come back on the channel returned by `start()`.
pub struct CloudSession {
    config: CloudSessionConfig,
    cmd_tx: Option<mpsc::UnboundedSender<SessionCommand>>,
    active: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    started_at: Option<DateTime<Utc>>,
    ended: bool,
    cancelled: bool,
}

impl CloudSession {
    pub fn new(config: CloudSessionConfig) -> Self {
        Self {
            config,
            cmd_tx: None,
            active: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SessionCounters::default()),
            started_at: None,
            ended: false,
            cancelled: false,
        }
    }
}

#[async_trait::async_trait]
impl SpeechSession for CloudSession {
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        if self.cancelled {
            anyhow::bail!("session was cancelled");
        }
        if self.cmd_tx.is_some() {
            anyhow::bail!("session already started");
        }

        info!("Starting cloud session: {}", self.config.session_id);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        self.active.store(true, Ordering::SeqCst);
        self.started_at = Some(Utc::now());

        let driver = CloudDriver {
            config: self.config.clone(),
            cmd_rx,
            event_tx,
            active: Arc::clone(&self.active),
            counters: Arc::clone(&self.counters),
            state: SessionState::Idle,
            commands_open: true,
            pending: PendingAudio::default(),
            accumulator: TranscriptAccumulator::new(),
            read_buf: Vec::new(),
        };
        tokio::spawn(driver.run());

        self.cmd_tx = Some(cmd_tx);
        Ok(event_rx)
    }

    fn feed(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return; // the sentinel is end()'s business
        }
        if self.cancelled || self.ended {
            debug!("feed() after end/cancel ignored");
            return;
        }
        match &self.cmd_tx {
            Some(tx) if self.active.load(Ordering::SeqCst) => {
                if tx.send(SessionCommand::Audio(chunk)).is_err() {
                    debug!("Driver gone; audio chunk dropped");
                }
            }
            Some(_) => debug!("feed() after session finished ignored"),
            None => warn!("feed() before start() ignored"),
        }
    }

    fn end(&mut self) {
        if self.ended || self.cancelled {
            return;
        }
        match &self.cmd_tx {
            Some(tx) => {
                self.ended = true;
                if tx.send(SessionCommand::Finish).is_err() {
                    debug!("Driver gone; end() ignored");
                }
            }
            None => warn!("end() before start() ignored"),
        }
    }

    fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.active.store(false, Ordering::SeqCst);
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(SessionCommand::Cancel);
        }
        info!("Cloud session cancelled by caller: {}", self.config.session_id);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stats(&self) -> SessionStats {
        self.counters.snapshot(
            &self.config.session_id,
            self.name(),
            self.started_at,
            self.is_active(),
        )
    }

    fn name(&self) -> &str {
        "cloud"
    }
}

enum Exit {
    Final,
    Fail(String),
    Cancelled,
}

/// Driver task state. Owns the socket and every mutable piece of the
/// session; the handle only ever talks to it through the command channel.
struct CloudDriver {
    config: CloudSessionConfig,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    active: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    state: SessionState,
    commands_open: bool,
    pending: PendingAudio,
    accumulator: TranscriptAccumulator,
    read_buf: Vec<u8>,
}

impl CloudDriver {
    async fn run(mut self) {
        self.state = SessionState::Connecting;

        let mut stream = match self.connect().await {
            Ok(Some(stream)) => stream,
            Ok(None) => return self.finish_cancelled(),
            Err(e) => return self.fail(format!("{e:#}")),
        };

        info!(
            "Cloud transport connected: {}:{}",
            self.config.host, self.config.port
        );

        if let Err(e) = self.send_config(&mut stream).await {
            warn!("Failed to send config frame: {e:#}");
        }

        // Ready: flush everything buffered while connecting, exactly once.
        self.state = SessionState::Streaming;
        let (chunks, end_queued) = self.pending.take();
        for chunk in chunks {
            if let Err(e) = self.send_audio(&mut stream, &chunk).await {
                warn!("Failed to send buffered audio frame: {e:#}");
            }
        }
        if end_queued {
            self.send_end(&mut stream).await;
        }

        let mut read_chunk = [0u8; 4096];
        let exit = loop {
            tokio::select! {
                cmd = self.cmd_rx.recv(), if self.commands_open => match cmd {
                    Some(SessionCommand::Audio(chunk)) => {
                        if self.state != SessionState::Streaming {
                            debug!("Audio after end ignored");
                        } else if let Err(e) = self.send_audio(&mut stream, &chunk).await {
                            warn!("Failed to send audio frame: {e:#}");
                        }
                    }
                    Some(SessionCommand::Finish) => {
                        if self.state == SessionState::Streaming {
                            self.send_end(&mut stream).await;
                        }
                    }
                    Some(SessionCommand::Cancel) => break Exit::Cancelled,
                    None => self.commands_open = false,
                },
                read = stream.read(&mut read_chunk) => match read {
                    Ok(0) => break Exit::Final,
                    Ok(n) => {
                        self.read_buf.extend_from_slice(&read_chunk[..n]);
                        if let Some(exit) = self.process_read_buf() {
                            break exit;
                        }
                    }
                    Err(e) => break Exit::Fail(format!("Transport read failed: {e}")),
                },
            }
        };

        match exit {
            Exit::Final => self.finish_final(),
            Exit::Fail(message) => self.fail(message),
            Exit::Cancelled => self.finish_cancelled(),
        }
    }

    /// Connect while buffering caller audio. `Ok(None)` means the caller
    /// cancelled before the transport came up.
    async fn connect(&mut self) -> Result<Option<TcpStream>> {
        let connect = TcpStream::connect((self.config.host.clone(), self.config.port));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    let stream = result.with_context(|| {
                        format!(
                            "Failed to connect to {}:{}",
                            self.config.host, self.config.port
                        )
                    })?;
                    return Ok(Some(stream));
                }
                cmd = self.cmd_rx.recv(), if self.commands_open => match cmd {
                    Some(SessionCommand::Audio(chunk)) => {
                        if self.pending.end_queued() {
                            debug!("Audio after end ignored");
                        } else {
                            self.pending.push_chunk(chunk);
                        }
                    }
                    Some(SessionCommand::Finish) => self.pending.queue_end(),
                    Some(SessionCommand::Cancel) => return Ok(None),
                    None => self.commands_open = false,
                },
            }
        }
    }

    async fn send_config(&mut self, stream: &mut TcpStream) -> Result<()> {
        let message = ConfigMessage {
            request: RequestOptions {
                session_id: self.config.session_id.clone(),
                enable_interim_results: true,
                enable_punctuation: true,
                boost_words: self.config.boost_words.clone(),
            },
            audio: AudioFormat {
                format: "pcm".to_string(),
                rate: self.config.sample_rate,
                bits: 16,
                channels: self.config.channels,
            },
        };

        let json = serde_json::to_vec(&message).context("Failed to serialize config message")?;
        let body = gzip::compress(&json).context("Failed to compress config message")?;
        let frame = binary::encode_client_frame(
            MessageType::ClientConfig,
            0,
            Serialization::Json,
            Compression::Gzip,
            &body,
        );

        stream
            .write_all(&frame)
            .await
            .context("Failed to write config frame")?;
        debug!("Config frame sent ({} bytes)", frame.len());
        Ok(())
    }

    async fn send_audio(&mut self, stream: &mut TcpStream, pcm: &[u8]) -> Result<()> {
        let body = gzip::compress(pcm).context("Failed to compress audio chunk")?;
        let frame = binary::encode_client_frame(
            MessageType::ClientAudio,
            0,
            Serialization::Raw,
            Compression::Gzip,
            &body,
        );

        stream
            .write_all(&frame)
            .await
            .context("Failed to write audio frame")?;
        self.counters.record_frame(pcm.len());
        Ok(())
    }

    /// Send failures here are tolerated like any other outbound failure;
    /// only inbound close or error moves the session to a terminal state.
    async fn send_end(&mut self, stream: &mut TcpStream) {
        self.state = SessionState::Ending;
        let frame = binary::encode_client_frame(
            MessageType::ClientAudio,
            flags::IS_LAST,
            Serialization::Raw,
            Compression::None,
            &[],
        );
        if let Err(e) = stream.write_all(&frame).await {
            warn!("Failed to send end frame: {e}");
        }
        self.state = SessionState::AwaitingFinal;
        debug!("End-of-stream frame sent");
    }

    /// Drain every complete frame currently in the read buffer.
    fn process_read_buf(&mut self) -> Option<Exit> {
        loop {
            match binary::decode_server_frame(&self.read_buf) {
                Ok(Some((message, consumed))) => {
                    self.read_buf.drain(..consumed);
                    match message {
                        ServerMessage::Result(frame) => {
                            if let Some(exit) = self.handle_result(frame) {
                                return Some(exit);
                            }
                        }
                        ServerMessage::Error(error) => {
                            return Some(Exit::Fail(format!(
                                "Server error {}: {}",
                                error.code, error.message
                            )));
                        }
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some(Exit::Fail(format!("Malformed server frame: {e}"))),
            }
        }
    }

    fn handle_result(&mut self, frame: binary::ResultFrame) -> Option<Exit> {
        self.counters.record_result();
        let result = self.decode_result_payload(&frame);

        if frame.is_final() {
            // The final frame's own payload folds into the final text
            // without a separate partial emission.
            if let Some(result) = result {
                self.accumulator.merge_result(&result);
            }
            return Some(Exit::Final);
        }

        if let Some(result) = result {
            if let Some(update) = self.accumulator.merge_result(&result) {
                self.emit(SessionEvent::Partial { text: update });
            }
        }
        None
    }

    /// Unwrap a result frame's payload. Payload-level failures (unknown
    /// compression, bad gzip, bad JSON) drop this one message and keep the
    /// session listening.
    fn decode_result_payload(&self, frame: &binary::ResultFrame) -> Option<ResultMessage> {
        if frame.payload.is_empty() {
            return None;
        }

        let raw = match Compression::from_nibble(frame.compression) {
            Some(Compression::Gzip) => match gzip::decompress(&frame.payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Dropping result with bad gzip payload: {e:#}");
                    return None;
                }
            },
            Some(Compression::None) => frame.payload.clone(),
            None => {
                warn!(
                    "Dropping result with unknown compression 0b{:04b}",
                    frame.compression
                );
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Dropping unparseable result payload: {e}");
                None
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn finish_final(mut self) {
        let text = self.accumulator.final_text();
        info!(
            "Cloud session finalized: {} ({} chars)",
            self.config.session_id,
            text.len()
        );
        self.state = SessionState::Finalized;
        self.active.store(false, Ordering::SeqCst);
        self.emit(SessionEvent::Final { text });
    }

    fn fail(mut self, message: String) {
        error!("Cloud session failed: {} ({message})", self.config.session_id);
        self.state = SessionState::Failed;
        self.active.store(false, Ordering::SeqCst);
        self.emit(SessionEvent::Error { message });
    }

    fn finish_cancelled(mut self) {
        info!("Cloud session cancelled: {}", self.config.session_id);
        self.pending.clear();
        self.active.store(false, Ordering::SeqCst);
        // No event: cancellation suppresses all notifications.
    }
}
