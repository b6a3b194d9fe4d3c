use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::protocol::messages::StreamEvent;
use crate::protocol::sse::{self, SseParser};

use super::config::LocalSessionConfig;
use super::contract::{PendingAudio, SessionCommand, SessionEvent, SessionState, SpeechSession};
use super::stats::{SessionCounters, SessionStats};
use super::transcript::TranscriptAccumulator;

/// Streaming session against the local recognizer's chunked HTTP endpoint.
///
/// Audio goes out as length-prefixed frames inside HTTP chunks on a single
/// long-lived request; results come back as `data:` lines on the response
/// of that same request.
pub struct LocalSession {
    config: LocalSessionConfig,
    cmd_tx: Option<mpsc::UnboundedSender<SessionCommand>>,
    active: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    started_at: Option<DateTime<Utc>>,
    ended: bool,
    cancelled: bool,
}

impl LocalSession {
    pub fn new(config: LocalSessionConfig) -> Self {
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
impl SpeechSession for LocalSession {
    async fn start(&mut self) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        if self.cancelled {
            anyhow::bail!("session was cancelled");
        }
        if self.cmd_tx.is_some() {
            anyhow::bail!("session already started");
        }

        info!("Starting local session: {}", self.config.session_id);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        self.active.store(true, Ordering::SeqCst);
        self.started_at = Some(Utc::now());

        let driver = LocalDriver {
            config: self.config.clone(),
            cmd_rx,
            event_tx,
            active: Arc::clone(&self.active),
            counters: Arc::clone(&self.counters),
            state: SessionState::Idle,
            commands_open: true,
            pending: PendingAudio::default(),
            accumulator: TranscriptAccumulator::new(),
            parser: SseParser::new(),
        };
        tokio::spawn(driver.run());

        self.cmd_tx = Some(cmd_tx);
        Ok(event_rx)
    }

    fn feed(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
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
        info!("Local session cancelled by caller: {}", self.config.session_id);
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
        "local"
    }
}

enum Exit {
    Final,
    Fail(String),
    Cancelled,
}

struct LocalDriver {
    config: LocalSessionConfig,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    active: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    state: SessionState,
    commands_open: bool,
    pending: PendingAudio,
    accumulator: TranscriptAccumulator,
    parser: SseParser,
}

impl LocalDriver {
    async fn run(mut self) {
        self.state = SessionState::Connecting;

        let mut stream = match self.connect().await {
            Ok(Some(stream)) => stream,
            Ok(None) => return self.finish_cancelled(),
            Err(e) => return self.fail(format!("{e:#}")),
        };

        // The session counts as ready once the request head is on the wire;
        // the recognizer's "ready" status event is informational only.
        let head = sse::request_head(&self.config.host, self.config.port, &self.config.path);
        if let Err(e) = stream.write_all(head.as_bytes()).await {
            warn!("Failed to send request head: {e}");
        }
        info!(
            "Local transport connected: http://{}:{}{}",
            self.config.host, self.config.port, self.config.path
        );

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
                        let events = self.parser.push(&read_chunk[..n]);
                        if let Some(exit) = self.process_events(events) {
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

    async fn send_audio(&mut self, stream: &mut TcpStream, pcm: &[u8]) -> Result<()> {
        let chunk = sse::encode_http_chunk(&sse::encode_audio_frame(pcm));
        stream
            .write_all(&chunk)
            .await
            .context("Failed to write audio chunk")?;
        self.counters.record_frame(pcm.len());
        Ok(())
    }

    /// The zero-length audio frame and the last HTTP chunk go out together;
    /// failures are logged and the response stream decides the outcome.
    async fn send_end(&mut self, stream: &mut TcpStream) {
        self.state = SessionState::Ending;
        let mut tail = sse::encode_http_chunk(&sse::encode_end_frame());
        tail.extend_from_slice(sse::LAST_HTTP_CHUNK);
        if let Err(e) = stream.write_all(&tail).await {
            warn!("Failed to send end frame: {e}");
        }
        self.state = SessionState::AwaitingFinal;
        debug!("End-of-stream frame sent");
    }

    fn process_events(&mut self, events: Vec<StreamEvent>) -> Option<Exit> {
        for event in events {
            if let Some(status) = &event.status {
                debug!("Local recognizer status: {status}");
            }

            let transcript = event.transcript().map(str::to_string);
            if transcript.is_some() || event.done {
                self.counters.record_result();
            }

            if let Some(text) = &transcript {
                if event.done {
                    // Terminal event's text folds straight into the final.
                    self.accumulator.merge_hypothesis(text);
                } else if let Some(update) = self.accumulator.merge_hypothesis(text) {
                    self.emit(SessionEvent::Partial { text: update });
                }
            }

            if event.done {
                return Some(Exit::Final);
            }
        }
        None
    }

    fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn finish_final(mut self) {
        let text = self.accumulator.final_text();
        info!(
            "Local session finalized: {} ({} chars)",
            self.config.session_id,
            text.len()
        );
        self.state = SessionState::Finalized;
        self.active.store(false, Ordering::SeqCst);
        self.emit(SessionEvent::Final { text });
    }

    fn fail(mut self, message: String) {
        error!("Local session failed: {} ({message})", self.config.session_id);
        self.state = SessionState::Failed;
        self.active.store(false, Ordering::SeqCst);
        self.emit(SessionEvent::Error { message });
    }

    fn finish_cancelled(mut self) {
        info!("Local session cancelled: {}", self.config.session_id);
        self.pending.clear();
        self.active.store(false, Ordering::SeqCst);
        // No event: cancellation suppresses all notifications.
    }
}
