//! Session lifecycle controller
//!
//! `InterviewSession` acquires everything a live interview needs (credential,
//! microphone, speaker, realtime connection, turn queue) and hands it to a
//! single task that owns all session state. That task runs one `select!` loop:
//!
//! 1. transport events (highest priority, so "AI started speaking" always lands
//!    before the next captured frame is considered)
//! 2. user commands (end, mute)
//! 3. the gate cooldown timer
//! 4. captured microphone frames
//!
//! Observers follow along through a watch channel of [`SessionSnapshot`] and a
//! broadcast channel of transcript updates.

use crate::audio::{AudioDevices, AudioFormat, AudioFrame, AudioPlayback, CaptureHandle};
use crate::backend::{SessionApi, TurnStore};
use crate::config::InterviewConfig;
use crate::error::{InterviewError, Result};
use crate::gate::HalfDuplexGate;
use crate::interpreter::{Action, EventInterpreter};
use crate::persistence::{DrainReport, TurnQueue};
use crate::playback::PlaybackQueue;
use crate::protocol::{ClientEvent, ServerEvent, SessionConfig};
use crate::transport::{Connector, RealtimeTransport, TransportEvent};
use crate::turn::{TranscriptUpdate, Turn};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

const TRANSCRIPT_CHANNEL: usize = 128;

/// Log a suppressed-frame summary every this many frames
const SUPPRESSED_LOG_EVERY: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Connecting,
    Connected,
    Error,
    Ended,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Error | SessionStatus::Ended)
    }
}

/// Observable session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub ai_speaking: bool,
    /// Participant muted the microphone
    pub muted: bool,
    /// Half-duplex gate is holding the microphone closed
    pub suppressed: bool,
    pub error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Initializing,
            ai_speaking: false,
            muted: false,
            suppressed: false,
            error: None,
        }
    }
}

/// Final report once the session task has exited
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    /// Every turn emitted, in order
    pub transcript: Vec<Turn>,
    pub turns: DrainReport,
    pub frames_sent: u64,
    pub frames_suppressed: u64,
    pub error: Option<String>,
}

enum Command {
    End(oneshot::Sender<()>),
    SetMuted(bool),
    ToggleMute,
}

pub struct InterviewSession {
    config: InterviewConfig,
    api: Arc<dyn SessionApi>,
    store: Arc<dyn TurnStore>,
    connector: Arc<dyn Connector>,
    devices: Arc<dyn AudioDevices>,
    status_tx: Arc<watch::Sender<SessionSnapshot>>,
    transcript_tx: broadcast::Sender<TranscriptUpdate>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    runner: Option<JoinHandle<SessionOutcome>>,
}

impl InterviewSession {
    pub fn new(
        config: InterviewConfig,
        api: Arc<dyn SessionApi>,
        store: Arc<dyn TurnStore>,
        connector: Arc<dyn Connector>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionSnapshot::default());
        let (transcript_tx, _) = broadcast::channel(TRANSCRIPT_CHANNEL);
        Self {
            config,
            api,
            store,
            connector,
            devices,
            status_tx: Arc::new(status_tx),
            transcript_tx,
            commands: None,
            runner: None,
        }
    }

    pub fn status(&self) -> SessionSnapshot {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_transcript(&self) -> broadcast::Receiver<TranscriptUpdate> {
        self.transcript_tx.subscribe()
    }

    /// Connect the interview. On failure everything acquired so far is released
    /// and the session moves to `Error`.
    pub async fn start(&mut self, session_id: &str) -> Result<()> {
        if self.status_tx.borrow().status != SessionStatus::Initializing {
            return Err(InterviewError::SessionNotStartable(
                "this session has already been started".to_string(),
            ));
        }

        info!("🚀 Starting interview session {}", session_id);
        self.status_tx.send_modify(|s| s.status = SessionStatus::Connecting);

        let mut runner = match self.connect(session_id).await {
            Ok(runner) => runner,
            Err(e) => {
                error!("❌ Session {} failed to start: {}", session_id, e);
                self.status_tx.send_modify(|s| {
                    s.status = SessionStatus::Error;
                    s.error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        runner.commands = Some(cmd_rx);
        runner.muted = self.status_tx.borrow().muted;
        self.commands = Some(cmd_tx);

        self.status_tx.send_modify(|s| {
            s.status = SessionStatus::Connected;
            s.error = None;
        });
        info!("✅ Interview session {} connected", session_id);

        self.runner = Some(tokio::spawn(runner.run()));
        Ok(())
    }

    async fn connect(&self, session_id: &str) -> Result<SessionRunner> {
        let grant = self
            .api
            .start_session(session_id)
            .await
            .map_err(|e| match e {
                InterviewError::SessionNotStartable(_) | InterviewError::Credential(_) => e,
                other => InterviewError::Credential(other.to_string()),
            })?;

        if grant.credential.is_expired(Utc::now()) {
            return Err(InterviewError::Credential(
                "credential missing or expired".to_string(),
            ));
        }

        let mut capture = self.open_capture().await?;
        let mut playback = match self.open_playback().await {
            Ok(playback) => playback,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        let mut transport = RealtimeTransport::new(self.connector.clone());
        let events = match transport.open(grant.credential).await {
            Ok(events) => events,
            Err(e) => {
                capture.stop();
                playback.stop();
                return Err(match e {
                    InterviewError::Credential(_) | InterviewError::Connection(_) => e,
                    other => InterviewError::Connection(other.to_string()),
                });
            }
        };

        let setup = ClientEvent::SessionUpdate {
            session: SessionConfig::from_config(&self.config, grant.instructions),
        };
        if let Err(e) = transport.send(&setup).await {
            transport.close().await;
            capture.stop();
            playback.stop();
            return Err(InterviewError::Connection(format!(
                "failed to configure session: {}",
                e
            )));
        }

        Ok(SessionRunner {
            session_id: session_id.to_string(),
            api: self.api.clone(),
            flush_timeout: self.config.flush_timeout,
            transport,
            events,
            commands: None,
            capture: Some(capture),
            playback: Some(playback),
            queue: TurnQueue::spawn(session_id, self.store.clone()),
            gate: HalfDuplexGate::new(self.config.cooldown),
            playback_queue: PlaybackQueue::new(self.config.sample_rate),
            interpreter: EventInterpreter::new(),
            started_at: Instant::now(),
            muted: false,
            status_tx: self.status_tx.clone(),
            transcript_tx: self.transcript_tx.clone(),
            transcript: Vec::new(),
            frames_suppressed: 0,
        })
    }

    fn format(&self, device: Option<String>) -> AudioFormat {
        AudioFormat {
            sample_rate: self.config.sample_rate,
            channels: 1,
            frame_samples: self.config.frame_samples,
            app_name: self.config.app_name.clone(),
            device,
        }
    }

    async fn open_capture(&self) -> Result<CaptureHandle> {
        let devices = self.devices.clone();
        let format = self.format(self.config.input_device.clone());
        tokio::task::spawn_blocking(move || devices.open_capture(&format))
            .await
            .map_err(|e| InterviewError::Device(format!("capture open panicked: {}", e)))?
    }

    async fn open_playback(&self) -> Result<Box<dyn AudioPlayback>> {
        let devices = self.devices.clone();
        let format = self.format(self.config.output_device.clone());
        tokio::task::spawn_blocking(move || devices.open_playback(&format))
            .await
            .map_err(|e| InterviewError::Device(format!("playback open panicked: {}", e)))?
    }

    /// End the interview: flush turns, mark it completed, tear down.
    ///
    /// Returns once the session has ended. Does nothing if it already has.
    pub async fn end_interview(&self) {
        let Some(commands) = &self.commands else {
            if self.status_tx.borrow().status == SessionStatus::Initializing {
                self.status_tx.send_modify(|s| s.status = SessionStatus::Ended);
            }
            return;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if commands.send(Command::End(reply_tx)).is_err() {
            debug!("end_interview: session already torn down");
            return;
        }
        let _ = reply_rx.await;
    }

    pub fn set_muted(&self, muted: bool) {
        match &self.commands {
            Some(commands) => {
                let _ = commands.send(Command::SetMuted(muted));
            }
            None => self.status_tx.send_modify(|s| s.muted = muted),
        }
    }

    pub fn toggle_mute(&self) {
        match &self.commands {
            Some(commands) => {
                let _ = commands.send(Command::ToggleMute);
            }
            None => self.status_tx.send_modify(|s| s.muted = !s.muted),
        }
    }

    /// Wait for the session task to exit. `None` if it never started.
    pub async fn wait(&mut self) -> Option<SessionOutcome> {
        let runner = self.runner.take()?;
        match runner.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Session task failed: {}", e);
                None
            }
        }
    }
}

/// Why the session loop stopped
enum Exit {
    /// Participant ended the interview
    Completed(Option<oneshot::Sender<()>>),
    /// Connection went away without an error
    Dropped(String),
    Failed(String),
}

struct SessionRunner {
    session_id: String,
    api: Arc<dyn SessionApi>,
    flush_timeout: Duration,
    transport: RealtimeTransport,
    events: mpsc::Receiver<TransportEvent>,
    commands: Option<mpsc::UnboundedReceiver<Command>>,
    capture: Option<CaptureHandle>,
    playback: Option<Box<dyn AudioPlayback>>,
    queue: TurnQueue,
    gate: HalfDuplexGate,
    playback_queue: PlaybackQueue,
    interpreter: EventInterpreter,
    started_at: Instant,
    muted: bool,
    status_tx: Arc<watch::Sender<SessionSnapshot>>,
    transcript_tx: broadcast::Sender<TranscriptUpdate>,
    transcript: Vec<Turn>,
    frames_suppressed: u64,
}

async fn next_frame(capture: &mut Option<CaptureHandle>) -> Option<AudioFrame> {
    match capture {
        Some(capture) => capture.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_command(commands: &mut Option<mpsc::UnboundedReceiver<Command>>) -> Option<Command> {
    match commands {
        Some(commands) => commands.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionRunner {
    async fn run(mut self) -> SessionOutcome {
        debug!("Session loop started for {}", self.session_id);
        self.publish();

        let exit = loop {
            let cooldown = self.gate.deadline();

            tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(TransportEvent::Server(event)) => {
                        if let Some(exit) = self.handle_server_event(event) {
                            break exit;
                        }
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        break Exit::Dropped(reason.unwrap_or_else(|| "connection closed".to_string()));
                    }
                    Some(TransportEvent::Failed(e)) => {
                        break Exit::Failed(format!("connection lost: {}", e));
                    }
                    None => break Exit::Dropped("event stream ended".to_string()),
                },

                command = next_command(&mut self.commands) => match command {
                    Some(Command::End(reply)) => break Exit::Completed(Some(reply)),
                    Some(Command::SetMuted(muted)) => self.set_muted(muted),
                    Some(Command::ToggleMute) => self.set_muted(!self.muted),
                    None => break Exit::Dropped("session handle dropped".to_string()),
                },

                _ = sleep_until(cooldown.unwrap_or_else(Instant::now)), if cooldown.is_some() => {
                    if self.gate.poll(Instant::now()) {
                        self.publish();
                    }
                }

                frame = next_frame(&mut self.capture) => match frame {
                    Some(frame) => match self.handle_frame(frame).await {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => break Exit::Failed(e.to_string()),
                        Err(e) => warn!("Dropped microphone frame: {}", e),
                    },
                    None => break Exit::Failed("microphone disconnected".to_string()),
                },
            }
        };

        self.finish(exit).await
    }

    fn handle_server_event(&mut self, event: ServerEvent) -> Option<Exit> {
        let now = Instant::now();
        let offset = now.saturating_duration_since(self.started_at);

        for action in self.interpreter.apply(event, offset) {
            match action {
                Action::AiSpeaking => {
                    let was_speaking = self.gate.ai_speaking();
                    self.gate.on_ai_speaking(now);
                    if !was_speaking {
                        info!("🤖 AI speaking");
                        self.publish();
                    }
                }
                Action::PlayAudio(samples) => {
                    let buffer = self.playback_queue.schedule(samples, now);
                    if let Some(playback) = self.playback.as_mut() {
                        if let Err(e) = playback.play(buffer) {
                            return Some(Exit::Failed(e.to_string()));
                        }
                    }
                }
                Action::AiAudioFinished => {
                    // Scheduled end plus what the device still holds
                    let output_latency = self
                        .playback
                        .as_ref()
                        .map(|p| p.latency())
                        .unwrap_or_default();
                    let playback_end = self.playback_queue.busy_until(now) + output_latency;
                    self.gate.on_ai_audio_finished(playback_end, now);
                    self.publish();
                }
                Action::AiTranscriptPartial(text) => {
                    let _ = self.transcript_tx.send(TranscriptUpdate::Partial { text });
                }
                Action::TurnCompleted(turn) => {
                    info!("📝 [{}] {}: {}", turn.sequence_index, turn.speaker.label(), turn.text);
                    self.transcript.push(turn.clone());
                    let _ = self
                        .transcript_tx
                        .send(TranscriptUpdate::Completed(turn.clone()));
                    self.queue.enqueue(turn);
                }
                Action::Fatal(message) => return Some(Exit::Failed(message)),
            }
        }
        None
    }

    async fn handle_frame(&mut self, frame: AudioFrame) -> Result<()> {
        let now = Instant::now();
        if self.gate.poll(now) {
            self.publish();
        }

        if self.gate.permits(now, self.muted) {
            self.transport.send_audio_frame(&frame.samples).await
        } else {
            self.frames_suppressed += 1;
            if self.frames_suppressed % SUPPRESSED_LOG_EVERY == 1 {
                debug!(
                    "🔇 Holding microphone ({} frames suppressed so far)",
                    self.frames_suppressed
                );
            }
            Ok(())
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            self.muted = muted;
            info!("{}", if muted { "🔇 Microphone muted" } else { "🎤 Microphone unmuted" });
            self.publish();
        }
    }

    fn publish(&self) {
        let now = Instant::now();
        let ai_speaking = self.gate.ai_speaking();
        let suppressed = self.gate.is_suppressed(now);
        let muted = self.muted;
        self.status_tx.send_if_modified(|s| {
            let changed =
                s.ai_speaking != ai_speaking || s.suppressed != suppressed || s.muted != muted;
            s.ai_speaking = ai_speaking;
            s.suppressed = suppressed;
            s.muted = muted;
            changed
        });
    }

    async fn finish(mut self, exit: Exit) -> SessionOutcome {
        // Stop listening before anything else
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }

        let (status, error, reply, turns) = match exit {
            Exit::Completed(reply) => {
                info!("🛑 Ending interview {}", self.session_id);
                let turns = self.queue.finish(self.flush_timeout).await;
                match self.api.complete_session(&self.session_id).await {
                    Ok(done) => info!(
                        "✅ Session {} marked {} ({}ms)",
                        done.id,
                        done.status,
                        done.duration_ms.unwrap_or_default()
                    ),
                    Err(e) => warn!("Could not mark session complete: {}", e),
                }
                (SessionStatus::Ended, None, reply, turns)
            }
            Exit::Dropped(reason) => {
                warn!("🔌 Session {} ended without completion: {}", self.session_id, reason);
                let turns = self.queue.finish(self.flush_timeout).await;
                (SessionStatus::Ended, None, None, turns)
            }
            Exit::Failed(message) => {
                error!("❌ Session {} failed: {}", self.session_id, message);
                let turns = self.queue.abort();
                (SessionStatus::Error, Some(message), None, turns)
            }
        };

        self.teardown().await;

        self.status_tx.send_modify(|s| {
            s.status = status;
            s.ai_speaking = false;
            s.suppressed = false;
            s.error = error.clone();
        });

        if let Some(reply) = reply {
            let _ = reply.send(());
        }

        SessionOutcome {
            session_id: self.session_id,
            status,
            transcript: self.transcript,
            turns,
            frames_sent: self.transport.frames_sent(),
            frames_suppressed: self.frames_suppressed,
            error,
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        self.playback_queue.clear();
        self.transport.close().await;
        if let Some(commands) = self.commands.as_mut() {
            commands.close();
        }
        debug!("Session {} resources released", self.session_id);
    }
}
