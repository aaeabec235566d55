//! In-memory fakes for the session collaborators

use crate::audio::{AudioDevices, AudioFormat, AudioFrame, AudioPlayback, CaptureHandle};
use crate::backend::{
    CompletedSession, NewTurn, RemoteStatus, SessionApi, SessionGrant, StoredTurn, TurnStore,
};
use crate::credential::Credential;
use crate::error::{InterviewError, Result};
use crate::playback::ScheduledBuffer;
use crate::protocol::ClientEvent;
use crate::transport::{Connection, Connector, EventSink, TransportEvent};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared, ordered record of collaborator calls
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Option<CallLog>, entry: String) {
    if let Some(log) = log {
        log.lock().unwrap().push(entry);
    }
}

// ---------------------------------------------------------------------------
// Session API

enum StartBehavior {
    Grant,
    NotStartable(String),
    Fail(String),
    Expired,
}

pub struct FakeSessionApi {
    start: StartBehavior,
    fail_completion: bool,
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    log: Option<CallLog>,
}

impl FakeSessionApi {
    fn with_behavior(start: StartBehavior) -> Self {
        Self {
            start,
            fail_completion: false,
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            log: None,
        }
    }

    pub fn new() -> Self {
        Self::with_behavior(StartBehavior::Grant)
    }

    pub fn not_startable(message: &str) -> Self {
        Self::with_behavior(StartBehavior::NotStartable(message.to_string()))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_behavior(StartBehavior::Fail(message.to_string()))
    }

    pub fn expired() -> Self {
        Self::with_behavior(StartBehavior::Expired)
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn failing_completion(mut self) -> Self {
        self.fail_completion = true;
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionApi for FakeSessionApi {
    async fn start_session(&self, session_id: &str) -> Result<SessionGrant> {
        self.started.lock().unwrap().push(session_id.to_string());
        record(&self.log, format!("start:{}", session_id));

        let expires_at = match &self.start {
            StartBehavior::Grant => Utc::now() + chrono::Duration::seconds(60),
            StartBehavior::Expired => Utc::now() - chrono::Duration::seconds(5),
            StartBehavior::NotStartable(msg) => {
                return Err(InterviewError::SessionNotStartable(msg.clone()))
            }
            StartBehavior::Fail(msg) => return Err(InterviewError::Connection(msg.clone())),
        };

        Ok(SessionGrant {
            credential: Credential::new("ek_test", Some(expires_at)),
            instructions: Some("You are a friendly interviewer.".to_string()),
            realtime_session_id: Some("sess_fake".to_string()),
        })
    }

    async fn complete_session(&self, session_id: &str) -> Result<CompletedSession> {
        self.completed.lock().unwrap().push(session_id.to_string());
        record(&self.log, format!("complete:{}", session_id));

        if self.fail_completion {
            return Err(InterviewError::Completion("500: database unavailable".to_string()));
        }
        Ok(CompletedSession {
            id: session_id.to_string(),
            status: RemoteStatus::Completed,
            duration_ms: Some(1_000),
        })
    }
}

// ---------------------------------------------------------------------------
// Turn store

/// Records saved turns, with optional per-call latency and failures
pub struct RecordingStore {
    latencies: Vec<Duration>,
    fail_calls: Vec<usize>,
    saved: Mutex<Vec<NewTurn>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Option<CallLog>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            latencies: Vec::new(),
            fail_calls: Vec::new(),
            saved: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            log: None,
        }
    }

    /// Call `n` sleeps `latencies[n]`; later calls reuse the last entry.
    pub fn with_latencies(latencies: Vec<Duration>) -> Self {
        Self {
            latencies,
            ..Self::new()
        }
    }

    /// Fail the given zero-based calls.
    pub fn failing_on(calls: Vec<usize>) -> Self {
        Self {
            fail_calls: calls,
            ..Self::new()
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn saved(&self) -> Vec<NewTurn> {
        self.saved.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn latency(&self, call: usize) -> Duration {
        self.latencies
            .get(call)
            .or_else(|| self.latencies.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

#[async_trait]
impl TurnStore for RecordingStore {
    async fn save_turn(&self, turn: NewTurn) -> Result<StoredTurn> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let latency = self.latency(call);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_calls.contains(&call) {
            return Err(InterviewError::Persistence("503: storage unavailable".to_string()));
        }

        record(&self.log, format!("turn:{}", turn.text));
        let mut saved = self.saved.lock().unwrap();
        let stored = StoredTurn {
            id: Some(format!("turn_{}", call)),
            session_id: turn.session_id.clone(),
            turn_index: saved.len() as u32,
            speaker: turn.speaker,
            t_start_ms: 0,
            text: turn.text.clone(),
        };
        saved.push(turn);
        Ok(stored)
    }
}

// ---------------------------------------------------------------------------
// Transport

#[derive(Default)]
struct ConnectorState {
    connects: usize,
    close_calls: usize,
    sent: Vec<ClientEvent>,
    injector: Option<mpsc::Sender<TransportEvent>>,
}

/// Connector whose server side is driven by the test
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
    fail: Option<String>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            fail: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn audio_frames_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::InputAudioBufferAppend { .. }))
            .count()
    }

    /// Sender for server-side events. Panics before the first connect.
    pub fn injector(&self) -> mpsc::Sender<TransportEvent> {
        self.state
            .lock()
            .unwrap()
            .injector
            .clone()
            .expect("connector has not been connected")
    }

    /// Drop the server side so the event stream ends.
    pub fn disconnect(&self) {
        self.state.lock().unwrap().injector.take();
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _credential: &Credential) -> Result<Connection> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if let Some(msg) = &self.fail {
            return Err(InterviewError::Connection(msg.clone()));
        }

        let (tx, rx) = mpsc::channel(64);
        state.injector = Some(tx);
        Ok(Connection {
            sink: Box::new(FakeSink {
                state: self.state.clone(),
            }),
            events: rx,
            reader: None,
        })
    }
}

struct FakeSink {
    state: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl EventSink for FakeSink {
    async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        self.state.lock().unwrap().sent.push(event.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().close_calls += 1;
    }
}

// ---------------------------------------------------------------------------
// Audio devices

#[derive(Default)]
struct DeviceState {
    microphone: Option<mpsc::Sender<AudioFrame>>,
    capture_stop: Option<Arc<AtomicBool>>,
    played: Vec<ScheduledBuffer>,
    playback_stopped: bool,
    output_latency: Duration,
}

/// Devices with a test-driven microphone and a recording speaker
pub struct FakeDevices {
    state: Arc<Mutex<DeviceState>>,
    capture_error: Option<String>,
    playback_error: Option<String>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            capture_error: None,
            playback_error: None,
        }
    }

    pub fn capture_fails(message: &str) -> Self {
        Self {
            capture_error: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn playback_fails(message: &str) -> Self {
        Self {
            playback_error: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// Speaker that reports a fixed output latency.
    pub fn with_output_latency(latency: Duration) -> Self {
        let devices = Self::new();
        devices.state.lock().unwrap().output_latency = latency;
        devices
    }

    /// Push a frame as if the microphone captured it.
    pub async fn speak(&self, samples: Vec<i16>) {
        let mic = self.state.lock().unwrap().microphone.clone();
        if let Some(mic) = mic {
            let _ = mic
                .send(AudioFrame { samples })
                .await;
        }
    }

    /// Simulate the microphone disappearing.
    pub fn unplug_microphone(&self) {
        self.state.lock().unwrap().microphone.take();
    }

    pub fn capture_stopped(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .capture_stop
            .as_ref()
            .map(|s| s.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn played(&self) -> Vec<ScheduledBuffer> {
        self.state.lock().unwrap().played.clone()
    }

    pub fn playback_stopped(&self) -> bool {
        self.state.lock().unwrap().playback_stopped
    }
}

impl AudioDevices for FakeDevices {
    fn open_capture(&self, _format: &AudioFormat) -> Result<CaptureHandle> {
        if let Some(msg) = &self.capture_error {
            return Err(InterviewError::Device(msg.clone()));
        }
        let (tx, rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock().unwrap();
        state.microphone = Some(tx);
        state.capture_stop = Some(stop.clone());
        Ok(CaptureHandle::new(rx, stop))
    }

    fn open_playback(&self, _format: &AudioFormat) -> Result<Box<dyn AudioPlayback>> {
        if let Some(msg) = &self.playback_error {
            return Err(InterviewError::Device(msg.clone()));
        }
        Ok(Box::new(RecordingPlayback {
            state: self.state.clone(),
        }))
    }
}

struct RecordingPlayback {
    state: Arc<Mutex<DeviceState>>,
}

impl AudioPlayback for RecordingPlayback {
    fn play(&mut self, buffer: ScheduledBuffer) -> Result<()> {
        self.state.lock().unwrap().played.push(buffer);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().playback_stopped = true;
    }

    fn latency(&self) -> Duration {
        self.state.lock().unwrap().output_latency
    }
}
