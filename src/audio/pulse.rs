//! PulseAudio backend
//!
//! The simple API blocks, so capture and playback each run on their own OS
//! thread and talk to the session through channels. Each thread creates its
//! `Simple` connection itself and reports success or failure before the open
//! call returns.

use super::{AudioDevices, AudioFormat, AudioFrame, AudioPlayback, CaptureHandle};
use crate::error::{InterviewError, Result};
use crate::playback::ScheduledBuffer;
use libpulse_binding as pulse;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet};
use libpulse_binding::def::{BufferAttr, Retval};
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::Proplist;
use libpulse_simple_binding as psimple;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How long to wait for the server to accept a new stream
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured frames buffered between the device thread and the session
const CAPTURE_QUEUE: usize = 32;

/// Server-side playback buffer target
const PLAYBACK_TARGET_LATENCY: Duration = Duration::from_millis(150);

type Ready = std::result::Result<(), String>;

/// PulseAudio-backed microphone and speaker
#[derive(Debug, Default, Clone)]
pub struct PulseDevices;

impl PulseDevices {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDevices for PulseDevices {
    fn open_capture(&self, format: &AudioFormat) -> Result<CaptureHandle> {
        let (tx, rx) = mpsc::channel(CAPTURE_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Ready>(1);

        let thread_format = format.clone();
        let thread_stop = stop.clone();
        std::thread::Builder::new()
            .name("pulse-capture".to_string())
            .spawn(move || capture_loop(thread_format, tx, thread_stop, ready_tx))
            .map_err(|e| InterviewError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(CaptureHandle::new(rx, stop)),
            Ok(Err(e)) => Err(InterviewError::Device(format!("microphone unavailable: {}", e))),
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                Err(InterviewError::Device("timed out opening microphone".to_string()))
            }
        }
    }

    fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn AudioPlayback>> {
        let (tx, rx) = std_mpsc::channel::<PlaybackCommand>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Ready>(1);
        let latency_us = Arc::new(AtomicU64::new(PLAYBACK_TARGET_LATENCY.as_micros() as u64));

        let thread_format = format.clone();
        let thread_latency = latency_us.clone();
        std::thread::Builder::new()
            .name("pulse-playback".to_string())
            .spawn(move || playback_loop(thread_format, rx, thread_latency, ready_tx))
            .map_err(|e| InterviewError::Device(format!("failed to spawn playback thread: {}", e)))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Box::new(PulsePlayback {
                tx: Some(tx),
                latency_us,
            })),
            Ok(Err(e)) => Err(InterviewError::Device(format!("speaker unavailable: {}", e))),
            Err(_) => Err(InterviewError::Device("timed out opening speaker".to_string())),
        }
    }
}

fn sample_spec(format: &AudioFormat) -> pulse::sample::Spec {
    pulse::sample::Spec {
        format: pulse::sample::Format::S16le,
        channels: format.channels,
        rate: format.sample_rate,
    }
}

/// Bound the server's playback buffer so queued speech is not hidden from the
/// gate for seconds. `u32::MAX` leaves a field at the server default.
fn playback_buffer(format: &AudioFormat) -> BufferAttr {
    let bytes_per_sec = format.sample_rate as u64 * 2 * format.channels as u64;
    let target = bytes_per_sec * PLAYBACK_TARGET_LATENCY.as_millis() as u64 / 1000;
    BufferAttr {
        maxlength: u32::MAX,
        tlength: target as u32,
        prebuf: u32::MAX,
        minreq: u32::MAX,
        fragsize: u32::MAX,
    }
}

fn capture_loop(
    format: AudioFormat,
    tx: mpsc::Sender<AudioFrame>,
    stop: Arc<AtomicBool>,
    ready: std_mpsc::SyncSender<Ready>,
) {
    let spec = sample_spec(&format);
    let capture = match psimple::Simple::new(
        None,
        &format.app_name,
        pulse::stream::Direction::Record,
        format.device.as_deref(),
        "interview microphone",
        &spec,
        None,
        None,
    ) {
        Ok(simple) => simple,
        Err(e) => {
            let _ = ready.send(Err(format!("{}", e)));
            return;
        }
    };

    info!(
        "🎙️ Microphone capture started at {}Hz ({} samples/frame, device: {})",
        format.sample_rate,
        format.frame_samples,
        format.device.as_deref().unwrap_or("default")
    );
    let _ = ready.send(Ok(()));

    let mut buffer = vec![0u8; format.frame_samples * 2 * format.channels as usize];
    let mut frames: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        if let Err(e) = capture.read(&mut buffer) {
            error!("Microphone read failed: {}", e);
            break;
        }

        let frame = AudioFrame {
            samples: super::le_bytes_to_pcm16(&buffer),
        };

        if tx.blocking_send(frame).is_err() {
            debug!("Capture receiver dropped");
            break;
        }

        frames += 1;
        if frames % 100 == 0 {
            debug!("🎙️ Captured {} frames", frames);
        }
    }

    info!("🎙️ Microphone capture stopped after {} frames", frames);
}

enum PlaybackCommand {
    Play(Vec<i16>),
    Stop,
}

struct PulsePlayback {
    tx: Option<std_mpsc::Sender<PlaybackCommand>>,
    /// Last stream latency reported by the server
    latency_us: Arc<AtomicU64>,
}

impl AudioPlayback for PulsePlayback {
    fn play(&mut self, buffer: ScheduledBuffer) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| InterviewError::Device("speaker already closed".to_string()))?;
        tx.send(PlaybackCommand::Play(buffer.samples))
            .map_err(|_| InterviewError::Device("speaker thread exited".to_string()))
    }

    fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(PlaybackCommand::Stop);
        }
    }

    fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us.load(Ordering::Relaxed))
    }
}

impl Drop for PulsePlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn playback_loop(
    format: AudioFormat,
    rx: std_mpsc::Receiver<PlaybackCommand>,
    latency_us: Arc<AtomicU64>,
    ready: std_mpsc::SyncSender<Ready>,
) {
    let spec = sample_spec(&format);
    let buffer = playback_buffer(&format);
    let output = match psimple::Simple::new(
        None,
        &format.app_name,
        pulse::stream::Direction::Playback,
        format.device.as_deref(),
        "interviewer voice",
        &spec,
        None,
        Some(&buffer),
    ) {
        Ok(simple) => simple,
        Err(e) => {
            let _ = ready.send(Err(format!("{}", e)));
            return;
        }
    };

    info!("🔊 Speaker output started at {}Hz", format.sample_rate);
    let _ = ready.send(Ok(()));

    while let Ok(command) = rx.recv() {
        match command {
            PlaybackCommand::Play(samples) => {
                let bytes = super::pcm16_to_le_bytes(&samples);
                if let Err(e) = output.write(&bytes) {
                    error!("Speaker write failed: {}", e);
                    return;
                }
                match output.get_latency() {
                    Ok(latency) => latency_us.store(latency.0, Ordering::Relaxed),
                    Err(e) => debug!("Speaker latency unavailable: {}", e),
                }
            }
            PlaybackCommand::Stop => {
                if let Err(e) = output.flush() {
                    warn!("Failed to flush speaker: {}", e);
                }
                info!("🔊 Speaker output stopped");
                return;
            }
        }
    }

    // Sender dropped without an explicit stop: let queued audio finish
    if let Err(e) = output.drain() {
        warn!("Failed to drain speaker: {}", e);
    }
}

/// Which sources to enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Microphone,
    /// Monitor of a playback sink
    Monitor,
    Any,
}

impl DeviceType {
    fn accepts(self, is_monitor: bool) -> bool {
        match self {
            DeviceType::Microphone => !is_monitor,
            DeviceType::Monitor => is_monitor,
            DeviceType::Any => true,
        }
    }
}

/// A PulseAudio input source
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub name: String,
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub is_monitor: bool,
}

/// Some drivers expose sink monitors without `monitor_of_sink`; their names
/// still end in `.monitor`.
fn is_monitor_source(name: &str, monitor_of_sink: bool) -> bool {
    monitor_of_sink || name.ends_with(".monitor")
}

/// Block on the mainloop until `check` reports completion or fails.
fn run_until(mainloop: &mut Mainloop, mut check: impl FnMut() -> Result<bool>) -> Result<()> {
    while !check()? {
        if let IterateResult::Quit(_) | IterateResult::Err(_) = mainloop.iterate(true) {
            return Err(InterviewError::Device("PulseAudio mainloop stopped".to_string()));
        }
    }
    Ok(())
}

/// List the server's input sources.
pub fn list_sources(device_type: DeviceType) -> Result<Vec<AudioSource>> {
    let mut proplist = Proplist::new()
        .ok_or_else(|| InterviewError::Device("failed to create proplist".to_string()))?;
    proplist
        .set_str(
            pulse::proplist::properties::APPLICATION_NAME,
            "interview-live-mic-check",
        )
        .map_err(|_| InterviewError::Device("failed to set proplist".to_string()))?;

    let mut mainloop = Mainloop::new()
        .ok_or_else(|| InterviewError::Device("failed to create mainloop".to_string()))?;
    let mut context = Context::new_with_proplist(&mainloop, "interview-live-sources", &proplist)
        .ok_or_else(|| InterviewError::Device("failed to create context".to_string()))?;
    context
        .connect(None, ContextFlagSet::NOFLAGS, None)
        .map_err(|e| InterviewError::Device(format!("failed to connect to PulseAudio: {}", e)))?;

    run_until(&mut mainloop, || match context.get_state() {
        pulse::context::State::Ready => Ok(true),
        pulse::context::State::Failed | pulse::context::State::Terminated => Err(
            InterviewError::Device("PulseAudio connection failed".to_string()),
        ),
        _ => Ok(false),
    })?;

    // The standard mainloop runs callbacks on this thread
    let sources = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(Cell::new(false));
    let (found, finished) = (sources.clone(), done.clone());

    let _op = context
        .introspect()
        .get_source_info_list(move |result| match result {
            ListResult::Item(info) => {
                let (Some(name), Some(description)) = (&info.name, &info.description) else {
                    return;
                };
                let is_monitor = is_monitor_source(name, info.monitor_of_sink.is_some());
                if device_type.accepts(is_monitor) {
                    found.borrow_mut().push(AudioSource {
                        name: name.to_string(),
                        description: description.to_string(),
                        sample_rate: info.sample_spec.rate,
                        channels: info.sample_spec.channels,
                        is_monitor,
                    });
                }
            }
            ListResult::End => finished.set(true),
            ListResult::Error => {
                error!("Error listing audio sources");
                finished.set(true);
            }
        });

    let listed = run_until(&mut mainloop, || Ok(done.get()));

    context.disconnect();
    mainloop.quit(Retval(0));

    listed?;
    let sources = sources.take();
    debug!("Found {} PulseAudio sources", sources.len());
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_detection() {
        assert!(is_monitor_source("alsa_output.pci.analog-stereo.monitor", false));
        assert!(is_monitor_source("virtual_sink", true));
        assert!(!is_monitor_source("alsa_input.usb-mic", false));
    }

    #[test]
    fn test_device_type_filter() {
        assert!(DeviceType::Microphone.accepts(false));
        assert!(!DeviceType::Microphone.accepts(true));
        assert!(DeviceType::Monitor.accepts(true));
        assert!(!DeviceType::Monitor.accepts(false));
        assert!(DeviceType::Any.accepts(true));
    }

    #[test]
    fn test_playback_buffer_targets_latency() {
        let attr = playback_buffer(&AudioFormat::default());
        // 150ms of 24kHz mono 16-bit
        assert_eq!(attr.tlength, 7_200);
        assert_eq!(attr.maxlength, u32::MAX);
    }
}
