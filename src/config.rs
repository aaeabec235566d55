//! Interview session configuration
//!
//! Defaults match the realtime interviewer the platform ships with. Every field
//! can be overridden from `INTERVIEW_*` environment variables.

use crate::error::{InterviewError, Result};
use std::str::FromStr;
use std::time::Duration;

/// Server-side voice activity detection settings sent at connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDetectionConfig {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Configuration for an interview session
#[derive(Debug, Clone)]
pub struct InterviewConfig {
    /// Base URL of the interview backend (session start, turns, completion)
    pub api_base_url: String,
    pub realtime_url: String,
    pub model: String,
    pub voice: String,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
    /// PCM16 mono sample rate used on the wire and on the devices
    pub sample_rate: u32,
    /// Samples per captured frame; one frame is one append event
    pub frame_samples: usize,
    /// Echo guard after the AI finishes speaking
    pub cooldown: Duration,
    /// How long `end_interview` waits for pending turns before dropping them
    pub flush_timeout: Duration,
    pub app_name: String,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            realtime_url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            voice: "verse".to_string(),
            transcription_model: "whisper-1".to_string(),
            turn_detection: TurnDetectionConfig::default(),
            sample_rate: 24_000,
            frame_samples: 2_400, // 100ms at 24 kHz
            cooldown: Duration::from_millis(500),
            flush_timeout: Duration::from_secs(5),
            app_name: "interview-live".to_string(),
            input_device: None,
            output_device: None,
        }
    }
}

impl InterviewConfig {
    /// Defaults overridden by any `INTERVIEW_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("INTERVIEW_API_BASE") {
            config.api_base_url = v;
        }
        if let Some(v) = lookup("INTERVIEW_REALTIME_URL") {
            config.realtime_url = v;
        }
        if let Some(v) = lookup("INTERVIEW_MODEL") {
            config.model = v;
        }
        if let Some(v) = lookup("INTERVIEW_VOICE") {
            config.voice = v;
        }
        if let Some(v) = lookup("INTERVIEW_TRANSCRIPTION_MODEL") {
            config.transcription_model = v;
        }
        if let Some(v) = parsed(&lookup, "INTERVIEW_VAD_THRESHOLD")? {
            config.turn_detection.threshold = v;
        }
        if let Some(v) = parsed(&lookup, "INTERVIEW_VAD_PREFIX_PADDING_MS")? {
            config.turn_detection.prefix_padding_ms = v;
        }
        if let Some(v) = parsed(&lookup, "INTERVIEW_VAD_SILENCE_MS")? {
            config.turn_detection.silence_duration_ms = v;
        }
        if let Some(v) = parsed(&lookup, "INTERVIEW_SAMPLE_RATE")? {
            config.sample_rate = v;
        }
        if let Some(v) = parsed(&lookup, "INTERVIEW_FRAME_SAMPLES")? {
            config.frame_samples = v;
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, "INTERVIEW_COOLDOWN_MS")? {
            config.cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, "INTERVIEW_FLUSH_TIMEOUT_MS")? {
            config.flush_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("INTERVIEW_INPUT_DEVICE") {
            config.input_device = Some(v);
        }
        if let Some(v) = lookup("INTERVIEW_OUTPUT_DEVICE") {
            config.output_device = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(InterviewError::Config("sample rate must be positive".into()));
        }
        if self.frame_samples == 0 {
            return Err(InterviewError::Config("frame size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.turn_detection.threshold) {
            return Err(InterviewError::Config(format!(
                "VAD threshold {} outside 0.0..=1.0",
                self.turn_detection.threshold
            )));
        }
        if !self.realtime_url.starts_with("ws://") && !self.realtime_url.starts_with("wss://") {
            return Err(InterviewError::Config(format!(
                "realtime URL must be ws:// or wss://, got {}",
                self.realtime_url
            )));
        }
        Ok(())
    }

    /// Duration of one captured frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| InterviewError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}
