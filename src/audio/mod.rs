//! Audio capture and playback
//!
//! Everything on the wire and on the devices is 16-bit little-endian PCM, mono,
//! at 24 kHz. Device I/O lives behind [`AudioDevices`] so sessions can run
//! against PulseAudio or against in-memory fakes.

pub mod pulse;

use crate::error::{InterviewError, Result};
use crate::playback::ScheduledBuffer;
use base64::engine::general_purpose;
use base64::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u8 = 1;

/// Device stream parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    /// Samples per captured frame
    pub frame_samples: usize,
    pub app_name: String,
    /// PulseAudio source/sink name, `None` for the server default
    pub device: Option<String>,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_samples: 2_400,
            app_name: "interview-live".to_string(),
            device: None,
        }
    }
}

/// One captured microphone frame
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

/// Live capture stream. Dropping it stops the capture thread.
pub struct CaptureHandle {
    frames: mpsc::Receiver<AudioFrame>,
    stop: Arc<AtomicBool>,
}

impl CaptureHandle {
    pub fn new(frames: mpsc::Receiver<AudioFrame>, stop: Arc<AtomicBool>) -> Self {
        Self { frames, stop }
    }

    /// Next frame, or `None` once the device is gone.
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.frames.recv().await
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.frames.close();
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Speaker output. Buffers are played in the order they are handed over.
pub trait AudioPlayback: Send {
    fn play(&mut self, buffer: ScheduledBuffer) -> Result<()>;

    /// Discard anything queued and release the device.
    fn stop(&mut self);

    /// Delay between handing audio to the device and hearing it.
    fn latency(&self) -> Duration {
        Duration::ZERO
    }
}

/// Source of capture and playback streams
pub trait AudioDevices: Send + Sync {
    fn open_capture(&self, format: &AudioFormat) -> Result<CaptureHandle>;

    fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn AudioPlayback>>;
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Base64 payload for an `input_audio_buffer.append` event.
pub fn encode_frame(samples: &[i16]) -> String {
    general_purpose::STANDARD.encode(pcm16_to_le_bytes(samples))
}

/// Decode a base64 PCM16 chunk received from the AI.
pub fn decode_chunk(data: &str) -> Result<Vec<i16>> {
    let bytes = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| InterviewError::Protocol(format!("invalid base64 audio: {}", e)))?;
    if bytes.len() % 2 != 0 {
        return Err(InterviewError::Protocol(format!(
            "audio chunk has odd byte length {}",
            bytes.len()
        )));
    }
    Ok(le_bytes_to_pcm16(&bytes))
}

/// Input level 0-100 from the RMS of a frame.
pub fn level_percent(samples: &[i16]) -> u8 {
    if samples.is_empty() {
        return 0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let bytes = pcm16_to_le_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xfe, 0xff, 0x34, 0x12]);
        assert_eq!(le_bytes_to_pcm16(&bytes), vec![1, -2, 0x1234]);
    }

    #[test]
    fn test_frame_encoding_matches_decoder() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 37 - 9000) as i16).collect();
        let encoded = encode_frame(&samples);
        assert_eq!(decode_chunk(&encoded).unwrap(), samples);
    }

    #[test]
    fn test_decode_rejects_bad_chunks() {
        assert!(matches!(
            decode_chunk("@@not base64@@"),
            Err(InterviewError::Protocol(_))
        ));
        // Three bytes cannot hold whole samples
        let odd = general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert!(matches!(decode_chunk(&odd), Err(InterviewError::Protocol(_))));
    }

    #[test]
    fn test_level_percent() {
        assert_eq!(level_percent(&[]), 0);
        assert_eq!(level_percent(&[0; 480]), 0);
        assert_eq!(level_percent(&[i16::MAX; 480]), 100);

        let half: Vec<i16> = (0..480)
            .map(|i| if i % 2 == 0 { 16_384 } else { -16_384 })
            .collect();
        assert_eq!(level_percent(&half), 50);
    }
}
