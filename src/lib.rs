//! interview-live - real-time voice interview sessions
//!
//! Streams the participant's microphone to a realtime speech model, plays the
//! AI interviewer's voice back, keeps the two from talking over each other, and
//! records every turn of the conversation in order.

#![forbid(unsafe_code)]

pub mod audio;
pub mod backend;
pub mod config;
pub mod controller;
pub mod credential;
pub mod error;
pub mod gate;
pub mod interpreter;
pub mod persistence;
pub mod playback;
pub mod protocol;
pub mod transport;
pub mod turn;

#[cfg(test)]
mod testing;

pub use config::InterviewConfig;
pub use controller::{InterviewSession, SessionOutcome, SessionSnapshot, SessionStatus};
pub use error::{InterviewError, Result};
pub use turn::{Speaker, TranscriptUpdate, Turn};
