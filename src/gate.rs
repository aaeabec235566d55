//! Half-duplex gate - keeps the microphone closed while the AI is talking
//!
//! The speaker output would otherwise be picked up by the microphone and fed
//! back to the model as participant speech. The gate suppresses transmission
//! from the moment the AI starts a response until a fixed cooldown after its
//! audio has finished playing.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Inputs that move the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// Response created or an AI audio chunk arrived
    AiSpeaking,
    /// AI audio finished; playback ends at the given instant
    AiAudioFinished { playback_end: Instant },
}

/// Gate states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    AiSpeaking,
    Cooldown { until: Instant },
}

#[derive(Debug)]
pub struct HalfDuplexGate {
    state: GateState,
    cooldown: Duration,
}

impl HalfDuplexGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: GateState::Idle,
            cooldown,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn on_event(&mut self, event: GateEvent, now: Instant) {
        self.poll(now);

        match (self.state, event) {
            (GateState::AiSpeaking, GateEvent::AiSpeaking) => {}

            // New AI audio restarts suppression, cancelling any cooldown
            (_, GateEvent::AiSpeaking) => {
                debug!("🔇 Gate closed: AI speaking");
                self.state = GateState::AiSpeaking;
            }

            // The cooldown never starts before playback has drained
            (_, GateEvent::AiAudioFinished { playback_end }) => {
                let until = playback_end.max(now) + self.cooldown;
                debug!("⏳ Gate cooling down for {:?}", until - now);
                self.state = GateState::Cooldown { until };
            }
        }
    }

    pub fn on_ai_speaking(&mut self, now: Instant) {
        self.on_event(GateEvent::AiSpeaking, now);
    }

    pub fn on_ai_audio_finished(&mut self, playback_end: Instant, now: Instant) {
        self.on_event(GateEvent::AiAudioFinished { playback_end }, now);
    }

    /// Expire a finished cooldown. Returns true if the gate just reopened.
    pub fn poll(&mut self, now: Instant) -> bool {
        if let GateState::Cooldown { until } = self.state {
            if now >= until {
                debug!("🎤 Gate open");
                self.state = GateState::Idle;
                return true;
            }
        }
        false
    }

    pub fn is_suppressed(&self, now: Instant) -> bool {
        match self.state {
            GateState::Idle => false,
            GateState::AiSpeaking => true,
            GateState::Cooldown { until } => now < until,
        }
    }

    /// Whether a captured frame may be sent right now.
    pub fn permits(&self, now: Instant, muted: bool) -> bool {
        !muted && !self.is_suppressed(now)
    }

    pub fn ai_speaking(&self) -> bool {
        self.state == GateState::AiSpeaking
    }

    /// When the current cooldown ends, if one is running.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            GateState::Cooldown { until } => Some(until),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(500);

    #[test]
    fn test_starts_open() {
        let gate = HalfDuplexGate::new(COOLDOWN);
        let now = Instant::now();
        assert!(gate.permits(now, false));
        assert!(!gate.permits(now, true));
        assert_eq!(gate.deadline(), None);
    }

    #[test]
    fn test_closed_from_start_until_cooldown_end() {
        let mut gate = HalfDuplexGate::new(COOLDOWN);
        let t0 = Instant::now();

        gate.on_ai_speaking(t0);
        assert!(gate.ai_speaking());
        assert!(!gate.permits(t0 + Duration::from_secs(10), false));

        let finished = t0 + Duration::from_secs(2);
        gate.on_ai_audio_finished(finished, finished);
        assert!(!gate.permits(finished, false));
        assert!(!gate.permits(finished + Duration::from_millis(499), false));
        assert!(gate.permits(finished + COOLDOWN, false));
        assert_eq!(gate.deadline(), Some(finished + COOLDOWN));

        assert!(gate.poll(finished + COOLDOWN));
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn test_new_audio_during_cooldown_restarts_suppression() {
        let mut gate = HalfDuplexGate::new(COOLDOWN);
        let t0 = Instant::now();

        gate.on_ai_speaking(t0);
        gate.on_ai_audio_finished(t0, t0);
        let t1 = t0 + Duration::from_millis(200);
        gate.on_ai_speaking(t1);

        // The first cooldown would have ended here
        assert!(!gate.permits(t0 + COOLDOWN, false));
        assert_eq!(gate.deadline(), None);

        let t2 = t0 + Duration::from_secs(1);
        gate.on_ai_audio_finished(t2, t2);
        assert!(!gate.permits(t2 + Duration::from_millis(100), false));
        assert!(gate.permits(t2 + COOLDOWN, false));
    }

    #[test]
    fn test_cooldown_anchored_at_playback_end() {
        let mut gate = HalfDuplexGate::new(COOLDOWN);
        let t0 = Instant::now();

        gate.on_ai_speaking(t0);
        // Stream says done but 3s of audio is still queued on the speaker
        let playback_end = t0 + Duration::from_secs(3);
        gate.on_ai_audio_finished(playback_end, t0);

        assert!(!gate.permits(t0 + Duration::from_secs(3), false));
        assert!(gate.permits(playback_end + COOLDOWN, false));
    }

    #[test]
    fn test_finished_without_start_still_cools_down() {
        let mut gate = HalfDuplexGate::new(COOLDOWN);
        let t0 = Instant::now();
        gate.on_ai_audio_finished(t0, t0);
        assert!(gate.is_suppressed(t0));
        assert!(!gate.is_suppressed(t0 + COOLDOWN));
    }
}
