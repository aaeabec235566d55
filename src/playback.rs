//! Playback scheduling for AI audio
//!
//! Each decoded chunk is placed at `max(now, end of previous chunk)` so a burst
//! of chunks plays back-to-back without gaps, overlap or reordering. The device
//! writer consumes buffers in the order they were scheduled.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// A decoded chunk with its slot on the playback timeline
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub samples: Vec<i16>,
    pub start: Instant,
    pub duration: Duration,
}

impl ScheduledBuffer {
    pub fn end(&self) -> Instant {
        self.start + self.duration
    }
}

#[derive(Debug)]
pub struct PlaybackQueue {
    sample_rate: u32,
    next_start: Option<Instant>,
    /// (start, end) of buffers that have not finished playing yet
    in_flight: VecDeque<(Instant, Instant)>,
}

impl PlaybackQueue {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_start: None,
            in_flight: VecDeque::new(),
        }
    }

    pub fn schedule(&mut self, samples: Vec<i16>, now: Instant) -> ScheduledBuffer {
        self.prune(now);

        let start = match self.next_start {
            Some(next) if next > now => next,
            _ => now,
        };
        let duration = samples_duration(samples.len(), self.sample_rate);
        let end = start + duration;

        self.next_start = Some(end);
        self.in_flight.push_back((start, end));

        ScheduledBuffer {
            samples,
            start,
            duration,
        }
    }

    /// Instant at which everything scheduled so far has played.
    pub fn busy_until(&self, now: Instant) -> Instant {
        match self.next_start {
            Some(next) if next > now => next,
            _ => now,
        }
    }

    pub fn is_playing(&self, now: Instant) -> bool {
        self.busy_until(now) > now
    }

    /// Drop bookkeeping for buffers that have finished.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&(_, end)) = self.in_flight.front() {
            if end <= now {
                self.in_flight.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.next_start = None;
        self.in_flight.clear();
    }
}

pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos(samples as u64 * 1_000_000_000 / sample_rate as u64)
}
