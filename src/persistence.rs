//! Turn persistence queue
//!
//! Completed turns are handed off without waiting and written by a single drain
//! task, one at a time, oldest first. Storage latency therefore never reorders
//! turns and never stalls the session loop.

use crate::backend::{NewTurn, TurnStore};
use crate::turn::Turn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of a drained (or abandoned) queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub persisted: u64,
    pub failed: u64,
    /// Enqueued but never attempted, or cut off mid-write
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct QueueStats {
    enqueued: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
}

impl QueueStats {
    fn report(&self) -> DrainReport {
        let enqueued = self.enqueued.load(Ordering::SeqCst);
        let persisted = self.persisted.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        DrainReport {
            persisted,
            failed,
            dropped: enqueued.saturating_sub(persisted + failed),
        }
    }
}

pub struct TurnQueue {
    tx: Option<mpsc::UnboundedSender<Turn>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<QueueStats>,
}

impl TurnQueue {
    /// Start the drain task for one session.
    pub fn spawn(session_id: impl Into<String>, store: Arc<dyn TurnStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());
        let worker = tokio::spawn(drain(session_id.into(), store, rx, stats.clone()));

        Self {
            tx: Some(tx),
            worker: Some(worker),
            stats,
        }
    }

    /// Hand a turn to the drain task. Never blocks and never fails.
    pub fn enqueue(&self, turn: Turn) {
        let Some(tx) = &self.tx else {
            warn!("Turn {} enqueued after the queue closed; dropped", turn.sequence_index);
            return;
        };

        self.stats.enqueued.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = tx.send(turn) {
            // Worker is gone; the turn stays counted as dropped
            warn!("Turn {} dropped: persistence worker stopped", e.0.sequence_index);
        }
    }

    /// Turns enqueued but not yet written or failed.
    pub fn pending(&self) -> u64 {
        self.stats.report().dropped
    }

    pub fn report(&self) -> DrainReport {
        self.stats.report()
    }

    /// Close the queue and wait up to `grace` for pending turns to be written.
    pub async fn finish(&mut self, grace: Duration) -> DrainReport {
        self.tx.take();

        if let Some(mut worker) = self.worker.take() {
            match tokio::time::timeout(grace, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Persistence worker failed: {}", e),
                Err(_) => {
                    warn!(
                        "⏱️ Turn flush timed out after {:?} with {} pending",
                        grace,
                        self.pending()
                    );
                    worker.abort();
                }
            }
        }

        let report = self.stats.report();
        info!(
            "💾 Turn queue closed: {} persisted, {} failed, {} dropped",
            report.persisted, report.failed, report.dropped
        );
        report
    }

    /// Stop immediately, dropping whatever is still pending.
    pub fn abort(&mut self) -> DrainReport {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }

        let report = self.stats.report();
        if report.dropped > 0 {
            warn!("💾 Turn queue aborted with {} unsaved turns", report.dropped);
        }
        report
    }
}

impl Drop for TurnQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn drain(
    session_id: String,
    store: Arc<dyn TurnStore>,
    mut rx: mpsc::UnboundedReceiver<Turn>,
    stats: Arc<QueueStats>,
) {
    debug!("Persistence worker started for session {}", session_id);

    while let Some(turn) = rx.recv().await {
        let index = turn.sequence_index;
        let new_turn = NewTurn {
            session_id: session_id.clone(),
            speaker: turn.speaker,
            text: turn.text,
        };

        match store.save_turn(new_turn).await {
            Ok(stored) => {
                stats.persisted.fetch_add(1, Ordering::SeqCst);
                if stored.turn_index != index {
                    warn!(
                        "Store assigned index {} to turn {}",
                        stored.turn_index, index
                    );
                }
                debug!("💾 Saved turn {} ({})", index, stored.speaker.label());
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::SeqCst);
                error!("Failed to save turn {}: {}", index, e);
            }
        }
    }

    debug!("Persistence worker for session {} drained", session_id);
}
