use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use tracing::warn;

use super::coords::CoordinateBuffers;
use super::streamer::{FlushOutcome, FlushStats, Streamer};

/// Runs a [`Streamer`] on its own thread so network I/O never lands on the
/// tick thread. Batches are flushed in submission order.
pub struct StreamWorker {
    tx: Option<SyncSender<CoordinateBuffers>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<RwLock<FlushStats>>,
    queue_full: u64,
    env_id: u64,
}

impl StreamWorker {
    pub fn spawn(streamer: Streamer, capacity: usize) -> std::io::Result<Self> {
        let env_id = streamer.identity().env_id;
        let (tx, rx) = mpsc::sync_channel::<CoordinateBuffers>(capacity.max(1));
        let stats = Arc::new(RwLock::new(FlushStats::default()));
        let stats_out = stats.clone();

        let handle = std::thread::Builder::new()
            .name(format!("telemetry-{env_id}"))
            .spawn(move || {
                let mut streamer = streamer;
                streamer.connect();
                for mut batch in rx {
                    streamer.flush(&mut batch);
                    if let Ok(mut s) = stats_out.write() {
                        *s = streamer.stats();
                    }
                }
                streamer.close();
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            stats,
            queue_full: 0,
            env_id,
        })
    }

    /// Never blocks. A full queue drops the batch.
    pub fn submit(&mut self, batch: CoordinateBuffers) -> FlushOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return FlushOutcome::Disabled;
        };
        match tx.try_send(batch) {
            Ok(()) => FlushOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.queue_full += 1;
                warn!(env_id = self.env_id, "telemetry queue full, dropping interval");
                FlushOutcome::QueueFull
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(env_id = self.env_id, "telemetry worker gone, disabling");
                self.tx = None;
                FlushOutcome::Disabled
            }
        }
    }

    /// Flush counters as last published by the worker thread, plus batches
    /// dropped at submission.
    pub fn stats(&self) -> FlushStats {
        let mut stats = self.stats.read().map(|s| *s).unwrap_or_default();
        stats.intervals_dropped += self.queue_full;
        stats
    }

    /// Lets the worker drain what is queued, then joins it.
    pub fn close(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(env_id = self.env_id, "telemetry worker panicked");
            }
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.close();
    }
}
