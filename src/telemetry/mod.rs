//! Position telemetry side-channel.
//!
//! Samples are buffered per instance and flushed every `interval` ticks to a
//! remote collector. Delivery is best-effort: network trouble is logged and
//! the affected interval discarded, never surfaced to the tick loop.

pub mod coords;
pub mod message;
pub mod streamer;
pub mod transport;
pub mod worker;

pub use coords::CoordinateBuffers;
pub use message::{StreamIdentity, encode_batch};
pub use streamer::{FlushOutcome, FlushStats, StreamState, Streamer};
pub use transport::{Connection, Connector, WsConnection, WsConnector};
pub use worker::StreamWorker;

use tracing::warn;

use crate::binding::Position;
use crate::config::StreamConfig;
use crate::counter::RunId;

enum Sink {
    Inline(Streamer),
    Background(StreamWorker),
    /// Keeps the final counters of whatever sink ran before.
    Off(FlushStats),
}

/// Coordinate buffers plus whichever sink drains them.
pub struct Telemetry {
    coords: CoordinateBuffers,
    interval: u64,
    sink: Sink,
}

impl Telemetry {
    /// Opens the first connection (inline) or starts the worker (background).
    /// A failed connect only leaves the stream disconnected.
    pub fn start(
        config: &StreamConfig,
        env_id: u64,
        num_agents: usize,
        connector: Box<dyn Connector>,
    ) -> Self {
        let identity = StreamIdentity::new(config, RunId::current(), env_id);
        let mut streamer = Streamer::new(identity, connector);
        let sink = if config.background {
            match StreamWorker::spawn(streamer, config.queue_capacity) {
                Ok(worker) => Sink::Background(worker),
                Err(e) => {
                    warn!(env_id, error = %e, "could not start telemetry worker, streaming off");
                    Sink::Off(FlushStats::default())
                }
            }
        } else {
            streamer.connect();
            Sink::Inline(streamer)
        };
        Self {
            coords: CoordinateBuffers::new(num_agents),
            interval: config.interval.max(1),
            sink,
        }
    }

    pub fn coords(&self) -> &CoordinateBuffers {
        &self.coords
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn record(&mut self, positions: &[Position]) -> usize {
        self.coords.record(positions)
    }

    /// Flushes when `tick` lands on the stream interval.
    pub fn on_tick(&mut self, tick: u64) -> Option<FlushOutcome> {
        tick.is_multiple_of(self.interval).then(|| self.flush())
    }

    pub fn flush(&mut self) -> FlushOutcome {
        match &mut self.sink {
            Sink::Inline(streamer) => streamer.flush(&mut self.coords),
            Sink::Background(worker) => worker.submit(self.coords.take()),
            Sink::Off(_) => {
                self.coords.clear();
                FlushOutcome::Disabled
            }
        }
    }

    /// `None` for the background sink, whose connection lives on the worker.
    pub fn state(&self) -> Option<StreamState> {
        match &self.sink {
            Sink::Inline(streamer) => Some(streamer.state()),
            Sink::Background(_) => None,
            Sink::Off(_) => Some(StreamState::Disabled),
        }
    }

    pub fn stats(&self) -> FlushStats {
        match &self.sink {
            Sink::Inline(streamer) => streamer.stats(),
            Sink::Background(worker) => worker.stats(),
            Sink::Off(stats) => *stats,
        }
    }

    pub fn close(&mut self) {
        match &mut self.sink {
            Sink::Inline(streamer) => streamer.close(),
            Sink::Background(worker) => worker.close(),
            Sink::Off(_) => {}
        }
        self.sink = Sink::Off(self.stats());
        self.coords.clear();
    }
}
