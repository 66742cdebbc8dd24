use tracing::{debug, info, warn};

use super::coords::CoordinateBuffers;
use super::message::{StreamIdentity, encode_batch};
use super::transport::{Connection, Connector};
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disabled,
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every payload went out, possibly after one reconnect.
    Sent { messages: usize, retried: bool },
    /// Connected, but no instance had samples.
    Empty,
    /// Was disconnected: one connect attempted, interval dropped.
    NotConnected,
    /// Send failed and the single retry did not recover it.
    Failed,
    /// Handed to the background worker.
    Queued,
    /// Background queue full; interval dropped.
    QueueFull,
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub flushes: u64,
    pub messages_sent: u64,
    pub intervals_dropped: u64,
    pub reconnects: u64,
}

/// Best-effort delivery of position traces. Nothing in here returns an error
/// to the caller: failures are logged and the interval's samples discarded.
pub struct Streamer {
    state: StreamState,
    connector: Box<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
    identity: StreamIdentity,
    stats: FlushStats,
}

impl Streamer {
    pub fn new(identity: StreamIdentity, connector: Box<dyn Connector>) -> Self {
        Self {
            state: StreamState::Disconnected,
            connector,
            connection: None,
            identity,
            stats: FlushStats::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Returns whether a connection is open afterwards.
    pub fn connect(&mut self) -> bool {
        match self.state {
            StreamState::Disabled => false,
            StreamState::Connected => true,
            StreamState::Disconnected => match self.connector.connect() {
                Ok(conn) => {
                    info!(
                        env_id = self.identity.env_id,
                        endpoint = self.connector.endpoint(),
                        "telemetry stream connected"
                    );
                    self.connection = Some(conn);
                    self.state = StreamState::Connected;
                    true
                }
                Err(e) => {
                    warn!(
                        env_id = self.identity.env_id,
                        endpoint = self.connector.endpoint(),
                        error = %e,
                        "telemetry stream connection failed"
                    );
                    false
                }
            },
        }
    }

    fn reconnect(&mut self) -> bool {
        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }
        if self.state == StreamState::Disabled {
            return false;
        }
        self.state = StreamState::Disconnected;
        self.stats.reconnects += 1;
        self.connect()
    }

    fn send_all(&mut self, payloads: &[String]) -> Result<(), TransportError> {
        let conn = self.connection.as_mut().ok_or(TransportError::Closed)?;
        for payload in payloads {
            conn.send_text(payload)?;
        }
        Ok(())
    }

    /// Sends the accumulated traces and clears `coords` regardless of outcome.
    pub fn flush(&mut self, coords: &mut CoordinateBuffers) -> FlushOutcome {
        let outcome = self.flush_inner(coords);
        coords.clear();
        self.stats.flushes += 1;
        match outcome {
            FlushOutcome::Sent { messages, .. } => self.stats.messages_sent += messages as u64,
            FlushOutcome::NotConnected | FlushOutcome::Failed => self.stats.intervals_dropped += 1,
            _ => {}
        }
        outcome
    }

    fn flush_inner(&mut self, coords: &CoordinateBuffers) -> FlushOutcome {
        match self.state {
            StreamState::Disabled => return FlushOutcome::Disabled,
            StreamState::Disconnected => {
                self.connect();
                return FlushOutcome::NotConnected;
            }
            StreamState::Connected => {}
        }

        let payloads = match encode_batch(&self.identity, coords) {
            Ok(p) => p,
            Err(e) => {
                warn!(env_id = self.identity.env_id, error = %e, "telemetry encode failed");
                return FlushOutcome::Failed;
            }
        };
        if payloads.is_empty() {
            return FlushOutcome::Empty;
        }

        let first_err = match self.send_all(&payloads) {
            Ok(()) => {
                debug!(
                    env_id = self.identity.env_id,
                    messages = payloads.len(),
                    "telemetry flushed"
                );
                return FlushOutcome::Sent {
                    messages: payloads.len(),
                    retried: false,
                };
            }
            Err(e) => e,
        };

        debug!(env_id = self.identity.env_id, error = %first_err, "telemetry send failed, reconnecting");
        if !self.reconnect() {
            return FlushOutcome::Failed;
        }
        match self.send_all(&payloads) {
            Ok(()) => FlushOutcome::Sent {
                messages: payloads.len(),
                retried: true,
            },
            Err(e) => {
                warn!(env_id = self.identity.env_id, error = %e, "telemetry retry failed");
                if let Some(mut conn) = self.connection.take() {
                    conn.close();
                }
                self.state = StreamState::Disconnected;
                FlushOutcome::Failed
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }
        self.state = StreamState::Disabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Position;
    use crate::counter::RunId;
    use std::sync::{Arc, Mutex};

    /// Scripted collector: `connects` and `sends` are consumed front to back,
    /// `true` meaning success. Exhausted scripts succeed.
    #[derive(Default)]
    struct Script {
        connects: Vec<bool>,
        sends: Vec<bool>,
        delivered: Vec<String>,
        connect_calls: usize,
        closes: usize,
    }

    #[derive(Clone, Default)]
    struct Fake(Arc<Mutex<Script>>);

    impl Fake {
        fn with(connects: &[bool], sends: &[bool]) -> Self {
            let fake = Fake::default();
            {
                let mut s = fake.0.lock().unwrap();
                s.connects = connects.iter().rev().copied().collect();
                s.sends = sends.iter().rev().copied().collect();
            }
            fake
        }
    }

    struct FakeConn(Arc<Mutex<Script>>);

    impl Connection for FakeConn {
        fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
            let mut s = self.0.lock().unwrap();
            if s.sends.pop().unwrap_or(true) {
                s.delivered.push(payload.to_string());
                Ok(())
            } else {
                Err(TransportError::Closed)
            }
        }

        fn close(&mut self) {
            self.0.lock().unwrap().closes += 1;
        }
    }

    impl Connector for Fake {
        fn endpoint(&self) -> &str {
            "fake://collector"
        }

        fn connect(&mut self) -> Result<Box<dyn Connection>, TransportError> {
            let mut s = self.0.lock().unwrap();
            s.connect_calls += 1;
            if s.connects.pop().unwrap_or(true) {
                Ok(Box::new(FakeConn(self.0.clone())))
            } else {
                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )))
            }
        }
    }

    fn streamer(fake: &Fake) -> Streamer {
        let identity = StreamIdentity {
            user: "u".to_string(),
            color: "#800080".to_string(),
            extra: String::new(),
            run_id: RunId::current(),
            env_id: 0,
        };
        Streamer::new(identity, Box::new(fake.clone()))
    }

    fn samples(n: usize) -> CoordinateBuffers {
        let mut c = CoordinateBuffers::new(n);
        let positions: Vec<_> = (0..n as i32).map(|i| Position::new(i + 1, 2, 3)).collect();
        c.record(&positions);
        c
    }

    #[test]
    fn connected_flush_sends_one_message_per_instance() {
        let fake = Fake::default();
        let mut s = streamer(&fake);
        assert!(s.connect());
        let mut coords = samples(3);
        assert_eq!(
            s.flush(&mut coords),
            FlushOutcome::Sent {
                messages: 3,
                retried: false
            }
        );
        assert!(coords.is_empty());
        assert_eq!(fake.0.lock().unwrap().delivered.len(), 3);
        assert_eq!(s.stats().messages_sent, 3);
    }

    #[test]
    fn disconnected_flush_connects_and_drops_interval() {
        let fake = Fake::with(&[false, true], &[]);
        let mut s = streamer(&fake);
        assert!(!s.connect());
        assert_eq!(s.state(), StreamState::Disconnected);

        let mut coords = samples(2);
        assert_eq!(s.flush(&mut coords), FlushOutcome::NotConnected);
        assert!(coords.is_empty());
        assert_eq!(s.state(), StreamState::Connected);
        assert!(fake.0.lock().unwrap().delivered.is_empty());
        assert_eq!(s.stats().intervals_dropped, 1);
    }

    #[test]
    fn send_failure_retries_once_after_reconnect() {
        let fake = Fake::with(&[true, true], &[false]);
        let mut s = streamer(&fake);
        s.connect();
        let mut coords = samples(2);
        assert_eq!(
            s.flush(&mut coords),
            FlushOutcome::Sent {
                messages: 2,
                retried: true
            }
        );
        let script = fake.0.lock().unwrap();
        assert_eq!(script.connect_calls, 2);
        assert_eq!(script.delivered.len(), 2);
        assert_eq!(script.closes, 1);
        assert!(coords.is_empty());
    }

    #[test]
    fn retry_failure_clears_and_disconnects() {
        let fake = Fake::with(&[true, true], &[false, false]);
        let mut s = streamer(&fake);
        s.connect();
        let mut coords = samples(1);
        assert_eq!(s.flush(&mut coords), FlushOutcome::Failed);
        assert!(coords.is_empty());
        assert_eq!(s.state(), StreamState::Disconnected);
        assert_eq!(fake.0.lock().unwrap().connect_calls, 2);
    }

    #[test]
    fn failed_reconnect_does_not_retry() {
        let fake = Fake::with(&[true, false], &[false]);
        let mut s = streamer(&fake);
        s.connect();
        let mut coords = samples(1);
        assert_eq!(s.flush(&mut coords), FlushOutcome::Failed);
        assert_eq!(s.state(), StreamState::Disconnected);
        assert!(fake.0.lock().unwrap().delivered.is_empty());
    }

    #[test]
    fn empty_interval_sends_nothing() {
        let fake = Fake::default();
        let mut s = streamer(&fake);
        s.connect();
        let mut coords = CoordinateBuffers::new(2);
        assert_eq!(s.flush(&mut coords), FlushOutcome::Empty);
    }

    #[test]
    fn close_disables_for_good() {
        let fake = Fake::default();
        let mut s = streamer(&fake);
        s.connect();
        s.close();
        assert_eq!(s.state(), StreamState::Disabled);
        assert_eq!(fake.0.lock().unwrap().closes, 1);
        assert!(!s.connect());
        let mut coords = samples(1);
        assert_eq!(s.flush(&mut coords), FlushOutcome::Disabled);
        assert!(coords.is_empty());
        s.close();
        assert_eq!(fake.0.lock().unwrap().closes, 1);
    }
}
