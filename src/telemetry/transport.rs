use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::config::StreamConfig;
use crate::error::TransportError;

/// An open, message-oriented link to the collector.
pub trait Connection: Send {
    fn send_text(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Best-effort; errors are swallowed.
    fn close(&mut self);
}

/// Opens connections to one collector endpoint.
pub trait Connector: Send {
    fn endpoint(&self) -> &str;

    fn connect(&mut self) -> Result<Box<dyn Connection>, TransportError>;
}

// =============================================================================
// WebSocket
// =============================================================================

pub struct WsConnector {
    endpoint: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            io_timeout,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.connect_timeout(),
            config.io_timeout(),
        )
    }

    fn endpoint_err(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Endpoint {
            endpoint: self.endpoint.clone(),
            reason: reason.into(),
        }
    }
}

impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&mut self) -> Result<Box<dyn Connection>, TransportError> {
        let request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| self.endpoint_err(e.to_string()))?;
        let uri = request.uri();
        let host = uri
            .host()
            .ok_or_else(|| self.endpoint_err("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("wss") => 443,
            _ => 80,
        });

        let stream = connect_tcp(&host, port, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        stream.set_nodelay(true)?;

        let (socket, _response) = tungstenite::client_tls(request, stream)
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        Ok(Box::new(WsConnection { socket }))
    }
}

/// Resolves and connects within one overall `timeout`. The remaining budget
/// is split evenly over the addresses not yet tried.
fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let deadline = Instant::now() + timeout;
    let addrs = resolve(host, port, deadline)?;
    let mut last_err = None;
    for (i, addr) in addrs.iter().enumerate() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let budget = remaining / (addrs.len() - i) as u32;
        match TcpStream::connect_timeout(addr, budget.max(Duration::from_millis(1))) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => TransportError::Io(e),
        None => TransportError::Endpoint {
            endpoint: format!("{host}:{port}"),
            reason: if addrs.is_empty() {
                "no addresses resolved".to_string()
            } else {
                "connect timed out".to_string()
            },
        },
    })
}

/// Name lookup has no timeout of its own, so it runs on a helper thread that
/// is abandoned once `deadline` passes.
fn resolve(host: &str, port: u16, deadline: Instant) -> Result<Vec<SocketAddr>, TransportError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    let (tx, rx) = mpsc::channel();
    let name = host.to_string();
    std::thread::Builder::new()
        .name("telemetry-dns".to_string())
        .spawn(move || {
            let result = (name.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>());
            let _ = tx.send(result);
        })?;
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::Endpoint {
            endpoint: format!("{host}:{port}"),
            reason: "name resolution timed out".to_string(),
        }),
    }
}

fn tcp_stream(stream: &MaybeTlsStream<TcpStream>) -> Option<&TcpStream> {
    match stream {
        MaybeTlsStream::Plain(s) => Some(s),
        MaybeTlsStream::Rustls(s) => Some(&s.sock),
        _ => None,
    }
}

pub struct WsConnection {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WsConnection {
    /// Reads whatever the collector sent since the last call without
    /// blocking. Pings get their pong queued by tungstenite and flushed with
    /// the next write; a close frame ends the connection.
    fn drain_incoming(&mut self) -> Result<(), TransportError> {
        if let Some(tcp) = tcp_stream(self.socket.get_ref()) {
            tcp.set_nonblocking(true)?;
        }
        let drained = self.read_pending();
        if let Some(tcp) = tcp_stream(self.socket.get_ref()) {
            tcp.set_nonblocking(false)?;
        }
        drained
    }

    fn read_pending(&mut self) -> Result<(), TransportError> {
        loop {
            match self.socket.read() {
                Ok(Message::Close(_)) => return Err(TransportError::Closed),
                Ok(_) => {}
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(());
                }
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Err(TransportError::Closed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Connection for WsConnection {
    fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
        if !self.socket.can_write() {
            return Err(TransportError::Closed);
        }
        self.drain_incoming()?;
        self.socket.send(Message::text(payload))?;
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}
