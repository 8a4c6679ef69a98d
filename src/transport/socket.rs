//! Socket transport: TCP client for duplex sessions, buffered UDP for
//! simplex datagrams.
//!
//! Simplex writes collapse into a single datagram sent on close so the
//! whole session costs one UDP packet on the wire.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error;
use crate::props::{self, PROP_COMM_HOST, PROP_COMM_PORT};

use super::{read_framed, Transport, TransportMedia, TransportType};

/// Datagram buffer bound; data past the MTU risks fragmentation.
const DATAGRAM_CAPACITY: usize = 2000;

/// Duplex read inactivity timeout.
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// TCP connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// TCP/UDP socket transport.
pub struct SocketTransport {
    kind: TransportType,
    tcp: Option<TcpStream>,
    /// Simplex target, resolved at open so close can send the datagram.
    target: Option<(String, u16)>,
    datagram: Vec<u8>,
}

impl SocketTransport {
    /// Creates a closed socket transport.
    pub fn new() -> SocketTransport {
        SocketTransport {
            kind: TransportType::None,
            tcp: None,
            target: None,
            datagram: Vec::with_capacity(DATAGRAM_CAPACITY),
        }
    }

    fn server_address() -> Result<(String, u16), error::Transport> {
        let host = props::get_string(PROP_COMM_HOST, "");
        let port = props::get_u32(PROP_COMM_PORT, 0) as u16;
        if host.is_empty() || port == 0 {
            // without a server address the client will never connect
            error!("Transport host/port not specified");
            return Err(error::Transport::OpenFailed {
                reason: "host/port not configured".to_owned(),
            });
        }
        Ok((host, port))
    }
}

impl Default for SocketTransport {
    fn default() -> SocketTransport {
        SocketTransport::new()
    }
}

impl Transport for SocketTransport {
    fn media(&self) -> TransportMedia {
        TransportMedia::Socket
    }

    fn is_open(&self) -> bool {
        self.kind != TransportType::None
    }

    fn open(&mut self, kind: TransportType) -> Result<(), error::Transport> {
        info!("Starting socket transport");
        if self.is_open() {
            warn!("Transport seems to still be open!");
            let _ = self.close(false);
        }

        let (host, port) = Self::server_address()?;
        match kind {
            TransportType::Simplex => {
                // datagram assembled in memory, sent on close
                self.target = Some((host, port));
            }
            TransportType::Duplex => {
                let addr = (host.as_str(), port)
                    .to_socket_addrs()
                    .map_err(|e| error::Transport::OpenFailed {
                        reason: format!("cannot resolve {host}: {e}"),
                    })?
                    .next()
                    .ok_or_else(|| error::Transport::OpenFailed {
                        reason: format!("cannot resolve {host}"),
                    })?;
                let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|e| {
                    error::Transport::OpenFailed {
                        reason: format!("cannot connect {host}:{port}: {e}"),
                    }
                })?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                stream.set_nodelay(true)?;
                self.tcp = Some(stream);
            }
            TransportType::None => {
                return Err(error::Transport::Unsupported);
            }
        }
        self.kind = kind;
        self.datagram.clear();
        debug!("Opened {} transport", kind.name());
        Ok(())
    }

    fn close(&mut self, send_udp: bool) -> Result<(), error::Transport> {
        if !self.is_open() {
            return Err(error::Transport::NotOpen);
        }
        debug!("{} transport close", self.kind.name());

        let mut result = Ok(());
        if send_udp && self.kind == TransportType::Simplex {
            if let Some((host, port)) = self.target.take() {
                let send = || -> std::io::Result<()> {
                    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
                    socket.send_to(&self.datagram, (host.as_str(), port))?;
                    Ok(())
                };
                if let Err(e) = send() {
                    error!("UDP datagram send failed: {e}");
                    result = Err(e.into());
                }
            }
        }

        self.tcp = None;
        self.target = None;
        self.kind = TransportType::None;
        self.datagram.clear();
        result
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, error::Transport> {
        if self.kind == TransportType::Simplex {
            error!("Cannot read from Simplex transport");
            return Err(error::Transport::Unsupported);
        }
        let Some(stream) = self.tcp.as_mut() else {
            error!("Transport is not open");
            return Err(error::Transport::NotOpen);
        };
        read_framed(stream, buf)
    }

    fn read_flush(&mut self) {}

    fn write_packet(&mut self, data: &[u8]) -> Result<usize, error::Transport> {
        if !self.is_open() {
            error!("Transport is not open");
            return Err(error::Transport::NotOpen);
        }
        if data.is_empty() {
            return Ok(0);
        }
        match self.kind {
            TransportType::Simplex => {
                if self.datagram.len() + data.len() > DATAGRAM_CAPACITY {
                    return Err(error::Transport::WriteFailed);
                }
                self.datagram.extend_from_slice(data);
                Ok(data.len())
            }
            TransportType::Duplex => {
                let stream = self.tcp.as_mut().ok_or(error::Transport::NotOpen)?;
                stream.write_all(data).map_err(|e| {
                    error!("Socket write error: {e}");
                    error::Transport::WriteFailed
                })?;
                Ok(data.len())
            }
            TransportType::None => Err(error::Transport::NotOpen),
        }
    }
}
