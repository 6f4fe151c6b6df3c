//! Host stand-in for the point-to-point radio.
//!
//! One UDP datagram carries one frame. The receiver answers every datagram
//! with [`LINK_ACK`] before looking at its content, the way a radio MAC layer
//! acknowledges a frame it heard.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use crate::node::transport::{Confirmation, Radio, RadioError};

/// Link-level acknowledgement byte.
pub const LINK_ACK: u8 = 0x06;

/// Largest datagram the link accepts. Anything longer is truncated and then
/// rejected by the frame length check.
pub const MAX_DATAGRAM: usize = 64;

/// Node side of the link.
#[derive(Debug)]
pub struct UdpRadio {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
}

impl UdpRadio {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<UdpRadio> {
        Ok(UdpRadio {
            socket: UdpSocket::bind(addr)?,
            peers: Vec::new(),
        })
    }

    pub fn register_peer(&mut self, peer: SocketAddr) {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Discard acknowledgements left over from earlier, timed out sends.
    fn drain_stale(&self) -> io::Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        self.socket.set_nonblocking(true)?;
        let drained = loop {
            match self.socket.recv_from(&mut buf) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.socket.set_nonblocking(false)?;
        drained
    }
}

impl Radio for UdpRadio {
    type Address = SocketAddr;

    fn is_initialized(&self) -> bool {
        true
    }

    fn is_peer_registered(&self, peer: &SocketAddr) -> bool {
        self.peers.contains(peer)
    }

    fn transmit(&mut self, peer: &SocketAddr, frame: &[u8]) -> Result<(), RadioError> {
        self.drain_stale()?;
        self.socket.send_to(frame, peer)?;
        Ok(())
    }

    fn await_confirmation(&mut self, timeout: Duration) -> Result<Confirmation, RadioError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Confirmation::TimedOut);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            match self.socket.recv_from(&mut buf) {
                Ok((1, from)) if buf[0] == LINK_ACK && self.peers.contains(&from) => {
                    return Ok(Confirmation::Delivered);
                }
                Ok((len, from)) => {
                    tracing::debug!(len, %from, "ignoring datagram while awaiting ack");
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(Confirmation::TimedOut);
                }
                // ICMP port unreachable surfaces as a refused connection.
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    return Ok(Confirmation::Failed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
