//! Gateway end of the radio link.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::link::{LINK_ACK, MAX_DATAGRAM};

/// One datagram heard on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub source: SocketAddr,
}

#[derive(Debug)]
pub struct RadioLink {
    socket: UdpSocket,
}

impl RadioLink {
    pub async fn bind(addr: SocketAddr) -> io::Result<RadioLink> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(addr = %socket.local_addr()?, "radio link listening");
        Ok(RadioLink { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for the next datagram and acknowledge it.
    ///
    /// Cancel safe: the only await point is the receive itself.
    pub async fn recv(&self) -> io::Result<Frame> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, source) = self.socket.recv_from(&mut buf).await?;

        if let Err(e) = self.socket.try_send_to(&[LINK_ACK], source) {
            tracing::warn!(%source, error = %e, "link ack not sent");
        }

        Ok(Frame {
            bytes: buf[..len].to_vec(),
            source,
        })
    }

    /// Received signal strength of the link, unknown on UDP.
    pub fn signal_quality(&self) -> Option<i32> {
        None
    }
}
