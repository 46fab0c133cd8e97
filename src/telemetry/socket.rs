//! Trait abstractions for the telemetry output path to enable testing

use std::io;
use std::net::{SocketAddr, UdpSocket};

use tracing::error;

/// Trait for datagram send operations
#[cfg_attr(test, mockall::automock)]
pub trait DatagramSink {
    /// Send one datagram to `addr` without blocking
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }
}

/// Consumer of the channel vector on each telemetry tick
pub trait ChannelSink {
    /// Ship the current channel values
    fn send(&mut self, channels: &[u16]);
}

/// Binds an ephemeral non-blocking IPv4 UDP socket
pub fn bind_nonblocking() -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| {
        error!("could not create socket: {}", e);
        e
    })?;
    socket.set_nonblocking(true).map_err(|e| {
        error!("could not set socket non-blocking: {}", e);
        e
    })?;

    Ok(socket)
}
