//! # Telemetry Encoder
//!
//! Owns the outbound socket and ships one packet per telemetry tick.
//!
//! Sending is fire-and-forget:
//!
//! | Send result | Action |
//! |-------------|--------|
//! | would block | dropped silently |
//! | connection refused / network unreachable | `debug!` at most once per 5 s of continued failure |
//! | any other error | `error!` every time |
//!
//! Nothing is queued or retried; the next tick sends fresh values.

use std::io;
use std::net::UdpSocket;

use tracing::{debug, error, info};

use super::destination::Destination;
use super::packet::{TelemetryPacket, WireFormat};
use super::socket::{bind_nonblocking, ChannelSink, DatagramSink};
use crate::error::Result;
use crate::util::{now_usec, USEC_PER_SEC};

/// Quiet period between two "unreachable" log lines.
pub const UNREACHABLE_LOG_INTERVAL_US: u64 = 5 * USEC_PER_SEC;

/// Rate limiter for unreachable-destination log lines.
#[derive(Debug, Clone, Copy, Default)]
struct UnreachableLog {
    failing_since: Option<u64>,
    last_report: Option<u64>,
}

impl UnreachableLog {
    /// Records a failure at `now`; returns `true` if it should be logged.
    fn should_report(&mut self, now: u64) -> bool {
        let since = *self.failing_since.get_or_insert(now);
        let anchor = self.last_report.unwrap_or(since);

        if now.saturating_sub(anchor) >= UNREACHABLE_LOG_INTERVAL_US {
            self.last_report = Some(now);
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(nix::libc::ECONNREFUSED) | Some(nix::libc::ENETUNREACH)
    )
}

/// Telemetry encoder.
///
/// # Examples
///
/// ```no_run
/// use dema_rc::telemetry::{TelemetryEncoder, WireFormat};
///
/// let mut encoder = TelemetryEncoder::initialize(Some("127.0.0.1:777"), WireFormat::Simple)?;
/// encoder.send(&[1500; 16]);
/// encoder.shutdown();
/// # Ok::<(), dema_rc::error::DemaRcError>(())
/// ```
pub struct TelemetryEncoder<S: DatagramSink = UdpSocket> {
    sink: Option<S>,
    destination: Destination,
    packet: TelemetryPacket,
    unreachable: UnreachableLog,
}

impl<S: DatagramSink> std::fmt::Debug for TelemetryEncoder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryEncoder")
            .field("destination", &self.destination)
            .field("format", &self.packet.format())
            .field("open", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl TelemetryEncoder<UdpSocket> {
    /// Parses `dest` and opens a non-blocking UDP socket.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDestination` for a malformed destination or `Io` if
    /// the socket cannot be created.
    pub fn initialize(dest: Option<&str>, format: WireFormat) -> Result<Self> {
        let destination = Destination::parse(dest)?;
        let socket = bind_nonblocking()?;

        info!("Sending {} telemetry to {}", format, destination);
        Ok(Self::with_sink(socket, destination, format))
    }
}

impl<S: DatagramSink> TelemetryEncoder<S> {
    /// Creates an encoder over an already-open sink.
    #[must_use]
    pub fn with_sink(sink: S, destination: Destination, format: WireFormat) -> Self {
        Self {
            sink: Some(sink),
            destination,
            packet: TelemetryPacket::new(format),
            unreachable: UnreachableLog::default(),
        }
    }

    /// Where packets are sent.
    #[must_use]
    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Layout of outgoing packets.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.packet.format()
    }

    #[cfg(test)]
    fn sequence(&self) -> u16 {
        self.packet.sequence()
    }

    /// Encodes `values` and sends one packet. No-op after shutdown.
    pub fn send(&mut self, values: &[u16]) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        self.packet.fill(values);
        let now = now_usec();
        if self.packet.format() == WireFormat::Simple {
            self.packet.stamp(now);
        }

        match sink.send_to(self.packet.encode(), self.destination.addr()) {
            Ok(_) => self.unreachable.clear(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if is_unreachable(&e) => {
                if self.unreachable.should_report(now) {
                    debug!("5s without sending update to {}: {}", self.destination, e);
                }
            }
            Err(e) => error!("could not send packet {}: {}", self.packet.sequence(), e),
        }
    }

    /// Closes the socket. Idempotent.
    pub fn shutdown(&mut self) {
        if self.sink.take().is_some() {
            debug!("Telemetry socket closed");
        }
    }
}

impl<S: DatagramSink> ChannelSink for TelemetryEncoder<S> {
    fn send(&mut self, channels: &[u16]) {
        TelemetryEncoder::send(self, channels);
    }
}
