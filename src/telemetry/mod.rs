//! # Telemetry Module
//!
//! RC channel output over UDP.
//!
//! This module handles:
//! - Parsing the `host[:port]` destination
//! - Encoding the Simple and SITL wire formats
//! - Fire-and-forget sending over a non-blocking socket

pub mod destination;
pub mod encoder;
pub mod packet;
pub mod socket;

pub use destination::Destination;
pub use encoder::TelemetryEncoder;
pub use packet::{TelemetryPacket, WireFormat};
pub use socket::{ChannelSink, DatagramSink};
