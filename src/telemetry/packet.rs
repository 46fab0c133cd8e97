//! # Telemetry Packet
//!
//! Wire formats understood by the ArduPilot RC-over-UDP input.
//!
//! ## Simple (`ardupilot-udp-simple`, 30 bytes)
//!
//! | Offset | Field | Size |
//! |--------|-------|------|
//! | 0 | version (always 2) | u32 |
//! | 4 | timestamp, monotonic µs | u64 |
//! | 12 | sequence | u16 |
//! | 14 | channels\[8\] | u16 each |
//!
//! ## SITL (`ardupilot-sitl`, 16 bytes)
//!
//! | Offset | Field | Size |
//! |--------|-------|------|
//! | 0 | channels\[8\] | u16 each |
//!
//! All fields are little-endian.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::error::DemaRcError;

/// Protocol revision carried in the Simple header.
pub const RCINPUT_UDP_VERSION: u32 = 2;

/// Channels carried by both formats.
pub const RCINPUT_UDP_NUM_CHANNELS: usize = 8;

/// Simple header: version + timestamp + sequence.
const SIMPLE_HEADER_SIZE: usize = 4 + 8 + 2;

/// Size of a Simple packet.
pub const SIMPLE_PACKET_SIZE: usize = SIMPLE_HEADER_SIZE + RCINPUT_UDP_NUM_CHANNELS * 2;

/// Size of a SITL packet.
pub const SITL_PACKET_SIZE: usize = RCINPUT_UDP_NUM_CHANNELS * 2;

/// Outbound wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    /// Versioned header with timestamp and sequence.
    #[default]
    Simple,
    /// Bare channel array.
    Sitl,
}

impl WireFormat {
    /// Name used on the command line and in the config file.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            WireFormat::Simple => "ardupilot-udp-simple",
            WireFormat::Sitl => "ardupilot-sitl",
        }
    }

    /// Encoded packet size.
    #[must_use]
    pub fn packet_size(self) -> usize {
        match self {
            WireFormat::Simple => SIMPLE_PACKET_SIZE,
            WireFormat::Sitl => SITL_PACKET_SIZE,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WireFormat {
    type Err = DemaRcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(WireFormat::Simple.name()) {
            Ok(WireFormat::Simple)
        } else if s.eq_ignore_ascii_case(WireFormat::Sitl.name()) {
            Ok(WireFormat::Sitl)
        } else {
            Err(DemaRcError::Args(format!("Unknown output format: {}", s)))
        }
    }
}

/// Packet state, rewritten in place on every send.
#[derive(Debug, Clone)]
pub struct TelemetryPacket {
    format: WireFormat,
    timestamp_us: u64,
    sequence: u16,
    channels: [u16; RCINPUT_UDP_NUM_CHANNELS],
    buf: BytesMut,
}

impl TelemetryPacket {
    /// Creates a zeroed packet for `format`.
    #[must_use]
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            timestamp_us: 0,
            sequence: 0,
            channels: [0; RCINPUT_UDP_NUM_CHANNELS],
            buf: BytesMut::with_capacity(format.packet_size()),
        }
    }

    /// Layout this packet encodes to.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Sequence number of the last [`stamp`](Self::stamp).
    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Copies up to [`RCINPUT_UDP_NUM_CHANNELS`] values into the packet.
    ///
    /// Slots past `values.len()` keep what they held before.
    pub fn fill(&mut self, values: &[u16]) {
        let count = values.len().min(RCINPUT_UDP_NUM_CHANNELS);
        self.channels[..count].copy_from_slice(&values[..count]);
    }

    /// Advances the sequence counter and records the send time.
    pub fn stamp(&mut self, timestamp_us: u64) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp_us = timestamp_us;
    }

    /// Serializes the packet and returns the wire bytes.
    pub fn encode(&mut self) -> &[u8] {
        self.buf.clear();

        if self.format == WireFormat::Simple {
            self.buf.put_u32_le(RCINPUT_UDP_VERSION);
            self.buf.put_u64_le(self.timestamp_us);
            self.buf.put_u16_le(self.sequence);
        }
        for &channel in &self.channels {
            self.buf.put_u16_le(channel);
        }

        &self.buf
    }
}
