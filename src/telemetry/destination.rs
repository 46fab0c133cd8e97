//! Telemetry destination parsing.
//!
//! Accepts `"host[:port]"`. The host may be a dotted IPv4 address or a name
//! resolving to one; an empty host or no string at all means `127.0.0.1`,
//! a missing port means `777`.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

use tracing::error;

use crate::error::{DemaRcError, Result};

/// Host used when none is given.
pub const DEFAULT_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Port used when none is given.
pub const DEFAULT_PORT: u16 = 777;

/// Resolved IPv4 address telemetry packets are sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination(SocketAddrV4);

impl Default for Destination {
    fn default() -> Self {
        Self(SocketAddrV4::new(DEFAULT_HOST, DEFAULT_PORT))
    }
}

impl Destination {
    /// Parses an optional `"host[:port]"` string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDestination` if the port is not a decimal `u16` or
    /// the host does not resolve to an IPv4 address.
    ///
    /// # Examples
    ///
    /// ```
    /// use dema_rc::telemetry::destination::Destination;
    ///
    /// let dest = Destination::parse(Some("192.168.1.2:14550"))?;
    /// assert_eq!(dest.to_string(), "192.168.1.2:14550");
    ///
    /// let dest = Destination::parse(None)?;
    /// assert_eq!(dest.to_string(), "127.0.0.1:777");
    /// # Ok::<(), dema_rc::error::DemaRcError>(())
    /// ```
    pub fn parse(dest: Option<&str>) -> Result<Self> {
        let Some(dest) = dest else {
            return Ok(Self::default());
        };

        let invalid = || {
            error!("could not parse address {}", dest);
            DemaRcError::InvalidDestination(dest.to_string())
        };

        let (host, port) = match dest.split_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (dest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Ok(Self(SocketAddrV4::new(DEFAULT_HOST, port)));
        }

        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Self(SocketAddrV4::new(ip, port)));
        }

        (host, port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(Self(v4)),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(invalid)
    }

    /// Socket address to send to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
