//! # Stop Signal Source
//!
//! Delivers SIGINT/SIGTERM to the reactor as an ordinary readiness event.
//!
//! Both signals are blocked for the calling thread and read from a
//! non-blocking `signalfd`, so termination is processed through the same
//! dispatch path as any other I/O instead of interrupting a callback.

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::reactor::{Reactor, Readiness, SourceKey};

/// Signals that request termination.
pub const STOP_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

/// Reactor source that stops the loop when a termination signal arrives.
pub struct StopSignal {
    fd: SignalFd,
    key: Option<SourceKey>,
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("registered", &self.key.is_some())
            .finish_non_exhaustive()
    }
}

impl StopSignal {
    /// Blocks [`STOP_SIGNALS`] and registers a signalfd for them.
    ///
    /// # Errors
    ///
    /// Returns `Sys` if the signals cannot be blocked, the signalfd cannot be
    /// created or the reactor rejects it.
    pub fn install<T: Copy>(reactor: &mut Reactor<T>, tag: T) -> Result<Self> {
        let mut mask = SigSet::empty();
        for signal in STOP_SIGNALS {
            mask.add(signal);
        }

        mask.thread_block().map_err(|e| {
            error!("Failed to setup signals: {}", e);
            e
        })?;

        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(|e| {
                error!("Failed to setup signalfd: {}", e);
                e
            })?;

        let key = reactor.register(&fd, tag, Readiness::READABLE)?;

        Ok(Self { fd, key: Some(key) })
    }

    /// Handles readiness of the signalfd: stops the reactor if a signal was read.
    pub fn on_ready<T: Copy>(&mut self, reactor: &mut Reactor<T>) {
        match self.fd.read_signal() {
            Ok(Some(info)) => {
                info!("Received signal {}, shutting down...", info.ssi_signo);
                reactor.stop();
            }
            Ok(None) => debug!("signalfd woke without a pending signal"),
            Err(e) => error!("Could not read signalfd: {}", e),
        }
    }

    /// Unregisters the signalfd. Idempotent; the descriptor closes on drop.
    pub fn shutdown<T: Copy>(&mut self, reactor: &mut Reactor<T>) {
        if let Some(key) = self.key.take() {
            if let Err(e) = reactor.unregister(key, &self.fd) {
                error!("Could not unregister stop signal source: {}", e);
            }
        }
    }
}
