//! # Application Module
//!
//! Wires the reactor, the stop source, the input adapter and the telemetry
//! encoder together.
//!
//! ## Startup order
//!
//! 1. reactor
//! 2. stop source (SIGINT/SIGTERM)
//! 3. input adapter: device, axis ranges, device source, telemetry timer
//! 4. telemetry encoder
//!
//! A failing step tears down everything started before it. After
//! [`App::run`] returns, [`App::shutdown`] releases the parts in reverse.

use std::net::UdpSocket;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::cli::Args;
use crate::config::Config;
use crate::controller::{AdapterOptions, AdapterTags, EvdevDevice, InputAdapter, InputDevice};
use crate::error::Result;
use crate::reactor::Reactor;
use crate::signal::StopSignal;
use crate::telemetry::{DatagramSink, TelemetryEncoder, WireFormat};

/// What a reactor source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    /// Controller event node.
    Device,
    /// Telemetry cadence timer.
    Telemetry,
    /// SIGINT/SIGTERM signalfd.
    Stop,
}

/// Tags the adapter registers its sources under.
pub const ADAPTER_TAGS: AdapterTags<SourceTag> = AdapterTags {
    device: SourceTag::Device,
    timer: SourceTag::Telemetry,
};

/// Effective settings after merging command line and config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Device node; `None` scans `/dev/input`.
    pub input_device: Option<PathBuf>,
    /// `host[:port]`; `None` uses the default destination.
    pub destination: Option<String>,
    /// Request exclusive access to the device.
    pub grab_device: bool,
    /// Outbound packet layout.
    pub output_format: WireFormat,
    /// Telemetry cadence.
    pub update_interval: Duration,
}

impl Settings {
    /// Merges `args` over `config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file names an unknown output format.
    pub fn resolve(args: &Args, config: &Config) -> Result<Self> {
        let output_format = match args.output_format {
            Some(format) => format,
            None => config.wire_format()?,
        };

        Ok(Self {
            input_device: args
                .input_device
                .clone()
                .or_else(|| config.general.input_device.as_ref().map(PathBuf::from)),
            destination: args
                .destination
                .clone()
                .or_else(|| config.general.destination.clone()),
            grab_device: config.general.grab_device,
            output_format,
            update_interval: config.update_interval(),
        })
    }

    fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            grab: self.grab_device,
            interval: self.update_interval,
        }
    }
}

/// Running bridge.
pub struct App<D: InputDevice = EvdevDevice, S: DatagramSink = UdpSocket> {
    reactor: Reactor<SourceTag>,
    stop: StopSignal,
    adapter: InputAdapter<D>,
    encoder: TelemetryEncoder<S>,
}

impl<D: InputDevice, S: DatagramSink> std::fmt::Debug for App<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("reactor", &self.reactor)
            .field("adapter", &self.adapter)
            .field("encoder", &self.encoder)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Starts every component with the real device and a UDP socket.
    ///
    /// # Errors
    ///
    /// Any fatal startup error: device open, unsupported device, missing
    /// axes, malformed destination, socket or reactor failures.
    pub fn start(settings: &Settings) -> Result<Self> {
        Self::start_with(settings, |reactor, options, tags| {
            InputAdapter::open(reactor, settings.input_device.as_deref(), options, tags)
        })
    }
}

impl<D: InputDevice> App<D, UdpSocket> {
    /// Starts every component, using `open_adapter` to bring up the input side.
    ///
    /// # Errors
    ///
    /// Same as [`App::start`].
    pub fn start_with<F>(settings: &Settings, open_adapter: F) -> Result<Self>
    where
        F: FnOnce(&mut Reactor<SourceTag>, AdapterOptions, AdapterTags<SourceTag>) -> Result<InputAdapter<D>>,
    {
        let mut reactor = Reactor::new()?;
        let mut stop = StopSignal::install(&mut reactor, SourceTag::Stop)?;

        let mut adapter = match open_adapter(&mut reactor, settings.adapter_options(), ADAPTER_TAGS) {
            Ok(adapter) => adapter,
            Err(e) => {
                stop.shutdown(&mut reactor);
                return Err(e);
            }
        };

        let encoder = match TelemetryEncoder::initialize(settings.destination.as_deref(), settings.output_format) {
            Ok(encoder) => encoder,
            Err(e) => {
                adapter.shutdown(&mut reactor);
                stop.shutdown(&mut reactor);
                return Err(e);
            }
        };

        info!(
            "Forwarding every {:?} as {} to {}",
            settings.update_interval,
            encoder.format(),
            encoder.destination()
        );

        Ok(Self {
            reactor,
            stop,
            adapter,
            encoder,
        })
    }
}

impl<D: InputDevice, S: DatagramSink> App<D, S> {
    /// Runs the reactor until a stop signal arrives.
    ///
    /// # Errors
    ///
    /// Returns `Sys` if waiting on the reactor fails.
    pub fn run(&mut self) -> Result<()> {
        let Self {
            reactor,
            stop,
            adapter,
            encoder,
        } = self;

        reactor.run(|reactor, ready| match ready.tag {
            SourceTag::Device => adapter.on_device_ready(ready.readiness),
            SourceTag::Telemetry => adapter.on_timer_ready(ready.fd, &mut *encoder),
            SourceTag::Stop => stop.on_ready(reactor),
        })
    }

    /// Tears everything down in reverse startup order. Idempotent.
    pub fn shutdown(&mut self) {
        self.encoder.shutdown();
        self.adapter.shutdown(&mut self.reactor);
        self.stop.shutdown(&mut self.reactor);
        debug!("{} sources left in reactor", self.reactor.len());
    }
}
