//! # Input Adapter
//!
//! Turns raw controller events into the channel vector sent as telemetry.
//!
//! The adapter owns the opened device, the per-axis ranges captured when the
//! device was opened, and the channel vector itself. It registers two
//! sources with the reactor:
//!
//! - the device descriptor, handled by [`InputAdapter::on_device_ready`]
//! - a periodic timer, handled by [`InputAdapter::on_timer_ready`]
//!
//! Only the device callback writes the channel vector and only the timer
//! callback reads it. Both run on the reactor thread, one at a time.

use std::io;
use std::os::fd::RawFd;
use std::path::Path;
use std::time::Duration;

use evdev::InputEventKind;
use tracing::{debug, error, info, trace, warn};

use super::device::{decode_events, EvdevDevice, InputDevice, EVENT_SIZE};
use super::profile::{ControllerProfile, SkyController2};
use super::scaling::{scale_axis, toggle_button, AxisRange, CHANNEL_VALUE_MIN};
use crate::error::{DemaRcError, Result};
use crate::reactor::{read_expirations, Reactor, Readiness, SourceKey, TimerKey};
use crate::telemetry::ChannelSink;

/// Records read from the device per readiness event.
pub const READ_BATCH: usize = 64;

/// Default telemetry cadence.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(10);

/// Controller profile used when none is given.
pub static DEFAULT_PROFILE: SkyController2 = SkyController2;

/// Startup options for [`InputAdapter`].
#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    /// Request exclusive access to the device.
    pub grab: bool,
    /// Telemetry timer interval.
    pub interval: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            grab: true,
            interval: DEFAULT_UPDATE_INTERVAL,
        }
    }
}

/// Reactor tags for the two sources the adapter registers.
#[derive(Debug, Clone, Copy)]
pub struct AdapterTags<T> {
    /// Tag of the device source.
    pub device: T,
    /// Tag of the telemetry timer.
    pub timer: T,
}

/// Device input adapter.
pub struct InputAdapter<D: InputDevice> {
    device: Option<D>,
    profile: &'static dyn ControllerProfile,
    ranges: Vec<AxisRange>,
    channels: Vec<u16>,
    device_key: Option<SourceKey>,
    timer_key: Option<TimerKey>,
    hangup_reported: bool,
}

impl<D: InputDevice> std::fmt::Debug for InputAdapter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputAdapter")
            .field("profile", &self.profile.name())
            .field("channels", &self.channels)
            .field("registered", &self.device_key.is_some())
            .finish_non_exhaustive()
    }
}

impl InputAdapter<EvdevDevice> {
    /// Opens the controller and registers it with the reactor.
    ///
    /// With no `device_path`, `/dev/input` is scanned for the first device
    /// matching the default profile.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpen` or `ControllerNotFound` if no device could be
    /// opened, otherwise any error from [`InputAdapter::initialize`].
    pub fn open<T: Copy>(
        reactor: &mut Reactor<T>,
        device_path: Option<&Path>,
        options: AdapterOptions,
        tags: AdapterTags<T>,
    ) -> Result<Self> {
        let device = match device_path {
            Some(path) => EvdevDevice::open(path),
            None => EvdevDevice::discover(&DEFAULT_PROFILE),
        }
        .map_err(|e| {
            error!("{}", e);
            e
        })?;

        info!("Using input device {}", device.path().display());
        Self::initialize(reactor, device, &DEFAULT_PROFILE, options, tags)
    }
}

impl<D: InputDevice> InputAdapter<D> {
    /// Validates `device` against `profile` and registers it with the reactor.
    ///
    /// Steps, in order:
    ///
    /// 1. exclusive grab if requested (failure only logs a warning)
    /// 2. absolute-axis capability check
    /// 3. axis range capture; every profile axis must be present
    /// 4. device source registration
    /// 5. telemetry timer creation
    ///
    /// # Errors
    ///
    /// - `UnsupportedDevice`: no `EV_ABS` capability
    /// - `InsufficientAxes`: some profile axis is missing
    /// - `Io`: the axis state query failed
    /// - `Sys` / `InvalidInterval`: the reactor rejected a source
    ///
    /// Nothing stays registered with the reactor on error.
    pub fn initialize<T: Copy>(
        reactor: &mut Reactor<T>,
        mut device: D,
        profile: &'static dyn ControllerProfile,
        options: AdapterOptions,
        tags: AdapterTags<T>,
    ) -> Result<Self> {
        let name = device.name().unwrap_or("unnamed").to_string();

        if options.grab {
            match device.grab() {
                Ok(()) => debug!("Grabbed {}", name),
                Err(e) => warn!("Could not grab {}: {}", name, e),
            }
        }

        if !device.supports_absolute_axes() {
            error!("EV_ABS events not supported by {}", name);
            return Err(DemaRcError::UnsupportedDevice(name));
        }

        let mut ranges: Vec<Option<AxisRange>> = vec![None; profile.axis_count()];
        let mut channels = vec![CHANNEL_VALUE_MIN; profile.channel_count()];

        for info in device.absolute_axes()? {
            let Some(index) = profile.axis_for(info.axis) else {
                trace!("Ignoring axis {:?}", info.axis);
                continue;
            };

            ranges[index] = Some(info.range);
            channels[index] = scale_axis(info.value, info.range);
            debug!(
                "Axis {:?} -> CH{} range [{}, {}]",
                info.axis,
                index + 1,
                info.range.min,
                info.range.max
            );
        }

        let found = ranges.iter().filter(|r| r.is_some()).count();
        if found < profile.axis_count() {
            error!("Not all required axes supported by {}", name);
            return Err(DemaRcError::InsufficientAxes {
                found,
                required: profile.axis_count(),
            });
        }
        let ranges: Vec<AxisRange> = ranges.into_iter().flatten().collect();

        let device_key = reactor.register(&device, tags.device, Readiness::READABLE)?;
        let timer_key = match reactor.create_timer(options.interval, tags.timer) {
            Ok(key) => key,
            Err(e) => {
                if let Err(e) = reactor.unregister(device_key, &device) {
                    error!("Could not roll back device source: {}", e);
                }
                return Err(e);
            }
        };

        info!("{} ready: {} ({} channels)", profile.name(), name, channels.len());

        Ok(Self {
            device: Some(device),
            profile,
            ranges,
            channels,
            device_key: Some(device_key),
            timer_key: Some(timer_key),
            hangup_reported: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn channels(&self) -> &[u16] {
        &self.channels
    }

    /// Reads one batch of events and applies them to the channel vector.
    ///
    /// A read shorter than one record is dropped whole. A wake without
    /// "readable" changes nothing; the first hang-up or error is logged.
    pub fn on_device_ready(&mut self, readiness: Readiness) {
        if !readiness.is_readable() {
            if readiness.is_hangup() && !self.hangup_reported {
                warn!("Input device hung up, was it disconnected?");
                self.hangup_reported = true;
            }
            return;
        }
        let Some(device) = self.device.as_mut() else {
            return;
        };

        let mut buf = [0u8; EVENT_SIZE * READ_BATCH];
        let len = match device.read_events(&mut buf) {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                error!("Could not read input events: {}", e);
                return;
            }
        };

        if len < EVENT_SIZE {
            warn!("Short read: got {} bytes, expected at least {}", len, EVENT_SIZE);
            return;
        }

        for event in decode_events(&buf[..len]) {
            match event.kind() {
                InputEventKind::AbsAxis(axis) => match self.profile.axis_for(axis) {
                    Some(index) => {
                        self.channels[index] = scale_axis(event.value(), self.ranges[index]);
                    }
                    None => debug!("Unknown axis code {}", axis.0),
                },
                InputEventKind::Key(key) => match self.profile.button_for(key) {
                    // Release events carry no state change
                    Some(_) if event.value() == 0 => {}
                    Some(button) => {
                        let index = self.profile.axis_count() + button;
                        self.channels[index] = toggle_button(self.channels[index]);
                    }
                    None => debug!("Unknown key code {}", key.code()),
                },
                _ => {}
            }
        }
    }

    /// Handles a timer wake: sends the current channel vector once if the
    /// timer expired at least once since the last read.
    pub fn on_timer_ready<S: ChannelSink + ?Sized>(&mut self, timer_fd: RawFd, sink: &mut S) {
        match read_expirations(timer_fd) {
            Ok(0) => trace!("Spurious timer wake"),
            Ok(expirations) => {
                if expirations > 1 {
                    trace!("Timer expired {} times since last wake", expirations);
                }
                sink.send(&self.channels);
            }
            Err(e) => error!("Could not read timer: {}", e),
        }
    }

    /// Removes both sources from the reactor and closes the device.
    ///
    /// Idempotent.
    pub fn shutdown<T: Copy>(&mut self, reactor: &mut Reactor<T>) {
        if let Some(key) = self.timer_key.take() {
            if let Err(e) = reactor.remove_timer(key) {
                error!("Could not remove telemetry timer: {}", e);
            }
        }

        if let (Some(key), Some(device)) = (self.device_key.take(), self.device.as_ref()) {
            if let Err(e) = reactor.unregister(key, device) {
                error!("Could not unregister input device: {}", e);
            }
        }

        if self.device.take().is_some() {
            debug!("Input device closed");
        }
    }
}
