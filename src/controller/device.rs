//! # Input Device Module
//!
//! Opens the controller's evdev node and exposes the capability queries and
//! raw reads the adapter needs.
//!
//! The adapter reads the descriptor itself rather than going through
//! `evdev::Device::fetch_events`, because a short read must be discarded
//! without touching any state. Records are decoded from the kernel's
//! `struct input_event` layout:
//!
//! ```text
//! struct timeval time;   // 16 bytes on 64-bit
//! __u16 type;
//! __u16 code;
//! __s32 value;
//! ```

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};

use evdev::{AbsoluteAxisType, Device, EventType, InputEvent};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;
use tracing::{debug, info};

use super::profile::ControllerProfile;
use super::scaling::AxisRange;
use crate::error::{DemaRcError, Result};

/// Size of one kernel `struct input_event` record.
pub const EVENT_SIZE: usize = std::mem::size_of::<nix::libc::input_event>();

/// Directory scanned when no device path is configured.
const INPUT_DIR: &str = "/dev/input";

/// One absolute axis as reported by the device at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsAxisInfo {
    /// Axis code.
    pub axis: AbsoluteAxisType,
    /// Reported `[min, max]`.
    pub range: AxisRange,
    /// Current raw value.
    pub value: i32,
}

/// Capability and read interface of an input device.
///
/// Implemented for real evdev nodes by [`EvdevDevice`]; tests use a
/// scripted double backed by a socket pair.
pub trait InputDevice: AsFd {
    /// Device name, if it reports one.
    fn name(&self) -> Option<&str>;

    /// Requests exclusive access to the device's events.
    fn grab(&mut self) -> io::Result<()>;

    /// Returns `true` if the device emits `EV_ABS` events.
    fn supports_absolute_axes(&self) -> bool;

    /// Lists every supported absolute axis with its range and current value.
    fn absolute_axes(&self) -> io::Result<Vec<AbsAxisInfo>>;

    /// Reads raw `input_event` records into `buf`. Never blocks.
    fn read_events(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Decodes every complete record in `buf`; trailing partial bytes are ignored.
pub fn decode_events(buf: &[u8]) -> impl Iterator<Item = InputEvent> + '_ {
    buf.chunks_exact(EVENT_SIZE).map(decode_event)
}

fn decode_event(record: &[u8]) -> InputEvent {
    // Fields follow the timeval header
    let base = EVENT_SIZE - 8;
    let kind = u16::from_ne_bytes([record[base], record[base + 1]]);
    let code = u16::from_ne_bytes([record[base + 2], record[base + 3]]);
    let value = i32::from_ne_bytes([
        record[base + 4],
        record[base + 5],
        record[base + 6],
        record[base + 7],
    ]);

    InputEvent::new(EventType(kind), code, value)
}

/// Controller opened through evdev.
pub struct EvdevDevice {
    device: Device,
    path: PathBuf,
}

impl std::fmt::Debug for EvdevDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvdevDevice")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl EvdevDevice {
    /// Opens `path` in non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns `DeviceOpen` if the node cannot be opened or switched to
    /// non-blocking mode.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dema_rc::controller::device::EvdevDevice;
    ///
    /// let device = EvdevDevice::open("/dev/input/event3")?;
    /// println!("Opened {}", device.path().display());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source: io::Error| DemaRcError::DeviceOpen {
            path: path.clone(),
            source,
        };

        let device = Device::open(&path).map_err(open_error)?;
        set_nonblocking(&device).map_err(open_error)?;

        Ok(Self { device, path })
    }

    /// Finds the first `/dev/input/event*` node that fits `profile`.
    ///
    /// Nodes are tried in sorted order so the choice is deterministic when
    /// several controllers are connected.
    ///
    /// # Errors
    ///
    /// - `ControllerNotFound`: no node exposes every axis the profile needs
    /// - `Io`: `/dev/input` cannot be listed
    pub fn discover(profile: &dyn ControllerProfile) -> Result<Self> {
        Self::discover_in(Path::new(INPUT_DIR), profile)
    }

    fn discover_in(dir: &Path, profile: &dyn ControllerProfile) -> Result<Self> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with("event"))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();

        for path in entries {
            let device = match Self::open(&path) {
                Ok(device) => device,
                Err(e) => {
                    // Permission denied or other errors - skip device
                    debug!("{}", e);
                    continue;
                }
            };

            debug!(
                "Found input device: {} ({})",
                path.display(),
                device.name().unwrap_or("unnamed")
            );

            if fits_profile(&device, profile) {
                info!("Found {} compatible controller at: {}", profile.name(), path.display());
                return Ok(device);
            }
        }

        Err(DemaRcError::ControllerNotFound)
    }

    /// Path this device was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsFd for EvdevDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor is owned by `self.device` and stays open
        // for as long as `self` is borrowed.
        unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) }
    }
}

impl InputDevice for EvdevDevice {
    fn name(&self) -> Option<&str> {
        self.device.name()
    }

    fn grab(&mut self) -> io::Result<()> {
        self.device.grab()
    }

    fn supports_absolute_axes(&self) -> bool {
        self.device.supported_events().contains(EventType::ABSOLUTE)
    }

    fn absolute_axes(&self) -> io::Result<Vec<AbsAxisInfo>> {
        let Some(axes) = self.device.supported_absolute_axes() else {
            return Ok(Vec::new());
        };
        let state = self.device.get_abs_state()?;

        Ok(axes
            .iter()
            .filter_map(|axis| {
                state.get(usize::from(axis.0)).map(|info| AbsAxisInfo {
                    axis,
                    range: AxisRange::new(info.minimum, info.maximum),
                    value: info.value,
                })
            })
            .collect())
    }

    fn read_events(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        unistd::read(self.device.as_raw_fd(), buf).map_err(io::Error::from)
    }
}

fn set_nonblocking(device: &Device) -> io::Result<()> {
    let fd = device.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Returns `true` if the device exposes every axis `profile` requires.
fn fits_profile<D: InputDevice>(device: &D, profile: &dyn ControllerProfile) -> bool {
    if !device.supports_absolute_axes() {
        return false;
    }

    let mut matched = vec![false; profile.axis_count()];
    if let Ok(axes) = device.absolute_axes() {
        for info in axes {
            if let Some(index) = profile.axis_for(info.axis) {
                matched[index] = true;
            }
        }
    }

    matched.iter().all(|&m| m)
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    /// Encodes one `input_event` record the way the kernel lays it out.
    pub fn encode_event(kind: EventType, code: u16, value: i32) -> Vec<u8> {
        let mut record = vec![0u8; EVENT_SIZE];
        let base = EVENT_SIZE - 8;
        record[base..base + 2].copy_from_slice(&kind.0.to_ne_bytes());
        record[base + 2..base + 4].copy_from_slice(&code.to_ne_bytes());
        record[base + 4..base + 8].copy_from_slice(&value.to_ne_bytes());
        record
    }

    /// Device double whose reads come from a datagram socket.
    ///
    /// Each datagram written to the peer is returned by exactly one
    /// `read_events` call, so tests control read boundaries precisely.
    #[derive(Debug)]
    pub struct ScriptedDevice {
        socket: UnixDatagram,
        pub absolute: bool,
        pub axes: Vec<AbsAxisInfo>,
        pub grab_error: Option<io::ErrorKind>,
        pub grabbed: bool,
    }

    impl ScriptedDevice {
        /// Creates a device reporting `axes`, plus the peer used to feed it.
        pub fn new(axes: Vec<AbsAxisInfo>) -> (Self, UnixDatagram) {
            let (socket, peer) = UnixDatagram::pair().unwrap();
            socket.set_nonblocking(true).unwrap();

            let device = Self {
                socket,
                absolute: true,
                axes,
                grab_error: None,
                grabbed: false,
            };
            (device, peer)
        }
    }

    impl AsFd for ScriptedDevice {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.socket.as_fd()
        }
    }

    impl InputDevice for ScriptedDevice {
        fn name(&self) -> Option<&str> {
            Some("Scripted Controller")
        }

        fn grab(&mut self) -> io::Result<()> {
            if let Some(kind) = self.grab_error {
                return Err(io::Error::new(kind, "Mock grab error"));
            }
            self.grabbed = true;
            Ok(())
        }

        fn supports_absolute_axes(&self) -> bool {
            self.absolute
        }

        fn absolute_axes(&self) -> io::Result<Vec<AbsAxisInfo>> {
            Ok(self.axes.clone())
        }

        fn read_events(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.socket.recv(buf)
        }
    }
}
