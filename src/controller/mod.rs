//! # Controller Module
//!
//! Controller input handling.
//!
//! This module handles:
//! - Opening the controller via evdev, or finding it under `/dev/input`
//! - Mapping device codes to channels through a [`profile::ControllerProfile`]
//! - Scaling axes and toggling buttons
//! - Driving telemetry sends from the adapter's timer

pub mod adapter;
pub mod device;
pub mod profile;
pub mod scaling;

pub use adapter::{AdapterOptions, AdapterTags, InputAdapter};
pub use device::{EvdevDevice, InputDevice};
pub use profile::{ControllerProfile, SkyController2};
