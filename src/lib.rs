//! # dema-rc Library
//!
//! Use a game controller as an RC transmitter for ArduPilot.
//!
//! This library reads absolute axes and buttons from an evdev controller,
//! turns them into RC channel values and sends them to ArduPilot's
//! RC-over-UDP input on a fixed cadence, all from one `epoll` loop.

pub mod app;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod reactor;
pub mod signal;
pub mod telemetry;
pub mod util;
