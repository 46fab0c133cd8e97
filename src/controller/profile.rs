//! # Controller Profile Module
//!
//! Static tables mapping evdev codes to logical channels.
//!
//! A profile isolates everything controller-specific: which absolute axes the
//! device must expose and which key codes count as buttons. Supporting a
//! different controller means adding a new [`ControllerProfile`], nothing in
//! the reactor or the telemetry encoder changes.
//!
//! ## SkyController 2
//!
//! | Channel | Input | evdev Code |
//! |---------|-------|------------|
//! | CH1 | Roll | ABS_Z |
//! | CH2 | Pitch | ABS_RX |
//! | CH3 | Throttle | ABS_Y |
//! | CH4 | Yaw | ABS_X |
//! | CH5 | Left aux wheel | ABS_RY |
//! | CH6 | Button A | BTN_SOUTH |
//! | CH7 | Button B | BTN_EAST |
//! | CH8 | Button X | BTN_NORTH |
//! | CH9 | Button Y | BTN_WEST |
//! | CH10 | Left shoulder | BTN_TL |
//! | CH11 | Right shoulder | BTN_TR |
//! | CH12 | Left trigger click | BTN_TL2 |
//! | CH13 | Right trigger click | BTN_TR2 |
//! | CH14 | Settings | BTN_SELECT |
//! | CH15 | Home | BTN_START |
//! | CH16 | Power | BTN_MODE |

use evdev::{AbsoluteAxisType, Key};

/// Logical analog axes, in channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Roll,
    Pitch,
    Throttle,
    Yaw,
    AuxLeft,
}

impl Axis {
    /// All axes, indexed by their channel.
    pub const ALL: [Axis; 5] = [Axis::Roll, Axis::Pitch, Axis::Throttle, Axis::Yaw, Axis::AuxLeft];

    /// Channel index of this axis.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Channel indices for semantic access.
pub mod channels {
    /// Roll - ABS_Z
    pub const ROLL: usize = 0;
    /// Pitch - ABS_RX
    pub const PITCH: usize = 1;
    /// Throttle - ABS_Y
    pub const THROTTLE: usize = 2;
    /// Yaw - ABS_X
    pub const YAW: usize = 3;
    /// Left aux wheel - ABS_RY
    pub const AUX_LEFT: usize = 4;
    /// First button channel
    pub const FIRST_BUTTON: usize = 5;
}

/// Code tables for one controller model.
pub trait ControllerProfile: std::fmt::Debug {
    /// Human-readable controller name.
    fn name(&self) -> &'static str;

    /// Number of logical axes. Every one of them must be present on the device.
    fn axis_count(&self) -> usize;

    /// Number of button channels, placed after the axes.
    fn button_count(&self) -> usize;

    /// Logical axis index for an absolute axis code.
    fn axis_for(&self, code: AbsoluteAxisType) -> Option<usize>;

    /// Button index (0-based, relative to the first button channel) for a key code.
    fn button_for(&self, key: Key) -> Option<usize>;

    /// Total channel vector length.
    fn channel_count(&self) -> usize {
        self.axis_count() + self.button_count()
    }
}

/// Parrot SkyController 2 mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkyController2;

impl ControllerProfile for SkyController2 {
    fn name(&self) -> &'static str {
        "SkyController 2"
    }

    fn axis_count(&self) -> usize {
        Axis::ALL.len()
    }

    fn button_count(&self) -> usize {
        11
    }

    fn axis_for(&self, code: AbsoluteAxisType) -> Option<usize> {
        let axis = match code {
            AbsoluteAxisType::ABS_Z => Axis::Roll,
            AbsoluteAxisType::ABS_RX => Axis::Pitch,
            AbsoluteAxisType::ABS_Y => Axis::Throttle,
            AbsoluteAxisType::ABS_X => Axis::Yaw,
            AbsoluteAxisType::ABS_RY => Axis::AuxLeft,
            _ => return None,
        };
        Some(axis.index())
    }

    fn button_for(&self, key: Key) -> Option<usize> {
        match key {
            // Face buttons
            Key::BTN_SOUTH => Some(0),
            Key::BTN_EAST => Some(1),
            Key::BTN_NORTH => Some(2),
            Key::BTN_WEST => Some(3),

            // Shoulder buttons
            Key::BTN_TL => Some(4),
            Key::BTN_TR => Some(5),
            Key::BTN_TL2 => Some(6),
            Key::BTN_TR2 => Some(7),

            // System buttons
            Key::BTN_SELECT => Some(8),
            Key::BTN_START => Some(9),
            Key::BTN_MODE => Some(10),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_channel_count() {
        let profile = SkyController2;
        assert_eq!(profile.axis_count(), 5);
        assert_eq!(profile.button_count(), 11);
        assert_eq!(profile.channel_count(), 16);
    }

    #[test]
    fn test_axis_table() {
        let profile = SkyController2;
        assert_eq!(profile.axis_for(AbsoluteAxisType::ABS_Z), Some(channels::ROLL));
        assert_eq!(profile.axis_for(AbsoluteAxisType::ABS_RX), Some(channels::PITCH));
        assert_eq!(profile.axis_for(AbsoluteAxisType::ABS_Y), Some(channels::THROTTLE));
        assert_eq!(profile.axis_for(AbsoluteAxisType::ABS_X), Some(channels::YAW));
        assert_eq!(profile.axis_for(AbsoluteAxisType::ABS_RY), Some(channels::AUX_LEFT));
    }

    #[test]
    fn test_unknown_axis() {
        let profile = SkyController2;
        assert_eq!(profile.axis_for(AbsoluteAxisType::ABS_RZ), None);
        assert_eq!(profile.axis_for(AbsoluteAxisType::ABS_HAT0X), None);
    }

    #[test]
    fn test_button_table_is_dense() {
        let profile = SkyController2;
        let keys = [
            Key::BTN_SOUTH,
            Key::BTN_EAST,
            Key::BTN_NORTH,
            Key::BTN_WEST,
            Key::BTN_TL,
            Key::BTN_TR,
            Key::BTN_TL2,
            Key::BTN_TR2,
            Key::BTN_SELECT,
            Key::BTN_START,
            Key::BTN_MODE,
        ];

        let indices: HashSet<usize> = keys.iter().filter_map(|&k| profile.button_for(k)).collect();
        assert_eq!(indices.len(), profile.button_count());
        assert!(indices.iter().all(|&i| i < profile.button_count()));
    }

    #[test]
    fn test_unknown_button() {
        let profile = SkyController2;
        assert_eq!(profile.button_for(Key::BTN_THUMBL), None);
        assert_eq!(profile.button_for(Key::KEY_A), None);
    }

    #[test]
    fn test_axis_indices_match_channels() {
        for (i, axis) in Axis::ALL.iter().enumerate() {
            assert_eq!(axis.index(), i);
        }
        assert_eq!(channels::FIRST_BUTTON, Axis::ALL.len());
    }
}
