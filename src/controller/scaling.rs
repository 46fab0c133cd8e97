//! # Axis Scaling Module
//!
//! Maps raw absolute-axis readings into the RC channel range.
//!
//! ## Algorithm
//!
//! Given a raw value `v` and the device-reported range `[min, max]`:
//!
//! 1. clamp `v` into `[min, max]` (the input layer does not do it for us)
//! 2. `v' = v - min`
//! 3. `scale = 1000 / (max - min)` with integer division
//! 4. `result = v' * scale + 1000`
//!
//! The truncated `scale` means the top of the range is only reached when the
//! span divides 1000 evenly. Any span above 1000 gives `scale == 0`, so the
//! axis reports 1000 regardless of position.
//!
//! ## Usage
//!
//! ```
//! use dema_rc::controller::scaling::{scale_axis, AxisRange};
//!
//! let range = AxisRange::new(0, 255);
//! assert_eq!(scale_axis(0, range), 1000);
//! assert_eq!(scale_axis(255, range), 1765);
//! ```

/// Lowest channel value; also the value of a released button.
pub const CHANNEL_VALUE_MIN: u16 = 1000;

/// Value of a pressed button; upper end of the nominal axis range.
pub const CHANNEL_VALUE_MAX: u16 = 2000;

/// Width of the nominal channel range.
const CHANNEL_SPAN: i64 = (CHANNEL_VALUE_MAX - CHANNEL_VALUE_MIN) as i64;

/// Device-reported `[minimum, maximum]` for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRange {
    /// Minimum raw value.
    pub min: i32,
    /// Maximum raw value.
    pub max: i32,
}

impl AxisRange {
    /// Creates a range from the device's reported bounds.
    #[must_use]
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Distance between the bounds.
    #[must_use]
    pub fn span(&self) -> i64 {
        i64::from(self.max) - i64::from(self.min)
    }

    /// Integer step applied per raw unit.
    ///
    /// A range with `max <= min` gets 0, so it always reports the minimum.
    #[must_use]
    pub fn scale(&self) -> i64 {
        match self.span() {
            span if span > 0 => CHANNEL_SPAN / span,
            _ => 0,
        }
    }
}

/// Scales a raw axis reading into `[1000, 2000]`, truncating as described
/// in the module docs.
///
/// # Examples
///
/// ```
/// use dema_rc::controller::scaling::{scale_axis, AxisRange};
///
/// // 1000 / 1023 truncates to 0: the axis never moves
/// assert_eq!(scale_axis(512, AxisRange::new(0, 1023)), 1000);
/// ```
#[must_use]
pub fn scale_axis(raw: i32, range: AxisRange) -> u16 {
    if range.span() <= 0 {
        return CHANNEL_VALUE_MIN;
    }

    let clamped = i64::from(raw.clamp(range.min, range.max));
    let offset = clamped - i64::from(range.min);
    let scaled = offset * range.scale() + i64::from(CHANNEL_VALUE_MIN);

    // offset * scale <= span * (1000 / span) <= 1000
    scaled as u16
}

/// Flips a button channel between released and pressed.
#[inline]
#[must_use]
pub fn toggle_button(value: u16) -> u16 {
    if value == CHANNEL_VALUE_MAX {
        CHANNEL_VALUE_MIN
    } else {
        CHANNEL_VALUE_MAX
    }
}
