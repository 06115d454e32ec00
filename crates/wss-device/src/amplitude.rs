//! Milliamp to device-unit amplitude mapping.
//!
//! The output stage is not linear in its amplitude code. Below
//! [`KNEE_MA`] the mapping follows a steep quadratic; above it a flatter
//! branch takes over. The two branches meet at the knee, and the result
//! saturates at the largest device code.

/// Boundary between the low and high amplitude branches.
pub const KNEE_MA: f32 = 4.0;

/// Largest amplitude the mapping accepts; larger requests saturate.
pub const MAX_AMPLITUDE_MA: f32 = 10.0;

/// Device code at the knee, shared by both branches.
const KNEE_UNITS: f32 = 96.0;

/// Convert a requested amplitude in milliamps to a device amplitude code.
///
/// Negative and NaN inputs map to zero.
///
/// # Example
///
/// ```
/// use wss_device::amplitude::ma_to_device_units;
///
/// assert_eq!(ma_to_device_units(0.0), 0);
/// assert_eq!(ma_to_device_units(1.0), 12);
/// assert_eq!(ma_to_device_units(4.0), 96);
/// assert_eq!(ma_to_device_units(50.0), 255);
/// ```
pub fn ma_to_device_units(ma: f32) -> u8 {
    if ma.is_nan() || ma <= 0.0 {
        return 0;
    }
    let x = ma.min(MAX_AMPLITUDE_MA);
    let units = if x <= KNEE_MA {
        4.0 * x * x + 8.0 * x
    } else {
        let t = x - KNEE_MA;
        KNEE_UNITS + 32.0 * t - 0.4 * t * t
    };
    units.round().clamp(0.0, 255.0) as u8
}
