//! Utility functions for the kickr-gears crate.

/// Divide `value` by `divisor`, rounding halves to the nearest even quotient.
///
/// Works on integers so fixed-point telemetry rounds identically on every
/// platform.
///
/// # Arguments
///
/// * `value` - The dividend
/// * `divisor` - The divisor, must be positive
///
/// # Example
///
/// ```
/// use kickr_gears::utils::round_half_even_div;
///
/// assert_eq!(round_half_even_div(325, 10), 32);
/// assert_eq!(round_half_even_div(335, 10), 34);
/// assert_eq!(round_half_even_div(-325, 10), -32);
/// ```
pub fn round_half_even_div(value: i32, divisor: i32) -> i32 {
    debug_assert!(divisor > 0, "divisor must be positive");

    let quotient = value.div_euclid(divisor);
    let twice_remainder = 2 * value.rem_euclid(divisor);

    if twice_remainder > divisor || (twice_remainder == divisor && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    }
}

/// Format a value held in tenths as a signed decimal, e.g. `32` -> `"+3.2"`.
///
/// Zero and positive values carry a leading `+`, matching how trainers
/// display road grade.
pub fn format_signed_tenths(tenths: i32) -> String {
    let sign = if tenths < 0 { '-' } else { '+' };
    let magnitude = tenths.unsigned_abs();
    format!("{}{}.{}", sign, magnitude / 10, magnitude % 10)
}
