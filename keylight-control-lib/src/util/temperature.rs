//! Conversions between the units a user sees and the units a Key Light speaks.
//!
//! The light reports and accepts colour temperature in mireds
//! (`kelvin = 1_000_000 / mired`). Outgoing values are truncated toward zero,
//! which is what the lights have always been sent.

/// Warmest colour temperature a Key Light supports, in Kelvin.
pub const MIN_KELVIN: f64 = 2900.0;
/// Coldest colour temperature a Key Light supports, in Kelvin.
pub const MAX_KELVIN: f64 = 7000.0;
/// Lowest mired value the vendor documents for a Key Light. The cold end of
/// the slider truncates to 142, one below this floor.
pub const MIN_MIRED: i32 = 143;
/// Highest mired value a Key Light accepts (2900 K).
pub const MAX_MIRED: i32 = 344;

const MIRED_SCALE: f64 = 1_000_000.0;

/// Kelvin to mireds, truncated toward zero.
pub fn kelvin_to_mired(kelvin: f64) -> i32 {
    (MIRED_SCALE / kelvin) as i32
}

/// Mireds to Kelvin without rounding. `None` for a zero mired value.
pub fn mired_to_kelvin(mired: i32) -> Option<f64> {
    if mired == 0 {
        None
    } else {
        Some(MIRED_SCALE / f64::from(mired))
    }
}

/// Maps a temperature slider position in `0.0..=1.0` onto the Kelvin range.
pub fn slider_to_kelvin(position: f64) -> f64 {
    MIN_KELVIN + position * (MAX_KELVIN - MIN_KELVIN)
}

pub fn kelvin_to_slider(kelvin: f64) -> f64 {
    (kelvin - MIN_KELVIN) / (MAX_KELVIN - MIN_KELVIN)
}

/// Slider position straight to the mired value sent to the light.
pub fn slider_to_mired(position: f64) -> i32 {
    kelvin_to_mired(slider_to_kelvin(position))
}

/// Brightness slider position in `0.0..=1.0` to percent, truncated.
pub fn slider_to_brightness(position: f64) -> i32 {
    (100.0 * position) as i32
}

pub fn brightness_to_slider(brightness: i32) -> f64 {
    f64::from(brightness) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mired_from_kelvin_truncates() {
        assert_eq!(kelvin_to_mired(5000.0), 200);
        // 1_000_000 / 2900 = 344.82..., truncated rather than rounded
        assert_eq!(kelvin_to_mired(2900.0), 344);
        // 1_000_000 / 7000 = 142.85...
        assert_eq!(kelvin_to_mired(7000.0), 142);
    }

    #[test]
    fn kelvin_from_mired() {
        assert_eq!(mired_to_kelvin(200), Some(5000.0));
        assert_eq!(mired_to_kelvin(0), None);
    }

    #[test]
    fn mired_round_trip_stays_within_one_unit() {
        for kelvin in 2900..=7000 {
            let mired = kelvin_to_mired(f64::from(kelvin));
            let back = kelvin_to_mired(mired_to_kelvin(mired).unwrap());
            assert!(
                (back - mired).abs() <= 1,
                "{kelvin}K: {mired} came back as {back}"
            );
        }
    }

    #[test]
    fn slider_ends_match_vendor_range() {
        assert_eq!(slider_to_kelvin(0.0), MIN_KELVIN);
        assert_eq!(slider_to_kelvin(1.0), MAX_KELVIN);
        assert_eq!(slider_to_mired(0.0), MAX_MIRED);
        assert_eq!(slider_to_mired(1.0), MIN_MIRED - 1);
        assert_eq!(kelvin_to_slider(MAX_KELVIN), 1.0);
        assert_eq!(kelvin_to_slider(mired_to_kelvin(200).unwrap()), 2100.0 / 4100.0);
    }

    #[test]
    fn brightness_slider_truncates() {
        assert_eq!(slider_to_brightness(0.999), 99);
        assert_eq!(slider_to_brightness(1.0), 100);
        assert_eq!(slider_to_brightness(0.0), 0);
        assert_eq!(brightness_to_slider(40), 0.4);
    }
}
