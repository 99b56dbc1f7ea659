//! Conversions between media timescale ticks and microseconds.
//!
//! Tick-to-microsecond conversion floors; the inverse conversions are chosen
//! so that `ticks -> us -> ticks` is lossless for any timescale below 500 kHz.

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Convert ticks to microseconds, rounding toward negative infinity.
pub fn ticks_to_us(ticks: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (ticks as i128 * MICROS_PER_SECOND as i128).div_euclid(timescale as i128) as i64
}

/// Convert microseconds to the nearest tick.
pub fn us_to_ticks(us: i64, timescale: u32) -> i64 {
    let num = us as i128 * timescale as i128;
    let den = MICROS_PER_SECOND as i128;
    (num + den / 2).div_euclid(den) as i64
}

/// Smallest tick count whose floored microsecond value is `>= us`.
pub fn first_tick_at_or_after(us: i64, timescale: u32) -> i64 {
    let num = us as i128 * timescale as i128;
    let den = MICROS_PER_SECOND as i128;
    (num + den - 1).div_euclid(den) as i64
}

/// Largest tick count whose floored microsecond value is `<= us`.
pub fn last_tick_at_or_before(us: i64, timescale: u32) -> i64 {
    first_tick_at_or_after(us + 1, timescale) - 1
}

/// Rescale a tick count between timescales, rounding to nearest.
pub fn rescale(ticks: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    ((ticks as u128 * to as u128 + from as u128 / 2) / from as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_roundtrip_common_timescales() {
        for timescale in [1000, 30000, 44100, 48000, 90000] {
            for ticks in [0i64, 1, 1001, 1024, 3003, 123_457, 9_999_999] {
                let us = ticks_to_us(ticks, timescale);
                assert_eq!(us_to_ticks(us, timescale), ticks, "ts={timescale} ticks={ticks}");
            }
        }
    }

    #[test]
    fn negative_ticks_floor() {
        assert_eq!(ticks_to_us(-1, 90000), -12);
        assert_eq!(us_to_ticks(-12, 90000), -1);
    }

    #[test]
    fn tick_bounds_match_floor_conversion() {
        let ts = 44100;
        for us in [0i64, 1, 23_219, 23_220, 2_000_000] {
            let lo = first_tick_at_or_after(us, ts);
            assert!(ticks_to_us(lo, ts) >= us);
            assert!(ticks_to_us(lo - 1, ts) < us);

            let hi = last_tick_at_or_before(us, ts);
            assert!(ticks_to_us(hi, ts) <= us);
            assert!(ticks_to_us(hi + 1, ts) > us);
        }
    }

    #[test]
    fn rescale_rounds() {
        assert_eq!(rescale(90000, 90000, 1000), 1000);
        assert_eq!(rescale(1024, 44100, 1000), 23);
        assert_eq!(rescale(5, 0, 1000), 0);
    }
}
