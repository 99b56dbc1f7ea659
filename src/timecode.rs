//! Human-readable times for the command line.
//!
//! Accepted forms: plain seconds (`2.5`), `MM:SS(.fff)`, `HH:MM:SS(.fff)`,
//! and integer microseconds or milliseconds with a `us`/`ms` suffix.

use std::fmt;

const MICROS_PER_SECOND: i64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseTimeError {
    #[error("empty time")]
    Empty,

    #[error("invalid time '{0}'")]
    Invalid(String),

    #[error("time '{0}' is out of range")]
    OutOfRange(String),
}

/// Parse `input` into microseconds.
pub fn parse_time(input: &str) -> Result<i64, ParseTimeError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseTimeError::Empty);
    }
    let invalid = || ParseTimeError::Invalid(s.to_string());
    let out_of_range = || ParseTimeError::OutOfRange(s.to_string());

    if let Some(n) = s.strip_suffix("us") {
        return n.trim().parse::<i64>().map_err(|_| invalid());
    }
    if let Some(n) = s.strip_suffix("ms") {
        let ms = n.trim().parse::<i64>().map_err(|_| invalid())?;
        return ms.checked_mul(1000).ok_or_else(out_of_range);
    }

    let parts: Vec<&str> = s.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [sec] => (0, 0, *sec),
        [min, sec] => (0, parse_field(min).ok_or_else(invalid)?, *sec),
        [hour, min, sec] => (
            parse_field(hour).ok_or_else(invalid)?,
            parse_field(min).ok_or_else(invalid)?,
            *sec,
        ),
        _ => return Err(invalid()),
    };
    if parts.len() > 1 && (minutes >= 60 || seconds.starts_with('-')) {
        return Err(invalid());
    }

    let (negative, seconds) = match seconds.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, seconds),
    };
    let fraction_micros = parse_seconds(seconds).ok_or_else(invalid)?;
    if parts.len() > 1 && fraction_micros >= 60 * MICROS_PER_SECOND {
        return Err(invalid());
    }

    let total = hours
        .checked_mul(3600)
        .and_then(|h| h.checked_add(minutes * 60))
        .and_then(|s| s.checked_mul(MICROS_PER_SECOND))
        .and_then(|m| m.checked_add(fraction_micros))
        .ok_or_else(out_of_range)?;

    Ok(if negative { -total } else { total })
}

fn parse_field(field: &str) -> Option<i64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// `SS` or `SS.ffffff` into microseconds; extra fraction digits are
/// truncated.
fn parse_seconds(s: &str) -> Option<i64> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole = if whole.is_empty() { 0 } else { parse_field(whole)? };
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut frac_micros = 0i64;
    for (i, digit) in frac.bytes().take(6).enumerate() {
        frac_micros += i64::from(digit - b'0') * 10i64.pow(5 - i as u32);
    }
    whole.checked_mul(MICROS_PER_SECOND)?.checked_add(frac_micros)
}

/// Displays microseconds as `HH:MM:SS.ffffff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode(pub i64);

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let micros = self.0.unsigned_abs();
        let seconds = micros / MICROS_PER_SECOND as u64;
        write!(
            f,
            "{}{:02}:{:02}:{:02}.{:06}",
            sign,
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60,
            micros % MICROS_PER_SECOND as u64
        )
    }
}
