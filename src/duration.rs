//! Duration text in the `1m30s` / `1.5s` / `250ms` style.
//!
//! The verifier's delay route receives its delay in this form, and the
//! command line accepts every timeout in it as well.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

// Digits of a fraction beyond this cannot change a nanosecond result.
const MAX_FRACTION_DIGITS: usize = 18;

/// Error returned when duration text can't be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseDurationError {
    /// The text is not a sequence of `<number><unit>` pairs.
    #[error("invalid duration {0:?}")]
    Invalid(String),

    /// A number was given without a unit.
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    /// The unit is not one of `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`.
    #[error("unknown unit {unit:?} in duration {text:?}")]
    UnknownUnit {
        /// The offending unit.
        unit: String,
        /// The full duration text.
        text: String,
    },

    /// Durations can't be negative.
    #[error("negative duration {0:?}")]
    Negative(String),

    /// The value does not fit in a [`Duration`].
    #[error("duration {0:?} out of range")]
    Overflow(String),
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3_600 * NANOS_PER_SEC),
        _ => None,
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let len = s.bytes().take_while(u8::is_ascii_digit).count();
    s.split_at(len)
}

/// Parse duration text such as `3s`, `1.5s`, `1m30s` or `0`.
pub fn parse(text: &str) -> Result<Duration, ParseDurationError> {
    let invalid = || ParseDurationError::Invalid(text.to_owned());
    let overflow = || ParseDurationError::Overflow(text.to_owned());

    let mut rest = text;
    if let Some(unsigned) = rest.strip_prefix('+') {
        rest = unsigned;
    } else if rest.starts_with('-') {
        return Err(ParseDurationError::Negative(text.to_owned()));
    }

    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let (whole, after) = split_digits(rest);
        let (fraction, after) = match after.strip_prefix('.') {
            Some(after) => split_digits(after),
            None => ("", after),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }

        let unit_len: usize = after
            .chars()
            .take_while(|c| !c.is_ascii_digit() && *c != '.')
            .map(char::len_utf8)
            .sum();
        let (unit, after) = after.split_at(unit_len);
        if unit.is_empty() {
            return Err(ParseDurationError::MissingUnit(text.to_owned()));
        }
        let scale = unit_scale(unit).ok_or_else(|| ParseDurationError::UnknownUnit {
            unit: unit.to_owned(),
            text: text.to_owned(),
        })?;

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(overflow)?;

        let mut numerator: u128 = 0;
        let mut denominator: u128 = 1;
        for digit in fraction.bytes().take(MAX_FRACTION_DIGITS) {
            numerator = numerator * 10 + u128::from(digit - b'0');
            denominator *= 10;
        }
        value += numerator * scale / denominator;

        total = total.checked_add(value).ok_or_else(overflow)?;
        rest = after;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| overflow())?;
    let nanos = (total % NANOS_PER_SEC) as u32;
    Ok(Duration::new(secs, nanos))
}

fn write_scaled(f: &mut fmt::Formatter<'_>, whole: u128, fraction: u128, digits: usize) -> fmt::Result {
    if fraction == 0 {
        return write!(f, "{whole}");
    }
    let fraction = format!("{fraction:0digits$}");
    write!(f, "{whole}.{}", fraction.trim_end_matches('0'))
}

/// Formats a [`Duration`] as text that [`parse`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Display(pub Duration);

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0s");
        }
        if nanos < 1_000 {
            return write!(f, "{nanos}ns");
        }
        if nanos < 1_000_000 {
            write_scaled(f, nanos / 1_000, nanos % 1_000, 3)?;
            return f.write_str("µs");
        }
        if nanos < NANOS_PER_SEC {
            write_scaled(f, nanos / 1_000_000, nanos % 1_000_000, 6)?;
            return f.write_str("ms");
        }

        let secs = self.0.as_secs();
        let (hours, minutes, seconds) = (secs / 3_600, secs / 60 % 60, secs % 60);
        if hours > 0 {
            write!(f, "{hours}h{minutes}m")?;
        } else if minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        write_scaled(f, u128::from(seconds), u128::from(self.0.subsec_nanos()), 9)?;
        f.write_str("s")
    }
}

/// Format a [`Duration`] as duration text.
pub fn format(duration: Duration) -> String {
    Display(duration).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_units() {
        assert_eq!(parse("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("15us").unwrap(), Duration::from_micros(15));
        assert_eq!(parse("15µs").unwrap(), Duration::from_micros(15));
        assert_eq!(parse("42ns").unwrap(), Duration::from_nanos(42));
        assert_eq!(parse("2h").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse("0").unwrap(), Duration::ZERO);
        assert_eq!(parse("+5s").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn parse_compound_and_fractional() {
        assert_eq!(parse("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse("1.5s").unwrap(), Duration::from_millis(1_500));
        assert_eq!(parse(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse("1.5µs").unwrap(), Duration::from_nanos(1_500));
        assert_eq!(
            parse("2h45m0.25s").unwrap(),
            Duration::from_millis((2 * 3_600 + 45 * 60) * 1_000 + 250)
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse(""), Err(ParseDurationError::Invalid("".into())));
        assert_eq!(parse("3"), Err(ParseDurationError::MissingUnit("3".into())));
        assert_eq!(
            parse("-1s"),
            Err(ParseDurationError::Negative("-1s".into()))
        );
        assert!(matches!(
            parse("5x"),
            Err(ParseDurationError::UnknownUnit { ref unit, .. }) if unit == "x"
        ));
        assert_eq!(parse(".s"), Err(ParseDurationError::Invalid(".s".into())));
        assert!(matches!(
            parse("99999999999999999999999h"),
            Err(ParseDurationError::Overflow(_))
        ));
    }

    #[test]
    fn format_durations() {
        assert_eq!(format(Duration::ZERO), "0s");
        assert_eq!(format(Duration::from_nanos(12)), "12ns");
        assert_eq!(format(Duration::from_micros(1)), "1µs");
        assert_eq!(format(Duration::from_nanos(1_500)), "1.5µs");
        assert_eq!(format(Duration::from_millis(100)), "100ms");
        assert_eq!(format(Duration::from_secs(3)), "3s");
        assert_eq!(format(Duration::from_millis(1_500)), "1.5s");
        assert_eq!(format(Duration::from_secs(90)), "1m30s");
        assert_eq!(format(Duration::from_secs(3_600)), "1h0m0s");
    }

    #[test]
    fn formatted_text_parses_back() {
        for duration in [
            Duration::from_millis(1_250),
            Duration::from_secs(3_725),
            Duration::from_micros(750),
        ] {
            assert_eq!(parse(&format(duration)).unwrap(), duration);
        }
    }
}
