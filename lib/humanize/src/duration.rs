//! Go style duration strings, e.g. "300ms", "1.5h" or "2h45m".

use std::time::Duration;

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1000 * NANOSECOND;
const MILLISECOND: u64 = 1000 * MICROSECOND;
const SECOND: u64 = 1000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseDurationError {
    #[error("invalid duration")]
    InvalidDuration,
    #[error("integer overflow")]
    BadInteger,
    #[error("missing unit in duration")]
    MissingUnit,
    #[error("unknown unit {0:?} in duration")]
    UnknownUnit(String),
}

fn unit_nanos(unit: &str) -> Option<u64> {
    let nanos = match unit {
        "ns" => NANOSECOND,
        // "µs" U+00B5 and "μs" U+03BC
        "us" | "\u{b5}s" | "\u{3bc}s" => MICROSECOND,
        "ms" => MILLISECOND,
        "s" => SECOND,
        "m" => MINUTE,
        "h" => HOUR,
        "d" => DAY,
        _ => return None,
    };

    Some(nanos)
}

/// Parse a duration string, a sequence of decimal numbers each with an
/// optional fraction and a unit suffix. Negative durations are rejected.
pub fn parse_duration(text: &str) -> Result<Duration, ParseDurationError> {
    let mut s = text.strip_prefix('+').unwrap_or(text);
    if s.starts_with('-') || s.is_empty() {
        return Err(ParseDurationError::InvalidDuration);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0u64;
    while !s.is_empty() {
        let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, rest) = s.split_at(int_len);

        let (frac_part, rest) = match rest.strip_prefix('.') {
            Some(rest) => {
                let frac_len = rest.bytes().take_while(u8::is_ascii_digit).count();
                rest.split_at(frac_len)
            }
            None => ("", rest),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseDurationError::InvalidDuration);
        }

        let unit_len = rest
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(ParseDurationError::MissingUnit);
        }
        let (unit, rest) = rest.split_at(unit_len);
        let unit = unit_nanos(unit).ok_or_else(|| ParseDurationError::UnknownUnit(unit.to_string()))?;

        let int = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse::<u64>()
                .map_err(|_| ParseDurationError::BadInteger)?
        };
        let mut value = int
            .checked_mul(unit)
            .ok_or(ParseDurationError::InvalidDuration)?;

        if !frac_part.is_empty() {
            // only the first 18 digits matter, the rest is below ns precision
            let digits = &frac_part[..frac_part.len().min(18)];
            let frac = digits
                .parse::<u64>()
                .map_err(|_| ParseDurationError::BadInteger)?;
            let scale = 10f64.powi(digits.len() as i32);
            value += (frac as f64 * (unit as f64 / scale)) as u64;
        }

        total = total
            .checked_add(value)
            .ok_or(ParseDurationError::InvalidDuration)?;
        s = rest;
    }

    Ok(Duration::from_nanos(total))
}

/// Format a duration like "72h3m0.5s". Durations under one second use a
/// smaller unit so the leading digit is non-zero, and zero formats as "0s".
pub fn duration_to_string(d: &Duration) -> String {
    let nanos = d.as_nanos() as u64;
    if nanos == 0 {
        return "0s".to_string();
    }

    if nanos < SECOND {
        let (unit, scale) = if nanos < MICROSECOND {
            ("ns", NANOSECOND)
        } else if nanos < MILLISECOND {
            ("us", MICROSECOND)
        } else {
            ("ms", MILLISECOND)
        };

        return format!("{}{unit}", fraction(nanos, scale));
    }

    let mut out = String::new();
    let secs = nanos / SECOND;
    let (hours, minutes) = (secs / 3600, (secs / 60) % 60);
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&fraction(nanos % MINUTE, SECOND));
    out.push('s');

    out
}

// renders v / scale with trailing zeros trimmed
fn fraction(v: u64, scale: u64) -> String {
    let int = v / scale;
    let frac = v % scale;
    if frac == 0 {
        return int.to_string();
    }

    let width = scale.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    format!("{int}.{}", digits.trim_end_matches('0'))
}

/// Serde adapter, use it with `#[serde(with = "humanize::duration::serde")]`.
pub mod serde {
    use std::time::Duration;

    use ::serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::duration_to_string(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_duration(&text).map_err(::serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        for (input, want) in [
            ("0", 0),
            ("5s", 5 * SECOND),
            ("+5s", 5 * SECOND),
            ("1478s", 1478 * SECOND),
            ("5.6s", 5 * SECOND + 600 * MILLISECOND),
            (".5s", 500 * MILLISECOND),
            ("1.004s", SECOND + 4 * MILLISECOND),
            ("100ms", 100 * MILLISECOND),
            ("10us", 10 * MICROSECOND),
            ("10µs", 10 * MICROSECOND),
            ("3h30m", 3 * HOUR + 30 * MINUTE),
            ("1m30s", 90 * SECOND),
            ("1.5h", HOUR + 30 * MINUTE),
            ("2d", 2 * DAY),
        ] {
            assert_eq!(
                parse_duration(input),
                Ok(Duration::from_nanos(want)),
                "input: {input}"
            );
        }
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_duration(""), Err(ParseDurationError::InvalidDuration));
        assert_eq!(parse_duration("-5s"), Err(ParseDurationError::InvalidDuration));
        assert_eq!(parse_duration("."), Err(ParseDurationError::InvalidDuration));
        assert_eq!(parse_duration("3"), Err(ParseDurationError::MissingUnit));
        assert_eq!(
            parse_duration("3x"),
            Err(ParseDurationError::UnknownUnit("x".to_string()))
        );
        assert_eq!(
            parse_duration("99999999999999999999s"),
            Err(ParseDurationError::BadInteger)
        );
    }

    #[test]
    fn to_string() {
        for (nanos, want) in [
            (0, "0s"),
            (1, "1ns"),
            (1100, "1.1us"),
            (2200 * MICROSECOND, "2.2ms"),
            (3300 * MILLISECOND, "3.3s"),
            (60 * SECOND, "1m0s"),
            (4 * MINUTE + 5 * SECOND, "4m5s"),
            (5 * HOUR + 6 * MINUTE + 7001 * MILLISECOND, "5h6m7.001s"),
        ] {
            assert_eq!(duration_to_string(&Duration::from_nanos(nanos)), want);
        }
    }

    #[test]
    fn serde_yaml() {
        #[derive(::serde::Deserialize, ::serde::Serialize)]
        struct Config {
            #[serde(with = "crate::duration::serde")]
            interval: Duration,
        }

        let config: Config = serde_yaml::from_str("interval: 1m30s").unwrap();
        assert_eq!(config.interval, Duration::from_secs(90));

        let text = serde_yaml::to_string(&config).unwrap();
        assert_eq!(text, "interval: 1m30s\n");
    }
}
