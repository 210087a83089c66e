use crate::models::error::{BackupError, Result};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Parses `90`, `90s`, `15m`, `2h`, `7d` or `2w` into seconds.
pub fn parse_duration(text: &str) -> Result<i64> {
    let text = text.trim();
    let invalid = || {
        BackupError::Validation(format!(
            "Invalid duration '{}'; use seconds or a number with s, m, h, d or w",
            text
        ))
    };

    let (number, unit) = match text.char_indices().last() {
        Some((index, c)) if c.is_ascii_alphabetic() => (&text[..index], Some(c)),
        Some(_) => (text, None),
        None => return Err(invalid()),
    };

    let value: i64 = number.trim().parse().map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }

    let multiplier = match unit.map(|c| c.to_ascii_lowercase()) {
        None | Some('s') => 1,
        Some('m') => MINUTE,
        Some('h') => HOUR,
        Some('d') => DAY,
        Some('w') => WEEK,
        Some(_) => return Err(invalid()),
    };

    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Largest whole unit that represents `seconds` exactly.
pub fn format_duration(seconds: i64) -> String {
    for (unit, size) in [("w", WEEK), ("d", DAY), ("h", HOUR), ("m", MINUTE)] {
        if seconds != 0 && seconds % size == 0 {
            return format!("{}{}", seconds / size, unit);
        }
    }
    format!("{}s", seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), 90);
        assert_eq!(parse_duration("90s").unwrap(), 90);
        assert_eq!(parse_duration("15m").unwrap(), 900);
        assert_eq!(parse_duration(" 2H ").unwrap(), 7200);
        assert_eq!(parse_duration("7d").unwrap(), 604_800);
        assert_eq!(parse_duration("2w").unwrap(), 1_209_600);
        assert_eq!(parse_duration("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for text in ["", "h", "-5m", "3y", "ten", "1.5h"] {
            assert!(parse_duration(text).is_err(), "accepted '{}'", text);
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(604_800), "1w");
        assert_eq!(format_duration(90), "90s");
        assert_eq!(format_duration(120), "2m");
        assert_eq!(format_duration(0), "0s");
    }
}
