//! Duration parsing for provider timing columns.
//!
//! Providers report durations either as numeric seconds or as text in one of
//! the timedelta layouts below. Parsed values are seconds as `f64`.
//!
//! | Input                         | Seconds   |
//! |-------------------------------|-----------|
//! | `91.456`                      | 91.456    |
//! | `"1:31.456"`                  | 91.456    |
//! | `"0:01:31.456000"`            | 91.456    |
//! | `"0 days 00:01:31.456000"`    | 91.456    |

use serde_json::Value;

/// Parse a nullable duration.
///
/// `null`, empty text and `NaT` are absent values. Anything else that does not
/// parse to a finite, non-negative number of seconds is an error.
pub fn parse_duration(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let secs = n
                .as_f64()
                .ok_or_else(|| format!("{} is not representable as seconds", n))?;
            check(secs).map(Some)
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nat") {
                return Ok(None);
            }
            parse_text(trimmed).and_then(check).map(Some)
        }
        other => Err(format!("expected a duration, got {}", type_name(other))),
    }
}

fn check(secs: f64) -> Result<f64, String> {
    if !secs.is_finite() {
        return Err("duration is not finite".to_string());
    }
    if secs < 0.0 {
        return Err(format!("duration {} is negative", secs));
    }
    Ok(secs)
}

fn parse_text(text: &str) -> Result<f64, String> {
    let (days, clock) = split_days(text)?;

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() > 3 {
        return Err(format!("unrecognised duration '{}'", text));
    }

    let mut secs = 0.0;
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        let part = part.trim();
        let value: f64 = if i == last {
            part.parse()
                .map_err(|_| format!("unrecognised duration '{}'", text))?
        } else {
            part.parse::<u32>()
                .map(f64::from)
                .map_err(|_| format!("unrecognised duration '{}'", text))?
        };
        if i > 0 && value >= 60.0 {
            return Err(format!("field out of range in duration '{}'", text));
        }
        secs = secs * 60.0 + value;
    }

    Ok(days * 86_400.0 + secs)
}

fn split_days(text: &str) -> Result<(f64, &str), String> {
    match text.split_once("day") {
        Some((days, rest)) => {
            let days: u32 = days
                .trim()
                .parse()
                .map_err(|_| format!("unrecognised day count in '{}'", text))?;
            let rest = rest.strip_prefix('s').unwrap_or(rest).trim_start_matches([' ', ',']);
            Ok((f64::from(days), rest))
        }
        None => Ok((0.0, text)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secs(value: Value) -> f64 {
        parse_duration(&value).unwrap().unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_numeric_seconds() {
        assert!(close(secs(json!(91.456)), 91.456));
        assert!(close(secs(json!(90)), 90.0));
    }

    #[test]
    fn test_text_layouts() {
        assert!(close(secs(json!("91.456")), 91.456));
        assert!(close(secs(json!("1:31.456")), 91.456));
        assert!(close(secs(json!("0:01:31.456000")), 91.456));
        assert!(close(secs(json!("0 days 00:01:31.456000")), 91.456));
        assert!(close(secs(json!("1 day 00:00:01")), 86_401.0));
    }

    #[test]
    fn test_absent_values() {
        assert_eq!(parse_duration(&json!(null)).unwrap(), None);
        assert_eq!(parse_duration(&json!("")).unwrap(), None);
        assert_eq!(parse_duration(&json!("NaT")).unwrap(), None);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_duration(&json!("fast")).is_err());
        assert!(parse_duration(&json!("1:75.0")).is_err());
        assert!(parse_duration(&json!("1:2:3:4")).is_err());
        assert!(parse_duration(&json!(-1.0)).is_err());
        assert!(parse_duration(&json!(true)).is_err());
    }
}
