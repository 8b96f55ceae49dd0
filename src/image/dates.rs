//! Registry timestamp parsing.
//!
//! Creation timestamps arrive in several shapes depending on which tool
//! produced them: RFC 3339 from the engine, `2024-01-02 03:04:05.123 UTC`
//! style from some registry frontends, and naive datetimes with or without
//! a `T` separator. The strategies are tried in order; a string none of
//! them accept yields `None` rather than an error.

use chrono::{DateTime, NaiveDateTime, Utc};

pub fn parse_create_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // "2024-01-02 03:04:05.123456 +0000 UTC" and friends.
    if raw.contains('.') && raw.ends_with("UTC") {
        let cleaned = raw
            .trim_end_matches("UTC")
            .trim()
            .replacen(' ', "T", 1)
            .replace(" +0000", "Z");
        let candidate = if cleaned.ends_with('Z') || cleaned.contains('+') {
            cleaned
        } else {
            format!("{cleaned}Z")
        };
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&candidate) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    // Plain RFC 3339.
    if raw.contains('T') {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        // RFC 3339 shape without an offset; treat as UTC.
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(parsed.and_utc());
        }
    }

    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(parsed.and_utc());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_rfc3339_with_offset() {
        let parsed = parse_create_time("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn parses_rfc3339_zulu_with_fraction() {
        let parsed = parse_create_time("2024-03-01T12:30:00.123456789Z").unwrap();
        assert_eq!(parsed.timestamp(), 1709296200);
    }

    #[test]
    fn parses_go_style_utc_suffix() {
        let parsed = parse_create_time("2024-03-01 12:30:00.5 +0000 UTC").unwrap();
        assert_eq!(parsed.timestamp(), 1709296200);
    }

    #[test]
    fn parses_naive_with_t_separator() {
        let parsed = parse_create_time("2024-03-01T12:30:00.25").unwrap();
        assert_eq!(parsed.timestamp(), 1709296200);
    }

    #[test]
    fn parses_naive_space_separated() {
        let parsed = parse_create_time("2024-03-01 12:30:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_create_time("").is_none());
        assert!(parse_create_time("not a date").is_none());
        assert!(parse_create_time("2024/03/01").is_none());
    }
}
