use chrono::{DateTime, NaiveDate};

/// Окно по умолчанию для запросов без `startTime`/`endTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDefaults {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl WindowDefaults {
    /// 2020-09-22T12:00:00.000+03:00 .. 2020-09-22T15:00:00.000+03:00
    pub const LEGACY: WindowDefaults = WindowDefaults {
        start_ms: 1_600_765_200_000,
        end_ms: 1_600_776_000_000,
    };
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self::LEGACY
    }
}

/// Время в ms (Unix epoch) из RFC 3339, даты `YYYY-MM-DD` (полночь UTC)
/// или числа миллисекунд.
pub fn parse_time(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| format!("cannot parse '{raw}' as RFC 3339 time or epoch milliseconds"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_defaults_match_their_rfc3339_form() {
        assert_eq!(
            parse_time("2020-09-22T12:00:00.000+03:00"),
            Ok(WindowDefaults::LEGACY.start_ms)
        );
        assert_eq!(
            parse_time("2020-09-22T15:00:00.000+03:00"),
            Ok(WindowDefaults::LEGACY.end_ms)
        );
    }

    #[test]
    fn accepts_epoch_millis_and_dates() {
        assert_eq!(parse_time("1000"), Ok(1000));
        assert_eq!(parse_time(" -5 "), Ok(-5));
        assert_eq!(parse_time("1970-01-02"), Ok(86_400_000));
        assert_eq!(parse_time("1970-01-01T00:00:01Z"), Ok(1000));
        assert!(parse_time("yesterday").is_err());
    }
}
