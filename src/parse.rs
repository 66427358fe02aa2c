//! # Time-span, byte-size, and date parsers
//!
//! Small, dependency-free parsers for the three literal formats the
//! configuration and CLI surfaces accept: `6m` (time span), `10GB` (byte
//! size), and `2024-03-01` (date). None of these need a general-purpose
//! parsing crate — each format is one or two characters of suffix sniffing.

use crate::error::ConfigError;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};

/// A calendar-aware time span: `Nt` with `t` in `{y, m, w, d}`.
///
/// Calendar years/months are *not* fixed-duration — "3 months ago" depends on
/// which months those are — so [`TimeSpan::before`] is computed against a
/// concrete instant rather than converted to a `Duration` up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub count: u32,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Years,
    Months,
    Weeks,
    Days,
}

impl TimeSpan {
    /// Parses `Nt`, e.g. `"6m"`, `"2y"`, `"10d"`, `"3w"`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let s = s.trim();
        let bad = || ConfigError::TimeSpan(s.to_string());
        if s.is_empty() {
            return Err(bad());
        }
        let last = s.chars().last().ok_or_else(bad)?;
        let unit = match last.to_ascii_lowercase() {
            'y' => TimeUnit::Years,
            'm' => TimeUnit::Months,
            'w' => TimeUnit::Weeks,
            'd' => TimeUnit::Days,
            _ => return Err(bad()),
        };
        let digits = &s[..s.len() - last.len_utf8()];
        let count: u32 = digits.trim().parse().map_err(|_| bad())?;
        Ok(TimeSpan { count, unit })
    }

    /// Computes the cutoff instant: `now` minus this span, respecting
    /// calendar semantics for years/months (not fixed 365/30-day durations).
    pub fn before(&self, now: DateTime<Local>) -> DateTime<Local> {
        match self.unit {
            TimeUnit::Days => now - chrono::Duration::days(self.count as i64),
            TimeUnit::Weeks => now - chrono::Duration::weeks(self.count as i64),
            TimeUnit::Months => subtract_months(now, self.count),
            TimeUnit::Years => subtract_months(now, self.count * 12),
        }
    }
}

fn subtract_months(from: DateTime<Local>, months: u32) -> DateTime<Local> {
    let total_months = from.year() as i64 * 12 + (from.month0() as i64) - months as i64;
    let year = total_months.div_euclid(12) as i32;
    let month0 = total_months.rem_euclid(12) as u32;
    // Clamp the day-of-month so e.g. Mar 31 minus 1 month lands on Feb 28/29
    // instead of overflowing into March.
    let mut day = from.day();
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month0 + 1, day) {
            let naive_time = from.time();
            return Local
                .from_local_datetime(&date.and_time(naive_time))
                .single()
                .unwrap_or_else(|| Local.from_utc_datetime(&date.and_time(naive_time)));
        }
        day -= 1;
        if day == 0 {
            // Should be unreachable (every month has at least day 1).
            return from;
        }
    }
}

/// A byte count parsed from a decimal number with an optional unit suffix in
/// `{B, K, M, G, T, KB, MB, GB, TB}`, case- and whitespace-insensitive. Units
/// are powers of 1024.
pub fn parse_byte_size(s: &str) -> Result<u64, ConfigError> {
    let trimmed = s.trim();
    let bad = || ConfigError::ByteSize(s.to_string());
    if trimmed.is_empty() {
        return Err(bad());
    }
    let upper = trimmed.to_ascii_uppercase();
    let split_at = upper
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(upper.len());
    let (number_part, unit_part) = upper.split_at(split_at);
    let number: f64 = number_part.trim().parse().map_err(|_| bad())?;
    let unit_part = unit_part.trim();
    let multiplier: u64 = match unit_part {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024u64 * 1024 * 1024 * 1024,
        _ => return Err(bad()),
    };
    if number < 0.0 {
        return Err(bad());
    }
    Ok((number * multiplier as f64).round() as u64)
}

/// Parses a `YYYY-MM-DD` date as local midnight.
pub fn parse_date(s: &str) -> Result<DateTime<Local>, ConfigError> {
    let naive = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ConfigError::Date(s.to_string()))?;
    let naive_midnight = naive.and_hms_opt(0, 0, 0).ok_or_else(|| ConfigError::Date(s.to_string()))?;
    Ok(Local
        .from_local_datetime(&naive_midnight)
        .single()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive_midnight)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_span_parses_each_unit() {
        assert_eq!(TimeSpan::parse("6m").unwrap(), TimeSpan { count: 6, unit: TimeUnit::Months });
        assert_eq!(TimeSpan::parse("2y").unwrap(), TimeSpan { count: 2, unit: TimeUnit::Years });
        assert_eq!(TimeSpan::parse("3w").unwrap(), TimeSpan { count: 3, unit: TimeUnit::Weeks });
        assert_eq!(TimeSpan::parse("10d").unwrap(), TimeSpan { count: 10, unit: TimeUnit::Days });
    }

    #[test]
    fn time_span_rejects_garbage() {
        assert!(TimeSpan::parse("").is_err());
        assert!(TimeSpan::parse("7x").is_err());
        assert!(TimeSpan::parse("d").is_err());
    }

    #[test]
    fn byte_size_units_and_case() {
        assert_eq!(parse_byte_size("10").unwrap(), 10);
        assert_eq!(parse_byte_size("10b").unwrap(), 10);
        assert_eq!(parse_byte_size("1K").unwrap(), 1024);
        assert_eq!(parse_byte_size("1kb").unwrap(), 1024);
        assert_eq!(parse_byte_size("1 GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("2.5M").unwrap(), (2.5 * 1024.0 * 1024.0) as u64);
    }

    #[test]
    fn byte_size_rejects_unknown_unit() {
        assert!(parse_byte_size("10XB").is_err());
        assert!(parse_byte_size("").is_err());
    }

    #[test]
    fn date_parses_midnight_local() {
        let d = parse_date("2024-03-01").unwrap();
        assert_eq!(d.year(), 2024);
        assert_eq!(d.month(), 3);
        assert_eq!(d.day(), 1);
        assert_eq!(d.time(), chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn months_subtraction_clamps_end_of_month() {
        // Mar 31 minus 1 month -> Feb 29 2024 (leap year) or Feb 28.
        let from = Local.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let back = subtract_months(from, 1);
        assert_eq!(back.month(), 2);
        assert!(back.day() == 28 || back.day() == 29);
    }
}
