//! Modification timestamp wire format.
//!
//! Stored as the decimal Unix epoch second count (fractional part allowed),
//! rendered to clients as an HTTP-date in UTC.

use chrono::{DateTime, Utc};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S +0000";

/// Current time truncated to whole seconds.
pub fn now_seconds() -> DateTime<Utc> {
    truncate_to_seconds(Utc::now())
}

pub fn truncate_to_seconds(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(value.timestamp(), 0).unwrap_or(value)
}

/// Encodes `value` as the stored decimal epoch string.
pub fn encode_timestamp(value: DateTime<Utc>) -> String {
    format!(
        "{}.{:06}",
        value.timestamp(),
        value.timestamp_subsec_micros()
    )
}

/// Parses a stored epoch string, keeping second precision.
///
/// Returns `None` for blobs that are not a finite decimal number in the
/// representable date range.
pub fn decode_timestamp(raw: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(raw).ok()?;
    let seconds: f64 = text.trim().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp(seconds.floor() as i64, 0)
}

/// Renders `value` as `Www, dd Mon yyyy HH:MM:SS +0000`.
pub fn format_http_date(value: DateTime<Utc>) -> String {
    value.format(HTTP_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::{decode_timestamp, encode_timestamp, format_http_date};
    use chrono::{DateTime, TimeZone, Utc};

    #[test]
    fn http_date_is_fixed_width_utc() {
        let value = Utc.with_ymd_and_hms(2012, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_http_date(value), "Sun, 04 Mar 2012 05:06:07 +0000");
    }

    #[test]
    fn decode_accepts_integer_and_fractional_seconds() {
        let expected = DateTime::from_timestamp(1_330_837_567, 0).unwrap();
        assert_eq!(decode_timestamp(b"1330837567"), Some(expected));
        assert_eq!(decode_timestamp(b"1330837567.987654"), Some(expected));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_timestamp(b"yesterday"), None);
        assert_eq!(decode_timestamp(b"NaN"), None);
        assert_eq!(decode_timestamp(&[0xff]), None);
    }

    #[test]
    fn encoded_value_decodes_to_same_second() {
        let value = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(decode_timestamp(encode_timestamp(value).as_bytes()), Some(value));
    }
}
