use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, UtcOffset};

/// Parses a date value of a document.
///
/// Accepts RFC 3339 timestamps, timestamps without an offset (read as UTC), plain `YYYY-MM-DD`
/// dates (midnight UTC), and numbers (milliseconds since the Unix epoch).
pub fn parse_datetime(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::Number(millis) => {
            let nanos = i128::from(millis.as_i64()?).checked_mul(1_000_000)?;
            OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
        }
        Value::String(text) => parse_datetime_str(text.trim()),
        _ => None,
    }
}

fn parse_datetime_str(text: &str) -> Option<OffsetDateTime> {
    if let Ok(datetime) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(datetime);
    }
    if text.contains('T') {
        return OffsetDateTime::parse(&format!("{text}Z"), &Rfc3339).ok();
    }

    let mut parts = text.splitn(3, '-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = Month::try_from(parts.next()?.parse::<u8>().ok()?).ok()?;
    let day = parts.next()?.parse::<u8>().ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;
    Some(date.midnight().assume_utc())
}

/// Formats a timestamp in its canonical form: `YYYY-MM-DDTHH:MM:SS.mmmZ`.
///
/// Precision below milliseconds is dropped.
pub fn format_datetime(datetime: OffsetDateTime) -> String {
    let datetime = datetime.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        datetime.year(),
        u8::from(datetime.month()),
        datetime.day(),
        datetime.hour(),
        datetime.minute(),
        datetime.second(),
        datetime.millisecond()
    )
}

/// Normalizes a date value to its canonical timestamp string.
pub fn normalize_datetime(value: &Value) -> Option<String> {
    parse_datetime(value).map(format_datetime)
}
