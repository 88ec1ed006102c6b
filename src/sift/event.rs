use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: i64,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    /// Timestamp exactly as the collector reported it.
    pub occurred_at: String,
    pub session_id: Option<i64>,
    pub processed: bool,
}

impl RawEvent {
    pub fn occurred_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.occurred_at)
    }

    pub fn url(&self) -> Option<&str> {
        payload_str(&self.payload, "url")
    }

    pub fn title(&self) -> Option<&str> {
        payload_str(&self.payload, "title")
    }

    /// Payload rendered as text, the way it is sent to the model.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// An event as handed over by a collector, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub source: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    pub occurred_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub start_time: String,
    pub end_time: String,
    pub event_count: usize,
    pub processed: bool,
}

const NAIVE_FORMATS: [&str; 8] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S",
    "%m/%d/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Parse the timestamp shapes collectors emit. Offset-less values are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    #[test]
    fn parse_timestamp_accepts_common_shapes() {
        let rfc = parse_timestamp("2024-01-15T10:30:00Z").expect("rfc3339");
        assert_eq!(rfc.hour(), 10);

        let offset = parse_timestamp("2024-01-15T10:30:00+02:00").expect("offset");
        assert_eq!(offset.hour(), 8);

        let naive = parse_timestamp("2024-01-15 10:30:00").expect("space separated");
        assert_eq!(naive.minute(), 30);

        let fractional = parse_timestamp("2024-01-15T10:30:00.250").expect("fractional");
        assert_eq!(fractional.second(), 0);

        let date_only = parse_timestamp("2024-01-15").expect("date only");
        assert_eq!(date_only.day(), 15);
        assert_eq!(date_only.hour(), 0);

        let compact = parse_timestamp("20240115T103000").expect("compact");
        assert_eq!(compact.month(), 1);
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday-ish").is_none());
    }

    #[test]
    fn url_and_title_come_from_payload() {
        let event = RawEvent {
            id: 1,
            source: "chrome".into(),
            event_type: "visit".into(),
            payload: json!({"url": "https://docs.rs", "title": "  "}),
            occurred_at: "2024-01-15T10:30:00Z".into(),
            session_id: None,
            processed: false,
        };
        assert_eq!(event.url(), Some("https://docs.rs"));
        assert_eq!(event.title(), None);
    }
}
