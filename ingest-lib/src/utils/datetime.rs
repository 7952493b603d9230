use chrono::{DateTime, Local, Utc};
use std::time::SystemTime;

/// RFC 3339 timestamp in UTC, used to stamp errors-log entries.
pub fn get_utc_iso_datetime() -> String {
    return Utc::now().to_rfc3339();
}

pub fn get_local_datetime_with_format(format: &str) -> String {
    return Local::now().format(format).to_string();
}

pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    return DateTime::<Utc>::from(time);
}
