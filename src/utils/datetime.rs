use chrono::{DateTime, NaiveDate, Utc};

/// dd.mm.yyyy, the format used in user-facing messages.
pub fn format_date(date: &NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

pub fn format_time(dt: &DateTime<Utc>) -> String {
    dt.format("%H:%M").to_string()
}
