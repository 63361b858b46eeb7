use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};

/// The stored text form of a timestamp. Fixed width, so lexical order
/// on the `ts` column is chronological order.
pub fn canonical_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Today's calendar date on the wall clock at `offset`
pub fn today(offset: &FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(offset).date_naive()
}

/// Integer division rounded half away from zero, 0 when `d` is 0
pub fn round_div(n: i64, d: i64) -> i64 {
    if d == 0 {
        return 0;
    }
    (n as f64 / d as f64).round() as i64
}

/// `part / whole` as a percentage with one decimal, 0 when `whole` is 0
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}
