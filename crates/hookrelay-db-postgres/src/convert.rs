//! Conversions between the `time` types used by the domain model and the
//! `chrono` types sqlx decodes `TIMESTAMPTZ` into.

use chrono::{DateTime, Utc};
use time::OffsetDateTime;

pub(crate) fn time_to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_else(Utc::now)
}

pub(crate) fn chrono_to_time(dt: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(dt.timestamp()).unwrap_or(OffsetDateTime::UNIX_EPOCH)
        + time::Duration::nanoseconds(i64::from(dt.timestamp_subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn conversion_preserves_sub_second_precision() {
        let original = datetime!(2025-03-01 12:30:45.123456 UTC);
        let converted = chrono_to_time(time_to_chrono(original));
        assert_eq!(converted, original);
    }
}
