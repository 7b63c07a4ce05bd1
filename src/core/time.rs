use std::time::Duration as StdDuration;

use serde::de::Error as _;
use serde::Deserialize;
use time::macros::format_description;
use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn to_primitive_utc(value: OffsetDateTime) -> PrimitiveDateTime {
    let utc = value.to_offset(UtcOffset::UTC);
    PrimitiveDateTime::new(utc.date(), utc.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

/// Wall-clock delay from `now` until `deadline`; zero when the deadline has passed.
pub(crate) fn delay_until(deadline: PrimitiveDateTime, now: PrimitiveDateTime) -> StdDuration {
    StdDuration::try_from(deadline - now).unwrap_or(StdDuration::ZERO)
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` read as UTC.
pub(crate) fn parse_datetime(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }
    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(value.assume_utc());
    }
    PrimitiveDateTime::parse(raw, &format_description!("[year]-[month]-[day]T[hour]:[minute]"))
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

pub(crate) fn deserialize_datetime<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_datetime(&raw).ok_or_else(|| D::Error::custom(format!("invalid datetime: {raw}")))
}
