//! HTTP-date (IMF-fixdate) formatting and parsing.
//!
//! Used for `Expires` emission and `Last-Modified` interpretation. Dates are
//! always expressed in UTC, e.g. `Mon, 01 Jan 2024 00:00:00 GMT`.

use time::{
    OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};

const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Format a timestamp as an IMF-fixdate string.
pub fn format(at: OffsetDateTime) -> Option<String> {
    at.to_offset(UtcOffset::UTC).format(IMF_FIXDATE).ok()
}

/// Parse an IMF-fixdate string; returns `None` for anything else.
pub fn parse(raw: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(raw.trim(), IMF_FIXDATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}
