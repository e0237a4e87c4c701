//! Time utilities: timezone-aware stamps for exported file names.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// `20240131-235959`
pub const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

pub fn parse_timezone(tz: &str) -> Result<Tz, TimeError> {
    tz.parse()
        .map_err(|_| TimeError::InvalidTimezone(tz.to_string()))
}

/// Format `now` as a file stamp in the IANA timezone `tz`.
pub fn stamp_in(now: DateTime<Utc>, tz: &str) -> Result<String, TimeError> {
    let tz = parse_timezone(tz)?;
    Ok(now.with_timezone(&tz).format(STAMP_FORMAT).to_string())
}

/// `{prefix}-{stamp}.{extension}`
pub fn stamped_file_name(
    prefix: &str,
    extension: &str,
    now: DateTime<Utc>,
    tz: &str,
) -> Result<String, TimeError> {
    Ok(format!("{prefix}-{}.{extension}", stamp_in(now, tz)?))
}

pub fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
}
