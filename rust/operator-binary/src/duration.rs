//! Parses the human-written validity periods used by [`CertificateRequest`](crate::crd::CertificateRequest)s

use std::time::Duration;

use snafu::{ResultExt, Snafu};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Units accepted in duration literals. Days are only accepted as a bare day count.
const LITERAL_UNITS: [&str; 6] = ["h", "m", "s", "ms", "us", "ns"];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "{text:?} is not a valid duration (expected a day count such as \"90d\", or a duration such as \"72h\")"
    ))]
    InvalidDuration {
        source: humantime::DurationError,
        text: String,
    },

    #[snafu(display(
        "{text:?} uses unsupported unit {unit:?} (expected one of {LITERAL_UNITS:?}, or a bare day count such as \"90d\")"
    ))]
    UnsupportedUnit { text: String, unit: String },
}

/// Parses either a bare day count (`"90d"`) or a duration literal (`"72h"`, `"1h30m"`).
///
/// Duration literals are restricted to hours and smaller units, so `"5d3h"` or `"2w"` are rejected.
pub fn parse(text: &str) -> Result<Duration, Error> {
    if let Some(days) = text
        .strip_suffix('d')
        .and_then(|days| days.parse::<u64>().ok())
    {
        if let Some(secs) = days.checked_mul(SECS_PER_DAY) {
            return Ok(Duration::from_secs(secs));
        }
    }
    if let Some(unit) = text
        .split(|c: char| c.is_ascii_digit() || c.is_whitespace())
        .find(|unit| !unit.is_empty() && !LITERAL_UNITS.contains(unit))
    {
        return UnsupportedUnitSnafu { text, unit }.fail();
    }
    humantime::parse_duration(text).context(InvalidDurationSnafu { text })
}
