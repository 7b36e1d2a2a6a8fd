//! Domain types for the notready binary.
//!
//! # Philosophy
//!
//! - **Validated construction**: parsing is the only way in
//! - **Zero panics**: `FromStr` returns `Result`

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use notready_core::Error;

// =============================================================================
// Duration Types
// =============================================================================

/// Duration written the way operators type it on a command line.
///
/// Accepts a sequence of `<integer><unit>` parts with units `h`, `m`, `s`
/// and `ms`, for example `90s`, `10m`, `1h30m` or `500ms`. A bare `0` is
/// also accepted. Precision is whole milliseconds; finer parts of a
/// converted `Duration` are dropped.
///
/// # Examples
///
/// ```
/// use notready::types::HumanDuration;
///
/// let timeout: HumanDuration = "1h30m".parse().unwrap();
/// assert_eq!(timeout.as_secs(), 5400);
/// assert_eq!(timeout.to_string(), "1h30m");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HumanDuration(Duration);

impl HumanDuration {
    /// Create a duration from seconds
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Get duration in seconds
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    /// Get the inner `std::time::Duration`
    #[must_use]
    pub const fn inner(self) -> Duration {
        self.0
    }

    /// Check if duration is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

fn unit_duration(value: u64, unit: &str, input: &str) -> Result<Duration, Error> {
    let overflow = || Error::invalid_duration(input, "value too large");
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(overflow),
        "h" => value
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(overflow),
        "" => Err(Error::invalid_duration(input, format!("missing unit after '{value}'"))),
        other => Err(Error::invalid_duration(
            input,
            format!("unknown unit '{other}'. Must be h, m, s, or ms"),
        )),
    }
}

impl FromStr for HumanDuration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(Error::invalid_duration(s, "empty duration"));
        }
        if input == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        let mut rest = input;
        while !rest.is_empty() {
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if digits_end == 0 {
                return Err(Error::invalid_duration(input, "expected a number"));
            }
            let value: u64 = rest[..digits_end]
                .parse()
                .map_err(|e| Error::invalid_duration(input, format!("{e}")))?;
            rest = &rest[digits_end..];

            let unit_end = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
            let part = unit_duration(value, &rest[..unit_end], input)?;
            rest = &rest[unit_end..];

            total = total
                .checked_add(part)
                .ok_or_else(|| Error::invalid_duration(input, "value too large"))?;
        }

        Ok(Self(total))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_zero() {
            return write!(f, "0s");
        }
        let secs = self.0.as_secs();
        let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
        let millis = self.0.subsec_millis();

        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        if seconds > 0 {
            write!(f, "{seconds}s")?;
        }
        if millis > 0 {
            write!(f, "{millis}ms")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for HumanDuration {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HumanDuration> for String {
    fn from(duration: HumanDuration) -> Self {
        duration.to_string()
    }
}

impl From<Duration> for HumanDuration {
    fn from(duration: Duration) -> Self {
        Self(Duration::from_millis(
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        ))
    }
}

impl From<HumanDuration> for Duration {
    fn from(duration: HumanDuration) -> Self {
        duration.0
    }
}
