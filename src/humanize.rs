//! Human-readable sizes and durations for configuration values
//!
//! `ByteSize` accepts `"2MB"`, `"512K"` or a bare integer; durations accept
//! `"90s"`, `"15m"`, `"1h"`, `"1d"`, `"250ms"` or a bare integer of seconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

/// Split `"10MB"` into `(10, "MB")`.
fn split_number(s: &str) -> Result<(u64, &str), ParseError> {
    let pos = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ParseError::InvalidFormat(s.to_string()))?;
    if pos == 0 {
        return Err(ParseError::InvalidFormat(s.to_string()));
    }
    Ok((s[..pos].parse()?, s[pos..].trim()))
}

/// Byte size wrapper with human-readable parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const KB: u64 = 1024;
    pub const MB: u64 = 1024 * 1024;

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        if let Ok(num) = s.parse::<u64>() {
            return Ok(ByteSize(num));
        }

        let (num, unit) = split_number(&s)?;
        let multiplier = match unit {
            "B" => 1,
            "K" | "KB" | "KIB" => Self::KB,
            "M" | "MB" | "MIB" => Self::MB,
            "G" | "GB" | "GIB" => Self::MB * 1024,
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        Ok(ByteSize(num * multiplier))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            n if n >= Self::MB && n % Self::MB == 0 => write!(f, "{}MB", n / Self::MB),
            n if n >= Self::KB && n % Self::KB == 0 => write!(f, "{}KB", n / Self::KB),
            n => write!(f, "{}B", n),
        }
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(ByteSize(n)),
            NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

/// Parse a human duration such as `"1h"` or `"250ms"`.
pub fn parse_duration(s: &str) -> Result<Duration, ParseError> {
    let s = s.trim().to_lowercase();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let (num, unit) = split_number(&s)?;
    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "s" | "sec" | "secs" => Duration::from_secs(num),
        "m" | "min" | "mins" => Duration::from_secs(num * 60),
        "h" | "hr" | "hours" => Duration::from_secs(num * 3600),
        "d" | "day" | "days" => Duration::from_secs(num * 86400),
        _ => return Err(ParseError::InvalidUnit(unit.to_string())),
    };
    Ok(duration)
}

/// Format a duration the way `parse_duration` reads it back.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if d.subsec_nanos() != 0 || secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    match secs {
        s if s % 86400 == 0 => format!("{}d", s / 86400),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

/// `#[serde(with = "crate::humanize::duration")]` adapter.
pub mod duration {
    use super::{NumberOrString, format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(secs) => Ok(Duration::from_secs(secs)),
            NumberOrString::String(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }
}
