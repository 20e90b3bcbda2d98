use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ShipmentId);
id_newtype!(EventId);
id_newtype!(MediaId);

pub const TRACKING_CODE_PREFIX: &str = "SPD";
const TIMESTAMP_DIGITS: usize = 6;
const RANDOM_DIGITS: usize = 3;
pub const TRACKING_CODE_DIGITS: usize = TIMESTAMP_DIGITS + RANDOM_DIGITS;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const SUPPORTED_CURRENCIES: [&str; 8] = ["USD", "EUR", "GBP", "CAD", "AUD", "JPY", "CNY", "INR"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingCodeError {
    #[error("tracking code must start with {}", TRACKING_CODE_PREFIX)]
    MissingPrefix,
    #[error("tracking code must have {} digits after the prefix", TRACKING_CODE_DIGITS)]
    BadDigits,
}

/// Public shipment identifier: `SPD` followed by six timestamp-derived digits
/// and three random digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingCode(String);

impl TrackingCode {
    /// Accepts user-typed input: surrounding whitespace is ignored and the
    /// prefix is matched case-insensitively.
    pub fn parse(raw: &str) -> Result<Self, TrackingCodeError> {
        let normalized = raw.trim().to_ascii_uppercase();
        let digits = normalized
            .strip_prefix(TRACKING_CODE_PREFIX)
            .ok_or(TrackingCodeError::MissingPrefix)?;
        if digits.len() != TRACKING_CODE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TrackingCodeError::BadDigits);
        }
        Ok(Self(normalized))
    }

    pub fn compose(unix_millis: i64, random: u32) -> Self {
        let timestamp = unix_millis.rem_euclid(10_i64.pow(TIMESTAMP_DIGITS as u32));
        let random = random % 10_u32.pow(RANDOM_DIGITS as u32);
        Self(format!("{TRACKING_CODE_PREFIX}{timestamp:06}{random:03}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn share_path(&self) -> String {
        format!("/track/{}", self.0)
    }
}

impl fmt::Display for TrackingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrackingCode {
    type Err = TrackingCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TrackingCode {
    type Error = TrackingCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TrackingCode> for String {
    fn from(value: TrackingCode) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(format!("unsupported media kind '{other}'")),
        }
    }
}

pub fn is_supported_currency(currency: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(&currency)
}
