//! Fid: the structured object identifier used cluster-wide
//!
//! A Fid names a cluster object (a service instance, a process) as a
//! `container:key` pair of 64-bit values. The text form is two `0x`-prefixed
//! hex numbers separated by a colon:
//!
//! ```text
//! 0x7200000000000001:0x1f
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a Fid from its text form
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FidParseError {
    #[error("Fid '{0}' is missing the ':' separator")]
    MissingSeparator(String),

    #[error("Fid '{input}' has {part} without the 0x prefix")]
    MissingHexPrefix { input: String, part: &'static str },

    #[error("Fid '{input}' has an invalid {part}: {reason}")]
    InvalidHex {
        input: String,
        part: &'static str,
        reason: String,
    },
}

/// Cluster object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fid {
    pub container: u64,
    pub key: u64,
}

impl Fid {
    pub const fn new(container: u64, key: u64) -> Self {
        Self { container, key }
    }

    /// Parse the `0x<container>:0x<key>` text form
    pub fn parse(input: &str) -> Result<Self, FidParseError> {
        let (container, key) = input
            .split_once(':')
            .ok_or_else(|| FidParseError::MissingSeparator(input.to_string()))?;

        Ok(Self {
            container: parse_half(input, container, "container")?,
            key: parse_half(input, key, "key")?,
        })
    }
}

fn parse_half(input: &str, half: &str, part: &'static str) -> Result<u64, FidParseError> {
    let digits = half
        .strip_prefix("0x")
        .or_else(|| half.strip_prefix("0X"))
        .ok_or_else(|| FidParseError::MissingHexPrefix {
            input: input.to_string(),
            part,
        })?;

    // from_str_radix tolerates a leading '+', which is not part of the format
    if digits.starts_with('+') {
        return Err(FidParseError::InvalidHex {
            input: input.to_string(),
            part,
            reason: "unexpected sign".to_string(),
        });
    }

    u64::from_str_radix(digits, 16).map_err(|e| FidParseError::InvalidHex {
        input: input.to_string(),
        part,
        reason: e.to_string(),
    })
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}:0x{:x}", self.container, self.key)
    }
}

impl FromStr for Fid {
    type Err = FidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fid::parse(s)
    }
}

impl Serialize for Fid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fid::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_service_fid() {
        let fid = Fid::parse("0x7200000000000001:0x1f").unwrap();
        assert_eq!(fid, Fid::new(0x7200000000000001, 0x1f));
    }

    #[test]
    fn test_parse_accepts_uppercase_hex() {
        let fid = Fid::parse("0X72000000000000AB:0xFF").unwrap();
        assert_eq!(fid, Fid::new(0x72000000000000ab, 0xff));
    }

    #[test]
    fn test_display_uses_lowercase_hex() {
        let fid = Fid::new(0x7200000000000001, 0xAB);
        assert_eq!(fid.to_string(), "0x7200000000000001:0xab");
        assert_eq!(Fid::parse(&fid.to_string()).unwrap(), fid);
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert_eq!(
            Fid::parse("0x7200000000000001"),
            Err(FidParseError::MissingSeparator(
                "0x7200000000000001".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_rejects_decimal_halves() {
        let err = Fid::parse("12:0x4").unwrap_err();
        assert!(matches!(
            err,
            FidParseError::MissingHexPrefix {
                part: "container",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "service-a", "0x:0x1", "0x1:0xzz", "0x1:0x+1", " 0x1:0x2"] {
            assert!(Fid::parse(input).is_err(), "'{}' should not parse", input);
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(Fid::parse("0x1ffffffffffffffff:0x1").is_err());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let fid = Fid::new(0x7200000000000001, 0x4);
        let json = serde_json::to_string(&fid).unwrap();
        assert_eq!(json, "\"0x7200000000000001:0x4\"");

        let back: Fid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fid);

        assert!(serde_json::from_str::<Fid>("\"nope\"").is_err());
    }
}
