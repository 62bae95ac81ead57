//! Canonical hardware (MAC) addresses.
//!
//! Operators write MAC addresses in several styles: `AA:BB:CC:DD:EE:FF`,
//! `aa-bb-cc-dd-ee-ff`, or a bare `AABBCCDDEEFF`.  Every entry point into the
//! system (config file, HTTP body, captured frame) funnels through
//! [`MacAddress::parse`] so that the rest of the code only ever sees one
//! representation.
//!
//! # Accepted forms
//!
//! | Form                  | Length | Example             |
//! |-----------------------|--------|---------------------|
//! | No separator          | 12     | `AABBCCDDEEFF`      |
//! | Colon every 2 chars   | 17     | `AA:BB:CC:DD:EE:FF` |
//! | Hyphen every 2 chars  | 17     | `aa-bb-cc-dd-ee-ff` |
//!
//! The separator must be the same throughout and must sit exactly between
//! octets.  Hex digits may be either case.  The canonical textual form is
//! uppercase, colon-separated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of octets in an Ethernet hardware address.
pub const MAC_LEN: usize = 6;

/// Length of a MAC written without separators (two hex chars per octet).
const BARE_LEN: usize = MAC_LEN * 2;

/// Length of a MAC written with one separator between each octet.
const SEPARATED_LEN: usize = BARE_LEN + MAC_LEN - 1;

/// The input could not be interpreted as a 6-octet MAC address.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid MAC address '{input}': {reason}")]
pub struct InvalidAddress {
    /// The text exactly as the caller supplied it.
    pub input: String,
    /// Short human-readable description of what was wrong.
    pub reason: &'static str,
}

impl InvalidAddress {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// A 6-octet Ethernet hardware address.
///
/// `Display` renders the canonical form (`AA:BB:CC:DD:EE:FF`), which is also
/// the serde representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; MAC_LEN]);

impl MacAddress {
    /// The all-ones broadcast address.
    pub const BROADCAST: MacAddress = MacAddress([0xFF; MAC_LEN]);

    /// Wraps raw octets.
    pub const fn new(octets: [u8; MAC_LEN]) -> Self {
        Self(octets)
    }

    /// Returns the raw octets.
    pub const fn octets(&self) -> [u8; MAC_LEN] {
        self.0
    }

    /// Parses any of the accepted textual forms.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidAddress`] when the stripped text is not exactly 12
    /// hex digits, or when separators are mixed or misplaced.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lanwake_core::MacAddress;
    ///
    /// let a = MacAddress::parse("aa-bb-cc-dd-ee-ff").unwrap();
    /// let b = MacAddress::parse("AABBCCDDEEFF").unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.to_string(), "AA:BB:CC:DD:EE:FF");
    /// ```
    pub fn parse(input: &str) -> Result<Self, InvalidAddress> {
        let raw = input.trim();
        let bytes = raw.as_bytes();

        let hex_digits: Vec<u8> = match bytes.len() {
            BARE_LEN => bytes.to_vec(),
            SEPARATED_LEN => {
                let sep = bytes[2];
                if sep != b':' && sep != b'-' {
                    return Err(InvalidAddress::new(input, "separator must be ':' or '-'"));
                }
                let mut digits = Vec::with_capacity(BARE_LEN);
                for (i, &b) in bytes.iter().enumerate() {
                    if i % 3 == 2 {
                        if b != sep {
                            return Err(InvalidAddress::new(
                                input,
                                "separators must be consistent and between octets",
                            ));
                        }
                    } else {
                        digits.push(b);
                    }
                }
                digits
            }
            _ => return Err(InvalidAddress::new(input, "expected exactly 12 hex digits")),
        };

        let mut octets = [0u8; MAC_LEN];
        for (octet, pair) in octets.iter_mut().zip(hex_digits.chunks_exact(2)) {
            match (hex_value(pair[0]), hex_value(pair[1])) {
                (Some(hi), Some(lo)) => *octet = (hi << 4) | lo,
                _ => return Err(InvalidAddress::new(input, "non-hex digit")),
            }
        }
        Ok(Self(octets))
    }
}

/// Decodes one ASCII hex digit.
fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<[u8; MAC_LEN]> for MacAddress {
    fn from(octets: [u8; MAC_LEN]) -> Self {
        Self(octets)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        MacAddress::parse(&text).map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
