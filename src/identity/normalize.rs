//! Identity Normalizer
//!
//! Canonicalizes WWPN and MAC strings. The console, the arrays and operators
//! all write these identifiers differently (`C0:50:76:03:A2:92:00:84`,
//! `c0507603a2920084`, `c050.7603.a292.0084`); every comparison in the engine
//! goes through the canonical form produced here.

use crate::error::{Error, Result};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hex digits in a Fibre-Channel WWPN
pub const WWPN_HEX_DIGITS: usize = 16;

/// Number of hex digits in an Ethernet MAC
pub const MAC_HEX_DIGITS: usize = 12;

// =============================================================================
// Canonicalization
// =============================================================================

fn is_separator(c: char) -> bool {
    matches!(c, ':' | '-' | '.') || c.is_whitespace()
}

fn canonical_hex(field: &str, raw: &str, digits: usize) -> Result<String> {
    let mut out = String::with_capacity(digits);

    for c in raw.chars().filter(|c| !is_separator(*c)) {
        if !c.is_ascii_hexdigit() {
            return Err(Error::Format {
                field: field.to_string(),
                raw: raw.to_string(),
                reason: format!("non-hex character {:?}", c),
            });
        }
        out.push(c.to_ascii_lowercase());
    }

    if out.len() != digits {
        return Err(Error::Format {
            field: field.to_string(),
            raw: raw.to_string(),
            reason: format!("expected {} hex digits, found {}", digits, out.len()),
        });
    }

    Ok(out)
}

fn grouped(hex: &str) -> String {
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Normalize a raw WWPN string
pub fn normalize_wwpn(raw: &str) -> Result<Wwpn> {
    canonical_hex("wwpn", raw, WWPN_HEX_DIGITS).map(Wwpn)
}

/// Normalize a raw MAC string
pub fn normalize_mac(raw: &str) -> Result<Mac> {
    canonical_hex("mac", raw, MAC_HEX_DIGITS).map(Mac)
}

// =============================================================================
// WWPN
// =============================================================================

/// Canonical Fibre-Channel World Wide Port Name (16 lowercase hex digits)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wwpn(String);

impl Wwpn {
    /// Canonical form, e.g. `c0507603a2920084`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Colon-grouped uppercase form, e.g. `C0:50:76:03:A2:92:00:84`
    pub fn colon_form(&self) -> String {
        grouped(&self.0.to_ascii_uppercase())
    }
}

impl FromStr for Wwpn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        normalize_wwpn(s)
    }
}

impl TryFrom<String> for Wwpn {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        normalize_wwpn(&value)
    }
}

impl From<Wwpn> for String {
    fn from(value: Wwpn) -> Self {
        value.0
    }
}

impl fmt::Display for Wwpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl JsonSchema for Wwpn {
    fn schema_name() -> String {
        "Wwpn".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

// =============================================================================
// MAC
// =============================================================================

/// Canonical Ethernet MAC address (12 lowercase hex digits)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mac(String);

impl Mac {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Colon-grouped uppercase form, e.g. `12:34:56:78:9A:BC`
    pub fn colon_form(&self) -> String {
        grouped(&self.0.to_ascii_uppercase())
    }
}

impl FromStr for Mac {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        normalize_mac(s)
    }
}

impl TryFrom<String> for Mac {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        normalize_mac(&value)
    }
}

impl From<Mac> for String {
    fn from(value: Mac) -> Self {
        value.0
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl JsonSchema for Mac {
    fn schema_name() -> String {
        "Mac".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}
