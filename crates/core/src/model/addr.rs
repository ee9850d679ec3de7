//! Serde helpers for addresses.
//!
//! Configuration files and recorded event streams may spell an address either
//! as a plain integer or as a `"0x..."` string. Both decode to `u64`;
//! serialization always produces the hex string form.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum AddrRepr {
    Int(u64),
    Text(String),
}

/// Parse an address written as decimal or `0x`-prefixed hex.
pub fn parse_addr(text: &str) -> Result<u64, std::num::ParseIntError> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.replace('_', "").parse(),
    }
}

pub fn serialize<S: Serializer>(addr: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{addr:#x}"))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match AddrRepr::deserialize(deserializer)? {
        AddrRepr::Int(value) => Ok(value),
        AddrRepr::Text(text) => parse_addr(&text)
            .map_err(|err| D::Error::custom(format!("invalid address '{text}': {err}"))),
    }
}
