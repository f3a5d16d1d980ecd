//! Serde helpers for byte fields, which travel as base64 strings on the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serializer};

#[allow(clippy::ptr_arg)]
pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let encoded = Option::<String>::deserialize(d)?.unwrap_or_default();
    STANDARD
        .decode(encoded.trim())
        .map_err(serde::de::Error::custom)
}

/// Decode a base64 annotation value, tolerating surrounding whitespace.
pub fn decode_str(value: &str) -> Option<String> {
    let raw = STANDARD.decode(value.trim()).ok()?;
    String::from_utf8(raw).ok()
}

pub fn encode_str(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}
