//! KRPC encodes booleans as the integers `0`/`1` rather than bencode's
//! (nonexistent) boolean type. This module is used via
//! `#[serde(with = "booleans")]` / `deserialize_with = "booleans::deserialize"`.

use serde::de::Deserializer;
use serde::Deserialize;

pub fn is_false(value: &bool) -> bool {
    !*value
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = u8::deserialize(deserializer)?;
    Ok(value != 0)
}
