use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReinoError, Result};

/// The one separator used between category and product in a rendered key.
pub const KEY_SEPARATOR: char = ':';

/// Separators that have shown up in hand-written keys. None of them may
/// appear inside a component, so a rendered key always splits unambiguously.
const RESERVED_SEPARATORS: [char; 2] = [':', '|'];

/// Canonical identity of an investment choice.
///
/// Components are trimmed, lower-cased and have inner whitespace collapsed.
/// The fields are private: every key in the system comes out of
/// [`normalize_asset_key`] or [`AssetKey::from_str`], which runs the same rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey {
    category: String,
    product: String,
}

/// Build the canonical key for a `(category, product)` pair.
pub fn normalize_asset_key(category: &str, product: &str) -> Result<AssetKey> {
    Ok(AssetKey {
        category: normalize_component(category, "category")?,
        product: normalize_component(product, "product")?,
    })
}

fn normalize_component(raw: &str, field: &str) -> Result<String> {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if collapsed.is_empty() {
        return Err(ReinoError::InvalidInput(format!(
            "asset {} cannot be empty",
            field
        )));
    }

    if let Some(sep) = collapsed.chars().find(|c| RESERVED_SEPARATORS.contains(c)) {
        return Err(ReinoError::InvalidInput(format!(
            "asset {} '{}' contains reserved separator '{}'",
            field, raw, sep
        )));
    }

    Ok(collapsed)
}

impl AssetKey {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    /// Rendered form, e.g. `renda fixa:cdb`
    pub fn as_key_string(&self) -> String {
        format!("{}{}{}", self.category, KEY_SEPARATOR, self.product)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.category, KEY_SEPARATOR, self.product)
    }
}

impl FromStr for AssetKey {
    type Err = ReinoError;

    /// Parse a rendered key. Only [`KEY_SEPARATOR`] is accepted; a pipe-joined
    /// key is rejected instead of being silently reinterpreted.
    fn from_str(s: &str) -> Result<Self> {
        let (category, product) = s.split_once(KEY_SEPARATOR).ok_or_else(|| {
            ReinoError::InvalidInput(format!(
                "asset key '{}' must have the form category{}product",
                s, KEY_SEPARATOR
            ))
        })?;
        normalize_asset_key(category, product)
    }
}

impl Serialize for AssetKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_key_string())
    }
}

impl<'de> Deserialize<'de> for AssetKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
