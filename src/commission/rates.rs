//! Commission reference data
//!
//! Both tables are keyed by [`AssetKey`], so a file entry written as
//! `"Renda Fixa" / "CDB"` and a user selection of `"renda fixa" / "cdb"`
//! resolve to the same row.
//!
//! File format (JSON), category -> product -> value:
//!
//! ```json
//! { "Renda Fixa": { "CDB": { "min": 0.8, "max": 1.7, "media": 1.25 } } }
//! ```
//!
//! Rotation overrides use the same nesting with an index -> percentage map:
//!
//! ```json
//! { "Renda Variável": { "Ações": { "1": 0.5, "2": 1.0, "3": 1.5, "4": 2.0 } } }
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::domain::{normalize_asset_key, AssetKey, RotationIndex};
use crate::error::{ReinoError, Result};

/// Annual commission range for one product, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRate {
    pub min: Decimal,
    pub max: Decimal,
    pub media: Decimal,
}

impl CommissionRate {
    pub fn new(min: Decimal, max: Decimal, media: Decimal) -> Result<Self> {
        let rate = Self { min, max, media };
        rate.validate()?;
        Ok(rate)
    }

    fn validate(&self) -> Result<()> {
        if self.min < Decimal::ZERO {
            return Err(ReinoError::Validation(format!(
                "commission min cannot be negative: {}",
                self.min
            )));
        }
        if self.min > self.media || self.media > self.max {
            return Err(ReinoError::Validation(format!(
                "commission rate must satisfy min <= media <= max, got {} / {} / {}",
                self.min, self.media, self.max
            )));
        }
        Ok(())
    }
}

type NestedTable<V> = BTreeMap<String, BTreeMap<String, V>>;

/// Flatten category -> product nesting into canonical keys, rejecting
/// entries that collide after normalization
fn flatten<V>(nested: NestedTable<V>, what: &str) -> Result<BTreeMap<AssetKey, V>> {
    let mut flat = BTreeMap::new();
    for (category, products) in nested {
        for (product, value) in products {
            let key = normalize_asset_key(&category, &product)
                .map_err(|e| ReinoError::Validation(format!("{} entry: {}", what, e)))?;
            if flat.insert(key.clone(), value).is_some() {
                return Err(ReinoError::Validation(format!(
                    "duplicate {} entry for {}",
                    what, key
                )));
            }
        }
    }
    Ok(flat)
}

/// Static `(category, product) -> rate` lookup, immutable after load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    rates: BTreeMap<AssetKey, CommissionRate>,
}

impl RateTable {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (AssetKey, CommissionRate)>,
    {
        Self {
            rates: entries.into_iter().collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let nested: NestedTable<CommissionRate> = serde_json::from_str(json)?;
        let rates = flatten(nested, "rate table")?;
        for (key, rate) in &rates {
            rate.validate()
                .map_err(|e| ReinoError::Validation(format!("{}: {}", key, e)))?;
        }
        Ok(Self { rates })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let table = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), entries = table.len(), "commission rate table loaded");
        Ok(table)
    }

    /// Reference rates shipped with the calculator
    pub fn builtin() -> Self {
        let rows: [(&str, &str, Decimal, Decimal, Decimal); 17] = [
            ("Renda Fixa", "CDB", dec!(0.8), dec!(1.7), dec!(1.25)),
            ("Renda Fixa", "LCI", dec!(0.6), dec!(1.4), dec!(1.0)),
            ("Renda Fixa", "LCA", dec!(0.6), dec!(1.4), dec!(1.0)),
            ("Renda Fixa", "CRI", dec!(1.0), dec!(2.0), dec!(1.5)),
            ("Renda Fixa", "CRA", dec!(1.0), dec!(2.0), dec!(1.5)),
            ("Renda Fixa", "Debêntures", dec!(1.0), dec!(2.2), dec!(1.6)),
            ("Renda Fixa", "Tesouro Direto", dec!(0.1), dec!(0.5), dec!(0.3)),
            ("Renda Variável", "Ações", dec!(0.5), dec!(1.5), dec!(1.0)),
            ("Renda Variável", "ETF", dec!(0.3), dec!(0.9), dec!(0.6)),
            ("Renda Variável", "Fundos Imobiliários", dec!(0.5), dec!(1.5), dec!(1.0)),
            ("Renda Variável", "BDR", dec!(0.5), dec!(1.5), dec!(1.0)),
            ("Fundos", "Multimercado", dec!(1.5), dec!(2.5), dec!(2.0)),
            ("Fundos", "Ações", dec!(1.5), dec!(2.5), dec!(2.0)),
            ("Fundos", "Renda Fixa", dec!(0.5), dec!(1.5), dec!(1.0)),
            ("Previdência", "PGBL", dec!(1.0), dec!(2.0), dec!(1.5)),
            ("Previdência", "VGBL", dec!(1.0), dec!(2.0), dec!(1.5)),
            ("COE", "COE", dec!(2.0), dec!(5.0), dec!(3.5)),
        ];

        rows.into_iter()
            .filter_map(|(category, product, min, max, media)| {
                normalize_asset_key(category, product)
                    .ok()
                    .map(|key| (key, CommissionRate { min, max, media }))
            })
            .collect::<BTreeMap<_, _>>()
            .into()
    }

    pub fn get(&self, key: &AssetKey) -> Option<&CommissionRate> {
        self.rates.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetKey, &CommissionRate)> {
        self.rates.iter()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl From<BTreeMap<AssetKey, CommissionRate>> for RateTable {
    fn from(rates: BTreeMap<AssetKey, CommissionRate>) -> Self {
        Self { rates }
    }
}

/// Per-product annual percentage for each rotation index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotationTable {
    overrides: BTreeMap<AssetKey, BTreeMap<RotationIndex, Decimal>>,
}

impl RotationTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (AssetKey, BTreeMap<RotationIndex, Decimal>)>,
    {
        Self {
            overrides: entries.into_iter().collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let nested: NestedTable<BTreeMap<String, Decimal>> = serde_json::from_str(json)?;
        let flat = flatten(nested, "rotation table")?;

        let mut overrides = BTreeMap::new();
        for (key, by_index) in flat {
            let mut parsed = BTreeMap::new();
            for (raw_index, pct) in by_index {
                let index = raw_index
                    .trim()
                    .parse::<u8>()
                    .ok()
                    .and_then(RotationIndex::new)
                    .ok_or_else(|| {
                        ReinoError::Validation(format!(
                            "{}: invalid rotation index '{}'",
                            key, raw_index
                        ))
                    })?;
                if pct < Decimal::ZERO {
                    return Err(ReinoError::Validation(format!(
                        "{}: negative rotation rate {}",
                        key, pct
                    )));
                }
                parsed.insert(index, pct);
            }
            overrides.insert(key, parsed);
        }
        Ok(Self { overrides })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let table = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), entries = table.overrides.len(), "rotation table loaded");
        Ok(table)
    }

    /// Turnover-sensitive products shipped with the calculator
    pub fn builtin() -> Self {
        let equity = [dec!(0.5), dec!(1.0), dec!(1.5), dec!(2.0)];
        let etf = [dec!(0.3), dec!(0.6), dec!(0.9), dec!(1.2)];
        let rows = [
            ("Renda Variável", "Ações", equity),
            ("Renda Variável", "BDR", equity),
            ("Renda Variável", "ETF", etf),
        ];

        let overrides = rows
            .into_iter()
            .filter_map(|(category, product, pcts)| {
                let key = normalize_asset_key(category, product).ok()?;
                let by_index: BTreeMap<RotationIndex, Decimal> =
                    RotationIndex::all().zip(pcts).collect();
                Some((key, by_index))
            })
            .collect();
        Self { overrides }
    }

    /// Annual percentage for `key` at `index`, if an override exists
    pub fn rate_pct(&self, key: &AssetKey, index: RotationIndex) -> Option<Decimal> {
        self.overrides.get(key)?.get(&index).copied()
    }

    pub fn has_key(&self, key: &AssetKey) -> bool {
        self.overrides.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_table_has_cdb() {
        let table = RateTable::builtin();
        let cdb = normalize_asset_key("Renda Fixa", "CDB").unwrap();
        assert_eq!(table.get(&cdb).unwrap().media, dec!(1.25));
        assert_eq!(table.len(), 17);
        for (key, rate) in table.iter() {
            assert!(rate.validate().is_ok(), "builtin rate for {key} is inconsistent");
        }
    }

    #[test]
    fn test_json_keys_are_normalized() {
        let table = RateTable::from_json_str(
            r#"{ "  RENDA FIXA ": { "cdb": { "min": 1, "max": 2, "media": 1.5 } } }"#,
        )
        .unwrap();
        let key = normalize_asset_key("Renda Fixa", "CDB").unwrap();
        assert_eq!(table.get(&key).unwrap().media, dec!(1.5));
    }

    #[test]
    fn test_json_rejects_colliding_keys() {
        let err = RateTable::from_json_str(
            r#"{ "Renda Fixa": {
                    "CDB": { "min": 1, "max": 2, "media": 1.5 },
                    "cdb": { "min": 1, "max": 2, "media": 1.5 } } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_json_rejects_inconsistent_rate() {
        let result = RateTable::from_json_str(
            r#"{ "Renda Fixa": { "CDB": { "min": 2, "max": 1, "media": 1.5 } } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_json_rejects_separator_in_product() {
        let result = RateTable::from_json_str(
            r#"{ "Renda Fixa": { "CDB|Pós": { "min": 1, "max": 2, "media": 1.5 } } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rotation_table_from_json() {
        let table = RotationTable::from_json_str(
            r#"{ "Renda Variável": { "Ações": { "1": 0.5, "3": 1.5 } } }"#,
        )
        .unwrap();
        let key = normalize_asset_key("renda variável", "ações").unwrap();
        assert_eq!(
            table.rate_pct(&key, RotationIndex::new(3).unwrap()),
            Some(dec!(1.5))
        );
        assert_eq!(table.rate_pct(&key, RotationIndex::new(2).unwrap()), None);

        assert!(RotationTable::from_json_str(r#"{ "A": { "B": { "7": 1.0 } } }"#).is_err());
    }

    #[test]
    fn test_rate_table_from_path() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let path = dir.path().join("rates.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{ "Previdência": {{ "PGBL": {{ "min": 1.0, "max": 2.0, "media": 1.5 }} }} }}"#
        )
        .unwrap();

        let table = RateTable::from_path(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert!(RateTable::from_path(dir.path().join("missing.json")).is_err());
    }
}
