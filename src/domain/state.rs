use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::asset::AssetKey;

/// Portfolio turnover assumption selecting an alternate commission table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RotationIndex(u8);

impl RotationIndex {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;
    pub const DEFAULT: RotationIndex = RotationIndex(2);

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX)
            .contains(&value)
            .then_some(RotationIndex(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = RotationIndex> {
        (Self::MIN..=Self::MAX).map(RotationIndex)
    }
}

impl Default for RotationIndex {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for RotationIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RotationIndex::new(value).ok_or_else(|| {
            format!(
                "rotation index {} outside {}..={}",
                value,
                RotationIndex::MIN,
                RotationIndex::MAX
            )
        })
    }
}

impl From<RotationIndex> for u8 {
    fn from(value: RotationIndex) -> Self {
        value.0
    }
}

impl fmt::Display for RotationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contact details captured at the end of the flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
    /// How the contact was captured (e.g. "typebot")
    pub method: String,
    pub completed_at: DateTime<Utc>,
}

/// Provenance of the most recent mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub last_source: String,
    pub last_updated: DateTime<Utc>,
}

/// User-entered calculator state.
///
/// Fields are only writable inside the crate; the store is the single writer
/// and consumers receive immutable [`StateSnapshot`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub(crate) patrimonio: Decimal,
    pub(crate) selected_assets: BTreeSet<AssetKey>,
    pub(crate) allocations: BTreeMap<AssetKey, Decimal>,
    pub(crate) rotation_index: RotationIndex,
    pub(crate) contact: Option<ContactInfo>,
    pub(crate) metadata: StateMetadata,
}

/// Shared read-only view handed to every listener of one mutation
pub type StateSnapshot = Arc<ApplicationState>;

impl ApplicationState {
    pub fn new(rotation_index: RotationIndex) -> Self {
        Self {
            patrimonio: Decimal::ZERO,
            selected_assets: BTreeSet::new(),
            allocations: BTreeMap::new(),
            rotation_index,
            contact: None,
            metadata: StateMetadata {
                last_source: "init".to_string(),
                last_updated: Utc::now(),
            },
        }
    }

    pub fn patrimonio(&self) -> Decimal {
        self.patrimonio
    }

    pub fn selected_assets(&self) -> &BTreeSet<AssetKey> {
        &self.selected_assets
    }

    pub fn is_selected(&self, key: &AssetKey) -> bool {
        self.selected_assets.contains(key)
    }

    pub fn allocations(&self) -> &BTreeMap<AssetKey, Decimal> {
        &self.allocations
    }

    pub fn allocation(&self, key: &AssetKey) -> Option<Decimal> {
        self.allocations.get(key).copied()
    }

    pub fn rotation_index(&self) -> RotationIndex {
        self.rotation_index
    }

    pub fn contact(&self) -> Option<&ContactInfo> {
        self.contact.as_ref()
    }

    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    /// Sum of all allocated amounts, saturating at `Decimal::MAX`
    pub fn total_allocated(&self) -> Decimal {
        checked_total(self.allocations.values().copied())
    }

    /// Allocation of each asset as a fraction of patrimony (0.25 = 25%).
    /// Empty when patrimony is zero. A share too large to represent
    /// saturates at `Decimal::MAX`.
    pub fn allocation_fractions(&self) -> BTreeMap<AssetKey, Decimal> {
        if self.patrimonio <= Decimal::ZERO {
            return BTreeMap::new();
        }
        self.allocations
            .iter()
            .map(|(key, amount)| {
                let share = amount.checked_div(self.patrimonio).unwrap_or(Decimal::MAX);
                (key.clone(), share)
            })
            .collect()
    }

    /// Sum of [`Self::allocation_fractions`]
    pub fn allocated_fraction(&self) -> Decimal {
        checked_total(self.allocation_fractions().into_values())
    }

    pub(crate) fn touch(&mut self, source: &str) {
        self.metadata = StateMetadata {
            last_source: source.to_string(),
            last_updated: Utc::now(),
        };
    }
}

/// Sum of non-negative amounts without overflow panics
pub fn checked_total<I>(values: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .unwrap_or(Decimal::MAX)
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self::new(RotationIndex::DEFAULT)
    }
}
