//! State validators
//!
//! Pure functions over a state snapshot (or a slice of it). None of them
//! fail: problems come back as a structured [`ValidationResult`] so callers
//! can keep the next-step buttons disabled without special-casing errors.

use crate::config::CalculatorConfig;
use crate::domain::{checked_total, ApplicationState, AssetKey, RotationIndex};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of a validator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Combine two results; valid only if both are
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.is_valid &= other.is_valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self
    }
}

/// Allocation check plus the total it was computed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationValidation {
    pub result: ValidationResult,
    /// Sum of allocation fractions (1.0 = 100%)
    pub total_percentage: Decimal,
}

/// Rotation check plus a usable value for callers to fall back on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationValidation {
    pub result: ValidationResult,
    pub normalized: RotationIndex,
}

/// Patrimony gate. `None` and non-positive values are invalid; values below
/// `low_threshold` pass with a warning.
pub fn validate_patrimonio(value: Option<Decimal>, low_threshold: Decimal) -> ValidationResult {
    match value {
        None => ValidationResult::invalid("patrimonio is not set"),
        Some(v) if v <= Decimal::ZERO => {
            ValidationResult::invalid(format!("patrimonio must be greater than zero, got {}", v))
        }
        Some(v) if v < low_threshold => ValidationResult::valid().with_warning(format!(
            "patrimonio {} is below the usual minimum of {}",
            v, low_threshold
        )),
        Some(_) => ValidationResult::valid(),
    }
}

/// Check allocation fractions (allocation / patrimonio per asset).
///
/// Invalid when the total exceeds 100% by more than `epsilon`; a warning
/// when it falls short.
pub fn validate_allocation<K>(
    fractions: &BTreeMap<K, Decimal>,
    epsilon: Decimal,
) -> AllocationValidation {
    let total = checked_total(fractions.values().copied());
    let mut result = ValidationResult::valid();

    if fractions.values().any(|f| *f < Decimal::ZERO) {
        result = result.merge(ValidationResult::invalid(
            "allocations cannot be negative",
        ));
    }

    if total > Decimal::ONE + epsilon {
        result = result.merge(ValidationResult::invalid(format!(
            "over-allocation: {}% of patrimonio allocated",
            as_percent(total)
        )));
    } else if total < Decimal::ONE - epsilon {
        result = result.with_warning(format!(
            "only {}% of patrimonio allocated",
            as_percent(total)
        ));
    }

    AllocationValidation {
        result,
        total_percentage: total,
    }
}

fn as_percent(fraction: Decimal) -> Decimal {
    fraction
        .checked_mul(Decimal::ONE_HUNDRED)
        .unwrap_or(Decimal::MAX)
        .normalize()
}

/// Allocation check computed from a full state
pub fn validate_allocation_state(
    state: &ApplicationState,
    epsilon: Decimal,
) -> AllocationValidation {
    if state.patrimonio() <= Decimal::ZERO {
        return AllocationValidation {
            result: ValidationResult::invalid("cannot allocate before patrimonio is set"),
            total_percentage: Decimal::ZERO,
        };
    }
    let mut validation = validate_allocation(&state.allocation_fractions(), epsilon);

    let unallocated: Vec<String> = state
        .selected_assets()
        .iter()
        .filter(|key| state.allocation(key).is_none())
        .map(|key| key.to_string())
        .collect();
    if !unallocated.is_empty() {
        validation
            .result
            .warnings
            .push(format!("no allocation for: {}", unallocated.join(", ")));
    }
    validation
}

/// At least one asset must be selected
pub fn validate_assets(selected: &BTreeSet<AssetKey>) -> ValidationResult {
    if selected.is_empty() {
        ValidationResult::invalid("select at least one asset")
    } else {
        ValidationResult::valid()
    }
}

/// Range check on a raw rotation value. The default index comes back as
/// `normalized` when the input is out of range.
pub fn validate_rotation_index(value: i64) -> RotationValidation {
    match u8::try_from(value).ok().and_then(RotationIndex::new) {
        Some(index) => RotationValidation {
            result: ValidationResult::valid(),
            normalized: index,
        },
        None => RotationValidation {
            result: ValidationResult::invalid(format!(
                "rotation index {} outside {}..={}",
                value,
                RotationIndex::MIN,
                RotationIndex::MAX
            )),
            normalized: RotationIndex::DEFAULT,
        },
    }
}

/// Validators bound to configured thresholds
#[derive(Debug, Clone)]
pub struct StateValidator {
    pub low_patrimonio_threshold: Decimal,
    pub allocation_epsilon: Decimal,
}

/// Every validator's verdict for one snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StateValidation {
    pub patrimonio: ValidationResult,
    pub assets: ValidationResult,
    pub allocation: AllocationValidation,
    pub rotation: RotationValidation,
}

impl StateValidation {
    pub fn is_valid(&self) -> bool {
        self.patrimonio.is_valid
            && self.assets.is_valid
            && self.allocation.result.is_valid
            && self.rotation.result.is_valid
    }
}

impl StateValidator {
    pub fn from_config(config: &CalculatorConfig) -> Self {
        Self {
            low_patrimonio_threshold: config.low_patrimonio_threshold,
            allocation_epsilon: config.allocation_epsilon,
        }
    }

    pub fn validate(&self, state: &ApplicationState) -> StateValidation {
        StateValidation {
            patrimonio: validate_patrimonio(
                Some(state.patrimonio()),
                self.low_patrimonio_threshold,
            ),
            assets: validate_assets(state.selected_assets()),
            allocation: validate_allocation_state(state, self.allocation_epsilon),
            rotation: validate_rotation_index(i64::from(state.rotation_index().value())),
        }
    }
}

impl Default for StateValidator {
    fn default() -> Self {
        Self::from_config(&CalculatorConfig::default())
    }
}
