//! Step gating for the calculator flow.
//!
//! This is the only place that decides whether a "next" button is enabled;
//! the decision is derived from the validators and nothing else.

use serde::Serialize;
use std::fmt;

use crate::domain::ApplicationState;
use crate::validation::{StateValidation, StateValidator, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Patrimonio,
    Assets,
    Allocation,
    Summary,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Patrimonio, Step::Assets, Step::Allocation, Step::Summary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Patrimonio => "patrimonio",
            Step::Assets => "assets",
            Step::Allocation => "allocation",
            Step::Summary => "summary",
        }
    }

    pub fn next(&self) -> Option<Step> {
        match self {
            Step::Patrimonio => Some(Step::Assets),
            Step::Assets => Some(Step::Allocation),
            Step::Allocation => Some(Step::Summary),
            Step::Summary => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the user may leave `step`, and why not
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    pub step: Step,
    pub enabled: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StepGate {
    validator: StateValidator,
}

impl StepGate {
    pub fn new(validator: StateValidator) -> Self {
        Self { validator }
    }

    pub fn evaluate(&self, state: &ApplicationState) -> Vec<StepStatus> {
        let validation = self.validator.validate(state);
        Step::ALL
            .iter()
            .map(|step| Self::status_for(*step, &validation))
            .collect()
    }

    pub fn can_advance(&self, step: Step, state: &ApplicationState) -> bool {
        Self::status_for(step, &self.validator.validate(state)).enabled
    }

    /// A step's gate includes every earlier step's gate
    fn status_for(step: Step, validation: &StateValidation) -> StepStatus {
        let mut combined = validation.patrimonio.clone();
        if step >= Step::Assets {
            combined = combined.merge(validation.assets.clone());
        }
        if step >= Step::Allocation {
            combined = combined.merge(validation.allocation.result.clone());
        }
        if step >= Step::Summary {
            combined = combined.merge(validation.rotation.result.clone());
        }
        let ValidationResult {
            is_valid,
            errors,
            warnings,
        } = combined;
        StepStatus {
            step,
            enabled: is_valid,
            errors,
            warnings,
        }
    }
}
