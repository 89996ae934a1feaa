use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};

/// Seed used when none is configured, so repeated runs build identical folds.
pub const DEFAULT_SEED: u64 = 1;

/// Name-level choice of split strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Single stratified train/test split.
    FixedRatio,
    /// Stratified k-fold cross-validation.
    CrossValidation,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedRatio => write!(f, "fixed-ratio"),
            Self::CrossValidation => write!(f, "cross-validation"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = FlowError;

    /// Accepts `fixed-ratio`, `FixedRatio`, `fixed_ratio` and the same spellings
    /// of `cross-validation`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(*c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "fixedratio" => Ok(Self::FixedRatio),
            "crossvalidation" => Ok(Self::CrossValidation),
            _ => Err(FlowError::config(format!("unknown split strategy `{s}`"))),
        }
    }
}

/// Validated split strategy with its parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SplitStrategy {
    /// One fold; `train_fraction` of each class goes to training.
    FixedRatio {
        /// Fraction in the open interval (0, 1).
        train_fraction: f64,
    },
    /// `folds` stratified folds, each used once as the test set.
    CrossValidation {
        /// At least 2.
        folds: usize,
    },
}

impl SplitStrategy {
    /// Validates the single parameter each strategy takes.
    pub fn from_params(kind: StrategyKind, params: &[f64]) -> FlowResult<Self> {
        let [param] = params else {
            return Err(FlowError::config(format!(
                "{kind} takes exactly one parameter, got {}",
                params.len()
            )));
        };
        let param = *param;
        match kind {
            StrategyKind::FixedRatio => {
                if param.is_finite() && param > 0.0 && param < 1.0 {
                    Ok(Self::FixedRatio {
                        train_fraction: param,
                    })
                } else {
                    Err(FlowError::config(format!(
                        "train fraction must lie in (0, 1), got {param}"
                    )))
                }
            }
            StrategyKind::CrossValidation => {
                if param.is_finite() && param.fract() == 0.0 && param >= 2.0 {
                    Ok(Self::CrossValidation {
                        folds: param as usize,
                    })
                } else {
                    Err(FlowError::config(format!(
                        "fold count must be an integer >= 2, got {param}"
                    )))
                }
            }
        }
    }

    /// Parses a strategy name then validates its parameter.
    pub fn parse(name: &str, params: &[f64]) -> FlowResult<Self> {
        Self::from_params(name.parse()?, params)
    }

    /// Strategy kind.
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::FixedRatio { .. } => StrategyKind::FixedRatio,
            Self::CrossValidation { .. } => StrategyKind::CrossValidation,
        }
    }

    /// Number of folds a run produces.
    #[must_use]
    pub const fn fold_count(&self) -> usize {
        match self {
            Self::FixedRatio { .. } => 1,
            Self::CrossValidation { folds } => *folds,
        }
    }
}
