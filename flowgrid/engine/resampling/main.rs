//! Stratified resampling and pipeline validation.

/// Confusion counts and error rate.
pub mod confusion;
/// Fold construction.
pub mod folds;
/// Split strategy selection.
pub mod strategy;
/// Validator driving pipelines through folds.
pub mod validator;

pub use confusion::ConfusionMatrix;
pub use folds::{build_folds, fixed_ratio_split, stratified_folds, Fold};
pub use strategy::{SplitStrategy, StrategyKind, DEFAULT_SEED};
pub use validator::{evaluate_fold, FoldOutcome, FoldSummary, PipelineHarness, ValidationReport, Validator};
