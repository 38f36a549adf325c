//! treatnb: Testing Relative to a Threshold for Negative Binomial fits
//!
//! This library tests per-gene negative binomial GLM fits for differential
//! expression against a log2 fold-change threshold. Genes whose estimated change
//! lies inside `[-lfc, lfc]` are never called, and genes outside it are tested
//! against both interval boundaries with a modified likelihood ratio statistic.
//!
//! The main components of this library are:
//! - `GlmFit`: The immutable per-gene fits and the design they share
//! - `Contrast`: The comparison being tested
//! - `ThresholdTest`: The threshold test itself, see also `run_test`
//! - `TestResults`: Per-gene statistics, p-values and FDR
//! - `decide`: Up/down/not-significant calls from a set of results

mod config;
mod contrast;
mod decide;
mod error;
mod fit;
mod glm;
mod math;
mod pvalue;
mod results;
mod treat;

pub use config::{AdjustMethod, ThresholdSpec};
pub use contrast::Contrast;
pub use decide::{decide, Decision, DecisionSummary, DecisionVector};
pub use error::{Result, TreatError};
pub use fit::{DesignMatrix, FitKind, GeneModelFit, GlmFit};
pub use results::{GeneResult, TestResults};
pub use treat::{likelihood_ratio_test, run_test, ThresholdTest};
