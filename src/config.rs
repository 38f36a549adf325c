use adjustp::{adjust, Procedure};
use derive_new::new;

use crate::error::{Result, TreatError};

/// Log2 fold-change threshold defining the interval null `|beta| <= lfc`
///
/// A threshold of zero reduces the test to the ordinary point-null likelihood ratio test.
#[derive(Debug, Clone, Copy, PartialEq, new)]
pub struct ThresholdSpec {
    pub lfc: f64,
}

impl ThresholdSpec {
    /// Point null `beta = 0`
    pub fn point() -> Self {
        Self { lfc: 0.0 }
    }

    /// Threshold expressed as a linear fold-change, e.g. `1.2` for a 20% change
    pub fn from_fold_change(fc: f64) -> Self {
        Self { lfc: fc.log2().abs() }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.lfc.is_finite() || self.lfc < 0.0 {
            return Err(TreatError::InvalidThreshold {
                reason: format!("lfc must be finite and non-negative, got {}", self.lfc),
            });
        }
        Ok(())
    }

    pub fn is_point(&self) -> bool {
        self.lfc == 0.0
    }
}

impl Default for ThresholdSpec {
    fn default() -> Self {
        Self::point()
    }
}

/// Multiple testing adjustment applied across every gene of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdjustMethod {
    None,
    #[default]
    BenjaminiHochberg,
    Bonferroni,
}

impl AdjustMethod {
    pub fn adjust(&self, pvalues: &[f64]) -> Vec<f64> {
        if pvalues.is_empty() {
            return Vec::new();
        }
        match self {
            AdjustMethod::None => pvalues.to_vec(),
            AdjustMethod::BenjaminiHochberg => adjust(pvalues, Procedure::BenjaminiHochberg),
            AdjustMethod::Bonferroni => adjust(pvalues, Procedure::Bonferroni),
        }
    }
}
