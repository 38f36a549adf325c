use std::fmt;

use derive_new::new;
use itertools::Itertools;

use crate::{
    error::{Result, TreatError},
    fit::GlmFit,
    results::TestResults,
};

/// Call made for one gene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Decision {
    Down = -1,
    NotSig = 0,
    Up = 1,
}

impl Decision {
    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Down => write!(f, "Down"),
            Decision::NotSig => write!(f, "NotSig"),
            Decision::Up => write!(f, "Up"),
        }
    }
}

/// Number of genes called in each direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, new)]
pub struct DecisionSummary {
    pub down: usize,
    pub not_sig: usize,
    pub up: usize,
}

/// Per-gene calls, indexed by the same identifiers as the results they came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionVector {
    pub genes: Vec<String>,
    pub decisions: Vec<Decision>,
}

impl DecisionVector {
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn get(&self, gene: &str) -> Option<Decision> {
        self.genes
            .iter()
            .position(|g| g == gene)
            .map(|i| self.decisions[i])
    }

    pub fn as_i8(&self) -> Vec<i8> {
        self.decisions.iter().map(|d| d.as_i8()).collect()
    }

    pub fn summary(&self) -> DecisionSummary {
        let counts = self.decisions.iter().copied().counts();
        DecisionSummary {
            down: counts.get(&Decision::Down).copied().unwrap_or(0),
            not_sig: counts.get(&Decision::NotSig).copied().unwrap_or(0),
            up: counts.get(&Decision::Up).copied().unwrap_or(0),
        }
    }

    /// Verifies the calls cover exactly the genes of `fit`, in the same order
    pub fn check_against(&self, fit: &GlmFit) -> Result<()> {
        if self.len() != fit.len() {
            return Err(TreatError::InconsistentGeneSet {
                reason: format!("{} decisions for {} fitted genes", self.len(), fit.len()),
            });
        }
        if let Some((ours, theirs)) = self
            .genes
            .iter()
            .zip(fit.gene_ids())
            .find(|(ours, theirs)| ours.as_str() != *theirs)
        {
            return Err(TreatError::InconsistentGeneSet {
                reason: format!("decision for '{ours}' where the fit has '{theirs}'"),
            });
        }
        Ok(())
    }
}

/// Classifies each gene as up, down or not significant
///
/// A gene is called when its FDR is at most `fdr_cutoff` and its log2 fold-change
/// lies strictly beyond `lfc_filter` in either direction.
///
/// `lfc_filter` is applied after testing and is independent of the threshold the
/// results were tested against. Combining a tested threshold with a non-zero filter
/// narrows the called set further than either one alone: a gene must both reject
/// the interval null and show an estimated change larger than the filter.
pub fn decide(results: &TestResults, fdr_cutoff: f64, lfc_filter: f64) -> Result<DecisionVector> {
    if !(0.0..=1.0).contains(&fdr_cutoff) {
        return Err(TreatError::InvalidThreshold {
            reason: format!("FDR cutoff must lie in [0, 1], got {fdr_cutoff}"),
        });
    }
    if !lfc_filter.is_finite() || lfc_filter < 0.0 {
        return Err(TreatError::InvalidThreshold {
            reason: format!("lfc filter must be finite and non-negative, got {lfc_filter}"),
        });
    }
    if let Some(gene) = results.genes.iter().duplicates().next() {
        return Err(TreatError::InconsistentGeneSet {
            reason: format!("gene '{gene}' appears more than once in the results"),
        });
    }

    let decisions = results
        .logfcs
        .iter()
        .zip(results.fdrs.iter())
        .map(|(&logfc, &fdr)| {
            if fdr > fdr_cutoff || fdr.is_nan() {
                Decision::NotSig
            } else if logfc > lfc_filter {
                Decision::Up
            } else if logfc < -lfc_filter {
                Decision::Down
            } else {
                Decision::NotSig
            }
        })
        .collect();

    Ok(DecisionVector {
        genes: results.genes.clone(),
        decisions,
    })
}
