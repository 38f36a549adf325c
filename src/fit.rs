use itertools::Itertools;

use crate::error::{Result, TreatError};

/// Design matrix shared by every gene of a fit
///
/// One row per sample, one named column per model coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl DesignMatrix {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if columns.is_empty() {
            return Err(TreatError::InvalidFit {
                reason: "design matrix has no columns".to_string(),
            });
        }
        if rows.is_empty() {
            return Err(TreatError::InvalidFit {
                reason: "design matrix has no rows".to_string(),
            });
        }
        if let Some(name) = columns.iter().duplicates().next() {
            return Err(TreatError::InvalidFit {
                reason: format!("duplicate design column '{name}'"),
            });
        }
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(TreatError::InvalidFit {
                reason: format!(
                    "design row {i} has {} entries, expected {}",
                    row.len(),
                    columns.len()
                ),
            });
        }
        if rows.iter().flatten().any(|x| !x.is_finite()) {
            return Err(TreatError::InvalidFit {
                reason: "design matrix contains non-finite entries".to_string(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Two-group design with an intercept and an indicator for the second group
    pub fn two_group(group: &[bool]) -> Result<Self> {
        let rows = group
            .iter()
            .map(|&g| vec![1.0, if g { 1.0 } else { 0.0 }])
            .collect();
        Self::new(vec!["(Intercept)".to_string(), "group".to_string()], rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    pub fn n_coefficients(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Fitting mode of the upstream model, resolved when the fit is created
///
/// Decides which reference distributions turn a likelihood ratio into a p-value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FitKind {
    /// Plain negative binomial likelihood: chi-squared(1) and the standard normal
    #[default]
    Likelihood,
    /// Quasi-likelihood fit: F(1, df) and Student's t(df)
    QuasiLikelihood {
        /// Posterior quasi-likelihood dispersion
        dispersion: f64,
        /// Total residual degrees of freedom (prior plus residual)
        df: f64,
    },
}

/// Negative binomial GLM fit of a single gene
///
/// Coefficients are on the log2 scale, so that the fitted mean of sample `j` is
/// `exp(offset_j + ln(2) * x_j . beta)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneModelFit {
    pub gene: String,
    pub coefficients: Vec<f64>,
    pub dispersion: f64,
    /// Average log2 counts-per-million
    pub log_cpm: f64,
    pub counts: Vec<f64>,
    /// Natural-log offsets, typically log effective library sizes
    pub offsets: Vec<f64>,
    pub kind: FitKind,
}

impl GeneModelFit {
    pub fn new(
        gene: impl Into<String>,
        coefficients: Vec<f64>,
        dispersion: f64,
        log_cpm: f64,
        counts: Vec<f64>,
        offsets: Vec<f64>,
    ) -> Self {
        Self {
            gene: gene.into(),
            coefficients,
            dispersion,
            log_cpm,
            counts,
            offsets,
            kind: FitKind::Likelihood,
        }
    }

    pub fn with_kind(mut self, kind: FitKind) -> Self {
        self.kind = kind;
        self
    }

    /// Checks the fit against the shared design
    fn validate(&self, design: &DesignMatrix) -> Result<()> {
        let invalid = |reason: String| TreatError::InvalidFit {
            reason: format!("gene '{}': {reason}", self.gene),
        };
        if self.coefficients.len() != design.n_coefficients() {
            return Err(invalid(format!(
                "{} coefficients for a design with {} columns",
                self.coefficients.len(),
                design.n_coefficients()
            )));
        }
        if self.counts.len() != design.n_samples() || self.offsets.len() != design.n_samples() {
            return Err(invalid(format!(
                "{} counts and {} offsets for a design with {} samples",
                self.counts.len(),
                self.offsets.len(),
                design.n_samples()
            )));
        }
        if self.coefficients.iter().any(|b| !b.is_finite()) {
            return Err(invalid("non-finite coefficient".to_string()));
        }
        if self.offsets.iter().any(|o| !o.is_finite()) {
            return Err(invalid("non-finite offset".to_string()));
        }
        if self.counts.iter().any(|&y| !y.is_finite() || y < 0.0) {
            return Err(invalid("counts must be finite and non-negative".to_string()));
        }
        if !self.dispersion.is_finite() || self.dispersion < 0.0 {
            return Err(invalid(format!(
                "dispersion must be finite and non-negative, got {}",
                self.dispersion
            )));
        }
        if let FitKind::QuasiLikelihood { dispersion, df } = self.kind {
            if !(dispersion.is_finite() && dispersion > 0.0 && df.is_finite() && df > 0.0) {
                return Err(invalid(format!(
                    "quasi-likelihood dispersion {dispersion} and df {df} must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Immutable collection of per-gene fits sharing one design
///
/// Passed explicitly to every test so successive contrasts never share hidden state.
#[derive(Debug, Clone, PartialEq)]
pub struct GlmFit {
    design: DesignMatrix,
    genes: Vec<GeneModelFit>,
}

impl GlmFit {
    pub fn new(design: DesignMatrix, genes: Vec<GeneModelFit>) -> Result<Self> {
        for gene in &genes {
            gene.validate(&design)?;
        }
        if let Some(gene) = genes.iter().map(|g| &g.gene).duplicates().next() {
            return Err(TreatError::InconsistentGeneSet {
                reason: format!("gene '{gene}' appears more than once"),
            });
        }
        Ok(Self { design, genes })
    }

    pub fn design(&self) -> &DesignMatrix {
        &self.design
    }

    pub fn genes(&self) -> &[GeneModelFit] {
        &self.genes
    }

    pub fn gene_ids(&self) -> impl Iterator<Item = &str> {
        self.genes.iter().map(|g| g.gene.as_str())
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_design_rejects_ragged_rows() {
        let err = DesignMatrix::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0, 0.0], vec![1.0]],
        )
        .unwrap_err();
        assert!(matches!(err, TreatError::InvalidFit { .. }));
    }

    #[test]
    fn test_design_rejects_duplicate_columns() {
        let err = DesignMatrix::new(
            vec!["a".to_string(), "a".to_string()],
            vec![vec![1.0, 0.0]],
        )
        .unwrap_err();
        assert!(matches!(err, TreatError::InvalidFit { .. }));
    }

    #[test]
    fn test_two_group_design() {
        let design = two_group_design();
        assert_eq!(design.n_samples(), 6);
        assert_eq!(design.n_coefficients(), 2);
        assert_eq!(design.column_index("group"), Some(1));
        assert_eq!(design.rows()[4], vec![1.0, 1.0]);
    }

    #[test]
    fn test_fit_rejects_dimension_mismatch() {
        let gene = GeneModelFit::new("g1", vec![1.0], 0.1, 5.0, vec![1.0; 6], offsets());
        let err = GlmFit::new(two_group_design(), vec![gene]).unwrap_err();
        assert!(matches!(err, TreatError::InvalidFit { .. }));
    }

    #[test]
    fn test_fit_rejects_negative_dispersion() {
        let gene = GeneModelFit::new("g1", vec![1.0, 0.0], -0.1, 5.0, vec![1.0; 6], offsets());
        let err = GlmFit::new(two_group_design(), vec![gene]).unwrap_err();
        assert!(matches!(err, TreatError::InvalidFit { .. }));
    }

    #[test]
    fn test_fit_rejects_degenerate_quasi_likelihood() {
        let gene = GeneModelFit::new("g1", vec![1.0, 0.0], 0.1, 5.0, vec![1.0; 6], offsets())
            .with_kind(FitKind::QuasiLikelihood {
                dispersion: 0.0,
                df: 4.0,
            });
        let err = GlmFit::new(two_group_design(), vec![gene]).unwrap_err();
        assert!(matches!(err, TreatError::InvalidFit { .. }));
    }

    #[test]
    fn test_fit_rejects_duplicate_genes() {
        let a = mle_gene("g1", &[10.0, 12.0, 9.0, 20.0, 18.0, 22.0], 0.1);
        let b = a.clone();
        let err = GlmFit::new(two_group_design(), vec![a, b]).unwrap_err();
        assert!(matches!(err, TreatError::InconsistentGeneSet { .. }));
    }
}
