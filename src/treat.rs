use rayon::prelude::*;

use crate::{
    config::{AdjustMethod, ThresholdSpec},
    contrast::{Contrast, ResolvedContrast},
    error::{Result, TreatError},
    fit::{GeneModelFit, GlmFit},
    glm::ConstrainedModel,
    pvalue::Reference,
    results::{GeneResult, TestResults},
};

/// Likelihood ratio test of a contrast against a log2 fold-change threshold
///
/// TREAT
/// Testing significance relative to a fold-change threshold (McCarthy & Smyth, 2009)
pub struct ThresholdTest<'a> {
    fit: &'a GlmFit,
    contrast: Contrast,
    spec: ThresholdSpec,
    adjust: AdjustMethod,
}

impl<'a> ThresholdTest<'a> {
    pub fn new(fit: &'a GlmFit, contrast: impl Into<Contrast>, spec: ThresholdSpec) -> Self {
        Self {
            fit,
            contrast: contrast.into(),
            spec,
            adjust: AdjustMethod::default(),
        }
    }

    /// Replaces the default Benjamini-Hochberg adjustment
    pub fn with_adjustment(mut self, adjust: AdjustMethod) -> Self {
        self.adjust = adjust;
        self
    }

    /// Run the threshold test
    ///
    /// The test is a three-step process:
    /// 1. Validate the threshold, the input size and the contrast
    /// 2. Test every gene independently
    /// 3. Adjust the p-values of the whole batch
    ///
    /// Either every gene gets a row, in input order, or the call fails.
    pub fn run(&self) -> Result<TestResults> {
        self.spec.validate()?;
        if self.fit.is_empty() {
            return Err(TreatError::EmptyInput);
        }
        let contrast = self.contrast.resolve(self.fit.design())?;
        let references = self
            .fit
            .genes()
            .iter()
            .map(|gene| Reference::new(gene.kind))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "testing {} genes against |log2FC| <= {} with {:?} adjustment",
            self.fit.len(),
            self.spec.lfc,
            self.adjust
        );

        // Test each gene
        let model = ConstrainedModel::new(self.fit.design(), &contrast);
        let mut gene_results = self
            .fit
            .genes()
            .par_iter()
            .zip(references.par_iter())
            .map(|(gene, reference)| self.process_gene(&model, &contrast, gene, reference))
            .collect::<Result<Vec<_>>>()?;

        // Adjust once every p-value is in
        let pvalues = gene_results.iter().map(|r| r.pvalue).collect::<Vec<_>>();
        let fdrs = self.adjust.adjust(&pvalues);
        for (gene_result, fdr) in gene_results.iter_mut().zip(fdrs) {
            gene_result.fdr = fdr;
        }

        log::debug!(
            "{} of {} genes at FDR <= 0.05",
            gene_results.iter().filter(|r| r.fdr <= 0.05).count(),
            gene_results.len()
        );

        Ok(TestResults::from_vec(gene_results, self.spec.lfc))
    }

    /// Process a single gene
    ///
    /// A zero threshold gives the ordinary likelihood ratio test of `c . beta = 0`.
    /// Otherwise estimates inside the closed interval `[-lfc, lfc]` carry no evidence
    /// against the null and get a zero statistic with p-value 1. Estimates outside it
    /// are tested against both boundaries, and the signed-root tail probabilities
    /// of the two point tests are summed.
    ///
    /// Fails when a deviance cannot be evaluated for the gene.
    fn process_gene(
        &self,
        model: &ConstrainedModel,
        contrast: &ResolvedContrast,
        gene: &GeneModelFit,
        reference: &Reference,
    ) -> Result<GeneResult> {
        let logfc = contrast.estimate(&gene.coefficients);
        let lfc = self.spec.lfc;

        let (statistic, pvalue) = if self.spec.is_point() {
            let statistic = reference.statistic(model.likelihood_ratio(gene, 0.0)?);
            (statistic, reference.point_pvalue(statistic))
        } else if logfc.abs() <= lfc {
            (0.0, 1.0)
        } else {
            let sign = logfc.signum();
            let near = reference.statistic(model.likelihood_ratio(gene, sign * lfc)?);
            let far = reference.statistic(model.likelihood_ratio(gene, -sign * lfc)?);
            let pvalue = reference.upper_tail(near.sqrt()) + reference.upper_tail(far.sqrt());
            (near, pvalue.min(1.0))
        };

        Ok(GeneResult::builder()
            .gene(gene.gene.clone())
            .logfc(logfc)
            .log_cpm(gene.log_cpm)
            .statistic(statistic)
            .pvalue(pvalue)
            .fdr(pvalue)
            .build())
    }
}

/// Tests every gene of `fit` against the interval null `|c . beta| <= spec.lfc`
pub fn run_test(
    fit: &GlmFit,
    contrast: impl Into<Contrast>,
    spec: ThresholdSpec,
) -> Result<TestResults> {
    ThresholdTest::new(fit, contrast, spec).run()
}

/// Ordinary likelihood ratio test of `c . beta = 0`
pub fn likelihood_ratio_test(fit: &GlmFit, contrast: impl Into<Contrast>) -> Result<TestResults> {
    ThresholdTest::new(fit, contrast, ThresholdSpec::point()).run()
}
