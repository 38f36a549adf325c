use std::f64::consts::LN_2;

use crate::{
    contrast::ResolvedContrast,
    error::{Result, TreatError},
    fit::{DesignMatrix, GeneModelFit},
    math::{deviance, dot, solve_symmetric},
};

/// Bound on the linear predictor to keep `exp` finite
const MAX_ETA: f64 = 700.0;

const MAX_ITER: usize = 200;
const MAX_HALVINGS: usize = 30;
const TOLERANCE: f64 = 1e-10;

/// Outcome of an IRLS fit on the natural-log scale
#[derive(Debug, Clone)]
pub struct IrlsFit {
    pub coefficients: Vec<f64>,
    pub deviance: f64,
    pub converged: bool,
}

fn fitted_means(design: &[Vec<f64>], offsets: &[f64], coefficients: &[f64]) -> Vec<f64> {
    design
        .iter()
        .zip(offsets.iter())
        .map(|(x, o)| (o + dot(x, coefficients)).clamp(-MAX_ETA, MAX_ETA).exp())
        .collect()
}

/// Least squares fit of `log(y + 0.5) - offset` on the design
///
/// Lands close to the optimum whatever offsets the caller has shifted in.
pub fn log_linear_start(design: &[Vec<f64>], counts: &[f64], offsets: &[f64]) -> Vec<f64> {
    let q = design.first().map_or(0, |x| x.len());
    let mut xtx = vec![0.0; q * q];
    let mut xty = vec![0.0; q];
    for ((x, y), o) in design.iter().zip(counts.iter()).zip(offsets.iter()) {
        let response = (y + 0.5).ln() - o;
        for j in 0..q {
            xty[j] += x[j] * response;
            for k in 0..q {
                xtx[j * q + k] += x[j] * x[k];
            }
        }
    }
    solve_symmetric(&xtx, &xty, q)
}

/// Fits a negative binomial log-linear model with fixed dispersion by Newton
/// iterations on the observed information, starting from `start`
///
/// The deviance is convex in the coefficients, so halving rejected steps always
/// makes progress. A fit is converged once the deviance or the step stops changing.
pub fn irls(
    design: &[Vec<f64>],
    counts: &[f64],
    offsets: &[f64],
    dispersion: f64,
    start: Vec<f64>,
) -> IrlsFit {
    let q = start.len();
    let mut coefficients = start;
    let mut mu = fitted_means(design, offsets, &coefficients);
    let mut dev = deviance(counts, &mu, dispersion);
    if q == 0 {
        return IrlsFit {
            coefficients,
            deviance: dev,
            converged: true,
        };
    }

    let mut converged = false;
    for _ in 0..MAX_ITER {
        let mut hessian = vec![0.0; q * q];
        let mut score = vec![0.0; q];
        for ((x, &y), &m) in design.iter().zip(counts.iter()).zip(mu.iter()) {
            let denom = 1.0 + dispersion * m;
            let weight = (m / denom) * ((1.0 + dispersion * y) / denom);
            let residual = (y - m) / denom;
            for j in 0..q {
                score[j] += x[j] * residual;
                for k in 0..q {
                    hessian[j * q + k] += x[j] * weight * x[k];
                }
            }
        }
        let mut step = solve_symmetric(&hessian, &score, q);

        let mut proposal = step
            .iter()
            .zip(coefficients.iter())
            .map(|(s, c)| c + s)
            .collect::<Vec<_>>();
        let mut proposal_mu = fitted_means(design, offsets, &proposal);
        let mut proposal_dev = deviance(counts, &proposal_mu, dispersion);
        let mut halvings = 0;
        while !(proposal_dev <= dev) && halvings < MAX_HALVINGS {
            step.iter_mut().for_each(|s| *s *= 0.5);
            proposal = step
                .iter()
                .zip(coefficients.iter())
                .map(|(s, c)| c + s)
                .collect();
            proposal_mu = fitted_means(design, offsets, &proposal);
            proposal_dev = deviance(counts, &proposal_mu, dispersion);
            halvings += 1;
        }
        if !(proposal_dev <= dev) {
            // no descent left along the Newton direction
            converged = dev.is_finite() && step.iter().all(|s| s.abs() < 1e-6);
            break;
        }

        let change = dev - proposal_dev;
        let step_size = step.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        coefficients = proposal;
        mu = proposal_mu;
        dev = proposal_dev;
        if change < TOLERANCE * (dev.abs() + 0.1) || step_size < TOLERANCE {
            converged = true;
            break;
        }
    }

    IrlsFit {
        coefficients,
        deviance: dev,
        converged,
    }
}

/// Deviance of a gene at its supplied log2 coefficients
pub fn gene_deviance(design: &DesignMatrix, gene: &GeneModelFit) -> f64 {
    let natural = gene
        .coefficients
        .iter()
        .map(|b| b * LN_2)
        .collect::<Vec<_>>();
    let mu = fitted_means(design.rows(), &gene.offsets, &natural);
    deviance(&gene.counts, &mu, gene.dispersion)
}

/// Model refitted under the linear constraint `c . beta = b0`
///
/// The constrained design `X N` is shared by all genes of a test and built once.
pub struct ConstrainedModel<'a> {
    design: &'a DesignMatrix,
    contrast: &'a ResolvedContrast,
    reduced: Vec<Vec<f64>>,
}

impl<'a> ConstrainedModel<'a> {
    pub fn new(design: &'a DesignMatrix, contrast: &'a ResolvedContrast) -> Self {
        let reduced = contrast.constrained_design(design);
        Self {
            design,
            contrast,
            reduced,
        }
    }

    /// Deviance of the best fit with `c . beta = b0` held fixed
    ///
    /// Two starts are tried: the projection of the supplied coefficients, and a
    /// log-linear fit of the constrained problem. `None` when neither converges.
    pub fn constrained_deviance(&self, gene: &GeneModelFit, b0: f64) -> Option<f64> {
        let anchor = self.contrast.anchor(b0);
        let offsets = self
            .design
            .rows()
            .iter()
            .zip(gene.offsets.iter())
            .map(|(x, o)| o + LN_2 * dot(x, &anchor))
            .collect::<Vec<_>>();
        let projected = self
            .contrast
            .project(&gene.coefficients)
            .into_iter()
            .map(|g| g * LN_2)
            .collect::<Vec<_>>();
        let warm = log_linear_start(&self.reduced, &gene.counts, &offsets);

        [projected, warm]
            .into_iter()
            .map(|start| irls(&self.reduced, &gene.counts, &offsets, gene.dispersion, start))
            .filter(|fit| fit.converged)
            .map(|fit| fit.deviance)
            .min_by(f64::total_cmp)
    }

    /// Likelihood ratio statistic of the point null `c . beta = b0` against the supplied fit
    ///
    /// Zero when the estimate already satisfies the null, and zero when the constrained
    /// refit fails to converge. Never negative. A deviance that is not a number fails
    /// with `InvalidFit`.
    pub fn likelihood_ratio(&self, gene: &GeneModelFit, b0: f64) -> Result<f64> {
        if self.contrast.estimate(&gene.coefficients) == b0 {
            return Ok(0.0);
        }
        let full = gene_deviance(self.design, gene);
        if full.is_nan() {
            return Err(TreatError::InvalidFit {
                reason: format!("gene '{}': deviance of the supplied fit is not a number", gene.gene),
            });
        }
        let Some(constrained) = self.constrained_deviance(gene, b0) else {
            log::warn!(
                "constrained fit for gene '{}' at log2FC {b0} did not converge, using LR = 0",
                gene.gene
            );
            return Ok(0.0);
        };
        let lr = constrained - full;
        if lr.is_nan() {
            return Err(TreatError::InvalidFit {
                reason: format!("gene '{}': deviance is not a number at log2FC {b0}", gene.gene),
            });
        }
        Ok(lr.max(0.0))
    }
}

/// Unconstrained maximum likelihood fit on the log2 scale, used to build test fixtures
#[cfg(test)]
pub(crate) fn fit_unconstrained(
    design: &DesignMatrix,
    counts: &[f64],
    offsets: &[f64],
    dispersion: f64,
) -> Vec<f64> {
    let start = log_linear_start(design.rows(), counts, offsets);
    irls(design.rows(), counts, offsets, dispersion, start)
        .coefficients
        .into_iter()
        .map(|g| g / LN_2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contrast::Contrast, fit::fixtures::*};
    use approx::assert_relative_eq;

    const COUNTS: [f64; 6] = [110.0, 85.0, 102.0, 470.0, 330.0, 405.0];

    #[test]
    fn test_unconstrained_fit_recovers_group_means() {
        // Poisson MLE of a two-group design matches the pooled rates exactly
        let design = two_group_design();
        let beta = fit_unconstrained(&design, &COUNTS, &offsets(), 0.0);
        let rate_a: f64 = (110.0 + 85.0 + 102.0) / (1.1e6 + 0.9e6 + 1.0e6);
        let rate_b: f64 = (470.0 + 330.0 + 405.0) / (1.2e6 + 0.8e6 + 1.0e6);
        assert_relative_eq!(beta[0], rate_a.log2(), epsilon = 1e-6);
        assert_relative_eq!(beta[1], (rate_b / rate_a).log2(), epsilon = 1e-6);
    }

    #[test]
    fn test_constrained_fit_never_beats_full_fit() {
        let gene = mle_gene("g", &COUNTS, 0.05);
        let design = two_group_design();
        let contrast = Contrast::coefficient("group").resolve(&design).unwrap();
        let model = ConstrainedModel::new(&design, &contrast);
        let full = gene_deviance(&design, &gene);
        for b0 in [-2.0, 0.0, 1.0, 2.0, 3.0] {
            assert!(model.constrained_deviance(&gene, b0).unwrap() >= full - 1e-8);
        }
    }

    #[test]
    fn test_likelihood_ratio_vanishes_at_estimate() {
        let gene = mle_gene("g", &COUNTS, 0.05);
        let design = two_group_design();
        let contrast = Contrast::coefficient("group").resolve(&design).unwrap();
        let model = ConstrainedModel::new(&design, &contrast);
        let estimate = contrast.estimate(&gene.coefficients);
        assert_eq!(model.likelihood_ratio(&gene, estimate).unwrap(), 0.0);
        assert!(model.likelihood_ratio(&gene, estimate + 1e-3).unwrap() < 1e-3);
    }

    #[test]
    fn test_likelihood_ratio_grows_away_from_estimate() {
        let gene = mle_gene("g", &COUNTS, 0.05);
        let design = two_group_design();
        let contrast = Contrast::coefficient("group").resolve(&design).unwrap();
        let model = ConstrainedModel::new(&design, &contrast);
        let lr = [0.0, 0.5, 1.0, 1.5]
            .iter()
            .map(|&b0| model.likelihood_ratio(&gene, b0).unwrap())
            .collect::<Vec<_>>();
        for pair in lr.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn test_poisson_likelihood_ratio_closed_form() {
        // Two-group Poisson: the constrained fit pools both groups at a fixed ratio
        let design = two_group_design();
        let gene = mle_gene("g", &COUNTS, 0.0);
        let contrast = Contrast::coefficient("group").resolve(&design).unwrap();
        let model = ConstrainedModel::new(&design, &contrast);

        let (ya, yb) = (297.0f64, 1205.0f64);
        let (la, lb) = (3.0e6f64, 3.0e6f64);
        let total = ya + yb;
        let rate = total / (la + lb);
        let expected = 2.0 * (ya * (ya / (la * rate)).ln() + yb * (yb / (lb * rate)).ln());
        assert_relative_eq!(
            model.likelihood_ratio(&gene, 0.0).unwrap(),
            expected,
            epsilon = 1e-6
        );
    }

    /// Minimum of the constrained deviance by ternary search over the log2 intercept
    fn brute_force_deviance(gene: &GeneModelFit, b0: f64) -> f64 {
        let design = two_group_design();
        let deviance_at = |a: f64| {
            let mu = design
                .rows()
                .iter()
                .zip(gene.offsets.iter())
                .map(|(x, o)| (o + LN_2 * (a * x[0] + b0 * x[1])).exp())
                .collect::<Vec<_>>();
            deviance(&gene.counts, &mu, gene.dispersion)
        };
        let (mut lo, mut hi) = (-40.0f64, 10.0f64);
        for _ in 0..300 {
            let m1 = lo + (hi - lo) / 3.0;
            let m2 = hi - (hi - lo) / 3.0;
            if deviance_at(m1) < deviance_at(m2) {
                hi = m2;
            } else {
                lo = m1;
            }
        }
        deviance_at(0.5 * (lo + hi))
    }

    #[test]
    fn test_constrained_deviance_reaches_optimum_far_from_estimate() {
        let counts = [1985.0, 1783.0, 2365.0, 50644.0, 23455.0, 35108.0];
        let design = two_group_design();
        let contrast = Contrast::coefficient("group").resolve(&design).unwrap();
        let model = ConstrainedModel::new(&design, &contrast);
        for dispersion in [0.05, 1.0] {
            let gene = mle_gene("g", &counts, dispersion);
            for b0 in [-2.5, -2.6, -2.7, -2.85, -4.0, 0.0, 2.0, 6.0] {
                let observed = model.constrained_deviance(&gene, b0).unwrap();
                let expected = brute_force_deviance(&gene, b0);
                assert_relative_eq!(observed, expected, epsilon = 1e-7, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_irls_converges_at_high_dispersion() {
        let counts = [1985.0, 1783.0, 2365.0, 50644.0, 23455.0, 35108.0];
        let design = two_group_design();
        let offsets = offsets();
        let start = log_linear_start(design.rows(), &counts, &offsets);
        let fit = irls(design.rows(), &counts, &offsets, 1.0, start);
        assert!(fit.converged);
        assert_relative_eq!(fit.coefficients[1] / LN_2, 4.1157, epsilon = 1e-3);
        assert_relative_eq!(fit.deviance, 0.10438, epsilon = 1e-4);
    }

    #[test]
    fn test_nan_deviance_is_an_error() {
        let design = two_group_design();
        let contrast = Contrast::coefficient("group").resolve(&design).unwrap();
        let model = ConstrainedModel::new(&design, &contrast);
        let mut gene = mle_gene("g", &COUNTS, 0.05);
        gene.counts[2] = f64::NAN;
        assert!(matches!(
            model.likelihood_ratio(&gene, 0.0),
            Err(TreatError::InvalidFit { .. })
        ));
    }
}
