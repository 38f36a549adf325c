use crate::{
    error::{Result, TreatError},
    fit::DesignMatrix,
    math::dot,
};

/// Comparison being tested, as a single coefficient or a linear combination of them
#[derive(Debug, Clone, PartialEq)]
pub enum Contrast {
    /// Coefficient named after a design column
    Coefficient(String),
    /// Coefficient by column position
    Index(usize),
    /// Weights applied to the coefficient vector, one per design column
    Vector(Vec<f64>),
}

impl Contrast {
    pub fn coefficient(name: impl Into<String>) -> Self {
        Contrast::Coefficient(name.into())
    }

    /// Resolves the contrast into a weight vector for the given design
    pub fn resolve(&self, design: &DesignMatrix) -> Result<ResolvedContrast> {
        let p = design.n_coefficients();
        let weights = match self {
            Contrast::Coefficient(name) => {
                let index = design.column_index(name).ok_or_else(|| TreatError::InvalidContrast {
                    reason: format!(
                        "coefficient '{name}' not found, available: {:?}",
                        design.columns()
                    ),
                })?;
                unit_vector(p, index)
            }
            Contrast::Index(index) => {
                if *index >= p {
                    return Err(TreatError::InvalidContrast {
                        reason: format!("coefficient index {index} out of range for {p} columns"),
                    });
                }
                unit_vector(p, *index)
            }
            Contrast::Vector(weights) => {
                if weights.len() != p {
                    return Err(TreatError::InvalidContrast {
                        reason: format!(
                            "contrast has {} weights but the design has {p} columns",
                            weights.len()
                        ),
                    });
                }
                if weights.iter().any(|w| !w.is_finite()) {
                    return Err(TreatError::InvalidContrast {
                        reason: "contrast contains non-finite weights".to_string(),
                    });
                }
                if weights.iter().all(|&w| w == 0.0) {
                    return Err(TreatError::InvalidContrast {
                        reason: "contrast has no non-zero weights".to_string(),
                    });
                }
                weights.clone()
            }
        };
        Ok(ResolvedContrast::new(weights))
    }
}

impl From<&str> for Contrast {
    fn from(name: &str) -> Self {
        Contrast::Coefficient(name.to_string())
    }
}

impl From<Vec<f64>> for Contrast {
    fn from(weights: Vec<f64>) -> Self {
        Contrast::Vector(weights)
    }
}

fn unit_vector(p: usize, index: usize) -> Vec<f64> {
    let mut weights = vec![0.0; p];
    weights[index] = 1.0;
    weights
}

/// Contrast weights together with a reparameterisation of the coefficient space
///
/// Any coefficient vector satisfying `c . beta = b0` can be written as
/// `b0 * c / |c|^2 + N gamma`, where the columns of `N` are an orthonormal basis
/// of the complement of `c`. Constrained fits search over `gamma` only.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContrast {
    weights: Vec<f64>,
    norm_sq: f64,
    /// Row-major `p x (p - 1)`
    complement: Vec<Vec<f64>>,
}

impl ResolvedContrast {
    fn new(weights: Vec<f64>) -> Self {
        let norm_sq = dot(&weights, &weights);
        let complement = orthogonal_complement(&weights, norm_sq);
        Self {
            weights,
            norm_sq,
            complement,
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Contrast applied to a coefficient vector
    pub fn estimate(&self, coefficients: &[f64]) -> f64 {
        dot(&self.weights, coefficients)
    }

    /// Number of free parameters left once the contrast is fixed
    pub fn free_parameters(&self) -> usize {
        self.weights.len() - 1
    }

    /// Particular solution of `c . beta = b0`
    pub fn anchor(&self, b0: f64) -> Vec<f64> {
        self.weights.iter().map(|w| w * b0 / self.norm_sq).collect()
    }

    /// Maps free parameters back to a full coefficient vector
    pub fn expand(&self, b0: f64, gamma: &[f64]) -> Vec<f64> {
        self.anchor(b0)
            .into_iter()
            .zip(self.complement.iter())
            .map(|(a, row)| a + dot(row, gamma))
            .collect()
    }

    /// Projects a coefficient vector onto the free parameters
    pub fn project(&self, coefficients: &[f64]) -> Vec<f64> {
        (0..self.free_parameters())
            .map(|k| {
                self.complement
                    .iter()
                    .zip(coefficients.iter())
                    .map(|(row, b)| row[k] * b)
                    .sum()
            })
            .collect()
    }

    /// Design matrix of the constrained model, `X N`
    pub fn constrained_design(&self, design: &DesignMatrix) -> Vec<Vec<f64>> {
        design
            .rows()
            .iter()
            .map(|x| {
                (0..self.free_parameters())
                    .map(|k| {
                        x.iter()
                            .zip(self.complement.iter())
                            .map(|(xi, row)| xi * row[k])
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }
}

/// Columns `1..p` of the Householder reflection mapping `c` onto the first axis
fn orthogonal_complement(c: &[f64], norm_sq: f64) -> Vec<Vec<f64>> {
    let p = c.len();
    let alpha = norm_sq.sqrt();
    let sign = if c[0] >= 0.0 { 1.0 } else { -1.0 };
    let mut v = c.to_vec();
    v[0] += sign * alpha;
    let v_sq = dot(&v, &v);

    (0..p)
        .map(|i| {
            (1..p)
                .map(|j| {
                    let identity = if i == j { 1.0 } else { 0.0 };
                    identity - 2.0 * v[i] * v[j] / v_sq
                })
                .collect()
        })
        .collect()
}
