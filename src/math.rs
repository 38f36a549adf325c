/// Numerically small dispersions are treated as Poisson
const POISSON_LIMIT: f64 = 1e-8;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Unit deviance of a negative binomial observation with mean `mu`
///
/// Falls back to the Poisson deviance when `dispersion * max(y, mu)` is negligible.
pub fn unit_deviance(y: f64, mu: f64, dispersion: f64) -> f64 {
    let mu = mu.max(f64::MIN_POSITIVE);
    let y_log_ratio = if y == 0.0 { 0.0 } else { y * (y.ln() - mu.ln()) };
    let unit = if dispersion * y.max(mu) < POISSON_LIMIT {
        2.0 * (y_log_ratio - (y - mu))
    } else {
        let size = 1.0 / dispersion;
        let tail = (y + size) * ((dispersion * mu).ln_1p() - (dispersion * y).ln_1p());
        2.0 * (y_log_ratio + tail)
    };
    // rounding can dip below zero; NaN passes through
    if unit < 0.0 {
        0.0
    } else {
        unit
    }
}

/// Total deviance of a gene given the fitted means
pub fn deviance(counts: &[f64], mu: &[f64], dispersion: f64) -> f64 {
    counts
        .iter()
        .zip(mu.iter())
        .map(|(&y, &m)| unit_deviance(y, m, dispersion))
        .sum()
}

/// Solves `A x = b` for a symmetric positive definite row-major `n x n` matrix via Cholesky
pub fn solve_symmetric(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                l[i * n + j] = sum.max(1e-12).sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }

    // Ly = b
    let mut y = vec![0.0; n];
    for i in 0..n {
        let sum = b[i] - (0..i).map(|j| l[i * n + j] * y[j]).sum::<f64>();
        y[i] = sum / l[i * n + i];
    }

    // L'x = y
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum = y[i] - ((i + 1)..n).map(|j| l[j * n + i] * x[j]).sum::<f64>();
        x[i] = sum / l[i * n + i];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dot() {
        assert_relative_eq!(dot(&[1.0, 2.0, 3.0], &[0.5, -1.0, 2.0]), 4.5);
    }

    #[test]
    fn test_unit_deviance_zero_at_mean() {
        assert_relative_eq!(unit_deviance(12.0, 12.0, 0.1), 0.0, epsilon = 1e-12);
        assert_relative_eq!(unit_deviance(12.0, 12.0, 0.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(unit_deviance(0.0, 0.0, 0.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unit_deviance_poisson() {
        // 2 * (y ln(y / mu) - (y - mu))
        let expected = 2.0 * (10.0 * (10.0f64 / 5.0).ln() - 5.0);
        assert_relative_eq!(unit_deviance(10.0, 5.0, 0.0), expected, epsilon = 1e-12);
        assert_relative_eq!(unit_deviance(0.0, 3.0, 0.0), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unit_deviance_negative_binomial() {
        let (y, mu, phi) = (10.0f64, 5.0f64, 0.5f64);
        let size = 1.0 / phi;
        let expected = 2.0 * (y * (y / mu).ln() - (y + size) * ((y + size) / (mu + size)).ln());
        assert_relative_eq!(unit_deviance(y, mu, phi), expected, epsilon = 1e-12);
        // overdispersion shrinks the deviance
        assert!(unit_deviance(y, mu, phi) < unit_deviance(y, mu, 0.0));
    }

    #[test]
    fn test_unit_deviance_keeps_nan_and_tiny_means() {
        assert!(unit_deviance(f64::NAN, 5.0, 0.1).is_nan());
        assert!(unit_deviance(f64::NAN, 5.0, 0.0).is_nan());
        // y / mu would overflow here
        assert!(unit_deviance(1000.0, 1e-310, 0.0).is_finite());
    }

    #[test]
    fn test_solve_symmetric() {
        let a = vec![4.0, 2.0, 2.0, 3.0];
        let b = vec![2.0, 1.0];
        let x = solve_symmetric(&a, &b, 2);
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(x[1], 0.0, epsilon = 1e-12);
    }
}
