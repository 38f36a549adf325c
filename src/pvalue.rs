use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal, StudentsT};

use crate::{
    error::{Result, TreatError},
    fit::FitKind,
};

fn distribution_error(e: impl std::fmt::Display) -> TreatError {
    TreatError::Distribution(e.to_string())
}

/// Reference distributions for one gene, constructed before any testing starts
#[derive(Debug, Clone)]
pub enum Reference {
    Likelihood {
        chi_squared: ChiSquared,
        normal: Normal,
    },
    QuasiLikelihood {
        scale: f64,
        f: FisherSnedecor,
        t: StudentsT,
    },
}

impl Reference {
    pub fn new(kind: FitKind) -> Result<Self> {
        match kind {
            FitKind::Likelihood => Ok(Reference::Likelihood {
                chi_squared: ChiSquared::new(1.0).map_err(distribution_error)?,
                normal: Normal::new(0.0, 1.0).map_err(distribution_error)?,
            }),
            FitKind::QuasiLikelihood { dispersion, df } => Ok(Reference::QuasiLikelihood {
                scale: dispersion,
                f: FisherSnedecor::new(1.0, df).map_err(distribution_error)?,
                t: StudentsT::new(0.0, 1.0, df).map_err(distribution_error)?,
            }),
        }
    }

    /// Converts a likelihood ratio into the reported statistic (LR or quasi F)
    pub fn statistic(&self, lr: f64) -> f64 {
        match self {
            Reference::Likelihood { .. } => lr,
            Reference::QuasiLikelihood { scale, .. } => lr / scale,
        }
    }

    /// Two-sided p-value of the point null for an already scaled statistic
    pub fn point_pvalue(&self, statistic: f64) -> f64 {
        if statistic <= 0.0 {
            return 1.0;
        }
        let p = match self {
            Reference::Likelihood { chi_squared, .. } => chi_squared.sf(statistic),
            Reference::QuasiLikelihood { f, .. } => f.sf(statistic),
        };
        p.clamp(0.0, 1.0)
    }

    /// Upper tail of the signed-root reference distribution
    pub fn upper_tail(&self, z: f64) -> f64 {
        match self {
            Reference::Likelihood { normal, .. } => normal.sf(z),
            Reference::QuasiLikelihood { t, .. } => t.sf(z),
        }
    }
}
