// =============================================================================
// Gamma Posterior Model — conjugate update of ROAS beliefs
// =============================================================================
//
// Revenue is treated as a Gamma-distributed process with spend acting as the
// exposure. With a Gamma(shape, rate) prior the posterior stays Gamma and the
// update is pure addition:
//
//   shape_post = shape_prior + revenue
//   rate_post  = rate_prior  + spend
//
// The posterior mean shape/rate is the ROAS estimate; with the default prior
// (2.0, 0.25) it starts at 8.0x and converges to revenue/spend as data grows.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::errors::PosteriorError;

/// Gamma prior over ROAS, shared by every ad set in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub shape: f64,
    pub rate: f64,
}

impl Prior {
    pub fn new(shape: f64, rate: f64) -> Result<Self, PosteriorError> {
        if !(shape.is_finite() && rate.is_finite()) || shape <= 0.0 || rate <= 0.0 {
            return Err(PosteriorError::InvalidPrior { shape, rate });
        }
        Ok(Self { shape, rate })
    }

    /// Prior expected ROAS before any data is observed.
    pub fn mean(&self) -> f64 {
        self.shape / self.rate
    }

    /// Conjugate update with one ad set's observed revenue and spend.
    ///
    /// Refuses `spend <= 0`, negative revenue and non-finite inputs instead of
    /// substituting a default: a zero spend would leave the rate parameter
    /// unchanged and report the prior as if it were evidence.
    pub fn fit(&self, revenue: f64, spend: f64) -> Result<Posterior, PosteriorError> {
        if !(revenue.is_finite() && spend.is_finite()) || revenue < 0.0 || spend <= 0.0 {
            return Err(PosteriorError::InvalidFitInput { revenue, spend });
        }
        Ok(Posterior {
            shape: self.shape + revenue,
            rate: self.rate + spend,
        })
    }
}

impl Default for Prior {
    fn default() -> Self {
        Self {
            shape: 2.0,
            rate: 0.25,
        }
    }
}

/// Gamma posterior over one ad set's ROAS. Only produced by [`Prior::fit`],
/// so `shape > 0` and `rate > 0` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub shape: f64,
    pub rate: f64,
}

impl Posterior {
    pub fn mean(&self) -> f64 {
        self.shape / self.rate
    }

    pub fn std_dev(&self) -> f64 {
        self.shape.sqrt() / self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prior_centres_on_eight() {
        let prior = Prior::default();
        assert!((prior.mean() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn prior_rejects_non_positive_parameters() {
        assert!(Prior::new(0.0, 0.25).is_err());
        assert!(Prior::new(2.0, -1.0).is_err());
        assert!(Prior::new(f64::NAN, 0.25).is_err());
        assert!(Prior::new(2.0, 0.25).is_ok());
    }

    #[test]
    fn fit_adds_revenue_and_spend() {
        let post = Prior::default().fit(8000.0, 1000.0).unwrap();
        assert!((post.shape - 8002.0).abs() < 1e-9);
        assert!((post.rate - 1000.25).abs() < 1e-9);
        assert!((post.mean() - 8002.0 / 1000.25).abs() < 1e-12);
        assert!((post.std_dev() - 8002.0_f64.sqrt() / 1000.25).abs() < 1e-12);
    }

    #[test]
    fn posterior_strictly_exceeds_prior() {
        let prior = Prior::default();
        for &(rev, spend) in &[(0.5, 0.1), (10.0, 3.0), (3000.0, 500.0), (1e7, 1e6)] {
            let post = prior.fit(rev, spend).unwrap();
            assert!(post.shape > prior.shape);
            assert!(post.rate > prior.rate);
        }
    }

    #[test]
    fn posterior_mean_converges_to_observed_roas() {
        let prior = Prior::default();
        let observed = 3.5;
        let mut last_gap = f64::INFINITY;
        for scale in [10.0, 1_000.0, 100_000.0, 10_000_000.0] {
            let post = prior.fit(observed * scale, scale).unwrap();
            let gap = (post.mean() - observed).abs();
            assert!(gap < last_gap, "gap should shrink, got {gap} after {last_gap}");
            last_gap = gap;
        }
        assert!(last_gap < 1e-5);
    }

    #[test]
    fn fit_refuses_zero_spend_and_negative_revenue() {
        let prior = Prior::default();
        assert!(matches!(
            prior.fit(100.0, 0.0),
            Err(PosteriorError::InvalidFitInput { .. })
        ));
        assert!(prior.fit(100.0, -5.0).is_err());
        assert!(prior.fit(-1.0, 10.0).is_err());
        assert!(prior.fit(f64::INFINITY, 10.0).is_err());
    }

    #[test]
    fn zero_revenue_is_valid() {
        let post = Prior::default().fit(0.0, 50.0).unwrap();
        assert!((post.shape - 2.0).abs() < f64::EPSILON);
        assert!(post.mean() < 0.1);
    }
}
