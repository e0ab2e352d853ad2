// =============================================================================
// Threshold Exceedance — closed-form P(ROAS > threshold)
// =============================================================================
//
// P(X > t) for X ~ Gamma(shape, rate) is the regularised upper incomplete
// gamma function Q(shape, rate * t). statrs evaluates it in log space (series
// below the mode, continued fraction above), which stays finite for shapes in
// the tens of thousands where the naive t^(a-1) e^(-bt) form overflows.

use statrs::distribution::{ContinuousCDF, Gamma};
use tracing::warn;

use super::posterior::Posterior;

/// Probability that the true ROAS behind `posterior` exceeds `threshold`.
///
/// Always returns a value in `[0, 1]`:
/// - `threshold <= 0` yields exactly 1.0 (Gamma support is strictly positive).
/// - Extreme tails underflow to 0.0 rather than NaN.
/// - Any non-finite evaluation is pinned to 0 or 1 by comparing the threshold
///   with the posterior mean.
pub fn prob_above_threshold(posterior: &Posterior, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    if threshold == f64::INFINITY {
        return 0.0;
    }

    let p = match Gamma::new(posterior.shape, posterior.rate) {
        Ok(dist) => dist.sf(threshold),
        Err(e) => {
            warn!(
                shape = posterior.shape,
                rate = posterior.rate,
                error = %e,
                "gamma construction failed; normalising exceedance probability"
            );
            f64::NAN
        }
    };

    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        let pinned = if threshold < posterior.mean() { 1.0 } else { 0.0 };
        warn!(
            shape = posterior.shape,
            rate = posterior.rate,
            threshold,
            pinned,
            "non-finite survival function; pinned to extreme"
        );
        pinned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayes::posterior::Prior;

    fn post(shape: f64, rate: f64) -> Posterior {
        Posterior { shape, rate }
    }

    #[test]
    fn zero_threshold_is_certain() {
        for p in [post(2.0, 0.25), post(8002.0, 1000.25), post(0.3, 7.0)] {
            assert_eq!(prob_above_threshold(&p, 0.0), 1.0);
            assert_eq!(prob_above_threshold(&p, -4.0), 1.0);
        }
    }

    #[test]
    fn infinite_threshold_is_impossible() {
        assert_eq!(prob_above_threshold(&post(2.0, 0.25), f64::INFINITY), 0.0);
    }

    #[test]
    fn exponential_case_matches_closed_form() {
        // shape = 1 is Exponential(rate): P(X > t) = exp(-rate * t).
        let p = post(1.0, 0.5);
        for t in [0.5, 1.0, 4.0, 10.0] {
            let expected = (-0.5_f64 * t).exp();
            assert!((prob_above_threshold(&p, t) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn monotone_non_increasing_in_threshold() {
        let p = Prior::default().fit(3000.0, 500.0).unwrap();
        let mut prev = 1.0;
        let mut t = 0.0;
        while t < 12.0 {
            let q = prob_above_threshold(&p, t);
            assert!(q <= prev + 1e-12, "not monotone at t={t}: {q} > {prev}");
            assert!((0.0..=1.0).contains(&q));
            prev = q;
            t += 0.05;
        }
    }

    #[test]
    fn large_shape_stays_finite() {
        // Revenue figures in the hundreds of thousands.
        let p = Prior::default().fit(450_000.0, 60_000.0).unwrap();
        let below = prob_above_threshold(&p, 7.0);
        let at_mean = prob_above_threshold(&p, p.mean());
        let above = prob_above_threshold(&p, 8.0);
        assert!(below > 0.999_999);
        assert!((at_mean - 0.5).abs() < 0.01);
        assert!(above < 1e-6);
        assert!(!above.is_nan());
    }

    #[test]
    fn huge_threshold_underflows_to_zero() {
        let p = Prior::default().fit(8000.0, 1000.0).unwrap();
        let q = prob_above_threshold(&p, 1e12);
        assert!(q.is_finite());
        assert!(q < 1e-300);
    }

    #[test]
    fn backup_above_six_is_likely() {
        let p = Prior::default().fit(3000.0, 500.0).unwrap();
        let q = prob_above_threshold(&p, 6.0);
        // Posterior mean ~6.0, so roughly a coin flip.
        assert!((0.4..0.6).contains(&q), "got {q}");
        let q5 = prob_above_threshold(&p, 5.0);
        assert!(q5 > 0.99, "got {q5}");
    }
}
