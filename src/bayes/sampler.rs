// =============================================================================
// Comparative Sampler — Monte Carlo P(best) and expected loss
// =============================================================================
//
// Each trial index i is one hypothetical joint world: the i-th draw of this ad
// is compared against the maximum of the i-th draws of every competitor.
//
//   P(best)       = mean_i [ this_i > max_j other_j,i ]
//   expected loss = mean_i max(0, max_j other_j,i - this_i)
//
// Both metrics come from the same batch of draws. The running per-trial
// maximum is folded in competitor by competitor so memory stays at one
// `sample_count` buffer regardless of campaign size.

use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::posterior::Posterior;
use crate::errors::PosteriorError;

/// Default Monte Carlo trials per ad set.
pub const DEFAULT_SAMPLE_COUNT: usize = 10_000;

/// Outcome of comparing one posterior against its campaign siblings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub prob_best: f64,
    pub expected_loss: f64,
}

impl Comparison {
    /// A solo ad set is trivially the best and cannot lose to anyone.
    pub const SOLO: Comparison = Comparison {
        prob_best: 1.0,
        expected_loss: 0.0,
    };
}

fn gamma_for(posterior: &Posterior) -> Result<Gamma<f64>, PosteriorError> {
    // rand_distr parameterises by scale, the reciprocal of rate.
    Gamma::new(posterior.shape, 1.0 / posterior.rate).map_err(|e| {
        PosteriorError::Distribution(format!(
            "Gamma(shape={}, rate={}): {e}",
            posterior.shape, posterior.rate
        ))
    })
}

/// Estimate P(best) and expected loss for `this` against `others`.
///
/// With no competitors returns [`Comparison::SOLO`] without drawing. Results
/// carry Monte Carlo noise unless `rng` is seeded.
pub fn compare<R: Rng + ?Sized>(
    this: &Posterior,
    others: &[Posterior],
    sample_count: usize,
    rng: &mut R,
) -> Result<Comparison, PosteriorError> {
    if others.is_empty() {
        return Ok(Comparison::SOLO);
    }
    if sample_count == 0 {
        return Err(PosteriorError::InvalidConfig(
            "sample_count must be > 0".to_string(),
        ));
    }

    let mut best_other = vec![f64::NEG_INFINITY; sample_count];
    for other in others {
        let dist = gamma_for(other)?;
        for slot in best_other.iter_mut() {
            let draw = dist.sample(rng);
            if draw > *slot {
                *slot = draw;
            }
        }
    }

    let this_dist = gamma_for(this)?;
    let mut wins: usize = 0;
    let mut loss_sum = 0.0_f64;
    for &rival in &best_other {
        let draw = this_dist.sample(rng);
        if draw > rival {
            wins += 1;
        } else {
            loss_sum += rival - draw;
        }
    }

    let n = sample_count as f64;
    let comparison = Comparison {
        prob_best: wins as f64 / n,
        expected_loss: loss_sum / n,
    };

    if !comparison.prob_best.is_finite() || !comparison.expected_loss.is_finite() {
        return Err(PosteriorError::Distribution(format!(
            "non-finite comparison for Gamma(shape={}, rate={}): {comparison:?}",
            this.shape, this.rate
        )));
    }

    trace!(
        competitors = others.len(),
        sample_count,
        prob_best = comparison.prob_best,
        expected_loss = comparison.expected_loss,
        "comparison sampled"
    );

    Ok(comparison)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayes::posterior::Prior;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fit(revenue: f64, spend: f64) -> Posterior {
        Prior::default().fit(revenue, spend).unwrap()
    }

    #[test]
    fn solo_ad_is_exactly_best() {
        let mut rng = StdRng::seed_from_u64(1);
        for p in [fit(8000.0, 1000.0), fit(0.0, 1.0), fit(1.0, 500.0)] {
            let c = compare(&p, &[], DEFAULT_SAMPLE_COUNT, &mut rng).unwrap();
            assert_eq!(c.prob_best, 1.0);
            assert_eq!(c.expected_loss, 0.0);
        }
    }

    #[test]
    fn solo_ad_ignores_sample_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let c = compare(&fit(10.0, 2.0), &[], 0, &mut rng).unwrap();
        assert_eq!(c, Comparison::SOLO);
    }

    #[test]
    fn zero_samples_with_competitors_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = fit(10.0, 2.0);
        assert!(matches!(
            compare(&p, &[p], 0, &mut rng),
            Err(PosteriorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn identical_posteriors_split_evenly() {
        let mut rng = StdRng::seed_from_u64(42);
        let p = fit(3000.0, 500.0);
        let c = compare(&p, &[p], DEFAULT_SAMPLE_COUNT, &mut rng).unwrap();
        assert!(
            (c.prob_best - 0.5).abs() < 0.02,
            "expected ~0.5, got {:.4}",
            c.prob_best
        );
    }

    #[test]
    fn three_identical_posteriors_split_in_thirds() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = fit(2000.0, 400.0);
        let c = compare(&p, &[p, p], 20_000, &mut rng).unwrap();
        assert!((c.prob_best - 1.0 / 3.0).abs() < 0.02, "got {:.4}", c.prob_best);
    }

    #[test]
    fn dominant_ad_wins_almost_always() {
        let mut rng = StdRng::seed_from_u64(3);
        let strong = fit(10_000.0, 1000.0);
        let weak = fit(5_000.0, 1000.0);
        let c = compare(&strong, &[weak], DEFAULT_SAMPLE_COUNT, &mut rng).unwrap();
        assert!(c.prob_best > 0.999);
        assert!(c.expected_loss < 1e-3);

        let c = compare(&weak, &[strong], DEFAULT_SAMPLE_COUNT, &mut rng).unwrap();
        assert!(c.prob_best < 0.001);
        // Loss approaches the gap in posterior means.
        let gap = strong.mean() - weak.mean();
        assert!((c.expected_loss - gap).abs() < 0.05 * gap, "loss {} gap {}", c.expected_loss, gap);
    }

    #[test]
    fn expected_loss_is_never_negative() {
        let mut rng = StdRng::seed_from_u64(11);
        let ads = [fit(50.0, 10.0), fit(80.0, 9.0), fit(5.0, 3.0), fit(0.0, 1.0)];
        for (i, this) in ads.iter().enumerate() {
            let others: Vec<Posterior> = ads
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| *p)
                .collect();
            let c = compare(this, &others, 2_000, &mut rng).unwrap();
            assert!(c.expected_loss >= 0.0);
            assert!((0.0..=1.0).contains(&c.prob_best));
        }
    }

    #[test]
    fn probabilities_across_campaign_sum_to_one() {
        let ads = [fit(8000.0, 1000.0), fit(3000.0, 500.0), fit(2500.0, 400.0)];
        let mut rng = StdRng::seed_from_u64(99);
        let mut total = 0.0;
        for (i, this) in ads.iter().enumerate() {
            let others: Vec<Posterior> = ads
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| *p)
                .collect();
            total += compare(this, &others, DEFAULT_SAMPLE_COUNT, &mut rng)
                .unwrap()
                .prob_best;
        }
        assert!((total - 1.0).abs() < 0.03, "sum of P(best) = {total:.4}");
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let a = fit(120.0, 30.0);
        let b = fit(110.0, 25.0);
        let c1 = compare(&a, &[b], 5_000, &mut StdRng::seed_from_u64(5)).unwrap();
        let c2 = compare(&a, &[b], 5_000, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn overflowing_draws_are_an_error() {
        let huge = Posterior {
            shape: 1e308,
            rate: 1e-300,
        };
        let err = compare(&huge, &[huge], 100, &mut StdRng::seed_from_u64(9)).unwrap_err();
        assert!(matches!(err, PosteriorError::Distribution(_)));
    }
}
