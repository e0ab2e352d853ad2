// =============================================================================
// Bayesian ROAS Module
// =============================================================================
//
// Gamma-conjugate inference over return on ad spend:
// - Posterior model (conjugate revenue/spend update)
// - Threshold exceedance (closed-form survival function)
// - Comparative sampler (Monte Carlo P(best) and expected loss)
// - Campaign aggregator (one result record per ad set)

pub mod aggregator;
pub mod posterior;
pub mod sampler;
pub mod threshold;

pub use aggregator::{process_all_campaigns, process_campaign};
pub use posterior::{Posterior, Prior};
pub use sampler::{compare, Comparison};
pub use threshold::prob_above_threshold;
