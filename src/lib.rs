// =============================================================================
// ABO Posteriors — Bayesian ROAS evaluation for ad-set testing
// =============================================================================
//
// For every ad set in a campaign the engine estimates P(ROAS > threshold),
// P(best in campaign) and the expected ROAS loss of picking it, from a
// Gamma-conjugate posterior over revenue and spend.
// =============================================================================

pub mod bayes;
pub mod errors;
pub mod job;
pub mod runtime_config;
pub mod types;
pub mod warehouse;
