//! # Set-threshold solver
//!
//! The trigger set-point is the threshold where the shower contribution, scaled down by
//! `e · scale`, meets the NSB contribution:
//!
//! ```text
//! f(t) = power_law(t; m, a, b) / (e · scale) − nsb_contribution(t; m_0, t_0) = 0
//! ```
//!
//! The root is found with Newton–Raphson (analytic derivative), started from the first
//! threshold whose rate falls to `seed_rate_fraction · max_rate`.
use std::f64::consts::E;

use roots::{find_root_newton_raphson, SimpleConvergency};

use crate::{
    aggregation::RateCurve,
    constants::Threshold,
    models::{nsb_contribution, nsb_contribution_dt, power_law, power_law_dt},
    params::RatescanParams,
    ratescan_errors::RatescanError,
};

/// First threshold, in curve order, whose rate is at most `fraction · max_rate`.
///
/// NaN rates never qualify.
///
/// Return
/// ----------
/// * The threshold, or [`RatescanError::NoSeedThreshold`] with the rate bound when no row
///   qualifies.
pub fn estimate_threshold(
    curve: &RateCurve,
    max_rate: f64,
    fraction: f64,
) -> Result<Threshold, RatescanError> {
    let bound = fraction * max_rate;
    curve
        .rows()
        .iter()
        .find(|r| r.rate <= bound)
        .map(|r| r.threshold)
        .ok_or(RatescanError::NoSeedThreshold(bound))
}

/// Solve the set-point condition for the fitted full model.
///
/// Arguments
/// -----------------
/// * `shower` – `(m, a, b)` of the power law.
/// * `nsb` – `(m_0, t_0)` of the NSB exponential.
/// * `seed` – starting threshold.
/// * `params` – `scale` and the Newton–Raphson controls `root_eps`, `root_max_iter`.
///
/// Return
/// ----------
/// * The threshold of the crossing, [`RatescanError::RootFindingError`] when Newton–Raphson
///   does not converge, or [`RatescanError::NonFiniteRoot`].
pub fn solve_set_threshold(
    shower: [f64; 3],
    nsb: [f64; 2],
    seed: Threshold,
    params: &RatescanParams,
) -> Result<Threshold, RatescanError> {
    let [m, a, b] = shower;
    let [m_0, t_0] = nsb;
    let denom = E * params.scale;

    let f = |t: f64| power_law(t, m, a, b) / denom - nsb_contribution(t, m_0, t_0);
    let df = |t: f64| power_law_dt(t, m, a) / denom - nsb_contribution_dt(t, m_0, t_0);

    let mut convergency = SimpleConvergency {
        eps: params.root_eps,
        max_iter: params.root_max_iter,
    };
    let root = find_root_newton_raphson(seed, &f, &df, &mut convergency)?;

    if !root.is_finite() {
        return Err(RatescanError::NonFiniteRoot(root));
    }
    log::debug!("set threshold {root:.3} (seed {seed})");
    Ok(root)
}
