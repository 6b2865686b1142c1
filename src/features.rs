//! # Per-run trigger features
//!
//! Two independent features are derived for every run:
//!
//! * the **set threshold** of a rate curve ([`find_trigger_set_threshold`]): window selection,
//!   the three chained fits and the root of the set-point condition, bundled in a [`SetPoint`];
//! * the **max possible threshold to keep** of the raw samples
//!   ([`max_possible_threshold_to_keep`]): the lowest, over the events of a run, of the highest
//!   threshold at which the event still fires exactly `n_primitives` trigger primitives.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ratescan::{
//!     aggregation::{Normalization, RateCurve},
//!     features::find_trigger_set_threshold,
//!     models::ratescan_func,
//!     params::RatescanParams,
//!     samples::RunKey,
//! };
//!
//! let points: Vec<(f64, u64)> = (1..1000)
//!     .map(|t| {
//!         let rate = ratescan_func(t as f64, 5.5e10, -3.0, 0.0, -0.0219, 695.0).min(5000.0);
//!         (t as f64, (rate * 160.0).round() as u64)
//!     })
//!     .collect();
//! let curve = RateCurve::from_points(RunKey::new(20150901, 182), Normalization::Ontime(160.0), &points)?;
//! let set_point = find_trigger_set_threshold(&curve, &RatescanParams::default())?;
//! println!("set threshold: {}", set_point.set_threshold);
//! # Ok::<(), ratescan::ratescan_errors::RatescanError>(())
//! ```
use std::collections::HashMap;

use ahash::RandomState;
use itertools::Itertools;

use crate::{
    aggregation::RateCurve,
    constants::Threshold,
    fit::{fit_ratescan, fit_result::FitResult, RatescanFits},
    params::RatescanParams,
    ranges::RateRanges,
    ratescan_errors::RatescanError,
    samples::{RunKey, SampleTable},
    solver::{estimate_threshold, solve_set_threshold},
};

/// Everything derived from one rate curve.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPoint {
    pub key: RunKey,
    pub ranges: RateRanges,
    pub shower: FitResult,
    pub nsb: FitResult,
    pub full: FitResult,
    /// Threshold where the shower contribution equals `1/(e · scale)` of the NSB contribution.
    pub set_threshold: Threshold,
}

impl SetPoint {
    /// Flat name → value view.
    ///
    /// Order: `ranges_*`, then `{shower,nsb,full}_par_{i}` and `{shower,nsb,full}_cov_{i}_{j}`
    /// per fit, then `setThreshold`.
    pub fn to_named_values(&self) -> Vec<(String, f64)> {
        let mut values = self.ranges.to_named_values();
        for fit in [&self.shower, &self.nsb, &self.full] {
            values.extend(fit.to_named_values());
        }
        values.push(("setThreshold".into(), self.set_threshold));
        values
    }

    /// Value of the full model at `t`.
    pub fn full_model(&self, t: f64) -> f64 {
        self.full.eval(t)
    }
}

/// Find the trigger set threshold of one rate curve.
///
/// Steps
/// -----------------
/// 1. [`RateRanges::from_curve`] and [`RateRanges::select`] cut the curve into its windows.
/// 2. [`fit_ratescan`] runs the shower, nsb and full fits.
/// 3. [`estimate_threshold`] seeds the root finder at the first threshold whose rate is at most
///    `seed_rate_fraction · max_rate`.
/// 4. [`solve_set_threshold`] solves the set-point condition with the full fit parameters.
///
/// Errors
/// -----------------
/// [`RatescanError::EmptyWindow`], [`RatescanError::FitConvergence`],
/// [`RatescanError::NoSeedThreshold`], [`RatescanError::RootFindingError`] or
/// [`RatescanError::NonFiniteRoot`], whichever step fails first.
pub fn find_trigger_set_threshold(
    curve: &RateCurve,
    params: &RatescanParams,
) -> Result<SetPoint, RatescanError> {
    let ranges = RateRanges::from_curve(curve, params);
    let windows = ranges.select(curve)?;
    let RatescanFits { shower, nsb, full } = fit_ratescan(&windows, params)?;

    let seed = estimate_threshold(curve, ranges.max_rate, params.seed_rate_fraction)?;
    let p = &full.params;
    let set_threshold = solve_set_threshold([p[0], p[1], p[2]], [p[3], p[4]], seed, params)?;

    Ok(SetPoint {
        key: curve.key(),
        ranges,
        shower,
        nsb,
        full,
        set_threshold,
    })
}

/// Lowest max-possible-threshold-to-keep of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxThresholdRecord {
    /// `(night, run)`, or the run alone when the table has no night column.
    pub key: RunKey,
    pub max_possible_threshold: Threshold,
}

/// Highest threshold keeping `n_primitives` trigger primitives, minimized over the events of
/// each run.
///
/// 1. Keep the samples whose count equals `params.n_primitives`.
/// 2. Take the maximal threshold per `(night, run, event)`.
/// 3. Take the minimum of those per `(night, run)`.
///
/// The night column is optional; without it records are keyed by run only. The run and event
/// columns are required.
///
/// Return
/// ----------
/// * One record per run having at least one qualifying sample, sorted by key.
///   A table with a single run yields a single record.
/// * [`RatescanError::MissingColumn`] for a missing run, event, threshold or count column.
pub fn max_possible_threshold_to_keep(
    table: &SampleTable,
    params: &RatescanParams,
) -> Result<Vec<MaxThresholdRecord>, RatescanError> {
    let samples = table.extract_event_samples(&params.columns)?;

    let mut per_event: HashMap<RunKey, Threshold, RandomState> = HashMap::default();
    for s in samples
        .iter()
        .filter(|s| s.count == params.n_primitives && !s.threshold.is_nan())
    {
        per_event
            .entry(s.key)
            .and_modify(|t| *t = t.max(s.threshold))
            .or_insert(s.threshold);
    }

    let mut per_run: HashMap<RunKey, Threshold, RandomState> = HashMap::default();
    for (key, threshold) in per_event {
        per_run
            .entry(key.run_only())
            .and_modify(|t| *t = t.min(threshold))
            .or_insert(threshold);
    }

    Ok(per_run
        .into_iter()
        .map(|(key, max_possible_threshold)| MaxThresholdRecord {
            key,
            max_possible_threshold,
        })
        .sorted_by_key(|r| r.key)
        .collect())
}
