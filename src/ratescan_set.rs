//! # Batch set-point search over many rate scans
//!
//! A [`RatescanSet`] maps each run to its [`RateCurve`]. The [`SetPointBatch`] trait runs
//! [`find_trigger_set_threshold`] on every curve and collects **per-run outcomes**; a run whose
//! fit or root finding fails is reported as an `Err` entry and never aborts the batch.
//!
//! ## Result Model
//! -----------------
//! ```text
//! RunKey → Result<SetPoint, RatescanError>
//! ```
//!
//! Use [`set_point_for`] to borrow a set point or [`take_set_point`] to move it out of the map.
//!
//! ## Execution Modes
//! -----------------
//! * With the `progress` feature a live progress bar (`indicatif`) reports the last and
//!   averaged time per rate scan.
//! * [`SetPointBatch::find_all_set_points_with_cancel`] polls a caller closure on a wall-clock
//!   interval and stops early when it returns `true`; runs already processed are kept.
//!
//! ## End to end
//! -----------------
//! [`extract_features_per_run`] aggregates a sample table, runs the batch, computes the
//! max-threshold records and joins both per `(night, run)` into [`RunFeatures`].
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use ahash::RandomState;
use itertools::Itertools;

#[cfg(feature = "progress")]
use crate::progress_bar::{batch_progress_bar, ScanTimer};

use crate::{
    aggregation::{sum_up_and_convert_to_rates, RateCurve, RatescanCurves},
    constants::Threshold,
    features::{find_trigger_set_threshold, max_possible_threshold_to_keep, SetPoint},
    metadata::RunMetadataSource,
    params::RatescanParams,
    ratescan_errors::RatescanError,
    samples::{GroupBy, RunKey, SampleTable},
};

/// Rate curves of many runs.
pub type RatescanSet = HashMap<RunKey, RateCurve, RandomState>;

/// Batch outcome: one entry per processed run.
pub type FullSetPointResult = HashMap<RunKey, Result<SetPoint, RatescanError>, RandomState>;

/// Minimal interval between two calls of the cancellation closure.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Borrow the set point of `key`.
///
/// Return
/// ----------
/// * `Ok(Some(&SetPoint))` – the run was solved.
/// * `Ok(None)` – the run is not in the map.
/// * `Err(&RatescanError)` – the run failed.
pub fn set_point_for<'a>(
    all: &'a FullSetPointResult,
    key: &RunKey,
) -> Result<Option<&'a SetPoint>, &'a RatescanError> {
    match all.get(key) {
        None => Ok(None),
        Some(Err(e)) => Err(e),
        Some(Ok(sp)) => Ok(Some(sp)),
    }
}

/// Take ownership of the set point of `key`, removing it from the map.
pub fn take_set_point(
    all: &mut FullSetPointResult,
    key: &RunKey,
) -> Result<Option<SetPoint>, RatescanError> {
    all.remove(key).transpose()
}

/// Split per-run aggregation outcomes into usable curves and failures.
pub fn split_curves(curves: RatescanCurves) -> (RatescanSet, FullSetPointResult) {
    let mut set = RatescanSet::default();
    let mut failed = FullSetPointResult::default();
    for (key, curve) in curves {
        match curve {
            Ok(c) => {
                set.insert(key, c);
            }
            Err(e) => {
                failed.insert(key, Err(e));
            }
        }
    }
    (set, failed)
}

pub trait SetPointBatch {
    /// Find the set threshold of every rate scan of the set.
    ///
    /// Runs are processed in key order with the same `params`.
    ///
    /// Return
    /// ----------
    /// * A [`FullSetPointResult`] with one entry per run, `Ok(SetPoint)` or the error that
    ///   stopped that run.
    ///
    /// See also
    /// ------------
    /// * [`find_trigger_set_threshold`] – the per-run pipeline.
    fn find_all_set_points(&self, params: &RatescanParams) -> FullSetPointResult;

    /// Same as [`find_all_set_points`](SetPointBatch::find_all_set_points), calling
    /// `should_cancel()` at most every 20 ms and stopping as soon as it returns `true`.
    fn find_all_set_points_with_cancel<F>(
        &self,
        params: &RatescanParams,
        should_cancel: F,
    ) -> FullSetPointResult
    where
        F: FnMut() -> bool;

    /// Total number of curve rows over all rate scans.
    fn total_rows(&self) -> usize;

    fn number_of_ratescans(&self) -> usize;
}

impl SetPointBatch for RatescanSet {
    fn find_all_set_points(&self, params: &RatescanParams) -> FullSetPointResult {
        self.find_all_set_points_with_cancel(params, || false)
    }

    fn find_all_set_points_with_cancel<F>(
        &self,
        params: &RatescanParams,
        should_cancel: F,
    ) -> FullSetPointResult
    where
        F: FnMut() -> bool,
    {
        solve_polling(self, params, should_cancel, POLL_INTERVAL)
    }

    #[inline]
    fn total_rows(&self) -> usize {
        self.values().map(|c| c.len()).sum()
    }

    #[inline]
    fn number_of_ratescans(&self) -> usize {
        self.len()
    }
}

/// Batch loop shared by the [`SetPointBatch`] methods.
///
/// `should_cancel` is called before a rate scan once at least `poll_interval` has elapsed since
/// the previous call (or since the start of the batch).
fn solve_polling<F>(
    set: &RatescanSet,
    params: &RatescanParams,
    mut should_cancel: F,
    poll_interval: Duration,
) -> FullSetPointResult
where
    F: FnMut() -> bool,
{
    #[cfg(feature = "progress")]
    let pb = batch_progress_bar(set.len());
    #[cfg(feature = "progress")]
    let mut scan_timer = ScanTimer::new(0.2);

    let mut results: FullSetPointResult = HashMap::default();
    let mut last_poll = Instant::now();

    for (key, curve) in set.iter().sorted_by_key(|(key, _)| **key) {
        if last_poll.elapsed() >= poll_interval {
            if should_cancel() {
                log::info!(
                    "set point search interrupted after {} of {} rate scans",
                    results.len(),
                    set.len()
                );
                break;
            }
            last_poll = Instant::now();
        }

        let res = find_trigger_set_threshold(curve, params);
        match &res {
            Ok(sp) => log::debug!("{key}: set threshold {:.2}", sp.set_threshold),
            Err(e) => log::warn!("{key}: no set threshold: {e}"),
        }
        results.insert(*key, res);

        #[cfg(feature = "progress")]
        {
            let last = scan_timer.tick(curve.len());
            pb.set_message(scan_timer.message(last));
            pb.inc(1);
        }
    }

    #[cfg(feature = "progress")]
    {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    results
}

/// Features of one run.
#[derive(Debug, PartialEq)]
pub struct RunFeatures {
    pub key: RunKey,
    /// `None` when no event of the run fired exactly `n_primitives` primitives.
    pub max_possible_threshold: Option<Threshold>,
    pub set_point: Result<SetPoint, RatescanError>,
}

impl RunFeatures {
    /// Flat name → value view; empty set-point values when the run failed.
    pub fn to_named_values(&self) -> Vec<(String, f64)> {
        let mut values = Vec::new();
        if let Some(t) = self.max_possible_threshold {
            values.push(("max_possible_threshold_to_keep".into(), t));
        }
        if let Ok(sp) = &self.set_point {
            values.extend(sp.to_named_values());
        }
        values
    }
}

/// Aggregate `table` per run, find every set point and join the max-threshold records.
///
/// Arguments
/// -----------------
/// * `table` – samples with night, run, event, threshold and count columns.
/// * `params` – pipeline configuration.
/// * `source` – run database for the ontimes (unused when `params.normalize`).
///
/// Return
/// ----------
/// * One [`RunFeatures`] per run, sorted by key. Runs that could not be normalized carry the
///   aggregation error in `set_point`.
/// * `Err` for table-level failures: a missing column, a failed metadata query, or a row whose
///   identifier or count is not a valid integer ([`RatescanError::InvalidValue`]). A malformed
///   row cannot be attributed to a run, so the table is rejected as a whole and must be
///   repaired at ingestion.
pub fn extract_features_per_run<S>(
    table: &SampleTable,
    params: &RatescanParams,
    source: &S,
) -> Result<Vec<RunFeatures>, RatescanError>
where
    S: RunMetadataSource + ?Sized,
{
    let curves = sum_up_and_convert_to_rates(table, params, GroupBy::Run, source)?;
    let max_thresholds: HashMap<RunKey, Threshold, RandomState> =
        max_possible_threshold_to_keep(table, params)?
            .into_iter()
            .map(|r| (r.key, r.max_possible_threshold))
            .collect();

    let (set, mut results) = split_curves(curves);
    log::info!(
        "searching set points of {} rate scans ({} rows), {} runs without rates",
        set.number_of_ratescans(),
        set.total_rows(),
        results.len()
    );
    results.extend(set.find_all_set_points(params));

    Ok(results
        .into_iter()
        .map(|(key, set_point)| RunFeatures {
            key,
            max_possible_threshold: max_thresholds.get(&key).copied(),
            set_point,
        })
        .sorted_by_key(|f| f.key)
        .collect())
}
