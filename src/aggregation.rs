//! # Rate aggregation
//!
//! Turns the raw `(keys, threshold, count)` samples of a [`SampleTable`] into one
//! [`RateCurve`] per grouping key.
//!
//! ## Pipeline
//! -----------------
//! 1. Extract the typed samples once (missing columns fail the whole table).
//! 2. Group by `(key, threshold)` and sum the counts, recording how many samples contributed
//!    ([`sumup_counts_of_run`]).
//! 3. Count the events of every key as the number of samples taken at threshold `0`
//!    ([`count_events_per_run`]).
//! 4. Fetch the ontime of every `(night, run)` from a [`RunMetadataSource`] with a single range
//!    query (skipped when normalizing by events).
//! 5. Divide: `rate = count / ontime`, or `rate = count / n_events_per_run` when
//!    [`RatescanParams::normalize`] is set.
//!
//! Every key yields its own `Result`: a run without ontime does not prevent the others from
//! being converted. No interpolation happens; a curve has exactly one row per distinct
//! threshold observed for its key.
use std::collections::HashMap;

use ahash::RandomState;
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::{
    constants::{Rate, Threshold},
    metadata::{fetch_run_metadata, RunMetadataSource},
    params::RatescanParams,
    ratescan_errors::RatescanError,
    samples::{ColumnKeys, GroupBy, RunKey, Sample, SampleTable},
};

/// Per-key rate curves, each converted independently.
pub type RatescanCurves = HashMap<RunKey, Result<RateCurve, RatescanError>, RandomState>;

/// Summed counts of one `(key, threshold)` group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummedCounts {
    pub key: RunKey,
    pub threshold: Threshold,
    pub count: u64,
    /// Number of samples summed into `count`.
    pub n_samples: usize,
}

/// Denominator of the rates of a [`RateCurve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// Observation time of the run in seconds: rates are in Hz.
    Ontime(f64),
    /// Number of events of the key: rates are counts per event.
    EventsPerRun(u64),
}

impl Normalization {
    pub fn denominator(&self) -> f64 {
        match self {
            Normalization::Ontime(ontime) => *ontime,
            Normalization::EventsPerRun(n) => *n as f64,
        }
    }

    fn validate(self, key: RunKey) -> Result<Self, RatescanError> {
        match self {
            Normalization::Ontime(ontime) if !(ontime.is_finite() && ontime > 0.0) => {
                Err(RatescanError::InvalidOntime { key, ontime })
            }
            Normalization::EventsPerRun(0) => Err(RatescanError::MissingEventCount(key)),
            n => Ok(n),
        }
    }
}

/// One row of a rate curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateRow {
    pub threshold: Threshold,
    pub count: u64,
    pub n_samples: usize,
    pub rate: Rate,
}

/// Trigger rate as a function of the threshold for one grouping key.
///
/// Rows are sorted by ascending threshold and thresholds are unique.
/// For every row `rate == count / normalization.denominator()`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateCurve {
    key: RunKey,
    normalization: Normalization,
    rows: Vec<RateRow>,
}

impl RateCurve {
    /// Build a curve from already summed counts of a single key.
    ///
    /// Arguments
    /// -----------------
    /// * `key` – grouping key of the curve.
    /// * `normalization` – rate denominator, validated here.
    /// * `counts` – summed counts with unique thresholds; their own keys are ignored.
    ///
    /// Return
    /// ----------
    /// * The sorted curve, or [`RatescanError::InvalidOntime`] / [`RatescanError::MissingEventCount`]
    ///   for an unusable denominator.
    pub fn from_summed(
        key: RunKey,
        normalization: Normalization,
        counts: &[SummedCounts],
    ) -> Result<Self, RatescanError> {
        let normalization = normalization.validate(key)?;
        let denominator = normalization.denominator();
        let rows = counts
            .iter()
            .map(|c| RateRow {
                threshold: c.threshold,
                count: c.count,
                n_samples: c.n_samples,
                rate: c.count as f64 / denominator,
            })
            .sorted_by(|a, b| a.threshold.total_cmp(&b.threshold))
            .collect();
        Ok(RateCurve {
            key,
            normalization,
            rows,
        })
    }

    /// Build a curve from raw `(threshold, count)` points, summing repeated thresholds.
    pub fn from_points(
        key: RunKey,
        normalization: Normalization,
        points: &[(Threshold, u64)],
    ) -> Result<Self, RatescanError> {
        let samples: Vec<Sample> = points
            .iter()
            .map(|&(threshold, count)| Sample {
                key,
                threshold,
                count,
            })
            .collect();
        Self::from_summed(key, normalization, &sum_samples(&samples))
    }

    /// The same counts divided by another denominator.
    pub fn with_normalization(&self, normalization: Normalization) -> Result<Self, RatescanError> {
        let counts: Vec<SummedCounts> = self
            .rows
            .iter()
            .map(|r| SummedCounts {
                key: self.key,
                threshold: r.threshold,
                count: r.count,
                n_samples: r.n_samples,
            })
            .collect();
        Self::from_summed(self.key, normalization, &counts)
    }

    pub fn key(&self) -> RunKey {
        self.key
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn rows(&self) -> &[RateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn thresholds(&self) -> impl Iterator<Item = Threshold> + '_ {
        self.rows.iter().map(|r| r.threshold)
    }

    pub fn rates(&self) -> impl Iterator<Item = Rate> + '_ {
        self.rows.iter().map(|r| r.rate)
    }

    /// Largest rate of the curve, ignoring NaN. `None` for an empty curve.
    pub fn max_rate(&self) -> Option<Rate> {
        self.rates()
            .filter(|r| !r.is_nan())
            .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |m| m.max(r))))
    }

    /// Sum of the counts over all thresholds.
    pub fn total_count(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }
}

/// Group samples by `(key, threshold)` and sum their counts.
///
/// Samples with a NaN threshold belong to no group and are dropped.
/// The output is sorted by key, then by ascending threshold.
pub fn sum_samples(samples: &[Sample]) -> Vec<SummedCounts> {
    let mut groups: HashMap<(RunKey, OrderedFloat<f64>), (u64, usize), RandomState> =
        HashMap::default();
    let mut dropped = 0_usize;
    for s in samples {
        if s.threshold.is_nan() {
            dropped += 1;
            continue;
        }
        let entry = groups
            .entry((s.key, OrderedFloat(s.threshold)))
            .or_insert((0, 0));
        entry.0 += s.count;
        entry.1 += 1;
    }
    if dropped > 0 {
        log::debug!("dropped {dropped} samples with a NaN threshold");
    }

    groups
        .into_iter()
        .map(|((key, threshold), (count, n_samples))| SummedCounts {
            key,
            threshold: threshold.into_inner(),
            count,
            n_samples,
        })
        .sorted_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| a.threshold.total_cmp(&b.threshold))
        })
        .collect()
}

/// Number of samples taken at threshold `0` for every key.
///
/// Every event of a run is scanned starting at threshold zero, so this is the number of events
/// that contributed to the key.
pub fn count_events_per_run(samples: &[Sample]) -> HashMap<RunKey, u64, RandomState> {
    let mut events: HashMap<RunKey, u64, RandomState> = HashMap::default();
    for s in samples.iter().filter(|s| s.threshold == 0.0) {
        *events.entry(s.key).or_insert(0) += 1;
    }
    events
}

/// Sum the counts of a table per `(key, threshold)`, where the key is chosen by `group_by`.
///
/// Arguments
/// -----------------
/// * `table` – the samples.
/// * `keys` – names of the columns to read.
/// * `group_by` – identifiers forming the key.
///
/// Return
/// ----------
/// * The summed counts sorted by key and threshold, or [`RatescanError::MissingColumn`] when
///   a column required by `group_by` is absent.
pub fn sumup_counts_of_run(
    table: &SampleTable,
    keys: &ColumnKeys,
    group_by: GroupBy,
) -> Result<Vec<SummedCounts>, RatescanError> {
    let samples = table.extract_samples(keys, group_by)?;
    Ok(sum_samples(&samples))
}

/// Result of [`compile_ratescan_for_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRatescan {
    /// Summed counts per threshold.
    pub counts: Vec<SummedCounts>,
    /// Rates, when an ontime was given.
    pub rates: Option<RateCurve>,
}

/// Compile the rate scan of a table holding a single run.
///
/// Samples are grouped by threshold only; identifier columns are ignored.
/// With an `ontime` the counts are also divided into rates, without one only the counts are
/// returned.
///
/// # Example
///
/// ```rust
/// use ratescan::{aggregation::compile_ratescan_for_run, samples::{ColumnKeys, SampleTable}};
///
/// let table = SampleTable::from_rows(&[
///     (20150901, 182, 1, 0.0, 40000),
///     (20150901, 182, 2, 0.0, 35840),
/// ]);
/// let scan = compile_ratescan_for_run(&table, &ColumnKeys::default(), Some(160.0)).unwrap();
/// assert_eq!(scan.rates.unwrap().rows()[0].rate, 474.0);
/// ```
pub fn compile_ratescan_for_run(
    table: &SampleTable,
    keys: &ColumnKeys,
    ontime: Option<f64>,
) -> Result<CompiledRatescan, RatescanError> {
    let counts = sumup_counts_of_run(table, keys, GroupBy::Threshold)?;
    let rates = ontime
        .map(|ontime| {
            RateCurve::from_summed(RunKey::default(), Normalization::Ontime(ontime), &counts)
        })
        .transpose()?;
    Ok(CompiledRatescan { counts, rates })
}

/// Aggregate a whole table into per-key rate curves.
///
/// Arguments
/// -----------------
/// * `table` – samples of any number of runs.
/// * `params` – column names and the `normalize` flag.
/// * `group_by` – identifiers forming the key of each curve.
/// * `source` – run database providing the ontime of every `(night, run)`; not queried when
///   `params.normalize` is set.
///
/// Return
/// ----------
/// * `Err` for table-level failures: a missing column or a failed metadata query.
/// * Otherwise one entry per key: its [`RateCurve`], or the reason it could not be normalized
///   ([`RatescanError::MissingMetadata`], [`RatescanError::InvalidOntime`],
///   [`RatescanError::MissingEventCount`]).
///
/// See also
/// ------------
/// * [`sumup_counts_of_run`] – the grouping step alone.
/// * [`crate::features::find_trigger_set_threshold`] – consumes one curve.
pub fn sum_up_and_convert_to_rates<S>(
    table: &SampleTable,
    params: &RatescanParams,
    group_by: GroupBy,
    source: &S,
) -> Result<RatescanCurves, RatescanError>
where
    S: RunMetadataSource + ?Sized,
{
    let samples = table.extract_samples(&params.columns, group_by)?;
    let events = count_events_per_run(&samples);
    let summed = sum_samples(&samples);

    let groups: Vec<(RunKey, Vec<SummedCounts>)> = summed
        .into_iter()
        .chunk_by(|c| c.key)
        .into_iter()
        .map(|(key, group)| (key, group.collect()))
        .collect();

    let metadata = if params.normalize {
        HashMap::default()
    } else {
        fetch_run_metadata(source, groups.iter().map(|(key, _)| key))?
    };

    let curves: RatescanCurves = groups
        .into_iter()
        .map(|(key, counts)| {
            let normalization = if params.normalize {
                events
                    .get(&key)
                    .map(|n| Normalization::EventsPerRun(*n))
                    .ok_or(RatescanError::MissingEventCount(key))
            } else {
                key.night
                    .zip(key.run_id)
                    .and_then(|id| metadata.get(&id))
                    .and_then(|m| m.ontime)
                    .map(Normalization::Ontime)
                    .ok_or(RatescanError::MissingMetadata(key))
            };
            let curve = normalization.and_then(|n| RateCurve::from_summed(key, n, &counts));
            if let Err(err) = &curve {
                log::warn!("cannot convert the counts of {key} to rates: {err}");
            }
            (key, curve)
        })
        .collect();

    log::info!(
        "aggregated {} samples into {} rate curves",
        samples.len(),
        curves.len()
    );
    Ok(curves)
}

#[cfg(test)]
mod aggregation_test {
    use super::*;
    use crate::metadata::{RunMetadata, RunMetadataTable};

    fn two_runs() -> SampleTable {
        SampleTable::from_rows(&[
            (20150901, 182, 1, 0.0, 40000),
            (20150901, 182, 2, 0.0, 35840),
            (20150901, 182, 1, 100.0, 800),
            (20150901, 182, 2, 100.0, 800),
            (20150901, 182, 1, 200.0, 0),
            (20150901, 183, 1, 0.0, 500),
            (20150901, 183, 1, 100.0, 50),
        ])
    }

    fn db() -> RunMetadataTable {
        RunMetadataTable::new(vec![
            RunMetadata::with_ontime(20150901, 182, 160.0),
            RunMetadata::with_ontime(20150901, 183, 10.0),
        ])
    }

    #[test]
    fn test_sumup_counts_of_run() {
        let counts =
            sumup_counts_of_run(&two_runs(), &ColumnKeys::default(), GroupBy::Run).unwrap();
        assert_eq!(counts.len(), 5);
        assert_eq!(
            counts[0],
            SummedCounts {
                key: RunKey::new(20150901, 182),
                threshold: 0.0,
                count: 75840,
                n_samples: 2
            }
        );
        assert_eq!(counts[2].threshold, 200.0);
        assert_eq!(counts[2].n_samples, 1);
        assert_eq!(counts[3].key, RunKey::new(20150901, 183));
    }

    #[test]
    fn test_grouping_is_complete() {
        let table = two_runs();
        let counts = sumup_counts_of_run(&table, &ColumnKeys::default(), GroupBy::Event).unwrap();
        let n_samples: usize = counts.iter().map(|c| c.n_samples).sum();
        assert_eq!(n_samples, table.len());
        // Each (night, run, event, threshold) is unique in this table
        assert_eq!(counts.len(), table.len());
    }

    #[test]
    fn test_compile_ratescan_for_run() {
        let scan = compile_ratescan_for_run(&two_runs(), &ColumnKeys::default(), Some(160.0))
            .unwrap();
        assert_eq!(scan.counts.len(), 3);
        let curve = scan.rates.unwrap();
        assert_eq!(curve.rows()[0].count, 76340);
        assert_eq!(curve.rows()[0].rate, 76340.0 / 160.0);

        let scan = compile_ratescan_for_run(&two_runs(), &ColumnKeys::default(), None).unwrap();
        assert!(scan.rates.is_none());
    }

    #[test]
    fn test_rates_from_ontime() {
        let curves = sum_up_and_convert_to_rates(
            &two_runs(),
            &RatescanParams::default(),
            GroupBy::Run,
            &db(),
        )
        .unwrap();
        assert_eq!(curves.len(), 2);

        let curve = curves[&RunKey::new(20150901, 182)].as_ref().unwrap();
        assert_eq!(curve.normalization(), Normalization::Ontime(160.0));
        assert_eq!(curve.rows()[0].rate, 474.0);
        assert_eq!(curve.rows()[1].rate, 10.0);
        assert_eq!(curve.max_rate(), Some(474.0));

        // rate · ontime reproduces the counts
        let restored: f64 = curve.rates().map(|r| r * 160.0).sum();
        assert_eq!(restored, curve.total_count() as f64);
    }

    #[test]
    fn test_rates_per_event() {
        let params = RatescanParams::builder().normalize(true).build().unwrap();
        let curves =
            sum_up_and_convert_to_rates(&two_runs(), &params, GroupBy::Run, &RunMetadataTable::default())
                .unwrap();
        let curve = curves[&RunKey::new(20150901, 182)].as_ref().unwrap();
        assert_eq!(curve.normalization(), Normalization::EventsPerRun(2));
        assert_eq!(curve.rows()[0].rate, 37920.0);
    }

    #[test]
    fn test_missing_metadata_is_per_run() {
        let db = RunMetadataTable::new(vec![RunMetadata::with_ontime(20150901, 182, 160.0)]);
        let curves =
            sum_up_and_convert_to_rates(&two_runs(), &RatescanParams::default(), GroupBy::Run, &db)
                .unwrap();
        assert!(curves[&RunKey::new(20150901, 182)].is_ok());
        assert_eq!(
            curves[&RunKey::new(20150901, 183)],
            Err(RatescanError::MissingMetadata(RunKey::new(20150901, 183)))
        );
    }

    #[test]
    fn test_missing_event_count() {
        let table = SampleTable::from_rows(&[(1, 1, 1, 5.0, 10), (1, 1, 1, 6.0, 3)]);
        let params = RatescanParams::builder().normalize(true).build().unwrap();
        let curves =
            sum_up_and_convert_to_rates(&table, &params, GroupBy::Run, &RunMetadataTable::default())
                .unwrap();
        assert_eq!(
            curves[&RunKey::new(1, 1)],
            Err(RatescanError::MissingEventCount(RunKey::new(1, 1)))
        );
    }

    #[test]
    fn test_invalid_ontime() {
        let db = RunMetadataTable::new(vec![RunMetadata::with_ontime(20150901, 182, 0.0)]);
        let table = SampleTable::from_rows(&[(20150901, 182, 1, 0.0, 10)]);
        let curves =
            sum_up_and_convert_to_rates(&table, &RatescanParams::default(), GroupBy::Run, &db)
                .unwrap();
        assert!(matches!(
            curves[&RunKey::new(20150901, 182)],
            Err(RatescanError::InvalidOntime { .. })
        ));
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let params = RatescanParams::default();
        let a = sum_up_and_convert_to_rates(&two_runs(), &params, GroupBy::Run, &db()).unwrap();
        let b = sum_up_and_convert_to_rates(&two_runs(), &params, GroupBy::Run, &db()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_renormalization_keeps_counts() {
        let curve = RateCurve::from_points(
            RunKey::new(1, 1),
            Normalization::Ontime(2.0),
            &[(10.0, 4), (0.0, 8), (10.0, 2)],
        )
        .unwrap();
        assert_eq!(curve.len(), 2);
        assert_eq!(curve.rows()[1].count, 6);
        assert_eq!(curve.rows()[1].n_samples, 2);

        let per_event = curve
            .with_normalization(Normalization::EventsPerRun(4))
            .unwrap();
        assert_eq!(
            per_event.thresholds().collect::<Vec<_>>(),
            curve.thresholds().collect::<Vec<_>>()
        );
        assert_eq!(per_event.total_count(), curve.total_count());
        assert_eq!(per_event.rows()[0].rate, 2.0);
    }

    #[test]
    fn test_nan_threshold_dropped_and_max_rate() {
        let samples = [
            Sample {
                key: RunKey::default(),
                threshold: f64::NAN,
                count: 3,
            },
            Sample {
                key: RunKey::default(),
                threshold: 1.0,
                count: 3,
            },
        ];
        assert_eq!(sum_samples(&samples).len(), 1);

        let empty =
            RateCurve::from_points(RunKey::default(), Normalization::Ontime(1.0), &[]).unwrap();
        assert_eq!(empty.max_rate(), None);
    }
}
