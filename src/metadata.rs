//! # Run metadata collaborator
//!
//! Rates are counts divided by the *ontime* of a run, which lives in an external run database.
//! This module defines how the pipeline talks to that database without owning it.
//!
//! ## Overview
//! -----------------
//! * [`RunMetadata`] – one `(night, run_id)` row with its `ontime` and `current_at_start`.
//! * [`RunMetadataSource`] – the collaborator trait. Queries are **range** queries over nights
//!   and runs; the caller joins the answer back onto its own keys.
//! * [`RunMetadataTable`] – in-memory implementation (tests, pre-fetched dumps, CSV files).
//! * [`BackoffPolicy`] – bounded exponential backoff with full jitter.
//! * [`ThrottledSource`] – wraps any source, spaces successive queries and retries transient
//!   [`RatescanError::MetadataQuery`] failures according to a [`BackoffPolicy`]. The waiting
//!   itself goes through an injected [`Sleeper`], so tests observe delays instead of sleeping.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use ratescan::metadata::{
//!     BackoffPolicy, RunMetadata, RunMetadataSource, RunMetadataTable, ThreadSleeper, ThrottledSource,
//! };
//!
//! let table = RunMetadataTable::new(vec![RunMetadata::with_ontime(20150901, 182, 160.0)]);
//! let policy = BackoffPolicy::builder().base_delay(Duration::from_millis(1)).build().unwrap();
//! let source = ThrottledSource::new(table, policy, ThreadSleeper, 42);
//!
//! let rows = source.query_range(20150901..=20150901, 182..=182).unwrap();
//! assert_eq!(rows[0].ontime, Some(160.0));
//! ```
use std::{
    collections::HashMap,
    ops::RangeInclusive,
    sync::Mutex,
    time::{Duration, Instant},
};

use ahash::RandomState;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;

use crate::{
    constants::{Night, RunId},
    ratescan_errors::RatescanError,
    samples::RunKey,
};

/// Metadata of one run as stored in the run database.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunMetadata {
    pub night: Night,
    pub run_id: RunId,
    /// Effective observation time in seconds.
    pub ontime: Option<f64>,
    /// Camera current at the start of the run.
    pub current_at_start: Option<f64>,
}

impl RunMetadata {
    pub fn with_ontime(night: Night, run_id: RunId, ontime: f64) -> Self {
        RunMetadata {
            night,
            run_id,
            ontime: Some(ontime),
            current_at_start: None,
        }
    }
}

/// External run database.
pub trait RunMetadataSource {
    /// All runs with `night ∈ nights` and `run_id ∈ runs`.
    ///
    /// Return
    /// ----------
    /// * The matching rows in any order. Keys without a row are simply absent.
    /// * `Err(RatescanError::MetadataQuery)` for a (possibly transient) failure of the source.
    fn query_range(
        &self,
        nights: RangeInclusive<Night>,
        runs: RangeInclusive<RunId>,
    ) -> Result<Vec<RunMetadata>, RatescanError>;
}

impl<S: RunMetadataSource + ?Sized> RunMetadataSource for &S {
    fn query_range(
        &self,
        nights: RangeInclusive<Night>,
        runs: RangeInclusive<RunId>,
    ) -> Result<Vec<RunMetadata>, RatescanError> {
        (**self).query_range(nights, runs)
    }
}

/// In-memory run database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetadataTable {
    rows: Vec<RunMetadata>,
}

impl RunMetadataTable {
    pub fn new(rows: Vec<RunMetadata>) -> Self {
        RunMetadataTable { rows }
    }

    pub fn rows(&self) -> &[RunMetadata] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RunMetadataSource for RunMetadataTable {
    fn query_range(
        &self,
        nights: RangeInclusive<Night>,
        runs: RangeInclusive<RunId>,
    ) -> Result<Vec<RunMetadata>, RatescanError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| nights.contains(&r.night) && runs.contains(&r.run_id))
            .cloned()
            .collect())
    }
}

/// Fetch the metadata of every `(night, run)` appearing in `keys` with a single range query.
///
/// Keys without night or run id are ignored. The range spans the smallest and largest night and
/// run of the keys, so unrelated runs may be returned; they are filtered out here.
pub fn fetch_run_metadata<'a, S, I>(
    source: &S,
    keys: I,
) -> Result<HashMap<(Night, RunId), RunMetadata, RandomState>, RatescanError>
where
    S: RunMetadataSource + ?Sized,
    I: IntoIterator<Item = &'a RunKey>,
{
    let wanted: Vec<(Night, RunId)> = keys
        .into_iter()
        .filter_map(|k| Some((k.night?, k.run_id?)))
        .collect();

    let mut result = HashMap::default();
    if wanted.is_empty() {
        return Ok(result);
    }

    let night_min = wanted.iter().map(|w| w.0).min().unwrap_or_default();
    let night_max = wanted.iter().map(|w| w.0).max().unwrap_or_default();
    let run_min = wanted.iter().map(|w| w.1).min().unwrap_or_default();
    let run_max = wanted.iter().map(|w| w.1).max().unwrap_or_default();

    log::debug!(
        "querying run metadata for nights {night_min}..={night_max}, runs {run_min}..={run_max}"
    );
    for row in source.query_range(night_min..=night_max, run_min..=run_max)? {
        let id = (row.night, row.run_id);
        if wanted.contains(&id) {
            result.insert(id, row);
        }
    }
    Ok(result)
}

/// Strategy used to wait between metadata queries.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Bounded exponential backoff with full jitter.
///
/// The delay bound of attempt `k` is `min(max_delay, base_delay · factor^k)`; the actual delay
/// is drawn uniformly in `[0, bound]`. Attempt 0 is the pacing delay between two successive
/// queries, attempts `1..=max_retries` are retries after a transient failure.
///
/// Defaults
/// -----------------
/// * `base_delay`: 100 ms
/// * `factor`: 2
/// * `max_delay`: 10 s
/// * `max_retries`: 5
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(10),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder::default()
    }

    /// Upper bound of the delay before attempt `attempt`.
    pub fn delay_bound(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Jittered delay before attempt `attempt`, uniform in `[0, delay_bound(attempt)]`.
    pub fn jittered_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let bound = self.delay_bound(attempt).as_secs_f64();
        if bound == 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rng.random_range(0.0..=bound))
    }
}

/// Builder for [`BackoffPolicy`], with validation.
#[derive(Debug, Clone, Default)]
pub struct BackoffPolicyBuilder {
    policy: BackoffPolicy,
}

impl BackoffPolicyBuilder {
    pub fn base_delay(mut self, v: Duration) -> Self {
        self.policy.base_delay = v;
        self
    }
    pub fn factor(mut self, v: f64) -> Self {
        self.policy.factor = v;
        self
    }
    pub fn max_delay(mut self, v: Duration) -> Self {
        self.policy.max_delay = v;
        self
    }
    pub fn max_retries(mut self, v: u32) -> Self {
        self.policy.max_retries = v;
        self
    }

    /// Validate: `factor >= 1` and `base_delay <= max_delay`.
    pub fn build(self) -> Result<BackoffPolicy, RatescanError> {
        let p = &self.policy;
        if !(p.factor.is_finite() && p.factor >= 1.0) {
            return Err(RatescanError::InvalidRatescanParameter(
                "backoff factor must be >= 1".into(),
            ));
        }
        if p.base_delay > p.max_delay {
            return Err(RatescanError::InvalidRatescanParameter(
                "require backoff base_delay <= max_delay".into(),
            ));
        }
        Ok(self.policy)
    }
}

#[derive(Debug)]
struct ThrottleState {
    last_query: Option<Instant>,
    rng: StdRng,
}

/// A [`RunMetadataSource`] that paces and retries the queries of an inner source.
///
/// * Before every query except the first, waits for the remainder of a jittered pacing delay
///   (attempt 0 of the policy) measured from the end of the previous query.
/// * On [`RatescanError::MetadataQuery`], retries up to `max_retries` times, waiting a
///   jittered, exponentially growing delay before each retry. Other errors are returned at once.
#[derive(Debug)]
pub struct ThrottledSource<S, Z> {
    inner: S,
    policy: BackoffPolicy,
    sleeper: Z,
    state: Mutex<ThrottleState>,
}

impl<S, Z> ThrottledSource<S, Z>
where
    S: RunMetadataSource,
    Z: Sleeper,
{
    /// Wrap `inner`; `seed` makes the jitter reproducible.
    pub fn new(inner: S, policy: BackoffPolicy, sleeper: Z, seed: u64) -> Self {
        ThrottledSource {
            inner,
            policy,
            sleeper,
            state: Mutex::new(ThrottleState {
                last_query: None,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn sleeper(&self) -> &Z {
        &self.sleeper
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

impl<S, Z> RunMetadataSource for ThrottledSource<S, Z>
where
    S: RunMetadataSource,
    Z: Sleeper,
{
    fn query_range(
        &self,
        nights: RangeInclusive<Night>,
        runs: RangeInclusive<RunId>,
    ) -> Result<Vec<RunMetadata>, RatescanError> {
        // Held for the whole query: concurrent callers are serialized.
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(last) = state.last_query {
            let pacing = self.policy.jittered_delay(0, &mut state.rng);
            let elapsed = last.elapsed();
            if pacing > elapsed {
                self.sleeper.sleep(pacing - elapsed);
            }
        }

        let mut attempt = 0;
        let result = loop {
            match self.inner.query_range(nights.clone(), runs.clone()) {
                Err(RatescanError::MetadataQuery(msg)) if attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.jittered_delay(attempt, &mut state.rng);
                    log::warn!(
                        "run metadata query failed ({msg}), retry {attempt}/{} in {delay:?}",
                        self.policy.max_retries
                    );
                    self.sleeper.sleep(delay);
                }
                other => break other,
            }
        };

        state.last_query = Some(Instant::now());
        result
    }
}

#[cfg(test)]
mod metadata_test {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    /// Fails `failures` times with a transient error, then answers from the table.
    struct FlakySource {
        table: RunMetadataTable,
        failures: Cell<u32>,
    }

    impl RunMetadataSource for FlakySource {
        fn query_range(
            &self,
            nights: RangeInclusive<Night>,
            runs: RangeInclusive<RunId>,
        ) -> Result<Vec<RunMetadata>, RatescanError> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(RatescanError::MetadataQuery("database busy".into()));
            }
            self.table.query_range(nights, runs)
        }
    }

    fn table() -> RunMetadataTable {
        RunMetadataTable::new(vec![
            RunMetadata::with_ontime(20150901, 182, 160.0),
            RunMetadata::with_ontime(20150901, 183, 290.5),
            RunMetadata::with_ontime(20150902, 10, 200.0),
        ])
    }

    #[test]
    fn test_table_range_query() {
        let rows = table()
            .query_range(20150901..=20150901, 180..=183)
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_fetch_run_metadata_filters_range() {
        let keys = [RunKey::new(20150901, 182), RunKey::new(20150902, 10)];
        let meta = fetch_run_metadata(&table(), keys.iter()).unwrap();
        // 20150901/183 is inside the range but was not asked for
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[&(20150901, 182)].ontime, Some(160.0));
        assert_eq!(meta[&(20150902, 10)].ontime, Some(200.0));
    }

    #[test]
    fn test_fetch_without_run_keys_skips_query() {
        let meta = fetch_run_metadata(&table(), [RunKey::default()].iter()).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_delay_bound_is_bounded_exponential() {
        let policy = BackoffPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .factor(2.0)
            .max_delay(Duration::from_millis(500))
            .build()
            .unwrap();
        assert_eq!(policy.delay_bound(0), Duration::from_millis(100));
        assert_eq!(policy.delay_bound(1), Duration::from_millis(200));
        assert_eq!(policy.delay_bound(2), Duration::from_millis(400));
        assert_eq!(policy.delay_bound(3), Duration::from_millis(500));
        assert_eq!(policy.delay_bound(1000), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = BackoffPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..8 {
            let d = policy.jittered_delay(attempt, &mut rng);
            assert!(d <= policy.delay_bound(attempt));
        }
    }

    #[test]
    fn test_invalid_policy() {
        assert!(BackoffPolicy::builder().factor(0.5).build().is_err());
        assert!(BackoffPolicy::builder()
            .base_delay(Duration::from_secs(20))
            .build()
            .is_err());
    }

    #[test]
    fn test_throttled_source_retries_transient_failures() {
        let flaky = FlakySource {
            table: table(),
            failures: Cell::new(2),
        };
        let source = ThrottledSource::new(
            flaky,
            BackoffPolicy::default(),
            RecordingSleeper::default(),
            1,
        );
        let rows = source.query_range(20150901..=20150901, 182..=182).unwrap();
        assert_eq!(rows, vec![RunMetadata::with_ontime(20150901, 182, 160.0)]);

        let delays = source.sleeper().delays.lock().unwrap().clone();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] <= source.policy().delay_bound(1));
        assert!(delays[1] <= source.policy().delay_bound(2));
    }

    #[test]
    fn test_throttled_source_gives_up() {
        let flaky = FlakySource {
            table: table(),
            failures: Cell::new(10),
        };
        let policy = BackoffPolicy::builder().max_retries(3).build().unwrap();
        let source = ThrottledSource::new(flaky, policy, RecordingSleeper::default(), 1);
        let err = source
            .query_range(20150901..=20150901, 182..=182)
            .unwrap_err();
        assert_eq!(err, RatescanError::MetadataQuery("database busy".into()));
        assert_eq!(source.sleeper().delays.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_throttled_source_paces_successive_queries() {
        let policy = BackoffPolicy::builder()
            .base_delay(Duration::from_secs(5))
            .build()
            .unwrap();
        let source = ThrottledSource::new(table(), policy, RecordingSleeper::default(), 3);
        source.query_range(20150901..=20150901, 182..=182).unwrap();
        assert!(source.sleeper().delays.lock().unwrap().is_empty());
        source.query_range(20150901..=20150901, 182..=182).unwrap();
        source.query_range(20150901..=20150901, 182..=182).unwrap();
        let delays = source.sleeper().delays.lock().unwrap().clone();
        // Back-to-back queries: every pacing delay drawn in [0, 5 s] exceeds the elapsed time
        assert_eq!(delays.len(), 2);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(5)));
    }
}
