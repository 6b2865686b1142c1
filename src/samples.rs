//! # Rate-scan samples
//!
//! Raw input of the pipeline: one row per (event, threshold) observation with the number of
//! trigger primitives firing at or above that threshold.
//!
//! ## Overview
//! -----------------
//! * [`SampleTable`] – columnar, in-memory table whose column names are configurable,
//! * [`ColumnKeys`] – the typed set of column names to read from a table,
//! * [`GroupBy`] – which identifiers make up the grouping key,
//! * [`Sample`] – one validated row, extracted once at the entry of every operation,
//! * [`RunKey`] – the grouping key (`night`, `run_id`, `event_num`) of a group of samples.
//!
//! Column lookups are resolved once by [`SampleTable::extract_samples`]; a missing column is
//! reported as [`RatescanError::MissingColumn`] with the offending name, a negative or
//! non-integral count as [`RatescanError::InvalidValue`]. Both are failures of the whole table:
//! no operation downstream sees a partially validated table.
use std::{collections::HashMap, fmt};

use ahash::RandomState;

use crate::{
    constants::{
        EventNum, Night, RunId, Threshold, COUNTS_KEY, EVENT_NUM_KEY, NIGHT_KEY, RUN_ID_KEY,
        THRESHOLDS_KEY,
    },
    ratescan_errors::RatescanError,
};

/// Names of the columns holding the identifiers, thresholds and counts of a sample table.
///
/// Defaults
/// -----------------
/// * `night_key`: `"night"`
/// * `run_id_key`: `"run_id"`
/// * `event_num_key`: `"event_num"`
/// * `counts_key`: `"ratescan_trigger_counts"`
/// * `thresholds_key`: `"ratescan_trigger_thresholds"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKeys {
    pub night_key: String,
    pub run_id_key: String,
    pub event_num_key: String,
    pub counts_key: String,
    pub thresholds_key: String,
}

impl Default for ColumnKeys {
    fn default() -> Self {
        ColumnKeys {
            night_key: NIGHT_KEY.into(),
            run_id_key: RUN_ID_KEY.into(),
            event_num_key: EVENT_NUM_KEY.into(),
            counts_key: COUNTS_KEY.into(),
            thresholds_key: THRESHOLDS_KEY.into(),
        }
    }
}

impl ColumnKeys {
    /// All column names, identifiers first.
    pub fn all(&self) -> [&str; 5] {
        [
            self.night_key.as_str(),
            self.run_id_key.as_str(),
            self.event_num_key.as_str(),
            self.counts_key.as_str(),
            self.thresholds_key.as_str(),
        ]
    }
}

/// Identifiers forming the grouping key of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupBy {
    /// Group by threshold only: the table holds a single rate scan.
    Threshold,
    /// Group by night and run.
    Run,
    /// Group by night, run and event number.
    Event,
}

/// Grouping key of a set of samples.
///
/// Identifiers that are not part of the grouping are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunKey {
    pub night: Option<Night>,
    pub run_id: Option<RunId>,
    pub event_num: Option<EventNum>,
}

impl RunKey {
    pub fn new(night: Night, run_id: RunId) -> Self {
        RunKey {
            night: Some(night),
            run_id: Some(run_id),
            event_num: None,
        }
    }

    /// The same key with the event number dropped.
    pub fn run_only(&self) -> RunKey {
        RunKey {
            event_num: None,
            ..*self
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if let Some(night) = self.night {
            parts.push(format!("night={night}"));
        }
        if let Some(run_id) = self.run_id {
            parts.push(format!("run_id={run_id}"));
        }
        if let Some(event_num) = self.event_num {
            parts.push(format!("event_num={event_num}"));
        }
        if parts.is_empty() {
            write!(f, "<single ratescan>")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// One validated rate-scan observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub key: RunKey,
    pub threshold: Threshold,
    pub count: u64,
}

/// A single column of a [`SampleTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn f64_at(&self, row: usize) -> f64 {
        match self {
            Column::Int(v) => v[row] as f64,
            Column::Float(v) => v[row],
        }
    }

    /// Integer value at `row`; floats are accepted when they hold an exact integer.
    fn i64_at(&self, row: usize) -> Option<i64> {
        match self {
            Column::Int(v) => Some(v[row]),
            Column::Float(v) => {
                let x = v[row];
                (x.is_finite() && x.fract() == 0.0).then_some(x as i64)
            }
        }
    }
}

impl From<Vec<i64>> for Column {
    fn from(v: Vec<i64>) -> Self {
        Column::Int(v)
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Column::Float(v)
    }
}

/// Columnar in-memory table of rate-scan samples.
///
/// All columns have the same length. Column names are free; the [`ColumnKeys`] passed to each
/// operation say which ones to read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTable {
    columns: HashMap<String, Column, RandomState>,
    n_rows: usize,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a column.
    ///
    /// Return
    /// ----------
    /// * `Err(RatescanError::InvalidRatescanParameter)` if the length differs from the
    ///   columns already present.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        column: impl Into<Column>,
    ) -> Result<Self, RatescanError> {
        let name = name.into();
        let column = column.into();
        if !self.columns.is_empty() && column.len() != self.n_rows {
            return Err(RatescanError::InvalidRatescanParameter(format!(
                "column {name} has {} rows, expected {}",
                column.len(),
                self.n_rows
            )));
        }
        self.n_rows = column.len();
        self.columns.insert(name, column);
        Ok(self)
    }

    /// Build a table with the default column names from per-row tuples
    /// `(night, run_id, event_num, threshold, count)`.
    pub fn from_rows(rows: &[(Night, RunId, EventNum, Threshold, u64)]) -> Self {
        let keys = ColumnKeys::default();
        let mut columns = HashMap::default();
        columns.insert(
            keys.night_key,
            Column::Int(rows.iter().map(|r| r.0).collect()),
        );
        columns.insert(
            keys.run_id_key,
            Column::Int(rows.iter().map(|r| r.1).collect()),
        );
        columns.insert(
            keys.event_num_key,
            Column::Int(rows.iter().map(|r| r.2).collect()),
        );
        columns.insert(
            keys.thresholds_key,
            Column::Float(rows.iter().map(|r| r.3).collect()),
        );
        columns.insert(
            keys.counts_key,
            Column::Int(rows.iter().map(|r| r.4 as i64).collect()),
        );
        SampleTable {
            columns,
            n_rows: rows.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Borrow a column by name.
    pub fn column(&self, name: &str) -> Result<&Column, RatescanError> {
        self.columns
            .get(name)
            .ok_or_else(|| RatescanError::MissingColumn(name.to_string()))
    }

    /// Validate the columns needed for `group_by` and turn every row into a [`Sample`].
    ///
    /// Required columns
    /// -----------------
    /// * always: thresholds and counts,
    /// * [`GroupBy::Run`]: night and run id,
    /// * [`GroupBy::Event`]: night, run id and event number.
    ///
    /// Return
    /// ----------
    /// * The samples in table order, or the first [`RatescanError::MissingColumn`] /
    ///   [`RatescanError::InvalidValue`] encountered.
    pub fn extract_samples(
        &self,
        keys: &ColumnKeys,
        group_by: GroupBy,
    ) -> Result<Vec<Sample>, RatescanError> {
        let (night, run, event) = match group_by {
            GroupBy::Threshold => (None, None, None),
            GroupBy::Run => (
                Some(self.column(&keys.night_key)?),
                Some(self.column(&keys.run_id_key)?),
                None,
            ),
            GroupBy::Event => (
                Some(self.column(&keys.night_key)?),
                Some(self.column(&keys.run_id_key)?),
                Some(self.column(&keys.event_num_key)?),
            ),
        };
        self.collect_samples(keys, night, run, event)
    }

    /// Like [`extract_samples`](SampleTable::extract_samples) with per-event keys, but the
    /// night column is optional: when absent, keys hold only run and event.
    pub(crate) fn extract_event_samples(
        &self,
        keys: &ColumnKeys,
    ) -> Result<Vec<Sample>, RatescanError> {
        let night = self.columns.get(&keys.night_key);
        let run = self.column(&keys.run_id_key)?;
        let event = self.column(&keys.event_num_key)?;
        self.collect_samples(keys, night, Some(run), Some(event))
    }

    fn collect_samples(
        &self,
        keys: &ColumnKeys,
        night: Option<&Column>,
        run: Option<&Column>,
        event: Option<&Column>,
    ) -> Result<Vec<Sample>, RatescanError> {
        let thresholds = self.column(&keys.thresholds_key)?;
        let counts = self.column(&keys.counts_key)?;

        let id_at = |column: Option<&Column>,
                     name: &str,
                     row: usize|
         -> Result<Option<i64>, RatescanError> {
            match column {
                None => Ok(None),
                Some(c) => c.i64_at(row).map(Some).ok_or_else(|| RatescanError::InvalidValue {
                    column: name.to_string(),
                    row,
                    value: c.f64_at(row).to_string(),
                }),
            }
        };

        (0..self.n_rows)
            .map(|row| {
                let count = counts
                    .i64_at(row)
                    .filter(|c| *c >= 0)
                    .ok_or_else(|| RatescanError::InvalidValue {
                        column: keys.counts_key.clone(),
                        row,
                        value: counts.f64_at(row).to_string(),
                    })?;
                Ok(Sample {
                    key: RunKey {
                        night: id_at(night, &keys.night_key, row)?,
                        run_id: id_at(run, &keys.run_id_key, row)?,
                        event_num: id_at(event, &keys.event_num_key, row)?,
                    },
                    threshold: thresholds.f64_at(row),
                    count: count as u64,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod samples_test {
    use super::*;

    fn small_table() -> SampleTable {
        SampleTable::from_rows(&[
            (20150901, 182, 1, 0.0, 3),
            (20150901, 182, 1, 10.0, 1),
            (20150901, 182, 2, 0.0, 2),
        ])
    }

    #[test]
    fn test_extract_samples_per_run() {
        let samples = small_table()
            .extract_samples(&ColumnKeys::default(), GroupBy::Run)
            .unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[1].key, RunKey::new(20150901, 182));
        assert_eq!(samples[1].threshold, 10.0);
        assert_eq!(samples[1].count, 1);
    }

    #[test]
    fn test_extract_samples_per_threshold_ignores_ids() {
        let table = SampleTable::new()
            .with_column(THRESHOLDS_KEY, vec![0.0, 5.0])
            .unwrap()
            .with_column(COUNTS_KEY, vec![4_i64, 2])
            .unwrap();
        let samples = table
            .extract_samples(&ColumnKeys::default(), GroupBy::Threshold)
            .unwrap();
        assert_eq!(samples[0].key, RunKey::default());
    }

    #[test]
    fn test_missing_column() {
        let table = SampleTable::new()
            .with_column("thr", vec![0.0, 5.0])
            .unwrap()
            .with_column(COUNTS_KEY, vec![4_i64, 2])
            .unwrap();
        let err = table
            .extract_samples(&ColumnKeys::default(), GroupBy::Threshold)
            .unwrap_err();
        assert_eq!(err, RatescanError::MissingColumn(THRESHOLDS_KEY.into()));

        let keys = ColumnKeys {
            thresholds_key: "thr".into(),
            ..ColumnKeys::default()
        };
        let err = table.extract_samples(&keys, GroupBy::Run).unwrap_err();
        assert_eq!(err, RatescanError::MissingColumn(NIGHT_KEY.into()));
    }

    #[test]
    fn test_invalid_count() {
        let table = SampleTable::new()
            .with_column(THRESHOLDS_KEY, vec![0.0, 5.0])
            .unwrap()
            .with_column(COUNTS_KEY, vec![1.0, 2.5])
            .unwrap();
        let err = table
            .extract_samples(&ColumnKeys::default(), GroupBy::Threshold)
            .unwrap_err();
        assert_eq!(
            err,
            RatescanError::InvalidValue {
                column: COUNTS_KEY.into(),
                row: 1,
                value: "2.5".into()
            }
        );
    }

    #[test]
    fn test_column_length_mismatch() {
        let res = SampleTable::new()
            .with_column(THRESHOLDS_KEY, vec![0.0, 5.0])
            .unwrap()
            .with_column(COUNTS_KEY, vec![1_i64]);
        assert!(matches!(
            res,
            Err(RatescanError::InvalidRatescanParameter(_))
        ));
    }

    #[test]
    fn test_run_key_display() {
        assert_eq!(
            RunKey::new(20150901, 182).to_string(),
            "night=20150901, run_id=182"
        );
        assert_eq!(RunKey::default().to_string(), "<single ratescan>");
    }
}
