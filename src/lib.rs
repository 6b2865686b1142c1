//! # ratescan
//!
//! Trigger set-point determination from FACT rate scans.
//!
//! A rate scan records, for every event, how many trigger primitives fire at each of a series of
//! thresholds. Summed over a run and divided by the run ontime it gives the trigger rate as a
//! function of the threshold. This crate
//!
//! * aggregates raw samples into per-run rate curves ([`aggregation`]),
//! * cuts each curve into shower, NSB and full windows ([`ranges`]),
//! * fits the power-law, exponential and combined models ([`fit`], [`models`]),
//! * solves for the threshold where the shower contribution equals `1/e` of the NSB
//!   contribution ([`solver`], [`features`]),
//! * extracts the highest threshold keeping a single primitive per run ([`features`]),
//! * runs all of the above over many runs with per-run error isolation ([`ratescan_set`]).
//!
//! ```rust,no_run
//! use ratescan::{
//!     extract_features_per_run, read_run_metadata_csv, read_samples_csv, RatescanParams,
//! };
//! use camino::Utf8Path;
//!
//! let params = RatescanParams::builder().max_threshold(1000.0).build()?;
//! let table = read_samples_csv(Utf8Path::new("ratescans.csv"), &params.columns)?;
//! let runs = read_run_metadata_csv(Utf8Path::new("runs.csv"))?;
//!
//! for run in extract_features_per_run(&table, &params, &runs)? {
//!     match &run.set_point {
//!         Ok(sp) => println!("{}: {:.1}", run.key, sp.set_threshold),
//!         Err(e) => println!("{}: {e}", run.key),
//!     }
//! }
//! # Ok::<(), ratescan::RatescanError>(())
//! ```
pub mod aggregation;
pub mod constants;
pub mod features;
pub mod fit;
pub mod metadata;
pub mod models;
pub mod params;
#[cfg(feature = "progress")]
pub mod progress_bar;
pub mod ranges;
pub mod ratescan_errors;
pub mod ratescan_set;
pub mod readers;
pub mod samples;
pub mod solver;

pub use aggregation::{RateCurve, RateRow};
pub use features::{
    find_trigger_set_threshold, max_possible_threshold_to_keep, MaxThresholdRecord, SetPoint,
};
pub use fit::fit_result::FitResult;
pub use models::CurveModel;
pub use params::RatescanParams;
pub use ranges::{FitWindow, RateRanges};
pub use ratescan_errors::RatescanError;
pub use ratescan_set::{extract_features_per_run, RunFeatures, SetPointBatch};
pub use readers::{read_run_metadata_csv, read_samples_csv};
pub use samples::{ColumnKeys, GroupBy, RunKey, SampleTable};
