//! # Constants and type definitions for ratescan
//!
//! This module centralizes the **default column names**, **model seeds**, **window fractions**
//! and **common type aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Column names of the FACT rate-scan tables
//! - Literal initial guesses of the shower and NSB fits
//! - Fractions of the peak rate defining the fit windows
//! - Type aliases for thresholds, rates and run identifiers

// -------------------------------------------------------------------------------------------------
// Column names
// -------------------------------------------------------------------------------------------------

/// Column holding the calendar night identifier (e.g. `20150901`)
pub const NIGHT_KEY: &str = "night";

/// Column holding the run identifier within a night
pub const RUN_ID_KEY: &str = "run_id";

/// Column holding the event number within a run
pub const EVENT_NUM_KEY: &str = "event_num";

/// Column holding the number of trigger primitives above threshold
pub const COUNTS_KEY: &str = "ratescan_trigger_counts";

/// Column holding the trigger threshold (DAC counts)
pub const THRESHOLDS_KEY: &str = "ratescan_trigger_thresholds";

// -------------------------------------------------------------------------------------------------
// Model constants
// -------------------------------------------------------------------------------------------------

/// Spectral index of cosmic-ray protons
pub const PROTON_SPECTRAL_INDEX: f64 = -2.7;

/// Initial guess `(m, a, b)` of the shower power-law fit
pub const SHOWER_SEED: [f64; 3] = [5.52310784e10, -3.0, 3.70127911e2];

/// Initial guess `(m, t_0)` of the NSB exponential fit
pub const NSB_SEED: [f64; 2] = [-2.18757227e-2, 6.94879358e2];

/// Largest parameter count among the curve models (the combined model)
pub const MAX_MODEL_PARAMS: usize = 5;

// -------------------------------------------------------------------------------------------------
// Window and solver defaults
// -------------------------------------------------------------------------------------------------

/// Thresholds at or above this value are excluded from the shower and full fits
pub const DEFAULT_MAX_THRESHOLD: f64 = 5000.0;

/// Upper rate bound of the NSB window, as a fraction of the peak rate
pub const NSB_RATE_MAX_FRACTION: f64 = 0.6;

/// Lower rate bound of the NSB window, as a fraction of the peak rate
pub const NSB_RATE_MIN_FRACTION: f64 = 0.1;

/// `shower_rate_max = nsb_rate_min / SHOWER_RATE_DIVISOR`
pub const SHOWER_RATE_DIVISOR: f64 = 2.0;

/// Rate fraction used to pick the starting threshold of the root finder
pub const SEED_RATE_FRACTION: f64 = 0.1;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Trigger threshold in DAC counts
pub type Threshold = f64;

/// Trigger rate in Hz (or per event when normalized)
pub type Rate = f64;

/// Calendar night identifier, `YYYYMMDD`
pub type Night = i64;

/// Run identifier within a night
pub type RunId = i64;

/// Event number within a run
pub type EventNum = i64;
