//! # Rate-scan analysis parameters
//!
//! [`RatescanParams`] gathers every knob of the pipeline (column names, normalization mode,
//! window fractions, fit seeds, Levenberg–Marquardt and Newton–Raphson controls) in one
//! immutable value. It is built once per invocation, validated once in
//! [`RatescanParamsBuilder::build`], and passed explicitly to every operation.
use std::fmt;

use crate::{
    constants::{
        DEFAULT_MAX_THRESHOLD, NSB_RATE_MAX_FRACTION, NSB_RATE_MIN_FRACTION, NSB_SEED,
        SEED_RATE_FRACTION, SHOWER_RATE_DIVISOR, SHOWER_SEED,
    },
    fit::levenberg_marquardt::LmSettings,
    ratescan_errors::RatescanError,
    samples::ColumnKeys,
};

/// Configuration of the rate-scan pipeline.
///
/// Fields
/// -----------------
/// * `columns` – names of the identifier, threshold and count columns.
/// * `normalize` – divide counts by the number of events instead of the ontime
///   (simulated runs have no ontime).
/// * `max_threshold` – thresholds at or above this value are excluded from the shower and full fits.
/// * `scale` – rescaling of the shower contribution in the set-point condition.
/// * `n_primitives` – primitive count required by the max-threshold extractor.
/// * `nsb_rate_max_fraction`, `nsb_rate_min_fraction` – NSB window bounds as fractions of the peak rate.
/// * `shower_rate_divisor` – `shower_rate_max = nsb_rate_min / shower_rate_divisor`.
/// * `seed_rate_fraction` – the root finder starts at the first threshold whose rate is below
///   this fraction of the peak rate.
/// * `shower_seed`, `nsb_seed` – initial guesses of the partial fits.
/// * `lm` – Levenberg–Marquardt stopping criteria.
/// * `root_eps`, `root_max_iter` – Newton–Raphson convergence controls.
///
/// Defaults
/// -----------------
/// * `normalize`: false
/// * `max_threshold`: 5000
/// * `scale`: 1
/// * `n_primitives`: 1
/// * `nsb_rate_max_fraction`: 0.6
/// * `nsb_rate_min_fraction`: 0.1
/// * `shower_rate_divisor`: 2
/// * `seed_rate_fraction`: 0.1
/// * `shower_seed`: `(5.52310784e10, -3, 3.70127911e2)`
/// * `nsb_seed`: `(-2.18757227e-2, 6.94879358e2)`
/// * `root_eps`: 1e-9
/// * `root_max_iter`: 100
#[derive(Debug, Clone, PartialEq)]
pub struct RatescanParams {
    pub columns: ColumnKeys,
    pub normalize: bool,
    pub max_threshold: f64,
    pub scale: f64,
    pub n_primitives: u64,

    // --- Fit windows ---
    pub nsb_rate_max_fraction: f64,
    pub nsb_rate_min_fraction: f64,
    pub shower_rate_divisor: f64,
    pub seed_rate_fraction: f64,

    // --- Fits ---
    pub shower_seed: [f64; 3],
    pub nsb_seed: [f64; 2],
    pub lm: LmSettings,

    // --- Threshold solver ---
    pub root_eps: f64,
    pub root_max_iter: usize,
}

impl RatescanParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`RatescanParamsBuilder`] starting from the default values.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ratescan::params::RatescanParams;
    ///
    /// let params = RatescanParams::builder()
    ///     .max_threshold(1000.0)
    ///     .normalize(true)
    ///     .build()
    ///     .unwrap();
    /// assert!(params.normalize);
    /// ```
    pub fn builder() -> RatescanParamsBuilder {
        RatescanParamsBuilder::new()
    }
}

impl Default for RatescanParams {
    fn default() -> Self {
        RatescanParams {
            columns: ColumnKeys::default(),
            normalize: false,
            max_threshold: DEFAULT_MAX_THRESHOLD,
            scale: 1.0,
            n_primitives: 1,

            nsb_rate_max_fraction: NSB_RATE_MAX_FRACTION,
            nsb_rate_min_fraction: NSB_RATE_MIN_FRACTION,
            shower_rate_divisor: SHOWER_RATE_DIVISOR,
            seed_rate_fraction: SEED_RATE_FRACTION,

            shower_seed: SHOWER_SEED,
            nsb_seed: NSB_SEED,
            lm: LmSettings::default(),

            root_eps: 1e-9,
            root_max_iter: 100,
        }
    }
}

/// Builder for [`RatescanParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct RatescanParamsBuilder {
    params: RatescanParams,
}

impl RatescanParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: RatescanParams::default(),
        }
    }

    pub fn columns(mut self, v: ColumnKeys) -> Self {
        self.params.columns = v;
        self
    }
    pub fn night_key(mut self, v: impl Into<String>) -> Self {
        self.params.columns.night_key = v.into();
        self
    }
    pub fn run_id_key(mut self, v: impl Into<String>) -> Self {
        self.params.columns.run_id_key = v.into();
        self
    }
    pub fn event_num_key(mut self, v: impl Into<String>) -> Self {
        self.params.columns.event_num_key = v.into();
        self
    }
    pub fn counts_key(mut self, v: impl Into<String>) -> Self {
        self.params.columns.counts_key = v.into();
        self
    }
    pub fn thresholds_key(mut self, v: impl Into<String>) -> Self {
        self.params.columns.thresholds_key = v.into();
        self
    }
    pub fn normalize(mut self, v: bool) -> Self {
        self.params.normalize = v;
        self
    }
    pub fn max_threshold(mut self, v: f64) -> Self {
        self.params.max_threshold = v;
        self
    }
    pub fn scale(mut self, v: f64) -> Self {
        self.params.scale = v;
        self
    }
    pub fn n_primitives(mut self, v: u64) -> Self {
        self.params.n_primitives = v;
        self
    }
    pub fn nsb_rate_max_fraction(mut self, v: f64) -> Self {
        self.params.nsb_rate_max_fraction = v;
        self
    }
    pub fn nsb_rate_min_fraction(mut self, v: f64) -> Self {
        self.params.nsb_rate_min_fraction = v;
        self
    }
    pub fn shower_rate_divisor(mut self, v: f64) -> Self {
        self.params.shower_rate_divisor = v;
        self
    }
    pub fn seed_rate_fraction(mut self, v: f64) -> Self {
        self.params.seed_rate_fraction = v;
        self
    }
    pub fn shower_seed(mut self, v: [f64; 3]) -> Self {
        self.params.shower_seed = v;
        self
    }
    pub fn nsb_seed(mut self, v: [f64; 2]) -> Self {
        self.params.nsb_seed = v;
        self
    }
    pub fn lm(mut self, v: LmSettings) -> Self {
        self.params.lm = v;
        self
    }
    pub fn root_eps(mut self, v: f64) -> Self {
        self.params.root_eps = v;
        self
    }
    pub fn root_max_iter(mut self, v: usize) -> Self {
        self.params.root_max_iter = v;
        self
    }

    #[inline]
    fn gt0(x: f64) -> bool {
        x.is_finite() && x > 0.0
    }

    #[inline]
    fn fraction(x: f64) -> bool {
        x.is_finite() && x > 0.0 && x <= 1.0
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * column names non-empty and pairwise distinct,
    /// * `max_threshold > 0`, `scale > 0`, `n_primitives >= 1`,
    /// * `0 < nsb_rate_min_fraction < nsb_rate_max_fraction <= 1`,
    /// * `shower_rate_divisor >= 1`, `seed_rate_fraction ∈ (0, 1]`,
    /// * finite seeds,
    /// * `lm`: non-negative tolerances, at least one positive, `initial_lambda > 0`,
    /// * `root_eps > 0`, `root_max_iter >= 1`.
    ///
    /// Returns
    /// -----------------
    /// * `Ok(RatescanParams)` if every rule holds,
    /// * `Err(RatescanError::InvalidRatescanParameter)` naming the first violated rule otherwise.
    pub fn build(self) -> Result<RatescanParams, RatescanError> {
        let p = &self.params;
        let invalid = |msg: &str| Err(RatescanError::InvalidRatescanParameter(msg.into()));

        let names = p.columns.all();
        if names.iter().any(|n| n.is_empty()) {
            return invalid("column names must not be empty");
        }
        for (i, a) in names.iter().enumerate() {
            if names[i + 1..].contains(a) {
                return Err(RatescanError::InvalidRatescanParameter(format!(
                    "column name {a} is used twice"
                )));
            }
        }

        if !Self::gt0(p.max_threshold) {
            return invalid("max_threshold must be > 0");
        }
        if !Self::gt0(p.scale) {
            return invalid("scale must be > 0");
        }
        if p.n_primitives == 0 {
            return invalid("n_primitives must be >= 1");
        }

        if !Self::fraction(p.nsb_rate_max_fraction) || !Self::fraction(p.nsb_rate_min_fraction) {
            return invalid("window fractions must lie in (0, 1]");
        }
        if p.nsb_rate_min_fraction >= p.nsb_rate_max_fraction {
            return invalid("require nsb_rate_min_fraction < nsb_rate_max_fraction");
        }
        if !(p.shower_rate_divisor.is_finite() && p.shower_rate_divisor >= 1.0) {
            return invalid("shower_rate_divisor must be >= 1");
        }
        if !Self::fraction(p.seed_rate_fraction) {
            return invalid("seed_rate_fraction must lie in (0, 1]");
        }

        if p.shower_seed.iter().chain(p.nsb_seed.iter()).any(|x| !x.is_finite()) {
            return invalid("fit seeds must be finite");
        }

        p.lm.validate()?;

        if !Self::gt0(p.root_eps) {
            return invalid("root_eps must be > 0");
        }
        if p.root_max_iter == 0 {
            return invalid("root_max_iter must be >= 1");
        }

        Ok(self.params)
    }
}

impl fmt::Display for RatescanParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 50;
            writeln!(f, "Ratescan Parameters")?;
            writeln!(f, "-------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Columns]")?;
            line!("night_key = {}", self.columns.night_key, "calendar night")?;
            line!("run_id_key = {}", self.columns.run_id_key, "run identifier")?;
            line!("event_num_key = {}", self.columns.event_num_key, "event number")?;
            line!("counts_key = {}", self.columns.counts_key, "primitives above threshold")?;
            line!("thresholds_key = {}", self.columns.thresholds_key, "trigger threshold")?;

            writeln!(f, "[Rates & windows]")?;
            line!("normalize = {}", self.normalize, "divide by events instead of ontime")?;
            line!("max_threshold = {}", self.max_threshold, "upper threshold of shower/full fits")?;
            line!("nsb_rate_max_fraction = {}", self.nsb_rate_max_fraction, "of peak rate")?;
            line!("nsb_rate_min_fraction = {}", self.nsb_rate_min_fraction, "of peak rate")?;
            line!("shower_rate_divisor = {}", self.shower_rate_divisor, "shower max = nsb min / divisor")?;
            line!("seed_rate_fraction = {}", self.seed_rate_fraction, "root finder start")?;

            writeln!(f, "[Fits]")?;
            line!("shower_seed = {:?}", self.shower_seed, "(m, a, b)")?;
            line!("nsb_seed = {:?}", self.nsb_seed, "(m, t_0)")?;
            line!("lm.ftol = {:e}", self.lm.ftol, "relative cost reduction")?;
            line!("lm.xtol = {:e}", self.lm.xtol, "relative step size")?;
            line!("lm.gtol = {:e}", self.lm.gtol, "gradient orthogonality")?;

            writeln!(f, "[Set-point]")?;
            line!("scale = {}", self.scale, "shower rescaling")?;
            line!("n_primitives = {}", self.n_primitives, "max-threshold extractor")?;
            line!("root_eps = {:e}", self.root_eps, "Newton-Raphson tolerance")?;
            line!("root_max_iter = {}", self.root_max_iter, "Newton-Raphson iterations")?;
            Ok(())
        } else {
            write!(
                f,
                "RatescanParams(normalize={}, max_threshold={}, scale={}, n_primitives={}, nsb=[{}, {}], shower_divisor={})",
                self.normalize,
                self.max_threshold,
                self.scale,
                self.n_primitives,
                self.nsb_rate_min_fraction,
                self.nsb_rate_max_fraction,
                self.shower_rate_divisor,
            )
        }
    }
}

#[cfg(test)]
mod params_test {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = RatescanParams::builder().build().unwrap();
        assert_eq!(params, RatescanParams::default());
        assert_eq!(params.max_threshold, 5000.0);
        assert_eq!(params.shower_seed, [5.52310784e10, -3.0, 3.70127911e2]);
        assert_eq!(params.nsb_seed, [-2.18757227e-2, 6.94879358e2]);
    }

    #[test]
    fn test_builder_overrides() {
        let params = RatescanParams::builder()
            .night_key("lons_night")
            .run_id_key("lons_run_id")
            .normalize(true)
            .scale(2.0)
            .build()
            .unwrap();
        assert_eq!(params.columns.night_key, "lons_night");
        assert_eq!(params.columns.run_id_key, "lons_run_id");
        assert!(params.normalize);
        assert_eq!(params.scale, 2.0);
    }

    #[test]
    fn test_invalid_fractions() {
        let err = RatescanParams::builder()
            .nsb_rate_min_fraction(0.7)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RatescanError::InvalidRatescanParameter(
                "require nsb_rate_min_fraction < nsb_rate_max_fraction".into()
            )
        );
    }

    #[test]
    fn test_duplicate_columns() {
        let err = RatescanParams::builder()
            .counts_key("run_id")
            .build()
            .unwrap_err();
        assert!(matches!(err, RatescanError::InvalidRatescanParameter(_)));
    }

    #[test]
    fn test_invalid_scalars() {
        assert!(RatescanParams::builder().scale(0.0).build().is_err());
        assert!(RatescanParams::builder().max_threshold(f64::NAN).build().is_err());
        assert!(RatescanParams::builder().n_primitives(0).build().is_err());
        assert!(RatescanParams::builder().root_max_iter(0).build().is_err());
        assert!(RatescanParams::builder()
            .shower_seed([f64::INFINITY, -3.0, 0.0])
            .build()
            .is_err());
    }

    #[test]
    fn test_display() {
        let params = RatescanParams::default();
        let compact = format!("{params}");
        assert!(compact.starts_with("RatescanParams(normalize=false"));
        let pretty = format!("{params:#}");
        assert!(pretty.contains("max_threshold = 5000"));
        assert!(pretty.contains("[Fits]"));
    }
}
