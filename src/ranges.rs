//! # Fit windows of a rate scan
//!
//! A rate scan has three regimes: a saturated plateau at low thresholds, an NSB dominated
//! exponential fall, and a shower dominated power-law tail. [`RateRanges`] derives the rate and
//! threshold bounds of each regime from the peak rate `R` of the curve:
//!
//! ```text
//! nsb_rate_max    = 0.6 · R
//! nsb_rate_min    = 0.1 · R
//! shower_rate_max = nsb_rate_min / 2
//! ```
//!
//! and [`RateRanges::select`] cuts the curve into the three [`FitWindow`]s:
//!
//! | window   | condition                                                  |
//! |----------|------------------------------------------------------------|
//! | `shower` | `rate < shower_rate_max` and `threshold < max_threshold`   |
//! | `nsb`    | `nsb_rate_min < rate < nsb_rate_max`                       |
//! | `full`   | `rate < nsb_rate_max` and `threshold < max_threshold`      |
//!
//! The fractions come from [`RatescanParams`].
use std::fmt;

use crate::{
    aggregation::{RateCurve, RateRow},
    params::RatescanParams,
    ratescan_errors::RatescanError,
};

/// One of the three fitted regions of a rate scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FitWindow {
    Shower,
    Nsb,
    Full,
}

impl FitWindow {
    /// Prefix used when flattening results into named values.
    pub fn prefix(&self) -> &'static str {
        match self {
            FitWindow::Shower => "shower",
            FitWindow::Nsb => "nsb",
            FitWindow::Full => "full",
        }
    }
}

impl fmt::Display for FitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Rate and threshold bounds of the fit windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateRanges {
    pub max_rate: f64,
    pub max_threshold: f64,
    pub nsb_rate_max: f64,
    pub nsb_rate_min: f64,
    pub shower_rate_max: f64,
}

/// Rows of a curve falling in each window, in curve order.
#[derive(Debug, Clone, PartialEq)]
pub struct FitWindows {
    pub shower: Vec<RateRow>,
    pub nsb: Vec<RateRow>,
    pub full: Vec<RateRow>,
}

impl FitWindows {
    pub fn get(&self, window: FitWindow) -> &[RateRow] {
        match window {
            FitWindow::Shower => &self.shower,
            FitWindow::Nsb => &self.nsb,
            FitWindow::Full => &self.full,
        }
    }
}

impl RateRanges {
    /// Derive the bounds from the peak rate of `curve`.
    ///
    /// NaN rates are ignored; an empty curve has a peak rate of zero, which leaves every window
    /// empty.
    pub fn from_curve(curve: &RateCurve, params: &RatescanParams) -> Self {
        Self::from_max_rate(curve.max_rate().unwrap_or(0.0), params)
    }

    pub fn from_max_rate(max_rate: f64, params: &RatescanParams) -> Self {
        let nsb_rate_min = params.nsb_rate_min_fraction * max_rate;
        RateRanges {
            max_rate,
            max_threshold: params.max_threshold,
            nsb_rate_max: params.nsb_rate_max_fraction * max_rate,
            nsb_rate_min,
            shower_rate_max: nsb_rate_min / params.shower_rate_divisor,
        }
    }

    /// Whether a `(threshold, rate)` point lies in `window`.
    pub fn contains(&self, window: FitWindow, threshold: f64, rate: f64) -> bool {
        match window {
            FitWindow::Shower => rate < self.shower_rate_max && threshold < self.max_threshold,
            FitWindow::Nsb => rate < self.nsb_rate_max && rate > self.nsb_rate_min,
            FitWindow::Full => rate < self.nsb_rate_max && threshold < self.max_threshold,
        }
    }

    /// Rows of `curve` inside `window`.
    pub fn window_rows(&self, curve: &RateCurve, window: FitWindow) -> Vec<RateRow> {
        curve
            .rows()
            .iter()
            .filter(|r| self.contains(window, r.threshold, r.rate))
            .copied()
            .collect()
    }

    /// Cut `curve` into its three windows.
    ///
    /// Return
    /// ----------
    /// * The rows of each window, or [`RatescanError::EmptyWindow`] naming the first window
    ///   (shower, nsb, full) without any row.
    pub fn select(&self, curve: &RateCurve) -> Result<FitWindows, RatescanError> {
        let rows = |window| {
            let rows = self.window_rows(curve, window);
            if rows.is_empty() {
                Err(RatescanError::EmptyWindow(window))
            } else {
                log::debug!("{window} window of {}: {} rows", curve.key(), rows.len());
                Ok(rows)
            }
        };
        Ok(FitWindows {
            shower: rows(FitWindow::Shower)?,
            nsb: rows(FitWindow::Nsb)?,
            full: rows(FitWindow::Full)?,
        })
    }

    /// Flattened `ranges_*` named values.
    pub fn to_named_values(&self) -> Vec<(String, f64)> {
        vec![
            ("ranges_max_rate".into(), self.max_rate),
            ("ranges_max_threshold".into(), self.max_threshold),
            ("ranges_nsb_rate_max".into(), self.nsb_rate_max),
            ("ranges_nsb_rate_min".into(), self.nsb_rate_min),
            ("ranges_shower_rate_max".into(), self.shower_rate_max),
        ]
    }
}

#[cfg(test)]
mod ranges_test {
    use super::*;
    use crate::{aggregation::Normalization, samples::RunKey};
    use proptest::prelude::*;

    fn curve(points: &[(f64, u64)]) -> RateCurve {
        RateCurve::from_points(RunKey::new(1, 1), Normalization::Ontime(1.0), points).unwrap()
    }

    #[test]
    fn test_bounds_from_peak() {
        let ranges = RateRanges::from_max_rate(1000.0, &RatescanParams::default());
        assert_eq!(ranges.nsb_rate_max, 600.0);
        assert_eq!(ranges.nsb_rate_min, 100.0);
        assert_eq!(ranges.shower_rate_max, 50.0);
        assert_eq!(ranges.max_threshold, 5000.0);
    }

    #[test]
    fn test_select_windows() {
        let c = curve(&[
            (0.0, 1000),
            (10.0, 1000),
            (20.0, 500),
            (30.0, 200),
            (40.0, 80),
            (50.0, 40),
            (60.0, 10),
        ]);
        let ranges = RateRanges::from_curve(&c, &RatescanParams::default());
        let windows = ranges.select(&c).unwrap();
        let thr = |w: FitWindow| windows.get(w).iter().map(|r| r.threshold).collect::<Vec<_>>();
        assert_eq!(thr(FitWindow::Shower), vec![50.0, 60.0]);
        assert_eq!(thr(FitWindow::Nsb), vec![20.0, 30.0]);
        assert_eq!(thr(FitWindow::Full), vec![20.0, 30.0, 40.0, 50.0, 60.0]);
    }

    #[test]
    fn test_max_threshold_cuts_shower_and_full() {
        let c = curve(&[(0.0, 1000), (20.0, 500), (50.0, 40), (60.0, 10)]);
        let params = RatescanParams::builder().max_threshold(55.0).build().unwrap();
        let windows = RateRanges::from_curve(&c, &params).select(&c).unwrap();
        assert_eq!(windows.shower.len(), 1);
        assert_eq!(windows.full.len(), 2);
    }

    #[test]
    fn test_all_zero_curve_has_empty_windows() {
        let c = curve(&[(0.0, 0), (10.0, 0), (20.0, 0)]);
        let ranges = RateRanges::from_curve(&c, &RatescanParams::default());
        assert_eq!(ranges.max_rate, 0.0);
        assert_eq!(
            ranges.select(&c),
            Err(RatescanError::EmptyWindow(FitWindow::Shower))
        );
    }

    #[test]
    fn test_named_values() {
        let names: Vec<String> = RateRanges::from_max_rate(10.0, &RatescanParams::default())
            .to_named_values()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names[0], "ranges_max_rate");
        assert_eq!(names.len(), 5);
    }

    proptest! {
        #[test]
        fn bounds_are_consistent_for_any_peak(
            max_rate in 1e-6_f64..1e7,
            nsb_min in 0.01_f64..0.5,
            nsb_gap in 0.01_f64..0.5,
            divisor in 1.0_f64..10.0,
        ) {
            let params = RatescanParams::builder()
                .nsb_rate_min_fraction(nsb_min)
                .nsb_rate_max_fraction(nsb_min + nsb_gap)
                .shower_rate_divisor(divisor)
                .build()
                .unwrap();
            let ranges = RateRanges::from_max_rate(max_rate, &params);
            prop_assert_eq!(ranges.shower_rate_max, ranges.nsb_rate_min / divisor);
            prop_assert!(ranges.shower_rate_max <= ranges.nsb_rate_min);
            prop_assert!(ranges.nsb_rate_min < ranges.nsb_rate_max);
            prop_assert!(ranges.nsb_rate_max <= ranges.max_rate);

            let defaults = RateRanges::from_max_rate(max_rate, &RatescanParams::default());
            prop_assert_eq!(defaults.shower_rate_max, defaults.nsb_rate_min / 2.0);
            prop_assert!(defaults.nsb_rate_min < defaults.nsb_rate_max);
        }

        #[test]
        fn window_rows_respect_their_bounds(
            counts in prop::collection::vec(0_u64..10_000, 1..60),
        ) {
            let points: Vec<(f64, u64)> = counts
                .iter()
                .enumerate()
                .map(|(i, c)| (i as f64 * 7.0, *c))
                .collect();
            let c = curve(&points);
            let ranges = RateRanges::from_curve(&c, &RatescanParams::default());

            for r in ranges.window_rows(&c, FitWindow::Shower) {
                prop_assert!(r.rate < ranges.shower_rate_max);
                prop_assert!(r.threshold < ranges.max_threshold);
            }
            for r in ranges.window_rows(&c, FitWindow::Nsb) {
                prop_assert!(r.rate > ranges.nsb_rate_min && r.rate < ranges.nsb_rate_max);
            }
            let full = ranges.window_rows(&c, FitWindow::Full);
            for r in &full {
                prop_assert!(r.rate < ranges.nsb_rate_max);
            }
            // The nsb window is part of the full window below max_threshold
            for r in ranges.window_rows(&c, FitWindow::Nsb) {
                prop_assert!(full.contains(&r));
            }
        }
    }
}
