//! # Model fitting
//!
//! Least-squares fits of the [`CurveModel`]s to the windows of a rate curve.
//!
//! ## Overview
//! -----------------
//! * [`levenberg_marquardt`] – the generic solver (analytic Jacobian, scaled damping,
//!   covariance estimate).
//! * [`fit_given_range`] – fit one model to the rows of one window.
//! * [`fit_ratescan`] – the three chained fits of a rate scan:
//!   1. shower window with the power law, seeded by [`RatescanParams::shower_seed`],
//!   2. nsb window with the NSB exponential, seeded by [`RatescanParams::nsb_seed`],
//!   3. full window with the combined model, seeded by the two previous optima.
//!
//! A failed fit is reported as [`RatescanError::FitConvergence`] naming the window; it is never
//! replaced by the seed or a placeholder.
pub mod fit_result;
pub mod levenberg_marquardt;

use crate::{
    aggregation::RateRow,
    models::CurveModel,
    params::RatescanParams,
    ranges::{FitWindow, FitWindows},
    ratescan_errors::RatescanError,
};

use self::{
    fit_result::FitResult,
    levenberg_marquardt::{levenberg_marquardt, LmSettings},
};

/// Fit `model` to the `(threshold, rate)` points of `rows`.
///
/// Arguments
/// -----------------
/// * `window` – the window the rows come from, reported in errors and results.
/// * `rows` – the points to fit.
/// * `model` – the curve model.
/// * `p0` – initial guess, `model.n_params()` values.
/// * `settings` – Levenberg–Marquardt stopping criteria.
///
/// Return
/// ----------
/// * The [`FitResult`], [`RatescanError::EmptyWindow`] for no rows, or
///   [`RatescanError::FitConvergence`] carrying the solver failure.
pub fn fit_given_range(
    window: FitWindow,
    rows: &[RateRow],
    model: CurveModel,
    p0: &[f64],
    settings: &LmSettings,
) -> Result<FitResult, RatescanError> {
    if rows.is_empty() {
        return Err(RatescanError::EmptyWindow(window));
    }
    let (x, y): (Vec<f64>, Vec<f64>) = rows.iter().map(|r| (r.threshold, r.rate)).unzip();

    let solution = levenberg_marquardt(model, &x, &y, p0, settings)
        .map_err(|reason| RatescanError::FitConvergence { window, reason })?;

    log::debug!(
        "{window} fit ({model}) on {} points: {} iterations, ssr = {:.4e}",
        rows.len(),
        solution.iterations,
        solution.ssr
    );

    Ok(FitResult {
        window,
        model,
        params: solution.params.iter().copied().collect(),
        covariance: solution.covariance,
        n_points: rows.len(),
        ssr: solution.ssr,
        iterations: solution.iterations,
    })
}

/// The three chained fits of a rate scan.
#[derive(Debug, Clone, PartialEq)]
pub struct RatescanFits {
    pub shower: FitResult,
    pub nsb: FitResult,
    pub full: FitResult,
}

/// Run the shower, nsb and full fits on the windows of a rate scan.
///
/// The full fit starts from the shower optimum followed by the nsb optimum.
pub fn fit_ratescan(
    windows: &FitWindows,
    params: &RatescanParams,
) -> Result<RatescanFits, RatescanError> {
    let shower = fit_given_range(
        FitWindow::Shower,
        &windows.shower,
        CurveModel::Shower,
        &params.shower_seed,
        &params.lm,
    )?;
    let nsb = fit_given_range(
        FitWindow::Nsb,
        &windows.nsb,
        CurveModel::Nsb,
        &params.nsb_seed,
        &params.lm,
    )?;

    let full_seed: Vec<f64> = shower.params.iter().chain(&nsb.params).copied().collect();
    let full = fit_given_range(
        FitWindow::Full,
        &windows.full,
        CurveModel::Full,
        &full_seed,
        &params.lm,
    )?;

    Ok(RatescanFits { shower, nsb, full })
}

#[cfg(test)]
mod fit_test {
    use super::*;
    use crate::{fit::levenberg_marquardt::LmFailure, models::power_law_proton};
    use approx::assert_relative_eq;

    fn rows(points: impl Iterator<Item = (f64, f64)>) -> Vec<RateRow> {
        points
            .map(|(threshold, rate)| RateRow {
                threshold,
                count: 0,
                n_samples: 1,
                rate,
            })
            .collect()
    }

    #[test]
    fn test_fit_proton_power_law() {
        let data = rows((1..30).map(|i| {
            let t = 100.0 + 10.0 * i as f64;
            (t, power_law_proton(t, 2.0e7, 1.5))
        }));
        let fit = fit_given_range(
            FitWindow::Shower,
            &data,
            CurveModel::ShowerProton,
            &[1.0e7, 0.0],
            &LmSettings::default(),
        )
        .unwrap();
        assert_relative_eq!(fit.params[0], 2.0e7, max_relative = 1e-6);
        assert_relative_eq!(fit.params[1], 1.5, epsilon = 1e-6);
        assert_eq!(fit.n_points, 29);
        assert_eq!(fit.covariance.shape(), (2, 2));
    }

    #[test]
    fn test_empty_rows() {
        let err = fit_given_range(
            FitWindow::Nsb,
            &[],
            CurveModel::Nsb,
            &[-0.02, 700.0],
            &LmSettings::default(),
        )
        .unwrap_err();
        assert_eq!(err, RatescanError::EmptyWindow(FitWindow::Nsb));
    }

    #[test]
    fn test_failure_names_window() {
        let data = rows([(500.0, 10.0)].into_iter());
        let err = fit_given_range(
            FitWindow::Full,
            &data,
            CurveModel::Full,
            &[5.5e9, -3.0, 0.0, -0.02, 700.0],
            &LmSettings::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RatescanError::FitConvergence {
                window: FitWindow::Full,
                reason: LmFailure::TooFewPoints {
                    points: 1,
                    params: 5
                }
            }
        );
    }
}
