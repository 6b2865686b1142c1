//! # Rate-scan curve models
//!
//! Closed-form models of the trigger rate as a function of the threshold `t`:
//!
//! ```text
//! power_law(t; m, a, b)                = m·t^a + b
//! power_law_proton(t; m, b)            = power_law(t; m, -2.7, b)
//! nsb_contribution(t; m, t0)           = exp(m·(t − t0))
//! ratescan_func(t; m, a, b, m0, t0)    = nsb_contribution(t; m0, t0) + power_law(t; m, a, b)
//! ```
//!
//! The shower-dominated part of a rate scan falls like a power law, the night-sky-background
//! (NSB) part like an exponential. [`CurveModel`] wraps the four functions together with their
//! parameter gradients, which the Levenberg–Marquardt fitter uses as Jacobian rows.
use std::fmt;

use crate::constants::{MAX_MODEL_PARAMS, PROTON_SPECTRAL_INDEX};

/// Model for the shower dominated part of a ratescan.
#[inline]
pub fn power_law(t: f64, m: f64, a: f64, b: f64) -> f64 {
    m * t.powf(a) + b
}

/// Shower model with the spectral index fixed to the proton value of -2.7.
#[inline]
pub fn power_law_proton(t: f64, m: f64, b: f64) -> f64 {
    power_law(t, m, PROTON_SPECTRAL_INDEX, b)
}

/// Model for the NSB dominated part of a ratescan.
#[inline]
pub fn nsb_contribution(t: f64, m: f64, t_0: f64) -> f64 {
    (m * (t - t_0)).exp()
}

/// Model for both regions of a ratescan without the saturated part.
#[inline]
pub fn ratescan_func(t: f64, m: f64, a: f64, b: f64, m_0: f64, t_0: f64) -> f64 {
    nsb_contribution(t, m_0, t_0) + power_law(t, m, a, b)
}

/// Derivative of [`power_law`] with respect to the threshold.
#[inline]
pub fn power_law_dt(t: f64, m: f64, a: f64) -> f64 {
    m * a * t.powf(a - 1.0)
}

/// Derivative of [`nsb_contribution`] with respect to the threshold.
#[inline]
pub fn nsb_contribution_dt(t: f64, m: f64, t_0: f64) -> f64 {
    m * nsb_contribution(t, m, t_0)
}

/// One of the fit targets of a rate scan.
///
/// Parameter order
/// -----------------
/// * `Shower` – `(m, a, b)`
/// * `ShowerProton` – `(m, b)`
/// * `Nsb` – `(m, t_0)`
/// * `Full` – `(m, a, b, m_0, t_0)`, shower parameters first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurveModel {
    Shower,
    ShowerProton,
    Nsb,
    Full,
}

impl CurveModel {
    /// Number of free parameters of the model.
    pub fn n_params(&self) -> usize {
        match self {
            CurveModel::Shower => 3,
            CurveModel::ShowerProton => 2,
            CurveModel::Nsb => 2,
            CurveModel::Full => 5,
        }
    }

    /// Evaluate the model at threshold `t`.
    ///
    /// `p` must hold at least [`n_params`](CurveModel::n_params) values.
    pub fn eval(&self, t: f64, p: &[f64]) -> f64 {
        match self {
            CurveModel::Shower => power_law(t, p[0], p[1], p[2]),
            CurveModel::ShowerProton => power_law_proton(t, p[0], p[1]),
            CurveModel::Nsb => nsb_contribution(t, p[0], p[1]),
            CurveModel::Full => ratescan_func(t, p[0], p[1], p[2], p[3], p[4]),
        }
    }

    /// Partial derivatives of the model with respect to its parameters at threshold `t`.
    ///
    /// Only the first [`n_params`](CurveModel::n_params) entries are meaningful, the rest are zero.
    pub fn gradient(&self, t: f64, p: &[f64]) -> [f64; MAX_MODEL_PARAMS] {
        let mut grad = [0.0; MAX_MODEL_PARAMS];
        match self {
            CurveModel::Shower => power_law_gradient(t, p[0], p[1], &mut grad[..3]),
            CurveModel::ShowerProton => {
                let t_a = t.powf(PROTON_SPECTRAL_INDEX);
                grad[0] = t_a;
                grad[1] = 1.0;
            }
            CurveModel::Nsb => nsb_gradient(t, p[0], p[1], &mut grad[..2]),
            CurveModel::Full => {
                power_law_gradient(t, p[0], p[1], &mut grad[..3]);
                nsb_gradient(t, p[3], p[4], &mut grad[3..5]);
            }
        }
        grad
    }
}

fn power_law_gradient(t: f64, m: f64, a: f64, out: &mut [f64]) {
    let t_a = t.powf(a);
    out[0] = t_a;
    out[1] = m * t_a * t.ln();
    out[2] = 1.0;
}

fn nsb_gradient(t: f64, m: f64, t_0: f64, out: &mut [f64]) {
    let e = nsb_contribution(t, m, t_0);
    out[0] = e * (t - t_0);
    out[1] = -m * e;
}

impl fmt::Display for CurveModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CurveModel::Shower => "powerLaw",
            CurveModel::ShowerProton => "powerLawProton",
            CurveModel::Nsb => "nsbContribution",
            CurveModel::Full => "ratescan_func",
        };
        f.write_str(name)
    }
}
