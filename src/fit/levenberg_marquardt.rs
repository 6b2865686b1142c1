//! Levenberg–Marquardt least squares for the rate-scan curve models.
//!
//! Minimizes `Σ (y_i − f(x_i; p))²` with analytic Jacobians from
//! [`CurveModel::gradient`](crate::models::CurveModel::gradient).
//!
//! Algorithm
//! -----------------
//! * Normal equations `(JᵀJ + λ·diag(JᵀJ)) δ = Jᵀr`, solved in the column-scaled space
//!   `D = diag(JᵀJ)^½` so that parameters of very different magnitude (`m ≈ 1e10`, `a ≈ −3`)
//!   stay well conditioned.
//! * A trial step is accepted when it lowers the cost. `λ` then shrinks by
//!   `max(1/3, 1 − (2ρ − 1)³)` where `ρ` is the ratio of actual to predicted reduction;
//!   after a rejected step it grows by a factor that doubles with every consecutive rejection.
//! * Stopping (MINPACK-like): relative cost reduction still offered by the linearized model
//!   `≤ ftol`, relative step `≤ xtol`, or maximal gradient cosine `≤ gtol`. The number of
//!   model evaluations is bounded by `max_evaluations` (default `200·(p+1)`).
//!
//! The covariance follows `curve_fit(absolute_sigma=False)`:
//! `cov = (JᵀJ)⁻¹ · SSR / (n − p)`, filled with `+∞` when `n == p`.
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::{models::CurveModel, ratescan_errors::RatescanError};

/// Reason why a least-squares fit failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LmFailure {
    #[error("{points} points for {params} parameters")]
    TooFewPoints { points: usize, params: usize },

    #[error("non-finite model value or derivative at the initial guess")]
    NonFiniteModel,

    #[error("singular normal matrix, covariance undefined")]
    SingularNormalMatrix,

    #[error("no convergence after {0} model evaluations")]
    MaxEvaluations(usize),
}

/// Stopping criteria of the Levenberg–Marquardt loop.
///
/// Defaults mirror MINPACK `lmdif` as driven by `scipy.optimize.curve_fit`:
/// `ftol = xtol = 1.49012e-8`, `gtol = 0`, `200·(p+1)` evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct LmSettings {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// `None` means `200·(p+1)`.
    pub max_evaluations: Option<usize>,
    pub initial_lambda: f64,
}

impl Default for LmSettings {
    fn default() -> Self {
        LmSettings {
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            gtol: 0.0,
            max_evaluations: None,
            initial_lambda: 1e-3,
        }
    }
}

impl LmSettings {
    pub(crate) fn validate(&self) -> Result<(), RatescanError> {
        let ok = |x: f64| x.is_finite() && x >= 0.0;
        if !(ok(self.ftol) && ok(self.xtol) && ok(self.gtol)) {
            return Err(RatescanError::InvalidRatescanParameter(
                "lm tolerances must be non-negative".into(),
            ));
        }
        if self.ftol == 0.0 && self.xtol == 0.0 && self.gtol == 0.0 {
            return Err(RatescanError::InvalidRatescanParameter(
                "at least one lm tolerance must be > 0".into(),
            ));
        }
        if !(self.initial_lambda.is_finite() && self.initial_lambda > 0.0) {
            return Err(RatescanError::InvalidRatescanParameter(
                "lm initial_lambda must be > 0".into(),
            ));
        }
        if self.max_evaluations == Some(0) {
            return Err(RatescanError::InvalidRatescanParameter(
                "lm max_evaluations must be >= 1".into(),
            ));
        }
        Ok(())
    }

    fn evaluation_budget(&self, n_params: usize) -> usize {
        self.max_evaluations.unwrap_or(200 * (n_params + 1))
    }
}

/// Converged least-squares solution.
#[derive(Debug, Clone)]
pub struct LmSolution {
    pub params: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Residual sum of squares at the optimum.
    pub ssr: f64,
    pub iterations: usize,
    pub evaluations: usize,
}

const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

fn residuals(model: CurveModel, x: &[f64], y: &[f64], p: &[f64]) -> Option<DVector<f64>> {
    let r = DVector::from_iterator(
        x.len(),
        x.iter().zip(y).map(|(&xi, &yi)| yi - model.eval(xi, p)),
    );
    r.iter().all(|v| v.is_finite()).then_some(r)
}

fn jacobian(model: CurveModel, x: &[f64], p: &[f64]) -> Option<DMatrix<f64>> {
    let n_par = model.n_params();
    let mut jac = DMatrix::zeros(x.len(), n_par);
    for (i, &xi) in x.iter().enumerate() {
        let grad = model.gradient(xi, p);
        for (j, g) in grad[..n_par].iter().enumerate() {
            jac[(i, j)] = *g;
        }
    }
    jac.iter().all(|v| v.is_finite()).then_some(jac)
}

/// Column scaling `D = diag(JᵀJ)^½`; `None` if a parameter has no influence on the model.
fn column_scale(jtj: &DMatrix<f64>) -> Option<DVector<f64>> {
    let d = DVector::from_iterator(jtj.nrows(), jtj.diagonal().iter().map(|v| v.sqrt()));
    d.iter().all(|v| v.is_finite() && *v > 0.0).then_some(d)
}

/// Inverse of `JᵀJ` computed in the scaled space.
///
/// `None` when the scaled matrix is rank deficient up to rounding
/// (eigenvalue ratio below `p · ε`).
fn scaled_inverse(jtj: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let d = column_scale(jtj)?;
    let scaled = DMatrix::from_fn(jtj.nrows(), jtj.ncols(), |i, j| jtj[(i, j)] / (d[i] * d[j]));

    let eigenvalues = scaled.clone().symmetric_eigen().eigenvalues;
    let max_eig = eigenvalues.max();
    let min_eig = eigenvalues.min();
    if !(max_eig > 0.0) || min_eig <= max_eig * jtj.nrows() as f64 * f64::EPSILON {
        return None;
    }

    let inv = scaled.try_inverse()?;
    let inv = DMatrix::from_fn(inv.nrows(), inv.ncols(), |i, j| inv[(i, j)] / (d[i] * d[j]));
    inv.iter().all(|v| v.is_finite()).then_some(inv)
}

/// Fit `model` to the points `(x, y)` starting from `p0`.
///
/// Arguments
/// -----------------
/// * `model`: the curve to fit.
/// * `x`, `y`: abscissae (thresholds) and ordinates (rates), same length.
/// * `p0`: initial guess, `model.n_params()` values.
/// * `settings`: stopping criteria.
///
/// Return
/// ----------
/// * The optimal parameters with their covariance, or the [`LmFailure`] that stopped the fit.
pub fn levenberg_marquardt(
    model: CurveModel,
    x: &[f64],
    y: &[f64],
    p0: &[f64],
    settings: &LmSettings,
) -> Result<LmSolution, LmFailure> {
    let n = x.len();
    let n_par = model.n_params();
    if n < n_par {
        return Err(LmFailure::TooFewPoints {
            points: n,
            params: n_par,
        });
    }

    let budget = settings.evaluation_budget(n_par);
    let mut p = DVector::from_column_slice(&p0[..n_par]);
    let mut r = residuals(model, x, y, p.as_slice()).ok_or(LmFailure::NonFiniteModel)?;
    let mut cost = r.norm_squared();
    let mut evaluations = 1;
    let mut iterations = 0;
    let mut lambda = settings.initial_lambda;
    let mut nu = 2.0;

    'outer: loop {
        if cost == 0.0 {
            break;
        }
        let jac = jacobian(model, x, p.as_slice()).ok_or(LmFailure::NonFiniteModel)?;
        let jtj = jac.tr_mul(&jac);
        let grad = jac.tr_mul(&r);
        let d = column_scale(&jtj).ok_or(LmFailure::SingularNormalMatrix)?;
        iterations += 1;

        if settings.gtol > 0.0 {
            let cosine = grad
                .iter()
                .zip(d.iter())
                .map(|(g, dj)| (g / (dj * cost.sqrt())).abs())
                .fold(0.0, f64::max);
            if cosine <= settings.gtol {
                break;
            }
        }

        // Scaled normal matrix and gradient
        let a_scaled = DMatrix::from_fn(n_par, n_par, |i, j| jtj[(i, j)] / (d[i] * d[j]));
        let g_scaled = DVector::from_fn(n_par, |i, _| grad[i] / d[i]);

        // Largest relative cost reduction the linearized model can still offer
        let predicted = a_scaled
            .clone()
            .cholesky()
            .map(|c| g_scaled.dot(&c.solve(&g_scaled)) / cost)
            .unwrap_or(f64::INFINITY);
        if predicted <= settings.ftol {
            break;
        }

        loop {
            let mut damped = a_scaled.clone();
            for i in 0..n_par {
                damped[(i, i)] += lambda;
            }

            let Some(step_scaled) = damped.cholesky().map(|c| c.solve(&g_scaled)) else {
                lambda *= nu;
                nu *= 2.0;
                if lambda > LAMBDA_MAX {
                    return Err(LmFailure::SingularNormalMatrix);
                }
                continue;
            };
            let step = step_scaled.component_div(&d);
            let small_step = step
                .iter()
                .zip(p.iter())
                .all(|(s, pi)| s.abs() <= settings.xtol * (pi.abs() + settings.xtol));

            // Cost reduction predicted by the damped linear model
            let predicted_reduction = step_scaled.dot(&(&step_scaled * lambda + &g_scaled));

            let trial = &p + &step;
            evaluations += 1;
            let trial_r = residuals(model, x, y, trial.as_slice());

            match trial_r {
                Some(tr) if tr.norm_squared() < cost => {
                    let new_cost = tr.norm_squared();
                    let rho = (cost - new_cost) / predicted_reduction;
                    p = trial;
                    r = tr;
                    cost = new_cost;
                    lambda = (lambda * (1.0 / 3.0_f64).max(1.0 - (2.0 * rho - 1.0).powi(3)))
                        .max(LAMBDA_MIN);
                    nu = 2.0;
                    if small_step {
                        break 'outer;
                    }
                    break;
                }
                _ => {
                    // The trial step did not improve the fit; a negligible step means we sit
                    // on the optimum up to rounding.
                    if small_step {
                        break 'outer;
                    }
                    lambda *= nu;
                    nu *= 2.0;
                    if lambda > LAMBDA_MAX {
                        break 'outer;
                    }
                }
            }

            if evaluations >= budget {
                return Err(LmFailure::MaxEvaluations(evaluations));
            }
        }

        if evaluations >= budget {
            return Err(LmFailure::MaxEvaluations(evaluations));
        }
    }

    let jac = jacobian(model, x, p.as_slice()).ok_or(LmFailure::NonFiniteModel)?;
    let jtj = jac.tr_mul(&jac);
    let inv = scaled_inverse(&jtj).ok_or(LmFailure::SingularNormalMatrix)?;

    let covariance = if n > n_par {
        inv * (cost / (n - n_par) as f64)
    } else {
        DMatrix::from_element(n_par, n_par, f64::INFINITY)
    };

    Ok(LmSolution {
        params: p,
        covariance,
        ssr: cost,
        iterations,
        evaluations,
    })
}
