use nalgebra::DMatrix;

use crate::{models::CurveModel, ranges::FitWindow};

/// Optimum of one window fit.
///
/// `params` follows the parameter order of `model`; `covariance` is `p × p` and may be filled
/// with `+∞` when the window held exactly as many points as parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub window: FitWindow,
    pub model: CurveModel,
    pub params: Vec<f64>,
    pub covariance: DMatrix<f64>,
    /// Number of curve rows in the window.
    pub n_points: usize,
    /// Residual sum of squares at the optimum.
    pub ssr: f64,
    pub iterations: usize,
}

impl FitResult {
    /// Value of the fitted model at threshold `t`.
    pub fn eval(&self, t: f64) -> f64 {
        self.model.eval(t, &self.params)
    }

    /// One-sigma uncertainties, `sqrt(diag(cov))`.
    pub fn std_errors(&self) -> Vec<f64> {
        self.covariance.diagonal().iter().map(|v| v.sqrt()).collect()
    }

    /// Shower parameters `(m, a, b)` carried by this fit, if any.
    pub fn shower_params(&self) -> Option<[f64; 3]> {
        match self.model {
            CurveModel::Shower | CurveModel::Full => {
                Some([self.params[0], self.params[1], self.params[2]])
            }
            CurveModel::ShowerProton | CurveModel::Nsb => None,
        }
    }

    /// NSB parameters `(m, t_0)` carried by this fit, if any.
    pub fn nsb_params(&self) -> Option<[f64; 2]> {
        match self.model {
            CurveModel::Nsb => Some([self.params[0], self.params[1]]),
            CurveModel::Full => Some([self.params[3], self.params[4]]),
            CurveModel::Shower | CurveModel::ShowerProton => None,
        }
    }

    /// Flattened `{window}_par_{i}` and `{window}_cov_{i}_{j}` named values.
    pub fn to_named_values(&self) -> Vec<(String, f64)> {
        let prefix = self.window.prefix();
        let pars = self
            .params
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{prefix}_par_{i}"), *v));
        let cov = (0..self.covariance.nrows()).flat_map(move |i| {
            (0..self.covariance.ncols())
                .map(move |j| (format!("{prefix}_cov_{i}_{j}"), self.covariance[(i, j)]))
        });
        pars.chain(cov).collect()
    }
}
