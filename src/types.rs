use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Structural description of the choice problem: how many periods and
/// alternatives there are, which alternatives accrue experience, and which
/// carry a multiplicative (wage-type) reward shock.
///
/// This struct is parameter-free: everything here determines the reachable
/// state space and the shape of the parameter vector, but none of it changes
/// between candidate parameter vectors during estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub n_periods: usize,
    pub n_choices: usize,
    pub n_types: usize,
    /// Alternatives whose choice increments the agent's experience counter.
    pub experience_accruing: Vec<bool>,
    /// Alternatives whose reward shock enters as `exp(shock)` (wages).
    pub wage_alternative: Vec<bool>,
    /// Optional hard cap on each alternative's experience counter.
    pub max_experience: Vec<Option<u32>>,
    /// Hard cap on the per-period state count; exceeding it aborts the build.
    pub state_space_cap: usize,
}

impl ModelSpec {
    /// Length of the systematic-reward covariate vector for one alternative:
    /// intercept, every alternative's experience, squared own experience,
    /// lagged-choice indicator.
    pub fn n_reward_covariates(&self) -> usize {
        self.n_choices + 3
    }

    pub fn is_terminal_period(&self, period: usize) -> bool {
        period + 1 == self.n_periods
    }
}

/// Candidate parameter vector for one solve/simulate/evaluate pass.
///
/// Owned by the caller and passed by reference; the solver and simulator
/// never mutate it. `type_shifts` row 0 and `type_coeffs` row 0 belong to
/// the normalization type and must stay zero for the mixture to be
/// identified; [`Parameters::flatten`] therefore excludes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    pub discount_factor: f64,
    /// Log-wage coefficients per alternative; `None` for non-wage choices.
    pub wage_coeffs: Vec<Option<Array1<f64>>>,
    /// Non-pecuniary flow coefficients per alternative.
    pub nonpec_coeffs: Vec<Array1<f64>>,
    /// Per-type reward shifters, `(n_types, n_choices)`. Enters the log wage
    /// for wage alternatives and the non-pecuniary flow otherwise.
    pub type_shifts: Array2<f64>,
    /// Lower-triangular Cholesky factor of the shock covariance,
    /// `(n_choices, n_choices)`.
    pub shock_chol: Array2<f64>,
    /// Type-probability coefficients, `(n_types, n_type_covariates)`.
    pub type_coeffs: Array2<f64>,
}

impl Parameters {
    /// Shock standard deviation of one alternative, read off the Cholesky
    /// factor as the Euclidean norm of its row.
    pub fn shock_std(&self, choice: usize) -> f64 {
        self.shock_chol
            .row(choice)
            .iter()
            .map(|c| c * c)
            .sum::<f64>()
            .sqrt()
    }

    /// Flatten the free parameters into a single ordered vector for the
    /// optimizer seam. Order: discount factor, wage coefficients (wage
    /// alternatives in choice order), non-pecuniary coefficients, type
    /// shifts (types 1..), lower-triangular Cholesky entries row by row,
    /// type-probability coefficients (types 1..).
    pub fn flatten(&self) -> Array1<f64> {
        let mut out = vec![self.discount_factor];
        for coeffs in self.wage_coeffs.iter().flatten() {
            out.extend(coeffs.iter());
        }
        for coeffs in &self.nonpec_coeffs {
            out.extend(coeffs.iter());
        }
        for t in 1..self.type_shifts.nrows() {
            out.extend(self.type_shifts.row(t).iter());
        }
        let n = self.shock_chol.nrows();
        for i in 0..n {
            for j in 0..=i {
                out.push(self.shock_chol[[i, j]]);
            }
        }
        for t in 1..self.type_coeffs.nrows() {
            out.extend(self.type_coeffs.row(t).iter());
        }
        Array1::from_vec(out)
    }

    /// Rebuild a parameter struct from a flat vector, using `self` as the
    /// shape template. Returns `None` when the length does not match.
    pub fn from_flat(&self, flat: &Array1<f64>) -> Option<Parameters> {
        let mut params = self.clone();
        let mut it = flat.iter().copied();
        params.discount_factor = it.next()?;
        for coeffs in params.wage_coeffs.iter_mut().flatten() {
            for c in coeffs.iter_mut() {
                *c = it.next()?;
            }
        }
        for coeffs in &mut params.nonpec_coeffs {
            for c in coeffs.iter_mut() {
                *c = it.next()?;
            }
        }
        for t in 1..params.type_shifts.nrows() {
            for j in 0..params.type_shifts.ncols() {
                params.type_shifts[[t, j]] = it.next()?;
            }
        }
        let n = params.shock_chol.nrows();
        for i in 0..n {
            for j in 0..=i {
                params.shock_chol[[i, j]] = it.next()?;
            }
        }
        for t in 1..params.type_coeffs.nrows() {
            for j in 0..params.type_coeffs.ncols() {
                params.type_coeffs[[t, j]] = it.next()?;
            }
        }
        if it.next().is_some() {
            return None;
        }
        Some(params)
    }
}

/// Solver configuration independent of the candidate parameter vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Monte Carlo replicates per (period, state) EMAX integral.
    pub n_draws: usize,
    /// Switch to the regression surrogate when a period holds more states
    /// than this; `None` disables interpolation entirely.
    pub interpolation_points: Option<usize>,
    /// Seed for the deterministic exact-subset selection.
    pub interpolation_seed: u64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            n_draws: 500,
            interpolation_points: None,
            interpolation_seed: 0,
        }
    }
}

/// Cooperative cancellation signal shared across solver, simulator, and
/// criterion workers. Checked between state/agent iterations; a cancelled
/// pass publishes no partial results.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Softmax type-assignment probabilities at one covariate realization.
///
/// Row `t` of `type_coeffs` scores type `t`; row 0 is the normalization
/// type with coefficients pinned at zero. The maximum score is subtracted
/// before exponentiation so the weights stay finite for extreme scores.
pub fn type_probabilities(type_coeffs: &Array2<f64>, covariates: &Array1<f64>) -> Array1<f64> {
    let scores = type_coeffs.dot(covariates);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps = scores.mapv(|s| (s - max).exp());
    let total: f64 = exps.sum();
    exps / total
}
