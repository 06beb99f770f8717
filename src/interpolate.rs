//! Regression surrogate for periods too large to integrate exhaustively.
//!
//! The expensive object is the Monte Carlo EMAX; the cheap, highly
//! correlated proxy is the vector of choice-specific values evaluated at the
//! shock expectation. A deterministic pseudo-random "exact" subset anchors
//! an OLS fit of `EMAX − v_max` on the proxy's deviations from their mean
//! plus an intercept and a multiplicative interaction; every remaining state
//! gets the fitted prediction, floored at `v_max` (a feasible policy's value
//! bounds the optimum from below) and shifted by the exact-set mean residual
//! so the surrogate stays unbiased on its anchor set.
//!
//! A rank-deficient fit (all exact states sharing identical choice values,
//! or a failed factorization) falls back to the cross-sectional mean of the
//! exact EMAX values. The fallback is silent by design: it is logged, never
//! raised.

use crate::linalg::solve_least_squares;
use crate::rewards::SystematicRewards;
use crate::solver::{DEAD_END_EMAX, SolveError, choice_values, exact_emax, expected_shocks};
use crate::state_space::StateSpace;
use crate::types::{CancelToken, ModelSpec, SolveOptions};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// EMAX for one period via the surrogate. Returns one value per period
/// state, in dense-index order.
#[allow(clippy::too_many_arguments)]
pub(crate) fn interpolated_emax(
    space: &StateSpace,
    model: &ModelSpec,
    rewards: &SystematicRewards,
    cont: &Array2<f64>,
    shocks: &Array2<f64>,
    delta: f64,
    period: usize,
    options: &SolveOptions,
    cancel: &CancelToken,
) -> Result<Vec<f64>, SolveError> {
    let range = space.period_range(period);
    let offset = range.start;
    let n_states = range.len();
    let n_features = model.n_choices + 1;
    // The exact set must at least support the regression, whatever the
    // configured threshold says.
    let n_points = options
        .interpolation_points
        .unwrap_or(n_states)
        .max(n_features)
        .min(n_states);

    // Deterministic pseudo-random exact subset; same seed, same subset.
    let mut rng = StdRng::seed_from_u64(options.interpolation_seed.wrapping_add(period as u64));
    let mut is_exact = vec![false; n_states];
    for idx in rand::seq::index::sample(&mut rng, n_states, n_points).into_vec() {
        is_exact[idx] = true;
    }

    // Proxy: choice values at the shock expectation, per state. Feature
    // columns are an intercept, the deviations of the first J-1 choice
    // values from the per-state mean (the last deviation is their negative
    // sum and would make the design singular), and the product of all
    // deviations as a curvature term.
    let expectation = expected_shocks(model);
    let mut features = Array2::zeros((n_states, n_features));
    let mut v_max = Array1::zeros(n_states);
    for row in 0..n_states {
        let i = offset + row;
        let values = choice_values(
            rewards.wages.row(i),
            rewards.nonpec.row(i),
            cont.row(row),
            expectation.view(),
            &model.wage_alternative,
            delta,
        );
        let feasible: Vec<usize> = (0..model.n_choices)
            .filter(|&j| space.is_feasible(i, j))
            .collect();
        if feasible.is_empty() {
            // Dead-end state: pin it to the same finite penalty the exact
            // integration uses, with a bare-intercept feature row.
            v_max[row] = DEAD_END_EMAX;
            features[[row, 0]] = 1.0;
            continue;
        }
        let mean = feasible.iter().map(|&j| values[j]).sum::<f64>() / feasible.len() as f64;
        v_max[row] = feasible
            .iter()
            .map(|&j| values[j])
            .fold(f64::NEG_INFINITY, f64::max);
        features[[row, 0]] = 1.0;
        let mut interaction = 1.0;
        for &j in &feasible {
            let dev = values[j] - mean;
            if j + 1 < model.n_choices {
                features[[row, 1 + j]] = dev;
            }
            interaction *= dev;
        }
        features[[row, n_features - 1]] = interaction;
    }

    // Exact Monte Carlo EMAX on the anchor set.
    let exact_rows: Vec<usize> = (0..n_states).filter(|&r| is_exact[r]).collect();
    let exact_values: Vec<f64> = exact_rows
        .clone()
        .into_par_iter()
        .map(|row| {
            if cancel.is_cancelled() {
                return Err(SolveError::Cancelled(period));
            }
            let i = offset + row;
            let feasible: Vec<bool> = (0..model.n_choices)
                .map(|j| space.is_feasible(i, j))
                .collect();
            Ok(exact_emax(
                rewards.wages.row(i),
                rewards.nonpec.row(i),
                cont.row(row),
                &feasible,
                shocks,
                &model.wage_alternative,
                delta,
            ))
        })
        .collect::<Result<_, _>>()?;

    let exact_mean = exact_values.iter().sum::<f64>() / exact_values.len() as f64;

    // Fit EMAX − v_max on the exact set.
    let mut x_exact = Array2::zeros((exact_rows.len(), n_features));
    let mut y_exact = Array1::zeros(exact_rows.len());
    for (k, &row) in exact_rows.iter().enumerate() {
        x_exact.row_mut(k).assign(&features.row(row));
        y_exact[k] = exact_values[k] - v_max[row];
    }

    let mut out = vec![0.0; n_states];
    match solve_least_squares(&x_exact, &y_exact) {
        Ok(beta) => {
            // Mean residual on the anchor set keeps the surrogate centered
            // even after flooring predictions at v_max.
            let mut resid_sum = 0.0;
            for (k, &row) in exact_rows.iter().enumerate() {
                let pred = v_max[row] + features.row(row).dot(&beta);
                resid_sum += exact_values[k] - pred.max(v_max[row]);
            }
            let correction = resid_sum / exact_rows.len() as f64;

            for row in 0..n_states {
                out[row] = (v_max[row] + features.row(row).dot(&beta)).max(v_max[row]) + correction;
            }
        }
        Err(err) => {
            log::warn!(
                "[interpolation] period {period}: degenerate regression ({err}); \
                 falling back to the exact-set EMAX mean"
            );
            out.iter_mut().for_each(|v| *v = exact_mean);
        }
    }

    // Exact states always keep their Monte Carlo value.
    for (k, &row) in exact_rows.iter().enumerate() {
        out[row] = exact_values[k];
    }

    Ok(out)
}
