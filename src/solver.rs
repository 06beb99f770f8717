//! Backward-induction solution of the value function.
//!
//! Periods run strictly last → first; within a period every state's EMAX is
//! an independent Monte Carlo integral over the period's shock draws, so the
//! per-state work is parallelized with rayon. When a period holds more
//! states than the interpolation threshold, the exhaustive integration is
//! replaced by the regression surrogate in [`crate::interpolate`].

use crate::interpolate;
use crate::rewards::SystematicRewards;
use crate::shocks::transform_period_draws;
use crate::state_space::StateSpace;
use crate::types::{CancelToken, ModelSpec, Parameters, SolveOptions};
use ndarray::{Array1, Array2, Array3, ArrayView1, s};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("solve cancelled in period {0}")]
    Cancelled(usize),
}

/// EMAX assigned to states where no choice is feasible. Large, negative,
/// and finite: backward induction stays well-defined and any state with a
/// feasible alternative steers away from the dead end.
pub const DEAD_END_EMAX: f64 = -4.0e5;

/// EMAX per (period, state), indexed by the state space's dense index.
/// Write-once per period during backward induction, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueFunctionTable(pub Array1<f64>);

impl Deref for ValueFunctionTable {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Choice-specific values of one state under one shock realization:
/// wage alternatives earn `wage · exp_shock`, the rest `flow + shock`, and
/// every alternative adds the discounted continuation value.
pub(crate) fn choice_values(
    wage_row: ArrayView1<'_, f64>,
    nonpec_row: ArrayView1<'_, f64>,
    cont_row: ArrayView1<'_, f64>,
    shock_row: ArrayView1<'_, f64>,
    wage_alternative: &[bool],
    delta: f64,
) -> Array1<f64> {
    let n = wage_row.len();
    let mut values = Array1::zeros(n);
    for j in 0..n {
        let immediate = if wage_alternative[j] {
            wage_row[j] * shock_row[j] + nonpec_row[j]
        } else {
            nonpec_row[j] + shock_row[j]
        };
        values[j] = immediate + delta * cont_row[j];
    }
    values
}

/// Monte Carlo EMAX of one state: the mean over draws of the feasible
/// maximum of the choice-specific values.
pub(crate) fn exact_emax(
    wage_row: ArrayView1<'_, f64>,
    nonpec_row: ArrayView1<'_, f64>,
    cont_row: ArrayView1<'_, f64>,
    feasible: &[bool],
    shocks: &Array2<f64>,
    wage_alternative: &[bool],
    delta: f64,
) -> f64 {
    if !feasible.iter().any(|&ok| ok) {
        return DEAD_END_EMAX;
    }
    let mut acc = 0.0;
    for shock_row in shocks.rows() {
        let values = choice_values(
            wage_row,
            nonpec_row,
            cont_row,
            shock_row,
            wage_alternative,
            delta,
        );
        let best = values
            .iter()
            .zip(feasible)
            .filter(|(_, &ok)| ok)
            .map(|(v, _)| *v)
            .fold(f64::NEG_INFINITY, f64::max);
        acc += best;
    }
    acc / shocks.nrows() as f64
}

/// Shock vector at its expectation point: 1 for multiplicative components
/// (exp of a zero draw), 0 for additive ones. Anchors the surrogate's
/// choice-value proxy.
pub(crate) fn expected_shocks(model: &ModelSpec) -> Array1<f64> {
    Array1::from_iter(
        model
            .wage_alternative
            .iter()
            .map(|&mult| if mult { 1.0 } else { 0.0 }),
    )
}

/// Continuation values of one period: `(n_period_states, n_choices)` matrix
/// of next-period EMAX entries, zero in the terminal period.
fn continuation_matrix(
    space: &StateSpace,
    model: &ModelSpec,
    emax: &Array1<f64>,
    period: usize,
) -> Array2<f64> {
    let range = space.period_range(period);
    let mut cont = Array2::zeros((range.len(), model.n_choices));
    for (row, i) in range.enumerate() {
        for j in 0..model.n_choices {
            if let Some(next) = space.successor(i, j, model) {
                cont[[row, j]] = emax[next];
            }
        }
    }
    cont
}

/// Solve the model by backward induction. Pure in its inputs: identical
/// arguments produce an identical table.
pub fn solve(
    space: &StateSpace,
    model: &ModelSpec,
    params: &Parameters,
    rewards: &SystematicRewards,
    draws: &Array3<f64>,
    options: &SolveOptions,
    cancel: &CancelToken,
) -> Result<ValueFunctionTable, SolveError> {
    let mut emax = Array1::<f64>::zeros(space.n_states());
    let delta = params.discount_factor;

    for period in (0..model.n_periods).rev() {
        if cancel.is_cancelled() {
            return Err(SolveError::Cancelled(period));
        }
        let shocks = transform_period_draws(
            draws.index_axis(ndarray::Axis(0), period),
            &params.shock_chol,
            &model.wage_alternative,
        );
        let cont = continuation_matrix(space, model, &emax, period);
        let range = space.period_range(period);
        let offset = range.start;
        let n_period_states = range.len();

        let interpolated = options
            .interpolation_points
            .is_some_and(|points| points < n_period_states);

        let values: Vec<f64> = if interpolated {
            interpolate::interpolated_emax(
                space, model, rewards, &cont, &shocks, delta, period, options, cancel,
            )?
        } else {
            range
                .into_par_iter()
                .map(|i| {
                    if cancel.is_cancelled() {
                        return Err(SolveError::Cancelled(period));
                    }
                    let row = i - offset;
                    let feasible: Vec<bool> = (0..model.n_choices)
                        .map(|j| space.is_feasible(i, j))
                        .collect();
                    Ok(exact_emax(
                        rewards.wages.row(i),
                        rewards.nonpec.row(i),
                        cont.row(row),
                        &feasible,
                        &shocks,
                        &model.wage_alternative,
                        delta,
                    ))
                })
                .collect::<Result<_, _>>()?
        };

        emax.slice_mut(s![offset..offset + n_period_states])
            .assign(&Array1::from_vec(values));
        log::debug!(
            "[solver] period {period}: {n_period_states} states, interpolated={interpolated}"
        );
    }

    Ok(ValueFunctionTable(emax))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shocks::create_draws;
    use crate::state_space::{FeasibilityRules, InitialCondition};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn choice_values_split_multiplicative_and_additive() {
        let values = choice_values(
            array![2.0, 1.0].view(),
            array![0.5, 3.0].view(),
            array![10.0, 20.0].view(),
            array![1.5, -0.25].view(),
            &[true, false],
            0.9,
        );
        assert_abs_diff_eq!(values[0], 2.0 * 1.5 + 0.5 + 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 3.0 - 0.25 + 18.0, epsilon = 1e-12);
    }

    #[test]
    fn exact_emax_ignores_infeasible_choices() {
        let shocks = Array2::from_elem((4, 2), 0.0);
        let emax = exact_emax(
            array![1.0, 1.0].view(),
            array![0.0, 100.0].view(),
            array![0.0, 0.0].view(),
            &[true, false],
            &shocks,
            &[false, false],
            0.95,
        );
        // The 100-flow alternative is infeasible and must not leak in.
        assert_abs_diff_eq!(emax, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn dead_end_states_keep_the_table_finite() {
        // A single accruing alternative with a hard cap of 1: after one
        // work period every reachable state has no feasible choice.
        let model = ModelSpec {
            n_periods: 3,
            n_choices: 1,
            n_types: 1,
            experience_accruing: vec![true],
            wage_alternative: vec![false],
            max_experience: vec![Some(1)],
            state_space_cap: 100,
        };
        let space = StateSpace::build(
            &model,
            &[InitialCondition {
                experience: vec![0],
                lagged_choice: 0,
            }],
            &FeasibilityRules::default(),
        )
        .unwrap();
        let params = Parameters {
            discount_factor: 0.9,
            wage_coeffs: vec![None],
            nonpec_coeffs: vec![array![1.0, 0.0, 0.0, 0.0]],
            type_shifts: Array2::zeros((1, 1)),
            shock_chol: Array2::zeros((1, 1)),
            type_coeffs: array![[0.0]],
        };
        let rewards = SystematicRewards::compute(&space, &model, &params);
        let draws = create_draws(model.n_periods, 10, model.n_choices, 0);
        let table = solve(
            &space,
            &model,
            &params,
            &rewards,
            &draws,
            &SolveOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert!(table.iter().all(|v| v.is_finite()));
        for i in 0..space.n_states() {
            if !space.is_feasible(i, 0) {
                assert_abs_diff_eq!(table[i], DEAD_END_EMAX, epsilon = 1e-9);
            }
        }
        // The root still reflects its (forced) path through the dead end.
        let root = space.period_range(0).start;
        assert_abs_diff_eq!(table[root], 1.0 + 0.9 * DEAD_END_EMAX, epsilon = 1e-9);
    }
}
