//! Systematic (non-stochastic) reward components per (state, choice).
//!
//! Computed once per candidate parameter vector, before backward induction,
//! so the per-draw hot loop only combines precomputed pieces with shocks.

use crate::state_space::{State, StateSpace};
use crate::types::{ModelSpec, Parameters};
use ndarray::{Array1, Array2};

/// Covariate vector entering the systematic reward of `choice` in `state`:
/// intercept, every alternative's experience, squared own experience, and a
/// lagged-choice indicator.
pub fn reward_covariates(state: &State, choice: usize, model: &ModelSpec) -> Array1<f64> {
    let mut x = Array1::zeros(model.n_reward_covariates());
    x[0] = 1.0;
    for (j, &e) in state.experience.iter().enumerate() {
        x[1 + j] = e as f64;
    }
    let own = state.experience[choice] as f64;
    x[1 + model.n_choices] = own * own;
    x[2 + model.n_choices] = if state.lagged_choice == choice { 1.0 } else { 0.0 };
    x
}

/// Precomputed systematic rewards for every state in the space.
///
/// `wages` holds the level wage for wage alternatives and 1.0 elsewhere so
/// the multiplicative shock formula stays uniform; `nonpec` holds the
/// additive flow for every alternative. Type shifters enter the log wage for
/// wage alternatives and the non-pecuniary flow for the rest.
pub struct SystematicRewards {
    pub wages: Array2<f64>,
    pub nonpec: Array2<f64>,
}

impl SystematicRewards {
    pub fn compute(space: &StateSpace, model: &ModelSpec, params: &Parameters) -> Self {
        let n = space.n_states();
        let mut wages = Array2::ones((n, model.n_choices));
        let mut nonpec = Array2::zeros((n, model.n_choices));
        for i in 0..n {
            let state = space.state(i);
            for choice in 0..model.n_choices {
                let x = reward_covariates(state, choice, model);
                let shift = params.type_shifts[[state.latent_type, choice]];
                if let Some(beta) = &params.wage_coeffs[choice] {
                    wages[[i, choice]] = (x.dot(beta) + shift).exp();
                    nonpec[[i, choice]] = x.dot(&params.nonpec_coeffs[choice]);
                } else {
                    nonpec[[i, choice]] = x.dot(&params.nonpec_coeffs[choice]) + shift;
                }
            }
        }
        Self { wages, nonpec }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_space::{FeasibilityRules, InitialCondition};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn model() -> ModelSpec {
        ModelSpec {
            n_periods: 2,
            n_choices: 2,
            n_types: 2,
            experience_accruing: vec![true, false],
            wage_alternative: vec![true, false],
            max_experience: vec![None, None],
            state_space_cap: 1000,
        }
    }

    #[test]
    fn covariates_follow_the_convention() {
        let m = model();
        let state = State {
            period: 1,
            experience: vec![3, 0],
            lagged_choice: 0,
            latent_type: 0,
        };
        let x = reward_covariates(&state, 0, &m);
        assert_eq!(x, array![1.0, 3.0, 0.0, 9.0, 1.0]);
        let x = reward_covariates(&state, 1, &m);
        assert_eq!(x, array![1.0, 3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn type_shift_enters_log_wage_for_wage_choices() {
        let m = model();
        let space = StateSpace::build(
            &m,
            &[InitialCondition {
                experience: vec![0, 0],
                lagged_choice: 1,
            }],
            &FeasibilityRules::default(),
        )
        .unwrap();
        let params = Parameters {
            discount_factor: 0.95,
            wage_coeffs: vec![Some(array![1.0, 0.0, 0.0, 0.0, 0.0]), None],
            nonpec_coeffs: vec![Array1::zeros(5), array![0.5, 0.0, 0.0, 0.0, 0.0]],
            type_shifts: array![[0.0, 0.0], [0.25, -1.0]],
            shock_chol: Array2::zeros((2, 2)),
            type_coeffs: array![[1.0], [0.0]],
        };
        let rewards = SystematicRewards::compute(&space, &m, &params);
        for i in 0..space.n_states() {
            let state = space.state(i);
            if state.period != 0 {
                continue;
            }
            match state.latent_type {
                0 => {
                    assert_abs_diff_eq!(rewards.wages[[i, 0]], 1f64.exp(), epsilon = 1e-12);
                    assert_abs_diff_eq!(rewards.nonpec[[i, 1]], 0.5, epsilon = 1e-12);
                }
                _ => {
                    assert_abs_diff_eq!(rewards.wages[[i, 0]], 1.25f64.exp(), epsilon = 1e-12);
                    assert_abs_diff_eq!(rewards.nonpec[[i, 1]], -0.5, epsilon = 1e-12);
                }
            }
            // Non-wage alternatives keep a unit wage placeholder.
            assert_abs_diff_eq!(rewards.wages[[i, 1]], 1.0, epsilon = 1e-15);
        }
    }
}
