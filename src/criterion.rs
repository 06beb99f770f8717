//! Smoothed likelihood evaluation for estimation.
//!
//! The true choice probability is an indicator integrated over a
//! high-dimensional shock space; evaluated by simulation it is a step
//! function of the parameters and stalls any optimizer. The evaluator
//! therefore smooths the indicator with a logistic kernel of bandwidth
//! `tau`, conditions the chosen alternative's shock on the observed wage
//! where one is recorded, mixes the per-type contributions with the
//! type-probability softmax, and floors each observation's likelihood so a
//! single numerically-zero probability cannot blow up the objective.

use crate::rewards::SystematicRewards;
use crate::shocks::{create_draws, transform_draw};
use crate::solver::{SolveError, ValueFunctionTable, choice_values, solve};
use crate::state_space::{
    FeasibilityRules, InitialCondition, State, StateSpace, StateSpaceError,
};
use crate::types::{CancelToken, ModelSpec, Parameters, SolveOptions, type_probabilities};
use ndarray::{Array1, Array3};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CriterionError {
    #[error(
        "likelihood underflow at agent {agent}, period {period}: degenerate parameters \
         (e.g. a non-positive-definite implied shock covariance)"
    )]
    NumericalDegeneracy { agent: usize, period: usize },
    #[error("observation for agent {agent}, period {period} lies outside the reachable state space")]
    ObservationOutsideStateSpace { agent: usize, period: usize },
    #[error(
        "agent {agent}, period {period}: observed wage attached to non-wage alternative {choice}"
    )]
    WageOnNonWageAlternative {
        agent: usize,
        period: usize,
        choice: usize,
    },
    #[error("criterion evaluation cancelled")]
    Cancelled,
    #[error(transparent)]
    Solve(#[from] SolveError),
}

/// One agent-period record of the observed panel. Wages may be censored
/// (`None`) even for wage alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub agent_id: usize,
    pub period: usize,
    pub experience: Vec<u32>,
    pub lagged_choice: usize,
    pub choice: usize,
    pub wage: Option<f64>,
    pub type_covariates: Array1<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionOptions {
    /// Bandwidth of the logistic choice-probability smoother.
    pub tau: f64,
    /// Floor applied to each observation's likelihood before taking logs.
    pub likelihood_floor: f64,
    /// Monte Carlo replicates for the choice-probability integral.
    pub n_draws_prob: usize,
    pub seed_emax: u64,
    pub seed_prob: u64,
}

impl Default for CriterionOptions {
    fn default() -> Self {
        Self {
            tau: 0.05,
            likelihood_floor: 1e-250,
            n_draws_prob: 200,
            seed_emax: 1,
            seed_prob: 2,
        }
    }
}

struct SolvedModel {
    rewards: SystematicRewards,
    table: ValueFunctionTable,
}

/// The estimation objective: owns the (parameter-invariant) state space and
/// draw sets, and evaluates the smoothed negative log-likelihood of the
/// observed panel at a candidate parameter vector.
pub struct CriterionEvaluator {
    model: ModelSpec,
    space: StateSpace,
    panel: Vec<Observation>,
    solve_options: SolveOptions,
    options: CriterionOptions,
    draws_emax: Array3<f64>,
    draws_prob: Array3<f64>,
    /// One-entry solve memo keyed by the parameter vector's bit pattern, so
    /// repeated optimizer evaluations at the same point skip the solve.
    cache: Mutex<Option<(Vec<u64>, Arc<SolvedModel>)>>,
}

impl CriterionEvaluator {
    pub fn new(
        model: ModelSpec,
        initial_conditions: &[InitialCondition],
        rules: &FeasibilityRules<'_>,
        panel: Vec<Observation>,
        solve_options: SolveOptions,
        options: CriterionOptions,
    ) -> Result<Self, StateSpaceError> {
        let space = StateSpace::build(&model, initial_conditions, rules)?;
        let draws_emax = create_draws(
            model.n_periods,
            solve_options.n_draws,
            model.n_choices,
            options.seed_emax,
        );
        let draws_prob = create_draws(
            model.n_periods,
            options.n_draws_prob,
            model.n_choices,
            options.seed_prob,
        );
        Ok(Self {
            model,
            space,
            panel,
            solve_options,
            options,
            draws_emax,
            draws_prob,
            cache: Mutex::new(None),
        })
    }

    pub fn state_space(&self) -> &StateSpace {
        &self.space
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    /// Negative log-likelihood of the panel at `params`.
    pub fn evaluate(
        &self,
        params: &Parameters,
        cancel: &CancelToken,
    ) -> Result<f64, CriterionError> {
        let solved = self.solved(params, cancel)?;
        let contributions: Vec<f64> = self
            .panel
            .par_iter()
            .map(|obs| {
                if cancel.is_cancelled() {
                    return Err(CriterionError::Cancelled);
                }
                self.observation_neg_loglik(obs, params, &solved)
            })
            .collect::<Result<_, _>>()?;
        let total: f64 = contributions.iter().sum();
        if !total.is_finite() {
            let first = &self.panel[0];
            return Err(CriterionError::NumericalDegeneracy {
                agent: first.agent_id,
                period: first.period,
            });
        }
        Ok(total)
    }

    fn solved(
        &self,
        params: &Parameters,
        cancel: &CancelToken,
    ) -> Result<Arc<SolvedModel>, CriterionError> {
        let key: Vec<u64> = params.flatten().iter().map(|v| v.to_bits()).collect();
        {
            let cache = self.cache.lock().expect("solve cache poisoned");
            if let Some((cached_key, solved)) = cache.as_ref() {
                if *cached_key == key {
                    return Ok(Arc::clone(solved));
                }
            }
        }
        let rewards = SystematicRewards::compute(&self.space, &self.model, params);
        let table = solve(
            &self.space,
            &self.model,
            params,
            &rewards,
            &self.draws_emax,
            &self.solve_options,
            cancel,
        )?;
        let solved = Arc::new(SolvedModel { rewards, table });
        *self.cache.lock().expect("solve cache poisoned") = Some((key, Arc::clone(&solved)));
        Ok(solved)
    }

    /// `-log` of one observation's unconditional (type-mixed) likelihood.
    fn observation_neg_loglik(
        &self,
        obs: &Observation,
        params: &Parameters,
        solved: &SolvedModel,
    ) -> Result<f64, CriterionError> {
        let weights = type_probabilities(&params.type_coeffs, &obs.type_covariates);
        let mut likelihood = 0.0;
        for latent_type in 0..self.model.n_types {
            let contribution = self.type_contribution(obs, params, solved, latent_type)?;
            likelihood += weights[latent_type] * contribution;
        }
        let floored = likelihood.max(self.options.likelihood_floor);
        if !floored.is_finite() || floored <= 0.0 {
            return Err(CriterionError::NumericalDegeneracy {
                agent: obs.agent_id,
                period: obs.period,
            });
        }
        Ok(-floored.ln())
    }

    fn type_contribution(
        &self,
        obs: &Observation,
        params: &Parameters,
        solved: &SolvedModel,
        latent_type: usize,
    ) -> Result<f64, CriterionError> {
        let state = State {
            period: obs.period,
            experience: obs.experience.clone(),
            lagged_choice: obs.lagged_choice,
            latent_type,
        };
        let index = self
            .space
            .index_of(&state)
            .ok_or(CriterionError::ObservationOutsideStateSpace {
                agent: obs.agent_id,
                period: obs.period,
            })?;
        let chosen = obs.choice;
        if !self.space.is_feasible(index, chosen) {
            // The model assigns this choice probability zero; the floor
            // turns it into a finite penalty at aggregation.
            return Ok(0.0);
        }

        // Wage density and the conditioning shock for the chosen choice.
        let mut conditioned_shock = None;
        let mut density = 1.0;
        if let Some(wage) = obs.wage {
            if !self.model.wage_alternative[chosen] {
                return Err(CriterionError::WageOnNonWageAlternative {
                    agent: obs.agent_id,
                    period: obs.period,
                    choice: chosen,
                });
            }
            let sigma = params.shock_std(chosen);
            if !(sigma > 0.0) || wage <= 0.0 {
                return Err(CriterionError::NumericalDegeneracy {
                    agent: obs.agent_id,
                    period: obs.period,
                });
            }
            let residual = wage.ln() - solved.rewards.wages[[index, chosen]].ln();
            density = normal_pdf(residual / sigma) / sigma;
            conditioned_shock = Some(residual.exp());
        }

        let mut cont = Array1::zeros(self.model.n_choices);
        for j in 0..self.model.n_choices {
            if let Some(next) = self.space.successor(index, j, &self.model) {
                cont[j] = solved.table[next];
            }
        }

        // Smoothed choice probability: Monte Carlo mean of the logistic
        // kernel over the probability draws.
        let tau = self.options.tau;
        let period_draws = self.draws_prob.index_axis(ndarray::Axis(0), obs.period);
        let mut prob_acc = 0.0;
        for raw in period_draws.rows() {
            let mut shocks = transform_draw(raw, &params.shock_chol, &self.model.wage_alternative);
            if let Some(s) = conditioned_shock {
                shocks[chosen] = s;
            }
            let values = choice_values(
                solved.rewards.wages.row(index),
                solved.rewards.nonpec.row(index),
                cont.view(),
                shocks.view(),
                &self.model.wage_alternative,
                params.discount_factor,
            );
            let v_max = (0..self.model.n_choices)
                .filter(|&j| self.space.is_feasible(index, j))
                .map(|j| values[j])
                .fold(f64::NEG_INFINITY, f64::max);
            let denom: f64 = (0..self.model.n_choices)
                .filter(|&j| self.space.is_feasible(index, j))
                .map(|j| ((values[j] - v_max) / tau).exp())
                .sum();
            prob_acc += ((values[chosen] - v_max) / tau).exp() / denom;
        }
        let prob = prob_acc / period_draws.nrows() as f64;

        Ok(prob * density)
    }
}

/// Standard normal PDF φ(x).
#[inline]
pub(crate) fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normal_pdf_matches_known_values() {
        assert_abs_diff_eq!(normal_pdf(0.0), 0.398_942_280_401_432_7, epsilon = 1e-15);
        assert_abs_diff_eq!(normal_pdf(1.0), 0.241_970_724_519_143_37, epsilon = 1e-12);
        assert_abs_diff_eq!(normal_pdf(-1.0), normal_pdf(1.0), epsilon = 1e-15);
    }
}
