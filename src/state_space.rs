//! Reachable state enumeration for the finite-horizon choice problem.
//!
//! The state space is built once per model specification by forward
//! enumeration from the admissible initial conditions: every feasible choice
//! in every period-`t` state produces a period-`t+1` candidate, candidates
//! are deduplicated structurally, and each period's survivors are indexed in
//! a stable lexicographic order. The result is a flat arena with a
//! period-offset table; the hot paths (backward induction, simulation,
//! likelihood evaluation) only ever touch dense indices, never attribute
//! tuples.

use crate::types::ModelSpec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateSpaceError {
    #[error("no admissible initial condition: the period-0 state set is empty")]
    InfeasibleInitialCondition,
    #[error(
        "state space overflow in period {period}: {count} states exceed the configured cap of {cap}"
    )]
    Overflow {
        period: usize,
        count: usize,
        cap: usize,
    },
}

/// A single point of the state space. Immutable once built; everything
/// downstream refers to it by its dense index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    pub period: usize,
    pub experience: Vec<u32>,
    pub lagged_choice: usize,
    pub latent_type: usize,
}

impl State {
    fn sort_key(&self) -> (Vec<u32>, usize, usize) {
        (self.experience.clone(), self.lagged_choice, self.latent_type)
    }
}

/// An admissible starting point (period 0) before the latent type is
/// attached; the builder replicates each one across all types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InitialCondition {
    pub experience: Vec<u32>,
    pub lagged_choice: usize,
}

/// Caller-supplied pruning predicates layered on top of the built-in
/// experience caps. `state` drops whole states ("no fishing experience
/// without fishing last period"), `choice` vetoes individual choices.
#[derive(Default)]
pub struct FeasibilityRules<'a> {
    pub state: Option<&'a (dyn Fn(&State) -> bool + Sync)>,
    pub choice: Option<&'a (dyn Fn(&State, usize) -> bool + Sync)>,
}

/// The full reachable set, stored as a flat arena ordered by period.
#[derive(Debug)]
pub struct StateSpace {
    states: Vec<State>,
    period_offsets: Vec<usize>,
    index: HashMap<State, usize>,
    /// Row-major `(n_states, n_choices)` choice-feasibility mask.
    feasible: Vec<bool>,
    n_choices: usize,
}

impl StateSpace {
    /// Forward-enumerate all reachable states. Deterministic: identical
    /// inputs yield identical index assignments.
    pub fn build(
        model: &ModelSpec,
        initial_conditions: &[InitialCondition],
        rules: &FeasibilityRules<'_>,
    ) -> Result<StateSpace, StateSpaceError> {
        let mut space = StateSpace {
            states: Vec::new(),
            period_offsets: Vec::with_capacity(model.n_periods + 1),
            index: HashMap::new(),
            feasible: Vec::new(),
            n_choices: model.n_choices,
        };

        let mut frontier: Vec<State> = {
            let mut seen = HashSet::new();
            let mut initial = Vec::new();
            for cond in initial_conditions {
                for latent_type in 0..model.n_types {
                    let state = State {
                        period: 0,
                        experience: cond.experience.clone(),
                        lagged_choice: cond.lagged_choice,
                        latent_type,
                    };
                    if state_admissible(&state, rules) && seen.insert(state.clone()) {
                        initial.push(state);
                    }
                }
            }
            initial
        };
        if frontier.is_empty() {
            return Err(StateSpaceError::InfeasibleInitialCondition);
        }

        for period in 0..model.n_periods {
            frontier.sort_by_key(State::sort_key);
            if frontier.len() > model.state_space_cap {
                return Err(StateSpaceError::Overflow {
                    period,
                    count: frontier.len(),
                    cap: model.state_space_cap,
                });
            }
            space.period_offsets.push(space.states.len());

            let mut next: HashSet<State> = HashSet::new();
            for state in &frontier {
                let base = space.states.len();
                space.index.insert(state.clone(), base);
                for choice in 0..model.n_choices {
                    let ok = choice_feasible(state, choice, model, rules);
                    space.feasible.push(ok);
                    if ok && period + 1 < model.n_periods {
                        let successor = transition(state, choice, model);
                        if state_admissible(&successor, rules) {
                            next.insert(successor);
                        }
                    }
                }
                space.states.push(state.clone());
            }
            frontier = next.into_iter().collect();
        }
        space.period_offsets.push(space.states.len());

        log::debug!(
            "[state space] built {} states over {} periods",
            space.states.len(),
            model.n_periods
        );
        Ok(space)
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, index: usize) -> &State {
        &self.states[index]
    }

    /// Dense index range covering one period.
    pub fn period_range(&self, period: usize) -> std::ops::Range<usize> {
        self.period_offsets[period]..self.period_offsets[period + 1]
    }

    pub fn period_states(&self, period: usize) -> &[State] {
        &self.states[self.period_range(period)]
    }

    /// O(1) attribute-tuple lookup, used by backward induction to chase
    /// successors and by the likelihood to locate observed states.
    pub fn index_of(&self, state: &State) -> Option<usize> {
        self.index.get(state).copied()
    }

    pub fn is_feasible(&self, state_index: usize, choice: usize) -> bool {
        self.feasible[state_index * self.n_choices + choice]
    }

    /// Dense index of the successor of (`state_index`, `choice`), or `None`
    /// in the terminal period.
    pub fn successor(
        &self,
        state_index: usize,
        choice: usize,
        model: &ModelSpec,
    ) -> Option<usize> {
        let state = &self.states[state_index];
        if model.is_terminal_period(state.period) {
            return None;
        }
        self.index_of(&transition(state, choice, model))
    }
}

/// The deterministic transition rule: bump the chosen alternative's
/// experience counter when it accrues experience, and record the choice as
/// next period's lagged choice. The latent type never changes.
pub fn transition(state: &State, choice: usize, model: &ModelSpec) -> State {
    let mut experience = state.experience.clone();
    if model.experience_accruing[choice] {
        experience[choice] += 1;
    }
    State {
        period: state.period + 1,
        experience,
        lagged_choice: choice,
        latent_type: state.latent_type,
    }
}

fn state_admissible(state: &State, rules: &FeasibilityRules<'_>) -> bool {
    rules.state.map_or(true, |f| f(state))
}

fn choice_feasible(
    state: &State,
    choice: usize,
    model: &ModelSpec,
    rules: &FeasibilityRules<'_>,
) -> bool {
    if let Some(cap) = model.max_experience[choice] {
        if model.experience_accruing[choice] && state.experience[choice] >= cap {
            return false;
        }
    }
    rules.choice.map_or(true, |f| f(state, choice))
}
