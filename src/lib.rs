#![deny(dead_code)]
#![deny(unused_imports)]

//! Finite-horizon dynamic discrete-choice model engine: state-space
//! construction, backward-induction EMAX solution with an interpolation
//! surrogate, forward simulation, and a smoothed-likelihood criterion with
//! latent-type mixing.

pub mod criterion;
pub mod interpolate;
pub mod linalg;
pub mod optimize;
pub mod rewards;
pub mod shocks;
pub mod simulate;
pub mod solver;
pub mod state_space;
pub mod types;

pub use criterion::{CriterionError, CriterionEvaluator, CriterionOptions, Observation};
pub use optimize::{DEGENERACY_PENALTY, MinimizeResult, Minimizer, PenalizedCriterion, estimate};
pub use rewards::{SystematicRewards, reward_covariates};
pub use shocks::{create_draws, transform_draw, transform_period_draws};
pub use simulate::{AgentHistory, AgentInitial, PeriodRecord, SimulateError, simulate};
pub use solver::{SolveError, ValueFunctionTable, solve};
pub use state_space::{
    FeasibilityRules, InitialCondition, State, StateSpace, StateSpaceError, transition,
};
pub use types::{
    CancelToken, ModelSpec, Parameters, SolveOptions, type_probabilities,
};
