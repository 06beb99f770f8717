//! Structural properties of simulated trajectories: closure with respect to
//! the reachable state space, experience bounds, reproducibility, and
//! cooperative cancellation.

use ddcm::{
    AgentInitial, CancelToken, FeasibilityRules, InitialCondition, ModelSpec, Parameters,
    SimulateError, SolveOptions, StateSpace, SystematicRewards, create_draws, simulate, solve,
};
use ndarray::{Array1, Array2, array};

fn model() -> ModelSpec {
    ModelSpec {
        n_periods: 4,
        n_choices: 3,
        n_types: 2,
        experience_accruing: vec![true, true, false],
        wage_alternative: vec![true, true, false],
        max_experience: vec![None, Some(2), None],
        state_space_cap: 100_000,
    }
}

fn params() -> Parameters {
    Parameters {
        discount_factor: 0.95,
        wage_coeffs: vec![
            Some(array![0.8, 0.08, 0.02, 0.0, -0.004, 0.05]),
            Some(array![0.6, 0.02, 0.1, 0.0, -0.003, 0.05]),
            None,
        ],
        nonpec_coeffs: vec![
            Array1::zeros(6),
            Array1::zeros(6),
            array![2.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ],
        type_shifts: array![[0.0, 0.0, 0.0], [0.2, -0.1, 0.3]],
        shock_chol: array![
            [0.3, 0.0, 0.0],
            [0.05, 0.25, 0.0],
            [0.0, 0.0, 0.4]
        ],
        type_coeffs: array![[0.0, 0.0], [0.4, -0.6]],
    }
}

fn setup() -> (ModelSpec, StateSpace, Parameters) {
    let model = model();
    let space = StateSpace::build(
        &model,
        &[
            InitialCondition {
                experience: vec![0, 0, 0],
                lagged_choice: 2,
            },
            InitialCondition {
                experience: vec![1, 0, 0],
                lagged_choice: 0,
            },
        ],
        &FeasibilityRules::default(),
    )
    .unwrap();
    let params = params();
    (model, space, params)
}

fn sample() -> Vec<AgentInitial> {
    vec![
        AgentInitial {
            experience: vec![0, 0, 0],
            lagged_choice: 2,
            type_covariates: array![1.0, 0.5],
        },
        AgentInitial {
            experience: vec![1, 0, 0],
            lagged_choice: 0,
            type_covariates: array![1.0, -1.0],
        },
    ]
}

#[test]
fn trajectories_stay_inside_the_state_space() {
    let (model, space, params) = setup();
    let rewards = SystematicRewards::compute(&space, &model, &params);
    let draws_sol = create_draws(model.n_periods, 200, model.n_choices, 1);
    let table = solve(
        &space,
        &model,
        &params,
        &rewards,
        &draws_sol,
        &SolveOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();

    let n_agents = 60;
    let draws_sim = create_draws(model.n_periods, n_agents, model.n_choices, 2);
    let histories = simulate(
        &space,
        &model,
        &params,
        &rewards,
        &table,
        &sample(),
        &draws_sim,
        3,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(histories.len(), n_agents);
    for history in &histories {
        assert_eq!(history.records.len(), model.n_periods);
        let mut initial_experience: Option<u32> = None;
        for (period, record) in history.records.iter().enumerate() {
            let state = space.state(record.state_index);
            assert_eq!(state.period, period);
            assert_eq!(state.latent_type, history.latent_type);
            assert!(space.is_feasible(record.state_index, record.choice));
            // Experience accrued in-model never exceeds the period index.
            let total: u32 = state.experience.iter().sum();
            let start =
                *initial_experience.get_or_insert_with(|| state.experience.iter().sum());
            assert!(total - start <= period as u32);
            // Wage realized exactly for wage alternatives.
            assert_eq!(record.wage.is_some(), model.wage_alternative[record.choice]);
            if let Some(w) = record.wage {
                assert!(w.is_finite() && w > 0.0);
            }
        }
    }
}

#[test]
fn identical_seeds_reproduce_bit_identical_histories() {
    let (model, space, params) = setup();
    let rewards = SystematicRewards::compute(&space, &model, &params);
    let draws_sol = create_draws(model.n_periods, 100, model.n_choices, 4);
    let table = solve(
        &space,
        &model,
        &params,
        &rewards,
        &draws_sol,
        &SolveOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();

    let draws_sim = create_draws(model.n_periods, 40, model.n_choices, 5);
    let run = || {
        simulate(
            &space,
            &model,
            &params,
            &rewards,
            &table,
            &sample(),
            &draws_sim,
            6,
            &CancelToken::new(),
        )
        .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn cancelled_simulation_publishes_nothing() {
    let (model, space, params) = setup();
    let rewards = SystematicRewards::compute(&space, &model, &params);
    let draws_sol = create_draws(model.n_periods, 50, model.n_choices, 7);
    let table = solve(
        &space,
        &model,
        &params,
        &rewards,
        &draws_sol,
        &SolveOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let draws_sim = create_draws(model.n_periods, 10, model.n_choices, 8);
    let err = simulate(
        &space, &model, &params, &rewards, &table, &sample(), &draws_sim, 9, &cancel,
    )
    .unwrap_err();
    assert!(matches!(err, SimulateError::Cancelled(_)));
}

#[test]
fn dead_end_state_is_a_simulation_error() {
    // One accruing alternative capped at 1: after the forced first-period
    // choice the agent has nothing feasible left, which must surface as an
    // error rather than an out-of-bounds choice.
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
    let draws_sol = create_draws(model.n_periods, 20, model.n_choices, 30);
    let table = solve(
        &space,
        &model,
        &params,
        &rewards,
        &draws_sol,
        &SolveOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(table.iter().all(|v| v.is_finite()));

    let draws_sim = create_draws(model.n_periods, 4, model.n_choices, 31);
    let initial = vec![AgentInitial {
        experience: vec![0],
        lagged_choice: 0,
        type_covariates: array![1.0],
    }];
    let err = simulate(
        &space,
        &model,
        &params,
        &rewards,
        &table,
        &initial,
        &draws_sim,
        32,
        &CancelToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, SimulateError::NoFeasibleChoice { period: 1, .. }));
}

#[test]
fn cancelled_solve_aborts_early() {
    let (model, space, params) = setup();
    let rewards = SystematicRewards::compute(&space, &model, &params);
    let draws = create_draws(model.n_periods, 50, model.n_choices, 10);
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(solve(
        &space,
        &model,
        &params,
        &rewards,
        &draws,
        &SolveOptions::default(),
        &cancel,
    )
    .is_err());
}
