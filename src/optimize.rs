//! Seam for the external derivative-free minimizer.
//!
//! The optimizer itself is an injected strategy: this crate exposes the
//! criterion as an always-finite `R^n -> R` objective plus a starting point
//! and an evaluation budget, and consumes whatever the strategy returns.
//! Criterion failures (degenerate parameter points) are converted into a
//! large finite penalty so the optimizer can back away from the bad region
//! instead of aborting the whole estimation.

use crate::criterion::CriterionEvaluator;
use crate::types::{CancelToken, Parameters};
use ndarray::Array1;

/// Penalty returned for parameter points where the criterion is degenerate.
/// Large enough to repel any reasonable trust region, finite so the
/// optimizer's objective invariant holds.
pub const DEGENERACY_PENALTY: f64 = 1e12;

#[derive(Debug, Clone)]
pub struct MinimizeResult {
    pub x: Array1<f64>,
    pub loss: f64,
    pub n_evals: usize,
    pub converged: bool,
}

/// Black-box scalar minimizer (e.g. a derivative-free trust-region method).
/// Implementations live outside this crate.
pub trait Minimizer {
    fn minimize(
        &self,
        objective: &(dyn Fn(&Array1<f64>) -> f64 + Sync),
        start: &Array1<f64>,
        max_evals: usize,
    ) -> MinimizeResult;
}

/// Adapts a [`CriterionEvaluator`] into the objective shape minimizers
/// expect, with degeneracy mapped to [`DEGENERACY_PENALTY`].
pub struct PenalizedCriterion<'a> {
    evaluator: &'a CriterionEvaluator,
    template: Parameters,
    cancel: CancelToken,
    penalty: f64,
}

impl<'a> PenalizedCriterion<'a> {
    pub fn new(evaluator: &'a CriterionEvaluator, template: Parameters, cancel: CancelToken) -> Self {
        Self {
            evaluator,
            template,
            cancel,
            penalty: DEGENERACY_PENALTY,
        }
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    pub fn objective(&self, x: &Array1<f64>) -> f64 {
        let Some(params) = self.template.from_flat(x) else {
            log::warn!(
                "[criterion] parameter vector of length {} does not match the template; penalty",
                x.len()
            );
            return self.penalty;
        };
        match self.evaluator.evaluate(&params, &self.cancel) {
            Ok(loss) if loss.is_finite() => loss,
            Ok(_) => self.penalty,
            Err(err) => {
                log::warn!("[criterion] degenerate point converted to penalty: {err}");
                self.penalty
            }
        }
    }
}

/// Run the full estimation: wrap the evaluator, hand the objective to the
/// injected minimizer, and map the winning point back into parameter form.
pub fn estimate(
    evaluator: &CriterionEvaluator,
    start: &Parameters,
    minimizer: &dyn Minimizer,
    max_evals: usize,
    cancel: CancelToken,
) -> (Parameters, MinimizeResult) {
    let adapter = PenalizedCriterion::new(evaluator, start.clone(), cancel);
    let objective = |x: &Array1<f64>| adapter.objective(x);
    let result = minimizer.minimize(&objective, &start.flatten(), max_evals);
    let best = start.from_flat(&result.x).unwrap_or_else(|| start.clone());
    log::info!(
        "[estimate] finished after {} evaluations, loss {:.6e}, converged={}",
        result.n_evals,
        result.loss,
        result.converged
    );
    (best, result)
}
