//! Reward-shock machinery: seeded standard-normal draw generation and the
//! Cholesky transform that turns raw draws into structural shocks.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Generate the ordered draw block `(n_periods, n_draws, dim)` of i.i.d.
/// standard normals. Immutable once created and shared read-only across
/// solve and simulate passes that use the same seed.
pub fn create_draws(n_periods: usize, n_draws: usize, dim: usize, seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((n_periods, n_draws, dim), |_| rng.sample(StandardNormal))
}

/// Transform one raw draw vector into structural shocks: correlate and scale
/// with the lower-triangular Cholesky factor, then exponentiate the
/// components whose rewards are multiplicative (wages). Pure; safe to call
/// concurrently for disjoint draws.
pub fn transform_draw(
    raw: ArrayView1<'_, f64>,
    cholesky: &Array2<f64>,
    multiplicative: &[bool],
) -> Array1<f64> {
    let mut shock = cholesky.dot(&raw);
    for (s, &mult) in shock.iter_mut().zip(multiplicative) {
        if mult {
            *s = s.exp();
        }
    }
    shock
}

/// Transform a whole period's draw matrix `(n_draws, dim)` at once.
pub fn transform_period_draws(
    raw: ArrayView2<'_, f64>,
    cholesky: &Array2<f64>,
    multiplicative: &[bool],
) -> Array2<f64> {
    let mut shocks = raw.dot(&cholesky.t());
    for mut row in shocks.rows_mut() {
        for (s, &mult) in row.iter_mut().zip(multiplicative) {
            if mult {
                *s = s.exp();
            }
        }
    }
    shocks
}
