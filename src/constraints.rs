//! Algebraic constraints applied to a fitted state after combination.
//!
//! Both operations are final corrections on the (parameters, covariance)
//! pair of an already constructed parent:
//!
//! * [`apply_mass_constraint`] projects the four-vector onto the surface
//!   `E² − p² = m²`,
//! * [`apply_no_decay_length`] removes the decay-length degree of freedom,
//!   for resonances whose flight distance is indistinguishable from zero
//!   within detector resolution.
//!
//! Each applied constraint removes one degree of freedom from the fit.

use crate::constants::{Gev, MIN_CONSTRAINT_VARIANCE};
use crate::field::FieldModel;
use crate::state::ParticleState;

/// Constrain the invariant mass of `state` to `mass`.
///
/// The constraint enters as a linearized pseudo-measurement of `E² − p²`
/// with target `m²`: one Newton step of the exact projection when
/// `sigma_mass = 0`, a soft constraint with variance `(m·σ)²` otherwise.
/// The correction is distributed over all parameters through the covariance,
/// so position and momentum shift consistently.
///
/// A state already satisfying `E² − p² = m²` is a fixpoint: its parameters
/// are left untouched (the covariance still shrinks along the constraint
/// direction). `ndf` decreases by 1. When the predicted constraint variance
/// is numerically zero the constraint cannot be applied and the state is
/// left unchanged.
pub fn apply_mass_constraint(state: &mut ParticleState, mass: Gev, sigma_mass: Gev) {
    let m2 = mass * mass;
    let s2 = m2 * sigma_mass * sigma_mass;

    let p = &state.p;
    let p2 = p[3] * p[3] + p[4] * p[4] + p[5] * p[5];

    // Jacobian of E^2 - p^2 and the residual against the target
    let h = [
        0.0,
        0.0,
        0.0,
        -2.0 * p[3],
        -2.0 * p[4],
        -2.0 * p[5],
        2.0 * p[6],
        0.0,
    ];
    let zeta = m2 - (p[6] * p[6] - p2);

    let mut cht = [0.0; 8];
    let mut s2_est = 0.0;
    for i in 0..8 {
        let mut s = 0.0;
        for (j, hj) in h.iter().enumerate() {
            s += state.cov.at(i, j) * hj;
        }
        cht[i] = s;
        s2_est += h[i] * s;
    }

    // the fitted mass error is already zero, nothing to constrain against
    if s2_est < MIN_CONSTRAINT_VARIANCE {
        return;
    }

    let w = 1.0 / (s2 + s2_est);
    state.chi2 += zeta * zeta * w;
    state.ndf -= 1;
    for i in 0..8 {
        let ki = cht[i] * w;
        state.p[i] += ki * zeta;
        for j in 0..=i {
            *state.cov.at_mut(i, j) -= ki * cht[j];
        }
    }
}

/// Fix the decay length of `state` at zero.
///
/// The state is first brought back to its decay vertex, then `S` is filtered
/// to zero with its own variance as the innovation covariance and the `S`
/// row of the covariance is cleared. `ndf` decreases by 1 when the update is
/// applied; a state whose `S` variance is already numerically zero only gets
/// the row cleared.
pub fn apply_no_decay_length(state: &mut ParticleState, field: &FieldModel) {
    state.transport_to_decay_vertex(field);

    let s_var = state.cov.at(7, 7);
    if s_var > MIN_CONSTRAINT_VARIANCE {
        let w = 1.0 / s_var;
        let zeta = -state.p[7];
        state.chi2 += zeta * zeta * w;
        state.ndf -= 1;
        for i in 0..7 {
            let ki = state.cov.at(7, i) * w;
            state.p[i] += ki * zeta;
            for j in 0..=i {
                let c7j = state.cov.at(7, j);
                *state.cov.at_mut(i, j) -= ki * c7j;
            }
        }
    }

    state.p[7] = 0.0;
    for i in 0..8 {
        *state.cov.at_mut(7, i) = 0.0;
    }
}
