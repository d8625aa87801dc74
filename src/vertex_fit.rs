//! Sequential Kalman-filter combination of daughters into a parent.
//!
//! [`VertexFit`] is the accumulator of the combination loop: it owns the
//! running parent estimate and is threaded functionally through the daughter
//! additions — every step consumes the accumulator and returns the updated
//! one, so the data dependency is visible in the call chain even though the
//! update is performed in place.
//!
//! The linearization point of the decay vertex is a **required** constructor
//! argument: the vertex solve is iterative/linearized, a poor anchor silently
//! degrades the fit, and there is no universally sensible default. Callers
//! typically seed it with a detector-level estimate (beam spot, found
//! secondary vertex, daughter crossing point).
//!
//! Results are order-dependent in ill-conditioned or near-degenerate daughter
//! configurations, a known property of sequential Kalman combination.

use nalgebra::{Matrix3, Vector3};

use crate::constants::{GAIN_EIGEN_CUTOFF, GAIN_RESIDUAL_TOL, Gev};
use crate::constraints::{apply_mass_constraint, apply_no_decay_length};
use crate::field::FieldModel;
use crate::kinfit_errors::KinfitError;
use crate::state::ParticleState;
use crate::sym_mat::SymMat8;

/// Invariant-mass constraint descriptor: target mass and the width of the
/// soft constraint (`sigma = 0` for an exact constraint), GeV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassConstraint {
    pub mass: Gev,
    pub sigma: Gev,
}

impl MassConstraint {
    /// Exact constraint on `mass`.
    pub fn exact(mass: Gev) -> Self {
        Self { mass, sigma: 0.0 }
    }
}

/// Accumulator of the sequential daughter combination.
///
/// Built with the field model and the decay-vertex linearization point;
/// daughters are filtered in one by one, each contributing a non-negative
/// `chi2` increment and 2 degrees of freedom. Daughters are read-only
/// inputs: they are copied internally before transport, so one reconstructed
/// track can appear in many parent candidates of a combinatorial scan.
#[derive(Debug)]
pub struct VertexFit<'a> {
    field: &'a FieldModel,
    vertex_guess: [f64; 3],
    state: ParticleState,
    n_daughters: usize,
}

impl<'a> VertexFit<'a> {
    /// Start a fit at the given decay-vertex linearization point.
    ///
    /// The parent starts with zero parameters, a loose diagonal position
    /// prior, and the not-yet-constrained counters `ndf = −3`, `chi2 = 0`.
    pub fn new(field: &'a FieldModel, vertex_guess: [f64; 3]) -> Self {
        let mut cov = SymMat8::zeros();
        // weak prior so the first daughter essentially defines the vertex
        *cov.at_mut(0, 0) = 100.0;
        *cov.at_mut(1, 1) = 100.0;
        *cov.at_mut(2, 2) = 100.0;
        *cov.at_mut(7, 7) = 1.0;

        Self {
            field,
            vertex_guess,
            state: ParticleState {
                p: [0.0; 8],
                cov,
                q: 0,
                ndf: -3,
                chi2: 0.0,
                at_production_vertex: false,
                has_production_vertex: false,
                s_from_decay: 0.0,
            },
            n_daughters: 0,
        }
    }

    /// The linearization point this fit was anchored to.
    pub fn vertex_guess(&self) -> [f64; 3] {
        self.vertex_guess
    }

    /// Number of daughters combined so far.
    pub fn n_daughters(&self) -> usize {
        self.n_daughters
    }

    /// Filter one daughter into the running parent.
    ///
    /// The daughter is measured at the vertex guess (transported copy, with
    /// the along-track covariance inflation), its position block updates the
    /// parent through the Kalman gain built on `(Cxx + Vxx)⁻¹`, and its
    /// four-momentum is summed into the parent with the cross-covariance
    /// terms carried through the same gain.
    ///
    /// Return
    /// ----------
    /// * The updated accumulator, with `chi2` grown by the (non-negative)
    ///   innovation quadratic form and `ndf` by 2.
    /// * [`KinfitError::SingularInnovation`] when the summed position
    ///   covariance is degenerate and the innovation has a component along an
    ///   exactly determined coordinate, i.e. the daughters contradict each
    ///   other; the accumulator state is unchanged in that case but consumed,
    ///   so a scan loop can drop the candidate.
    pub fn add_daughter(mut self, daughter: &ParticleState) -> Result<Self, KinfitError> {
        let guess = Vector3::new(self.vertex_guess[0], self.vertex_guess[1], self.vertex_guess[2]);
        let meas = daughter.measurement_at(&guess, self.field);
        let (m, mv) = (&meas.p, &meas.cov);

        let zeta = [
            m[0] - self.state.p[0],
            m[1] - self.state.p[1],
            m[2] - self.state.p[2],
        ];

        let w = invert_position_block(&self.state.cov, mv, &zeta)?;

        // C·Hᵀ; the daughter cross-covariance enters the momentum rows with a
        // minus sign, since the summed momentum carries the daughter's own
        // measurement error
        let c = &self.state.cov;
        let mut cht = [[0.0; 7]; 3];
        for i in 0..3 {
            cht[0][i] = c.at(i, 0);
            cht[1][i] = c.at(i, 1);
            cht[2][i] = c.at(i, 2);
        }
        for i in 3..7 {
            cht[0][i] = c.at(i, 0) - mv.at(i, 0);
            cht[1][i] = c.at(i, 1) - mv.at(i, 1);
            cht[2][i] = c.at(i, 2) - mv.at(i, 2);
        }

        // Kalman gain K = C·Hᵀ·W
        let mut k = [[0.0; 7]; 3];
        for i in 0..7 {
            for col in 0..3 {
                k[col][i] = cht[0][i] * w[(0, col)] + cht[1][i] * w[(1, col)] + cht[2][i] * w[(2, col)];
            }
        }

        let st = &mut self.state;

        // sum the daughter four-momentum and its covariance block
        for i in 3..7 {
            st.p[i] += m[i];
            for j in 3..=i {
                *st.cov.at_mut(i, j) += mv.at(i, j);
            }
        }

        // gain-weighted correction of position and summed momentum
        for i in 0..7 {
            st.p[i] += k[0][i] * zeta[0] + k[1][i] * zeta[1] + k[2][i] * zeta[2];
        }
        for i in 0..7 {
            for j in 0..=i {
                *st.cov.at_mut(i, j) -=
                    k[0][i] * cht[0][j] + k[1][i] * cht[1][j] + k[2][i] * cht[2][j];
            }
        }

        st.chi2 += quadratic_form(&w, &zeta);
        st.ndf += 2;
        st.q += daughter.q;
        st.s_from_decay = 0.0;
        self.n_daughters += 1;
        Ok(self)
    }

    /// Filter a production-vertex measurement into the fitted parent.
    ///
    /// The vertex enters exactly like one more daughter measurement: the
    /// parent is transported to the vertex point and its position block is
    /// updated with the gain built on `(Cxx + Vxx)⁻¹`. On success the parent
    /// carries a decay-length estimate `S` (path from production to decay
    /// over momentum) and represents the state **at the production vertex**.
    pub fn set_production_vertex(mut self, vertex: &ParticleState) -> Result<Self, KinfitError> {
        let target = vertex.position();
        let ds = self.state.ds_to_point(&target, self.field);
        self.state.transport_to_ds(ds, self.field);

        let zeta = [
            vertex.p[0] - self.state.p[0],
            vertex.p[1] - self.state.p[1],
            vertex.p[2] - self.state.p[2],
        ];

        let w = invert_position_block(&self.state.cov, &vertex.cov, &zeta)?;

        let c = &self.state.cov;
        let mut cht = [[0.0; 7]; 3];
        for i in 0..7 {
            cht[0][i] = c.at(i, 0);
            cht[1][i] = c.at(i, 1);
            cht[2][i] = c.at(i, 2);
        }
        let mut k = [[0.0; 7]; 3];
        for i in 0..7 {
            for col in 0..3 {
                k[col][i] = cht[0][i] * w[(0, col)] + cht[1][i] * w[(1, col)] + cht[2][i] * w[(2, col)];
            }
        }

        let st = &mut self.state;
        for i in 0..7 {
            st.p[i] += k[0][i] * zeta[0] + k[1][i] * zeta[1] + k[2][i] * zeta[2];
        }
        for i in 0..7 {
            for j in 0..=i {
                *st.cov.at_mut(i, j) -=
                    k[0][i] * cht[0][j] + k[1][i] * cht[1][j] + k[2][i] * cht[2][j];
            }
        }
        st.chi2 += quadratic_form(&w, &zeta);
        st.ndf += 2;

        // decay length over momentum: flight from the production point back
        // to the decay vertex
        st.p[7] = -ds;
        let p_vec = st.momentum_vec();
        let p2 = p_vec.norm_squared();
        if p2 > 0.0 {
            // along-flight variance of both vertices, linearized into S
            let u = p_vec / p2.sqrt();
            let mut along = 0.0;
            for i in 0..3 {
                for j in 0..3 {
                    along += u[i] * (st.cov.at(i, j) + vertex.cov.at(i, j)) * u[j];
                }
            }
            for i in 0..7 {
                *st.cov.at_mut(7, i) = 0.0;
            }
            *st.cov.at_mut(7, 7) = along / p2;
        }
        st.at_production_vertex = true;
        st.has_production_vertex = true;
        Ok(self)
    }

    /// Apply an invariant-mass constraint to the fitted parent
    /// (see [`apply_mass_constraint`]).
    pub fn mass_constraint(mut self, mass: Gev, sigma: Gev) -> Self {
        apply_mass_constraint(&mut self.state, mass, sigma);
        self
    }

    /// Remove the decay-length degree of freedom
    /// (see [`apply_no_decay_length`]).
    pub fn no_decay_length(mut self) -> Self {
        apply_no_decay_length(&mut self.state, self.field);
        self
    }

    /// The running parent estimate.
    pub fn state(&self) -> &ParticleState {
        &self.state
    }

    /// Finish the fit and take the parent state.
    pub fn into_state(self) -> ParticleState {
        self.state
    }

    /// One-shot construction: combine `daughters`, then the optional
    /// production vertex, then the optional mass constraint.
    pub fn construct(
        field: &'a FieldModel,
        vertex_guess: [f64; 3],
        daughters: &[&ParticleState],
        production_vertex: Option<&ParticleState>,
        mass: Option<MassConstraint>,
    ) -> Result<ParticleState, KinfitError> {
        let mut fit = VertexFit::new(field, vertex_guess);
        for d in daughters.iter().copied() {
            fit = fit.add_daughter(d)?;
        }
        if let Some(v) = production_vertex {
            fit = fit.set_production_vertex(v)?;
        }
        if let Some(mc) = mass {
            fit = fit.mass_constraint(mc.mass, mc.sigma);
        }
        Ok(fit.into_state())
    }
}

/// Weight matrix of the 3D position update: the inverse of the summed
/// position covariance `Cxx + Vxx` over its well-determined directions.
///
/// An exactly measured daughter can pin a coordinate completely, leaving a
/// null direction in the sum. Null directions are dropped from the weight
/// (no correction, no chi2 along them) as long as the innovation has no
/// component there; a residual along an exactly determined coordinate means
/// the measurements contradict each other and the update is refused instead
/// of filtering with a broken gain.
fn invert_position_block(
    c: &SymMat8,
    v: &SymMat8,
    zeta: &[f64; 3],
) -> Result<Matrix3<f64>, KinfitError> {
    let mut s = Matrix3::zeros();
    for i in 0..3 {
        for j in 0..3 {
            s[(i, j)] = c.at(i, j) + v.at(i, j);
        }
    }

    let z = Vector3::new(zeta[0], zeta[1], zeta[2]);
    let eig = s.symmetric_eigen();
    let cutoff = eig.eigenvalues.amax() * GAIN_EIGEN_CUTOFF;
    let mut w = Matrix3::zeros();
    for i in 0..3 {
        let lambda = eig.eigenvalues[i];
        let q = eig.eigenvectors.column(i);
        if lambda > cutoff {
            w += q * q.transpose() / lambda;
        } else if lambda < -cutoff || q.dot(&z).abs() > GAIN_RESIDUAL_TOL * (1.0 + z.norm()) {
            return Err(KinfitError::SingularInnovation);
        }
    }
    Ok(w)
}

#[inline]
fn quadratic_form(w: &Matrix3<f64>, zeta: &[f64; 3]) -> f64 {
    let z = Vector3::new(zeta[0], zeta[1], zeta[2]);
    z.dot(&(w * z))
}
