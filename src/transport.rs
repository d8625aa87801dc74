//! Trajectory transport.
//!
//! Everything here advances a [`ParticleState`] along its trajectory by the
//! path-length parameter `dS` (path length over momentum magnitude) under a
//! [`FieldModel`]:
//!
//! * [`ParticleState::ds_to_point`] – path length to the point of closest
//!   approach to a space point. Closed form for the uniform solenoid (helix),
//!   bounded iterative refinement for the inhomogeneous field.
//! * [`ParticleState::ds_to_particle`] – the pair of path lengths minimizing
//!   the 3D separation of two trajectories. Transverse circle–circle
//!   geometry seeds a bounded 2×2 Newton minimization; on non-convergence
//!   the best iterate found is returned and the caller inspects the residual.
//! * [`ParticleState::transport_to_ds`] – advance parameters and covariance
//!   by a given `dS` through the field Jacobian (`C' = F C Fᵀ`). Total
//!   function: defined for every real `dS`.
//!
//! The production/decay-vertex representation toggles through
//! [`ParticleState::transport_to_decay_vertex`] and
//! [`ParticleState::transport_to_production_vertex`]; both are built on the
//! flag-neutral `transport_to_ds`.

use nalgebra::{Matrix3, Vector3};
use smallvec::{smallvec, SmallVec};

use crate::constants::{
    C_LIGHT, DS_EPS, DS_MAX_ITER, FIELD_MAX_SUBSTEPS, FIELD_STEP_CM, MIN_CURVATURE, MIN_P2,
    MIN_PT2, PathOverP, SIGMA_S_FLOOR, SIGMA_S_SLOPE,
};
use crate::field::FieldModel;
use crate::kinfit_errors::KinfitError;
use crate::state::ParticleState;

/// Signed curvature `q · Bz · C_LIGHT` of a track in an axial field, 1/cm
/// per (GeV/c).
#[inline]
fn curvature(charge: i32, bz: f64) -> f64 {
    f64::from(charge) * bz * C_LIGHT
}

/// Closed-form `dS` to the transverse closest approach of a helix to a point.
///
/// The root returned by the `atan2` form is the one with the smallest `|dS|`,
/// which resolves the wrap-around ambiguity of multi-turn helices.
fn ds_to_point_bz(p: &[f64; 8], charge: i32, bz: f64, xyz: &Vector3<f64>) -> PathOverP {
    let bq = curvature(charge, bz);
    let pt2 = p[3] * p[3] + p[4] * p[4];
    if pt2 < MIN_PT2 {
        return 0.0;
    }
    let dx = xyz.x - p[0];
    let dy = xyz.y - p[1];
    let a = dx * p[3] + dy * p[4];
    if bq.abs() < MIN_CURVATURE {
        a / pt2
    } else {
        (bq * a).atan2(pt2 + bq * (dy * p[3] - dx * p[4])) / bq
    }
}

/// Advance the 8 parameters by `ds` in an axial field of signed curvature `b`.
fn advance_params_bz(p: &mut [f64; 8], b: f64, ds: f64) {
    let (s_b, c_b, s, c) = helix_coefficients(b, ds);
    let (px, py, pz) = (p[3], p[4], p[5]);
    p[0] += s_b * px + c_b * py;
    p[1] += -c_b * px + s_b * py;
    p[2] += ds * pz;
    p[3] = c * px + s * py;
    p[4] = -s * px + c * py;
}

/// `(sin(b·ds)/b, (1−cos(b·ds))/b, sin, cos)` with the small-angle series
/// guarding the `b → 0` limit.
#[inline]
fn helix_coefficients(b: f64, ds: f64) -> (f64, f64, f64, f64) {
    const OV_SQRT6: f64 = 0.408248290463863;
    let bs = b * ds;
    let (s, c) = bs.sin_cos();
    if bs.abs() > 1e-10 {
        (s / b, (1.0 - c) / b, s, c)
    } else {
        let s_b = (1.0 - bs * OV_SQRT6) * (1.0 + bs * OV_SQRT6) * ds;
        (s_b, 0.5 * s_b * bs, s, c)
    }
}

/// Transport Jacobian of the axial-field helix step.
fn bz_jacobian(b: f64, ds: f64) -> [[f64; 8]; 8] {
    let (s_b, c_b, s, c) = helix_coefficients(b, ds);
    [
        [1.0, 0.0, 0.0, s_b, c_b, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, -c_b, s_b, 0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0, 0.0, ds, 0.0, 0.0],
        [0.0, 0.0, 0.0, c, s, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, -s, c, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
    ]
}

/// One full parameter+covariance step in an axial field `bz`.
fn transport_step_bz(state: &mut ParticleState, bz: f64, ds: f64) {
    let b = curvature(state.q, bz);
    let jac = bz_jacobian(b, ds);
    state.cov = state.cov.similarity(&jac);
    advance_params_bz(&mut state.p, b, ds);
}

/// Number of substeps an inhomogeneous-field transport of `ds` is split into.
fn substep_count(p: &[f64; 8], ds: f64) -> usize {
    let pmag = (p[3] * p[3] + p[4] * p[4] + p[5] * p[5]).sqrt();
    let arc = ds.abs() * pmag;
    ((arc / FIELD_STEP_CM).ceil() as usize).clamp(1, FIELD_MAX_SUBSTEPS)
}

/// Parameters-only transport, field-model aware. Used by the distance solves,
/// which do not need covariance propagation.
fn advance_params(p: &[f64; 8], charge: i32, ds: f64, field: &FieldModel) -> [f64; 8] {
    let mut out = *p;
    match field {
        FieldModel::UniformBz(bz) => {
            advance_params_bz(&mut out, curvature(charge, *bz), ds);
        }
        FieldModel::Inhomogeneous(_) => {
            let n = substep_count(p, ds);
            let h = ds / n as f64;
            for _ in 0..n {
                let bz = field.bz_at(&Vector3::new(out[0], out[1], out[2]));
                advance_params_bz(&mut out, curvature(charge, bz), h);
            }
        }
    }
    out
}

impl ParticleState {
    /// Path-length parameter `dS` to the point of closest approach to `xyz`.
    ///
    /// Uniform field: closed-form helix solution, smallest-`|dS|` root.
    /// Inhomogeneous field: bounded fixed-point iteration re-sampling the
    /// local field; the last iterate is returned even when the tolerance was
    /// not reached.
    pub fn ds_to_point(&self, xyz: &Vector3<f64>, field: &FieldModel) -> PathOverP {
        match field {
            FieldModel::UniformBz(bz) => ds_to_point_bz(&self.p, self.q, *bz, xyz),
            FieldModel::Inhomogeneous(_) => {
                let mut tmp = self.p;
                let mut total = 0.0;
                for _ in 0..DS_MAX_ITER {
                    let bz = field.bz_at(&Vector3::new(tmp[0], tmp[1], tmp[2]));
                    let d = ds_to_point_bz(&tmp, self.q, bz, xyz);
                    total += d;
                    if d.abs() < DS_EPS * total.abs().max(1.0) {
                        break;
                    }
                    tmp = advance_params(&tmp, self.q, d, field);
                }
                total
            }
        }
    }

    /// Pair of path lengths `(dS_self, dS_other)` minimizing the 3D distance
    /// between the two trajectories.
    ///
    /// Transverse circle–circle closest approach (uniform field, both tracks
    /// curved) or the point-approach solves seed a bounded 2×2 Newton
    /// minimization of the squared separation. When the iteration does not
    /// converge — parallel or non-intersecting helices beyond the numeric
    /// tolerance — the best iterate found is returned; the caller is expected
    /// to inspect the residual, e.g. through
    /// [`distance_to`](ParticleState::distance_to).
    pub fn ds_to_particle(&self, other: &ParticleState, field: &FieldModel) -> (PathOverP, PathOverP) {
        let seed = (
            self.ds_to_point(&other.position(), field),
            other.ds_to_point(&self.position(), field),
        );
        let mut best = seed;
        let mut best_sep = separation2(self, seed.0, other, seed.1, field);

        // Transverse circle intersection gives better seeds when both tracks
        // curve in a uniform field.
        if let FieldModel::UniformBz(bz) = field {
            for cand in circle_candidates(self, other, *bz) {
                let s1 = ds_to_point_bz(&self.p, self.q, *bz, &cand);
                let s2 = ds_to_point_bz(&other.p, other.q, *bz, &cand);
                let sep = separation2(self, s1, other, s2, field);
                if sep < best_sep {
                    best_sep = sep;
                    best = (s1, s2);
                }
            }
        }

        // Newton minimization of |r1(s1) - r2(s2)|^2
        let (mut s1, mut s2) = best;
        for _ in 0..DS_MAX_ITER {
            let p1 = advance_params(&self.p, self.q, s1, field);
            let p2 = advance_params(&other.p, other.q, s2, field);
            let r1 = Vector3::new(p1[0], p1[1], p1[2]);
            let r2 = Vector3::new(p2[0], p2[1], p2[2]);
            let v1 = Vector3::new(p1[3], p1[4], p1[5]);
            let v2 = Vector3::new(p2[3], p2[4], p2[5]);
            let dr = r1 - r2;

            let b1 = curvature(self.q, field.bz_at(&r1));
            let b2 = curvature(other.q, field.bz_at(&r2));
            let a1 = Vector3::new(b1 * v1.y, -b1 * v1.x, 0.0);
            let a2 = Vector3::new(b2 * v2.y, -b2 * v2.x, 0.0);

            // gradient of the squared separation (up to a factor 2)
            let f1 = dr.dot(&v1);
            let f2 = -dr.dot(&v2);
            let j11 = v1.dot(&v1) + dr.dot(&a1);
            let j12 = -v1.dot(&v2);
            let j21 = -v1.dot(&v2);
            let j22 = v2.dot(&v2) - dr.dot(&a2);

            let det = j11 * j22 - j12 * j21;
            if det.abs() < 1e-20 {
                break;
            }
            let step1 = -(f1 * j22 - f2 * j12) / det;
            let step2 = -(j11 * f2 - j21 * f1) / det;
            s1 += step1;
            s2 += step2;

            let sep = separation2(self, s1, other, s2, field);
            if sep < best_sep {
                best_sep = sep;
                best = (s1, s2);
            }
            if step1.abs() < DS_EPS && step2.abs() < DS_EPS {
                break;
            }
        }
        best
    }

    /// Advance parameters and covariance by `ds`. Flag-neutral: the
    /// production/decay-vertex bookkeeping only records the travelled path.
    pub fn transport_to_ds(&mut self, ds: PathOverP, field: &FieldModel) {
        match field {
            FieldModel::UniformBz(bz) => transport_step_bz(self, *bz, ds),
            FieldModel::Inhomogeneous(_) => {
                let n = substep_count(&self.p, ds);
                let h = ds / n as f64;
                for _ in 0..n {
                    let bz = field.bz_at(&self.position());
                    transport_step_bz(self, bz, h);
                }
            }
        }
        self.s_from_decay += ds;
    }

    /// Clone-and-transport convenience.
    pub fn transported(&self, ds: PathOverP, field: &FieldModel) -> ParticleState {
        let mut out = self.clone();
        out.transport_to_ds(ds, field);
        out
    }

    /// Return the state to its decay vertex.
    pub fn transport_to_decay_vertex(&mut self, field: &FieldModel) {
        if self.s_from_decay != 0.0 {
            self.transport_to_ds(-self.s_from_decay, field);
        }
        self.at_production_vertex = false;
    }

    /// Move the state to its production vertex.
    ///
    /// Requires a prior production-vertex fit
    /// ([`VertexFit::set_production_vertex`](crate::vertex_fit::VertexFit::set_production_vertex)):
    /// without one the decay-length parameter is meaningless and
    /// [`KinfitError::MissingDecayLength`] is returned instead of a silently
    /// mislinearized state.
    pub fn transport_to_production_vertex(&mut self, field: &FieldModel) -> Result<(), KinfitError> {
        if !self.has_production_vertex {
            return Err(KinfitError::MissingDecayLength);
        }
        let ds = -self.s_from_decay - self.p[7];
        self.transport_to_ds(ds, field);
        self.at_production_vertex = true;
        Ok(())
    }

    /// Closest-approach distance to another trajectory, cm.
    pub fn distance_to(&self, other: &ParticleState, field: &FieldModel) -> f64 {
        let (s1, s2) = self.ds_to_particle(other, field);
        separation2(self, s1, other, s2, field).sqrt()
    }

    /// Closest-approach significance to another trajectory: the separation
    /// normalized by the combined position covariance at the approach point,
    /// `√(dᵀ (C₁ + C₂)⁻¹ d)`.
    pub fn deviation_from(
        &self,
        other: &ParticleState,
        field: &FieldModel,
    ) -> Result<f64, KinfitError> {
        let (s1, s2) = self.ds_to_particle(other, field);
        let a = self.transported(s1, field);
        let b = other.transported(s2, field);
        let d = a.position() - b.position();

        let mut s = Matrix3::zeros();
        for i in 0..3 {
            for j in 0..3 {
                s[(i, j)] = a.cov.at(i, j) + b.cov.at(i, j);
            }
        }
        let chol = s.cholesky().ok_or(KinfitError::SingularInnovation)?;
        let w = chol.inverse();
        Ok(d.dot(&(w * d)).max(0.0).sqrt())
    }

    /// Measure this state at the linearization point `xyz`: transport a copy
    /// to the closest approach and inflate the covariance along the flight
    /// direction, so the measurement does not constrain the coordinate along
    /// the trajectory. The caller's state is never mutated.
    pub(crate) fn measurement_at(&self, xyz: &Vector3<f64>, field: &FieldModel) -> ParticleState {
        let ds = self.ds_to_point(xyz, field);
        let mut m = self.transported(ds, field);

        let d = xyz - self.position();
        let p2 = self.p[3] * self.p[3] + self.p[4] * self.p[4] + self.p[5] * self.p[5];
        let sigma_s = if p2 > MIN_P2 {
            SIGMA_S_FLOOR + SIGMA_S_SLOPE * (d.norm_squared() / p2).sqrt()
        } else {
            SIGMA_S_FLOOR
        };

        let b = field.value_at(xyz) * C_LIGHT;
        let hp = m.momentum_vec() * sigma_s;
        let hm = hp.cross(&b) * f64::from(self.q);
        let h = [hp.x, hp.y, hp.z, hm.x, hm.y, hm.z];

        for i in 0..6 {
            for j in 0..=i {
                *m.cov.at_mut(i, j) += h[i] * h[j];
            }
        }
        m
    }
}

/// Squared 3D separation of two trajectories at path lengths `(s1, s2)`.
fn separation2(
    a: &ParticleState,
    s1: f64,
    b: &ParticleState,
    s2: f64,
    field: &FieldModel,
) -> f64 {
    let p1 = advance_params(&a.p, a.q, s1, field);
    let p2 = advance_params(&b.p, b.q, s2, field);
    let dx = p1[0] - p2[0];
    let dy = p1[1] - p2[1];
    let dz = p1[2] - p2[2];
    dx * dx + dy * dy + dz * dz
}

/// Candidate transverse approach points of two curved tracks in a uniform
/// axial field: the intersections of their curvature circles, or the midpoint
/// of the closest circle points when they do not intersect.
fn circle_candidates(a: &ParticleState, b: &ParticleState, bz: f64) -> SmallVec<[Vector3<f64>; 2]> {
    let bq1 = curvature(a.q, bz);
    let bq2 = curvature(b.q, bz);
    if bq1.abs() < MIN_CURVATURE || bq2.abs() < MIN_CURVATURE {
        return SmallVec::new();
    }
    let c1 = Vector3::new(a.p[0] + a.p[4] / bq1, a.p[1] - a.p[3] / bq1, 0.0);
    let c2 = Vector3::new(b.p[0] + b.p[4] / bq2, b.p[1] - b.p[3] / bq2, 0.0);
    let r1 = (a.p[3] * a.p[3] + a.p[4] * a.p[4]).sqrt() / bq1.abs();
    let r2 = (b.p[3] * b.p[3] + b.p[4] * b.p[4]).sqrt() / bq2.abs();

    let dc = c2 - c1;
    let d = dc.norm();
    if d < 1e-12 {
        // concentric circles carry no transverse intersection information
        return SmallVec::new();
    }
    let u = dc / d;
    let n = Vector3::new(-u.y, u.x, 0.0);

    let half = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
    let h2 = r1 * r1 - half * half;
    if h2 >= 0.0 {
        let p0 = c1 + u * half;
        let h = h2.sqrt();
        smallvec![p0 + n * h, p0 - n * h]
    } else {
        // disjoint circles: closest points along the center line
        let q1 = c1 + u * r1.copysign(half);
        let q2 = c2 - u * r2;
        smallvec![(q1 + q2) * 0.5]
    }
}
