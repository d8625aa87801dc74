//! The 8-parameter particle state and its uncertainty-propagating accessors.
//!
//! A [`ParticleState`] is the single entity every other component reads or
//! mutates: transport advances it along its trajectory, the vertex fit merges
//! daughters into it, the constraints correct it algebraically. It owns
//!
//! * the parameter vector `(x, y, z, px, py, pz, E, S)` — position in cm,
//!   momentum and energy in GeV/c, `S` = path length over momentum,
//! * the packed symmetric covariance of those 8 parameters,
//! * the charge and the fit-quality counters `(chi2, ndf)`.
//!
//! States are exclusively owned values: the combiner copies a daughter before
//! transporting it, so one reconstructed track can be reused across many
//! parent candidates in a combinatorial scan without aliasing.

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::constants::{Centimeter, Gev, MIN_P2, MIN_PT2, PathOverP};
use crate::kinfit_errors::KinfitError;
use crate::sym_mat::SymMat8;

/// A derived quantity together with its propagated 1σ uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueWithError {
    pub value: f64,
    pub sigma: f64,
}

/// Track or composite-particle state at a point of its trajectory.
///
/// Fields
/// -----------------
/// * `p`: parameter vector `(x, y, z, px, py, pz, E, S)`.
/// * `cov`: packed symmetric 8×8 covariance of `p`.
/// * `q`: charge in units of e.
/// * `ndf`, `chi2`: fit quality. `ndf` starts at −3 in the construct path and
///   grows by 2 per combined daughter; `chi2` only ever accumulates.
/// * `at_production_vertex`: whether the stored parameters currently describe
///   the state at the production vertex rather than at the decay vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    pub(crate) p: [f64; 8],
    pub(crate) cov: SymMat8,
    pub(crate) q: i32,
    pub(crate) ndf: i32,
    pub(crate) chi2: f64,
    pub(crate) at_production_vertex: bool,
    pub(crate) has_production_vertex: bool,
    /// Path-length parameter accumulated since the decay vertex.
    pub(crate) s_from_decay: f64,
}

impl ParticleState {
    /// Build a state from a reconstructed track.
    ///
    /// Arguments
    /// -----------------
    /// * `param`: `(x, y, z, px, py, pz)` — cm and GeV/c.
    /// * `cov`: packed lower-triangular 6×6 covariance of `param` (21 values,
    ///   same row-by-row layout as [`SymMat8`]).
    /// * `charge`: charge in units of e.
    /// * `mass`: mass hypothesis in GeV; fixes the energy component
    ///   `E = √(m² + p²)` and its covariance through `∂E/∂p = p/E`.
    ///
    /// No physical-consistency validation is performed: the caller guarantees
    /// that `cov` belongs to `param`. Fit-quality counters are reset to the
    /// not-yet-constrained convention (`ndf = −3`, `chi2 = 0`).
    pub fn from_cartesian(param: [f64; 6], cov: [f64; 21], charge: i32, mass: Gev) -> Self {
        let p2 = param[3] * param[3] + param[4] * param[4] + param[5] * param[5];
        let energy = (mass * mass + p2).sqrt();

        let mut c = SymMat8::zeros();
        for i in 0..6 {
            for j in 0..=i {
                *c.at_mut(i, j) = cov[SymMat8::idx(i, j)];
            }
        }

        // Energy row: linear propagation E = E(px,py,pz)
        let h = if energy > 0.0 {
            [param[3] / energy, param[4] / energy, param[5] / energy]
        } else {
            [0.0; 3]
        };
        for j in 0..6 {
            let mut s = 0.0;
            for (k, hk) in h.iter().enumerate() {
                s += hk * c.at(3 + k, j);
            }
            *c.at_mut(6, j) = s;
        }
        let mut see = 0.0;
        for (k, hk) in h.iter().enumerate() {
            for (l, hl) in h.iter().enumerate() {
                see += hk * hl * c.at(3 + k, 3 + l);
            }
        }
        *c.at_mut(6, 6) = see;
        *c.at_mut(7, 7) = 1.0;

        Self {
            p: [
                param[0], param[1], param[2], param[3], param[4], param[5], energy, 0.0,
            ],
            cov: c,
            q: charge,
            ndf: -3,
            chi2: 0.0,
            at_production_vertex: false,
            has_production_vertex: false,
            s_from_decay: 0.0,
        }
    }

    /// Build a state directly from the full 8-parameter vector and its packed
    /// covariance.
    ///
    /// No validation is performed; fit-quality counters are reset
    /// (`ndf = −3`, `chi2 = 0`).
    pub fn from_parts(p: [f64; 8], cov: [f64; 36], charge: i32) -> Self {
        Self {
            p,
            cov: SymMat8::from_packed(cov),
            q: charge,
            ndf: -3,
            chi2: 0.0,
            at_production_vertex: false,
            has_production_vertex: false,
            s_from_decay: 0.0,
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Raw getters
    // ---------------------------------------------------------------------------------------------

    #[inline]
    pub fn x(&self) -> Centimeter {
        self.p[0]
    }
    #[inline]
    pub fn y(&self) -> Centimeter {
        self.p[1]
    }
    #[inline]
    pub fn z(&self) -> Centimeter {
        self.p[2]
    }
    #[inline]
    pub fn px(&self) -> Gev {
        self.p[3]
    }
    #[inline]
    pub fn py(&self) -> Gev {
        self.p[4]
    }
    #[inline]
    pub fn pz(&self) -> Gev {
        self.p[5]
    }
    #[inline]
    pub fn energy(&self) -> Gev {
        self.p[6]
    }
    /// Path length over momentum accumulated by the fit, `S`.
    #[inline]
    pub fn s(&self) -> PathOverP {
        self.p[7]
    }

    #[inline]
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.p[0], self.p[1], self.p[2])
    }
    #[inline]
    pub fn momentum_vec(&self) -> Vector3<f64> {
        Vector3::new(self.p[3], self.p[4], self.p[5])
    }

    #[inline]
    pub fn charge(&self) -> i32 {
        self.q
    }
    #[inline]
    pub fn chi2(&self) -> f64 {
        self.chi2
    }
    #[inline]
    pub fn ndf(&self) -> i32 {
        self.ndf
    }
    /// Covariance element `(i, j)` of the 8-parameter vector.
    #[inline]
    pub fn covariance(&self, i: usize, j: usize) -> f64 {
        self.cov.at(i, j)
    }
    /// Whether the parameters currently describe the state at its production
    /// vertex (as opposed to its decay vertex).
    #[inline]
    pub fn is_at_production_vertex(&self) -> bool {
        self.at_production_vertex
    }

    /// Azimuthal angle of the momentum, radians.
    #[inline]
    pub fn phi(&self) -> f64 {
        self.p[4].atan2(self.p[3])
    }

    /// Pseudorapidity.
    ///
    /// Return
    /// ----------
    /// * [`KinfitError::ZeroTransverseMomentum`] for a purely longitudinal
    ///   momentum, where the pseudorapidity diverges.
    pub fn eta(&self) -> Result<f64, KinfitError> {
        let pt2 = self.p[3] * self.p[3] + self.p[4] * self.p[4];
        if pt2 < MIN_PT2 {
            return Err(KinfitError::ZeroTransverseMomentum);
        }
        Ok((self.p[5] / pt2.sqrt()).asinh())
    }

    /// Rapidity.
    ///
    /// Return
    /// ----------
    /// * [`KinfitError::ImaginaryMass`] when `E ≤ |pz|`: the four-vector is
    ///   light-like or space-like and the rapidity diverges.
    pub fn rapidity(&self) -> Result<f64, KinfitError> {
        let (e, pz) = (self.p[6], self.p[5]);
        if e <= pz.abs() {
            let m2 = e * e - self.p[3] * self.p[3] - self.p[4] * self.p[4] - pz * pz;
            return Err(KinfitError::ImaginaryMass(m2));
        }
        Ok(0.5 * ((e + pz) / (e - pz)).ln())
    }

    // ---------------------------------------------------------------------------------------------
    // Accessors with propagated uncertainty
    // ---------------------------------------------------------------------------------------------

    /// Momentum magnitude with its propagated uncertainty.
    ///
    /// Return
    /// ----------
    /// * `Ok(ValueWithError)` on success.
    /// * [`KinfitError::ZeroMomentum`] when `|p|` is below the numerical
    ///   threshold, [`KinfitError::NegativeVariance`] when the covariance is
    ///   ill-conditioned. In both cases no output value is defined.
    pub fn momentum(&self) -> Result<ValueWithError, KinfitError> {
        let (x, y, z) = (self.p[3], self.p[4], self.p[5]);
        let p2 = x * x + y * y + z * z;
        if p2 < MIN_P2 {
            return Err(KinfitError::ZeroMomentum);
        }
        let var = x * x * self.cov.at(3, 3)
            + y * y * self.cov.at(4, 4)
            + z * z * self.cov.at(5, 5)
            + 2.0 * (x * y * self.cov.at(4, 3) + x * z * self.cov.at(5, 3) + y * z * self.cov.at(5, 4));
        if var < 0.0 {
            return Err(KinfitError::NegativeVariance);
        }
        let p = p2.sqrt();
        Ok(ValueWithError {
            value: p,
            sigma: var.sqrt() / p,
        })
    }

    /// Transverse momentum with its propagated uncertainty.
    pub fn momentum_transverse(&self) -> Result<ValueWithError, KinfitError> {
        let (x, y) = (self.p[3], self.p[4]);
        let pt2 = x * x + y * y;
        if pt2 < MIN_PT2 {
            return Err(KinfitError::ZeroTransverseMomentum);
        }
        let var =
            x * x * self.cov.at(3, 3) + y * y * self.cov.at(4, 4) + 2.0 * x * y * self.cov.at(4, 3);
        if var < 0.0 {
            return Err(KinfitError::NegativeVariance);
        }
        let pt = pt2.sqrt();
        Ok(ValueWithError {
            value: pt,
            sigma: var.sqrt() / pt,
        })
    }

    /// Invariant mass `√(E² − p²)` with its propagated uncertainty.
    ///
    /// Return
    /// ----------
    /// * [`KinfitError::ImaginaryMass`] when the fitted four-vector is
    ///   space-like, [`KinfitError::NegativeVariance`] on an ill-conditioned
    ///   covariance, [`KinfitError::ZeroMomentum`] when the mass itself
    ///   vanishes and the relative error is undefined.
    pub fn mass(&self) -> Result<ValueWithError, KinfitError> {
        let (x, y, z, e) = (self.p[3], self.p[4], self.p[5], self.p[6]);
        let m2 = e * e - x * x - y * y - z * z;
        if m2 < 0.0 {
            return Err(KinfitError::ImaginaryMass(m2));
        }
        let var = x * x * self.cov.at(3, 3)
            + y * y * self.cov.at(4, 4)
            + z * z * self.cov.at(5, 5)
            + e * e * self.cov.at(6, 6)
            + 2.0
                * (x * y * self.cov.at(4, 3)
                    + z * (x * self.cov.at(5, 3) + y * self.cov.at(5, 4))
                    - e * (x * self.cov.at(6, 3) + y * self.cov.at(6, 4) + z * self.cov.at(6, 5)));
        if var < 0.0 {
            return Err(KinfitError::NegativeVariance);
        }
        let m = m2.sqrt();
        if m < 1e-10 {
            return Err(KinfitError::ZeroMomentum);
        }
        Ok(ValueWithError {
            value: m,
            sigma: var.sqrt() / m,
        })
    }

    /// Decay length `S·|p|` with its propagated uncertainty, cm.
    pub fn decay_length(&self) -> Result<ValueWithError, KinfitError> {
        let (x, y, z, t) = (self.p[3], self.p[4], self.p[5], self.p[7]);
        let p2 = x * x + y * y + z * z;
        if p2 < MIN_P2 {
            return Err(KinfitError::ZeroMomentum);
        }
        let var = p2 * self.cov.at(7, 7)
            + t * t / p2
                * (x * x * self.cov.at(3, 3)
                    + y * y * self.cov.at(4, 4)
                    + z * z * self.cov.at(5, 5)
                    + 2.0
                        * (x * y * self.cov.at(4, 3)
                            + x * z * self.cov.at(5, 3)
                            + y * z * self.cov.at(5, 4)))
            + 2.0 * t * (x * self.cov.at(7, 3) + y * self.cov.at(7, 4) + z * self.cov.at(7, 5));
        if var < 0.0 {
            return Err(KinfitError::NegativeVariance);
        }
        Ok(ValueWithError {
            value: t * p2.sqrt(),
            sigma: var.sqrt(),
        })
    }

    /// Transverse decay length `S·pt` with its propagated uncertainty, cm.
    pub fn decay_length_xy(&self) -> Result<ValueWithError, KinfitError> {
        let (x, y, t) = (self.p[3], self.p[4], self.p[7]);
        let pt2 = x * x + y * y;
        if pt2 < MIN_PT2 {
            return Err(KinfitError::ZeroTransverseMomentum);
        }
        let var = pt2 * self.cov.at(7, 7)
            + t * t / pt2
                * (x * x * self.cov.at(3, 3)
                    + y * y * self.cov.at(4, 4)
                    + 2.0 * x * y * self.cov.at(4, 3))
            + 2.0 * t * (x * self.cov.at(7, 3) + y * self.cov.at(7, 4));
        if var < 0.0 {
            return Err(KinfitError::NegativeVariance);
        }
        Ok(ValueWithError {
            value: t * pt2.sqrt(),
            sigma: var.sqrt(),
        })
    }

    /// Proper decay time multiplied by c, `c·τ = S·m`, cm.
    ///
    /// Uncertainty combines the `S` variance, the mass variance, and their
    /// covariance through the mass Jacobian.
    pub fn lifetime(&self) -> Result<ValueWithError, KinfitError> {
        let m = self.mass()?;
        let t = self.p[7];
        // cov(S, m) * m: row 7 of the covariance against the m^2 Jacobian / 2
        let ctm = -self.p[3] * self.cov.at(7, 3) - self.p[4] * self.cov.at(7, 4)
            - self.p[5] * self.cov.at(7, 5)
            + self.p[6] * self.cov.at(7, 6);
        let var = m.value * m.value * self.cov.at(7, 7)
            + 2.0 * t * ctm
            + t * t * m.sigma * m.sigma;
        if var < 0.0 {
            return Err(KinfitError::NegativeVariance);
        }
        Ok(ValueWithError {
            value: t * m.value,
            sigma: var.sqrt(),
        })
    }

    // ---------------------------------------------------------------------------------------------
    // Monte Carlo smearing
    // ---------------------------------------------------------------------------------------------

    /// Generate `n` noisy copies of this state, Gaussian-smeared within its
    /// own covariance diagonal.
    ///
    /// The first returned element is always the unperturbed original, so a
    /// combinatorial scan over the output includes the nominal candidate.
    /// `noise_scale` multiplies the nominal 1σ widths (1.0 uses them as-is).
    /// Useful for robustness scans of a mass hypothesis against the track
    /// resolution.
    pub fn generate_noisy_realizations<R: Rng>(
        &self,
        n: usize,
        noise_scale: f64,
        rng: &mut R,
    ) -> Vec<ParticleState> {
        let sigmas: [f64; 8] =
            std::array::from_fn(|i| noise_scale * self.cov.at(i, i).max(0.0).sqrt());

        let mut out = Vec::with_capacity(n + 1);
        out.push(self.clone());
        for _ in 0..n {
            let mut noisy = self.clone();
            for (i, s) in sigmas.iter().enumerate() {
                let g: f64 = rng.sample(StandardNormal);
                noisy.p[i] += s * g;
            }
            // keep the energy consistent with the smeared momentum
            let m2 = (self.p[6] * self.p[6]
                - self.p[3] * self.p[3]
                - self.p[4] * self.p[4]
                - self.p[5] * self.p[5])
                .max(0.0);
            let p2 = noisy.p[3] * noisy.p[3] + noisy.p[4] * noisy.p[4] + noisy.p[5] * noisy.p[5];
            noisy.p[6] = (m2 + p2).sqrt();
            out.push(noisy);
        }
        out
    }
}

#[cfg(test)]
mod state_test {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pion() -> ParticleState {
        ParticleState::from_cartesian(
            [1.0, -2.0, 30.0, 0.3, -0.4, 1.2],
            [1e-4; 21],
            1,
            0.13957,
        )
    }

    #[test]
    fn test_from_cartesian_energy() {
        let s = pion();
        let p2: f64 = 0.3 * 0.3 + 0.4 * 0.4 + 1.2 * 1.2;
        assert_relative_eq!(
            s.energy(),
            (0.13957f64 * 0.13957 + p2).sqrt(),
            max_relative = 1e-14
        );
        assert_eq!(s.ndf(), -3);
        assert_eq!(s.chi2(), 0.0);
        assert_eq!(s.s(), 0.0);
        // energy variance must be the propagated p-block quadratic form
        let e = s.energy();
        let h = [0.3 / e, -0.4 / e, 1.2 / e];
        let mut want = 0.0;
        for (k, hk) in h.iter().enumerate() {
            for (l, hl) in h.iter().enumerate() {
                want += hk * hl * s.covariance(3 + k, 3 + l);
            }
        }
        assert_relative_eq!(s.covariance(6, 6), want, max_relative = 1e-12);
    }

    #[test]
    fn test_mass_of_single_track_matches_hypothesis() {
        let m = pion().mass().unwrap();
        assert_relative_eq!(m.value, 0.13957, max_relative = 1e-10);
        assert!(m.sigma >= 0.0);
    }

    #[test]
    fn test_momentum_threshold() {
        let s = ParticleState::from_cartesian(
            [0.0; 6],
            [0.0; 21],
            0,
            0.497,
        );
        assert_eq!(s.momentum(), Err(KinfitError::ZeroMomentum));
        assert_eq!(s.decay_length(), Err(KinfitError::ZeroMomentum));
    }

    #[test]
    fn test_negative_variance_detected() {
        let mut p = [0.0; 8];
        p[3] = 1.0;
        p[6] = 1.1;
        let mut cov = [0.0; 36];
        cov[SymMat8::idx(3, 3)] = -1.0;
        let s = ParticleState::from_parts(p, cov, 1);
        assert_eq!(s.momentum(), Err(KinfitError::NegativeVariance));
    }

    #[test]
    fn test_kinematic_angles() {
        let s = pion();
        assert_relative_eq!(s.phi(), (-0.4f64).atan2(0.3), max_relative = 1e-14);
        let pt = (0.3f64 * 0.3 + 0.4 * 0.4).sqrt();
        assert_relative_eq!(s.eta().unwrap(), (1.2f64 / pt).asinh(), max_relative = 1e-14);
        assert!(s.rapidity().unwrap() > 0.0);
    }

    #[test]
    fn test_degenerate_angles_rejected() {
        // purely longitudinal, light-like four-vector
        let s = ParticleState::from_parts(
            [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0],
            [0.0; 36],
            0,
        );
        assert_eq!(s.eta(), Err(KinfitError::ZeroTransverseMomentum));
        assert!(matches!(s.rapidity(), Err(KinfitError::ImaginaryMass(_))));
    }

    #[test]
    fn test_noisy_realizations() {
        let s = pion();
        let mut rng = StdRng::seed_from_u64(42);
        let all = s.generate_noisy_realizations(5, 1.0, &mut rng);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], s);
        for noisy in &all[1..] {
            // the mass hypothesis survives the smearing
            assert_relative_eq!(noisy.mass().unwrap().value, 0.13957, epsilon = 1e-6);
            assert_ne!(noisy.p, s.p);
        }
    }
}
