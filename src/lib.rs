//! # Kinfit
//!
//! Kalman-filter reconstruction of composite particles from previously fitted
//! track states.
//!
//! A decayed particle (a `K0s`, a `Λ`, a `D⁰`, ...) is never observed directly:
//! only its decay products leave tracks. `kinfit` rebuilds the parent from
//! those daughters by a sequential Kalman-filter vertex fit:
//!
//! 1. each daughter is transported along its trajectory to the running
//!    decay-vertex estimate,
//! 2. its position at that point is filtered into the parent state as a 3D
//!    measurement of the decay vertex, while its four-momentum is summed into
//!    the parent four-momentum with full cross-covariance bookkeeping,
//! 3. optional final corrections constrain the invariant mass to a known value
//!    or suppress the decay-length degree of freedom for strong resonances.
//!
//! The fitted state is an 8-parameter vector `(x, y, z, px, py, pz, E, S)`
//! with a packed symmetric 8×8 covariance; `S` is the flight length divided by
//! the momentum magnitude, kept as a fit parameter for numerical conditioning.
//!
//! ## Modules
//!
//! * [`state`] – [`ParticleState`](state::ParticleState): the 8-parameter
//!   state, its covariance and the uncertainty-propagating accessors.
//! * [`field`] – [`FieldModel`](field::FieldModel): uniform solenoid (`Bz`)
//!   or caller-sampled inhomogeneous magnetic field.
//! * [`transport`] – trajectory propagation: path length to a point or to
//!   another particle, and covariance transport by the field Jacobian.
//! * [`vertex_fit`] – [`VertexFit`](vertex_fit::VertexFit): the sequential
//!   daughter combination and the production-vertex update.
//! * [`constraints`] – mass and no-decay-length constraints applied after
//!   combination.
//! * [`sym_mat`] – packed lower-triangular symmetric 8×8 matrix.
//!
//! ## Units
//!
//! Positions are centimeters, momenta and energies GeV/c (c = 1), magnetic
//! field kilogauss. The curvature scale is fixed by
//! [`C_LIGHT`](constants::C_LIGHT) = 0.000299792458 GeV/c per kG·cm; both
//! field strategies share this convention at their interface.
//!
//! ## Example
//!
//! ```rust
//! use kinfit::field::FieldModel;
//! use kinfit::state::ParticleState;
//! use kinfit::vertex_fit::VertexFit;
//!
//! let field = FieldModel::UniformBz(5.0);
//!
//! let pip = ParticleState::from_cartesian(
//!     [0.1, 0.0, 0.0, 0.3, 0.1, 1.2],
//!     [1e-4; 21],
//!     1,
//!     0.13957,
//! );
//! let pim = ParticleState::from_cartesian(
//!     [0.1, 0.0, 0.0, -0.2, 0.05, 1.0],
//!     [1e-4; 21],
//!     -1,
//!     0.13957,
//! );
//!
//! let k0 = VertexFit::new(&field, [0.1, 0.0, 0.0])
//!     .add_daughter(&pip)
//!     .unwrap()
//!     .add_daughter(&pim)
//!     .unwrap()
//!     .into_state();
//!
//! let mass = k0.mass().unwrap();
//! println!("m = {} ± {} GeV", mass.value, mass.sigma);
//! ```

pub mod constants;
pub mod constraints;
pub mod field;
pub mod kinfit_errors;
pub mod state;
pub mod sym_mat;
pub mod transport;
pub mod vertex_fit;
