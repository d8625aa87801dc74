//! # Constants and type definitions for Kinfit
//!
//! This module centralizes the **unit conventions**, **numerical tolerances**,
//! and **common type aliases** used throughout the `kinfit` library.
//!
//! ## Overview
//!
//! - The centimeter / GeV/c / kilogauss convention shared by every component
//! - Numerical thresholds of the transport and combination algorithms
//! - Core type aliases used across the crate
//!
//! These definitions are used by all main modules, including the field models,
//! trajectory transport, and vertex fitting.

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// Curvature scale: GeV/c per kilogauss and centimeter.
///
/// A particle of charge `q` (in units of e) in a field `Bz` kilogauss curves
/// with `κ = q · Bz · C_LIGHT / pt`. Every transport formula in the crate is
/// expressed through this single constant, which pins down the shared
/// cm / GeV/c / kG convention of both field strategies.
pub const C_LIGHT: f64 = 0.000299792458;

/// Kilogauss → tesla, for callers holding field maps in SI units
pub const KILOGAUSS_TO_TESLA: f64 = 0.1;

// -------------------------------------------------------------------------------------------------
// Numerical tolerances
// -------------------------------------------------------------------------------------------------

/// Squared transverse momentum below which a trajectory has no usable
/// transverse direction (GeV²/c²)
pub const MIN_PT2: f64 = 1.0e-4;

/// Squared total momentum below which kinematic accessors refuse to divide
pub const MIN_P2: f64 = 1.0e-4;

/// Curvature `q·Bz·C_LIGHT` below which a track is propagated as a straight
/// line (1/cm)
pub const MIN_CURVATURE: f64 = 1.0e-8;

/// Predicted constraint variance below which a mass constraint is a no-op
pub const MIN_CONSTRAINT_VARIANCE: f64 = 1.0e-20;

/// Floor of the along-flight measurement inflation width (cm·c/GeV)
pub const SIGMA_S_FLOOR: f64 = 0.1;

/// Growth of the inflation width with flight distance over momentum
pub const SIGMA_S_SLOPE: f64 = 10.0;

/// Eigenvalue fraction of the largest below which a direction of the summed
/// position covariance counts as exactly determined
pub const GAIN_EIGEN_CUTOFF: f64 = 1.0e-10;

/// Innovation component tolerated along an exactly determined direction (cm)
pub const GAIN_RESIDUAL_TOL: f64 = 1.0e-8;

/// Maximum iterations of the closest-approach Newton refinement
pub const DS_MAX_ITER: usize = 10;

/// Convergence tolerance on a closest-approach path-length step (cm·c/GeV)
pub const DS_EPS: f64 = 1.0e-12;

/// Target substep arc length of inhomogeneous-field transport (cm)
pub const FIELD_STEP_CM: f64 = 5.0;

/// Cap on the number of substeps of one inhomogeneous-field transport
pub const FIELD_MAX_SUBSTEPS: usize = 64;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Length in centimeters
pub type Centimeter = f64;

/// Momentum or energy in GeV/c (c = 1)
pub type Gev = f64;

/// Magnetic field strength in kilogauss
pub type KiloGauss = f64;

/// Path length divided by momentum magnitude, the transport parameter `S`
/// (cm·c/GeV)
pub type PathOverP = f64;
