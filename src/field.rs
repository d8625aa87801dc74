//! Magnetic field models.
//!
//! Trajectory transport is polymorphic over the field topology through
//! [`FieldModel`], a tagged variant selected once at fit construction:
//!
//! * [`FieldModel::UniformBz`] – constant solenoid field along `z`
//!   (collider topology). Transport has a closed form: a helix in the
//!   transverse plane, linear in `z`.
//! * [`FieldModel::Inhomogeneous`] – arbitrary 3D field sampled through a
//!   caller-supplied function (fixed-target topology). Transport subdivides
//!   the step and treats the field as locally solenoidal; path-length solves
//!   become iterative.
//!
//! Both variants speak the same unit convention at the interface: positions
//! in centimeters and field values in kilogauss, with the curvature scale
//! fixed by [`C_LIGHT`](crate::constants::C_LIGHT).

use std::fmt;

use nalgebra::Vector3;

use crate::constants::KiloGauss;

/// Caller-supplied field map for the inhomogeneous strategy.
///
/// Wraps a sampling function `position [cm] → B [kG]`. The function must be
/// deterministic: transport assumes that re-sampling the same point yields
/// the same field.
pub struct FieldMap {
    sample: Box<dyn Fn(&Vector3<f64>) -> Vector3<f64> + Send + Sync>,
}

impl FieldMap {
    /// Wrap a sampling function `position [cm] → B [kG]`.
    pub fn new<F>(sample: F) -> Self
    where
        F: Fn(&Vector3<f64>) -> Vector3<f64> + Send + Sync + 'static,
    {
        Self {
            sample: Box::new(sample),
        }
    }

    /// Field vector at `position`, kilogauss.
    #[inline]
    pub fn value(&self, position: &Vector3<f64>) -> Vector3<f64> {
        (self.sample)(position)
    }
}

impl fmt::Debug for FieldMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMap").finish_non_exhaustive()
    }
}

/// Field topology seen by transport and vertex fitting.
#[derive(Debug)]
pub enum FieldModel {
    /// Constant solenoid field along `z`, kilogauss.
    UniformBz(KiloGauss),
    /// Inhomogeneous field sampled through a caller-supplied map.
    Inhomogeneous(FieldMap),
}

impl FieldModel {
    /// Field vector at `position`, kilogauss.
    pub fn value_at(&self, position: &Vector3<f64>) -> Vector3<f64> {
        match self {
            FieldModel::UniformBz(bz) => Vector3::new(0.0, 0.0, *bz),
            FieldModel::Inhomogeneous(map) => map.value(position),
        }
    }

    /// Axial field component at `position`, kilogauss.
    ///
    /// The transport formulas curve tracks around the local `z` axis; for the
    /// uniform strategy this is exact, for the inhomogeneous one it is the
    /// locally solenoidal approximation applied per substep.
    #[inline]
    pub fn bz_at(&self, position: &Vector3<f64>) -> KiloGauss {
        match self {
            FieldModel::UniformBz(bz) => *bz,
            FieldModel::Inhomogeneous(map) => map.value(position).z,
        }
    }

    /// Whether transport may treat the field as globally constant.
    #[inline]
    pub fn is_uniform(&self) -> bool {
        matches!(self, FieldModel::UniformBz(_))
    }
}
