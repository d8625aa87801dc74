use thiserror::Error;

/// Error taxonomy of the fitting engine.
///
/// The engine never panics on a degenerate input: every numerically undefined
/// result surfaces as one of these variants and the paired output value must
/// be considered meaningless.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum KinfitError {
    #[error("momentum below the numerical threshold; the derived quantity is undefined")]
    ZeroMomentum,

    #[error("transverse momentum below the numerical threshold; the derived quantity is undefined")]
    ZeroTransverseMomentum,

    #[error("negative variance from an ill-conditioned covariance matrix")]
    NegativeVariance,

    #[error("fitted squared mass is negative: E^2 - p^2 = {0}")]
    ImaginaryMass(f64),

    #[error("innovation covariance is singular; daughters may be degenerate or collinear")]
    SingularInnovation,

    #[error("state has no decay-length estimate; call set_production_vertex first")]
    MissingDecayLength,
}
