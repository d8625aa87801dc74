//! End-to-end combination scenarios: two-body fits, constraints, and the
//! chi-square bookkeeping across a full construction.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use kinfit::constraints::apply_mass_constraint;
use kinfit::field::FieldModel;
use kinfit::kinfit_errors::KinfitError;
use kinfit::state::ParticleState;
use kinfit::sym_mat::SymMat8;
use kinfit::vertex_fit::{MassConstraint, VertexFit};

const PION_MASS: f64 = 0.13957;

fn pion(pos: [f64; 3], mom: [f64; 3], q: i32, sig2: f64) -> ParticleState {
    let mut cov = [0.0; 21];
    for i in 0..6 {
        cov[SymMat8::idx(i, i)] = sig2;
    }
    ParticleState::from_cartesian(
        [pos[0], pos[1], pos[2], mom[0], mom[1], mom[2]],
        cov,
        q,
        PION_MASS,
    )
}

#[test]
fn back_to_back_daughters_reproduce_the_reference_four_vector() {
    // (0.3, 0, 0, 0.32) + (-0.3, 0, 0, 0.32): parent at rest, E = M = 0.64
    let field = FieldModel::UniformBz(5.0);
    let d1 = ParticleState::from_parts([0.0, 0.0, 0.0, 0.3, 0.0, 0.0, 0.32, 0.0], [0.0; 36], 1);
    let d2 = ParticleState::from_parts([0.0, 0.0, 0.0, -0.3, 0.0, 0.0, 0.32, 0.0], [0.0; 36], -1);

    let parent = VertexFit::construct(&field, [0.0; 3], &[&d1, &d2], None, None).unwrap();

    assert_abs_diff_eq!(parent.px(), 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(parent.py(), 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(parent.pz(), 0.0, epsilon = 1e-12);
    assert_relative_eq!(parent.energy(), 0.64, max_relative = 1e-12);
    assert!(parent.ndf() >= 1);
    assert_abs_diff_eq!(parent.chi2(), 0.0, epsilon = 1e-12);

    let m = parent.mass().unwrap();
    assert_relative_eq!(m.value, 0.64, max_relative = 1e-12);
}

#[test]
fn two_body_invariant_mass_matches_four_vector_addition() {
    let field = FieldModel::UniformBz(5.0);
    let vertex = [0.3, -0.2, 5.0];
    let d1 = pion(vertex, [0.31, 0.05, 1.1], 1, 1e-4);
    let d2 = pion(vertex, [-0.18, 0.12, 0.9], -1, 1e-4);

    let parent = VertexFit::new(&field, vertex)
        .add_daughter(&d1)
        .unwrap()
        .add_daughter(&d2)
        .unwrap()
        .into_state();

    // direct four-vector sum of the inputs
    let e = d1.energy() + d2.energy();
    let px = d1.px() + d2.px();
    let py = d1.py() + d2.py();
    let pz = d1.pz() + d2.pz();
    let m_direct = (e * e - px * px - py * py - pz * pz).sqrt();

    let m_fit = parent.mass().unwrap();
    assert!(m_fit.sigma > 0.0);
    assert!(
        (m_fit.value - m_direct).abs() <= 3.0 * m_fit.sigma.max(1e-6),
        "fitted mass {} too far from direct sum {} (sigma {})",
        m_fit.value,
        m_direct,
        m_fit.sigma
    );
    // both daughters start at the common vertex, so the agreement is in fact
    // much tighter than the propagated uncertainty
    assert_relative_eq!(m_fit.value, m_direct, max_relative = 1e-4);
}

#[test]
fn chi2_is_non_decreasing_over_daughter_additions() {
    let field = FieldModel::UniformBz(5.0);
    let daughters = [
        pion([0.02, 0.01, 0.0], [0.3, 0.0, 1.0], 1, 1e-4),
        pion([-0.01, 0.02, 0.01], [-0.2, 0.1, 0.8], -1, 1e-4),
        pion([0.0, -0.02, 0.02], [0.1, -0.15, 0.9], 1, 1e-4),
        pion([0.01, 0.0, -0.01], [-0.05, 0.2, 1.1], -1, 1e-4),
    ];

    let mut fit = VertexFit::new(&field, [0.0; 3]);
    let mut previous = 0.0;
    for d in &daughters {
        fit = fit.add_daughter(d).unwrap();
        let chi2 = fit.state().chi2();
        assert!(
            chi2 >= previous - 1e-12,
            "chi2 decreased: {previous} -> {chi2}"
        );
        previous = chi2;
    }
    assert_eq!(fit.state().ndf(), -3 + 2 * daughters.len() as i32);
}

#[test]
fn mass_constrained_construction_lands_on_the_target_mass() {
    let field = FieldModel::UniformBz(5.0);
    let vertex = [0.0, 0.0, 3.0];
    let d1 = pion(vertex, [0.25, 0.1, 0.9], 1, 1e-4);
    let d2 = pion(vertex, [-0.2, 0.05, 1.0], -1, 1e-4);

    let k0_mass = 0.497611;
    let parent = VertexFit::construct(
        &field,
        vertex,
        &[&d1, &d2],
        None,
        Some(MassConstraint::exact(k0_mass)),
    )
    .unwrap();

    let m = parent.mass().unwrap();
    assert_relative_eq!(m.value, k0_mass, max_relative = 1e-3);
    // the exact constraint removes one degree of freedom: -3 + 2 + 2 - 1
    assert_eq!(parent.ndf(), 0);
}

#[test]
fn mass_constraint_fixpoint_keeps_parameters() {
    let (px, py, pz) = (0.1_f64, 0.2, 1.3);
    let m0 = 0.497611;
    let e = (m0 * m0 + px * px + py * py + pz * pz).sqrt();
    let mut cov = [0.0; 36];
    for i in 0..8 {
        cov[SymMat8::idx(i, i)] = 2e-4;
    }
    let mut s = ParticleState::from_parts([0.0, 0.0, 0.0, px, py, pz, e, 0.0], cov, 0);
    let params_before = [s.x(), s.y(), s.z(), s.px(), s.py(), s.pz(), s.energy(), s.s()];
    let ndf_before = s.ndf();

    apply_mass_constraint(&mut s, m0, 0.0);

    let params_after = [s.x(), s.y(), s.z(), s.px(), s.py(), s.pz(), s.energy(), s.s()];
    for (a, b) in params_before.iter().zip(params_after.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
    assert_eq!(s.ndf(), ndf_before - 1);
}

#[test]
fn exact_daughters_fit_but_contradictory_ones_are_rejected() {
    // a zero-covariance daughter pins the transverse vertex coordinates
    // exactly; a second exact daughter is fine when consistent and must be
    // refused when its position contradicts them
    let field = FieldModel::UniformBz(0.0);
    let d1 = ParticleState::from_parts(
        [0.0, 0.0, 0.0, 0.3, 0.0, 0.0, 0.33, 0.0],
        [0.0; 36],
        1,
    );
    let d2_consistent = ParticleState::from_parts(
        [0.0, 0.0, 0.0, -0.3, 0.0, 0.0, 0.33, 0.0],
        [0.0; 36],
        -1,
    );
    let d2_displaced = ParticleState::from_parts(
        [0.0, 0.5, 0.0, -0.3, 0.0, 0.0, 0.33, 0.0],
        [0.0; 36],
        -1,
    );

    let ok = VertexFit::construct(&field, [0.0; 3], &[&d1, &d2_consistent], None, None);
    assert!(ok.is_ok());

    let fit = VertexFit::new(&field, [0.0; 3]).add_daughter(&d1).unwrap();
    assert!(matches!(
        fit.add_daughter(&d2_displaced),
        Err(KinfitError::SingularInnovation)
    ));
}

#[test]
fn correlated_mismeasurement_is_corrected_through_the_vertex() {
    // the second daughter's y and py errors are 99.9% correlated; its 0.1 cm
    // y offset against the tightly known vertex carries a matching py error,
    // so filtering the position must pull the summed py back toward zero
    // rather than push it further out
    let field = FieldModel::UniformBz(0.0);
    let vertex = [0.0, 0.0, 0.0];

    let mut c1 = [0.0; 21];
    for i in 0..6 {
        c1[SymMat8::idx(i, i)] = 1e-6;
    }
    let d1 = ParticleState::from_cartesian([0.0, 0.0, 0.0, 2.1, 0.0, 2.1], c1, 1, PION_MASS);

    let mut c2 = [0.0; 21];
    for i in 0..3 {
        c2[SymMat8::idx(i, i)] = 1e-2;
    }
    c2[SymMat8::idx(3, 3)] = 1e-4;
    c2[SymMat8::idx(4, 4)] = 1e-2;
    c2[SymMat8::idx(5, 5)] = 1e-4;
    c2[SymMat8::idx(4, 1)] = 0.999 * 0.1 * 0.1;
    // true momentum (2.1, 0, 2.1); measured with the correlated 1-sigma error
    let d2 = ParticleState::from_cartesian([0.0, 0.1, 0.0, 2.1, 0.0999, 2.1], c2, -1, PION_MASS);

    let parent = VertexFit::construct(&field, vertex, &[&d1, &d2], None, None).unwrap();

    let raw_py = d1.py() + d2.py();
    assert!(raw_py > 0.09);
    // the gain must subtract the correlated part of the error, not add it
    assert!(parent.py() < raw_py);
    assert!(parent.py().abs() < 0.6 * raw_py);
}

#[test]
fn construction_is_order_dependent_only_within_tolerance_for_good_inputs() {
    // well-conditioned daughters: the order of addition must not matter
    // beyond numerical noise
    let field = FieldModel::UniformBz(5.0);
    let vertex = [0.1, -0.1, 1.0];
    let d1 = pion(vertex, [0.3, 0.05, 1.0], 1, 1e-4);
    let d2 = pion(vertex, [-0.25, 0.1, 0.9], -1, 1e-4);

    let a = VertexFit::construct(&field, vertex, &[&d1, &d2], None, None).unwrap();
    let b = VertexFit::construct(&field, vertex, &[&d2, &d1], None, None).unwrap();

    assert_relative_eq!(
        a.mass().unwrap().value,
        b.mass().unwrap().value,
        max_relative = 1e-9
    );
    assert_abs_diff_eq!(a.x() - b.x(), 0.0, epsilon = 1e-9);
}
