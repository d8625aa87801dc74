use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kinfit::field::FieldModel;
use kinfit::state::ParticleState;
use kinfit::sym_mat::SymMat8;
use kinfit::vertex_fit::{MassConstraint, VertexFit};

const PION_MASS: f64 = 0.13957;
const K0_MASS: f64 = 0.497611;

/// A pion-like daughter track near `vertex`, with a diagonal 6×6 covariance.
#[inline]
fn make_daughter(rng: &mut StdRng, vertex: [f64; 3], q: i32) -> ParticleState {
    let mom = [
        0.4 * (rng.random::<f64>() - 0.5),
        0.4 * (rng.random::<f64>() - 0.5),
        0.5 + rng.random::<f64>(),
    ];
    let pos = [
        vertex[0] + 0.01 * (rng.random::<f64>() - 0.5),
        vertex[1] + 0.01 * (rng.random::<f64>() - 0.5),
        vertex[2] + 0.01 * (rng.random::<f64>() - 0.5),
    ];
    let mut cov = [0.0; 21];
    for i in 0..3 {
        cov[SymMat8::idx(i, i)] = 1e-4;
        cov[SymMat8::idx(3 + i, 3 + i)] = 1e-6;
    }
    ParticleState::from_cartesian(
        [pos[0], pos[1], pos[2], mom[0], mom[1], mom[2]],
        cov,
        q,
        PION_MASS,
    )
}

/// Two-body combination, free fit.
fn bench_two_body(c: &mut Criterion) {
    let field = FieldModel::UniformBz(5.0);
    let mut rng = StdRng::seed_from_u64(0xCAFE);
    let vertex = [0.1, -0.2, 4.0];
    let pairs = 1_000usize;

    c.bench_function("construct/two_body_free", |b| {
        b.iter_batched(
            || {
                (0..pairs)
                    .map(|_| {
                        (
                            make_daughter(&mut rng, vertex, 1),
                            make_daughter(&mut rng, vertex, -1),
                        )
                    })
                    .collect::<Vec<_>>()
            },
            |cases| {
                for (d1, d2) in &cases {
                    let parent =
                        VertexFit::construct(&field, vertex, &[d1, d2], None, None).unwrap();
                    black_box(parent.chi2());
                }
            },
            BatchSize::SmallInput,
        )
    });
}

/// Two-body combination with an exact mass constraint applied at the end.
fn bench_two_body_mass_constrained(c: &mut Criterion) {
    let field = FieldModel::UniformBz(5.0);
    let mut rng = StdRng::seed_from_u64(0xBEEF);
    let vertex = [0.1, -0.2, 4.0];
    let pairs = 1_000usize;

    c.bench_function("construct/two_body_mass_constrained", |b| {
        b.iter_batched(
            || {
                (0..pairs)
                    .map(|_| {
                        (
                            make_daughter(&mut rng, vertex, 1),
                            make_daughter(&mut rng, vertex, -1),
                        )
                    })
                    .collect::<Vec<_>>()
            },
            |cases| {
                for (d1, d2) in &cases {
                    let parent = VertexFit::construct(
                        &field,
                        vertex,
                        &[d1, d2],
                        None,
                        Some(MassConstraint::exact(K0_MASS)),
                    )
                    .unwrap();
                    black_box(parent.chi2());
                }
            },
            BatchSize::SmallInput,
        )
    });
}

/// Pure transport, isolated from the fit.
fn bench_transport(c: &mut Criterion) {
    let field = FieldModel::UniformBz(5.0);
    let mut rng = StdRng::seed_from_u64(0xF00D);
    let tracks = 1_000usize;

    c.bench_function("transport/uniform_bz", |b| {
        b.iter_batched(
            || {
                (0..tracks)
                    .map(|_| {
                        (
                            make_daughter(&mut rng, [0.0; 3], 1),
                            100.0 * (rng.random::<f64>() - 0.5),
                        )
                    })
                    .collect::<Vec<_>>()
            },
            |cases| {
                for (t, ds) in &cases {
                    black_box(t.transported(*ds, &field));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_two_body,
    bench_two_body_mass_constrained,
    bench_transport
);
criterion_main!(benches);
