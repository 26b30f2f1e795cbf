use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mega_halos::prelude::*;

const BOX: f64 = 100.0;

/// Half the particles uniform, half in a few dense clumps.
fn particles(n: usize, seed: u64) -> Particles {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut arr = SpeciesArrays::with_capacity(n);
    let centres: Vec<[f64; 3]> = (0..8)
        .map(|_| std::array::from_fn(|_| rng.gen_range(0.0..BOX)))
        .collect();
    for i in 0..n {
        let pos = if i % 2 == 0 {
            std::array::from_fn(|_| rng.gen_range(0.0..BOX))
        } else {
            let c = centres[i % centres.len()];
            std::array::from_fn(|k| (c[k] + rng.gen_range(-1.5..1.5)).rem_euclid(BOX))
        };
        let vel = std::array::from_fn(|_| rng.gen_range(-1.0..1.0));
        arr.push(i as u64, pos, vel, 1.0);
    }
    Particles::from_species([(Species::DarkMatter, arr)]).unwrap()
}

fn bench_spatial_linking(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial_linking");
    for &(n, policy) in &[
        (10_000, SubcellPolicy::Disabled),
        (50_000, SubcellPolicy::Disabled),
        (
            50_000,
            SubcellPolicy::LoadThreshold {
                max_load: 64,
                max_depth: 3,
            },
        ),
    ] {
        let parts = particles(n, 42);
        let mut grid = CellGrid::new([BOX; 3], [16; 3], true)
            .unwrap()
            .with_policy(policy);
        grid.bin(&parts);
        let label = format!("{n}/{policy:?}");
        group.bench_with_input(BenchmarkId::from_parameter(label), &parts, |b, parts| {
            b.iter(|| {
                SpatialLinker::with_coefficient(&grid, parts, 0.2)
                    .unwrap()
                    .link()
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_spatial_linking);
criterion_main!(benches);
