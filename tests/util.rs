#![allow(dead_code)]
use mega_halos::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Configuration with the required softenings filled in.
pub fn config() -> HaloConfig {
    HaloConfig {
        comoving_dm_softening: 0.01,
        max_physical_dm_softening: 0.005,
        ..HaloConfig::default()
    }
}

/// Parameter map carrying only the required keys.
pub fn required_params() -> ParamMap {
    ParamMap::new()
        .with("Gravity/comoving_DM_softening", 0.01)
        .with("Gravity/max_physical_DM_softening", 0.005)
}

/// `n` unit-mass particles uniform in `[0, size)³`, at rest, with ids from
/// `first_id`. Points closer than `keep_out.1` to `keep_out.0` are redrawn.
pub fn uniform(
    n: usize,
    size: f64,
    first_id: u64,
    seed: u64,
    keep_out: Option<([f64; 3], f64)>,
) -> SpeciesArrays {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut a = SpeciesArrays::with_capacity(n);
    while a.len() < n {
        let p: [f64; 3] = std::array::from_fn(|_| rng.gen_range(0.0..size));
        if let Some((c, r)) = keep_out {
            let d2: f64 = (0..3).map(|k| (p[k] - c[k]).powi(2)).sum();
            if d2 < r * r {
                continue;
            }
        }
        a.push(first_id + a.len() as u64, p, [0.0; 3], 1.0);
    }
    a
}

/// Unit-mass particles uniform inside a sphere, with small random velocities
/// about `bulk`.
pub fn clump(
    ids: impl IntoIterator<Item = u64>,
    centre: [f64; 3],
    radius: f64,
    bulk: [f64; 3],
    seed: u64,
) -> SpeciesArrays {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut a = SpeciesArrays::default();
    for id in ids {
        let off = loop {
            let d: [f64; 3] = std::array::from_fn(|_| rng.gen_range(-radius..radius));
            if d.iter().map(|x| x * x).sum::<f64>() <= radius * radius {
                break d;
            }
        };
        let pos = std::array::from_fn(|k| centre[k] + off[k]);
        let vel = std::array::from_fn(|k| bulk[k] + rng.gen_range(-0.01..0.01));
        a.push(id, pos, vel, 1.0);
    }
    a
}

/// Two interleaved cubic lattices of `nx·ny·nz` particles each, streaming
/// through each other along x with speeds `±speed`.
pub fn counter_streams(
    dims: [usize; 3],
    origin: [f64; 3],
    spacing: f64,
    speed: f64,
) -> SpeciesArrays {
    let mut a = SpeciesArrays::default();
    let mut id = 0;
    for (shift, v) in [(0.0, speed), (0.5 * spacing, -speed)] {
        for i in 0..dims[0] {
            for j in 0..dims[1] {
                for k in 0..dims[2] {
                    let pos = [
                        origin[0] + i as f64 * spacing + shift,
                        origin[1] + j as f64 * spacing + shift,
                        origin[2] + k as f64 * spacing + shift,
                    ];
                    a.push(id, pos, [v, 0.0, 0.0], 1.0);
                    id += 1;
                }
            }
        }
    }
    a
}

/// Concatenates several particle sets into one.
pub fn merge(parts: impl IntoIterator<Item = SpeciesArrays>) -> SpeciesArrays {
    let mut out = SpeciesArrays::default();
    for p in parts {
        out.ids.extend(p.ids);
        out.pos.extend(p.pos);
        out.vel.extend(p.vel);
        out.mass.extend(p.mass);
    }
    out
}

/// Periodic dark-matter-only snapshot; positions are wrapped into the box.
pub fn dm_snapshot(size: f64, mut arrays: SpeciesArrays) -> SnapshotData {
    for p in &mut arrays.pos {
        for x in p.iter_mut() {
            *x = x.rem_euclid(size);
        }
    }
    SnapshotData::new([size; 3], true).with_species(Species::DarkMatter, arrays)
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
