//! Candidate pair table for 6D linking inside one branch.
//!
//! Positions of a branch never change while `alpha_v` shrinks, so the pairs
//! that are spatial friends at the branch's linking length are found once.
//! Each pair `(i, j)` is stored with its critical coefficient
//!
//! ```text
//! alpha_c = |Δv| / (σ_v · sqrt(1 − |Δx|²/b²))
//! ```
//!
//! and is a phase-space friend at `alpha_v` exactly when `alpha_c ≤ alpha_v`.
//! With pairs sorted by `alpha_c` the link set for any `alpha_v` is a prefix.

use crate::geometry::{PeriodicBox, norm2, sub};
use crate::linking::DisjointSet;
use crate::particles::Particles;
use hashbrown::HashMap;

pub(crate) struct PhaseSpacePairs {
    n: usize,
    pairs: Vec<(u32, u32)>,
    crit: Vec<f64>,
}

/// Coefficient at and above which a spatial pair is linked in phase space.
fn critical_alpha(q: f64, dv2: f64, sigma_v: f64) -> f64 {
    if dv2 == 0.0 {
        return 0.0;
    }
    let slack = 1.0 - q;
    if slack <= 0.0 || sigma_v <= 0.0 {
        return f64::INFINITY;
    }
    (dv2 / (sigma_v * sigma_v * slack)).sqrt()
}

impl PhaseSpacePairs {
    /// `members` are particle indices; pair entries refer to positions in it.
    pub(crate) fn build(
        particles: &Particles,
        bx: &PeriodicBox,
        members: &[usize],
        b: f64,
        sigma_v: f64,
    ) -> Self {
        let n = members.len();
        let Some(&first) = members.first() else {
            return Self {
                n,
                pairs: Vec::new(),
                crit: Vec::new(),
            };
        };
        let reference = particles.pos(first);
        let pos: Vec<[f64; 3]> = members
            .iter()
            .map(|&i| bx.unwrap_about(reference, particles.pos(i)))
            .collect();
        let inv_b = 1.0 / b;
        let key = |p: [f64; 3]| -> [i64; 3] {
            std::array::from_fn(|k| (p[k] * inv_b).floor() as i64)
        };

        let mut buckets: HashMap<[i64; 3], Vec<u32>> = HashMap::new();
        for (l, p) in pos.iter().enumerate() {
            buckets.entry(key(*p)).or_default().push(l as u32);
        }

        let b2 = b * b;
        let mut found: Vec<(f64, u32, u32)> = Vec::new();
        for (i, pi) in pos.iter().enumerate() {
            let ki = key(*pi);
            let vi = particles.vel(members[i]);
            for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        let Some(bucket) = buckets.get(&[ki[0] + dx, ki[1] + dy, ki[2] + dz])
                        else {
                            continue;
                        };
                        for &j in bucket {
                            let j = j as usize;
                            if j <= i {
                                continue;
                            }
                            let d2 = norm2(sub(pos[j], *pi));
                            if d2 > b2 {
                                continue;
                            }
                            let dv2 = norm2(sub(particles.vel(members[j]), vi));
                            let c = critical_alpha(d2 / b2, dv2, sigma_v);
                            if c.is_finite() {
                                found.push((c, i as u32, j as u32));
                            }
                        }
                    }
                }
            }
        }
        found.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        Self {
            n,
            pairs: found.iter().map(|&(_, i, j)| (i, j)).collect(),
            crit: found.into_iter().map(|(c, _, _)| c).collect(),
        }
    }

    #[inline]
    fn n_linked(&self, alpha_v: f64) -> usize {
        self.crit.partition_point(|&c| c <= alpha_v)
    }

    /// Connected components at `alpha_v`, as ascending local indices ordered
    /// by smallest member.
    pub(crate) fn components(&self, alpha_v: f64) -> Vec<Vec<usize>> {
        let mut ds = DisjointSet::new(self.n);
        for &(i, j) in &self.pairs[..self.n_linked(alpha_v)] {
            ds.union(i as usize, j as usize);
        }
        ds.sets()
    }

    /// The largest critical coefficient still linked at `alpha_v`: the link
    /// set stays the same for every coefficient in `[c, alpha_v]`.
    pub(crate) fn last_change_at_or_below(&self, alpha_v: f64) -> Option<f64> {
        match self.n_linked(alpha_v) {
            0 => None,
            k => Some(self.crit[k - 1]),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pairs.len()
    }
}
