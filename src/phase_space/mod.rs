//! Iterative 6D refinement of spatial groups.
//!
//! Each branch is re-linked in phase space with a velocity coefficient that
//! shrinks from `ini_alpha_v` towards `min_alpha_v`. Once at least two
//! components are large and dense enough they become children one level
//! deeper and are refined in turn; members left over stay with the parent.
//!
//! "Large" means `part_threshold` members for a component seen for the first
//! time. A component that was accepted at an earlier coefficient of the same
//! scan only needs `min_part_threshold`: its largest remnant at the next
//! coefficient inherits the acceptance, so a clump that sheds a few particles
//! while a second clump separates is still counted.
//!
//! The scan visits the same `alpha_v` grid as a naive loop, but grid points
//! whose link set is identical to the one just tested are skipped. They are
//! still counted in [`RefineNode::iterations`].

mod pairs;

use crate::config::HaloConfig;
use crate::geometry::{Moments, PeriodicBox};
use crate::linking::Group;
use crate::particles::Particles;
use pairs::PhaseSpacePairs;
use rayon::prelude::*;

/// Numeric knobs of the refinement, resolved for one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinerSettings {
    pub ini_alpha_v: f64,
    pub min_alpha_v: f64,
    pub alpha_v_decrement: f64,
    pub n_sub_depths: u32,
    pub sub_ratio: f64,
    pub part_threshold: usize,
    /// Size a component already accepted earlier in the scan must keep.
    pub min_part_threshold: usize,
    pub host_ovden: f64,
    /// Mean density of the eligible particles over the whole box.
    pub mean_density: f64,
    /// Spatial linking length of the host (depth 0) groups.
    pub linking_length: f64,
}

impl RefinerSettings {
    pub fn from_config(cfg: &HaloConfig, linking_length: f64, mean_density: f64) -> Self {
        Self {
            ini_alpha_v: cfg.ini_alpha_v,
            min_alpha_v: cfg.min_alpha_v,
            alpha_v_decrement: cfg.alpha_v_decrement,
            n_sub_depths: cfg.n_sub_depths,
            sub_ratio: cfg.sub_ratio,
            part_threshold: cfg.part_threshold,
            min_part_threshold: cfg.min_part_threshold,
            host_ovden: cfg.host_ovden,
            mean_density,
            linking_length,
        }
    }

    /// Upper bound on iterations spent in one branch.
    pub fn max_iterations(&self) -> usize {
        let steps = ((self.ini_alpha_v - self.min_alpha_v) / self.alpha_v_decrement).ceil();
        if steps.is_finite() && steps > 1.0 {
            steps as usize
        } else {
            1
        }
    }

    #[inline]
    pub fn alpha_at(&self, k: usize) -> f64 {
        self.ini_alpha_v - k as f64 * self.alpha_v_decrement
    }

    /// Spatial linking length used to find structure at `level`.
    pub fn linking_length_at(&self, level: u32) -> f64 {
        self.linking_length * self.sub_ratio.powf(-(level as f64) / 3.0)
    }

    /// Density a component must exceed to count as structure at `level`.
    pub fn density_threshold(&self, level: u32) -> f64 {
        self.host_ovden * self.sub_ratio.powi(level as i32) * self.mean_density
    }

    /// First grid index whose coefficient may fall below `crit`.
    ///
    /// Rounded down so a grid point sitting on `crit` is never skipped.
    fn resume_after(&self, k: usize, crit: f64) -> usize {
        let at = ((self.ini_alpha_v - crit) / self.alpha_v_decrement).floor();
        if at.is_finite() && at > k as f64 {
            at as usize
        } else {
            k + 1
        }
    }
}

/// Node of a refinement tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RefineNode {
    /// Ascending particle indices.
    pub members: Vec<usize>,
    pub depth: u32,
    /// Ordered by smallest member stable id.
    pub children: Vec<RefineNode>,
    /// Coefficient at which the branch split, or the last one scanned.
    pub alpha_v: f64,
    /// Grid points consumed, skipped ones included.
    pub iterations: usize,
    /// Grid points actually linked.
    pub passes: usize,
}

impl RefineNode {
    fn leaf(members: Vec<usize>, depth: u32, alpha_v: f64) -> Self {
        Self {
            members,
            depth,
            children: Vec::new(),
            alpha_v,
            iterations: 0,
            passes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_split(&self) -> bool {
        !self.children.is_empty()
    }

    /// Members not claimed by any child.
    pub fn n_own(&self) -> usize {
        self.members.len() - self.children.iter().map(RefineNode::len).sum::<usize>()
    }

    /// Nodes in this subtree, itself included.
    pub fn n_nodes(&self) -> usize {
        1 + self.children.iter().map(RefineNode::n_nodes).sum::<usize>()
    }
}

/// Splits spatial groups into nested phase-space substructure.
pub struct PhaseSpaceRefiner<'a> {
    particles: &'a Particles,
    bx: &'a PeriodicBox,
    settings: RefinerSettings,
}

impl<'a> PhaseSpaceRefiner<'a> {
    pub fn new(particles: &'a Particles, bx: &'a PeriodicBox, settings: RefinerSettings) -> Self {
        Self {
            particles,
            bx,
            settings,
        }
    }

    pub fn settings(&self) -> &RefinerSettings {
        &self.settings
    }

    /// Refines one host group.
    pub fn refine(&self, group: &Group) -> RefineNode {
        self.refine_branch(group.members().to_vec(), 0)
    }

    /// Refines every group in parallel, keeping input order.
    pub fn refine_all(&self, groups: &[Group]) -> Vec<RefineNode> {
        let trees: Vec<RefineNode> = groups.par_iter().map(|g| self.refine(g)).collect();
        log::debug!(
            "Phase-space refinement found {} substructure candidates in {} groups",
            trees.iter().map(|t| t.n_nodes() - 1).sum::<usize>(),
            trees.len()
        );
        trees
    }

    fn refine_branch(&self, members: Vec<usize>, depth: u32) -> RefineNode {
        let s = &self.settings;
        if depth >= s.n_sub_depths || members.len() < 2 * s.part_threshold.max(1) {
            return RefineNode::leaf(members, depth, s.ini_alpha_v);
        }
        let level = depth + 1;
        let b = s.linking_length_at(level);
        let threshold = s.density_threshold(level);
        let sigma_v = Moments::of(self.particles, self.bx, &members).sigma_v;
        let pairs = PhaseSpacePairs::build(self.particles, self.bx, &members, b, sigma_v);

        let max_iter = s.max_iterations();
        let mut k = 0;
        let mut passes = 0;
        // components accepted at the last scanned coefficient, as local indices
        let mut accepted: Vec<Vec<usize>> = Vec::new();
        while k < max_iter {
            let alpha_v = s.alpha_at(k);
            passes += 1;
            let comps = pairs.components(alpha_v);
            let carried = carried_over(&comps, &accepted, members.len());
            accepted = comps
                .into_iter()
                .zip(carried)
                .filter(|(c, carried)| {
                    c.len() >= s.part_threshold || (*carried && c.len() >= s.min_part_threshold)
                })
                .map(|(c, _)| c)
                .filter(|c| {
                    let global: Vec<usize> = c.iter().map(|&l| members[l]).collect();
                    Moments::of(self.particles, self.bx, &global).density() > threshold
                })
                .collect();

            if accepted.len() >= 2 {
                let mut found: Vec<Vec<usize>> = accepted
                    .into_iter()
                    .map(|c| c.into_iter().map(|l| members[l]).collect())
                    .collect();
                found.sort_by_cached_key(|c| c.iter().map(|&i| self.particles.id(i)).min());
                let children: Vec<RefineNode> = found
                    .into_par_iter()
                    .map(|c| self.refine_branch(c, level))
                    .collect();
                return RefineNode {
                    members,
                    depth,
                    children,
                    alpha_v,
                    iterations: k + 1,
                    passes,
                };
            }

            k = match pairs.last_change_at_or_below(alpha_v) {
                Some(crit) => s.resume_after(k, crit),
                None => max_iter,
            };
        }

        RefineNode {
            members,
            depth,
            children: Vec::new(),
            alpha_v: s.alpha_at(max_iter - 1),
            iterations: max_iter,
            passes,
        }
    }
}

/// Flags, for each component in `comps`, whether it is the largest piece of
/// one of the `accepted` components of an earlier coefficient. Ties go to the
/// piece with the smallest member. `n` is the branch size.
fn carried_over(comps: &[Vec<usize>], accepted: &[Vec<usize>], n: usize) -> Vec<bool> {
    let mut carried = vec![false; comps.len()];
    if accepted.is_empty() {
        return carried;
    }
    let mut label = vec![0; n];
    for (c, comp) in comps.iter().enumerate() {
        for &l in comp {
            label[l] = c;
        }
    }
    for prev in accepted {
        let heir = prev
            .iter()
            .map(|&l| label[l])
            .max_by(|&a, &b| comps[a].len().cmp(&comps[b].len()).then(b.cmp(&a)));
        if let Some(c) = heir {
            carried[c] = true;
        }
    }
    carried
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::{Species, SpeciesArrays};
    use proptest::prelude::*;

    fn settings(part_threshold: usize) -> RefinerSettings {
        RefinerSettings {
            ini_alpha_v: 50.0,
            min_alpha_v: 0.08,
            alpha_v_decrement: 0.005,
            n_sub_depths: 1,
            sub_ratio: 8.0,
            part_threshold,
            min_part_threshold: (part_threshold / 2).max(1),
            host_ovden: 1.0,
            mean_density: 1e-6,
            linking_length: 0.4,
        }
    }

    /// Two interleaved cubic lattices with opposite bulk velocities.
    fn counter_streaming(side: usize, spacing: f64) -> Particles {
        let mut a = SpeciesArrays::default();
        let mut id = 0;
        for (offset, v) in [(0.0, 1.0), (0.5 * spacing, -1.0)] {
            for x in 0..side {
                for y in 0..side {
                    for z in 0..side {
                        let p = [
                            50.0 + x as f64 * spacing + offset,
                            50.0 + y as f64 * spacing + offset,
                            50.0 + z as f64 * spacing + offset,
                        ];
                        a.push(id, p, [v, 0.0, 0.0], 1.0);
                        id += 1;
                    }
                }
            }
        }
        Particles::from_species([(Species::DarkMatter, a)]).unwrap()
    }

    #[test]
    fn iteration_bound() {
        let s = RefinerSettings {
            ini_alpha_v: 50.0,
            min_alpha_v: 0.5,
            alpha_v_decrement: 0.25,
            ..settings(20)
        };
        assert_eq!(s.max_iterations(), 198);
        assert_eq!(s.alpha_at(197), 0.75);
        let degenerate = RefinerSettings {
            min_alpha_v: 60.0,
            ..s
        };
        assert_eq!(degenerate.max_iterations(), 1);
        assert!((s.linking_length_at(1) - 0.2).abs() < 1e-12);
        assert!((s.density_threshold(1) - 8e-6).abs() < 1e-18);
    }

    #[test]
    fn counter_streaming_clumps_split() {
        let p = counter_streaming(5, 0.15);
        let bx = PeriodicBox::new([100.0; 3], true).unwrap();
        let group = Group::new((0..p.len()).collect(), &p);
        let node = PhaseSpaceRefiner::new(&p, &bx, settings(20)).refine(&group);

        assert_eq!(node.children.len(), 2);
        assert_eq!(node.n_own(), 0);
        assert_eq!(node.children[0].members, (0..125).collect::<Vec<_>>());
        assert_eq!(node.children[1].members, (125..250).collect::<Vec<_>>());
        // cross-stream pairs unlink just below alpha_v = 2.6304
        assert!(node.alpha_v < 2.6304 && node.alpha_v > 2.62);
        assert!(node.iterations <= settings(20).max_iterations());
        assert!(node.passes < node.iterations);
        assert!(node.children.iter().all(|c| c.depth == 1 && !c.is_split()));
    }

    /// Clump X (18 at rest plus 4 fast particles inside it) next to clump Y
    /// (20 at rest) trailed by a diffuse slow tail Z (10). X is accepted
    /// first; it loses the fast particles at alpha_v ~ 4.9 and Y sheds the
    /// tail at alpha_v ~ 0.56.
    fn shedding_clumps() -> Particles {
        let mut a = SpeciesArrays::default();
        let mut push = |p: [f64; 3], v: [f64; 3]| {
            let id = a.len() as u64;
            a.push(id, [5.0 + p[0], 5.0 + p[1], 5.0 + p[2]], v, 1.0);
        };
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..2 {
                    push([0.15 * i as f64, 0.15 * j as f64, 0.15 * k as f64], [0.0; 3]);
                }
            }
        }
        for i in 0..2 {
            for j in 0..2 {
                let p = [0.075 + 0.15 * i as f64, 0.075 + 0.15 * j as f64, 0.075];
                push(p, [1.0, 0.0, 0.0]);
            }
        }
        for i in 0..5 {
            for j in 0..2 {
                for k in 0..2 {
                    let p = [0.6 + 0.15 * i as f64, 0.15 * j as f64, 0.15 * k as f64];
                    push(p, [0.0; 3]);
                }
            }
        }
        for i in 0..10 {
            push([1.35 + 0.15 * i as f64, 0.0, 0.0], [0.0, 0.1, 0.0]);
        }
        Particles::from_species([(Species::DarkMatter, a)]).unwrap()
    }

    #[test]
    fn accepted_clump_may_shrink_to_min_part_threshold() {
        let p = shedding_clumps();
        let bx = PeriodicBox::new([20.0; 3], true).unwrap();
        let group = Group::new((0..p.len()).collect(), &p);
        // level-1 density threshold 10.4: the clumps pass, Y with its tail does not
        let s = RefinerSettings {
            mean_density: 1.3,
            min_part_threshold: 10,
            ..settings(20)
        };

        let node = PhaseSpaceRefiner::new(&p, &bx, s).refine(&group);
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].members, (0..18).collect::<Vec<_>>());
        assert_eq!(node.children[1].members, (22..42).collect::<Vec<_>>());
        assert_eq!(node.n_own(), 14);
        assert!(node.alpha_v < 0.6 && node.alpha_v > 0.5);

        let strict = RefinerSettings {
            min_part_threshold: 20,
            ..s
        };
        let node = PhaseSpaceRefiner::new(&p, &bx, strict).refine(&group);
        assert!(!node.is_split());
    }

    #[test]
    fn largest_piece_inherits_acceptance() {
        let comps = vec![vec![0, 3], vec![1, 2, 4], vec![5, 6], vec![7]];
        let accepted = vec![vec![0, 1, 2, 3, 4], vec![5, 6, 7]];
        assert_eq!(carried_over(&comps, &accepted, 8), vec![false, true, true, false]);
        // equal pieces: the one with the smallest member
        let comps = vec![vec![0, 1], vec![2, 3]];
        assert_eq!(carried_over(&comps, &[vec![0, 1, 2, 3]], 4), vec![true, false]);
        assert_eq!(carried_over(&comps, &[], 4), vec![false, false]);
    }

    #[test]
    fn cold_group_is_accepted_as_is() {
        let mut a = SpeciesArrays::default();
        for k in 0..60 {
            a.push(k, [10.0 + 0.05 * k as f64, 10.0, 10.0], [0.0; 3], 1.0);
        }
        let p = Particles::from_species([(Species::DarkMatter, a)]).unwrap();
        let bx = PeriodicBox::new([100.0; 3], true).unwrap();
        let s = settings(20);
        let node = PhaseSpaceRefiner::new(&p, &bx, s).refine(&Group::new((0..60).collect(), &p));
        assert!(!node.is_split());
        assert_eq!(node.iterations, s.max_iterations());
        assert_eq!(node.passes, 1);
    }

    #[test]
    fn small_groups_are_not_searched() {
        let p = counter_streaming(2, 0.15);
        let bx = PeriodicBox::new([100.0; 3], true).unwrap();
        let node = PhaseSpaceRefiner::new(&p, &bx, settings(20))
            .refine(&Group::new((0..p.len()).collect(), &p));
        assert_eq!(node.iterations, 0);
        assert_eq!(node.n_own(), 16);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn children_are_disjoint_subsets(
            pts in prop::collection::vec(
                ((0.0f64..2.0, 0.0f64..2.0, 0.0f64..2.0), (-1.0f64..1.0, -1.0f64..1.0)),
                20..120,
            ),
            threshold in 3usize..10,
        ) {
            let mut a = SpeciesArrays::default();
            for (k, ((x, y, z), (vx, vy))) in pts.iter().enumerate() {
                a.push(k as u64, [*x, *y, *z], [*vx, *vy, 0.0], 1.0);
            }
            let p = Particles::from_species([(Species::DarkMatter, a)]).unwrap();
            let bx = PeriodicBox::new([10.0; 3], true).unwrap();
            let s = RefinerSettings {
                n_sub_depths: 2,
                alpha_v_decrement: 0.5,
                linking_length: 0.8,
                ..settings(threshold)
            };
            let node = PhaseSpaceRefiner::new(&p, &bx, s).refine(&Group::new((0..p.len()).collect(), &p));

            fn check(n: &RefineNode, bound: usize) {
                assert!(n.iterations <= bound);
                let mut seen: Vec<usize> = Vec::new();
                for c in &n.children {
                    assert_eq!(c.depth, n.depth + 1);
                    assert!(c.members.iter().all(|m| n.members.binary_search(m).is_ok()));
                    seen.extend(&c.members);
                    check(c, bound);
                }
                let len = seen.len();
                seen.sort_unstable();
                seen.dedup();
                assert_eq!(seen.len(), len);
            }
            check(&node, s.max_iterations());
        }
    }
}
