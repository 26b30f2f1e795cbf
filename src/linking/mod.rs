//! Friends-of-friends grouping in configuration space.
//!
//! The [`SpatialLinker`] scans every leaf cell of a binned [`CellGrid`]
//! against the top-level cells within one linking length and unions every
//! pair closer than that length in a shared [`AtomicUnionFind`]. Leaf cells are
//! scanned in parallel; since unions are order independent and groups are
//! labelled by their smallest stable particle id, the output is the same for
//! any number of threads.

pub mod group;
pub mod union_find;

pub use group::Group;
pub use union_find::{AtomicUnionFind, DisjointSet};

use crate::geometry::PeriodicBox;
use crate::grid::CellGrid;
use crate::halo_error::HaloError;
use crate::particles::Particles;
use rayon::prelude::*;

/// Mean inter-particle separation for `n` particles filling `bx`.
pub fn mean_separation(bx: &PeriodicBox, n: usize) -> f64 {
    (bx.volume() / n as f64).cbrt()
}

/// The full partition produced by one spatial linking pass.
#[derive(Debug, Clone)]
pub struct SpatialGroups {
    /// Ordered by ascending minimum particle id.
    pub groups: Vec<Group>,
    pub linking_length: f64,
}

/// Groups that survived the size cut, plus what was thrown away.
#[derive(Debug, Clone)]
pub struct Candidates {
    pub groups: Vec<Group>,
    pub discarded_groups: usize,
    pub discarded_particles: usize,
}

impl SpatialGroups {
    /// Total particles over all groups.
    pub fn n_particles(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }

    /// Drops groups smaller than `part_threshold` (singletons included).
    pub fn into_candidates(self, part_threshold: usize) -> Candidates {
        let (groups, dropped): (Vec<Group>, Vec<Group>) = self
            .groups
            .into_iter()
            .partition(|g| g.len() >= part_threshold);
        Candidates {
            groups,
            discarded_groups: dropped.len(),
            discarded_particles: dropped.iter().map(Group::len).sum(),
        }
    }
}

/// Grid-accelerated 3D friends-of-friends.
pub struct SpatialLinker<'a> {
    grid: &'a CellGrid,
    particles: &'a Particles,
    linking_length: f64,
}

impl<'a> SpatialLinker<'a> {
    pub fn new(grid: &'a CellGrid, particles: &'a Particles, linking_length: f64) -> Self {
        Self {
            grid,
            particles,
            linking_length,
        }
    }

    /// Linking length `ll_coeff` times the mean inter-particle separation.
    pub fn with_coefficient(
        grid: &'a CellGrid,
        particles: &'a Particles,
        ll_coeff: f64,
    ) -> Result<Self, HaloError> {
        if particles.is_empty() {
            return Err(HaloError::NoEligibleParticles);
        }
        let b = ll_coeff * mean_separation(grid.periodic_box(), particles.len());
        log::debug!("Spatial linking length is {b:.5} [internal units]");
        Ok(Self::new(grid, particles, b))
    }

    pub fn linking_length(&self) -> f64 {
        self.linking_length
    }

    /// Partitions every particle into groups.
    ///
    /// # Errors
    /// `InvariantViolation` if the grid was not binned with these particles.
    pub fn link(&self) -> Result<SpatialGroups, HaloError> {
        let n = self.particles.len();
        if self.grid.n_binned() != n {
            return Err(HaloError::InvariantViolation(format!(
                "grid holds {} particles but {} are being linked",
                self.grid.n_binned(),
                n
            )));
        }
        let b = self.linking_length;
        let b2 = b * b;
        let bx = self.grid.periodic_box();
        let neighbours: Vec<Vec<usize>> = (0..self.grid.n_top())
            .into_par_iter()
            .map(|c| self.grid.neighbour_cells(c, b))
            .collect();

        let uf = AtomicUnionFind::new(n);
        self.grid.leaves().par_iter().for_each(|leaf| {
            let nbrs = &neighbours[leaf.top];
            for i in leaf.parts() {
                let pi = self.particles.pos(i);
                for &nc in nbrs {
                    for j in self.grid.cell(nc).parts() {
                        if j <= i {
                            continue;
                        }
                        if bx.dist2(pi, self.particles.pos(j)) <= b2 && uf.find(i) != uf.find(j)
                        {
                            uf.union(i, j);
                        }
                    }
                }
            }
        });

        let roots = uf.into_roots();
        let mut slot = vec![usize::MAX; n];
        let mut buckets: Vec<Vec<usize>> = Vec::new();
        for (i, &r) in roots.iter().enumerate() {
            if slot[r] == usize::MAX {
                slot[r] = buckets.len();
                buckets.push(Vec::new());
            }
            buckets[slot[r]].push(i);
        }
        let mut groups: Vec<Group> = buckets
            .into_par_iter()
            .map(|members| Group::new(members, self.particles))
            .collect();
        groups.par_sort_unstable_by_key(|g| (g.min_id(), g.members()[0]));

        log::debug!(
            "Spatial linking found {} groups ({} with more than one member)",
            groups.len(),
            groups.iter().filter(|g| g.len() > 1).count()
        );
        Ok(SpatialGroups {
            groups,
            linking_length: b,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::{Species, SpeciesArrays};

    fn setup(points: &[[f64; 3]], ids: &[u64]) -> (Particles, CellGrid) {
        let mut a = SpeciesArrays::default();
        for (p, &id) in points.iter().zip(ids) {
            a.push(id, *p, [0.0; 3], 1.0);
        }
        let p = Particles::from_species([(Species::DarkMatter, a)]).unwrap();
        let mut g = CellGrid::new([10.0; 3], [5; 3], true).unwrap();
        g.bin(&p);
        (p, g)
    }

    #[test]
    fn links_across_periodic_boundary() {
        let (p, g) = setup(
            &[[9.9, 5.0, 5.0], [0.1, 5.0, 5.0], [5.0, 5.0, 5.0]],
            &[7, 3, 1],
        );
        let out = SpatialLinker::new(&g, &p, 0.5).link().unwrap();
        assert_eq!(out.groups.len(), 2);
        // ordered by minimum particle id
        assert_eq!(out.groups[0].min_id(), 1);
        assert_eq!(out.groups[0].members(), &[2]);
        assert_eq!(out.groups[1].members(), &[0, 1]);
        assert_eq!(out.groups[1].min_id(), 3);
    }

    #[test]
    fn unwrapped_coordinates_link_to_their_nearest_image() {
        // 20.05 is two periods out and sits 0.05 from 0.1
        let (p, g) = setup(&[[0.1, 5.0, 5.0], [20.05, 5.0, 5.0]], &[0, 1]);
        let out = SpatialLinker::new(&g, &p, 0.2).link().unwrap();
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].members(), &[0, 1]);
    }

    #[test]
    fn chains_link_transitively() {
        let pts: Vec<[f64; 3]> = (0..20).map(|k| [1.0 + 0.4 * k as f64, 2.0, 2.0]).collect();
        let ids: Vec<u64> = (0..20).collect();
        let (p, g) = setup(&pts, &ids);
        let out = SpatialLinker::new(&g, &p, 0.41).link().unwrap();
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.n_particles(), 20);
        let cands = out.into_candidates(21);
        assert!(cands.groups.is_empty());
        assert_eq!(cands.discarded_particles, 20);
    }

    #[test]
    fn unbinned_grid_is_rejected() {
        let (p, _) = setup(&[[1.0; 3]], &[1]);
        let g = CellGrid::new([10.0; 3], [5; 3], true).unwrap();
        assert!(SpatialLinker::new(&g, &p, 0.5).link().is_err());
    }
}
