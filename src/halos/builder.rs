//! Assembly of refinement trees into a [`HaloCatalog`].

use super::{
    AssumeBound, BoundednessOracle, Halo, HaloCandidate, HaloCatalog, HaloId, HaloType,
};
use crate::config::HaloConfig;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{Moments, PeriodicBox};
use crate::phase_space::RefineNode;
use crate::particles::Particles;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Acceptance thresholds applied while building.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuilderSettings {
    /// Minimum size of a host halo.
    pub part_threshold: usize,
    /// Minimum size of a substructure halo.
    pub min_part_threshold: usize,
    pub host_ovden: f64,
    pub mean_density: f64,
    pub remove_not_real_halos: bool,
}

impl BuilderSettings {
    pub fn from_config(cfg: &HaloConfig, mean_density: f64) -> Self {
        Self {
            part_threshold: cfg.part_threshold,
            min_part_threshold: cfg.min_part_threshold,
            host_ovden: cfg.host_ovden,
            mean_density,
            remove_not_real_halos: cfg.remove_not_real_halos,
        }
    }

    fn size_threshold(&self, depth: u32) -> usize {
        if depth == 0 {
            self.part_threshold
        } else {
            self.min_part_threshold
        }
    }
}

/// Turns refinement trees into halos, measuring and filtering each node.
pub struct HaloHierarchyBuilder<'a> {
    particles: &'a Particles,
    bx: &'a PeriodicBox,
    settings: BuilderSettings,
    oracle: &'a dyn BoundednessOracle,
    dropped: AtomicUsize,
}

impl<'a> HaloHierarchyBuilder<'a> {
    pub fn new(particles: &'a Particles, bx: &'a PeriodicBox, settings: BuilderSettings) -> Self {
        Self {
            particles,
            bx,
            settings,
            oracle: &AssumeBound,
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn with_oracle(mut self, oracle: &'a dyn BoundednessOracle) -> Self {
        self.oracle = oracle;
        self
    }

    /// Builds the catalog for `snapshot`. Roots keep the order of `trees`.
    pub fn build(&self, snapshot: usize, trees: &[RefineNode]) -> HaloCatalog {
        self.dropped.store(0, Ordering::Relaxed);
        let subtrees: Vec<Vec<Halo>> = trees
            .par_iter()
            .map(|t| self.assemble(t).unwrap_or_default())
            .collect();

        let mut catalog = HaloCatalog::new(snapshot);
        for subtree in subtrees {
            catalog.push_subtree(subtree);
        }
        catalog.debug_assert_invariants();

        log::info!(
            "Snapshot {snapshot}: {} halos ({} hosts, {} substructure)",
            catalog.len(),
            catalog.n_hosts(),
            catalog.n_substructure()
        );
        log::debug!(
            "{} candidates were dropped as undersized or not real",
            self.dropped.load(Ordering::Relaxed)
        );
        catalog
    }

    /// Pre-ordered halos of one subtree with ids local to it, or `None` when
    /// the node itself is rejected.
    ///
    /// A rejected node takes its whole subtree along, real descendants
    /// included, and all of its particles fall back to the parent's own pool.
    /// Descendants are never promoted a level up, since `overden_depth`
    /// records the level a halo was found at. Keep such halos by turning off
    /// `remove_not_real_halos`; they are then flagged with `real == false`.
    fn assemble(&self, node: &RefineNode) -> Option<Vec<Halo>> {
        let s = &self.settings;
        let depth = node.depth;
        if node.len() < s.size_threshold(depth) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let moments = Moments::of(self.particles, self.bx, &node.members);
        let density = moments.density();
        let overdense = depth > 0 || density >= s.host_ovden * s.mean_density;
        let bound = self.oracle.assess(&HaloCandidate {
            particles: self.particles,
            bx: self.bx,
            members: &node.members,
            depth,
            moments,
        });
        let real = bound.is_bound() && overdense;
        if !real && s.remove_not_real_halos {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let children: Vec<Vec<Halo>> = node
            .children
            .par_iter()
            .filter_map(|c| self.assemble(c))
            .collect();

        let mut part_ids: Vec<u64> = node.members.iter().map(|&i| self.particles.id(i)).collect();
        part_ids.sort_unstable();
        let claimed: usize = children.iter().map(|c| c[0].n_part()).sum();

        let mut out = vec![Halo {
            id: HaloId(0),
            kind: if depth == 0 {
                HaloType::Host
            } else {
                HaloType::Substructure
            },
            overden_depth: depth,
            parent: None,
            first_child: None,
            next_sibling: None,
            n_children: children.len(),
            n_own: part_ids.len() - claimed,
            part_ids,
            mass: moments.mass,
            com: moments.com,
            vel: moments.vel,
            radius: moments.radius,
            density,
            overdense,
            bound,
            real,
            progenitors: Vec::new(),
        }];

        let mut prev_child: Option<usize> = None;
        for mut child in children {
            let base = out.len() as u32;
            for h in &mut child {
                h.shift(base);
            }
            child[0].parent = Some(HaloId(0));
            match prev_child {
                Some(p) => out[p].next_sibling = Some(HaloId(base)),
                None => out[0].first_child = Some(HaloId(base)),
            }
            prev_child = Some(base as usize);
            out.extend(child);
        }
        Some(out)
    }
}
