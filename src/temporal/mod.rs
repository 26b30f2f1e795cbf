//! Progenitor/descendant links between consecutive snapshots.
//!
//! Two halos are linked when they share at least `link_threshold` particle
//! ids. Only halos whose bounding spheres (padded by `link_search_pad`)
//! overlap are compared, at any `overden_depth` on either side, so a host
//! that falls into a bigger halo keeps its history. Previous halos are bucketed by
//! the top-level cell of their centre, so each current halo only inspects the
//! cells reachable within its own radius plus the largest previous radius.

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::grid::CellGrid;
use crate::halo_error::HaloError;
use crate::halos::{Halo, HaloCatalog, HaloId};
use itertools::{EitherOrBoth, Itertools};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkRank {
    /// Best-ranked link of a halo.
    Main,
    Minor,
}

/// One ranked link as seen from one side of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalLink {
    /// The halo on the other side of the edge.
    pub halo: HaloId,
    pub shared: usize,
    pub rank: LinkRank,
}

/// An edge from a halo of snapshot t−1 to a halo of snapshot t.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub progenitor: HaloId,
    pub descendant: HaloId,
    pub shared: usize,
}

/// All edges between two catalogs, indexed from both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkGraph {
    /// Sorted by descendant, then progenitor.
    edges: Vec<LinkEdge>,
    /// Indexed by current halo id.
    progenitors: Vec<Vec<TemporalLink>>,
    /// Indexed by previous halo id.
    descendants: Vec<Vec<TemporalLink>>,
}

/// Number of values present in both ascending slices.
pub fn count_shared(a: &[u64], b: &[u64]) -> usize {
    a.iter()
        .merge_join_by(b, |x, y| x.cmp(y))
        .filter(|e| matches!(e, EitherOrBoth::Both(..)))
        .count()
}

/// Shared count descending, then mass descending, then id ascending.
fn rank_order(a: &(TemporalLink, f64), b: &(TemporalLink, f64)) -> Ordering {
    b.0.shared
        .cmp(&a.0.shared)
        .then(b.1.total_cmp(&a.1))
        .then(a.0.halo.cmp(&b.0.halo))
}

fn ranked(mut links: Vec<(TemporalLink, f64)>) -> Vec<TemporalLink> {
    links.sort_by(rank_order);
    links
        .into_iter()
        .enumerate()
        .map(|(k, (mut l, _))| {
            l.rank = if k == 0 { LinkRank::Main } else { LinkRank::Minor };
            l
        })
        .collect()
}

impl LinkGraph {
    /// Indexes `edges` from both sides and ranks them.
    pub fn from_edges(mut edges: Vec<LinkEdge>, prev: &HaloCatalog, cur: &HaloCatalog) -> Self {
        edges.sort_unstable_by_key(|e| (e.descendant, e.progenitor));
        let mass = |cat: &HaloCatalog, id: HaloId| cat.get(id).map_or(0.0, |h| h.mass);

        let mut progenitors: Vec<Vec<(TemporalLink, f64)>> = vec![Vec::new(); cur.len()];
        let mut descendants: Vec<Vec<(TemporalLink, f64)>> = vec![Vec::new(); prev.len()];
        for e in &edges {
            let link = |halo| TemporalLink {
                halo,
                shared: e.shared,
                rank: LinkRank::Minor,
            };
            progenitors[e.descendant.index()].push((link(e.progenitor), mass(prev, e.progenitor)));
            descendants[e.progenitor.index()].push((link(e.descendant), mass(cur, e.descendant)));
        }

        Self {
            edges,
            progenitors: progenitors.into_iter().map(ranked).collect(),
            descendants: descendants.into_iter().map(ranked).collect(),
        }
    }

    pub fn edges(&self) -> &[LinkEdge] {
        &self.edges
    }

    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    /// Ranked progenitors of a current halo.
    pub fn progenitors(&self, current: HaloId) -> &[TemporalLink] {
        self.progenitors
            .get(current.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ranked descendants of a previous halo.
    pub fn descendants(&self, previous: HaloId) -> &[TemporalLink] {
        self.descendants
            .get(previous.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn main_progenitor(&self, current: HaloId) -> Option<HaloId> {
        self.progenitors(current).first().map(|l| l.halo)
    }

    pub fn main_descendant(&self, previous: HaloId) -> Option<HaloId> {
        self.descendants(previous).first().map(|l| l.halo)
    }

    /// Copies the progenitor lists onto the current catalog's halos.
    pub fn attach_to(&self, current: &mut HaloCatalog) {
        for (i, links) in self.progenitors.iter().enumerate() {
            if let Some(h) = current.get_mut(HaloId(i as u32)) {
                h.progenitors.clone_from(links);
            }
        }
    }
}

impl DebugInvariants for LinkGraph {
    fn validate_invariants(&self) -> Result<(), HaloError> {
        let n_prog: usize = self.progenitors.iter().map(Vec::len).sum();
        let n_desc: usize = self.descendants.iter().map(Vec::len).sum();
        ensure(n_prog == self.edges.len() && n_desc == self.edges.len(), || {
            format!(
                "{} edges but {n_prog} progenitor and {n_desc} descendant entries",
                self.edges.len()
            )
        })?;
        for e in &self.edges {
            let fwd = self
                .progenitors(e.descendant)
                .iter()
                .any(|l| l.halo == e.progenitor && l.shared == e.shared);
            let back = self
                .descendants(e.progenitor)
                .iter()
                .any(|l| l.halo == e.descendant && l.shared == e.shared);
            ensure(fwd && back, || {
                format!("edge {} -> {} is not indexed from both sides", e.progenitor, e.descendant)
            })?;
        }
        for list in self.progenitors.iter().chain(&self.descendants) {
            for (k, l) in list.iter().enumerate() {
                ensure((l.rank == LinkRank::Main) == (k == 0), || {
                    format!("link to {} has rank {:?} at position {k}", l.halo, l.rank)
                })?;
            }
        }
        Ok(())
    }
}

/// Links the halos of one snapshot to those of the snapshot before it.
pub struct TemporalLinker<'a> {
    prev: &'a HaloCatalog,
    grid: &'a CellGrid,
    link_threshold: usize,
    search_pad: f64,
    /// Previous halo ids per top-level cell of their centre.
    buckets: Vec<Vec<HaloId>>,
    max_prev_radius: f64,
}

impl<'a> TemporalLinker<'a> {
    pub fn new(
        prev: &'a HaloCatalog,
        grid: &'a CellGrid,
        link_threshold: usize,
        search_pad: f64,
    ) -> Self {
        let mut buckets = vec![Vec::new(); grid.n_top()];
        for h in prev {
            buckets[grid.cell_index(h.com)].push(h.id);
        }
        Self {
            prev,
            grid,
            link_threshold: link_threshold.max(1),
            search_pad,
            buckets,
            max_prev_radius: prev.max_radius(),
        }
    }

    fn edges_of(&self, cur: &Halo) -> Vec<LinkEdge> {
        let bx = self.grid.periodic_box();
        let reach = cur.radius + self.max_prev_radius + self.search_pad;
        let home = self.grid.cell_index(cur.com);
        let mut edges = Vec::new();
        for c in self.grid.neighbour_cells(home, reach) {
            for &pid in &self.buckets[c] {
                let Some(prev) = self.prev.get(pid) else {
                    continue;
                };
                let touch = cur.radius + prev.radius + self.search_pad;
                if bx.dist2(cur.com, prev.com) > touch * touch {
                    continue;
                }
                let shared = count_shared(&cur.part_ids, &prev.part_ids);
                if shared >= self.link_threshold {
                    edges.push(LinkEdge {
                        progenitor: pid,
                        descendant: cur.id,
                        shared,
                    });
                }
            }
        }
        edges
    }

    /// Computes every edge into `current`.
    pub fn link(&self, current: &HaloCatalog) -> LinkGraph {
        let edges: Vec<LinkEdge> = current
            .halos()
            .par_iter()
            .flat_map_iter(|h| self.edges_of(h))
            .collect();
        let graph = LinkGraph::from_edges(edges, self.prev, current);
        graph.debug_assert_invariants();

        let with_prog = (0..current.len())
            .filter(|&i| graph.main_progenitor(HaloId(i as u32)).is_some())
            .count();
        log::info!(
            "Linked snapshot {} to {}: {} edges, {} of {} halos have a progenitor",
            current.snapshot,
            self.prev.snapshot,
            graph.n_edges(),
            with_prog,
            current.len()
        );
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::halos::{BoundState, HaloType};

    fn halo(ids: std::ops::Range<u64>, com: [f64; 3], mass: f64) -> Halo {
        Halo {
            id: HaloId(0),
            kind: HaloType::Host,
            overden_depth: 0,
            parent: None,
            first_child: None,
            next_sibling: None,
            n_children: 0,
            n_own: ids.end.saturating_sub(ids.start) as usize,
            part_ids: ids.collect(),
            mass,
            com,
            vel: [0.0; 3],
            radius: 1.0,
            density: 1.0,
            overdense: true,
            bound: BoundState::Assumed,
            real: true,
            progenitors: Vec::new(),
        }
    }

    fn catalog(snapshot: usize, halos: Vec<Halo>) -> HaloCatalog {
        let mut cat = HaloCatalog::new(snapshot);
        for h in halos {
            cat.push_subtree(vec![h]);
        }
        cat
    }

    fn grid() -> CellGrid {
        CellGrid::new([100.0; 3], [10; 3], true).unwrap()
    }

    #[test]
    fn shared_count_merges_sorted_ids() {
        assert_eq!(count_shared(&[1, 3, 5, 7], &[2, 3, 4, 7, 9]), 2);
        assert_eq!(count_shared(&[], &[1]), 0);
    }

    #[test]
    fn main_progenitor_is_largest_overlap() {
        let prev = catalog(
            5,
            vec![
                halo(0..300, [50.0; 3], 300.0),
                halo(300..340, [51.0, 50.0, 50.0], 40.0),
                halo(1000..1100, [5.0; 3], 100.0),
            ],
        );
        let cur = catalog(6, vec![halo(50..340, [50.5, 50.0, 50.0], 290.0)]);
        let g = grid();
        let graph = TemporalLinker::new(&prev, &g, 10, 0.0).link(&cur);
        graph.validate_invariants().unwrap();

        assert_eq!(graph.n_edges(), 2);
        let progs = graph.progenitors(HaloId(0));
        assert_eq!(progs[0].halo, HaloId(0));
        assert_eq!(progs[0].shared, 250);
        assert_eq!(progs[0].rank, LinkRank::Main);
        assert_eq!(progs[1].halo, HaloId(1));
        assert_eq!(progs[1].rank, LinkRank::Minor);
        assert_eq!(graph.main_descendant(HaloId(0)), Some(HaloId(0)));
        assert_eq!(graph.main_descendant(HaloId(2)), None);
    }

    #[test]
    fn distant_halos_are_not_compared() {
        let prev = catalog(0, vec![halo(0..100, [10.0; 3], 100.0)]);
        let cur = catalog(1, vec![halo(0..100, [50.0; 3], 100.0)]);
        let g = grid();
        assert_eq!(TemporalLinker::new(&prev, &g, 10, 0.0).link(&cur).n_edges(), 0);
        // a generous pad brings them into range
        assert_eq!(TemporalLinker::new(&prev, &g, 10, 70.0).link(&cur).n_edges(), 1);
    }

    #[test]
    fn absorbed_host_links_to_its_subhalo() {
        let prev = catalog(0, vec![halo(0..100, [50.0; 3], 100.0)]);

        let mut cur = HaloCatalog::new(1);
        let mut host = halo(0..300, [50.0; 3], 300.0);
        host.first_child = Some(HaloId(1));
        host.n_children = 1;
        host.n_own = 200;
        let mut sub = halo(0..100, [50.0; 3], 100.0);
        sub.id = HaloId(1);
        sub.kind = HaloType::Substructure;
        sub.overden_depth = 1;
        sub.parent = Some(HaloId(0));
        cur.push_subtree(vec![host, sub]);

        let g = grid();
        let graph = TemporalLinker::new(&prev, &g, 10, 0.0).link(&cur);
        graph.validate_invariants().unwrap();
        assert_eq!(graph.n_edges(), 2);
        assert_eq!(graph.main_progenitor(HaloId(1)), Some(HaloId(0)));
        assert_eq!(graph.progenitors(HaloId(1))[0].shared, 100);
        assert_eq!(graph.main_progenitor(HaloId(0)), Some(HaloId(0)));

        // equal overlap on both, the heavier host ranks first
        let desc = graph.descendants(HaloId(0));
        assert_eq!(desc.len(), 2);
        assert_eq!(desc[0].halo, HaloId(0));
        assert_eq!(desc[0].rank, LinkRank::Main);
        assert_eq!(desc[1].halo, HaloId(1));
        assert_eq!(desc[1].shared, 100);
    }

    #[test]
    fn ties_break_on_mass_then_id() {
        let prev = catalog(
            0,
            vec![
                halo(0..20, [50.0; 3], 20.0),
                halo(20..40, [50.0; 3], 30.0),
                halo(40..60, [50.0; 3], 30.0),
            ],
        );
        let mut cur = catalog(1, vec![halo(0..60, [50.0; 3], 60.0)]);
        let g = grid();
        let graph = TemporalLinker::new(&prev, &g, 10, 0.0).link(&cur);
        let order: Vec<HaloId> = graph.progenitors(HaloId(0)).iter().map(|l| l.halo).collect();
        assert_eq!(order, vec![HaloId(1), HaloId(2), HaloId(0)]);

        graph.attach_to(&mut cur);
        assert_eq!(cur.get(HaloId(0)).unwrap().progenitors.len(), 3);
    }
}
