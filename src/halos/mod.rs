//! Halo catalog: an arena of host and substructure halos for one snapshot.
//!
//! Halos are stored in pre-order (each root followed by its subtree) and
//! addressed by [`HaloId`], a dense index into the arena. Tree links are
//! `Option<HaloId>` so the catalog is plain data and serializes as-is.

pub mod boundedness;
pub mod builder;

pub use boundedness::{AssumeBound, BoundednessOracle, HaloCandidate, VirialEnergyTest};
pub use builder::{BuilderSettings, HaloHierarchyBuilder};

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::halo_error::HaloError;
use crate::temporal::TemporalLink;
use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense index of a halo inside its [`HaloCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HaloId(pub u32);

impl HaloId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn offset(self, by: u32) -> Self {
        HaloId(self.0 + by)
    }
}

impl fmt::Display for HaloId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaloType {
    Host,
    Substructure,
}

/// Kinetic and gravitational energy of a halo in its centre-of-momentum frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyBudget {
    pub kinetic: f64,
    /// Negative for any non-empty halo.
    pub potential: f64,
}

impl EnergyBudget {
    pub fn total(&self) -> f64 {
        self.kinetic + self.potential
    }

    pub fn is_bound(&self) -> bool {
        self.total() < 0.0
    }
}

/// Verdict of a [`BoundednessOracle`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoundState {
    /// Accepted without an energy test.
    Assumed,
    Bound(EnergyBudget),
    Unbound(EnergyBudget),
}

impl BoundState {
    pub fn from_energy(energy: EnergyBudget) -> Self {
        if energy.is_bound() {
            BoundState::Bound(energy)
        } else {
            BoundState::Unbound(energy)
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, BoundState::Unbound(_))
    }

    pub fn energy(&self) -> Option<EnergyBudget> {
        match *self {
            BoundState::Assumed => None,
            BoundState::Bound(e) | BoundState::Unbound(e) => Some(e),
        }
    }
}

/// One host or substructure halo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Halo {
    pub id: HaloId,
    pub kind: HaloType,
    /// 0 for hosts, nesting level for substructure.
    pub overden_depth: u32,
    pub parent: Option<HaloId>,
    pub first_child: Option<HaloId>,
    pub next_sibling: Option<HaloId>,
    pub n_children: usize,
    /// Stable ids of every member, ascending.
    pub part_ids: Vec<u64>,
    /// Members not claimed by any child.
    pub n_own: usize,
    pub mass: f64,
    pub com: [f64; 3],
    pub vel: [f64; 3],
    pub radius: f64,
    pub density: f64,
    pub overdense: bool,
    pub bound: BoundState,
    pub real: bool,
    /// Filled in by temporal linking, best progenitor first.
    pub progenitors: Vec<TemporalLink>,
}

impl Halo {
    pub fn n_part(&self) -> usize {
        self.part_ids.len()
    }

    pub fn is_host(&self) -> bool {
        self.kind == HaloType::Host
    }

    fn shift(&mut self, by: u32) {
        self.id = self.id.offset(by);
        for link in [&mut self.parent, &mut self.first_child, &mut self.next_sibling] {
            if let Some(h) = link.as_mut() {
                *h = h.offset(by);
            }
        }
    }
}

/// All halos found in one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HaloCatalog {
    pub snapshot: usize,
    halos: Vec<Halo>,
    roots: Vec<HaloId>,
}

impl HaloCatalog {
    pub fn new(snapshot: usize) -> Self {
        Self {
            snapshot,
            ..Default::default()
        }
    }

    /// Appends a pre-ordered subtree whose ids are local (its root is 0).
    pub(crate) fn push_subtree(&mut self, mut subtree: Vec<Halo>) {
        let base = self.halos.len() as u32;
        if subtree.is_empty() {
            return;
        }
        for h in &mut subtree {
            h.shift(base);
        }
        self.roots.push(HaloId(base));
        self.halos.extend(subtree);
    }

    pub fn len(&self) -> usize {
        self.halos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.halos.is_empty()
    }

    pub fn get(&self, id: HaloId) -> Option<&Halo> {
        self.halos.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: HaloId) -> Option<&mut Halo> {
        self.halos.get_mut(id.index())
    }

    pub fn halos(&self) -> &[Halo] {
        &self.halos
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Halo> {
        self.halos.iter()
    }

    /// Host halos in discovery order.
    pub fn roots(&self) -> &[HaloId] {
        &self.roots
    }

    pub fn n_hosts(&self) -> usize {
        self.roots.len()
    }

    pub fn n_substructure(&self) -> usize {
        self.halos.len() - self.roots.len()
    }

    /// Direct children of `id`, in split order.
    pub fn children(&self, id: HaloId) -> Children<'_> {
        Children {
            catalog: self,
            next: self.get(id).and_then(|h| h.first_child),
        }
    }

    /// Largest halo radius in the catalog.
    pub fn max_radius(&self) -> f64 {
        self.halos.iter().map(|h| h.radius).fold(0.0, f64::max)
    }
}

impl<'a> IntoIterator for &'a HaloCatalog {
    type Item = &'a Halo;
    type IntoIter = std::slice::Iter<'a, Halo>;

    fn into_iter(self) -> Self::IntoIter {
        self.halos.iter()
    }
}

/// Iterator over the children of one halo.
pub struct Children<'a> {
    catalog: &'a HaloCatalog,
    next: Option<HaloId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a Halo;

    fn next(&mut self) -> Option<Self::Item> {
        let h = self.catalog.get(self.next?)?;
        self.next = h.next_sibling;
        Some(h)
    }
}

fn is_subset(small: &[u64], big: &[u64]) -> bool {
    small
        .iter()
        .merge_join_by(big, |a, b| a.cmp(b))
        .all(|e| !matches!(e, EitherOrBoth::Left(_)))
}

impl DebugInvariants for HaloCatalog {
    fn validate_invariants(&self) -> Result<(), HaloError> {
        for (i, h) in self.halos.iter().enumerate() {
            ensure(h.id.index() == i, || format!("halo at {i} carries id {}", h.id))?;
            ensure(h.part_ids.windows(2).all(|w| w[0] < w[1]), || {
                format!("halo {} ids are not strictly ascending", h.id)
            })?;
            ensure(h.is_host() == h.parent.is_none(), || {
                format!("halo {} type disagrees with its parent link", h.id)
            })?;

            let mut n_children = 0;
            let mut claimed = 0;
            for c in self.children(h.id) {
                n_children += 1;
                claimed += c.n_part();
                ensure(c.parent == Some(h.id), || {
                    format!("child {} does not point back at {}", c.id, h.id)
                })?;
                ensure(c.overden_depth == h.overden_depth + 1, || {
                    format!("child {} is not one level below {}", c.id, h.id)
                })?;
                ensure(is_subset(&c.part_ids, &h.part_ids), || {
                    format!("child {} holds particles outside {}", c.id, h.id)
                })?;
            }
            ensure(n_children == h.n_children, || {
                format!("halo {} lists {} children, found {n_children}", h.id, h.n_children)
            })?;
            ensure(claimed + h.n_own == h.n_part(), || {
                format!(
                    "halo {}: children hold {claimed} + own {} != {}",
                    h.id,
                    h.n_own,
                    h.n_part()
                )
            })?;
        }
        for r in &self.roots {
            ensure(self.get(*r).is_some_and(Halo::is_host), || {
                format!("root {r} is not a host halo")
            })?;
        }
        Ok(())
    }
}

static_assertions::assert_impl_all!(HaloCatalog: Send, Sync);
