//! A single cell of the grid.

use crate::particles::{N_SPECIES, Species};

/// Axis-aligned box holding views (indices) into the particle store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    /// Lower corner.
    pub loc: [f64; 3],
    pub width: [f64; 3],
    /// 0 for top-level cells.
    pub depth: u8,
    /// Index of the top-level cell this cell descends from (itself at depth 0).
    pub top: usize,
    parts: [Vec<usize>; N_SPECIES],
    /// Indices of the eight octants in the sub-cell pool.
    progeny: Option<[usize; 8]>,
}

impl Cell {
    pub(crate) fn new(loc: [f64; 3], width: [f64; 3], depth: u8, top: usize) -> Self {
        Self {
            loc,
            width,
            depth,
            top,
            parts: Default::default(),
            progeny: None,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, species: Species, i: usize) {
        self.parts[species.index()].push(i);
    }

    pub(crate) fn clear(&mut self) {
        for p in &mut self.parts {
            p.clear();
        }
        self.progeny = None;
    }

    pub(crate) fn set_progeny(&mut self, progeny: [usize; 8]) {
        self.progeny = Some(progeny);
    }

    /// Particle indices of one species, ascending.
    pub fn species_parts(&self, species: Species) -> &[usize] {
        &self.parts[species.index()]
    }

    /// All particle indices, ascending within each species.
    pub fn parts(&self) -> impl Iterator<Item = usize> + '_ {
        self.parts.iter().flat_map(|p| p.iter().copied())
    }

    pub fn count(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }

    pub fn is_split(&self) -> bool {
        self.progeny.is_some()
    }

    pub fn progeny(&self) -> Option<&[usize; 8]> {
        self.progeny.as_ref()
    }

    /// Midpoint of the cell.
    pub fn centre(&self) -> [f64; 3] {
        std::array::from_fn(|k| self.loc[k] + 0.5 * self.width[k])
    }
}
