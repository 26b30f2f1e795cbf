//! Particle storage.
//!
//! Particles are kept structure-of-arrays. A snapshot supplies one
//! [`SpeciesArrays`] per species; the [`Particles`] store concatenates the
//! flagged species so that each species occupies one contiguous index range.
//! Every later stage addresses particles by their index into this store and
//! never mutates it.

pub mod snapshot;

pub use snapshot::{SnapshotData, SnapshotLoader};

use crate::halo_error::HaloError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Number of particle species understood by the finder.
pub const N_SPECIES: usize = 4;

/// Particle species (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Species {
    Gas,
    DarkMatter,
    Star,
    BlackHole,
}

impl Species {
    pub const ALL: [Species; N_SPECIES] = [
        Species::Gas,
        Species::DarkMatter,
        Species::Star,
        Species::BlackHole,
    ];

    /// Dense index in `0..N_SPECIES`.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Species::Gas => 0,
            Species::DarkMatter => 1,
            Species::Star => 2,
            Species::BlackHole => 3,
        }
    }

    /// SWIFT `PartTypeN` number, used in parameter keys.
    pub const fn part_type(self) -> u8 {
        match self {
            Species::Gas => 0,
            Species::DarkMatter => 1,
            Species::Star => 4,
            Species::BlackHole => 5,
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Species::Gas => "gas",
            Species::DarkMatter => "dark matter",
            Species::Star => "stars",
            Species::BlackHole => "black holes",
        };
        f.write_str(s)
    }
}

/// Raw arrays for one species as delivered by a snapshot loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeciesArrays {
    pub ids: Vec<u64>,
    pub pos: Vec<[f64; 3]>,
    pub vel: Vec<[f64; 3]>,
    pub mass: Vec<f64>,
}

impl SpeciesArrays {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            ids: Vec::with_capacity(n),
            pos: Vec::with_capacity(n),
            vel: Vec::with_capacity(n),
            mass: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, id: u64, pos: [f64; 3], vel: [f64; 3], mass: f64) {
        self.ids.push(id);
        self.pos.push(pos);
        self.vel.push(vel);
        self.mass.push(mass);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Checks that every per-particle array has the same length.
    pub fn validate(&self, species: Species) -> Result<(), HaloError> {
        let expected = self.ids.len();
        let fields = [
            ("pos", self.pos.len()),
            ("vel", self.vel.len()),
            ("mass", self.mass.len()),
        ];
        for (field, found) in fields {
            if found != expected {
                return Err(HaloError::ArrayLengthMismatch {
                    species: species.to_string(),
                    field,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Flattened particle store for one snapshot.
#[derive(Debug, Clone, Default)]
pub struct Particles {
    ids: Vec<u64>,
    pos: Vec<[f64; 3]>,
    vel: Vec<[f64; 3]>,
    mass: Vec<f64>,
    ranges: [Range<usize>; N_SPECIES],
}

impl Particles {
    /// Concatenates the given species in [`Species::ALL`] order. Species that
    /// are absent get an empty range.
    pub fn from_species<I>(arrays: I) -> Result<Self, HaloError>
    where
        I: IntoIterator<Item = (Species, SpeciesArrays)>,
    {
        let mut by_species: [Option<SpeciesArrays>; N_SPECIES] = Default::default();
        for (species, arr) in arrays {
            arr.validate(species)?;
            let slot = &mut by_species[species.index()];
            if let Some(existing) = slot.as_mut() {
                existing.ids.extend(arr.ids);
                existing.pos.extend(arr.pos);
                existing.vel.extend(arr.vel);
                existing.mass.extend(arr.mass);
            } else {
                *slot = Some(arr);
            }
        }

        let total: usize = by_species.iter().flatten().map(SpeciesArrays::len).sum();
        let mut out = Particles {
            ids: Vec::with_capacity(total),
            pos: Vec::with_capacity(total),
            vel: Vec::with_capacity(total),
            mass: Vec::with_capacity(total),
            ranges: Default::default(),
        };
        for species in Species::ALL {
            let start = out.ids.len();
            if let Some(arr) = by_species[species.index()].take() {
                out.ids.extend(arr.ids);
                out.pos.extend(arr.pos);
                out.vel.extend(arr.vel);
                out.mass.extend(arr.mass);
            }
            out.ranges[species.index()] = start..out.ids.len();
        }
        Ok(out)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[inline]
    pub fn id(&self, i: usize) -> u64 {
        self.ids[i]
    }

    #[inline]
    pub fn pos(&self, i: usize) -> [f64; 3] {
        self.pos[i]
    }

    #[inline]
    pub fn vel(&self, i: usize) -> [f64; 3] {
        self.vel[i]
    }

    #[inline]
    pub fn mass(&self, i: usize) -> f64 {
        self.mass[i]
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.pos
    }

    pub fn velocities(&self) -> &[[f64; 3]] {
        &self.vel
    }

    pub fn masses(&self) -> &[f64] {
        &self.mass
    }

    /// Index range occupied by `species`.
    pub fn species_range(&self, species: Species) -> Range<usize> {
        self.ranges[species.index()].clone()
    }

    /// Species of the particle at index `i`.
    pub fn species_of(&self, i: usize) -> Species {
        Species::ALL
            .into_iter()
            .find(|s| self.ranges[s.index()].contains(&i))
            .unwrap_or(Species::DarkMatter)
    }

    /// Per-species particle counts, indexed by [`Species::index`].
    pub fn counts(&self) -> [usize; N_SPECIES] {
        std::array::from_fn(|k| self.ranges[k].len())
    }

    pub fn total_mass(&self) -> f64 {
        self.mass.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrays(ids: &[u64]) -> SpeciesArrays {
        let mut a = SpeciesArrays::with_capacity(ids.len());
        for &id in ids {
            a.push(id, [id as f64; 3], [0.0; 3], 1.0);
        }
        a
    }

    #[test]
    fn species_are_contiguous_in_canonical_order() {
        let p = Particles::from_species([
            (Species::Star, arrays(&[40, 41])),
            (Species::DarkMatter, arrays(&[10, 11, 12])),
        ])
        .unwrap();
        assert_eq!(p.len(), 5);
        assert_eq!(p.species_range(Species::Gas), 0..0);
        assert_eq!(p.species_range(Species::DarkMatter), 0..3);
        assert_eq!(p.species_range(Species::Star), 3..5);
        assert_eq!(p.id(3), 40);
        assert_eq!(p.species_of(4), Species::Star);
        assert_eq!(p.counts(), [0, 3, 2, 0]);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let mut a = arrays(&[1, 2, 3]);
        a.mass.pop();
        let err = Particles::from_species([(Species::Gas, a)]).unwrap_err();
        assert!(matches!(
            err,
            HaloError::ArrayLengthMismatch { field: "mass", expected: 3, found: 2, .. }
        ));
    }
}
