//! Snapshot input contract.

use super::{N_SPECIES, Species, SpeciesArrays};
use crate::halo_error::HaloError;

/// Everything the core needs from one simulation snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotData {
    pub box_size: [f64; 3],
    pub periodic: bool,
    /// Per-species arrays; species absent from the snapshot are simply missing.
    pub species: Vec<(Species, SpeciesArrays)>,
}

impl SnapshotData {
    pub fn new(box_size: [f64; 3], periodic: bool) -> Self {
        Self {
            box_size,
            periodic,
            species: Vec::new(),
        }
    }

    /// Builder-style species insertion.
    pub fn with_species(mut self, species: Species, arrays: SpeciesArrays) -> Self {
        self.species.push((species, arrays));
        self
    }

    /// Particle counts per species as stored in the snapshot.
    pub fn npart_type(&self) -> [usize; N_SPECIES] {
        let mut n = [0; N_SPECIES];
        for (s, a) in &self.species {
            n[s.index()] += a.len();
        }
        n
    }
}

/// Supplies snapshots to the engine, one at a time.
pub trait SnapshotLoader {
    /// How many snapshots the run covers.
    fn snapshot_count(&self) -> usize;

    /// Loads snapshot `index` (0-based, in time order).
    fn load(&mut self, index: usize) -> Result<SnapshotData, HaloError>;
}

/// Pre-loaded snapshots, mostly useful for tests and small runs.
impl SnapshotLoader for Vec<SnapshotData> {
    fn snapshot_count(&self) -> usize {
        self.len()
    }

    fn load(&mut self, index: usize) -> Result<SnapshotData, HaloError> {
        self.get(index)
            .cloned()
            .ok_or_else(|| HaloError::Loader(format!("no snapshot with index {index}")))
    }
}
