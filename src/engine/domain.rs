//! Per-snapshot particle domain.

use crate::config::HaloConfig;
use crate::geometry::PeriodicBox;
use crate::grid::CellGrid;
use crate::halo_error::HaloError;
use crate::particles::{N_SPECIES, Particles, SnapshotData, Species};

/// Eligible particles of one snapshot and the grid they are binned into.
///
/// Rebuilt from scratch for every snapshot; nothing in here outlives it.
#[derive(Debug)]
pub struct Domain {
    particles: Particles,
    grid: CellGrid,
    mean_density: f64,
}

impl Domain {
    /// Keeps the species flagged in `cfg` and prepares an empty grid.
    ///
    /// # Errors
    /// `NoEligibleParticles` if the flagged species are empty, plus anything
    /// raised while validating the arrays or the grid geometry.
    pub fn new(cfg: &HaloConfig, snapshot: SnapshotData) -> Result<Self, HaloError> {
        let npart = snapshot.npart_type();
        for species in Species::ALL {
            let n = npart[species.index()];
            if n > 0 && !cfg.part_flags[species.index()] {
                log::debug!("Ignoring {n} {species} particles");
            }
        }

        let SnapshotData {
            box_size,
            periodic,
            species,
        } = snapshot;
        let particles = Particles::from_species(
            species
                .into_iter()
                .filter(|(s, _)| cfg.part_flags[s.index()]),
        )?;
        if particles.is_empty() {
            return Err(HaloError::NoEligibleParticles);
        }

        let grid = CellGrid::new(box_size, cfg.cell_grid_dim, periodic)?
            .with_policy(cfg.subcell_policy);
        let mean_density = particles.total_mass() / grid.periodic_box().volume();

        for species in cfg.enabled_species() {
            log::info!(
                "Found {} {species} particles",
                particles.species_range(species).len()
            );
        }
        log::info!("Total number of eligible particles is {}", particles.len());
        Ok(Self {
            particles,
            grid,
            mean_density,
        })
    }

    /// Bins every particle into the grid.
    pub fn bin(&mut self) {
        self.grid.bin(&self.particles);
    }

    pub fn particles(&self) -> &Particles {
        &self.particles
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn periodic_box(&self) -> &PeriodicBox {
        self.grid.periodic_box()
    }

    /// Total eligible mass over the box volume.
    pub fn mean_density(&self) -> f64 {
        self.mean_density
    }

    pub fn counts(&self) -> [usize; N_SPECIES] {
        self.particles.counts()
    }
}
