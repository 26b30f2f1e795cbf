#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mega-halos
//!
//! mega-halos finds dark-matter halos and their nested substructure in
//! cosmological N-body snapshots and links the halos of consecutive snapshots
//! into a merger graph. Each snapshot runs through a fixed pipeline:
//!
//! 1. [`engine::Domain`] keeps the particle species enabled in the
//!    configuration and bins them into a [`grid::CellGrid`].
//! 2. [`linking::SpatialLinker`] groups particles with a grid-accelerated
//!    friends-of-friends pass.
//! 3. [`phase_space::PhaseSpaceRefiner`] re-links each group in 6D with a
//!    shrinking velocity coefficient to expose substructure.
//! 4. [`halos::HaloHierarchyBuilder`] turns the refinement trees into a
//!    [`halos::HaloCatalog`] arena, dropping undersized and unreal halos.
//! 5. [`temporal::TemporalLinker`] connects the catalog to the previous one by
//!    shared particle ids.
//!
//! ## Features
//! - Lock-free, order-independent union-find for the spatial pass
//! - Nested substructure to any configured depth
//! - Pluggable boundedness tests ([`halos::BoundednessOracle`])
//! - `DebugInvariants` checks on the grid, the halo arena and the link graph
//!
//! ## Determinism
//!
//! Every stage runs on a fixed-size rayon pool. All outputs are ordered by
//! particle index or stable particle id, so catalogs and link graphs are
//! byte-identical for any number of threads.
//!
//! ## Usage
//!
//! ```no_run
//! use mega_halos::prelude::*;
//!
//! # fn main() -> Result<(), HaloError> {
//! let params = ParamMap::new()
//!     .with("Gravity/comoving_DM_softening", 0.01)
//!     .with("Gravity/max_physical_DM_softening", 0.005);
//! let mut engine = Engine::from_store(&params)?;
//! let mut snapshots: Vec<SnapshotData> = Vec::new();
//! let mut outputs: Vec<SnapshotOutput> = Vec::new();
//! engine.run(&mut snapshots, &mut outputs)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod debug_invariants;
pub mod engine;
pub mod geometry;
pub mod grid;
pub mod halo_error;
pub mod halos;
pub mod linking;
pub mod particles;
pub mod phase_space;
pub mod temporal;
pub mod timing;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::config::{ConfigStore, HaloConfig, ParamMap, ParamValue};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::engine::{Domain, Engine, HaloSink, SnapshotOutput, SnapshotStats};
    pub use crate::geometry::{Moments, PeriodicBox};
    pub use crate::grid::{CellGrid, SubcellPolicy};
    pub use crate::halo_error::{HaloError, Stage};
    pub use crate::halos::{
        AssumeBound, BoundState, BoundednessOracle, EnergyBudget, Halo, HaloCandidate,
        HaloCatalog, HaloId, HaloType, VirialEnergyTest,
    };
    pub use crate::linking::{Group, SpatialLinker};
    pub use crate::particles::{Particles, SnapshotData, SnapshotLoader, Species, SpeciesArrays};
    pub use crate::phase_space::{PhaseSpaceRefiner, RefineNode, RefinerSettings};
    pub use crate::temporal::{LinkGraph, LinkRank, TemporalLink, TemporalLinker};
}
