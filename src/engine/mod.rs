//! Snapshot-by-snapshot driver.
//!
//! The [`Engine`] owns a fixed-size rayon pool and runs every stage of the
//! pipeline inside it:
//!
//! ```text
//! Domain -> CellGrid::bin -> SpatialLinker -> PhaseSpaceRefiner
//!        -> HaloHierarchyBuilder -> TemporalLinker -> HaloSink
//! ```
//!
//! The catalog of the last successfully processed snapshot is the only state
//! carried across snapshots. A failing snapshot leaves it untouched.

pub mod domain;

pub use domain::Domain;

use crate::config::{ConfigStore, HaloConfig};
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::{HaloError, Stage, StageContext};
use crate::halos::{
    AssumeBound, BoundednessOracle, BuilderSettings, HaloCatalog, HaloHierarchyBuilder,
};
use crate::linking::SpatialLinker;
use crate::particles::{SnapshotData, SnapshotLoader};
use crate::phase_space::{PhaseSpaceRefiner, RefinerSettings};
use crate::temporal::{LinkGraph, TemporalLinker};
use crate::timing::Timings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Counters describing one processed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub n_particles: usize,
    pub n_groups: usize,
    /// Groups large enough to be refined.
    pub n_candidates: usize,
    pub discarded_particles: usize,
    pub linking_length: f64,
    pub mean_density: f64,
}

/// Everything produced for one snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotOutput {
    pub snapshot: usize,
    pub catalog: Arc<HaloCatalog>,
    /// `None` for the first snapshot of a run.
    pub links: Option<LinkGraph>,
    pub stats: SnapshotStats,
}

/// Receives finished snapshots. Any error a sink returns is reported by
/// [`Engine::run`] as [`HaloError::Sink`].
pub trait HaloSink {
    fn write(&mut self, output: &SnapshotOutput) -> Result<(), HaloError>;
}

/// Collects outputs in memory.
impl HaloSink for Vec<SnapshotOutput> {
    fn write(&mut self, output: &SnapshotOutput) -> Result<(), HaloError> {
        self.push(output.clone());
        Ok(())
    }
}

pub struct Engine {
    cfg: HaloConfig,
    pool: rayon::ThreadPool,
    timings: Timings,
    prev: Option<Arc<HaloCatalog>>,
    oracle: Box<dyn BoundednessOracle>,
}

impl Engine {
    /// Validates `cfg` and starts the worker pool.
    pub fn new(cfg: HaloConfig) -> Result<Self, HaloError> {
        cfg.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.n_threads)
            .thread_name(|i| format!("mega-halos-{i}"))
            .build()
            .map_err(|e| HaloError::ThreadPool(e.to_string()))?;
        log::info!("Running with {} worker threads", pool.current_num_threads());
        Ok(Self {
            cfg,
            pool,
            timings: Timings::new(),
            prev: None,
            oracle: Box::new(AssumeBound),
        })
    }

    pub fn from_store<S: ConfigStore>(store: &S) -> Result<Self, HaloError> {
        Self::new(HaloConfig::from_store(store)?)
    }

    /// Replaces the boundedness test applied to every halo candidate.
    pub fn with_boundedness(mut self, oracle: impl BoundednessOracle + 'static) -> Self {
        self.oracle = Box::new(oracle);
        self
    }

    pub fn config(&self) -> &HaloConfig {
        &self.cfg
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn n_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Catalog of the last snapshot processed.
    pub fn previous(&self) -> Option<&Arc<HaloCatalog>> {
        self.prev.as_ref()
    }

    /// Finds halos in one snapshot and links them to the previous one.
    ///
    /// # Errors
    /// Any fatal failure, wrapped in [`HaloError::Stage`]. Nothing is kept
    /// from a failed snapshot.
    pub fn process_snapshot(
        &mut self,
        index: usize,
        snapshot: SnapshotData,
    ) -> Result<SnapshotOutput, HaloError> {
        log::info!("Processing snapshot {index}");
        let out = self.pool.install(|| self.find_halos(index, snapshot))?;
        self.prev = Some(Arc::clone(&out.catalog));
        log::info!(
            "Snapshot {index} took {} microseconds",
            self.timings.snapshot_total(index).as_micros()
        );
        self.timings.log_summary(index);
        Ok(out)
    }

    fn find_halos(&self, index: usize, snapshot: SnapshotData) -> Result<SnapshotOutput, HaloError> {
        let cfg = &self.cfg;
        let t = &self.timings;

        let mut domain = t
            .time(index, Stage::Domain, || Domain::new(cfg, snapshot))
            .stage(Stage::Domain)?;
        t.time(index, Stage::Binning, || domain.bin());
        domain.grid().validate_invariants().stage(Stage::Binning)?;
        let particles = domain.particles();
        let bx = domain.periodic_box();

        let groups = t
            .time(index, Stage::SpatialLinking, || {
                SpatialLinker::with_coefficient(domain.grid(), particles, cfg.ll_coeff)
                    .and_then(|linker| linker.link())
            })
            .stage(Stage::SpatialLinking)?;
        let linking_length = groups.linking_length;
        let n_groups = groups.groups.len();
        let candidates = groups.into_candidates(cfg.part_threshold);
        log::info!(
            "{} spatial groups above {} particles ({} particles discarded)",
            candidates.groups.len(),
            cfg.part_threshold,
            candidates.discarded_particles
        );

        let refine = RefinerSettings::from_config(cfg, linking_length, domain.mean_density());
        let trees = t.time(index, Stage::Refinement, || {
            PhaseSpaceRefiner::new(particles, bx, refine).refine_all(&candidates.groups)
        });

        let build = BuilderSettings::from_config(cfg, domain.mean_density());
        let mut catalog = t.time(index, Stage::HaloBuilding, || {
            HaloHierarchyBuilder::new(particles, bx, build)
                .with_oracle(self.oracle.as_ref())
                .build(index, &trees)
        });

        let links = match &self.prev {
            Some(prev) => {
                let graph = t.time(index, Stage::TemporalLinking, || {
                    TemporalLinker::new(prev, domain.grid(), cfg.link_threshold, cfg.link_search_pad)
                        .link(&catalog)
                });
                graph.attach_to(&mut catalog);
                Some(graph)
            }
            None => None,
        };

        Ok(SnapshotOutput {
            snapshot: index,
            catalog: Arc::new(catalog),
            links,
            stats: SnapshotStats {
                n_particles: particles.len(),
                n_groups,
                n_candidates: candidates.groups.len(),
                discarded_particles: candidates.discarded_particles,
                linking_length,
                mean_density: domain.mean_density(),
            },
        })
    }

    /// Processes every snapshot of `loader` in order, handing each result to
    /// `sink`. Returns the number of snapshots processed.
    pub fn run<L, S>(&mut self, loader: &mut L, sink: &mut S) -> Result<usize, HaloError>
    where
        L: SnapshotLoader + ?Sized,
        S: HaloSink + ?Sized,
    {
        let n = loader.snapshot_count();
        log::info!("Running {} over {n} snapshots", self.cfg.run_name);
        for index in 0..n {
            let snapshot = loader.load(index).stage(Stage::Domain)?;
            let out = self.process_snapshot(index, snapshot)?;
            self.timings
                .time(index, Stage::Output, || sink.write(&out))
                .map_err(|e| match e {
                    HaloError::Sink(_) => e,
                    other => HaloError::Sink(other.to_string()),
                })
                .stage(Stage::Output)?;
        }
        Ok(n)
    }
}
