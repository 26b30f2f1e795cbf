//! Run configuration.
//!
//! [`HaloConfig`] is the strongly-typed configuration assembled once at
//! start-up from any [`ConfigStore`] and then passed by reference into every
//! pipeline stage. Keys and defaults follow the MEGA parameter file layout:
//!
//! ```yaml
//! Halos:
//!   part_threshold: 20
//!   min_part_threshold: 10
//!   host_overdensity: 200
//!   link_threshold: 10
//! SpatialSearch:
//!   llcoeff: 0.2
//! PhaseSpaceSearch:
//!   ini_alpha_v: 50.0
//!   min_alpha_v: 0.08
//!   decrement: 0.005
//! Substructure:
//!   n_sub_depths: 1
//!   sub_ratio: 8
//! Gravity:
//!   comoving_DM_softening: 0.01
//!   max_physical_DM_softening: 0.005
//! ```

pub mod params;

pub use params::{ConfigStore, FromParam, ParamMap, ParamValue};

use crate::grid::SubcellPolicy;
use crate::halo_error::HaloError;
use crate::particles::{N_SPECIES, Species};
use serde::{Deserialize, Serialize};

/// Typed halo-finder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloConfig {
    pub run_name: String,
    /// Which species take part, indexed by [`Species::index`].
    pub part_flags: [bool; N_SPECIES],
    /// Number of top-level cells along each axis.
    pub cell_grid_dim: [i64; 3],
    /// Worker threads; 0 lets rayon choose.
    pub n_threads: usize,
    pub subcell_policy: SubcellPolicy,
    /// Particle count needed for a newly found halo.
    pub part_threshold: usize,
    /// Particle count a tracked halo may shrink to.
    pub min_part_threshold: usize,
    /// Host overdensity in units of the mean density.
    pub host_ovden: f64,
    /// Shared particles needed for a progenitor/descendant link.
    pub link_threshold: usize,
    /// Extra distance added to bounding spheres when searching for links.
    pub link_search_pad: f64,
    pub remove_not_real_halos: bool,
    /// Spatial linking length in units of the mean inter-particle separation.
    pub ll_coeff: f64,
    pub alpha_v_decrement: f64,
    pub ini_alpha_v: f64,
    pub min_alpha_v: f64,
    pub n_sub_depths: u32,
    /// Overdensity ratio between consecutive substructure levels.
    pub sub_ratio: f64,
    pub comoving_dm_softening: f64,
    pub max_physical_dm_softening: f64,
    /// Gravitational constant in internal units.
    pub grav_const: f64,
}

impl Default for HaloConfig {
    fn default() -> Self {
        Self {
            run_name: "SIMULATION_NO_NAME".to_string(),
            part_flags: default_part_flags(),
            cell_grid_dim: [16; 3],
            n_threads: 0,
            subcell_policy: SubcellPolicy::default(),
            part_threshold: 20,
            min_part_threshold: 10,
            host_ovden: 200.0,
            link_threshold: 10,
            link_search_pad: 0.0,
            remove_not_real_halos: true,
            ll_coeff: 0.2,
            alpha_v_decrement: 0.005,
            ini_alpha_v: 50.0,
            min_alpha_v: 0.08,
            n_sub_depths: 1,
            sub_ratio: 8.0,
            comoving_dm_softening: 0.0,
            max_physical_dm_softening: 0.0,
            grav_const: 1.0,
        }
    }
}

fn default_part_flags() -> [bool; N_SPECIES] {
    let mut flags = [false; N_SPECIES];
    flags[Species::DarkMatter.index()] = true;
    flags
}

impl HaloConfig {
    /// Reads every key from `store`, logs the resulting setup and validates it.
    pub fn from_store<S: ConfigStore>(store: &S) -> Result<Self, HaloError> {
        let d = HaloConfig::default();

        let run_name = store.get("Simulation/run_name", d.run_name)?;
        log::info!("Running simulation: {run_name}");

        let mut part_flags = [false; N_SPECIES];
        for species in Species::ALL {
            let key = format!("Particles/part_type_{}", species.part_type());
            part_flags[species.index()] = store.get(&key, d.part_flags[species.index()])?;
        }

        let dim: i64 = store.get("Tasking/cell_grid_dim", d.cell_grid_dim[0])?;
        let n_threads = store.get("Tasking/n_threads", d.n_threads)?;
        let subcell_policy = SubcellPolicy::from_store(store)?;

        let comoving_dm_softening = store.get_required("Gravity/comoving_DM_softening")?;
        let max_physical_dm_softening = store.get_required("Gravity/max_physical_DM_softening")?;
        log::info!("Comoving dark matter softening is {comoving_dm_softening:.5} [internal units]");
        log::info!(
            "Maximum physical dark matter softening is {max_physical_dm_softening:.5} [internal units]"
        );

        let cfg = HaloConfig {
            run_name,
            part_flags,
            cell_grid_dim: [dim; 3],
            n_threads,
            subcell_policy,
            part_threshold: store.get("Halos/part_threshold", d.part_threshold)?,
            min_part_threshold: store.get("Halos/min_part_threshold", d.min_part_threshold)?,
            host_ovden: store.get("Halos/host_overdensity", d.host_ovden)?,
            link_threshold: store.get("Halos/link_threshold", d.link_threshold)?,
            link_search_pad: store.get("Halos/link_search_pad", d.link_search_pad)?,
            remove_not_real_halos: store
                .get("Halos/remove_not_real_halos", d.remove_not_real_halos)?,
            ll_coeff: store.get("SpatialSearch/llcoeff", d.ll_coeff)?,
            alpha_v_decrement: store.get("PhaseSpaceSearch/decrement", d.alpha_v_decrement)?,
            ini_alpha_v: store.get("PhaseSpaceSearch/ini_alpha_v", d.ini_alpha_v)?,
            min_alpha_v: store.get("PhaseSpaceSearch/min_alpha_v", d.min_alpha_v)?,
            n_sub_depths: store.get("Substructure/n_sub_depths", d.n_sub_depths)?,
            sub_ratio: store.get("Substructure/sub_ratio", d.sub_ratio)?,
            comoving_dm_softening,
            max_physical_dm_softening,
            grav_const: store.get("Gravity/G", d.grav_const)?,
        };
        cfg.log_summary();
        cfg.validate()?;
        Ok(cfg)
    }

    fn log_summary(&self) {
        log::info!(
            "Finding halos with more than {} particles",
            self.part_threshold
        );
        log::info!(
            "Once real, halos can fall to a minimum of {} particles",
            self.min_part_threshold
        );
        log::debug!("Spatial linking length coefficient is {:.1}", self.ll_coeff);
        log::debug!(
            "Each phase space iteration will decrement alpha_v by {:.3}",
            self.alpha_v_decrement
        );
        log::info!("The initial alpha_v is {:.1}", self.ini_alpha_v);
        log::info!("The minimum alpha_v is {:.2}", self.min_alpha_v);
        log::info!("Host halos target overdensity is {}", self.host_ovden);
        if self.n_sub_depths > 0 {
            log::info!(
                "Finding {} levels of substructure with a ratio of {} between levels",
                self.n_sub_depths,
                self.sub_ratio
            );
        }
        log::info!(
            "Linking halos which share at least {} particles",
            self.link_threshold
        );
        if !self.remove_not_real_halos {
            log::warn!("Will not remove unbound (not real) halos from the outputs");
        }
    }

    /// Checks value ranges. Grid and box dimensions are checked again when the
    /// grid is built.
    pub fn validate(&self) -> Result<(), HaloError> {
        let bad = |msg: String| Err(HaloError::InvalidConfiguration(msg));
        if self.cell_grid_dim.iter().any(|&c| c <= 0) {
            return bad(format!(
                "Tasking/cell_grid_dim must be positive, got {:?}",
                self.cell_grid_dim
            ));
        }
        if self.part_threshold == 0 {
            return bad("Halos/part_threshold must be at least 1".into());
        }
        if self.min_part_threshold == 0 || self.min_part_threshold > self.part_threshold {
            return bad(format!(
                "Halos/min_part_threshold ({}) must lie in 1..=part_threshold ({})",
                self.min_part_threshold, self.part_threshold
            ));
        }
        if self.link_threshold == 0 {
            return bad("Halos/link_threshold must be at least 1".into());
        }
        if !(self.ll_coeff > 0.0 && self.ll_coeff.is_finite()) {
            return bad(format!("SpatialSearch/llcoeff must be positive, got {}", self.ll_coeff));
        }
        if !(self.alpha_v_decrement > 0.0) {
            return bad(format!(
                "PhaseSpaceSearch/decrement must be positive, got {}",
                self.alpha_v_decrement
            ));
        }
        if !(self.min_alpha_v > 0.0) || self.ini_alpha_v < self.min_alpha_v {
            return bad(format!(
                "PhaseSpaceSearch needs 0 < min_alpha_v ({}) <= ini_alpha_v ({})",
                self.min_alpha_v, self.ini_alpha_v
            ));
        }
        if !(self.sub_ratio >= 1.0) {
            return bad(format!("Substructure/sub_ratio must be >= 1, got {}", self.sub_ratio));
        }
        if !(self.host_ovden > 0.0) {
            return bad(format!(
                "Halos/host_overdensity must be positive, got {}",
                self.host_ovden
            ));
        }
        if self.link_search_pad < 0.0 || self.comoving_dm_softening < 0.0 {
            return bad("link_search_pad and softening lengths must be non-negative".into());
        }
        if !self.part_flags.iter().any(|&f| f) {
            return bad("no particle species is flagged in Particles/part_type_*".into());
        }
        Ok(())
    }

    /// Species flagged for this run, in storage order.
    pub fn enabled_species(&self) -> impl Iterator<Item = Species> + '_ {
        Species::ALL
            .into_iter()
            .filter(|s| self.part_flags[s.index()])
    }

    /// Softening used by energy-based boundedness tests.
    pub fn softening(&self) -> f64 {
        if self.max_physical_dm_softening > 0.0 {
            self.comoving_dm_softening.min(self.max_physical_dm_softening)
        } else {
            self.comoving_dm_softening
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> ParamMap {
        ParamMap::new()
            .with("Gravity/comoving_DM_softening", 0.01)
            .with("Gravity/max_physical_DM_softening", 0.005)
    }

    #[test]
    fn defaults_follow_parameter_table() {
        let cfg = HaloConfig::from_store(&required()).unwrap();
        assert_eq!(cfg.part_threshold, 20);
        assert_eq!(cfg.min_part_threshold, 10);
        assert_eq!(cfg.cell_grid_dim, [16, 16, 16]);
        assert_eq!(cfg.n_sub_depths, 1);
        assert_eq!(cfg.sub_ratio, 8.0);
        assert!(cfg.remove_not_real_halos);
        assert_eq!(
            cfg.enabled_species().collect::<Vec<_>>(),
            vec![Species::DarkMatter]
        );
        assert_eq!(cfg.softening(), 0.005);
    }

    #[test]
    fn missing_softening_is_fatal() {
        let err = HaloConfig::from_store(&ParamMap::new()).unwrap_err();
        assert!(matches!(err, HaloError::MissingParameter(k) if k == "Gravity/comoving_DM_softening"));
    }

    #[test]
    fn non_positive_grid_rejected() {
        let p = required().with("Tasking/cell_grid_dim", 0);
        assert!(matches!(
            HaloConfig::from_store(&p),
            Err(HaloError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn species_flags_are_read_by_part_type() {
        let p = required()
            .with("Particles/part_type_0", 1)
            .with("Particles/part_type_1", 0);
        let cfg = HaloConfig::from_store(&p).unwrap();
        assert_eq!(cfg.enabled_species().collect::<Vec<_>>(), vec![Species::Gas]);
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let p = required()
            .with("Halos/part_threshold", 5)
            .with("Halos/min_part_threshold", 8);
        assert!(HaloConfig::from_store(&p).is_err());
    }
}
