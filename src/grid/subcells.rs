//! Recursive octant splitting of crowded cells.
//!
//! Split cells keep their own particle lists; the eight octants are appended
//! to the grid's sub-cell pool and receive the subset falling inside them.
//! Leaves of the resulting forest are the work units of the spatial linker.

use super::cell::Cell;
use crate::config::ConfigStore;
use crate::geometry::PeriodicBox;
use crate::halo_error::HaloError;
use crate::particles::{Particles, Species};
use serde::{Deserialize, Serialize};

/// When to split a cell into octants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubcellPolicy {
    /// Never split.
    Disabled,
    /// Split cells holding more than `max_load` particles, down to `max_depth`.
    LoadThreshold { max_load: usize, max_depth: u8 },
    /// Split every non-empty cell down to `depth`.
    FixedDepth { depth: u8 },
}

impl Default for SubcellPolicy {
    fn default() -> Self {
        SubcellPolicy::LoadThreshold {
            max_load: 2048,
            max_depth: 3,
        }
    }
}

impl SubcellPolicy {
    /// Reads `Tasking/subcell_policy` (`none`, `load` or `depth`) together with
    /// `Tasking/max_cell_load` and `Tasking/max_subcell_depth`.
    pub fn from_store<S: ConfigStore>(store: &S) -> Result<Self, HaloError> {
        let (default_load, default_depth) = match SubcellPolicy::default() {
            SubcellPolicy::LoadThreshold {
                max_load,
                max_depth,
            } => (max_load, max_depth),
            _ => (2048, 3),
        };
        let kind: String = store.get("Tasking/subcell_policy", "load".to_string())?;
        let depth: u32 = store.get("Tasking/max_subcell_depth", default_depth as u32)?;
        let depth = u8::try_from(depth).map_err(|_| {
            HaloError::InvalidConfiguration(format!(
                "Tasking/max_subcell_depth must be below 256, got {depth}"
            ))
        })?;
        match kind.as_str() {
            "none" | "disabled" => Ok(SubcellPolicy::Disabled),
            "load" => {
                let max_load: usize = store.get("Tasking/max_cell_load", default_load)?;
                if max_load == 0 {
                    return Err(HaloError::InvalidConfiguration(
                        "Tasking/max_cell_load must be at least 1".into(),
                    ));
                }
                Ok(SubcellPolicy::LoadThreshold {
                    max_load,
                    max_depth: depth,
                })
            }
            "depth" => Ok(SubcellPolicy::FixedDepth { depth }),
            other => Err(HaloError::InvalidConfiguration(format!(
                "unknown Tasking/subcell_policy `{other}` (expected none, load or depth)"
            ))),
        }
    }

    #[inline]
    pub fn should_split(&self, count: usize, depth: u8) -> bool {
        match *self {
            SubcellPolicy::Disabled => false,
            SubcellPolicy::LoadThreshold {
                max_load,
                max_depth,
            } => count > max_load && depth < max_depth,
            SubcellPolicy::FixedDepth { depth: target } => count > 0 && depth < target,
        }
    }
}

/// Splits `cell` (and recursively its octants) according to `policy`,
/// appending new cells to `pool`.
pub(crate) fn split_cell(
    cell: &mut Cell,
    pool: &mut Vec<Cell>,
    particles: &Particles,
    bx: &PeriodicBox,
    policy: &SubcellPolicy,
) {
    if !policy.should_split(cell.count(), cell.depth) {
        return;
    }
    let half: [f64; 3] = std::array::from_fn(|k| 0.5 * cell.width[k]);
    let mid: [f64; 3] = std::array::from_fn(|k| cell.loc[k] + half[k]);

    let mut octants: [Cell; 8] = std::array::from_fn(|o| {
        let loc = std::array::from_fn(|k| {
            let upper = (o >> (2 - k)) & 1 == 1;
            if upper { mid[k] } else { cell.loc[k] }
        });
        Cell::new(loc, half, cell.depth + 1, cell.top)
    });

    for species in Species::ALL {
        for &i in cell.species_parts(species) {
            let p = bx.wrap(particles.pos(i));
            let o = ((p[0] >= mid[0]) as usize) << 2
                | ((p[1] >= mid[1]) as usize) << 1
                | (p[2] >= mid[2]) as usize;
            octants[o].push(species, i);
        }
    }

    let mut progeny = [0usize; 8];
    for (o, oct) in octants.into_iter().enumerate() {
        progeny[o] = pool.len();
        pool.push(oct);
    }
    cell.set_progeny(progeny);

    for idx in progeny {
        let mut child = std::mem::take(&mut pool[idx]);
        split_cell(&mut child, pool, particles, bx, policy);
        pool[idx] = child;
    }
}
