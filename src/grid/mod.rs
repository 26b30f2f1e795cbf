//! Uniform cell grid over the simulation volume.
//!
//! The grid has two tiers: a fixed top level of `cdim[0]·cdim[1]·cdim[2]`
//! cells spanning the box, and a pool of sub-cells filled on demand by the
//! [`SubcellPolicy`]. Cells hold particle indices only; particle data stays in
//! the [`Particles`] store.
//!
//! Every particle belongs to exactly one top-level cell, found in O(1) from its
//! (wrapped, for periodic volumes) position.

pub mod cell;
pub mod subcells;

pub use cell::Cell;
pub use subcells::SubcellPolicy;

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::geometry::PeriodicBox;
use crate::halo_error::HaloError;
use crate::particles::Particles;
use rayon::prelude::*;

/// The two-tier cell grid.
#[derive(Debug, Clone)]
pub struct CellGrid {
    bx: PeriodicBox,
    cdim: [usize; 3],
    width: [f64; 3],
    iwidth: [f64; 3],
    top: Vec<Cell>,
    sub: Vec<Cell>,
    policy: SubcellPolicy,
    n_binned: usize,
}

impl CellGrid {
    /// Builds an empty grid.
    ///
    /// # Errors
    /// `InvalidConfiguration` if any `cdim ≤ 0` or any box side is not positive.
    pub fn new(box_size: [f64; 3], cdim: [i64; 3], periodic: bool) -> Result<Self, HaloError> {
        if cdim.iter().any(|&c| c <= 0) {
            return Err(HaloError::InvalidConfiguration(format!(
                "cell grid dimensions must be positive, got {cdim:?}"
            )));
        }
        let bx = PeriodicBox::new(box_size, periodic)?;
        let cdim: [usize; 3] = std::array::from_fn(|k| cdim[k] as usize);
        let width: [f64; 3] = std::array::from_fn(|k| box_size[k] / cdim[k] as f64);
        let iwidth: [f64; 3] = std::array::from_fn(|k| 1.0 / width[k]);
        let n_top = cdim[0] * cdim[1] * cdim[2];
        let top = (0..n_top)
            .map(|c| {
                let ijk = coords_of(cdim, c);
                let loc = std::array::from_fn(|k| ijk[k] as f64 * width[k]);
                Cell::new(loc, width, 0, c)
            })
            .collect();
        Ok(Self {
            bx,
            cdim,
            width,
            iwidth,
            top,
            sub: Vec::new(),
            policy: SubcellPolicy::Disabled,
            n_binned: 0,
        })
    }

    /// Sets the sub-cell policy applied by the next [`CellGrid::bin`].
    pub fn with_policy(mut self, policy: SubcellPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn periodic_box(&self) -> &PeriodicBox {
        &self.bx
    }

    pub fn cdim(&self) -> [usize; 3] {
        self.cdim
    }

    pub fn width(&self) -> [f64; 3] {
        self.width
    }

    pub fn iwidth(&self) -> [f64; 3] {
        self.iwidth
    }

    pub fn n_top(&self) -> usize {
        self.top.len()
    }

    pub fn top_cells(&self) -> &[Cell] {
        &self.top
    }

    pub fn sub_cells(&self) -> &[Cell] {
        &self.sub
    }

    pub fn cell(&self, index: usize) -> &Cell {
        &self.top[index]
    }

    /// Number of particles placed by the last [`CellGrid::bin`].
    pub fn n_binned(&self) -> usize {
        self.n_binned
    }

    /// Integer cell coordinates of a position.
    #[inline]
    pub fn cell_coords(&self, pos: [f64; 3]) -> [usize; 3] {
        std::array::from_fn(|k| {
            let n = self.cdim[k] as i64;
            let c = (pos[k] * self.iwidth[k]).floor() as i64;
            if self.bx.is_periodic() {
                c.rem_euclid(n) as usize
            } else {
                c.clamp(0, n - 1) as usize
            }
        })
    }

    /// Index of the top-level cell owning `pos`.
    #[inline]
    pub fn cell_index(&self, pos: [f64; 3]) -> usize {
        self.index_of(self.cell_coords(pos))
    }

    #[inline]
    pub fn index_of(&self, ijk: [usize; 3]) -> usize {
        (ijk[0] * self.cdim[1] + ijk[1]) * self.cdim[2] + ijk[2]
    }

    #[inline]
    pub fn coords_of(&self, index: usize) -> [usize; 3] {
        coords_of(self.cdim, index)
    }

    /// Replaces the grid contents with `particles`.
    ///
    /// Owning cells are computed in parallel; each top-level cell then fills
    /// its own lists from a sorted index permutation, so list order is
    /// ascending particle index regardless of thread count.
    pub fn bin(&mut self, particles: &Particles) {
        let cell_of: Vec<usize> = particles
            .positions()
            .par_iter()
            .map(|&p| self.cell_index(p))
            .collect();
        let mut order: Vec<usize> = (0..particles.len()).collect();
        order.par_sort_unstable_by_key(|&i| (cell_of[i], i));

        self.sub.clear();
        self.top.par_iter_mut().enumerate().for_each(|(c, cell)| {
            cell.clear();
            let start = order.partition_point(|&i| cell_of[i] < c);
            let end = order.partition_point(|&i| cell_of[i] <= c);
            for &i in &order[start..end] {
                cell.push(particles.species_of(i), i);
            }
        });

        if self.policy != SubcellPolicy::Disabled {
            let mut pool = Vec::new();
            for cell in &mut self.top {
                subcells::split_cell(cell, &mut pool, particles, &self.bx, &self.policy);
            }
            self.sub = pool;
        }
        self.n_binned = particles.len();
        log::debug!(
            "Binned {} particles into {} top-level cells ({} sub-cells)",
            self.n_binned,
            self.top.len(),
            self.sub.len()
        );
    }

    /// The minimal, sorted set of top-level cells that can hold particles
    /// within `radius` of any point of `cell`.
    pub fn neighbour_cells(&self, cell: usize, radius: f64) -> Vec<usize> {
        let c = self.coords_of(cell);
        let axes: [Vec<usize>; 3] = std::array::from_fn(|k| {
            let n = self.cdim[k] as i64;
            let reach = if radius > 0.0 {
                ((radius * self.iwidth[k]).ceil()).min(n as f64) as i64
            } else {
                0
            };
            let ck = c[k] as i64;
            let mut v: Vec<usize> = if self.bx.is_periodic() {
                if 2 * reach + 1 >= n {
                    (0..n as usize).collect()
                } else {
                    (ck - reach..=ck + reach)
                        .map(|x| x.rem_euclid(n) as usize)
                        .collect()
                }
            } else {
                ((ck - reach).max(0)..=(ck + reach).min(n - 1))
                    .map(|x| x as usize)
                    .collect()
            };
            v.sort_unstable();
            v.dedup();
            v
        });
        let mut out = Vec::with_capacity(axes[0].len() * axes[1].len() * axes[2].len());
        for &i in &axes[0] {
            for &j in &axes[1] {
                for &k in &axes[2] {
                    out.push(self.index_of([i, j, k]));
                }
            }
        }
        out
    }

    /// Non-empty leaf cells (unsplit top-level cells and leaf sub-cells) in
    /// deterministic order.
    pub fn leaves(&self) -> Vec<&Cell> {
        let mut out = Vec::new();
        for cell in &self.top {
            self.collect_leaves(cell, &mut out);
        }
        out
    }

    fn collect_leaves<'a>(&'a self, cell: &'a Cell, out: &mut Vec<&'a Cell>) {
        match cell.progeny() {
            Some(progeny) => {
                for &p in progeny {
                    self.collect_leaves(&self.sub[p], out);
                }
            }
            None if cell.count() > 0 => out.push(cell),
            None => {}
        }
    }
}

fn coords_of(cdim: [usize; 3], index: usize) -> [usize; 3] {
    let k = index % cdim[2];
    let j = (index / cdim[2]) % cdim[1];
    let i = index / (cdim[1] * cdim[2]);
    [i, j, k]
}

impl DebugInvariants for CellGrid {
    fn validate_invariants(&self) -> Result<(), HaloError> {
        let mut seen = vec![false; self.n_binned];
        for (c, cell) in self.top.iter().enumerate() {
            for i in cell.parts() {
                ensure(i < self.n_binned, || {
                    format!("cell {c} references particle {i} beyond {}", self.n_binned)
                })?;
                ensure(!seen[i], || format!("particle {i} is in more than one top-level cell"))?;
                seen[i] = true;
            }
        }
        ensure(seen.iter().all(|&s| s), || {
            "some particles are not in any top-level cell".to_string()
        })?;
        for cell in self.top.iter().chain(&self.sub) {
            if let Some(progeny) = cell.progeny() {
                let n: usize = progeny.iter().map(|&p| self.sub[p].count()).sum();
                ensure(n == cell.count(), || {
                    format!(
                        "octants of a depth-{} cell hold {n} particles, parent holds {}",
                        cell.depth,
                        cell.count()
                    )
                })?;
            }
        }
        Ok(())
    }
}
