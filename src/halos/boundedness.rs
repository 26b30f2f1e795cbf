//! Gravitational boundedness of halo candidates.
//!
//! The builder asks a [`BoundednessOracle`] about every candidate it accepts.
//! The verdict is kept on the halo together with the energies, if any were
//! computed; the particle arrays are never written to.

use super::{BoundState, EnergyBudget};
use crate::config::HaloConfig;
use crate::geometry::{Moments, PeriodicBox, norm2, sub};
use crate::particles::Particles;
use rayon::prelude::*;

/// Everything an oracle may inspect about one candidate.
pub struct HaloCandidate<'a> {
    pub particles: &'a Particles,
    pub bx: &'a PeriodicBox,
    /// Ascending particle indices.
    pub members: &'a [usize],
    pub depth: u32,
    pub moments: Moments,
}

/// Decides whether a candidate is gravitationally bound.
pub trait BoundednessOracle: Send + Sync {
    fn assess(&self, candidate: &HaloCandidate<'_>) -> BoundState;
}

impl<F> BoundednessOracle for F
where
    F: Fn(&HaloCandidate<'_>) -> BoundState + Send + Sync,
{
    fn assess(&self, candidate: &HaloCandidate<'_>) -> BoundState {
        self(candidate)
    }
}

/// Accepts every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeBound;

impl BoundednessOracle for AssumeBound {
    fn assess(&self, _candidate: &HaloCandidate<'_>) -> BoundState {
        BoundState::Assumed
    }
}

/// Direct-sum energy test with Plummer softening.
///
/// Kinetic energy is taken in the centre-of-momentum frame. The potential is
/// summed over all pairs, so cost is quadratic in the halo size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirialEnergyTest {
    pub grav_const: f64,
    pub softening: f64,
}

impl VirialEnergyTest {
    pub fn new(grav_const: f64, softening: f64) -> Self {
        Self {
            grav_const,
            softening,
        }
    }

    pub fn from_config(cfg: &HaloConfig) -> Self {
        Self::new(cfg.grav_const, cfg.softening())
    }

    pub fn energy(&self, c: &HaloCandidate<'_>) -> EnergyBudget {
        let p = c.particles;
        let kinetic: f64 = c
            .members
            .iter()
            .map(|&i| 0.5 * p.mass(i) * norm2(sub(p.vel(i), c.moments.vel)))
            .sum();

        let eps2 = self.softening * self.softening;
        // Per-row partial sums are reduced in order so the result does not
        // depend on how rayon splits the rows.
        let rows: Vec<f64> = (0..c.members.len())
            .into_par_iter()
            .map(|a| {
                let i = c.members[a];
                let (xi, mi) = (p.pos(i), p.mass(i));
                c.members[a + 1..]
                    .iter()
                    .map(|&j| mi * p.mass(j) / (c.bx.dist2(xi, p.pos(j)) + eps2).sqrt())
                    .filter(|e| e.is_finite())
                    .sum::<f64>()
            })
            .collect();
        EnergyBudget {
            kinetic,
            potential: -self.grav_const * rows.iter().sum::<f64>(),
        }
    }
}

impl BoundednessOracle for VirialEnergyTest {
    fn assess(&self, candidate: &HaloCandidate<'_>) -> BoundState {
        BoundState::from_energy(self.energy(candidate))
    }
}
