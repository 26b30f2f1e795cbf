//! Mass-weighted moments of a particle set.

use super::{PeriodicBox, norm2, sub};
use crate::particles::Particles;

/// Mass, centre and spread of a set of particles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub mass: f64,
    /// Centre of mass, wrapped into the box.
    pub com: [f64; 3],
    /// Mass-weighted bulk velocity.
    pub vel: [f64; 3],
    /// Largest member distance from the centre of mass.
    pub radius: f64,
    /// Mass-weighted 3D velocity dispersion about `vel`.
    pub sigma_v: f64,
}

impl Moments {
    /// Computes the moments of `members`. Positions are unwrapped about the
    /// first member so groups straddling a periodic boundary stay contiguous.
    /// Massless sets fall back to equal weights.
    pub fn of(particles: &Particles, bx: &PeriodicBox, members: &[usize]) -> Self {
        let Some(&first) = members.first() else {
            return Moments::default();
        };
        let reference = particles.pos(first);
        let unwrapped: Vec<[f64; 3]> = members
            .iter()
            .map(|&i| bx.unwrap_about(reference, particles.pos(i)))
            .collect();
        let total: f64 = members.iter().map(|&i| particles.mass(i)).sum();
        let weight = |i: usize| {
            if total > 0.0 { particles.mass(i) } else { 1.0 }
        };
        let wsum = if total > 0.0 { total } else { members.len() as f64 };

        let mut com = [0.0; 3];
        let mut vel = [0.0; 3];
        for (&i, x) in members.iter().zip(&unwrapped) {
            let w = weight(i);
            let v = particles.vel(i);
            for k in 0..3 {
                com[k] += w * x[k];
                vel[k] += w * v[k];
            }
        }
        for k in 0..3 {
            com[k] /= wsum;
            vel[k] /= wsum;
        }

        let mut r2_max: f64 = 0.0;
        let mut disp = 0.0;
        for (&i, x) in members.iter().zip(&unwrapped) {
            r2_max = r2_max.max(norm2(sub(*x, com)));
            disp += weight(i) * norm2(sub(particles.vel(i), vel));
        }

        Moments {
            mass: total,
            com: bx.wrap(com),
            vel,
            radius: r2_max.sqrt(),
            sigma_v: (disp / wsum).sqrt(),
        }
    }

    /// Mean density inside `radius`; infinite for point-like sets.
    pub fn density(&self) -> f64 {
        if self.radius > 0.0 {
            self.mass / (4.0 / 3.0 * std::f64::consts::PI * self.radius.powi(3))
        } else {
            f64::INFINITY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::{Species, SpeciesArrays};

    #[test]
    fn centre_of_mass_across_periodic_boundary() {
        let mut a = SpeciesArrays::default();
        a.push(1, [9.5, 5.0, 5.0], [1.0, 0.0, 0.0], 1.0);
        a.push(2, [0.5, 5.0, 5.0], [-1.0, 0.0, 0.0], 1.0);
        let p = Particles::from_species([(Species::DarkMatter, a)]).unwrap();
        let bx = PeriodicBox::new([10.0; 3], true).unwrap();
        let m = Moments::of(&p, &bx, &[0, 1]);
        assert!(m.com[0] < 1e-12 || (m.com[0] - 10.0).abs() < 1e-12);
        assert!((m.radius - 0.5).abs() < 1e-12);
        assert!((m.sigma_v - 1.0).abs() < 1e-12);
        assert_eq!(m.vel, [0.0, 0.0, 0.0]);
        assert_eq!(m.mass, 2.0);
    }

    #[test]
    fn empty_set_is_zero() {
        let p = Particles::default();
        let bx = PeriodicBox::new([1.0; 3], false).unwrap();
        assert_eq!(Moments::of(&p, &bx, &[]), Moments::default());
        assert_eq!(Moments::default().density(), f64::INFINITY);
    }
}
