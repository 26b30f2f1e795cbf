//! The simulation volume.

use crate::halo_error::HaloError;
use serde::{Deserialize, Serialize};

/// An axis-aligned box `[0, size)` per axis, optionally periodic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicBox {
    size: [f64; 3],
    periodic: bool,
}

impl PeriodicBox {
    /// Fails with `InvalidConfiguration` for non-positive or non-finite sides.
    pub fn new(size: [f64; 3], periodic: bool) -> Result<Self, HaloError> {
        if size.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(HaloError::InvalidConfiguration(format!(
                "box size must be positive and finite, got {size:?}"
            )));
        }
        Ok(Self { size, periodic })
    }

    #[inline]
    pub fn size(&self) -> [f64; 3] {
        self.size
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub fn volume(&self) -> f64 {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Maps a position back into the box when periodic; identity otherwise.
    #[inline]
    pub fn wrap(&self, p: [f64; 3]) -> [f64; 3] {
        if !self.periodic {
            return p;
        }
        std::array::from_fn(|k| {
            let w = p[k].rem_euclid(self.size[k]);
            // rem_euclid can round up to exactly `size` for tiny negatives
            if w >= self.size[k] { 0.0 } else { w }
        })
    }

    /// Separation `b - a`, using the nearest periodic image. Inputs may lie
    /// any number of periods outside the box.
    #[inline]
    pub fn delta(&self, a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
        std::array::from_fn(|k| {
            let d = b[k] - a[k];
            if self.periodic {
                let l = self.size[k];
                d - l * (d / l).round()
            } else {
                d
            }
        })
    }

    #[inline]
    pub fn dist2(&self, a: [f64; 3], b: [f64; 3]) -> f64 {
        super::norm2(self.delta(a, b))
    }

    /// The image of `p` closest to `reference`.
    #[inline]
    pub fn unwrap_about(&self, reference: [f64; 3], p: [f64; 3]) -> [f64; 3] {
        let d = self.delta(reference, p);
        [reference[0] + d[0], reference[1] + d[1], reference[2] + d[2]]
    }
}
