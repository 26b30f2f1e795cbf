//! Geometry utilities for mega-halos.
//!
//! This module provides the simulation volume with its periodic wrap and
//! minimum-image arithmetic, plus mass-weighted moments of particle sets.

pub mod moments;
pub mod periodic;

pub use moments::Moments;
pub use periodic::PeriodicBox;

#[inline]
pub(crate) fn norm2(d: [f64; 3]) -> f64 {
    d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
}

#[inline]
pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}
