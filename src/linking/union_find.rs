//! Union-find structures for particle linking.
//!
//! [`AtomicUnionFind`] is shared between worker threads during the spatial
//! scan: parents are atomics and a union always hangs the larger root under
//! the smaller one with a compare-and-swap, so every root is the minimum index
//! of its set and the final partition does not depend on the order in which
//! pairs were seen. [`DisjointSet`] is the single-threaded counterpart used
//! inside one refinement branch.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free union-find over `0..len`.
pub struct AtomicUnionFind {
    parent: Vec<AtomicUsize>,
}

impl AtomicUnionFind {
    /// Every element starts as its own root.
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).map(AtomicUsize::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    #[inline]
    fn get(&self, idx: usize) -> usize {
        self.parent[idx].load(Ordering::Acquire)
    }

    /// Root of the set containing `idx`, halving the path on the way.
    pub fn find(&self, mut idx: usize) -> usize {
        loop {
            let p = self.get(idx);
            if p == idx {
                return idx;
            }
            let gp = self.get(p);
            if gp != p {
                // Parents only ever move to smaller indices, so a failed CAS is harmless.
                let _ = self.parent[idx].compare_exchange_weak(
                    p,
                    gp,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
            idx = gp;
        }
    }

    /// Merges the sets of `a` and `b`; returns the root of the merged set.
    pub fn union(&self, a: usize, b: usize) -> usize {
        let (mut ra, mut rb) = (a, b);
        loop {
            ra = self.find(ra);
            rb = self.find(rb);
            if ra == rb {
                return ra;
            }
            let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
            if self.parent[big]
                .compare_exchange(big, small, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return small;
            }
        }
    }

    /// Compress all paths so every element points directly at its root and
    /// return the roots.
    pub fn into_roots(self) -> Vec<usize> {
        let n = self.parent.len();
        let mut roots: Vec<usize> = self.parent.into_iter().map(AtomicUsize::into_inner).collect();
        for i in 0..n {
            // parent[i] <= i, so earlier entries are already final
            roots[i] = roots[roots[i]];
        }
        roots
    }
}

/// Sequential union-find with the same minimum-root convention.
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    pub fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            let gp = self.parent[self.parent[idx]];
            self.parent[idx] = gp;
            idx = gp;
        }
        idx
    }

    pub fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[big] = small;
        small
    }

    /// Sets as ascending member lists, ordered by their smallest member.
    pub fn sets(mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut slot = vec![usize::MAX; n];
        let mut out: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let r = self.find(i);
            if slot[r] == usize::MAX {
                slot[r] = out.len();
                out.push(Vec::new());
            }
            out[slot[r]].push(i);
        }
        out
    }
}
