//! Binary min-heap over points, keyed by each point's simplification cost
//!
//! The heap array holds every live point, and each point stores its own
//! position in that array.  The array is split into three regions:
//!
//! ```text
//! [0, size)        heap-ordered
//! [size, ready)    unsorted, waiting for the next resync
//! [ready, len)     unsorted, created during the current build step
//! ```
//!
//! The last region exists because the incremental builder may still attach
//! triangles to points it just created; those points only become eligible for
//! simplification once the next slice has been built.
use crate::store::{MeshStore, NOT_LIVE, PointId};

/// Min-heap of points with back-indices
#[derive(Default)]
pub struct Heap {
    slots: Vec<PointId>,
    size: usize,
    ready: usize,
}

impl Heap {
    /// Builds an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every point
    pub fn clear(&mut self) {
        self.slots.clear();
        self.size = 0;
        self.ready = 0;
    }

    /// Total number of points, heap-ordered or not
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Checks whether the array holds no points at all
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of heap-ordered points
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of unsorted points eligible for [`insert`](Self::insert)
    pub fn pending(&self) -> usize {
        self.ready - self.size
    }

    /// Every point, in array order
    pub fn points(&self) -> &[PointId] {
        &self.slots
    }

    /// Point at a given array position
    pub fn get(&self, i: usize) -> Option<PointId> {
        self.slots.get(i).copied()
    }

    /// Cheapest point in the heap
    pub fn top(&self) -> Option<PointId> {
        if self.size > 0 { Some(self.slots[0]) } else { None }
    }

    /// Checks whether the point is in the heap-ordered region
    pub fn contains(&self, store: &MeshStore, p: PointId) -> bool {
        store[p].index < self.size
    }

    /// Appends a point without ordering it
    pub fn push_unsorted(&mut self, store: &mut MeshStore, p: PointId) {
        store[p].index = self.slots.len();
        self.slots.push(p);
    }

    /// Marks every unsorted point as eligible for the next resync
    pub fn seal(&mut self) {
        self.ready = self.slots.len();
    }

    /// Drops the heap ordering, leaving every point unsorted
    pub fn unsort(&mut self) {
        self.size = 0;
    }

    /// Moves an unsorted point into the heap
    pub fn insert(&mut self, store: &mut MeshStore, p: PointId) {
        let mut i = store[p].index;
        assert!(
            i >= self.size && i < self.slots.len(),
            "{p:?} at {i} cannot be inserted into heap of size {}",
            self.size
        );
        if i >= self.ready {
            self.swap(store, i, self.ready);
            i = self.ready;
            self.ready += 1;
        }
        self.swap(store, i, self.size);
        self.size += 1;
        self.sift_up(store, self.size - 1);
    }

    /// Takes a point out of the heap, leaving it first in the unsorted region
    ///
    /// # Panics
    /// If the point is not in the heap
    pub fn remove(&mut self, store: &mut MeshStore, p: PointId) {
        let i = store[p].index;
        assert!(i < self.size, "{p:?} at {i} is not in the heap");
        self.size -= 1;
        let last = self.size;
        if i != last {
            self.swap(store, i, last);
            self.sift(store, i);
        }
    }

    /// Restores the heap position of a point whose key changed
    pub fn update(&mut self, store: &mut MeshStore, p: PointId) {
        if self.contains(store, p) {
            self.remove(store, p);
        }
        self.insert(store, p);
    }

    /// Removes a point from the array entirely
    pub fn detach(&mut self, store: &mut MeshStore, p: PointId) {
        if self.contains(store, p) {
            self.remove(store, p);
        }
        let mut i = store[p].index;
        if i < self.ready {
            self.swap(store, i, self.ready - 1);
            self.ready -= 1;
            i = self.ready;
        }
        let last = self.slots.len() - 1;
        self.swap(store, i, last);
        self.slots.pop();
        store[p].index = NOT_LIVE;
    }

    fn key(&self, store: &MeshStore, i: usize) -> f64 {
        store[self.slots[i]].cost()
    }

    fn swap(&mut self, store: &mut MeshStore, i: usize, j: usize) {
        if i != j {
            self.slots.swap(i, j);
            store[self.slots[i]].index = i;
            store[self.slots[j]].index = j;
        }
    }

    fn sift(&mut self, store: &mut MeshStore, i: usize) {
        if i > 0 && self.key(store, i) < self.key(store, (i - 1) / 2) {
            self.sift_up(store, i);
        } else {
            self.sift_down(store, i);
        }
    }

    fn sift_up(&mut self, store: &mut MeshStore, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.key(store, i) < self.key(store, parent) {
                self.swap(store, i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, store: &mut MeshStore, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= self.size {
                break;
            }
            let right = left + 1;
            let child = if right < self.size
                && self.key(store, right) < self.key(store, left)
            {
                right
            } else {
                left
            };
            if self.key(store, child) < self.key(store, i) {
                self.swap(store, i, child);
                i = child;
            } else {
                break;
            }
        }
    }

    /// Checks back-indices and heap ordering
    ///
    /// # Panics
    /// If either is broken
    pub fn verify(&self, store: &MeshStore) {
        assert!(self.size <= self.ready && self.ready <= self.slots.len());
        for (i, p) in self.slots.iter().enumerate() {
            let index = store[*p].index;
            assert_eq!(index, i, "{p:?} has stale heap index");
        }
        for i in 1..self.size {
            assert!(
                self.key(store, (i - 1) / 2) <= self.key(store, i),
                "heap order broken at {i}"
            );
        }
    }
}
