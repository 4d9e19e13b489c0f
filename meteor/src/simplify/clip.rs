//! Cutting the mesh along the zero set of a function
use nalgebra::Vector3;

use crate::{
    Error, Mesh,
    linalg::iterative_improve,
    store::{PointId, Scratch},
};

impl Mesh {
    /// Removes the part of the mesh where `f` is negative
    ///
    /// Edges crossing the zero set of `f` are split at the crossing, so the
    /// remaining mesh ends on a boundary along that set.  The new boundary
    /// points get auxiliary data from the callbacks, or averaged from the
    /// edge's endpoints.
    pub fn clip<F: Fn(Vector3<f64>) -> f64>(&mut self, f: F) -> Result<(), Error> {
        if self.is_building() {
            return self.latch(Err(Error::BuildInProgress("clip")));
        }
        self.set_idle();
        for i in 0..self.heap.len() {
            let p = self.heap.points()[i];
            self.store[p].scratch = Scratch::Cut(f(self.store[p].pos));
        }

        // Triangles created by splits are appended, and walked in turn
        let mut split = 0;
        let mut next = self.store.first_triangle();
        while let Some(t) = next {
            for (i, j) in [(2, 0), (0, 1), (1, 2)] {
                let tri = self.store[t].points();
                let (p1, p2) = (tri[i], tri[j]);
                let (c1, c2) = (self.store[p1].cut(), self.store[p2].cut());
                if c1 * c2 < 0.0 {
                    let pos = iterative_improve(
                        (self.store[p1].pos, c1),
                        (self.store[p2].pos, c2),
                        &f,
                    );
                    let p = self.make_point(pos);
                    self.store[p].scratch = Scratch::Cut(0.0);
                    self.blend_aux(p, p1, p2);
                    self.slice_edge(p1, p2, p);
                    split += 1;
                }
            }
            next = self.store.next_triangle(t);
        }

        let outside: Vec<_> = self
            .store
            .triangles()
            .filter(|t| {
                self.store[*t]
                    .points()
                    .iter()
                    .any(|p| self.store[*p].cut() < 0.0)
            })
            .collect();
        let removed = outside.len();
        for t in outside {
            self.store.free_triangle(t);
        }

        let dead: Vec<PointId> = self
            .heap
            .points()
            .iter()
            .copied()
            .filter(|p| {
                let p = &self.store[*p];
                p.cut() < 0.0 || (p.cut() == 0.0 && p.triangles().is_empty())
            })
            .collect();
        for p in &dead {
            self.delete_point(*p);
        }
        for i in 0..self.heap.len() {
            let p = self.heap.points()[i];
            self.store[p].scratch = Scratch::Idle;
        }
        self.mark_modified();
        log::debug!(
            "clip split {split} edges, removing {removed} triangles and {} points",
            dead.len()
        );
        Ok(())
    }
}
