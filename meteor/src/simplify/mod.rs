//! Mesh simplification and editing
//!
//! Two simplifiers share the same contraction machinery:
//!
//! - [`Mesh::merge`] contracts the edge with the lowest quadric error
//! - [`Mesh::aggregate`] contracts the closest pair of points, whether or not
//!   they share an edge
//!
//! Each call performs one contraction, so callers can stop at any triangle
//! budget.  [`Mesh::clip`] and [`Mesh::correct_tex_coords`] edit the mesh by
//! splitting edges.
use crate::{
    Mesh,
    mesh::Mode,
    store::{PointId, TriangleId},
};

mod aggregate;
mod clip;
mod merge;
mod texcoord;

/// Number of points and triangles removed by a contraction
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Removed {
    pub points: usize,
    pub triangles: usize,
}

impl Mesh {
    /// Contracts the cheapest point in the heap into its partner
    ///
    /// Partners that went stale since they were recorded are refreshed and
    /// the point re-queued until a live pair comes out on top.
    fn contract_top(&mut self) -> Removed {
        loop {
            if self.heap.size() < 2 {
                return Removed::default();
            }
            let Some(p2) = self.heap.top() else {
                unreachable!("non-empty heap has a top");
            };
            let partner = match self.mode {
                Mode::Merge => self.store[p2].contraction().target,
                Mode::Aggregate => self.store[p2].neighbor().nearest,
                Mode::Idle => panic!("no simplification mode is active"),
            };
            match (self.mode, partner) {
                (Mode::Merge, None) => return Removed::default(),
                (_, Some(p1)) if self.is_partner(p2, p1) => {
                    return self.contract(p1, p2);
                }
                (Mode::Merge, Some(_)) => self.refresh_contraction(p2, false),
                _ => self.kd.update(&mut self.store, p2),
            }
            self.heap.update(&mut self.store, p2);
        }
    }

    /// Checks whether `p1` is still a valid contraction target for `p2`
    fn is_partner(&self, p2: PointId, p1: PointId) -> bool {
        if !self.store.contains_point(p1) {
            return false;
        }
        match self.mode {
            Mode::Merge => {
                self.heap.contains(&self.store, p1)
                    && self.store[p2]
                        .triangles()
                        .iter()
                        .any(|t| self.store[*t].contains(p1))
            }
            _ => true,
        }
    }

    /// Contracts `p2` into `p1`, which survives (unless it is left without
    /// triangles)
    fn contract(&mut self, p1: PointId, p2: PointId) -> Removed {
        assert!(
            self.heap.contains(&self.store, p1),
            "contraction target {p1:?} is not in the heap"
        );
        let mid = (self.store[p1].pos + self.store[p2].pos) / 2.0;
        let pos = if self.mode == Mode::Merge {
            let q = self.store[p1].contraction().quadric
                + self.store[p2].contraction().quadric;
            self.store[p1].contraction_mut().quadric = q;
            q.optimal_point().unwrap_or(mid)
        } else {
            mid
        };
        self.store[p1].pos = pos;
        self.blend_aux(p1, p1, p2);

        self.heap.remove(&mut self.store, p2);
        if self.mode == Mode::Aggregate {
            self.kd.remove(&mut self.store, p2);
        }

        let mut removed = Removed {
            points: 1,
            triangles: 0,
        };
        for t in self.store[p2].triangles().to_vec() {
            let tri = self.store[t].points();
            if !tri.contains(&p1) {
                self.store.replace_vertex(t, p2, p1);
                continue;
            }
            let Some(p3) = tri.into_iter().find(|p| *p != p1 && *p != p2) else {
                unreachable!("{t:?} is degenerate");
            };
            self.store.free_triangle(t);
            removed.triangles += 1;
            if self.store[p3].triangles().is_empty()
                && self.heap.contains(&self.store, p3)
            {
                self.delete_point(p3);
                removed.points += 1;
            }
        }
        // p2 is already out of the heap and kd-tree
        self.heap.detach(&mut self.store, p2);
        self.store.free_point(p2);

        if self.store[p1].triangles().is_empty() {
            self.delete_point(p1);
            removed.points += 1;
        } else {
            match self.mode {
                Mode::Merge => self.refresh_contraction(p1, false),
                _ => self.kd.update(&mut self.store, p1),
            }
            self.heap.update(&mut self.store, p1);
        }
        removed
    }

    /// Splits every triangle using edge `p1`-`p2` at the new point `p`
    ///
    /// Each split triangle keeps its slot (with `p` in place of `p1`) and gains
    /// a sibling on the `p1` side with the same winding.
    pub(crate) fn slice_edge(&mut self, p1: PointId, p2: PointId, p: PointId) {
        let tris: Vec<TriangleId> = self.store[p1].triangles().to_vec();
        for t in tris {
            let tri = self.store[t].points();
            let Some(i) = tri.iter().position(|q| *q == p1) else {
                unreachable!("{t:?} is listed by {p1:?} but doesn't use it");
            };
            if !tri.contains(&p2) {
                continue;
            }
            let Some(p3) = tri.into_iter().find(|q| *q != p1 && *q != p2) else {
                unreachable!("{t:?} is degenerate");
            };
            let sibling = if tri[(i + 1) % 3] == p2 {
                [p1, p, p3]
            } else {
                [p1, p3, p]
            };
            self.store.replace_vertex(t, p1, p);
            self.store.new_triangle(sibling);
        }
    }

    /// Records a finished contraction
    fn note_removed(&mut self, r: Removed) {
        if r.points > 0 {
            self.mergeable = self.mergeable.saturating_sub(r.triangles);
            self.mark_modified();
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use crate::{Format, Mesh};
    use nalgebra::Vector3;

    /// Builds a sphere of radius `sqrt(0.5)` at the given resolution
    pub fn sphere(format: Format, step: f64) -> Mesh {
        let mut mesh = Mesh::new(format);
        mesh.set_field(|x, y, z| x * x + y * y + z * z - 0.5);
        mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, step).unwrap();
        while mesh.build().unwrap() > 0 {}
        mesh
    }

    #[test]
    fn slice_keeps_winding() {
        let mut mesh = Mesh::new(Format::COORDS);
        let pts = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
        ]
        .map(|p| mesh.make_point(p));
        let [a, b, c, d] = pts;
        let t1 = mesh.store.new_triangle([a, b, c]);
        let t2 = mesh.store.new_triangle([b, d, c]);

        let p = mesh.make_point(Vector3::new(0.5, 0.5, 0.0));
        mesh.slice_edge(b, c, p);
        mesh.verify();
        assert_eq!(mesh.triangle_count(), 4);
        assert_eq!(mesh.store[t1].points(), [a, p, c]);
        assert_eq!(mesh.store[t2].points(), [p, d, c]);

        // Every triangle still faces +Z
        for t in mesh.store.triangles() {
            let [a, b, c] = mesh.store[t].points().map(|p| mesh.store[p].pos);
            assert!((b - a).cross(&(c - a)).z > 0.0);
        }
    }
}
