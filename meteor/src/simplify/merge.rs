//! Quadric error edge contraction
use crate::{
    Mesh,
    build::State,
    linalg::Quadric,
    mesh::Mode,
    store::{PointId, Scratch},
};

impl Mesh {
    /// Contracts the cheapest edge in the mesh
    ///
    /// The removed point's quadric is added to the surviving one, which moves
    /// to the position minimizing their combined error.  This may be called
    /// between build steps; points from the slice being built are left alone.
    ///
    /// Returns the number of triangles removed, which is 0 once nothing can be
    /// contracted.
    pub fn merge(&mut self) -> usize {
        self.sync_heap();
        let r = self.contract_top();
        self.note_removed(r);
        r.triangles
    }

    /// Switches to merge mode, accumulating a quadric for every point
    fn enter_merge_mode(&mut self) {
        log::debug!(
            "computing quadrics for {} points ({:?} mode before)",
            self.point_count(),
            self.mode
        );
        self.kd.clear();
        for i in 0..self.heap.len() {
            let p = self.heap.points()[i];
            self.store[p].scratch = Scratch::Merge(Default::default());
        }
        self.heap.unsort();

        let mut next = self.store.first_triangle();
        while let Some(t) = next {
            let points = self.store[t].points();
            let [a, b, c] = points.map(|p| self.store[p].pos);
            let q = Quadric::from_triangle(a, b, c);
            for p in points {
                self.store[p].contraction_mut().quadric += q;
            }
            next = self.store.next_triangle(t);
        }
        self.mode = Mode::Merge;
    }

    /// Moves every eligible unsorted point into the heap
    ///
    /// While building, points whose quadrics may still grow are penalized by
    /// [`Settings::unsynced_bias`](crate::Settings::unsynced_bias).
    pub(crate) fn sync_heap(&mut self) {
        if self.mode != Mode::Merge {
            self.enter_merge_mode();
        } else if self.builder.state == State::Synced {
            return;
        }
        let bias = if self.builder.is_building() {
            self.settings.unsynced_bias
        } else {
            self.heap.seal();
            0.0
        };

        while self.heap.pending() > 0 {
            let p = self.heap.points()[self.heap.size()];
            if self.store[p].triangles().is_empty() {
                self.delete_point(p);
                continue;
            }
            self.refresh_contraction(p, true);
            self.store[p].contraction_mut().cost += bias;
            self.heap.insert(&mut self.store, p);
        }

        if self.builder.state == State::Unsynced {
            self.builder.state = State::Synced;
        }
    }

    /// Recomputes the cheapest contraction of `p` with its heap neighbors
    ///
    /// Neighbors for which `p` is now a better (or their recorded) partner are
    /// updated too.  With `init` set, `p` sits just past the heap and only
    /// neighbors already in the heap are considered.
    pub(crate) fn refresh_contraction(&mut self, p: PointId, init: bool) {
        let q = self.store[p].contraction().quadric;
        let mut best = (f64::INFINITY, None);
        for i in 0..self.store[p].triangles().len() {
            let t = self.store[p].triangles()[i];
            let tri = self.store[t].points();
            let Some(j) = tri.iter().position(|v| *v == p) else {
                unreachable!("{t:?} is listed by {p:?} but doesn't use it");
            };
            let np = tri[(j + 1) % 3];
            let skip = if init {
                self.store[p].index < self.store[np].index
            } else {
                !self.heap.contains(&self.store, np)
            };
            if skip {
                continue;
            }

            let c = q.contraction_cost(&self.store[np].contraction().quadric);
            let n = self.store[np].contraction_mut();
            if n.cost > c || n.target.is_none_or(|t| t == p) {
                n.cost = c;
                n.target = Some(p);
                self.heap.update(&mut self.store, np);
            }
            if c <= best.0 {
                best = (c, Some(np));
            }
        }
        let me = self.store[p].contraction_mut();
        me.cost = best.0;
        me.target = best.1;
    }
}

#[cfg(test)]
mod test {
    use crate::{Format, Mesh, simplify::test::sphere};

    #[test]
    fn five_merges() {
        let mut mesh = sphere(Format::COORDS, 0.1);
        let before = mesh.triangle_count();
        let mut removed = 0;
        for _ in 0..5 {
            let n = mesh.merge();
            assert!(n >= 1);
            removed += n;
            mesh.verify();
        }
        assert_eq!(mesh.triangle_count(), before - removed);
        assert_eq!(mesh.mergeable_triangle_count(), before - removed);
    }

    #[test]
    fn merge_to_target() {
        let mut mesh = sphere(Format::COORDS | Format::NORMALS, 0.1);
        let before = mesh.triangle_count();
        while mesh.triangle_count() > before / 4 {
            assert!(mesh.merge() > 0);
        }
        mesh.verify();

        // Surviving points stay close to the surface
        mesh.rewind();
        let mut pts = vec![0.0f32; mesh.point_count() * 3];
        mesh.read_points(mesh.point_count(), Format::COORDS, &mut pts)
            .unwrap();
        for p in pts.chunks_exact(3) {
            let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            assert!((r - 0.5f32.sqrt()).abs() < 0.05, "{p:?}");
        }
    }

    #[test]
    fn merge_small() {
        let mut mesh = Mesh::new(Format::COORDS);
        assert_eq!(mesh.merge(), 0);

        let mut mesh = sphere(Format::COORDS, 0.1);
        while mesh.merge() > 0 {}
        mesh.verify();
        assert!(mesh.point_count() < 4);
        assert_eq!(mesh.merge(), 0);
    }

    #[test]
    fn merge_while_building() {
        let mut mesh = Mesh::new(Format::COORDS);
        mesh.set_field(|x, y, z| x * x + y * y + z * z - 0.5);
        mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 0.05).unwrap();
        while mesh.build().unwrap() > 0 {
            while mesh.mergeable_triangle_count() > 500 {
                if mesh.merge() == 0 {
                    break;
                }
            }
        }
        mesh.verify();
        assert!(mesh.points_created() > mesh.point_count());
        assert!(mesh.triangle_count() > 0);
        // Switching to aggregation afterwards rebuilds the heap
        assert!(mesh.aggregate().unwrap() > 0);
        mesh.verify();
    }
}
