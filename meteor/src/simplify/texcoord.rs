//! Splitting the mesh along texture-coordinate seams
use crate::{
    Error, Mesh,
    data::Format,
    linalg::lerp,
    store::{PointId, TriangleId},
};

/// Maps a wrapped coordinate in `[0, 1)` to `[-0.5, 0.5]` around the seam
fn seam_offset(t: f64) -> f64 {
    if t > 0.5 { t - 1.0 } else { t }
}

/// Edges spanning more than this across the seam are assumed to go the other
/// way around
const MAX_SEAM_SPAN: f64 = 0.4;

impl Mesh {
    /// Makes texture coordinates continuous across each triangle
    ///
    /// Every texture coordinate is wrapped into `[0, 1)`.  Edges crossing the
    /// wrap-around are split at 0, and points on the seam are duplicated so
    /// that triangles on the high side use a copy at 1.  Does nothing if the
    /// mesh stores no texture coordinates.
    ///
    /// Points where several seams meet (e.g. the poles of a sphere) are not
    /// corrected.
    pub fn correct_tex_coords(&mut self) -> Result<(), Error> {
        if !self.format().contains(Format::TEXCOORDS) {
            return Ok(());
        }
        if self.is_building() {
            return self.latch(Err(Error::BuildInProgress(
                "correct texture coordinates",
            )));
        }
        self.set_idle();
        for k in 0..3 {
            self.wrap_tex_coords(k);
            let split = self.split_seam_edges(k);
            let duplicated = self.duplicate_seam_points(k);
            log::debug!(
                "texture axis {k}: split {split} edges, duplicated {duplicated} points"
            );
        }
        self.mark_modified();
        Ok(())
    }

    fn tex(&self, p: PointId, k: usize) -> f64 {
        self.store
            .aux(p, Format::TEXCOORDS)
            .map(|t| t[k])
            .unwrap_or_default()
    }

    fn set_tex(&mut self, p: PointId, k: usize, v: f64) {
        if let Some(mut t) = self.store.aux(p, Format::TEXCOORDS) {
            t[k] = v;
            self.store.set_aux(p, Format::TEXCOORDS, t);
        }
    }

    fn wrap_tex_coords(&mut self, k: usize) {
        for i in 0..self.heap.len() {
            let p = self.heap.points()[i];
            let v = self.tex(p, k).rem_euclid(1.0);
            // rem_euclid can round up to exactly 1 for tiny negative inputs
            let v = if v.is_nan() || v >= 1.0 { 0.0 } else { v };
            self.set_tex(p, k, v);
        }
    }

    fn split_seam_edges(&mut self, k: usize) -> usize {
        let mut split = 0;
        let mut next = self.store.first_triangle();
        while let Some(t) = next {
            for (i, j) in [(2, 0), (0, 1), (1, 2)] {
                let tri = self.store[t].points();
                let (p1, p2) = (tri[i], tri[j]);
                let t1 = seam_offset(self.tex(p1, k));
                let t2 = seam_offset(self.tex(p2, k));
                if t1 * t2 < 0.0 && (t1 - t2).abs() < MAX_SEAM_SPAN {
                    let pos = lerp(
                        self.store[p1].pos,
                        self.store[p2].pos,
                        t1.abs() / (t1 - t2).abs(),
                    );
                    let p = self.make_point(pos);
                    self.blend_aux(p, p1, p2);
                    self.set_tex(p, k, 0.0);
                    self.slice_edge(p1, p2, p);
                    split += 1;
                }
            }
            next = self.store.next_triangle(t);
        }
        split
    }

    fn duplicate_seam_points(&mut self, k: usize) -> usize {
        let seam: Vec<PointId> = self
            .heap
            .points()
            .iter()
            .copied()
            .filter(|p| self.tex(*p, k) == 0.0)
            .collect();
        let mut duplicated = 0;
        for p in seam {
            let high: Vec<TriangleId> = self.store[p]
                .triangles()
                .iter()
                .copied()
                .filter(|t| {
                    self.store[*t]
                        .points()
                        .iter()
                        .any(|q| *q != p && self.tex(*q, k) > 0.5)
                })
                .collect();
            if high.is_empty() {
                continue;
            }
            let np = self.make_point(self.store[p].pos);
            self.store[np].extra = self.store[p].extra.clone();
            self.set_tex(np, k, 1.0);
            for t in high {
                self.store.replace_vertex(t, p, np);
            }
            if self.store[p].triangles().is_empty() {
                self.delete_point(p);
            }
            duplicated += 1;
        }
        duplicated
    }
}
