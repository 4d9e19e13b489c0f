//! Incremental marching-tetrahedrons polygonizer
//!
//! The grid is swept along X one plane at a time.  Each [`Mesh::build`] call
//! samples the next y-z plane and polygonizes the slab of cubes between it and
//! the previous plane, so callers can interleave building with simplification
//! or redraws.
//!
//! A surface point is created for every grid edge (including the face and body
//! diagonals introduced by the tetrahedral split) whose endpoint samples have
//! opposite signs.  Points on in-plane edges are kept with their plane and
//! reused by both slabs touching it; points on edges crossing a slab are only
//! needed by that slab.  Only two planes are kept at any time.
use nalgebra::Vector3;

use crate::{
    Error, Mesh,
    linalg::{Quadric, iterative_improve},
    mesh::Mode,
    store::PointId,
};

mod tetra;
use tetra::{Corner, EDGES, REFERENCE, TETRAHEDRA, TRIANGLES, X, Y, Z};

/// Samples closer to the surface than this are pushed off it
pub const SURFACE_EPSILON: f64 = 1e-4;

/// Axis-aligned sampling grid
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Grid {
    min: Vector3<f64>,
    step: f64,
    counts: [usize; 3],
}

impl Grid {
    /// Builds a grid with samples every `step` from `min` up to `max`
    ///
    /// The number of samples along each axis is `(max - min) / step + 1`,
    /// rounded down.
    pub fn new(
        min: Vector3<f64>,
        max: Vector3<f64>,
        step: f64,
    ) -> Result<Self, Error> {
        if !(step > 0.0 && step.is_finite()) {
            return Err(Error::InvalidGrid("step must be positive"));
        }
        if (0..3).any(|i| !(max[i] >= min[i])) {
            return Err(Error::InvalidGrid("max corner is below min corner"));
        }
        // Absorb rounding in the division, so that e.g. 2.0 / 0.1 counts 21
        let counts = std::array::from_fn(|i| {
            ((max[i] - min[i]) / step + 1.0 + 1e-9).floor() as usize
        });
        Ok(Self { min, step, counts })
    }

    /// Number of samples along each axis
    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// Distance between neighboring samples
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Position of the sample at the given grid index
    pub fn point(&self, i: usize, j: usize, k: usize) -> Vector3<f64> {
        self.min + Vector3::new(i as f64, j as f64, k as f64) * self.step
    }

    /// Checks whether the grid has at least one cube
    fn has_cubes(&self) -> bool {
        self.counts.iter().all(|c| *c >= 2)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) enum State {
    #[default]
    NotStarted,
    /// Building, with points from earlier steps not yet queued for merging
    Unsynced,
    /// Building, with every eligible point queued for merging
    Synced,
}

/// Samples and edge points of one y-z plane
///
/// All arrays are indexed by `j * stride + k`, where the stride is the number
/// of entries along Z for that array.
#[derive(Default)]
struct Plane {
    values: Vec<f64>,
    /// Edges from `(j, k)` to `(j + 1, k)`
    y_edges: Vec<Option<PointId>>,
    /// Edges from `(j, k)` to `(j, k + 1)`
    z_edges: Vec<Option<PointId>>,
    /// Face diagonals from `(j, k + 1)` to `(j + 1, k)`
    diagonals: Vec<Option<PointId>>,
}

/// Edge points between the previous plane (`lo`) and the current one (`hi`)
#[derive(Default)]
struct Slab {
    /// `lo(j, k)` to `hi(j, k)`
    x_edges: Vec<Option<PointId>>,
    /// `lo(j, k)` to `hi(j, k + 1)`
    xz: Vec<Option<PointId>>,
    /// `lo(j + 1, k)` to `hi(j, k)`
    xy: Vec<Option<PointId>>,
    /// `lo(j + 1, k)` to `hi(j, k + 1)`
    body: Vec<Option<PointId>>,
}

impl Slab {
    /// Looks up the point on the edge between two corners of cube `(j, k)`
    fn edge(
        &self,
        lo: &Plane,
        hi: &Plane,
        nz: usize,
        (j, k): (usize, usize),
        a: Corner,
        b: Corner,
    ) -> Option<PointId> {
        let (a, b) = if a & X { (b, a) } else { (a, b) };
        let d = a ^ b;
        let plane = if a & X { hi } else { lo };
        let (ay, az) = (a.offset(Y), a.offset(Z));
        match (d & X, d & Y, d & Z) {
            (false, true, false) => plane.y_edges[j * nz + k + az],
            (false, false, true) => plane.z_edges[(j + ay) * (nz - 1) + k],
            (false, true, true) => {
                debug_assert_ne!(a & Y, a & Z);
                plane.diagonals[j * (nz - 1) + k]
            }
            (true, false, false) => self.x_edges[(j + ay) * nz + k + az],
            (true, false, true) => {
                debug_assert!(!(a & Z));
                self.xz[(j + ay) * (nz - 1) + k]
            }
            (true, true, false) => {
                debug_assert!(a & Y);
                self.xy[j * nz + k + az]
            }
            (true, true, true) => {
                debug_assert_eq!(a, REFERENCE);
                self.body[j * (nz - 1) + k]
            }
            (false, false, false) => unreachable!("{a:?} and {b:?} are equal"),
        }
    }
}

/// State of the incremental builder
#[derive(Default)]
pub(crate) struct Builder {
    grid: Option<Grid>,
    pub state: State,
    /// Index of the next plane to sample
    next: usize,
    planes: [Plane; 2],
    slab: Slab,
}

impl Builder {
    pub fn is_building(&self) -> bool {
        self.state != State::NotStarted
    }

    /// Stops any build in progress, releasing the caches
    pub fn abandon(&mut self) {
        self.state = State::NotStarted;
        self.next = 0;
        self.planes = Default::default();
        self.slab = Slab::default();
    }
}

impl Mesh {
    /// Sets the sampling grid, abandoning any build in progress
    pub fn set_grid(&mut self, grid: Grid) {
        self.builder.abandon();
        self.builder.grid = Some(grid);
    }

    /// Sets the sampling grid from its bounds and step
    #[allow(clippy::too_many_arguments)]
    pub fn set_size(
        &mut self,
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
        zmin: f64,
        zmax: f64,
        step: f64,
    ) -> Result<(), Error> {
        let g = Grid::new(
            Vector3::new(xmin, ymin, zmin),
            Vector3::new(xmax, ymax, zmax),
            step,
        );
        let grid = self.latch(g)?;
        self.set_grid(grid);
        Ok(())
    }

    /// Returns the sampling grid, if one has been set
    pub fn grid(&self) -> Option<Grid> {
        self.builder.grid
    }

    /// Checks whether a build has been started and not yet finished
    pub fn is_building(&self) -> bool {
        self.builder.is_building()
    }

    /// Runs one step of the polygonizer
    ///
    /// The first call discards the current mesh.  Each call then samples one
    /// more y-z plane and triangulates the cubes behind it, returning the
    /// number of planes left; `0` means the mesh is complete.
    pub fn build(&mut self) -> Result<usize, Error> {
        let r = self.build_step();
        self.latch(r)
    }

    fn build_step(&mut self) -> Result<usize, Error> {
        let grid = self
            .builder
            .grid
            .ok_or(Error::InvalidGrid("no grid has been set"))?;
        if self.funcs.field.is_none() {
            return Err(Error::MissingCallback("field"));
        }

        let mut b = std::mem::take(&mut self.builder);
        if b.state == State::NotStarted {
            self.start_build(&grid, &mut b);
        }
        let remaining = if grid.has_cubes() {
            self.build_slice(&grid, &mut b);
            grid.counts[0] - b.next
        } else {
            0
        };
        self.builder = b;

        if remaining == 0 {
            self.finish_build();
        }
        Ok(remaining)
    }

    fn start_build(&mut self, grid: &Grid, b: &mut Builder) {
        let [nx, ny, nz] = grid.counts;
        log::debug!("starting build on {nx}×{ny}×{nz} grid");
        self.reset(self.store.format());
        b.state = State::Unsynced;
        b.next = 1;
        self.sample_plane(grid, 0, &mut b.planes[0]);
    }

    fn build_slice(&mut self, grid: &Grid, b: &mut Builder) {
        // Everything created so far is complete enough to be merged
        self.heap.seal();
        self.mergeable = self.store.triangle_count();
        b.state = State::Unsynced;

        let i = b.next;
        if i == 1 {
            self.plane_edges(grid, 0, &mut b.planes[0]);
        }
        let cur = i % 2;
        self.sample_plane(grid, i, &mut b.planes[cur]);
        self.plane_edges(grid, i, &mut b.planes[cur]);

        let [p0, p1] = &b.planes;
        let (lo, hi) = if cur == 1 { (p0, p1) } else { (p1, p0) };
        self.slab_edges(grid, i, lo, hi, &mut b.slab);
        self.polygonize(grid, lo, hi, &b.slab);

        b.next += 1;
        self.mark_modified();
        log::trace!(
            "slice {i}: {} points, {} triangles",
            self.point_count(),
            self.triangle_count()
        );
    }

    fn finish_build(&mut self) {
        self.builder.abandon();
        self.heap.seal();
        if self.mode == Mode::Merge {
            self.sync_heap();
        } else {
            let orphans: Vec<_> = self
                .heap
                .points()
                .iter()
                .copied()
                .filter(|p| self.store[*p].triangles().is_empty())
                .collect();
            for p in orphans {
                self.delete_point(p);
            }
        }
        self.mergeable = self.store.triangle_count();
        log::debug!(
            "build finished with {} points and {} triangles",
            self.point_count(),
            self.triangle_count()
        );
    }

    fn sample_plane(&self, grid: &Grid, i: usize, plane: &mut Plane) {
        let [_, ny, nz] = grid.counts;
        plane.values.clear();
        for j in 0..ny {
            for k in 0..nz {
                let v = self.funcs.field(grid.point(i, j, k)).unwrap_or(0.0);
                plane.values.push(if v.abs() < SURFACE_EPSILON {
                    SURFACE_EPSILON
                } else {
                    v
                });
            }
        }
    }

    /// Creates a point where the surface crosses the segment `a`-`b`, if it does
    fn edge_point(
        &mut self,
        a: (Vector3<f64>, f64),
        b: (Vector3<f64>, f64),
    ) -> Option<PointId> {
        if a.1 * b.1 >= 0.0 {
            return None;
        }
        let field = self.funcs.field.as_ref()?;
        let pos = iterative_improve(a, b, |p| field(p.x, p.y, p.z));
        let p = self.make_point(pos);
        self.init_aux(p);
        Some(p)
    }

    fn plane_edges(&mut self, grid: &Grid, i: usize, plane: &mut Plane) {
        let [_, ny, nz] = grid.counts;
        let values = &plane.values;
        let at = |j: usize, k: usize| (grid.point(i, j, k), values[j * nz + k]);

        let mut y_edges = Vec::with_capacity((ny - 1) * nz);
        for j in 0..ny - 1 {
            for k in 0..nz {
                y_edges.push(self.edge_point(at(j, k), at(j + 1, k)));
            }
        }
        let mut z_edges = Vec::with_capacity(ny * (nz - 1));
        for j in 0..ny {
            for k in 0..nz - 1 {
                z_edges.push(self.edge_point(at(j, k), at(j, k + 1)));
            }
        }
        let mut diagonals = Vec::with_capacity((ny - 1) * (nz - 1));
        for j in 0..ny - 1 {
            for k in 0..nz - 1 {
                diagonals.push(self.edge_point(at(j, k + 1), at(j + 1, k)));
            }
        }
        plane.y_edges = y_edges;
        plane.z_edges = z_edges;
        plane.diagonals = diagonals;
    }

    fn slab_edges(
        &mut self,
        grid: &Grid,
        i: usize,
        lo: &Plane,
        hi: &Plane,
        slab: &mut Slab,
    ) {
        let [_, ny, nz] = grid.counts;
        let lo = |j: usize, k: usize| {
            (grid.point(i - 1, j, k), lo.values[j * nz + k])
        };
        let hi = |j: usize, k: usize| (grid.point(i, j, k), hi.values[j * nz + k]);

        slab.x_edges.clear();
        for j in 0..ny {
            for k in 0..nz {
                slab.x_edges.push(self.edge_point(lo(j, k), hi(j, k)));
            }
        }
        slab.xz.clear();
        for j in 0..ny {
            for k in 0..nz - 1 {
                slab.xz.push(self.edge_point(lo(j, k), hi(j, k + 1)));
            }
        }
        slab.xy.clear();
        for j in 0..ny - 1 {
            for k in 0..nz {
                slab.xy.push(self.edge_point(lo(j + 1, k), hi(j, k)));
            }
        }
        slab.body.clear();
        for j in 0..ny - 1 {
            for k in 0..nz - 1 {
                slab.body.push(self.edge_point(lo(j + 1, k), hi(j, k + 1)));
            }
        }
    }

    /// Emits triangles for every cube in the slab between `lo` and `hi`
    fn polygonize(&mut self, grid: &Grid, lo: &Plane, hi: &Plane, slab: &Slab) {
        let [_, ny, nz] = grid.counts;
        for j in 0..ny - 1 {
            for k in 0..nz - 1 {
                let value = |c: Corner| {
                    let plane = if c & X { hi } else { lo };
                    plane.values[(j + c.offset(Y)) * nz + k + c.offset(Z)]
                };
                let inside = value(REFERENCE) < 0.0;
                for tet in TETRAHEDRA {
                    let v0 = value(tet[0]);
                    let mask = (1..4)
                        .filter(|i| v0 * value(tet[*i]) < 0.0)
                        .fold(0, |m, i| m | (1 << (i - 1)));
                    for tri in TRIANGLES[mask] {
                        let pts = (*tri).map(|e| {
                            let (a, b) = EDGES[e];
                            slab.edge(lo, hi, nz, (j, k), tet[a], tet[b])
                        });
                        let [Some(a), Some(b), Some(c)] = pts else {
                            panic!("missing edge point in cube ({j}, {k})");
                        };
                        if inside {
                            self.emit_triangle([a, b, c]);
                        } else {
                            self.emit_triangle([a, c, b]);
                        }
                    }
                }
            }
        }
    }

    fn emit_triangle(&mut self, points: [PointId; 3]) {
        self.store.new_triangle(points);
        if self.mode == Mode::Merge {
            let [a, b, c] = points.map(|p| self.store[p].pos);
            let q = Quadric::from_triangle(a, b, c);
            for p in points {
                self.store[p].contraction_mut().quadric += q;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Format, Settings, store::arena::Allocation};
    use approx::assert_relative_eq;

    fn sphere(x: f64, y: f64, z: f64) -> f64 {
        x * x + y * y + z * z - 0.5
    }

    fn build_sphere(step: f64, settings: Settings) -> Mesh {
        let mut mesh = Mesh::with_settings(Format::COORDS, settings);
        mesh.set_field(sphere);
        mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, step).unwrap();
        while mesh.build().unwrap() > 0 {}
        mesh
    }

    /// Reads back every point and triangle
    fn snapshot(mesh: &mut Mesh) -> (Vec<f64>, Vec<u32>) {
        mesh.rewind();
        let mut pts = vec![0.0; mesh.point_count() * 3];
        let n = mesh
            .read_points(mesh.point_count(), Format::COORDS, &mut pts)
            .unwrap();
        assert_eq!(n, mesh.point_count());
        let mut tris = vec![0; mesh.triangle_count() * 3];
        let n = mesh
            .read_triangles(mesh.triangle_count(), Format::INDEX, &mut tris)
            .unwrap();
        assert_eq!(n, mesh.triangle_count());
        (pts, tris)
    }

    fn signed_volume(mesh: &mut Mesh) -> f64 {
        let (pts, tris) = snapshot(mesh);
        let p = |i: u32| {
            let i = i as usize * 3;
            Vector3::new(pts[i], pts[i + 1], pts[i + 2])
        };
        tris.chunks_exact(3)
            .map(|t| p(t[0]).dot(&p(t[1]).cross(&p(t[2]))) / 6.0)
            .sum()
    }

    #[test]
    fn grid_counts() {
        let g = Grid::new(Vector3::repeat(-1.0), Vector3::repeat(1.0), 0.1)
            .unwrap();
        assert_eq!(g.counts(), [21, 21, 21]);
        assert_relative_eq!(g.point(20, 0, 10), Vector3::new(1.0, -1.0, 0.0));

        assert!(Grid::new(Vector3::zeros(), Vector3::zeros(), 0.0).is_err());
        assert!(Grid::new(Vector3::x(), Vector3::zeros(), 0.1).is_err());
    }

    #[test]
    fn sphere_is_closed() {
        let mut mesh = build_sphere(0.1, Settings::default());
        assert!(mesh.point_count() > 0);
        assert_eq!(mesh.triangle_count(), 2 * mesh.point_count() - 4);
        assert_eq!(mesh.points_created(), mesh.point_count());
        mesh.verify();

        // Every point lies on the surface
        let (pts, _) = snapshot(&mut mesh);
        for p in pts.chunks_exact(3) {
            assert!(sphere(p[0], p[1], p[2]).abs() < 1e-3);
        }
    }

    #[test]
    fn sphere_is_outward() {
        let mut mesh = build_sphere(0.1, Settings::default());
        let v = signed_volume(&mut mesh);
        let r: f64 = 0.5f64.sqrt();
        let expected = 4.0 / 3.0 * std::f64::consts::PI * r.powi(3);
        assert!(v > 0.0);
        assert_relative_eq!(v, expected, max_relative = 0.05);
    }

    #[test]
    fn deterministic() {
        let mut a = build_sphere(0.1, Settings::default());
        let mut b = build_sphere(0.1, Settings::default());
        assert_eq!(snapshot(&mut a), snapshot(&mut b));

        // Allocation strategy is invisible from the outside
        let mut c = build_sphere(
            0.1,
            Settings {
                allocation: Allocation::Collected,
                ..Settings::default()
            },
        );
        assert_eq!(snapshot(&mut a), snapshot(&mut c));
    }

    #[test]
    fn incremental_steps() {
        let mut mesh = Mesh::new(Format::COORDS);
        mesh.set_field(sphere);
        mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 0.25).unwrap();
        assert!(!mesh.is_building());
        let mut expected = 7;
        loop {
            let n = mesh.build().unwrap();
            assert_eq!(n, expected);
            if n == 0 {
                break;
            }
            assert!(mesh.is_building());
            expected -= 1;
        }
        assert!(!mesh.is_building());
        mesh.verify();

        // Building again starts from scratch
        let tris = mesh.triangle_count();
        while mesh.build().unwrap() > 0 {}
        assert_eq!(mesh.triangle_count(), tris);
    }

    #[test]
    fn torus_has_genus_one() {
        let mut mesh = Mesh::new(Format::COORDS);
        mesh.set_field(|x, y, z| {
            let r = (x * x + y * y).sqrt();
            (0.4 - r).powi(2) + z * z - 0.04
        });
        mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 0.05).unwrap();
        while mesh.build().unwrap() > 0 {}
        mesh.verify();
        // V - E + F = 0, with E = 3F / 2
        assert_eq!(mesh.triangle_count(), 2 * mesh.point_count());
    }

    #[test]
    fn aux_callbacks() {
        let mut mesh = Mesh::new(Format::NORMALS | Format::COLORS);
        mesh.set_field(sphere);
        mesh.set_normal_fn(|p| p.normalize());
        mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 0.2).unwrap();
        while mesh.build().unwrap() > 0 {}

        mesh.rewind();
        let mut buf = vec![0.0; mesh.point_count() * 9];
        let n = mesh
            .read_points(mesh.point_count(), Format::ALL & mesh.format(), &mut buf)
            .unwrap();
        assert_eq!(n, mesh.point_count());
        for rec in buf.chunks_exact(9) {
            let pos = Vector3::new(rec[0], rec[1], rec[2]);
            let normal = Vector3::new(rec[3], rec[4], rec[5]);
            assert_relative_eq!(normal, pos.normalize(), epsilon = 1e-12);
            // No color function, so colors stay zeroed
            assert_eq!(&rec[6..9], &[0.0; 3]);
        }
    }

    #[test]
    fn errors() {
        let mut mesh = Mesh::new(Format::COORDS);
        assert!(matches!(mesh.build(), Err(Error::InvalidGrid(..))));
        mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 0.5).unwrap();
        assert_eq!(mesh.build(), Err(Error::MissingCallback("field")));
        assert!(mesh.take_error().unwrap().contains("field"));
        assert!(mesh.take_error().is_none());

        // A degenerate grid builds an empty mesh in one step
        mesh.set_field(sphere);
        mesh.set_size(0.0, 0.0, -1.0, 1.0, -1.0, 1.0, 0.5).unwrap();
        assert_eq!(mesh.build(), Ok(0));
        assert_eq!(mesh.point_count(), 0);
    }
}
