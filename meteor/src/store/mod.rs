//! Point/triangle graph storage
//!
//! Points and triangles live in [`Arena`]s and refer to each other only
//! through generational handles.  Every triangle knows its three points; every
//! point keeps the list of triangles using it.  The two directions are kept in
//! lockstep by [`MeshStore`], and any asymmetry is treated as corruption.
//!
//! Triangles are also threaded onto one doubly linked list in creation order,
//! which is what full traversals and the incremental builder walk.
use arrayvec::ArrayVec;
use nalgebra::Vector3;

use crate::{data::Format, kdtree::KdNode, linalg::Quadric};

pub(crate) mod arena;
use arena::{Allocation, Arena};

arena::define_handle!(PointId, "Handle to a point in a [`MeshStore`]");
arena::define_handle!(TriangleId, "Handle to a triangle in a [`MeshStore`]");

/// Marker for points that are not stored in the heap array
pub const NOT_LIVE: usize = usize::MAX;

/// Per-point state used by the simplifiers
///
/// Only one simplification mode is active at a time, so a point carries the
/// state for that mode and nothing else.  Reading the state of another mode is
/// a logic error and panics.
#[derive(Clone, Debug, Default)]
pub(crate) enum Scratch {
    #[default]
    Idle,
    Merge(Contraction),
    Aggregate(Neighbor),
    Cut(f64),
}

/// Quadric-mode state: accumulated error and the cheapest contraction
#[derive(Copy, Clone, Debug)]
pub(crate) struct Contraction {
    pub quadric: Quadric,
    pub cost: f64,
    pub target: Option<PointId>,
}

impl Default for Contraction {
    fn default() -> Self {
        Self {
            quadric: Quadric::new(),
            cost: f64::INFINITY,
            target: None,
        }
    }
}

/// Aggregation-mode state: kd-tree links and the nearest known point
#[derive(Copy, Clone, Debug)]
pub(crate) struct Neighbor {
    pub node: KdNode,
    /// Squared distance to `nearest`
    pub dist: f64,
    pub nearest: Option<PointId>,
}

impl Default for Neighbor {
    fn default() -> Self {
        Self {
            node: KdNode::default(),
            dist: f64::INFINITY,
            nearest: None,
        }
    }
}

/// A mesh vertex
#[derive(Clone, Debug)]
pub struct Point {
    /// Position
    pub pos: Vector3<f64>,
    /// Auxiliary vectors, laid out as described by [`Format::slot`]
    pub(crate) extra: ArrayVec<Vector3<f64>, 3>,
    pub(crate) scratch: Scratch,
    /// Position in the heap array, or [`NOT_LIVE`]
    pub(crate) index: usize,
    pub(crate) tris: Vec<TriangleId>,
}

impl Point {
    /// Heap key for the current simplification mode
    pub(crate) fn cost(&self) -> f64 {
        match &self.scratch {
            Scratch::Merge(c) => c.cost,
            Scratch::Aggregate(n) => n.dist,
            s => panic!("point has no heap key in state {s:?}"),
        }
    }

    pub(crate) fn contraction(&self) -> &Contraction {
        match &self.scratch {
            Scratch::Merge(c) => c,
            s => panic!("expected merge state, found {s:?}"),
        }
    }

    pub(crate) fn contraction_mut(&mut self) -> &mut Contraction {
        match &mut self.scratch {
            Scratch::Merge(c) => c,
            s => panic!("expected merge state, found {s:?}"),
        }
    }

    pub(crate) fn neighbor(&self) -> &Neighbor {
        match &self.scratch {
            Scratch::Aggregate(n) => n,
            s => panic!("expected aggregate state, found {s:?}"),
        }
    }

    pub(crate) fn neighbor_mut(&mut self) -> &mut Neighbor {
        match &mut self.scratch {
            Scratch::Aggregate(n) => n,
            s => panic!("expected aggregate state, found {s:?}"),
        }
    }

    pub(crate) fn cut(&self) -> f64 {
        match &self.scratch {
            Scratch::Cut(c) => *c,
            s => panic!("expected cut state, found {s:?}"),
        }
    }

    /// Returns the triangles using this point
    pub fn triangles(&self) -> &[TriangleId] {
        &self.tris
    }
}

/// A mesh face, wound counter-clockwise when seen from outside
#[derive(Clone, Debug)]
pub struct Triangle {
    points: [PointId; 3],
    prev: Option<TriangleId>,
    next: Option<TriangleId>,
}

impl Triangle {
    /// Returns the triangle's vertices in winding order
    pub fn points(&self) -> [PointId; 3] {
        self.points
    }

    /// Returns the position of `p` within the triangle
    pub fn position(&self, p: PointId) -> Option<usize> {
        self.points.iter().position(|q| *q == p)
    }

    /// Checks whether `p` is a vertex of this triangle
    pub fn contains(&self, p: PointId) -> bool {
        self.points.contains(&p)
    }
}

/// Owner of every point and triangle in a mesh
pub struct MeshStore {
    points: Arena<Point, PointId>,
    triangles: Arena<Triangle, TriangleId>,
    first: Option<TriangleId>,
    last: Option<TriangleId>,
    format: Format,
    points_created: usize,
    triangles_created: usize,
}

impl MeshStore {
    /// Builds an empty store for points of the given format
    pub fn new(format: Format, allocation: Allocation) -> Self {
        Self {
            points: Arena::new(allocation),
            triangles: Arena::new(allocation),
            first: None,
            last: None,
            format: format | Format::COORDS,
            points_created: 0,
            triangles_created: 0,
        }
    }

    /// Drops every point and triangle and switches to a new point format
    ///
    /// Coordinates are always part of the format.
    pub fn reset(&mut self, format: Format) {
        self.points.clear();
        self.triangles.clear();
        self.first = None;
        self.last = None;
        self.format = format | Format::COORDS;
        self.points_created = 0;
        self.triangles_created = 0;
    }

    /// Fields stored for each point
    pub fn format(&self) -> Format {
        self.format
    }

    /// Number of live points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Number of live triangles
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Number of points created since the last reset
    pub fn points_created(&self) -> usize {
        self.points_created
    }

    /// Number of triangles created since the last reset
    pub fn triangles_created(&self) -> usize {
        self.triangles_created
    }

    /// Checks whether the handle refers to a live point
    pub fn contains_point(&self, p: PointId) -> bool {
        self.points.contains(p)
    }

    /// Checks whether the handle refers to a live triangle
    pub fn contains_triangle(&self, t: TriangleId) -> bool {
        self.triangles.contains(t)
    }

    /// Creates a point with zeroed auxiliary data and no triangles
    pub fn new_point(&mut self, pos: Vector3<f64>) -> PointId {
        let parts = self.format.extra_parts();
        let extra = (0..parts).map(|_| Vector3::zeros()).collect();
        self.points_created += 1;
        self.points.insert(
            parts,
            Point {
                pos,
                extra,
                scratch: Scratch::Idle,
                index: NOT_LIVE,
                tris: vec![],
            },
        )
    }

    /// Releases a point
    ///
    /// # Panics
    /// If any triangle still uses the point
    pub fn free_point(&mut self, p: PointId) -> Point {
        let n = self.points[p].tris.len();
        assert!(n == 0, "freeing point {p:?} still used by {n} triangles");
        self.points.remove(p)
    }

    /// Creates a triangle and registers it with its three points
    ///
    /// # Panics
    /// If the points are not distinct
    pub fn new_triangle(&mut self, points: [PointId; 3]) -> TriangleId {
        let [a, b, c] = points;
        assert!(
            a != b && b != c && a != c,
            "degenerate triangle {points:?}"
        );
        let t = self.triangles.insert(
            0,
            Triangle {
                points,
                prev: self.last,
                next: None,
            },
        );
        match self.last {
            Some(last) => self.triangles[last].next = Some(t),
            None => self.first = Some(t),
        }
        self.last = Some(t);
        for p in points {
            self.add_triangle_to_point_list(p, t);
        }
        self.triangles_created += 1;
        t
    }

    /// Unregisters a triangle from its points and releases it
    pub fn free_triangle(&mut self, t: TriangleId) {
        let tri = &self.triangles[t];
        let (prev, next, points) = (tri.prev, tri.next, tri.points);
        for p in points {
            self.remove_triangle_from_point_list(p, t);
        }
        match prev {
            Some(prev) => self.triangles[prev].next = next,
            None => self.first = next,
        }
        match next {
            Some(next) => self.triangles[next].prev = prev,
            None => self.last = prev,
        }
        self.triangles.remove(t);
    }

    /// Records that `t` uses `p`
    pub fn add_triangle_to_point_list(&mut self, p: PointId, t: TriangleId) {
        self.points[p].tris.push(t);
    }

    /// Forgets that `t` uses `p`
    ///
    /// # Panics
    /// If `t` is not in the point's triangle list
    pub fn remove_triangle_from_point_list(
        &mut self,
        p: PointId,
        t: TriangleId,
    ) {
        let tris = &mut self.points[p].tris;
        match tris.iter().position(|q| *q == t) {
            Some(i) => {
                tris.swap_remove(i);
            }
            None => panic!("triangle {t:?} missing from point {p:?}"),
        }
    }

    /// Replaces vertex `old` of triangle `t` with `new`, keeping its winding
    ///
    /// # Panics
    /// If `old` is not a vertex of `t`, or `new` already is
    pub fn replace_vertex(&mut self, t: TriangleId, old: PointId, new: PointId) {
        let tri = &mut self.triangles[t];
        assert!(!tri.contains(new), "{new:?} is already a vertex of {t:?}");
        let Some(i) = tri.position(old) else {
            panic!("{old:?} is not a vertex of {t:?}");
        };
        tri.points[i] = new;
        self.remove_triangle_from_point_list(old, t);
        self.add_triangle_to_point_list(new, t);
    }

    /// First triangle in creation order
    pub fn first_triangle(&self) -> Option<TriangleId> {
        self.first
    }

    /// Triangle following `t` in creation order
    pub fn next_triangle(&self, t: TriangleId) -> Option<TriangleId> {
        self.triangles[t].next
    }

    /// Iterates over live triangles in creation order
    pub fn triangles(&self) -> impl Iterator<Item = TriangleId> + '_ {
        std::iter::successors(self.first, |t| self.triangles[*t].next)
    }

    /// Reads an auxiliary vector, if the format has it
    pub fn aux(&self, p: PointId, field: Format) -> Option<Vector3<f64>> {
        self.format.slot(field).map(|i| self.points[p].extra[i])
    }

    /// Writes an auxiliary vector, ignoring fields outside the format
    pub fn set_aux(&mut self, p: PointId, field: Format, v: Vector3<f64>) {
        if let Some(i) = self.format.slot(field) {
            self.points[p].extra[i] = v;
        }
    }
}

impl std::ops::Index<PointId> for MeshStore {
    type Output = Point;
    fn index(&self, p: PointId) -> &Point {
        &self.points[p]
    }
}

impl std::ops::IndexMut<PointId> for MeshStore {
    fn index_mut(&mut self, p: PointId) -> &mut Point {
        &mut self.points[p]
    }
}

impl std::ops::Index<TriangleId> for MeshStore {
    type Output = Triangle;
    fn index(&self, t: TriangleId) -> &Triangle {
        &self.triangles[t]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> MeshStore {
        MeshStore::new(Format::NORMALS | Format::COLORS, Allocation::FreeList)
    }

    fn quad(s: &mut MeshStore) -> [PointId; 4] {
        [
            s.new_point(Vector3::new(0.0, 0.0, 0.0)),
            s.new_point(Vector3::new(1.0, 0.0, 0.0)),
            s.new_point(Vector3::new(1.0, 1.0, 0.0)),
            s.new_point(Vector3::new(0.0, 1.0, 0.0)),
        ]
    }

    #[test]
    fn links() {
        let mut s = store();
        let [a, b, c, d] = quad(&mut s);
        let t1 = s.new_triangle([a, b, c]);
        let t2 = s.new_triangle([a, c, d]);
        assert_eq!(s.triangle_count(), 2);
        assert_eq!(s[a].triangles(), &[t1, t2]);
        assert_eq!(s[b].triangles(), &[t1]);
        assert_eq!(s.triangles().collect::<Vec<_>>(), vec![t1, t2]);

        s.free_triangle(t1);
        assert_eq!(s[a].triangles(), &[t2]);
        assert!(s[b].triangles().is_empty());
        assert_eq!(s.triangles().collect::<Vec<_>>(), vec![t2]);
        assert_eq!(s.first_triangle(), Some(t2));

        s.free_point(b);
        assert_eq!(s.point_count(), 3);
        assert_eq!(s.points_created(), 4);
        assert_eq!(s.triangles_created(), 2);
    }

    #[test]
    fn unlink_middle() {
        let mut s = store();
        let [a, b, c, d] = quad(&mut s);
        let t1 = s.new_triangle([a, b, c]);
        let t2 = s.new_triangle([a, c, d]);
        let t3 = s.new_triangle([b, d, c]);
        s.free_triangle(t2);
        assert_eq!(s.triangles().collect::<Vec<_>>(), vec![t1, t3]);
        assert_eq!(s.next_triangle(t1), Some(t3));
        s.free_triangle(t3);
        s.free_triangle(t1);
        assert_eq!(s.first_triangle(), None);
        assert_eq!(s.triangle_count(), 0);
    }

    #[test]
    fn replace() {
        let mut s = store();
        let [a, b, c, d] = quad(&mut s);
        let t = s.new_triangle([a, b, c]);
        s.replace_vertex(t, b, d);
        assert_eq!(s[t].points(), [a, d, c]);
        assert!(s[b].triangles().is_empty());
        assert_eq!(s[d].triangles(), &[t]);
    }

    #[test]
    fn aux_layout() {
        let mut s = store();
        let p = s.new_point(Vector3::zeros());
        assert_eq!(s[p].extra.len(), 2);
        s.set_aux(p, Format::COLORS, Vector3::new(1.0, 0.5, 0.0));
        s.set_aux(p, Format::TEXCOORDS, Vector3::new(9.0, 9.0, 9.0));
        assert_eq!(s.aux(p, Format::NORMALS), Some(Vector3::zeros()));
        assert_eq!(s.aux(p, Format::COLORS), Some(Vector3::new(1.0, 0.5, 0.0)));
        assert_eq!(s.aux(p, Format::TEXCOORDS), None);
    }

    #[test]
    #[should_panic(expected = "still used")]
    fn free_used_point() {
        let mut s = store();
        let [a, b, c, _] = quad(&mut s);
        s.new_triangle([a, b, c]);
        s.free_point(a);
    }

    #[test]
    #[should_panic(expected = "missing from point")]
    fn asymmetric_link() {
        let mut s = store();
        let [a, b, c, d] = quad(&mut s);
        let t = s.new_triangle([a, b, c]);
        s.remove_triangle_from_point_list(d, t);
    }

    #[test]
    #[should_panic(expected = "degenerate")]
    fn degenerate() {
        let mut s = store();
        let [a, b, ..] = quad(&mut s);
        s.new_triangle([a, b, a]);
    }
}
