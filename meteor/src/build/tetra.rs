//! Cube and tetrahedron tables for marching tetrahedrons
//!
//! Each grid cube is split into six tetrahedra that all share the diagonal
//! from corner 2 to corner 5.  The remaining six corners form a ring around
//! that diagonal, and each consecutive pair on the ring closes one
//! tetrahedron.  Every cube face is cut along the same diagonal by both cubes
//! that share it, so the tetrahedra of neighboring cubes meet face to face.
//!
//! ```text
//!        6 ------- 7            corner = x + 2y + 4z
//!       /|        /|
//!      2 ------- 3 |             y
//!      | 4 ------|-5             |  z
//!      |/        |/              | /
//!      0 ------- 1               +---- x
//! ```

/// A single axis, represented as a `u8` with one bit set
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Axis(u8);

/// The X axis, i.e. `[1, 0, 0]`
pub const X: Axis = Axis(1);
/// The Y axis, i.e. `[0, 1, 0]`
pub const Y: Axis = Axis(2);
/// The Z axis, i.e. `[0, 0, 1]`
pub const Z: Axis = Axis(4);

/// Cube corner, in the 0-8 range
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Corner(u8);

impl Corner {
    /// Builds a new corner
    ///
    /// # Panics
    /// If `i >= 8`, which is not a valid corner index
    pub const fn new(i: u8) -> Self {
        assert!(i < 8);
        Self(i)
    }

    /// Returns 0 or 1 depending on the corner's position along an axis
    pub fn offset(self, a: Axis) -> usize {
        (self & a) as usize
    }
}

impl std::ops::BitAnd<Axis> for Corner {
    type Output = bool;
    fn bitand(self, rhs: Axis) -> bool {
        (self.0 & rhs.0) != 0
    }
}

impl std::ops::BitXor for Corner {
    type Output = Corner;
    fn bitxor(self, rhs: Corner) -> Corner {
        Corner(self.0 ^ rhs.0)
    }
}

/// Corner whose sample decides the winding of every triangle in a cube
pub const REFERENCE: Corner = Corner::new(2);

const fn tet(a: u8, b: u8) -> [Corner; 4] {
    [Corner::new(2), Corner::new(5), Corner::new(a), Corner::new(b)]
}

/// The six tetrahedra of a cube
///
/// Vertices are ordered so that `(v1 - v0) × (v2 - v0) · (v3 - v0) > 0`; the
/// triangle table below relies on this.
pub const TETRAHEDRA: [[Corner; 4]; 6] = [
    tet(4, 0),
    tet(6, 4),
    tet(7, 6),
    tet(3, 7),
    tet(1, 3),
    tet(0, 1),
];

/// Edges of a tetrahedron, as pairs of vertex positions
///
/// The first three edges are the ones touching vertex 0.
pub const EDGES: [(usize, usize); 6] =
    [(0, 1), (0, 2), (0, 3), (1, 2), (2, 3), (1, 3)];

/// Triangles to emit for each tetrahedron sign pattern, as edge indices
///
/// The table is indexed by a 3-bit mask where bit `i` is set if vertex `i + 1`
/// has the opposite sign from vertex 0 (i.e. edge `i` is crossed).  The 16
/// possible sign patterns of four vertices collapse to these 8 because flipping
/// every sign crosses the same edges.
///
/// Each entry separates the vertices that share vertex 0's sign from the rest,
/// and is wound so that its normal points away from vertex 0's side:
///
/// - one vertex alone (masks 1, 2, 4, 7) gives one triangle on its three edges
/// - two against two (masks 3, 5, 6) gives a quad on the four crossed edges,
///   split into two triangles
///
/// When vertex 0 is inside the surface this points the normal outwards;
/// otherwise the caller reverses the winding.
pub const TRIANGLES: [&[[usize; 3]]; 8] = [
    &[],
    &[[0, 3, 5]],
    &[[1, 4, 3]],
    &[[0, 1, 5], [1, 4, 5]],
    &[[2, 5, 4]],
    &[[0, 3, 2], [2, 3, 4]],
    &[[1, 2, 3], [2, 5, 3]],
    &[[0, 1, 2]],
];
static_assertions::const_assert_eq!(TRIANGLES.len(), 1 << 3);

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector3;

    fn pos(c: Corner) -> Vector3<f64> {
        Vector3::new(
            c.offset(X) as f64,
            c.offset(Y) as f64,
            c.offset(Z) as f64,
        )
    }

    #[test]
    fn tetrahedra_are_positive() {
        let mut volume = 0.0;
        for t in TETRAHEDRA {
            let [a, b, c, d] = t.map(pos);
            let v = (b - a).cross(&(c - a)).dot(&(d - a));
            assert!(v > 0.0, "{t:?} is inverted");
            volume += v;
        }
        // Six tetrahedra of volume 1/6 fill the unit cube
        assert_eq!(volume, 6.0);
    }

    #[test]
    fn ring_edges_are_cube_edges() {
        for t in TETRAHEDRA {
            let d = t[2] ^ t[3];
            assert_eq!(d.0.count_ones(), 1, "{t:?}");
        }
    }

    /// Checks every case against a unit right-handed tetrahedron, with
    /// vertex 0 inside and edge crossings at their midpoints
    #[test]
    fn triangle_winding() {
        let verts = [
            Vector3::zeros(),
            Vector3::x(),
            Vector3::y(),
            Vector3::z(),
        ];
        for (mask, tris) in TRIANGLES.iter().enumerate() {
            let crossed: Vec<usize> =
                (0..3).filter(|i| mask & (1 << i) != 0).collect();
            let outside: Vector3<f64> =
                crossed.iter().map(|i| verts[i + 1]).sum();
            for tri in tris.iter() {
                let [a, b, c] = (*tri).map(|e| {
                    let (i, j) = EDGES[e];
                    (verts[i] + verts[j]) / 2.0
                });
                let n = (b - a).cross(&(c - a));
                assert!(n.dot(&outside) > 0.0, "case {mask}: {tri:?}");
                // Every edge used must actually be crossed
                for e in tri {
                    let (i, j) = EDGES[*e];
                    let si = i > 0 && mask & (1 << (i - 1)) != 0;
                    let sj = j > 0 && mask & (1 << (j - 1)) != 0;
                    assert_ne!(si, sj, "case {mask} uses uncrossed edge {e}");
                }
            }
        }
    }
}
