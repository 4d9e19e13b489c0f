//! Quadric error metrics and small numeric helpers
use nalgebra::{Matrix3, Vector3};

/// Number of refinement steps used when locating a sign change on an edge
pub const REFINE_STEPS: usize = 5;

/// Symmetric 4×4 quadric, stored as its 10 unique entries
///
/// Entries are laid out row-major over the upper triangle:
/// `[a², ab, ac, ad, b², bc, bd, c², cd, d²]` for a plane `ax + by + cz + d`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Quadric([f64; 10]);

impl std::ops::AddAssign for Quadric {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

impl std::ops::Add for Quadric {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Quadric {
    /// Builds an empty quadric
    pub fn new() -> Self {
        Self([0.0; 10])
    }

    /// Builds the fundamental quadric of the plane through a triangle
    ///
    /// Degenerate triangles produce a non-finite normal; their quadric is
    /// returned as zero so they contribute nothing.
    pub fn from_triangle(
        a: Vector3<f64>,
        b: Vector3<f64>,
        c: Vector3<f64>,
    ) -> Self {
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        if len == 0.0 || !len.is_finite() {
            return Self::new();
        }
        let n = n / len;
        Self::from_plane(n, -n.dot(&a))
    }

    /// Builds the quadric for the plane `n · p + d = 0`
    pub fn from_plane(n: Vector3<f64>, d: f64) -> Self {
        Self([
            n.x * n.x,
            n.x * n.y,
            n.x * n.z,
            n.x * d,
            n.y * n.y,
            n.y * n.z,
            n.y * d,
            n.z * n.z,
            n.z * d,
            d * d,
        ])
    }

    /// Upper-left 3×3 block
    fn ata(&self) -> Matrix3<f64> {
        let q = &self.0;
        Matrix3::new(q[0], q[1], q[2], q[1], q[4], q[5], q[2], q[5], q[7])
    }

    /// Linear term
    fn atb(&self) -> Vector3<f64> {
        Vector3::new(self.0[3], self.0[6], self.0[8])
    }

    /// Evaluates `[p 1] Q [p 1]ᵀ`
    pub fn eval(&self, p: Vector3<f64>) -> f64 {
        (p.transpose() * self.ata() * p)[0] + 2.0 * p.dot(&self.atb()) + self.0[9]
    }

    /// Minimum value of this quadric over all of space
    ///
    /// Returns infinity if the 3×3 system is exactly singular.
    pub fn min_error(&self) -> f64 {
        let atb = self.atb();
        match self.ata().try_inverse() {
            Some(inv) => self.0[9] - atb.dot(&(inv * atb)),
            None => f64::INFINITY,
        }
    }

    /// Cost of contracting two points with the given quadrics
    pub fn contraction_cost(&self, other: &Self) -> f64 {
        (*self + *other).min_error()
    }

    /// Position minimizing this quadric
    ///
    /// Returns `None` when the system is too badly conditioned to trust, in
    /// which case callers fall back to the midpoint.
    pub fn optimal_point(&self) -> Option<Vector3<f64>> {
        const DET_MIN: f64 = 1e-6;
        const DET_MAX: f64 = 1e6;
        let ata = self.ata();
        let det = ata.determinant().abs();
        if !(DET_MIN..=DET_MAX).contains(&det) {
            return None;
        }
        ata.try_inverse().map(|inv| -(inv * self.atb()))
    }
}

/// Linear interpolation from `a` (at `t = 0`) to `b` (at `t = 1`)
pub fn lerp(a: Vector3<f64>, b: Vector3<f64>, t: f64) -> Vector3<f64> {
    a + (b - a) * t
}

/// Locates the zero crossing of `f` between two samples of opposite sign
///
/// Performs [`REFINE_STEPS`] rounds of false-position refinement, keeping the
/// bracket around the sign change, then returns a final interpolation.
pub fn iterative_improve<F: Fn(Vector3<f64>) -> f64>(
    mut a: (Vector3<f64>, f64),
    mut b: (Vector3<f64>, f64),
    f: F,
) -> Vector3<f64> {
    let mut i = 0;
    loop {
        let t = a.1.abs() / (a.1 - b.1).abs();
        let pos = lerp(a.0, b.0, t);
        if i == REFINE_STEPS {
            return pos;
        }
        let v = f(pos);
        if v * a.1 >= 0.0 {
            a = (pos, v);
        } else {
            b = (pos, v);
        }
        i += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn corner_quadric() -> Quadric {
        // Three orthogonal planes meeting at (1, 2, 3)
        let mut q = Quadric::new();
        q += Quadric::from_plane(Vector3::x(), -1.0);
        q += Quadric::from_plane(Vector3::y(), -2.0);
        q += Quadric::from_plane(Vector3::z(), -3.0);
        q
    }

    #[test]
    fn quadric_corner() {
        let q = corner_quadric();
        let p = q.optimal_point().unwrap();
        assert_relative_eq!(p, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
        assert_relative_eq!(q.eval(p), 0.0, epsilon = 1e-12);
        assert_relative_eq!(q.min_error(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(q.eval(Vector3::zeros()), 14.0);
    }

    #[test]
    fn quadric_min_matches_eval() {
        let mut q = corner_quadric();
        q += Quadric::from_plane(
            Vector3::new(1.0, 1.0, 1.0).normalize(),
            -0.5,
        );
        let p = q.optimal_point().unwrap();
        assert_relative_eq!(q.min_error(), q.eval(p), epsilon = 1e-9);
        for d in [Vector3::x(), Vector3::y(), Vector3::z()] {
            assert!(q.eval(p + d * 0.01) > q.eval(p));
        }
    }

    #[test]
    fn quadric_singular() {
        // A single plane has a singular 3×3 block
        let q = Quadric::from_plane(Vector3::z(), 0.0);
        assert!(q.optimal_point().is_none());
        assert_eq!(q.min_error(), f64::INFINITY);
        assert_eq!(Quadric::new().contraction_cost(&q), f64::INFINITY);
    }

    #[test]
    fn quadric_from_triangle() {
        let q = Quadric::from_triangle(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 1.0),
        );
        assert_relative_eq!(q.eval(Vector3::new(5.0, -3.0, 1.0)), 0.0);
        assert_relative_eq!(q.eval(Vector3::new(0.0, 0.0, 3.0)), 4.0);

        let flat = Quadric::from_triangle(
            Vector3::zeros(),
            Vector3::x(),
            Vector3::x() * 2.0,
        );
        assert_eq!(flat, Quadric::new());
    }

    #[test]
    fn refine_linear() {
        let f = |p: Vector3<f64>| p.x - 0.3;
        let a = Vector3::zeros();
        let b = Vector3::x();
        let p = iterative_improve((a, f(a)), (b, f(b)), f);
        assert_relative_eq!(p.x, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn refine_sphere() {
        let f = |p: Vector3<f64>| p.norm_squared() - 0.5;
        let a = Vector3::new(0.6, 0.1, 0.0);
        let b = Vector3::new(0.8, 0.1, 0.0);
        let p = iterative_improve((a, f(a)), (b, f(b)), f);
        assert!(f(p).abs() < 1e-6);
        assert!(p.x > 0.6 && p.x < 0.8);
    }
}
