//! Whole-mesh transforms and surface propagation
use nalgebra::{Matrix4, Point3, Rotation3, Unit, Vector3};

use crate::{Error, Mesh, data::Format};

impl Mesh {
    /// Applies an affine transform to every point
    ///
    /// Positions are mapped through the full matrix; normals only through its
    /// upper-left 3×3 block (they are not renormalized).  The projective row
    /// is ignored.
    pub fn mult_matrix(&mut self, m: &Matrix4<f64>) {
        self.set_idle();
        for i in 0..self.heap.len() {
            let p = self.heap.points()[i];
            let pos = self.store[p].pos;
            self.store[p].pos = m.transform_point(&Point3::from(pos)).coords;
            if let Some(n) = self.store.aux(p, Format::NORMALS) {
                self.store
                    .set_aux(p, Format::NORMALS, m.transform_vector(&n));
            }
        }
    }

    /// Rotates the mesh by `angle` degrees around `axis`
    ///
    /// Axes shorter than 1e-3 are ignored.
    pub fn rotate(&mut self, angle: f64, axis: Vector3<f64>) {
        if axis.norm() <= 1e-3 {
            return;
        }
        let r = Rotation3::from_axis_angle(
            &Unit::new_normalize(axis),
            angle.to_radians(),
        );
        self.mult_matrix(&r.to_homogeneous());
    }

    /// Moves every point by `v`
    pub fn translate(&mut self, v: Vector3<f64>) {
        self.mult_matrix(&Matrix4::new_translation(&v));
    }

    /// Scales the mesh about the origin, independently along each axis
    pub fn scale(&mut self, v: Vector3<f64>) {
        self.mult_matrix(&Matrix4::new_nonuniform_scaling(&v));
    }

    /// Moves points along their normals towards the surface
    ///
    /// Each point takes up to `iterations` steps, starting with a step equal
    /// to its field value and adapting the step size as it goes; only steps
    /// that reduce the field's magnitude are kept.  Points already on the
    /// surface are left alone.
    ///
    /// Returns the mean relative improvement `(|f₀| - |f|) / |f₀|` over the
    /// points that moved, or 0 if none did.
    pub fn propagate(&mut self, iterations: usize) -> Result<f64, Error> {
        let (Some(field), Some(normal)) =
            (self.funcs.field.as_ref(), self.funcs.normal.as_ref())
        else {
            let missing = if self.funcs.field.is_none() {
                "field"
            } else {
                "normal"
            };
            return self.latch(Err(Error::MissingCallback(missing)));
        };
        let f = |p: Vector3<f64>| field(p.x, p.y, p.z);

        let mut improvement = 0.0;
        let mut num = 0;
        for &p in self.heap.points() {
            let mut pos = self.store[p].pos;
            let mut val = f(pos);
            if val == 0.0 {
                continue;
            }
            let n = normal(pos).normalize();
            let start = val;
            let mut step = val;
            for _ in 0..iterations {
                let next = pos + n * step;
                let v = f(next);
                if val.abs() < v.abs() {
                    step *= if val * v < 0.0 { 0.5 } else { -0.5 };
                } else {
                    step *= if val * v < 0.0 { -0.3 } else { 1.2 };
                    val = v;
                    pos = next;
                }
                if v == 0.0 {
                    break;
                }
            }
            self.store[p].pos = pos;
            improvement += (start.abs() - val.abs()) / start.abs();
            num += 1;
        }
        self.set_idle();
        log::debug!("propagated {num} points over {iterations} iterations");
        Ok(if num == 0 { 0.0 } else { improvement / num as f64 })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn triangle() -> Mesh {
        let mut mesh = Mesh::new(Format::NORMALS);
        let data = [
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 1.0, //
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ];
        mesh.write_triangles(1, Format::COORDS | Format::NORMALS, &data)
            .unwrap();
        mesh
    }

    fn records(mesh: &mut Mesh) -> Vec<f64> {
        mesh.rewind();
        let n = mesh.point_count();
        let mut buf = vec![0.0; n * 6];
        mesh.read_points(n, Format::COORDS | Format::NORMALS, &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn translate_keeps_normals() {
        let mut mesh = triangle();
        mesh.translate(Vector3::new(1.0, 2.0, 3.0));
        let r = records(&mut mesh);
        assert_eq!(&r[0..6], &[2.0, 2.0, 3.0, 0.0, 0.0, 1.0]);
        assert_eq!(&r[12..18], &[1.0, 2.0, 3.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn rotate_and_scale() {
        let mut mesh = triangle();
        mesh.rotate(90.0, Vector3::new(0.0, 2.0, 0.0));
        let r = records(&mut mesh);
        // (1, 0, 0) goes to (0, 0, -1) and the normal to (1, 0, 0)
        assert_relative_eq!(r[2], -1.0, epsilon = 1e-12);
        assert_relative_eq!(r[3], 1.0, epsilon = 1e-12);

        // Degenerate axes are ignored
        mesh.rotate(45.0, Vector3::new(0.0, 0.0, 1e-4));
        assert_eq!(records(&mut mesh), r);

        mesh.scale(Vector3::new(2.0, 3.0, 4.0));
        let s = records(&mut mesh);
        assert_relative_eq!(s[2], -4.0, epsilon = 1e-12);
        assert_relative_eq!(s[3], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn propagate_to_sphere() {
        let mut mesh = triangle();
        mesh.translate(Vector3::new(0.1, 0.1, 0.1));
        assert_eq!(mesh.propagate(10), Err(Error::MissingCallback("field")));

        mesh.set_field(|x, y, z| (x * x + y * y + z * z).sqrt() - 2.0);
        assert_eq!(mesh.propagate(10), Err(Error::MissingCallback("normal")));

        mesh.set_normal_fn(|p| p);
        let improvement = mesh.propagate(20).unwrap();
        assert!(improvement > 0.99, "{improvement}");
        mesh.rewind();
        let mut buf = vec![0.0; 9];
        mesh.read_points(3, Format::COORDS, &mut buf).unwrap();
        for p in buf.chunks_exact(3) {
            let r = Vector3::new(p[0], p[1], p[2]).norm();
            assert_relative_eq!(r, 2.0, epsilon = 1e-3);
        }

        // Nothing left to improve
        let mut empty = Mesh::new(Format::COORDS);
        empty.set_field(|_, _, _| 1.0);
        empty.set_normal_fn(|p| p);
        assert_eq!(empty.propagate(5), Ok(0.0));
    }
}
