//! Typed bulk access to point and triangle data
//!
//! Points are addressed by their position in the heap array, which is stable
//! until the mesh is modified.  Reads drain records from a cursor that
//! [`Mesh::rewind`] moves back to the start.
//!
//! The cursor remembers which fields were taken from the current record:
//! asking for fields that don't overlap those moves nothing, so coordinates
//! and normals of one point can be read by two separate calls, while asking
//! for a field a second time moves on to the next record.
use nalgebra::Vector3;

use crate::{Error, Mesh, store::PointId};

/// Bitmask of per-point fields
///
/// The empty mask, [`Format::INDEX`], stands for the point's index.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Format(u8);

impl Format {
    /// Point index only
    pub const INDEX: Format = Format(0);
    /// Position
    pub const COORDS: Format = Format(1);
    /// Normal vector
    pub const NORMALS: Format = Format(2);
    /// RGB color
    pub const COLORS: Format = Format(4);
    /// Texture coordinates
    pub const TEXCOORDS: Format = Format(8);
    /// Every field
    pub const ALL: Format = Format(15);

    /// Auxiliary fields, in storage order
    pub const AUX: [Format; 3] =
        [Format::NORMALS, Format::COLORS, Format::TEXCOORDS];

    /// Bit used to track index reads in the cursor
    const INDEX_BIT: u8 = 16;

    /// Builds a format from raw bits, rejecting unknown bits
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Returns the raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Checks whether every field of `other` is in `self`
    pub fn contains(self, other: Format) -> bool {
        other.0 & !self.0 == 0
    }

    /// Number of auxiliary vectors stored per point
    pub fn extra_parts(self) -> usize {
        (self.0 & !Self::COORDS.0).count_ones() as usize
    }

    /// Position of an auxiliary field in a point's extra data
    ///
    /// Fields are packed in the order normal, color, texcoord; absent fields
    /// take no space.
    pub fn slot(self, field: Format) -> Option<usize> {
        debug_assert!(Self::AUX.contains(&field));
        if self.0 & field.0 == 0 {
            None
        } else {
            let below = self.0 & (field.0 - 1) & !Self::COORDS.0;
            Some(below.count_ones() as usize)
        }
    }

    /// Number of scalars in one point record of this format
    pub fn width(self) -> usize {
        if self == Self::INDEX {
            1
        } else {
            3 * self.0.count_ones() as usize
        }
    }

    fn cursor_bits(self) -> u8 {
        if self == Self::INDEX {
            Self::INDEX_BIT
        } else {
            self.0
        }
    }
}

static_assertions::const_assert_eq!(Format::ALL.bits() & Format::INDEX_BIT, 0);

impl std::ops::BitOr for Format {
    type Output = Format;
    fn bitor(self, rhs: Format) -> Format {
        Format(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Format {
    type Output = Format;
    fn bitand(self, rhs: Format) -> Format {
        Format(self.0 & rhs.0)
    }
}

impl std::fmt::Debug for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if *self == Self::INDEX {
            return write!(f, "INDEX");
        }
        let names = ["COORDS", "NORMALS", "COLORS", "TEXCOORDS"];
        let mut first = true;
        for (i, name) in names.iter().enumerate() {
            if self.0 & (1 << i) != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Element type for data buffers
pub trait Scalar: Copy {
    /// Converts from the internal representation
    fn from_f64(v: f64) -> Self;
    /// Converts to the internal representation
    fn to_f64(self) -> f64;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                fn from_f64(v: f64) -> Self {
                    v as $t
                }
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}
impl_scalar!(f32, f64, i32, u32);

fn to_index<T: Scalar>(v: T) -> Result<usize, Error> {
    let f = v.to_f64();
    if f >= 0.0 && f.is_finite() && f.fract() == 0.0 {
        Ok(f as usize)
    } else {
        Err(Error::InvalidIndex(f))
    }
}

/// Read position shared by point and triangle access
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Cursor {
    point: usize,
    point_mask: u8,
    triangle: Option<crate::store::TriangleId>,
    triangle_mask: u8,
    modified: bool,
}

/// Raw point record parsed from a caller buffer
#[derive(Clone, Debug, PartialEq)]
struct Record {
    pos: Vector3<f64>,
    aux: [Option<Vector3<f64>>; 3],
}

impl Mesh {
    /// Moves both read cursors back to the first point and triangle
    ///
    /// This also clears the modification flag, so reads are allowed again.
    pub fn rewind(&mut self) {
        self.cursor = Cursor {
            point: 0,
            point_mask: 0,
            triangle: self.store.first_triangle(),
            triangle_mask: 0,
            modified: false,
        };
    }

    /// Flags the topology as changed, invalidating reads until `rewind`
    pub(crate) fn mark_modified(&mut self) {
        self.cursor.modified = true;
    }

    fn check_read<T>(
        &self,
        format: Format,
        records: usize,
        out: &[T],
    ) -> Result<(), Error> {
        let available = self.store.format();
        if !available.contains(format) {
            return Err(Error::FormatNotAvailable {
                requested: format,
                available,
            });
        }
        if self.cursor.modified {
            return Err(Error::MeshModified);
        }
        let needed = records * format.width();
        if out.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                actual: out.len(),
            });
        }
        Ok(())
    }

    /// Moves the point cursor for a transfer of the given fields, returning
    /// the point now under it
    fn advance_point(&mut self, format: Format) -> Option<PointId> {
        let bits = format.cursor_bits();
        let c = &mut self.cursor;
        if c.point_mask & bits != 0 {
            c.point_mask = bits;
            c.point += 1;
        } else {
            c.point_mask |= bits;
        }
        self.heap.get(self.cursor.point)
    }

    fn put_point<T: Scalar>(&self, p: PointId, format: Format, out: &mut [T]) {
        if format == Format::INDEX {
            out[0] = T::from_f64(self.store[p].index as f64);
            return;
        }
        let mut out = out.iter_mut();
        let mut put = |v: Vector3<f64>| {
            // `v` goes first: zip polls its left side once more after the last pair
            for (v, o) in v.iter().zip(&mut out) {
                *o = T::from_f64(*v);
            }
        };
        if format.contains(Format::COORDS) {
            put(self.store[p].pos);
        }
        for field in Format::AUX {
            if format.contains(field) {
                put(self.store.aux(p, field).unwrap_or_default());
            }
        }
    }

    /// Reads up to `count` point records into `out`
    ///
    /// Each record holds the point's index (for [`Format::INDEX`]) or the
    /// requested fields, three scalars each, in the order coordinates,
    /// normal, color, texcoord.  Returns the number of records read, which is
    /// less than `count` once the last point has been read.
    pub fn read_points<T: Scalar>(
        &mut self,
        count: usize,
        format: Format,
        out: &mut [T],
    ) -> Result<usize, Error> {
        let r = self.check_read(format, count, out);
        self.latch(r)?;
        let w = format.width();
        for i in 0..count {
            let Some(p) = self.advance_point(format) else {
                return Ok(i);
            };
            self.put_point(p, format, &mut out[i * w..(i + 1) * w]);
        }
        Ok(count)
    }

    /// Reads up to `count` triangles into `out`
    ///
    /// Each triangle is written as three point records, as in
    /// [`read_points`](Self::read_points).  Returns the number of triangles
    /// read.
    pub fn read_triangles<T: Scalar>(
        &mut self,
        count: usize,
        format: Format,
        out: &mut [T],
    ) -> Result<usize, Error> {
        let r = self.check_read(format, count * 3, out);
        self.latch(r)?;
        let bits = format.cursor_bits();
        let w = format.width();
        for i in 0..count {
            let c = &mut self.cursor;
            if c.triangle_mask & bits != 0 {
                c.triangle_mask = bits;
                c.triangle = c.triangle.and_then(|t| self.store.next_triangle(t));
            } else {
                c.triangle_mask |= bits;
            }
            let Some(t) = self.cursor.triangle else {
                return Ok(i);
            };
            for (j, p) in self.store[t].points().into_iter().enumerate() {
                let start = (i * 3 + j) * w;
                self.put_point(p, format, &mut out[start..start + w]);
            }
        }
        Ok(count)
    }

    fn check_write<T>(
        &self,
        format: Format,
        values: usize,
        data: &[T],
    ) -> Result<(), Error> {
        let available = self.store.format();
        if !available.contains(format) {
            return Err(Error::FormatNotAvailable {
                requested: format,
                available,
            });
        }
        if data.len() < values {
            return Err(Error::BufferTooSmall {
                needed: values,
                actual: data.len(),
            });
        }
        Ok(())
    }

    fn parse_record<T: Scalar>(format: Format, data: &[T]) -> Record {
        let mut data = data.iter().map(|v| v.to_f64());
        let mut next = || {
            let mut v = Vector3::zeros();
            for c in v.iter_mut() {
                *c = data.next().unwrap_or_default();
            }
            v
        };
        let pos = if format.contains(Format::COORDS) {
            next()
        } else {
            Vector3::zeros()
        };
        let mut aux = [None; 3];
        for (a, field) in aux.iter_mut().zip(Format::AUX) {
            if format.contains(field) {
                *a = Some(next());
            }
        }
        Record { pos, aux }
    }

    fn apply_record(&mut self, p: PointId, format: Format, r: &Record) {
        if format.contains(Format::COORDS) {
            self.store[p].pos = r.pos;
        }
        for (a, field) in r.aux.iter().zip(Format::AUX) {
            if let Some(v) = a {
                self.store.set_aux(p, field, *v);
            }
        }
    }

    /// Writes `count` point records from `data`
    ///
    /// With coordinates in the format, every record creates a new point.
    /// Without them, the records overwrite fields of existing points starting
    /// at the cursor (following the same rules as reads).  Returns the number
    /// of records written.
    pub fn write_points<T: Scalar>(
        &mut self,
        count: usize,
        format: Format,
        data: &[T],
    ) -> Result<usize, Error> {
        if format == Format::INDEX {
            return self.latch(Err(Error::ReadOnlyIndex));
        }
        let w = format.width();
        let r = self.check_write(format, count * w, data);
        self.latch(r)?;

        let creating = format.contains(Format::COORDS);
        if creating && count > 0 {
            self.set_idle();
            self.mark_modified();
        }
        for i in 0..count {
            let rec = Self::parse_record(format, &data[i * w..(i + 1) * w]);
            let p = if creating {
                self.cursor.point_mask = 0;
                self.make_point(rec.pos)
            } else {
                match self.advance_point(format) {
                    Some(p) => p,
                    None => return Ok(i),
                }
            };
            self.apply_record(p, format, &rec);
        }
        Ok(count)
    }

    /// Writes `count` triangles from `data`
    ///
    /// With [`Format::INDEX`], each triangle is three point indices.
    /// Otherwise the format must include coordinates, and each vertex is a
    /// full record: an existing point whose given fields are all identical is
    /// reused (found by linear search), and a new point is created otherwise.
    ///
    /// Every triangle is validated before any is created, so on error the
    /// mesh is left unchanged.
    pub fn write_triangles<T: Scalar>(
        &mut self,
        count: usize,
        format: Format,
        data: &[T],
    ) -> Result<usize, Error> {
        let r = self.parse_triangles(count, format, data);
        let tris = self.latch(r)?;
        if tris.is_empty() {
            return Ok(0);
        }

        self.set_idle();
        self.mark_modified();
        for tri in tris {
            let points = match tri {
                Vertices::Indexed(idx) => idx.map(|i| self.heap.points()[i]),
                Vertices::Raw(recs) => {
                    recs.map(|rec| self.find_or_create(format, &rec))
                }
            };
            self.store.new_triangle(points);
        }
        Ok(count)
    }

    fn parse_triangles<T: Scalar>(
        &self,
        count: usize,
        format: Format,
        data: &[T],
    ) -> Result<Vec<Vertices>, Error> {
        if format != Format::INDEX && !format.contains(Format::COORDS) {
            return Err(Error::MissingCoordinates);
        }
        let w = format.width();
        self.check_write(format, count * 3 * w, data)?;

        let n = self.store.point_count();
        let mut out = Vec::with_capacity(count);
        for tri in data[..count * 3 * w].chunks_exact(3 * w) {
            if format == Format::INDEX {
                let mut idx = [0; 3];
                for (i, v) in idx.iter_mut().zip(tri) {
                    *i = to_index(*v)?;
                    if *i >= n {
                        return Err(Error::IndexOutOfRange { index: *i, count: n });
                    }
                }
                if idx[0] == idx[1] || idx[0] == idx[2] {
                    return Err(Error::DegenerateTriangle(idx[0]));
                } else if idx[1] == idx[2] {
                    return Err(Error::DegenerateTriangle(idx[1]));
                }
                out.push(Vertices::Indexed(idx));
            } else {
                let recs: [Record; 3] = std::array::from_fn(|j| {
                    Self::parse_record(format, &tri[j * w..(j + 1) * w])
                });
                for j in 0..3 {
                    if recs[j] == recs[(j + 1) % 3] {
                        return Err(Error::DegenerateTriangle(j));
                    }
                }
                out.push(Vertices::Raw(recs));
            }
        }
        Ok(out)
    }

    /// Finds a point whose given fields exactly match a record, or creates one
    fn find_or_create(&mut self, format: Format, rec: &Record) -> PointId {
        let found = self.heap.points().iter().copied().find(|p| {
            self.store[*p].pos == rec.pos
                && rec
                    .aux
                    .iter()
                    .zip(Format::AUX)
                    .all(|(a, f)| a.is_none() || *a == self.store.aux(*p, f))
        });
        found.unwrap_or_else(|| {
            let p = self.make_point(rec.pos);
            self.apply_record(p, format, rec);
            p
        })
    }
}

enum Vertices {
    Indexed([usize; 3]),
    Raw([Record; 3]),
}

#[cfg(test)]
mod test {
    use super::*;

    /// Two triangles sharing an edge, with +Z normals
    fn quad() -> Mesh {
        let mut mesh = Mesh::new(Format::NORMALS);
        let pts = [
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0, //
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, //
            1.0, 1.0, 0.0, 0.0, 0.0, 1.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
        ];
        let fmt = Format::COORDS | Format::NORMALS;
        assert_eq!(mesh.write_points(4, fmt, &pts), Ok(4));
        let tris = [0u32, 1, 2, 0, 2, 3];
        assert_eq!(mesh.write_triangles(2, Format::INDEX, &tris), Ok(2));
        mesh.rewind();
        mesh
    }

    #[test]
    fn format_layout() {
        let f = Format::COORDS | Format::TEXCOORDS;
        assert_eq!(f.width(), 6);
        assert_eq!(Format::INDEX.width(), 1);
        assert_eq!(f.extra_parts(), 1);
        assert_eq!(f.slot(Format::TEXCOORDS), Some(0));
        assert_eq!(Format::ALL.slot(Format::TEXCOORDS), Some(2));
        assert_eq!(f.slot(Format::NORMALS), None);
        assert_eq!(Format::from_bits(16), None);
        assert_eq!(format!("{f:?}"), "COORDS|TEXCOORDS");
    }

    #[test]
    fn shared_cursor() {
        let mut mesh = quad();
        let mut c = [0.0f32; 3];
        let mut n = [0.0f32; 3];
        assert_eq!(mesh.read_points(1, Format::COORDS, &mut c), Ok(1));
        assert_eq!(mesh.read_points(1, Format::NORMALS, &mut n), Ok(1));
        assert_eq!((c, n), ([0.0; 3], [0.0, 0.0, 1.0]));

        // Asking for coordinates again moves to the next point
        assert_eq!(mesh.read_points(1, Format::COORDS, &mut c), Ok(1));
        assert_eq!(c, [1.0, 0.0, 0.0]);

        let mut idx = [0i32];
        mesh.read_points(1, Format::INDEX, &mut idx).unwrap();
        assert_eq!(idx, [1]);
        mesh.read_points(1, Format::INDEX, &mut idx).unwrap();
        assert_eq!(idx, [2]);

        let mut rest = [0.0; 12];
        assert_eq!(mesh.read_points(4, Format::COORDS, &mut rest), Ok(2));
        assert_eq!(&rest[..6], &[1.0, 1.0, 0.0, 0.0, 1.0, 0.0]);

        let mut tris = [0u32; 6];
        assert_eq!(mesh.read_triangles(5, Format::INDEX, &mut [0u32; 15]), Ok(2));
        mesh.rewind();
        assert_eq!(mesh.read_triangles(2, Format::INDEX, &mut tris), Ok(2));
        assert_eq!(tris, [0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn modified_since_rewind() {
        let mut mesh = quad();
        assert_eq!(
            mesh.write_triangles(1, Format::INDEX, &[1.0f64, 3.0, 0.0]),
            Ok(1)
        );
        let mut buf = [0u32; 3];
        assert_eq!(
            mesh.read_triangles(1, Format::INDEX, &mut buf),
            Err(Error::MeshModified)
        );
        assert!(mesh.take_error().is_some());
        mesh.rewind();
        assert_eq!(mesh.read_triangles(1, Format::INDEX, &mut buf), Ok(1));
        assert_eq!(mesh.triangle_count(), 3);
        mesh.verify();
    }

    #[test]
    fn rejected_writes() {
        let mut mesh = quad();
        let before = (mesh.point_count(), mesh.triangle_count());

        assert_eq!(
            mesh.write_triangles(2, Format::INDEX, &[0i32, 1, 2, 0, 1000, 2]),
            Err(Error::IndexOutOfRange {
                index: 1000,
                count: 4
            })
        );
        assert!(mesh.take_error().unwrap().contains("1000"));
        assert_eq!(
            mesh.write_triangles(1, Format::INDEX, &[0i32, -1, 2]),
            Err(Error::InvalidIndex(-1.0))
        );
        assert_eq!(
            mesh.write_triangles(1, Format::INDEX, &[0.5f32, 1.0, 2.0]),
            Err(Error::InvalidIndex(0.5))
        );
        assert_eq!(
            mesh.write_triangles(1, Format::INDEX, &[2u32, 1, 2]),
            Err(Error::DegenerateTriangle(2))
        );
        assert_eq!(
            mesh.write_triangles(1, Format::NORMALS, &[0.0; 9]),
            Err(Error::MissingCoordinates)
        );
        assert_eq!(
            mesh.write_triangles(2, Format::INDEX, &[0u32, 1, 2]),
            Err(Error::BufferTooSmall {
                needed: 6,
                actual: 3
            })
        );
        assert_eq!(
            mesh.write_points(1, Format::INDEX, &[0.0]),
            Err(Error::ReadOnlyIndex)
        );
        assert_eq!(
            mesh.write_points(1, Format::COLORS, &[0.0; 3]),
            Err(Error::FormatNotAvailable {
                requested: Format::COLORS,
                available: Format::COORDS | Format::NORMALS,
            })
        );
        assert_eq!((mesh.point_count(), mesh.triangle_count()), before);

        let mut buf = [0.0; 3];
        assert_eq!(
            mesh.read_points(2, Format::COORDS, &mut buf),
            Err(Error::BufferTooSmall {
                needed: 6,
                actual: 3
            })
        );
    }

    #[test]
    fn raw_triangles_share_points() {
        let mut mesh = Mesh::new(Format::COORDS);
        let tris = [
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0,
        ];
        assert_eq!(mesh.write_triangles(2, Format::COORDS, &tris), Ok(2));
        assert_eq!(mesh.point_count(), 4);
        mesh.verify();

        let bad = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0];
        assert_eq!(
            mesh.write_triangles(1, Format::COORDS, &bad),
            Err(Error::DegenerateTriangle(0))
        );
        assert_eq!(mesh.point_count(), 4);
    }

    #[test]
    fn overwrite_fields() {
        let mut mesh = quad();
        let normals = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(mesh.write_points(2, Format::NORMALS, &normals), Ok(2));
        mesh.rewind();
        let mut buf = [0.0; 12];
        assert_eq!(mesh.read_points(4, Format::NORMALS, &mut buf), Ok(4));
        assert_eq!(&buf[..6], &normals);
        assert_eq!(&buf[6..], &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn all_fields_round_trip() {
        let mut mesh = Mesh::new(Format::ALL);
        let pts: Vec<f64> = (1..=36).map(f64::from).collect();
        assert_eq!(mesh.write_points(3, Format::ALL, &pts), Ok(3));
        assert_eq!(mesh.write_triangles(1, Format::INDEX, &[0i32, 1, 2]), Ok(1));
        mesh.rewind();

        let mut buf = vec![0.0; 36];
        assert_eq!(mesh.read_points(3, Format::ALL, &mut buf), Ok(3));
        assert_eq!(buf, pts);

        let mut tri = vec![0.0f32; 36];
        assert_eq!(mesh.read_triangles(1, Format::ALL, &mut tri), Ok(1));
        let expected: Vec<f32> = (1..=36).map(|i| i as f32).collect();
        assert_eq!(tri, expected);

        // Fields without coordinates are packed the same way
        mesh.rewind();
        let mut aux = [0.0; 9];
        let fmt = Format::NORMALS | Format::TEXCOORDS;
        assert_eq!(mesh.read_points(1, fmt, &mut aux[..6]), Ok(1));
        assert_eq!(&aux[..6], &[4.0, 5.0, 6.0, 10.0, 11.0, 12.0]);
        assert_eq!(mesh.read_points(1, Format::COLORS, &mut aux[6..]), Ok(1));
        assert_eq!(&aux[6..], &[7.0, 8.0, 9.0]);
    }
}
