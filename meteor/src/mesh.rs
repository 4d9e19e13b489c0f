//! The mesh session, binding storage, heap, kd-tree, and builder together
use nalgebra::Vector3;

use crate::{
    Error,
    build::Builder,
    data::{Cursor, Format},
    heap::Heap,
    kdtree::KdTree,
    store::{MeshStore, PointId, Scratch, arena::Allocation},
};

/// Tuning knobs for a [`Mesh`]
#[derive(Copy, Clone, Debug)]
pub struct Settings {
    /// Slot recycling strategy for points and triangles
    pub allocation: Allocation,

    /// Pruning factor for nearest-neighbor searches during aggregation
    ///
    /// 1.0 finds exact nearest neighbors; larger values are faster but may
    /// pick a farther neighbor.
    pub kd_delta: f64,

    /// Cost added to points queued for merging while a build is still running
    ///
    /// Their quadrics don't yet include triangles from upcoming slices, so
    /// the bias makes them less attractive than fully-built points.
    pub unsynced_bias: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allocation: Allocation::FreeList,
            kd_delta: 1.0,
            unsynced_bias: 1.0,
        }
    }
}

/// Which per-point state is live
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Mode {
    Idle,
    Merge,
    Aggregate,
}

type FieldFn = Box<dyn Fn(f64, f64, f64) -> f64>;
type VectorFn = Box<dyn Fn(Vector3<f64>) -> Vector3<f64>>;

/// Caller-supplied functions
#[derive(Default)]
pub(crate) struct Callbacks {
    pub field: Option<FieldFn>,
    pub normal: Option<VectorFn>,
    pub color: Option<VectorFn>,
    pub texcoord: Option<VectorFn>,
}

impl Callbacks {
    pub fn field(&self, p: Vector3<f64>) -> Option<f64> {
        self.field.as_ref().map(|f| f(p.x, p.y, p.z))
    }

    pub fn aux(&self, field: Format) -> Option<&VectorFn> {
        match field {
            Format::NORMALS => self.normal.as_ref(),
            Format::COLORS => self.color.as_ref(),
            Format::TEXCOORDS => self.texcoord.as_ref(),
            _ => None,
        }
    }
}

/// A triangle mesh, along with everything needed to build and simplify it
///
/// ```
/// use meteor::{Format, Mesh};
///
/// let mut mesh = Mesh::new(Format::COORDS);
/// mesh.set_field(|x, y, z| x * x + y * y + z * z - 0.5);
/// mesh.set_size(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, 0.25)?;
/// while mesh.build()? > 0 {}
/// assert_eq!(mesh.triangle_count(), 2 * mesh.point_count() - 4);
///
/// let before = mesh.triangle_count();
/// let removed = mesh.merge();
/// assert_eq!(mesh.triangle_count(), before - removed);
/// # Ok::<(), meteor::Error>(())
/// ```
pub struct Mesh {
    pub(crate) store: MeshStore,
    pub(crate) heap: Heap,
    pub(crate) kd: KdTree,
    pub(crate) mode: Mode,
    pub(crate) builder: Builder,
    pub(crate) funcs: Callbacks,
    pub(crate) cursor: Cursor,
    pub(crate) settings: Settings,
    /// Triangles present when the current build step started, less merges
    pub(crate) mergeable: usize,
    last_error: Option<String>,
}

impl Mesh {
    /// Builds an empty mesh storing the given fields
    pub fn new(format: Format) -> Self {
        Self::with_settings(format, Settings::default())
    }

    /// Builds an empty mesh with custom settings
    pub fn with_settings(format: Format, settings: Settings) -> Self {
        let mut out = Self {
            store: MeshStore::new(format, settings.allocation),
            heap: Heap::new(),
            kd: KdTree::new(settings.kd_delta),
            mode: Mode::Idle,
            builder: Builder::default(),
            funcs: Callbacks::default(),
            cursor: Cursor::default(),
            settings,
            mergeable: 0,
            last_error: None,
        };
        out.rewind();
        out
    }

    /// Drops every point and triangle and switches to a new format
    ///
    /// Callbacks and the sampling grid are kept; any build in progress is
    /// abandoned.
    pub fn reset(&mut self, format: Format) {
        self.store.reset(format);
        self.heap.clear();
        self.kd.clear();
        self.mode = Mode::Idle;
        self.builder.abandon();
        self.mergeable = 0;
        self.rewind();
    }

    /// Fields stored for each point
    pub fn format(&self) -> Format {
        self.store.format()
    }

    /// Sets the scalar field; negative values are inside the surface
    pub fn set_field<F: Fn(f64, f64, f64) -> f64 + 'static>(&mut self, f: F) {
        self.funcs.field = Some(Box::new(f));
    }

    /// Sets the function computing normals of new points
    pub fn set_normal_fn<F>(&mut self, f: F)
    where
        F: Fn(Vector3<f64>) -> Vector3<f64> + 'static,
    {
        self.funcs.normal = Some(Box::new(f));
    }

    /// Sets the function computing colors of new points
    pub fn set_color_fn<F>(&mut self, f: F)
    where
        F: Fn(Vector3<f64>) -> Vector3<f64> + 'static,
    {
        self.funcs.color = Some(Box::new(f));
    }

    /// Sets the function computing texture coordinates of new points
    pub fn set_texcoord_fn<F>(&mut self, f: F)
    where
        F: Fn(Vector3<f64>) -> Vector3<f64> + 'static,
    {
        self.funcs.texcoord = Some(Box::new(f));
    }

    /// Number of live points
    pub fn point_count(&self) -> usize {
        self.store.point_count()
    }

    /// Number of live triangles
    pub fn triangle_count(&self) -> usize {
        self.store.triangle_count()
    }

    /// Number of points created since the last reset
    pub fn points_created(&self) -> usize {
        self.store.points_created()
    }

    /// Number of triangles created since the last reset
    pub fn triangles_created(&self) -> usize {
        self.store.triangles_created()
    }

    /// Number of triangles that merging could act on
    ///
    /// While building, this counts the triangles that existed when the
    /// current step began (less those removed by merges since), so callers
    /// can bound the mesh size by merging between steps.
    pub fn mergeable_triangle_count(&self) -> usize {
        self.mergeable
    }

    /// Returns the message of the last usage error, clearing it
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    /// Records the message of a failed operation
    pub(crate) fn latch<T>(&mut self, r: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &r {
            self.last_error = Some(e.to_string());
        }
        r
    }

    /// Creates a point at the end of the heap array
    pub(crate) fn make_point(&mut self, pos: Vector3<f64>) -> PointId {
        let p = self.store.new_point(pos);
        if self.mode == Mode::Merge {
            self.store[p].scratch = Scratch::Merge(Default::default());
        }
        self.heap.push_unsorted(&mut self.store, p);
        p
    }

    /// Removes a point that no triangle uses any more
    pub(crate) fn delete_point(&mut self, p: PointId) {
        if self.mode == Mode::Aggregate {
            self.kd.remove(&mut self.store, p);
        }
        self.heap.detach(&mut self.store, p);
        self.store.free_point(p);
    }

    /// Fills auxiliary fields of a new point from the callbacks
    pub(crate) fn init_aux(&mut self, p: PointId) {
        let pos = self.store[p].pos;
        for field in Format::AUX {
            if let Some(f) = self.funcs.aux(field) {
                self.store.set_aux(p, field, f(pos));
            }
        }
    }

    /// Recomputes auxiliary fields of `p` after it was derived from `a`
    /// and `b`, using the callbacks or else the average of the two
    pub(crate) fn blend_aux(&mut self, p: PointId, a: PointId, b: PointId) {
        let pos = self.store[p].pos;
        for field in Format::AUX {
            let (Some(va), Some(vb)) =
                (self.store.aux(a, field), self.store.aux(b, field))
            else {
                continue;
            };
            let v = match self.funcs.aux(field) {
                Some(f) => f(pos),
                None => (va + vb) / 2.0,
            };
            self.store.set_aux(p, field, v);
        }
    }

    /// Drops all simplification state, leaving every point unsorted
    pub(crate) fn set_idle(&mut self) {
        if self.mode != Mode::Idle {
            log::debug!("leaving {:?} mode", self.mode);
            for p in self.heap.points() {
                self.store[*p].scratch = Scratch::Idle;
            }
            self.heap.unsort();
            self.kd.clear();
            self.mode = Mode::Idle;
        }
    }

    /// Checks every invariant of the point/triangle graph
    ///
    /// # Panics
    /// If any link is asymmetric, any heap index is stale, or any triangle is
    /// degenerate
    pub fn verify(&self) {
        assert_eq!(
            self.heap.len(),
            self.store.point_count(),
            "heap array doesn't hold every point"
        );
        self.heap.verify(&self.store);

        let mut count = 0;
        for t in self.store.triangles() {
            count += 1;
            let [a, b, c] = self.store[t].points();
            assert!(a != b && b != c && a != c, "degenerate triangle {t:?}");
            for p in [a, b, c] {
                let n = self.store[p].triangles().iter().filter(|q| **q == t).count();
                assert_eq!(n, 1, "{t:?} listed {n} times by {p:?}");
            }
        }
        assert_eq!(count, self.store.triangle_count());

        for p in self.heap.points() {
            for t in self.store[*p].triangles() {
                assert!(
                    self.store.contains_triangle(*t),
                    "{p:?} lists dead triangle {t:?}"
                );
                assert!(self.store[*t].contains(*p), "{t:?} doesn't use {p:?}");
            }
            if self.heap.contains(&self.store, *p) {
                assert!(
                    !self.store[*p].triangles().is_empty(),
                    "{p:?} has no triangles but is in the heap"
                );
            }
        }

        if self.mode == Mode::Aggregate {
            assert_eq!(self.kd.verify(&self.store), self.store.point_count());
        }
    }
}
