//! Meteor turns implicit surfaces into triangle meshes, then simplifies and
//! edits those meshes.
//!
//! An **implicit surface** is a function `f(x, y, z)`: positions where
//! `f(x, y, z) < 0` are **inside** the shape, positions where it's `> 0` are
//! **outside**, and the surface is the boundary between them.
//!
//! Everything happens on a [`Mesh`], which owns the points and triangles along
//! with the callbacks used to sample the surface.
//!
//! # Building
//! Meshes are built with marching tetrahedrons over a regular grid, set with
//! [`Mesh::set_size`] or [`Mesh::set_grid`].  The grid is swept one y-z plane
//! at a time: each call to [`Mesh::build`] polygonizes one more slab of cubes
//! and returns the number of planes left, so building can be interleaved with
//! other work.
//!
//! ```
//! use meteor::{Format, Mesh};
//!
//! let mut mesh = Mesh::new(Format::COORDS | Format::NORMALS);
//! mesh.set_field(|x, y, z| x * x + y * y + z * z - 1.0);
//! mesh.set_normal_fn(|p| p.normalize());
//! mesh.set_size(-1.5, 1.5, -1.5, 1.5, -1.5, 1.5, 0.1)?;
//! while mesh.build()? > 0 {
//!     // redraw, report progress, etc
//! }
//! # Ok::<(), meteor::Error>(())
//! ```
//!
//! Auxiliary fields (normals, colors, and texture coordinates) are stored for
//! each point if they're part of the mesh's [`Format`], and are computed by
//! optional callbacks when points are created.
//!
//! # Simplification
//! Two simplifiers remove one point per call:
//!
//! - [`Mesh::merge`] contracts the edge with the lowest quadric error.  It may
//!   be called between build steps, which keeps peak memory bounded by the
//!   target triangle count.
//! - [`Mesh::aggregate`] merges the two closest points, regardless of
//!   connectivity.
//!
//! ```
//! # use meteor::{Format, Mesh};
//! # let mut mesh = Mesh::new(Format::COORDS);
//! # mesh.set_field(|x, y, z| x * x + y * y + z * z - 1.0);
//! # mesh.set_size(-1.5, 1.5, -1.5, 1.5, -1.5, 1.5, 0.2)?;
//! # while mesh.build()? > 0 {}
//! while mesh.triangle_count() > 200 {
//!     if mesh.merge() == 0 {
//!         break;
//!     }
//! }
//! # Ok::<(), meteor::Error>(())
//! ```
//!
//! # Editing
//! [`Mesh::clip`] cuts away the part of the mesh where a second function is
//! negative, [`Mesh::correct_tex_coords`] splits the mesh along texture
//! seams, and [`Mesh::mult_matrix`] and friends apply affine transforms.
//!
//! # Data access
//! Points and triangles are read and written in bulk through typed buffers;
//! see [`Mesh::read_points`] and [`Mesh::write_triangles`].
#![warn(missing_docs)]

mod build;
mod data;
mod heap;
mod kdtree;
mod linalg;
mod mesh;
mod simplify;
mod store;
mod transform;

mod error;
pub use error::Error;

pub use build::{Grid, SURFACE_EPSILON};
pub use data::{Format, Scalar};
pub use linalg::{Quadric, REFINE_STEPS, iterative_improve, lerp};
pub use mesh::{Mesh, Settings};
pub use store::{PointId, TriangleId, arena::Allocation};
