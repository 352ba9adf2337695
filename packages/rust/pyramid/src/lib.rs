//! Pyramid descriptor model, slab path codec, and slab lists.
//!
//! A pyramid is a multi-resolution dataset organized into levels, each a
//! grid of slabs sharing one tile matrix set. This crate owns the JSON
//! descriptor, the two slab path layouts, and the list files recording a
//! pyramid's slabs.

pub mod descriptor;
pub mod list;
pub mod slab;

pub use descriptor::{Descriptor, LevelSpec, Pyramid, RasterFormat, RasterSpecifications};
pub use list::{ListEntry, SlabList};
