//! Raster Collaborators
//!
//! Boundary types the tile cache is written against: the image that owns a
//! tile and the computed tile payload. The cache never computes rasters; it
//! only needs an owner identity, the owner's tile grid, and a payload whose
//! byte size can be queried.

mod owner;
mod tile;

pub use owner::{RasterImage, TileGrid, TileOwner};
pub use tile::{Raster, SampleType, TilePayload};
