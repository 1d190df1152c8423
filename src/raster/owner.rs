//! Tile Owners
//!
//! An owner is the logical image a tile belongs to. The cache hashes it into
//! keys and walks its tile grid for bulk operations, but never owns it.

use std::sync::atomic::{AtomicU32, Ordering};

use uuid::Uuid;

use crate::cache::fx_hash;

/// Identity and layout of an image whose tiles are cached
pub trait TileOwner: Send + Sync {
    /// Stable 32-bit identity hash, used for packed keys
    fn identity_hash(&self) -> u32;

    /// Opaque identity blob; when present, keys are built from it instead of
    /// the 32-bit hash
    fn identity_blob(&self) -> Option<&[u8]> {
        None
    }

    /// Currently valid tile grid
    fn tile_grid(&self) -> TileGrid;
}

/// Tile grid extent of an owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    /// Smallest tile index along X
    pub min_tile_x: i32,
    /// Smallest tile index along Y
    pub min_tile_y: i32,
    /// Number of tile columns
    pub num_tiles_x: u32,
    /// Number of tile rows
    pub num_tiles_y: u32,
}

impl TileGrid {
    /// Create a grid starting at tile (0, 0)
    pub fn new(num_tiles_x: u32, num_tiles_y: u32) -> Self {
        Self {
            min_tile_x: 0,
            min_tile_y: 0,
            num_tiles_x,
            num_tiles_y,
        }
    }

    /// Total number of tiles in the grid
    pub fn tile_count(&self) -> u64 {
        self.num_tiles_x as u64 * self.num_tiles_y as u64
    }

    /// Check whether a tile coordinate lies inside the grid
    pub fn contains(&self, tile_x: i32, tile_y: i32) -> bool {
        let dx = tile_x as i64 - self.min_tile_x as i64;
        let dy = tile_y as i64 - self.min_tile_y as i64;
        dx >= 0 && dy >= 0 && dx < self.num_tiles_x as i64 && dy < self.num_tiles_y as i64
    }

    /// Linearized tile index: `tile_y * num_tiles_x + tile_x`
    #[inline]
    pub fn linear_index(&self, tile_x: i32, tile_y: i32) -> i64 {
        tile_y as i64 * self.num_tiles_x as i64 + tile_x as i64
    }

    /// Every valid tile coordinate, row-major
    pub fn coordinates(&self) -> impl Iterator<Item = (i32, i32)> {
        let TileGrid {
            min_tile_x,
            min_tile_y,
            num_tiles_x,
            num_tiles_y,
        } = *self;
        (0..num_tiles_y as i32).flat_map(move |row| {
            (0..num_tiles_x as i32).map(move |col| (min_tile_x + col, min_tile_y + row))
        })
    }
}

/// Source of identity hashes for images without an identity blob
static NEXT_ANONYMOUS_ID: AtomicU32 = AtomicU32::new(1);

/// Concrete tiled image usable as a cache owner
#[derive(Debug, Clone)]
pub struct RasterImage {
    /// Identity blob (absent for anonymous images)
    id: Option<Uuid>,
    /// 32-bit identity hash
    hash: u32,
    /// Image width in pixels
    width: u32,
    /// Image height in pixels
    height: u32,
    /// Tile width in pixels
    tile_width: u32,
    /// Tile height in pixels
    tile_height: u32,
}

impl RasterImage {
    /// Create an image with a random UUID identity
    pub fn new(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        let id = Uuid::new_v4();
        let wide = fx_hash(id.as_bytes());
        Self {
            id: Some(id),
            hash: (wide ^ (wide >> 32)) as u32,
            width,
            height,
            tile_width: tile_width.max(1),
            tile_height: tile_height.max(1),
        }
    }

    /// Create an image identified only by a process-unique 32-bit hash
    pub fn anonymous(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            id: None,
            hash: NEXT_ANONYMOUS_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            tile_width: tile_width.max(1),
            tile_height: tile_height.max(1),
        }
    }

    /// UUID identity, if any
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }
}

impl TileOwner for RasterImage {
    fn identity_hash(&self) -> u32 {
        self.hash
    }

    fn identity_blob(&self) -> Option<&[u8]> {
        self.id.as_ref().map(|id| id.as_bytes().as_slice())
    }

    fn tile_grid(&self) -> TileGrid {
        TileGrid::new(
            self.width.div_ceil(self.tile_width),
            self.height.div_ceil(self.tile_height),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
