//! Tile Payloads
//!
//! Computed tile data as the cache sees it: an opaque block whose byte cost
//! is `bytes_per_sample * element_count * band_count`.

use bytes::Bytes;

/// Data a cached tile carries
pub trait TilePayload: Send + Sync + 'static {
    /// Size of one sample in bytes
    fn bytes_per_sample(&self) -> u64;

    /// Number of samples per band
    fn element_count(&self) -> u64;

    /// Number of bands
    fn band_count(&self) -> u64;

    /// Raw sample byte size
    fn byte_size(&self) -> u64 {
        self.bytes_per_sample()
            .saturating_mul(self.element_count())
            .saturating_mul(self.band_count())
    }
}

/// Sample data type of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    I16,
    U16,
    I32,
    F32,
    F64,
}

impl SampleType {
    /// Size of one sample in bytes
    pub const fn bytes(self) -> u64 {
        match self {
            SampleType::U8 => 1,
            SampleType::I16 | SampleType::U16 => 2,
            SampleType::I32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }
}

/// Band-interleaved tile of raster samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    data: Bytes,
    sample_type: SampleType,
    width: u32,
    height: u32,
    bands: u32,
}

impl Raster {
    /// Wrap computed sample bytes
    pub fn new(data: Bytes, sample_type: SampleType, width: u32, height: u32, bands: u32) -> Self {
        Self {
            data,
            sample_type,
            width,
            height,
            bands,
        }
    }

    /// Zero-filled raster with the right byte length
    pub fn zeroed(sample_type: SampleType, width: u32, height: u32, bands: u32) -> Self {
        let len = sample_type.bytes() * width as u64 * height as u64 * bands as u64;
        Self::new(
            Bytes::from(vec![0u8; len as usize]),
            sample_type,
            width,
            height,
            bands,
        )
    }

    /// Sample bytes (zero-copy)
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bands(&self) -> u32 {
        self.bands
    }
}

impl TilePayload for Raster {
    fn bytes_per_sample(&self) -> u64 {
        self.sample_type.bytes()
    }

    fn element_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn band_count(&self) -> u64 {
        self.bands as u64
    }
}

// =============================================================================
// Tests
// =============================================================================
