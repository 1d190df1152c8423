//! Entry Weighers
//!
//! A weigher assigns the byte cost an entry is charged against the cache
//! budget. The cost is computed once, when the entry is built, and never
//! recomputed. Returning 0 is treated as 1 so no entry escapes accounting.

use crate::raster::TilePayload;

use super::ENTRY_OVERHEAD_BYTES;

/// Computes the cost of a cached payload
pub trait TileWeigher<P>: Send + Sync + 'static {
    fn weigh(&self, payload: &P) -> u64;
}

/// Raw sample bytes plus a fixed per-entry overhead (default)
#[derive(Debug, Clone, Copy)]
pub struct SampleWeigher {
    overhead: u64,
}

impl SampleWeigher {
    pub fn new() -> Self {
        Self::with_overhead(ENTRY_OVERHEAD_BYTES)
    }

    pub fn with_overhead(overhead: u64) -> Self {
        Self { overhead }
    }
}

impl Default for SampleWeigher {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: TilePayload> TileWeigher<P> for SampleWeigher {
    #[inline]
    fn weigh(&self, payload: &P) -> u64 {
        payload
            .byte_size()
            .saturating_add(self.overhead)
            .max(1)
    }
}

/// A weigher backed by a closure
pub struct FnWeigher<F>(pub F);

impl<P, F> TileWeigher<P> for FnWeigher<F>
where
    F: Fn(&P) -> u64 + Send + Sync + 'static,
{
    #[inline]
    fn weigh(&self, payload: &P) -> u64 {
        (self.0)(payload).max(1)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Raster, SampleType};

    #[test]
    fn test_sample_weigher_adds_overhead() {
        let raster = Raster::zeroed(SampleType::U16, 8, 8, 2);
        let weight = SampleWeigher::new().weigh(&raster);
        assert_eq!(weight, 2 * 64 * 2 + ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn test_sample_weigher_custom_overhead() {
        let raster = Raster::zeroed(SampleType::U8, 10, 10, 1);
        assert_eq!(SampleWeigher::with_overhead(0).weigh(&raster), 100);
    }

    #[test]
    fn test_empty_payload_weighs_at_least_one() {
        let raster = Raster::zeroed(SampleType::U8, 0, 0, 1);
        assert_eq!(SampleWeigher::with_overhead(0).weigh(&raster), 1);
        assert_eq!(FnWeigher(|_: &Raster| 0).weigh(&raster), 1);
    }

    #[test]
    fn test_fn_weigher() {
        let weigher = FnWeigher(|r: &Raster| r.data().len() as u64 * 10);
        let raster = Raster::zeroed(SampleType::U8, 2, 2, 1);
        assert_eq!(weigher.weigh(&raster), 40);
    }

    #[test]
    fn test_sample_weigher_saturates_on_huge_payload() {
        struct Wide;

        impl crate::raster::TilePayload for Wide {
            fn bytes_per_sample(&self) -> u64 {
                8
            }

            fn element_count(&self) -> u64 {
                u64::MAX / 4
            }

            fn band_count(&self) -> u64 {
                16
            }
        }

        assert_eq!(SampleWeigher::new().weigh(&Wide), u64::MAX);
    }
}
