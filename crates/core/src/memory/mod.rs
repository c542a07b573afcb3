//! Region-tagged allocation for the two memory classes the host exposes.
//!
//! Every allocation is an owned [`RegionBuffer`]. Dropping the buffer returns
//! its bytes to the region it came from, so a failed multi-step launch rolls
//! back simply by letting the already-allocated buffers go out of scope.

use std::fmt;
use std::sync::atomic::{self, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::{LottieError, Result};

/// Memory class an allocation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// Large, slower external memory. Reads after writes from another agent
    /// need an explicit cache synchronisation.
    Bulk,
    /// Small internal memory, always coherent.
    Fast,
}

impl MemoryRegion {
    pub fn needs_cache_sync(self) -> bool {
        matches!(self, Self::Bulk)
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bulk => f.write_str("bulk"),
            Self::Fast => f.write_str("fast"),
        }
    }
}

/// Point-in-time accounting for both regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionStats {
    pub bulk_in_use: usize,
    pub fast_in_use: usize,
    pub live_allocations: usize,
    pub total_allocations: u64,
    pub failed_allocations: u64,
}

#[derive(Debug)]
struct Pool {
    capacity: usize,
    in_use: AtomicUsize,
    live: AtomicUsize,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Reserves `size` bytes, or reports how many bytes were still free.
    fn reserve(&self, size: usize) -> std::result::Result<(), usize> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= self.capacity)
            })
            .map(|_| {
                self.live.fetch_add(1, Ordering::AcqRel);
            })
            .map_err(|used| self.capacity.saturating_sub(used))
    }

    fn release(&self, size: usize) {
        self.in_use.fetch_sub(size, Ordering::AcqRel);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct Regions {
    bulk: Pool,
    fast: Pool,
    total: AtomicU64,
    failed: AtomicU64,
}

impl Regions {
    fn pool(&self, region: MemoryRegion) -> &Pool {
        match region {
            MemoryRegion::Bulk => &self.bulk,
            MemoryRegion::Fast => &self.fast,
        }
    }
}

/// Shared handle to the host's memory regions. Cloning is cheap and every
/// clone accounts against the same capacities.
#[derive(Debug, Clone)]
pub struct RegionAllocator {
    regions: Arc<Regions>,
}

impl RegionAllocator {
    pub fn new(config: &MemoryConfig) -> Self {
        Self::with_capacities(config.bulk_capacity, config.fast_capacity)
    }

    pub fn with_capacities(bulk_capacity: usize, fast_capacity: usize) -> Self {
        Self {
            regions: Arc::new(Regions {
                bulk: Pool::new(bulk_capacity),
                fast: Pool::new(fast_capacity),
                total: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Allocates a zero-filled buffer of `size` bytes whose first byte is
    /// aligned to `alignment`.
    pub fn allocate(
        &self,
        region: MemoryRegion,
        size: usize,
        alignment: usize,
    ) -> Result<RegionBuffer> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(LottieError::InvalidAlignment(alignment));
        }

        let pool = self.regions.pool(region);
        if let Err(available) = pool.reserve(size) {
            self.regions.failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%region, size, available, "region exhausted");
            return Err(LottieError::Allocation {
                region,
                requested: size,
                available,
            });
        }

        // Padding is backing-store overhead and is not charged to the region.
        let mut storage = Vec::new();
        let padded = size.saturating_add(alignment - 1);
        if storage.try_reserve_exact(padded).is_err() {
            pool.release(size);
            self.regions.failed.fetch_add(1, Ordering::Relaxed);
            return Err(LottieError::Allocation {
                region,
                requested: size,
                available: 0,
            });
        }
        storage.resize(padded, 0);
        let misalignment = storage.as_ptr() as usize % alignment;
        let offset = if misalignment == 0 {
            0
        } else {
            alignment - misalignment
        };

        self.regions.total.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%region, size, alignment, "region allocation");

        Ok(RegionBuffer {
            storage,
            offset,
            len: size,
            region,
            regions: Arc::clone(&self.regions),
        })
    }

    /// Returns the buffer to its region. Equivalent to dropping it.
    pub fn free(&self, buffer: RegionBuffer) {
        tracing::trace!(region = %buffer.region, size = buffer.len, "region free");
        drop(buffer);
    }

    pub fn stats(&self) -> RegionStats {
        let regions = &self.regions;
        RegionStats {
            bulk_in_use: regions.bulk.in_use.load(Ordering::Acquire),
            fast_in_use: regions.fast.in_use.load(Ordering::Acquire),
            live_allocations: regions.bulk.live.load(Ordering::Acquire)
                + regions.fast.live.load(Ordering::Acquire),
            total_allocations: regions.total.load(Ordering::Relaxed),
            failed_allocations: regions.failed.load(Ordering::Relaxed),
        }
    }
}

/// Owned allocation from a [`MemoryRegion`].
pub struct RegionBuffer {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
    region: MemoryRegion,
    regions: Arc<Regions>,
}

impl RegionBuffer {
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.offset..self.offset + self.len]
    }

    /// Makes writes from another agent visible before the buffer is read.
    pub fn sync_for_read(&self) {
        if self.region.needs_cache_sync() {
            atomic::fence(Ordering::Acquire);
        }
    }
}

impl Drop for RegionBuffer {
    fn drop(&mut self) {
        self.regions.pool(self.region).release(self.len);
    }
}

impl fmt::Debug for RegionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionBuffer")
            .field("region", &self.region)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honours_alignment_and_zero_fills() {
        let allocator = RegionAllocator::with_capacities(4096, 1024);
        let buffer = allocator.allocate(MemoryRegion::Bulk, 100, 64).unwrap();

        assert_eq!(buffer.as_slice().as_ptr() as usize % 64, 0);
        assert_eq!(buffer.len(), 100);
        assert!(buffer.as_slice().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn dropping_returns_bytes_to_the_right_region() {
        let allocator = RegionAllocator::with_capacities(4096, 1024);
        let bulk = allocator.allocate(MemoryRegion::Bulk, 1000, 8).unwrap();
        let fast = allocator.allocate(MemoryRegion::Fast, 200, 8).unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.bulk_in_use, 1000);
        assert_eq!(stats.fast_in_use, 200);
        assert_eq!(stats.live_allocations, 2);

        allocator.free(bulk);
        drop(fast);

        let stats = allocator.stats();
        assert_eq!(stats.bulk_in_use, 0);
        assert_eq!(stats.fast_in_use, 0);
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.total_allocations, 2);
    }

    #[test]
    fn exhausted_region_reports_available_bytes() {
        let allocator = RegionAllocator::with_capacities(1024, 64);
        let _held = allocator.allocate(MemoryRegion::Fast, 48, 8).unwrap();

        let err = allocator.allocate(MemoryRegion::Fast, 32, 8).unwrap_err();
        match err {
            LottieError::Allocation {
                region,
                requested,
                available,
            } => {
                assert_eq!(region, MemoryRegion::Fast);
                assert_eq!(requested, 32);
                assert_eq!(available, 16);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(allocator.stats().failed_allocations, 1);
        assert_eq!(allocator.stats().fast_in_use, 48);
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        let allocator = RegionAllocator::with_capacities(1024, 64);
        assert!(matches!(
            allocator.allocate(MemoryRegion::Bulk, 16, 3),
            Err(LottieError::InvalidAlignment(3))
        ));
        assert_eq!(allocator.stats().live_allocations, 0);
    }

    #[test]
    fn only_bulk_needs_cache_sync() {
        assert!(MemoryRegion::Bulk.needs_cache_sync());
        assert!(!MemoryRegion::Fast.needs_cache_sync());
    }
}
