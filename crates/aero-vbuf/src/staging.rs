//! Staging memory for translated and uploaded vertex data.
//!
//! The draw path asks a [`StagingAllocator`] for writable regions of a device-visible resource.
//! [`StagingArena`] is the CPU implementation used by software backends and tests; the wgpu
//! backend provides one that flushes into a `wgpu::Buffer`.

use thiserror::Error;
use tracing::trace;

use crate::buffer_arena::BufferArena;
use crate::resource::ResourceId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StagingError {
    #[error("invalid staging descriptor: {0}")]
    InvalidDescriptor(&'static str),

    #[error("staging request of {requested} bytes exceeds the {capacity}-byte staging capacity")]
    TooLarge { requested: u64, capacity: u64 },

    /// No placement at or past `min_offset` fits inside the resource, however empty.
    #[error(
        "staging request of {requested} bytes at offset {min_offset} or later overruns the {resource_size}-byte resource"
    )]
    BeyondResource {
        requested: u64,
        min_offset: u64,
        resource_size: u64,
    },

    #[error(
        "staging space exhausted: requested {requested} bytes (alignment {alignment}, min offset {min_offset}), {remaining} bytes remaining"
    )]
    OutOfSpace {
        requested: u64,
        alignment: u64,
        min_offset: u64,
        remaining: u64,
    },
}

/// Parameters of one staging allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingRequest {
    pub size: u64,
    pub alignment: u64,
    /// The returned region starts at or after this offset. Staged data is bound at
    /// `offset - min_offset`, which must not underflow.
    pub min_offset: u64,
}

impl StagingRequest {
    pub fn new(size: u64, alignment: u64) -> Self {
        Self {
            size,
            alignment,
            min_offset: 0,
        }
    }

    pub fn with_min_offset(mut self, min_offset: u64) -> Self {
        self.min_offset = min_offset;
        self
    }
}

/// A region of a staging resource, valid until released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StagingRegion {
    pub resource: ResourceId,
    pub offset: u64,
    pub size: u64,
    /// Total size of the backing resource.
    pub resource_size: u64,
}

/// A freshly allocated region and the bytes to fill it with.
#[derive(Debug)]
pub struct StagingAllocation<'a> {
    pub region: StagingRegion,
    pub data: &'a mut [u8],
}

pub trait StagingAllocator {
    fn allocate(&mut self, request: StagingRequest)
        -> Result<StagingAllocation<'_>, StagingError>;

    /// Called once per region when the draw that used it has been handed off.
    ///
    /// Backends whose memory the device may still read after the call keep the bytes alive
    /// until their own frame boundary.
    fn release(&mut self, region: StagingRegion) {
        let _ = region;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StagingStats {
    pub allocations: u64,
    pub bytes_allocated: u64,
    pub releases: u64,
}

/// CPU staging arena over a single fixed-size resource.
///
/// Allocations are linear. Released regions are not reused until [`StagingArena::reset`].
#[derive(Debug)]
pub struct StagingArena {
    resource: ResourceId,
    storage: Vec<u8>,
    arena: BufferArena,
    live_regions: usize,
    stats: StagingStats,
}

impl StagingArena {
    pub fn new(resource: ResourceId, capacity: u64) -> Result<Self, StagingError> {
        if capacity == 0 {
            return Err(StagingError::InvalidDescriptor("capacity must be > 0"));
        }
        let len = usize::try_from(capacity)
            .map_err(|_| StagingError::InvalidDescriptor("capacity exceeds address space"))?;
        Ok(Self {
            resource,
            storage: vec![0; len],
            arena: BufferArena::new(0, capacity),
            live_regions: 0,
            stats: StagingStats::default(),
        })
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn capacity(&self) -> u64 {
        self.arena.capacity()
    }

    pub fn remaining(&self) -> u64 {
        self.arena.remaining()
    }

    /// Regions allocated and not yet released.
    pub fn live_regions(&self) -> usize {
        self.live_regions
    }

    pub fn stats(&self) -> StagingStats {
        self.stats
    }

    /// Every byte of the resource, including regions already released.
    pub fn contents(&self) -> &[u8] {
        &self.storage
    }

    /// Rewind to the start of the resource. Call once the device is done with everything
    /// allocated so far.
    pub fn reset(&mut self) {
        self.arena.reset();
        self.live_regions = 0;
    }
}

impl StagingAllocator for StagingArena {
    fn allocate(
        &mut self,
        request: StagingRequest,
    ) -> Result<StagingAllocation<'_>, StagingError> {
        let capacity = self.arena.capacity();
        if request.size > capacity {
            return Err(StagingError::TooLarge {
                requested: request.size,
                capacity,
            });
        }
        if request.min_offset.saturating_add(request.size) > capacity {
            return Err(StagingError::BeyondResource {
                requested: request.size,
                min_offset: request.min_offset,
                resource_size: capacity,
            });
        }

        let offset = self
            .arena
            .alloc(request.size, request.alignment, request.min_offset)
            .ok_or(StagingError::OutOfSpace {
                requested: request.size,
                alignment: request.alignment,
                min_offset: request.min_offset,
                remaining: self.arena.remaining(),
            })?;

        self.live_regions += 1;
        self.stats.allocations += 1;
        self.stats.bytes_allocated += request.size;
        trace!(offset, size = request.size, "staging allocation");

        let start = offset as usize;
        let end = start + request.size as usize;
        Ok(StagingAllocation {
            region: StagingRegion {
                resource: self.resource,
                offset,
                size: request.size,
                resource_size: capacity,
            },
            data: &mut self.storage[start..end],
        })
    }

    fn release(&mut self, region: StagingRegion) {
        debug_assert_eq!(region.resource, self.resource);
        self.live_regions = self.live_regions.saturating_sub(1);
        self.stats.releases += 1;
    }
}
