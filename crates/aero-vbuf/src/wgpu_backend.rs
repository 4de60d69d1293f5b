//! wgpu integration: vertex format mapping, device caps and a staging ring over a
//! `wgpu::Buffer`.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::buffer_arena::{align_up, BufferArena};
use crate::caps::DeviceCaps;
use crate::format::Format;
use crate::resource::ResourceId;
use crate::staging::{
    StagingAllocation, StagingAllocator, StagingError, StagingRegion, StagingRequest,
};

/// The wgpu vertex format with the same memory layout and fetch semantics, if WebGPU has one.
///
/// WebGPU has no scaled, fixed-point, 32-bit normalized, 3-channel 8/16-bit or reordered 8-bit
/// vertex formats; those always go through translation.
pub fn wgpu_vertex_format(format: Format) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as V;

    Some(match format {
        Format::R8G8Uint => V::Uint8x2,
        Format::R8G8B8A8Uint => V::Uint8x4,
        Format::R8G8Sint => V::Sint8x2,
        Format::R8G8B8A8Sint => V::Sint8x4,
        Format::R8G8Unorm => V::Unorm8x2,
        Format::R8G8B8A8Unorm => V::Unorm8x4,
        Format::R8G8Snorm => V::Snorm8x2,
        Format::R8G8B8A8Snorm => V::Snorm8x4,

        Format::R16G16Uint => V::Uint16x2,
        Format::R16G16B16A16Uint => V::Uint16x4,
        Format::R16G16Sint => V::Sint16x2,
        Format::R16G16B16A16Sint => V::Sint16x4,
        Format::R16G16Unorm => V::Unorm16x2,
        Format::R16G16B16A16Unorm => V::Unorm16x4,
        Format::R16G16Snorm => V::Snorm16x2,
        Format::R16G16B16A16Snorm => V::Snorm16x4,
        Format::R16G16Float => V::Float16x2,
        Format::R16G16B16A16Float => V::Float16x4,

        Format::R32Float => V::Float32,
        Format::R32G32Float => V::Float32x2,
        Format::R32G32B32Float => V::Float32x3,
        Format::R32G32B32A32Float => V::Float32x4,
        Format::R32Uint => V::Uint32,
        Format::R32G32Uint => V::Uint32x2,
        Format::R32G32B32Uint => V::Uint32x3,
        Format::R32G32B32A32Uint => V::Uint32x4,
        Format::R32Sint => V::Sint32,
        Format::R32G32Sint => V::Sint32x2,
        Format::R32G32B32Sint => V::Sint32x3,
        Format::R32G32B32A32Sint => V::Sint32x4,

        Format::R64Float => V::Float64,
        Format::R64G64Float => V::Float64x2,
        Format::R64G64B64Float => V::Float64x3,
        Format::R64G64B64A64Float => V::Float64x4,

        _ => return None,
    })
}

/// [`DeviceCaps`] for a wgpu device.
#[derive(Debug, Clone, Copy)]
pub struct WgpuVertexCaps {
    features: wgpu::Features,
}

impl WgpuVertexCaps {
    pub fn new(features: wgpu::Features) -> Self {
        Self { features }
    }

    pub fn from_device(device: &wgpu::Device) -> Self {
        Self::new(device.features())
    }
}

impl DeviceCaps for WgpuVertexCaps {
    fn is_vertex_format_supported(&self, format: Format) -> bool {
        match wgpu_vertex_format(format) {
            Some(
                wgpu::VertexFormat::Float64
                | wgpu::VertexFormat::Float64x2
                | wgpu::VertexFormat::Float64x3
                | wgpu::VertexFormat::Float64x4,
            ) => self
                .features
                .contains(wgpu::Features::VERTEX_ATTRIBUTE_64BIT),
            Some(_) => true,
            None => false,
        }
    }
}

pub struct WgpuStagingRingDescriptor<'a> {
    pub label: Option<&'a str>,
    /// Identifies the ring's buffer in [`StagingRegion`]s and device bindings.
    pub resource: ResourceId,
    /// Budget per frame (before padding to the copy alignment).
    pub per_frame_size: u64,
    /// Segments in the ring; a frame's segment is reused this many frames later.
    pub frames_in_flight: usize,
}

impl Default for WgpuStagingRingDescriptor<'_> {
    fn default() -> Self {
        Self {
            label: Some("aero vertex staging ring"),
            resource: ResourceId(u32::MAX),
            per_frame_size: 4 * 1024 * 1024,
            frames_in_flight: 3,
        }
    }
}

/// Staging for translated and uploaded vertex data in a single `VERTEX | COPY_DST` buffer.
///
/// The buffer is split into `frames_in_flight` segments; each frame allocates from the next one
/// so the device never reads a segment being rewritten. Writes land in a CPU shadow copy and
/// reach the buffer on [`WgpuStagingRing::flush`], which must run before the frame's draws are
/// submitted.
pub struct WgpuStagingRing {
    resource: ResourceId,
    buffer: Arc<wgpu::Buffer>,
    shadow: Vec<u8>,
    segments: Vec<BufferArena>,
    frame: usize,
    /// Byte range written since the last flush.
    dirty: Option<(u64, u64)>,
}

impl WgpuStagingRing {
    pub fn new(
        device: &wgpu::Device,
        desc: WgpuStagingRingDescriptor<'_>,
    ) -> Result<Self, StagingError> {
        if desc.frames_in_flight == 0 || desc.per_frame_size == 0 {
            return Err(StagingError::InvalidDescriptor(
                "staging ring needs at least one non-empty frame",
            ));
        }

        let per_frame_capacity = align_up(desc.per_frame_size, wgpu::COPY_BUFFER_ALIGNMENT);
        let max = device.limits().max_buffer_size;
        let total_size = per_frame_capacity
            .checked_mul(desc.frames_in_flight as u64)
            .filter(|&total| total <= max)
            .ok_or(StagingError::TooLarge {
                requested: per_frame_capacity.saturating_mul(desc.frames_in_flight as u64),
                capacity: max,
            })?;
        let shadow_len = usize::try_from(total_size)
            .map_err(|_| StagingError::InvalidDescriptor("ring exceeds address space"))?;

        let buffer = Arc::new(device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label,
            size: total_size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let segments = (0..desc.frames_in_flight as u64)
            .map(|frame| BufferArena::new(frame * per_frame_capacity, per_frame_capacity))
            .collect();

        Ok(Self {
            resource: desc.resource,
            buffer,
            shadow: vec![0; shadow_len],
            segments,
            // The first `begin_frame` wraps around to segment 0.
            frame: desc.frames_in_flight - 1,
            dirty: None,
        })
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn buffer_handle(&self) -> Arc<wgpu::Buffer> {
        Arc::clone(&self.buffer)
    }

    /// Move to the next segment, whose previous contents the device is done reading.
    pub fn begin_frame(&mut self) {
        debug_assert!(
            self.dirty.is_none(),
            "begin_frame called with unflushed staging writes"
        );
        self.frame = (self.frame + 1) % self.segments.len();
        self.segments[self.frame].reset();
    }

    /// Copy everything written since the last flush into the GPU buffer.
    pub fn flush(&mut self, queue: &wgpu::Queue) {
        let Some((start, end)) = self.dirty.take() else {
            return;
        };
        let start = start / wgpu::COPY_BUFFER_ALIGNMENT * wgpu::COPY_BUFFER_ALIGNMENT;
        let end = align_up(end, wgpu::COPY_BUFFER_ALIGNMENT).min(self.shadow.len() as u64);
        trace!(start, end, "flushing vertex staging");
        queue.write_buffer(
            &self.buffer,
            start,
            &self.shadow[start as usize..end as usize],
        );
    }
}

impl StagingAllocator for WgpuStagingRing {
    fn allocate(
        &mut self,
        request: StagingRequest,
    ) -> Result<StagingAllocation<'_>, StagingError> {
        let resource_size = self.shadow.len() as u64;
        let segment = &mut self.segments[self.frame];
        let capacity = segment.capacity();
        if request.size > capacity {
            return Err(StagingError::TooLarge {
                requested: request.size,
                capacity,
            });
        }
        if request.min_offset.saturating_add(request.size) > resource_size {
            return Err(StagingError::BeyondResource {
                requested: request.size,
                min_offset: request.min_offset,
                resource_size,
            });
        }

        let alignment = request.alignment.max(1);
        let offset = segment
            .alloc(request.size, alignment, request.min_offset)
            .ok_or(StagingError::OutOfSpace {
                requested: request.size,
                alignment,
                min_offset: request.min_offset,
                remaining: segment.remaining(),
            })?;
        let end = offset + request.size;

        self.dirty = Some(match self.dirty {
            None => (offset, end),
            Some((start, dirty_end)) => (start.min(offset), dirty_end.max(end)),
        });

        Ok(StagingAllocation {
            region: StagingRegion {
                resource: self.resource,
                offset,
                size: request.size,
                resource_size,
            },
            data: &mut self.shadow[offset as usize..end as usize],
        })
    }
}

impl fmt::Debug for WgpuStagingRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuStagingRing")
            .field("resource", &self.resource)
            .field("size", &self.shadow.len())
            .field("frame", &self.frame)
            .field("segment", &self.segments[self.frame])
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::VertexFormatCaps;
    use crate::format::StandardFormats;
    use pretty_assertions::assert_eq;

    #[test]
    fn mapped_formats_match_block_size() {
        use crate::format::FormatRegistry;

        for &format in Format::ALL {
            if let Some(vertex_format) = wgpu_vertex_format(format) {
                let desc = StandardFormats.describe(format).unwrap();
                assert_eq!(
                    vertex_format.size(),
                    desc.block_size() as u64,
                    "{format}"
                );
            }
        }
    }

    #[test]
    fn webgpu_caps_force_translation_of_legacy_formats() {
        let caps = VertexFormatCaps::query(&WgpuVertexCaps::new(wgpu::Features::empty()));
        assert_eq!(
            caps,
            VertexFormatCaps::FLOAT16 | VertexFormatCaps::RGBA8_UNORM
        );

        let with_f64 = VertexFormatCaps::query(&WgpuVertexCaps::new(
            wgpu::Features::VERTEX_ATTRIBUTE_64BIT,
        ));
        assert!(with_f64.contains(VertexFormatCaps::FLOAT64));
    }
}
