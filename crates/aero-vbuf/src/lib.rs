//! `aero-vbuf` lets a renderer bind vertex layouts its device cannot fetch directly.
//!
//! At draw time [`Vbuf`] works out which attributes use formats, offsets or strides the device
//! rejects, converts them into packed native-format streams ([`translate`]), uploads host-memory
//! vertex data the draw touches, and hands the encoder a device-visible vertex state.
//!
//! The pieces are usable on their own:
//! - [`format`] and [`convert`]: vertex format layouts and per-channel fetch/emit routines.
//! - [`translate`]: keyed attribute translators plus an LRU-capable cache.
//! - [`staging`]: the allocator seam for staging memory, with a CPU arena.
//! - [`wgpu_backend`]: wgpu format mapping, device caps and a frame-ring staging buffer.

mod buffer_arena;
mod caps;
mod config;
mod elements;
mod error;
mod index_bounds;
mod manager;
mod resource;

pub mod convert;
pub mod format;
pub mod staging;
pub mod translate;
pub mod wgpu_backend;

pub use caps::{DeviceCaps, NativeFormatTable, VertexFormatCaps};
pub use config::{
    FetchAlignment, FreeSlotPolicy, VbufConfig, MAX_VERTEX_ATTRIBS, MAX_VERTEX_BUFFERS,
};
pub use elements::{ResolvedElement, VertexElement, VertexElements};
pub use error::{Result, VbufError};
pub use format::{Format, FormatRegistry, StandardFormats};
pub use index_bounds::{scan_index_range, IndexRange, IndexSize};
pub use manager::{
    BoundVertexState, DeviceBinding, DrawBounds, DrawEncoder, DrawGuard, DrawInfo,
    IndexBufferBinding, Vbuf, VbufStats, VertexBufferBinding,
};
pub use resource::{BufferResource, ResourceId};
pub use staging::{StagingAllocator, StagingArena, StagingError, StagingRegion};
