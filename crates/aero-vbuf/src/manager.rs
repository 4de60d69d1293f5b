//! Draw-time vertex buffer compatibility manager.
//!
//! [`Vbuf`] sits between an application's vertex state and a device that cannot fetch every
//! layout the application binds. At each draw it:
//!
//! 1. resolves the vertex index range the draw touches (scanning the index buffer only when some
//!    attribute needs it),
//! 2. translates incompatible attributes into packed native-format streams in staging memory,
//!    one stream per category (per-vertex, per-instance, constant), each on a free slot,
//! 3. uploads the touched range of every host ("user") buffer still referenced,
//! 4. hands the resulting device-visible state to the encoder.
//!
//! Staging regions are owned by the returned [`DrawGuard`] and released when it drops; the
//! bound application state is never rewritten.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::caps::{DeviceCaps, NativeFormatTable, VertexFormatCaps};
use crate::config::{FetchAlignment, FreeSlotPolicy, VbufConfig, MAX_VERTEX_BUFFERS};
use crate::elements::{ResolvedElement, VertexElement, VertexElements};
use crate::error::{Result, VbufError};
use crate::format::{FormatRegistry, StandardFormats};
use crate::index_bounds::{scan_index_range, IndexRange, IndexSize};
use crate::resource::{BufferResource, ResourceId};
use crate::staging::{StagingAllocator, StagingRegion, StagingRequest};
use crate::translate::{TranslateCache, TranslateCacheStats, TranslateElement, TranslateKey};

/// A vertex buffer slot as the application binds it.
#[derive(Debug, Clone, Default)]
pub struct VertexBufferBinding {
    pub resource: Option<Arc<BufferResource>>,
    pub offset: u64,
    pub stride: u32,
}

impl VertexBufferBinding {
    pub fn new(resource: Arc<BufferResource>, offset: u64, stride: u32) -> Self {
        Self {
            resource: Some(resource),
            offset,
            stride,
        }
    }

    pub fn unbound() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct IndexBufferBinding {
    pub resource: Arc<BufferResource>,
    pub offset: u64,
    pub index_size: IndexSize,
}

/// A vertex buffer slot as the device sees it for one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBinding {
    pub resource: ResourceId,
    pub offset: u64,
    pub stride: u32,
    /// Size of the whole resource, for bounds the encoder may need.
    pub resource_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawInfo {
    pub indexed: bool,
    /// First vertex, or first index for indexed draws.
    pub start: u32,
    pub count: u32,
    /// Added to every index before fetching.
    pub index_bias: i32,
    /// Caller-provided inclusive bounds on the indices, before bias.
    pub index_bounds: Option<(u32, u32)>,
    pub start_instance: u32,
    pub instance_count: u32,
    pub primitive_restart: bool,
    pub restart_index: u32,
}

impl DrawInfo {
    pub fn arrays(start: u32, count: u32) -> Self {
        Self {
            indexed: false,
            start,
            count,
            index_bias: 0,
            index_bounds: None,
            start_instance: 0,
            instance_count: 1,
            primitive_restart: false,
            restart_index: u32::MAX,
        }
    }

    pub fn indexed(start: u32, count: u32) -> Self {
        Self {
            indexed: true,
            ..Self::arrays(start, count)
        }
    }

    pub fn with_instances(mut self, start_instance: u32, instance_count: u32) -> Self {
        self.start_instance = start_instance;
        self.instance_count = instance_count;
        self
    }

    pub fn with_index_bounds(mut self, min: u32, max: u32) -> Self {
        self.index_bounds = Some((min, max));
        self
    }

    pub fn with_index_bias(mut self, bias: i32) -> Self {
        self.index_bias = bias;
        self
    }

    pub fn with_primitive_restart(mut self, restart_index: u32) -> Self {
        self.primitive_restart = true;
        self.restart_index = restart_index;
        self
    }
}

/// Vertex range a draw fetches, bias included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBounds {
    pub min_index: u32,
    pub max_index: u32,
    pub instance_count: u32,
}

impl DrawBounds {
    /// Bounds for an indexed draw nothing needed the exact range of.
    pub fn unbounded(instance_count: u32) -> Self {
        Self {
            min_index: 0,
            max_index: u32::MAX,
            instance_count,
        }
    }

    pub fn vertex_count(&self) -> u64 {
        (self.max_index as u64 + 1).saturating_sub(self.min_index as u64)
    }
}

/// Device-visible vertex state for one draw.
///
/// Per-vertex records in `buffers` are numbered from `vertex_base` and per-instance records from
/// `instance_base`: the encoder issues the draw through [`first_vertex`](Self::first_vertex) or
/// [`base_vertex`](Self::base_vertex), and [`first_instance`](Self::first_instance).
#[derive(Debug, Clone, Copy)]
pub struct BoundVertexState<'a> {
    pub elements: &'a [VertexElement],
    /// Fetch size of each element's format, as the device reads it.
    pub element_sizes: &'a [u32],
    pub buffers: &'a [Option<DeviceBinding>],
    pub bounds: DrawBounds,
    pub vertex_base: u32,
    pub instance_base: u32,
}

impl BoundVertexState<'_> {
    /// First vertex for a non-indexed draw.
    pub fn first_vertex(&self, info: &DrawInfo) -> u32 {
        info.start.saturating_sub(self.vertex_base)
    }

    /// Value added to each index of an indexed draw.
    pub fn base_vertex(&self, info: &DrawInfo) -> i64 {
        info.index_bias as i64 - self.vertex_base as i64
    }

    pub fn first_instance(&self, info: &DrawInfo) -> u32 {
        info.start_instance.saturating_sub(self.instance_base)
    }

    /// Most vertices a non-indexed draw can fetch, counted from `vertex_base`, without any
    /// per-vertex attribute reading past its buffer. `u32::MAX` when nothing limits it.
    pub fn max_vertex_count(&self) -> u32 {
        let mut max_count = u32::MAX;
        for (element, &size) in self.elements.iter().zip(self.element_sizes) {
            let Some(Some(buffer)) = self.buffers.get(element.buffer_index as usize) else {
                continue;
            };
            if buffer.stride == 0 || element.instance_divisor != 0 {
                continue;
            }
            let first = buffer.offset + element.offset as u64;
            let available = buffer.resource_size.saturating_sub(first);
            let count = if available < size as u64 {
                0
            } else {
                1 + (available - size as u64) / buffer.stride as u64
            };
            max_count = max_count.min(u32::try_from(count).unwrap_or(u32::MAX));
        }
        max_count
    }
}

/// Receives the device-visible state of each prepared draw.
pub trait DrawEncoder {
    fn encode_draw(&mut self, state: &BoundVertexState<'_>, info: &DrawInfo);
}

impl<F> DrawEncoder for F
where
    F: FnMut(&BoundVertexState<'_>, &DrawInfo),
{
    fn encode_draw(&mut self, state: &BoundVertexState<'_>, info: &DrawInfo) {
        self(state, info)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DrawState {
    elements: Vec<VertexElement>,
    element_sizes: Vec<u32>,
    buffers: Vec<Option<DeviceBinding>>,
    bounds: Option<DrawBounds>,
    vertex_base: u32,
    instance_base: u32,
    regions: Vec<StagingRegion>,
    /// Slots holding translated streams; these are never treated as host buffers.
    translated_slots: Vec<u32>,
}

/// Attribute groups that each get their own translated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttribCategory {
    Vertex,
    Instance,
    Const,
}

impl AttribCategory {
    const ALL: [AttribCategory; 3] = [
        AttribCategory::Vertex,
        AttribCategory::Instance,
        AttribCategory::Const,
    ];

    fn of(element: &VertexElement, stride: u32) -> Self {
        if stride == 0 {
            AttribCategory::Const
        } else if element.instance_divisor != 0 {
            AttribCategory::Instance
        } else {
            AttribCategory::Vertex
        }
    }
}

/// Records of a per-instance stream with `divisor` fetched by `instance_count` instances.
fn instance_records(instance_count: u32, divisor: u32) -> u32 {
    instance_count.div_ceil(divisor.max(1)).max(1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VbufStats {
    pub draws: u64,
    pub translated_draws: u64,
    pub uploaded_draws: u64,
    pub index_scans: u64,
    pub bytes_translated: u64,
    pub bytes_uploaded: u64,
    pub failed_draws: u64,
}

/// Vertex buffer compatibility manager over a staging allocator `A`.
pub struct Vbuf<A: StagingAllocator> {
    config: VbufConfig,
    natives: NativeFormatTable,
    registry: Arc<dyn FormatRegistry + Send + Sync>,
    cache: TranslateCache,
    allocator: A,

    elements: Option<Arc<VertexElements>>,
    buffers: Vec<VertexBufferBinding>,
    /// Per slot: the binding's offset or stride breaks the device's fetch alignment.
    incompatible_vb: Vec<bool>,
    any_incompatible_vb: bool,
    any_host_vb: bool,
    /// Per slot: what the device reads when nothing is translated or uploaded.
    device_buffers: Vec<Option<DeviceBinding>>,
    index_buffer: Option<IndexBufferBinding>,

    stats: VbufStats,
}

impl<A: StagingAllocator> Vbuf<A> {
    /// Manager using the built-in format table.
    pub fn new(device: &dyn DeviceCaps, allocator: A, config: VbufConfig) -> Result<Self> {
        Self::with_registry(device, Arc::new(StandardFormats), allocator, config)
    }

    pub fn with_registry(
        device: &dyn DeviceCaps,
        registry: Arc<dyn FormatRegistry + Send + Sync>,
        allocator: A,
        config: VbufConfig,
    ) -> Result<Self> {
        if config.max_vertex_buffers == 0 || config.max_vertex_buffers > MAX_VERTEX_BUFFERS {
            return Err(VbufError::InvalidConfig(
                "max_vertex_buffers must be in 1..=MAX_VERTEX_BUFFERS",
            ));
        }
        if config.staging_alignment == 0 {
            return Err(VbufError::InvalidConfig("staging_alignment must be > 0"));
        }

        let natives = NativeFormatTable::build(device, registry.as_ref());
        debug!(caps = ?natives.caps(), ?config, "vertex buffer manager created");
        Ok(Self {
            config,
            natives,
            cache: TranslateCache::with_capacity(
                Arc::clone(&registry),
                config.translate_cache_capacity,
            ),
            registry,
            allocator,
            elements: None,
            buffers: Vec::new(),
            incompatible_vb: Vec::new(),
            any_incompatible_vb: false,
            any_host_vb: false,
            device_buffers: Vec::new(),
            index_buffer: None,
            stats: VbufStats::default(),
        })
    }

    pub fn config(&self) -> &VbufConfig {
        &self.config
    }

    pub fn caps(&self) -> VertexFormatCaps {
        self.natives.caps()
    }

    pub fn native_formats(&self) -> &NativeFormatTable {
        &self.natives
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn stats(&self) -> VbufStats {
        self.stats
    }

    pub fn translate_cache_stats(&self) -> TranslateCacheStats {
        self.cache.stats()
    }

    /// Resolve a vertex layout against this device. The result can be bound any number of
    /// times.
    pub fn create_vertex_elements(
        &self,
        elements: &[VertexElement],
    ) -> Result<Arc<VertexElements>> {
        VertexElements::new(
            elements,
            &self.natives,
            self.registry.as_ref(),
            self.config.fetch_alignment,
            self.config.max_vertex_buffers,
        )
        .map(Arc::new)
    }

    pub fn bind_vertex_elements(&mut self, elements: Option<Arc<VertexElements>>) {
        self.elements = elements;
    }

    pub fn vertex_elements(&self) -> Option<&Arc<VertexElements>> {
        self.elements.as_ref()
    }

    /// Replace every vertex buffer binding. Slots past `buffers.len()` become unbound.
    pub fn set_vertex_buffers(&mut self, buffers: &[VertexBufferBinding]) -> Result<()> {
        if buffers.len() > self.config.max_vertex_buffers {
            return Err(VbufError::TooManyVertexBuffers {
                count: buffers.len(),
                max: self.config.max_vertex_buffers,
            });
        }

        let dword = self.config.fetch_alignment == FetchAlignment::DwordAligned;
        self.incompatible_vb.clear();
        self.device_buffers.clear();
        self.any_incompatible_vb = false;
        self.any_host_vb = false;

        for binding in buffers {
            let incompatible = dword
                && binding.resource.is_some()
                && (binding.offset % 4 != 0 || binding.stride % 4 != 0);
            self.incompatible_vb.push(incompatible);
            self.any_incompatible_vb |= incompatible;

            // Misaligned host buffers are read by translation, never uploaded.
            let device = match &binding.resource {
                Some(resource) if resource.is_host() && !incompatible => {
                    self.any_host_vb = true;
                    None
                }
                Some(resource) if !incompatible => Some(DeviceBinding {
                    resource: resource.id(),
                    offset: binding.offset,
                    stride: binding.stride,
                    resource_size: resource.len(),
                }),
                _ => None,
            };
            self.device_buffers.push(device);
        }

        self.buffers = buffers.to_vec();
        Ok(())
    }

    pub fn vertex_buffers(&self) -> &[VertexBufferBinding] {
        &self.buffers
    }

    pub fn set_index_buffer(&mut self, index_buffer: Option<IndexBufferBinding>) -> Result<()> {
        if let Some(binding) = &index_buffer {
            let size = binding.index_size.bytes();
            if binding.offset % size != 0 {
                return Err(VbufError::MisalignedIndexBuffer {
                    offset: binding.offset,
                    index_size: size,
                });
            }
        }
        self.index_buffer = index_buffer;
        Ok(())
    }

    /// Device-visible state when no draw-time work is pending.
    pub fn max_vertex_count(&self) -> u32 {
        let Some(elements) = &self.elements else {
            return u32::MAX;
        };
        let sizes: Vec<u32> = elements.iter().map(|r| r.native_format_size).collect();
        BoundVertexState {
            elements: elements.native_elements(),
            element_sizes: &sizes,
            buffers: &self.device_buffers,
            bounds: DrawBounds::unbounded(1),
            vertex_base: 0,
            instance_base: 0,
        }
        .max_vertex_count()
    }

    /// Prepare, encode and clean up one draw. Draws with nothing to fetch are skipped.
    pub fn draw(&mut self, info: &DrawInfo, encoder: &mut impl DrawEncoder) -> Result<()> {
        let guard = self.draw_begin(info)?;
        if let Some(state) = guard.state() {
            encoder.encode_draw(&state, info);
        }
        Ok(())
    }

    /// Prepare the device-visible state for `info`.
    ///
    /// On error nothing has changed: regions allocated along the way are already released.
    pub fn draw_begin(&mut self, info: &DrawInfo) -> Result<DrawGuard<'_, A>> {
        self.stats.draws += 1;
        let Some(elements) = self.elements.clone() else {
            self.stats.failed_draws += 1;
            return Err(VbufError::MissingVertexElements);
        };

        let mut state = DrawState {
            elements: elements.native_elements().to_vec(),
            element_sizes: elements.iter().map(|r| r.native_format_size).collect(),
            buffers: self.device_buffers.clone(),
            ..DrawState::default()
        };
        state.buffers.resize(self.config.max_vertex_buffers, None);

        if let Err(err) = self.prepare(info, &elements, &mut state) {
            self.stats.failed_draws += 1;
            for region in state.regions.drain(..) {
                self.allocator.release(region);
            }
            warn!(error = %err, "draw preparation failed");
            return Err(err);
        }

        Ok(DrawGuard { vbuf: self, state })
    }

    fn prepare(
        &mut self,
        info: &DrawInfo,
        elements: &VertexElements,
        state: &mut DrawState,
    ) -> Result<()> {
        let translate = self.any_incompatible_vb || elements.any_incompatible();
        state.bounds = self.resolve_bounds(info, elements)?;
        let Some(bounds) = state.bounds else {
            trace!("empty draw");
            return Ok(());
        };

        (state.vertex_base, state.instance_base) = self.record_bases(info, bounds, elements);
        self.rebase_device_buffers(elements, state);

        if translate {
            self.translate_begin(info, bounds, elements, state)?;
            if !state.translated_slots.is_empty() {
                self.stats.translated_draws += 1;
            }
        }
        if self.any_host_vb {
            self.upload_host_buffers(info, bounds, elements, state)?;
        }
        Ok(())
    }

    fn needs_translation(&self, resolved: &ResolvedElement) -> bool {
        resolved.incompatible
            || self
                .incompatible_vb
                .get(resolved.element.buffer_index as usize)
                .copied()
                .unwrap_or(false)
    }

    /// Only per-vertex attributes that get translated or uploaded care about the exact index
    /// range.
    fn needs_index_range(&self, elements: &VertexElements) -> bool {
        elements.iter().any(|resolved| {
            let element = &resolved.element;
            let Some(binding) = self.buffers.get(element.buffer_index as usize) else {
                return false;
            };
            let Some(resource) = &binding.resource else {
                return false;
            };
            element.instance_divisor == 0
                && binding.stride != 0
                && (self.needs_translation(resolved) || resource.is_host())
        })
    }

    /// First per-vertex and per-instance record of the draw's staged streams. Staged data is
    /// written from that record on, wherever the allocator places it.
    ///
    /// Both stay 0 when a slot read in place feeds per-vertex and per-instance elements alike:
    /// its one offset cannot follow two bases.
    fn record_bases(
        &self,
        info: &DrawInfo,
        bounds: DrawBounds,
        elements: &VertexElements,
    ) -> (u32, u32) {
        let (mut staged_vertex, mut staged_instance) = (false, false);
        let mut in_place = vec![(false, false); self.buffers.len()];
        for resolved in elements.iter() {
            let element = &resolved.element;
            let slot = element.buffer_index as usize;
            let Some(binding) = self.buffers.get(slot) else {
                continue;
            };
            let Some(resource) = &binding.resource else {
                continue;
            };
            if binding.stride == 0 {
                continue;
            }

            let per_instance = element.instance_divisor != 0;
            let translated = self.needs_translation(resolved);
            if translated || resource.is_host() {
                if per_instance {
                    staged_instance = true;
                } else {
                    staged_vertex = true;
                }
            }
            if !translated {
                let reads = &mut in_place[slot];
                if per_instance {
                    reads.1 = true;
                } else {
                    reads.0 = true;
                }
            }
        }

        if in_place.iter().any(|&(vertex, instance)| vertex && instance) {
            return (0, 0);
        }
        (
            if staged_vertex { bounds.min_index } else { 0 },
            if staged_instance { info.start_instance } else { 0 },
        )
    }

    /// Move each passthrough device binding forward to its record base.
    fn rebase_device_buffers(&self, elements: &VertexElements, state: &mut DrawState) {
        if state.vertex_base == 0 && state.instance_base == 0 {
            return;
        }
        let mut shifted = vec![false; state.buffers.len()];
        for resolved in elements.iter() {
            if self.needs_translation(resolved) {
                continue;
            }
            let element = &resolved.element;
            let slot = element.buffer_index as usize;
            let base = if element.instance_divisor != 0 {
                state.instance_base
            } else {
                state.vertex_base
            };
            if shifted.get(slot).copied().unwrap_or(true) {
                continue;
            }
            if let Some(Some(binding)) = state.buffers.get_mut(slot) {
                binding.offset += base as u64 * binding.stride as u64;
                shifted[slot] = true;
            }
        }
    }

    /// `None` when the draw fetches no vertices.
    fn resolve_bounds(
        &mut self,
        info: &DrawInfo,
        elements: &VertexElements,
    ) -> Result<Option<DrawBounds>> {
        if info.count == 0 {
            return Ok(None);
        }
        let instance_count = info.instance_count;

        if !info.indexed {
            return Ok(Some(DrawBounds {
                min_index: info.start,
                max_index: info.start.saturating_add(info.count - 1),
                instance_count,
            }));
        }

        let range = if let Some((min, max)) = info.index_bounds {
            IndexRange { min, max }
        } else if self.needs_index_range(elements) {
            let Some(range) = self.scan_indices(info)? else {
                return Ok(None);
            };
            range
        } else {
            return Ok(Some(DrawBounds::unbounded(instance_count)));
        };

        let bias = |index: u32| index.saturating_add_signed(info.index_bias);
        Ok(Some(DrawBounds {
            min_index: bias(range.min),
            max_index: bias(range.max),
            instance_count,
        }))
    }

    fn scan_indices(&mut self, info: &DrawInfo) -> Result<Option<IndexRange>> {
        let index_buffer = self
            .index_buffer
            .as_ref()
            .ok_or(VbufError::MissingIndexBuffer)?;
        let size = index_buffer.index_size.bytes();
        let start = index_buffer.offset + info.start as u64 * size;
        let end = start + info.count as u64 * size;
        let len = index_buffer.resource.len();
        if end > len {
            return Err(VbufError::IndexRangeOutOfBounds { start, end, len });
        }

        self.stats.index_scans += 1;
        let restart = info.primitive_restart.then_some(info.restart_index);
        let range = scan_index_range(
            &index_buffer.resource.bytes()[start as usize..end as usize],
            index_buffer.index_size,
            restart,
        );
        debug!(?range, count = info.count, "scanned index range");
        Ok(range)
    }

    /// The lowest slot that no untranslated element reads and no earlier category took.
    fn find_free_slot(&self, elements: &VertexElements, taken: &[u32]) -> Result<u32> {
        let max = self.config.max_vertex_buffers;
        let mut used = vec![false; max];
        let untranslated = elements
            .iter()
            .filter(|resolved| !self.needs_translation(resolved))
            .map(|resolved| resolved.element.buffer_index);
        for slot in untranslated.chain(taken.iter().copied()) {
            if let Some(used) = used.get_mut(slot as usize) {
                *used = true;
            }
        }

        let first = match self.config.free_slot_policy {
            FreeSlotPolicy::LowestUnused => 0,
            FreeSlotPolicy::AfterBound => self.buffers.len(),
        };
        (first..max)
            .find(|&slot| !used[slot])
            .map(|slot| slot as u32)
            .ok_or(VbufError::NoFreeVertexBufferSlot { max })
    }

    fn translate_begin(
        &mut self,
        info: &DrawInfo,
        bounds: DrawBounds,
        elements: &VertexElements,
        state: &mut DrawState,
    ) -> Result<()> {
        for category in AttribCategory::ALL {
            let mut key = TranslateKey::default();
            let mut members = Vec::new();
            let mut records = 1u32;

            for (index, resolved) in elements.iter().enumerate() {
                if !self.needs_translation(resolved) {
                    continue;
                }
                let element = &resolved.element;
                let Some(binding) = self
                    .buffers
                    .get(element.buffer_index as usize)
                    .filter(|binding| binding.resource.is_some())
                else {
                    return Err(VbufError::MissingVertexBuffer {
                        slot: element.buffer_index,
                    });
                };
                if AttribCategory::of(element, binding.stride) != category {
                    continue;
                }

                if category == AttribCategory::Instance {
                    records = records.max(instance_records(
                        bounds.instance_count,
                        element.instance_divisor,
                    ));
                }
                // Every category is written linearly; the divisor stays on the rebound element.
                key.elements.push(TranslateElement::new(
                    element.buffer_index,
                    element.format,
                    element.offset,
                    resolved.native_format,
                    key.output_stride,
                ));
                key.output_stride += resolved.native_format_size;
                members.push(index);
            }
            if members.is_empty() {
                continue;
            }

            let (start, count, base) = match category {
                AttribCategory::Vertex => {
                    let count = bounds.vertex_count();
                    let count = u32::try_from(count)
                        .map_err(|_| VbufError::DrawRangeTooLarge { records: count })?;
                    (bounds.min_index, count, state.vertex_base)
                }
                AttribCategory::Instance => (info.start_instance, records, state.instance_base),
                AttribCategory::Const => (0, 1, 0),
            };

            let slot = self.find_free_slot(elements, &state.translated_slots)?;
            let binding = self.translate_category(category, &key, start, count, base, state)?;
            state.buffers[slot as usize] = Some(binding);
            debug!(
                ?category,
                slot,
                start,
                count,
                base,
                stride = key.output_stride,
                "translated vertex attributes"
            );

            for (key_element, &index) in key.elements.iter().zip(&members) {
                state.elements[index] = VertexElement {
                    buffer_index: slot,
                    format: key_element.output_format,
                    offset: key_element.output_offset,
                    instance_divisor: state.elements[index].instance_divisor,
                };
            }
            state.translated_slots.push(slot);
        }
        Ok(())
    }

    /// Translate `count` records from `start` into a fresh staging region. Record 0 of the
    /// returned binding stands for record `base`.
    fn translate_category(
        &mut self,
        category: AttribCategory,
        key: &TranslateKey,
        start: u32,
        count: u32,
        base: u32,
        state: &mut DrawState,
    ) -> Result<DeviceBinding> {
        let Self {
            config,
            cache,
            allocator,
            buffers,
            stats,
            ..
        } = self;

        let translator = cache.find(key)?;
        let mut bound = translator.bind();
        for source in translator.source_slots() {
            let binding = buffers
                .get(source as usize)
                .ok_or(VbufError::MissingVertexBuffer { slot: source })?;
            let resource = binding
                .resource
                .as_ref()
                .ok_or(VbufError::MissingVertexBuffer { slot: source })?;
            let data = resource
                .bytes()
                .get(binding.offset as usize..)
                .unwrap_or_default();
            bound.set_buffer(source, data, binding.stride, u32::MAX)?;
        }

        let stride = key.output_stride as u64;
        let size = stride * count as u64;
        let min_offset = stride * start.saturating_sub(base) as u64;
        let allocation = allocator.allocate(
            StagingRequest::new(size, config.staging_alignment).with_min_offset(min_offset),
        )?;
        let region = allocation.region;
        state.regions.push(region);
        bound.run(start, count, 0, allocation.data)?;

        stats.bytes_translated += size;
        Ok(DeviceBinding {
            resource: region.resource,
            offset: region.offset - min_offset,
            stride: if category == AttribCategory::Const {
                0
            } else {
                key.output_stride
            },
            resource_size: region.resource_size,
        })
    }

    /// Upload the byte range of each host buffer the draw reads.
    fn upload_host_buffers(
        &mut self,
        info: &DrawInfo,
        bounds: DrawBounds,
        elements: &VertexElements,
        state: &mut DrawState,
    ) -> Result<()> {
        let mut ranges: Vec<Option<(u64, u64)>> = vec![None; self.buffers.len()];
        // Where the binding's record 0 sits in the host buffer.
        let mut origins = vec![0u64; self.buffers.len()];

        for (index, element) in state.elements.iter().enumerate() {
            let slot = element.buffer_index;
            if state.translated_slots.contains(&slot) {
                continue;
            }
            let binding = self
                .buffers
                .get(slot as usize)
                .ok_or(VbufError::MissingVertexBuffer { slot })?;
            let resource = binding
                .resource
                .as_ref()
                .ok_or(VbufError::MissingVertexBuffer { slot })?;
            if !resource.is_host() {
                continue;
            }

            let src_size = elements
                .get(index)
                .map_or(0, |resolved| resolved.src_format_size) as u64;
            let stride = binding.stride as u64;
            let mut first = binding.offset + element.offset as u64;
            let (size, base) = if stride == 0 {
                (src_size, 0)
            } else if element.instance_divisor != 0 {
                let records = instance_records(bounds.instance_count, element.instance_divisor);
                first += stride * info.start_instance as u64;
                (stride * (records as u64 - 1) + src_size, state.instance_base)
            } else {
                first += stride * bounds.min_index as u64;
                let size = stride * (bounds.vertex_count().max(1) - 1) + src_size;
                (size, state.vertex_base)
            };
            origins[slot as usize] = binding.offset + stride * base as u64;

            let range = &mut ranges[slot as usize];
            *range = Some(match *range {
                None => (first, first + size),
                Some((start, end)) => (start.min(first), end.max(first + size)),
            });
        }

        let Self {
            config,
            allocator,
            buffers,
            stats,
            ..
        } = self;

        for (slot, range) in ranges.into_iter().enumerate() {
            let Some((start, end)) = range else {
                continue;
            };
            let binding = &buffers[slot];
            let Some(resource) = &binding.resource else {
                continue;
            };
            if end > resource.len() {
                return Err(VbufError::VertexRangeOutOfBounds {
                    slot: slot as u32,
                    start,
                    end,
                    len: resource.len(),
                });
            }

            let min_offset = start.saturating_sub(origins[slot]);
            let allocation = allocator.allocate(
                StagingRequest::new(end - start, config.staging_alignment)
                    .with_min_offset(min_offset),
            )?;
            let region = allocation.region;
            state.regions.push(region);
            allocation
                .data
                .copy_from_slice(&resource.bytes()[start as usize..end as usize]);

            stats.bytes_uploaded += end - start;
            state.buffers[slot] = Some(DeviceBinding {
                resource: region.resource,
                offset: region.offset - min_offset,
                stride: binding.stride,
                resource_size: region.resource_size,
            });
            debug!(slot, start, end, min_offset, "uploaded host vertex buffer range");
        }
        stats.uploaded_draws += 1;
        Ok(())
    }
}

/// Prepared draw state. Dropping it releases the staging regions the draw allocated.
pub struct DrawGuard<'a, A: StagingAllocator> {
    vbuf: &'a mut Vbuf<A>,
    state: DrawState,
}

impl<A: StagingAllocator> DrawGuard<'_, A> {
    /// `None` when the draw fetches nothing and should not be encoded.
    pub fn state(&self) -> Option<BoundVertexState<'_>> {
        let bounds = self.state.bounds?;
        Some(BoundVertexState {
            elements: &self.state.elements,
            element_sizes: &self.state.element_sizes,
            buffers: &self.state.buffers,
            bounds,
            vertex_base: self.state.vertex_base,
            instance_base: self.state.instance_base,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.state.bounds.is_none()
    }

    /// Slots that received translated attribute streams for this draw.
    pub fn translated_slots(&self) -> &[u32] {
        &self.state.translated_slots
    }

    pub fn staging_regions(&self) -> &[StagingRegion] {
        &self.state.regions
    }
}

impl<A: StagingAllocator> Drop for DrawGuard<'_, A> {
    fn drop(&mut self) {
        for region in self.state.regions.drain(..) {
            self.vbuf.allocator.release(region);
        }
    }
}
