//! Vertex element layouts and their per-device resolution.

use tracing::debug;

use crate::buffer_arena::align_up;
use crate::caps::NativeFormatTable;
use crate::config::{FetchAlignment, MAX_VERTEX_ATTRIBS};
use crate::error::{Result, VbufError};
use crate::format::{Format, FormatRegistry};

/// One vertex attribute as the application describes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub buffer_index: u32,
    pub format: Format,
    /// Byte offset inside each vertex record.
    pub offset: u32,
    /// `0` advances per vertex; `n` advances once every `n` instances.
    pub instance_divisor: u32,
}

impl VertexElement {
    pub fn new(buffer_index: u32, format: Format, offset: u32) -> Self {
        Self {
            buffer_index,
            format,
            offset,
            instance_divisor: 0,
        }
    }

    pub fn with_instance_divisor(mut self, divisor: u32) -> Self {
        self.instance_divisor = divisor;
        self
    }
}

/// A [`VertexElement`] with everything the draw path needs precomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedElement {
    pub element: VertexElement,
    pub src_format_size: u32,
    /// What the device fetches: the source format, or its replacement.
    pub native_format: Format,
    /// Size of the native format, padded to 4 bytes under [`FetchAlignment::DwordAligned`].
    pub native_format_size: u32,
    /// The device cannot fetch this element as laid out.
    pub incompatible: bool,
}

/// A bound vertex layout, resolved against device capabilities once at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexElements {
    resolved: Vec<ResolvedElement>,
    native: Vec<VertexElement>,
    any_incompatible: bool,
}

impl VertexElements {
    pub(crate) fn new(
        elements: &[VertexElement],
        natives: &NativeFormatTable,
        registry: &dyn FormatRegistry,
        alignment: FetchAlignment,
        max_vertex_buffers: usize,
    ) -> Result<Self> {
        if elements.len() > MAX_VERTEX_ATTRIBS {
            return Err(VbufError::TooManyVertexElements {
                count: elements.len(),
                max: MAX_VERTEX_ATTRIBS,
            });
        }

        let dword = alignment == FetchAlignment::DwordAligned;
        let mut resolved = Vec::with_capacity(elements.len());

        for (index, element) in elements.iter().enumerate() {
            if element.buffer_index as usize >= max_vertex_buffers {
                return Err(VbufError::VertexBufferIndexOutOfRange {
                    element: index,
                    index: element.buffer_index,
                    max: max_vertex_buffers,
                });
            }
            let unknown = VbufError::UnknownFormat {
                element: index,
                format: element.format,
            };
            let src = registry.describe(element.format).ok_or(unknown.clone())?;

            let native_format = natives.native(element.format);
            let native = registry.describe(native_format).ok_or(unknown)?;

            let mut native_format_size = native.block_size();
            let mut incompatible = native_format != element.format;
            if dword {
                native_format_size = align_up(native_format_size as u64, 4) as u32;
                incompatible |= element.offset % 4 != 0;
            }
            if incompatible {
                debug!(
                    element = index,
                    format = %element.format,
                    native = %native_format,
                    "vertex element needs translation"
                );
            }

            resolved.push(ResolvedElement {
                element: *element,
                src_format_size: src.block_size(),
                native_format,
                native_format_size,
                incompatible,
            });
        }

        let native = resolved
            .iter()
            .map(|r| VertexElement {
                format: r.native_format,
                ..r.element
            })
            .collect();
        let any_incompatible = resolved.iter().any(|r| r.incompatible);

        Ok(Self {
            resolved,
            native,
            any_incompatible,
        })
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResolvedElement> {
        self.resolved.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedElement> + '_ {
        self.resolved.iter()
    }

    /// Elements as the device sees them when nothing needs translating.
    pub fn native_elements(&self) -> &[VertexElement] {
        &self.native
    }

    pub fn any_incompatible(&self) -> bool {
        self.any_incompatible
    }
}
