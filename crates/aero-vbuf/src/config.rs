use std::num::NonZeroUsize;

/// Upper bound on bound vertex elements.
pub const MAX_VERTEX_ATTRIBS: usize = 32;
/// Upper bound on vertex buffer slots, including slots used for translated data.
pub const MAX_VERTEX_BUFFERS: usize = 32;

/// Alignment the device requires of vertex fetch addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchAlignment {
    #[default]
    ByteAligned,
    /// Element offsets, buffer offsets and strides must be multiples of 4. Anything else is
    /// translated, and translated outputs are padded to 4 bytes.
    DwordAligned,
}

/// Where translated attribute streams are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreeSlotPolicy {
    /// The lowest slot no untranslated element reads.
    #[default]
    LowestUnused,
    /// The lowest such slot past every bound vertex buffer.
    AfterBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbufConfig {
    pub fetch_alignment: FetchAlignment,
    pub free_slot_policy: FreeSlotPolicy,
    /// Vertex buffer slots the device exposes (at most [`MAX_VERTEX_BUFFERS`]).
    pub max_vertex_buffers: usize,
    /// Alignment of every staging allocation.
    pub staging_alignment: u64,
    /// `None` keeps every translator ever built.
    pub translate_cache_capacity: Option<NonZeroUsize>,
}

impl Default for VbufConfig {
    fn default() -> Self {
        Self {
            fetch_alignment: FetchAlignment::default(),
            free_slot_policy: FreeSlotPolicy::default(),
            max_vertex_buffers: MAX_VERTEX_BUFFERS,
            staging_alignment: 4,
            translate_cache_capacity: None,
        }
    }
}
