use thiserror::Error;

use crate::format::Format;
use crate::staging::StagingError;
use crate::translate::TranslateError;

pub type Result<T> = std::result::Result<T, VbufError>;

/// Errors from binding vertex state or preparing a draw.
///
/// A draw that fails leaves the bound state as it was, and every staging region it had already
/// allocated has been released.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VbufError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("{count} vertex elements bound (max {max})")]
    TooManyVertexElements { count: usize, max: usize },

    #[error("{count} vertex buffers bound (max {max})")]
    TooManyVertexBuffers { count: usize, max: usize },

    #[error("vertex element {element}: unknown format {format}")]
    UnknownFormat { element: usize, format: Format },

    #[error("vertex element {element} reads vertex buffer {index} (max {max})")]
    VertexBufferIndexOutOfRange {
        element: usize,
        index: u32,
        max: usize,
    },

    #[error("draw issued without vertex elements")]
    MissingVertexElements,

    #[error("vertex buffer {slot} is not bound")]
    MissingVertexBuffer { slot: u32 },

    #[error("indexed draw issued without an index buffer")]
    MissingIndexBuffer,

    #[error("index buffer offset {offset} is not a multiple of the {index_size}-byte index size")]
    MisalignedIndexBuffer { offset: u64, index_size: u64 },

    #[error("index range {start}..{end} exceeds the {len}-byte index buffer")]
    IndexRangeOutOfBounds { start: u64, end: u64, len: u64 },

    #[error("vertex buffer {slot}: range {start}..{end} exceeds the {len}-byte buffer")]
    VertexRangeOutOfBounds {
        slot: u32,
        start: u64,
        end: u64,
        len: u64,
    },

    #[error("no free vertex buffer slot for translated attributes ({max} slots)")]
    NoFreeVertexBufferSlot { max: usize },

    #[error("draw spans {records} records, more than one translation pass can address")]
    DrawRangeTooLarge { records: u64 },
}

impl VbufError {
    /// Staging ran out of room. The caller can flush or wait for in-flight work, reset its
    /// staging memory and retry the draw.
    ///
    /// Requests no empty allocator could hold (`TooLarge`, `BeyondResource`) are not
    /// exhaustion: retrying them fails the same way.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, VbufError::Staging(StagingError::OutOfSpace { .. }))
    }
}
