//! Index buffer scanning for the vertex range an indexed draw touches.

/// Width of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexSize {
    U8,
    U16,
    U32,
}

impl IndexSize {
    pub fn bytes(self) -> u64 {
        match self {
            IndexSize::U8 => 1,
            IndexSize::U16 => 2,
            IndexSize::U32 => 4,
        }
    }

    pub fn from_bytes(bytes: u64) -> Option<Self> {
        match bytes {
            1 => Some(IndexSize::U8),
            2 => Some(IndexSize::U16),
            4 => Some(IndexSize::U32),
            _ => None,
        }
    }
}

/// Inclusive range of referenced vertex indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub min: u32,
    pub max: u32,
}

/// Smallest and largest index in `indices` (little-endian, `size` wide), skipping `restart`.
///
/// `None` when there is nothing to draw: no indices, or only restart indices. Trailing bytes
/// that do not form a whole index are ignored.
pub fn scan_index_range(
    indices: &[u8],
    size: IndexSize,
    restart: Option<u32>,
) -> Option<IndexRange> {
    match size {
        IndexSize::U8 => fold_range(indices.iter().map(|&i| i as u32), restart),
        IndexSize::U16 => fold_range(
            indices
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32),
            restart,
        ),
        IndexSize::U32 => fold_range(
            indices
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            restart,
        ),
    }
}

fn fold_range(indices: impl Iterator<Item = u32>, restart: Option<u32>) -> Option<IndexRange> {
    indices
        .filter(|&index| Some(index) != restart)
        .fold(None, |range, index| {
            Some(match range {
                None => IndexRange {
                    min: index,
                    max: index,
                },
                Some(IndexRange { min, max }) => IndexRange {
                    min: min.min(index),
                    max: max.max(index),
                },
            })
        })
}
