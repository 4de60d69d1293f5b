use std::sync::Arc;

/// Opaque identifier of a device-visible buffer (a bound vertex buffer or a staging resource).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

/// Bytes backing a vertex or index buffer binding.
///
/// Device buffers are handed to the encoder as-is. Host buffers ("user buffers") live in
/// application memory that the device cannot read, so any range a draw touches is uploaded into
/// staging first. Both kinds are readable here so they can be used as translation sources.
#[derive(Debug)]
pub struct BufferResource {
    id: ResourceId,
    data: Vec<u8>,
    host: bool,
}

impl BufferResource {
    pub fn device(id: ResourceId, data: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            data: data.into(),
            host: false,
        })
    }

    pub fn host(id: ResourceId, data: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            data: data.into(),
            host: true,
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_host(&self) -> bool {
        self.host
    }
}
