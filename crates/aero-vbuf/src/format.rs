//! Vertex attribute formats and the registry that describes their channel layouts.
//!
//! A [`Format`] is an opaque identifier; everything the translation engine needs to know about it
//! (channel count, per-channel encoding and width, lane order) comes from a [`FormatRegistry`].
//! [`StandardFormats`] is the built-in registry covering every [`Format`] variant.

use std::fmt;

use crate::convert::Fetcher;

/// Numeric encoding of one stored channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// Padding bits; never read into a lane and never written.
    Void,
    Unorm,
    Snorm,
    Uscaled,
    Sscaled,
    Uint,
    Sint,
    /// Signed 16.16 fixed point.
    Fixed,
    Float,
}

impl ChannelType {
    pub fn is_normalized(self) -> bool {
        matches!(self, ChannelType::Unorm | ChannelType::Snorm)
    }
}

/// One stored channel inside a format block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Channel {
    pub ty: ChannelType,
    pub bits: u8,
    /// Bit offset of the channel from the start of the (little-endian) block.
    pub shift: u16,
}

const UNUSED_CHANNEL: Channel = Channel {
    ty: ChannelType::Void,
    bits: 0,
    shift: 0,
};

/// Source of one fetched lane: a stored channel (`X` = channel 0 ... `W` = channel 3) or a
/// constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Swizzle {
    X,
    Y,
    Z,
    W,
    Zero,
    One,
}

impl Swizzle {
    /// Stored channel index this swizzle selects, if any.
    pub fn channel(self) -> Option<usize> {
        match self {
            Swizzle::X => Some(0),
            Swizzle::Y => Some(1),
            Swizzle::Z => Some(2),
            Swizzle::W => Some(3),
            Swizzle::Zero | Swizzle::One => None,
        }
    }

    fn from_channel(channel: usize) -> Self {
        match channel {
            0 => Swizzle::X,
            1 => Swizzle::Y,
            2 => Swizzle::Z,
            _ => Swizzle::W,
        }
    }
}

/// Channel layout of a format.
///
/// `swizzle[lane]` says where fetched lane `lane` (x, y, z, w) comes from. Emitting applies the
/// inverse mapping, so reordered packings such as `A8R8G8B8` round-trip through the same table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FormatDesc {
    nr_channels: u8,
    channels: [Channel; 4],
    swizzle: [Swizzle; 4],
    block_bits: u16,
}

impl FormatDesc {
    /// `count` channels of one type and width, stored in lane order.
    pub fn uniform(ty: ChannelType, count: u8, bits: u8) -> Self {
        debug_assert!((1..=4).contains(&count));
        let mut channels = [UNUSED_CHANNEL; 4];
        let mut swizzle = [Swizzle::Zero, Swizzle::Zero, Swizzle::Zero, Swizzle::One];
        for i in 0..count as usize {
            channels[i] = Channel {
                ty,
                bits,
                shift: i as u16 * bits as u16,
            };
            swizzle[i] = Swizzle::from_channel(i);
        }
        Self {
            nr_channels: count,
            channels,
            swizzle,
            block_bits: count as u16 * bits as u16,
        }
    }

    /// Four channels of one type with individual widths, packed from the low bit up.
    pub fn packed(ty: ChannelType, bits: [u8; 4]) -> Self {
        let mut channels = [UNUSED_CHANNEL; 4];
        let mut shift = 0u16;
        for (channel, &width) in channels.iter_mut().zip(bits.iter()) {
            *channel = Channel {
                ty,
                bits: width,
                shift,
            };
            shift += width as u16;
        }
        Self {
            nr_channels: 4,
            channels,
            swizzle: [Swizzle::X, Swizzle::Y, Swizzle::Z, Swizzle::W],
            block_bits: shift,
        }
    }

    pub fn with_swizzle(mut self, swizzle: [Swizzle; 4]) -> Self {
        self.swizzle = swizzle;
        self
    }

    /// Marks stored channel `channel` as padding. Lanes that read it fall back to `One`.
    pub fn with_void(mut self, channel: usize) -> Self {
        self.channels[channel].ty = ChannelType::Void;
        for lane in &mut self.swizzle {
            if lane.channel() == Some(channel) {
                *lane = Swizzle::One;
            }
        }
        self
    }

    pub fn nr_channels(&self) -> usize {
        self.nr_channels as usize
    }

    /// Stored channels, in storage order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels[..self.nr_channels as usize]
    }

    pub fn swizzle(&self) -> [Swizzle; 4] {
        self.swizzle
    }

    /// Size of one block (one attribute value) in bytes.
    pub fn block_size(&self) -> u32 {
        (self.block_bits as u32).div_ceil(8)
    }

    /// Encoding of the first non-padding channel.
    pub fn leading_channel(&self) -> Option<Channel> {
        self.channels()
            .iter()
            .copied()
            .find(|c| c.ty != ChannelType::Void)
    }

    /// True if every stored channel shares one type and width (no padding, no packing).
    pub fn is_uniform(&self) -> bool {
        let Some(first) = self.channels().first() else {
            return false;
        };
        first.ty != ChannelType::Void
            && self
                .channels()
                .iter()
                .all(|c| c.ty == first.ty && c.bits == first.bits)
    }

    pub fn is_normalized(&self) -> bool {
        self.channels().iter().any(|c| c.ty.is_normalized())
    }
}

macro_rules! vertex_formats {
    ($($name:ident => $desc:expr,)+) => {
        /// Vertex attribute formats understood by the translation engine.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Format {
            /// No data. Only meaningful as an omitted output.
            None,
            $($name,)+
        }

        impl Format {
            /// Every concrete format (excludes [`Format::None`]).
            pub const ALL: &'static [Format] = &[$(Format::$name,)+];
        }

        fn standard_desc(format: Format) -> Option<FormatDesc> {
            use ChannelType::*;
            match format {
                Format::None => Option::None,
                $(Format::$name => Some($desc),)+
            }
        }
    };
}

vertex_formats! {
    R16Float => FormatDesc::uniform(Float, 1, 16),
    R16G16Float => FormatDesc::uniform(Float, 2, 16),
    R16G16B16Float => FormatDesc::uniform(Float, 3, 16),
    R16G16B16A16Float => FormatDesc::uniform(Float, 4, 16),
    R32Float => FormatDesc::uniform(Float, 1, 32),
    R32G32Float => FormatDesc::uniform(Float, 2, 32),
    R32G32B32Float => FormatDesc::uniform(Float, 3, 32),
    R32G32B32A32Float => FormatDesc::uniform(Float, 4, 32),
    R64Float => FormatDesc::uniform(Float, 1, 64),
    R64G64Float => FormatDesc::uniform(Float, 2, 64),
    R64G64B64Float => FormatDesc::uniform(Float, 3, 64),
    R64G64B64A64Float => FormatDesc::uniform(Float, 4, 64),

    R32Fixed => FormatDesc::uniform(Fixed, 1, 32),
    R32G32Fixed => FormatDesc::uniform(Fixed, 2, 32),
    R32G32B32Fixed => FormatDesc::uniform(Fixed, 3, 32),
    R32G32B32A32Fixed => FormatDesc::uniform(Fixed, 4, 32),

    R8Unorm => FormatDesc::uniform(Unorm, 1, 8),
    R8G8Unorm => FormatDesc::uniform(Unorm, 2, 8),
    R8G8B8Unorm => FormatDesc::uniform(Unorm, 3, 8),
    R8G8B8A8Unorm => FormatDesc::uniform(Unorm, 4, 8),
    R8Snorm => FormatDesc::uniform(Snorm, 1, 8),
    R8G8Snorm => FormatDesc::uniform(Snorm, 2, 8),
    R8G8B8Snorm => FormatDesc::uniform(Snorm, 3, 8),
    R8G8B8A8Snorm => FormatDesc::uniform(Snorm, 4, 8),
    R8Uscaled => FormatDesc::uniform(Uscaled, 1, 8),
    R8G8Uscaled => FormatDesc::uniform(Uscaled, 2, 8),
    R8G8B8Uscaled => FormatDesc::uniform(Uscaled, 3, 8),
    R8G8B8A8Uscaled => FormatDesc::uniform(Uscaled, 4, 8),
    R8Sscaled => FormatDesc::uniform(Sscaled, 1, 8),
    R8G8Sscaled => FormatDesc::uniform(Sscaled, 2, 8),
    R8G8B8Sscaled => FormatDesc::uniform(Sscaled, 3, 8),
    R8G8B8A8Sscaled => FormatDesc::uniform(Sscaled, 4, 8),
    R8Uint => FormatDesc::uniform(Uint, 1, 8),
    R8G8Uint => FormatDesc::uniform(Uint, 2, 8),
    R8G8B8Uint => FormatDesc::uniform(Uint, 3, 8),
    R8G8B8A8Uint => FormatDesc::uniform(Uint, 4, 8),
    R8Sint => FormatDesc::uniform(Sint, 1, 8),
    R8G8Sint => FormatDesc::uniform(Sint, 2, 8),
    R8G8B8Sint => FormatDesc::uniform(Sint, 3, 8),
    R8G8B8A8Sint => FormatDesc::uniform(Sint, 4, 8),

    R16Unorm => FormatDesc::uniform(Unorm, 1, 16),
    R16G16Unorm => FormatDesc::uniform(Unorm, 2, 16),
    R16G16B16Unorm => FormatDesc::uniform(Unorm, 3, 16),
    R16G16B16A16Unorm => FormatDesc::uniform(Unorm, 4, 16),
    R16Snorm => FormatDesc::uniform(Snorm, 1, 16),
    R16G16Snorm => FormatDesc::uniform(Snorm, 2, 16),
    R16G16B16Snorm => FormatDesc::uniform(Snorm, 3, 16),
    R16G16B16A16Snorm => FormatDesc::uniform(Snorm, 4, 16),
    R16Uscaled => FormatDesc::uniform(Uscaled, 1, 16),
    R16G16Uscaled => FormatDesc::uniform(Uscaled, 2, 16),
    R16G16B16Uscaled => FormatDesc::uniform(Uscaled, 3, 16),
    R16G16B16A16Uscaled => FormatDesc::uniform(Uscaled, 4, 16),
    R16Sscaled => FormatDesc::uniform(Sscaled, 1, 16),
    R16G16Sscaled => FormatDesc::uniform(Sscaled, 2, 16),
    R16G16B16Sscaled => FormatDesc::uniform(Sscaled, 3, 16),
    R16G16B16A16Sscaled => FormatDesc::uniform(Sscaled, 4, 16),
    R16Uint => FormatDesc::uniform(Uint, 1, 16),
    R16G16Uint => FormatDesc::uniform(Uint, 2, 16),
    R16G16B16Uint => FormatDesc::uniform(Uint, 3, 16),
    R16G16B16A16Uint => FormatDesc::uniform(Uint, 4, 16),
    R16Sint => FormatDesc::uniform(Sint, 1, 16),
    R16G16Sint => FormatDesc::uniform(Sint, 2, 16),
    R16G16B16Sint => FormatDesc::uniform(Sint, 3, 16),
    R16G16B16A16Sint => FormatDesc::uniform(Sint, 4, 16),

    R32Unorm => FormatDesc::uniform(Unorm, 1, 32),
    R32G32Unorm => FormatDesc::uniform(Unorm, 2, 32),
    R32G32B32Unorm => FormatDesc::uniform(Unorm, 3, 32),
    R32G32B32A32Unorm => FormatDesc::uniform(Unorm, 4, 32),
    R32Snorm => FormatDesc::uniform(Snorm, 1, 32),
    R32G32Snorm => FormatDesc::uniform(Snorm, 2, 32),
    R32G32B32Snorm => FormatDesc::uniform(Snorm, 3, 32),
    R32G32B32A32Snorm => FormatDesc::uniform(Snorm, 4, 32),
    R32Uscaled => FormatDesc::uniform(Uscaled, 1, 32),
    R32G32Uscaled => FormatDesc::uniform(Uscaled, 2, 32),
    R32G32B32Uscaled => FormatDesc::uniform(Uscaled, 3, 32),
    R32G32B32A32Uscaled => FormatDesc::uniform(Uscaled, 4, 32),
    R32Sscaled => FormatDesc::uniform(Sscaled, 1, 32),
    R32G32Sscaled => FormatDesc::uniform(Sscaled, 2, 32),
    R32G32B32Sscaled => FormatDesc::uniform(Sscaled, 3, 32),
    R32G32B32A32Sscaled => FormatDesc::uniform(Sscaled, 4, 32),
    R32Uint => FormatDesc::uniform(Uint, 1, 32),
    R32G32Uint => FormatDesc::uniform(Uint, 2, 32),
    R32G32B32Uint => FormatDesc::uniform(Uint, 3, 32),
    R32G32B32A32Uint => FormatDesc::uniform(Uint, 4, 32),
    R32Sint => FormatDesc::uniform(Sint, 1, 32),
    R32G32Sint => FormatDesc::uniform(Sint, 2, 32),
    R32G32B32Sint => FormatDesc::uniform(Sint, 3, 32),
    R32G32B32A32Sint => FormatDesc::uniform(Sint, 4, 32),

    // Reordered 8-bit packings: storage order differs from lane order.
    B8G8R8A8Unorm => FormatDesc::uniform(Unorm, 4, 8)
        .with_swizzle([Swizzle::Z, Swizzle::Y, Swizzle::X, Swizzle::W]),
    A8R8G8B8Unorm => FormatDesc::uniform(Unorm, 4, 8)
        .with_swizzle([Swizzle::Y, Swizzle::Z, Swizzle::W, Swizzle::X]),
    R8G8B8X8Unorm => FormatDesc::uniform(Unorm, 4, 8).with_void(3),

    R10G10B10A2Unorm => FormatDesc::packed(Unorm, [10, 10, 10, 2]),
    R10G10B10A2Snorm => FormatDesc::packed(Snorm, [10, 10, 10, 2]),
    R10G10B10A2Uscaled => FormatDesc::packed(Uscaled, [10, 10, 10, 2]),
    R10G10B10A2Sscaled => FormatDesc::packed(Sscaled, [10, 10, 10, 2]),
    B10G10R10A2Unorm => FormatDesc::packed(Unorm, [10, 10, 10, 2])
        .with_swizzle([Swizzle::Z, Swizzle::Y, Swizzle::X, Swizzle::W]),
}

impl Format {
    /// The 32-bit float format with `channels` lanes (clamped to 1..=4).
    pub fn float32(channels: usize) -> Format {
        match channels {
            0 | 1 => Format::R32Float,
            2 => Format::R32G32Float,
            3 => Format::R32G32B32Float,
            _ => Format::R32G32B32A32Float,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Source of format layouts and fetch routines.
///
/// The translator resolves everything it needs from the registry once, at construction time;
/// nothing here is consulted per vertex.
pub trait FormatRegistry {
    fn describe(&self, format: Format) -> Option<FormatDesc>;

    /// Resolve the routine that decodes one `format` block into four float lanes.
    fn fetcher(&self, format: Format) -> Option<Fetcher> {
        self.describe(format).and_then(|desc| Fetcher::new(&desc))
    }

    fn fetch(&self, format: Format, src: &[u8]) -> Option<[f32; 4]> {
        self.fetcher(format).map(|fetcher| fetcher.fetch(src))
    }
}

/// Registry backed by the built-in format table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StandardFormats;

impl FormatRegistry for StandardFormats {
    fn describe(&self, format: Format) -> Option<FormatDesc> {
        standard_desc(format)
    }
}
