//! Device vertex-fetch capabilities and native format selection.

use bitflags::bitflags;
use hashbrown::HashMap;
use tracing::debug;

use crate::format::{ChannelType, Format, FormatRegistry};

/// Answers whether the device can fetch a format natively.
pub trait DeviceCaps {
    fn is_vertex_format_supported(&self, format: Format) -> bool;
}

bitflags! {
    /// Format families the device fetches natively.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct VertexFormatCaps: u32 {
        const FIXED32 = 1 << 0;
        const FLOAT16 = 1 << 1;
        const FLOAT64 = 1 << 2;
        /// 32-bit unorm and snorm.
        const NORM32 = 1 << 3;
        /// 32-bit uscaled and sscaled.
        const SCALED32 = 1 << 4;
        const RGBA8_UNORM = 1 << 5;
        const BGRA8_UNORM = 1 << 6;
    }
}

impl VertexFormatCaps {
    /// Query one representative format per family.
    pub fn query(device: &dyn DeviceCaps) -> Self {
        let mut caps = Self::empty();
        caps.set(
            Self::FIXED32,
            device.is_vertex_format_supported(Format::R32Fixed),
        );
        caps.set(
            Self::FLOAT16,
            device.is_vertex_format_supported(Format::R16G16Float),
        );
        caps.set(
            Self::FLOAT64,
            device.is_vertex_format_supported(Format::R64Float),
        );
        caps.set(
            Self::NORM32,
            device.is_vertex_format_supported(Format::R32Unorm)
                && device.is_vertex_format_supported(Format::R32Snorm),
        );
        caps.set(
            Self::SCALED32,
            device.is_vertex_format_supported(Format::R32Uscaled)
                && device.is_vertex_format_supported(Format::R32Sscaled),
        );
        caps.set(
            Self::RGBA8_UNORM,
            device.is_vertex_format_supported(Format::R8G8B8A8Unorm),
        );
        caps.set(
            Self::BGRA8_UNORM,
            device.is_vertex_format_supported(Format::B8G8R8A8Unorm),
        );
        caps
    }

    /// The format the device should fetch in place of `format`.
    ///
    /// Unsupported families are widened to 32-bit float with the same lane count; 8-bit color
    /// packings fall back to another 8-bit packing. Formats outside the queried families are
    /// assumed native.
    pub fn native_format(self, format: Format, registry: &dyn FormatRegistry) -> Format {
        match format {
            Format::R8G8B8A8Unorm if !self.contains(Self::RGBA8_UNORM) => {
                return Format::A8R8G8B8Unorm;
            }
            Format::B8G8R8A8Unorm if !self.contains(Self::BGRA8_UNORM) => {
                return if self.contains(Self::RGBA8_UNORM) {
                    Format::R8G8B8A8Unorm
                } else {
                    Format::A8R8G8B8Unorm
                };
            }
            _ => {}
        }

        let Some(desc) = registry.describe(format) else {
            return format;
        };
        if !desc.is_uniform() {
            return format;
        }
        let Some(channel) = desc.leading_channel() else {
            return format;
        };

        let missing = match (channel.ty, channel.bits) {
            (ChannelType::Fixed, 32) => !self.contains(Self::FIXED32),
            (ChannelType::Float, 16) => !self.contains(Self::FLOAT16),
            (ChannelType::Float, 64) => !self.contains(Self::FLOAT64),
            (ChannelType::Unorm | ChannelType::Snorm, 32) => !self.contains(Self::NORM32),
            (ChannelType::Uscaled | ChannelType::Sscaled, 32) => !self.contains(Self::SCALED32),
            _ => false,
        };
        if missing {
            Format::float32(desc.nr_channels())
        } else {
            format
        }
    }
}

/// The format the device fetches in place of each [`Format`], resolved once per device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFormatTable {
    caps: VertexFormatCaps,
    replacements: HashMap<Format, Format>,
}

impl NativeFormatTable {
    /// Formats the device fetches directly map to themselves. Anything else takes the family
    /// replacement from [`VertexFormatCaps::native_format`] if the device fetches that, and
    /// 32-bit float with the same lane count otherwise.
    pub fn build(device: &dyn DeviceCaps, registry: &dyn FormatRegistry) -> Self {
        let caps = VertexFormatCaps::query(device);
        let mut replacements = HashMap::new();

        for &format in Format::ALL {
            if device.is_vertex_format_supported(format) {
                continue;
            }
            let Some(desc) = registry.describe(format) else {
                continue;
            };
            let family = caps.native_format(format, registry);
            let native = if family != format && device.is_vertex_format_supported(family) {
                family
            } else {
                Format::float32(desc.nr_channels())
            };
            if native != format {
                replacements.insert(format, native);
            }
        }

        debug!(
            ?caps,
            replaced = replacements.len(),
            "resolved native vertex formats"
        );
        Self { caps, replacements }
    }

    pub fn caps(&self) -> VertexFormatCaps {
        self.caps
    }

    pub fn native(&self, format: Format) -> Format {
        self.replacements.get(&format).copied().unwrap_or(format)
    }
}

impl DeviceCaps for VertexFormatCaps {
    /// A format is supported when no replacement would be chosen for it.
    fn is_vertex_format_supported(&self, format: Format) -> bool {
        self.native_format(format, &crate::format::StandardFormats) == format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::StandardFormats;
    use pretty_assertions::assert_eq;

    struct OnlyFloat32;

    impl DeviceCaps for OnlyFloat32 {
        fn is_vertex_format_supported(&self, format: Format) -> bool {
            matches!(
                format,
                Format::R32Float
                    | Format::R32G32Float
                    | Format::R32G32B32Float
                    | Format::R32G32B32A32Float
            )
        }
    }

    #[test]
    fn query_checks_each_family() {
        assert_eq!(
            VertexFormatCaps::query(&OnlyFloat32),
            VertexFormatCaps::empty()
        );
        assert_eq!(
            VertexFormatCaps::query(&VertexFormatCaps::all()),
            VertexFormatCaps::all()
        );
        let caps = VertexFormatCaps::all() - VertexFormatCaps::NORM32;
        assert_eq!(VertexFormatCaps::query(&caps), caps);
    }

    #[test]
    fn missing_families_widen_to_float32() {
        let caps = VertexFormatCaps::empty();
        let native = |f| caps.native_format(f, &StandardFormats);
        assert_eq!(native(Format::R16G16Float), Format::R32G32Float);
        assert_eq!(native(Format::R64G64B64Float), Format::R32G32B32Float);
        assert_eq!(native(Format::R32Fixed), Format::R32Float);
        assert_eq!(native(Format::R32G32B32A32Snorm), Format::R32G32B32A32Float);
        assert_eq!(native(Format::R32G32Uscaled), Format::R32G32Float);
        // Not a queried family.
        assert_eq!(native(Format::R16G16Unorm), Format::R16G16Unorm);
        assert_eq!(native(Format::R10G10B10A2Unorm), Format::R10G10B10A2Unorm);
    }

    #[test]
    fn supported_families_stay_native() {
        let caps = VertexFormatCaps::all();
        for &format in Format::ALL {
            assert_eq!(caps.native_format(format, &StandardFormats), format);
        }
    }

    #[test]
    fn table_checks_every_format_against_the_device() {
        let table = NativeFormatTable::build(&OnlyFloat32, &StandardFormats);
        assert_eq!(table.caps(), VertexFormatCaps::empty());
        assert_eq!(table.native(Format::R32G32Float), Format::R32G32Float);
        // Outside every queried family, still unsupported.
        assert_eq!(table.native(Format::R16G16Unorm), Format::R32G32Float);
        assert_eq!(table.native(Format::R8G8B8Uscaled), Format::R32G32B32Float);
        // A8R8G8B8 is not fetchable either, so color widens to float.
        assert_eq!(table.native(Format::R8G8B8A8Unorm), Format::R32G32B32A32Float);

        let table = NativeFormatTable::build(&VertexFormatCaps::empty(), &StandardFormats);
        assert_eq!(table.native(Format::R8G8B8A8Unorm), Format::A8R8G8B8Unorm);
        assert_eq!(table.native(Format::R16G16B16Float), Format::R32G32B32Float);
        assert_eq!(table.native(Format::R16G16Unorm), Format::R16G16Unorm);
    }

    #[test]
    fn color_packings_fall_back_between_each_other() {
        let none = VertexFormatCaps::empty();
        assert_eq!(
            none.native_format(Format::R8G8B8A8Unorm, &StandardFormats),
            Format::A8R8G8B8Unorm
        );
        assert_eq!(
            none.native_format(Format::B8G8R8A8Unorm, &StandardFormats),
            Format::A8R8G8B8Unorm
        );
        assert_eq!(
            VertexFormatCaps::RGBA8_UNORM.native_format(Format::B8G8R8A8Unorm, &StandardFormats),
            Format::R8G8B8A8Unorm
        );
    }
}
