//! Per-channel fetch (decode to float lanes) and emit (encode from float lanes) routines.
//!
//! Both directions are resolved once from a [`FormatDesc`] into a small plan; running the plan
//! does no table lookups.

use half::f16;

use crate::format::{Channel, ChannelType, FormatDesc, Swizzle};

/// Lanes that a format does not provide default to `(0, 0, 0, 1)`.
const DEFAULT_LANES: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn channel_supported(channel: &Channel, max_int_bits: u8) -> bool {
    match channel.ty {
        ChannelType::Void => true,
        ChannelType::Float => matches!(channel.bits, 16 | 32 | 64),
        ChannelType::Fixed => channel.bits == 32,
        _ => (1..=max_int_bits).contains(&channel.bits),
    }
}

/// Decodes one attribute block into four float lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fetcher {
    channels: [Channel; 4],
    nr_channels: u8,
    swizzle: [Swizzle; 4],
    size: u32,
}

impl Fetcher {
    /// Returns `None` if a channel has an encoding/width combination with no decode routine.
    pub fn new(desc: &FormatDesc) -> Option<Self> {
        let stored = desc.channels();
        if stored.is_empty() || !stored.iter().all(|c| channel_supported(c, 64)) {
            return None;
        }
        let mut channels = [stored[0]; 4];
        channels[..stored.len()].copy_from_slice(stored);
        Some(Self {
            channels,
            nr_channels: stored.len() as u8,
            swizzle: desc.swizzle(),
            size: desc.block_size(),
        })
    }

    /// Bytes read per block.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// `src` must hold at least [`Fetcher::size`] bytes.
    pub fn fetch(&self, src: &[u8]) -> [f32; 4] {
        let mut stored = [0.0f32; 4];
        for (value, channel) in stored
            .iter_mut()
            .zip(&self.channels[..self.nr_channels as usize])
        {
            if channel.ty != ChannelType::Void {
                *value = decode(channel, read_bits(src, channel.shift, channel.bits));
            }
        }

        let mut lanes = DEFAULT_LANES;
        for (lane, swizzle) in lanes.iter_mut().zip(self.swizzle) {
            *lane = match swizzle {
                Swizzle::Zero => 0.0,
                Swizzle::One => 1.0,
                other => other
                    .channel()
                    .filter(|&c| c < self.nr_channels as usize)
                    .map_or(*lane, |c| stored[c]),
            };
        }
        lanes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct EmitChannel {
    lane: u8,
    channel: Channel,
}

/// Encodes four float lanes into one attribute block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Emitter {
    plan: [Option<EmitChannel>; 4],
    size: u32,
}

impl Emitter {
    /// Returns `None` if a channel has no encode routine (integer channels wider than 32 bits,
    /// odd float widths).
    pub fn new(desc: &FormatDesc) -> Option<Self> {
        let stored = desc.channels();
        if stored.is_empty() || !stored.iter().all(|c| channel_supported(c, 32)) {
            return None;
        }
        let swizzle = desc.swizzle();
        let mut plan = [None; 4];
        for (index, channel) in stored.iter().enumerate() {
            if channel.ty == ChannelType::Void {
                continue;
            }
            // Inverse swizzle: the lane that fetching would fill from this channel.
            let lane = swizzle
                .iter()
                .position(|s| s.channel() == Some(index))
                .unwrap_or(index);
            plan[index] = Some(EmitChannel {
                lane: lane as u8,
                channel: *channel,
            });
        }
        Some(Self {
            plan,
            size: desc.block_size(),
        })
    }

    /// An emitter that writes nothing.
    pub fn omit() -> Self {
        Self {
            plan: [None; 4],
            size: 0,
        }
    }

    pub fn is_omit(&self) -> bool {
        self.size == 0
    }

    /// Bytes written per block.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// `dst` must hold at least [`Emitter::size`] bytes. Padding bits are left untouched.
    pub fn emit(&self, lanes: &[f32; 4], dst: &mut [u8]) {
        for step in self.plan.iter().flatten() {
            let raw = encode(&step.channel, lanes[step.lane as usize]);
            write_bits(dst, step.channel.shift, step.channel.bits, raw);
        }
    }
}

fn mask(bits: u32) -> u64 {
    u64::MAX >> (64 - bits)
}

/// `2^bits - 1`
fn unsigned_max(bits: u32) -> f64 {
    mask(bits) as f64
}

/// `2^(bits-1) - 1`
fn signed_max(bits: u32) -> f64 {
    (mask(bits) >> 1) as f64
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    let unused = 64 - bits;
    ((raw << unused) as i64) >> unused
}

fn read_bits(src: &[u8], shift: u16, bits: u8) -> u64 {
    let (shift, bits) = (shift as usize, bits as usize);
    if shift % 8 == 0 && bits % 8 == 0 {
        let start = shift / 8;
        let len = bits / 8;
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(&src[start..start + len]);
        return u64::from_le_bytes(buf);
    }
    let mut value = 0u64;
    for bit in 0..bits {
        let at = shift + bit;
        if (src[at / 8] >> (at % 8)) & 1 != 0 {
            value |= 1 << bit;
        }
    }
    value
}

fn write_bits(dst: &mut [u8], shift: u16, bits: u8, value: u64) {
    let (shift, bits) = (shift as usize, bits as usize);
    if shift % 8 == 0 && bits % 8 == 0 {
        let start = shift / 8;
        let len = bits / 8;
        dst[start..start + len].copy_from_slice(&value.to_le_bytes()[..len]);
        return;
    }
    for bit in 0..bits {
        let at = shift + bit;
        let byte = &mut dst[at / 8];
        if (value >> bit) & 1 != 0 {
            *byte |= 1 << (at % 8);
        } else {
            *byte &= !(1 << (at % 8));
        }
    }
}

fn decode(channel: &Channel, raw: u64) -> f32 {
    let bits = channel.bits as u32;
    match channel.ty {
        ChannelType::Void => 0.0,
        ChannelType::Unorm => (raw as f64 / unsigned_max(bits)) as f32,
        ChannelType::Snorm => {
            let value = sign_extend(raw, bits) as f64 / signed_max(bits);
            value.max(-1.0) as f32
        }
        ChannelType::Uscaled | ChannelType::Uint => raw as f32,
        ChannelType::Sscaled | ChannelType::Sint => sign_extend(raw, bits) as f32,
        ChannelType::Fixed => (sign_extend(raw, bits) as f64 / 65536.0) as f32,
        ChannelType::Float => match bits {
            16 => f16::from_bits(raw as u16).to_f32(),
            32 => f32::from_bits(raw as u32),
            _ => f64::from_bits(raw) as f32,
        },
    }
}

fn encode(channel: &Channel, value: f32) -> u64 {
    let bits = channel.bits as u32;
    let x = value as f64;
    match channel.ty {
        ChannelType::Void => 0,
        ChannelType::Unorm => {
            let max = unsigned_max(bits);
            (x * max).round().clamp(0.0, max) as u64
        }
        ChannelType::Snorm => {
            let max = signed_max(bits);
            let v = (x * max).round().clamp(-max, max) as i64;
            v as u64 & mask(bits)
        }
        ChannelType::Uscaled | ChannelType::Uint => x.trunc().clamp(0.0, unsigned_max(bits)) as u64,
        ChannelType::Sscaled | ChannelType::Sint => {
            let max = signed_max(bits);
            let v = x.trunc().clamp(-max - 1.0, max) as i64;
            v as u64 & mask(bits)
        }
        ChannelType::Fixed => {
            let v = (x * 65536.0)
                .round()
                .clamp(i32::MIN as f64, i32::MAX as f64) as i64;
            v as u64 & mask(bits)
        }
        ChannelType::Float => match bits {
            16 => f16::from_f32(value).to_bits() as u64,
            32 => value.to_bits() as u64,
            _ => x.to_bits(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Format, FormatRegistry, StandardFormats};
    use pretty_assertions::assert_eq;

    fn fetch(format: Format, bytes: &[u8]) -> [f32; 4] {
        StandardFormats.fetch(format, bytes).unwrap()
    }

    fn emitter(format: Format) -> Emitter {
        Emitter::new(&StandardFormats.describe(format).unwrap()).unwrap()
    }

    #[test]
    fn unorm8_fetch_and_default_lanes() {
        assert_eq!(fetch(Format::R8G8Unorm, &[255, 0]), [1.0, 0.0, 0.0, 1.0]);
        let [x, ..] = fetch(Format::R8Unorm, &[51]);
        assert!((x - 0.2).abs() < 1e-6);
    }

    #[test]
    fn snorm_clamps_most_negative_value() {
        assert_eq!(fetch(Format::R8Snorm, &[0x80]), [-1.0, 0.0, 0.0, 1.0]);
        assert_eq!(fetch(Format::R8Snorm, &[0x81]), [-1.0, 0.0, 0.0, 1.0]);
        assert_eq!(fetch(Format::R8Snorm, &[0x7f]), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn scaled_and_integer_channels_keep_their_value() {
        assert_eq!(
            fetch(Format::R16G16Sscaled, &(-3i16).to_le_bytes().repeat(2)),
            [-3.0, -3.0, 0.0, 1.0]
        );
        assert_eq!(
            fetch(Format::R32Uint, &70_000u32.to_le_bytes()),
            [70_000.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn fixed_is_sixteen_dot_sixteen() {
        let raw = (-(3 << 16) - (1 << 15)) as i32;
        assert_eq!(
            fetch(Format::R32Fixed, &raw.to_le_bytes()),
            [-3.5, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn half_and_double_fetch() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&f16::from_f32(0.5).to_bits().to_le_bytes());
        bytes.extend_from_slice(&f16::from_f32(-2.0).to_bits().to_le_bytes());
        assert_eq!(fetch(Format::R16G16Float, &bytes), [0.5, -2.0, 0.0, 1.0]);
        assert_eq!(
            fetch(Format::R64Float, &1.25f64.to_le_bytes()),
            [1.25, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn reordered_packings_swizzle_on_fetch() {
        // Stored b, g, r, a.
        let [r, g, b, a] = fetch(Format::B8G8R8A8Unorm, &[0, 51, 255, 102]);
        assert_eq!((r, b), (1.0, 0.0));
        assert!((g - 0.2).abs() < 1e-6);
        assert!((a - 0.4).abs() < 1e-6);
        // Stored a, r, g, b.
        assert_eq!(
            fetch(Format::A8R8G8B8Unorm, &[0, 255, 0, 255]),
            [1.0, 0.0, 1.0, 0.0]
        );
        assert_eq!(
            fetch(Format::R8G8B8X8Unorm, &[255, 255, 255, 0]),
            [1.0, 1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn ten_ten_ten_two_fetch() {
        let raw: u32 = 1023 | (512 << 10) | (3 << 30);
        let [x, y, z, w] = fetch(Format::R10G10B10A2Unorm, &raw.to_le_bytes());
        assert_eq!((x, z, w), (1.0, 0.0, 1.0));
        assert!((y - 512.0 / 1023.0).abs() < 1e-6);

        // Signed: 0x200 is -512, which clamps to -1.
        let raw: u32 = 0x200 | (1 << 30);
        let [x, _, _, w] = fetch(Format::R10G10B10A2Snorm, &raw.to_le_bytes());
        assert_eq!((x, w), (-1.0, 1.0));
    }

    #[test]
    fn emit_rounds_and_clamps_normalized_values() {
        let mut out = [0u8; 4];
        emitter(Format::R8G8B8A8Unorm).emit(&[0.5, 1.5, -1.0, 0.2], &mut out);
        assert_eq!(out, [128, 255, 0, 51]);

        let mut out = [0u8; 2];
        emitter(Format::R8G8Snorm).emit(&[-1.0, 0.5, 0.0, 0.0], &mut out);
        assert_eq!(out, [0x81, 64]);
    }

    #[test]
    fn emit_normalized_bounds_hold_at_every_width() {
        // (format, size, bits of the red channel, signed)
        let cases = [
            (Format::R8Unorm, 1, 8, false),
            (Format::R16Unorm, 2, 16, false),
            (Format::R32Unorm, 4, 32, false),
            (Format::R10G10B10A2Unorm, 4, 10, false),
            (Format::R8Snorm, 1, 8, true),
            (Format::R16Snorm, 2, 16, true),
            (Format::R32Snorm, 4, 32, true),
            (Format::R10G10B10A2Snorm, 4, 10, true),
        ];
        for (format, size, bits, signed) in cases {
            let max: u64 = if signed {
                (1 << (bits - 1)) - 1
            } else {
                (1u64 << bits) - 1
            };
            // 0.5 * max lands on .5 for every width; rounding goes away from zero.
            for (input, expected) in [(0.0, 0), (1.0, max), (0.5, max / 2 + 1)] {
                let mut out = [0u8; 4];
                emitter(format).emit(&[input, 0.0, 0.0, 0.0], &mut out[..size]);
                let raw = u32::from_le_bytes(out) as u64 & ((1u64 << bits) - 1);
                assert_eq!(raw, expected, "{format:?} <- {input}");
            }
        }

        let mut out = [0u8; 4];
        emitter(Format::R32Unorm).emit(&[0.5, 0.0, 0.0, 0.0], &mut out);
        assert_eq!(u32::from_le_bytes(out), 2_147_483_648);
    }

    #[test]
    fn emit_truncates_scaled_values() {
        let mut out = [0u8; 4];
        emitter(Format::R16G16Sscaled).emit(&[-2.7, 40_000.0, 0.0, 0.0], &mut out);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), -2);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), i16::MAX);
    }

    #[test]
    fn emit_uses_inverse_swizzle() {
        let mut out = [0u8; 4];
        emitter(Format::A8R8G8B8Unorm).emit(&[1.0, 0.0, 0.2, 0.4], &mut out);
        assert_eq!(out, [102, 255, 0, 51]);

        let mut out = [0u8; 4];
        emitter(Format::B8G8R8A8Unorm).emit(&[1.0, 0.0, 0.2, 0.4], &mut out);
        assert_eq!(out, [51, 0, 255, 102]);
    }

    #[test]
    fn emit_leaves_padding_bits_alone() {
        let mut out = [0xaa; 4];
        emitter(Format::R8G8B8X8Unorm).emit(&[0.0, 0.0, 0.0, 1.0], &mut out);
        assert_eq!(out, [0, 0, 0, 0xaa]);
    }

    #[test]
    fn emit_packed_and_float_formats() {
        let mut out = [0u8; 4];
        emitter(Format::R10G10B10A2Unorm).emit(&[1.0, 0.0, 1.0, 1.0], &mut out);
        assert_eq!(u32::from_le_bytes(out), 1023 | (1023 << 20) | (3 << 30));

        let mut out = [0u8; 4];
        emitter(Format::R16G16Float).emit(&[0.5, -2.0, 0.0, 0.0], &mut out);
        assert_eq!(
            out,
            [
                f16::from_f32(0.5).to_le_bytes(),
                f16::from_f32(-2.0).to_le_bytes()
            ]
            .concat()
            .as_slice()
        );

        let mut out = [0u8; 4];
        emitter(Format::R32Fixed).emit(&[-3.5, 0.0, 0.0, 0.0], &mut out);
        assert_eq!(i32::from_le_bytes(out), -(7 << 15));
    }

    #[test]
    fn omit_writes_nothing() {
        let omit = Emitter::omit();
        assert!(omit.is_omit());
        let mut out = [7u8; 4];
        omit.emit(&[1.0; 4], &mut out);
        assert_eq!(out, [7; 4]);
    }

    #[test]
    fn unsupported_widths_have_no_routine() {
        let odd_float = FormatDesc::uniform(ChannelType::Float, 1, 24);
        assert_eq!(Fetcher::new(&odd_float), None);
        assert_eq!(Emitter::new(&odd_float), None);

        // 64-bit integers decode but never encode.
        let wide = FormatDesc::uniform(ChannelType::Uint, 1, 64);
        assert!(Fetcher::new(&wide).is_some());
        assert_eq!(Emitter::new(&wide), None);
    }
}
