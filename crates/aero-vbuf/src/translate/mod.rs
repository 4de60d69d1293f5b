//! Vertex attribute translation.
//!
//! A [`TranslateKey`] describes how to build one packed output record from attributes scattered
//! across up to [`MAX_TRANSLATE_BUFFERS`] source buffers. [`Translator::new`] resolves the key
//! against a [`FormatRegistry`] once; a [`BoundTranslator`] then runs it over source data for
//! linear or indexed vertex streams.

mod cache;

pub use cache::{TranslateCache, TranslateCacheStats};

use thiserror::Error;

use crate::convert::{Emitter, Fetcher};
use crate::format::{Format, FormatRegistry};

pub const MAX_TRANSLATE_ELEMENTS: usize = 32;
pub const MAX_TRANSLATE_BUFFERS: usize = 32;

const INSTANCE_ID_SIZE: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("translate key has {count} elements (max {max})")]
    TooManyElements { count: usize, max: usize },

    #[error("element {element} reads source buffer {buffer} (max {max})")]
    BufferIndexOutOfRange {
        element: usize,
        buffer: u32,
        max: usize,
    },

    #[error("element {element} ends at byte {end}, past the {stride}-byte output record")]
    OutputOutOfRange { element: usize, end: u64, stride: u32 },

    #[error("element {element}: no fetch routine for input format {format}")]
    UnsupportedInputFormat { element: usize, format: Format },

    #[error("element {element}: no emit routine for output format {format}")]
    UnsupportedOutputFormat { element: usize, format: Format },

    #[error("element {element} has no output format")]
    OmittedOutput { element: usize },

    #[error("source buffer {slot} is not read by this translator")]
    UnknownSourceBuffer { slot: u32 },

    #[error("source buffer {slot} is not bound")]
    UnboundSourceBuffer { slot: u32 },

    #[error("source buffer {slot} holds {len} bytes but one record needs {required}")]
    SourceTooSmall {
        slot: u32,
        len: usize,
        required: usize,
    },

    #[error("output holds {len} bytes but {required} are required")]
    OutputTooSmall { len: usize, required: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TranslateElementKind {
    /// Fetch `input_format` from a source buffer and emit `output_format`.
    Normal,
    /// Write the instance id as a little-endian `u32`.
    InstanceId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TranslateElement {
    pub kind: TranslateElementKind,
    pub input_buffer: u32,
    pub input_format: Format,
    pub input_offset: u32,
    /// Non-zero: the source record is `instance_id / instance_divisor` instead of the vertex
    /// index.
    pub instance_divisor: u32,
    pub output_format: Format,
    pub output_offset: u32,
}

impl TranslateElement {
    pub fn new(
        input_buffer: u32,
        input_format: Format,
        input_offset: u32,
        output_format: Format,
        output_offset: u32,
    ) -> Self {
        Self {
            kind: TranslateElementKind::Normal,
            input_buffer,
            input_format,
            input_offset,
            instance_divisor: 0,
            output_format,
            output_offset,
        }
    }

    pub fn instance_id(output_offset: u32) -> Self {
        Self {
            kind: TranslateElementKind::InstanceId,
            input_buffer: 0,
            input_format: Format::None,
            input_offset: 0,
            instance_divisor: 0,
            output_format: Format::R32Uint,
            output_offset,
        }
    }

    pub fn with_instance_divisor(mut self, divisor: u32) -> Self {
        self.instance_divisor = divisor;
        self
    }
}

/// Full description of a translation. Equal keys produce identical output for identical input.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TranslateKey {
    pub output_stride: u32,
    pub elements: Vec<TranslateElement>,
}

impl TranslateKey {
    pub fn new(output_stride: u32, elements: Vec<TranslateElement>) -> Self {
        Self {
            output_stride,
            elements,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Conversion {
    /// Input and output formats match: copy the bytes.
    Copy,
    Convert { fetch: Fetcher, emit: Emitter },
    InstanceId,
}

#[derive(Clone, Copy, Debug)]
struct CompiledElement {
    input_buffer: usize,
    input_offset: usize,
    input_size: usize,
    instance_divisor: u32,
    output_offset: usize,
    output_size: usize,
    conversion: Conversion,
}

/// A validated, resolved [`TranslateKey`].
#[derive(Debug)]
pub struct Translator {
    key: TranslateKey,
    elements: Vec<CompiledElement>,
    /// Per source slot: bytes of one record the key reads (`input_offset + input_size`,
    /// maximised over elements). `None` for slots the key never reads.
    extents: Vec<Option<usize>>,
}

impl Translator {
    pub fn new(key: TranslateKey, registry: &dyn FormatRegistry) -> Result<Self, TranslateError> {
        if key.elements.len() > MAX_TRANSLATE_ELEMENTS {
            return Err(TranslateError::TooManyElements {
                count: key.elements.len(),
                max: MAX_TRANSLATE_ELEMENTS,
            });
        }

        let mut elements = Vec::with_capacity(key.elements.len());
        let mut extents: Vec<Option<usize>> = Vec::new();

        for (index, element) in key.elements.iter().enumerate() {
            let compiled = compile_element(index, element, registry)?;

            let end = element.output_offset as u64 + compiled.output_size as u64;
            if end > key.output_stride as u64 {
                return Err(TranslateError::OutputOutOfRange {
                    element: index,
                    end,
                    stride: key.output_stride,
                });
            }

            if !matches!(compiled.conversion, Conversion::InstanceId) {
                let slot = compiled.input_buffer;
                if extents.len() <= slot {
                    extents.resize(slot + 1, None);
                }
                let extent = compiled.input_offset + compiled.input_size;
                extents[slot] = Some(extents[slot].map_or(extent, |e| e.max(extent)));
            }

            elements.push(compiled);
        }

        Ok(Self {
            key,
            elements,
            extents,
        })
    }

    pub fn key(&self) -> &TranslateKey {
        &self.key
    }

    pub fn output_stride(&self) -> u32 {
        self.key.output_stride
    }

    /// Source slots this translator reads, in ascending order.
    pub fn source_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.extents
            .iter()
            .enumerate()
            .filter(|(_, extent)| extent.is_some())
            .map(|(slot, _)| slot as u32)
    }

    /// Start binding source data for a run.
    pub fn bind<'a>(&'a self) -> BoundTranslator<'a> {
        BoundTranslator {
            translator: self,
            sources: vec![None; self.extents.len()],
        }
    }
}

fn compile_element(
    index: usize,
    element: &TranslateElement,
    registry: &dyn FormatRegistry,
) -> Result<CompiledElement, TranslateError> {
    if element.kind == TranslateElementKind::InstanceId {
        return Ok(CompiledElement {
            input_buffer: 0,
            input_offset: 0,
            input_size: 0,
            instance_divisor: 0,
            output_offset: element.output_offset as usize,
            output_size: INSTANCE_ID_SIZE,
            conversion: Conversion::InstanceId,
        });
    }

    if element.input_buffer as usize >= MAX_TRANSLATE_BUFFERS {
        return Err(TranslateError::BufferIndexOutOfRange {
            element: index,
            buffer: element.input_buffer,
            max: MAX_TRANSLATE_BUFFERS,
        });
    }
    if element.output_format == Format::None {
        return Err(TranslateError::OmittedOutput { element: index });
    }

    let input_desc = registry.describe(element.input_format);
    let fetch = registry
        .fetcher(element.input_format)
        .ok_or(TranslateError::UnsupportedInputFormat {
            element: index,
            format: element.input_format,
        })?;
    let output_desc =
        registry
            .describe(element.output_format)
            .ok_or(TranslateError::UnsupportedOutputFormat {
                element: index,
                format: element.output_format,
            })?;

    let (conversion, output_size) = if element.input_format == element.output_format
        && input_desc == Some(output_desc)
    {
        (Conversion::Copy, fetch.size())
    } else {
        let emit = Emitter::new(&output_desc).ok_or(TranslateError::UnsupportedOutputFormat {
            element: index,
            format: element.output_format,
        })?;
        (Conversion::Convert { fetch, emit }, emit.size())
    };

    Ok(CompiledElement {
        input_buffer: element.input_buffer as usize,
        input_offset: element.input_offset as usize,
        input_size: fetch.size() as usize,
        instance_divisor: element.instance_divisor,
        output_offset: element.output_offset as usize,
        output_size: output_size as usize,
        conversion,
    })
}

#[derive(Clone, Copy, Debug)]
struct Source<'a> {
    data: &'a [u8],
    stride: usize,
    max_index: u32,
}

/// A translator with source buffers attached.
#[derive(Debug)]
pub struct BoundTranslator<'a> {
    translator: &'a Translator,
    sources: Vec<Option<Source<'a>>>,
}

impl<'a> BoundTranslator<'a> {
    /// Attach `data` as source slot `slot`. Record `i` starts at `i * stride`; a stride of zero
    /// reads record 0 for every vertex.
    ///
    /// Fetch indices are clamped to `max_index`, further lowered to the last record `data`
    /// fully contains.
    pub fn set_buffer(
        &mut self,
        slot: u32,
        data: &'a [u8],
        stride: u32,
        max_index: u32,
    ) -> Result<(), TranslateError> {
        let extent = self
            .translator
            .extents
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or(TranslateError::UnknownSourceBuffer { slot })?;
        if data.len() < extent {
            return Err(TranslateError::SourceTooSmall {
                slot,
                len: data.len(),
                required: extent,
            });
        }

        let max_index = if stride == 0 {
            max_index
        } else {
            let last_full = (data.len() - extent) / stride as usize;
            max_index.min(u32::try_from(last_full).unwrap_or(u32::MAX))
        };

        self.sources[slot as usize] = Some(Source {
            data,
            stride: stride as usize,
            max_index,
        });
        Ok(())
    }

    /// Emit `count` records for vertices `start..start + count`.
    pub fn run(
        &self,
        start: u32,
        count: u32,
        instance_id: u32,
        output: &mut [u8],
    ) -> Result<(), TranslateError> {
        self.run_with(count as usize, instance_id, output, |i| {
            start.saturating_add(i as u32)
        })
    }

    /// Emit one record per entry of `indices`.
    pub fn run_elts(
        &self,
        indices: &[u32],
        instance_id: u32,
        output: &mut [u8],
    ) -> Result<(), TranslateError> {
        self.run_with(indices.len(), instance_id, output, |i| indices[i])
    }

    pub fn run_elts16(
        &self,
        indices: &[u16],
        instance_id: u32,
        output: &mut [u8],
    ) -> Result<(), TranslateError> {
        self.run_with(indices.len(), instance_id, output, |i| indices[i] as u32)
    }

    pub fn run_elts8(
        &self,
        indices: &[u8],
        instance_id: u32,
        output: &mut [u8],
    ) -> Result<(), TranslateError> {
        self.run_with(indices.len(), instance_id, output, |i| indices[i] as u32)
    }

    fn run_with(
        &self,
        count: usize,
        instance_id: u32,
        output: &mut [u8],
        vertex_index: impl Fn(usize) -> u32,
    ) -> Result<(), TranslateError> {
        let stride = self.translator.key.output_stride as usize;
        let required = count.saturating_mul(stride);
        if output.len() < required {
            return Err(TranslateError::OutputTooSmall {
                len: output.len(),
                required,
            });
        }
        for (slot, extent) in self.translator.extents.iter().enumerate() {
            if extent.is_some() && self.sources[slot].is_none() {
                return Err(TranslateError::UnboundSourceBuffer { slot: slot as u32 });
            }
        }
        if stride == 0 {
            return Ok(());
        }

        for (i, record) in output[..required].chunks_exact_mut(stride).enumerate() {
            let vertex = vertex_index(i);
            for element in &self.translator.elements {
                let dst = &mut record
                    [element.output_offset..element.output_offset + element.output_size];
                let convert = match element.conversion {
                    Conversion::InstanceId => {
                        dst.copy_from_slice(&instance_id.to_le_bytes());
                        continue;
                    }
                    Conversion::Copy => None,
                    Conversion::Convert { fetch, emit } => Some((fetch, emit)),
                };
                let source = self.sources[element.input_buffer].as_ref().ok_or(
                    TranslateError::UnboundSourceBuffer {
                        slot: element.input_buffer as u32,
                    },
                )?;

                let index = if element.instance_divisor != 0 {
                    instance_id / element.instance_divisor
                } else {
                    vertex
                };
                let base = index.min(source.max_index) as usize * source.stride
                    + element.input_offset;
                let src = &source.data[base..base + element.input_size];

                match convert {
                    Some((fetch, emit)) => emit.emit(&fetch.fetch(src), dst),
                    None => dst.copy_from_slice(src),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::StandardFormats;
    use pretty_assertions::assert_eq;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn read_f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn linear_run_converts_and_packs() {
        // Source: 3 x (u8 rgba, 2 bytes padding).
        let src = [255u8, 0, 0, 255, 9, 9, 0, 255, 0, 0, 9, 9, 0, 0, 255, 51, 9, 9];
        let key = TranslateKey::new(
            16,
            vec![TranslateElement::new(
                0,
                Format::R8G8B8A8Unorm,
                0,
                Format::R32G32B32A32Float,
                0,
            )],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();
        let mut bound = translator.bind();
        bound.set_buffer(0, &src, 6, u32::MAX).unwrap();

        let mut out = vec![0u8; 32];
        bound.run(1, 2, 0, &mut out).unwrap();
        let lanes = read_f32s(&out);
        assert_eq!(&lanes[..4], &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(&lanes[4..7], &[0.0, 0.0, 1.0]);
        assert!((lanes[7] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn same_format_is_copied_verbatim() {
        // NaN payloads would not survive a float round trip.
        let src: Vec<u8> = (0u8..24).collect();
        let key = TranslateKey::new(
            12,
            vec![TranslateElement::new(
                0,
                Format::R32G32B32Float,
                0,
                Format::R32G32B32Float,
                0,
            )],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();
        let mut bound = translator.bind();
        bound.set_buffer(0, &src, 12, u32::MAX).unwrap();

        let mut out = vec![0u8; 24];
        bound.run(0, 2, 0, &mut out).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn indexed_runs_follow_the_index_list() {
        let src = f32_bytes(&[10.0, 11.0, 12.0, 13.0]);
        let key = TranslateKey::new(
            2,
            vec![TranslateElement::new(
                0,
                Format::R32Float,
                0,
                Format::R16Float,
                0,
            )],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();
        let mut bound = translator.bind();
        bound.set_buffer(0, &src, 4, u32::MAX).unwrap();

        let halves = |out: &[u8]| -> Vec<f32> {
            out.chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()
        };

        let mut out = vec![0u8; 6];
        bound.run_elts(&[3, 0, 2], 0, &mut out).unwrap();
        assert_eq!(halves(&out), vec![13.0, 10.0, 12.0]);

        bound.run_elts16(&[1, 1, 3], 0, &mut out).unwrap();
        assert_eq!(halves(&out), vec![11.0, 11.0, 13.0]);

        bound.run_elts8(&[2, 0, 1], 0, &mut out).unwrap();
        assert_eq!(halves(&out), vec![12.0, 10.0, 11.0]);
    }

    #[test]
    fn indices_clamp_to_max_index_and_buffer_length() {
        let src = f32_bytes(&[1.0, 2.0, 3.0]);
        let key = TranslateKey::new(
            4,
            vec![TranslateElement::new(0, Format::R32Float, 0, Format::R32Float, 0)],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();

        let mut bound = translator.bind();
        bound.set_buffer(0, &src, 4, 1).unwrap();
        let mut out = vec![0u8; 12];
        bound.run_elts(&[0, 2, 100], 0, &mut out).unwrap();
        assert_eq!(read_f32s(&out), vec![1.0, 2.0, 2.0]);

        // max_index beyond the data: the last complete record wins.
        bound.set_buffer(0, &src, 4, u32::MAX).unwrap();
        bound.run_elts(&[0, 2, 100], 0, &mut out).unwrap();
        assert_eq!(read_f32s(&out), vec![1.0, 3.0, 3.0]);
    }

    #[test]
    fn instanced_elements_index_by_instance() {
        let per_vertex = f32_bytes(&[0.0, 1.0, 2.0]);
        let per_instance = f32_bytes(&[100.0, 200.0, 300.0]);
        let key = TranslateKey::new(
            12,
            vec![
                TranslateElement::new(0, Format::R32Float, 0, Format::R32Float, 0),
                TranslateElement::new(1, Format::R32Float, 0, Format::R32Float, 4)
                    .with_instance_divisor(2),
                TranslateElement::instance_id(8),
            ],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();
        let mut bound = translator.bind();
        bound.set_buffer(0, &per_vertex, 4, u32::MAX).unwrap();
        bound.set_buffer(1, &per_instance, 4, u32::MAX).unwrap();

        let mut out = vec![0u8; 24];
        bound.run(1, 2, 5, &mut out).unwrap();
        let words: Vec<u32> = out
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(
            words,
            vec![
                1.0f32.to_bits(),
                300.0f32.to_bits(),
                5,
                2.0f32.to_bits(),
                300.0f32.to_bits(),
                5
            ]
        );
    }

    #[test]
    fn instance_id_records_need_no_source_buffer() {
        let key = TranslateKey::new(
            8,
            vec![
                TranslateElement::instance_id(0),
                TranslateElement::instance_id(4),
            ],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();
        assert_eq!(translator.source_slots().count(), 0);

        let mut out = vec![0u8; 16];
        translator.bind().run(0, 2, 9, &mut out).unwrap();
        assert_eq!(out, [9u32.to_le_bytes(); 4].concat());
    }

    #[test]
    fn zero_stride_source_repeats_record_zero() {
        let src = f32_bytes(&[7.0]);
        let key = TranslateKey::new(
            4,
            vec![TranslateElement::new(0, Format::R32Float, 0, Format::R32Float, 0)],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();
        let mut bound = translator.bind();
        bound.set_buffer(0, &src, 0, u32::MAX).unwrap();
        let mut out = vec![0u8; 12];
        bound.run(5, 3, 0, &mut out).unwrap();
        assert_eq!(read_f32s(&out), vec![7.0; 3]);
    }

    #[test]
    fn construction_rejects_bad_keys() {
        let too_wide = TranslateKey::new(
            8,
            vec![TranslateElement::new(0, Format::R32Float, 0, Format::R32G32B32Float, 0)],
        );
        assert_eq!(
            Translator::new(too_wide, &StandardFormats).unwrap_err(),
            TranslateError::OutputOutOfRange {
                element: 0,
                end: 12,
                stride: 8
            }
        );

        let omitted = TranslateKey::new(
            4,
            vec![TranslateElement::new(0, Format::R32Float, 0, Format::None, 0)],
        );
        assert_eq!(
            Translator::new(omitted, &StandardFormats).unwrap_err(),
            TranslateError::OmittedOutput { element: 0 }
        );

        let bad_slot = TranslateKey::new(
            4,
            vec![TranslateElement::new(32, Format::R32Float, 0, Format::R32Float, 0)],
        );
        assert!(matches!(
            Translator::new(bad_slot, &StandardFormats),
            Err(TranslateError::BufferIndexOutOfRange { buffer: 32, .. })
        ));

        let too_many = TranslateKey::new(
            4,
            vec![TranslateElement::new(0, Format::R32Float, 0, Format::R32Float, 0); 33],
        );
        assert!(matches!(
            Translator::new(too_many, &StandardFormats),
            Err(TranslateError::TooManyElements { count: 33, .. })
        ));
    }

    #[test]
    fn run_rejects_missing_sources_and_short_output() {
        let key = TranslateKey::new(
            4,
            vec![TranslateElement::new(1, Format::R32Float, 0, Format::R32Float, 0)],
        );
        let translator = Translator::new(key, &StandardFormats).unwrap();
        assert_eq!(translator.source_slots().collect::<Vec<_>>(), vec![1]);

        let mut bound = translator.bind();
        let mut out = vec![0u8; 8];
        assert_eq!(
            bound.run(0, 2, 0, &mut out).unwrap_err(),
            TranslateError::UnboundSourceBuffer { slot: 1 }
        );
        assert_eq!(
            bound.set_buffer(0, &[0; 4], 4, 0).unwrap_err(),
            TranslateError::UnknownSourceBuffer { slot: 0 }
        );
        assert_eq!(
            bound.set_buffer(1, &[0; 3], 4, 0).unwrap_err(),
            TranslateError::SourceTooSmall {
                slot: 1,
                len: 3,
                required: 4
            }
        );

        bound.set_buffer(1, &[0; 4], 4, 0).unwrap();
        assert_eq!(
            bound.run(0, 3, 0, &mut out).unwrap_err(),
            TranslateError::OutputTooSmall {
                len: 8,
                required: 12
            }
        );
    }
}
