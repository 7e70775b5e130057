//! The decode pipeline: tag-described byte layouts to dense sample buffers.
//!
//! Three paths, tried in order. A page that is memory-mappable can be served
//! as a zero-copy view of the file when the caller asked for one. A
//! contiguous uncompressed page is one bulk read straight into the output
//! buffer. Everything else goes through the general path: each strip or tile
//! is read, decompressed, unpacked into elements and placed into its output
//! region, optionally on a bounded worker pool.

use std::borrow::Cow;
use std::io::{self, Read};
use std::ops::Range;

use half::f16;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::page::Page;
use super::predictor;
#[cfg(feature = "deflate")]
use super::stream::DeflateReader;
#[cfg(feature = "lzw")]
use super::stream::LZWReader;
#[cfg(any(feature = "zstd", all(feature = "zstd-safe-rust", not(feature = "zstd"))))]
use super::stream::ZstdReader;
use super::stream::{PackBitsReader, SmartReader};
use super::Limits;
use crate::bytecast;
use crate::channel::{self, Channel, SharedChannel};
use crate::error::{TiffError, TiffResult, TiffUnsupportedError};
use crate::format::Format;
use crate::tags::{ByteOrder, CompressionMethod, FillOrder, PlanarConfiguration, Predictor};
use crate::SampleType;

/// Options for one decode call, builder style.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    squeeze: bool,
    validate_only: bool,
    max_workers: usize,
    memory_map: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            squeeze: true,
            validate_only: false,
            max_workers: 1,
            memory_map: false,
        }
    }
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop size-one depth and sample axes from the output shape.
    /// Defaults to true.
    pub fn squeeze(mut self, squeeze: bool) -> Self {
        self.squeeze = squeeze;
        self
    }

    /// Run the validation stage only; `decode` then returns `None`.
    pub fn validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    /// Decode independent segments on up to this many worker threads.
    /// Values of zero or one decode synchronously on the calling thread.
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Serve memory-mappable pages as a zero-copy view of the file instead
    /// of a copied buffer. Silently falls back to a copy when the page or
    /// the channel does not support mapping.
    pub fn memory_map(mut self, memory_map: bool) -> Self {
        self.memory_map = memory_map;
        self
    }
}

/// A dense decoded buffer, one vector variant per element type.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodingResult {
    /// A vector of unsigned bytes
    U8(Vec<u8>),
    /// A vector of unsigned words
    U16(Vec<u16>),
    /// A vector of 32 bit unsigned ints
    U32(Vec<u32>),
    /// A vector of 64 bit unsigned ints
    U64(Vec<u64>),
    /// A vector of 16 bit IEEE floats
    F16(Vec<f16>),
    /// A vector of 32 bit IEEE floats
    F32(Vec<f32>),
    /// A vector of 64 bit IEEE floats
    F64(Vec<f64>),
    /// A vector of 8 bit signed ints
    I8(Vec<i8>),
    /// A vector of 16 bit signed ints
    I16(Vec<i16>),
    /// A vector of 32 bit signed ints
    I32(Vec<i32>),
    /// A vector of 64 bit signed ints
    I64(Vec<i64>),
}

impl DecodingResult {
    /// A zeroed buffer of `len` elements, checked against the configured
    /// buffer limit.
    pub(crate) fn new(
        sample_type: SampleType,
        len: usize,
        limits: &Limits,
    ) -> TiffResult<DecodingResult> {
        let bytes = len
            .checked_mul(sample_type.byte_len())
            .ok_or(TiffError::LimitsExceeded)?;
        if bytes > limits.decoding_buffer_size {
            return Err(TiffError::LimitsExceeded);
        }
        Ok(match sample_type {
            SampleType::U8 => DecodingResult::U8(vec![0; len]),
            SampleType::U16 => DecodingResult::U16(vec![0; len]),
            SampleType::U32 => DecodingResult::U32(vec![0; len]),
            SampleType::U64 => DecodingResult::U64(vec![0; len]),
            SampleType::F16 => DecodingResult::F16(vec![f16::ZERO; len]),
            SampleType::F32 => DecodingResult::F32(vec![0.0; len]),
            SampleType::F64 => DecodingResult::F64(vec![0.0; len]),
            SampleType::I8 => DecodingResult::I8(vec![0; len]),
            SampleType::I16 => DecodingResult::I16(vec![0; len]),
            SampleType::I32 => DecodingResult::I32(vec![0; len]),
            SampleType::I64 => DecodingResult::I64(vec![0; len]),
        })
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            DecodingResult::U8(_) => SampleType::U8,
            DecodingResult::U16(_) => SampleType::U16,
            DecodingResult::U32(_) => SampleType::U32,
            DecodingResult::U64(_) => SampleType::U64,
            DecodingResult::F16(_) => SampleType::F16,
            DecodingResult::F32(_) => SampleType::F32,
            DecodingResult::F64(_) => SampleType::F64,
            DecodingResult::I8(_) => SampleType::I8,
            DecodingResult::I16(_) => SampleType::I16,
            DecodingResult::I32(_) => SampleType::I32,
            DecodingResult::I64(_) => SampleType::I64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            DecodingResult::U8(buf) => buf.len(),
            DecodingResult::U16(buf) => buf.len(),
            DecodingResult::U32(buf) => buf.len(),
            DecodingResult::U64(buf) => buf.len(),
            DecodingResult::F16(buf) => buf.len(),
            DecodingResult::F32(buf) => buf.len(),
            DecodingResult::F64(buf) => buf.len(),
            DecodingResult::I8(buf) => buf.len(),
            DecodingResult::I16(buf) => buf.len(),
            DecodingResult::I32(buf) => buf.len(),
            DecodingResult::I64(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The elements as native-endian bytes.
    pub fn as_ne_bytes(&self) -> &[u8] {
        match self {
            DecodingResult::U8(buf) => buf,
            DecodingResult::U16(buf) => bytecast::u16_as_ne_bytes(buf),
            DecodingResult::U32(buf) => bytecast::u32_as_ne_bytes(buf),
            DecodingResult::U64(buf) => bytecast::u64_as_ne_bytes(buf),
            DecodingResult::F16(buf) => bytecast::f16_as_ne_bytes(buf),
            DecodingResult::F32(buf) => bytecast::f32_as_ne_bytes(buf),
            DecodingResult::F64(buf) => bytecast::f64_as_ne_bytes(buf),
            DecodingResult::I8(buf) => bytecast::i8_as_ne_bytes(buf),
            DecodingResult::I16(buf) => bytecast::i16_as_ne_bytes(buf),
            DecodingResult::I32(buf) => bytecast::i32_as_ne_bytes(buf),
            DecodingResult::I64(buf) => bytecast::i64_as_ne_bytes(buf),
        }
    }

    pub(crate) fn as_ne_bytes_mut(&mut self) -> &mut [u8] {
        match self {
            DecodingResult::U8(buf) => buf,
            DecodingResult::U16(buf) => bytecast::u16_as_ne_mut_bytes(buf),
            DecodingResult::U32(buf) => bytecast::u32_as_ne_mut_bytes(buf),
            DecodingResult::U64(buf) => bytecast::u64_as_ne_mut_bytes(buf),
            DecodingResult::F16(buf) => bytecast::f16_as_ne_mut_bytes(buf),
            DecodingResult::F32(buf) => bytecast::f32_as_ne_mut_bytes(buf),
            DecodingResult::F64(buf) => bytecast::f64_as_ne_mut_bytes(buf),
            DecodingResult::I8(buf) => bytecast::i8_as_ne_mut_bytes(buf),
            DecodingResult::I16(buf) => bytecast::i16_as_ne_mut_bytes(buf),
            DecodingResult::I32(buf) => bytecast::i32_as_ne_mut_bytes(buf),
            DecodingResult::I64(buf) => bytecast::i64_as_ne_mut_bytes(buf),
        }
    }

    /// Reinterpret the elements, currently holding bytes of the given
    /// order, as native values. A no-op when `byte_order` matches the host.
    pub(crate) fn fix_endianness(&mut self, byte_order: ByteOrder) {
        match byte_order {
            ByteOrder::LittleEndian => match self {
                DecodingResult::U8(_) | DecodingResult::I8(_) => {}
                DecodingResult::U16(b) => b.iter_mut().for_each(|v| *v = u16::from_le(*v)),
                DecodingResult::U32(b) => b.iter_mut().for_each(|v| *v = u32::from_le(*v)),
                DecodingResult::U64(b) => b.iter_mut().for_each(|v| *v = u64::from_le(*v)),
                DecodingResult::I16(b) => b.iter_mut().for_each(|v| *v = i16::from_le(*v)),
                DecodingResult::I32(b) => b.iter_mut().for_each(|v| *v = i32::from_le(*v)),
                DecodingResult::I64(b) => b.iter_mut().for_each(|v| *v = i64::from_le(*v)),
                DecodingResult::F16(b) => b
                    .iter_mut()
                    .for_each(|v| *v = f16::from_bits(u16::from_le(v.to_bits()))),
                DecodingResult::F32(b) => b
                    .iter_mut()
                    .for_each(|v| *v = f32::from_bits(u32::from_le(v.to_bits()))),
                DecodingResult::F64(b) => b
                    .iter_mut()
                    .for_each(|v| *v = f64::from_bits(u64::from_le(v.to_bits()))),
            },
            ByteOrder::BigEndian => match self {
                DecodingResult::U8(_) | DecodingResult::I8(_) => {}
                DecodingResult::U16(b) => b.iter_mut().for_each(|v| *v = u16::from_be(*v)),
                DecodingResult::U32(b) => b.iter_mut().for_each(|v| *v = u32::from_be(*v)),
                DecodingResult::U64(b) => b.iter_mut().for_each(|v| *v = u64::from_be(*v)),
                DecodingResult::I16(b) => b.iter_mut().for_each(|v| *v = i16::from_be(*v)),
                DecodingResult::I32(b) => b.iter_mut().for_each(|v| *v = i32::from_be(*v)),
                DecodingResult::I64(b) => b.iter_mut().for_each(|v| *v = i64::from_be(*v)),
                DecodingResult::F16(b) => b
                    .iter_mut()
                    .for_each(|v| *v = f16::from_bits(u16::from_be(v.to_bits()))),
                DecodingResult::F32(b) => b
                    .iter_mut()
                    .for_each(|v| *v = f32::from_bits(u32::from_be(v.to_bits()))),
                DecodingResult::F64(b) => b
                    .iter_mut()
                    .for_each(|v| *v = f64::from_bits(u64::from_be(v.to_bits()))),
            },
        }
    }
}

/// A zero-copy view of the raw sample run inside a mapped file.
#[derive(Debug)]
pub struct MappedData {
    map: memmap2::Mmap,
    range: Range<usize>,
    sample_type: SampleType,
}

impl MappedData {
    /// The sample bytes, backed by the file mapping.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map[self.range.clone()]
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Number of elements in the view.
    pub fn len(&self) -> usize {
        self.range.len() / self.sample_type.byte_len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Decoded samples, either owned or borrowed from a file mapping.
#[derive(Debug)]
pub enum ImageData {
    Owned(DecodingResult),
    Mapped(MappedData),
}

impl ImageData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ImageData::Owned(result) => result.as_ne_bytes(),
            ImageData::Mapped(mapped) => mapped.as_bytes(),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            ImageData::Owned(result) => result.sample_type(),
            ImageData::Mapped(mapped) => mapped.sample_type(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ImageData::Owned(result) => result.len(),
            ImageData::Mapped(mapped) => mapped.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded page with its output shape and axis labels.
#[derive(Debug)]
pub struct DecodedImage {
    data: ImageData,
    shape: Vec<u64>,
    axes: String,
}

impl DecodedImage {
    pub fn data(&self) -> &ImageData {
        &self.data
    }

    pub fn into_data(self) -> ImageData {
        self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn axes(&self) -> &str {
        &self.axes
    }
}

/// Everything a decode call needs from the owning document.
pub(crate) struct DecodeContext<'a, C> {
    pub(crate) channel: &'a SharedChannel<C>,
    pub(crate) channel_len: u64,
    pub(crate) format: &'a Format,
    pub(crate) limits: &'a Limits,
}

/// The part of a segment grid one stored segment covers.
///
/// `store_*` is the extent as stored in the file (full tile size, actual
/// strip rows), `keep_*` the extent that survives clipping at image edges.
#[derive(Debug, Clone)]
struct SegmentSpan {
    offset: u64,
    count: u64,
    plane: u64,
    depth0: u64,
    row0: u64,
    col0: u64,
    store_cols: u64,
    store_rows: u64,
    store_depth: u64,
    keep_cols: u64,
    keep_rows: u64,
    keep_depth: u64,
    /// Samples interleaved per pixel within this segment.
    samples: u64,
}

/// Decode a page (or a light frame going by its keyframe's layout, with the
/// frame's own segment tables).
pub(crate) fn decode_page<C: Channel>(
    ctx: &DecodeContext<'_, C>,
    page: &Page,
    offsets: &[u64],
    counts: &[u64],
    run: Option<(u64, u64)>,
    mappable: bool,
    options: &DecodeOptions,
) -> TiffResult<Option<DecodedImage>> {
    let sample_type = validate(page, ctx.limits)?;
    if options.validate_only {
        return Ok(None);
    }

    if options.memory_map && mappable {
        if let Some((start, len)) = run {
            if let Some(image) = map_run(ctx, page, start, len, sample_type, options.squeeze)? {
                return Ok(Some(image));
            }
        }
        debug!("memory map requested but unavailable, decoding a copy");
    }

    let total = element_count(page)?;
    let mut output = DecodingResult::new(sample_type, total, ctx.limits)?;

    match run {
        Some((start, len)) => decode_contiguous(ctx, page, start, len, &mut output)?,
        None => decode_scattered(ctx, page, offsets, counts, sample_type, options, &mut output)?,
    }

    let (shape, axes) = reshape(page, options.squeeze, output.len());
    Ok(Some(DecodedImage {
        data: ImageData::Owned(output),
        shape,
        axes,
    }))
}

/// Product of the normalized shape slots, bounds-checked.
fn element_count(page: &Page) -> TiffResult<usize> {
    let total = page
        .shaped()
        .iter()
        .try_fold(1u64, |acc, &dim| acc.checked_mul(dim))
        .ok_or(TiffError::LimitsExceeded)?;
    Ok(usize::try_from(total)?)
}

/// The checks every decode call runs up front; failures here are fatal for
/// this call only.
fn validate(page: &Page, limits: &Limits) -> TiffResult<SampleType> {
    let sample_type = page.sample_type()?;

    let total = element_count(page)?;
    let bytes = total
        .checked_mul(sample_type.byte_len())
        .ok_or(TiffError::LimitsExceeded)?;
    if bytes > limits.decoding_buffer_size {
        return Err(TiffError::LimitsExceeded);
    }

    check_compression(page.compression())?;

    match page.predictor() {
        Predictor::None => {}
        Predictor::Horizontal => {
            let integer = !matches!(
                sample_type,
                SampleType::F16 | SampleType::F32 | SampleType::F64
            );
            if !integer || !matches!(page.uniform_bits(), Some(8 | 16 | 32 | 64)) {
                return Err(TiffUnsupportedError::UnsupportedPredictor(Predictor::Horizontal).into());
            }
        }
        Predictor::FloatingPoint => {
            if !matches!(
                sample_type,
                SampleType::F16 | SampleType::F32 | SampleType::F64
            ) {
                return Err(
                    TiffUnsupportedError::UnsupportedPredictor(Predictor::FloatingPoint).into(),
                );
            }
        }
        unknown => return Err(TiffUnsupportedError::UnsupportedPredictor(unknown).into()),
    }

    if page.is_subsampled()
        && !(page.compression() == CompressionMethod::ModernJPEG
            && page.planar_configuration() == PlanarConfiguration::Chunky)
    {
        let (horizontal, vertical) = page.chroma_subsampling();
        return Err(TiffUnsupportedError::UnsupportedSubsampling(
            horizontal,
            vertical,
            page.planar_configuration(),
        )
        .into());
    }

    if page.compression() == CompressionMethod::ModernJPEG {
        if sample_type != SampleType::U8 {
            let bits = page.bits_per_sample().first().copied().unwrap_or(0);
            return Err(TiffUnsupportedError::UnsupportedBitsPerSample(bits).into());
        }
        if page.planar_configuration() == PlanarConfiguration::Planar && page.samples() > 1 {
            return Err(TiffUnsupportedError::UnsupportedPlanarCompression(
                CompressionMethod::ModernJPEG,
            )
            .into());
        }
    }

    Ok(sample_type)
}

fn check_compression(method: CompressionMethod) -> TiffResult<()> {
    match method {
        CompressionMethod::None | CompressionMethod::PackBits => Ok(()),
        #[cfg(feature = "lzw")]
        CompressionMethod::LZW => Ok(()),
        #[cfg(feature = "deflate")]
        CompressionMethod::Deflate | CompressionMethod::OldDeflate => Ok(()),
        #[cfg(feature = "jpeg")]
        CompressionMethod::ModernJPEG => Ok(()),
        #[cfg(any(feature = "zstd", feature = "zstd-safe-rust"))]
        CompressionMethod::ZSTD => Ok(()),
        other => Err(TiffUnsupportedError::UnsupportedCompression(other).into()),
    }
}

/// Path 1: serve the sample run as a view of the mapped file.
///
/// Returns `None` when the channel is not file-backed or the mapping does
/// not cover the run, letting the caller fall back to a copying path.
fn map_run<C: Channel>(
    ctx: &DecodeContext<'_, C>,
    page: &Page,
    start: u64,
    len: u64,
    sample_type: SampleType,
    squeeze: bool,
) -> TiffResult<Option<DecodedImage>> {
    let map = {
        let guard = ctx.channel.lock();
        match guard.as_file() {
            Some(file) => channel::map_file(file)?,
            None => return Ok(None),
        }
    };

    let start = usize::try_from(start)?;
    let len = usize::try_from(len)?;
    let end = match start.checked_add(len) {
        Some(end) if end <= map.len() => end,
        _ => return Ok(None),
    };

    let elements = len / sample_type.byte_len();
    let (shape, axes) = reshape(page, squeeze, elements);
    debug!(start, len, "serving page from the file mapping");
    Ok(Some(DecodedImage {
        data: ImageData::Mapped(MappedData {
            map,
            range: start..end,
            sample_type,
        }),
        shape,
        axes,
    }))
}

/// Path 2: one bulk read of the unbroken byte run into the shaped buffer.
fn decode_contiguous<C: Channel>(
    ctx: &DecodeContext<'_, C>,
    page: &Page,
    start: u64,
    len: u64,
    output: &mut DecodingResult,
) -> TiffResult<()> {
    let byte_len = output.sample_type().byte_len();
    let take;
    {
        let bytes = output.as_ne_bytes_mut();
        take = bytes.len().min(usize::try_from(len)?);
        let mut guard = ctx.channel.lock();
        let mut reader = SmartReader::wrap(&mut *guard, ctx.format.byte_order());
        reader.goto_offset(start)?;
        reader.read_exact(&mut bytes[..take])?;
    }
    if take < output.len() * byte_len {
        warn!(
            missing = output.len() * byte_len - take,
            "contiguous run is shorter than the image, zero-filling the tail"
        );
    }
    if page.fill_order() == FillOrder::LsbFirst {
        reverse_bit_order(&mut output.as_ne_bytes_mut()[..take]);
    }

    let interleave = segment_samples(page);
    let row_samples = usize::try_from(page.width())? * usize::try_from(interleave)?;
    match page.predictor() {
        Predictor::None => output.fix_endianness(ctx.format.byte_order()),
        Predictor::Horizontal => {
            output.fix_endianness(ctx.format.byte_order());
            unpredict_horizontal_result(output, row_samples, usize::try_from(interleave)?);
        }
        Predictor::FloatingPoint => {
            predictor::unpredict_float(
                output.as_ne_bytes_mut(),
                row_samples * byte_len,
                usize::try_from(interleave)?,
                byte_len,
            );
            output.fix_endianness(ByteOrder::BigEndian);
        }
        // Rejected during validation.
        Predictor::Unknown(_) => unreachable!(),
    }
    Ok(())
}

/// Path 3: the general strip/tile path.
///
/// Segment bytes are read in file-offset order under one lock acquisition
/// and buffered, so the channel is free during the CPU-bound work. The
/// first segment always decodes on the calling thread; the rest go to the
/// worker pool when one was requested. Placement runs on the calling thread
/// in segment order, so the output is identical for any worker count.
fn decode_scattered<C: Channel>(
    ctx: &DecodeContext<'_, C>,
    page: &Page,
    offsets: &[u64],
    counts: &[u64],
    sample_type: SampleType,
    options: &DecodeOptions,
    output: &mut DecodingResult,
) -> TiffResult<()> {
    let spans = build_spans(page, offsets, counts)?;
    if spans.is_empty() {
        return Ok(());
    }

    let byte_len = sample_type.byte_len();
    for span in &spans {
        let stored = span.store_cols * span.store_rows * span.store_depth * span.samples;
        let decoded = usize::try_from(stored)?
            .checked_mul(byte_len)
            .ok_or(TiffError::LimitsExceeded)?;
        if decoded > ctx.limits.intermediate_buffer_size
            || usize::try_from(span.count)? > ctx.limits.intermediate_buffer_size
        {
            return Err(TiffError::LimitsExceeded);
        }
    }

    // Read in offset order so a spinning disk or a prefetching kernel sees
    // one forward sweep.
    let mut read_order: Vec<usize> = (0..spans.len()).collect();
    read_order.sort_by_key(|&index| spans[index].offset);
    let mut raws: Vec<Vec<u8>> = spans.iter().map(|_| Vec::new()).collect();
    {
        let mut guard = ctx.channel.lock();
        let mut reader = SmartReader::wrap(&mut *guard, ctx.format.byte_order());
        for &index in &read_order {
            let span = &spans[index];
            let mut raw = vec![0u8; usize::try_from(span.count)?];
            reader.goto_offset(span.offset)?;
            reader.read_exact(&mut raw)?;
            raws[index] = raw;
        }
    }

    let byte_order = ctx.format.byte_order();
    let first = decode_segment(page, sample_type, &spans[0], &raws[0], byte_order, ctx.limits)?;
    place_segment(&first, &spans[0], page, output)?;

    let rest_spans = &spans[1..];
    let rest_raws = &raws[1..];
    if options.max_workers > 1 && rest_spans.len() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_workers)
            .build()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let locals: Vec<TiffResult<DecodingResult>> = pool.install(|| {
            rest_spans
                .par_iter()
                .zip(rest_raws.par_iter())
                .map(|(span, raw)| decode_segment(page, sample_type, span, raw, byte_order, ctx.limits))
                .collect()
        });
        // All workers have finished; surface the first failure in dispatch
        // order, not in completion order.
        for (span, local) in rest_spans.iter().zip(locals) {
            place_segment(&local?, span, page, output)?;
        }
    } else {
        for (span, raw) in rest_spans.iter().zip(rest_raws) {
            let local = decode_segment(page, sample_type, span, raw, byte_order, ctx.limits)?;
            place_segment(&local, span, page, output)?;
        }
    }
    Ok(())
}

/// Samples interleaved per pixel within one segment.
fn segment_samples(page: &Page) -> u64 {
    match page.planar_configuration() {
        PlanarConfiguration::Planar => 1,
        _ => u64::from(page.samples()),
    }
}

/// Map listed segments onto the grid, dropping sentinel entries.
///
/// Segments with a zero offset or byte count have no stored bytes; their
/// output region keeps the zero fill. Entries beyond the derived grid are
/// ignored (the mismatch was already reported at materialization).
fn build_spans(page: &Page, offsets: &[u64], counts: &[u64]) -> TiffResult<Vec<SegmentSpan>> {
    let layout = *page.layout();
    if layout.per_plane() == 0 {
        return Ok(Vec::new());
    }
    let samples = segment_samples(page);
    let listed = offsets.len().min(counts.len()) as u64;
    let wanted = page.expected_segments().min(listed);

    let mut spans = Vec::with_capacity(usize::try_from(wanted)?);
    for segment in 0..wanted {
        let offset = offsets[usize::try_from(segment)?];
        let count = counts[usize::try_from(segment)?];
        let (plane, slice, row, col) = layout.coords(segment);
        let col0 = col * layout.width;
        let row0 = row * layout.length;
        let depth0 = slice * layout.depth;
        let keep_cols = layout.width.min(page.width().saturating_sub(col0));
        let keep_rows = layout.length.min(page.height().saturating_sub(row0));
        let keep_depth = layout.depth.min(page.depth().saturating_sub(depth0));
        if keep_cols == 0 || keep_rows == 0 || keep_depth == 0 {
            continue;
        }
        if offset == 0 || count == 0 {
            debug!(segment, "segment without stored bytes keeps its zero fill");
            continue;
        }
        let (store_cols, store_rows, store_depth) = if layout.tiled {
            (layout.width, layout.length, layout.depth)
        } else {
            // Strips store exactly the clipped rows, tiles always the full
            // grid cell.
            (layout.width, keep_rows, 1)
        };
        spans.push(SegmentSpan {
            offset,
            count,
            plane,
            depth0,
            row0,
            col0,
            store_cols,
            store_rows,
            store_depth,
            keep_cols,
            keep_rows,
            keep_depth,
            samples,
        });
    }
    Ok(spans)
}

/// Decompress and unpack one segment into a segment-local element buffer.
fn decode_segment(
    page: &Page,
    sample_type: SampleType,
    span: &SegmentSpan,
    raw: &[u8],
    byte_order: ByteOrder,
    limits: &Limits,
) -> TiffResult<DecodingResult> {
    let elements = usize::try_from(span.store_cols * span.store_rows * span.store_depth)?
        .checked_mul(usize::try_from(span.samples)?)
        .ok_or(TiffError::LimitsExceeded)?;
    let mut local = DecodingResult::new(sample_type, elements, limits)?;

    #[cfg(feature = "jpeg")]
    if page.compression() == CompressionMethod::ModernJPEG {
        decode_jpeg_segment(page, span, raw, &mut local)?;
        return Ok(local);
    }

    // The bit-order flip applies to the compressed stream as stored.
    let data: Cow<[u8]> = if page.fill_order() == FillOrder::LsbFirst {
        let mut flipped = raw.to_vec();
        reverse_bit_order(&mut flipped);
        Cow::Owned(flipped)
    } else {
        Cow::Borrowed(raw)
    };

    let rows = usize::try_from(span.store_rows * span.store_depth)?;
    let row_samples = usize::try_from(span.store_cols * span.samples)?;
    let byte_len = sample_type.byte_len();

    if matches!(page.uniform_bits(), Some(8 | 16 | 32 | 64)) {
        // Aligned samples decompress straight into the element bytes.
        let expected = elements * byte_len;
        {
            let mut reader = codec_reader(&data, page.compression(), expected, limits)?;
            let mut bytes: &mut [u8] = local.as_ne_bytes_mut();
            // A short stream leaves the zero fill; an overlong one is cut.
            io::copy(&mut reader.take(expected as u64), &mut bytes)?;
        }
        match page.predictor() {
            Predictor::None => local.fix_endianness(byte_order),
            Predictor::Horizontal => {
                local.fix_endianness(byte_order);
                unpredict_horizontal_result(&mut local, row_samples, usize::try_from(span.samples)?);
            }
            Predictor::FloatingPoint => {
                predictor::unpredict_float(
                    local.as_ne_bytes_mut(),
                    row_samples * byte_len,
                    usize::try_from(span.samples)?,
                    byte_len,
                );
                local.fix_endianness(ByteOrder::BigEndian);
            }
            Predictor::Unknown(_) => unreachable!(),
        }
    } else {
        // Bit-packed rows pad to whole bytes; unpack sample by sample. A
        // chunky pixel may mix widths (such as 5-6-5), a planar segment has
        // the single width of its plane.
        let widths: Vec<u16> = match page.planar_configuration() {
            PlanarConfiguration::Planar => {
                let plane = usize::try_from(span.plane)?;
                vec![page.bits_per_sample().get(plane).copied().unwrap_or(1)]
            }
            _ => page.bits_per_sample().to_vec(),
        };
        let bits = page.plane_bits(span.plane);
        let row_bytes = usize::try_from((span.store_cols * bits).div_ceil(8))?;
        let packed_len = row_bytes
            .checked_mul(rows)
            .ok_or(TiffError::LimitsExceeded)?;
        if packed_len > limits.intermediate_buffer_size {
            return Err(TiffError::LimitsExceeded);
        }
        let mut packed = vec![0u8; packed_len];
        {
            let mut reader = codec_reader(&data, page.compression(), packed_len, limits)?;
            let mut bytes: &mut [u8] = &mut packed;
            io::copy(&mut reader.take(packed_len as u64), &mut bytes)?;
        }
        unpack_packed(
            &packed,
            row_bytes,
            rows,
            &widths,
            usize::try_from(span.store_cols)?,
            &mut local,
        );
    }
    Ok(local)
}

/// Select the streaming decompressor for the stored segment bytes.
fn codec_reader<'r>(
    data: &'r [u8],
    method: CompressionMethod,
    expected: usize,
    limits: &Limits,
) -> TiffResult<Box<dyn Read + 'r>> {
    if expected > limits.intermediate_buffer_size || data.len() > limits.intermediate_buffer_size {
        return Err(TiffError::LimitsExceeded);
    }
    Ok(match method {
        CompressionMethod::None => Box::new(data),
        CompressionMethod::PackBits => Box::new(PackBitsReader::new(data, data.len() as u64)),
        #[cfg(feature = "lzw")]
        CompressionMethod::LZW => Box::new(LZWReader::new(data, data.len())),
        #[cfg(feature = "deflate")]
        CompressionMethod::Deflate | CompressionMethod::OldDeflate => {
            Box::new(DeflateReader::new(data))
        }
        #[cfg(feature = "zstd")]
        CompressionMethod::ZSTD => Box::new(ZstdReader::new(data)?),
        #[cfg(all(feature = "zstd-safe-rust", not(feature = "zstd")))]
        CompressionMethod::ZSTD => Box::new(ZstdReader::new(data, data.len() as u64)?),
        other => return Err(TiffUnsupportedError::UnsupportedCompression(other).into()),
    })
}

/// Decode one new-style JPEG segment.
///
/// Shared quantization and Huffman tables are spliced in front of the
/// per-segment stream: the tables blob ends with an EOI marker and the
/// segment starts with an SOI marker, one of each has to go. YCbCr pages
/// come out as RGB, so chroma subsampling is undone by the JPEG decoder.
#[cfg(feature = "jpeg")]
fn decode_jpeg_segment(
    page: &Page,
    span: &SegmentSpan,
    raw: &[u8],
    local: &mut DecodingResult,
) -> TiffResult<()> {
    use crate::tags::PhotometricInterpretation;
    use zune_jpeg::zune_core::bytestream::ZCursor;
    use zune_jpeg::zune_core::colorspace::ColorSpace;
    use zune_jpeg::zune_core::options::DecoderOptions;

    if raw.len() < 2 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "JPEG segment too short").into());
    }
    let data: Cow<[u8]> = match page.jpeg_tables() {
        Some(tables) => {
            let mut spliced = Vec::with_capacity(tables.len() + raw.len() - 4);
            spliced.extend_from_slice(&tables[..tables.len() - 2]);
            spliced.extend_from_slice(&raw[2..]);
            Cow::Owned(spliced)
        }
        None => Cow::Borrowed(raw),
    };

    let color_space = match page.photometric() {
        PhotometricInterpretation::RGB | PhotometricInterpretation::YCbCr => ColorSpace::RGB,
        PhotometricInterpretation::CMYK => ColorSpace::CMYK,
        _ => ColorSpace::Luma,
    };
    let mut decoder = zune_jpeg::JpegDecoder::new_with_options(
        ZCursor::new(&data[..]),
        DecoderOptions::default().jpeg_set_out_colorspace(color_space),
    );
    let pixels = decoder
        .decode()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
    let (jpeg_width, jpeg_height) = decoder
        .dimensions()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "JPEG stream without a frame"))?;

    let samples = usize::try_from(span.samples)?;
    if color_space.num_components() != samples {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "JPEG component count does not match the page layout",
        )
        .into());
    }

    let store_cols = usize::try_from(span.store_cols)?;
    let rows = usize::try_from(span.store_rows * span.store_depth)?;
    let out = local.as_ne_bytes_mut();
    let src_row = jpeg_width * samples;
    let copy = store_cols.min(jpeg_width) * samples;
    for row in 0..rows.min(jpeg_height) {
        let src = &pixels[row * src_row..row * src_row + copy];
        out[row * store_cols * samples..row * store_cols * samples + copy].copy_from_slice(src);
    }
    Ok(())
}

/// Copy the clipped extent of a decoded segment into its output region.
fn place_segment(
    local: &DecodingResult,
    span: &SegmentSpan,
    page: &Page,
    output: &mut DecodingResult,
) -> TiffResult<()> {
    let elem = local.sample_type().byte_len();
    let samples = usize::try_from(span.samples)?;
    let width = usize::try_from(page.width())?;
    let height = usize::try_from(page.height())?;
    let depth = usize::try_from(page.depth())?;
    let store_cols = usize::try_from(span.store_cols)?;
    let store_rows = usize::try_from(span.store_rows)?;
    let col0 = usize::try_from(span.col0)?;
    let row0 = usize::try_from(span.row0)?;
    let depth0 = usize::try_from(span.depth0)?;
    let plane = usize::try_from(span.plane)?;

    let plane_elems = depth * height * width * samples;
    let slice_elems = height * width * samples;
    let row_elems = width * samples;
    let run = usize::try_from(span.keep_cols)? * samples;

    let src = local.as_ne_bytes();
    let dst = output.as_ne_bytes_mut();
    for z in 0..usize::try_from(span.keep_depth)? {
        for y in 0..usize::try_from(span.keep_rows)? {
            let src_at = ((z * store_rows + y) * store_cols) * samples * elem;
            let dst_at = (plane * plane_elems
                + (depth0 + z) * slice_elems
                + (row0 + y) * row_elems
                + col0 * samples)
                * elem;
            dst[dst_at..dst_at + run * elem].copy_from_slice(&src[src_at..src_at + run * elem]);
        }
    }
    Ok(())
}

fn unpredict_horizontal_result(local: &mut DecodingResult, row_samples: usize, interleave: usize) {
    match local {
        DecodingResult::U8(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        DecodingResult::U16(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        DecodingResult::U32(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        DecodingResult::U64(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        DecodingResult::I8(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        DecodingResult::I16(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        DecodingResult::I32(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        DecodingResult::I64(buf) => predictor::unpredict_horizontal(buf, row_samples, interleave),
        // Rejected during validation.
        DecodingResult::F16(_) | DecodingResult::F32(_) | DecodingResult::F64(_) => unreachable!(),
    }
}

/// Flip the bit order within each byte, for files declaring
/// least-significant-bit-first fill order.
fn reverse_bit_order(bytes: &mut [u8]) {
    for byte in bytes {
        *byte = byte.reverse_bits();
    }
}

/// The public shape for the decoded buffer, falling back to a flat shape
/// when the element count disagrees with the derived metadata.
fn reshape(page: &Page, squeeze: bool, elements: usize) -> (Vec<u64>, String) {
    let (shape, axes) = page.shape_with(squeeze);
    let expected: u64 = shape.iter().product();
    if expected != elements as u64 {
        warn!(
            expected,
            actual = elements,
            "decoded element count does not match the derived shape, returning a flat buffer"
        );
        return (vec![elements as u64], "Q".into());
    }
    (shape, axes)
}

/// An MSB-first cursor over a packed bit stream. Reads past the end yield
/// zero bits, matching the zero-fill rule for short segments.
struct BitReader<'a> {
    bytes: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BitReader { bytes, bit: 0 }
    }

    fn take(&mut self, width: u16) -> u64 {
        let mut value = 0u64;
        for _ in 0..width {
            let set = self
                .bytes
                .get(self.bit / 8)
                .map_or(0, |byte| (byte >> (7 - self.bit % 8)) & 1);
            value = (value << 1) | u64::from(set);
            self.bit += 1;
        }
        value
    }
}

/// Unpack bit-packed rows into elements. `widths` cycles per pixel, so a
/// single entry unpacks a uniform depth and several entries unpack a
/// mixed-depth tuple. Every row starts on a byte boundary.
fn unpack_packed(
    packed: &[u8],
    row_bytes: usize,
    rows: usize,
    widths: &[u16],
    pixels_per_row: usize,
    local: &mut DecodingResult,
) {
    match local {
        DecodingResult::U8(out) => {
            unpack_into(packed, row_bytes, rows, widths, pixels_per_row, out, |v| v as u8)
        }
        DecodingResult::U16(out) => {
            unpack_into(packed, row_bytes, rows, widths, pixels_per_row, out, |v| v as u16)
        }
        DecodingResult::U32(out) => {
            unpack_into(packed, row_bytes, rows, widths, pixels_per_row, out, |v| v as u32)
        }
        DecodingResult::U64(out) => {
            unpack_into(packed, row_bytes, rows, widths, pixels_per_row, out, |v| v)
        }
        // Signed and float samples are only ever stored at aligned widths.
        _ => unreachable!(),
    }
}

fn unpack_into<T: Copy>(
    packed: &[u8],
    row_bytes: usize,
    rows: usize,
    widths: &[u16],
    pixels_per_row: usize,
    out: &mut [T],
    convert: impl Fn(u64) -> T,
) {
    let samples = widths.len();
    for row in 0..rows {
        let start = (row * row_bytes).min(packed.len());
        let end = (start + row_bytes).min(packed.len());
        let mut bits = BitReader::new(&packed[start..end]);
        for pixel in 0..pixels_per_row {
            for (sample, &width) in widths.iter().enumerate() {
                let index = (row * pixels_per_row + pixel) * samples + sample;
                let value = bits.take(width);
                if let Some(slot) = out.get_mut(index) {
                    *slot = convert(value);
                }
            }
        }
    }
}
