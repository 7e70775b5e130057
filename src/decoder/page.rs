//! Fully parsed page records.
//!
//! A [`Page`] is the heavyweight half of the page model: the complete
//! directory plus every layout fact derived from it, so later decodes touch
//! the channel only for segment data. The cheap half lives in
//! [`super::frame`].

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek};

use tracing::warn;

use super::ifd::{self, Value};
use super::stream::SmartReader;
use super::Limits;
use crate::directory::Directory;
use crate::error::{StructuralError, TiffResult, TiffUnsupportedError};
use crate::format::Format;
use crate::tags::{
    CompressionMethod, FillOrder, IfdPointer, PhotometricInterpretation, PlanarConfiguration,
    Predictor, SampleFormat, Tag,
};
use crate::SampleType;

/// Geometry of the segment grid covering one plane of a page.
///
/// Strips are segments spanning the full image width. Tiles carve all three
/// image axes. Either way the grid is `across * down * deep` segments per
/// plane, listed plane-major in the offset and byte-count tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentLayout {
    /// Width of one segment in pixels.
    pub width: u64,
    /// Number of rows in one segment.
    pub length: u64,
    /// Number of depth slices in one segment.
    pub depth: u64,
    /// Segments along the horizontal axis.
    pub across: u64,
    /// Segments along the vertical axis.
    pub down: u64,
    /// Segments along the depth axis.
    pub deep: u64,
    /// Whether the grid came from tile tags rather than strip tags.
    pub tiled: bool,
}

impl SegmentLayout {
    /// Number of segments covering one plane.
    pub fn per_plane(&self) -> u64 {
        self.across * self.down * self.deep
    }

    /// Grid coordinates `(plane, slice, row, column)` of the segment at
    /// plane-major linear `index`. The index must lie inside the grid.
    pub(crate) fn coords(&self, index: u64) -> (u64, u64, u64, u64) {
        let per_plane = self.per_plane();
        let plane = index / per_plane;
        let in_plane = index % per_plane;
        let per_slice = self.across * self.down;
        let slice = in_plane / per_slice;
        let in_slice = in_plane % per_slice;
        (plane, slice, in_slice / self.across, in_slice % self.across)
    }
}

/// One fully parsed image file directory with its derived layout.
///
/// Everything here is computed when the page is materialized. Accessors are
/// plain field reads; none of them touch the channel again.
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,
    pointer: IfdPointer,
    directory: Directory,

    width: u64,
    height: u64,
    depth: u64,
    samples: u16,
    bits_per_sample: Vec<u16>,
    sample_format: Vec<SampleFormat>,
    sample_type: Option<SampleType>,

    compression: CompressionMethod,
    photometric: PhotometricInterpretation,
    planar: PlanarConfiguration,
    predictor: Predictor,
    fill_order: FillOrder,
    chroma_subsampling: (u16, u16),
    jpeg_tables: Option<Vec<u8>>,
    sub_ifds: Vec<IfdPointer>,

    layout: SegmentLayout,
    segment_offsets: Vec<u64>,
    segment_byte_counts: Vec<u64>,

    contiguous: Option<(u64, u64)>,
    memory_mappable: bool,
    fingerprint: u64,
}

/// Clone the value of `tag`, escalating a missing or dropped record into the
/// per-page structural error the caller reports.
pub(crate) fn require(dir: &Directory, tag: Tag) -> TiffResult<Value> {
    match dir.value(tag) {
        Some(value) => Ok(value.clone()),
        None => match dir.failure_for(tag) {
            Some(err) => Err(StructuralError::RequiredTagUndecodable(tag, err).into()),
            None => Err(StructuralError::RequiredTagNotFound(tag).into()),
        },
    }
}

pub(crate) fn optional(dir: &Directory, tag: Tag) -> Option<Value> {
    dir.value(tag).cloned()
}

/// Bytes of one packed pixel row. Rows are padded to a whole byte.
fn packed_row_bytes(width: u64, bits_per_pixel: u64) -> Option<u64> {
    width.checked_mul(bits_per_pixel).map(|bits| bits.div_ceil(8))
}

impl Page {
    /// Parse the directory at `pointer` and derive the page layout.
    pub(crate) fn materialize<R: Read + Seek>(
        index: usize,
        pointer: IfdPointer,
        reader: &mut SmartReader<R>,
        format: &Format,
        limits: &Limits,
        channel_len: u64,
    ) -> TiffResult<Page> {
        let directory = ifd::read_directory(reader, format, limits, pointer, channel_len)?;
        Self::from_directory(index, pointer, directory, format, channel_len)
    }

    /// Derive the page layout from an already parsed directory.
    pub(crate) fn from_directory(
        index: usize,
        pointer: IfdPointer,
        directory: Directory,
        format: &Format,
        channel_len: u64,
    ) -> TiffResult<Page> {
        let dir = &directory;

        let planar = match optional(dir, Tag::PlanarConfiguration) {
            Some(value) => match PlanarConfiguration::from_u16_exhaustive(value.into_u16()?) {
                PlanarConfiguration::Unknown(other) => {
                    return Err(StructuralError::UnknownPlanarConfiguration(other).into())
                }
                known => known,
            },
            None => PlanarConfiguration::Chunky,
        };

        let width = require(dir, Tag::ImageWidth)?.into_u64()?;
        let height = require(dir, Tag::ImageLength)?.into_u64()?;
        let depth = match optional(dir, Tag::ImageDepth) {
            Some(value) => value.into_u64()?.max(1),
            None => 1,
        };

        let samples = match optional(dir, Tag::SamplesPerPixel) {
            Some(value) => {
                let n = value.into_u16()?;
                if n == 0 {
                    warn!(index, "samples-per-pixel of zero treated as one");
                }
                n.max(1)
            }
            None => 1,
        };

        let mut bits_per_sample = match optional(dir, Tag::BitsPerSample) {
            Some(value) => value.into_u16_vec()?,
            None => vec![1],
        };
        if bits_per_sample.is_empty() {
            warn!(index, "empty bits-per-sample tag treated as one bit");
            bits_per_sample.push(1);
        }
        if bits_per_sample.len() == 1 && samples > 1 {
            bits_per_sample = vec![bits_per_sample[0]; usize::from(samples)];
        } else if bits_per_sample.len() != usize::from(samples) {
            warn!(
                index,
                entries = bits_per_sample.len(),
                samples,
                "bits-per-sample entries do not match the sample count"
            );
            let last = bits_per_sample[bits_per_sample.len() - 1];
            bits_per_sample.resize(usize::from(samples), last);
        }

        let mut sample_format = match optional(dir, Tag::SampleFormat) {
            Some(value) => value
                .into_u16_vec()?
                .into_iter()
                .map(SampleFormat::from_u16_exhaustive)
                .collect(),
            None => vec![SampleFormat::Uint],
        };
        if sample_format.is_empty() {
            sample_format.push(SampleFormat::Uint);
        }
        if sample_format.len() == 1 && samples > 1 {
            sample_format = vec![sample_format[0]; usize::from(samples)];
        } else if sample_format.len() != usize::from(samples) {
            warn!(
                index,
                entries = sample_format.len(),
                samples,
                "sample-format entries do not match the sample count"
            );
            let last = sample_format[sample_format.len() - 1];
            sample_format.resize(usize::from(samples), last);
        }

        let compression = match optional(dir, Tag::Compression) {
            Some(value) => CompressionMethod::from_u16_exhaustive(value.into_u16()?),
            None => CompressionMethod::None,
        };
        let photometric = match optional(dir, Tag::PhotometricInterpretation) {
            Some(value) => PhotometricInterpretation::from_u16_exhaustive(value.into_u16()?),
            None => {
                warn!(index, "missing photometric interpretation, assuming grayscale");
                PhotometricInterpretation::BlackIsZero
            }
        };
        let predictor = match optional(dir, Tag::Predictor) {
            Some(value) => Predictor::from_u16_exhaustive(value.into_u16()?),
            None => Predictor::None,
        };
        let fill_order = match optional(dir, Tag::FillOrder) {
            Some(value) => match FillOrder::from_u16_exhaustive(value.into_u16()?) {
                FillOrder::Unknown(other) => {
                    warn!(index, value = other, "unknown fill order treated as MSB first");
                    FillOrder::MsbFirst
                }
                known => known,
            },
            None => FillOrder::MsbFirst,
        };

        let chroma_subsampling = match optional(dir, Tag::ChromaSubsampling) {
            Some(value) => {
                let factors = value.into_u16_vec()?;
                match factors[..] {
                    [h, v, ..] => (h, v),
                    [h] => (h, h),
                    [] => (1, 1),
                }
            }
            None if photometric == PhotometricInterpretation::YCbCr => (2, 2),
            None => (1, 1),
        };

        let jpeg_tables = match optional(dir, Tag::JPEGTables) {
            Some(value) => {
                let tables = value.into_u8_vec()?;
                if tables.len() <= 4 {
                    warn!(index, len = tables.len(), "ignoring degenerate JPEG tables");
                    None
                } else {
                    Some(tables)
                }
            }
            None => None,
        };

        let sub_ifds = match optional(dir, Tag::SubIfd) {
            Some(value) => value
                .into_u64_vec()?
                .into_iter()
                .filter(|&offset| offset != 0)
                .map(IfdPointer)
                .collect(),
            None => Vec::new(),
        };

        // Tile tags win when a confused writer recorded both kinds of grid.
        let tiled = dir.contains(Tag::TileWidth);
        if tiled && dir.contains(Tag::StripOffsets) {
            warn!(index, "page carries both tile and strip tags, using tiles");
        }

        let layout = if tiled {
            let tile_width = require(dir, Tag::TileWidth)?.into_u64()?;
            let tile_length = require(dir, Tag::TileLength)?.into_u64()?;
            let tile_depth = match optional(dir, Tag::TileDepth) {
                Some(value) => value.into_u64()?.max(1),
                None => 1,
            };
            SegmentLayout {
                width: tile_width,
                length: tile_length,
                depth: tile_depth,
                across: if tile_width == 0 { 0 } else { width.div_ceil(tile_width) },
                down: if tile_length == 0 { 0 } else { height.div_ceil(tile_length) },
                deep: depth.div_ceil(tile_depth),
                tiled: true,
            }
        } else {
            let rows = match optional(dir, Tag::RowsPerStrip) {
                Some(value) => value.into_u64()?,
                None => height,
            };
            // A strip count of zero or one past the height both mean a
            // single strip of the whole image.
            let rows = rows.clamp(1, height.max(1));
            SegmentLayout {
                width,
                length: rows,
                depth: 1,
                across: 1,
                down: height.div_ceil(rows),
                deep: depth,
                tiled: false,
            }
        };

        let offsets_tag = if tiled { Tag::TileOffsets } else { Tag::StripOffsets };
        let counts_tag = if tiled { Tag::TileByteCounts } else { Tag::StripByteCounts };
        let segment_offsets = require(dir, offsets_tag)?.into_u64_vec()?;

        let planes: u64 = match planar {
            PlanarConfiguration::Planar => u64::from(samples),
            _ => 1,
        };
        let expected = layout.per_plane() * planes;
        if segment_offsets.len() as u64 != expected {
            warn!(
                index,
                listed = segment_offsets.len(),
                expected,
                "segment offset table does not match the derived grid"
            );
        }

        let segment_byte_counts = match optional(dir, counts_tag) {
            Some(value) => {
                let counts = value.into_u64_vec()?;
                if counts.len() != segment_offsets.len() {
                    return Err(StructuralError::InconsistentSegmentTables {
                        offsets: segment_offsets.len(),
                        byte_counts: counts.len(),
                    }
                    .into());
                }
                counts
            }
            None if compression == CompressionMethod::None => {
                warn!(index, "missing byte counts computed from the uncompressed layout");
                computed_byte_counts(
                    &layout,
                    &bits_per_sample,
                    planar,
                    height,
                    expected,
                    segment_offsets.len(),
                )
            }
            None => {
                warn!(
                    index,
                    "missing byte counts cannot be computed for compressed segments"
                );
                vec![0; segment_offsets.len()]
            }
        };

        let uniform_bits = uniform(&bits_per_sample);
        let uniform_format = uniform(&sample_format);
        let sample_type = match (uniform_format, uniform_bits) {
            (Some(format), Some(bits)) => SampleType::for_format(format, bits).ok(),
            (Some(SampleFormat::Uint), None)
                if bits_per_sample.iter().all(|&b| b > 0 && b <= 8) =>
            {
                // Mixed-depth unsigned tuples such as 5-6-5 unpack into
                // one byte per sample.
                Some(SampleType::U8)
            }
            _ => None,
        };

        let contiguous = compute_contiguous(
            format,
            compression,
            uniform_bits,
            &layout,
            width,
            height,
            depth,
            &segment_offsets,
            &segment_byte_counts,
        );
        let memory_mappable = is_memory_mappable(
            format,
            contiguous,
            sample_type,
            predictor,
            fill_order,
            channel_len,
        );

        let mut page = Page {
            index,
            pointer,
            directory,
            width,
            height,
            depth,
            samples,
            bits_per_sample,
            sample_format,
            sample_type,
            compression,
            photometric,
            planar,
            predictor,
            fill_order,
            chroma_subsampling,
            jpeg_tables,
            sub_ifds,
            layout,
            segment_offsets,
            segment_byte_counts,
            contiguous,
            memory_mappable,
            fingerprint: 0,
        };
        page.fingerprint = page.layout_hash();
        Ok(page)
    }

    /// Hash of the layout-defining fields. Stable across re-parses within
    /// one process, which is what re-resolution checks need.
    fn layout_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.pointer.0.hash(&mut hasher);
        self.width.hash(&mut hasher);
        self.height.hash(&mut hasher);
        self.depth.hash(&mut hasher);
        self.samples.hash(&mut hasher);
        self.bits_per_sample.hash(&mut hasher);
        for format in &self.sample_format {
            format.to_u16().hash(&mut hasher);
        }
        self.compression.to_u16().hash(&mut hasher);
        self.photometric.to_u16().hash(&mut hasher);
        self.planar.to_u16().hash(&mut hasher);
        self.predictor.to_u16().hash(&mut hasher);
        self.fill_order.to_u16().hash(&mut hasher);
        self.layout.hash(&mut hasher);
        (self.segment_offsets.len() as u64).hash(&mut hasher);
        hasher.finish()
    }

    /// Position of this page in the directory chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// File offset of the directory this page was parsed from.
    pub fn pointer(&self) -> IfdPointer {
        self.pointer
    }

    /// The parsed directory, including shadowed and dropped records.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub(crate) fn next(&self) -> Option<IfdPointer> {
        self.directory.next()
    }

    pub fn width(&self) -> u64 {
        self.width
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Number of depth slices, one unless the page is volumetric.
    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub fn samples(&self) -> u16 {
        self.samples
    }

    /// Storage bit depth of each sample, normalized to one entry per sample.
    pub fn bits_per_sample(&self) -> &[u16] {
        &self.bits_per_sample
    }

    /// Sample format of each sample, normalized to one entry per sample.
    pub fn sample_format(&self) -> &[SampleFormat] {
        &self.sample_format
    }

    /// The in-memory element samples decode into.
    pub fn sample_type(&self) -> TiffResult<SampleType> {
        if let Some(sample_type) = self.sample_type {
            return Ok(sample_type);
        }
        if self.sample_format.windows(2).any(|w| w[0] != w[1]) {
            return Err(TiffUnsupportedError::InconsistentSampleFormat.into());
        }
        Err(TiffUnsupportedError::UnsupportedSampleType {
            format: self.sample_format[0],
            bits: self.bits_per_sample[0],
        }
        .into())
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    pub fn photometric(&self) -> PhotometricInterpretation {
        self.photometric
    }

    pub fn planar_configuration(&self) -> PlanarConfiguration {
        self.planar
    }

    pub fn predictor(&self) -> Predictor {
        self.predictor
    }

    pub fn fill_order(&self) -> FillOrder {
        self.fill_order
    }

    /// Horizontal and vertical chroma subsampling factors.
    pub fn chroma_subsampling(&self) -> (u16, u16) {
        self.chroma_subsampling
    }

    pub(crate) fn is_subsampled(&self) -> bool {
        self.photometric == PhotometricInterpretation::YCbCr
            && self.chroma_subsampling != (1, 1)
    }

    /// Shared JPEG tables for new-style JPEG pages.
    pub fn jpeg_tables(&self) -> Option<&[u8]> {
        self.jpeg_tables.as_deref()
    }

    /// Offsets of child directories listed in the sub-IFD tag.
    pub fn sub_ifds(&self) -> &[IfdPointer] {
        &self.sub_ifds
    }

    /// Free-text description, if the page carries one.
    pub fn description(&self) -> Option<String> {
        optional(&self.directory, Tag::ImageDescription).and_then(|v| v.into_string().ok())
    }

    /// Name of the writing software, if the page carries it.
    pub fn software(&self) -> Option<String> {
        optional(&self.directory, Tag::Software).and_then(|v| v.into_string().ok())
    }

    /// The segment grid of this page.
    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    /// Number of separately stored planes.
    pub fn planes(&self) -> u64 {
        match self.planar {
            PlanarConfiguration::Planar => u64::from(self.samples),
            _ => 1,
        }
    }

    /// Number of segments the grid calls for, across all planes.
    pub(crate) fn expected_segments(&self) -> u64 {
        self.layout.per_plane() * self.planes()
    }

    /// Raw segment offsets as listed in the directory.
    pub fn segment_offsets(&self) -> &[u64] {
        &self.segment_offsets
    }

    /// Raw segment byte counts, computed from the layout when the directory
    /// omitted them for uncompressed data.
    pub fn segment_byte_counts(&self) -> &[u64] {
        &self.segment_byte_counts
    }

    /// The single `(offset, length)` run when all segments abut in the file.
    pub fn contiguous(&self) -> Option<(u64, u64)> {
        self.contiguous
    }

    /// True when segment data forms one unbroken byte run.
    pub fn is_contiguous(&self) -> bool {
        self.contiguous.is_some()
    }

    /// True when the decoded buffer can be a view of the file mapping.
    pub fn is_memory_mappable(&self) -> bool {
        self.memory_mappable
    }

    /// Hash of the derived layout, stable within a process.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Storage bit depth shared by all samples, if they agree.
    pub(crate) fn uniform_bits(&self) -> Option<u16> {
        uniform(&self.bits_per_sample)
    }

    /// Bits of one whole pixel with its samples interleaved.
    pub(crate) fn bits_per_pixel(&self) -> u64 {
        self.bits_per_sample.iter().map(|&b| u64::from(b)).sum()
    }

    /// Bits of one pixel within the plane holding `plane`.
    pub(crate) fn plane_bits(&self, plane: u64) -> u64 {
        match self.planar {
            PlanarConfiguration::Planar => self
                .bits_per_sample
                .get(plane as usize)
                .copied()
                .map(u64::from)
                .unwrap_or(0),
            _ => self.bits_per_pixel(),
        }
    }

    /// The six fixed layout slots: planes, separate samples, depth, height,
    /// width and interleaved samples. Slot order never changes with the
    /// storage configuration.
    pub fn shaped(&self) -> [u64; 6] {
        let (separate, interleaved) = match self.planar {
            PlanarConfiguration::Planar if self.samples > 1 => (u64::from(self.samples), 1),
            _ => (1, u64::from(self.samples)),
        };
        [1, separate, self.depth, self.height, self.width, interleaved]
    }

    /// Public shape and axis labels with size-one depth and sample axes
    /// dropped.
    pub fn shape(&self) -> Vec<u64> {
        self.shape_with(true).0
    }

    /// Axis labels matching [`Page::shape`].
    pub fn axes(&self) -> String {
        self.shape_with(true).1
    }

    /// Shape and axis labels, optionally keeping size-one depth and sample
    /// axes. Rows and columns are always present.
    pub fn shape_with(&self, squeeze: bool) -> (Vec<u64>, String) {
        let separate = self.planar == PlanarConfiguration::Planar && self.samples > 1;
        let mut dims: Vec<(u64, char)> = Vec::with_capacity(4);
        if separate {
            dims.push((u64::from(self.samples), 'S'));
        }
        dims.push((self.depth, 'Z'));
        dims.push((self.height, 'Y'));
        dims.push((self.width, 'X'));
        if !separate {
            dims.push((u64::from(self.samples), 'S'));
        }
        if squeeze {
            dims.retain(|&(size, axis)| matches!(axis, 'Y' | 'X') || size != 1);
        }
        let shape = dims.iter().map(|&(size, _)| size).collect();
        let axes = dims.iter().map(|&(_, axis)| axis).collect();
        (shape, axes)
    }
}

fn uniform<T: Copy + PartialEq>(values: &[T]) -> Option<T> {
    let first = *values.first()?;
    values.iter().all(|v| *v == first).then_some(first)
}

/// Byte counts of an uncompressed page, derived from the grid. Rows pack to
/// whole bytes; tiles are always full size while the last strip may be
/// short. Entries past the derived grid get a zero count.
fn computed_byte_counts(
    layout: &SegmentLayout,
    bits_per_sample: &[u16],
    planar: PlanarConfiguration,
    height: u64,
    expected: u64,
    listed: usize,
) -> Vec<u64> {
    let plane_bits = |plane: u64| -> u64 {
        match planar {
            PlanarConfiguration::Planar => bits_per_sample
                .get(plane as usize)
                .copied()
                .map(u64::from)
                .unwrap_or(0),
            _ => bits_per_sample.iter().map(|&b| u64::from(b)).sum(),
        }
    };
    (0..listed as u64)
        .map(|index| {
            if index >= expected {
                return 0;
            }
            let (plane, _, row, _) = layout.coords(index);
            let rows = if layout.tiled {
                layout.length
            } else {
                layout.length.min(height - row * layout.length)
            };
            packed_row_bytes(layout.width, plane_bits(plane))
                .and_then(|row_bytes| row_bytes.checked_mul(rows))
                .and_then(|slice| slice.checked_mul(layout.depth))
                .unwrap_or(0)
        })
        .collect()
}

/// Detect whether the segments form one unbroken byte run.
///
/// Requires uncompressed data at a whole-byte depth and, for tiles, a grid
/// that tiles the image exactly. The wide-offset dialect writes zero byte
/// counts for segments it skipped; those are ignorable gaps in the run.
#[allow(clippy::too_many_arguments)]
fn compute_contiguous(
    format: &Format,
    compression: CompressionMethod,
    uniform_bits: Option<u16>,
    layout: &SegmentLayout,
    width: u64,
    height: u64,
    depth: u64,
    offsets: &[u64],
    byte_counts: &[u64],
) -> Option<(u64, u64)> {
    if compression != CompressionMethod::None {
        return None;
    }
    if !matches!(uniform_bits, Some(8 | 16 | 32 | 64)) {
        return None;
    }
    if layout.tiled
        && (layout.width != width
            || layout.length == 0
            || height % layout.length != 0
            || depth % layout.depth != 0)
    {
        return None;
    }

    let mut run: Option<(u64, u64)> = None;
    for (&offset, &count) in offsets.iter().zip(byte_counts) {
        if count == 0 {
            if format.caps.sparse_segment_gaps {
                continue;
            }
            return None;
        }
        run = match run {
            None => Some((offset, count)),
            Some((start, total)) if start.checked_add(total) == Some(offset) => {
                Some((start, total.checked_add(count)?))
            }
            Some(_) => return None,
        };
    }
    run
}

/// A mappable page additionally needs the file's byte order to match the
/// host, untouched bits on disk and an element-aligned run inside the
/// channel.
fn is_memory_mappable(
    format: &Format,
    contiguous: Option<(u64, u64)>,
    sample_type: Option<SampleType>,
    predictor: Predictor,
    fill_order: FillOrder,
    channel_len: u64,
) -> bool {
    let Some((start, len)) = contiguous else {
        return false;
    };
    let Some(sample_type) = sample_type else {
        return false;
    };
    format.is_native()
        && predictor == Predictor::None
        && fill_order == FillOrder::MsbFirst
        && start % sample_type.byte_len() as u64 == 0
        && start.checked_add(len).is_some_and(|end| end <= channel_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::ifd::TagEntry;
    use crate::error::TiffError;
    use crate::format::Dialect;
    use crate::tags::Type;
    use std::io::Cursor;

    fn classic_le() -> Format {
        let header = b"II\x2a\x00\x08\x00\x00\x00";
        Format::from_reader(&mut Cursor::new(&header[..]), Dialect::Generic)
            .unwrap()
            .0
    }

    fn classic_be() -> Format {
        let header = b"MM\x00\x2a\x00\x00\x00\x08";
        Format::from_reader(&mut Cursor::new(&header[..]), Dialect::Generic)
            .unwrap()
            .0
    }

    fn ndpi() -> Format {
        let header = b"II\x2a\x00\x10\x00\x00\x00\x00\x00\x00\x00";
        Format::from_reader(&mut Cursor::new(&header[..]), Dialect::Ndpi)
            .unwrap()
            .0
    }

    fn entry(value: Value) -> TagEntry {
        let count = match &value {
            Value::List(list) => list.len() as u64,
            Value::Ascii(text) => text.len() as u64 + 1,
            _ => 1,
        };
        TagEntry {
            kind: Type::LONG,
            count,
            value,
            value_offset: None,
        }
    }

    fn shorts(values: &[u16]) -> Value {
        Value::List(values.iter().map(|&v| Value::Short(v)).collect())
    }

    fn longs(values: &[u32]) -> Value {
        Value::List(values.iter().map(|&v| Value::Unsigned(v)).collect())
    }

    fn directory(tags: Vec<(Tag, Value)>) -> Directory {
        let mut dir = Directory::empty();
        for (tag, value) in tags {
            dir.insert(tag.to_u16(), entry(value));
        }
        dir
    }

    fn base_strips() -> Vec<(Tag, Value)> {
        vec![
            (Tag::ImageWidth, Value::Unsigned(100)),
            (Tag::ImageLength, Value::Unsigned(80)),
            (Tag::BitsPerSample, shorts(&[8])),
            (Tag::RowsPerStrip, Value::Unsigned(34)),
            (Tag::StripOffsets, longs(&[1000, 4400, 7800])),
            (Tag::StripByteCounts, longs(&[3400, 3400, 1200])),
        ]
    }

    fn page(format: &Format, tags: Vec<(Tag, Value)>) -> TiffResult<Page> {
        Page::from_directory(0, IfdPointer(8), directory(tags), format, 1 << 20)
    }

    #[test]
    fn strip_grid_and_shape() {
        let page = page(&classic_le(), base_strips()).unwrap();
        assert_eq!(page.layout().down, 3);
        assert_eq!(page.layout().length, 34);
        assert_eq!(page.expected_segments(), 3);
        assert_eq!(page.shaped(), [1, 1, 1, 80, 100, 1]);
        assert_eq!(page.shape(), vec![80, 100]);
        assert_eq!(page.axes(), "YX");
        assert_eq!(page.sample_type().unwrap(), SampleType::U8);
    }

    #[test]
    fn chunky_samples_trail_the_shape() {
        let mut tags = base_strips();
        tags.push((Tag::SamplesPerPixel, Value::Short(3)));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.bits_per_sample(), &[8, 8, 8]);
        assert_eq!(page.shaped(), [1, 1, 1, 80, 100, 3]);
        assert_eq!(page.shape(), vec![80, 100, 3]);
        assert_eq!(page.axes(), "YXS");
    }

    #[test]
    fn separate_planes_lead_the_shape() {
        let mut tags = base_strips();
        tags.push((Tag::SamplesPerPixel, Value::Short(3)));
        tags.push((Tag::PlanarConfiguration, Value::Short(2)));
        tags.push((
            Tag::StripOffsets,
            longs(&[1000, 4400, 7800, 11200, 14600, 18000, 21400, 24800, 28200]),
        ));
        tags.push((
            Tag::StripByteCounts,
            longs(&[3400, 3400, 1200, 3400, 3400, 1200, 3400, 3400, 1200]),
        ));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.planes(), 3);
        assert_eq!(page.expected_segments(), 9);
        assert_eq!(page.shaped(), [1, 3, 1, 80, 100, 1]);
        assert_eq!(page.shape(), vec![3, 80, 100]);
        assert_eq!(page.axes(), "SYX");
    }

    #[test]
    fn unsqueezed_shape_keeps_unit_axes() {
        let page = page(&classic_le(), base_strips()).unwrap();
        let (shape, axes) = page.shape_with(false);
        assert_eq!(shape, vec![1, 80, 100, 1]);
        assert_eq!(axes, "ZYXS");
    }

    #[test]
    fn volumetric_pages_keep_the_depth_axis() {
        let mut tags = base_strips();
        tags.push((Tag::ImageDepth, Value::Unsigned(5)));
        tags.push((
            Tag::StripOffsets,
            longs(&[
                1000, 4400, 7800, 11200, 14600, 18000, 21400, 24800, 28200, 31600, 35000, 38400,
                41800, 45200, 48600,
            ]),
        ));
        tags.push((
            Tag::StripByteCounts,
            longs(&[
                3400, 3400, 1200, 3400, 3400, 1200, 3400, 3400, 1200, 3400, 3400, 1200, 3400,
                3400, 1200,
            ]),
        ));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.layout().deep, 5);
        assert_eq!(page.expected_segments(), 15);
        assert_eq!(page.shape(), vec![5, 80, 100]);
        assert_eq!(page.axes(), "ZYX");
    }

    #[test]
    fn missing_byte_counts_are_computed() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::StripByteCounts);
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.segment_byte_counts(), &[3400, 3400, 1200]);
    }

    #[test]
    fn missing_byte_counts_for_compressed_data_are_zero() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::StripByteCounts);
        tags.push((Tag::Compression, Value::Short(5)));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.segment_byte_counts(), &[0, 0, 0]);
        assert!(!page.is_contiguous());
    }

    #[test]
    fn adjacent_strips_are_contiguous() {
        let page = page(&classic_le(), base_strips()).unwrap();
        assert_eq!(page.contiguous(), Some((1000, 8000)));
    }

    #[test]
    fn gapped_strips_are_not_contiguous() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::StripOffsets);
        tags.push((Tag::StripOffsets, longs(&[1000, 4400, 9000])));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.contiguous(), None);
    }

    #[test]
    fn zero_count_gaps_are_ignored_in_the_wide_offset_dialect() {
        let tags = vec![
            (Tag::ImageWidth, Value::Unsigned(100)),
            (Tag::ImageLength, Value::Unsigned(80)),
            (Tag::BitsPerSample, shorts(&[8])),
            (Tag::RowsPerStrip, Value::Unsigned(34)),
            (Tag::StripOffsets, longs(&[1000, 123, 4400])),
            (Tag::StripByteCounts, longs(&[3400, 0, 4600])),
        ];
        let generic = page(&classic_le(), tags.clone()).unwrap();
        assert_eq!(generic.contiguous(), None);
        let ndpi = page(&ndpi(), tags).unwrap();
        assert_eq!(ndpi.contiguous(), Some((1000, 8000)));
    }

    #[test]
    fn mappable_needs_native_order_and_alignment() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::BitsPerSample);
        tags.push((Tag::BitsPerSample, shorts(&[16])));
        let le = page(&classic_le(), tags.clone()).unwrap();
        let be = page(&classic_be(), tags.clone()).unwrap();
        assert!(le.is_contiguous());
        if cfg!(target_endian = "little") {
            assert!(le.is_memory_mappable());
            assert!(!be.is_memory_mappable());
        } else {
            assert!(!le.is_memory_mappable());
        }

        // Same run shifted to an odd start offset can no longer be viewed
        // as aligned 16-bit elements.
        tags.retain(|(tag, _)| *tag != Tag::StripOffsets);
        tags.push((Tag::StripOffsets, longs(&[1001, 4401, 7801])));
        let odd = page(&classic_le(), tags).unwrap();
        assert!(odd.is_contiguous());
        assert!(!odd.is_memory_mappable());
    }

    #[test]
    fn predictor_disables_mapping_but_not_contiguity() {
        let mut tags = base_strips();
        tags.push((Tag::Predictor, Value::Short(2)));
        let page = page(&classic_le(), tags).unwrap();
        assert!(page.is_contiguous());
        assert!(!page.is_memory_mappable());
    }

    #[test]
    fn tiled_grid_geometry() {
        let tags = vec![
            (Tag::ImageWidth, Value::Unsigned(100)),
            (Tag::ImageLength, Value::Unsigned(80)),
            (Tag::BitsPerSample, shorts(&[8])),
            (Tag::TileWidth, Value::Unsigned(32)),
            (Tag::TileLength, Value::Unsigned(32)),
            (Tag::TileOffsets, longs(&[0u32; 12])),
            (Tag::TileByteCounts, longs(&[1024; 12])),
        ];
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.layout().across, 4);
        assert_eq!(page.layout().down, 3);
        assert!(page.layout().tiled);
        assert_eq!(page.expected_segments(), 12);
        assert_eq!(page.layout().coords(7), (0, 0, 1, 3));
    }

    #[test]
    fn tile_byte_counts_are_full_tiles() {
        let tags = vec![
            (Tag::ImageWidth, Value::Unsigned(100)),
            (Tag::ImageLength, Value::Unsigned(80)),
            (Tag::BitsPerSample, shorts(&[8])),
            (Tag::TileWidth, Value::Unsigned(32)),
            (Tag::TileLength, Value::Unsigned(32)),
            (
                Tag::TileOffsets,
                longs(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
            ),
        ];
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.segment_byte_counts(), &[1024u64; 12][..]);
    }

    #[test]
    fn missing_width_is_a_required_tag_error() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::ImageWidth);
        let err = page(&classic_le(), tags).unwrap_err();
        assert!(matches!(
            err,
            TiffError::StructuralError(StructuralError::RequiredTagNotFound(Tag::ImageWidth))
        ));
    }

    #[test]
    fn dropped_required_tag_escalates() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::ImageWidth);
        let mut dir = directory(tags);
        dir.note_failed(
            Tag::ImageWidth.to_u16(),
            crate::error::TagDecodeError::TruncatedValue,
        );
        let err =
            Page::from_directory(0, IfdPointer(8), dir, &classic_le(), 1 << 20).unwrap_err();
        assert!(matches!(
            err,
            TiffError::StructuralError(StructuralError::RequiredTagUndecodable(
                Tag::ImageWidth,
                _
            ))
        ));
    }

    #[test]
    fn mismatched_tables_are_rejected() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::StripByteCounts);
        tags.push((Tag::StripByteCounts, longs(&[3400, 3400])));
        let err = page(&classic_le(), tags).unwrap_err();
        assert!(matches!(
            err,
            TiffError::StructuralError(StructuralError::InconsistentSegmentTables {
                offsets: 3,
                byte_counts: 2,
            })
        ));
    }

    #[test]
    fn unknown_planar_configuration_is_fatal() {
        let mut tags = base_strips();
        tags.push((Tag::PlanarConfiguration, Value::Short(3)));
        let err = page(&classic_le(), tags).unwrap_err();
        assert!(matches!(
            err,
            TiffError::StructuralError(StructuralError::UnknownPlanarConfiguration(3))
        ));
    }

    #[test]
    fn mixed_depth_unsigned_tuple_decodes_to_bytes() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::BitsPerSample);
        tags.push((Tag::SamplesPerPixel, Value::Short(3)));
        tags.push((Tag::BitsPerSample, shorts(&[5, 6, 5])));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.sample_type().unwrap(), SampleType::U8);
        assert_eq!(page.uniform_bits(), None);
        assert_eq!(page.bits_per_pixel(), 16);
    }

    #[test]
    fn float_and_void_formats_resolve() {
        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::BitsPerSample);
        tags.push((Tag::BitsPerSample, shorts(&[32])));
        tags.push((Tag::SampleFormat, shorts(&[3])));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.sample_type().unwrap(), SampleType::F32);

        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::BitsPerSample);
        tags.push((Tag::BitsPerSample, shorts(&[12])));
        tags.push((Tag::SampleFormat, shorts(&[4])));
        let page = self::page(&classic_le(), tags).unwrap();
        assert_eq!(page.sample_type().unwrap(), SampleType::U16);
    }

    #[test]
    fn mixed_sample_formats_are_reported() {
        let mut tags = base_strips();
        tags.push((Tag::SamplesPerPixel, Value::Short(2)));
        tags.push((Tag::SampleFormat, shorts(&[1, 2])));
        let err = page(&classic_le(), tags).unwrap().sample_type().unwrap_err();
        assert!(matches!(
            err,
            TiffError::UnsupportedError(TiffUnsupportedError::InconsistentSampleFormat)
        ));
    }

    #[test]
    fn ycbcr_defaults_to_two_by_two_subsampling() {
        let mut tags = base_strips();
        tags.push((Tag::PhotometricInterpretation, Value::Short(6)));
        let page = page(&classic_le(), tags).unwrap();
        assert_eq!(page.chroma_subsampling(), (2, 2));
        assert!(page.is_subsampled());
    }

    #[test]
    fn fingerprint_tracks_layout_changes() {
        let a = page(&classic_le(), base_strips()).unwrap();
        let b = page(&classic_le(), base_strips()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut tags = base_strips();
        tags.retain(|(tag, _)| *tag != Tag::ImageLength);
        tags.push((Tag::ImageLength, Value::Unsigned(81)));
        let c = page(&classic_le(), tags).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
