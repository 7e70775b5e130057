//! The document layer: lazy random access to the pages of a TIFF stack.
//!
//! A [`TiffStack`] owns a shared channel and a registry of chain slots. The
//! chain walk touches only directory headers and next-pointers, so opening
//! a file with thousands of pages stays cheap; a slot is materialized into
//! a full [`Page`] (or a light [`Frame`] bound to the selected keyframe)
//! the first time it is requested.

use std::io::{self, Read, Seek};

use self::chain::{Chain, Slot, WalkState};
use self::stream::SmartReader;
use crate::channel::{Channel, SharedChannel};
use crate::directory::Directory;
use crate::error::{StructuralError, TiffResult, UsageError};
use crate::format::{Dialect, Format};
use crate::tags::{
    CompressionMethod, FillOrder, IfdPointer, PhotometricInterpretation, PlanarConfiguration,
    Predictor, SampleFormat, Tag,
};
use crate::SampleType;

mod chain;
mod decode;
mod frame;
pub mod ifd;
mod page;
mod predictor;
pub(crate) mod stream;

pub use self::decode::{DecodeOptions, DecodedImage, DecodingResult, ImageData, MappedData};
pub use self::frame::Frame;
pub use self::page::{Page, SegmentLayout};

/// Decoding limits, all in bytes.
#[derive(Debug, Clone)]
pub struct Limits {
    /// The maximum size of any decoded sample buffer. Defaults to 256 MiB.
    pub decoding_buffer_size: usize,
    /// The maximum size of any single out-of-line tag value.
    /// Defaults to 1 MiB.
    pub ifd_value_size: usize,
    /// The maximum size of the scratch buffers a single segment may need
    /// while it is decompressed and unpacked. Defaults to 128 MiB.
    pub intermediate_buffer_size: usize,
    /// The purpose of this is to prevent all the fields of the struct from
    /// being public, as this would make adding new fields a major version
    /// bump.
    _non_exhaustive: (),
}

impl Limits {
    /// A set of limits that is completely unbounded: nothing is checked
    /// against a maximum. Use only on trusted input.
    pub fn unlimited() -> Limits {
        Limits {
            decoding_buffer_size: usize::MAX,
            ifd_value_size: usize::MAX,
            intermediate_buffer_size: usize::MAX,
            _non_exhaustive: (),
        }
    }
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            decoding_buffer_size: 256 * 1024 * 1024,
            intermediate_buffer_size: 128 * 1024 * 1024,
            ifd_value_size: 1024 * 1024,
            _non_exhaustive: (),
        }
    }
}

/// Builder for opening a [`TiffStack`] with a vendor dialect or custom
/// limits.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    dialect: Dialect,
    limits: Limits,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the container under the given vendor dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Open a stack over an exclusive channel.
    pub fn open<C: Channel>(self, channel: C) -> TiffResult<TiffStack<C>> {
        self.open_shared(SharedChannel::new(channel))
    }

    /// Open a stack over a channel that other readers may also hold, such
    /// as one handed out by a [`crate::channel::FileCache`].
    pub fn open_shared<C: Channel>(self, channel: SharedChannel<C>) -> TiffResult<TiffStack<C>> {
        let (format, first, channel_len) = {
            let mut guard = channel.lock();
            let channel_len = guard.seek(io::SeekFrom::End(0))?;
            guard.seek(io::SeekFrom::Start(0))?;
            let (format, first) = Format::from_reader(&mut *guard, self.dialect)?;
            (format, first, channel_len)
        };
        let first = (first.0 != 0).then_some(first);
        Ok(TiffStack {
            channel,
            channel_len,
            format,
            limits: self.limits,
            chain: Chain::new(first),
        })
    }
}

/// A multi-page TIFF, BigTIFF or vendor-dialect container open for random
/// page access.
///
/// ```no_run
/// use tiffstack::decoder::{DecodeOptions, TiffStack};
///
/// # fn main() -> tiffstack::TiffResult<()> {
/// let file = std::fs::File::open("stack.tif")?;
/// let mut stack = TiffStack::open(file)?;
/// println!("{} pages", stack.page_count()?);
/// let page = stack.page(0)?;
/// let image = page.decode(&DecodeOptions::new())?;
/// # let _ = image;
/// # Ok(())
/// # }
/// ```
pub struct TiffStack<C: Channel> {
    channel: SharedChannel<C>,
    channel_len: u64,
    format: Format,
    limits: Limits,
    chain: Chain,
}

impl<C: Channel> TiffStack<C> {
    /// Open with the generic dialect and default limits.
    pub fn open(channel: C) -> TiffResult<TiffStack<C>> {
        OpenOptions::new().open(channel)
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Whether the whole chain has been discovered, either by walking to
    /// its end or by engaging an offset stride.
    pub fn is_fully_indexed(&self) -> bool {
        self.chain.state() == WalkState::Indexed
    }

    /// Total number of pages. Walks the remainder of the chain on first
    /// call; afterwards the count is served from the registry.
    pub fn page_count(&mut self) -> TiffResult<usize> {
        let mut guard = self.channel.lock();
        let mut reader = SmartReader::wrap(&mut *guard, self.format.byte_order());
        self.chain
            .ensure_all(&mut reader, &self.format, self.channel_len)
    }

    /// The page at `index`, materializing it on first access.
    ///
    /// Without a keyframe selected this resolves a full [`Page`]. With a
    /// keyframe selected, other pending slots resolve as light [`Frame`]s
    /// carrying only their own segment tables. Slots resolved earlier are
    /// returned as they are.
    pub fn page(&mut self, index: usize) -> TiffResult<PageView<'_, C>> {
        if !self.ensure_slot(index)? {
            return Err(UsageError::PageIndexOutOfRange {
                index,
                page_count: self.chain.len(),
            }
            .into());
        }

        match self.chain.keyframe() {
            Some(keyframe) if keyframe != index => {
                self.ensure_page_at(keyframe)?;
                if matches!(self.chain.slot(index), Some(Slot::Pending(_))) {
                    self.materialize_frame_at(index, keyframe)?;
                }
            }
            // A frame resolved under an earlier selection stays a frame.
            _ if matches!(self.chain.slot(index), Some(Slot::Frame(_))) => {}
            _ => self.ensure_page_at(index)?,
        }

        // A frame's keyframe may have been evicted since the frame was
        // built; bring it back and verify its layout hash.
        let bound = match self.chain.slot(index) {
            Some(Slot::Frame(frame)) => frame.keyframe(),
            _ => None,
        };
        if let Some((kf_index, fingerprint)) = bound {
            if !matches!(self.chain.slot(kf_index), Some(Slot::Page(_))) {
                self.ensure_page_at(kf_index)?;
            }
            let current = match self.chain.slot(kf_index) {
                Some(Slot::Page(page)) => page.fingerprint(),
                _ => unreachable!(),
            };
            if current != fingerprint {
                return Err(StructuralError::FingerprintMismatch { index: kf_index }.into());
            }
        }

        match self.chain.slot(index) {
            Some(Slot::Page(page)) => Ok(PageView {
                doc: self,
                record: Record::Page(page),
            }),
            Some(Slot::Frame(frame)) => {
                let (kf_index, _) = frame
                    .keyframe()
                    .ok_or(UsageError::KeyframeNotAssigned { frame: index })?;
                let keyframe = match self.chain.slot(kf_index) {
                    Some(Slot::Page(page)) => &**page,
                    _ => unreachable!(),
                };
                Ok(PageView {
                    doc: self,
                    record: Record::Frame { frame, keyframe },
                })
            }
            _ => unreachable!(),
        }
    }

    /// Like [`TiffStack::page`], additionally checking the resolved record
    /// against a fingerprint the caller obtained earlier.
    pub fn page_with_fingerprint(
        &mut self,
        index: usize,
        fingerprint: u64,
    ) -> TiffResult<PageView<'_, C>> {
        let view = self.page(index)?;
        if view.fingerprint() != fingerprint {
            return Err(StructuralError::FingerprintMismatch { index }.into());
        }
        Ok(view)
    }

    /// Select the page at `index` as the keyframe for subsequent accesses,
    /// materializing it as a full page if needed.
    pub fn set_keyframe(&mut self, index: usize) -> TiffResult<()> {
        if !self.ensure_slot(index)? {
            return Err(UsageError::PageIndexOutOfRange {
                index,
                page_count: self.chain.len(),
            }
            .into());
        }
        self.ensure_page_at(index)?;
        self.chain.set_keyframe(Some(index));
        Ok(())
    }

    /// The currently selected keyframe index. Callers that change the
    /// selection temporarily can save this and restore it afterwards.
    pub fn keyframe(&self) -> Option<usize> {
        self.chain.keyframe()
    }

    pub fn clear_keyframe(&mut self) {
        self.chain.set_keyframe(None);
    }

    /// Drop the materialized record at `index` back to its raw offset. The
    /// selected keyframe is pinned and cannot be evicted.
    pub fn evict(&mut self, index: usize) -> TiffResult<()> {
        if index >= self.chain.len() {
            return Err(UsageError::PageIndexOutOfRange {
                index,
                page_count: self.chain.len(),
            }
            .into());
        }
        if self.chain.keyframe() == Some(index) {
            return Err(UsageError::KeyframePinned { index }.into());
        }
        self.chain.demote(index);
        Ok(())
    }

    fn ensure_slot(&mut self, index: usize) -> TiffResult<bool> {
        let mut guard = self.channel.lock();
        let mut reader = SmartReader::wrap(&mut *guard, self.format.byte_order());
        self.chain
            .ensure(index, &mut reader, &self.format, self.channel_len)
    }

    /// Materialize a full page at `index`, replacing a pending or frame
    /// slot. The slot must exist.
    fn ensure_page_at(&mut self, index: usize) -> TiffResult<()> {
        if matches!(self.chain.slot(index), Some(Slot::Page(_))) {
            return Ok(());
        }
        let pointer = match self.chain.slot(index) {
            Some(slot) => slot.pointer(),
            None => {
                return Err(UsageError::PageIndexOutOfRange {
                    index,
                    page_count: self.chain.len(),
                }
                .into())
            }
        };
        let page = {
            let mut guard = self.channel.lock();
            let mut reader = SmartReader::wrap(&mut *guard, self.format.byte_order());
            Page::materialize(
                index,
                pointer,
                &mut reader,
                &self.format,
                &self.limits,
                self.channel_len,
            )?
        };
        self.verify_stride(index, page.next())?;
        *self.chain.slot_mut(index).unwrap() = Slot::Page(Box::new(page));
        Ok(())
    }

    fn materialize_frame_at(&mut self, index: usize, kf_index: usize) -> TiffResult<()> {
        let pointer = match self.chain.slot(index) {
            Some(slot) => slot.pointer(),
            None => {
                return Err(UsageError::PageIndexOutOfRange {
                    index,
                    page_count: self.chain.len(),
                }
                .into())
            }
        };
        let frame = {
            let keyframe = match self.chain.slot(kf_index) {
                Some(Slot::Page(page)) => &**page,
                _ => unreachable!(),
            };
            let mut guard = self.channel.lock();
            let mut reader = SmartReader::wrap(&mut *guard, self.format.byte_order());
            Frame::materialize(
                index,
                pointer,
                keyframe,
                &mut reader,
                &self.format,
                &self.limits,
                self.channel_len,
            )?
        };
        self.verify_stride(index, frame.next())?;
        *self.chain.slot_mut(index).unwrap() = Slot::Frame(frame);
        Ok(())
    }

    /// When a slot's offset was synthesized from an equal stride, the
    /// parsed next-pointer must agree with the synthesized successor.
    fn verify_stride(&self, index: usize, parsed_next: Option<IfdPointer>) -> TiffResult<()> {
        if !self.chain.is_synthesized(index) {
            return Ok(());
        }
        if let Some(expected) = self.chain.stride_expectation(index) {
            let found = parsed_next.map_or(0, |pointer| pointer.0);
            if found != expected.0 {
                return Err(StructuralError::BrokenStride {
                    expected: expected.0,
                    found,
                }
                .into());
            }
        }
        Ok(())
    }
}

enum Record<'a> {
    Page(&'a Page),
    Frame { frame: &'a Frame, keyframe: &'a Page },
}

/// A resolved page of the stack, borrowed from its document.
///
/// Layout accessors on a light frame answer from the bound keyframe; only
/// the segment tables (and index and pointer) are the frame's own.
pub struct PageView<'a, C: Channel> {
    doc: &'a TiffStack<C>,
    record: Record<'a>,
}

impl<'a, C: Channel> PageView<'a, C> {
    fn effective(&self) -> &Page {
        match &self.record {
            Record::Page(page) => page,
            Record::Frame { keyframe, .. } => keyframe,
        }
    }

    /// Position of this page in the chain.
    pub fn index(&self) -> usize {
        match &self.record {
            Record::Page(page) => page.index(),
            Record::Frame { frame, .. } => frame.index(),
        }
    }

    /// Offset of this page's directory in the channel.
    pub fn pointer(&self) -> IfdPointer {
        match &self.record {
            Record::Page(page) => page.pointer(),
            Record::Frame { frame, .. } => frame.pointer(),
        }
    }

    pub fn is_light_frame(&self) -> bool {
        matches!(self.record, Record::Frame { .. })
    }

    /// Index of the keyframe this view answers layout questions from, for
    /// light frames.
    pub fn keyframe_index(&self) -> Option<usize> {
        match &self.record {
            Record::Page(_) => None,
            Record::Frame { frame, .. } => frame.keyframe().map(|(index, _)| index),
        }
    }

    pub fn width(&self) -> u64 {
        self.effective().width()
    }

    pub fn height(&self) -> u64 {
        self.effective().height()
    }

    pub fn depth(&self) -> u64 {
        self.effective().depth()
    }

    pub fn samples(&self) -> u16 {
        self.effective().samples()
    }

    pub fn bits_per_sample(&self) -> &[u16] {
        self.effective().bits_per_sample()
    }

    pub fn sample_format(&self) -> &[SampleFormat] {
        self.effective().sample_format()
    }

    /// The element type decoded buffers will use.
    pub fn sample_type(&self) -> TiffResult<SampleType> {
        self.effective().sample_type()
    }

    pub fn compression(&self) -> CompressionMethod {
        self.effective().compression()
    }

    pub fn photometric(&self) -> PhotometricInterpretation {
        self.effective().photometric()
    }

    pub fn planar_configuration(&self) -> PlanarConfiguration {
        self.effective().planar_configuration()
    }

    pub fn predictor(&self) -> Predictor {
        self.effective().predictor()
    }

    pub fn fill_order(&self) -> FillOrder {
        self.effective().fill_order()
    }

    pub fn chroma_subsampling(&self) -> (u16, u16) {
        self.effective().chroma_subsampling()
    }

    pub fn layout(&self) -> &SegmentLayout {
        self.effective().layout()
    }

    /// The normalized six-slot shape; see [`Page::shaped`].
    pub fn shaped(&self) -> [u64; 6] {
        self.effective().shaped()
    }

    /// The public squeezed shape.
    pub fn shape(&self) -> Vec<u64> {
        self.effective().shape()
    }

    /// Axis labels matching [`PageView::shape`].
    pub fn axes(&self) -> String {
        self.effective().axes()
    }

    pub fn shape_with(&self, squeeze: bool) -> (Vec<u64>, String) {
        self.effective().shape_with(squeeze)
    }

    /// The parsed directory; a light frame answers with its keyframe's.
    pub fn directory(&self) -> &Directory {
        self.effective().directory()
    }

    pub fn description(&self) -> Option<String> {
        self.effective().description()
    }

    pub fn software(&self) -> Option<String> {
        self.effective().software()
    }

    pub fn sub_ifds(&self) -> &[IfdPointer] {
        self.effective().sub_ifds()
    }

    /// Clone of the raw tag value, if the directory holds the tag.
    pub fn tag_value(&self, tag: Tag) -> Option<ifd::Value> {
        self.directory().value(tag).cloned()
    }

    /// File positions of the stored segments. A frame answers with its own
    /// table, collapsed to a single run when the keyframe is contiguous.
    pub fn segment_offsets(&self) -> &[u64] {
        match &self.record {
            Record::Page(page) => page.segment_offsets(),
            Record::Frame { frame, .. } => frame.segment_offsets(),
        }
    }

    pub fn segment_byte_counts(&self) -> &[u64] {
        match &self.record {
            Record::Page(page) => page.segment_byte_counts(),
            Record::Frame { frame, .. } => frame.segment_byte_counts(),
        }
    }

    /// Layout hash used to validate keyframe bindings and cached indices.
    pub fn fingerprint(&self) -> u64 {
        self.effective().fingerprint()
    }

    /// Whether the stored bytes form one unbroken, file-order run.
    pub fn is_contiguous(&self) -> bool {
        match &self.record {
            Record::Page(page) => page.is_contiguous(),
            Record::Frame { keyframe, .. } => keyframe.is_contiguous(),
        }
    }

    /// Whether the samples can be served directly from a file mapping.
    pub fn is_memory_mappable(&self) -> bool {
        match &self.record {
            Record::Page(page) => page.is_memory_mappable(),
            Record::Frame { keyframe, .. } => {
                if !keyframe.is_memory_mappable() {
                    return false;
                }
                let Some((start, len)) = self.contiguous_run() else {
                    return false;
                };
                let Ok(sample_type) = keyframe.sample_type() else {
                    return false;
                };
                let elem = sample_type.byte_len() as u64;
                start % elem == 0
                    && start
                        .checked_add(len)
                        .is_some_and(|end| end <= self.doc.channel_len)
            }
        }
    }

    fn contiguous_run(&self) -> Option<(u64, u64)> {
        match &self.record {
            Record::Page(page) => page.contiguous(),
            Record::Frame { frame, keyframe } => {
                if !keyframe.is_contiguous() {
                    return None;
                }
                match (
                    frame.segment_offsets().first(),
                    frame.segment_byte_counts().first(),
                ) {
                    (Some(&start), Some(&len)) => Some((start, len)),
                    _ => None,
                }
            }
        }
    }

    /// Decode this page into a dense sample buffer, or validate only.
    ///
    /// Returns `Ok(None)` when the options request validation without
    /// decoding.
    pub fn decode(&self, options: &DecodeOptions) -> TiffResult<Option<DecodedImage>> {
        let ctx = decode::DecodeContext {
            channel: &self.doc.channel,
            channel_len: self.doc.channel_len,
            format: &self.doc.format,
            limits: &self.doc.limits,
        };
        decode::decode_page(
            &ctx,
            self.effective(),
            self.segment_offsets(),
            self.segment_byte_counts(),
            self.contiguous_run(),
            self.is_memory_mappable(),
            options,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_bounded() {
        let limits = Limits::default();
        assert_eq!(limits.decoding_buffer_size, 256 * 1024 * 1024);
        assert_eq!(limits.intermediate_buffer_size, 128 * 1024 * 1024);
        assert_eq!(limits.ifd_value_size, 1024 * 1024);
    }

    #[test]
    fn unlimited_limits_check_nothing() {
        let limits = Limits::unlimited();
        assert_eq!(limits.decoding_buffer_size, usize::MAX);
        assert_eq!(limits.ifd_value_size, usize::MAX);
    }

    #[test]
    fn open_rejects_a_non_tiff_channel() {
        let result = TiffStack::open(std::io::Cursor::new(b"PK\x03\x04garbage".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn open_accepts_a_header_without_pages() {
        // A valid header whose first-directory pointer is zero.
        let bytes = b"II\x2a\x00\x00\x00\x00\x00".to_vec();
        let mut stack = TiffStack::open(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(stack.page_count().unwrap(), 0);
        assert!(stack.is_fully_indexed());
        assert!(matches!(
            stack.page(0),
            Err(crate::TiffError::UsageError(
                UsageError::PageIndexOutOfRange {
                    index: 0,
                    page_count: 0
                }
            ))
        ));
    }
}
