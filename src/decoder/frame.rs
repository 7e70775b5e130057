//! Lightweight frames bound to a keyframe.
//!
//! Once a caller nominates a keyframe, the remaining pages of a uniform
//! stack resolve to a [`Frame`]: only the tags that can legitimately vary
//! between pages are read, everything else is borrowed from the keyframe.
//! For a contiguous keyframe that subset shrinks to a single segment
//! offset.

use std::io::{Read, Seek};

use tracing::warn;

use super::ifd::{self, RawEntry};
use super::page::{self, Page};
use super::stream::SmartReader;
use super::Limits;
use crate::directory::Directory;
use crate::error::{StructuralError, TiffError, TiffResult, UsageError};
use crate::format::Format;
use crate::tags::{IfdPointer, Tag};

/// The slim page record: segment tables plus a reference to the keyframe
/// supplying every other layout fact.
#[derive(Debug, Clone)]
pub struct Frame {
    index: usize,
    pointer: IfdPointer,
    width: Option<u64>,
    segment_offsets: Vec<u64>,
    segment_byte_counts: Vec<u64>,
    next: Option<IfdPointer>,
    keyframe: Option<(usize, u64)>,
}

impl Frame {
    /// Read the varying tag subset at `pointer` and bind the result to
    /// `keyframe`.
    ///
    /// Directory records outside the subset are skipped without resolving
    /// their values, so a frame costs one directory scan plus at most three
    /// value reads regardless of how tag-heavy the page is.
    pub(crate) fn materialize<R: Read + Seek>(
        index: usize,
        pointer: IfdPointer,
        keyframe: &Page,
        reader: &mut SmartReader<R>,
        format: &Format,
        limits: &Limits,
        channel_len: u64,
    ) -> TiffResult<Frame> {
        ifd::check_directory_header(format, pointer, channel_len)?;
        reader.goto_offset(pointer.0)?;
        let count = format.read_dir_count(reader)?;
        let next_pos = ifd::check_directory_extent(format, pointer, count, channel_len)?;

        let tiled = keyframe.layout().tiled;
        let offsets_tag = if tiled { Tag::TileOffsets } else { Tag::StripOffsets };
        let counts_tag = if tiled { Tag::TileByteCounts } else { Tag::StripByteCounts };
        let collapse = keyframe.contiguous();

        let mut dir = Directory::empty();
        let record_base = pointer.0 + format.dir_count_bytes();
        for record in 0..count {
            reader.goto_offset(record_base + record * format.tag_record_bytes())?;
            let raw = RawEntry::read(reader, format)?;
            let wanted = raw.code == Tag::ImageWidth.to_u16()
                || raw.code == offsets_tag.to_u16()
                || (collapse.is_none() && raw.code == counts_tag.to_u16());
            if !wanted {
                continue;
            }
            match ifd::decode_entry(&raw, format, limits, reader, channel_len) {
                Ok(Some(entry)) => {
                    dir.insert(raw.code, entry);
                }
                Ok(None) => {}
                Err(TiffError::TagError(err)) => {
                    warn!(index, code = raw.code, error = %err, "dropping undecodable tag");
                    dir.note_failed(raw.code, err);
                }
                Err(err) => return Err(err),
            }
        }
        reader.goto_offset(next_pos)?;
        let next = format.read_ifd_offset(reader)?;
        let next = (next != 0).then_some(IfdPointer(next));

        let width = match page::optional(&dir, Tag::ImageWidth) {
            Some(value) => Some(value.into_u64()?),
            None => None,
        };
        if let Some(width) = width {
            if width != keyframe.width() {
                return Err(UsageError::IncompatibleKeyframeWidth {
                    frame: width,
                    keyframe: keyframe.width(),
                }
                .into());
            }
        }

        let offsets = page::require(&dir, offsets_tag)?.into_u64_vec()?;
        let (segment_offsets, segment_byte_counts) = match collapse {
            Some((_, total)) => {
                // The keyframe proved the segments abut, so one offset and
                // the keyframe's run length describe the whole frame.
                let first = offsets.first().copied().unwrap_or(0);
                (vec![first], vec![total])
            }
            None => {
                if offsets.len() != keyframe.segment_offsets().len() {
                    return Err(UsageError::IncompatibleKeyframeSegments {
                        frame: offsets.len(),
                        keyframe: keyframe.segment_offsets().len(),
                    }
                    .into());
                }
                let counts = match page::optional(&dir, counts_tag) {
                    Some(value) => {
                        let counts = value.into_u64_vec()?;
                        if counts.len() != offsets.len() {
                            return Err(StructuralError::InconsistentSegmentTables {
                                offsets: offsets.len(),
                                byte_counts: counts.len(),
                            }
                            .into());
                        }
                        counts
                    }
                    None => {
                        warn!(index, "missing byte counts borrowed from the keyframe");
                        keyframe.segment_byte_counts().to_vec()
                    }
                };
                (offsets, counts)
            }
        };

        let mut frame = Frame {
            index,
            pointer,
            width,
            segment_offsets,
            segment_byte_counts,
            next,
            keyframe: None,
        };
        frame.bind(keyframe.index(), keyframe.fingerprint())?;
        Ok(frame)
    }

    /// Attach the frame to its keyframe. A frame binds exactly once.
    pub(crate) fn bind(&mut self, index: usize, fingerprint: u64) -> TiffResult<()> {
        if self.keyframe.is_some() {
            return Err(UsageError::KeyframeAlreadyAssigned { frame: self.index }.into());
        }
        self.keyframe = Some((index, fingerprint));
        Ok(())
    }

    /// Position of this frame in the directory chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// File offset of the directory this frame was parsed from.
    pub fn pointer(&self) -> IfdPointer {
        self.pointer
    }

    pub(crate) fn next(&self) -> Option<IfdPointer> {
        self.next
    }

    /// The frame's own width tag, when the directory carried one.
    pub fn width(&self) -> Option<u64> {
        self.width
    }

    /// Segment offsets of this frame. One collapsed entry when the
    /// keyframe is contiguous.
    pub fn segment_offsets(&self) -> &[u64] {
        &self.segment_offsets
    }

    /// Segment byte counts matching [`Frame::segment_offsets`].
    pub fn segment_byte_counts(&self) -> &[u64] {
        &self.segment_byte_counts
    }

    /// Index and fingerprint of the keyframe this frame is bound to.
    pub fn keyframe(&self) -> Option<(usize, u64)> {
        self.keyframe
    }
}
