//! Traversal of the linked directory chain.
//!
//! The chain keeps one slot per directory. Slots start as bare offsets and
//! are upgraded to materialized records on demand, so opening a file with
//! tens of thousands of pages touches only the headers that were actually
//! walked past.

use std::collections::HashSet;
use std::io::{Read, Seek};

use tracing::{debug, warn};

use super::frame::Frame;
use super::ifd;
use super::page::Page;
use super::stream::SmartReader;
use crate::format::Format;
use crate::tags::IfdPointer;
use crate::{StructuralError, TiffResult};

/// Number of hops after which the walk starts paying for the cycle check.
///
/// Well-formed files never revisit an offset, so the membership test is
/// skipped while the chain is short. A cycle among early directories is
/// still caught, merely a few dozen wasted hops later.
pub(crate) const CYCLE_CHECK_AFTER: usize = 100;

/// Directories declaring more records than this are treated as corrupt.
/// The walk ends in front of such a directory instead of failing, keeping
/// every page found so far usable.
pub(crate) const MAX_DIRECTORY_TAGS: u64 = 4096;

/// Offsets observed before equal-stride synthesis may engage.
const STRIDE_PROBE_SLOTS: usize = 4;

/// One position in the directory chain.
pub(crate) enum Slot {
    /// Offset known from the walk, record not yet materialized.
    Pending(IfdPointer),
    /// Fully materialized two-tier record.
    Page(Box<Page>),
    /// Light record bound to a keyframe.
    Frame(Frame),
}

impl Slot {
    pub(crate) fn pointer(&self) -> IfdPointer {
        match self {
            Slot::Pending(pointer) => *pointer,
            Slot::Page(page) => page.pointer(),
            Slot::Frame(frame) => frame.pointer(),
        }
    }
}

/// How much of the chain has been discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkState {
    /// More directories may follow the last known slot.
    Partial,
    /// The terminator, an early-termination condition or a synthesized tail
    /// was seen; the slot count is final.
    Indexed,
}

pub(crate) struct Chain {
    slots: Vec<Slot>,
    state: WalkState,
    /// Next offset to probe, if the walk has not terminated.
    frontier: Option<IfdPointer>,
    /// Offsets admitted so far, for the cycle guard.
    seen: HashSet<u64>,
    /// Cursor of the page that serves as keyframe for light frames.
    keyframe: Option<usize>,
    /// Index of the first slot produced by stride synthesis, if engaged.
    first_synthesized: Option<usize>,
    stride: Option<u64>,
}

impl Chain {
    pub(crate) fn new(first: Option<IfdPointer>) -> Self {
        Chain {
            slots: Vec::new(),
            state: if first.is_some() {
                WalkState::Partial
            } else {
                WalkState::Indexed
            },
            frontier: first,
            seen: HashSet::new(),
            keyframe: None,
            first_synthesized: None,
            stride: None,
        }
    }

    pub(crate) fn state(&self) -> WalkState {
        self.state
    }

    /// Number of slots discovered so far. Final once [`WalkState::Indexed`].
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    pub(crate) fn keyframe(&self) -> Option<usize> {
        self.keyframe
    }

    pub(crate) fn set_keyframe(&mut self, index: Option<usize>) {
        self.keyframe = index;
    }

    /// Whether the slot offset was synthesized rather than parsed.
    pub(crate) fn is_synthesized(&self, index: usize) -> bool {
        self.first_synthesized.map_or(false, |first| index >= first)
    }

    pub(crate) fn stride(&self) -> Option<u64> {
        self.stride
    }

    /// The successor pointer a synthesized slot must parse to, if any.
    pub(crate) fn stride_expectation(&self, index: usize) -> Option<IfdPointer> {
        if !self.is_synthesized(index) {
            return None;
        }
        self.slots.get(index + 1).map(Slot::pointer)
    }

    /// Drop the materialized record of a slot, keeping its offset.
    pub(crate) fn demote(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Slot::Pending(slot.pointer());
        }
    }

    /// Walk until slot `index` exists or the chain ends. Returns whether the
    /// slot exists.
    pub(crate) fn ensure<R: Read + Seek>(
        &mut self,
        index: usize,
        reader: &mut SmartReader<R>,
        format: &Format,
        channel_len: u64,
    ) -> TiffResult<bool> {
        while self.slots.len() <= index {
            if !self.advance(reader, format, channel_len)? {
                break;
            }
        }
        Ok(index < self.slots.len())
    }

    /// Walk to the end of the chain and return the final slot count.
    pub(crate) fn ensure_all<R: Read + Seek>(
        &mut self,
        reader: &mut SmartReader<R>,
        format: &Format,
        channel_len: u64,
    ) -> TiffResult<usize> {
        while self.advance(reader, format, channel_len)? {}
        Ok(self.slots.len())
    }

    /// Probe the frontier directory and admit it as a slot.
    ///
    /// Reads only the record count and the next-pointer; tag bodies stay
    /// untouched until the slot is materialized.
    fn advance<R: Read + Seek>(
        &mut self,
        reader: &mut SmartReader<R>,
        format: &Format,
        channel_len: u64,
    ) -> TiffResult<bool> {
        let next = match self.frontier {
            Some(next) => next,
            None => return Ok(false),
        };

        if self.slots.len() >= CYCLE_CHECK_AFTER && self.seen.contains(&next.0) {
            return Err(StructuralError::CycleInOffsets(next.0).into());
        }

        ifd::check_directory_header(format, next, channel_len)?;
        reader.goto_offset(next.0)?;
        let count = format.read_dir_count(reader)?;
        if count > MAX_DIRECTORY_TAGS {
            warn!(
                offset = next.0,
                count, "implausible record count ends the chain walk early"
            );
            self.terminate();
            return Ok(false);
        }

        let next_pos = ifd::check_directory_extent(format, next, count, channel_len)?;
        reader.goto_offset(next_pos)?;
        let parsed = format.read_ifd_offset(reader)?;

        self.admit(next);
        self.frontier = (parsed != 0).then_some(IfdPointer(parsed));
        if self.frontier.is_none() {
            self.terminate();
        } else if format.caps.offset_stride_scan
            && self.first_synthesized.is_none()
            && self.slots.len() >= STRIDE_PROBE_SLOTS
        {
            self.try_engage_stride(format, channel_len);
        }
        Ok(true)
    }

    fn admit(&mut self, pointer: IfdPointer) {
        self.seen.insert(pointer.0);
        self.slots.push(Slot::Pending(pointer));
    }

    fn terminate(&mut self) {
        self.frontier = None;
        self.state = WalkState::Indexed;
    }

    /// Vendor writers that lay out directories back to back at a fixed
    /// stride are recognized after four equally spaced offsets whose next
    /// pointer continues the progression. The rest of the chain is then
    /// synthesized up to the channel end without touching the file.
    fn try_engage_stride(&mut self, format: &Format, channel_len: u64) {
        let n = self.slots.len();
        let o: Vec<u64> = self.slots[n - STRIDE_PROBE_SLOTS..]
            .iter()
            .map(|slot| slot.pointer().0)
            .collect();
        let stride = o[1].wrapping_sub(o[0]);
        if stride == 0
            || o[2].wrapping_sub(o[1]) != stride
            || o[3].wrapping_sub(o[2]) != stride
        {
            return;
        }
        let frontier = match self.frontier {
            Some(frontier) => frontier,
            None => return,
        };
        if Some(frontier.0) != o[3].checked_add(stride) {
            return;
        }

        self.first_synthesized = Some(self.slots.len());
        self.stride = Some(stride);
        let mut offset = frontier.0;
        loop {
            let end = match offset.checked_add(format.min_directory_bytes()) {
                Some(end) => end,
                None => break,
            };
            if end > channel_len {
                break;
            }
            self.admit(IfdPointer(offset));
            offset = match offset.checked_add(stride) {
                Some(offset) => offset,
                None => break,
            };
        }
        let synthesized = self.slots.len() - self.first_synthesized.unwrap_or(0);
        debug!(stride, synthesized, "synthesized equal-stride directory offsets");
        self.terminate();
    }
}
