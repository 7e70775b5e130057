use std::error::Error;
use std::fmt;
use std::io;
use std::num::TryFromIntError;
use std::str;
use std::string;

use crate::tags::{CompressionMethod, PlanarConfiguration, Predictor, SampleFormat, Tag};

/// Tiff error kinds.
#[derive(Debug)]
pub enum TiffError {
    /// The file header is not a recognizable TIFF container.
    FormatError(TiffFormatError),

    /// The directory chain or a directory record is structurally unreliable.
    ///
    /// Fatal for the offending page only; pages resolved earlier stay usable.
    StructuralError(StructuralError),

    /// A single tag record could not be decoded.
    ///
    /// Surfaces directly from typed tag accessors. During page
    /// materialization these are logged and dropped instead, unless the tag
    /// is required for layout derivation, in which case they escalate to a
    /// [`StructuralError`].
    TagError(TagDecodeError),

    /// The decoder does not support features required by the page.
    UnsupportedError(TiffUnsupportedError),

    /// The method was called in the wrong order or with stale handles.
    UsageError(UsageError),

    /// An I/O error occurred while reading from the channel.
    IoError(io::Error),

    /// The configured decoding limits were exceeded.
    LimitsExceeded,

    /// An integer conversion to or from a platform size failed.
    IntSizeError,
}

/// Errors detected while reading the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffFormatError {
    /// The first two bytes are neither `II` nor `MM`.
    InvalidOrderMark([u8; 2]),
    /// The version word is neither 42 (classic) nor 43 (BigTIFF).
    UnsupportedVersion(u16),
    /// A BigTIFF header declared an offset size other than 8.
    InvalidOffsetSize(u16),
    /// A BigTIFF header has a non-zero reserved word.
    NonZeroReserved(u16),
    /// A wide-offset dialect was requested but the header is not classic
    /// little-endian.
    DialectMismatch,
}

/// Structural faults in the directory chain or a directory record.
#[derive(Debug)]
pub enum StructuralError {
    /// A next-directory offset was seen twice while walking the chain.
    CycleInOffsets(u64),
    /// A directory offset points outside the channel.
    DirectoryOutOfBounds { offset: u64, len: u64 },
    /// A resolved record does not match the caller-supplied fingerprint.
    FingerprintMismatch { index: usize },
    /// A synthesized equal-stride offset disagrees with the parsed chain.
    BrokenStride { expected: u64, found: u64 },
    /// A tag required for layout derivation is missing.
    RequiredTagNotFound(Tag),
    /// A tag required for layout derivation failed to decode.
    RequiredTagUndecodable(Tag, TagDecodeError),
    /// Strip or tile offset and byte-count tables disagree in length.
    InconsistentSegmentTables { offsets: usize, byte_counts: usize },
    /// The planar configuration tag holds a value outside the TIFF
    /// vocabulary, leaving the storage layout undefined.
    UnknownPlanarConfiguration(u16),
}

/// Faults in one tag record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagDecodeError {
    /// An out-of-line value offset was below 8 or past the channel end.
    InvalidValueOffset { offset: u64, len: u64 },
    /// An out-of-line value exceeds the configured per-value limit.
    ValueTooLarge(u64),
    /// The value bytes ended early or did not match the declared count.
    TruncatedValue,
    /// An ASCII value contained bytes outside the ASCII range.
    InvalidAscii,
    /// A typed accessor was used on a value of a different type.
    UnexpectedType,
}

/// Features the decoder cannot process; fatal per decode call only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffUnsupportedError {
    /// No element type is registered for this sample format and bit depth.
    UnsupportedSampleType { format: SampleFormat, bits: u16 },
    /// Sample formats differ between components.
    InconsistentSampleFormat,
    /// The compression scheme is unknown or compiled out.
    UnsupportedCompression(CompressionMethod),
    /// Chroma subsampling outside the JPEG + chunky exemption.
    UnsupportedSubsampling(u16, u16, PlanarConfiguration),
    /// The predictor cannot be reversed for this element type.
    UnsupportedPredictor(Predictor),
    /// The bit depth cannot be unpacked into a supported element type.
    UnsupportedBitsPerSample(u16),
    /// The compression scheme cannot be combined with per-plane storage.
    UnsupportedPlanarCompression(CompressionMethod),
}

/// The caller violated the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// The requested page index is past the end of the chain.
    PageIndexOutOfRange { index: usize, page_count: usize },
    /// A light frame's keyframe reference was assigned a second time.
    KeyframeAlreadyAssigned { frame: usize },
    /// A light frame was decoded without an assigned keyframe.
    KeyframeNotAssigned { frame: usize },
    /// The slot serving as keyframe cannot be evicted while selected.
    KeyframePinned { index: usize },
    /// A frame's width disagrees with its keyframe.
    IncompatibleKeyframeWidth { frame: u64, keyframe: u64 },
    /// A frame's segment count disagrees with its keyframe.
    IncompatibleKeyframeSegments { frame: usize, keyframe: usize },
}

impl fmt::Display for TiffFormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::TiffFormatError::*;
        match *self {
            InvalidOrderMark(ref bytes) => {
                write!(fmt, "TIFF order mark not found, got {:?}", bytes)
            }
            UnsupportedVersion(version) => {
                write!(fmt, "unsupported TIFF version {}", version)
            }
            InvalidOffsetSize(size) => {
                write!(fmt, "BigTIFF offset size must be 8, got {}", size)
            }
            NonZeroReserved(value) => {
                write!(fmt, "BigTIFF reserved word must be 0, got {}", value)
            }
            DialectMismatch => {
                write!(fmt, "wide-offset dialect requires a classic little-endian header")
            }
        }
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::StructuralError::*;
        match *self {
            CycleInOffsets(offset) => {
                write!(fmt, "directory chain cycles back to offset {}", offset)
            }
            DirectoryOutOfBounds { offset, len } => write!(
                fmt,
                "directory offset {} lies outside the channel of {} bytes",
                offset, len
            ),
            FingerprintMismatch { index } => {
                write!(fmt, "page {} does not match the supplied fingerprint", index)
            }
            BrokenStride { expected, found } => write!(
                fmt,
                "synthesized directory offset {} disagrees with parsed chain offset {}",
                expected, found
            ),
            RequiredTagNotFound(tag) => {
                write!(fmt, "required tag `{:?}` not found", tag)
            }
            RequiredTagUndecodable(tag, ref err) => {
                write!(fmt, "required tag `{:?}` could not be decoded: {}", tag, err)
            }
            InconsistentSegmentTables { offsets, byte_counts } => write!(
                fmt,
                "{} segment offsets but {} byte counts",
                offsets, byte_counts
            ),
            UnknownPlanarConfiguration(value) => {
                write!(fmt, "planar configuration {} is not defined", value)
            }
        }
    }
}

impl fmt::Display for TagDecodeError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::TagDecodeError::*;
        match *self {
            InvalidValueOffset { offset, len } => write!(
                fmt,
                "tag value offset {} is invalid for a channel of {} bytes",
                offset, len
            ),
            ValueTooLarge(size) => {
                write!(fmt, "tag value of {} bytes exceeds the configured limit", size)
            }
            TruncatedValue => write!(fmt, "tag value ended before the declared count"),
            InvalidAscii => write!(fmt, "tag value is not valid ASCII text"),
            UnexpectedType => write!(fmt, "tag value does not have the expected type"),
        }
    }
}

impl fmt::Display for TiffUnsupportedError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::TiffUnsupportedError::*;
        match *self {
            UnsupportedSampleType { format, bits } => write!(
                fmt,
                "no element type for sample format {:?} at {} bits",
                format, bits
            ),
            InconsistentSampleFormat => {
                write!(fmt, "sample formats differ between components")
            }
            UnsupportedCompression(method) => {
                write!(fmt, "compression method {:?} is not supported", method)
            }
            UnsupportedSubsampling(h, v, planar) => write!(
                fmt,
                "chroma subsampling {}x{} with {:?} storage is not supported",
                h, v, planar
            ),
            UnsupportedPredictor(predictor) => {
                write!(fmt, "predictor {:?} cannot be reversed for this element type", predictor)
            }
            UnsupportedBitsPerSample(bits) => {
                write!(fmt, "cannot unpack {} bits per sample", bits)
            }
            UnsupportedPlanarCompression(method) => write!(
                fmt,
                "compression method {:?} does not support per-plane storage",
                method
            ),
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::UsageError::*;
        match *self {
            PageIndexOutOfRange { index, page_count } => write!(
                fmt,
                "page index {} out of range for a chain of {} pages",
                index, page_count
            ),
            KeyframeAlreadyAssigned { frame } => {
                write!(fmt, "frame {} already has a keyframe assigned", frame)
            }
            KeyframeNotAssigned { frame } => {
                write!(fmt, "frame {} has no keyframe assigned", frame)
            }
            KeyframePinned { index } => {
                write!(fmt, "page {} is the current keyframe and cannot be evicted", index)
            }
            IncompatibleKeyframeWidth { frame, keyframe } => write!(
                fmt,
                "frame width {} does not match keyframe width {}",
                frame, keyframe
            ),
            IncompatibleKeyframeSegments { frame, keyframe } => write!(
                fmt,
                "frame has {} segments but its keyframe has {}",
                frame, keyframe
            ),
        }
    }
}

impl fmt::Display for TiffError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TiffError::FormatError(ref e) => write!(fmt, "format error: {}", e),
            TiffError::StructuralError(ref e) => write!(fmt, "structural error: {}", e),
            TiffError::TagError(ref e) => write!(fmt, "tag error: {}", e),
            TiffError::UnsupportedError(ref e) => write!(fmt, "unsupported: {}", e),
            TiffError::UsageError(ref e) => write!(fmt, "usage error: {}", e),
            TiffError::IoError(ref e) => e.fmt(fmt),
            TiffError::LimitsExceeded => write!(fmt, "decoder limits exceeded"),
            TiffError::IntSizeError => write!(fmt, "platform or format size limits exceeded"),
        }
    }
}

impl Error for TiffError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            TiffError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TiffError {
    fn from(err: io::Error) -> TiffError {
        TiffError::IoError(err)
    }
}

impl From<TiffFormatError> for TiffError {
    fn from(err: TiffFormatError) -> TiffError {
        TiffError::FormatError(err)
    }
}

impl From<StructuralError> for TiffError {
    fn from(err: StructuralError) -> TiffError {
        TiffError::StructuralError(err)
    }
}

impl From<TagDecodeError> for TiffError {
    fn from(err: TagDecodeError) -> TiffError {
        TiffError::TagError(err)
    }
}

impl From<TiffUnsupportedError> for TiffError {
    fn from(err: TiffUnsupportedError) -> TiffError {
        TiffError::UnsupportedError(err)
    }
}

impl From<UsageError> for TiffError {
    fn from(err: UsageError) -> TiffError {
        TiffError::UsageError(err)
    }
}

impl From<str::Utf8Error> for TiffError {
    fn from(_err: str::Utf8Error) -> TiffError {
        TiffError::TagError(TagDecodeError::InvalidAscii)
    }
}

impl From<string::FromUtf8Error> for TiffError {
    fn from(_err: string::FromUtf8Error) -> TiffError {
        TiffError::TagError(TagDecodeError::InvalidAscii)
    }
}

impl From<TryFromIntError> for TiffError {
    fn from(_err: TryFromIntError) -> TiffError {
        TiffError::IntSizeError
    }
}

/// Result of a decoding process.
pub type TiffResult<T> = Result<T, TiffError>;
