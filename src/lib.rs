//! Structural decoding of multi-page TIFF stacks
//!
//! TIFF (Tagged Image File Format) stores any number of image file
//! directories chained through file offsets. This crate reads the classic
//! 32-bit layout, BigTIFF, and two vendor dialects (Hamamatsu NDPI and
//! Zeiss LSM) with lazy random access: directories are parsed when a page
//! is first touched, never eagerly for the whole file.
//!
//! The entry point is [`decoder::TiffStack`]. Pages resolve either to a
//! fully parsed record or, once a keyframe is assigned, to a lightweight
//! frame that borrows everything except its segment tables from that
//! keyframe.
//!
//! # Related Links
//! * <https://web.archive.org/web/20210108073850/https://www.adobe.io/open/standards/TIFF.html> - The TIFF specification
//! * <https://www.awaresystems.be/imaging/tiff/bigtiff.html> - The BigTIFF extension

mod bytecast;
pub mod channel;
pub mod decoder;
mod directory;
mod error;
mod format;
pub mod tags;

pub use self::directory::Directory;
pub use self::error::{
    StructuralError, TagDecodeError, TiffError, TiffFormatError, TiffResult,
    TiffUnsupportedError, UsageError,
};
pub use self::format::{Dialect, Format, Variant};
pub use self::tags::IfdPointer;

use self::tags::SampleFormat;

/// An enumeration over the sample types a page can decode into
#[derive(Copy, PartialEq, Eq, Debug, Clone, Hash)]
#[non_exhaustive]
pub enum SampleType {
    /// Unsigned integer, stored in 1 to 8 bits
    U8,
    /// Unsigned integer, stored in 9 to 16 bits
    U16,
    /// Unsigned integer, stored in 17 to 32 bits
    U32,
    /// Unsigned integer, stored in 33 to 64 bits
    U64,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// IEEE 754 half-precision float
    F16,
    /// IEEE 754 single-precision float
    F32,
    /// IEEE 754 double-precision float
    F64,
}

impl SampleType {
    /// Picks the buffer element for a sample format and storage bit depth.
    ///
    /// Unsigned and void samples may be bit-packed and round up to the next
    /// element width. Signed and floating-point samples must be stored at
    /// an exact element width.
    pub fn for_format(format: SampleFormat, bits: u16) -> TiffResult<SampleType> {
        let unsupported =
            || TiffError::from(TiffUnsupportedError::UnsupportedSampleType { format, bits });
        match format {
            SampleFormat::Uint | SampleFormat::Void => match bits {
                1..=8 => Ok(SampleType::U8),
                9..=16 => Ok(SampleType::U16),
                17..=32 => Ok(SampleType::U32),
                33..=64 => Ok(SampleType::U64),
                _ => Err(unsupported()),
            },
            SampleFormat::Int => match bits {
                8 => Ok(SampleType::I8),
                16 => Ok(SampleType::I16),
                32 => Ok(SampleType::I32),
                64 => Ok(SampleType::I64),
                _ => Err(unsupported()),
            },
            SampleFormat::IEEEFP => match bits {
                16 => Ok(SampleType::F16),
                32 => Ok(SampleType::F32),
                64 => Ok(SampleType::F64),
                _ => Err(unsupported()),
            },
            SampleFormat::Unknown(_) => Err(unsupported()),
        }
    }

    /// Width of one buffer element in bytes.
    pub fn byte_len(self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 | SampleType::F16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::U64 | SampleType::I64 | SampleType::F64 => 8,
        }
    }

    /// Width of one buffer element in bits.
    pub fn bit_width(self) -> u16 {
        self.byte_len() as u16 * 8
    }
}
