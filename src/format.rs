//! Container header parsing and the per-file format descriptor.
//!
//! A descriptor fixes everything the rest of the decoder needs to know about
//! field widths: byte order, classic vs BigTIFF, and the dialect capability
//! set. It is computed once at open and copied around freely.

use std::io::{Read, Seek};

use crate::decoder::stream::{EndianReader, SmartReader};
use crate::error::{TiffFormatError, TiffResult};
use crate::tags::{ByteOrder, IfdPointer};

/// Container variant selected by the header version word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variant {
    /// Classic TIFF, version 42, 4-byte offsets.
    Classic,
    /// BigTIFF, version 43, 8-byte offsets and counts.
    Big,
}

/// Vendor dialect of the container layout.
///
/// The wire bytes of a dialect file are indistinguishable from classic TIFF,
/// so the dialect has to be requested at open time by the caller that knows
/// the file's provenance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dialect {
    /// Plain TIFF/BigTIFF semantics.
    #[default]
    Generic,
    /// Hamamatsu slide scanner files: classic little-endian headers with
    /// 8-byte IFD-offset fields, 4-byte tag-value fields, equally spaced
    /// directories, and zero-byte-count gap segments.
    Ndpi,
    /// Zeiss laser-scanning files: classic layout with the legacy 16-bit-pair
    /// bits-per-sample encoding.
    Lsm,
}

/// Capability set derived from the dialect, computed once at open.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Caps {
    /// IFD-offset fields (first offset and next-offset links) are 8 bytes
    /// even though the container is classic.
    pub wide_ifd_offsets: bool,
    /// The chain walker may verify an equal stride over the first
    /// directories and synthesize the remaining offsets.
    pub offset_stride_scan: bool,
    /// Zero-byte-count segments are ignorable gaps for contiguity.
    pub sparse_segment_gaps: bool,
    /// Count-two bits-per-sample values actually store an offset to the
    /// 16-bit pair and must be re-read there.
    pub legacy_bits_pair_fix: bool,
    /// Tag codes decoded through an indirect read regardless of fit.
    pub forced_indirect: &'static [u16],
}

impl Dialect {
    pub(crate) fn caps(self) -> Caps {
        match self {
            Dialect::Generic => Caps {
                wide_ifd_offsets: false,
                offset_stride_scan: false,
                sparse_segment_gaps: false,
                legacy_bits_pair_fix: false,
                forced_indirect: &[],
            },
            Dialect::Ndpi => Caps {
                wide_ifd_offsets: true,
                offset_stride_scan: true,
                sparse_segment_gaps: true,
                legacy_bits_pair_fix: false,
                forced_indirect: crate::tags::NDPI_FORCED_INDIRECT,
            },
            Dialect::Lsm => Caps {
                wide_ifd_offsets: false,
                offset_stride_scan: false,
                sparse_segment_gaps: false,
                legacy_bits_pair_fix: true,
                forced_indirect: &[],
            },
        }
    }
}

/// Everything the header determines about reading the rest of the file.
#[derive(Clone, Copy, Debug)]
pub struct Format {
    byte_order: ByteOrder,
    variant: Variant,
    dialect: Dialect,
    pub(crate) caps: Caps,
}

impl Format {
    /// Parse the 4-8 byte header and return the descriptor together with the
    /// pointer to the first directory.
    pub(crate) fn from_reader<R: Read + Seek>(
        reader: &mut R,
        dialect: Dialect,
    ) -> TiffResult<(Self, IfdPointer)> {
        let mut order_mark = [0u8; 2];
        reader.read_exact(&mut order_mark)?;
        let byte_order = match &order_mark {
            b"II" => ByteOrder::LittleEndian,
            b"MM" => ByteOrder::BigEndian,
            _ => return Err(TiffFormatError::InvalidOrderMark(order_mark).into()),
        };

        let mut reader = SmartReader::wrap(reader, byte_order);
        let variant = match reader.read_u16()? {
            42 => Variant::Classic,
            43 => {
                let offset_size = reader.read_u16()?;
                if offset_size != 8 {
                    return Err(TiffFormatError::InvalidOffsetSize(offset_size).into());
                }
                let reserved = reader.read_u16()?;
                if reserved != 0 {
                    return Err(TiffFormatError::NonZeroReserved(reserved).into());
                }
                Variant::Big
            }
            version => return Err(TiffFormatError::UnsupportedVersion(version).into()),
        };

        let caps = dialect.caps();
        if caps.wide_ifd_offsets
            && (variant != Variant::Classic || byte_order != ByteOrder::LittleEndian)
        {
            return Err(TiffFormatError::DialectMismatch.into());
        }

        let format = Format {
            byte_order,
            variant,
            dialect,
            caps,
        };
        let first = IfdPointer(format.read_ifd_offset(&mut reader)?);
        Ok((format, first))
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Whether file data is stored in the byte order of the running target.
    pub fn is_native(&self) -> bool {
        self.byte_order == ByteOrder::native()
    }

    /// Byte width of IFD-offset fields (first offset and next-offset links).
    pub(crate) fn ifd_offset_bytes(&self) -> u64 {
        match self.variant {
            Variant::Big => 8,
            Variant::Classic if self.caps.wide_ifd_offsets => 8,
            Variant::Classic => 4,
        }
    }

    /// Byte width of the directory tag-count field.
    pub(crate) fn dir_count_bytes(&self) -> u64 {
        match self.variant {
            Variant::Big => 8,
            Variant::Classic => 2,
        }
    }

    /// Byte width of one encoded tag record.
    ///
    /// The wide-offset dialect widens IFD links only; tag records stay at
    /// their classic 12 bytes.
    pub(crate) fn tag_record_bytes(&self) -> u64 {
        match self.variant {
            Variant::Big => 20,
            Variant::Classic => 12,
        }
    }

    /// Capacity of the inline value-or-offset field of a tag record.
    pub(crate) fn inline_capacity(&self) -> u64 {
        match self.variant {
            Variant::Big => 8,
            Variant::Classic => 4,
        }
    }

    /// Smallest possible encoded directory, used for bounds checks.
    pub(crate) fn min_directory_bytes(&self) -> u64 {
        self.dir_count_bytes() + self.tag_record_bytes() + self.ifd_offset_bytes()
    }

    /// Read one IFD-offset field at the current position.
    pub(crate) fn read_ifd_offset<R: Read + Seek>(
        &self,
        reader: &mut SmartReader<R>,
    ) -> TiffResult<u64> {
        match self.ifd_offset_bytes() {
            4 => Ok(u64::from(reader.read_u32()?)),
            _ => Ok(reader.read_u64()?),
        }
    }

    /// Read the directory tag-count field at the current position.
    pub(crate) fn read_dir_count<R: Read + Seek>(
        &self,
        reader: &mut SmartReader<R>,
    ) -> TiffResult<u64> {
        match self.variant {
            Variant::Big => Ok(reader.read_u64()?),
            Variant::Classic => Ok(u64::from(reader.read_u16()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(bytes: &[u8], dialect: Dialect) -> TiffResult<(Format, IfdPointer)> {
        Format::from_reader(&mut Cursor::new(bytes.to_vec()), dialect)
    }

    #[test]
    fn classic_little_endian() {
        let (format, first) = parse(b"II\x2a\x00\x08\x00\x00\x00", Dialect::Generic).unwrap();
        assert_eq!(format.byte_order(), ByteOrder::LittleEndian);
        assert_eq!(format.variant(), Variant::Classic);
        assert_eq!(first, IfdPointer(8));
        assert_eq!(format.ifd_offset_bytes(), 4);
        assert_eq!(format.tag_record_bytes(), 12);
    }

    #[test]
    fn classic_big_endian() {
        let (format, first) = parse(b"MM\x00\x2a\x00\x00\x00\x08", Dialect::Generic).unwrap();
        assert_eq!(format.byte_order(), ByteOrder::BigEndian);
        assert_eq!(format.variant(), Variant::Classic);
        assert_eq!(first, IfdPointer(8));
    }

    #[test]
    fn big_little_endian() {
        let (format, first) = parse(
            b"II\x2b\x00\x08\x00\x00\x00\x10\x00\x00\x00\x00\x00\x00\x00",
            Dialect::Generic,
        )
        .unwrap();
        assert_eq!(format.variant(), Variant::Big);
        assert_eq!(first, IfdPointer(16));
        assert_eq!(format.ifd_offset_bytes(), 8);
        assert_eq!(format.dir_count_bytes(), 8);
        assert_eq!(format.tag_record_bytes(), 20);
    }

    #[test]
    fn big_big_endian() {
        let (format, first) = parse(
            b"MM\x00\x2b\x00\x08\x00\x00\x00\x00\x00\x00\x00\x00\x00\x10",
            Dialect::Generic,
        )
        .unwrap();
        assert_eq!(format.byte_order(), ByteOrder::BigEndian);
        assert_eq!(format.variant(), Variant::Big);
        assert_eq!(first, IfdPointer(16));
    }

    #[test]
    fn bad_order_mark() {
        let err = parse(b"XX\x2a\x00\x08\x00\x00\x00", Dialect::Generic).unwrap_err();
        assert!(matches!(
            err,
            crate::TiffError::FormatError(TiffFormatError::InvalidOrderMark(_))
        ));
    }

    #[test]
    fn bad_version() {
        let err = parse(b"II\x2c\x00\x08\x00\x00\x00", Dialect::Generic).unwrap_err();
        assert!(matches!(
            err,
            crate::TiffError::FormatError(TiffFormatError::UnsupportedVersion(44))
        ));
    }

    #[test]
    fn big_rejects_bad_offset_size() {
        let err = parse(
            b"II\x2b\x00\x04\x00\x00\x00\x10\x00\x00\x00\x00\x00\x00\x00",
            Dialect::Generic,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::TiffError::FormatError(TiffFormatError::InvalidOffsetSize(4))
        ));
    }

    #[test]
    fn big_rejects_reserved() {
        let err = parse(
            b"II\x2b\x00\x08\x00\x01\x00\x10\x00\x00\x00\x00\x00\x00\x00",
            Dialect::Generic,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::TiffError::FormatError(TiffFormatError::NonZeroReserved(1))
        ));
    }

    #[test]
    fn ndpi_widens_ifd_offsets_only() {
        let (format, first) = parse(
            b"II\x2a\x00\x10\x00\x00\x00\x00\x00\x00\x00",
            Dialect::Ndpi,
        )
        .unwrap();
        assert_eq!(format.variant(), Variant::Classic);
        assert_eq!(first, IfdPointer(16));
        assert_eq!(format.ifd_offset_bytes(), 8);
        assert_eq!(format.tag_record_bytes(), 12);
        assert_eq!(format.inline_capacity(), 4);
    }

    #[test]
    fn ndpi_requires_classic_little_endian() {
        let err = parse(b"MM\x00\x2a\x00\x00\x00\x08", Dialect::Ndpi).unwrap_err();
        assert!(matches!(
            err,
            crate::TiffError::FormatError(TiffFormatError::DialectMismatch)
        ));
        let err = parse(
            b"II\x2b\x00\x08\x00\x00\x00\x10\x00\x00\x00\x00\x00\x00\x00",
            Dialect::Ndpi,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::TiffError::FormatError(TiffFormatError::DialectMismatch)
        ));
    }
}
