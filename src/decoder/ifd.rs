//! Reading and decoding of directory tag records.

use std::io::{self, Read, Seek};

use tracing::warn;

use super::stream::{EndianReader, SmartReader};
use super::Limits;
use crate::directory::Directory;
use crate::format::{Format, Variant};
use crate::tags::{is_always_sequence, ByteOrder, IfdPointer, Tag, Type};
use crate::{StructuralError, TagDecodeError, TiffError, TiffResult};

use self::Value::{
    Ascii, Byte, Double, Float, Ifd, IfdBig, List, Rational, RationalBig, SRational, SRationalBig,
    Short, Signed, SignedBig, SignedByte, SignedShort, Unsigned, UnsignedBig,
};

#[allow(unused_qualifications)]
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    Byte(u8),
    Short(u16),
    SignedByte(i8),
    SignedShort(i16),
    Signed(i32),
    SignedBig(i64),
    Unsigned(u32),
    UnsignedBig(u64),
    Float(f32),
    Double(f64),
    List(Vec<Value>),
    Rational(u32, u32),
    RationalBig(u64, u64),
    SRational(i32, i32),
    SRationalBig(i64, i64),
    Ascii(String),
    Ifd(u32),
    IfdBig(u64),
}

impl Value {
    pub fn into_u8(self) -> TiffResult<u8> {
        match self {
            Byte(val) => Ok(val),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_i8(self) -> TiffResult<i8> {
        match self {
            SignedByte(val) => Ok(val),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_u16(self) -> TiffResult<u16> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val),
            Unsigned(val) => Ok(u16::try_from(val)?),
            UnsignedBig(val) => Ok(u16::try_from(val)?),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_i16(self) -> TiffResult<i16> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val),
            Signed(val) => Ok(i16::try_from(val)?),
            SignedBig(val) => Ok(i16::try_from(val)?),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_u32(self) -> TiffResult<u32> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Unsigned(val) => Ok(val),
            UnsignedBig(val) => Ok(u32::try_from(val)?),
            Ifd(val) => Ok(val),
            IfdBig(val) => Ok(u32::try_from(val)?),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_i32(self) -> TiffResult<i32> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val.into()),
            Signed(val) => Ok(val),
            SignedBig(val) => Ok(i32::try_from(val)?),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_u64(self) -> TiffResult<u64> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Unsigned(val) => Ok(val.into()),
            UnsignedBig(val) => Ok(val),
            Ifd(val) => Ok(val.into()),
            IfdBig(val) => Ok(val),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_i64(self) -> TiffResult<i64> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val.into()),
            Signed(val) => Ok(val.into()),
            SignedBig(val) => Ok(val),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_f32(self) -> TiffResult<f32> {
        match self {
            Float(val) => Ok(val),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_f64(self) -> TiffResult<f64> {
        match self {
            Float(val) => Ok(val.into()),
            Double(val) => Ok(val),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_string(self) -> TiffResult<String> {
        match self {
            Ascii(val) => Ok(val),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_u8_vec(self) -> TiffResult<Vec<u8>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    new_vec.push(v.into_u8()?)
                }
                Ok(new_vec)
            }
            Byte(val) => Ok(vec![val]),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_u16_vec(self) -> TiffResult<Vec<u16>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    new_vec.push(v.into_u16()?)
                }
                Ok(new_vec)
            }
            val => Ok(vec![val.into_u16()?]),
        }
    }

    pub fn into_u32_vec(self) -> TiffResult<Vec<u32>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    new_vec.push(v.into_u32()?)
                }
                Ok(new_vec)
            }
            Rational(numerator, denominator) => Ok(vec![numerator, denominator]),
            RationalBig(numerator, denominator) => {
                Ok(vec![u32::try_from(numerator)?, u32::try_from(denominator)?])
            }
            val => Ok(vec![val.into_u32()?]),
        }
    }

    pub fn into_i32_vec(self) -> TiffResult<Vec<i32>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    match v {
                        SRational(numerator, denominator) => {
                            new_vec.push(numerator);
                            new_vec.push(denominator);
                        }
                        SRationalBig(numerator, denominator) => {
                            new_vec.push(i32::try_from(numerator)?);
                            new_vec.push(i32::try_from(denominator)?);
                        }
                        _ => new_vec.push(v.into_i32()?),
                    }
                }
                Ok(new_vec)
            }
            SRational(numerator, denominator) => Ok(vec![numerator, denominator]),
            SRationalBig(numerator, denominator) => {
                Ok(vec![i32::try_from(numerator)?, i32::try_from(denominator)?])
            }
            val => Ok(vec![val.into_i32()?]),
        }
    }

    pub fn into_u64_vec(self) -> TiffResult<Vec<u64>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    new_vec.push(v.into_u64()?)
                }
                Ok(new_vec)
            }
            Rational(numerator, denominator) => Ok(vec![numerator.into(), denominator.into()]),
            RationalBig(numerator, denominator) => Ok(vec![numerator, denominator]),
            val => Ok(vec![val.into_u64()?]),
        }
    }

    pub fn into_i64_vec(self) -> TiffResult<Vec<i64>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    match v {
                        SRational(numerator, denominator) => {
                            new_vec.push(numerator.into());
                            new_vec.push(denominator.into());
                        }
                        SRationalBig(numerator, denominator) => {
                            new_vec.push(numerator);
                            new_vec.push(denominator);
                        }
                        _ => new_vec.push(v.into_i64()?),
                    }
                }
                Ok(new_vec)
            }
            SRational(numerator, denominator) => Ok(vec![numerator.into(), denominator.into()]),
            SRationalBig(numerator, denominator) => Ok(vec![numerator, denominator]),
            val => Ok(vec![val.into_i64()?]),
        }
    }

    pub fn into_f32_vec(self) -> TiffResult<Vec<f32>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    new_vec.push(v.into_f32()?)
                }
                Ok(new_vec)
            }
            Float(val) => Ok(vec![val]),
            val => Err(unexpected(val)),
        }
    }

    pub fn into_f64_vec(self) -> TiffResult<Vec<f64>> {
        match self {
            List(vec) => {
                let mut new_vec = Vec::with_capacity(vec.len());
                for v in vec {
                    new_vec.push(v.into_f64()?)
                }
                Ok(new_vec)
            }
            val => Ok(vec![val.into_f64()?]),
        }
    }
}

fn unexpected(_val: Value) -> TiffError {
    TiffError::TagError(TagDecodeError::UnexpectedType)
}

/// One undecoded 12 or 20 byte tag record as stored in a directory.
#[derive(Clone)]
pub(crate) struct RawEntry {
    pub(crate) code: u16,
    kind: u16,
    count: u64,
    /// The inline value-or-offset field. Only the first
    /// [`Format::inline_capacity`] bytes were read from the file.
    payload: [u8; 8],
}

impl std::fmt::Debug for RawEntry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        fmt.write_str(&format!(
            "RawEntry {{ code: {:?}, kind: {:?}, count: {:?}, payload: {:?} }}",
            self.code, self.kind, self.count, &self.payload
        ))
    }
}

impl RawEntry {
    /// Read one record at the current reader position.
    pub(crate) fn read<R: Read + Seek>(
        reader: &mut SmartReader<R>,
        format: &Format,
    ) -> TiffResult<RawEntry> {
        let code = reader.read_u16()?;
        let kind = reader.read_u16()?;
        let count = match format.variant() {
            Variant::Big => reader.read_u64()?,
            Variant::Classic => u64::from(reader.read_u32()?),
        };
        let mut payload = [0u8; 8];
        reader.read_exact(&mut payload[..format.inline_capacity() as usize])?;
        Ok(RawEntry {
            code,
            kind,
            count,
            payload,
        })
    }

    /// Returns a mem-reader over the inline value-or-offset field.
    fn payload_reader(&self, byte_order: ByteOrder) -> SmartReader<io::Cursor<&[u8]>> {
        SmartReader::wrap(io::Cursor::new(&self.payload[..]), byte_order)
    }

    /// The inline field interpreted as an offset.
    fn payload_offset(&self, format: &Format) -> TiffResult<u64> {
        let mut r = self.payload_reader(format.byte_order());
        match format.inline_capacity() {
            8 => Ok(r.read_u64()?),
            _ => Ok(u64::from(r.read_u32()?)),
        }
    }
}

/// A decoded tag record.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEntry {
    /// Wire type of the stored value.
    pub kind: Type,
    /// Declared number of values of that type.
    pub count: u64,
    /// The decoded value. Single-valued counts collapse to a scalar unless
    /// the code is registered in the always-sequence set.
    pub value: Value,
    /// Position of the value bytes when they were stored out of line.
    pub value_offset: Option<u64>,
}

/// Decode one raw record, resolving out-of-line values through `reader`.
///
/// Returns `None` for records with a value type this decoder does not know,
/// which readers are required to skip.
pub(crate) fn decode_entry<R: Read + Seek>(
    raw: &RawEntry,
    format: &Format,
    limits: &Limits,
    reader: &mut SmartReader<R>,
    channel_len: u64,
) -> TiffResult<Option<TagEntry>> {
    let kind = match Type::from_u16(raw.kind) {
        Some(kind) => kind,
        None => {
            warn!(
                code = raw.code,
                kind = raw.kind,
                "skipping tag with unknown value type"
            );
            return Ok(None);
        }
    };

    // Old laser-scan writers put the 16-bit pair of the bits-per-sample tag
    // out of line and leave the offset where the pair should be. Reinterpret
    // the field as an offset and re-read the pair there.
    if format.caps.legacy_bits_pair_fix
        && raw.code == Tag::BitsPerSample.to_u16()
        && kind == Type::SHORT
        && raw.count == 2
    {
        let offset = raw.payload_offset(format)?;
        validate_value_offset(offset, 4, channel_len)?;
        warn!(
            offset,
            "correcting legacy out-of-line encoding of the bits-per-sample pair"
        );
        reader.goto_offset(offset)?;
        let value = List(vec![Short(reader.read_u16()?), Short(reader.read_u16()?)]);
        return Ok(Some(TagEntry {
            kind,
            count: 2,
            value,
            value_offset: Some(offset),
        }));
    }

    let value_bytes = kind.value_bytes(raw.count)?;
    let sequence = is_always_sequence(raw.code);
    let forced_indirect = format.caps.forced_indirect.contains(&raw.code);

    if value_bytes <= format.inline_capacity() && !forced_indirect {
        let mut r = raw.payload_reader(format.byte_order());
        let value = read_value(&mut r, kind, raw.count, sequence)?;
        return Ok(Some(TagEntry {
            kind,
            count: raw.count,
            value,
            value_offset: None,
        }));
    }

    let offset = raw.payload_offset(format)?;
    validate_value_offset(offset, value_bytes, channel_len)?;
    if value_bytes > limits.ifd_value_size as u64 {
        return Err(TagDecodeError::ValueTooLarge(value_bytes).into());
    }

    let mut buf = vec![0; usize::try_from(value_bytes)?];
    reader.goto_offset(offset)?;
    reader.read_exact(&mut buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => TiffError::TagError(TagDecodeError::TruncatedValue),
        _ => TiffError::IoError(err),
    })?;
    let mut r = SmartReader::wrap(io::Cursor::new(buf), format.byte_order());
    let value = read_value(&mut r, kind, raw.count, sequence)?;
    Ok(Some(TagEntry {
        kind,
        count: raw.count,
        value,
        value_offset: Some(offset),
    }))
}

fn validate_value_offset(offset: u64, value_bytes: u64, channel_len: u64) -> TiffResult<()> {
    let past_end = offset
        .checked_add(value_bytes)
        .map_or(true, |end| end > channel_len);
    if offset < 8 || past_end {
        return Err(TagDecodeError::InvalidValueOffset {
            offset,
            len: channel_len,
        }
        .into());
    }
    Ok(())
}

/// Read `count` values of `kind` from the current position.
fn read_value<R: Read>(
    reader: &mut SmartReader<R>,
    kind: Type,
    count: u64,
    sequence: bool,
) -> TiffResult<Value> {
    if kind == Type::ASCII {
        let mut buf = vec![0; usize::try_from(count)?];
        reader.read_exact(&mut buf)?;
        if !buf.is_ascii() {
            return Err(TagDecodeError::InvalidAscii.into());
        }
        // Strings are null-terminated; trim anything downstream of the null.
        if let Some(first) = buf.iter().position(|&b| b == 0) {
            buf.truncate(first);
        }
        return Ok(Ascii(String::from_utf8(buf)?));
    }

    let mut values = Vec::with_capacity(usize::try_from(count)?);
    for _ in 0..count {
        values.push(read_element(reader, kind)?);
    }
    if values.len() == 1 && !sequence {
        Ok(values.remove(0))
    } else {
        Ok(List(values))
    }
}

fn read_element<R: Read>(reader: &mut SmartReader<R>, kind: Type) -> TiffResult<Value> {
    Ok(match kind {
        Type::BYTE | Type::UNDEFINED => {
            let mut buf = [0; 1];
            reader.read_exact(&mut buf)?;
            Byte(buf[0])
        }
        Type::SBYTE => SignedByte(reader.read_i8()?),
        Type::SHORT => Short(reader.read_u16()?),
        Type::SSHORT => SignedShort(reader.read_i16()?),
        Type::LONG => Unsigned(reader.read_u32()?),
        Type::SLONG => Signed(reader.read_i32()?),
        Type::FLOAT => Float(reader.read_f32()?),
        Type::DOUBLE => Double(reader.read_f64()?),
        Type::RATIONAL => Rational(reader.read_u32()?, reader.read_u32()?),
        Type::SRATIONAL => SRational(reader.read_i32()?, reader.read_i32()?),
        Type::LONG8 => UnsignedBig(reader.read_u64()?),
        Type::SLONG8 => SignedBig(reader.read_i64()?),
        Type::IFD => Ifd(reader.read_u32()?),
        Type::IFD8 => IfdBig(reader.read_u64()?),
        // Routed out before the element loop.
        Type::ASCII => unreachable!(),
    })
}

/// Reject directory offsets whose count and next-pointer fields could not
/// even be read.
pub(crate) fn check_directory_header(
    format: &Format,
    offset: IfdPointer,
    channel_len: u64,
) -> TiffResult<()> {
    let header_bytes = format.dir_count_bytes() + format.ifd_offset_bytes();
    let past_end = offset
        .0
        .checked_add(header_bytes)
        .map_or(true, |end| end > channel_len);
    if offset.0 < 8 || past_end {
        return Err(StructuralError::DirectoryOutOfBounds {
            offset: offset.0,
            len: channel_len,
        }
        .into());
    }
    Ok(())
}

/// Validate that `count` records fit between the directory offset and the
/// channel end. Returns the position of the next-pointer field.
pub(crate) fn check_directory_extent(
    format: &Format,
    offset: IfdPointer,
    count: u64,
    channel_len: u64,
) -> TiffResult<u64> {
    let records = count
        .checked_mul(format.tag_record_bytes())
        .ok_or(TiffError::LimitsExceeded)?;
    let next_pos = offset
        .0
        .checked_add(format.dir_count_bytes())
        .and_then(|n| n.checked_add(records));
    match next_pos {
        Some(pos)
            if pos
                .checked_add(format.ifd_offset_bytes())
                .map_or(false, |end| end <= channel_len) =>
        {
            Ok(pos)
        }
        _ => Err(StructuralError::DirectoryOutOfBounds {
            offset: offset.0,
            len: channel_len,
        }
        .into()),
    }
}

/// Validate the directory at `offset` and read its tag count.
fn begin_directory<R: Read + Seek>(
    reader: &mut SmartReader<R>,
    format: &Format,
    offset: IfdPointer,
    channel_len: u64,
) -> TiffResult<u64> {
    check_directory_header(format, offset, channel_len)?;
    reader.goto_offset(offset.0)?;
    let count = format.read_dir_count(reader)?;
    check_directory_extent(format, offset, count, channel_len)?;
    Ok(count)
}

/// Read and decode the whole directory at `offset`.
///
/// Records that fail to decode are logged, recorded on the directory and
/// dropped; only I/O failures of the channel itself abort the parse. Layout
/// derivation escalates dropped required tags afterwards.
pub(crate) fn read_directory<R: Read + Seek>(
    reader: &mut SmartReader<R>,
    format: &Format,
    limits: &Limits,
    offset: IfdPointer,
    channel_len: u64,
) -> TiffResult<Directory> {
    let count = begin_directory(reader, format, offset, channel_len)?;
    let record_base = offset.0 + format.dir_count_bytes();

    let mut dir = Directory::empty();
    for index in 0..count {
        // Value resolution moves the reader, so each record is seeked to
        // individually.
        reader.goto_offset(record_base + index * format.tag_record_bytes())?;
        let raw = RawEntry::read(reader, format)?;
        match decode_entry(&raw, format, limits, reader, channel_len) {
            Ok(Some(entry)) => {
                if dir.insert(raw.code, entry) {
                    warn!(code = raw.code, "duplicate tag code kept as shadowed entry");
                }
            }
            Ok(None) => {}
            Err(TiffError::TagError(err)) => {
                warn!(code = raw.code, error = %err, "dropping undecodable tag");
                dir.note_failed(raw.code, err);
            }
            Err(err) => return Err(err),
        }
    }

    reader.goto_offset(record_base + count * format.tag_record_bytes())?;
    let next = format.read_ifd_offset(reader)?;
    dir.set_next(Some(IfdPointer(next)));
    Ok(dir)
}
