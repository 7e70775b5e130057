//! In-memory TIFF builders shared by the integration tests.
//!
//! Tests construct whole containers byte by byte instead of shipping binary
//! fixtures: a builder lays out the header, a segment data region, the
//! directory chain and an out-of-line value heap, then hands back the
//! finished channel.

#![allow(dead_code)]

use std::io::Cursor;

use tiffstack::tags::Tag;

/// Container flavor to emit.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    ClassicLe,
    ClassicBe,
    BigLe,
    BigBe,
    /// Classic little-endian records with 8-byte directory pointers.
    Ndpi,
}

impl Kind {
    fn le(self) -> bool {
        !matches!(self, Kind::ClassicBe | Kind::BigBe)
    }

    fn big(self) -> bool {
        matches!(self, Kind::BigLe | Kind::BigBe)
    }

    fn header_len(self) -> u64 {
        match self {
            Kind::ClassicLe | Kind::ClassicBe => 8,
            Kind::Ndpi => 12,
            Kind::BigLe | Kind::BigBe => 16,
        }
    }

    fn ptr_bytes(self) -> u64 {
        match self {
            Kind::ClassicLe | Kind::ClassicBe => 4,
            Kind::Ndpi | Kind::BigLe | Kind::BigBe => 8,
        }
    }

    fn count_bytes(self) -> u64 {
        if self.big() {
            8
        } else {
            2
        }
    }

    fn record_bytes(self) -> u64 {
        if self.big() {
            20
        } else {
            12
        }
    }

    fn inline_capacity(self) -> usize {
        if self.big() {
            8
        } else {
            4
        }
    }
}

/// Where a next-directory pointer (or the header's first pointer) leads.
#[derive(Clone, Copy)]
pub enum Link {
    /// The following directory in insertion order, or the terminator for
    /// the last one.
    Auto,
    /// The zero terminator.
    End,
    /// The directory at the given builder index.
    Dir(usize),
    /// A verbatim offset, valid or not.
    Raw(u64),
}

struct RawTag {
    code: u16,
    kind: u16,
    count: u64,
    /// Value bytes, already in the file's byte order.
    data: Vec<u8>,
    /// Verbatim value-or-offset field, overriding the derived one.
    field: Option<Vec<u8>>,
}

/// One directory under construction.
pub struct Dir {
    le: bool,
    entries: Vec<RawTag>,
    next: Link,
    count_override: Option<u64>,
}

impl Dir {
    fn push(&mut self, code: u16, kind: u16, count: u64, data: Vec<u8>) -> &mut Self {
        self.entries.push(RawTag {
            code,
            kind,
            count,
            data,
            field: None,
        });
        self
    }

    fn u16s(&self, values: &[u16]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|&v| if self.le { v.to_le_bytes() } else { v.to_be_bytes() })
            .collect()
    }

    fn u32s(&self, values: &[u32]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|&v| if self.le { v.to_le_bytes() } else { v.to_be_bytes() })
            .collect()
    }

    fn u64s(&self, values: &[u64]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|&v| if self.le { v.to_le_bytes() } else { v.to_be_bytes() })
            .collect()
    }

    pub fn short(&mut self, tag: Tag, value: u16) -> &mut Self {
        let data = self.u16s(&[value]);
        self.push(tag.to_u16(), 3, 1, data)
    }

    pub fn shorts(&mut self, tag: Tag, values: &[u16]) -> &mut Self {
        let data = self.u16s(values);
        self.push(tag.to_u16(), 3, values.len() as u64, data)
    }

    pub fn long(&mut self, tag: Tag, value: u32) -> &mut Self {
        let data = self.u32s(&[value]);
        self.push(tag.to_u16(), 4, 1, data)
    }

    pub fn longs(&mut self, tag: Tag, values: &[u32]) -> &mut Self {
        let data = self.u32s(values);
        self.push(tag.to_u16(), 4, values.len() as u64, data)
    }

    pub fn long8s(&mut self, tag: Tag, values: &[u64]) -> &mut Self {
        let data = self.u64s(values);
        self.push(tag.to_u16(), 16, values.len() as u64, data)
    }

    pub fn slong8(&mut self, tag: Tag, value: i64) -> &mut Self {
        let data = self.u64s(&[value as u64]);
        self.push(tag.to_u16(), 17, 1, data)
    }

    pub fn ifd8s(&mut self, tag: Tag, values: &[u64]) -> &mut Self {
        let data = self.u64s(values);
        self.push(tag.to_u16(), 18, values.len() as u64, data)
    }

    /// ASCII value with the trailing null included in the count.
    pub fn ascii(&mut self, tag: Tag, text: &str) -> &mut Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        let count = data.len() as u64;
        self.push(tag.to_u16(), 2, count, data)
    }

    pub fn rational(&mut self, tag: Tag, numerator: u32, denominator: u32) -> &mut Self {
        let data = self.u32s(&[numerator, denominator]);
        self.push(tag.to_u16(), 5, 1, data)
    }

    pub fn bytes(&mut self, tag: Tag, values: &[u8]) -> &mut Self {
        self.push(tag.to_u16(), 7, values.len() as u64, values.to_vec())
    }

    /// Any code, wire type and pre-encoded value bytes.
    pub fn raw(&mut self, code: u16, kind: u16, count: u64, data: Vec<u8>) -> &mut Self {
        self.push(code, kind, count, data)
    }

    /// Any code and wire type with a verbatim value-or-offset field. The
    /// builder neither validates nor relocates it.
    pub fn raw_field(&mut self, code: u16, kind: u16, count: u64, field: Vec<u8>) -> &mut Self {
        self.entries.push(RawTag {
            code,
            kind,
            count,
            data: Vec::new(),
            field: Some(field),
        });
        self
    }

    /// Override where this directory's next pointer leads.
    pub fn link(&mut self, next: Link) -> &mut Self {
        self.next = next;
        self
    }

    /// Write this record count into the file instead of the real one.
    pub fn declare_count(&mut self, count: u64) -> &mut Self {
        self.count_override = Some(count);
        self
    }
}

/// Accumulates blobs and directories, then serializes the container.
pub struct Builder {
    kind: Kind,
    blobs: Vec<u8>,
    dirs: Vec<Dir>,
    first: Link,
}

impl Builder {
    pub fn new(kind: Kind) -> Builder {
        Builder {
            kind,
            blobs: Vec::new(),
            dirs: Vec::new(),
            first: Link::Auto,
        }
    }

    /// Append raw bytes (typically segment data) and return their absolute
    /// offset. Blobs land directly behind the header, before any directory,
    /// so the offset is final at the time of the call.
    pub fn add_blob(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.kind.header_len() + self.blobs.len() as u64;
        self.blobs.extend_from_slice(bytes);
        offset
    }

    /// Append a directory and return it for tag insertion. Directories are
    /// chained in insertion order unless a link override says otherwise.
    pub fn dir(&mut self) -> &mut Dir {
        self.dirs.push(Dir {
            le: self.kind.le(),
            entries: Vec::new(),
            next: Link::Auto,
            count_override: None,
        });
        self.dirs.last_mut().unwrap()
    }

    /// Override where the header's first-directory pointer leads.
    pub fn first_link(&mut self, link: Link) {
        self.first = link;
    }

    /// Directories added so far, for late adjustments.
    pub fn dirs_mut(&mut self) -> &mut [Dir] {
        &mut self.dirs
    }

    pub fn build(self) -> Vec<u8> {
        let kind = self.kind;
        let le = kind.le();

        // Directory offsets, then the value heap behind the last directory.
        let mut dir_offsets = Vec::with_capacity(self.dirs.len());
        let mut at = kind.header_len() + self.blobs.len() as u64;
        for dir in &self.dirs {
            dir_offsets.push(at);
            at += kind.count_bytes()
                + dir.entries.len() as u64 * kind.record_bytes()
                + kind.ptr_bytes();
        }
        let heap_base = at;
        let mut heap: Vec<u8> = Vec::new();

        let resolve = |link: Link, from: Option<usize>| -> u64 {
            match link {
                Link::Auto => match from {
                    Some(i) if i + 1 < dir_offsets.len() => dir_offsets[i + 1],
                    Some(_) => 0,
                    None => dir_offsets.first().copied().unwrap_or(0),
                },
                Link::End => 0,
                Link::Dir(i) => dir_offsets[i],
                Link::Raw(offset) => offset,
            }
        };

        let mut out = Vec::new();
        out.extend_from_slice(if le { b"II" } else { b"MM" });
        if kind.big() {
            put_u16(&mut out, le, 43);
            put_u16(&mut out, le, 8);
            put_u16(&mut out, le, 0);
        } else {
            put_u16(&mut out, le, 42);
        }
        put_ptr(&mut out, le, kind.ptr_bytes(), resolve(self.first, None));

        out.extend_from_slice(&self.blobs);

        for (index, dir) in self.dirs.iter().enumerate() {
            debug_assert_eq!(out.len() as u64, dir_offsets[index]);
            let declared = dir.count_override.unwrap_or(dir.entries.len() as u64);
            if kind.big() {
                put_u64(&mut out, le, declared);
            } else {
                put_u16(&mut out, le, declared as u16);
            }
            for entry in &dir.entries {
                put_u16(&mut out, le, entry.code);
                put_u16(&mut out, le, entry.kind);
                if kind.big() {
                    put_u64(&mut out, le, entry.count);
                } else {
                    put_u32(&mut out, le, entry.count as u32);
                }
                let capacity = kind.inline_capacity();
                let mut field = vec![0u8; capacity];
                if let Some(verbatim) = &entry.field {
                    let n = verbatim.len().min(capacity);
                    field[..n].copy_from_slice(&verbatim[..n]);
                } else if entry.data.len() <= capacity {
                    field[..entry.data.len()].copy_from_slice(&entry.data);
                } else {
                    let offset = heap_base + heap.len() as u64;
                    heap.extend_from_slice(&entry.data);
                    field.clear();
                    if capacity == 8 {
                        put_u64(&mut field, le, offset);
                    } else {
                        put_u32(&mut field, le, offset as u32);
                    }
                }
                out.extend_from_slice(&field);
            }
            put_ptr(&mut out, le, kind.ptr_bytes(), resolve(dir.next, Some(index)));
        }

        out.extend_from_slice(&heap);
        out
    }

    pub fn channel(self) -> Cursor<Vec<u8>> {
        Cursor::new(self.build())
    }
}

fn put_u16(out: &mut Vec<u8>, le: bool, v: u16) {
    out.extend_from_slice(&if le { v.to_le_bytes() } else { v.to_be_bytes() });
}

fn put_u32(out: &mut Vec<u8>, le: bool, v: u32) {
    out.extend_from_slice(&if le { v.to_le_bytes() } else { v.to_be_bytes() });
}

fn put_u64(out: &mut Vec<u8>, le: bool, v: u64) {
    out.extend_from_slice(&if le { v.to_le_bytes() } else { v.to_be_bytes() });
}

fn put_ptr(out: &mut Vec<u8>, le: bool, bytes: u64, v: u64) {
    if bytes == 8 {
        put_u64(out, le, v);
    } else {
        put_u32(out, le, v as u32);
    }
}

/// PackBits-encode `data` as plain literal runs.
pub fn packbits_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(128) {
        out.push((chunk.len() - 1) as u8);
        out.extend_from_slice(chunk);
    }
    out
}
