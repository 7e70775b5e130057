use core::fmt;
use std::{collections::BTreeMap, num::NonZeroU64};

use crate::{
    decoder::ifd::{TagEntry, Value},
    error::TagDecodeError,
    tags::{IfdPointer, Tag},
};

/// An Image File Directory (IFD) with decoded values.
///
/// A directory maps [`Tag`] codes to decoded [`TagEntry`]s. Vendor writers
/// occasionally emit the same code twice in one directory; later occurrences
/// are kept distinct in a shadow list instead of overwriting the first, so
/// layout derivation sees a stable value while nothing is silently lost.
#[doc(alias = "IFD")]
#[derive(Clone)]
pub struct Directory {
    /// There are at most `u16::MAX` entries in any single directory, the count is stored as a
    /// 2-byte value. The order in the file is implied to be ascending by tag value (the decoder
    /// does not mind unordered entries).
    entries: BTreeMap<u16, TagEntry>,
    shadowed: Vec<(u16, TagEntry)>,
    failed: Vec<(u16, TagDecodeError)>,
    next_ifd: Option<NonZeroU64>,
}

impl Directory {
    /// Create a directory in an initial state without entries.
    pub fn empty() -> Self {
        Directory {
            entries: BTreeMap::new(),
            shadowed: Vec::new(),
            failed: Vec::new(),
            next_ifd: None,
        }
    }

    /// Retrieve the entry associated with a tag.
    pub fn get(&self, tag: Tag) -> Option<&TagEntry> {
        self.entries.get(&tag.to_u16())
    }

    /// Retrieve the entry associated with a raw tag code.
    pub fn get_code(&self, code: u16) -> Option<&TagEntry> {
        self.entries.get(&code)
    }

    /// Retrieve the decoded value associated with a tag.
    pub fn value(&self, tag: Tag) -> Option<&Value> {
        self.get(tag).map(|entry| &entry.value)
    }

    /// Check if the directory contains a specified tag.
    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag.to_u16())
    }

    /// Iterate over all known and unknown tags in this directory.
    pub fn iter(&self) -> impl Iterator<Item = (Tag, &TagEntry)> + '_ {
        self.entries
            .iter()
            .map(|(k, v)| (Tag::from_u16_exhaustive(*k), v))
    }

    /// Iterate over duplicate occurrences that were shadowed by an earlier
    /// entry with the same code, in file order.
    pub fn shadowed(&self) -> impl Iterator<Item = (Tag, &TagEntry)> + '_ {
        self.shadowed
            .iter()
            .map(|(k, v)| (Tag::from_u16_exhaustive(*k), v))
    }

    /// Iterate over tag codes whose values could not be decoded, in file
    /// order. The records themselves were dropped during parsing.
    pub fn failed(&self) -> impl Iterator<Item = (Tag, TagDecodeError)> + '_ {
        self.failed
            .iter()
            .map(|&(k, err)| (Tag::from_u16_exhaustive(k), err))
    }

    /// Look up the decode failure recorded for a tag, if any.
    pub(crate) fn failure_for(&self, tag: Tag) -> Option<TagDecodeError> {
        let code = tag.to_u16();
        self.failed
            .iter()
            .find(|&&(k, _)| k == code)
            .map(|&(_, err)| err)
    }

    pub(crate) fn note_failed(&mut self, code: u16, err: TagDecodeError) {
        self.failed.push((code, err));
    }

    /// Insert an entry. The first occurrence of a code wins; repeats are
    /// pushed to the shadow list. Returns whether the entry was shadowed.
    pub(crate) fn insert(&mut self, code: u16, entry: TagEntry) -> bool {
        match self.entries.entry(code) {
            std::collections::btree_map::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                false
            }
            std::collections::btree_map::Entry::Occupied(_) => {
                self.shadowed.push((code, entry));
                true
            }
        }
    }

    /// Get the number of distinct codes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are any entries in this directory. Note that an empty directory can not be
    /// encoded in the file, it must contain at least one entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the pointer to the next IFD, if it was defined.
    pub fn next(&self) -> Option<IfdPointer> {
        self.next_ifd.map(|n| IfdPointer(n.get()))
    }

    pub(crate) fn set_next(&mut self, next: Option<IfdPointer>) {
        self.next_ifd = next.and_then(|n| NonZeroU64::new(n.0));
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field(
                "entries",
                &self.entries.iter().map(|(k, v)| (Tag::from_u16(*k), v)),
            )
            .field("shadowed", &self.shadowed.len())
            .field("failed", &self.failed.len())
            .field("next_ifd", &self.next_ifd)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Directory;
    use crate::decoder::ifd::{TagEntry, Value};
    use crate::tags::{IfdPointer, Tag, Type};

    fn entry(n: u32) -> TagEntry {
        TagEntry {
            kind: Type::LONG,
            count: 1,
            value: Value::Unsigned(n),
            value_offset: None,
        }
    }

    #[test]
    fn duplicate_codes_are_shadowed() {
        let mut dir = Directory::empty();
        assert!(!dir.insert(Tag::ImageWidth.to_u16(), entry(640)));
        assert!(dir.insert(Tag::ImageWidth.to_u16(), entry(641)));

        assert_eq!(dir.len(), 1);
        assert_eq!(
            dir.value(Tag::ImageWidth),
            Some(&Value::Unsigned(640)),
            "the first occurrence stays authoritative"
        );
        let shadowed: Vec<_> = dir.shadowed().collect();
        assert_eq!(shadowed.len(), 1);
        assert_eq!(shadowed[0].0, Tag::ImageWidth);
        assert_eq!(shadowed[0].1.value, Value::Unsigned(641));
    }

    #[test]
    fn iteration_order() {
        let mut dir = Directory::empty();
        for code in (0..32).rev() {
            dir.insert(code, entry(u32::from(code)));
        }

        let iter_order: Vec<u16> = dir.iter().map(|(tag, _e)| tag.to_u16()).collect();
        assert_eq!(
            iter_order,
            (0..32).collect::<Vec<_>>(),
            "Tags must be in ascending order according to the specification"
        );
    }

    #[test]
    fn next_pointer_zero_terminates() {
        let mut dir = Directory::empty();
        dir.set_next(Some(IfdPointer(0)));
        assert_eq!(dir.next(), None);
        dir.set_next(Some(IfdPointer(64)));
        assert_eq!(dir.next(), Some(IfdPointer(64)));
    }
}
