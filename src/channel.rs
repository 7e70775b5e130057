//! Byte channels supplied by the caller.
//!
//! The decoder never opens files on its own. It reads from a [`Channel`], a
//! seekable byte source the caller hands over at open time. Channels are held
//! behind one mutex each so a document and its workers share a single point
//! of serialization, and file-backed channels can additionally be pooled in a
//! bounded [`FileCache`] that keeps at most N handles open.

use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

/// A seekable byte source for one TIFF document.
///
/// The only required surface is `Read + Seek`. Channels backed by a real file
/// may expose the handle through [`Channel::as_file`] to enable the zero-copy
/// memory-map decode path; everything else works through plain reads.
pub trait Channel: Read + Seek {
    /// The underlying file when this channel maps to one.
    fn as_file(&self) -> Option<&File> {
        None
    }
}

impl Channel for File {
    fn as_file(&self) -> Option<&File> {
        Some(self)
    }
}

impl Channel for BufReader<File> {
    fn as_file(&self) -> Option<&File> {
        Some(self.get_ref())
    }
}

impl<T: AsRef<[u8]>> Channel for Cursor<T> {}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn as_file(&self) -> Option<&File> {
        (**self).as_file()
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn as_file(&self) -> Option<&File> {
        (**self).as_file()
    }
}

/// A channel shared behind one lock.
///
/// Cloning is cheap and shares the same underlying channel. The lock is
/// uncontended in single-threaded use; decode batches its reads under one
/// acquisition so it is never held during CPU-bound work.
pub struct SharedChannel<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SharedChannel<C> {
    fn clone(&self) -> Self {
        SharedChannel {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> SharedChannel<C> {
    pub fn new(channel: C) -> Self {
        SharedChannel {
            inner: Arc::new(Mutex::new(channel)),
        }
    }

    /// Whether two handles refer to the same underlying channel.
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of handles currently referencing the channel.
    pub fn readers(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Acquire the channel. A poisoned lock is recovered rather than
    /// propagated; the channel state is a seek position only.
    pub(crate) fn lock(&self) -> MutexGuard<'_, C> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Memory-map a file-backed channel.
pub(crate) fn map_file(file: &File) -> io::Result<memmap2::Mmap> {
    // SAFETY: the mapping is read-only. The decoder never writes through the
    // channel, and concurrent truncation by other processes is outside the
    // program's control for any mapped I/O.
    unsafe { memmap2::MmapOptions::new().map(file) }
}

/// A bounded "keep N open" pool of file channels keyed by path.
///
/// Readers that repeatedly open the same files (multi-file stacks, tiled
/// pyramids) share one physical handle per path. When the pool is full the
/// least recently used entry is dropped from the pool, but the physical
/// handle closes only once the last [`SharedChannel`] clone referencing it
/// is released.
pub struct FileCache {
    open: Mutex<LruCache<PathBuf, SharedChannel<File>>>,
}

impl FileCache {
    /// Create a cache keeping at most `capacity` handles open.
    pub fn new(capacity: NonZeroUsize) -> Self {
        FileCache {
            open: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Open `path`, reusing the pooled channel when one exists.
    pub fn open(&self, path: impl AsRef<Path>) -> io::Result<SharedChannel<File>> {
        let path = path.as_ref().to_path_buf();
        let mut open = self.open.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(channel) = open.get(&path) {
            return Ok(channel.clone());
        }
        let channel = SharedChannel::new(File::open(&path)?);
        open.put(path, channel.clone());
        Ok(channel)
    }

    /// Drop the pooled entry for `path`, if any. Readers still holding the
    /// channel keep it alive; the handle closes with the last of them.
    pub fn release(&self, path: impl AsRef<Path>) -> bool {
        let mut open = self.open.lock().unwrap_or_else(|err| err.into_inner());
        open.pop(path.as_ref()).is_some()
    }

    /// Number of handles currently pooled.
    pub fn len(&self) -> usize {
        self.open.lock().unwrap_or_else(|err| err.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hash of a path usable as a channel identity in caller-side caches.
pub fn channel_identity(path: &Path) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}
