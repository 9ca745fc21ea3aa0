//! Byte sources and copy-free windows over them.
//!
//! A [`DataSource`] is a finite, read-only image: either an owned buffer or a
//! read-only memory map of a disk image. Every source carries a [`CancelToken`]
//! that cursors check on each refill, so a long carve can be stopped from
//! another thread.

use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

/// Cooperative cancellation flag shared between a source and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

enum Backing {
    Owned(Vec<u8>),
    Mapped(memmap2::Mmap),
}

/// A finite, seekable, read-only byte source.
pub struct DataSource {
    name: String,
    backing: Backing,
    cancel: CancelToken,
}

impl DataSource {
    /// Wrap an in-memory buffer.
    pub fn from_vec(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            backing: Backing::Owned(data),
            cancel: CancelToken::new(),
        }
    }

    /// Memory-map an image file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open image: {}", path.display()))?;
        let len = file.metadata()?.len();
        anyhow::ensure!(len > 0, "Image file is empty: {}", path.display());

        // SAFETY: the map is read-only and the image is not modified while we hold it.
        let mmap = unsafe {
            memmap2::Mmap::map(&file)
                .with_context(|| format!("Failed to mmap image: {}", path.display()))?
        };

        tracing::debug!(path = %path.display(), len, "Mapped image");

        Ok(Self {
            name: path.display().to_string(),
            backing: Backing::Mapped(mmap),
            cancel: CancelToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Owned(v) => v,
            Backing::Mapped(m) => m,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Token that cancels every cursor reading from this source.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bytes in `range`, clamped to the source length.
    pub fn slice(&self, range: Range<u64>) -> &[u8] {
        let len = self.len();
        let start = range.start.min(len) as usize;
        let end = range.end.clamp(range.start.min(len), len) as usize;
        &self.bytes()[start..end]
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A view over one or more byte ranges of a shared source.
///
/// Appending and sub-ranging only manipulate the range list; the underlying
/// bytes are never copied until [`ByteWindow::to_vec`] is called.
#[derive(Clone)]
pub struct ByteWindow {
    source: Arc<DataSource>,
    segments: Vec<Range<u64>>,
}

impl ByteWindow {
    /// View of `length` bytes at `start_offset`, clamped to the source.
    pub fn new(source: Arc<DataSource>, start_offset: u64, length: u64) -> Self {
        let end = start_offset.saturating_add(length).min(source.len());
        let start = start_offset.min(end);
        Self {
            source,
            segments: vec![start..end],
        }
    }

    /// View over the whole source.
    pub fn whole(source: Arc<DataSource>) -> Self {
        let len = source.len();
        Self::new(source, 0, len)
    }

    pub fn source(&self) -> &Arc<DataSource> {
        &self.source
    }

    pub fn start_offset(&self) -> u64 {
        self.segments.first().map_or(0, |r| r.start)
    }

    pub fn end_offset(&self) -> u64 {
        self.segments.last().map_or(0, |r| r.end)
    }

    pub fn len(&self) -> u64 {
        self.segments.iter().map(|r| r.end - r.start).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segments(&self) -> &[Range<u64>] {
        &self.segments
    }

    /// Concatenate `other` after this window. Touching ranges are merged.
    ///
    /// Returns `None` if the windows view different sources.
    pub fn append(&self, other: &ByteWindow) -> Option<ByteWindow> {
        if !Arc::ptr_eq(&self.source, &other.source) {
            return None;
        }
        let mut segments = self.segments.clone();
        for seg in &other.segments {
            match segments.last_mut() {
                Some(last) if last.end == seg.start => last.end = seg.end,
                _ => segments.push(seg.clone()),
            }
        }
        segments.retain(|r| r.start < r.end);
        Some(ByteWindow {
            source: Arc::clone(&self.source),
            segments,
        })
    }

    /// Sub-view of `length` bytes starting `offset` bytes into this window.
    pub fn sub_window(&self, offset: u64, length: u64) -> ByteWindow {
        let mut skip = offset;
        let mut want = length;
        let mut segments = Vec::new();
        for seg in &self.segments {
            let seg_len = seg.end - seg.start;
            if skip >= seg_len {
                skip -= seg_len;
                continue;
            }
            let start = seg.start + skip;
            let take = (seg.end - start).min(want);
            if take > 0 {
                segments.push(start..start + take);
            }
            want -= take;
            skip = 0;
            if want == 0 {
                break;
            }
        }
        ByteWindow {
            source: Arc::clone(&self.source),
            segments,
        }
    }

    /// Materialize the viewed bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        for seg in &self.segments {
            out.extend_from_slice(self.source.slice(seg.clone()));
        }
        out
    }
}

impl fmt::Debug for ByteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteWindow")
            .field("source", &self.source.name())
            .field("segments", &self.segments)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(n: u8) -> Arc<DataSource> {
        Arc::new(DataSource::from_vec("test", (0..n).collect()))
    }

    #[test]
    fn window_clamps_to_source() {
        let w = ByteWindow::new(source(10), 8, 100);
        assert_eq!(w.start_offset(), 8);
        assert_eq!(w.len(), 2);
        assert_eq!(w.to_vec(), vec![8, 9]);
    }

    #[test]
    fn append_merges_adjacent_ranges() {
        let src = source(32);
        let a = ByteWindow::new(Arc::clone(&src), 0, 4);
        let b = ByteWindow::new(Arc::clone(&src), 4, 4);
        let c = ByteWindow::new(Arc::clone(&src), 20, 2);

        let ab = a.append(&b).unwrap();
        assert_eq!(ab.segments(), &[0..8]);

        let abc = ab.append(&c).unwrap();
        assert_eq!(abc.segments(), &[0..8, 20..22]);
        assert_eq!(abc.len(), 10);
        assert_eq!(abc.end_offset(), 22);
        assert_eq!(abc.to_vec(), vec![0, 1, 2, 3, 4, 5, 6, 7, 20, 21]);
    }

    #[test]
    fn append_rejects_foreign_source() {
        let a = ByteWindow::whole(source(4));
        let b = ByteWindow::whole(source(4));
        assert!(a.append(&b).is_none());
    }

    #[test]
    fn sub_window_spans_segments() {
        let src = source(32);
        let w = ByteWindow::new(Arc::clone(&src), 0, 4)
            .append(&ByteWindow::new(Arc::clone(&src), 10, 4))
            .unwrap();
        let sub = w.sub_window(2, 4);
        assert_eq!(sub.segments(), &[2..4, 10..12]);
        assert_eq!(sub.to_vec(), vec![2, 3, 10, 11]);
    }

    #[test]
    fn cancel_token_is_shared() {
        let src = DataSource::from_vec("c", vec![0; 4]);
        let token = src.cancel_token();
        assert!(!src.is_cancelled());
        token.cancel();
        assert!(src.is_cancelled());
    }

    #[test]
    fn open_maps_file_and_rejects_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        let src = DataSource::open(file.path()).unwrap();
        assert_eq!(src.bytes(), &[1, 2, 3]);

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(DataSource::open(empty.path()).is_err());
    }
}
