//! The buffer pool: an in-memory frame table that pins, dirties, and
//! evicts pages on behalf of the B+ tree (`spec.md` §4.3).
//!
//! Every page access goes through a single [`std::sync::Mutex`] guarding
//! the frame table, so "borrowing a page" here is realized as a short
//! locked closure (`with_page`/`with_page_mut`) rather than a returned
//! reference with its own lifetime — the design note in `spec.md` §9 warns
//! against raw pointers for the owned-pages/borrowed-handles relationship,
//! and a reference borrowed from inside a `Mutex` for longer than one call
//! would require exactly that. The page id itself is the caller's "handle"
//! and remains valid, per `spec.md` §4.3, until the matching `unpin_page`.

mod lru_replacer;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use common::{EngineError, EngineResult, PageId};
use hashbrown::HashMap;
use storage::{DiskManager, Page, PAGE_SIZE};

use lru_replacer::LruReplacer;

/// Per-frame bookkeeping, kept in a table parallel to the frame buffers
/// rather than folded into a single cache object (`spec.md` §11, grounded
/// in the original's separate frame/page-table split).
#[derive(Debug, Clone)]
struct FrameInfo {
    page_id: Option<PageId>,
    pin_count: u32,
    dirty: bool,
}

impl FrameInfo {
    fn empty() -> Self {
        Self {
            page_id: None,
            pin_count: 0,
            dirty: false,
        }
    }
}

struct Inner {
    frames: Vec<Page>,
    frame_info: Vec<FrameInfo>,
    page_table: HashMap<PageId, usize>,
    free_frames: Vec<usize>,
    replacer: LruReplacer,
}

/// Pinning buffer pool with LRU eviction over a fixed number of frames.
pub struct BufferPool {
    disk: Arc<DiskManager>,
    inner: Mutex<Inner>,
    pool_size: usize,
}

impl BufferPool {
    pub fn new(disk: Arc<DiskManager>, pool_size: usize) -> Self {
        assert!(pool_size > 0, "buffer pool must have at least one frame");
        let inner = Inner {
            frames: (0..pool_size).map(|_| Page::new(PageId::NONE)).collect(),
            frame_info: vec![FrameInfo::empty(); pool_size],
            page_table: HashMap::new(),
            free_frames: (0..pool_size).rev().collect(),
            replacer: LruReplacer::new(pool_size),
        };
        Self {
            disk,
            inner: Mutex::new(inner),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetches page `id`, pinning it (reusing the existing frame if
    /// already cached). `Err(BufferPoolFull)` iff every frame is pinned
    /// and the replacer has no candidate (`spec.md` §4.3).
    pub fn fetch_page(&self, id: PageId) -> EngineResult<PageId> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&frame) = inner.page_table.get(&id) {
            inner.frame_info[frame].pin_count += 1;
            inner.replacer.pin(frame);
            return Ok(id);
        }

        let frame = Self::select_frame(&mut inner, &self.disk)?;
        let mut buf = [0u8; PAGE_SIZE];
        self.disk.read_page(id, &mut buf)?;
        inner.frames[frame] = Page::from_bytes(buf);
        inner.frame_info[frame] = FrameInfo {
            page_id: Some(id),
            pin_count: 1,
            dirty: false,
        };
        inner.page_table.insert(id, frame);
        log::debug!("fetched page {:?} into frame {}", id, frame);
        Ok(id)
    }

    /// Allocates a fresh page via the disk manager and installs it
    /// zero-initialized, pinned, and dirty.
    pub fn new_page(&self) -> EngineResult<PageId> {
        let id = self.disk.allocate_page()?;
        let mut inner = self.inner.lock().unwrap();
        let frame = Self::select_frame(&mut inner, &self.disk)?;
        inner.frames[frame] = Page::new(id);
        inner.frame_info[frame] = FrameInfo {
            page_id: Some(id),
            pin_count: 1,
            dirty: true,
        };
        inner.page_table.insert(id, frame);
        log::debug!("allocated new page {:?} in frame {}", id, frame);
        Ok(id)
    }

    /// Picks a frame for a page about to be installed: a free frame first,
    /// then an LRU victim, flushing it if dirty.
    fn select_frame(inner: &mut Inner, disk: &DiskManager) -> EngineResult<usize> {
        if let Some(frame) = inner.free_frames.pop() {
            return Ok(frame);
        }
        let frame = inner.replacer.victim().ok_or(EngineError::BufferPoolFull)?;
        let info = inner.frame_info[frame].clone();
        if info.dirty {
            let page_id = info.page_id.expect("dirty frame must be mapped");
            let page = &mut inner.frames[frame];
            page.recompute_checksum();
            disk.write_page(page_id, page.as_bytes())?;
        }
        if let Some(old_id) = info.page_id {
            inner.page_table.remove(&old_id);
        }
        Ok(frame)
    }

    /// Decrements the pin count for `id`, OR-ing in `dirty`. Once the pin
    /// count reaches zero the frame becomes an eviction candidate again.
    pub fn unpin_page(&self, id: PageId, dirty: bool) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let frame = *inner
            .page_table
            .get(&id)
            .ok_or_else(|| EngineError::Internal(format!("unpin of unmapped page {id:?}")))?;
        let info = &mut inner.frame_info[frame];
        if info.pin_count == 0 {
            return Err(EngineError::Internal(format!(
                "page {id:?} unpinned more times than pinned"
            )));
        }
        info.pin_count -= 1;
        info.dirty |= dirty;
        if info.pin_count == 0 {
            inner.replacer.unpin(frame);
        }
        Ok(())
    }

    /// Runs `f` against the cached page for `id`. `id` must currently be
    /// pinned (fetched via [`BufferPool::fetch_page`] or
    /// [`BufferPool::new_page`] and not yet fully unpinned).
    pub fn with_page<R>(&self, id: PageId, f: impl FnOnce(&Page) -> R) -> EngineResult<R> {
        let inner = self.inner.lock().unwrap();
        let frame = *inner
            .page_table
            .get(&id)
            .ok_or_else(|| EngineError::Internal(format!("page {id:?} is not pinned")))?;
        Ok(f(&inner.frames[frame]))
    }

    /// As [`BufferPool::with_page`], but marks the frame dirty since the
    /// closure may mutate it.
    pub fn with_page_mut<R>(&self, id: PageId, f: impl FnOnce(&mut Page) -> R) -> EngineResult<R> {
        let mut inner = self.inner.lock().unwrap();
        let frame = *inner
            .page_table
            .get(&id)
            .ok_or_else(|| EngineError::Internal(format!("page {id:?} is not pinned")))?;
        let result = f(&mut inner.frames[frame]);
        inner.frame_info[frame].dirty = true;
        Ok(result)
    }

    /// Runs `f` against two distinct pinned pages at once, marking both
    /// frames dirty. Needed by the B+ tree's split operations, which must
    /// redistribute entries between a left and a right page simultaneously
    /// (`spec.md` §4.4). Panics if `a == b`.
    pub fn with_two_pages_mut<R>(
        &self,
        a: PageId,
        b: PageId,
        f: impl FnOnce(&mut Page, &mut Page) -> R,
    ) -> EngineResult<R> {
        assert_ne!(a, b, "with_two_pages_mut requires distinct page ids");
        let mut inner = self.inner.lock().unwrap();
        let frame_a = *inner
            .page_table
            .get(&a)
            .ok_or_else(|| EngineError::Internal(format!("page {a:?} is not pinned")))?;
        let frame_b = *inner
            .page_table
            .get(&b)
            .ok_or_else(|| EngineError::Internal(format!("page {b:?} is not pinned")))?;

        let (pa, pb) = if frame_a < frame_b {
            let (left, right) = inner.frames.split_at_mut(frame_b);
            (&mut left[frame_a], &mut right[0])
        } else {
            let (left, right) = inner.frames.split_at_mut(frame_a);
            (&mut right[0], &mut left[frame_b])
        };
        let result = f(pa, pb);
        inner.frame_info[frame_a].dirty = true;
        inner.frame_info[frame_b].dirty = true;
        Ok(result)
    }

    /// Writes a dirty frame through to disk, recomputing its checksum
    /// first, and clears the dirty bit.
    pub fn flush_page(&self, id: PageId) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let frame = *inner
            .page_table
            .get(&id)
            .ok_or_else(|| EngineError::Internal(format!("page {id:?} is not cached")))?;
        if inner.frame_info[frame].dirty {
            inner.frames[frame].recompute_checksum();
            self.disk.write_page(id, inner.frames[frame].as_bytes())?;
            inner.frame_info[frame].dirty = false;
        }
        Ok(())
    }

    /// Flushes every dirty frame. Returns the first error encountered but
    /// attempts all frames regardless (`spec.md` §7).
    pub fn flush_all_pages(&self) -> EngineResult<()> {
        let ids: Vec<PageId> = {
            let inner = self.inner.lock().unwrap();
            inner.page_table.keys().copied().collect()
        };
        let mut first_err = None;
        for id in ids {
            if let Err(e) = self.flush_page(id) {
                log::warn!("flush of page {id:?} failed: {e}");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Removes `id` from the pool and frees it on disk. Fails if the page
    /// is currently pinned (`spec.md` §4.3, §7).
    pub fn delete_page(&self, id: PageId) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&frame) = inner.page_table.get(&id) {
            if inner.frame_info[frame].pin_count > 0 {
                return Err(EngineError::PagePinned(id));
            }
            inner.replacer.pin(frame);
            inner.page_table.remove(&id);
            inner.frames[frame].reset();
            inner.frame_info[frame] = FrameInfo::empty();
            inner.free_frames.push(frame);
        }
        drop(inner);
        self.disk.deallocate_page(id)
    }

    pub fn pin_count(&self, id: PageId) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        inner
            .page_table
            .get(&id)
            .map(|&frame| inner.frame_info[frame].pin_count)
    }

    pub fn contains_page(&self, id: PageId) -> bool {
        self.inner.lock().unwrap().page_table.contains_key(&id)
    }
}
