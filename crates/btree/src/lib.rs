//! The ordered key-value map itself: search, insert, update, remove,
//! range, and scan over leaf/internal pages served by a [`buffer::BufferPool`]
//! (`spec.md` §4.5).
//!
//! The tree holds no page objects of its own — only a root page id and a
//! count (`spec.md` §3) — and descends by fetching/unpinning one page at a
//! time, never holding a parent pinned while its child is fetched.

mod internal;
mod leaf;


use std::sync::{Arc, Mutex};

use buffer::BufferPool;
use common::{EngineError, EngineResult, Lsn, PageId};
use storage::NodeKind;

struct TreeState {
    root: PageId,
    size: u64,
}

/// A disk-backed B+ tree mapping byte-string keys to byte-string values,
/// duplicates disallowed.
pub struct BPlusTree {
    pool: Arc<BufferPool>,
    state: Mutex<TreeState>,
}

impl BPlusTree {
    /// Opens a tree rooted at `root`. Passing [`PageId::NONE`] bootstraps a
    /// fresh tree: a single, empty leaf becomes the root (`spec.md` §4.5).
    /// `size` is the tree's externally persisted entry count (the engine
    /// layer, not the tree, is responsible for remembering it across
    /// restarts).
    pub fn open(pool: Arc<BufferPool>, root: PageId, size: u64) -> EngineResult<Self> {
        let root = if root.is_valid() {
            root
        } else {
            let new_root = pool.new_page()?;
            pool.with_page_mut(new_root, leaf::init)?;
            pool.unpin_page(new_root, true)?;
            new_root
        };
        Ok(Self {
            pool,
            state: Mutex::new(TreeState { root, size }),
        })
    }

    pub fn root_page_id(&self) -> PageId {
        self.state.lock().unwrap().root
    }

    pub fn size(&self) -> u64 {
        self.state.lock().unwrap().size
    }

    fn validate_entry(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("key must not be empty".into()));
        }
        if key.len() + value.len() > leaf::MAX_ENTRY_SIZE {
            return Err(EngineError::InvalidArgument(format!(
                "key+value of {} bytes exceeds the {}-byte leaf capacity",
                key.len() + value.len(),
                leaf::MAX_ENTRY_SIZE
            )));
        }
        Ok(())
    }

    /// Descends from `root` to the leaf that would contain `key`, pinning
    /// internal pages only for the duration of their own `find_child` call
    /// and returning the leaf still pinned.
    fn find_leaf_pinned(&self, root: PageId, key: &[u8]) -> EngineResult<PageId> {
        self.pool.fetch_page(root)?;
        let mut current = root;
        loop {
            let kind = self
                .pool
                .with_page(current, |p| p.header().unwrap().node_kind)?;
            if kind == NodeKind::Leaf {
                return Ok(current);
            }
            let child = self
                .pool
                .with_page(current, |p| internal::find_child(p, key))?;
            self.pool.fetch_page(child)?;
            self.pool.unpin_page(current, false)?;
            current = child;
        }
    }

    fn leftmost_leaf_pinned(&self, root: PageId) -> EngineResult<PageId> {
        self.find_leaf_pinned(root, &[])
    }

    pub fn find(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let root = self.state.lock().unwrap().root;
        let leaf = self.find_leaf_pinned(root, key)?;
        let result = self.pool.with_page(leaf, |p| leaf::find(p, key))?;
        self.pool.unpin_page(leaf, false)?;
        Ok(result)
    }

    pub fn contains(&self, key: &[u8]) -> EngineResult<bool> {
        Ok(self.find(key)?.is_some())
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        self.insert_with_lsn(key, value, Lsn::NONE)
    }

    /// As [`BPlusTree::insert`], but stamps every page this call creates or
    /// mutates with `lsn` (a no-op when `lsn` is [`Lsn::NONE`]). The engine
    /// layer uses this to satisfy `spec.md` §2's "every mutation... stamps
    /// its LSN on the modified page" once a WAL record has been appended
    /// for the same logical operation.
    pub fn insert_with_lsn(&self, key: &[u8], value: &[u8], lsn: Lsn) -> EngineResult<bool> {
        self.validate_entry(key, value)?;
        let mut state = self.state.lock().unwrap();
        self.insert_locked(&mut state, key, value, lsn)
    }

    fn insert_locked(
        &self,
        state: &mut TreeState,
        key: &[u8],
        value: &[u8],
        lsn: Lsn,
    ) -> EngineResult<bool> {
        let leaf = self.find_leaf_pinned(state.root, key)?;
        match self.pool.with_page_mut(leaf, |p| leaf::insert(p, key, value))? {
            Ok(true) => {
                self.stamp_lsn(leaf, lsn)?;
                self.pool.unpin_page(leaf, true)?;
                state.size += 1;
                Ok(true)
            }
            Ok(false) => {
                self.pool.unpin_page(leaf, false)?;
                Ok(false)
            }
            Err(EngineError::OutOfSpace) => {
                self.split_leaf_and_insert(state, leaf, key, value, lsn)?;
                state.size += 1;
                Ok(true)
            }
            Err(e) => {
                self.pool.unpin_page(leaf, false)?;
                Err(e)
            }
        }
    }

    /// Stamps `page`'s header `page_lsn` with `lsn`'s low 32 bits, the same
    /// truncation `storage::PageHeader` documents. A no-op for
    /// [`Lsn::NONE`], so non-transactional callers (`BPlusTree::insert` and
    /// friends) never touch the field.
    fn stamp_lsn(&self, page: PageId, lsn: Lsn) -> EngineResult<()> {
        if lsn.is_none() {
            return Ok(());
        }
        self.pool.with_page_mut(page, |p| {
            let mut header = p.header().unwrap();
            header.page_lsn = lsn.0 as u32;
            p.set_header(header);
        })
    }

    fn split_leaf_and_insert(
        &self,
        state: &mut TreeState,
        left: PageId,
        key: &[u8],
        value: &[u8],
        lsn: Lsn,
    ) -> EngineResult<()> {
        let right = self.pool.new_page()?;
        let old_next = self.pool.with_two_pages_mut(left, right, |l, r| {
            let old_next = leaf::next_leaf(l);
            leaf::split(l, r, key, value);
            old_next
        })?;

        self.pool.with_page_mut(left, |p| leaf::set_next_leaf(p, right))?;
        self.pool.with_page_mut(right, |p| {
            leaf::set_prev_leaf(p, left);
            leaf::set_next_leaf(p, old_next);
        })?;
        if old_next.is_valid() {
            self.pool.fetch_page(old_next)?;
            self.pool
                .with_page_mut(old_next, |p| leaf::set_prev_leaf(p, right))?;
            self.pool.unpin_page(old_next, true)?;
        }

        let promoted_key = self
            .pool
            .with_page(right, leaf::min_key)?
            .expect("freshly split right leaf is never empty");

        self.stamp_lsn(left, lsn)?;
        self.stamp_lsn(right, lsn)?;
        self.pool.unpin_page(left, true)?;
        self.pool.unpin_page(right, true)?;

        self.insert_into_parent(state, left, &promoted_key, right, lsn)
    }

    fn insert_into_parent(
        &self,
        state: &mut TreeState,
        left: PageId,
        promoted_key: &[u8],
        right: PageId,
        lsn: Lsn,
    ) -> EngineResult<()> {
        self.pool.fetch_page(left)?;
        let parent = self
            .pool
            .with_page(left, |p| p.header().unwrap().parent_page_id)?;
        self.pool.unpin_page(left, false)?;

        if !parent.is_valid() {
            let new_root = self.pool.new_page()?;
            self.pool.with_page_mut(new_root, |p| -> EngineResult<()> {
                internal::init(p);
                internal::set_first_child(p, left);
                internal::insert(p, promoted_key, right)
            })??;
            self.stamp_lsn(new_root, lsn)?;
            self.pool.unpin_page(new_root, true)?;
            self.reparent(left, new_root)?;
            self.reparent(right, new_root)?;
            state.root = new_root;
            return Ok(());
        }

        self.reparent(right, parent)?;
        self.pool.fetch_page(parent)?;
        let has_space = self
            .pool
            .with_page(parent, |p| internal::has_space(p, promoted_key.len()))?;
        if has_space {
            self.pool
                .with_page_mut(parent, |p| internal::insert(p, promoted_key, right))??;
            self.stamp_lsn(parent, lsn)?;
            self.pool.unpin_page(parent, true)?;
            return Ok(());
        }

        let new_internal = self.pool.new_page()?;
        let (promoted2, moved_children) = self
            .pool
            .with_two_pages_mut(parent, new_internal, |l, r| {
                internal::split(l, r, promoted_key, right)
            })?;
        for child in &moved_children {
            self.reparent(*child, new_internal)?;
        }
        self.stamp_lsn(parent, lsn)?;
        self.stamp_lsn(new_internal, lsn)?;
        self.pool.unpin_page(parent, true)?;
        self.pool.unpin_page(new_internal, true)?;
        self.insert_into_parent(state, parent, &promoted2, new_internal, lsn)
    }

    fn reparent(&self, child: PageId, new_parent: PageId) -> EngineResult<()> {
        self.pool.fetch_page(child)?;
        self.pool.with_page_mut(child, |p| {
            let mut header = p.header().unwrap();
            header.parent_page_id = new_parent;
            p.set_header(header);
        })?;
        self.pool.unpin_page(child, true)
    }

    /// Removes `key`. This implementation never merges, redistributes, or
    /// shrinks the tree on underflow (`spec.md` §4.5, a deliberate
    /// simplification documented in §9).
    pub fn remove(&self, key: &[u8]) -> EngineResult<bool> {
        self.remove_with_lsn(key, Lsn::NONE)
    }

    /// As [`BPlusTree::remove`], stamping the affected leaf with `lsn`.
    pub fn remove_with_lsn(&self, key: &[u8], lsn: Lsn) -> EngineResult<bool> {
        let mut state = self.state.lock().unwrap();
        let leaf = self.find_leaf_pinned(state.root, key)?;
        let removed = self.pool.with_page_mut(leaf, |p| leaf::remove(p, key))?;
        if removed {
            self.stamp_lsn(leaf, lsn)?;
        }
        self.pool.unpin_page(leaf, removed)?;
        if removed {
            state.size -= 1;
        }
        Ok(removed)
    }

    /// Updates `key`'s value in place when it fits; otherwise falls back
    /// to remove+insert at the tree level, which may cascade into a split
    /// (`spec.md` §4.5). Returns `false` if `key` is absent — this engine
    /// resolves the `update`-on-missing-key open question in `spec.md` §9
    /// by never inserting (see DESIGN.md).
    pub fn update(&self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        self.update_with_lsn(key, value, Lsn::NONE)
    }

    /// As [`BPlusTree::update`], stamping whatever page(s) end up holding
    /// `key` with `lsn`.
    pub fn update_with_lsn(&self, key: &[u8], value: &[u8], lsn: Lsn) -> EngineResult<bool> {
        self.validate_entry(key, value)?;
        let mut state = self.state.lock().unwrap();
        let leaf = self.find_leaf_pinned(state.root, key)?;
        let outcome = self
            .pool
            .with_page_mut(leaf, |p| leaf::update(p, key, value))?;
        match outcome {
            leaf::UpdateOutcome::Updated => {
                self.stamp_lsn(leaf, lsn)?;
                self.pool.unpin_page(leaf, true)?;
                Ok(true)
            }
            leaf::UpdateOutcome::NotFound => {
                self.pool.unpin_page(leaf, false)?;
                Ok(false)
            }
            leaf::UpdateOutcome::NeedsReinsert => {
                self.pool.with_page_mut(leaf, |p| leaf::remove(p, key))?;
                self.pool.unpin_page(leaf, true)?;
                self.insert_locked(&mut state, key, value, lsn)?;
                Ok(true)
            }
        }
    }

    pub fn get_all(&self) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.for_each(|k, v| {
            out.push((k.to_vec(), v.to_vec()));
            true
        })?;
        Ok(out)
    }

    /// Walks every entry in ascending key order, stopping early if
    /// `callback` returns `false`.
    pub fn for_each(&self, mut callback: impl FnMut(&[u8], &[u8]) -> bool) -> EngineResult<()> {
        let root = self.state.lock().unwrap().root;
        let mut current = self.leftmost_leaf_pinned(root)?;
        loop {
            let (entries, next) = self
                .pool
                .with_page(current, |p| (leaf::get_all(p), leaf::next_leaf(p)))?;
            let mut keep_going = true;
            for (k, v) in &entries {
                if !callback(k, v) {
                    keep_going = false;
                    break;
                }
            }
            self.pool.unpin_page(current, false)?;
            if !keep_going || !next.is_valid() {
                return Ok(());
            }
            self.pool.fetch_page(next)?;
            current = next;
        }
    }

    /// Inclusive range scan in ascending key order.
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let root = self.state.lock().unwrap().root;
        let mut out = Vec::new();
        let mut current = self.find_leaf_pinned(root, lo)?;
        'outer: loop {
            let (entries, next) = self
                .pool
                .with_page(current, |p| (leaf::get_all(p), leaf::next_leaf(p)))?;
            for (k, v) in entries {
                if k.as_slice() < lo {
                    continue;
                }
                if k.as_slice() > hi {
                    self.pool.unpin_page(current, false)?;
                    break 'outer;
                }
                out.push((k, v));
            }
            self.pool.unpin_page(current, false)?;
            if !next.is_valid() {
                break;
            }
            self.pool.fetch_page(next)?;
            current = next;
        }
        Ok(out)
    }

    /// Returns up to `limit` entries starting at the first key `>= from`.
    pub fn scan(&self, from: &[u8], limit: usize) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let root = self.state.lock().unwrap().root;
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let mut current = self.find_leaf_pinned(root, from)?;
        loop {
            let (entries, next) = self
                .pool
                .with_page(current, |p| (leaf::get_all(p), leaf::next_leaf(p)))?;
            for (k, v) in entries {
                if k.as_slice() < from {
                    continue;
                }
                out.push((k, v));
                if out.len() == limit {
                    self.pool.unpin_page(current, false)?;
                    return Ok(out);
                }
            }
            self.pool.unpin_page(current, false)?;
            if !next.is_valid() {
                return Ok(out);
            }
            self.pool.fetch_page(next)?;
            current = next;
        }
    }

    /// Number of levels from the root to a leaf (root is a leaf => 1).
    pub fn height(&self) -> EngineResult<u32> {
        let root = self.state.lock().unwrap().root;
        self.pool.fetch_page(root)?;
        let mut current = root;
        let mut height = 1;
        loop {
            let kind = self
                .pool
                .with_page(current, |p| p.header().unwrap().node_kind)?;
            if kind == NodeKind::Leaf {
                self.pool.unpin_page(current, false)?;
                return Ok(height);
            }
            let child = self.pool.with_page(current, internal::first_child)?;
            self.pool.fetch_page(child)?;
            self.pool.unpin_page(current, false)?;
            current = child;
            height += 1;
        }
    }

    /// Checks that all keys are strictly ascending and that the reachable
    /// entry count matches [`BPlusTree::size`] (`spec.md` §8).
    pub fn verify(&self) -> EngineResult<bool> {
        let mut prev: Option<Vec<u8>> = None;
        let mut count: u64 = 0;
        let mut sorted = true;
        self.for_each(|k, _| {
            if let Some(p) = &prev {
                if p.as_slice() >= k {
                    sorted = false;
                    return false;
                }
            }
            prev = Some(k.to_vec());
            count += 1;
            true
        })?;
        Ok(sorted && count == self.size())
    }
}
