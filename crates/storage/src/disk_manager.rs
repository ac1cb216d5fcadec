use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use common::{EngineError, EngineResult, PageId};

use crate::file_header::FileHeader;
use crate::PAGE_SIZE;

struct Inner {
    file: File,
    header: FileHeader,
}

/// Owns a single database file, reading and writing whole [`crate::Page`]s
/// and allocating/freeing page ids out of the file header's inline free
/// list (`spec.md` §4.1). All operations serialize on one mutex; there is
/// no page-level latching inside this component.
pub struct DiskManager {
    inner: Mutex<Inner>,
}

impl DiskManager {
    /// Opens `path`, creating it (with a fresh file header) if it does not
    /// exist. Fails with [`EngineError::Corruption`] if an existing file's
    /// header magic or checksum does not verify.
    pub fn open(path: &Path) -> EngineResult<Self> {
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if is_new || file.metadata()?.len() == 0 {
            let header = FileHeader::new();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.encode())?;
            file.flush()?;
            header
        } else {
            let mut buf = [0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            FileHeader::decode(&buf)?
        };

        log::debug!(
            "opened database file {:?} with {} pages",
            path,
            header.num_pages
        );

        Ok(Self {
            inner: Mutex::new(Inner { file, header }),
        })
    }

    /// Reads page `id` into `buf`. Pages beyond the current page count
    /// produce a zeroed buffer (`spec.md` §4.1: "newly-allocated,
    /// never-written pages").
    pub fn read_page(&self, id: PageId, buf: &mut [u8; PAGE_SIZE]) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if id.0 >= inner.header.num_pages {
            buf.fill(0);
            return Ok(());
        }
        let offset = id.0 as u64 * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` to page `id`, extending the file if needed.
    pub fn write_page(&self, id: PageId, buf: &[u8; PAGE_SIZE]) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let offset = id.0 as u64 * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(buf)?;
        Ok(())
    }

    /// Allocates a page id, reusing the free list (LIFO) before handing
    /// out a fresh id. Never returns `PageId::NONE`.
    pub fn allocate_page(&self) -> EngineResult<PageId> {
        let mut inner = self.inner.lock().unwrap();
        let id = if let Some(id) = inner.header.pop_free() {
            id
        } else {
            let id = PageId(inner.header.next_page_id);
            inner.header.next_page_id += 1;
            id
        };
        if inner.header.num_pages <= id.0 {
            inner.header.num_pages = id.0 + 1;
        }
        Self::persist_header(&mut inner)?;
        log::debug!("allocated page {:?}", id);
        Ok(id)
    }

    /// Pushes `id` onto the free list for reuse. Beyond the inline
    /// capacity the id is silently dropped (`spec.md` §4.1, §9).
    pub fn deallocate_page(&self, id: PageId) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.header.push_free(id);
        Self::persist_header(&mut inner)
    }

    /// Total number of pages the file currently accounts for, including
    /// page 0.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().unwrap().header.num_pages
    }

    /// Rewrites the file header and fsyncs the underlying file.
    pub fn flush(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::persist_header(&mut inner)?;
        inner.file.sync_all()?;
        Ok(())
    }

    fn persist_header(inner: &mut Inner) -> EngineResult<()> {
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&inner.header.encode())?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("disk manager flush on drop failed: {e}");
        }
    }
}
