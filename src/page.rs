//! Page-sized buffers used for ring pages and grant-mapped frame buffers.

use nix::libc;
use std::ptr;

/// Platform page size. Fixed at 4 KiB: both ring pages and frame buffers in
/// this protocol are single-page granules.
pub const PAGE_SIZE: usize = 4096;

/// A page-sized buffer aligned to `PAGE_SIZE`, carrying a byte offset and
/// logical length for the frame view it currently holds.
pub struct Page {
    ptr: *mut u8,
    offset: usize,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by this `Page` and accessed only
// through `&`/`&mut` methods below.
unsafe impl Send for Page {}

impl Page {
    fn mapped(ptr: *mut u8) -> Self {
        Self {
            ptr,
            offset: 0,
            len: 0,
        }
    }

    /// Raw pointer to the start of the page, for handing to the grant table.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// The frame view: `as_bytes()[..]` is `[offset .. offset+len)` of the page.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.add(self.offset), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(self.offset), self.len) }
    }

    /// Full page as a mutable slice, ignoring the current frame view —
    /// used by refill to write a fresh buffer before a frame has landed.
    pub fn full_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, PAGE_SIZE) }
    }

    /// Full page as a read-only slice, ignoring the current frame view —
    /// used by the ring to read index fields and slot contents that live
    /// outside whatever frame view happens to be set.
    pub fn full(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, PAGE_SIZE) }
    }

    pub fn set_view(&mut self, offset: usize, len: usize) {
        assert!(offset + len <= PAGE_SIZE, "frame view exceeds page bounds");
        self.offset = offset;
        self.len = len;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, PAGE_SIZE);
        }
    }
}

/// External collaborator (§6): allocates page-size-aligned buffers.
pub trait PageAllocator: Send + Sync {
    fn get(&self) -> std::io::Result<Page>;

    fn pages(&self, n: usize) -> std::io::Result<Vec<Page>> {
        (0..n).map(|_| self.get()).collect()
    }
}

/// Anonymous-mmap page allocator. One `mmap(MAP_ANONYMOUS|MAP_PRIVATE)` per
/// page, matching this workspace's `HugePagePool` shape minus the hugetlb
/// flag: grant pages must be ordinary page-size granules the peer can map.
pub struct MmapPageAllocator;

impl PageAllocator for MmapPageAllocator {
    fn get(&self) -> std::io::Result<Page> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Page::mapped(ptr as *mut u8))
    }
}
