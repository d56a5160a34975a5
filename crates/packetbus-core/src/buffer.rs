//! Pooled buffer arenas for packet receive and reply operations.
//!
//! This module eliminates per-packet allocation overhead in high-throughput
//! datagram processing. A [`BufferPage`] carves one contiguous backing
//! allocation into fixed-size slots at construction and recycles them through
//! a lock-free free-list; a [`BufferPagePool`] round-robins allocations over
//! several pages. A checked-out slot is a [`VirtualBuf`] - a lease that owns
//! its bytes outright, so no two live leases can ever alias a byte range.
//!
//! # Design
//!
//! - **Lock-Free:** free-lists use `crossbeam_queue::ArrayQueue`, so slots can
//!   be recycled from any task without contention
//! - **Pre-Allocation:** each page is a single allocation split into slots
//!   once, at pool construction
//! - **Fallback:** an exhausted page hands out a detached buffer on demand
//!   rather than blocking; detached buffers are recycled only while the
//!   free-list has room
//! - **Ownership as invariant:** a lease is returned by dropping it (or
//!   calling [`VirtualBuf::clean`], which consumes it), so double-free and
//!   use-after-free are unrepresentable
//!
//! # Example
//!
//! ```
//! use packetbus_core::buffer::BufferPage;
//!
//! // One page of 128 slots, 1472 bytes each
//! let page = BufferPage::new(1472, 128);
//! assert_eq!(page.available(), 128);
//!
//! let mut buf = page.allocate(1472).unwrap();
//! buf.put_slice(b"payload").unwrap();
//! assert_eq!(buf.chunk(), b"payload");
//!
//! // Returning the lease restores the slot
//! buf.clean();
//! assert_eq!(page.available(), 128);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

use crate::error::{TransportError, TransportResult};

/// State shared between a page handle and the leases it has issued.
struct PageShared {
    /// Lock-free free-list of recycled slots
    free: ArrayQueue<BytesMut>,
    /// Fixed size of every slot carved from this page
    slot_size: usize,
    /// Number of detached (past-capacity) allocations handed out
    detached: AtomicUsize,
}

/// A pre-allocated arena of fixed-size buffer slots.
///
/// All slots are carved from one contiguous backing allocation at
/// construction. Cloning a `BufferPage` yields another handle to the same
/// arena; leases from either handle recycle into the same free-list.
///
/// # Thread Safety
///
/// Fully thread-safe: allocation pops and recycling pushes are lock-free, and
/// the no-aliasing guarantee comes from each lease owning its slot's bytes,
/// not from any usage convention.
#[derive(Clone)]
pub struct BufferPage {
    shared: Arc<PageShared>,
}

impl BufferPage {
    /// Create a page of `slot_count` slots of `slot_size` bytes each.
    ///
    /// A page always has at least one slot; a `slot_count` of zero is treated
    /// as one, so `capacity` and `available` reflect real slots.
    ///
    /// The backing memory is allocated and zeroed once here; `allocate` never
    /// touches the allocator while the free-list has slots.
    pub fn new(slot_size: usize, slot_count: usize) -> Self {
        let slot_count = slot_count.max(1);
        let mut backing = BytesMut::zeroed(slot_size * slot_count);
        let free = ArrayQueue::new(slot_count);
        for _ in 0..slot_count {
            let slot = backing.split_to(slot_size);
            // Queue was sized for exactly this many slots
            let _ = free.push(slot);
        }

        Self {
            shared: Arc::new(PageShared {
                free,
                slot_size,
                detached: AtomicUsize::new(0),
            }),
        }
    }

    /// Lease a buffer of `size` usable bytes from this page.
    ///
    /// If the free-list is empty a detached buffer is allocated on demand so
    /// the caller never blocks; `detached_allocations` tracks how often that
    /// slow path was taken.
    ///
    /// # Errors
    /// Returns [`TransportError::BufferTooLarge`] if `size` exceeds the
    /// page's slot size.
    pub fn allocate(&self, size: usize) -> TransportResult<VirtualBuf> {
        self.check_size(size)?;
        let data = match self.shared.free.pop() {
            Some(slot) => slot,
            None => {
                self.shared.detached.fetch_add(1, Ordering::Relaxed);
                BytesMut::zeroed(self.shared.slot_size)
            }
        };
        Ok(VirtualBuf::new(data, size, Arc::clone(&self.shared)))
    }

    /// Lease a buffer only if a recycled slot is available.
    ///
    /// Returns `Ok(None)` when the free-list is empty instead of falling back
    /// to a detached allocation.
    ///
    /// # Errors
    /// Returns [`TransportError::BufferTooLarge`] if `size` exceeds the
    /// page's slot size.
    pub fn allocate_pooled(&self, size: usize) -> TransportResult<Option<VirtualBuf>> {
        self.check_size(size)?;
        Ok(self
            .shared
            .free
            .pop()
            .map(|slot| VirtualBuf::new(slot, size, Arc::clone(&self.shared))))
    }

    fn check_size(&self, size: usize) -> TransportResult<()> {
        if size > self.shared.slot_size {
            return Err(TransportError::BufferTooLarge {
                requested: size,
                slot_size: self.shared.slot_size,
            });
        }
        Ok(())
    }

    /// Number of slots currently available for lease.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.free.len()
    }

    /// Total number of slots carved from this page.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.free.capacity()
    }

    /// Fixed slot size in bytes.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.shared.slot_size
    }

    /// Number of detached allocations made because the page was exhausted.
    #[must_use]
    pub fn detached_allocations(&self) -> usize {
        self.shared.detached.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BufferPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPage")
            .field("slot_size", &self.slot_size())
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("detached_allocations", &self.detached_allocations())
            .finish()
    }
}

/// A pool of buffer pages with round-robin page selection.
///
/// Allocation starts at the next page in rotation and falls through to the
/// first page with a free slot; only when every page is exhausted does the
/// rotation page hand out a detached buffer.
#[derive(Clone)]
pub struct BufferPagePool {
    pages: Arc<Vec<BufferPage>>,
    next: Arc<AtomicUsize>,
}

impl BufferPagePool {
    /// Create `page_count` pages of `slots_per_page` slots of `slot_size`
    /// bytes each.
    ///
    /// All backing memory is allocated here. Create the pool once at worker
    /// construction and share handles via `clone`.
    pub fn new(slot_size: usize, page_count: usize, slots_per_page: usize) -> Self {
        let pages = (0..page_count.max(1))
            .map(|_| BufferPage::new(slot_size, slots_per_page))
            .collect();
        Self {
            pages: Arc::new(pages),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lease a buffer of `size` usable bytes from the pool.
    ///
    /// # Errors
    /// Returns [`TransportError::BufferTooLarge`] if `size` exceeds the
    /// pool's slot size.
    pub fn allocate(&self, size: usize) -> TransportResult<VirtualBuf> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let count = self.pages.len();
        for offset in 0..count {
            let page = &self.pages[(start + offset) % count];
            if let Some(buf) = page.allocate_pooled(size)? {
                return Ok(buf);
            }
        }
        // Every page exhausted: detached fallback on the rotation page
        self.pages[start % count].allocate(size)
    }

    /// Number of slots currently available across all pages.
    #[must_use]
    pub fn available(&self) -> usize {
        self.pages.iter().map(BufferPage::available).sum()
    }

    /// Total slot count across all pages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pages.iter().map(BufferPage::capacity).sum()
    }

    /// Fixed slot size in bytes.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.pages[0].slot_size()
    }

    /// Total detached allocations across all pages.
    #[must_use]
    pub fn detached_allocations(&self) -> usize {
        self.pages.iter().map(BufferPage::detached_allocations).sum()
    }
}

impl std::fmt::Debug for BufferPagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPagePool")
            .field("pages", &self.pages.len())
            .field("slot_size", &self.slot_size())
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

/// A leased buffer slot with explicit read and write cursors.
///
/// A `VirtualBuf` owns its bytes for the duration of the lease. Bytes between
/// the read and write cursors are the unread payload; `writable` exposes the
/// space between the write cursor and the lease's size limit.
///
/// The slot returns to its page when the lease is dropped. [`clean`] makes
/// the return explicit at the end of a processing path; because it takes the
/// lease by value, returning a buffer twice or touching it afterwards is a
/// compile error rather than a runtime defect.
///
/// [`clean`]: VirtualBuf::clean
pub struct VirtualBuf {
    data: BytesMut,
    /// Usable byte limit of this lease (<= slot size)
    limit: usize,
    read_pos: usize,
    write_pos: usize,
    page: Arc<PageShared>,
}

impl VirtualBuf {
    fn new(data: BytesMut, limit: usize, page: Arc<PageShared>) -> Self {
        Self {
            data,
            limit,
            read_pos: 0,
            write_pos: 0,
            page,
        }
    }

    /// Usable capacity of this lease in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Unread payload bytes (written but not yet consumed).
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Writable bytes left before the lease's limit.
    #[must_use]
    pub fn remaining_mut(&self) -> usize {
        self.limit - self.write_pos
    }

    /// The unread payload.
    #[must_use]
    pub fn chunk(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// The writable region, for filling directly from a socket receive.
    ///
    /// Call [`commit`] with the number of bytes actually written.
    ///
    /// [`commit`]: VirtualBuf::commit
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..self.limit]
    }

    /// Advance the write cursor after filling `writable` externally.
    ///
    /// `count` is clamped to the writable region.
    pub fn commit(&mut self, count: usize) {
        debug_assert!(count <= self.remaining_mut());
        self.write_pos += count.min(self.remaining_mut());
    }

    /// Advance the read cursor past `count` consumed bytes.
    ///
    /// `count` is clamped to the unread payload.
    pub fn advance(&mut self, count: usize) {
        debug_assert!(count <= self.remaining());
        self.read_pos += count.min(self.remaining());
    }

    /// Append bytes at the write cursor.
    ///
    /// # Errors
    /// Returns [`TransportError::WriteOverflow`] if `data` does not fit in
    /// the writable region; nothing is written in that case.
    pub fn put_slice(&mut self, data: &[u8]) -> TransportResult<()> {
        if data.len() > self.remaining_mut() {
            return Err(TransportError::WriteOverflow {
                needed: data.len(),
                available: self.remaining_mut(),
            });
        }
        self.data[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
        Ok(())
    }

    /// Reset both cursors, making the full lease writable again.
    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Return the lease to its page.
    ///
    /// Equivalent to dropping the buffer; provided so release points read
    /// explicitly in processing code.
    pub fn clean(self) {
        drop(self);
    }
}

impl Drop for VirtualBuf {
    fn drop(&mut self) {
        let mut slot = std::mem::take(&mut self.data);
        if slot.len() == self.page.slot_size {
            // Scrub recycled slots so payloads never leak across leases
            slot.fill(0);
            // Detached buffers find the free-list full and are dropped here
            let _ = self.page.free.push(slot);
        }
    }
}

impl std::fmt::Debug for VirtualBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualBuf")
            .field("capacity", &self.limit)
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .finish()
    }
}
