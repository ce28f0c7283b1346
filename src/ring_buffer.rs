use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::NativeEndian;
use log::debug;

use crate::error::Error;
use crate::record_header::RecordHeader;

/// Offset of `data_head` in `perf_event_mmap_page`.
const DATA_HEAD_OFFSET: usize = 1024;
/// Offset of `data_tail` in `perf_event_mmap_page`.
const DATA_TAIL_OFFSET: usize = 1032;

/// An owned memory mapping, unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: The mapping is owned exclusively by this value.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// Maps `len` bytes of a perf event descriptor, read-write and shared
    /// with the kernel.
    pub fn map_perf_event(fd: BorrowedFd<'_>, len: usize) -> io::Result<Self> {
        // SAFETY: Mapping a new region does not alias any Rust memory.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        Self::from_mmap_result(ptr, len)
    }

    /// Maps `len` zeroed anonymous bytes.
    pub fn anonymous(len: usize) -> io::Result<Self> {
        // SAFETY: Mapping a new region does not alias any Rust memory.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        Self::from_mmap_result(ptr, len)
    }

    fn from_mmap_result(ptr: *mut libc::c_void, len: usize) -> io::Result<Self> {
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: We own the mapping and nothing borrows from it anymore.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

/// Reads records out of a perf event ring buffer.
///
/// The mapping consists of one metadata page followed by a data area of
/// 2^n pages. The kernel appends records to the data area and advances
/// `data_head`; we copy them out and advance `data_tail` so that the kernel
/// can reuse the space. Both are free-running counters, the position in the
/// data area is the counter modulo its size.
#[derive(Debug)]
pub struct RingBuffer {
    region: MmapRegion,
    page_size: usize,
    data_size: usize,
    read_head: u64,
}

impl RingBuffer {
    /// Wraps a mapping of `1 + 2^n` pages.
    pub fn new(region: MmapRegion, page_size: usize) -> Result<Self, Error> {
        let data_size = region.len().saturating_sub(page_size);
        let data_pages = data_size / page_size.max(1);
        if data_size == 0 || data_size % page_size != 0 || !data_pages.is_power_of_two() {
            return Err(Error::MmapPagesNotPowerOfTwo(data_pages));
        }
        let mut ring_buffer = Self {
            region,
            page_size,
            data_size,
            read_head: 0,
        };
        ring_buffer.read_head = ring_buffer.tail().load(Ordering::Relaxed);
        debug!(
            "Ring buffer with {} data bytes, starting at {}",
            data_size, ring_buffer.read_head
        );
        Ok(ring_buffer)
    }

    /// The size of the data area in bytes.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    fn head(&self) -> &AtomicU64 {
        // SAFETY: The metadata page is mapped, and data_head is an 8-aligned
        // u64 that the kernel only ever updates atomically.
        unsafe { &*(self.region.as_ptr().add(DATA_HEAD_OFFSET) as *const AtomicU64) }
    }

    fn tail(&self) -> &AtomicU64 {
        // SAFETY: As for `head`. Only we write data_tail.
        unsafe { &*(self.region.as_ptr().add(DATA_TAIL_OFFSET) as *const AtomicU64) }
    }

    fn data(&self) -> &[u8] {
        // SAFETY: The data area follows the metadata page inside the mapping.
        // The kernel does not write to the part between data_tail and
        // data_head, which is the only part we read.
        unsafe {
            std::slice::from_raw_parts(
                self.region.as_ptr().add(self.page_size),
                self.data_size,
            )
        }
    }

    /// Whether the kernel has published records we have not read yet.
    pub fn has_data(&self) -> bool {
        self.head().load(Ordering::Acquire) != self.read_head
    }

    /// Appends all records which the kernel has published so far to `buf`,
    /// and returns the number of bytes appended.
    ///
    /// Returns `Ok(0)` if there is nothing to read.
    pub fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        // Pairs with the kernel's store of data_head after writing the data.
        let head = self.head().load(Ordering::Acquire);
        if head == self.read_head {
            return Ok(0);
        }
        let available = head.wrapping_sub(self.read_head);
        if available < RecordHeader::STRUCT_SIZE as u64 {
            return Err(Error::TruncatedRingBuffer { available });
        }
        if available > self.data_size as u64 {
            return Err(Error::RingBufferOverrun {
                available,
                size: self.data_size as u64,
            });
        }
        let available = available as usize;
        let offset = (self.read_head % self.data_size as u64) as usize;
        let data = self.data();
        let first = available.min(self.data_size - offset);
        buf.reserve(available);
        buf.extend_from_slice(&data[offset..offset + first]);
        buf.extend_from_slice(&data[..available - first]);

        self.read_head = head;
        // Pairs with the kernel's load of data_tail before overwriting.
        self.tail().store(head, Ordering::Release);
        Ok(available)
    }
}

/// Splits a buffer of concatenated records, as read from a ring buffer, into
/// single records.
#[derive(Debug, Clone)]
pub struct RawRecordIter<'a> {
    data: &'a [u8],
}

impl<'a> RawRecordIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for RawRecordIter<'a> {
    type Item = Result<&'a [u8], Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let header = match RecordHeader::parse::<NativeEndian>(self.data) {
            Ok(header) => header,
            Err(_) => {
                let available = self.data.len() as u64;
                self.data = &[];
                return Some(Err(Error::TruncatedRingBuffer { available }));
            }
        };
        let size = header.size as usize;
        if size < RecordHeader::STRUCT_SIZE || size > self.data.len() {
            self.data = &[];
            return Some(Err(Error::InvalidPerfEventSize));
        }
        let (record, rest) = self.data.split_at(size);
        self.data = rest;
        Some(Ok(record))
    }
}

#[cfg(test)]
mod test {
    use byteorder::{ByteOrder, NativeEndian};

    use super::*;

    const PAGE: usize = 4096;

    fn ring_buffer(data_pages: usize) -> RingBuffer {
        let region = MmapRegion::anonymous(PAGE * (1 + data_pages)).unwrap();
        RingBuffer::new(region, PAGE).unwrap()
    }

    /// Does what the kernel does: copies a record in and publishes the head.
    fn produce(rb: &RingBuffer, bytes: &[u8]) {
        let head = rb.head().load(Ordering::Relaxed);
        let size = rb.data_size;
        for (i, b) in bytes.iter().enumerate() {
            let pos = (head as usize + i) % size;
            // SAFETY: `pos` is inside the data area.
            unsafe { *rb.region.as_ptr().add(PAGE + pos) = *b };
        }
        rb.head()
            .store(head + bytes.len() as u64, Ordering::Release);
    }

    fn record(type_: u32, fill: u8, size: usize) -> Vec<u8> {
        let mut bytes = vec![fill; size];
        NativeEndian::write_u32(&mut bytes[0..4], type_);
        NativeEndian::write_u16(&mut bytes[4..6], 0);
        NativeEndian::write_u16(&mut bytes[6..8], size as u16);
        bytes
    }

    #[test]
    fn empty_buffer_is_not_an_error() {
        let mut rb = ring_buffer(1);
        let mut buf = Vec::new();
        assert_eq!(rb.read_available(&mut buf).unwrap(), 0);
        assert!(!rb.has_data());
        assert!(buf.is_empty());
    }

    #[test]
    fn wrapped_data_reads_like_unwrapped_data() {
        let records: Vec<Vec<u8>> = (0..5u8).map(|i| record(9, i + 1, 1600)).collect();

        let mut straight = ring_buffer(2);
        let mut expected = Vec::new();
        for r in &records {
            produce(&straight, r);
        }
        straight.read_available(&mut expected).unwrap();

        // Move the start close to the end of the data area, so that the same
        // records wrap around.
        let mut wrapped = ring_buffer(2);
        let mut scratch = Vec::new();
        produce(&wrapped, &record(9, 0, 7000));
        wrapped.read_available(&mut scratch).unwrap();
        for r in &records {
            produce(&wrapped, r);
        }
        let mut actual = Vec::new();
        assert_eq!(wrapped.read_available(&mut actual).unwrap(), 8000);
        assert_eq!(actual, expected);
        assert_eq!(wrapped.tail().load(Ordering::Relaxed), 15000);

        let sizes: Vec<usize> = RawRecordIter::new(&actual)
            .map(|r| r.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![1600; 5]);
    }

    #[test]
    fn partial_header_is_fatal() {
        let mut rb = ring_buffer(1);
        let head = rb.head();
        head.store(4, Ordering::Release);
        let err = rb.read_available(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::TruncatedRingBuffer { available: 4 }));
    }

    #[test]
    fn bad_page_counts_are_rejected() {
        let region = MmapRegion::anonymous(PAGE * 4).unwrap();
        assert!(matches!(
            RingBuffer::new(region, PAGE),
            Err(Error::MmapPagesNotPowerOfTwo(3))
        ));
    }

    #[test]
    fn record_sizes_are_checked() {
        let mut data = record(1, 0, 16);
        data.extend_from_slice(&record(1, 0, 32)[..20]);
        let mut iter = RawRecordIter::new(&data);
        assert_eq!(iter.next().unwrap().unwrap().len(), 16);
        assert!(matches!(
            iter.next(),
            Some(Err(Error::InvalidPerfEventSize))
        ));
        assert!(iter.next().is_none());
    }
}
