//! Utilities to read sampled events from memory mapped ring buffer.

use crate::perf::ffi;
use crate::{Error, Result};
use byteorder::{NativeEndian, ReadBytesExt};
use lazy_static::lazy_static;
use nix::libc;
use nix::sys::mman;
use std::convert::TryInto;
use std::sync::atomic::{fence, Ordering};

lazy_static! {
    /// Native page size.
    pub(crate) static ref PAGE_SIZE: usize = nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
        .ok()
        .and_then(|v| v)
        .and_then(|v| v.try_into().ok())
        .unwrap_or(4096);
}

/// Userspace wrapper for the sampled/mmaped perf events.
///
/// Memory layout:
/// ```text
/// ┌───── header ─────┐  ▲
/// │                  │  │
/// │ perf_event_mmap  │ pagesize
/// │      _page       │  │
/// │                  │  ▼
/// ├─────  base  ─────┤  ▲
/// │                  │  │
/// │                  │ size
/// │      Events      │  │
/// │                  │  │
/// └──────────────────┘  ▼
/// ```
#[derive(Debug)]
pub struct RingBuffer {
    /// Metadata of the ring buffer.
    header: *mut ffi::perf_event_mmap_page,
    /// The size of the allocation made using `mmap`.
    total_alloc_size: usize,
    /// Size in bytes of the event records in the ring buffer.
    size: usize,
    /// Pointer to the beginning of the event records.
    base: *mut u8,
}

// The mapping is owned by this value and only touched through `&mut self`.
unsafe impl Send for RingBuffer {}

/// A record taken out of the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    /// Counter overflow at instruction pointer `ip`.
    Sample {
        /// Sampled instruction pointer.
        ip: u64,
    },
    /// The kernel dropped `lost` records.
    Lost {
        /// Number of dropped records.
        lost: u64,
    },
    /// Any other record type.
    Other(u32),
}

impl RingBuffer {
    /// Create a new mmaped buffer from perf event file descriptor `fd` and ring buffer size `npages`.
    ///
    /// `npages` must be a power of 2.
    pub fn new(fd: libc::c_int, npages: usize) -> Result<Self> {
        if npages == 0 || npages & (npages - 1) != 0 {
            return Err(Error::Invalid);
        }
        let pagesize = *PAGE_SIZE;
        let rb = unsafe {
            let header = mman::mmap(
                std::ptr::null_mut(),
                pagesize * (npages + 1),
                mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
                mman::MapFlags::MAP_SHARED,
                fd,
                0,
            )? as *mut ffi::perf_event_mmap_page;
            RingBuffer {
                header,
                total_alloc_size: pagesize * (npages + 1),
                size: pagesize * npages,
                base: (header as *mut u8).add(pagesize),
            }
        };
        Ok(rb)
    }

    /// Copy `len` bytes starting at the unwrapped offset `offset`.
    fn _copy(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let start = (offset % self.size as u64) as usize;
        let first = len.min(self.size - start);
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(start), out.as_mut_ptr(), first);
            if first < len {
                std::ptr::copy_nonoverlapping(self.base, out.as_mut_ptr().add(first), len - first);
            }
        }
        out
    }

    /// Remove every pending record from the buffer.
    pub fn drain(&mut self) -> Vec<Record> {
        let header = unsafe { &mut *self.header };
        let head = unsafe { std::ptr::read_volatile(&header.data_head) };
        fence(Ordering::Acquire);
        let mut tail = header.data_tail;

        let mut out = vec![];
        let hsize = std::mem::size_of::<ffi::perf_event_header>();
        while tail + hsize as u64 <= head {
            let raw = self._copy(tail, hsize);
            let mut cursor = std::io::Cursor::new(&raw[..]);
            let type_ = cursor.read_u32::<NativeEndian>().unwrap_or(0);
            let _misc = cursor.read_u16::<NativeEndian>().unwrap_or(0);
            let size = cursor.read_u16::<NativeEndian>().unwrap_or(0) as usize;
            if size < hsize {
                // Corrupt record, drop everything pending.
                tail = head;
                break;
            }
            let body = self._copy(tail + hsize as u64, size - hsize);
            let mut cursor = std::io::Cursor::new(&body[..]);
            out.push(match type_ {
                ffi::PERF_RECORD_SAMPLE => Record::Sample {
                    ip: cursor.read_u64::<NativeEndian>().unwrap_or(0),
                },
                ffi::PERF_RECORD_LOST => {
                    let _id = cursor.read_u64::<NativeEndian>().unwrap_or(0);
                    Record::Lost {
                        lost: cursor.read_u64::<NativeEndian>().unwrap_or(0),
                    }
                }
                other => Record::Other(other),
            });
            tail += size as u64;
        }

        fence(Ordering::Release);
        unsafe { std::ptr::write_volatile(&mut header.data_tail, tail) };
        out
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        unsafe {
            let _ = mman::munmap(self.header as *mut std::ffi::c_void, self.total_alloc_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size() {
        assert!(*PAGE_SIZE >= 4096);
        assert_eq!(*PAGE_SIZE & (*PAGE_SIZE - 1), 0);
    }

    #[test]
    fn test_rejects_bad_page_count() {
        assert!(RingBuffer::new(-1, 3).is_err());
        assert!(RingBuffer::new(-1, 0).is_err());
    }
}
