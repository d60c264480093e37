// Buffer and chain descriptors.
//
// A `Buf` describes a byte range that lives in memory, in a file, or in
// both; downstream filters interpret the flag bits to decide how the range
// may be used. The descriptor carries no algorithmic behavior of its own.

use std::os::fd::RawFd;
use std::ptr::{self, NonNull};

use bitflags::bitflags;

use crate::error::{CoreError, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufFlags: u16 {
        /// Memory range is mutable by downstream filters.
        const TEMPORARY     = 1 << 0;
        /// Immutable in-memory content.
        const MEMORY        = 1 << 1;
        /// Immutable memory-mapped content.
        const MMAP          = 1 << 2;
        /// Buffer may be reused after downstream consumes it.
        const RECYCLED      = 1 << 3;
        /// Payload is in the referenced file.
        const IN_FILE       = 1 << 4;
        /// Requests an immediate downstream flush.
        const FLUSH         = 1 << 5;
        /// Blocking I/O is tolerated on this buffer.
        const SYNC          = 1 << 6;
        /// Final buffer of the whole stream.
        const LAST_BUF      = 1 << 7;
        /// Final buffer of this chain segment.
        const LAST_IN_CHAIN = 1 << 8;
        /// Final alias among shadows.
        const LAST_SHADOW   = 1 << 9;
        /// File is a server-created temporary.
        const TEMP_FILE     = 1 << 10;

        /// The three mutually exclusive in-memory kinds.
        const IN_MEMORY = Self::TEMPORARY.bits() | Self::MEMORY.bits() | Self::MMAP.bits();
    }
}

/// Byte-range descriptor. `pos..last` is the active range inside the
/// `start..end` backing memory; `file_pos..file_last` is the file range
/// when `IN_FILE` is set.
#[derive(Debug)]
pub struct Buf {
    pub pos: *mut u8,
    pub last: *mut u8,
    pub file_pos: i64,
    pub file_last: i64,

    pub start: *mut u8,
    pub end: *mut u8,
    /// Opaque owner identifier.
    pub tag: usize,
    pub file: Option<RawFd>,
    /// Co-reference to another descriptor over the same backing memory.
    pub shadow: Option<NonNull<Buf>>,

    pub flags: BufFlags,
}

impl Default for Buf {
    fn default() -> Self {
        Buf {
            pos: ptr::null_mut(),
            last: ptr::null_mut(),
            file_pos: 0,
            file_last: 0,
            start: ptr::null_mut(),
            end: ptr::null_mut(),
            tag: 0,
            file: None,
            shadow: None,
            flags: BufFlags::empty(),
        }
    }
}

impl Buf {
    pub fn in_memory(&self) -> bool {
        self.flags.intersects(BufFlags::IN_MEMORY)
    }

    pub fn in_memory_only(&self) -> bool {
        self.in_memory() && !self.flags.contains(BufFlags::IN_FILE)
    }

    /// A control buffer: carries flush/sync/last markers but no payload.
    pub fn is_special(&self) -> bool {
        self.flags
            .intersects(BufFlags::FLUSH | BufFlags::LAST_BUF | BufFlags::SYNC)
            && !self.in_memory()
            && !self.flags.contains(BufFlags::IN_FILE)
    }

    pub fn size(&self) -> i64 {
        if self.in_memory() {
            self.last as i64 - self.pos as i64
        } else {
            self.file_last - self.file_pos
        }
    }

    /// Checks the descriptor invariants: the in-memory kinds are mutually
    /// exclusive and `LAST_BUF` implies `LAST_IN_CHAIN`.
    pub fn validate(&self) -> Result<()> {
        let mem = self.flags & BufFlags::IN_MEMORY;
        if mem.bits().count_ones() > 1 {
            return Err(CoreError::Corruption(
                "buffer memory kind flags are mutually exclusive".into(),
            ));
        }
        if self.flags.contains(BufFlags::LAST_BUF) && !self.flags.contains(BufFlags::LAST_IN_CHAIN)
        {
            return Err(CoreError::Corruption(
                "last_buf set without last_in_chain".into(),
            ));
        }
        Ok(())
    }
}

/// Singly-linked chain of buffers. Operations producing chains report
/// failure through `Result` rather than a sentinel link value.
#[derive(Debug)]
pub struct Chain {
    pub buf: Buf,
    pub next: Option<Box<Chain>>,
}

impl Chain {
    pub fn new(buf: Buf) -> Chain {
        Chain { buf, next: None }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buf> {
        std::iter::successors(Some(self), |c| c.next.as_deref()).map(|c| &c.buf)
    }
}
