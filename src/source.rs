// source.rs — the `MemorySource` seam (§4.1, §9 "Iteration over regions").
//
// Buffer Locator, Container Tracker, and Entry Codec only ever talk to a
// `MemorySource`. The live Process Attachment implementation (attach.rs)
// and the offline dump reader (dump.rs) both implement it, and tests use a
// third, in-memory implementation (`FakeAddressSpace` below) so that the
// locator/poller state machine can be exercised without Windows at all.

use crate::types::Address;
use std::fmt;

/// Coarse read/execute permission of a region, collapsed from the
/// PAGE_* flags the OS actually reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prot {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub guard: bool,
}

impl Prot {
    pub const fn rw() -> Self {
        Prot { readable: true, writable: true, executable: false, guard: false }
    }
    pub const fn ro() -> Self {
        Prot { readable: true, writable: false, executable: false, guard: false }
    }
}

/// Commit state of a region (MEM_COMMIT vs MEM_FREE/MEM_RESERVE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Committed,
    Reserved,
    Free,
}

/// One contiguous region of the target's address space (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: Address,
    pub size: u64,
    pub protection: Prot,
    pub state: State,
}

impl Region {
    pub fn end(&self) -> Address {
        self.base + self.size
    }

    /// Regions usable as scan targets: committed, readable, not a guard
    /// page (§4.1, §4.3 step 1).
    pub fn is_scannable(&self) -> bool {
        self.state == State::Committed && self.protection.readable && !self.protection.guard
    }

    /// A coarse "this looks like heap" filter used by Container Tracker's
    /// discovery pass (§4.4: "regions classified as heap by protection
    /// flags"). Heap pages are committed, read-write, and not executable.
    pub fn looks_like_heap(&self) -> bool {
        self.is_scannable() && self.protection.writable && !self.protection.executable
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Page not present, or protection doesn't allow reading.
    NotReadable,
    /// The OS reported a transient failure.
    Faulted(String),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::NotReadable => write!(f, "address not readable"),
            ReadError::Faulted(msg) => write!(f, "read faulted: {msg}"),
        }
    }
}
impl std::error::Error for ReadError {}

/// Read-only view of a foreign (or captured) address space (§4.1).
pub trait MemorySource {
    /// Enumerate committed, user-mode, readable regions. Implementations
    /// are free to compute this lazily; callers stop as soon as they have
    /// enough (§9: "no restarts needed").
    fn enumerate_regions(&self) -> Vec<Region>;

    /// Read exactly `len` bytes starting at `addr`. A short read is an
    /// error, never silently truncated (§4.1).
    fn read(&self, addr: Address, len: usize) -> Result<Vec<u8>, ReadError>;

    /// Read up to `max_len` bytes starting at `addr`, stopping at the first
    /// NUL. Returns `None` if the first byte is unreadable or NUL, or if no
    /// NUL appears within `max_len` (§4.1: "suspicious; treat as dangling").
    fn read_c_string(&self, addr: Address, max_len: usize) -> Option<String> {
        if addr == 0 {
            return None;
        }
        let mut out = Vec::with_capacity(max_len.min(64));
        let mut offset = 0usize;
        const CHUNK: usize = 32;
        loop {
            if offset >= max_len {
                return None; // ran past max_len without a terminator
            }
            let want = CHUNK.min(max_len - offset);
            let bytes = match self.read(addr + offset as u64, want) {
                Ok(b) => b,
                Err(_) => return None,
            };
            if bytes.is_empty() {
                return None;
            }
            if let Some(nul_pos) = bytes.iter().position(|&b| b == 0) {
                out.extend_from_slice(&bytes[..nul_pos]);
                if out.is_empty() {
                    return None;
                }
                return String::from_utf8(out).ok();
            }
            out.extend_from_slice(&bytes);
            offset += bytes.len();
        }
    }
}

/// An in-memory stand-in for a foreign address space, used by tests (§8,
/// §8.1). Backed by a flat list of `(base, bytes)` spans; reads are served
/// from whichever span contains the requested range, byte-for-byte.
#[derive(Default)]
pub struct FakeAddressSpace {
    spans: Vec<(Address, Vec<u8>)>,
}

impl FakeAddressSpace {
    pub fn new() -> Self {
        Self { spans: Vec::new() }
    }

    /// Plant a span of bytes at `base`. Overlapping spans are allowed; the
    /// most recently planted span wins for any address it covers.
    pub fn plant(&mut self, base: Address, bytes: Vec<u8>) {
        self.spans.push((base, bytes));
    }

    fn find_byte(&self, addr: Address) -> Option<u8> {
        for (base, bytes) in self.spans.iter().rev() {
            if addr >= *base && addr < *base + bytes.len() as u64 {
                return Some(bytes[(addr - base) as usize]);
            }
        }
        None
    }
}

impl MemorySource for FakeAddressSpace {
    fn enumerate_regions(&self) -> Vec<Region> {
        self.spans
            .iter()
            .map(|(base, bytes)| Region {
                base: *base,
                size: bytes.len() as u64,
                protection: Prot::rw(),
                state: State::Committed,
            })
            .collect()
    }

    fn read(&self, addr: Address, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len as u64 {
            match self.find_byte(addr + i) {
                Some(b) => out.push(b),
                None => return Err(ReadError::NotReadable),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_c_string_stops_at_nul() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x1000, b"hero\0trailing garbage".to_vec());
        assert_eq!(space.read_c_string(0x1000, 64).as_deref(), Some("hero"));
    }

    #[test]
    fn read_c_string_none_without_terminator() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x1000, b"no_terminator_here".to_vec());
        assert_eq!(space.read_c_string(0x1000, 8), None);
    }

    #[test]
    fn read_c_string_none_when_first_byte_unreadable() {
        let space = FakeAddressSpace::new();
        assert_eq!(space.read_c_string(0x9999, 16), None);
    }

    #[test]
    fn read_c_string_none_when_null_immediately() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x1000, vec![0u8]);
        assert_eq!(space.read_c_string(0x1000, 16), None);
    }
}
