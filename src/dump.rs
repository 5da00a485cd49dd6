// dump.rs — offline dump replay and sidecar capture (§6.2).
//
// `DumpFile` is the Process Attachment's offline twin: both end up behind
// the same `MemorySource` trait, so Buffer Locator and Entry Codec never
// know which one they're talking to. A captured memory dump is a binary
// header-per-region layout; the sidecar is a small hand-rolled JSON file
// carrying the same metadata a plain file-backed log would.

use crate::source::{MemorySource, Prot, ReadError, Region, State};
use crate::types::Address;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum DumpError {
    Io(io::Error),
    Truncated,
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::Io(e) => write!(f, "dump io error: {e}"),
            DumpError::Truncated => write!(f, "dump file truncated mid-header or mid-payload"),
        }
    }
}
impl std::error::Error for DumpError {}

impl From<io::Error> for DumpError {
    fn from(e: io::Error) -> Self {
        DumpError::Io(e)
    }
}

const HEADER_LEN: usize = 8 + 8 + 4;

fn encode_protection(p: Prot) -> u32 {
    let mut bits = 0u32;
    if p.readable {
        bits |= 0b0001;
    }
    if p.writable {
        bits |= 0b0010;
    }
    if p.executable {
        bits |= 0b0100;
    }
    if p.guard {
        bits |= 0b1000;
    }
    bits
}

fn decode_protection(bits: u32) -> Prot {
    Prot {
        readable: bits & 0b0001 != 0,
        writable: bits & 0b0010 != 0,
        executable: bits & 0b0100 != 0,
        guard: bits & 0b1000 != 0,
    }
}

struct Span {
    region: Region,
    payload_offset: usize,
}

/// A captured address space, read from a file written by [`write_dump`]
/// (§6.2). Loaded fully into memory at open time — dumps are a diagnostic
/// artifact, not something the hot path touches.
pub struct DumpFile {
    bytes: Vec<u8>,
    spans: Vec<Span>,
}

impl DumpFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DumpError> {
        let raw = fs::read(path)?;
        let mut spans = Vec::new();
        let mut cursor = 0usize;
        while cursor < raw.len() {
            if raw.len() - cursor < HEADER_LEN {
                return Err(DumpError::Truncated);
            }
            let base = u64::from_le_bytes(raw[cursor..cursor + 8].try_into().unwrap());
            let size = u64::from_le_bytes(raw[cursor + 8..cursor + 16].try_into().unwrap());
            let protect = u32::from_le_bytes(raw[cursor + 16..cursor + 20].try_into().unwrap());
            cursor += HEADER_LEN;

            let payload_offset = cursor;
            let size_usize = size as usize;
            if raw.len() - cursor < size_usize {
                return Err(DumpError::Truncated);
            }
            spans.push(Span {
                region: Region {
                    base,
                    size,
                    protection: decode_protection(protect),
                    state: State::Committed,
                },
                payload_offset,
            });
            cursor += size_usize;
        }
        Ok(Self { bytes: raw, spans })
    }

    /// Serialize `regions`, reading each one's payload from `source`, into
    /// the documented header+payload layout (§6.2). This is the write side
    /// used by capture tooling built on top of this crate; the core itself
    /// never calls it on the hot path.
    pub fn write_dump(
        path: impl AsRef<Path>,
        source: &dyn MemorySource,
        regions: &[Region],
    ) -> Result<(), DumpError> {
        let mut out = Vec::new();
        for region in regions {
            let payload = source
                .read(region.base, region.size as usize)
                .unwrap_or_else(|_| vec![0u8; region.size as usize]);
            out.extend_from_slice(&region.base.to_le_bytes());
            out.extend_from_slice(&region.size.to_le_bytes());
            out.extend_from_slice(&encode_protection(region.protection).to_le_bytes());
            out.extend_from_slice(&payload);
        }
        fs::write(path, out)?;
        Ok(())
    }
}

impl MemorySource for DumpFile {
    fn enumerate_regions(&self) -> Vec<Region> {
        self.spans.iter().map(|s| s.region).collect()
    }

    fn read(&self, addr: Address, len: usize) -> Result<Vec<u8>, ReadError> {
        for span in &self.spans {
            if addr >= span.region.base && addr + len as u64 <= span.region.end() {
                let start = span.payload_offset + (addr - span.region.base) as usize;
                return Ok(self.bytes[start..start + len].to_vec());
            }
        }
        Err(ReadError::NotReadable)
    }
}

/// Ground-truth and provenance tags written alongside a dump (§6.2). Every
/// `gpt_*` field is consumer-supplied, added later than capture time, and
/// never read by this crate.
#[derive(Debug, Clone, Default)]
pub struct DumpMeta {
    pub timestamp: String,
    pub pid: u32,
    pub process_name: String,
    pub hero_handle: String,
    pub gpt_hero_cards: Option<String>,
    pub gpt_hand_id: Option<u64>,
    pub gpt_opponents: Option<String>,
    pub gpt_pot: Option<u64>,
    pub gpt_board: Option<String>,
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Write the sidecar JSON sibling file for a dump (§6.2). Hand-rolled
/// rather than pulled in via a serialization crate: this sidecar is an
/// optional offline-diagnostic artifact, not part of the polling path, and
/// no serialization crate is otherwise needed in this dependency table.
pub fn write_sidecar(path: impl AsRef<Path>, meta: &DumpMeta) -> Result<(), DumpError> {
    let mut json = String::new();
    json.push_str("{\n");
    json.push_str(&format!("  \"timestamp\": \"{}\",\n", json_escape(&meta.timestamp)));
    json.push_str(&format!("  \"pid\": {},\n", meta.pid));
    json.push_str(&format!("  \"process_name\": \"{}\",\n", json_escape(&meta.process_name)));
    json.push_str(&format!("  \"hero_handle\": \"{}\"", json_escape(&meta.hero_handle)));

    if let Some(v) = &meta.gpt_hero_cards {
        json.push_str(&format!(",\n  \"gpt_hero_cards\": \"{}\"", json_escape(v)));
    }
    if let Some(v) = meta.gpt_hand_id {
        json.push_str(&format!(",\n  \"gpt_hand_id\": {v}"));
    }
    if let Some(v) = &meta.gpt_opponents {
        json.push_str(&format!(",\n  \"gpt_opponents\": \"{}\"", json_escape(v)));
    }
    if let Some(v) = meta.gpt_pot {
        json.push_str(&format!(",\n  \"gpt_pot\": {v}"));
    }
    if let Some(v) = &meta.gpt_board {
        json.push_str(&format!(",\n  \"gpt_board\": \"{}\"", json_escape(v)));
    }
    json.push_str("\n}\n");

    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FakeAddressSpace;

    #[test]
    fn round_trips_through_write_dump_and_open() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x1000, b"hello world, this is a test region".to_vec());
        let regions = space.enumerate_regions();

        let dir = std::env::temp_dir();
        let path = dir.join(format!("tablelive_core_test_dump_{:p}.bin", &regions as *const _));
        DumpFile::write_dump(&path, &space, &regions).unwrap();

        let loaded = DumpFile::open(&path).unwrap();
        let read = loaded.read(0x1000, 5).unwrap();
        assert_eq!(read, b"hello");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn read_outside_any_span_is_not_readable() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x1000, vec![1, 2, 3, 4]);
        let regions = space.enumerate_regions();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tablelive_core_test_dump_oob_{:p}.bin", &regions as *const _));
        DumpFile::write_dump(&path, &space, &regions).unwrap();

        let loaded = DumpFile::open(&path).unwrap();
        assert!(loaded.read(0x9999, 4).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn sidecar_json_contains_required_fields() {
        let dir = std::env::temp_dir();
        let path = dir.join("tablelive_core_test_sidecar.json");
        let meta = DumpMeta {
            timestamp: "2026-07-27T00:00:00Z".into(),
            pid: 4242,
            process_name: "poker.exe".into(),
            hero_handle: "Hero".into(),
            gpt_hand_id: Some(259_644_772_106),
            ..Default::default()
        };
        write_sidecar(&path, &meta).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"pid\": 4242"));
        assert!(contents.contains("\"hero_handle\": \"Hero\""));
        assert!(contents.contains("\"gpt_hand_id\": 259644772106"));
        std::fs::remove_file(&path).ok();
    }
}
