// locator.rs — Buffer Locator (§4.3).
//
// Finds the current message buffer by scanning readable regions for the
// 10-byte signature, validating every match, then choosing the candidate
// that represents the most recent hand.

use crate::codec::{decode_buffer, decode_entry, resolve_names};
use crate::layout::*;
use crate::log::{log_debug, log_warn, LogSink};
use crate::source::MemorySource;
use crate::types::{Address, HandData, Position, ScanKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// No signature match validated against the wire format.
    NoCandidate,
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateError::NoCandidate => write!(f, "no validating buffer candidate found"),
        }
    }
}
impl std::error::Error for LocateError {}

struct Candidate {
    buf_addr: Address,
    hand_id: u64,
    hero_resolved: bool,
}

/// Outcome of a successful locate: the chosen buffer plus whether every
/// candidate considered was stale (§4.3 `OnlyStale`).
pub struct LocateResult {
    pub buf_addr: Address,
    pub hand_id: u64,
    pub stale: bool,
}

/// Validate the first entry at `candidate_buf`: `sequence == 1`, `hand_id`
/// in the valid range, `msg_type == NEW_HAND`, `seat_index == SEAT_TABLE`
/// (§4.3 step 3).
fn validate_first_entry(source: &dyn MemorySource, candidate_buf: Address) -> Option<u64> {
    let bytes = source.read(candidate_buf, ENTRY_SIZE).ok()?;
    let arr: [u8; ENTRY_SIZE] = bytes.try_into().ok()?;
    let entry = decode_entry(&arr);
    if entry.sequence != 1 {
        return None;
    }
    if entry.hand_id < HAND_ID_MIN || entry.hand_id >= HAND_ID_MAX {
        return None;
    }
    if entry.msg_type.code() != MSG_NEW_HAND || entry.seat_index != SEAT_TABLE {
        return None;
    }
    Some(entry.hand_id)
}

/// Whether the hero-SEATED entry in this buffer resolves to `hero_handle`
/// (§4.3 step 5 tie-break, §3.4 "Stale buffer rule").
fn hero_seated_resolves(source: &dyn MemorySource, buf_addr: Address, hero_handle: &str) -> bool {
    let decoded = decode_buffer(source, buf_addr, 30);
    let (_players, _hero_cards) = resolve_names(source, &decoded.entries, hero_handle);
    decoded
        .entries
        .iter()
        .filter(|e| e.msg_type == crate::types::MsgType::Seated && !e.is_table_level())
        .any(|e| {
            e.name_ptr != 0
                && source
                    .read_c_string(e.name_ptr as Address, (e.name_len as usize).clamp(1, 64))
                    .as_deref()
                    == Some(hero_handle)
        })
}

/// Scan every scannable region for the 10-byte signature, using `memchr`
/// for an accelerated first-byte search (§4.3: "SIMD or memchr-style
/// accelerated needle searches") — correctness does not depend on it, a
/// naive scan of the same bytes would find the same offsets.
fn find_signature_offsets(region_bytes: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(pos) = memchr::memchr(SIGNATURE[0], &region_bytes[start..]) {
        let abs = start + pos;
        if abs + SIGNATURE.len() <= region_bytes.len()
            && region_bytes[abs..abs + SIGNATURE.len()] == SIGNATURE
        {
            out.push(abs);
        }
        start = abs + 1;
        if start >= region_bytes.len() {
            break;
        }
    }
    out
}

/// Locate the current message buffer (§4.3). Reads every scannable region
/// in full to search for the signature — acceptable because the locator's
/// 2-4s budget is confined to cold start and recovery (§5 "Real-time
/// budget").
pub fn locate(
    source: &dyn MemorySource,
    hero_handle: &str,
    log: &dyn LogSink,
) -> Result<LocateResult, LocateError> {
    let mut regions: Vec<_> = source
        .enumerate_regions()
        .into_iter()
        .filter(|r| r.is_scannable())
        .collect();
    regions.sort_by_key(|r| r.base);

    let mut candidates: Vec<Candidate> = Vec::new();

    for region in &regions {
        // Read in bounded chunks so a single enormous region doesn't
        // require one unbounded allocation; chunks overlap by the
        // signature length so a match spanning a chunk boundary isn't
        // missed.
        const CHUNK: u64 = 4 * 1024 * 1024;
        let overlap = SIGNATURE.len() as u64;
        let mut offset = region.base;
        while offset < region.end() {
            let want = CHUNK.min(region.end() - offset) as usize;
            let bytes = match source.read(offset, want) {
                Ok(b) => b,
                Err(_) => break,
            };
            for local_off in find_signature_offsets(&bytes) {
                let sig_addr = offset + local_off as u64;
                let candidate_buf = sig_addr + SIGNATURE.len() as u64;
                if let Some(hand_id) = validate_first_entry(source, candidate_buf) {
                    let hero_resolved = hero_seated_resolves(source, candidate_buf, hero_handle);
                    log_debug(
                        log,
                        format!(
                            "candidate buf=0x{candidate_buf:X} hand_id={hand_id} hero_resolved={hero_resolved}"
                        ),
                    );
                    candidates.push(Candidate { buf_addr: candidate_buf, hand_id, hero_resolved });
                }
            }
            if offset + (want as u64) >= region.end() {
                break;
            }
            offset += want as u64 - overlap.min(want as u64 - 1);
        }
    }

    if candidates.is_empty() {
        log_warn(log, "locate: no validating candidate in any scannable region");
        return Err(LocateError::NoCandidate);
    }

    // Choose the candidate with the highest hand_id; tie-break on hero
    // resolution (§4.3 step 5).
    let max_hand_id = candidates.iter().map(|c| c.hand_id).max().unwrap();
    let top: Vec<&Candidate> = candidates.iter().filter(|c| c.hand_id == max_hand_id).collect();

    let chosen = top
        .iter()
        .find(|c| c.hero_resolved)
        .copied()
        .unwrap_or(top[0]);

    Ok(LocateResult {
        buf_addr: chosen.buf_addr,
        hand_id: chosen.hand_id,
        stale: !chosen.hero_resolved,
    })
}

/// Decode a chosen buffer into a full `HandData` (§4.3 step 6, §3.2).
pub fn decode_located_hand(
    source: &dyn MemorySource,
    located: &LocateResult,
    hero_handle: &str,
    max_entries: usize,
    scan_kind: ScanKind,
    container_addr: Option<Address>,
) -> Option<HandData> {
    let decoded = decode_buffer(source, located.buf_addr, max_entries);
    if decoded.entries.is_empty() || !crate::codec::is_homogeneous(&decoded.entries) {
        return None;
    }
    let (players, hero_cards) = resolve_names(source, &decoded.entries, hero_handle);
    let actions = crate::codec::build_actions(&decoded.entries, &players);
    let position = derive_position(&actions, hero_handle, &players);
    let community_cards = crate::codec::resolve_community_cards(source, &decoded.entries);

    Some(HandData {
        hand_id: decoded.hand_id,
        buffer_addr: located.buf_addr,
        container_addr,
        entry_count: decoded.entries.len(),
        hero_cards,
        community_cards,
        players,
        actions,
        position,
        hand_id_changed: false,
        scan_kind,
        stale: located.stale,
    })
}

/// Position label derivation: walk seats clockwise from
/// the big-blind seat (the seat whose first action in the hand is
/// `PostBb`); offsets from BB map to standard position names modulo the
/// active seat count.
pub(crate) fn derive_position(
    actions: &[crate::types::Action],
    hero_handle: &str,
    players: &std::collections::BTreeMap<u8, String>,
) -> Position {
    let Some(hero_seat) = players
        .iter()
        .find(|(_, name)| name.as_str() == hero_handle)
        .map(|(seat, _)| *seat)
    else {
        return Position::Unknown;
    };
    let Some(bb_seat) = actions
        .iter()
        .find(|a| a.kind == crate::types::ActionKind::PostBb)
        .map(|a| a.seat)
    else {
        return Position::Unknown;
    };

    let mut seats: Vec<u8> = players.keys().copied().collect();
    seats.sort_unstable();
    let n = seats.len();
    if n == 0 {
        return Position::Unknown;
    }
    let Some(bb_idx) = seats.iter().position(|s| *s == bb_seat) else {
        return Position::Unknown;
    };
    let Some(hero_idx) = seats.iter().position(|s| *s == hero_seat) else {
        return Position::Unknown;
    };

    let offset = (hero_idx + n - bb_idx) % n;
    match offset {
        0 => Position::Bb,
        o if o == n - 1 => Position::Sb,
        o if o == n - 2 => Position::Btn,
        o if o == n - 3 && n > 3 => Position::Co,
        o if o == n - 4 && n > 4 => Position::Mp,
        _ => Position::Utg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_entry;
    use crate::source::FakeAddressSpace;
    use crate::types::{EventEntry, MsgType};

    fn raw_entry(hand_id: u64, seq: u32, msg_type: u8, seat: u8) -> EventEntry {
        EventEntry {
            hand_id,
            sequence: seq,
            msg_type: MsgType::from_code(msg_type),
            seat_index: seat,
            action_code: 0,
            amount: 0,
            name_ptr: 0,
            name_len: 0,
            name_capacity: 0,
            extra_ptr: 0,
            extra_len: 0,
        }
    }

    fn plant_buffer(space: &mut FakeAddressSpace, sig_addr: Address, hand_id: u64, hero_name_addr: Option<Address>) {
        space.plant(sig_addr, SIGNATURE.to_vec());
        let buf_addr = sig_addr + SIGNATURE.len() as u64;
        let mut data = Vec::new();
        data.extend_from_slice(&encode_entry(&raw_entry(hand_id, 1, MSG_NEW_HAND, SEAT_TABLE)));
        let mut seated = raw_entry(hand_id, 2, MSG_SEATED, 0);
        if let Some(addr) = hero_name_addr {
            seated.name_ptr = addr as u32;
            seated.name_len = 16;
        }
        data.extend_from_slice(&encode_entry(&seated));
        space.plant(buf_addr, data);
    }

    #[test]
    fn single_valid_buffer_is_found() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x7000, b"Hero\0".to_vec());
        plant_buffer(&mut space, 0x1000, 259_644_772_106, Some(0x7000));
        let result = locate(&space, "Hero", &crate::log::NullLogSink).unwrap();
        assert_eq!(result.buf_addr, 0x1000 + SIGNATURE.len() as u64);
        assert_eq!(result.hand_id, 259_644_772_106);
        assert!(!result.stale);
    }

    #[test]
    fn higher_hand_id_wins_between_two_buffers() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x7000, b"Hero\0".to_vec());
        plant_buffer(&mut space, 0x1000, 259_644_772_106, Some(0x7000));
        plant_buffer(&mut space, 0x2000, 259_644_777_045, Some(0x7000));
        let result = locate(&space, "Hero", &crate::log::NullLogSink).unwrap();
        assert_eq!(result.hand_id, 259_644_777_045);
    }

    #[test]
    fn resolvable_hero_name_wins_tiebreak() {
        let mut space = FakeAddressSpace::new();
        space.plant(0x7000, b"Hero\0".to_vec());
        // Same hand_id on both; only the second has a resolvable hero name.
        plant_buffer(&mut space, 0x1000, 259_644_772_106, None);
        plant_buffer(&mut space, 0x2000, 259_644_772_106, Some(0x7000));
        let result = locate(&space, "Hero", &crate::log::NullLogSink).unwrap();
        assert_eq!(result.buf_addr, 0x2000 + SIGNATURE.len() as u64);
        assert!(!result.stale);
    }

    #[test]
    fn stale_only_buffer_is_returned_flagged() {
        let mut space = FakeAddressSpace::new();
        plant_buffer(&mut space, 0x1000, 259_644_772_106, None);
        let result = locate(&space, "Hero", &crate::log::NullLogSink).unwrap();
        assert!(result.stale);
    }

    #[test]
    fn no_candidate_when_nothing_planted() {
        let space = FakeAddressSpace::new();
        assert_eq!(
            locate(&space, "Hero", &crate::log::NullLogSink).unwrap_err(),
            LocateError::NoCandidate
        );
    }
}
