// codec.rs — Entry Codec (§4.2). Pure decoding; the only I/O here is
// through a supplied `MemorySource`, and even that is confined to
// `resolve_names`. `decode_entry` never touches anything but its argument.

use crate::layout::*;
use crate::source::MemorySource;
use crate::types::{Action, Address, EventEntry, HandId, MsgType, SeatIndex};
use std::collections::BTreeMap;

fn read_u64_le(b: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(b[off..off + 8].try_into().unwrap())
}
fn read_u32_le(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(b[off..off + 4].try_into().unwrap())
}
fn read_u16_le(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(b[off..off + 2].try_into().unwrap())
}

/// Decode one 64-byte entry. Infallible: fields are extracted by fixed
/// offset and unknown `msg_type`/`action_code` values are preserved as
/// `Unknown` rather than rejected (§4.2).
pub fn decode_entry(bytes: &[u8; ENTRY_SIZE]) -> EventEntry {
    EventEntry {
        hand_id: read_u64_le(bytes, OFF_HAND_ID),
        sequence: read_u32_le(bytes, OFF_SEQUENCE),
        msg_type: MsgType::from_code(bytes[OFF_MSG_TYPE]),
        seat_index: bytes[OFF_SEAT_INDEX],
        action_code: bytes[OFF_ACTION_CODE],
        amount: read_u16_le(bytes, OFF_AMOUNT),
        name_ptr: read_u32_le(bytes, OFF_NAME_PTR),
        name_len: read_u32_le(bytes, OFF_NAME_LEN),
        name_capacity: read_u32_le(bytes, OFF_NAME_CAPACITY),
        extra_ptr: read_u32_le(bytes, OFF_EXTRA_PTR),
        extra_len: read_u32_le(bytes, OFF_EXTRA_LEN),
    }
}

/// Encode an `EventEntry` back into its 64-byte wire form. Used only by the
/// round-trip test below and by the in-test buffer builders; never on the
/// read path (the core never writes to the target).
pub fn encode_entry(e: &EventEntry) -> [u8; ENTRY_SIZE] {
    let mut out = [0u8; ENTRY_SIZE];
    out[OFF_HAND_ID..OFF_HAND_ID + 8].copy_from_slice(&e.hand_id.to_le_bytes());
    out[OFF_SEQUENCE..OFF_SEQUENCE + 4].copy_from_slice(&e.sequence.to_le_bytes());
    out[OFF_MSG_TYPE] = e.msg_type.code();
    out[OFF_SEAT_INDEX] = e.seat_index;
    out[OFF_ACTION_CODE] = e.action_code;
    out[OFF_AMOUNT..OFF_AMOUNT + 2].copy_from_slice(&e.amount.to_le_bytes());
    out[OFF_NAME_PTR..OFF_NAME_PTR + 4].copy_from_slice(&e.name_ptr.to_le_bytes());
    out[OFF_NAME_LEN..OFF_NAME_LEN + 4].copy_from_slice(&e.name_len.to_le_bytes());
    out[OFF_NAME_CAPACITY..OFF_NAME_CAPACITY + 4].copy_from_slice(&e.name_capacity.to_le_bytes());
    out[OFF_EXTRA_PTR..OFF_EXTRA_PTR + 4].copy_from_slice(&e.extra_ptr.to_le_bytes());
    out[OFF_EXTRA_LEN..OFF_EXTRA_LEN + 4].copy_from_slice(&e.extra_len.to_le_bytes());
    out
}

/// Result of decoding a run of entries starting at `buf_addr` (§4.2).
pub struct DecodedBuffer {
    pub entries: Vec<EventEntry>,
    pub hand_id: HandId,
    pub truncated: bool,
}

/// Read up to `max_entries` 64-byte entries from `buf_addr`. Stops at the
/// first entry whose `hand_id` is zero *after* at least one non-zero entry
/// has been seen (§4.2). A read failure partway through ends the scan
/// without discarding entries already decoded.
pub fn decode_buffer(
    source: &dyn MemorySource,
    buf_addr: Address,
    max_entries: usize,
) -> DecodedBuffer {
    let mut entries = Vec::with_capacity(max_entries);
    let mut truncated = false;
    let mut seen_nonzero = false;
    let mut hand_id = 0;

    for i in 0..max_entries {
        let addr = buf_addr + (i * ENTRY_SIZE) as u64;
        let bytes = match source.read(addr, ENTRY_SIZE) {
            Ok(b) => b,
            Err(_) => {
                truncated = true;
                break;
            }
        };
        let arr: [u8; ENTRY_SIZE] = bytes.try_into().expect("read returned exactly ENTRY_SIZE bytes");
        let entry = decode_entry(&arr);

        if entry.hand_id == 0 {
            if seen_nonzero {
                break;
            }
        } else {
            if !seen_nonzero {
                hand_id = entry.hand_id;
            }
            seen_nonzero = true;
        }

        entries.push(entry);
        if i + 1 == max_entries {
            truncated = true;
        }
    }

    DecodedBuffer { entries, hand_id, truncated }
}

/// Validate a 4-char hero-card blob: two (rank, suit) pairs, rank in
/// "23456789TJQKA", suit in "hdsc" (§3.2 invariant on `hero_cards`).
fn validate_card_blob(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() % 2 != 0 || chars.is_empty() {
        return false;
    }
    chars.chunks(2).all(|pair| {
        "23456789TJQKA".contains(pair[0]) && "hdsc".contains(pair[1])
    })
}

/// For each entry with a name-bearing `msg_type`, dereference `name_ptr`
/// with a conservative `max_len` (clamped to 64). For the hero's seated
/// entry, also dereference `extra_ptr` to obtain the card blob (§4.2).
pub fn resolve_names(
    source: &dyn MemorySource,
    entries: &[EventEntry],
    hero_handle: &str,
) -> (BTreeMap<SeatIndex, String>, Option<String>) {
    let mut players = BTreeMap::new();
    let mut hero_cards = None;

    for entry in entries {
        let name_bearing = matches!(
            entry.msg_type,
            MsgType::Seated | MsgType::Action | MsgType::ActionStart | MsgType::Win
        );
        if !name_bearing || entry.is_table_level() {
            continue;
        }
        if entry.name_ptr == 0 {
            continue;
        }
        let max_len = (entry.name_len as usize).clamp(1, 64);
        let Some(name) = source.read_c_string(entry.name_ptr as Address, max_len) else {
            continue;
        };
        if entry.msg_type == MsgType::Seated && name == hero_handle && entry.extra_ptr != 0 {
            let extra_max = (entry.extra_len as usize).clamp(1, 64);
            if let Some(blob) = source.read_c_string(entry.extra_ptr as Address, extra_max) {
                if validate_card_blob(&blob) {
                    hero_cards = Some(blob);
                }
            }
        }
        players.insert(entry.seat_index, name);
    }

    (players, hero_cards)
}

/// Extract community cards from `DEAL` entries (`msg_type = 0x05`). Each
/// `DEAL` entry's `extra_ptr`/`extra_len` is dereferenced and validated with the
/// same rank/suit validator used for hero cards; a blob that doesn't decode
/// to whole (rank, suit) pairs is dropped rather than guessed at. Cards are
/// appended in entry order, so a flop/turn/river sequence of `DEAL` entries
/// yields 0..5 cards without this function ever tracking street identity
/// itself.
pub fn resolve_community_cards(source: &dyn MemorySource, entries: &[EventEntry]) -> Vec<String> {
    let mut cards = Vec::new();
    for entry in entries {
        if entry.msg_type != MsgType::Deal || entry.extra_ptr == 0 {
            continue;
        }
        let max_len = (entry.extra_len as usize).clamp(1, 64);
        let Some(blob) = source.read_c_string(entry.extra_ptr as Address, max_len) else {
            continue;
        };
        if !validate_card_blob(&blob) {
            continue;
        }
        for pair in blob.as_bytes().chunks(2) {
            cards.push(String::from_utf8_lossy(pair).into_owned());
        }
    }
    cards
}

/// Build the chronological `Action` list from a hand's entries, attaching
/// the resolved name when one is known for the seat (§3.2).
pub fn build_actions(entries: &[EventEntry], players: &BTreeMap<SeatIndex, String>) -> Vec<Action> {
    entries
        .iter()
        .filter(|e| e.msg_type == MsgType::Action)
        .map(|e| Action {
            seat: e.seat_index,
            name: players.get(&e.seat_index).cloned(),
            kind: e.action_kind(),
            amount: e.amount,
            sequence: e.sequence,
        })
        .collect()
}

/// All decoded entries belonging to the same hand must share `hand_id`
/// (§3.4 "Homogeneity invariant"). Returns false the moment a second,
/// non-zero, differing `hand_id` is seen — the buffer was reused mid-read.
pub fn is_homogeneous(entries: &[EventEntry]) -> bool {
    let mut expected: Option<HandId> = None;
    for e in entries {
        if e.hand_id == 0 {
            continue;
        }
        match expected {
            None => expected = Some(e.hand_id),
            Some(h) if h != e.hand_id => return false,
            _ => {}
        }
    }
    true
}
