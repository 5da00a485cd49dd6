// types.rs — primitive and core entity types (§3.1, §3.2, §3.3).

use std::collections::BTreeMap;

/// Address in the target process's address space. Wide enough for either a
/// 32-bit or a 64-bit target (§6.3: "both 32-bit and 64-bit targets
/// symmetrically").
pub type Address = u64;

/// Hand identifier. Valid live values lie in `[HAND_ID_MIN, HAND_ID_MAX)`
/// (layout::HAND_ID_MIN/MAX).
pub type HandId = u64;

/// 0-based seat, or `SEAT_TABLE` (0xFF) for a table-level event.
pub type SeatIndex = u8;

/// Amount in the game's minor currency unit. Always unsigned; the codec
/// never sign-extends this field.
pub type Amount = u16;

/// Decoded form of `action_code` (§3.3). Codes absent from the table are
/// preserved as `Unknown` rather than dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Bet,
    Call,
    Raise,
    Fold,
    PostBb,
    PostSb,
    Check,
    Win,
    Unknown(u8),
}

impl ActionKind {
    pub fn from_code(code: u8) -> Self {
        use crate::layout::*;
        match code {
            ACT_BET => ActionKind::Bet,
            ACT_CALL => ActionKind::Call,
            ACT_RAISE => ActionKind::Raise,
            ACT_FOLD => ActionKind::Fold,
            ACT_POST_BB => ActionKind::PostBb,
            ACT_POST_SB => ActionKind::PostSb,
            ACT_CHECK => ActionKind::Check,
            ACT_WIN => ActionKind::Win,
            other => ActionKind::Unknown(other),
        }
    }
}

/// Decoded form of `msg_type` (§3.2). Unknown values are preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    NewHand,
    Action,
    Seated,
    ActionStart,
    Deal,
    Win,
    Unknown(u8),
}

impl MsgType {
    pub fn from_code(code: u8) -> Self {
        use crate::layout::*;
        match code {
            MSG_NEW_HAND => MsgType::NewHand,
            MSG_ACTION => MsgType::Action,
            MSG_SEATED => MsgType::Seated,
            MSG_ACTION_START => MsgType::ActionStart,
            MSG_DEAL => MsgType::Deal,
            MSG_WIN => MsgType::Win,
            other => MsgType::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        use crate::layout::*;
        match self {
            MsgType::NewHand => MSG_NEW_HAND,
            MsgType::Action => MSG_ACTION,
            MsgType::Seated => MSG_SEATED,
            MsgType::ActionStart => MSG_ACTION_START,
            MsgType::Deal => MSG_DEAL,
            MsgType::Win => MSG_WIN,
            MsgType::Unknown(c) => c,
        }
    }
}

/// Fixed-size, 64-byte, little-endian record decoded from the buffer
/// (§3.2). Unlisted bytes are padding and are never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventEntry {
    pub hand_id: HandId,
    pub sequence: u32,
    pub msg_type: MsgType,
    pub seat_index: SeatIndex,
    pub action_code: u8,
    pub amount: Amount,
    pub name_ptr: u32,
    pub name_len: u32,
    pub name_capacity: u32,
    pub extra_ptr: u32,
    pub extra_len: u32,
}

impl EventEntry {
    pub fn action_kind(&self) -> ActionKind {
        ActionKind::from_code(self.action_code)
    }

    pub fn is_table_level(&self) -> bool {
        self.seat_index == crate::layout::SEAT_TABLE
    }
}

/// Resolved UTF-8 string plus the seat it belongs to. Only valid within the
/// lifetime of the buffer it was read from (§3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerName {
    pub seat: SeatIndex,
    pub name: String,
}

/// `(name_or_seat, ActionKind, Amount)` (§3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub seat: SeatIndex,
    pub name: Option<String>,
    pub kind: ActionKind,
    pub amount: Amount,
    pub sequence: u32,
}

/// Hero's position label, derived from hero seat and big-blind seat (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Utg,
    Mp,
    Co,
    Btn,
    Sb,
    Bb,
    Unknown,
}

/// How the poller produced the address currently in use (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// Found via a fresh signature scan.
    Initial,
    /// Found by following the container's stored pointer.
    Container,
    /// Buffer address unchanged since the last emission.
    Cached,
}

/// The abstract result the core delivers upward (§3.2). Invariants are
/// documented on each field; `HandData` is constructed only by code paths
/// that have already checked them.
#[derive(Debug, Clone, PartialEq)]
pub struct HandData {
    pub hand_id: HandId,
    pub buffer_addr: Address,
    pub container_addr: Option<Address>,
    pub entry_count: usize,
    pub hero_cards: Option<String>,
    pub community_cards: Vec<String>,
    pub players: BTreeMap<SeatIndex, String>,
    pub actions: Vec<Action>,
    pub position: Position,
    pub hand_id_changed: bool,
    pub scan_kind: ScanKind,
    /// Set when the locator could only validate a stale candidate
    /// (§4.3 `OnlyStale`) — the hero-SEATED name failed to resolve even
    /// though entry bytes look intact.
    pub stale: bool,
}
