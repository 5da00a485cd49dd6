// poller.rs — Live Poller (§4.5).
//
// Drives the end-to-end live-data flow: initial locate, fast periodic
// re-decode, hand-change detection, and recovery from buffer loss. The
// lifecycle is: locate once, then loop a small state machine until told to
// stop.

use crate::container::ContainerTracker;
use crate::locator::{self, LocateError, LocateResult};
use crate::log::{log_debug, log_info, log_warn, LogSink};
use crate::source::MemorySource;
use crate::types::{Address, HandData, HandId, ScanKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Scanning,
    Tracking,
    Retrying,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    NotFound(String),
    TargetLost,
    Fatal(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::NotFound(reason) => write!(f, "not found: {reason}"),
            ScanError::TargetLost => write!(f, "target lost"),
            ScanError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}
impl std::error::Error for ScanError {}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    NoChange,
    Grew(HandData),
    NewHand(HandData),
    Lost,
}

/// Consecutive failed polls tolerated before forcing a rescan (§4.5.2:
/// "baseline: 10 consecutive failed polls ~= 500ms wall clock").
const RETRY_BUDGET: u32 = 10;

/// Per-session cache keyed by the hand the value was observed under
/// (§4.5.3). Entries are written only from a decode that proved its
/// `hand_id` at the same moment, and the whole cache is cleared only when a
/// `NewHand` is emitted.
#[derive(Default)]
struct HandCache {
    hero_cards: HashMap<HandId, String>,
    names: HashMap<(HandId, u8), String>,
}

impl HandCache {
    fn clear(&mut self) {
        self.hero_cards.clear();
        self.names.clear();
    }

    fn remember(&mut self, data: &HandData) {
        if let Some(cards) = &data.hero_cards {
            self.hero_cards.insert(data.hand_id, cards.clone());
        }
        for (seat, name) in &data.players {
            self.names.insert((data.hand_id, *seat), name.clone());
        }
    }

    /// Fill in anything this poll failed to resolve fresh, from a
    /// previously proven value for the same hand (§4.5.4).
    fn backfill(&self, data: &mut HandData) {
        if data.hero_cards.is_none() {
            if let Some(cards) = self.hero_cards.get(&data.hand_id) {
                data.hero_cards = Some(cards.clone());
            }
        }
        for action in &mut data.actions {
            if action.name.is_none() {
                if let Some(name) = self.names.get(&(data.hand_id, action.seat)) {
                    action.name = Some(name.clone());
                    data.players.entry(action.seat).or_insert_with(|| name.clone());
                }
            }
        }
    }
}

pub struct LivePoller {
    source: Box<dyn MemorySource + Send + Sync>,
    hero_handle: String,
    max_entries: usize,
    container_enabled: bool,
    log: Arc<dyn LogSink>,

    state: PollerState,
    buf_addr: Option<Address>,
    hand_id: Option<HandId>,
    entry_count: usize,
    container: ContainerTracker,
    retry_count: u32,
    generation: u64,
    cache: HandCache,
    lost_reported: bool,
}

impl LivePoller {
    pub fn new(
        source: Box<dyn MemorySource + Send + Sync>,
        hero_handle: String,
        max_entries: usize,
        container_enabled: bool,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            source,
            hero_handle,
            max_entries,
            container_enabled,
            log,
            state: PollerState::Idle,
            buf_addr: None,
            hand_id: None,
            entry_count: 0,
            container: ContainerTracker::new(),
            retry_count: 0,
            generation: 0,
            cache: HandCache::default(),
            lost_reported: false,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Increment the generation counter. Any in-flight update started under
    /// an old generation must be discarded before reaching the consumer
    /// (§4.5.1 `abort_generation`, §5 "Cancellation semantics").
    pub fn abort_generation(&mut self) {
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// §4.5.1 `initial_scan`: locate, opportunistically discover the
    /// container, decode, emit one `HandData` with `scan_kind = Initial`.
    pub fn initial_scan(&mut self) -> Result<HandData, ScanError> {
        self.state = PollerState::Scanning;
        self.lost_reported = false;

        let located = locator::locate(self.source.as_ref(), &self.hero_handle, self.log.as_ref())
            .map_err(|e| match e {
                LocateError::NoCandidate => ScanError::NotFound("no candidate buffer".into()),
            })?;

        if self.container_enabled {
            self.container
                .try_discover(self.source.as_ref(), located.buf_addr, self.log.as_ref());
        }

        let container_addr = self.container.container_addr();
        let mut data = locator::decode_located_hand(
            self.source.as_ref(),
            &located,
            &self.hero_handle,
            self.max_entries,
            ScanKind::Initial,
            container_addr,
        )
        .ok_or_else(|| ScanError::NotFound("located buffer failed to decode".into()))?;

        self.buf_addr = Some(data.buffer_addr);
        self.hand_id = Some(data.hand_id);
        self.entry_count = data.entry_count;
        self.retry_count = 0;
        self.state = PollerState::Tracking;

        self.cache.remember(&data);
        self.cache.backfill(&mut data);
        log_info(
            self.log.as_ref(),
            format!("initial_scan: hand_id={} entries={}", data.hand_id, data.entry_count),
        );
        Ok(data)
    }

    /// §4.5.1 `poll`, driven by the surrounding timer at `poll_interval_ms`.
    pub fn poll(&mut self) -> Result<PollOutcome, ScanError> {
        match self.state {
            PollerState::Idle => Err(ScanError::NotFound("poll called before initial_scan".into())),
            PollerState::Lost => {
                self.lost_reported = true;
                Ok(PollOutcome::Lost)
            }
            PollerState::Scanning => self.rescan(),
            PollerState::Tracking | PollerState::Retrying => self.poll_tracking(),
        }
    }

    fn poll_tracking(&mut self) -> Result<PollOutcome, ScanError> {
        let Some(expected_hand_id) = self.hand_id else {
            return self.rescan();
        };

        if self.container_enabled && self.container.container_addr().is_some() {
            if let Some((new_hand_id, new_buf)) = self
                .container
                .check_hand_changed(self.source.as_ref(), expected_hand_id)
            {
                return self.emit_new_hand_via_container(new_hand_id, new_buf);
            }
        }

        let Some(buf_addr) = self.buf_addr else { return self.rescan() };
        let decoded = crate::codec::decode_buffer(self.source.as_ref(), buf_addr, self.max_entries);

        if decoded.entries.is_empty() {
            return self.register_read_failure();
        }
        if !crate::codec::is_homogeneous(&decoded.entries) {
            log_warn(self.log.as_ref(), "poll: homogeneity invariant violated, reporting NoChange");
            return Ok(PollOutcome::NoChange);
        }
        if decoded.hand_id == 0 {
            // First entry decoded as all-zero: the buffer was torn mid-read
            // or overwritten with nothing recognizable yet. Treat the same
            // as an unreadable poll rather than emitting a bogus hand.
            return self.register_read_failure();
        }

        self.retry_count = 0;
        self.state = PollerState::Tracking;

        if decoded.entries.len() <= self.entry_count && decoded.hand_id == expected_hand_id {
            return Ok(PollOutcome::NoChange);
        }

        let (players, hero_cards) =
            crate::codec::resolve_names(self.source.as_ref(), &decoded.entries, &self.hero_handle);
        let actions = crate::codec::build_actions(&decoded.entries, &players);
        let community_cards = crate::codec::resolve_community_cards(self.source.as_ref(), &decoded.entries);
        let position = locator::derive_position(&actions, &self.hero_handle, &players);
        let mut data = HandData {
            hand_id: decoded.hand_id,
            buffer_addr: buf_addr,
            container_addr: self.container.container_addr(),
            entry_count: decoded.entries.len(),
            hero_cards,
            community_cards,
            players,
            actions,
            position,
            hand_id_changed: false,
            scan_kind: ScanKind::Cached,
            stale: false,
        };
        self.cache.backfill(&mut data);
        self.cache.remember(&data);
        self.entry_count = data.entry_count;

        log_debug(self.log.as_ref(), format!("poll: grew to {} entries", data.entry_count));
        Ok(PollOutcome::Grew(data))
    }

    fn emit_new_hand_via_container(
        &mut self,
        new_hand_id: HandId,
        new_buf: Address,
    ) -> Result<PollOutcome, ScanError> {
        let located = LocateResult { buf_addr: new_buf, hand_id: new_hand_id, stale: false };
        let data = locator::decode_located_hand(
            self.source.as_ref(),
            &located,
            &self.hero_handle,
            self.max_entries,
            ScanKind::Container,
            self.container.container_addr(),
        );
        let Some(mut data) = data else {
            return self.register_read_failure();
        };
        data.hand_id_changed = true;
        self.buf_addr = Some(data.buffer_addr);
        self.hand_id = Some(data.hand_id);
        self.entry_count = data.entry_count;
        self.retry_count = 0;
        self.cache.clear();
        self.cache.remember(&data);
        log_info(self.log.as_ref(), format!("poll: new hand via container, hand_id={}", data.hand_id));
        Ok(PollOutcome::NewHand(data))
    }

    fn register_read_failure(&mut self) -> Result<PollOutcome, ScanError> {
        self.retry_count += 1;
        if self.retry_count <= RETRY_BUDGET {
            self.state = PollerState::Retrying;
            log_debug(self.log.as_ref(), format!("poll: read failure #{}/{}", self.retry_count, RETRY_BUDGET));
            Ok(PollOutcome::NoChange)
        } else {
            log_warn(self.log.as_ref(), "poll: retry budget exhausted, forcing rescan");
            self.state = PollerState::Scanning;
            // The cached container address (if any) has stopped resolving
            // to a plausible buffer along with everything else; forget it
            // so the rescan below rediscovers it fresh rather than keeping
            // a pointer into memory that's moved out from under it (§4.4
            // `invalidate`, §4.5.4).
            self.container.invalidate();
            self.rescan()
        }
    }

    fn rescan(&mut self) -> Result<PollOutcome, ScanError> {
        match locator::locate(self.source.as_ref(), &self.hero_handle, self.log.as_ref()) {
            Ok(located) => {
                if self.container_enabled {
                    self.container
                        .try_discover(self.source.as_ref(), located.buf_addr, self.log.as_ref());
                }
                let container_addr = self.container.container_addr();
                let Some(mut data) = locator::decode_located_hand(
                    self.source.as_ref(),
                    &located,
                    &self.hero_handle,
                    self.max_entries,
                    ScanKind::Initial,
                    container_addr,
                ) else {
                    self.state = PollerState::Lost;
                    return Ok(PollOutcome::Lost);
                };

                let changed = self.hand_id.map(|h| h != data.hand_id).unwrap_or(true);
                data.hand_id_changed = changed;
                self.buf_addr = Some(data.buffer_addr);
                self.hand_id = Some(data.hand_id);
                self.entry_count = data.entry_count;
                self.retry_count = 0;
                self.state = PollerState::Tracking;

                if changed {
                    self.cache.clear();
                    self.cache.remember(&data);
                    Ok(PollOutcome::NewHand(data))
                } else {
                    self.cache.backfill(&mut data);
                    self.cache.remember(&data);
                    Ok(PollOutcome::Grew(data))
                }
            }
            Err(LocateError::NoCandidate) => {
                self.state = PollerState::Lost;
                Ok(PollOutcome::Lost)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_entry;
    use crate::layout::*;
    use crate::log::NullLogSink;
    use crate::source::FakeAddressSpace;
    use crate::types::{EventEntry, MsgType};
    use std::sync::Mutex;

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

    /// A backing store a test can script writer behavior against: plant the
    /// signature + a growable hand buffer, then append entries or corrupt
    /// bytes between polls (§8 "scripted backing store"). Shared via `Arc`
    /// so the test keeps a writer handle while the poller holds a reader
    /// handle to the same bytes.
    #[derive(Clone)]
    struct Scripted {
        space: Arc<Mutex<FakeAddressSpace>>,
    }

    impl Scripted {
        fn new() -> Self {
            Self { space: Arc::new(Mutex::new(FakeAddressSpace::new())) }
        }

        fn plant_hand(&self, sig_addr: Address, hand_id: u64, entries: &[EventEntry]) -> Address {
            let mut space = self.space.lock().unwrap();
            space.plant(sig_addr, SIGNATURE.to_vec());
            let buf_addr = sig_addr + SIGNATURE.len() as u64;
            let mut data = Vec::new();
            for e in entries {
                data.extend_from_slice(&encode_entry(e));
            }
            space.plant(buf_addr, data);
            buf_addr
        }

        fn append_entry(&self, buf_addr: Address, existing_count: usize, e: &EventEntry) {
            let mut space = self.space.lock().unwrap();
            let addr = buf_addr + (existing_count * ENTRY_SIZE) as u64;
            space.plant(addr, encode_entry(e).to_vec());
        }

        fn corrupt_byte(&self, addr: Address, value: u8) {
            let mut space = self.space.lock().unwrap();
            space.plant(addr, vec![value]);
        }

        fn plant_raw(&self, addr: Address, bytes: Vec<u8>) {
            let mut space = self.space.lock().unwrap();
            space.plant(addr, bytes);
        }

        /// Plant a container object at `container_addr` whose `+0xE4` field
        /// points at `buffer_addr`'s allocation base, with the structural
        /// sentinel in place (mirrors container.rs's own test helper).
        fn plant_container(&self, container_addr: Address, buffer_addr: Address) {
            let alloc_base = buffer_addr - BUFFER_ALLOC_HEADER;
            let mut slot_region = vec![0u8; CONTAINER_BUF_PTR_OFFSET + 8 + CONTAINER_NEIGHBORHOOD_SIZE];
            slot_region[CONTAINER_BUF_PTR_OFFSET..CONTAINER_BUF_PTR_OFFSET + 8]
                .copy_from_slice(&alloc_base.to_le_bytes());
            self.plant_raw(container_addr, slot_region);
            self.plant_raw(
                container_addr + CONTAINER_BUF_PTR_OFFSET as u64 - 4,
                CONTAINER_SENTINEL_VALUE.to_le_bytes().to_vec(),
            );
        }

        /// Repoint an already-discovered container at a new buffer, as the
        /// writer would when it starts a new hand.
        fn repoint_container(&self, container_addr: Address, new_buffer_addr: Address) {
            let alloc_base = new_buffer_addr - BUFFER_ALLOC_HEADER;
            self.plant_raw(
                container_addr + CONTAINER_BUF_PTR_OFFSET as u64,
                alloc_base.to_le_bytes().to_vec(),
            );
        }
    }

    impl MemorySource for Scripted {
        fn enumerate_regions(&self) -> Vec<crate::source::Region> {
            self.space.lock().unwrap().enumerate_regions()
        }
        fn read(&self, addr: Address, len: usize) -> Result<Vec<u8>, crate::source::ReadError> {
            self.space.lock().unwrap().read(addr, len)
        }
    }

    fn new_poller(writer: &Scripted) -> LivePoller {
        LivePoller::new(Box::new(writer.clone()), "Hero".to_string(), 30, true, Arc::new(NullLogSink))
    }

    #[test]
    fn initial_then_poll_no_growth_is_no_change() {
        let backing = Scripted::new();
        backing.plant_hand(0x1000, 259_644_772_106, &[raw_entry(259_644_772_106, 1, MSG_NEW_HAND, SEAT_TABLE)]);
        let mut poller = new_poller(&backing);

        let initial = poller.initial_scan().unwrap();
        assert_eq!(initial.scan_kind, ScanKind::Initial);
        assert_eq!(poller.poll().unwrap(), PollOutcome::NoChange);
    }

    #[test]
    fn poll_after_writer_appends_entries_yields_grew() {
        let backing = Scripted::new();
        let buf = backing.plant_hand(
            0x1000,
            259_644_772_106,
            &[
                raw_entry(259_644_772_106, 1, MSG_NEW_HAND, SEAT_TABLE),
                raw_entry(259_644_772_106, 2, MSG_ACTION, 0),
                raw_entry(259_644_772_106, 3, MSG_ACTION, 1),
                raw_entry(259_644_772_106, 4, MSG_ACTION, 2),
                raw_entry(259_644_772_106, 5, MSG_ACTION, 3),
            ],
        );
        let mut poller = new_poller(&backing);
        let initial = poller.initial_scan().unwrap();
        assert_eq!(initial.entry_count, 5);

        backing.append_entry(buf, 5, &raw_entry(259_644_772_106, 6, MSG_ACTION, 4));
        backing.append_entry(buf, 6, &raw_entry(259_644_772_106, 7, MSG_ACTION, 5));
        backing.append_entry(buf, 7, &raw_entry(259_644_772_106, 8, MSG_ACTION, 0));

        match poller.poll().unwrap() {
            PollOutcome::Grew(data) => assert_eq!(data.entry_count, 8),
            other => panic!("expected Grew, got {other:?}"),
        }
    }

    #[test]
    fn grown_hand_data_keeps_the_same_hand_id() {
        let backing = Scripted::new();
        let buf = backing.plant_hand(
            0x1000,
            259_644_772_106,
            &[
                raw_entry(259_644_772_106, 1, MSG_NEW_HAND, SEAT_TABLE),
                raw_entry(259_644_772_106, 2, MSG_SEATED, 0),
            ],
        );
        let mut poller = new_poller(&backing);
        let initial = poller.initial_scan().unwrap();
        assert_eq!(initial.hand_id, 259_644_772_106);

        backing.append_entry(buf, 2, &raw_entry(259_644_772_106, 3, MSG_ACTION, 0));
        let grew = match poller.poll().unwrap() {
            PollOutcome::Grew(data) => data,
            other => panic!("expected Grew, got {other:?}"),
        };
        assert_eq!(grew.hand_id, 259_644_772_106);
    }

    #[test]
    fn new_hand_via_container_clears_cache_and_reports_new_hand() {
        let backing = Scripted::new();
        let buf1 = backing.plant_hand(
            0x1000,
            259_644_772_106,
            &[
                raw_entry(259_644_772_106, 1, MSG_NEW_HAND, SEAT_TABLE),
                raw_entry(259_644_772_106, 2, MSG_SEATED, 0),
            ],
        );
        let container_addr = 0x9000u64;
        backing.plant_container(container_addr, buf1);

        let mut poller = new_poller(&backing);
        let initial = poller.initial_scan().unwrap();
        assert_eq!(initial.hand_id, 259_644_772_106);
        assert!(initial.container_addr.is_some());

        // Writer starts a new hand in a fresh buffer and repoints the
        // container at it.
        let buf2 = backing.plant_hand(
            0x5000,
            259_644_772_999,
            &[raw_entry(259_644_772_999, 1, MSG_NEW_HAND, SEAT_TABLE)],
        );
        backing.repoint_container(container_addr, buf2);

        match poller.poll().unwrap() {
            PollOutcome::NewHand(data) => {
                assert_eq!(data.hand_id, 259_644_772_999);
                assert!(data.hand_id_changed);
                assert_eq!(data.scan_kind, ScanKind::Container);
            }
            other => panic!("expected NewHand, got {other:?}"),
        }
    }

    #[test]
    fn persistent_read_failure_forces_rescan_then_lost() {
        let backing = Scripted::new();
        backing.plant_hand(0x1000, 259_644_772_106, &[raw_entry(259_644_772_106, 1, MSG_NEW_HAND, SEAT_TABLE)]);
        let mut poller = new_poller(&backing);
        poller.initial_scan().unwrap();

        // Destroy the signature and buffer entirely so neither the cached
        // buffer address nor a fresh locate can find anything.
        backing.corrupt_byte(0x1000, 0x00);
        for b in 1..SIGNATURE.len() as u64 {
            backing.corrupt_byte(0x1000 + b, 0x00);
        }
        for b in 0..ENTRY_SIZE as u64 {
            backing.corrupt_byte(0x1000 + SIGNATURE.len() as u64 + b, 0x00);
        }

        let mut outcome = poller.poll().unwrap();
        let mut attempts = 0;
        while outcome == PollOutcome::NoChange && attempts < RETRY_BUDGET + 1 {
            outcome = poller.poll().unwrap();
            attempts += 1;
        }
        assert_eq!(outcome, PollOutcome::Lost);
    }

    #[test]
    fn eleven_unreadable_polls_yield_ten_no_changes_then_lost() {
        let backing = Scripted::new();
        backing.plant_hand(0x1000, 259_644_772_106, &[raw_entry(259_644_772_106, 1, MSG_NEW_HAND, SEAT_TABLE)]);
        let mut poller = new_poller(&backing);
        poller.initial_scan().unwrap();

        backing.corrupt_byte(0x1000, 0x00);
        for b in 1..SIGNATURE.len() as u64 {
            backing.corrupt_byte(0x1000 + b, 0x00);
        }
        for b in 0..ENTRY_SIZE as u64 {
            backing.corrupt_byte(0x1000 + SIGNATURE.len() as u64 + b, 0x00);
        }

        for i in 0..RETRY_BUDGET {
            assert_eq!(poller.poll().unwrap(), PollOutcome::NoChange, "poll #{} should still be NoChange", i + 1);
        }
        assert_eq!(poller.poll().unwrap(), PollOutcome::Lost);
    }

    #[test]
    fn abort_generation_increments_monotonically() {
        let backing = Scripted::new();
        backing.plant_hand(0x1000, 259_644_772_106, &[raw_entry(259_644_772_106, 1, MSG_NEW_HAND, SEAT_TABLE)]);
        let mut poller = new_poller(&backing);
        poller.initial_scan().unwrap();
        assert_eq!(poller.generation(), 0);
        poller.abort_generation();
        poller.abort_generation();
        assert_eq!(poller.generation(), 2);
    }
}
