// lib.rs — consumer-facing surface (§6.1).
//
// `Core` is a library facade a host application links in: it spawns one
// background worker thread, gives it a stop flag, and joins it on shutdown.
// The thread drives a `LivePoller` on a timer and hands outcomes back
// through a channel rather than writing into shared state directly.

mod attach;
mod codec;
mod config;
mod container;
mod dump;
mod layout;
mod locator;
mod log;
mod poller;
mod source;
mod types;

pub use attach::{AttachError, ProcessSelector};
pub use config::{Config, Source};
pub use dump::{DumpError, DumpFile, DumpMeta};
pub use log::{FileLogSink, LogLevel, LogSink, NullLogSink};
pub use poller::{PollOutcome, PollerState, ScanError};
pub use source::{MemorySource, ReadError, Region};
pub use types::{Action, ActionKind, EventEntry, HandData, MsgType, PlayerName, Position, ScanKind};

use crate::poller::LivePoller;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Errors surfaced across the whole consumer-facing contract (§6.1, §7).
#[derive(Debug)]
pub enum CoreError {
    TargetNotFound,
    AccessDenied,
    NotFound(String),
    Lost,
    Fatal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::TargetNotFound => write!(f, "target process not found"),
            CoreError::AccessDenied => write!(f, "access denied opening target process"),
            CoreError::NotFound(reason) => write!(f, "not found: {reason}"),
            CoreError::Lost => write!(f, "tracking lost"),
            CoreError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}
impl std::error::Error for CoreError {}

impl From<AttachError> for CoreError {
    fn from(e: AttachError) -> Self {
        match e {
            AttachError::TargetNotFound => CoreError::TargetNotFound,
            AttachError::AccessDenied => CoreError::AccessDenied,
            AttachError::MultipleCandidates(pids) => {
                CoreError::NotFound(format!("multiple candidate processes: {pids:?}"))
            }
        }
    }
}

impl From<ScanError> for CoreError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::NotFound(reason) => CoreError::NotFound(reason),
            ScanError::TargetLost => CoreError::Lost,
            ScanError::Fatal(msg) => CoreError::Fatal(msg),
        }
    }
}

impl From<DumpError> for CoreError {
    fn from(e: DumpError) -> Self {
        CoreError::Fatal(e.to_string())
    }
}

/// Messages the poller thread sends up to `Core` (§5 "synchronized hand-off
/// primitive per consumer").
enum PollerMessage {
    Outcome(Result<PollOutcome, ScanError>),
}

enum Command {
    Refresh,
    Stop,
}

/// The consumer-facing facade (§6.1). Owns a background thread that drives
/// a [`LivePoller`] on a timer; `next_update` blocks on a channel rather
/// than busy-polling, with an explicit hand-off queue instead of a shared
/// sleep granularity.
pub struct Core {
    handle: Option<JoinHandle<()>>,
    commands: Sender<Command>,
    updates: Receiver<PollerMessage>,
    running: Arc<AtomicBool>,
    dump_exhausted: Arc<Mutex<bool>>,
}

impl Core {
    /// Begins a session (§6.1 `Core::start`). Attaches (or opens a dump),
    /// runs the first `initial_scan` synchronously so the caller gets an
    /// immediate result, then spawns the background poller thread.
    pub fn start(config: Config) -> Result<(Self, HandData), CoreError> {
        let is_dump = matches!(config.source, Source::Dump(_));
        let source: Box<dyn MemorySource + Send + Sync> = match &config.source {
            Source::Live(selector) => Box::new(attach::attach(selector)?),
            Source::Dump(path) => Box::new(DumpFile::open(path)?),
        };

        let mut poller = LivePoller::new(
            source,
            config.hero_handle.clone(),
            config.max_entries,
            config.container_enabled,
            config.log_sink.clone(),
        );
        let initial = poller.initial_scan()?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (update_tx, update_rx) = mpsc::channel::<PollerMessage>();
        let running = Arc::new(AtomicBool::new(true));
        // Set synchronously, before the background thread is even spawned,
        // so a `next_update` call that races ahead of the thread's first
        // loop iteration still sees it and returns `Lost` instead of
        // blocking on a channel the dump-mode thread never sends on.
        let dump_exhausted = Arc::new(Mutex::new(is_dump));

        let thread_running = running.clone();
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let handle = std::thread::spawn(move || {
            run_poller_thread(poller, cmd_rx, update_tx, thread_running, poll_interval, is_dump);
        });

        Ok((
            Core {
                handle: Some(handle),
                commands: cmd_tx,
                updates: update_rx,
                running,
                dump_exhausted,
            },
            initial,
        ))
    }

    /// Blocks until the next `PollOutcome` is available (§6.1
    /// `Core::next_update`). In dump mode, every call after the first
    /// returns `Lost` immediately (§6.2).
    pub fn next_update(&self) -> Result<PollOutcome, CoreError> {
        if *self.dump_exhausted.lock().unwrap() {
            return Ok(PollOutcome::Lost);
        }
        match self.updates.recv() {
            Ok(PollerMessage::Outcome(result)) => Ok(result?),
            Err(_) => Err(CoreError::Fatal("poller thread terminated unexpectedly".into())),
        }
    }

    /// Requests a full rescan; idempotent (§6.1 `Core::refresh`).
    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    /// Terminates the poller and releases the handle (§6.1 `Core::stop`).
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_poller_thread(
    mut poller: LivePoller,
    commands: Receiver<Command>,
    updates: Sender<PollerMessage>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    is_dump: bool,
) {
    while running.load(Ordering::Acquire) {
        match commands.try_recv() {
            Ok(Command::Stop) => break,
            Ok(Command::Refresh) => {
                poller.abort_generation();
                let outcome = poller.initial_scan().map(PollOutcome::NewHand);
                if updates.send(PollerMessage::Outcome(outcome)).is_err() {
                    break;
                }
                continue;
            }
            Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        if is_dump {
            // Dump mode never polls: `start()` already delivered the one
            // `initial_scan` result synchronously and set `dump_exhausted`
            // before this thread was even spawned, so every `next_update`
            // afterward reports `Lost` (§6.2 Scenario F) straight off that
            // flag without this thread ever touching the poller or the
            // channel again.
            std::thread::sleep(poll_interval);
            continue;
        }

        let outcome = poller.poll();
        if updates.send(PollerMessage::Outcome(outcome)).is_err() {
            break;
        }
        std::thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_from_attach_error_maps_variants() {
        assert!(matches!(CoreError::from(AttachError::TargetNotFound), CoreError::TargetNotFound));
        assert!(matches!(CoreError::from(AttachError::AccessDenied), CoreError::AccessDenied));
        assert!(matches!(
            CoreError::from(AttachError::MultipleCandidates(vec![1, 2])),
            CoreError::NotFound(_)
        ));
    }

    #[test]
    fn core_error_from_scan_error_maps_variants() {
        assert!(matches!(CoreError::from(ScanError::TargetLost), CoreError::Lost));
        assert!(matches!(CoreError::from(ScanError::NotFound("x".into())), CoreError::NotFound(_)));
        assert!(matches!(CoreError::from(ScanError::Fatal("x".into())), CoreError::Fatal(_)));
    }
}
