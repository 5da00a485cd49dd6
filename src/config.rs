// config.rs — runtime configuration.
//
// A plain struct with `with_*` setters and a constructor, rather than a
// builder trait or a config-derive macro — no config-derive crate is
// introduced for this.

use crate::attach::ProcessSelector;
use crate::log::{LogSink, NullLogSink};
use std::path::PathBuf;
use std::sync::Arc;

/// Where to read memory from (§4.1, §6.2).
#[derive(Debug, Clone)]
pub enum Source {
    /// Attach to a live process.
    Live(ProcessSelector),
    /// Replay a captured dump file instead of a live process.
    Dump(PathBuf),
}

/// Default polling cadence (§4.5.1, §5 "real-time budget").
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
/// Default cap on entries decoded per buffer read (§4.2).
pub const DEFAULT_MAX_ENTRIES: usize = 30;

#[derive(Clone)]
pub struct Config {
    pub source: Source,
    pub hero_handle: String,
    pub poll_interval_ms: u64,
    pub max_entries: usize,
    pub container_enabled: bool,
    pub log_sink: Arc<dyn LogSink>,
}

impl Config {
    pub fn new(source: Source, hero_handle: impl Into<String>) -> Self {
        Self {
            source,
            hero_handle: hero_handle.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_entries: DEFAULT_MAX_ENTRIES,
            container_enabled: true,
            log_sink: Arc::new(NullLogSink),
        }
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    pub fn with_container_enabled(mut self, enabled: bool) -> Self {
        self.container_enabled = enabled;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::new(Source::Live(ProcessSelector::NameContains("poker".into())), "Hero");
        assert_eq!(cfg.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(cfg.max_entries, DEFAULT_MAX_ENTRIES);
        assert!(cfg.container_enabled);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let cfg = Config::new(Source::Dump(PathBuf::from("capture.bin")), "Hero")
            .with_poll_interval_ms(50)
            .with_max_entries(10)
            .with_container_enabled(false);
        assert_eq!(cfg.poll_interval_ms, 50);
        assert_eq!(cfg.max_entries, 10);
        assert!(!cfg.container_enabled);
    }
}
