//! GC Logging and Tracing
//!
//! Two layers:
//! - the `log` facade for free-form diagnostics (slice arithmetic, heap growth)
//! - [`GcLogger`], a structured per-collector event log
//!
//! Each collector owns its logger, so several heaps can coexist in one
//! process and tests can read back the exact phase sequence of one of them.
//!
//! Log Levels:
//! - ERROR: report failures, fatal paths
//! - WARN: worklist overflow
//! - INFO: cycle start and end
//! - DEBUG: phase and subphase changes, heap growth
//! - TRACE: every slice

use crate::gc::{Phase, Subphase};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for collector events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum GcLogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Collector event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// A major cycle started
    CycleStart { cycle: u64, heap_wsz: usize },

    /// The phase changed
    PhaseChange { cycle: u64, from: Phase, to: Phase },

    /// The marking subphase changed
    SubphaseChange {
        cycle: u64,
        from: Subphase,
        to: Subphase,
    },

    /// One call to `major_slice` completed
    Slice {
        cycle: u64,
        phase: Phase,
        computed_work: i64,
        filtered_p: f64,
        duration_us: u64,
    },

    /// A major cycle completed
    CycleEnd {
        cycle: u64,
        heap_wsz: usize,
        free_wsz: usize,
    },

    /// A chunk was added to the heap
    HeapGrown { added_wsz: usize, heap_wsz: usize },

    /// The gray worklist doubled
    GrayStackGrown { capacity: usize },

    /// The gray worklist dropped entries and forced a heap rescan
    GrayStackOverflow { capacity: usize, heap_wsz: usize },

    /// The pacing window was resized
    WindowChanged { old: usize, new: usize },

    /// A profiler report was written
    ReportWritten { kind: String, path: String },
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level
    pub level: GcLogLevel,

    /// Print events to stderr
    pub console: bool,

    /// Append events to this file
    pub file: Option<String>,

    /// Emit JSON instead of text
    pub json: bool,

    /// Prefix console and file lines with a wall-clock timestamp
    pub timestamps: bool,

    /// Maximum number of events kept in memory; oldest are dropped first
    pub max_events: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: GcLogLevel::Debug,
            console: false,
            file: None,
            json: false,
            timestamps: true,
            max_events: 10_000,
        }
    }
}

/// Structured event log of one collector
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new GC logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = Self::event_level(&event);
        if level > self.config.level {
            return;
        }

        if self.config.console || self.config.file.is_some() {
            let line = self.format(&event);
            if self.config.console {
                eprintln!("{}", line);
            }
            if let Some(path) = &self.config.file {
                self.append_to_file(path, &line);
            }
        }

        let mut events = self.events.lock();
        if self.config.max_events > 0 && events.len() >= self.config.max_events {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    fn event_level(event: &GcEvent) -> GcLogLevel {
        match event {
            GcEvent::GrayStackOverflow { .. } => GcLogLevel::Warn,
            GcEvent::CycleStart { .. }
            | GcEvent::CycleEnd { .. }
            | GcEvent::ReportWritten { .. } => GcLogLevel::Info,
            GcEvent::PhaseChange { .. }
            | GcEvent::SubphaseChange { .. }
            | GcEvent::HeapGrown { .. }
            | GcEvent::GrayStackGrown { .. }
            | GcEvent::WindowChanged { .. } => GcLogLevel::Debug,
            GcEvent::Slice { .. } => GcLogLevel::Trace,
        }
    }

    fn format(&self, event: &GcEvent) -> String {
        let body = if self.config.json {
            serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
        } else {
            Self::human(event)
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            format!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), body)
        } else {
            body
        }
    }

    fn human(event: &GcEvent) -> String {
        match event {
            GcEvent::CycleStart { cycle, heap_wsz } => {
                format!("[GC] Cycle {} started (heap {} words)", cycle, heap_wsz)
            },
            GcEvent::PhaseChange { cycle, from, to } => {
                format!("[GC] Cycle {}: phase {:?} -> {:?}", cycle, from, to)
            },
            GcEvent::SubphaseChange { cycle, from, to } => {
                format!("[GC] Cycle {}: subphase {:?} -> {:?}", cycle, from, to)
            },
            GcEvent::Slice {
                cycle,
                phase,
                computed_work,
                filtered_p,
                duration_us,
            } => format!(
                "[GC] Cycle {}: {:?} slice, {} words (p = {:.6}, {} us)",
                cycle, phase, computed_work, filtered_p, duration_us
            ),
            GcEvent::CycleEnd {
                cycle,
                heap_wsz,
                free_wsz,
            } => format!(
                "[GC] Cycle {} completed ({} of {} words free)",
                cycle, free_wsz, heap_wsz
            ),
            GcEvent::HeapGrown {
                added_wsz,
                heap_wsz,
            } => format!("[GC] Heap grown by {} to {} words", added_wsz, heap_wsz),
            GcEvent::GrayStackGrown { capacity } => {
                format!("[GC] Gray worklist grown to {} entries", capacity)
            },
            GcEvent::GrayStackOverflow { capacity, heap_wsz } => format!(
                "[GC] Gray worklist overflow at {} entries (heap {} words)",
                capacity, heap_wsz
            ),
            GcEvent::WindowChanged { old, new } => {
                format!("[GC] Major window {} -> {}", old, new)
            },
            GcEvent::ReportWritten { kind, path } => {
                format!("[GC] {} report written to {}", kind, path)
            },
        }
    }

    fn append_to_file(&self, path: &str, line: &str) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            log::error!("cannot append GC event to '{}': {}", path, e);
        }
    }

    /// Snapshot of recorded events, oldest first
    pub fn events(&self) -> Vec<GcEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Events with the instant they were recorded
    pub fn timed_events(&self) -> Vec<(Instant, GcEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

impl std::fmt::Debug for GcLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcLogger")
            .field("config", &self.config)
            .field("events", &self.event_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(cycle: u64) -> GcEvent {
        GcEvent::CycleStart {
            cycle,
            heap_wsz: 1000,
        }
    }

    #[test]
    fn test_gc_logger_basic() {
        let logger = GcLogger::default();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 1);
        assert_eq!(logger.events()[0], start(1));
    }

    #[test]
    fn test_gc_logger_disable() {
        let logger = GcLogger::default();
        logger.disable();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let logger = GcLogger::new(GcLoggerConfig {
            level: GcLogLevel::Info,
            ..Default::default()
        });
        logger.log(GcEvent::WindowChanged { old: 1, new: 5 });
        logger.log(start(2));
        assert_eq!(logger.events(), vec![start(2)]);
    }

    #[test]
    fn test_bounded_buffer() {
        let logger = GcLogger::new(GcLoggerConfig {
            max_events: 2,
            ..Default::default()
        });
        for cycle in 0..5 {
            logger.log(start(cycle));
        }
        assert_eq!(logger.events(), vec![start(3), start(4)]);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(GcEvent::PhaseChange {
            cycle: 3,
            from: Phase::Mark,
            to: Phase::Sweep,
        })
        .unwrap();
        assert_eq!(json["type"], "phase_change");
        assert_eq!(json["to"], "Sweep");
    }

    #[test]
    fn test_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gc.log");
        let logger = GcLogger::new(GcLoggerConfig {
            file: Some(path.to_string_lossy().into_owned()),
            timestamps: false,
            ..Default::default()
        });
        logger.log(start(7));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "[GC] Cycle 7 started (heap 1000 words)\n");
    }
}
