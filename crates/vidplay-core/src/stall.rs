//! Stall detection
//!
//! A stall is "the wall clock moves, the rate is above zero, but the play
//! position does not". Single samples are noisy (micro-buffering, a late tick),
//! so the monitor only declares a stall after `threshold_ticks` consecutive
//! non-advancing ticks with the buffer below the low-water mark, and only
//! declares recovery once position advances again or the buffer refills past
//! the high-water mark.
//!
//! The monitor is a plain state machine with no clock of its own; every tick
//! carries its timestamp so tests can drive it deterministically.

use crate::config::StallConfig;
use crate::engine::TimeControl;
use std::time::{Duration, Instant};
use tracing::debug;

/// One time observation from the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StallTick {
    pub position_ms: i64,
    pub rate: f64,
    pub buffered_ahead_ms: i64,
    pub at: Instant,
}

/// Episode boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallSignal {
    Started,
    Recovered,
}

/// Hysteresis-based stall detector
#[derive(Debug, Clone)]
pub struct StallMonitor {
    config: StallConfig,
    last_reported_position: Option<i64>,
    last_reported_at: Option<Instant>,
    consecutive_stall_ticks: u32,
    stalled: bool,
    suppressed_until: Option<Instant>,
    episodes: u64,
}

impl StallMonitor {
    pub fn new(config: StallConfig) -> Self {
        Self {
            config,
            last_reported_position: None,
            last_reported_at: None,
            consecutive_stall_ticks: 0,
            stalled: false,
            suppressed_until: None,
            episodes: 0,
        }
    }

    /// Feed one tick; returns a signal when an episode starts or ends
    pub fn observe(&mut self, tick: StallTick) -> Option<StallSignal> {
        let advanced = self
            .last_reported_position
            .map(|last| tick.position_ms > last)
            .unwrap_or(true);
        self.last_reported_position = Some(tick.position_ms);
        self.last_reported_at = Some(tick.at);

        if self.stalled {
            if advanced || tick.buffered_ahead_ms >= self.config.high_water_ms {
                return Some(self.recover());
            }
            return None;
        }

        if tick.rate <= 0.0 || advanced {
            self.consecutive_stall_ticks = 0;
            return None;
        }

        if self.is_suppressed(tick.at) {
            // Re-buffering after an explicit track change is expected
            self.consecutive_stall_ticks = 0;
            return None;
        }

        self.consecutive_stall_ticks += 1;
        debug!(
            position_ms = tick.position_ms,
            ticks = self.consecutive_stall_ticks,
            buffered_ahead_ms = tick.buffered_ahead_ms,
            "Position not advancing"
        );

        if self.consecutive_stall_ticks >= self.config.threshold_ticks
            && tick.buffered_ahead_ms < self.config.low_water_ms
        {
            self.stalled = true;
            self.episodes += 1;
            return Some(StallSignal::Started);
        }
        None
    }

    /// Feed a time-control change; `Playing` ends an episode
    pub fn on_time_control(&mut self, status: TimeControl) -> Option<StallSignal> {
        if self.stalled && status == TimeControl::Playing {
            return Some(self.recover());
        }
        None
    }

    /// Ignore non-advancing ticks until `now + window`
    pub fn suppress_for(&mut self, now: Instant, window: Duration) {
        let until = now + window;
        self.suppressed_until = Some(match self.suppressed_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        self.consecutive_stall_ticks = 0;
    }

    /// Suppression window length for a track change
    pub fn track_change_window(&self) -> Duration {
        Duration::from_millis(self.config.track_change_grace_ms)
    }

    fn is_suppressed(&self, at: Instant) -> bool {
        self.suppressed_until.map(|until| at < until).unwrap_or(false)
    }

    fn recover(&mut self) -> StallSignal {
        self.stalled = false;
        self.consecutive_stall_ticks = 0;
        StallSignal::Recovered
    }

    /// Close any open episode without a signal and forget the position
    /// baseline (seek, pause, new source). Returns whether an episode was open.
    pub fn reset(&mut self) -> bool {
        let was_stalled = self.stalled;
        self.stalled = false;
        self.consecutive_stall_ticks = 0;
        self.last_reported_position = None;
        self.last_reported_at = None;
        was_stalled
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Stall episodes detected so far
    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn consecutive_stall_ticks(&self) -> u32 {
        self.consecutive_stall_ticks
    }

    pub fn last_reported_at(&self) -> Option<Instant> {
        self.last_reported_at
    }
}
