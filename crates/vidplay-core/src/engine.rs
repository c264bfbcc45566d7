//! Media engine boundary
//!
//! The decode/render engine is external. A session constructs one through an
//! [`EngineFactory`] and owns it exclusively through an [`EngineHandle`] until
//! the source is replaced or the session is disposed. Engines report back
//! through the [`EngineNotifier`] they were opened with, from whatever thread
//! or task they run their notification context on.

use crate::error::Result;
use crate::drm::LicenseBlob;
use crate::types::{MediaLocation, MediaTracks, Resolution, TrackConstraints, TrackKind, VideoFormat};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Identifies one seek request issued to the engine
pub type SeekId = u64;

/// Everything an engine needs to open a source
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Host key of the source
    pub key: String,
    /// Resolved location, possibly rewritten by the content cache
    pub location: MediaLocation,
    /// Container format
    pub format: VideoFormat,
    /// Request headers for remote sources
    pub headers: HashMap<String, String>,
    /// License obtained before opening, for protected sources
    pub license: Option<LicenseBlob>,
    /// Initial volume in [0, 1]
    pub volume: f64,
    /// Mix with other audio instead of taking audio focus
    pub mix_with_others: bool,
    /// Video selection bounds
    pub constraints: TrackConstraints,
    /// Clip playback at this position; end of stream is reported there
    pub end_position_ms: Option<i64>,
    /// 1-based open attempt for this source
    pub attempt: u32,
}

/// Engine time-control status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeControl {
    Paused,
    WaitingToPlay,
    Playing,
}

/// Readiness report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineReady {
    /// Engine duration, `None` when unknown (live)
    pub duration_ms: Option<i64>,
    /// Natural video size before rotation
    pub size: Option<Resolution>,
    /// Display rotation in degrees
    pub rotation_degrees: u16,
    /// Live-window origin in milliseconds since epoch
    pub window_start_ms: Option<i64>,
    /// Alternate audio and video tracks
    pub tracks: MediaTracks,
}

/// Callbacks from the engine, delivered through [`EngineNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    /// Source is ready to play
    Ready(EngineReady),
    /// Time-control status changed
    TimeControl(TimeControl),
    /// Periodic time observation
    Tick {
        position_ms: i64,
        rate: f64,
        buffered_ahead_ms: i64,
    },
    /// Buffered ranges in milliseconds
    BufferedRanges(Vec<(i64, i64)>),
    /// A seek finished
    SeekCompleted { seek_id: SeekId, position_ms: i64 },
    /// Playback reached the end of the stream
    EndOfStream,
    /// Open or playback failure
    Failed { message: String },
}

/// Sending half of an engine's notification context
#[derive(Clone)]
pub struct EngineNotifier {
    deliver: Arc<dyn Fn(EngineNotification) + Send + Sync>,
}

impl EngineNotifier {
    pub fn new(deliver: impl Fn(EngineNotification) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Deliver a notification; never blocks
    pub fn notify(&self, notification: EngineNotification) {
        (self.deliver)(notification);
    }
}

impl fmt::Debug for EngineNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineNotifier").finish_non_exhaustive()
    }
}

/// Commands accepted by a live engine
pub trait MediaEngine: Send {
    /// Start playback at `rate`
    fn play(&mut self, rate: f64) -> Result<()>;

    /// Stop advancing; the engine's rate becomes zero
    fn pause(&mut self) -> Result<()>;

    /// Change the rate while playing
    fn set_rate(&mut self, rate: f64) -> Result<()>;

    /// Seek; the engine answers with `SeekCompleted { seek_id, .. }`
    fn seek_to(&mut self, position_ms: i64, seek_id: SeekId) -> Result<()>;

    /// Select a discovered track
    fn select_track(&mut self, kind: TrackKind, index: usize) -> Result<()>;

    fn set_volume(&mut self, volume: f64) -> Result<()>;

    /// Bound automatic video selection
    fn set_track_constraints(&mut self, constraints: TrackConstraints) -> Result<()>;

    fn set_mix_with_others(&mut self, mix: bool) -> Result<()>;

    /// Release decoder and renderer; called exactly once
    fn dispose(&mut self);
}

/// Constructs engines for resolved sources
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Open a source. Readiness is reported later through `notifier`.
    async fn open(
        &self,
        request: OpenRequest,
        notifier: EngineNotifier,
    ) -> Result<Box<dyn MediaEngine>>;
}

/// Exclusive ownership of an opened engine; disposes it on drop
pub struct EngineHandle {
    engine: Option<Box<dyn MediaEngine>>,
    key: String,
}

impl EngineHandle {
    pub fn new(key: impl Into<String>, engine: Box<dyn MediaEngine>) -> Self {
        Self {
            engine: Some(engine),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Borrow the engine
    pub fn engine(&mut self) -> Option<&mut (dyn MediaEngine + 'static)> {
        self.engine.as_deref_mut()
    }

    /// Dispose now instead of at drop
    pub fn release(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            debug!(key = %self.key, "Disposing engine");
            engine.dispose();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.release();
    }
}
