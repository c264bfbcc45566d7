//! Simulated media engine
//!
//! A tokio-driven engine with no decoder behind it: it reports readiness,
//! advances the position at the current rate on a fixed tick, confirms seeks
//! on the next tick and reports end of stream. An optional scripted stall
//! freezes the position for a while so stall detection can be watched end
//! to end.

use crate::engine::{
    EngineFactory, EngineNotification, EngineNotifier, EngineReady, MediaEngine, OpenRequest,
    SeekId, TimeControl,
};
use crate::error::{Error, Result};
use crate::types::{AudioTrack, MediaTracks, Resolution, TrackConstraints, TrackKind, VideoTrack};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Simulated engine behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimConfig {
    /// Tick interval in milliseconds
    pub tick_ms: u64,
    /// Reported duration; `None` simulates a live stream
    pub duration_ms: Option<i64>,
    pub width: u32,
    pub height: u32,
    /// Audio track languages
    pub audio_languages: Vec<String>,
    /// Video ladder bitrates in bps
    pub video_bitrates: Vec<u64>,
    /// Freeze the position once it reaches this point
    pub stall_at_ms: Option<i64>,
    /// How long the freeze lasts
    pub stall_for_ms: u64,
    /// Number of opens that fail before one succeeds
    pub fail_opens: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            duration_ms: Some(30_000),
            width: 1920,
            height: 1080,
            audio_languages: vec!["en".into()],
            video_bitrates: vec![800_000, 2_500_000, 5_000_000],
            stall_at_ms: None,
            stall_for_ms: 2_000,
            fail_opens: 0,
        }
    }
}

impl SimConfig {
    fn tracks(&self) -> MediaTracks {
        let audio = self
            .audio_languages
            .iter()
            .enumerate()
            .map(|(i, lang)| AudioTrack {
                id: format!("audio-{i}"),
                label: lang.to_uppercase(),
                language: Some(lang.clone()),
                bitrate: Some(128_000),
            })
            .collect();

        let top = self.video_bitrates.iter().copied().max().unwrap_or(1).max(1);
        let video = self
            .video_bitrates
            .iter()
            .enumerate()
            .map(|(i, &bandwidth)| {
                // Scale the ladder height with bitrate; bandwidth <= top keeps it in u32
                let scale = |side: u32| {
                    (u128::from(side) * u128::from(bandwidth) / u128::from(top)) as u32
                };
                let (width, height) = (scale(self.width), scale(self.height));
                VideoTrack {
                    id: format!("video-{i}"),
                    bandwidth,
                    resolution: Some(Resolution::new(width, height)),
                    frame_rate: Some(30.0),
                }
            })
            .collect();

        MediaTracks { audio, video }
    }
}

/// Factory for [`SimulatedEngine`]s
#[derive(Debug)]
pub struct SimulatedEngineFactory {
    config: SimConfig,
    remaining_failures: AtomicU32,
}

impl SimulatedEngineFactory {
    pub fn new(config: SimConfig) -> Self {
        Self {
            remaining_failures: AtomicU32::new(config.fail_opens),
            config,
        }
    }
}

impl Default for SimulatedEngineFactory {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[async_trait]
impl EngineFactory for SimulatedEngineFactory {
    async fn open(
        &self,
        request: OpenRequest,
        notifier: EngineNotifier,
    ) -> Result<Box<dyn MediaEngine>> {
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::EngineFault(format!(
                "simulated open failure (attempt {})",
                request.attempt
            )));
        }

        debug!(key = %request.key, location = %request.location, "Simulated open");

        let mut config = self.config.clone();
        if let Some(end) = request.end_position_ms {
            config.duration_ms = Some(config.duration_ms.map_or(end, |d| d.min(end)));
        }

        let engine = SimulatedEngine::start(config.clone(), notifier.clone());
        notifier.notify(EngineNotification::Ready(EngineReady {
            duration_ms: config.duration_ms,
            size: Some(Resolution::new(self.config.width, self.config.height)),
            rotation_degrees: 0,
            window_start_ms: None,
            tracks: self.config.tracks(),
        }));
        Ok(Box::new(engine))
    }
}

#[derive(Debug, Default)]
struct SimState {
    position_ms: i64,
    rate: f64,
    playing: bool,
    ended: bool,
    stalled_ms: u64,
    pending_seek: Option<(SeekId, i64)>,
}

/// Engine advancing a virtual clock
pub struct SimulatedEngine {
    state: Arc<Mutex<SimState>>,
    notifier: EngineNotifier,
    driver: JoinHandle<()>,
}

impl SimulatedEngine {
    fn start(config: SimConfig, notifier: EngineNotifier) -> Self {
        let state = Arc::new(Mutex::new(SimState {
            rate: 1.0,
            ..Default::default()
        }));
        let driver = tokio::spawn(drive(config, state.clone(), notifier.clone()));
        Self {
            state,
            notifier,
            driver,
        }
    }
}

async fn drive(config: SimConfig, state: Arc<Mutex<SimState>>, notifier: EngineNotifier) {
    let step = config.tick_ms.max(1);
    let mut interval = tokio::time::interval(Duration::from_millis(step));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let mut s = state.lock();

        if let Some((seek_id, target)) = s.pending_seek.take() {
            s.position_ms = target;
            s.ended = false;
            notifier.notify(EngineNotification::SeekCompleted {
                seek_id,
                position_ms: target,
            });
        }

        if !s.playing || s.ended {
            continue;
        }

        let in_stall = config
            .stall_at_ms
            .map(|at| s.position_ms >= at && s.stalled_ms < config.stall_for_ms)
            .unwrap_or(false);

        if in_stall {
            s.stalled_ms += step;
        } else {
            s.position_ms += (step as f64 * s.rate) as i64;
        }

        if let Some(duration) = config.duration_ms {
            if s.position_ms >= duration {
                s.position_ms = duration;
                s.ended = true;
            }
        }

        let buffered_ahead_ms = if in_stall { 0 } else { 5_000 };
        let buffered_end = match config.duration_ms {
            Some(duration) => (s.position_ms + buffered_ahead_ms).min(duration),
            None => s.position_ms + buffered_ahead_ms,
        };

        notifier.notify(EngineNotification::Tick {
            position_ms: s.position_ms,
            rate: s.rate,
            buffered_ahead_ms,
        });
        notifier.notify(EngineNotification::BufferedRanges(vec![(0, buffered_end)]));
        if s.ended {
            notifier.notify(EngineNotification::EndOfStream);
        }
    }
}

impl MediaEngine for SimulatedEngine {
    fn play(&mut self, rate: f64) -> Result<()> {
        let mut s = self.state.lock();
        s.playing = true;
        s.rate = rate;
        self.notifier
            .notify(EngineNotification::TimeControl(TimeControl::Playing));
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.state.lock().playing = false;
        self.notifier
            .notify(EngineNotification::TimeControl(TimeControl::Paused));
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.state.lock().rate = rate;
        Ok(())
    }

    fn seek_to(&mut self, position_ms: i64, seek_id: SeekId) -> Result<()> {
        self.state.lock().pending_seek = Some((seek_id, position_ms));
        Ok(())
    }

    fn select_track(&mut self, kind: TrackKind, index: usize) -> Result<()> {
        debug!(%kind, index, "Simulated track selection");
        Ok(())
    }

    fn set_volume(&mut self, _volume: f64) -> Result<()> {
        Ok(())
    }

    fn set_track_constraints(&mut self, _constraints: TrackConstraints) -> Result<()> {
        Ok(())
    }

    fn set_mix_with_others(&mut self, _mix: bool) -> Result<()> {
        Ok(())
    }

    fn dispose(&mut self) {
        self.driver.abort();
    }
}
