//! Scripted collaborators for session tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use url::Url;
use vidplay_core::engine::{EngineReady, SeekId};
use vidplay_core::{
    AudioTrack, CacheCoordinator, DismissCallback, EngineFactory, EngineNotification,
    EngineNotifier, Error, EventRecord, LicenseBlob, LicenseLoader, LicenseRequest, MediaEngine,
    MediaTracks, OpenRequest, PipBounds, PipSurface, PlaybackSession, PlayerEvent, Resolution,
    Result, RetryPolicy, SessionConfig, SessionDeps, SessionState, TrackConstraints, TrackKind,
    VideoTrack,
};

pub const DURATION_MS: i64 = 60_000;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Play(f64),
    Pause,
    SetRate(f64),
    Seek(i64, SeekId),
    SelectTrack(TrackKind, usize),
    SetVolume(f64),
    SetConstraints(TrackConstraints),
    SetMix(bool),
}

#[derive(Default)]
pub struct EngineLog {
    pub calls: Vec<EngineCall>,
    pub opens: Vec<OpenRequest>,
    pub created: usize,
    pub disposed: usize,
}

struct FakeEngine {
    log: Arc<Mutex<EngineLog>>,
    fail_commands: Arc<AtomicBool>,
}

impl FakeEngine {
    fn record(&self, call: EngineCall) -> Result<()> {
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(Error::EngineFault("decoder lost".into()));
        }
        self.log.lock().calls.push(call);
        Ok(())
    }
}

impl MediaEngine for FakeEngine {
    fn play(&mut self, rate: f64) -> Result<()> {
        self.record(EngineCall::Play(rate))
    }
    fn pause(&mut self) -> Result<()> {
        self.record(EngineCall::Pause)
    }
    fn set_rate(&mut self, rate: f64) -> Result<()> {
        self.record(EngineCall::SetRate(rate))
    }
    fn seek_to(&mut self, position_ms: i64, seek_id: SeekId) -> Result<()> {
        self.record(EngineCall::Seek(position_ms, seek_id))
    }
    fn select_track(&mut self, kind: TrackKind, index: usize) -> Result<()> {
        self.record(EngineCall::SelectTrack(kind, index))
    }
    fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.record(EngineCall::SetVolume(volume))
    }
    fn set_track_constraints(&mut self, constraints: TrackConstraints) -> Result<()> {
        self.record(EngineCall::SetConstraints(constraints))
    }
    fn set_mix_with_others(&mut self, mix: bool) -> Result<()> {
        self.record(EngineCall::SetMix(mix))
    }
    fn dispose(&mut self) {
        self.log.lock().disposed += 1;
    }
}

/// Engine factory recording every call; reports readiness from inside `open`
pub struct FakeEngineFactory {
    pub log: Arc<Mutex<EngineLog>>,
    notifier: Mutex<Option<EngineNotifier>>,
    remaining_failures: AtomicU32,
    ready: Mutex<EngineReady>,
    fail_commands: Arc<AtomicBool>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeEngineFactory {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// The first `failures` opens fail
    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::default(),
            notifier: Mutex::new(None),
            remaining_failures: AtomicU32::new(failures),
            ready: Mutex::new(default_ready()),
            fail_commands: Arc::default(),
            gate: Mutex::new(None),
        })
    }

    pub fn set_ready(&self, ready: EngineReady) {
        *self.ready.lock() = ready;
    }

    /// Make every engine command fail from now on
    pub fn fail_commands(&self) {
        self.fail_commands.store(true, Ordering::SeqCst);
    }

    /// Park the next open until the returned gate is notified
    pub fn hold_next_open(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn notifier(&self) -> EngineNotifier {
        self.notifier.lock().clone().expect("no engine opened")
    }

    pub fn notify(&self, notification: EngineNotification) {
        self.notifier().notify(notification);
    }

    pub fn tick(&self, position_ms: i64, buffered_ahead_ms: i64) {
        self.notify(EngineNotification::Tick {
            position_ms,
            rate: 1.0,
            buffered_ahead_ms,
        });
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.log.lock().calls.clone()
    }

    pub fn play_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Play(_)))
            .count()
    }

    pub fn seeks(&self) -> Vec<(i64, SeekId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Seek(position, id) => Some((position, id)),
                _ => None,
            })
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.log.lock().opens.len()
    }

    pub fn last_open(&self) -> OpenRequest {
        self.log.lock().opens.last().cloned().expect("no open recorded")
    }

    pub fn disposed(&self) -> usize {
        self.log.lock().disposed
    }

    /// Engines handed out by successful opens
    pub fn created(&self) -> usize {
        self.log.lock().created
    }
}

#[async_trait]
impl EngineFactory for FakeEngineFactory {
    async fn open(
        &self,
        request: OpenRequest,
        notifier: EngineNotifier,
    ) -> Result<Box<dyn MediaEngine>> {
        self.log.lock().opens.push(request.clone());
        *self.notifier.lock() = Some(notifier.clone());

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::EngineFault(format!("open attempt {} failed", request.attempt)));
        }

        notifier.notify(EngineNotification::Ready(self.ready.lock().clone()));
        self.log.lock().created += 1;
        Ok(Box::new(FakeEngine {
            log: self.log.clone(),
            fail_commands: self.fail_commands.clone(),
        }))
    }
}

pub fn default_ready() -> EngineReady {
    EngineReady {
        duration_ms: Some(DURATION_MS),
        size: Some(Resolution::new(1920, 1080)),
        rotation_degrees: 0,
        window_start_ms: None,
        tracks: MediaTracks {
            audio: vec![
                AudioTrack {
                    id: "a0".into(),
                    label: "English".into(),
                    language: Some("en".into()),
                    bitrate: None,
                },
                AudioTrack {
                    id: "a1".into(),
                    label: "Deutsch".into(),
                    language: Some("de".into()),
                    bitrate: None,
                },
            ],
            video: vec![
                VideoTrack {
                    id: "v0".into(),
                    bandwidth: 800_000,
                    resolution: Some(Resolution::new(640, 360)),
                    frame_rate: None,
                },
                VideoTrack {
                    id: "v1".into(),
                    bandwidth: 5_000_000,
                    resolution: Some(Resolution::new(1920, 1080)),
                    frame_rate: None,
                },
            ],
        },
    }
}

/// License loader that succeeds or fails on demand, or never answers
#[derive(Default)]
pub struct FakeLicenseLoader {
    pub fail: AtomicBool,
    pub hang: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl LicenseLoader for FakeLicenseLoader {
    async fn resolve(&self, request: &LicenseRequest) -> Result<LicenseBlob> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::drm("license server returned 403 Forbidden"));
        }
        Ok(LicenseBlob::new(request.content_id.clone(), vec![0xCA, 0xFE]))
    }
}

/// Cache that proxies through localhost, or is offline
pub struct FakeCache {
    pub online: bool,
}

#[async_trait]
impl CacheCoordinator for FakeCache {
    async fn resolve(
        &self,
        cache_key: &str,
        _remote_url: &Url,
        _headers: &HashMap<String, String>,
    ) -> Result<Url> {
        if !self.online {
            return Err(Error::CacheUnavailable("cache offline".into()));
        }
        Url::parse(&format!("http://127.0.0.1:9000/{cache_key}"))
            .map_err(|e| Error::CacheUnavailable(e.to_string()))
    }
}

/// Handle on a fake PiP surface owned by a session
#[derive(Clone, Default)]
pub struct PipProbe {
    pub log: Arc<Mutex<Vec<String>>>,
    dismiss: Arc<Mutex<Option<DismissCallback>>>,
}

impl PipProbe {
    pub fn surface(&self) -> Box<dyn PipSurface> {
        Box::new(FakePipSurface {
            probe: self.clone(),
        })
    }

    /// Simulate the system closing the floating window
    pub fn system_dismiss(&self) {
        let callback = self.dismiss.lock().clone().expect("surface not attached");
        callback.dismiss();
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

struct FakePipSurface {
    probe: PipProbe,
}

impl PipSurface for FakePipSurface {
    fn is_supported(&self) -> bool {
        true
    }
    fn attach(&mut self, _bounds: PipBounds, on_dismiss: DismissCallback) -> Result<()> {
        self.probe.log.lock().push("attach".into());
        *self.probe.dismiss.lock() = Some(on_dismiss);
        Ok(())
    }
    fn start(&mut self) -> Result<()> {
        self.probe.log.lock().push("start".into());
        Ok(())
    }
    fn stop(&mut self) {
        self.probe.log.lock().push("stop".into());
    }
    fn set_playing(&mut self, playing: bool) {
        self.probe.log.lock().push(format!("playing={playing}"));
    }
    fn detach(&mut self) {
        self.probe.log.lock().push("detach".into());
    }
}

/// Config with immediate retries
pub fn test_config() -> SessionConfig {
    SessionConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn session(factory: &Arc<FakeEngineFactory>) -> PlaybackSession {
    session_with(SessionDeps::new(factory.clone()))
}

pub fn session_with(deps: SessionDeps) -> PlaybackSession {
    PlaybackSession::new(test_config(), deps).expect("valid config")
}

/// Events delivered so far
pub fn drain(rx: &mut mpsc::UnboundedReceiver<EventRecord>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    while let Ok(record) = rx.try_recv() {
        events.push(record.event);
    }
    events
}

/// Poll `condition` until it holds or a second has passed
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Wait until the session publishes `state`
pub async fn wait_for_state(session: &PlaybackSession, state: SessionState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| s.state == state))
        .await
        .expect("timed out waiting for state")
        .expect("session stopped publishing");
}
