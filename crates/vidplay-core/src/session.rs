//! Playback Session - per-instance orchestrator for playback
//!
//! Coordinates:
//! - Source resolution (DRM license, content cache, open retries)
//! - Engine ownership and command dispatch
//! - State machine transitions
//! - Stall detection
//! - Picture-in-picture
//! - Event emission
//!
//! All mutable state lives in one actor task. Host commands, engine
//! notifications, license and open completions, retry timers and PiP
//! dismissals are messages on a single inbox and are applied in arrival order.
//! Completions carry the generation they were started under; anything from an
//! older generation is dropped.

use crate::{
    cache::{route_through_cache, CacheCoordinator, DirectSource},
    config::SessionConfig,
    drm::{resolve_cancellable, LicenseBlob, LicenseLoader, LicenseRequest, NoLicenseLoader},
    engine::{
        EngineFactory, EngineHandle, EngineNotification, EngineNotifier, EngineReady, MediaEngine,
        OpenRequest, SeekId,
    },
    events::{EventSink, PlayerEvent},
    pip::{DismissCallback, PictureInPictureController, PipSurface},
    stall::{StallMonitor, StallSignal, StallTick},
    types::*,
    Error, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type Reply<T> = oneshot::Sender<Result<T>>;

/// External collaborators of a session
pub struct SessionDeps {
    pub engine_factory: Arc<dyn EngineFactory>,
    pub license_loader: Arc<dyn LicenseLoader>,
    pub cache: Arc<dyn CacheCoordinator>,
    pub pip_surface: Option<Box<dyn PipSurface>>,
}

impl SessionDeps {
    /// Engine factory only: no DRM, no cache, no PiP surface
    pub fn new(engine_factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            engine_factory,
            license_loader: Arc::new(NoLicenseLoader),
            cache: Arc::new(DirectSource),
            pip_surface: None,
        }
    }

    pub fn with_license_loader(mut self, loader: Arc<dyn LicenseLoader>) -> Self {
        self.license_loader = loader;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheCoordinator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_pip_surface(mut self, surface: Box<dyn PipSurface>) -> Self {
        self.pip_surface = Some(surface);
        self
    }
}

enum Command {
    SetSource { source: ResolvedSource, reply: Reply<()> },
    Play { reply: Reply<()> },
    Pause { reply: Reply<()> },
    Seek { position_ms: i64, reply: Reply<i64> },
    SetSpeed { rate: f64, reply: Reply<()> },
    SetVolume { volume: f64, reply: Reply<()> },
    SetTrack { kind: TrackKind, index: usize, reply: Reply<()> },
    SetTrackConstraints { constraints: TrackConstraints, reply: Reply<()> },
    SetLooping { looping: bool, reply: Reply<()> },
    SetMixWithOthers { mix: bool, reply: Reply<()> },
    EnablePip { bounds: PipBounds, reply: Reply<bool> },
    SetPipActive { active: bool, reply: Reply<()> },
    DisablePip { reply: Reply<()> },
    Status { reply: Reply<SessionSnapshot> },
}

enum Inbound {
    Command(Command),
    Engine {
        generation: u64,
        notification: EngineNotification,
    },
    LicenseResolved {
        generation: u64,
        result: Result<LicenseBlob>,
    },
    Opened {
        generation: u64,
        result: Result<EngineHandle>,
    },
    OpenRetry {
        generation: u64,
    },
    PipDismissed,
    Dispose,
}

/// Playback session managing one engine instance
///
/// Must be created inside a Tokio runtime. Dropping the session disposes it.
pub struct PlaybackSession {
    /// Unique session ID
    id: SessionId,
    /// Actor inbox
    inbox: mpsc::UnboundedSender<Inbound>,
    /// Latest published snapshot
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    /// Event stream
    events: Arc<EventSink>,
    /// Set once by `dispose`
    disposed: AtomicBool,
    /// Cancels all in-flight work
    cancel: CancellationToken,
}

impl PlaybackSession {
    /// Create a session and start its actor
    pub fn new(config: SessionConfig, deps: SessionDeps) -> Result<Self> {
        config.validate()?;

        let id = SessionId::new();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(SessionSnapshot::new(id, config.default_rate));
        let events = Arc::new(EventSink::new(id));
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            id,
            rate: config.default_rate,
            stall: StallMonitor::new(config.stall.clone()),
            config,
            engine_factory: deps.engine_factory,
            license_loader: deps.license_loader,
            cache: deps.cache,
            pip: PictureInPictureController::new(deps.pip_surface),
            inbox_tx: inbox_tx.clone(),
            inbox_rx,
            snapshot_tx,
            events: events.clone(),
            source_cancel: cancel.child_token(),
            cancel: cancel.clone(),
            state: SessionState::Uninitialized,
            generation: 0,
            source: None,
            license: None,
            engine: None,
            early_ready: None,
            early_failure: None,
            failed_attempts: 0,
            pending_source: None,
            position_ms: 0,
            duration_ms: UNKNOWN_DURATION_MS,
            window_start_ms: None,
            volume: 1.0,
            looping: false,
            mix_with_others: false,
            constraints: TrackConstraints::default(),
            tracks: MediaTracks::default(),
            selected_audio: None,
            selected_video: None,
            stall_count: 0,
            seek: None,
            next_seek_id: 0,
            last_ranges: Vec::new(),
        };
        tokio::spawn(actor.run());

        info!(session_id = %id, "Session created");

        Ok(Self {
            id,
            inbox: inbox_tx,
            snapshot_rx,
            events,
            disposed: AtomicBool::new(false),
            cancel,
        })
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state; `Disposed` as soon as `dispose` has returned
    pub fn state(&self) -> SessionState {
        if self.disposed.load(Ordering::SeqCst) {
            return SessionState::Disposed;
        }
        self.snapshot_rx.borrow().state
    }

    /// Latest published snapshot, without waiting for queued messages
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.snapshot_rx.borrow().clone();
        if self.disposed.load(Ordering::SeqCst) {
            snapshot.state = SessionState::Disposed;
        }
        snapshot
    }

    /// Snapshot taken after every previously queued message has been applied
    pub async fn status(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Event sink; attach a consumer to receive events
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Assign a source. Completes once the source is ready or has failed;
    /// asynchronous failures are reported through state and `error` events.
    #[instrument(skip(self, descriptor), fields(session_id = %self.id, locator = descriptor.locator.as_str()))]
    pub async fn set_source(&self, descriptor: SourceDescriptor) -> Result<()> {
        let source = descriptor.resolve()?;
        self.request(|reply| Command::SetSource { source, reply }).await
    }

    /// Start or resume playback
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn play(&self) -> Result<()> {
        self.request(|reply| Command::Play { reply }).await
    }

    /// Pause playback
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Seek; resolves with the position confirmed by the engine
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn seek_to(&self, position_ms: i64) -> Result<i64> {
        self.request(|reply| Command::Seek { position_ms, reply }).await
    }

    /// Set the playback rate
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn set_speed(&self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::invalid(format!("playback rate must be positive, got {rate}")));
        }
        self.request(|reply| Command::SetSpeed { rate, reply }).await
    }

    /// Set the volume, clamped to [0, 1]
    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        if volume.is_nan() {
            return Err(Error::invalid("volume must be a number"));
        }
        let volume = volume.clamp(0.0, 1.0);
        self.request(|reply| Command::SetVolume { volume, reply }).await
    }

    /// Select an audio or video track by index
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn set_track(&self, kind: TrackKind, index: usize) -> Result<()> {
        self.request(|reply| Command::SetTrack { kind, index, reply }).await
    }

    /// Bound automatic video selection; all zeros clears the bounds
    pub async fn set_track_constraints(&self, constraints: TrackConstraints) -> Result<()> {
        self.request(|reply| Command::SetTrackConstraints { constraints, reply })
            .await
    }

    pub async fn set_looping(&self, looping: bool) -> Result<()> {
        self.request(|reply| Command::SetLooping { looping, reply }).await
    }

    /// Mix with other audio instead of taking audio focus
    pub async fn set_mix_with_others(&self, mix: bool) -> Result<()> {
        self.request(|reply| Command::SetMixWithOthers { mix, reply }).await
    }

    /// Attach the PiP surface at `bounds`; returns whether PiP is available
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn enable_pip(&self, bounds: PipBounds) -> Result<bool> {
        if bounds.is_empty() {
            return Err(Error::invalid("pip bounds must have a positive size"));
        }
        self.request(|reply| Command::EnablePip { bounds, reply }).await
    }

    /// Enter or leave PiP; playback intent is unchanged
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn set_pip_active(&self, active: bool) -> Result<()> {
        self.request(|reply| Command::SetPipActive { active, reply }).await
    }

    /// Detach the PiP surface
    pub async fn disable_pip(&self) -> Result<()> {
        self.request(|reply| Command::DisablePip { reply }).await
    }

    /// Tear the session down. Idempotent; once it returns no further event
    /// is delivered and pending commands fail with `Error::Disposed`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.events.close();
        let _ = self.inbox.send(Inbound::Dispose);
        info!(session_id = %self.id, "Session disposed");
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Inbound::Command(build(tx)))
            .map_err(|_| Error::Disposed)?;
        rx.await.unwrap_or(Err(Error::Disposed))
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Seek waiting for engine confirmation
struct PendingSeek {
    id: SeekId,
    target_ms: i64,
    /// State to enter once the seek completes
    resume: SessionState,
    /// Loop restart: play again after the seek
    restart: bool,
    /// A host asked for this seek; confirm it with a `seek` event
    host_initiated: bool,
    waiters: Vec<Reply<i64>>,
}

struct SessionActor {
    id: SessionId,
    config: SessionConfig,
    engine_factory: Arc<dyn EngineFactory>,
    license_loader: Arc<dyn LicenseLoader>,
    cache: Arc<dyn CacheCoordinator>,
    pip: PictureInPictureController,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events: Arc<EventSink>,
    cancel: CancellationToken,
    /// Child of `cancel`, replaced for every source
    source_cancel: CancellationToken,

    state: SessionState,
    /// Bumped for every source and every open attempt
    generation: u64,
    source: Option<ResolvedSource>,
    license: Option<LicenseBlob>,
    engine: Option<EngineHandle>,
    /// Engine notifications that overtook the open completion
    early_ready: Option<EngineReady>,
    early_failure: Option<String>,
    failed_attempts: u32,
    pending_source: Option<Reply<()>>,

    position_ms: i64,
    duration_ms: i64,
    window_start_ms: Option<i64>,
    rate: f64,
    volume: f64,
    looping: bool,
    mix_with_others: bool,
    constraints: TrackConstraints,
    tracks: MediaTracks,
    selected_audio: Option<usize>,
    selected_video: Option<usize>,

    stall: StallMonitor,
    stall_count: u64,
    seek: Option<PendingSeek>,
    next_seek_id: SeekId,
    last_ranges: Vec<(i64, i64)>,
}

impl SessionActor {
    async fn run(mut self) {
        while let Some(message) = self.inbox_rx.recv().await {
            if self.cancel.is_cancelled() || matches!(message, Inbound::Dispose) {
                break;
            }
            self.handle(message);
            self.publish();
        }
        self.teardown();
    }

    fn handle(&mut self, message: Inbound) {
        match message {
            Inbound::Command(command) => self.handle_command(command),
            Inbound::Engine {
                generation,
                notification,
            } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "Stale engine notification dropped");
                    return;
                }
                self.on_engine(notification);
            }
            Inbound::LicenseResolved { generation, result } => {
                self.on_license_resolved(generation, result)
            }
            Inbound::Opened { generation, result } => self.on_opened(generation, result),
            Inbound::OpenRetry { generation } => {
                if generation == self.generation && self.state == SessionState::Opening {
                    self.start_open();
                }
            }
            Inbound::PipDismissed => {
                if self.pip.on_system_dismiss() {
                    info!(session_id = %self.id, "PiP dismissed by the system");
                    self.emit(PlayerEvent::PipStateChanged { active: false });
                }
            }
            Inbound::Dispose => {}
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetSource { source, reply } => self.set_source(source, reply),
            Command::Play { reply } => {
                let _ = reply.send(self.play());
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Seek { position_ms, reply } => self.seek(position_ms, reply),
            Command::SetSpeed { rate, reply } => {
                let _ = reply.send(self.set_speed(rate));
            }
            Command::SetVolume { volume, reply } => {
                self.volume = volume;
                let result = if self.engine_live() {
                    self.engine_command("set_volume", |e| e.set_volume(volume))
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::SetTrack { kind, index, reply } => {
                let _ = reply.send(self.set_track(kind, index));
            }
            Command::SetTrackConstraints { constraints, reply } => {
                self.constraints = constraints;
                let result = if self.engine_live() {
                    self.engine_command("set_track_constraints", |e| {
                        e.set_track_constraints(constraints)
                    })
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::SetLooping { looping, reply } => {
                self.looping = looping;
                let _ = reply.send(Ok(()));
            }
            Command::SetMixWithOthers { mix, reply } => {
                self.mix_with_others = mix;
                let result = if self.engine_live() {
                    self.engine_command("set_mix_with_others", |e| e.set_mix_with_others(mix))
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::EnablePip { bounds, reply } => {
                let inbox = self.inbox_tx.clone();
                let on_dismiss = DismissCallback::new(move || {
                    let _ = inbox.send(Inbound::PipDismissed);
                });
                let _ = reply.send(Ok(self.pip.enable(bounds, on_dismiss)));
            }
            Command::SetPipActive { active, reply } => {
                let _ = reply.send(self.set_pip_active(active));
            }
            Command::DisablePip { reply } => {
                if self.pip.disable() {
                    self.emit(PlayerEvent::PipStateChanged { active: false });
                }
                let _ = reply.send(Ok(()));
            }
            Command::Status { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Source lifecycle
    // ---------------------------------------------------------------------

    fn set_source(&mut self, source: ResolvedSource, reply: Reply<()>) {
        info!(session_id = %self.id, key = %source.key, location = %source.location, "Setting source");

        // Tear down whatever the previous source left behind
        self.source_cancel.cancel();
        self.source_cancel = self.cancel.child_token();
        self.engine = None;
        self.close_stall_episode();
        self.abort_seek(|| Error::Aborted("source replaced".into()));
        self.settle_source(Err(Error::Aborted("source replaced".into())));
        if self.pip.is_active() {
            let _ = self.pip.set_active(false, false);
            self.emit(PlayerEvent::PipStateChanged { active: false });
        }

        self.generation += 1;
        self.failed_attempts = 0;
        self.license = None;
        self.early_ready = None;
        self.early_failure = None;
        self.position_ms = 0;
        self.duration_ms = source.overridden_duration_ms.unwrap_or(UNKNOWN_DURATION_MS);
        self.window_start_ms = None;
        self.tracks = MediaTracks::default();
        self.selected_audio = None;
        self.selected_video = None;
        self.last_ranges.clear();
        self.stall.reset();
        self.pending_source = Some(reply);

        let drm = source.drm.clone();
        let headers = source.headers.clone();
        self.source = Some(source);

        match drm {
            Some(params) => {
                self.transition(SessionState::LoadingLicense);
                let request = LicenseRequest::from_params(&params, &headers);
                let loader = self.license_loader.clone();
                let cancel = self.source_cancel.clone();
                let inbox = self.inbox_tx.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    if let Some(result) =
                        resolve_cancellable(loader.as_ref(), &request, &cancel).await
                    {
                        let _ = inbox.send(Inbound::LicenseResolved { generation, result });
                    }
                });
            }
            None => self.start_open(),
        }
    }

    fn on_license_resolved(&mut self, generation: u64, result: Result<LicenseBlob>) {
        if generation != self.generation || self.state != SessionState::LoadingLicense {
            debug!(generation, "Stale license completion dropped");
            return;
        }
        match result {
            Ok(license) => {
                debug!(license_bytes = license.len(), "License ready");
                self.license = Some(license);
                self.start_open();
            }
            Err(e) => self.fail(e),
        }
    }

    fn start_open(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        self.generation += 1;
        self.early_ready = None;
        self.early_failure = None;
        self.transition(SessionState::Opening);

        let generation = self.generation;
        let attempt = self.failed_attempts + 1;
        let factory = self.engine_factory.clone();
        let cache = self.cache.clone();
        let notifier = self.notifier(generation);
        let cancel = self.source_cancel.clone();
        let inbox = self.inbox_tx.clone();
        let license = self.license.clone();
        let (volume, mix_with_others, constraints) =
            (self.volume, self.mix_with_others, self.constraints);

        debug!(key = %source.key, attempt, "Opening source");

        tokio::spawn(async move {
            let open = async {
                let location = route_through_cache(
                    cache.as_ref(),
                    source.location.clone(),
                    source.cache.as_ref(),
                    &source.headers,
                )
                .await?;
                let request = OpenRequest {
                    key: source.key.clone(),
                    location,
                    format: source.format,
                    headers: source.headers.clone(),
                    license,
                    volume,
                    mix_with_others,
                    constraints,
                    end_position_ms: source.overridden_duration_ms,
                    attempt,
                };
                let engine = factory.open(request, notifier).await?;
                Ok::<_, Error>(EngineHandle::new(source.key.clone(), engine))
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                result = open => {
                    let _ = inbox.send(Inbound::Opened { generation, result });
                }
            }
        });
    }

    fn on_opened(&mut self, generation: u64, result: Result<EngineHandle>) {
        if generation != self.generation || self.state != SessionState::Opening {
            // Dropping the handle disposes the stale engine
            debug!(generation, "Stale open completion dropped");
            return;
        }
        match result {
            Ok(handle) => {
                self.engine = Some(handle);
                if let Some(message) = self.early_failure.take() {
                    self.open_failed(Error::EngineFault(message));
                } else if let Some(ready) = self.early_ready.take() {
                    self.on_ready(ready);
                }
            }
            Err(e) => self.open_failed(e),
        }
    }

    fn open_failed(&mut self, error: Error) {
        self.engine = None;
        self.early_ready = None;

        if let Error::CacheUnavailable(_) = error {
            return self.fail(error);
        }

        self.failed_attempts += 1;
        match self.config.retry.delay_after(self.failed_attempts) {
            Some(delay) => {
                let attempt = self.failed_attempts + 1;
                warn!(
                    session_id = %self.id,
                    error = %error,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Open failed, retrying"
                );
                self.emit(PlayerEvent::Retry { attempt });
                self.schedule_retry(delay);
            }
            None => self.fail(Error::OpenFailure {
                attempts: self.failed_attempts,
                message: error.to_string(),
            }),
        }
    }

    fn schedule_retry(&self, delay: Duration) {
        let cancel = self.source_cancel.clone();
        let inbox = self.inbox_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = inbox.send(Inbound::OpenRetry { generation });
                }
            }
        });
    }

    fn on_ready(&mut self, ready: EngineReady) {
        if self.state != SessionState::Opening {
            debug!(state = %self.state, "Ready outside of Opening ignored");
            return;
        }
        if self.engine.is_none() {
            self.early_ready = Some(ready);
            return;
        }
        let Some(source) = self.source.as_ref() else {
            return;
        };

        let key = source.key.clone();
        self.duration_ms = source
            .overridden_duration_ms
            .or(ready.duration_ms)
            .unwrap_or(UNKNOWN_DURATION_MS);
        self.window_start_ms = ready.window_start_ms;
        self.tracks = ready.tracks;
        self.stall.reset();

        let size = ready.size.map(|s| s.rotated(ready.rotation_degrees));
        self.transition(SessionState::Ready);
        self.emit(PlayerEvent::Initialized {
            key,
            duration: self.duration_ms,
            width: size.map(|s| s.width),
            height: size.map(|s| s.height),
            tracks: self.tracks.clone(),
        });
        self.settle_source(Ok(()));
    }

    fn fail(&mut self, error: Error) {
        let kind = error.kind();
        let message = error.to_string();
        warn!(session_id = %self.id, code = error.error_code(), error = %message, "Playback failed");

        self.close_stall_episode();
        self.abort_seek(|| Error::Aborted(format!("seek interrupted: {message}")));
        self.transition(SessionState::Failed(kind));
        self.emit(PlayerEvent::Error { kind, message });
        self.settle_source(Ok(()));
    }

    fn settle_source(&mut self, result: Result<()>) {
        if let Some(reply) = self.pending_source.take() {
            let _ = reply.send(result);
        }
    }

    fn teardown(&mut self) {
        self.source_cancel.cancel();
        self.engine = None;
        self.abort_seek(|| Error::Disposed);
        self.settle_source(Err(Error::Disposed));
        self.pip.disable();
        self.transition(SessionState::Disposed);
        self.publish();
    }

    // ---------------------------------------------------------------------
    // Engine notifications
    // ---------------------------------------------------------------------

    fn notifier(&self, generation: u64) -> EngineNotifier {
        let inbox = self.inbox_tx.clone();
        EngineNotifier::new(move |notification| {
            let _ = inbox.send(Inbound::Engine {
                generation,
                notification,
            });
        })
    }

    fn on_engine(&mut self, notification: EngineNotification) {
        match notification {
            EngineNotification::Ready(ready) => self.on_ready(ready),
            EngineNotification::TimeControl(status) => {
                debug!(?status, "Time control changed");
                if let Some(StallSignal::Recovered) = self.stall.on_time_control(status) {
                    self.on_stall_recovered();
                }
            }
            EngineNotification::Tick {
                position_ms,
                rate,
                buffered_ahead_ms,
            } => self.on_tick(position_ms, rate, buffered_ahead_ms),
            EngineNotification::BufferedRanges(ranges) => {
                if self.config.emit_buffering_updates && ranges != self.last_ranges {
                    self.last_ranges = ranges.clone();
                    self.emit(PlayerEvent::BufferingUpdate { ranges });
                }
            }
            EngineNotification::SeekCompleted {
                seek_id,
                position_ms,
            } => match self.seek.as_ref() {
                Some(pending) if pending.id == seek_id => self.complete_seek(position_ms),
                _ => debug!(seek_id, "Superseded seek completion dropped"),
            },
            EngineNotification::EndOfStream => self.on_end_of_stream(),
            EngineNotification::Failed { message } => {
                if self.state == SessionState::Opening {
                    if self.engine.is_some() {
                        self.open_failed(Error::EngineFault(message));
                    } else {
                        self.early_failure = Some(message);
                    }
                } else if self.state.accepts_engine_commands() {
                    self.fail(Error::EngineFault(message));
                }
            }
        }
    }

    fn on_tick(&mut self, position_ms: i64, rate: f64, buffered_ahead_ms: i64) {
        if !self.engine_live() {
            return;
        }
        let position_ms = self.clamp_to_duration(position_ms);
        if self.state != SessionState::Seeking {
            self.position_ms = position_ms;
        }
        if !matches!(self.state, SessionState::Playing | SessionState::Stalled) {
            return;
        }

        // Engines that ignore the clip point still end at the overridden duration
        let clip_end = self.source.as_ref().and_then(|s| s.overridden_duration_ms);
        if clip_end.is_some_and(|end| position_ms >= end) {
            debug!(position_ms, "Reached overridden duration");
            return self.on_end_of_stream();
        }

        let tick = StallTick {
            position_ms,
            rate,
            buffered_ahead_ms,
            at: Instant::now(),
        };
        match self.stall.observe(tick) {
            Some(StallSignal::Started) if self.state == SessionState::Playing => {
                self.stall_count += 1;
                self.transition(SessionState::Stalled);
                self.emit(PlayerEvent::BufferingStart);
            }
            Some(StallSignal::Recovered) => self.on_stall_recovered(),
            _ => {}
        }
    }

    /// Positions never run past a known duration
    fn clamp_to_duration(&self, position_ms: i64) -> i64 {
        if self.duration_ms >= 0 {
            position_ms.min(self.duration_ms)
        } else {
            position_ms
        }
    }

    fn on_stall_recovered(&mut self) {
        if self.state == SessionState::Stalled {
            self.transition(SessionState::Playing);
            self.emit(PlayerEvent::BufferingEnd);
        }
    }

    /// End an open stall episode without a state change
    fn close_stall_episode(&mut self) {
        if self.stall.reset() {
            self.emit(PlayerEvent::BufferingEnd);
        }
    }

    fn on_end_of_stream(&mut self) {
        if !matches!(self.state, SessionState::Playing | SessionState::Stalled) {
            debug!(state = %self.state, "End of stream ignored");
            return;
        }
        self.close_stall_episode();

        if self.looping {
            debug!(session_id = %self.id, "Looping to start");
            self.begin_seek(0, SessionState::Playing, true);
            return;
        }

        if self.duration_ms > 0 {
            self.position_ms = self.duration_ms;
        }
        if self.engine_command("pause", |e| e.pause()).is_err() {
            return;
        }
        self.transition(SessionState::Paused);
        self.pip.sync_playback(false);
        self.emit(PlayerEvent::Completed);
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    fn play(&mut self) -> Result<()> {
        match self.state {
            SessionState::Playing => Ok(()),
            SessionState::Ready | SessionState::Paused | SessionState::Stalled => {
                let rate = self.rate;
                self.engine_command("play", |e| e.play(rate))?;
                if self.state != SessionState::Stalled {
                    self.stall.reset();
                    self.transition(SessionState::Playing);
                }
                self.pip.sync_playback(true);
                Ok(())
            }
            state => Err(Error::InvalidState {
                command: "play",
                state,
            }),
        }
    }

    fn pause(&mut self) -> Result<()> {
        match self.state {
            SessionState::Paused => Ok(()),
            SessionState::Playing | SessionState::Stalled => {
                self.engine_command("pause", |e| e.pause())?;
                self.close_stall_episode();
                self.transition(SessionState::Paused);
                self.pip.sync_playback(false);
                Ok(())
            }
            SessionState::Seeking => {
                self.engine_command("pause", |e| e.pause())?;
                if let Some(pending) = self.seek.as_mut() {
                    pending.resume = SessionState::Paused;
                    pending.restart = false;
                }
                self.pip.sync_playback(false);
                Ok(())
            }
            state => Err(Error::InvalidState {
                command: "pause",
                state,
            }),
        }
    }

    fn seek(&mut self, position_ms: i64, reply: Reply<i64>) {
        if !self.state.accepts_engine_commands() {
            let _ = reply.send(Err(Error::InvalidState {
                command: "seek_to",
                state: self.state,
            }));
            return;
        }

        let mut target = position_ms.max(0);
        if self.duration_ms > 0 {
            target = target.min(self.duration_ms);
        }

        if let Some(pending) = self.seek.as_mut() {
            pending.host_initiated = true;
            pending.waiters.push(reply);
            if pending.target_ms == target {
                debug!(target, "Seek to the in-flight target absorbed");
                return;
            }
            let id = self.next_seek_id + 1;
            self.next_seek_id = id;
            pending.id = id;
            pending.target_ms = target;
            debug!(target, seek_id = id, "Superseding in-flight seek");
            let _ = self.engine_command("seek_to", |e| e.seek_to(target, id));
            return;
        }

        let resume = match self.state {
            SessionState::Stalled => SessionState::Playing,
            state => state,
        };
        self.begin_seek(target, resume, false);
        match self.seek.as_mut() {
            Some(pending) => {
                pending.host_initiated = true;
                pending.waiters.push(reply);
            }
            None => {
                let _ = reply.send(Err(Error::EngineFault("seek rejected by engine".into())));
            }
        }
    }

    fn begin_seek(&mut self, target_ms: i64, resume: SessionState, restart: bool) {
        let id = self.next_seek_id + 1;
        self.next_seek_id = id;

        self.close_stall_episode();
        if self
            .engine_command("seek_to", |e| e.seek_to(target_ms, id))
            .is_err()
        {
            return;
        }
        self.seek = Some(PendingSeek {
            id,
            target_ms,
            resume,
            restart,
            host_initiated: false,
            waiters: Vec::new(),
        });
        self.transition(SessionState::Seeking);
    }

    fn complete_seek(&mut self, position_ms: i64) {
        let Some(pending) = self.seek.take() else {
            return;
        };
        let position_ms = self.clamp_to_duration(position_ms);
        self.position_ms = position_ms;
        self.stall.reset();
        self.transition(pending.resume);

        if pending.restart && pending.resume == SessionState::Playing {
            let rate = self.rate;
            if self.engine_command("play", |e| e.play(rate)).is_err() {
                for waiter in pending.waiters {
                    let _ = waiter.send(Err(Error::EngineFault("restart after seek failed".into())));
                }
                return;
            }
        }
        self.pip.sync_playback(pending.resume == SessionState::Playing);

        if pending.host_initiated {
            self.emit(PlayerEvent::Seek {
                position: position_ms,
            });
        }
        for waiter in pending.waiters {
            let _ = waiter.send(Ok(position_ms));
        }
    }

    fn abort_seek(&mut self, error: impl Fn() -> Error) {
        if let Some(pending) = self.seek.take() {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(error()));
            }
        }
    }

    fn set_speed(&mut self, rate: f64) -> Result<()> {
        self.rate = rate;
        if matches!(self.state, SessionState::Playing | SessionState::Stalled) {
            self.engine_command("set_rate", |e| e.set_rate(rate))?;
        }
        Ok(())
    }

    fn set_track(&mut self, kind: TrackKind, index: usize) -> Result<()> {
        if !self.state.accepts_engine_commands() {
            return Err(Error::InvalidState {
                command: "set_track",
                state: self.state,
            });
        }
        let available = self.tracks.count(kind);
        if index >= available {
            return Err(Error::invalid(format!(
                "{kind} track {index} out of range ({available} available)"
            )));
        }
        self.engine_command("select_track", |e| e.select_track(kind, index))?;
        match kind {
            TrackKind::Audio => self.selected_audio = Some(index),
            TrackKind::Video => self.selected_video = Some(index),
        }
        let window = self.stall.track_change_window();
        self.stall.suppress_for(Instant::now(), window);
        Ok(())
    }

    fn set_pip_active(&mut self, active: bool) -> Result<()> {
        if active && !self.engine_live() {
            return Err(Error::PipUnavailable);
        }
        let playing = self.playing_intent();
        if self.pip.set_active(active, playing)? {
            info!(session_id = %self.id, active, "PiP state changed");
            self.emit(PlayerEvent::PipStateChanged { active });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn engine_live(&self) -> bool {
        self.engine.is_some() && self.state.accepts_engine_commands()
    }

    fn playing_intent(&self) -> bool {
        match self.state {
            SessionState::Playing | SessionState::Stalled => true,
            SessionState::Seeking => self
                .seek
                .as_ref()
                .map(|s| s.resume == SessionState::Playing)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Run an engine command; an engine error fails the session
    fn engine_command(
        &mut self,
        command: &'static str,
        f: impl FnOnce(&mut (dyn MediaEngine + 'static)) -> Result<()>,
    ) -> Result<()> {
        let Some(engine) = self.engine.as_mut().and_then(|h| h.engine()) else {
            return Err(Error::InvalidState {
                command,
                state: self.state,
            });
        };
        if let Err(e) = f(engine) {
            let message = format!("{command}: {e}");
            self.fail(Error::EngineFault(message.clone()));
            return Err(Error::EngineFault(message));
        }
        Ok(())
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(session_id = %self.id, from = %from, to = %to, "Unexpected state transition");
        }
        self.state = to;
        info!(session_id = %self.id, from = %from, to = %to, "State transition");
    }

    fn emit(&self, event: PlayerEvent) {
        debug!(session_id = %self.id, event = event.name(), "Emitting event");
        self.events.emit(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            state: self.state,
            source_key: self.source.as_ref().map(|s| s.key.clone()),
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            absolute_position_ms: self
                .window_start_ms
                .map(|start| start.saturating_add(self.position_ms))
                .unwrap_or(self.position_ms),
            playback_rate: self.rate,
            volume: self.volume,
            is_looping: self.looping,
            failed_attempts: self.failed_attempts,
            stall_count: self.stall_count,
            pip_enabled: self.pip.is_enabled(),
            pip_active: self.pip.is_active(),
            tracks: self.tracks.clone(),
            selected_audio: self.selected_audio,
            selected_video: self.selected_video,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
