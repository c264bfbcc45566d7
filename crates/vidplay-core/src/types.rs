//! Core types for vidplay

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

/// Duration reported to hosts when the engine does not know it (live streams)
pub const UNKNOWN_DURATION_MS: i64 = -1;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playback session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "camelCase")]
pub enum SessionState {
    /// Created, no source assigned
    Uninitialized,
    /// Waiting for the DRM certificate and license
    LoadingLicense,
    /// Engine is opening the resolved source
    Opening,
    /// Source opened, not yet started
    Ready,
    /// Content is playing
    Playing,
    /// Playback paused by the host (or at end of stream)
    Paused,
    /// Rate > 0 but position is not advancing
    Stalled,
    /// Waiting for the engine to confirm a seek
    Seeking,
    /// Terminal for the current source; a new `set_source` recovers
    Failed(ErrorKind),
    /// Torn down, terminal for the session
    Disposed,
}

impl SessionState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        match (self, target) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            // A new source can be assigned from anywhere but Disposed
            (_, LoadingLicense) | (_, Opening) => true,
            (LoadingLicense, Failed(_)) | (Opening, Failed(_)) => true,
            (Opening, Ready) => true,
            (Ready, Playing) | (Ready, Seeking) | (Ready, Failed(_)) => true,
            (Playing, Paused) | (Playing, Stalled) | (Playing, Seeking) | (Playing, Failed(_)) => true,
            (Paused, Playing) | (Paused, Seeking) | (Paused, Failed(_)) => true,
            (Stalled, Playing) | (Stalled, Paused) | (Stalled, Seeking) | (Stalled, Failed(_)) => true,
            (Seeking, Ready) | (Seeking, Playing) | (Seeking, Paused) | (Seeking, Failed(_)) => true,
            _ => false,
        }
    }

    /// States in which engine commands may be issued
    pub fn accepts_engine_commands(&self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Playing
                | SessionState::Paused
                | SessionState::Stalled
                | SessionState::Seeking
        )
    }

    /// True while a source is being resolved or opened
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionState::LoadingLicense | SessionState::Opening)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::LoadingLicense => write!(f, "loading_license"),
            SessionState::Opening => write!(f, "opening"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Playing => write!(f, "playing"),
            SessionState::Paused => write!(f, "paused"),
            SessionState::Stalled => write!(f, "stalled"),
            SessionState::Seeking => write!(f, "seeking"),
            SessionState::Failed(kind) => write!(f, "failed({})", kind),
            SessionState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Container format of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Hls,
    Dash,
    #[serde(rename = "ss")]
    SmoothStreaming,
    Other,
}

impl VideoFormat {
    /// Infer the container format from a locator
    pub fn detect(locator: &str) -> Self {
        let lower = locator.to_lowercase();
        if lower.contains(".m3u8") {
            VideoFormat::Hls
        } else if lower.contains(".mpd") {
            VideoFormat::Dash
        } else if lower.contains(".ism") {
            VideoFormat::SmoothStreaming
        } else {
            VideoFormat::Other
        }
    }

    /// Parse a host-provided extension hint ("hls", "m3u8", "dash", ...)
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim_start_matches('.').to_lowercase().as_str() {
            "hls" | "m3u8" => Some(VideoFormat::Hls),
            "dash" | "mpd" => Some(VideoFormat::Dash),
            "ss" | "ism" => Some(VideoFormat::SmoothStreaming),
            "other" | "mp4" | "mov" | "mkv" | "webm" => Some(VideoFormat::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoFormat::Hls => write!(f, "HLS"),
            VideoFormat::Dash => write!(f, "DASH"),
            VideoFormat::SmoothStreaming => write!(f, "SmoothStreaming"),
            VideoFormat::Other => write!(f, "Other"),
        }
    }
}

/// Where the media bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum SourceLocator {
    /// Bundled asset path
    Asset(String),
    /// Remote URL
    Network(String),
}

impl SourceLocator {
    pub fn as_str(&self) -> &str {
        match self {
            SourceLocator::Asset(path) => path,
            SourceLocator::Network(url) => url,
        }
    }
}

/// Host-supplied description of a source, as passed to `set_source`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Asset path or remote URL
    pub locator: SourceLocator,
    /// Host key for this source; defaults to the locator
    #[serde(default)]
    pub key: Option<String>,
    /// FairPlay-style certificate URL
    #[serde(default)]
    pub certificate_url: Option<String>,
    /// License server URL
    #[serde(default)]
    pub license_url: Option<String>,
    /// Content id used in the key exchange; defaults to the source key
    #[serde(default)]
    pub drm_content_id: Option<String>,
    /// Cache key for the content cache
    #[serde(default)]
    pub cache_key: Option<String>,
    /// Extra request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Route remote sources through the content cache
    #[serde(default)]
    pub use_cache: bool,
    /// Fail instead of falling back to direct access when the cache is unavailable
    #[serde(default)]
    pub cache_required: bool,
    /// Duration override for sources with unreliable metadata
    #[serde(default)]
    pub overridden_duration_ms: Option<i64>,
    /// Container format hint
    #[serde(default)]
    pub format_hint: Option<VideoFormat>,
}

impl SourceDescriptor {
    fn with_locator(locator: SourceLocator) -> Self {
        Self {
            locator,
            key: None,
            certificate_url: None,
            license_url: None,
            drm_content_id: None,
            cache_key: None,
            headers: HashMap::new(),
            use_cache: false,
            cache_required: false,
            overridden_duration_ms: None,
            format_hint: None,
        }
    }

    /// Remote source
    pub fn network(url: impl Into<String>) -> Self {
        Self::with_locator(SourceLocator::Network(url.into()))
    }

    /// Bundled asset source
    pub fn asset(path: impl Into<String>) -> Self {
        Self::with_locator(SourceLocator::Asset(path.into()))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Require a license round trip before opening
    pub fn with_drm(mut self, certificate_url: Option<&str>, license_url: &str) -> Self {
        self.certificate_url = certificate_url.map(str::to_string);
        self.license_url = Some(license_url.to_string());
        self
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.drm_content_id = Some(content_id.into());
        self
    }

    /// Route through the content cache under `cache_key`
    pub fn with_cache(mut self, cache_key: impl Into<String>, required: bool) -> Self {
        self.use_cache = true;
        self.cache_key = Some(cache_key.into());
        self.cache_required = required;
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_overridden_duration(mut self, duration_ms: i64) -> Self {
        self.overridden_duration_ms = Some(duration_ms);
        self
    }

    pub fn with_format(mut self, format: VideoFormat) -> Self {
        self.format_hint = Some(format);
        self
    }

    /// Check if a license round trip is required
    pub fn is_protected(&self) -> bool {
        self.license_url.is_some() || self.certificate_url.is_some()
    }

    /// Validate the descriptor and resolve its parts into typed values
    pub fn resolve(&self) -> Result<ResolvedSource> {
        let raw = self.locator.as_str().trim();
        if raw.is_empty() {
            return Err(Error::invalid("source locator must not be empty"));
        }

        let location = match &self.locator {
            SourceLocator::Asset(_) => MediaLocation::Asset(PathBuf::from(raw)),
            SourceLocator::Network(_) => MediaLocation::Remote(
                Url::parse(raw).map_err(|e| Error::invalid(format!("invalid source url {raw}: {e}")))?,
            ),
        };

        let key = self
            .key
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| raw.to_string());

        let drm = match (&self.certificate_url, &self.license_url) {
            (None, None) => None,
            (Some(_), None) => {
                return Err(Error::invalid("certificate url given without a license url"));
            }
            (certificate, Some(license)) => {
                let license_url = Url::parse(license)
                    .map_err(|e| Error::invalid(format!("invalid license url: {e}")))?;
                let certificate_url = certificate
                    .as_deref()
                    .map(Url::parse)
                    .transpose()
                    .map_err(|e| Error::invalid(format!("invalid certificate url: {e}")))?;
                Some(DrmParams {
                    certificate_url,
                    license_url,
                    content_id: self.drm_content_id.clone().unwrap_or_else(|| key.clone()),
                })
            }
        };

        if let Some(duration) = self.overridden_duration_ms {
            if duration <= 0 {
                return Err(Error::invalid("overridden duration must be positive"));
            }
        }

        let cache = match (&location, self.use_cache) {
            (MediaLocation::Remote(_), true) => Some(CachePolicy {
                cache_key: self.cache_key.clone().unwrap_or_else(|| key.clone()),
                required: self.cache_required,
            }),
            _ => None,
        };

        Ok(ResolvedSource {
            key,
            format: self.format_hint.unwrap_or_else(|| VideoFormat::detect(raw)),
            location,
            drm,
            cache,
            headers: self.headers.clone(),
            overridden_duration_ms: self.overridden_duration_ms,
        })
    }
}

/// Typed location of the media bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLocation {
    Asset(PathBuf),
    Remote(Url),
}

impl std::fmt::Display for MediaLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaLocation::Asset(path) => write!(f, "asset:{}", path.display()),
            MediaLocation::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// DRM parameters of a protected source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmParams {
    pub certificate_url: Option<Url>,
    pub license_url: Url,
    pub content_id: String,
}

/// Cache routing for a remote source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub cache_key: String,
    pub required: bool,
}

/// A validated descriptor
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub key: String,
    pub location: MediaLocation,
    pub format: VideoFormat,
    pub drm: Option<DrmParams>,
    pub cache: Option<CachePolicy>,
    pub headers: HashMap<String, String>,
    pub overridden_duration_ms: Option<i64>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Apply a display rotation; quarter turns swap the axes
    pub fn rotated(self, degrees: u16) -> Self {
        if degrees % 180 == 90 {
            Self::new(self.height, self.width)
        } else {
            self
        }
    }

    /// Returns quality tier name
    pub fn quality_name(&self) -> &'static str {
        match self.height {
            0..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Selectable track category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Alternate audio (language) track
    Audio,
    /// Bitrate / quality rendition
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Audio track information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    /// Unique identifier
    pub id: String,
    /// Human-readable label
    pub label: String,
    /// BCP-47 language code
    pub language: Option<String>,
    /// Bitrate in bps
    pub bitrate: Option<u64>,
}

/// Video rendition in the bitrate ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrack {
    /// Unique identifier
    pub id: String,
    /// Bandwidth in bits per second
    pub bandwidth: u64,
    /// Video resolution
    pub resolution: Option<Resolution>,
    /// Frame rate
    pub frame_rate: Option<f32>,
}

impl VideoTrack {
    /// Human-readable quality label
    pub fn label(&self) -> String {
        match self.resolution {
            Some(r) => format!("{} ({} kbps)", r.quality_name(), self.bandwidth / 1000),
            None => format!("{} kbps", self.bandwidth / 1000),
        }
    }
}

/// Tracks discovered when the source became ready
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaTracks {
    pub audio: Vec<AudioTrack>,
    pub video: Vec<VideoTrack>,
}

impl MediaTracks {
    /// Number of tracks of a kind
    pub fn count(&self, kind: TrackKind) -> usize {
        match kind {
            TrackKind::Audio => self.audio.len(),
            TrackKind::Video => self.video.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && self.video.is_empty()
    }
}

/// Upper bounds for automatic video track selection; zero means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackConstraints {
    pub max_width: u32,
    pub max_height: u32,
    pub max_bitrate: u64,
}

impl TrackConstraints {
    pub fn is_unbounded(&self) -> bool {
        self.max_width == 0 && self.max_height == 0 && self.max_bitrate == 0
    }
}

/// On-screen rectangle of the player surface, in points
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PipBounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Point-in-time view of a session, published after every applied message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: SessionState,
    pub source_key: Option<String>,
    pub position_ms: i64,
    /// `UNKNOWN_DURATION_MS` when unknown
    pub duration_ms: i64,
    /// Live-window origin plus position, when the engine reports a window
    pub absolute_position_ms: i64,
    pub playback_rate: f64,
    pub volume: f64,
    pub is_looping: bool,
    pub failed_attempts: u32,
    pub stall_count: u64,
    pub pip_enabled: bool,
    pub pip_active: bool,
    pub tracks: MediaTracks,
    pub selected_audio: Option<usize>,
    pub selected_video: Option<usize>,
}

impl SessionSnapshot {
    pub fn new(session_id: SessionId, playback_rate: f64) -> Self {
        Self {
            session_id,
            state: SessionState::Uninitialized,
            source_key: None,
            position_ms: 0,
            duration_ms: UNKNOWN_DURATION_MS,
            absolute_position_ms: 0,
            playback_rate,
            volume: 1.0,
            is_looping: false,
            failed_attempts: 0,
            stall_count: 0,
            pip_enabled: false,
            pip_active: false,
            tracks: MediaTracks::default(),
            selected_audio: None,
            selected_video: None,
        }
    }
}
