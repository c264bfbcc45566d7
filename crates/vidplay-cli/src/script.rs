//! Playback scripts for `vidplay-cli run`
//!
//! ```json
//! {
//!   "engine": { "durationMs": 10000, "stallAtMs": 4000 },
//!   "source": { "locator": { "type": "network", "value": "https://cdn.example.com/a.m3u8" } },
//!   "steps": [
//!     { "action": "play" },
//!     { "action": "wait", "ms": 2000 },
//!     { "action": "seek", "positionMs": 8000 },
//!     { "action": "waitUntil", "state": "paused", "timeoutMs": 10000 }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use vidplay_core::sim::SimConfig;
use vidplay_core::{PipBounds, SessionConfig, SourceDescriptor, TrackKind};

/// A scripted session run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default)]
    pub config: SessionConfig,
    #[serde(default)]
    pub engine: SimConfig,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One host command or pause in a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
    Play,
    Pause,
    #[serde(rename_all = "camelCase")]
    Seek { position_ms: i64 },
    SetSpeed { rate: f64 },
    SetVolume { volume: f64 },
    SetTrack { kind: TrackKind, index: usize },
    SetLooping { looping: bool },
    EnablePip { bounds: PipBounds },
    SetPipActive { active: bool },
    /// Replace the source mid-run
    SetSource { source: SourceDescriptor },
    /// Sleep
    Wait { ms: u64 },
    /// Block until the session reports `state` (as displayed, e.g. "paused")
    #[serde(rename_all = "camelCase")]
    WaitUntil {
        state: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    /// Print a status snapshot
    Status,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Play => "play",
            Step::Pause => "pause",
            Step::Seek { .. } => "seek",
            Step::SetSpeed { .. } => "setSpeed",
            Step::SetVolume { .. } => "setVolume",
            Step::SetTrack { .. } => "setTrack",
            Step::SetLooping { .. } => "setLooping",
            Step::EnablePip { .. } => "enablePip",
            Step::SetPipActive { .. } => "setPipActive",
            Step::SetSource { .. } => "setSource",
            Step::Wait { .. } => "wait",
            Step::WaitUntil { .. } => "waitUntil",
            Step::Status => "status",
        }
    }
}

impl Script {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let script: Script = serde_json::from_str(json)?;
        script.config.validate()?;
        Ok(script)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}
