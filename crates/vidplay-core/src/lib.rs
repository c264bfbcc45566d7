//! Vidplay Core - Playback session library for vidplay
//!
//! This crate provides the per-instance playback session behind a video view:
//! - Source resolution with DRM license acquisition and content caching
//! - A single-owner state machine over an external media engine
//! - Open retries with configurable backoff
//! - Stall detection with hysteresis
//! - Picture-in-picture coordination
//! - An ordered event stream for the host
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Vidplay Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   host commands ──┐                   ┌── engine notifications  │
//! │                   ▼                   ▼                         │
//! │              ┌─────────────────────────────┐                    │
//! │              │     PlaybackSession actor   │◀── license / open  │
//! │              │  (one inbox, one owner)     │◀── retry timers    │
//! │              └──────┬───────┬───────┬──────┘◀── PiP dismissals  │
//! │                     │       │       │                           │
//! │  ┌──────────────┐   │  ┌────┴─────┐ │  ┌──────────────┐         │
//! │  │    Stall     │◀──┘  │  Engine  │ └─▶│     PiP      │         │
//! │  │   Monitor    │      │  Handle  │    │  Controller  │         │
//! │  └──────────────┘      └──────────┘    └──────────────┘         │
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   License    │  │    Cache     │  │    Event     │           │
//! │  │   Loader     │  │ Coordinator  │  │     Sink     │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod drm;
pub mod engine;
pub mod error;
pub mod events;
pub mod pip;
pub mod session;
#[cfg(feature = "sim")]
pub mod sim;
pub mod stall;
pub mod types;

pub use cache::{CacheCoordinator, DirectSource};
pub use config::{Backoff, RetryPolicy, SessionConfig, StallConfig};
pub use drm::{HttpLicenseLoader, KeyExchange, LicenseBlob, LicenseLoader, LicenseRequest};
pub use engine::{EngineFactory, EngineNotification, EngineNotifier, MediaEngine, OpenRequest};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventRecord, EventSink, PlayerEvent};
pub use pip::{DismissCallback, PictureInPictureController, PipSurface};
pub use session::{PlaybackSession, SessionDeps};
pub use stall::StallMonitor;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version; hosts call this once at startup
pub fn init() {
    tracing::info!(version = VERSION, "Vidplay Core initialized");
}
