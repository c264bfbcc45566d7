//! Picture-in-picture
//!
//! The platform surface is external. The controller tracks whether PiP is
//! enabled (surface attached) and active (floating window shown), and keeps
//! the surface's play indicator in line with the session's playback intent.
//! Entering or leaving PiP never starts or stops playback by itself.

use crate::error::{Error, Result};
use crate::types::PipBounds;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handed to the surface on attach; invoked when the system closes the window
#[derive(Clone)]
pub struct DismissCallback(Arc<dyn Fn() + Send + Sync>);

impl DismissCallback {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Report a system dismissal
    pub fn dismiss(&self) {
        (self.0)();
    }
}

impl fmt::Debug for DismissCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DismissCallback")
    }
}

/// Platform picture-in-picture surface
pub trait PipSurface: Send {
    /// Whether the platform supports PiP at all
    fn is_supported(&self) -> bool;

    /// Bind the surface to the player rectangle
    fn attach(&mut self, bounds: PipBounds, on_dismiss: DismissCallback) -> Result<()>;

    /// Show the floating window
    fn start(&mut self) -> Result<()>;

    /// Hide the floating window
    fn stop(&mut self);

    /// Update the window's play/pause indicator
    fn set_playing(&mut self, playing: bool);

    /// Unbind the surface
    fn detach(&mut self);
}

/// Tracks PiP state for one session
pub struct PictureInPictureController {
    surface: Option<Box<dyn PipSurface>>,
    enabled: bool,
    active: bool,
}

impl PictureInPictureController {
    /// Create a controller; `None` means the host has no PiP surface
    pub fn new(surface: Option<Box<dyn PipSurface>>) -> Self {
        Self {
            surface,
            enabled: false,
            active: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Attach the surface at `bounds`. Returns the capability flag.
    pub fn enable(&mut self, bounds: PipBounds, on_dismiss: DismissCallback) -> bool {
        let Some(surface) = self.surface.as_mut() else {
            debug!("No PiP surface");
            return false;
        };
        if !surface.is_supported() {
            debug!("PiP not supported on this platform");
            return false;
        }
        match surface.attach(bounds, on_dismiss) {
            Ok(()) => {
                self.enabled = true;
                true
            }
            Err(e) => {
                warn!(error = %e, "PiP surface attach failed");
                false
            }
        }
    }

    /// Enter or leave PiP. Returns whether `active` changed.
    ///
    /// `playing` is the session's playback intent, mirrored on the surface.
    pub fn set_active(&mut self, active: bool, playing: bool) -> Result<bool> {
        if active == self.active {
            return Ok(false);
        }
        let surface = match self.surface.as_mut() {
            Some(surface) if self.enabled => surface,
            _ => return Err(Error::PipUnavailable),
        };

        if active {
            surface.start()?;
            surface.set_playing(playing);
        } else {
            surface.stop();
        }
        self.active = active;
        Ok(true)
    }

    /// Detach the surface. Returns whether PiP was active.
    pub fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        let was_active = self.active;
        if let Some(surface) = self.surface.as_mut() {
            if was_active {
                surface.stop();
            }
            surface.detach();
        }
        self.enabled = false;
        self.active = false;
        was_active
    }

    /// The system closed the window. Returns whether `active` changed.
    pub fn on_system_dismiss(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    /// Mirror the playback intent on an active window
    pub fn sync_playback(&mut self, playing: bool) {
        if !self.active {
            return;
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.set_playing(playing);
        }
    }
}

impl fmt::Debug for PictureInPictureController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureInPictureController")
            .field("has_surface", &self.surface.is_some())
            .field("enabled", &self.enabled)
            .field("active", &self.active)
            .finish()
    }
}
