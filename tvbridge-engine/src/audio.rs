//! Audio track selection on live routes.

use std::sync::Arc;

use log::debug;
use tvbridge_protocol::AudioTrack;

use crate::error::EngineError;
use crate::middleware::{AudioControl, Middleware};
use crate::route::RouteHandle;

pub struct AudioManager {
    middleware: Arc<dyn Middleware>,
}

impl AudioManager {
    pub fn new(middleware: Arc<dyn Middleware>) -> Self {
        Self { middleware }
    }

    pub fn track_count(&self, route: RouteHandle) -> Result<u32, EngineError> {
        Ok(self.middleware.audio_track_count(route)?)
    }

    pub fn track(&self, route: RouteHandle, index: u32) -> Result<AudioTrack, EngineError> {
        Ok(self.middleware.audio_track(route, index)?)
    }

    /// Every track of the service running on `route`.
    pub fn tracks(&self, route: RouteHandle) -> Result<Vec<AudioTrack>, EngineError> {
        let count = self.track_count(route)?;
        (0..count).map(|index| self.track(route, index)).collect()
    }

    pub fn set_audio_track(&self, route: RouteHandle, index: u32) -> Result<(), EngineError> {
        debug!("[Audio] route {} -> track {}", route, index);
        Ok(self.middleware.set_audio_track(route, index)?)
    }
}
