//! Interfaces the engine consumes from the middleware.
//!
//! The middleware is split along the control surfaces it exposes. Every call
//! is fallible and may block on I/O; implementations must be safe to share
//! between the probe thread and callers.

use std::sync::Arc;
use std::time::Duration;

use tvbridge_protocol::{
    AudioTrack, DecoderDescriptor, FrontendDescriptor, FrontendType, IoDescriptor,
    MediaComponents, ScanMode, ServiceDescriptor, StorageDescriptor, VideoPlacement,
};

use crate::error::MiddlewareError;
use crate::route::RouteHandle;

/// Result of a single middleware call.
pub type MwResult<T> = Result<T, MiddlewareError>;

/// Hardware inventory and route registration.
pub trait CapabilitySource {
    fn frontend_count(&self) -> MwResult<u32>;
    fn mass_storage_count(&self) -> MwResult<u32>;
    fn decoder_count(&self) -> MwResult<u32>;
    fn input_output_count(&self) -> MwResult<u32>;

    fn frontend_descriptor(&self, index: u32) -> MwResult<FrontendDescriptor>;
    fn decoder_descriptor(&self, index: u32) -> MwResult<DecoderDescriptor>;
    fn storage_descriptor(&self, index: u32) -> MwResult<StorageDescriptor>;
    fn io_descriptor(&self, index: u32) -> MwResult<IoDescriptor>;

    /// Register a frontend -> demux path.
    fn install_route(&self, frontend: u32, demux: u32) -> MwResult<RouteHandle>;
    /// Register a frontend -> demux -> decoder path.
    fn live_route(&self, frontend: u32, demux: u32, decoder: u32) -> MwResult<RouteHandle>;
    /// Register a frontend -> demux -> storage path.
    fn record_route(&self, frontend: u32, demux: u32, storage: u32) -> MwResult<RouteHandle>;
    /// Register a storage -> demux -> decoder path.
    fn playback_route(&self, storage: u32, demux: u32, decoder: u32) -> MwResult<RouteHandle>;

    /// Select the components a live route carries and where its video goes.
    fn configure_live_route(
        &self,
        route: RouteHandle,
        components: MediaComponents,
        placement: VideoPlacement,
    ) -> MwResult<()>;
}

/// Service list access and live playback.
pub trait ServiceControl {
    fn service_count(&self, list: u32) -> MwResult<u32>;
    fn service_descriptor(&self, list: u32, index: u32) -> MwResult<ServiceDescriptor>;
    fn start_service(&self, route: RouteHandle, list: u32, index: u32) -> MwResult<()>;
    fn stop_service(&self, route: RouteHandle) -> MwResult<()>;
    /// Index of the service running on `route`, `None` when idle.
    fn active_service(&self, route: RouteHandle) -> MwResult<Option<u32>>;
    fn scale_window(&self, route: RouteHandle, placement: VideoPlacement) -> MwResult<()>;
}

/// Channel scanning on install routes.
pub trait ScanControl {
    fn configure_install_route(
        &self,
        route: RouteHandle,
        frontend_type: FrontendType,
    ) -> MwResult<()>;
    fn start_scan(&self, route: RouteHandle, mode: ScanMode) -> MwResult<()>;
    fn abort_scan(&self, route: RouteHandle) -> MwResult<()>;
}

/// Audio track selection on live routes.
pub trait AudioControl {
    fn audio_track_count(&self, route: RouteHandle) -> MwResult<u32>;
    fn audio_track(&self, route: RouteHandle, index: u32) -> MwResult<AudioTrack>;
    fn set_audio_track(&self, route: RouteHandle, index: u32) -> MwResult<()>;
}

/// A connected middleware exposing every control surface.
pub trait Middleware:
    CapabilitySource + ServiceControl + ScanControl + AudioControl + Send + Sync
{
}

impl<T> Middleware for T where
    T: CapabilitySource + ServiceControl + ScanControl + AudioControl + Send + Sync
{
}

/// Discovers (and if needed starts) the middleware service.
pub trait ServiceLocator: Send + Sync {
    /// Try once to reach the middleware, giving up after `timeout`.
    fn connect(&self, timeout: Duration) -> Option<Arc<dyn Middleware>>;
}
