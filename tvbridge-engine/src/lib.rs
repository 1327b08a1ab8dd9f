//! tvbridge engine - binds a digital TV application to a broadcast middleware.
//!
//! The engine waits for the middleware to come up ([`ConnectionGate`]),
//! discovers which signal paths the hardware offers and assigns them to
//! reception roles ([`RouteManager`]), and exposes channel, audio and
//! playback control through [`DtvEngine`].
//!
//! The middleware is reached through the [`Middleware`] traits. Two
//! implementations ship with the crate: [`RemoteMiddleware`] talks the
//! tvbridge wire protocol over TCP, and [`ProfileMiddleware`] answers from a
//! TOML device profile for tests and the simulator.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tvbridge_engine::{ConnectionGate, DeviceProfile, MemoryChannelStore, ProbePolicy,
//!     ProfileLocator, ProfileMiddleware};
//!
//! let middleware = Arc::new(ProfileMiddleware::new(DeviceProfile::demo()));
//! let gate = ConnectionGate::new(
//!     Arc::new(ProfileLocator::new(middleware)),
//!     Arc::new(MemoryChannelStore::new()),
//!     ProbePolicy::default(),
//! );
//!
//! let engine = gate.request_connection(Some(Duration::from_secs(5))).unwrap();
//! let routes = engine.route_manager().unwrap();
//! assert!(routes.main_live_route().is_some());
//! ```

pub mod audio;
pub mod channel;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod profile;
pub mod responder;
pub mod route;

pub use audio::AudioManager;
pub use channel::{ChannelDescriptor, ChannelManager, ChannelStore, MemoryChannelStore};
pub use client::{Connection, ConnectionState, RemoteLocator, RemoteMiddleware};
pub use config::{ConfigError, EngineConfig, EngineSection};
pub use engine::{DtvEngine, EngineManagers};
pub use error::{EngineError, MiddlewareError};
pub use gate::{ConnectionGate, ProbePolicy};
pub use middleware::{
    AudioControl, CapabilitySource, Middleware, MwResult, ScanControl, ServiceControl,
    ServiceLocator,
};
pub use profile::{DeviceProfile, ProfileError, ProfileLocator, ProfileMiddleware};
pub use responder::respond;
pub use route::{
    CandidateRoutes, Classification, PlaybackBundle, RouteBundle, RouteHandle, RouteManager,
    RouteRole,
};
