//! Engine facade over a connected middleware.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tvbridge_protocol::{VideoPlacement, MASTER_LIST_INDEX};

use crate::audio::AudioManager;
use crate::channel::{ChannelDescriptor, ChannelManager, ChannelStore};
use crate::error::EngineError;
use crate::middleware::Middleware;
use crate::route::{RouteHandle, RouteManager, RouteRole};

/// Managers built from one resolve pass. Replaced as a unit.
pub struct EngineManagers {
    pub routes: Arc<RouteManager>,
    pub channels: ChannelManager,
    pub audio: AudioManager,
}

impl EngineManagers {
    fn build(
        middleware: &Arc<dyn Middleware>,
        store: &Arc<dyn ChannelStore>,
    ) -> Result<Self, EngineError> {
        let routes = Arc::new(RouteManager::resolve(middleware.as_ref())?);
        Ok(Self {
            channels: ChannelManager::new(middleware.clone(), store.clone(), routes.clone()),
            audio: AudioManager::new(middleware.clone()),
            routes,
        })
    }
}

/// Live engine bound to one middleware connection.
pub struct DtvEngine {
    middleware: Arc<dyn Middleware>,
    store: Arc<dyn ChannelStore>,
    managers: RwLock<Option<Arc<EngineManagers>>>,
    /// Live route the current service runs on.
    current: Mutex<Option<RouteHandle>>,
}

impl DtvEngine {
    /// Resolve routes and load the channel list for a fresh connection.
    pub fn connect(
        middleware: Arc<dyn Middleware>,
        store: Arc<dyn ChannelStore>,
    ) -> Result<Self, EngineError> {
        let managers = EngineManagers::build(&middleware, &store)?;
        managers.channels.init()?;
        info!(
            "[Engine] connected: source type {}, {} channels",
            managers.routes.source_type(),
            managers.channels.len()
        );
        Ok(Self {
            middleware,
            store,
            managers: RwLock::new(Some(Arc::new(managers))),
            current: Mutex::new(None),
        })
    }

    /// Current manager set.
    pub fn managers(&self) -> Result<Arc<EngineManagers>, EngineError> {
        self.managers.read().clone().ok_or(EngineError::NotConnected)
    }

    pub fn route_manager(&self) -> Result<Arc<RouteManager>, EngineError> {
        Ok(self.managers()?.routes.clone())
    }

    pub fn middleware(&self) -> &Arc<dyn Middleware> {
        &self.middleware
    }

    /// Re-run enumeration and classification, then publish the new managers.
    ///
    /// On failure the previous managers stay in place.
    pub fn resolve_routes(&self) -> Result<(), EngineError> {
        if self.managers.read().is_none() {
            return Err(EngineError::NotConnected);
        }
        let fresh = EngineManagers::build(&self.middleware, &self.store)?;
        fresh.channels.init()?;

        let mut managers = self.managers.write();
        if managers.is_none() {
            return Err(EngineError::NotConnected);
        }
        *managers = Some(Arc::new(fresh));
        debug!("[Engine] routes re-resolved");
        Ok(())
    }

    /// Start `channel` on the live route of its source type and show it
    /// full screen.
    pub fn start(&self, channel: &ChannelDescriptor) -> Result<(), EngineError> {
        let managers = self.managers()?;
        let role = RouteRole::for_source_type(channel.source_type).ok_or_else(|| {
            EngineError::RouteNotFound(format!("source type {}", channel.source_type))
        })?;
        let live = managers
            .routes
            .by_role(role)
            .and_then(|bundle| bundle.live)
            .ok_or_else(|| EngineError::RouteNotFound(format!("{} live route", role)))?;

        info!(
            "[Engine] starting '{}' (service {}) on {}",
            channel.name, channel.service_index, live.handle
        );
        self.middleware
            .start_service(live.handle, MASTER_LIST_INDEX, channel.service_index)?;
        self.middleware
            .scale_window(live.handle, VideoPlacement::FULL_SCREEN)?;
        *self.current.lock() = Some(live.handle);
        Ok(())
    }

    /// Stop the running service.
    pub fn stop(&self) -> Result<(), EngineError> {
        let current = self.current.lock().take();
        let route = match current {
            Some(route) => route,
            None => self.managers()?.routes.main_live_route_handle()?,
        };
        info!("[Engine] stopping service on {}", route);
        if let Err(e) = self.middleware.stop_service(route) {
            warn!("[Engine] stop on {} failed: {}", route, e);
            if current.is_some() {
                let mut slot = self.current.lock();
                if slot.is_none() {
                    *slot = current;
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Live route the engine plays on.
    pub fn current_route(&self) -> Result<RouteHandle, EngineError> {
        if let Some(route) = *self.current.lock() {
            return Ok(route);
        }
        self.managers()?.routes.main_live_route_handle()
    }

    /// Master list index of the service running on the current route.
    pub fn current_service_index(&self) -> Result<Option<u32>, EngineError> {
        let route = self.current_route()?;
        Ok(self.middleware.active_service(route)?)
    }

    /// Stop playback and drop the managers. Later calls fail with
    /// `NotConnected`.
    pub fn deinit(&self) {
        if self.current.lock().is_some() {
            if let Err(e) = self.stop() {
                warn!("[Engine] stop during deinit failed: {}", e);
            }
        }
        *self.managers.write() = None;
        info!("[Engine] deinitialized");
    }

    pub fn is_active(&self) -> bool {
        self.managers.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannelStore;
    use crate::middleware::ServiceControl;
    use crate::profile::{DeviceProfile, ProfileMiddleware};
    use tvbridge_protocol::SourceType;

    fn engine() -> (Arc<ProfileMiddleware>, DtvEngine) {
        let mw = Arc::new(ProfileMiddleware::new(DeviceProfile::demo()));
        let engine = DtvEngine::connect(mw.clone(), Arc::new(MemoryChannelStore::new())).unwrap();
        (mw, engine)
    }

    #[test]
    fn test_start_and_stop() {
        let (mw, engine) = engine();
        let channels = engine.managers().unwrap();
        let channel = channels.channels.by_index(1).unwrap();

        engine.start(&channel).unwrap();
        let live = engine.current_route().unwrap();
        assert_eq!(engine.current_service_index().unwrap(), Some(channel.service_index));
        assert_eq!(mw.window(live), Some(VideoPlacement::FULL_SCREEN));

        engine.stop().unwrap();
        assert_eq!(engine.current_service_index().unwrap(), None);
    }

    #[test]
    fn test_failed_stop_keeps_current_route() {
        let (mw, engine) = engine();
        let channel = engine.managers().unwrap().channels.by_display_number("03").unwrap();
        engine.start(&channel).unwrap();
        let live = engine.current_route().unwrap();

        mw.fail_stop(true);
        assert!(matches!(engine.stop(), Err(EngineError::Middleware(_))));
        assert_eq!(engine.current_route().unwrap(), live);
        assert_eq!(engine.current_service_index().unwrap(), Some(channel.service_index));

        mw.fail_stop(false);
        engine.stop().unwrap();
        assert_eq!(mw.active_service(live).unwrap(), None);
    }

    #[test]
    fn test_start_cable_channel() {
        let (mw, engine) = engine();
        let managers = engine.managers().unwrap();
        let channel = managers.channels.by_display_number("03").unwrap();
        assert_eq!(channel.source_type, SourceType::Cable);

        engine.start(&channel).unwrap();
        let live = engine.current_route().unwrap();
        let cable = managers.routes.by_role(RouteRole::Cable).and_then(|b| b.live).unwrap();
        assert_eq!(live, cable.handle);
        assert_ne!(Some(live), managers.routes.main_live_route().map(|r| r.handle));
        assert_eq!(mw.active_service(live).unwrap(), Some(channel.service_index));
    }

    #[test]
    fn test_start_unknown_source_type() {
        let (_, engine) = engine();
        let mut channel = engine.managers().unwrap().channels.by_index(0).unwrap();
        channel.source_type = SourceType::Satellite;
        assert!(matches!(
            engine.start(&channel),
            Err(EngineError::RouteNotFound(_))
        ));
        channel.source_type = SourceType::Undefined;
        assert!(matches!(
            engine.start(&channel),
            Err(EngineError::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_routes_swaps_managers() {
        let (_, engine) = engine();
        let before = engine.managers().unwrap();
        engine.resolve_routes().unwrap();
        let after = engine.managers().unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before.routes, *after.routes);
        // The old snapshot stays usable by whoever holds it.
        assert!(before.routes.main_live_route().is_some());
    }

    #[test]
    fn test_failed_resolve_keeps_previous_managers() {
        let (mw, engine) = engine();
        let before = engine.managers().unwrap();
        mw.fail_route_requests(true);

        assert!(matches!(
            engine.resolve_routes(),
            Err(EngineError::CapabilitySourceUnavailable(_))
        ));
        assert!(Arc::ptr_eq(&before, &engine.managers().unwrap()));
    }

    #[test]
    fn test_deinit() {
        let (_, engine) = engine();
        let channel = engine.managers().unwrap().channels.by_index(0).unwrap();
        engine.start(&channel).unwrap();

        engine.deinit();
        assert!(!engine.is_active());
        assert!(matches!(engine.managers(), Err(EngineError::NotConnected)));
        assert!(matches!(engine.resolve_routes(), Err(EngineError::NotConnected)));
    }
}
