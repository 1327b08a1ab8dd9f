//! Channel list management.
//!
//! Channels are persisted by an external [`ChannelStore`]; the manager keeps
//! an in-memory copy and rebuilds both from the middleware service list.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tvbridge_protocol::{ScanMode, ScanParams, SourceType, MASTER_LIST_INDEX};

use crate::error::EngineError;
use crate::middleware::{Middleware, ScanControl};
use crate::route::{RouteManager, RouteRole};

/// Service names the middleware puts in the master list as placeholders.
const PLACEHOLDER_SERVICES: [&str; 2] = ["IP VOD", "DVB-C VOD"];

/// A channel as stored by the channel store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Store assigned id, `0` until stored.
    pub id: u64,
    /// Two digit display number ("01", "02", ...).
    pub display_number: String,
    pub name: String,
    /// Index of the service in the middleware master list.
    pub service_index: u32,
    pub source_type: SourceType,
    pub service_type: u8,
}

/// Persistent channel storage.
pub trait ChannelStore: Send + Sync {
    /// Every stored channel, in display order.
    fn load(&self) -> Result<Vec<ChannelDescriptor>, EngineError>;

    /// Replace the stored channels, assigning ids.
    fn replace_all(&self, channels: Vec<ChannelDescriptor>) -> Result<(), EngineError>;
}

/// Channel store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryChannelStore {
    channels: Mutex<Vec<ChannelDescriptor>>,
    next_id: Mutex<u64>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelStore for MemoryChannelStore {
    fn load(&self) -> Result<Vec<ChannelDescriptor>, EngineError> {
        Ok(self.channels.lock().clone())
    }

    fn replace_all(&self, mut channels: Vec<ChannelDescriptor>) -> Result<(), EngineError> {
        let mut next_id = self.next_id.lock();
        for channel in &mut channels {
            *next_id += 1;
            channel.id = *next_id;
        }
        *self.channels.lock() = channels;
        Ok(())
    }
}

/// Channel list plus scan control for one resolved topology.
pub struct ChannelManager {
    middleware: Arc<dyn Middleware>,
    store: Arc<dyn ChannelStore>,
    routes: Arc<RouteManager>,
    channels: RwLock<Vec<ChannelDescriptor>>,
}

impl ChannelManager {
    pub fn new(
        middleware: Arc<dyn Middleware>,
        store: Arc<dyn ChannelStore>,
        routes: Arc<RouteManager>,
    ) -> Self {
        Self {
            middleware,
            store,
            routes,
            channels: RwLock::new(Vec::new()),
        }
    }

    /// Load stored channels, building the list from the middleware when the
    /// store is empty.
    pub fn init(&self) -> Result<(), EngineError> {
        let stored = self.store.load()?;
        if stored.is_empty() {
            info!("[Channels] store empty, building channel list");
            return self.refresh_channel_list();
        }
        debug!("[Channels] loaded {} channels", stored.len());
        *self.channels.write() = stored;
        Ok(())
    }

    /// Rebuild the store from the middleware master service list.
    ///
    /// Placeholder services are skipped; display numbers are consecutive
    /// from "01". Each channel takes the delivery system of its service,
    /// or the device source type when the middleware does not report one.
    pub fn refresh_channel_list(&self) -> Result<(), EngineError> {
        let fallback = self.routes.source_type();
        let count = self.channel_list_size()?;
        let mut channels = Vec::with_capacity(count as usize);

        for index in 0..count {
            let service = self.middleware.service_descriptor(MASTER_LIST_INDEX, index)?;
            if PLACEHOLDER_SERVICES
                .iter()
                .any(|placeholder| service.name.contains(placeholder))
            {
                debug!("[Channels] skipping placeholder service '{}'", service.name);
                continue;
            }
            channels.push(ChannelDescriptor {
                id: 0,
                display_number: format!("{:02}", channels.len() + 1),
                name: service.name,
                service_index: service.master_index,
                source_type: service.delivery.map_or(fallback, SourceType::from),
                service_type: service.service_type,
            });
        }

        self.store.replace_all(channels)?;
        let stored = self.store.load()?;
        info!("[Channels] channel list refreshed: {} channels", stored.len());
        *self.channels.write() = stored;
        Ok(())
    }

    /// Number of services in the middleware master list.
    pub fn channel_list_size(&self) -> Result<u32, EngineError> {
        Ok(self.middleware.service_count(MASTER_LIST_INDEX)?)
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    pub fn all(&self) -> Vec<ChannelDescriptor> {
        self.channels.read().clone()
    }

    pub fn by_id(&self, id: u64) -> Option<ChannelDescriptor> {
        self.channels.read().iter().find(|c| c.id == id).cloned()
    }

    /// Channel carrying the given master list index.
    pub fn by_service_index(&self, service_index: u32) -> Option<ChannelDescriptor> {
        self.channels
            .read()
            .iter()
            .find(|c| c.service_index == service_index)
            .cloned()
    }

    /// Channel at a position of the list.
    pub fn by_index(&self, index: usize) -> Option<ChannelDescriptor> {
        self.channels.read().get(index).cloned()
    }

    /// Channel shown under `number` ("01", "02", ...).
    pub fn by_display_number(&self, number: &str) -> Result<ChannelDescriptor, EngineError> {
        self.channels
            .read()
            .iter()
            .find(|c| c.display_number == number)
            .cloned()
            .ok_or_else(|| EngineError::ChannelNotFound(number.to_string()))
    }

    /// Scan every frequency of `source`.
    pub fn start_auto_scan(&self, source: SourceType) -> Result<(), EngineError> {
        self.start_scan(source, ScanMode::Auto)
    }

    /// Scan a single transponder of `source`.
    pub fn start_manual_scan(&self, source: SourceType, params: ScanParams) -> Result<(), EngineError> {
        self.start_scan(source, ScanMode::Manual(params))
    }

    fn start_scan(&self, source: SourceType, mode: ScanMode) -> Result<(), EngineError> {
        let role = RouteRole::for_source_type(source)
            .ok_or_else(|| EngineError::RouteNotFound(format!("source type {}", source)))?;
        let install = self
            .routes
            .by_role(role)
            .and_then(|bundle| bundle.install)
            .ok_or_else(|| EngineError::RouteNotFound(format!("{} install route", role)))?;

        info!("[Channels] starting {} scan on {} ({:?})", source, install.handle, mode);
        self.middleware
            .configure_install_route(install.handle, role.frontend_type())?;
        self.middleware.start_scan(install.handle, mode)?;
        Ok(())
    }

    /// Abort the scan on the main install route.
    pub fn stop_scan(&self) -> Result<(), EngineError> {
        let handle = self.routes.main_install_route_handle()?;
        info!("[Channels] aborting scan on {}", handle);
        self.middleware.abort_scan(handle)?;
        Ok(())
    }
}
