//! Middleware reached over TCP.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tvbridge_protocol::{
    AudioTrack, ClientMessage, ComponentKind, DecoderDescriptor, ErrorCode, FrontendDescriptor,
    FrontendType, IoDescriptor, MediaComponents, RouteKind, ScanMode, ServerMessage,
    ServiceDescriptor, StorageDescriptor, VideoPlacement,
};

use crate::client::connection::{Connection, ConnectionState};
use crate::config::EngineConfig;
use crate::error::MiddlewareError;
use crate::middleware::{
    AudioControl, CapabilitySource, Middleware, MwResult, ScanControl, ServiceControl,
    ServiceLocator,
};
use crate::route::RouteHandle;

fn unexpected<T>(resp: ServerMessage) -> MwResult<T> {
    Err(MiddlewareError::UnexpectedResponse(format!(
        "{:?}",
        resp.message_type()
    )))
}

/// [`Middleware`] implementation speaking the wire protocol.
pub struct RemoteMiddleware {
    conn: Connection,
}

impl RemoteMiddleware {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn close(&self) {
        self.conn.close();
    }

    fn count(&self, msg: ClientMessage) -> MwResult<u32> {
        match self.conn.request(msg)? {
            ServerMessage::CountAck { count } => Ok(count),
            other => unexpected(other),
        }
    }

    fn component_id(&self, component: ComponentKind, index: u32) -> MwResult<u32> {
        match self
            .conn
            .request(ClientMessage::GetComponentDescriptor { component, index })?
        {
            ServerMessage::ComponentDescriptorAck { id } => Ok(id),
            other => unexpected(other),
        }
    }

    fn route(&self, kind: RouteKind, source: u32, demux: u32, sink: u32) -> MwResult<RouteHandle> {
        match self.conn.request(ClientMessage::GetRoute {
            kind,
            source,
            demux,
            sink,
        })? {
            ServerMessage::RouteAck { route } => {
                debug!("[Remote] {} route {} -> {} = #{}", kind, source, sink, route);
                Ok(RouteHandle(route))
            }
            other => unexpected(other),
        }
    }

    fn command(&self, msg: ClientMessage) -> MwResult<()> {
        match self.conn.request(msg)? {
            ServerMessage::Ack {
                success: true, ..
            } => Ok(()),
            ServerMessage::Ack { error_code, .. } => {
                Err(MiddlewareError::rejected(ErrorCode::from(error_code)))
            }
            other => unexpected(other),
        }
    }
}

impl CapabilitySource for RemoteMiddleware {
    fn frontend_count(&self) -> MwResult<u32> {
        self.count(ClientMessage::GetCount {
            component: ComponentKind::Frontend,
        })
    }

    fn mass_storage_count(&self) -> MwResult<u32> {
        self.count(ClientMessage::GetCount {
            component: ComponentKind::MassStorage,
        })
    }

    fn decoder_count(&self) -> MwResult<u32> {
        self.count(ClientMessage::GetCount {
            component: ComponentKind::Decoder,
        })
    }

    fn input_output_count(&self) -> MwResult<u32> {
        self.count(ClientMessage::GetCount {
            component: ComponentKind::InputOutput,
        })
    }

    fn frontend_descriptor(&self, index: u32) -> MwResult<FrontendDescriptor> {
        match self
            .conn
            .request(ClientMessage::GetFrontendDescriptor { index })?
        {
            ServerMessage::FrontendDescriptorAck { descriptor } => Ok(descriptor),
            other => unexpected(other),
        }
    }

    fn decoder_descriptor(&self, index: u32) -> MwResult<DecoderDescriptor> {
        let id = self.component_id(ComponentKind::Decoder, index)?;
        Ok(DecoderDescriptor { id })
    }

    fn storage_descriptor(&self, index: u32) -> MwResult<StorageDescriptor> {
        let id = self.component_id(ComponentKind::MassStorage, index)?;
        Ok(StorageDescriptor { id })
    }

    fn io_descriptor(&self, index: u32) -> MwResult<IoDescriptor> {
        let id = self.component_id(ComponentKind::InputOutput, index)?;
        Ok(IoDescriptor { id })
    }

    fn install_route(&self, frontend: u32, demux: u32) -> MwResult<RouteHandle> {
        self.route(RouteKind::Install, frontend, demux, 0)
    }

    fn live_route(&self, frontend: u32, demux: u32, decoder: u32) -> MwResult<RouteHandle> {
        self.route(RouteKind::Live, frontend, demux, decoder)
    }

    fn record_route(&self, frontend: u32, demux: u32, storage: u32) -> MwResult<RouteHandle> {
        self.route(RouteKind::Record, frontend, demux, storage)
    }

    fn playback_route(&self, storage: u32, demux: u32, decoder: u32) -> MwResult<RouteHandle> {
        self.route(RouteKind::Playback, storage, demux, decoder)
    }

    fn configure_live_route(
        &self,
        route: RouteHandle,
        components: MediaComponents,
        placement: VideoPlacement,
    ) -> MwResult<()> {
        self.command(ClientMessage::ConfigureLiveRoute {
            route: route.0,
            components,
            placement,
        })
    }
}

impl ServiceControl for RemoteMiddleware {
    fn service_count(&self, list: u32) -> MwResult<u32> {
        self.count(ClientMessage::GetServiceCount { list })
    }

    fn service_descriptor(&self, list: u32, index: u32) -> MwResult<ServiceDescriptor> {
        match self
            .conn
            .request(ClientMessage::GetServiceDescriptor { list, index })?
        {
            ServerMessage::ServiceDescriptorAck { descriptor } => Ok(descriptor),
            other => unexpected(other),
        }
    }

    fn start_service(&self, route: RouteHandle, list: u32, index: u32) -> MwResult<()> {
        self.command(ClientMessage::StartService {
            route: route.0,
            list,
            index,
        })
    }

    fn stop_service(&self, route: RouteHandle) -> MwResult<()> {
        self.command(ClientMessage::StopService { route: route.0 })
    }

    fn active_service(&self, route: RouteHandle) -> MwResult<Option<u32>> {
        match self
            .conn
            .request(ClientMessage::GetActiveService { route: route.0 })?
        {
            ServerMessage::ActiveServiceAck { index } => Ok(index),
            other => unexpected(other),
        }
    }

    fn scale_window(&self, route: RouteHandle, placement: VideoPlacement) -> MwResult<()> {
        self.command(ClientMessage::ScaleWindow {
            route: route.0,
            placement,
        })
    }
}

impl ScanControl for RemoteMiddleware {
    fn configure_install_route(
        &self,
        route: RouteHandle,
        frontend_type: FrontendType,
    ) -> MwResult<()> {
        self.command(ClientMessage::ConfigureInstallRoute {
            route: route.0,
            frontend_type,
        })
    }

    fn start_scan(&self, route: RouteHandle, mode: ScanMode) -> MwResult<()> {
        self.command(ClientMessage::StartScan {
            route: route.0,
            mode,
        })
    }

    fn abort_scan(&self, route: RouteHandle) -> MwResult<()> {
        self.command(ClientMessage::AbortScan { route: route.0 })
    }
}

impl AudioControl for RemoteMiddleware {
    fn audio_track_count(&self, route: RouteHandle) -> MwResult<u32> {
        self.count(ClientMessage::GetAudioTrackCount { route: route.0 })
    }

    fn audio_track(&self, route: RouteHandle, index: u32) -> MwResult<AudioTrack> {
        match self.conn.request(ClientMessage::GetAudioTrack {
            route: route.0,
            index,
        })? {
            ServerMessage::AudioTrackAck { track } => Ok(track),
            other => unexpected(other),
        }
    }

    fn set_audio_track(&self, route: RouteHandle, index: u32) -> MwResult<()> {
        self.command(ClientMessage::SetAudioTrack {
            route: route.0,
            index,
        })
    }
}

/// Locates the middleware at a fixed TCP address.
pub struct RemoteLocator {
    address: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl RemoteLocator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            address: config.address.clone(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl ServiceLocator for RemoteLocator {
    fn connect(&self, timeout: Duration) -> Option<Arc<dyn Middleware>> {
        let timeout = timeout.min(self.connect_timeout);
        match Connection::open(&self.address, timeout, self.request_timeout) {
            Ok(conn) => {
                let middleware: Arc<dyn Middleware> = Arc::new(RemoteMiddleware::new(conn));
                Some(middleware)
            }
            Err(e) => {
                debug!("[Remote] middleware at {} not reachable: {}", self.address, e);
                None
            }
        }
    }
}
