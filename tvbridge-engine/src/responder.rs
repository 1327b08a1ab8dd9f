//! Server side of the wire protocol: answers one request from a local
//! middleware implementation.

use log::{debug, warn};
use tvbridge_protocol::{ClientMessage, ComponentKind, ErrorCode, RouteKind, ServerMessage, PROTOCOL_VERSION};

use crate::error::MiddlewareError;
use crate::middleware::{Middleware, MwResult};
use crate::route::RouteHandle;

/// Answer `msg` using `middleware`.
///
/// Failed calls become `Error` responses; the session stays usable.
pub fn respond<M: Middleware + ?Sized>(middleware: &M, msg: ClientMessage) -> ServerMessage {
    let msg_type = msg.message_type();
    match dispatch(middleware, msg) {
        Ok(resp) => resp,
        Err(e) => {
            debug!("[Responder] {:?} failed: {}", msg_type, e);
            error_response(e)
        }
    }
}

fn error_response(e: MiddlewareError) -> ServerMessage {
    let (code, message) = match e {
        MiddlewareError::Remote { code, message } => (code, message),
        MiddlewareError::Protocol(e) => (ErrorCode::ProtocolError, e.to_string()),
        other => (ErrorCode::Unknown, other.to_string()),
    };
    ServerMessage::Error {
        error_code: code.into(),
        message,
    }
}

fn route(handle: MwResult<RouteHandle>) -> MwResult<ServerMessage> {
    Ok(ServerMessage::RouteAck { route: handle?.0 })
}

fn ack(result: MwResult<()>) -> MwResult<ServerMessage> {
    result.map(|()| ServerMessage::ok())
}

fn dispatch<M: Middleware + ?Sized>(mw: &M, msg: ClientMessage) -> MwResult<ServerMessage> {
    match msg {
        ClientMessage::Hello { version } => {
            let success = version == PROTOCOL_VERSION;
            if !success {
                warn!(
                    "[Responder] client protocol version {} does not match {}",
                    version, PROTOCOL_VERSION
                );
            }
            Ok(ServerMessage::HelloAck {
                version: PROTOCOL_VERSION,
                success,
            })
        }
        ClientMessage::Ping => Ok(ServerMessage::Pong),
        ClientMessage::GetCount { component } => {
            let count = match component {
                ComponentKind::Frontend => mw.frontend_count()?,
                ComponentKind::MassStorage => mw.mass_storage_count()?,
                ComponentKind::Decoder => mw.decoder_count()?,
                ComponentKind::InputOutput => mw.input_output_count()?,
            };
            Ok(ServerMessage::CountAck { count })
        }
        ClientMessage::GetFrontendDescriptor { index } => Ok(ServerMessage::FrontendDescriptorAck {
            descriptor: mw.frontend_descriptor(index)?,
        }),
        ClientMessage::GetComponentDescriptor { component, index } => {
            let id = match component {
                ComponentKind::Frontend => mw.frontend_descriptor(index)?.id,
                ComponentKind::MassStorage => mw.storage_descriptor(index)?.id,
                ComponentKind::Decoder => mw.decoder_descriptor(index)?.id,
                ComponentKind::InputOutput => mw.io_descriptor(index)?.id,
            };
            Ok(ServerMessage::ComponentDescriptorAck { id })
        }
        ClientMessage::GetRoute {
            kind,
            source,
            demux,
            sink,
        } => match kind {
            RouteKind::Install => route(mw.install_route(source, demux)),
            RouteKind::Live => route(mw.live_route(source, demux, sink)),
            RouteKind::Record => route(mw.record_route(source, demux, sink)),
            RouteKind::Playback => route(mw.playback_route(source, demux, sink)),
        },
        ClientMessage::ConfigureLiveRoute {
            route,
            components,
            placement,
        } => ack(mw.configure_live_route(RouteHandle(route), components, placement)),
        ClientMessage::ConfigureInstallRoute {
            route,
            frontend_type,
        } => ack(mw.configure_install_route(RouteHandle(route), frontend_type)),
        ClientMessage::StartScan { route, mode } => ack(mw.start_scan(RouteHandle(route), mode)),
        ClientMessage::AbortScan { route } => ack(mw.abort_scan(RouteHandle(route))),
        ClientMessage::GetServiceCount { list } => Ok(ServerMessage::CountAck {
            count: mw.service_count(list)?,
        }),
        ClientMessage::GetServiceDescriptor { list, index } => {
            Ok(ServerMessage::ServiceDescriptorAck {
                descriptor: mw.service_descriptor(list, index)?,
            })
        }
        ClientMessage::StartService { route, list, index } => {
            ack(mw.start_service(RouteHandle(route), list, index))
        }
        ClientMessage::StopService { route } => ack(mw.stop_service(RouteHandle(route))),
        ClientMessage::GetActiveService { route } => Ok(ServerMessage::ActiveServiceAck {
            index: mw.active_service(RouteHandle(route))?,
        }),
        ClientMessage::ScaleWindow { route, placement } => {
            ack(mw.scale_window(RouteHandle(route), placement))
        }
        ClientMessage::GetAudioTrackCount { route } => Ok(ServerMessage::CountAck {
            count: mw.audio_track_count(RouteHandle(route))?,
        }),
        ClientMessage::GetAudioTrack { route, index } => Ok(ServerMessage::AudioTrackAck {
            track: mw.audio_track(RouteHandle(route), index)?,
        }),
        ClientMessage::SetAudioTrack { route, index } => {
            ack(mw.set_audio_track(RouteHandle(route), index))
        }
    }
}
