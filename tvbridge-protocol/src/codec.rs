//! Codec for encoding and decoding protocol messages.
//!
//! Frame format:
//! ```text
//! +--------+--------+--------+------------------+
//! | Magic  | Length | Type   |     Payload      |
//! | "TVBR" | u32 LE | u16 LE |    (variable)    |
//! +--------+--------+--------+------------------+
//! | 4 bytes| 4 bytes| 2 bytes|  Length bytes    |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::types::*;

/// Frame header size: 4 (magic) + 4 (length) + 2 (type) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Encode a client message into bytes.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();

    match msg {
        ClientMessage::Hello { version } => {
            payload.put_u16_le(*version);
        }
        ClientMessage::Ping => {
            // Empty payload
        }
        ClientMessage::GetCount { component } => {
            payload.put_u8(*component as u8);
        }
        ClientMessage::GetFrontendDescriptor { index } => {
            payload.put_u32_le(*index);
        }
        ClientMessage::GetComponentDescriptor { component, index } => {
            payload.put_u8(*component as u8);
            payload.put_u32_le(*index);
        }
        ClientMessage::GetRoute {
            kind,
            source,
            demux,
            sink,
        } => {
            payload.put_u8(*kind as u8);
            payload.put_u32_le(*source);
            payload.put_u32_le(*demux);
            payload.put_u32_le(*sink);
        }
        ClientMessage::ConfigureLiveRoute {
            route,
            components,
            placement,
        } => {
            payload.put_u32_le(*route);
            payload.put_u8(components.bits());
            encode_placement(&mut payload, placement);
        }
        ClientMessage::ConfigureInstallRoute {
            route,
            frontend_type,
        } => {
            payload.put_u32_le(*route);
            payload.put_u8(frontend_type.to_wire());
        }
        ClientMessage::StartScan { route, mode } => {
            payload.put_u32_le(*route);
            encode_scan_mode(&mut payload, mode);
        }
        ClientMessage::AbortScan { route }
        | ClientMessage::StopService { route }
        | ClientMessage::GetActiveService { route }
        | ClientMessage::GetAudioTrackCount { route } => {
            payload.put_u32_le(*route);
        }
        ClientMessage::GetServiceCount { list } => {
            payload.put_u32_le(*list);
        }
        ClientMessage::GetServiceDescriptor { list, index } => {
            payload.put_u32_le(*list);
            payload.put_u32_le(*index);
        }
        ClientMessage::StartService { route, list, index } => {
            payload.put_u32_le(*route);
            payload.put_u32_le(*list);
            payload.put_u32_le(*index);
        }
        ClientMessage::ScaleWindow { route, placement } => {
            payload.put_u32_le(*route);
            encode_placement(&mut payload, placement);
        }
        ClientMessage::GetAudioTrack { route, index }
        | ClientMessage::SetAudioTrack { route, index } => {
            payload.put_u32_le(*route);
            payload.put_u32_le(*index);
        }
    }

    encode_frame(msg.message_type(), payload.freeze())
}

/// Encode a server message into bytes.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();

    match msg {
        ServerMessage::HelloAck { version, success } => {
            payload.put_u16_le(*version);
            payload.put_u8(if *success { 1 } else { 0 });
        }
        ServerMessage::Pong => {
            // Empty payload
        }
        ServerMessage::CountAck { count } => {
            payload.put_u32_le(*count);
        }
        ServerMessage::FrontendDescriptorAck { descriptor } => {
            payload.put_u32_le(descriptor.id);
            payload.put_u8(descriptor.types.bits());
        }
        ServerMessage::ComponentDescriptorAck { id } => {
            payload.put_u32_le(*id);
        }
        ServerMessage::RouteAck { route } => {
            payload.put_u32_le(*route);
        }
        ServerMessage::Ack {
            success,
            error_code,
        } => {
            payload.put_u8(if *success { 1 } else { 0 });
            payload.put_u16_le(*error_code);
        }
        ServerMessage::ServiceDescriptorAck { descriptor } => {
            payload.put_u32_le(descriptor.master_index);
            encode_string(&mut payload, &descriptor.name)?;
            payload.put_u8(descriptor.service_type);
            payload.put_u32_le(descriptor.frequency_khz);
            payload.put_u8(descriptor.delivery.map_or(0, FrontendType::to_wire));
        }
        ServerMessage::ActiveServiceAck { index } => {
            encode_optional_u32(&mut payload, index);
        }
        ServerMessage::AudioTrackAck { track } => {
            payload.put_u32_le(track.index);
            encode_string(&mut payload, &track.language)?;
            payload.put_u8(track.track_type as u8);
        }
        ServerMessage::Error {
            error_code,
            message,
        } => {
            payload.put_u16_le(*error_code);
            encode_string(&mut payload, message)?;
        }
    }

    encode_frame(msg.message_type(), payload.freeze())
}

/// Encode a frame with magic, length, type, and payload.
fn encode_frame(msg_type: MessageType, payload: Bytes) -> Result<Bytes, ProtocolError> {
    let payload_len = payload.len() as u32;
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&MAGIC);
    frame.put_u32_le(payload_len);
    frame.put_u16_le(msg_type.into());
    frame.put_slice(&payload);

    Ok(frame.freeze())
}

fn need(buf: &Bytes, expected: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < expected {
        return Err(ProtocolError::IncompleteFrame {
            expected,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn encode_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(ProtocolError::EncodeError(format!(
            "string too long: {} bytes",
            bytes.len()
        )));
    }
    buf.put_u16_le(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

fn decode_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    need(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    need(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::DecodeError(e.to_string()))
}

fn encode_optional_u32(buf: &mut BytesMut, val: &Option<u32>) {
    match val {
        Some(v) => {
            buf.put_u8(1);
            buf.put_u32_le(*v);
        }
        None => {
            buf.put_u8(0);
        }
    }
}

fn decode_optional_u32(buf: &mut Bytes) -> Result<Option<u32>, ProtocolError> {
    need(buf, 1)?;
    if buf.get_u8() != 0 {
        need(buf, 4)?;
        Ok(Some(buf.get_u32_le()))
    } else {
        Ok(None)
    }
}

fn encode_optional_u8(buf: &mut BytesMut, val: Option<u8>) {
    match val {
        Some(v) => {
            buf.put_u8(1);
            buf.put_u8(v);
        }
        None => {
            buf.put_u8(0);
        }
    }
}

fn decode_optional_u8(buf: &mut Bytes) -> Result<Option<u8>, ProtocolError> {
    need(buf, 1)?;
    if buf.get_u8() != 0 {
        need(buf, 1)?;
        Ok(Some(buf.get_u8()))
    } else {
        Ok(None)
    }
}

fn encode_placement(buf: &mut BytesMut, placement: &VideoPlacement) {
    buf.put_u32_le(placement.x);
    buf.put_u32_le(placement.y);
    buf.put_u32_le(placement.width);
    buf.put_u32_le(placement.height);
}

fn decode_placement(buf: &mut Bytes) -> Result<VideoPlacement, ProtocolError> {
    need(buf, 16)?;
    Ok(VideoPlacement {
        x: buf.get_u32_le(),
        y: buf.get_u32_le(),
        width: buf.get_u32_le(),
        height: buf.get_u32_le(),
    })
}

fn encode_scan_mode(buf: &mut BytesMut, mode: &ScanMode) {
    match mode {
        ScanMode::Auto => {
            buf.put_u8(0);
        }
        ScanMode::Manual(params) => {
            buf.put_u8(1);
            buf.put_u32_le(params.frequency_khz);
            encode_optional_u32(buf, &params.symbol_rate);
            encode_optional_u8(buf, params.modulation.map(|m| m as u8));
            encode_optional_u8(buf, params.polarization.map(|p| p as u8));
        }
    }
}

fn decode_scan_mode(buf: &mut Bytes) -> Result<ScanMode, ProtocolError> {
    need(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(ScanMode::Auto),
        1 => {
            need(buf, 4)?;
            let frequency_khz = buf.get_u32_le();
            let symbol_rate = decode_optional_u32(buf)?;
            let modulation = decode_optional_u8(buf)?
                .map(|v| {
                    Modulation::try_from(v)
                        .map_err(|v| ProtocolError::DecodeError(format!("bad modulation {}", v)))
                })
                .transpose()?;
            let polarization = decode_optional_u8(buf)?
                .map(|v| {
                    Polarization::try_from(v)
                        .map_err(|v| ProtocolError::DecodeError(format!("bad polarization {}", v)))
                })
                .transpose()?;
            Ok(ScanMode::Manual(ScanParams {
                frequency_khz,
                symbol_rate,
                modulation,
                polarization,
            }))
        }
        other => Err(ProtocolError::DecodeError(format!(
            "unknown scan mode {}",
            other
        ))),
    }
}

fn decode_component(value: u8) -> Result<ComponentKind, ProtocolError> {
    ComponentKind::try_from(value)
        .map_err(|v| ProtocolError::DecodeError(format!("unknown component kind {}", v)))
}

/// Frame header information.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub message_type: MessageType,
}

/// Decode a frame header from bytes.
///
/// Returns `Ok(None)` when fewer than [`HEADER_SIZE`] bytes are buffered.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    // Check magic
    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != MAGIC {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    // Read length
    let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    // Read message type
    let type_val = u16::from_le_bytes([buf[8], buf[9]]);
    let message_type =
        MessageType::try_from(type_val).map_err(ProtocolError::UnknownMessageType)?;

    Ok(Some(FrameHeader {
        payload_len,
        message_type,
    }))
}

/// Decode a client message from its type and payload.
pub fn decode_client_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<ClientMessage, ProtocolError> {
    let buf = &mut payload;
    match msg_type {
        MessageType::Hello => {
            need(buf, 2)?;
            Ok(ClientMessage::Hello {
                version: buf.get_u16_le(),
            })
        }
        MessageType::Ping => Ok(ClientMessage::Ping),
        MessageType::GetCount => {
            need(buf, 1)?;
            let component = decode_component(buf.get_u8())?;
            Ok(ClientMessage::GetCount { component })
        }
        MessageType::GetFrontendDescriptor => {
            need(buf, 4)?;
            Ok(ClientMessage::GetFrontendDescriptor {
                index: buf.get_u32_le(),
            })
        }
        MessageType::GetComponentDescriptor => {
            need(buf, 5)?;
            let component = decode_component(buf.get_u8())?;
            let index = buf.get_u32_le();
            Ok(ClientMessage::GetComponentDescriptor { component, index })
        }
        MessageType::GetRoute => {
            need(buf, 13)?;
            let kind = RouteKind::try_from(buf.get_u8())
                .map_err(|v| ProtocolError::DecodeError(format!("unknown route kind {}", v)))?;
            let source = buf.get_u32_le();
            let demux = buf.get_u32_le();
            let sink = buf.get_u32_le();
            Ok(ClientMessage::GetRoute {
                kind,
                source,
                demux,
                sink,
            })
        }
        MessageType::ConfigureLiveRoute => {
            need(buf, 5)?;
            let route = buf.get_u32_le();
            let components = MediaComponents::from_bits_truncate(buf.get_u8());
            let placement = decode_placement(buf)?;
            Ok(ClientMessage::ConfigureLiveRoute {
                route,
                components,
                placement,
            })
        }
        MessageType::ConfigureInstallRoute => {
            need(buf, 5)?;
            let route = buf.get_u32_le();
            let raw = buf.get_u8();
            let frontend_type = FrontendType::from_wire(raw)
                .ok_or_else(|| ProtocolError::DecodeError(format!("bad frontend type {}", raw)))?;
            Ok(ClientMessage::ConfigureInstallRoute {
                route,
                frontend_type,
            })
        }
        MessageType::StartScan => {
            need(buf, 4)?;
            let route = buf.get_u32_le();
            let mode = decode_scan_mode(buf)?;
            Ok(ClientMessage::StartScan { route, mode })
        }
        MessageType::AbortScan => {
            need(buf, 4)?;
            Ok(ClientMessage::AbortScan {
                route: buf.get_u32_le(),
            })
        }
        MessageType::GetServiceCount => {
            need(buf, 4)?;
            Ok(ClientMessage::GetServiceCount {
                list: buf.get_u32_le(),
            })
        }
        MessageType::GetServiceDescriptor => {
            need(buf, 8)?;
            let list = buf.get_u32_le();
            let index = buf.get_u32_le();
            Ok(ClientMessage::GetServiceDescriptor { list, index })
        }
        MessageType::StartService => {
            need(buf, 12)?;
            let route = buf.get_u32_le();
            let list = buf.get_u32_le();
            let index = buf.get_u32_le();
            Ok(ClientMessage::StartService { route, list, index })
        }
        MessageType::StopService => {
            need(buf, 4)?;
            Ok(ClientMessage::StopService {
                route: buf.get_u32_le(),
            })
        }
        MessageType::GetActiveService => {
            need(buf, 4)?;
            Ok(ClientMessage::GetActiveService {
                route: buf.get_u32_le(),
            })
        }
        MessageType::ScaleWindow => {
            need(buf, 4)?;
            let route = buf.get_u32_le();
            let placement = decode_placement(buf)?;
            Ok(ClientMessage::ScaleWindow { route, placement })
        }
        MessageType::GetAudioTrackCount => {
            need(buf, 4)?;
            Ok(ClientMessage::GetAudioTrackCount {
                route: buf.get_u32_le(),
            })
        }
        MessageType::GetAudioTrack => {
            need(buf, 8)?;
            let route = buf.get_u32_le();
            let index = buf.get_u32_le();
            Ok(ClientMessage::GetAudioTrack { route, index })
        }
        MessageType::SetAudioTrack => {
            need(buf, 8)?;
            let route = buf.get_u32_le();
            let index = buf.get_u32_le();
            Ok(ClientMessage::SetAudioTrack { route, index })
        }
        other => Err(ProtocolError::UnknownMessageType(other.into())),
    }
}

/// Decode a server message from its type and payload.
pub fn decode_server_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<ServerMessage, ProtocolError> {
    let buf = &mut payload;
    match msg_type {
        MessageType::HelloAck => {
            need(buf, 3)?;
            let version = buf.get_u16_le();
            let success = buf.get_u8() != 0;
            Ok(ServerMessage::HelloAck { version, success })
        }
        MessageType::Pong => Ok(ServerMessage::Pong),
        MessageType::CountAck => {
            need(buf, 4)?;
            Ok(ServerMessage::CountAck {
                count: buf.get_u32_le(),
            })
        }
        MessageType::FrontendDescriptorAck => {
            need(buf, 5)?;
            let id = buf.get_u32_le();
            let types = FrontendTypes::from_bits_truncate(buf.get_u8());
            Ok(ServerMessage::FrontendDescriptorAck {
                descriptor: FrontendDescriptor { id, types },
            })
        }
        MessageType::ComponentDescriptorAck => {
            need(buf, 4)?;
            Ok(ServerMessage::ComponentDescriptorAck {
                id: buf.get_u32_le(),
            })
        }
        MessageType::RouteAck => {
            need(buf, 4)?;
            Ok(ServerMessage::RouteAck {
                route: buf.get_u32_le(),
            })
        }
        MessageType::Ack => {
            need(buf, 3)?;
            let success = buf.get_u8() != 0;
            let error_code = buf.get_u16_le();
            Ok(ServerMessage::Ack {
                success,
                error_code,
            })
        }
        MessageType::ServiceDescriptorAck => {
            need(buf, 4)?;
            let master_index = buf.get_u32_le();
            let name = decode_string(buf)?;
            need(buf, 6)?;
            let service_type = buf.get_u8();
            let frequency_khz = buf.get_u32_le();
            let delivery = FrontendType::from_wire(buf.get_u8());
            Ok(ServerMessage::ServiceDescriptorAck {
                descriptor: ServiceDescriptor {
                    master_index,
                    name,
                    service_type,
                    frequency_khz,
                    delivery,
                },
            })
        }
        MessageType::ActiveServiceAck => {
            let index = decode_optional_u32(buf)?;
            Ok(ServerMessage::ActiveServiceAck { index })
        }
        MessageType::AudioTrackAck => {
            need(buf, 4)?;
            let index = buf.get_u32_le();
            let language = decode_string(buf)?;
            need(buf, 1)?;
            let track_type = AudioTrackType::from(buf.get_u8());
            Ok(ServerMessage::AudioTrackAck {
                track: AudioTrack {
                    index,
                    language,
                    track_type,
                },
            })
        }
        MessageType::Error => {
            need(buf, 2)?;
            let error_code = buf.get_u16_le();
            let message = decode_string(buf)?;
            Ok(ServerMessage::Error {
                error_code,
                message,
            })
        }
        other => Err(ProtocolError::UnknownMessageType(other.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_round_trip(msg: ClientMessage) -> ClientMessage {
        let encoded = encode_client_message(&msg).unwrap();
        let header = decode_header(&encoded).unwrap().unwrap();
        assert_eq!(header.message_type, msg.message_type());
        let payload = Bytes::copy_from_slice(&encoded[HEADER_SIZE..]);
        decode_client_message(header.message_type, payload).unwrap()
    }

    fn server_round_trip(msg: ServerMessage) -> ServerMessage {
        let encoded = encode_server_message(&msg).unwrap();
        let header = decode_header(&encoded).unwrap().unwrap();
        let payload = Bytes::copy_from_slice(&encoded[HEADER_SIZE..]);
        decode_server_message(header.message_type, payload).unwrap()
    }

    #[test]
    fn test_encode_decode_hello() {
        let msg = ClientMessage::Hello { version: 1 };
        let encoded = encode_client_message(&msg).unwrap();

        // Verify header
        assert_eq!(&encoded[0..4], &MAGIC);
        let header = decode_header(&encoded).unwrap().unwrap();
        assert_eq!(header.message_type, MessageType::Hello);
        assert_eq!(header.payload_len, 2);

        assert_eq!(client_round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_encode_decode_get_route() {
        let msg = ClientMessage::GetRoute {
            kind: RouteKind::Playback,
            source: 7,
            demux: DEMUX_PLACEHOLDER,
            sink: 2,
        };
        assert_eq!(client_round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_encode_decode_configure_live_route() {
        let msg = ClientMessage::ConfigureLiveRoute {
            route: 3,
            components: MediaComponents::VIDEO | MediaComponents::TELETEXT,
            placement: VideoPlacement::new(10, 20, 640, 360),
        };
        assert_eq!(client_round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_encode_decode_manual_scan() {
        let msg = ClientMessage::StartScan {
            route: 1,
            mode: ScanMode::Manual(ScanParams {
                frequency_khz: 11_494_000,
                symbol_rate: Some(22_000),
                modulation: Some(Modulation::Psk8),
                polarization: Some(Polarization::Horizontal),
            }),
        };
        assert_eq!(client_round_trip(msg.clone()), msg);

        let auto = ClientMessage::StartScan {
            route: 1,
            mode: ScanMode::Auto,
        };
        assert_eq!(client_round_trip(auto.clone()), auto);
    }

    #[test]
    fn test_encode_decode_frontend_descriptor() {
        let msg = ServerMessage::FrontendDescriptorAck {
            descriptor: FrontendDescriptor {
                id: 4,
                types: FrontendTypes::CAB | FrontendTypes::TER,
            },
        };
        assert_eq!(server_round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_encode_decode_service_and_audio() {
        let msg = ServerMessage::ServiceDescriptorAck {
            descriptor: ServiceDescriptor {
                master_index: 12,
                name: "Das Erste HD".to_string(),
                service_type: 0x19,
                frequency_khz: 474_000,
                delivery: Some(FrontendType::Terrestrial),
            },
        };
        assert_eq!(server_round_trip(msg.clone()), msg);

        let msg = ServerMessage::ServiceDescriptorAck {
            descriptor: ServiceDescriptor {
                master_index: 3,
                name: "arte HD".to_string(),
                service_type: 0x19,
                frequency_khz: 330_000,
                delivery: None,
            },
        };
        assert_eq!(server_round_trip(msg.clone()), msg);

        let msg = ServerMessage::AudioTrackAck {
            track: AudioTrack {
                index: 1,
                language: "deu".to_string(),
                track_type: AudioTrackType::Ac3,
            },
        };
        assert_eq!(server_round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_active_service_none() {
        let msg = ServerMessage::ActiveServiceAck { index: None };
        assert_eq!(server_round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_invalid_magic() {
        let bad_frame = b"BADPxxxx\x00\x00";
        let result = decode_header(bad_frame);
        assert!(matches!(result, Err(ProtocolError::InvalidMagic(_))));
    }

    #[test]
    fn test_incomplete_header() {
        let partial = b"TVBR\x00";
        let result = decode_header(partial).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_truncated_payload() {
        let result = decode_client_message(MessageType::GetRoute, Bytes::from_static(&[1, 0, 0]));
        assert!(matches!(
            result,
            Err(ProtocolError::IncompleteFrame { expected: 13, actual: 3 })
        ));
    }

    #[test]
    fn test_server_type_rejected_as_client_message() {
        let result = decode_client_message(MessageType::RouteAck, Bytes::new());
        assert_eq!(result, Err(ProtocolError::UnknownMessageType(0x0107)));
    }
}
