//! Wire protocol and shared descriptor types for the tvbridge middleware link.
//!
//! This crate defines the binary protocol spoken between the tvbridge engine
//! and a broadcast middleware (or the bundled simulator), together with the
//! descriptor types both sides agree on: frontend types, route kinds,
//! component masks and service descriptors.
//!
//! # Frame Format
//!
//! ```text
//! +--------+--------+--------+------------------+
//! | Magic  | Length | Type   |     Payload      |
//! | "TVBR" | u32 LE | u16 LE |    (variable)    |
//! +--------+--------+--------+------------------+
//! | 4 bytes| 4 bytes| 2 bytes|  Length bytes    |
//! ```
//!
//! # Example
//!
//! ```rust
//! use tvbridge_protocol::{ClientMessage, RouteKind, encode_client_message, decode_header, decode_client_message};
//! use bytes::Bytes;
//!
//! let msg = ClientMessage::GetRoute { kind: RouteKind::Live, source: 0, demux: 0, sink: 1 };
//! let encoded = encode_client_message(&msg).unwrap();
//!
//! let header = decode_header(&encoded).unwrap().unwrap();
//! let payload = Bytes::copy_from_slice(&encoded[10..]);
//! let decoded = decode_client_message(header.message_type, payload).unwrap();
//! assert_eq!(decoded, msg);
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    decode_client_message, decode_header, decode_server_message, encode_client_message,
    encode_server_message, FrameHeader, HEADER_SIZE,
};
pub use error::{ErrorCode, ProtocolError};
pub use types::{
    AudioTrack, AudioTrackType, ClientMessage, ComponentKind, DecoderDescriptor,
    FrontendDescriptor, FrontendType, FrontendTypes, IoDescriptor, MediaComponents, MessageType,
    Modulation, Polarization, RouteKind, ScanMode, ScanParams, ServerMessage, ServiceDescriptor,
    SourceType, StorageDescriptor, VideoPlacement, DEMUX_PLACEHOLDER, MAGIC, MASTER_LIST_INDEX,
    MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
