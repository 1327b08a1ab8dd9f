//! Message and descriptor type definitions for the tvbridge middleware protocol.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Magic bytes for frame header: "TVBR" (TV BRidge).
pub const MAGIC: [u8; 4] = *b"TVBR";

/// Maximum frame payload size (1 MB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Demux id used for every route. The middleware does not address
/// demultiplexers independently.
pub const DEMUX_PLACEHOLDER: u32 = 0;

/// Index of the master service list.
pub const MASTER_LIST_INDEX: u32 = 0;

/// Signal type a frontend can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrontendType {
    /// Digital terrestrial.
    #[serde(rename = "ter", alias = "terrestrial")]
    Terrestrial,
    /// Cable.
    #[serde(rename = "cab", alias = "cable")]
    Cable,
    /// Satellite.
    #[serde(rename = "sat", alias = "satellite")]
    Satellite,
    /// IP delivered.
    #[serde(rename = "ip")]
    Ip,
}

impl FrontendType {
    /// Short tag used in logs and on the command line.
    pub fn tag(&self) -> &'static str {
        match self {
            FrontendType::Terrestrial => "TER",
            FrontendType::Cable => "CAB",
            FrontendType::Satellite => "SAT",
            FrontendType::Ip => "IP",
        }
    }

    /// Decode a single frontend type from its wire value.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(FrontendType::Terrestrial),
            0x02 => Some(FrontendType::Cable),
            0x04 => Some(FrontendType::Satellite),
            0x08 => Some(FrontendType::Ip),
            _ => None,
        }
    }

    /// Wire value of this frontend type.
    pub fn to_wire(self) -> u8 {
        FrontendTypes::from(self).bits()
    }
}

bitflags! {
    /// Set of signal types supported by one physical frontend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrontendTypes: u8 {
        const TER = 0x01;
        const CAB = 0x02;
        const SAT = 0x04;
        const IP = 0x08;
    }
}

impl From<FrontendType> for FrontendTypes {
    fn from(value: FrontendType) -> Self {
        match value {
            FrontendType::Terrestrial => FrontendTypes::TER,
            FrontendType::Cable => FrontendTypes::CAB,
            FrontendType::Satellite => FrontendTypes::SAT,
            FrontendType::Ip => FrontendTypes::IP,
        }
    }
}

impl FromIterator<FrontendType> for FrontendTypes {
    fn from_iter<I: IntoIterator<Item = FrontendType>>(iter: I) -> Self {
        iter.into_iter()
            .fold(FrontendTypes::empty(), |acc, t| acc | FrontendTypes::from(t))
    }
}

impl FrontendTypes {
    /// Check whether the set carries the given type tag.
    pub fn has(&self, frontend_type: FrontendType) -> bool {
        self.contains(FrontendTypes::from(frontend_type))
    }
}

impl fmt::Display for FrontendTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = [
            FrontendType::Terrestrial,
            FrontendType::Cable,
            FrontendType::Satellite,
            FrontendType::Ip,
        ]
        .iter()
        .filter(|t| self.has(**t))
        .map(|t| t.tag())
        .collect();
        if tags.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", tags.join("|"))
        }
    }
}

bitflags! {
    /// Elementary stream components a live route should carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MediaComponents: u8 {
        const VIDEO = 0x01;
        const AUDIO = 0x02;
        const SUBTITLE = 0x04;
        const CLOSED_CAPTION = 0x08;
        const TELETEXT = 0x10;
    }
}

/// Video window placement on the output, in output pixels.
///
/// An all-zero placement asks the middleware for its default window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoPlacement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl VideoPlacement {
    /// Full 1080p screen.
    pub const FULL_SCREEN: VideoPlacement = VideoPlacement::new(0, 0, 1920, 1080);

    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Frontend descriptor reported by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrontendDescriptor {
    /// Frontend id used when requesting routes.
    pub id: u32,
    /// Signal types this frontend can receive.
    pub types: FrontendTypes,
}

/// Decoder descriptor reported by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderDescriptor {
    pub id: u32,
}

/// Mass storage descriptor reported by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageDescriptor {
    pub id: u32,
}

/// Input/output sink descriptor reported by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoDescriptor {
    pub id: u32,
}

/// Hardware component classes the middleware counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComponentKind {
    Frontend = 0,
    MassStorage = 1,
    Decoder = 2,
    InputOutput = 3,
}

impl TryFrom<u8> for ComponentKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(ComponentKind::Frontend),
            1 => Ok(ComponentKind::MassStorage),
            2 => Ok(ComponentKind::Decoder),
            3 => Ok(ComponentKind::InputOutput),
            _ => Err(value),
        }
    }
}

/// Kind of signal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RouteKind {
    /// Frontend -> demux, used for channel scanning.
    Install = 0,
    /// Frontend -> demux -> decoder -> output.
    Live = 1,
    /// Frontend -> demux -> storage.
    Record = 2,
    /// Storage -> demux -> decoder -> output.
    Playback = 3,
}

impl TryFrom<u8> for RouteKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(RouteKind::Install),
            1 => Ok(RouteKind::Live),
            2 => Ok(RouteKind::Record),
            3 => Ok(RouteKind::Playback),
            _ => Err(value),
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteKind::Install => "install",
            RouteKind::Live => "live",
            RouteKind::Record => "record",
            RouteKind::Playback => "playback",
        };
        f.write_str(name)
    }
}

/// Source type of a channel, as stored by the channel store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Undefined,
    Terrestrial,
    Cable,
    Satellite,
    Ip,
    Analog,
    Pvr,
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ter" | "terrestrial" | "dvb-t" => Ok(SourceType::Terrestrial),
            "cab" | "cable" | "dvb-c" => Ok(SourceType::Cable),
            "sat" | "satellite" | "dvb-s" => Ok(SourceType::Satellite),
            "ip" => Ok(SourceType::Ip),
            "analog" => Ok(SourceType::Analog),
            "pvr" => Ok(SourceType::Pvr),
            "undefined" => Ok(SourceType::Undefined),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

impl From<FrontendType> for SourceType {
    fn from(value: FrontendType) -> Self {
        match value {
            FrontendType::Terrestrial => SourceType::Terrestrial,
            FrontendType::Cable => SourceType::Cable,
            FrontendType::Satellite => SourceType::Satellite,
            FrontendType::Ip => SourceType::Ip,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Undefined => "UNDEFINED",
            SourceType::Terrestrial => "TER",
            SourceType::Cable => "CAB",
            SourceType::Satellite => "SAT",
            SourceType::Ip => "IP",
            SourceType::Analog => "ANALOG",
            SourceType::Pvr => "PVR",
        };
        f.write_str(name)
    }
}

/// Modulation used by a manual scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Modulation {
    Qpsk = 0,
    Psk8 = 1,
    Qam16 = 2,
    Qam64 = 3,
    Qam256 = 4,
}

impl TryFrom<u8> for Modulation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Modulation::Qpsk),
            1 => Ok(Modulation::Psk8),
            2 => Ok(Modulation::Qam16),
            3 => Ok(Modulation::Qam64),
            4 => Ok(Modulation::Qam256),
            _ => Err(value),
        }
    }
}

/// Satellite polarization used by a manual scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Polarization {
    Horizontal = 0,
    Vertical = 1,
    Left = 2,
    Right = 3,
}

impl TryFrom<u8> for Polarization {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(Polarization::Horizontal),
            1 => Ok(Polarization::Vertical),
            2 => Ok(Polarization::Left),
            3 => Ok(Polarization::Right),
            _ => Err(value),
        }
    }
}

/// Tuning parameters for a manual scan of a single transponder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Frequency in kHz.
    pub frequency_khz: u32,
    /// Symbol rate in kSym/s (cable and satellite).
    pub symbol_rate: Option<u32>,
    pub modulation: Option<Modulation>,
    pub polarization: Option<Polarization>,
}

impl ScanParams {
    /// Parameters for a transponder at the given frequency with middleware defaults.
    pub fn frequency(frequency_khz: u32) -> Self {
        Self {
            frequency_khz,
            symbol_rate: None,
            modulation: None,
            polarization: None,
        }
    }
}

/// Scan request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Scan every frequency of the band.
    Auto,
    /// Scan one transponder.
    Manual(ScanParams),
}

/// Service (channel) entry of a middleware service list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Index of the service in the master list.
    pub master_index: u32,
    /// Service name.
    pub name: String,
    /// DVB service type.
    pub service_type: u8,
    /// Transponder frequency in kHz.
    pub frequency_khz: u32,
    /// Delivery system the service was found on, if the middleware knows it.
    pub delivery: Option<FrontendType>,
}

/// Audio coding of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AudioTrackType {
    Mpeg = 0,
    Ac3 = 1,
    Eac3 = 2,
    Aac = 3,
    Other = 0xFF,
}

impl From<u8> for AudioTrackType {
    fn from(value: u8) -> Self {
        match value {
            0 => AudioTrackType::Mpeg,
            1 => AudioTrackType::Ac3,
            2 => AudioTrackType::Eac3,
            3 => AudioTrackType::Aac,
            _ => AudioTrackType::Other,
        }
    }
}

/// Audio track of the service running on a live route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Middleware track index.
    pub index: u32,
    /// ISO 639 language code.
    pub language: String,
    pub track_type: AudioTrackType,
}

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    // Handshake (0x00xx)
    /// Client hello with protocol version.
    Hello = 0x0001,
    /// Server hello response.
    HelloAck = 0x0002,

    // Capabilities and routes (0x01xx)
    /// Component count request.
    GetCount = 0x0100,
    /// Count response (components, services, audio tracks).
    CountAck = 0x0101,
    /// Frontend descriptor request.
    GetFrontendDescriptor = 0x0102,
    /// Frontend descriptor response.
    FrontendDescriptorAck = 0x0103,
    /// Decoder/storage/io descriptor request.
    GetComponentDescriptor = 0x0104,
    /// Decoder/storage/io descriptor response.
    ComponentDescriptorAck = 0x0105,
    /// Route handle request.
    GetRoute = 0x0106,
    /// Route handle response.
    RouteAck = 0x0107,
    /// Live route component/placement configuration.
    ConfigureLiveRoute = 0x0108,

    // Scan control (0x02xx)
    /// Install route frontend type configuration.
    ConfigureInstallRoute = 0x0200,
    /// Start auto or manual scan.
    StartScan = 0x0201,
    /// Abort a running scan.
    AbortScan = 0x0202,

    // Service control (0x03xx)
    /// Service list size request.
    GetServiceCount = 0x0300,
    /// Service descriptor request.
    GetServiceDescriptor = 0x0301,
    /// Service descriptor response.
    ServiceDescriptorAck = 0x0302,
    /// Start a service on a live route.
    StartService = 0x0303,
    /// Stop the service on a live route.
    StopService = 0x0304,
    /// Active service request.
    GetActiveService = 0x0305,
    /// Active service response.
    ActiveServiceAck = 0x0306,
    /// Video window placement.
    ScaleWindow = 0x0307,

    // Audio control (0x04xx)
    /// Audio track count request.
    GetAudioTrackCount = 0x0400,
    /// Audio track request.
    GetAudioTrack = 0x0401,
    /// Audio track response.
    AudioTrackAck = 0x0402,
    /// Select the current audio track.
    SetAudioTrack = 0x0403,

    // Misc (0xFFxx)
    /// Error response.
    Error = 0xFF00,
    /// Keep-alive ping.
    Ping = 0xFF01,
    /// Keep-alive pong.
    Pong = 0xFF02,
    /// Generic success/failure response.
    Ack = 0xFF03,
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x0001 => Ok(MessageType::Hello),
            0x0002 => Ok(MessageType::HelloAck),
            0x0100 => Ok(MessageType::GetCount),
            0x0101 => Ok(MessageType::CountAck),
            0x0102 => Ok(MessageType::GetFrontendDescriptor),
            0x0103 => Ok(MessageType::FrontendDescriptorAck),
            0x0104 => Ok(MessageType::GetComponentDescriptor),
            0x0105 => Ok(MessageType::ComponentDescriptorAck),
            0x0106 => Ok(MessageType::GetRoute),
            0x0107 => Ok(MessageType::RouteAck),
            0x0108 => Ok(MessageType::ConfigureLiveRoute),
            0x0200 => Ok(MessageType::ConfigureInstallRoute),
            0x0201 => Ok(MessageType::StartScan),
            0x0202 => Ok(MessageType::AbortScan),
            0x0300 => Ok(MessageType::GetServiceCount),
            0x0301 => Ok(MessageType::GetServiceDescriptor),
            0x0302 => Ok(MessageType::ServiceDescriptorAck),
            0x0303 => Ok(MessageType::StartService),
            0x0304 => Ok(MessageType::StopService),
            0x0305 => Ok(MessageType::GetActiveService),
            0x0306 => Ok(MessageType::ActiveServiceAck),
            0x0307 => Ok(MessageType::ScaleWindow),
            0x0400 => Ok(MessageType::GetAudioTrackCount),
            0x0401 => Ok(MessageType::GetAudioTrack),
            0x0402 => Ok(MessageType::AudioTrackAck),
            0x0403 => Ok(MessageType::SetAudioTrack),
            0xFF00 => Ok(MessageType::Error),
            0xFF01 => Ok(MessageType::Ping),
            0xFF02 => Ok(MessageType::Pong),
            0xFF03 => Ok(MessageType::Ack),
            _ => Err(value),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value as u16
    }
}

/// Messages sent from the engine to the middleware.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Client hello with protocol version.
    Hello { version: u16 },
    /// Ping for keep-alive.
    Ping,
    /// Number of components of one class.
    GetCount { component: ComponentKind },
    /// Frontend descriptor at `index`.
    GetFrontendDescriptor { index: u32 },
    /// Decoder, storage or io descriptor at `index`.
    GetComponentDescriptor { component: ComponentKind, index: u32 },
    /// Register a route and get its handle.
    ///
    /// `source` is the frontend id (storage id for playback routes),
    /// `sink` the decoder id (storage id for record routes, unused for install routes).
    GetRoute {
        kind: RouteKind,
        source: u32,
        demux: u32,
        sink: u32,
    },
    /// Select components and window placement for a live route.
    ConfigureLiveRoute {
        route: u32,
        components: MediaComponents,
        placement: VideoPlacement,
    },
    /// Select the frontend type an install route scans.
    ConfigureInstallRoute { route: u32, frontend_type: FrontendType },
    /// Start scanning on an install route.
    StartScan { route: u32, mode: ScanMode },
    /// Abort scanning on an install route.
    AbortScan { route: u32 },
    /// Number of services in a service list.
    GetServiceCount { list: u32 },
    /// Service descriptor at `index` of `list`.
    GetServiceDescriptor { list: u32, index: u32 },
    /// Start a service on a live route.
    StartService { route: u32, list: u32, index: u32 },
    /// Stop the service running on a live route.
    StopService { route: u32 },
    /// Query the service running on a live route.
    GetActiveService { route: u32 },
    /// Move/scale the video window of a live route.
    ScaleWindow { route: u32, placement: VideoPlacement },
    /// Number of audio tracks on a live route.
    GetAudioTrackCount { route: u32 },
    /// Audio track at `index` on a live route.
    GetAudioTrack { route: u32, index: u32 },
    /// Select the current audio track on a live route.
    SetAudioTrack { route: u32, index: u32 },
}

impl ClientMessage {
    /// Message type identifier for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Hello { .. } => MessageType::Hello,
            ClientMessage::Ping => MessageType::Ping,
            ClientMessage::GetCount { .. } => MessageType::GetCount,
            ClientMessage::GetFrontendDescriptor { .. } => MessageType::GetFrontendDescriptor,
            ClientMessage::GetComponentDescriptor { .. } => MessageType::GetComponentDescriptor,
            ClientMessage::GetRoute { .. } => MessageType::GetRoute,
            ClientMessage::ConfigureLiveRoute { .. } => MessageType::ConfigureLiveRoute,
            ClientMessage::ConfigureInstallRoute { .. } => MessageType::ConfigureInstallRoute,
            ClientMessage::StartScan { .. } => MessageType::StartScan,
            ClientMessage::AbortScan { .. } => MessageType::AbortScan,
            ClientMessage::GetServiceCount { .. } => MessageType::GetServiceCount,
            ClientMessage::GetServiceDescriptor { .. } => MessageType::GetServiceDescriptor,
            ClientMessage::StartService { .. } => MessageType::StartService,
            ClientMessage::StopService { .. } => MessageType::StopService,
            ClientMessage::GetActiveService { .. } => MessageType::GetActiveService,
            ClientMessage::ScaleWindow { .. } => MessageType::ScaleWindow,
            ClientMessage::GetAudioTrackCount { .. } => MessageType::GetAudioTrackCount,
            ClientMessage::GetAudioTrack { .. } => MessageType::GetAudioTrack,
            ClientMessage::SetAudioTrack { .. } => MessageType::SetAudioTrack,
        }
    }
}

/// Messages sent from the middleware to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Server hello response.
    HelloAck { version: u16, success: bool },
    /// Pong response to ping.
    Pong,
    /// Count of components, services or audio tracks.
    CountAck { count: u32 },
    /// Frontend descriptor.
    FrontendDescriptorAck { descriptor: FrontendDescriptor },
    /// Id of a decoder, storage or io component.
    ComponentDescriptorAck { id: u32 },
    /// Route handle.
    RouteAck { route: u32 },
    /// Generic result of a command.
    Ack { success: bool, error_code: u16 },
    /// Service descriptor.
    ServiceDescriptorAck { descriptor: ServiceDescriptor },
    /// Index of the service running on a route, if any.
    ActiveServiceAck { index: Option<u32> },
    /// Audio track.
    AudioTrackAck { track: AudioTrack },
    /// Error response.
    Error { error_code: u16, message: String },
}

impl ServerMessage {
    /// Message type identifier for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::HelloAck { .. } => MessageType::HelloAck,
            ServerMessage::Pong => MessageType::Pong,
            ServerMessage::CountAck { .. } => MessageType::CountAck,
            ServerMessage::FrontendDescriptorAck { .. } => MessageType::FrontendDescriptorAck,
            ServerMessage::ComponentDescriptorAck { .. } => MessageType::ComponentDescriptorAck,
            ServerMessage::RouteAck { .. } => MessageType::RouteAck,
            ServerMessage::Ack { .. } => MessageType::Ack,
            ServerMessage::ServiceDescriptorAck { .. } => MessageType::ServiceDescriptorAck,
            ServerMessage::ActiveServiceAck { .. } => MessageType::ActiveServiceAck,
            ServerMessage::AudioTrackAck { .. } => MessageType::AudioTrackAck,
            ServerMessage::Error { .. } => MessageType::Error,
        }
    }

    /// Build a successful `Ack`.
    pub fn ok() -> Self {
        ServerMessage::Ack {
            success: true,
            error_code: 0,
        }
    }
}
