//! Route topology: candidate enumeration, role classification and lookup.

mod classify;
mod enumerate;
mod manager;

pub use classify::{classify, Classification, Predicate, Rule, Slot, BROADCAST_RULES, PLAYBACK_RULES};
pub use enumerate::enumerate;
pub use manager::{PlaybackBundle, RouteBundle, RouteManager};

use std::fmt;

use tvbridge_protocol::{
    DecoderDescriptor, FrontendDescriptor, FrontendType, IoDescriptor, SourceType,
    StorageDescriptor,
};

/// Opaque route handle issued by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteHandle(pub u32);

impl fmt::Display for RouteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Frontend -> demux path used for scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallRoute {
    pub handle: RouteHandle,
    pub frontend: FrontendDescriptor,
    pub demux: u32,
}

/// Frontend -> demux -> decoder -> output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRoute {
    pub handle: RouteHandle,
    pub frontend: FrontendDescriptor,
    pub demux: u32,
    pub decoder: DecoderDescriptor,
    pub output: IoDescriptor,
}

/// Frontend -> demux -> storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRoute {
    pub handle: RouteHandle,
    pub frontend: FrontendDescriptor,
    pub demux: u32,
    pub storage: StorageDescriptor,
}

/// Storage -> demux -> decoder -> output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackRoute {
    pub handle: RouteHandle,
    pub storage: StorageDescriptor,
    pub demux: u32,
    pub decoder: DecoderDescriptor,
    pub output: IoDescriptor,
}

/// Every candidate route of one resolve pass, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateRoutes {
    pub install: Vec<InstallRoute>,
    pub live: Vec<LiveRoute>,
    pub record: Vec<RecordRoute>,
    pub playback: Vec<PlaybackRoute>,
}

/// Members of a candidate the classifier looks at.
pub trait RouteMembers {
    fn frontend(&self) -> Option<&FrontendDescriptor>;
    fn decoder(&self) -> Option<&DecoderDescriptor>;
}

impl RouteMembers for InstallRoute {
    fn frontend(&self) -> Option<&FrontendDescriptor> {
        Some(&self.frontend)
    }

    fn decoder(&self) -> Option<&DecoderDescriptor> {
        None
    }
}

impl RouteMembers for LiveRoute {
    fn frontend(&self) -> Option<&FrontendDescriptor> {
        Some(&self.frontend)
    }

    fn decoder(&self) -> Option<&DecoderDescriptor> {
        Some(&self.decoder)
    }
}

impl RouteMembers for RecordRoute {
    fn frontend(&self) -> Option<&FrontendDescriptor> {
        Some(&self.frontend)
    }

    fn decoder(&self) -> Option<&DecoderDescriptor> {
        None
    }
}

impl RouteMembers for PlaybackRoute {
    fn frontend(&self) -> Option<&FrontendDescriptor> {
        None
    }

    fn decoder(&self) -> Option<&DecoderDescriptor> {
        Some(&self.decoder)
    }
}

/// Named role a broadcast route bundle plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteRole {
    Terrestrial,
    Cable,
    Satellite,
    IpPrimary,
    IpPip,
    IpSecondary,
}

impl RouteRole {
    /// All roles in classification order.
    pub const ALL: [RouteRole; 6] = [
        RouteRole::Terrestrial,
        RouteRole::Cable,
        RouteRole::Satellite,
        RouteRole::IpPrimary,
        RouteRole::IpPip,
        RouteRole::IpSecondary,
    ];

    /// Frontend type an install route of this role is configured for.
    pub fn frontend_type(self) -> FrontendType {
        match self {
            RouteRole::Terrestrial => FrontendType::Terrestrial,
            RouteRole::Cable => FrontendType::Cable,
            RouteRole::Satellite => FrontendType::Satellite,
            RouteRole::IpPrimary | RouteRole::IpPip | RouteRole::IpSecondary => FrontendType::Ip,
        }
    }

    /// Role serving channels of the given source type.
    ///
    /// Analog and PVR channels are carried on the satellite bundle.
    pub fn for_source_type(source: SourceType) -> Option<RouteRole> {
        match source {
            SourceType::Terrestrial => Some(RouteRole::Terrestrial),
            SourceType::Cable => Some(RouteRole::Cable),
            SourceType::Satellite | SourceType::Analog | SourceType::Pvr => {
                Some(RouteRole::Satellite)
            }
            SourceType::Ip => Some(RouteRole::IpPrimary),
            SourceType::Undefined => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RouteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteRole::Terrestrial => "terrestrial",
            RouteRole::Cable => "cable",
            RouteRole::Satellite => "satellite",
            RouteRole::IpPrimary => "ip-primary",
            RouteRole::IpPip => "ip-pip",
            RouteRole::IpSecondary => "ip-secondary",
        };
        f.write_str(name)
    }
}
