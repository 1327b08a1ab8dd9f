//! Resolved route topology of one middleware connection.

use log::{debug, info};
use tvbridge_protocol::{MediaComponents, SourceType, VideoPlacement};

use crate::error::EngineError;
use crate::middleware::CapabilitySource;

use super::classify::{classify, Classification, Slot, BROADCAST_RULES, PLAYBACK_RULES};
use super::enumerate::enumerate;
use super::{
    CandidateRoutes, InstallRoute, LiveRoute, PlaybackRoute, RecordRoute, RouteHandle, RouteRole,
};

/// Install, live and record routes serving one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteBundle {
    pub role: RouteRole,
    pub install: Option<InstallRoute>,
    pub live: Option<LiveRoute>,
    pub record: Option<RecordRoute>,
}

impl RouteBundle {
    /// True when no member was classified into this bundle.
    pub fn is_empty(&self) -> bool {
        self.install.is_none() && self.live.is_none() && self.record.is_none()
    }
}

/// Playback routes for the main window and picture-in-picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackBundle {
    pub main: Option<PlaybackRoute>,
    pub pip: Option<PlaybackRoute>,
}

/// Classified routes, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteManager {
    candidates: CandidateRoutes,
    bundles: [RouteBundle; 6],
    playback: PlaybackBundle,
}

fn pick<T: Copy>(routes: &[T], classification: &Classification, role: RouteRole) -> Option<T> {
    classification
        .get(Slot::Role(role))
        .map(|index| routes[index])
}

impl RouteManager {
    /// Enumerate, classify and configure the routes of `source`.
    ///
    /// Nothing is returned unless every capability call succeeds.
    pub fn resolve<S>(source: &S) -> Result<Self, EngineError>
    where
        S: CapabilitySource + ?Sized,
    {
        let manager = Self::from_candidates(enumerate(source)?);
        manager.configure_ip_live_routes(source)?;

        for bundle in manager.bundles.iter().filter(|b| !b.is_empty()) {
            info!(
                "[Routes] {}: install={:?} live={:?} record={:?}",
                bundle.role,
                bundle.install.map(|r| r.handle.0),
                bundle.live.map(|r| r.handle.0),
                bundle.record.map(|r| r.handle.0)
            );
        }
        Ok(manager)
    }

    /// Classify an already enumerated candidate set.
    pub fn from_candidates(candidates: CandidateRoutes) -> Self {
        let install = classify(&candidates.install, &BROADCAST_RULES);
        let live = classify(&candidates.live, &BROADCAST_RULES);
        let record = classify(&candidates.record, &BROADCAST_RULES);

        let bundles = RouteRole::ALL.map(|role| RouteBundle {
            role,
            install: pick(&candidates.install, &install, role),
            live: pick(&candidates.live, &live, role),
            record: pick(&candidates.record, &record, role),
        });

        let playback_slots = classify(&candidates.playback, &PLAYBACK_RULES);
        let playback = PlaybackBundle {
            main: playback_slots
                .get(Slot::PlaybackMain)
                .map(|i| candidates.playback[i]),
            pip: playback_slots
                .get(Slot::PlaybackPip)
                .map(|i| candidates.playback[i]),
        };

        Self {
            candidates,
            bundles,
            playback,
        }
    }

    fn configure_ip_live_routes<S>(&self, source: &S) -> Result<(), EngineError>
    where
        S: CapabilitySource + ?Sized,
    {
        if let Some(primary) = self.bundle(RouteRole::IpPrimary).live {
            debug!("[Routes] configuring IP primary live route {}", primary.handle);
            source
                .configure_live_route(
                    primary.handle,
                    MediaComponents::all(),
                    VideoPlacement::default(),
                )
                .map_err(EngineError::CapabilitySourceUnavailable)?;
        }
        if let Some(pip) = self.bundle(RouteRole::IpPip).live {
            debug!("[Routes] configuring IP PIP live route {}", pip.handle);
            source
                .configure_live_route(pip.handle, MediaComponents::VIDEO, VideoPlacement::default())
                .map_err(EngineError::CapabilitySourceUnavailable)?;
        }
        Ok(())
    }

    fn bundle(&self, role: RouteRole) -> &RouteBundle {
        &self.bundles[role.index()]
    }

    /// Bundle for `role`, `None` when no route was classified into it.
    pub fn by_role(&self, role: RouteRole) -> Option<&RouteBundle> {
        let bundle = self.bundle(role);
        (!bundle.is_empty()).then_some(bundle)
    }

    /// Bundle serving channels of `source`. `None` for undefined sources
    /// and for roles without routes.
    pub fn by_source_type(&self, source: SourceType) -> Option<&RouteBundle> {
        RouteRole::for_source_type(source).and_then(|role| self.by_role(role))
    }

    /// Every bundle in role order.
    pub fn bundles(&self) -> &[RouteBundle] {
        &self.bundles
    }

    /// Live route of the main screen: terrestrial, else cable.
    pub fn main_live_route(&self) -> Option<&LiveRoute> {
        self.bundle(RouteRole::Terrestrial)
            .live
            .as_ref()
            .or(self.bundle(RouteRole::Cable).live.as_ref())
    }

    pub fn main_live_route_handle(&self) -> Result<RouteHandle, EngineError> {
        self.main_live_route()
            .map(|route| route.handle)
            .ok_or_else(|| EngineError::RouteNotFound("main live route".to_string()))
    }

    /// First enumerated install route, used to abort scans.
    pub fn main_install_route(&self) -> Option<&InstallRoute> {
        self.candidates.install.first()
    }

    pub fn main_install_route_handle(&self) -> Result<RouteHandle, EngineError> {
        self.main_install_route()
            .map(|route| route.handle)
            .ok_or_else(|| EngineError::RouteNotFound("main install route".to_string()))
    }

    /// Source type of the first broadcast role (TER, CAB, SAT) with an
    /// install route.
    pub fn source_type(&self) -> SourceType {
        [
            (RouteRole::Terrestrial, SourceType::Terrestrial),
            (RouteRole::Cable, SourceType::Cable),
            (RouteRole::Satellite, SourceType::Satellite),
        ]
        .into_iter()
        .find(|(role, _)| self.bundle(*role).install.is_some())
        .map_or(SourceType::Undefined, |(_, source)| source)
    }

    pub fn playback(&self) -> &PlaybackBundle {
        &self.playback
    }

    pub fn candidates(&self) -> &CandidateRoutes {
        &self.candidates
    }
}
