//! Device profiles and an in-process middleware built from them.
//!
//! A [`DeviceProfile`] describes the hardware of a receiver (frontends,
//! decoders, storage, outputs) and the services its frontends can find.
//! [`ProfileMiddleware`] answers every middleware call from a profile so the
//! engine can run without a real middleware, and backs `tvbridge simulate`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tvbridge_protocol::{
    AudioTrack, AudioTrackType, DecoderDescriptor, ErrorCode, FrontendDescriptor, FrontendType,
    FrontendTypes, IoDescriptor, MediaComponents, RouteKind, ScanMode, ServiceDescriptor,
    StorageDescriptor, VideoPlacement, MASTER_LIST_INDEX,
};

use crate::error::MiddlewareError;
use crate::middleware::{
    AudioControl, CapabilitySource, Middleware, MwResult, ScanControl, ServiceControl,
    ServiceLocator,
};
use crate::route::RouteHandle;

/// Profile loading errors.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid profile: {0}")]
    Invalid(String),
}

/// One physical frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendProfile {
    pub id: u32,
    pub types: Vec<FrontendType>,
}

/// One audio track of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackProfile {
    pub language: String,
    #[serde(default = "default_codec")]
    pub codec: AudioTrackType,
}

fn default_codec() -> AudioTrackType {
    AudioTrackType::Mpeg
}

fn default_service_type() -> u8 {
    0x01
}

/// A service the frontends can find while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub name: String,
    pub delivery: FrontendType,
    pub frequency_khz: u32,
    #[serde(default = "default_service_type")]
    pub service_type: u8,
    #[serde(default)]
    pub audio: Vec<AudioTrackProfile>,
}

/// Hardware and service inventory of a simulated receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub decoders: Vec<u32>,
    #[serde(default)]
    pub storages: Vec<u32>,
    #[serde(default)]
    pub outputs: Vec<u32>,
    #[serde(default)]
    pub frontends: Vec<FrontendProfile>,
    #[serde(default)]
    pub services: Vec<ServiceProfile>,
}

fn check_unique(kind: &str, ids: impl Iterator<Item = u32>) -> Result<(), ProfileError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ProfileError::Invalid(format!("duplicate {} id {}", kind, id)));
        }
    }
    Ok(())
}

impl DeviceProfile {
    /// Load a profile from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let contents = fs::read_to_string(path)?;
        let profile = Self::from_toml_str(&contents)?;
        info!(
            "[Profile] loaded '{}' from {:?}: {} frontends, {} services",
            profile.name,
            path,
            profile.frontends.len(),
            profile.services.len()
        );
        Ok(profile)
    }

    /// Parse and validate a profile.
    pub fn from_toml_str(contents: &str) -> Result<Self, ProfileError> {
        let profile: DeviceProfile = toml::from_str(contents)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reject duplicate component ids and frontends without types.
    pub fn validate(&self) -> Result<(), ProfileError> {
        check_unique("frontend", self.frontends.iter().map(|f| f.id))?;
        check_unique("decoder", self.decoders.iter().copied())?;
        check_unique("storage", self.storages.iter().copied())?;
        check_unique("output", self.outputs.iter().copied())?;

        if let Some(fe) = self.frontends.iter().find(|f| f.types.is_empty()) {
            return Err(ProfileError::Invalid(format!(
                "frontend {} has no signal types",
                fe.id
            )));
        }
        for service in &self.services {
            if !self.frontends.iter().any(|f| f.types.contains(&service.delivery)) {
                warn!(
                    "[Profile] service '{}' ({}) is not receivable by any frontend",
                    service.name,
                    service.delivery.tag()
                );
            }
        }
        Ok(())
    }

    pub fn add_frontend(&mut self, id: u32, types: &[FrontendType]) {
        self.frontends.push(FrontendProfile {
            id,
            types: types.to_vec(),
        });
    }

    /// Hybrid terrestrial/IP receiver with a cable tuner, two decoders and
    /// one disk.
    pub fn demo() -> Self {
        let track = |language: &str, codec| AudioTrackProfile {
            language: language.to_string(),
            codec,
        };
        Self {
            name: "demo".to_string(),
            decoders: vec![0, 1],
            storages: vec![0],
            outputs: vec![0],
            frontends: vec![
                FrontendProfile {
                    id: 0,
                    types: vec![FrontendType::Terrestrial, FrontendType::Ip],
                },
                FrontendProfile {
                    id: 1,
                    types: vec![FrontendType::Cable],
                },
            ],
            services: vec![
                ServiceProfile {
                    name: "Das Erste HD".to_string(),
                    delivery: FrontendType::Terrestrial,
                    frequency_khz: 474_000,
                    service_type: 0x19,
                    audio: vec![
                        track("deu", AudioTrackType::Mpeg),
                        track("mis", AudioTrackType::Ac3),
                    ],
                },
                ServiceProfile {
                    name: "ZDF HD".to_string(),
                    delivery: FrontendType::Terrestrial,
                    frequency_khz: 522_000,
                    service_type: 0x19,
                    audio: vec![track("deu", AudioTrackType::Eac3)],
                },
                ServiceProfile {
                    name: "IP VOD".to_string(),
                    delivery: FrontendType::Ip,
                    frequency_khz: 0,
                    service_type: 0x01,
                    audio: Vec::new(),
                },
                ServiceProfile {
                    name: "arte HD".to_string(),
                    delivery: FrontendType::Cable,
                    frequency_khz: 330_000,
                    service_type: 0x19,
                    audio: vec![track("deu", AudioTrackType::Aac), track("fra", AudioTrackType::Aac)],
                },
                ServiceProfile {
                    name: "DVB-C VOD".to_string(),
                    delivery: FrontendType::Cable,
                    frequency_khz: 338_000,
                    service_type: 0x01,
                    audio: Vec::new(),
                },
            ],
        }
    }

    fn frontend(&self, id: u32) -> Option<&FrontendProfile> {
        self.frontends.iter().find(|f| f.id == id)
    }
}

/// Registered route: kind plus source and sink ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RouteKey {
    kind: RouteKind,
    source: u32,
    sink: u32,
}

#[derive(Debug, Default)]
struct SimState {
    handles: HashMap<RouteKey, RouteHandle>,
    routes: HashMap<RouteHandle, RouteKey>,
    next_handle: u32,
    live_config: HashMap<RouteHandle, (MediaComponents, VideoPlacement)>,
    install_type: HashMap<RouteHandle, FrontendType>,
    /// Master service list, as indices into the profile's services.
    service_list: Vec<usize>,
    active: HashMap<RouteHandle, u32>,
    windows: HashMap<RouteHandle, VideoPlacement>,
    audio: HashMap<RouteHandle, u32>,
    scans: u32,
    fail_routes: bool,
    fail_configure: bool,
    fail_stop: bool,
}

/// Middleware answering from a [`DeviceProfile`].
///
/// Route handles are memoised per kind, source and sink, so repeated
/// requests for the same path return the same handle. The master service
/// list initially holds every profile service; a scan replaces the entries
/// of the scanned delivery type with what the scan finds.
pub struct ProfileMiddleware {
    profile: DeviceProfile,
    state: Mutex<SimState>,
}

fn rejected<T>(code: ErrorCode, message: impl Into<String>) -> MwResult<T> {
    Err(MiddlewareError::Remote {
        code,
        message: message.into(),
    })
}

impl ProfileMiddleware {
    pub fn new(profile: DeviceProfile) -> Self {
        let state = SimState {
            service_list: (0..profile.services.len()).collect(),
            next_handle: 1,
            ..SimState::default()
        };
        Self {
            profile,
            state: Mutex::new(state),
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Make every route request fail.
    pub fn fail_route_requests(&self, fail: bool) {
        self.state.lock().fail_routes = fail;
    }

    /// Make every live route configuration fail.
    pub fn fail_configure(&self, fail: bool) {
        self.state.lock().fail_configure = fail;
    }

    /// Make every service stop fail.
    pub fn fail_stop(&self, fail: bool) {
        self.state.lock().fail_stop = fail;
    }

    /// Components and placement last applied to a live route.
    pub fn live_configuration(&self, route: RouteHandle) -> Option<(MediaComponents, VideoPlacement)> {
        self.state.lock().live_config.get(&route).copied()
    }

    /// Window placement last applied to a live route.
    pub fn window(&self, route: RouteHandle) -> Option<VideoPlacement> {
        self.state.lock().windows.get(&route).copied()
    }

    /// Number of scans started so far.
    pub fn scans_started(&self) -> u32 {
        self.state.lock().scans
    }

    fn register(&self, kind: RouteKind, source: u32, sink: u32) -> MwResult<RouteHandle> {
        let mut state = self.state.lock();
        if state.fail_routes {
            return Err(MiddlewareError::Disconnected);
        }
        let key = RouteKey { kind, source, sink };
        if let Some(handle) = state.handles.get(&key) {
            return Ok(*handle);
        }
        let handle = RouteHandle(state.next_handle);
        state.next_handle += 1;
        state.handles.insert(key, handle);
        state.routes.insert(handle, key);
        debug!(
            "[Profile] registered {} route {} ({} -> {})",
            kind, handle, source, sink
        );
        Ok(handle)
    }

    fn route_of_kind(&self, state: &SimState, route: RouteHandle, kind: RouteKind) -> MwResult<RouteKey> {
        match state.routes.get(&route) {
            Some(key) if key.kind == kind => Ok(*key),
            Some(key) => rejected(
                ErrorCode::InvalidParameter,
                format!("route {} is a {} route, expected {}", route, key.kind, kind),
            ),
            None => rejected(ErrorCode::UnknownRoute, format!("unknown route {}", route)),
        }
    }

    fn check_frontend(&self, id: u32) -> MwResult<()> {
        match self.profile.frontend(id) {
            Some(_) => Ok(()),
            None => rejected(ErrorCode::RouteUnavailable, format!("no frontend {}", id)),
        }
    }

    fn check_component(&self, kind: &str, ids: &[u32], id: u32) -> MwResult<()> {
        if ids.contains(&id) {
            Ok(())
        } else {
            rejected(ErrorCode::RouteUnavailable, format!("no {} {}", kind, id))
        }
    }

    fn service(&self, state: &SimState, index: u32) -> MwResult<(usize, &ServiceProfile)> {
        match state.service_list.get(index as usize) {
            Some(&i) => Ok((i, &self.profile.services[i])),
            None => rejected(
                ErrorCode::ServiceNotFound,
                format!("no service at index {}", index),
            ),
        }
    }

    fn active_audio(&self, state: &SimState, route: RouteHandle) -> MwResult<Vec<AudioTrack>> {
        self.route_of_kind(state, route, RouteKind::Live)?;
        let Some(&index) = state.active.get(&route) else {
            return Ok(Vec::new());
        };
        let (_, service) = self.service(state, index)?;
        Ok(service
            .audio
            .iter()
            .enumerate()
            .map(|(i, track)| AudioTrack {
                index: i as u32,
                language: track.language.clone(),
                track_type: track.codec,
            })
            .collect())
    }
}

fn index_check<T: Copy>(items: &[T], index: u32, kind: &str) -> MwResult<T> {
    match items.get(index as usize) {
        Some(item) => Ok(*item),
        None => rejected(
            ErrorCode::IndexOutOfRange,
            format!("{} index {} out of range ({})", kind, index, items.len()),
        ),
    }
}

impl CapabilitySource for ProfileMiddleware {
    fn frontend_count(&self) -> MwResult<u32> {
        Ok(self.profile.frontends.len() as u32)
    }

    fn mass_storage_count(&self) -> MwResult<u32> {
        Ok(self.profile.storages.len() as u32)
    }

    fn decoder_count(&self) -> MwResult<u32> {
        Ok(self.profile.decoders.len() as u32)
    }

    fn input_output_count(&self) -> MwResult<u32> {
        Ok(self.profile.outputs.len() as u32)
    }

    fn frontend_descriptor(&self, index: u32) -> MwResult<FrontendDescriptor> {
        match self.profile.frontends.get(index as usize) {
            Some(fe) => Ok(FrontendDescriptor {
                id: fe.id,
                types: fe.types.iter().copied().collect::<FrontendTypes>(),
            }),
            None => rejected(
                ErrorCode::IndexOutOfRange,
                format!("frontend index {} out of range", index),
            ),
        }
    }

    fn decoder_descriptor(&self, index: u32) -> MwResult<DecoderDescriptor> {
        index_check(&self.profile.decoders, index, "decoder").map(|id| DecoderDescriptor { id })
    }

    fn storage_descriptor(&self, index: u32) -> MwResult<StorageDescriptor> {
        index_check(&self.profile.storages, index, "storage").map(|id| StorageDescriptor { id })
    }

    fn io_descriptor(&self, index: u32) -> MwResult<IoDescriptor> {
        index_check(&self.profile.outputs, index, "output").map(|id| IoDescriptor { id })
    }

    fn install_route(&self, frontend: u32, _demux: u32) -> MwResult<RouteHandle> {
        self.check_frontend(frontend)?;
        self.register(RouteKind::Install, frontend, 0)
    }

    fn live_route(&self, frontend: u32, _demux: u32, decoder: u32) -> MwResult<RouteHandle> {
        self.check_frontend(frontend)?;
        self.check_component("decoder", &self.profile.decoders, decoder)?;
        self.register(RouteKind::Live, frontend, decoder)
    }

    fn record_route(&self, frontend: u32, _demux: u32, storage: u32) -> MwResult<RouteHandle> {
        self.check_frontend(frontend)?;
        self.check_component("storage", &self.profile.storages, storage)?;
        self.register(RouteKind::Record, frontend, storage)
    }

    fn playback_route(&self, storage: u32, _demux: u32, decoder: u32) -> MwResult<RouteHandle> {
        self.check_component("storage", &self.profile.storages, storage)?;
        self.check_component("decoder", &self.profile.decoders, decoder)?;
        self.register(RouteKind::Playback, storage, decoder)
    }

    fn configure_live_route(
        &self,
        route: RouteHandle,
        components: MediaComponents,
        placement: VideoPlacement,
    ) -> MwResult<()> {
        let mut state = self.state.lock();
        if state.fail_configure {
            return rejected(ErrorCode::InvalidState, "live route configuration disabled");
        }
        self.route_of_kind(&state, route, RouteKind::Live)?;
        state.live_config.insert(route, (components, placement));
        Ok(())
    }
}

impl ServiceControl for ProfileMiddleware {
    fn service_count(&self, list: u32) -> MwResult<u32> {
        if list != MASTER_LIST_INDEX {
            return rejected(ErrorCode::InvalidParameter, format!("unknown list {}", list));
        }
        Ok(self.state.lock().service_list.len() as u32)
    }

    fn service_descriptor(&self, list: u32, index: u32) -> MwResult<ServiceDescriptor> {
        if list != MASTER_LIST_INDEX {
            return rejected(ErrorCode::InvalidParameter, format!("unknown list {}", list));
        }
        let state = self.state.lock();
        let (_, service) = self.service(&state, index)?;
        Ok(ServiceDescriptor {
            master_index: index,
            name: service.name.clone(),
            service_type: service.service_type,
            frequency_khz: service.frequency_khz,
            delivery: Some(service.delivery),
        })
    }

    fn start_service(&self, route: RouteHandle, list: u32, index: u32) -> MwResult<()> {
        if list != MASTER_LIST_INDEX {
            return rejected(ErrorCode::InvalidParameter, format!("unknown list {}", list));
        }
        let mut state = self.state.lock();
        let key = self.route_of_kind(&state, route, RouteKind::Live)?;
        let (_, service) = self.service(&state, index)?;
        let receivable = self
            .profile
            .frontend(key.source)
            .map_or(false, |fe| fe.types.contains(&service.delivery));
        if !receivable {
            return rejected(
                ErrorCode::RouteUnavailable,
                format!(
                    "frontend {} cannot receive {} service '{}'",
                    key.source,
                    service.delivery.tag(),
                    service.name
                ),
            );
        }
        info!("[Profile] route {} playing '{}'", route, service.name);
        state.active.insert(route, index);
        state.audio.insert(route, 0);
        Ok(())
    }

    fn stop_service(&self, route: RouteHandle) -> MwResult<()> {
        let mut state = self.state.lock();
        if state.fail_stop {
            return rejected(ErrorCode::InvalidState, "service stop disabled");
        }
        self.route_of_kind(&state, route, RouteKind::Live)?;
        state.active.remove(&route);
        state.audio.remove(&route);
        Ok(())
    }

    fn active_service(&self, route: RouteHandle) -> MwResult<Option<u32>> {
        let state = self.state.lock();
        self.route_of_kind(&state, route, RouteKind::Live)?;
        Ok(state.active.get(&route).copied())
    }

    fn scale_window(&self, route: RouteHandle, placement: VideoPlacement) -> MwResult<()> {
        let mut state = self.state.lock();
        self.route_of_kind(&state, route, RouteKind::Live)?;
        state.windows.insert(route, placement);
        Ok(())
    }
}

impl ScanControl for ProfileMiddleware {
    fn configure_install_route(
        &self,
        route: RouteHandle,
        frontend_type: FrontendType,
    ) -> MwResult<()> {
        let mut state = self.state.lock();
        let key = self.route_of_kind(&state, route, RouteKind::Install)?;
        let supported = self
            .profile
            .frontend(key.source)
            .map_or(false, |fe| fe.types.contains(&frontend_type));
        if !supported {
            return rejected(
                ErrorCode::InvalidParameter,
                format!("frontend {} has no {} tuner", key.source, frontend_type.tag()),
            );
        }
        state.install_type.insert(route, frontend_type);
        Ok(())
    }

    fn start_scan(&self, route: RouteHandle, mode: ScanMode) -> MwResult<()> {
        let mut state = self.state.lock();
        self.route_of_kind(&state, route, RouteKind::Install)?;
        let Some(&delivery) = state.install_type.get(&route) else {
            return rejected(ErrorCode::InvalidState, "install route not configured");
        };

        let in_scope = |service: &ServiceProfile| {
            service.delivery == delivery
                && match mode {
                    ScanMode::Auto => true,
                    ScanMode::Manual(params) => service.frequency_khz == params.frequency_khz,
                }
        };

        let services = &self.profile.services;
        state.service_list.retain(|&i| !in_scope(&services[i]));
        let found: Vec<usize> = (0..services.len()).filter(|&i| in_scope(&services[i])).collect();
        info!(
            "[Profile] {} scan on route {} found {} services",
            delivery.tag(),
            route,
            found.len()
        );
        state.service_list.extend(found);
        state.active.clear();
        state.scans += 1;
        Ok(())
    }

    fn abort_scan(&self, route: RouteHandle) -> MwResult<()> {
        let state = self.state.lock();
        self.route_of_kind(&state, route, RouteKind::Install)?;
        Ok(())
    }
}

impl AudioControl for ProfileMiddleware {
    fn audio_track_count(&self, route: RouteHandle) -> MwResult<u32> {
        let state = self.state.lock();
        Ok(self.active_audio(&state, route)?.len() as u32)
    }

    fn audio_track(&self, route: RouteHandle, index: u32) -> MwResult<AudioTrack> {
        let state = self.state.lock();
        let mut tracks = self.active_audio(&state, route)?;
        if (index as usize) < tracks.len() {
            Ok(tracks.swap_remove(index as usize))
        } else {
            rejected(
                ErrorCode::IndexOutOfRange,
                format!("audio track {} out of range", index),
            )
        }
    }

    fn set_audio_track(&self, route: RouteHandle, index: u32) -> MwResult<()> {
        let mut state = self.state.lock();
        let count = self.active_audio(&state, route)?.len();
        if (index as usize) >= count {
            return rejected(
                ErrorCode::IndexOutOfRange,
                format!("audio track {} out of range ({})", index, count),
            );
        }
        state.audio.insert(route, index);
        Ok(())
    }
}

/// Locator handing out one shared in-process middleware.
pub struct ProfileLocator {
    middleware: Arc<ProfileMiddleware>,
}

impl ProfileLocator {
    pub fn new(middleware: Arc<ProfileMiddleware>) -> Self {
        Self { middleware }
    }
}

impl ServiceLocator for ProfileLocator {
    fn connect(&self, _timeout: Duration) -> Option<Arc<dyn Middleware>> {
        let middleware: Arc<dyn Middleware> = self.middleware.clone();
        Some(middleware)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tvbridge_protocol::ScanParams;

    const SAMPLE: &str = r#"
name = "hybrid"
decoders = [0, 1]
storages = [7]
outputs = [0]

[[frontends]]
id = 0
types = ["ter", "ip"]

[[frontends]]
id = 1
types = ["cable"]

[[services]]
name = "One"
delivery = "ter"
frequency_khz = 474000
audio = [{ language = "eng", codec = "ac3" }, { language = "spa" }]

[[services]]
name = "Two"
delivery = "cab"
frequency_khz = 330000
"#;

    #[test]
    fn test_parse_profile() {
        let profile = DeviceProfile::from_toml_str(SAMPLE).unwrap();
        assert_eq!(profile.name, "hybrid");
        assert_eq!(profile.frontends.len(), 2);
        assert_eq!(
            profile.frontends[0].types,
            vec![FrontendType::Terrestrial, FrontendType::Ip]
        );
        assert_eq!(profile.storages, vec![7]);
        assert_eq!(profile.services[0].audio[0].codec, AudioTrackType::Ac3);
        assert_eq!(profile.services[0].audio[1].codec, AudioTrackType::Mpeg);
        assert_eq!(profile.services[1].service_type, 0x01);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut profile = DeviceProfile::demo();
        profile.decoders.push(0);
        assert!(matches!(profile.validate(), Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_frontend_without_types_rejected() {
        let mut profile = DeviceProfile::default();
        profile.add_frontend(3, &[]);
        assert!(matches!(profile.validate(), Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_demo_profile_is_valid() {
        assert!(DeviceProfile::demo().validate().is_ok());
    }

    #[test]
    fn test_route_handles_memoised() {
        let mw = ProfileMiddleware::new(DeviceProfile::demo());
        let a = mw.live_route(0, 0, 1).unwrap();
        let b = mw.live_route(0, 0, 1).unwrap();
        let c = mw.live_route(1, 0, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(mw.live_route(9, 0, 1).is_err());
    }

    #[test]
    fn test_descriptor_out_of_range() {
        let mw = ProfileMiddleware::new(DeviceProfile::demo());
        let result = mw.decoder_descriptor(5);
        assert!(matches!(
            result,
            Err(MiddlewareError::Remote {
                code: ErrorCode::IndexOutOfRange,
                ..
            })
        ));
    }

    #[test]
    fn test_start_service_checks_delivery() {
        let mw = ProfileMiddleware::new(DeviceProfile::from_toml_str(SAMPLE).unwrap());
        let ter_live = mw.live_route(0, 0, 0).unwrap();
        let cab_live = mw.live_route(1, 0, 0).unwrap();

        mw.start_service(ter_live, MASTER_LIST_INDEX, 0).unwrap();
        assert_eq!(mw.active_service(ter_live).unwrap(), Some(0));
        assert!(mw.start_service(cab_live, MASTER_LIST_INDEX, 0).is_err());
        mw.start_service(cab_live, MASTER_LIST_INDEX, 1).unwrap();

        mw.stop_service(ter_live).unwrap();
        assert_eq!(mw.active_service(ter_live).unwrap(), None);
    }

    #[test]
    fn test_scan_requires_configured_install_route() {
        let mw = ProfileMiddleware::new(DeviceProfile::from_toml_str(SAMPLE).unwrap());
        let install = mw.install_route(0, 0).unwrap();
        assert!(mw.start_scan(install, ScanMode::Auto).is_err());

        assert!(mw.configure_install_route(install, FrontendType::Cable).is_err());
        mw.configure_install_route(install, FrontendType::Terrestrial).unwrap();
        mw.start_scan(install, ScanMode::Auto).unwrap();
        assert_eq!(mw.scans_started(), 1);
    }

    #[test]
    fn test_manual_scan_rescans_one_transponder() {
        let mw = ProfileMiddleware::new(DeviceProfile::demo());
        let install = mw.install_route(0, 0).unwrap();
        mw.configure_install_route(install, FrontendType::Terrestrial).unwrap();
        let before = mw.service_count(MASTER_LIST_INDEX).unwrap();

        mw.start_scan(install, ScanMode::Manual(ScanParams::frequency(474_000)))
            .unwrap();

        // Services of other transponders stay; the rescanned one moves to the end.
        assert_eq!(mw.service_count(MASTER_LIST_INDEX).unwrap(), before);
        let last = mw.service_descriptor(MASTER_LIST_INDEX, before - 1).unwrap();
        assert_eq!(last.name, "Das Erste HD");
        let first = mw.service_descriptor(MASTER_LIST_INDEX, 0).unwrap();
        assert_eq!(first.name, "ZDF HD");
    }

    #[test]
    fn test_audio_tracks_follow_active_service() {
        let mw = ProfileMiddleware::new(DeviceProfile::from_toml_str(SAMPLE).unwrap());
        let live = mw.live_route(0, 0, 0).unwrap();
        assert_eq!(mw.audio_track_count(live).unwrap(), 0);

        mw.start_service(live, MASTER_LIST_INDEX, 0).unwrap();
        assert_eq!(mw.audio_track_count(live).unwrap(), 2);
        assert_eq!(mw.audio_track(live, 1).unwrap().language, "spa");
        mw.set_audio_track(live, 1).unwrap();
        assert!(mw.set_audio_track(live, 2).is_err());
    }
}
