//! Engine backed subcommands.
//!
//! Everything here blocks; `main` runs it on the blocking pool.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use thiserror::Error;

use tvbridge_engine::{
    ChannelDescriptor, ConnectionGate, DeviceProfile, DtvEngine, EngineConfig,
    EngineError, MemoryChannelStore, ProfileError, ProfileLocator, ProfileMiddleware,
    RemoteLocator, RouteManager, RouteRole, ServiceLocator,
};
use tvbridge_protocol::{AudioTrack, ScanParams, SourceType};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Where the engine finds its middleware.
#[derive(Debug, Clone)]
pub enum Target {
    /// In-process middleware built from a profile file (demo profile if `None`).
    Profile(Option<PathBuf>),
    /// Middleware reached over TCP.
    Remote(EngineConfig),
}

/// Connect an engine to `target`, waiting at most `wait`.
///
/// The gate is returned alongside so the caller controls when the engine is
/// torn down.
pub fn connect(target: &Target, wait: Duration) -> Result<(ConnectionGate, Arc<DtvEngine>), CommandError> {
    let (locator, policy) = match target {
        Target::Profile(path) => {
            let profile = match path {
                Some(path) => DeviceProfile::load(path)?,
                None => DeviceProfile::demo(),
            };
            info!("Using in-process profile '{}'", profile.name);
            let middleware = Arc::new(ProfileMiddleware::new(profile));
            let locator: Arc<dyn ServiceLocator> = Arc::new(ProfileLocator::new(middleware));
            (locator, EngineConfig::default().probe)
        }
        Target::Remote(config) => {
            info!("Connecting to middleware at {}", config.address);
            let locator: Arc<dyn ServiceLocator> = Arc::new(RemoteLocator::new(config));
            (locator, config.probe)
        }
    };

    let gate = ConnectionGate::new(locator, Arc::new(MemoryChannelStore::new()), policy);
    let engine = gate.request_connection(Some(wait))?;
    Ok((gate, engine))
}

/// Route table of a resolved topology.
pub fn format_routes(routes: &RouteManager) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "source type: {}", routes.source_type());
    let _ = writeln!(out, "{:<14} {:<18} {:<22} {:<18}", "ROLE", "INSTALL", "LIVE", "RECORD");

    for role in RouteRole::ALL {
        let Some(bundle) = routes.by_role(role) else {
            let _ = writeln!(out, "{:<14} {:<18} {:<22} {:<18}", role.to_string(), "-", "-", "-");
            continue;
        };
        let install = bundle
            .install
            .map(|r| format!("{} fe{}", r.handle, r.frontend.id))
            .unwrap_or_else(|| "-".to_string());
        let live = bundle
            .live
            .map(|r| format!("{} fe{}->dec{}", r.handle, r.frontend.id, r.decoder.id))
            .unwrap_or_else(|| "-".to_string());
        let record = bundle
            .record
            .map(|r| format!("{} fe{}->st{}", r.handle, r.frontend.id, r.storage.id))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:<14} {:<18} {:<22} {:<18}", role.to_string(), install, live, record);
    }

    let playback = routes.playback();
    for (name, route) in [("playback", playback.main), ("playback-pip", playback.pip)] {
        let text = route
            .map(|r| format!("{} st{}->dec{}", r.handle, r.storage.id, r.decoder.id))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "{:<14} {}", name, text);
    }
    out
}

/// Channel list table.
pub fn format_channels(channels: &[ChannelDescriptor]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<4} {:<24} {:<7} {:<6}", "NO", "NAME", "SOURCE", "INDEX");
    for channel in channels {
        let _ = writeln!(
            out,
            "{:<4} {:<24} {:<7} {:<6}",
            channel.display_number,
            channel.name,
            channel.source_type.to_string(),
            channel.service_index
        );
    }
    out
}

pub fn routes(engine: &DtvEngine) -> Result<String, CommandError> {
    let routes = engine.route_manager()?;
    Ok(format_routes(&routes))
}

pub fn channels(engine: &DtvEngine) -> Result<String, CommandError> {
    Ok(format_channels(&engine.managers()?.channels.all()))
}

/// Scan `source` (one transponder when `frequency_khz` is given) and
/// rebuild the channel list.
pub fn scan(
    engine: &DtvEngine,
    source: SourceType,
    frequency_khz: Option<u32>,
) -> Result<String, CommandError> {
    let managers = engine.managers()?;
    match frequency_khz {
        Some(khz) => managers
            .channels
            .start_manual_scan(source, ScanParams::frequency(khz))?,
        None => managers.channels.start_auto_scan(source)?,
    }
    managers.channels.refresh_channel_list()?;
    Ok(format_channels(&managers.channels.all()))
}

/// Start the channel with the given display number and list its audio
/// tracks.
pub fn play(engine: &DtvEngine, number: &str) -> Result<String, CommandError> {
    let managers = engine.managers()?;
    let channel = managers.channels.by_display_number(number)?;

    engine.start(&channel)?;
    let route = engine.current_route()?;
    let tracks = managers.audio.tracks(route)?;

    let mut out = String::new();
    let _ = writeln!(out, "playing {} '{}' on {}", channel.display_number, channel.name, route);
    for AudioTrack {
        index,
        language,
        track_type,
    } in tracks
    {
        let _ = writeln!(out, "  audio {}: {} ({:?})", index, language, track_type);
    }
    engine.stop()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> (ConnectionGate, Arc<DtvEngine>) {
        connect(&Target::Profile(None), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_routes_table() {
        let (_gate, engine) = demo();
        let table = routes(&engine).unwrap();
        assert!(table.starts_with("source type: TER\n"));
        assert!(table.contains("terrestrial"));
        assert!(table.lines().any(|line| line.starts_with("satellite") && line.contains(" - ")));
    }

    #[test]
    fn test_channels_table() {
        let (_gate, engine) = demo();
        let table = channels(&engine).unwrap();
        assert_eq!(table.lines().count(), 4);
        assert!(table.contains("Das Erste HD"));
        assert!(!table.contains("VOD"));
    }

    #[test]
    fn test_play_unknown_channel() {
        let (_gate, engine) = demo();
        assert!(matches!(
            play(&engine, "42"),
            Err(CommandError::Engine(EngineError::ChannelNotFound(_)))
        ));
        let out = play(&engine, "01").unwrap();
        assert!(out.starts_with("playing 01 'Das Erste HD'"));
    }

    #[test]
    fn test_play_cable_channel() {
        let (_gate, engine) = demo();
        let out = play(&engine, "03").unwrap();
        assert!(out.starts_with("playing 03 'arte HD'"));
        assert!(out.contains("audio 1: fra"));
    }

    #[test]
    fn test_scan_without_route() {
        let (_gate, engine) = demo();
        assert!(matches!(
            scan(&engine, SourceType::Satellite, None),
            Err(CommandError::Engine(EngineError::RouteNotFound(_)))
        ));
        let table = scan(&engine, SourceType::Cable, None).unwrap();
        assert!(table.contains("arte HD"));
    }

    #[test]
    fn test_missing_profile_file() {
        let result = connect(
            &Target::Profile(Some(PathBuf::from("/nonexistent/profile.toml"))),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(CommandError::Profile(ProfileError::Io(_)))));
    }
}
