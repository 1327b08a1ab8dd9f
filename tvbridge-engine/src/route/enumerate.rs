//! Cross product of capability descriptors into candidate routes.

use log::debug;
use tvbridge_protocol::DEMUX_PLACEHOLDER;

use crate::error::{EngineError, MiddlewareError};
use crate::middleware::CapabilitySource;

use super::{CandidateRoutes, InstallRoute, LiveRoute, PlaybackRoute, RecordRoute};

fn unavailable(e: MiddlewareError) -> EngineError {
    EngineError::CapabilitySourceUnavailable(e)
}

/// Enumerate every candidate route the capability source can build.
///
/// Order is part of the contract: install per frontend, live
/// frontend x decoder x output, record frontend x storage, playback
/// storage x decoder x output, outer loop first. Any failing call aborts
/// the pass without a partial result.
pub fn enumerate<S>(source: &S) -> Result<CandidateRoutes, EngineError>
where
    S: CapabilitySource + ?Sized,
{
    let frontend_count = source.frontend_count().map_err(unavailable)?;
    let storage_count = source.mass_storage_count().map_err(unavailable)?;
    let decoder_count = source.decoder_count().map_err(unavailable)?;
    let output_count = source.input_output_count().map_err(unavailable)?;

    debug!(
        "[Routes] capabilities: frontends={} storages={} decoders={} outputs={}",
        frontend_count, storage_count, decoder_count, output_count
    );

    let frontends = (0..frontend_count)
        .map(|i| source.frontend_descriptor(i))
        .collect::<Result<Vec<_>, _>>()
        .map_err(unavailable)?;
    let decoders = (0..decoder_count)
        .map(|i| source.decoder_descriptor(i))
        .collect::<Result<Vec<_>, _>>()
        .map_err(unavailable)?;
    let storages = (0..storage_count)
        .map(|i| source.storage_descriptor(i))
        .collect::<Result<Vec<_>, _>>()
        .map_err(unavailable)?;
    let outputs = (0..output_count)
        .map(|i| source.io_descriptor(i))
        .collect::<Result<Vec<_>, _>>()
        .map_err(unavailable)?;

    let mut routes = CandidateRoutes::default();

    for frontend in &frontends {
        let handle = source
            .install_route(frontend.id, DEMUX_PLACEHOLDER)
            .map_err(unavailable)?;
        routes.install.push(InstallRoute {
            handle,
            frontend: *frontend,
            demux: DEMUX_PLACEHOLDER,
        });
    }

    for frontend in &frontends {
        for decoder in &decoders {
            for output in &outputs {
                let handle = source
                    .live_route(frontend.id, DEMUX_PLACEHOLDER, decoder.id)
                    .map_err(unavailable)?;
                routes.live.push(LiveRoute {
                    handle,
                    frontend: *frontend,
                    demux: DEMUX_PLACEHOLDER,
                    decoder: *decoder,
                    output: *output,
                });
            }
        }
    }

    for frontend in &frontends {
        for storage in &storages {
            let handle = source
                .record_route(frontend.id, DEMUX_PLACEHOLDER, storage.id)
                .map_err(unavailable)?;
            routes.record.push(RecordRoute {
                handle,
                frontend: *frontend,
                demux: DEMUX_PLACEHOLDER,
                storage: *storage,
            });
        }
    }

    for storage in &storages {
        for decoder in &decoders {
            for output in &outputs {
                let handle = source
                    .playback_route(storage.id, DEMUX_PLACEHOLDER, decoder.id)
                    .map_err(unavailable)?;
                routes.playback.push(PlaybackRoute {
                    handle,
                    storage: *storage,
                    demux: DEMUX_PLACEHOLDER,
                    decoder: *decoder,
                    output: *output,
                });
            }
        }
    }

    debug!(
        "[Routes] candidates: install={} live={} record={} playback={}",
        routes.install.len(),
        routes.live.len(),
        routes.record.len(),
        routes.playback.len()
    );

    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{DeviceProfile, ProfileMiddleware};
    use tvbridge_protocol::FrontendType;

    fn profile(frontends: usize, storages: usize, decoders: usize, outputs: usize) -> DeviceProfile {
        let mut profile = DeviceProfile::default();
        for i in 0..frontends {
            profile.add_frontend(i as u32, &[FrontendType::Terrestrial]);
        }
        profile.storages = (0..storages as u32).collect();
        profile.decoders = (0..decoders as u32).collect();
        profile.outputs = (0..outputs as u32).collect();
        profile
    }

    #[test]
    fn test_candidate_counts() {
        let mw = ProfileMiddleware::new(profile(2, 3, 2, 2));
        let routes = enumerate(&mw).unwrap();

        assert_eq!(routes.install.len(), 2);
        assert_eq!(routes.live.len(), 2 * 2 * 2);
        assert_eq!(routes.record.len(), 2 * 3);
        assert_eq!(routes.playback.len(), 3 * 2 * 2);
    }

    #[test]
    fn test_zero_counts_yield_no_candidates() {
        let mw = ProfileMiddleware::new(profile(0, 0, 0, 0));
        let routes = enumerate(&mw).unwrap();
        assert_eq!(routes, CandidateRoutes::default());

        // Frontends without decoders still get install routes.
        let mw = ProfileMiddleware::new(profile(1, 0, 0, 1));
        let routes = enumerate(&mw).unwrap();
        assert_eq!(routes.install.len(), 1);
        assert!(routes.live.is_empty());
        assert!(routes.record.is_empty());
    }

    #[test]
    fn test_enumeration_order() {
        let mw = ProfileMiddleware::new(profile(2, 1, 2, 1));
        let routes = enumerate(&mw).unwrap();

        let live: Vec<(u32, u32)> = routes
            .live
            .iter()
            .map(|r| (r.frontend.id, r.decoder.id))
            .collect();
        assert_eq!(live, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        let playback: Vec<(u32, u32)> = routes
            .playback
            .iter()
            .map(|r| (r.storage.id, r.decoder.id))
            .collect();
        assert_eq!(playback, vec![(0, 0), (0, 1)]);
        assert!(routes.install.iter().all(|r| r.demux == DEMUX_PLACEHOLDER));
    }

    #[test]
    fn test_capability_failure_aborts() {
        let mw = ProfileMiddleware::new(profile(2, 1, 1, 1));
        mw.fail_route_requests(true);
        let result = enumerate(&mw);
        assert!(matches!(
            result,
            Err(EngineError::CapabilitySourceUnavailable(_))
        ));
    }
}
