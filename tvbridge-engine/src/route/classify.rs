//! Rule driven assignment of candidate routes to named slots.
//!
//! Each candidate is offered to the rules in table order and goes to the
//! first rule whose slot is still empty and whose predicate holds. A
//! candidate fills at most one slot, and a filled slot is never replaced.

use std::collections::HashMap;

use tvbridge_protocol::FrontendType;

use super::{RouteMembers, RouteRole};

/// Destination of a classified candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Role(RouteRole),
    PlaybackMain,
    PlaybackPip,
}

/// Condition a candidate must meet to fill a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Frontend carries the tag.
    Tagged(FrontendType),
    /// Frontend carries the tag and the candidate is distinct from the
    /// route in the given slot: the frontend id differs, or both routes
    /// have decoders and the decoder ids differ.
    DistinctFrom(Slot, FrontendType),
    /// Decoder id differs from the route in the given slot.
    DecoderDiffersFrom(Slot),
    Any,
}

/// One row of a classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub slot: Slot,
    pub predicate: Predicate,
}

impl Rule {
    pub const fn new(slot: Slot, predicate: Predicate) -> Self {
        Self { slot, predicate }
    }
}

/// Table for install, live and record candidates.
pub const BROADCAST_RULES: [Rule; 6] = [
    Rule::new(
        Slot::Role(RouteRole::Terrestrial),
        Predicate::Tagged(FrontendType::Terrestrial),
    ),
    Rule::new(
        Slot::Role(RouteRole::Cable),
        Predicate::Tagged(FrontendType::Cable),
    ),
    Rule::new(
        Slot::Role(RouteRole::Satellite),
        Predicate::Tagged(FrontendType::Satellite),
    ),
    Rule::new(
        Slot::Role(RouteRole::IpPrimary),
        Predicate::Tagged(FrontendType::Ip),
    ),
    Rule::new(
        Slot::Role(RouteRole::IpPip),
        Predicate::DistinctFrom(Slot::Role(RouteRole::IpPrimary), FrontendType::Ip),
    ),
    Rule::new(
        Slot::Role(RouteRole::IpSecondary),
        Predicate::DistinctFrom(Slot::Role(RouteRole::IpPrimary), FrontendType::Ip),
    ),
];

/// Table for playback candidates.
pub const PLAYBACK_RULES: [Rule; 2] = [
    Rule::new(Slot::PlaybackMain, Predicate::Any),
    Rule::new(
        Slot::PlaybackPip,
        Predicate::DecoderDiffersFrom(Slot::PlaybackMain),
    ),
];

/// Slot -> candidate index produced by [`classify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    assigned: HashMap<Slot, usize>,
}

impl Classification {
    /// Index of the candidate assigned to `slot`.
    pub fn get(&self, slot: Slot) -> Option<usize> {
        self.assigned.get(&slot).copied()
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

fn tagged<R: RouteMembers>(route: &R, tag: FrontendType) -> bool {
    route.frontend().map_or(false, |fe| fe.types.has(tag))
}

fn distinct<R: RouteMembers>(a: &R, b: &R) -> bool {
    let frontend_differs = match (a.frontend(), b.frontend()) {
        (Some(x), Some(y)) => x.id != y.id,
        _ => false,
    };
    let decoder_differs = match (a.decoder(), b.decoder()) {
        (Some(x), Some(y)) => x.id != y.id,
        _ => false,
    };
    frontend_differs || decoder_differs
}

impl Predicate {
    fn matches<R: RouteMembers>(&self, route: &R, routes: &[R], assigned: &HashMap<Slot, usize>) -> bool {
        let occupant = |slot: &Slot| assigned.get(slot).map(|&i| &routes[i]);
        match self {
            Predicate::Tagged(tag) => tagged(route, *tag),
            Predicate::DistinctFrom(slot, tag) => {
                tagged(route, *tag) && occupant(slot).map_or(false, |other| distinct(route, other))
            }
            Predicate::DecoderDiffersFrom(slot) => occupant(slot).map_or(false, |other| {
                match (route.decoder(), other.decoder()) {
                    (Some(x), Some(y)) => x.id != y.id,
                    _ => false,
                }
            }),
            Predicate::Any => true,
        }
    }
}

/// Classify `routes` against `rules` in a single forward pass.
pub fn classify<R: RouteMembers>(routes: &[R], rules: &[Rule]) -> Classification {
    let mut assigned: HashMap<Slot, usize> = HashMap::new();

    for (index, route) in routes.iter().enumerate() {
        let hit = rules.iter().find(|rule| {
            !assigned.contains_key(&rule.slot) && rule.predicate.matches(route, routes, &assigned)
        });
        if let Some(rule) = hit {
            assigned.insert(rule.slot, index);
        }
    }

    Classification { assigned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{InstallRoute, LiveRoute, PlaybackRoute, RouteHandle};
    use tvbridge_protocol::{
        DecoderDescriptor, FrontendDescriptor, FrontendTypes, IoDescriptor, StorageDescriptor,
    };

    fn live(handle: u32, frontend: u32, types: FrontendTypes, decoder: u32) -> LiveRoute {
        LiveRoute {
            handle: RouteHandle(handle),
            frontend: FrontendDescriptor { id: frontend, types },
            demux: 0,
            decoder: DecoderDescriptor { id: decoder },
            output: IoDescriptor { id: 0 },
        }
    }

    fn install(handle: u32, frontend: u32, types: FrontendTypes) -> InstallRoute {
        InstallRoute {
            handle: RouteHandle(handle),
            frontend: FrontendDescriptor { id: frontend, types },
            demux: 0,
        }
    }

    fn role(c: &Classification, role: RouteRole) -> Option<usize> {
        c.get(Slot::Role(role))
    }

    #[test]
    fn test_terrestrial_and_cable() {
        let routes = vec![
            live(1, 0, FrontendTypes::TER, 0),
            live(2, 1, FrontendTypes::CAB, 0),
        ];
        let c = classify(&routes, &BROADCAST_RULES);
        assert_eq!(role(&c, RouteRole::Terrestrial), Some(0));
        assert_eq!(role(&c, RouteRole::Cable), Some(1));
        assert_eq!(role(&c, RouteRole::Satellite), None);
    }

    #[test]
    fn test_first_match_wins_for_multi_tag_frontend() {
        let routes = vec![install(1, 0, FrontendTypes::TER | FrontendTypes::IP)];
        let c = classify(&routes, &BROADCAST_RULES);
        assert_eq!(role(&c, RouteRole::Terrestrial), Some(0));
        assert_eq!(role(&c, RouteRole::IpPrimary), None);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_first_terrestrial_is_kept() {
        let routes = vec![
            install(1, 0, FrontendTypes::TER),
            install(2, 1, FrontendTypes::TER),
        ];
        let c = classify(&routes, &BROADCAST_RULES);
        assert_eq!(role(&c, RouteRole::Terrestrial), Some(0));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_ip_primary_pip_secondary() {
        // frontend ids (1, 1, 2), decoder ids (1, 2, 2)
        let routes = vec![
            live(10, 1, FrontendTypes::IP, 1),
            live(11, 1, FrontendTypes::IP, 2),
            live(12, 2, FrontendTypes::IP, 2),
        ];
        let c = classify(&routes, &BROADCAST_RULES);
        assert_eq!(role(&c, RouteRole::IpPrimary), Some(0));
        assert_eq!(role(&c, RouteRole::IpPip), Some(1));
        assert_eq!(role(&c, RouteRole::IpSecondary), Some(2));
    }

    #[test]
    fn test_ip_duplicate_of_primary_is_skipped() {
        let routes = vec![
            live(10, 1, FrontendTypes::IP, 1),
            live(11, 1, FrontendTypes::IP, 1),
            live(12, 2, FrontendTypes::IP, 1),
        ];
        let c = classify(&routes, &BROADCAST_RULES);
        assert_eq!(role(&c, RouteRole::IpPrimary), Some(0));
        assert_eq!(role(&c, RouteRole::IpPip), Some(2));
        assert_eq!(role(&c, RouteRole::IpSecondary), None);
    }

    #[test]
    fn test_ip_install_routes_compare_frontend_only() {
        let routes = vec![
            install(1, 4, FrontendTypes::IP),
            install(2, 4, FrontendTypes::IP),
            install(3, 5, FrontendTypes::IP),
        ];
        let c = classify(&routes, &BROADCAST_RULES);
        assert_eq!(role(&c, RouteRole::IpPrimary), Some(0));
        assert_eq!(role(&c, RouteRole::IpPip), Some(2));
    }

    #[test]
    fn test_playback_main_and_pip() {
        let playback = |handle: u32, decoder: u32| PlaybackRoute {
            handle: RouteHandle(handle),
            storage: StorageDescriptor { id: 0 },
            demux: 0,
            decoder: DecoderDescriptor { id: decoder },
            output: IoDescriptor { id: 0 },
        };
        let routes = vec![playback(1, 0), playback(2, 0), playback(3, 1), playback(4, 2)];
        let c = classify(&routes, &PLAYBACK_RULES);
        assert_eq!(c.get(Slot::PlaybackMain), Some(0));
        assert_eq!(c.get(Slot::PlaybackPip), Some(2));
    }

    #[test]
    fn test_empty_input() {
        let routes: Vec<LiveRoute> = Vec::new();
        assert!(classify(&routes, &BROADCAST_RULES).is_empty());
    }
}
