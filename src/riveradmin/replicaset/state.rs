use serde::Serialize;
use strum::Display;

use crate::riveradmin::group::{LiveMember, LiveMembership};
use crate::riveradmin::metadata::{InstanceRecord, ReplicaSet};
use crate::riveradmin::server::{InstanceAddress, MemberState};

/// Classification of one instance address, derived from the catalog and the live group
/// every time an operation runs. Never stored.
#[derive(Display, Serialize, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Neither recorded nor seen live.
    Unknown,
    /// Recorded in the catalog, absent from the live group: an unavailable instance.
    CatalogOnly,
    /// Seen live, not recorded: a newly discovered instance.
    LiveOnly,
    /// Recorded and ONLINE.
    MemberConsistent,
    /// Recorded and present, but recovering or in error.
    MemberDiverged,
}

/// The catalog and live views of a replica set, read once at the start of an operation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub replicaset: ReplicaSet,
    /// Catalog rows in recorded-join order.
    pub catalog: Vec<InstanceRecord>,
    pub live: LiveMembership,
    /// No recorded instance answered the probe. live is then empty because nothing
    /// could be seen, not because the group is gone.
    pub probe_failed: bool,
}

impl Observation {
    pub fn new(replicaset: ReplicaSet, catalog: Vec<InstanceRecord>, live: LiveMembership) -> Self {
        Self{replicaset, catalog, live, probe_failed: false}
    }

    /// The observation made when no recorded instance could be reached.
    pub fn unreachable(replicaset: ReplicaSet, catalog: Vec<InstanceRecord>) -> Self {
        let live = LiveMembership{
            unreachable: catalog.iter().map(|r| r.address.clone()).collect(),
            ..LiveMembership::empty()
        };
        Self{replicaset, catalog, live, probe_failed: true}
    }

    /// True if the live group was actually seen running. Changes derived from the
    /// difference between catalog and live group are only safe to apply then.
    pub fn group_observed(&self) -> bool {
        !self.probe_failed && !self.live.members.is_empty()
    }

    pub fn record(&self, address: &InstanceAddress) -> Option<&InstanceRecord> {
        self.catalog.iter().find(|r| &r.address == address)
    }

    pub fn live_member(&self, address: &InstanceAddress) -> Option<&LiveMember> {
        self.live.get(address)
    }

    pub fn classify(&self, address: &InstanceAddress) -> InstanceState {
        match (self.record(address), self.live.get(address)) {
            (None, None) => InstanceState::Unknown,
            (Some(_), None) => InstanceState::CatalogOnly,
            (None, Some(_)) => InstanceState::LiveOnly,
            (Some(_), Some(m)) if m.state.is_online() => InstanceState::MemberConsistent,
            (Some(_), Some(_)) => InstanceState::MemberDiverged,
        }
    }

    /// Live members missing from the catalog, in the order the group reported them.
    pub fn newly_discovered(&self) -> Vec<InstanceAddress> {
        self.live.members.iter()
            .filter(|m| self.record(&m.address).is_none())
            .map(|m| m.address.clone())
            .collect()
    }

    /// Catalog members missing from the live group, in recorded-join order.
    pub fn unavailable(&self) -> Vec<InstanceAddress> {
        self.catalog.iter()
            .filter(|r| !self.live.contains(&r.address))
            .map(|r| r.address.clone())
            .collect()
    }

    /// Catalog members present live in a state other than ONLINE.
    pub fn diverged(&self) -> Vec<(InstanceAddress, MemberState)> {
        self.catalog.iter()
            .filter_map(|r| self.live.get(&r.address))
            .filter(|m| !m.state.is_online())
            .map(|m| (m.address.clone(), m.state))
            .collect()
    }

    /// Catalog members in the given state, in recorded-join order.
    pub fn in_state(&self, state: InstanceState) -> Vec<&InstanceRecord> {
        self.catalog.iter().filter(|r| self.classify(&r.address) == state).collect()
    }

    /// ONLINE catalog members other than target, earliest joined first.
    /// The first one is the preferred peer to recover from.
    pub fn healthy_peers(&self, target: &InstanceAddress) -> Vec<&InstanceRecord> {
        self.in_state(InstanceState::MemberConsistent).into_iter()
            .filter(|r| &r.address != target)
            .collect()
    }

    /// ONLINE live members other than target: catalog members first in join order,
    /// then members only seen live.
    pub fn online_peers(&self, target: &InstanceAddress) -> Vec<InstanceAddress> {
        let mut peers: Vec<InstanceAddress> = self.healthy_peers(target).iter().map(|r| r.address.clone()).collect();
        for m in &self.live.members {
            if m.state.is_online() && &m.address != target && !peers.contains(&m.address) {
                peers.push(m.address.clone());
            }
        }
        peers
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self.live.warning().map(|w| w.to_string()).into_iter().collect();
        if self.probe_failed && !self.catalog.is_empty() {
            warnings.push("no recorded instance answered, the live group could not be observed".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::riveradmin::group::Confidence;
    use crate::riveradmin::metadata::{ClusterId, ReplicaSetId, TopologyType};
    use crate::riveradmin::server::MemberRole;

    fn addr(s: &str) -> InstanceAddress {
        s.parse().unwrap()
    }

    fn observation(catalog: &[&str], live: &[(&str, MemberState)]) -> Observation {
        let rs = ReplicaSet{
            id: ReplicaSetId(2),
            cluster_id: ClusterId(1),
            name: "default".to_string(),
            topology_type: TopologyType::PrimaryMaster,
            disabled: false,
        };
        let catalog = catalog.iter().map(|a| InstanceRecord::new(addr(a), MemberRole::Secondary)).collect();
        let mut membership = LiveMembership::empty();
        membership.members = live.iter().map(|(a, state)| LiveMember{
            address: addr(a),
            state: *state,
            role: None,
            confidence: Confidence::Quorum,
        }).collect();
        Observation::new(rs, catalog, membership)
    }

    #[test]
    fn test_classify() {
        let obs = observation(
            &["a", "b", "d"],
            &[("a", MemberState::Online), ("c", MemberState::Online), ("d", MemberState::Recovering)],
        );
        assert_eq!(obs.classify(&addr("a")), InstanceState::MemberConsistent);
        assert_eq!(obs.classify(&addr("b")), InstanceState::CatalogOnly);
        assert_eq!(obs.classify(&addr("c")), InstanceState::LiveOnly);
        assert_eq!(obs.classify(&addr("d")), InstanceState::MemberDiverged);
        assert_eq!(obs.classify(&addr("e")), InstanceState::Unknown);
        assert_eq!(InstanceState::MemberConsistent.to_string(), "MEMBER_CONSISTENT");
    }

    #[test]
    fn test_diff() {
        let obs = observation(
            &["a", "b", "d"],
            &[("c", MemberState::Online), ("a", MemberState::Online), ("d", MemberState::Error)],
        );
        assert_eq!(obs.newly_discovered(), vec![addr("c")]);
        assert_eq!(obs.unavailable(), vec![addr("b")]);
        assert_eq!(obs.diverged(), vec![(addr("d"), MemberState::Error)]);
    }

    #[test]
    fn test_peers_prefer_earliest_joined() {
        let obs = observation(
            &["c", "a", "b"],
            &[("a", MemberState::Online), ("b", MemberState::Online), ("c", MemberState::Error), ("x", MemberState::Online)],
        );
        let peers: Vec<InstanceAddress> = obs.healthy_peers(&addr("c")).iter().map(|r| r.address.clone()).collect();
        assert_eq!(peers, vec![addr("a"), addr("b")]);
        assert_eq!(obs.online_peers(&addr("a")), vec![addr("b"), addr("x")]);
    }

    #[test]
    fn test_unreachable_group_is_not_an_empty_group() {
        let seen = observation(&["a", "b"], &[("a", MemberState::Online)]);
        assert!(seen.group_observed());

        let stopped = observation(&["a", "b"], &[]);
        assert!(!stopped.group_observed());
        assert!(stopped.warnings().is_empty());

        let unseen = Observation::unreachable(seen.replicaset.clone(), seen.catalog.clone());
        assert!(!unseen.group_observed());
        assert_eq!(unseen.unavailable(), vec![addr("a"), addr("b")]);
        assert_eq!(unseen.live.unreachable, vec![addr("a"), addr("b")]);
        assert_eq!(unseen.warnings().len(), 1);
    }
}
