use serde::Serialize;
use strum::Display;

use crate::riveradmin::group::Confidence;
use crate::riveradmin::metadata::{InstanceRecord, ReplicaSet, TopologyType};
use crate::riveradmin::replicaset::state::{InstanceState, Observation};
use crate::riveradmin::server::{GtidSet, InstanceAddress, MemberRole, MemberState};

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct DivergedInstance {
    pub address: InstanceAddress,
    pub state: MemberState,
}

/// The drift between catalog and live group found by rescan, plus any auto-fix applied.
#[derive(Serialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct RescanReport {
    pub newly_discovered_instances: Vec<InstanceAddress>,
    pub unavailable_instances: Vec<InstanceAddress>,
    pub diverged_instances: Vec<DivergedInstance>,
    /// Instances recorded by the add_discovered fix.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<InstanceAddress>,
    /// Instances removed by the remove_unavailable fix.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<InstanceAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RescanReport {
    /// True if catalog and live group agree and every member is ONLINE.
    pub fn is_clean(&self) -> bool {
        self.newly_discovered_instances.is_empty()
            && self.unavailable_instances.is_empty()
            && self.diverged_instances.is_empty()
    }
}

pub fn rescan_report(obs: &Observation) -> RescanReport {
    RescanReport{
        newly_discovered_instances: obs.newly_discovered(),
        unavailable_instances: obs.unavailable(),
        diverged_instances: obs.diverged().into_iter()
            .map(|(address, state)| DivergedInstance{address, state})
            .collect(),
        added: Vec::new(),
        removed: Vec::new(),
        warnings: obs.warnings(),
    }
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct InstanceStatus {
    pub address: InstanceAddress,
    pub state: InstanceState,
    /// Role recorded in the catalog, None for instances only seen live.
    pub role: Option<MemberRole>,
    pub live_role: Option<MemberRole>,
    pub live_state: Option<MemberState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The status projection: catalog joined with the live group.
#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct ReplicaSetStatus {
    pub name: String,
    pub topology_type: TopologyType,
    pub disabled: bool,
    pub group_name: Option<String>,
    pub authority: Option<InstanceAddress>,
    /// Recorded instances in join order, followed by instances only seen live.
    pub instances: Vec<InstanceStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub fn status_projection(obs: &Observation) -> ReplicaSetStatus {
    let mut instances: Vec<InstanceStatus> = obs.catalog.iter().map(|r| {
        let live = obs.live_member(&r.address);
        InstanceStatus{
            address: r.address.clone(),
            state: obs.classify(&r.address),
            role: Some(r.role),
            live_role: live.and_then(|m| m.role),
            live_state: live.map(|m| m.state),
            confidence: live.filter(|_| obs.live.inconsistent).map(|m| m.confidence),
            label: r.label.clone(),
        }
    }).collect();
    for address in obs.newly_discovered() {
        let live = obs.live_member(&address);
        instances.push(InstanceStatus{
            state: InstanceState::LiveOnly,
            role: None,
            live_role: live.and_then(|m| m.role),
            live_state: live.map(|m| m.state),
            confidence: live.filter(|_| obs.live.inconsistent).map(|m| m.confidence),
            label: None,
            address,
        });
    }
    ReplicaSetStatus{
        name: obs.replicaset.name.clone(),
        topology_type: obs.replicaset.topology_type,
        disabled: obs.replicaset.disabled,
        group_name: obs.live.group_name.clone(),
        authority: obs.live.authority.clone(),
        instances,
        warnings: obs.warnings(),
    }
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct InstanceDescription {
    pub address: InstanceAddress,
    pub role: MemberRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The topology projection: what the catalog says, without touching any server.
#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct ReplicaSetDescription {
    pub name: String,
    pub topology_type: TopologyType,
    pub disabled: bool,
    pub instances: Vec<InstanceDescription>,
}

pub fn describe_projection(replicaset: &ReplicaSet, catalog: &[InstanceRecord]) -> ReplicaSetDescription {
    ReplicaSetDescription{
        name: replicaset.name.clone(),
        topology_type: replicaset.topology_type,
        disabled: replicaset.disabled,
        instances: catalog.iter().map(|r| InstanceDescription{
            address: r.address.clone(),
            role: r.role,
            label: r.label.clone(),
        }).collect(),
    }
}

/// Whether an instance's transactions let it recover from the group.
#[derive(Display, Serialize, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Recoverability {
    /// No transactions executed yet.
    New,
    Recoverable,
    /// Executed transactions the group doesn't have.
    Diverged,
    /// The group purged transactions the instance still needs.
    LostTransactions,
}

impl Recoverability {
    /// Compare an instance's executed GTIDs against a live member's executed and purged sets.
    pub fn assess(executed: &GtidSet, reference_executed: &GtidSet, reference_purged: &GtidSet) -> Self {
        if !executed.subtract(reference_executed).is_empty() {
            Recoverability::Diverged
        } else if !reference_purged.is_subset(executed) {
            Recoverability::LostTransactions
        } else if executed.is_empty() {
            Recoverability::New
        } else {
            Recoverability::Recoverable
        }
    }
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct InstanceStateReport {
    pub address: InstanceAddress,
    pub state: InstanceState,
    pub live_state: Option<MemberState>,
    /// Only filled in by retrieve_instance_state, and only if the instance and a
    /// reference member could both be reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverability: Option<Recoverability>,
    /// The live member the GTID sets were compared against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compared_with: Option<InstanceAddress>,
}

impl InstanceStateReport {
    pub fn from_observation(obs: &Observation, address: &InstanceAddress) -> Self {
        Self{
            address: address.clone(),
            state: obs.classify(address),
            live_state: obs.live_member(address).map(|m| m.state),
            recoverability: None,
            compared_with: None,
        }
    }
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct AddInstanceOutcome {
    pub address: InstanceAddress,
    pub role: MemberRole,
    /// The seeds handed to the provisioning tool; empty if the instance bootstrapped the group.
    pub peer_seeds: Vec<InstanceAddress>,
    pub recovery_account: String,
    pub diagnostic: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum RejoinOutcome {
    /// The instance was already ONLINE, nothing was done.
    AlreadyOnline,
    Rejoined { peer: InstanceAddress, diagnostic: String },
}

#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct RemoveOutcome {
    pub address: InstanceAddress,
    /// True if the instance was told to leave the group and did.
    pub left_group: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Serialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct DissolveOutcome {
    /// Instances confirmed out of the group, in the order they were processed.
    pub left: Vec<InstanceAddress>,
    /// Instances removed from the metadata without a clean leave (only with force).
    pub skipped: Vec<InstanceAddress>,
    /// Live members that were never recorded and were left running.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unrecorded: Vec<InstanceAddress>,
}
