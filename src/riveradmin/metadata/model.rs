use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::riveradmin::server::{InstanceAddress, MemberRole, MemberState};

/// Catalog identifier of a Cluster, assigned by the MetadataStore.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ClusterId(pub u64);

/// Catalog identifier of a ReplicaSet, assigned by the MetadataStore.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ReplicaSetId(pub u64);

impl Display for ClusterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Display for ReplicaSetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Display, EnumString, Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TopologyType {
    /// A single writable primary, the rest read-only secondaries.
    PrimaryMaster,
    /// Every member accepts writes.
    MultiMaster,
}

impl TopologyType {
    /// The role recorded for a new instance, given how many instances are already recorded.
    pub fn default_role(&self, recorded_members: usize) -> MemberRole {
        match self {
            TopologyType::MultiMaster => MemberRole::Primary,
            TopologyType::PrimaryMaster if recorded_members == 0 => MemberRole::Primary,
            TopologyType::PrimaryMaster => MemberRole::Secondary,
        }
    }
}

impl Default for TopologyType {
    fn default() -> Self {
        TopologyType::PrimaryMaster
    }
}

/// A named, user-facing handle for one active replica set.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub replicaset_id: ReplicaSetId,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct ReplicaSet {
    pub id: ReplicaSetId,
    /// Back-reference to the owning cluster
    pub cluster_id: ClusterId,
    pub name: String,
    pub topology_type: TopologyType,
    /// A disabled replica set keeps its metadata but refuses mutating operations.
    #[serde(default)]
    pub disabled: bool,
}

/// A catalog row: an instance that is supposed to be a member of the replica set.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct InstanceRecord {
    pub address: InstanceAddress,
    pub role: MemberRole,
    /// The live state observed when this row was written. Never refreshed afterwards.
    pub recorded_state: MemberState,
    #[serde(default)]
    pub label: Option<String>,
    /// The recovery account created for this instance when it joined, if any.
    #[serde(default)]
    pub recovery_account: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(address: InstanceAddress, role: MemberRole) -> Self {
        Self{
            address,
            role,
            recorded_state: MemberState::Online,
            label: None,
            recovery_account: None,
            joined_at: Utc::now(),
        }
    }
}
