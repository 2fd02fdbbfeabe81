use async_trait::async_trait;

use crate::riveradmin::Result;
use crate::riveradmin::metadata::{Cluster, ClusterId, InstanceRecord, ReplicaSet, ReplicaSetId, TopologyType};
use crate::riveradmin::server::InstanceAddress;

/// The persisted catalog of clusters, replica sets and instance records.
/// This is the only component that persists state. Every mutation is atomic with
/// respect to a single replica set: a concurrent reader sees all of it or none of it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create a cluster with its (single) replica set. Cluster names are unique.
    async fn create_cluster(
        &self,
        cluster_name: &str,
        replicaset_name: &str,
        topology_type: TopologyType,
    ) -> Result<(ClusterId, ReplicaSetId)>;

    async fn load_cluster(&self, id: ClusterId) -> Result<Cluster>;

    async fn rename_cluster(&self, id: ClusterId, name: &str) -> Result<()>;

    async fn list_replicasets(&self) -> Result<Vec<ReplicaSet>>;

    async fn load_replicaset(&self, id: ReplicaSetId) -> Result<ReplicaSet>;

    /// Instances in recorded-join order.
    async fn list_instances(&self, id: ReplicaSetId) -> Result<Vec<InstanceRecord>>;

    /// Fails with DuplicateAddress if the address is already recorded for this replica set.
    async fn add_instance_record(&self, id: ReplicaSetId, record: InstanceRecord) -> Result<()>;

    /// Fails with NotFound if the address isn't recorded. Returns the removed row.
    async fn remove_instance_record(&self, id: ReplicaSetId, address: &InstanceAddress) -> Result<InstanceRecord>;

    /// Add and remove several rows in one step: all of it is applied or none of it.
    /// Fails like add_instance_record and remove_instance_record would.
    async fn apply_instance_changes(
        &self,
        id: ReplicaSetId,
        add: Vec<InstanceRecord>,
        remove: &[InstanceAddress],
    ) -> Result<()>;

    async fn update_replicaset_name(&self, id: ReplicaSetId, name: &str) -> Result<()>;

    async fn update_replicaset_topology(&self, id: ReplicaSetId, topology_type: TopologyType) -> Result<()>;

    /// Set the disabled flag, returning the previous value.
    async fn set_replicaset_disabled(&self, id: ReplicaSetId, disabled: bool) -> Result<bool>;

    /// Remove the replica set, all of its instance rows and its owning cluster in one step.
    async fn drop_replicaset(&self, id: ReplicaSetId) -> Result<()>;
}
