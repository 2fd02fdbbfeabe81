use crate::riveradmin::metadata::TopologyType;
use crate::riveradmin::server::{ConnectOptions, InstanceAddress};

/// Parameters of ReplicaSetManager::add_instance.
#[derive(Debug, Clone)]
pub struct AddInstanceRequest {
    pub address: InstanceAddress,
    /// Credentials for connecting to the candidate, if different from the configured admin account.
    pub connect: Option<ConnectOptions>,
    /// Free-form label stored with the instance record.
    pub label: Option<String>,
}

impl AddInstanceRequest {
    pub fn new(address: InstanceAddress) -> Self {
        Self{address, connect: None, label: None}
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_connect_options(mut self, options: ConnectOptions) -> Self {
        self.connect = Some(options);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove the metadata even if the target can't be reached or won't leave cleanly.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DissolveOptions {
    /// Skip members that are unreachable or fail to leave, and drop the metadata anyway.
    pub force: bool,
}

/// Rescan only reports by default. Each flag applies one half of the diff to the catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct RescanOptions {
    /// Record newly discovered live members.
    pub add_discovered: bool,
    /// Remove recorded members that are absent from the live group.
    pub remove_unavailable: bool,
}

/// Parameters of ReplicaSetManager::bootstrap: a new cluster whose replica set starts with seed.
#[derive(Debug, Clone)]
pub struct CreateClusterRequest {
    pub cluster_name: String,
    pub replicaset_name: String,
    pub topology_type: TopologyType,
    pub seed: AddInstanceRequest,
}

impl CreateClusterRequest {
    pub fn new<S: Into<String>>(cluster_name: S, seed: InstanceAddress) -> Self {
        Self{
            cluster_name: cluster_name.into(),
            replicaset_name: "default".to_string(),
            topology_type: TopologyType::default(),
            seed: AddInstanceRequest::new(seed),
        }
    }
}
