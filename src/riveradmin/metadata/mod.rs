mod catalog;
mod model;
mod store;

pub use self::catalog::CatalogStore;
pub use self::model::{Cluster, ClusterId, InstanceRecord, ReplicaSet, ReplicaSetId, TopologyType};
pub use self::store::MetadataStore;
