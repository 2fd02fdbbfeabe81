use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::riveradmin::{Error, Result};
use crate::riveradmin::metadata::{
    Cluster, ClusterId, InstanceRecord, MetadataStore, ReplicaSet, ReplicaSetId, TopologyType,
};
use crate::riveradmin::server::InstanceAddress;

/// The three logical tables, keyed by catalog id.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
struct Catalog {
    next_id: u64,
    clusters: BTreeMap<ClusterId, Cluster>,
    replicasets: BTreeMap<ReplicaSetId, ReplicaSet>,
    /// Instance rows per replica set, in recorded-join order.
    instances: BTreeMap<ReplicaSetId, Vec<InstanceRecord>>,
}

impl Catalog {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn replicaset_mut(&mut self, id: ReplicaSetId) -> Result<&mut ReplicaSet> {
        self.replicasets.get_mut(&id).ok_or_else(|| Error::not_found(format!("replica set {}", id)))
    }
}

/// MetadataStore backed by an in-process arena, optionally persisted to a yaml file.
///
/// Mutations are applied to a copy of the catalog which is persisted (write to a
/// temporary file then rename) before it replaces the current state, so a failed write
/// leaves both the file and the in-memory catalog unchanged. File I/O goes through
/// tokio::fs and the catalog sits behind a tokio Mutex, so a slow disk never blocks
/// a runtime worker.
pub struct CatalogStore {
    catalog: Mutex<Catalog>,
    path: Option<PathBuf>,
}

impl CatalogStore {
    /// A catalog that lives only as long as this process.
    pub fn in_memory() -> Self {
        Self{
            catalog: Mutex::new(Catalog::default()),
            path: None,
        }
    }

    /// Open the catalog file at path, starting empty if it doesn't exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let catalog = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let catalog: Catalog = serde_yaml::from_str(&text)?;
            info!(path = %path.to_string_lossy(), replicasets = catalog.replicasets.len(), "loaded metadata catalog");
            catalog
        } else {
            debug!(path = %path.to_string_lossy(), "metadata catalog does not exist yet, starting empty");
            Catalog::default()
        };
        Ok(Self{
            catalog: Mutex::new(catalog),
            path: Some(path),
        })
    }

    async fn read<T>(&self, f: impl FnOnce(&Catalog) -> Result<T>) -> Result<T> {
        let catalog = self.catalog.lock().await;
        f(&catalog)
    }

    /// The lock is held until the file is replaced, so writers are serialized.
    async fn mutate<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut Catalog) -> Result<T>
    {
        let mut catalog = self.catalog.lock().await;
        let mut next = catalog.clone();
        let result = f(&mut next)?;
        self.persist(&next).await?;
        *catalog = next;
        Ok(result)
    }

    async fn persist(&self, catalog: &Catalog) -> Result<()> {
        if let Some(path) = &self.path {
            let text = serde_yaml::to_string(catalog)?;
            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, text).await?;
            tokio::fs::rename(&tmp, path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for CatalogStore {
    async fn create_cluster(
        &self,
        cluster_name: &str,
        replicaset_name: &str,
        topology_type: TopologyType,
    ) -> Result<(ClusterId, ReplicaSetId)> {
        if cluster_name.is_empty() {
            return Err(Error::invalid_argument("cluster name cannot be empty"));
        }
        self.mutate(|c| {
            if c.clusters.values().any(|cl| cl.name == cluster_name) {
                return Err(Error::duplicate_name(cluster_name));
            }
            let cluster_id = ClusterId(c.next_id());
            let replicaset_id = ReplicaSetId(c.next_id());
            c.clusters.insert(cluster_id, Cluster{
                id: cluster_id,
                name: cluster_name.to_string(),
                replicaset_id,
            });
            c.replicasets.insert(replicaset_id, ReplicaSet{
                id: replicaset_id,
                cluster_id,
                name: replicaset_name.to_string(),
                topology_type,
                disabled: false,
            });
            c.instances.insert(replicaset_id, Vec::new());
            Ok((cluster_id, replicaset_id))
        }).await
    }

    async fn load_cluster(&self, id: ClusterId) -> Result<Cluster> {
        self.read(|c| c.clusters.get(&id).cloned().ok_or_else(|| Error::not_found(format!("cluster {}", id)))).await
    }

    async fn rename_cluster(&self, id: ClusterId, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("cluster name cannot be empty"));
        }
        self.mutate(|c| {
            if c.clusters.values().any(|cl| cl.name == name && cl.id != id) {
                return Err(Error::duplicate_name(name));
            }
            let cluster = c.clusters.get_mut(&id).ok_or_else(|| Error::not_found(format!("cluster {}", id)))?;
            cluster.name = name.to_string();
            Ok(())
        }).await
    }

    async fn list_replicasets(&self) -> Result<Vec<ReplicaSet>> {
        self.read(|c| Ok(c.replicasets.values().cloned().collect())).await
    }

    async fn load_replicaset(&self, id: ReplicaSetId) -> Result<ReplicaSet> {
        self.read(|c| c.replicasets.get(&id).cloned().ok_or_else(|| Error::not_found(format!("replica set {}", id)))).await
    }

    async fn list_instances(&self, id: ReplicaSetId) -> Result<Vec<InstanceRecord>> {
        self.read(|c| c.instances.get(&id).cloned().ok_or_else(|| Error::not_found(format!("replica set {}", id)))).await
    }

    async fn add_instance_record(&self, id: ReplicaSetId, record: InstanceRecord) -> Result<()> {
        self.mutate(|c| {
            let rows = c.instances.get_mut(&id).ok_or_else(|| Error::not_found(format!("replica set {}", id)))?;
            if rows.iter().any(|r| r.address == record.address) {
                return Err(Error::duplicate_address(&record.address));
            }
            rows.push(record);
            Ok(())
        }).await
    }

    async fn remove_instance_record(&self, id: ReplicaSetId, address: &InstanceAddress) -> Result<InstanceRecord> {
        self.mutate(|c| {
            let rows = c.instances.get_mut(&id).ok_or_else(|| Error::not_found(format!("replica set {}", id)))?;
            let i = rows.iter().position(|r| &r.address == address)
                .ok_or_else(|| Error::not_found(format!("instance {} in replica set {}", address, id)))?;
            // remove, not swap_remove: the order is the recorded-join order
            Ok(rows.remove(i))
        }).await
    }

    async fn apply_instance_changes(
        &self,
        id: ReplicaSetId,
        add: Vec<InstanceRecord>,
        remove: &[InstanceAddress],
    ) -> Result<()> {
        self.mutate(|c| {
            let rows = c.instances.get_mut(&id).ok_or_else(|| Error::not_found(format!("replica set {}", id)))?;
            for address in remove {
                let i = rows.iter().position(|r| &r.address == address)
                    .ok_or_else(|| Error::not_found(format!("instance {} in replica set {}", address, id)))?;
                rows.remove(i);
            }
            for record in add {
                if rows.iter().any(|r| r.address == record.address) {
                    return Err(Error::duplicate_address(&record.address));
                }
                rows.push(record);
            }
            Ok(())
        }).await
    }

    async fn update_replicaset_name(&self, id: ReplicaSetId, name: &str) -> Result<()> {
        self.mutate(|c| {
            c.replicaset_mut(id)?.name = name.to_string();
            Ok(())
        }).await
    }

    async fn update_replicaset_topology(&self, id: ReplicaSetId, topology_type: TopologyType) -> Result<()> {
        self.mutate(|c| {
            c.replicaset_mut(id)?.topology_type = topology_type;
            Ok(())
        }).await
    }

    async fn set_replicaset_disabled(&self, id: ReplicaSetId, disabled: bool) -> Result<bool> {
        self.mutate(|c| {
            let rs = c.replicaset_mut(id)?;
            let previous = rs.disabled;
            rs.disabled = disabled;
            Ok(previous)
        }).await
    }

    async fn drop_replicaset(&self, id: ReplicaSetId) -> Result<()> {
        self.mutate(|c| {
            let rs = c.replicasets.remove(&id).ok_or_else(|| Error::not_found(format!("replica set {}", id)))?;
            c.instances.remove(&id);
            c.clusters.remove(&rs.cluster_id);
            Ok(())
        }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::riveradmin::ErrorKind;
    use crate::riveradmin::server::MemberRole;

    fn record(addr: &str) -> InstanceRecord {
        InstanceRecord::new(addr.parse().unwrap(), MemberRole::Secondary)
    }

    #[tokio::test]
    async fn test_instance_rows_keep_join_order() {
        let store = CatalogStore::in_memory();
        let (_, rs) = store.create_cluster("c1", "default", TopologyType::PrimaryMaster).await.unwrap();
        for addr in &["db3:3306", "db1:3306", "db2:3306"] {
            store.add_instance_record(rs, record(addr)).await.unwrap();
        }
        store.remove_instance_record(rs, &"db1:3306".parse().unwrap()).await.unwrap();
        let addrs: Vec<String> = store.list_instances(rs).await.unwrap().iter().map(|r| r.address.to_string()).collect();
        assert_eq!(addrs, vec!["db3:3306", "db2:3306"]);
    }

    #[tokio::test]
    async fn test_duplicates_and_missing() {
        let store = CatalogStore::in_memory();
        let (_, rs) = store.create_cluster("c1", "default", TopologyType::MultiMaster).await.unwrap();
        store.add_instance_record(rs, record("db1")).await.unwrap();
        let err = store.add_instance_record(rs, record("db1:3306")).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateAddress(String::new()));

        let err = store.remove_instance_record(rs, &"db9".parse().unwrap()).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotFound(String::new()));

        let err = store.create_cluster("c1", "other", TopologyType::MultiMaster).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateName(String::new()));
        assert_eq!(store.load_replicaset(ReplicaSetId(999)).await.unwrap_err().kind(), &ErrorKind::NotFound(String::new()));
    }

    #[tokio::test]
    async fn test_apply_changes_is_all_or_nothing() {
        let store = CatalogStore::in_memory();
        let (_, rs) = store.create_cluster("c1", "default", TopologyType::PrimaryMaster).await.unwrap();
        store.add_instance_record(rs, record("db1")).await.unwrap();
        store.add_instance_record(rs, record("db2")).await.unwrap();

        // db9 isn't recorded, so removing db1 must not happen either
        let remove = vec!["db1".parse().unwrap(), "db9".parse().unwrap()];
        let err = store.apply_instance_changes(rs, vec![record("db3")], &remove).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotFound(String::new()));
        assert_eq!(store.list_instances(rs).await.unwrap().len(), 2);

        store.apply_instance_changes(rs, vec![record("db3")], &remove[..1]).await.unwrap();
        let addrs: Vec<String> = store.list_instances(rs).await.unwrap().iter().map(|r| r.address.to_string()).collect();
        assert_eq!(addrs, vec!["db2:3306", "db3:3306"]);
    }

    #[tokio::test]
    async fn test_drop_replicaset_removes_cluster() {
        let store = CatalogStore::in_memory();
        let (cluster, rs) = store.create_cluster("c1", "default", TopologyType::PrimaryMaster).await.unwrap();
        store.add_instance_record(rs, record("db1")).await.unwrap();
        store.drop_replicaset(rs).await.unwrap();
        assert!(store.load_cluster(cluster).await.is_err());
        assert!(store.list_instances(rs).await.is_err());
        assert!(store.list_replicasets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_to_file() {
        let path = std::env::temp_dir().join(format!("riveradmin-catalog-{}.yaml", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let rs = {
            let store = CatalogStore::open(&path).unwrap();
            let (_, rs) = store.create_cluster("persisted", "default", TopologyType::PrimaryMaster).await.unwrap();
            store.add_instance_record(rs, record("[::1]:3310")).await.unwrap();
            store.set_replicaset_disabled(rs, true).await.unwrap();
            rs
        };
        let store = CatalogStore::open(&path).unwrap();
        let loaded = store.load_replicaset(rs).await.unwrap();
        assert!(loaded.disabled);
        let rows = store.list_instances(rs).await.unwrap();
        assert_eq!(rows[0].address.to_string(), "[::1]:3310");
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_file() {
        let path = std::env::temp_dir().join(format!("riveradmin-concurrent-{}.yaml", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let store = std::sync::Arc::new(CatalogStore::open(&path).unwrap());
        let (_, rs) = store.create_cluster("busy", "default", TopologyType::MultiMaster).await.unwrap();

        let writers: Vec<_> = (1..=16).map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.add_instance_record(rs, record(&format!("db{}", i))).await })
        }).collect();
        for result in futures::future::join_all(writers).await {
            result.unwrap().unwrap();
        }

        let reopened = CatalogStore::open(&path).unwrap();
        let mut addrs: Vec<String> = reopened.list_instances(rs).await.unwrap().iter().map(|r| r.address.to_string()).collect();
        addrs.sort();
        addrs.dedup();
        assert_eq!(addrs.len(), 16);
        std::fs::remove_file(&path).unwrap();
    }
}
