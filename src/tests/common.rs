use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::time::Duration;

use async_trait::async_trait;

use crate::riveradmin::account::ReplicationAccount;
use crate::riveradmin::config::{ProbeSettings, Settings};
use crate::riveradmin::metadata::{
    CatalogStore, Cluster, ClusterId, InstanceRecord, MetadataStore, ReplicaSet, ReplicaSetId, TopologyType,
};
use crate::riveradmin::provision::{ProvisionOutcome, ProvisioningInterface};
use crate::riveradmin::replicaset::{Collaborators, ReplicaSetManager};
use crate::riveradmin::server::{
    ConnectOptions, Connector, GroupMember, GtidSet, InstanceAddress, MemberRole, MemberState, ServerConnection,
};
use crate::riveradmin::{Error, Result};


pub const GROUP: &str = "8a94f357-aab4-11df-86ab-c80aa9429562";
pub const UUID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
pub const PROBE_TIMEOUT_MS: u32 = 300;
const FOREVER: Duration = Duration::from_secs(3600);

pub fn addr(s: &str) -> InstanceAddress {
    s.parse().unwrap()
}

/// GTIDs 1..=n from UUID.
pub fn gtids(n: u64) -> GtidSet {
    let mut set = GtidSet::new();
    if n > 0 {
        set.add(UUID, 1, n);
    }
    set
}

/// An overriding view of the group where every listed member is ONLINE.
pub fn online_view(members: &[&str]) -> Option<Vec<GroupMember>> {
    Some(members.iter().map(|m| GroupMember::new(addr(m), MemberState::Online, None)).collect())
}

/// One simulated server instance.
#[derive(Clone, Debug)]
pub struct FakeServer {
    pub address: InstanceAddress,
    pub reachable: bool,
    /// connect never returns
    pub hang: bool,
    /// execute fails with AccessDenied
    pub deny: bool,
    /// execute fails with a connection error this many more times
    pub execute_failures: u32,
    /// the group it runs in, None if group replication is stopped
    pub group: Option<String>,
    pub state: MemberState,
    pub role: Option<MemberRole>,
    /// overrides the membership this server reports
    pub view: Option<Vec<GroupMember>>,
    pub executed: GtidSet,
    pub purged: GtidSet,
    pub async_channels: bool,
    pub statements: Vec<String>,
}

impl FakeServer {
    fn new(address: InstanceAddress) -> Self {
        Self{
            address,
            reachable: true,
            hang: false,
            deny: false,
            execute_failures: 0,
            group: None,
            state: MemberState::Offline,
            role: None,
            view: None,
            executed: gtids(0),
            purged: gtids(0),
            async_channels: false,
            statements: Vec::new(),
        }
    }
}

/// A set of simulated servers. Implements Connector; clones share the same servers.
#[derive(Clone, Default)]
pub struct FakeFleet {
    servers: Arc<Mutex<Vec<FakeServer>>>,
    connects: Arc<AtomicUsize>,
}

impl FakeFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reachable server with no group replication running.
    pub fn add_server(&self, address: &str) {
        self.servers().push(FakeServer::new(addr(address)));
    }

    /// A reachable ONLINE member of GROUP holding n transactions.
    pub fn add_member(&self, address: &str, n: u64) {
        let mut server = FakeServer::new(addr(address));
        server.group = Some(GROUP.to_string());
        server.state = MemberState::Online;
        server.executed = gtids(n);
        self.servers().push(server);
    }

    pub fn update<F: FnOnce(&mut FakeServer)>(&self, address: &str, f: F) {
        let address = addr(address);
        let mut servers = self.servers();
        let server = servers.iter_mut().find(|s| s.address == address).expect("no such fake server");
        f(server);
    }

    pub fn get(&self, address: &str) -> FakeServer {
        let address = addr(address);
        self.servers().iter().find(|s| s.address == address).cloned().expect("no such fake server")
    }

    /// Take the server down: unreachable and, as far as the others can tell, expelled from the group.
    pub fn crash(&self, address: &str) {
        self.update(address, |s| {
            s.reachable = false;
            s.group = None;
        });
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Relaxed)
    }

    fn servers(&self) -> MutexGuard<'_, Vec<FakeServer>> {
        self.servers.lock().unwrap()
    }

    fn with<T, F: FnOnce(&mut FakeServer) -> T>(&self, address: &InstanceAddress, f: F) -> Result<T> {
        let mut servers = self.servers();
        match servers.iter_mut().find(|s| &s.address == address) {
            Some(server) if server.reachable => Ok(f(server)),
            _ => Err(Error::connection(format!("lost connection to {}", address))),
        }
    }

    fn members(&self, group: &str) -> Vec<GroupMember> {
        self.servers().iter()
            .filter(|s| s.group.as_deref() == Some(group))
            .map(|s| GroupMember::new(s.address.clone(), s.state, s.role))
            .collect()
    }
}

#[async_trait]
impl Connector for FakeFleet {
    async fn connect(&self, address: &InstanceAddress, _options: &ConnectOptions) -> Result<Arc<dyn ServerConnection>> {
        self.connects.fetch_add(1, Relaxed);
        let hang = self.with(address, |s| s.hang)?;
        if hang {
            tokio::time::sleep(FOREVER).await;
        }
        Ok(Arc::new(FakeConnection{fleet: self.clone(), address: address.clone()}))
    }
}

pub struct FakeConnection {
    fleet: FakeFleet,
    address: InstanceAddress,
}

#[async_trait]
impl ServerConnection for FakeConnection {
    fn address(&self) -> &InstanceAddress {
        &self.address
    }

    async fn group_name(&self) -> Result<Option<String>> {
        self.fleet.with(&self.address, |s| s.group.clone())
    }

    async fn group_members(&self) -> Result<Vec<GroupMember>> {
        let (group, view) = self.fleet.with(&self.address, |s| (s.group.clone(), s.view.clone()))?;
        match (view, group) {
            (Some(view), _) => Ok(view),
            (None, Some(group)) => Ok(self.fleet.members(&group)),
            (None, None) => Ok(Vec::new()),
        }
    }

    async fn gtid_executed(&self) -> Result<GtidSet> {
        self.fleet.with(&self.address, |s| s.executed.clone())
    }

    async fn gtid_purged(&self) -> Result<GtidSet> {
        self.fleet.with(&self.address, |s| s.purged.clone())
    }

    async fn has_async_replication_channels(&self) -> Result<bool> {
        self.fleet.with(&self.address, |s| s.async_channels)
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        self.fleet.with(&self.address, |s| {
            if s.deny {
                return Err(Error::access_denied(format!("CREATE USER denied on {}", s.address)));
            }
            if s.execute_failures > 0 {
                s.execute_failures -= 1;
                return Err(Error::connection("lost connection during query"));
            }
            s.statements.push(statement.to_string());
            Ok(())
        })?
    }
}

/// Provisioning tool that applies its actions to a FakeFleet.
pub struct FakeProvisioner {
    fleet: FakeFleet,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvisioner {
    pub fn new(fleet: FakeFleet) -> Self {
        Self{
            fleet,
            failing: Mutex::new(HashSet::new()),
            hanging: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make action ("configure_and_start", "rejoin" or "leave") report an error,
    /// or only that action on one target when given as "leave b:3306".
    pub fn fail(&self, action: &str) {
        self.failing.lock().unwrap().insert(action.to_string());
    }

    /// Make action never return.
    pub fn hang(&self, action: &'static str) {
        self.hanging.lock().unwrap().insert(action);
    }

    /// Every call so far, as "action target".
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn begin(&self, action: &'static str, target: &InstanceAddress) -> Option<ProvisionOutcome> {
        let call = format!("{} {}", action, target);
        self.calls.lock().unwrap().push(call.clone());
        let hang = self.hanging.lock().unwrap().contains(action);
        if hang {
            tokio::time::sleep(FOREVER).await;
        }
        let failing = self.failing.lock().unwrap().iter().any(|f| f == action || *f == call);
        if failing {
            return Some(ProvisionOutcome::error(format!("{} failed on {}: ERROR 3092", action, target)));
        }
        None
    }

    fn join(&self, target: &InstanceAddress, group: String) -> ProvisionOutcome {
        match self.fleet.with(target, |s| {
            s.group = Some(group);
            s.state = MemberState::Online;
        }) {
            Ok(()) => ProvisionOutcome::ok(format!("{} is ONLINE", target)),
            Err(e) => ProvisionOutcome::error(e.to_string()),
        }
    }
}

#[async_trait]
impl ProvisioningInterface for FakeProvisioner {
    async fn configure_and_start(
        &self,
        target: &InstanceAddress,
        peer_seeds: &[InstanceAddress],
        _recovery_account: &ReplicationAccount,
        _topology_type: TopologyType,
    ) -> ProvisionOutcome {
        if let Some(failed) = self.begin("configure_and_start", target).await {
            return failed;
        }
        let group = peer_seeds.iter()
            .find_map(|p| self.fleet.with(p, |s| s.group.clone()).ok().flatten())
            .unwrap_or_else(|| GROUP.to_string());
        self.join(target, group)
    }

    async fn rejoin(&self, target: &InstanceAddress, peer: &InstanceAddress) -> ProvisionOutcome {
        if let Some(failed) = self.begin("rejoin", target).await {
            return failed;
        }
        match self.fleet.with(peer, |s| s.group.clone()) {
            Ok(Some(group)) => self.join(target, group),
            _ => ProvisionOutcome::error(format!("peer {} is not in a group", peer)),
        }
    }

    async fn leave(&self, target: &InstanceAddress) -> ProvisionOutcome {
        if let Some(failed) = self.begin("leave", target).await {
            return failed;
        }
        match self.fleet.with(target, |s| {
            s.group = None;
            s.state = MemberState::Offline;
        }) {
            Ok(()) => ProvisionOutcome::ok("group replication stopped"),
            Err(e) => ProvisionOutcome::error(e.to_string()),
        }
    }
}

/// A CatalogStore whose writes can be made to fail.
pub struct FaultyStore {
    inner: CatalogStore,
    fail_writes: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self{inner: CatalogStore::in_memory(), fail_writes: AtomicBool::new(false)}
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected metadata write fault").into());
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FaultyStore {
    async fn create_cluster(&self, cluster_name: &str, replicaset_name: &str, topology_type: TopologyType) -> Result<(ClusterId, ReplicaSetId)> {
        self.check()?;
        self.inner.create_cluster(cluster_name, replicaset_name, topology_type).await
    }

    async fn load_cluster(&self, id: ClusterId) -> Result<Cluster> {
        self.inner.load_cluster(id).await
    }

    async fn rename_cluster(&self, id: ClusterId, name: &str) -> Result<()> {
        self.check()?;
        self.inner.rename_cluster(id, name).await
    }

    async fn list_replicasets(&self) -> Result<Vec<ReplicaSet>> {
        self.inner.list_replicasets().await
    }

    async fn load_replicaset(&self, id: ReplicaSetId) -> Result<ReplicaSet> {
        self.inner.load_replicaset(id).await
    }

    async fn list_instances(&self, id: ReplicaSetId) -> Result<Vec<InstanceRecord>> {
        self.inner.list_instances(id).await
    }

    async fn add_instance_record(&self, id: ReplicaSetId, record: InstanceRecord) -> Result<()> {
        self.check()?;
        self.inner.add_instance_record(id, record).await
    }

    async fn remove_instance_record(&self, id: ReplicaSetId, address: &InstanceAddress) -> Result<InstanceRecord> {
        self.check()?;
        self.inner.remove_instance_record(id, address).await
    }

    async fn apply_instance_changes(&self, id: ReplicaSetId, add: Vec<InstanceRecord>, remove: &[InstanceAddress]) -> Result<()> {
        self.check()?;
        self.inner.apply_instance_changes(id, add, remove).await
    }

    async fn update_replicaset_name(&self, id: ReplicaSetId, name: &str) -> Result<()> {
        self.check()?;
        self.inner.update_replicaset_name(id, name).await
    }

    async fn update_replicaset_topology(&self, id: ReplicaSetId, topology_type: TopologyType) -> Result<()> {
        self.check()?;
        self.inner.update_replicaset_topology(id, topology_type).await
    }

    async fn set_replicaset_disabled(&self, id: ReplicaSetId, disabled: bool) -> Result<bool> {
        self.check()?;
        self.inner.set_replicaset_disabled(id, disabled).await
    }

    async fn drop_replicaset(&self, id: ReplicaSetId) -> Result<()> {
        self.check()?;
        self.inner.drop_replicaset(id).await
    }
}

/// Short timeouts so the unreachable and hanging cases finish quickly.
pub fn settings() -> Settings {
    Settings{
        connect_timeout_ms: 500,
        provisioning_timeout_seconds: 1,
        probe: ProbeSettings{timeout_ms: PROBE_TIMEOUT_MS, ..ProbeSettings::default()},
        ..Settings::default()
    }
}

/// A fleet, provisioner and store wired together.
pub struct Harness {
    pub fleet: FakeFleet,
    pub provisioner: Arc<FakeProvisioner>,
    pub store: Arc<FaultyStore>,
    pub settings: Settings,
}

impl Harness {
    pub fn new() -> Self {
        let fleet = FakeFleet::new();
        Self{
            provisioner: Arc::new(FakeProvisioner::new(fleet.clone())),
            store: Arc::new(FaultyStore::new()),
            settings: settings(),
            fleet,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators{
            store: self.store.clone(),
            connector: Arc::new(self.fleet.clone()),
            provisioner: self.provisioner.clone(),
        }
    }

    /// A recorded replica set whose members are all running in GROUP with 10 transactions.
    pub async fn replicaset(&self, members: &[&str]) -> ReplicaSetManager {
        let (_, id) = self.store.create_cluster("test", "default", TopologyType::PrimaryMaster).await.unwrap();
        for (i, member) in members.iter().enumerate() {
            self.fleet.add_member(member, 10);
            let role = TopologyType::PrimaryMaster.default_role(i);
            self.store.add_instance_record(id, InstanceRecord::new(addr(member), role)).await.unwrap();
        }
        ReplicaSetManager::new(id, self.collaborators(), &self.settings)
    }

    pub async fn recorded(&self, manager: &ReplicaSetManager) -> Vec<String> {
        manager.catalog_addresses().await.unwrap().iter().map(|a| a.to_string()).collect()
    }
}
