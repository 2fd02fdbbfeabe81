use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::riveradmin::account::{ReplicationAccount, ReplicationAccountManager};
use crate::riveradmin::config::{Settings, ACCOUNT_RETRY_DELAY_MS, MAX_ACCOUNT_ATTEMPTS};
use crate::riveradmin::group::{GroupMembershipProbe, LiveMember, ProbePolicy};
use crate::riveradmin::metadata::{InstanceRecord, MetadataStore, ReplicaSet, ReplicaSetId, TopologyType};
use crate::riveradmin::provision::{provision_step, ProvisioningInterface};
use crate::riveradmin::replicaset::options::{
    AddInstanceRequest, CreateClusterRequest, DissolveOptions, RemoveOptions, RescanOptions,
};
use crate::riveradmin::replicaset::report::{
    describe_projection, rescan_report, status_projection, AddInstanceOutcome, DissolveOutcome,
    InstanceStateReport, Recoverability, RejoinOutcome, RemoveOutcome, ReplicaSetDescription,
    ReplicaSetStatus, RescanReport,
};
use crate::riveradmin::replicaset::state::{InstanceState, Observation};
use crate::riveradmin::server::{
    bounded, connect_bounded, ConnectOptions, Connector, InstanceAddress, MemberState, ServerConnection,
};
use crate::riveradmin::{Error, ErrorKind, MetadataEffect, Result, Step};

/// The collaborators a ReplicaSetManager drives. Cheap to clone and share between managers.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn MetadataStore>,
    pub connector: Arc<dyn Connector>,
    pub provisioner: Arc<dyn ProvisioningInterface>,
}

/// Reconciles the catalog of one replica set with its live replication group.
///
/// Holds no membership state between calls: every operation loads the catalog, then
/// probes the live group, then calls the provisioning tool, then writes the catalog,
/// in that order. Operations on the same replica set must be serialized by the caller.
pub struct ReplicaSetManager {
    id: ReplicaSetId,
    deps: Collaborators,
    probe: GroupMembershipProbe,
    accounts: ReplicationAccountManager,
    options: ConnectOptions,
    provisioning_timeout: Duration,
    cancel: CancellationToken,
}

impl ReplicaSetManager {
    pub fn new(id: ReplicaSetId, deps: Collaborators, settings: &Settings) -> Self {
        let probe = GroupMembershipProbe::new(
            deps.connector.clone(),
            settings.probe_connect_options(),
            ProbePolicy::from(&settings.probe),
        );
        Self{
            id,
            probe,
            accounts: ReplicationAccountManager::new(&settings.recovery_account, settings.connect_timeout()),
            options: settings.connect_options(),
            provisioning_timeout: settings.provisioning_timeout(),
            cancel: CancellationToken::new(),
            deps,
        }
    }

    /// Operations stop before their next pre-provisioning step once token is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> ReplicaSetId {
        self.id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a cluster and its replica set, then add the seed instance, which bootstraps the group.
    /// If the seed can't be added and no server was changed, the new catalog entries are dropped again.
    pub async fn bootstrap(deps: Collaborators, settings: &Settings, request: CreateClusterRequest) -> Result<(Self, AddInstanceOutcome)> {
        const OP: &str = "bootstrap";
        let (cluster_id, id) = deps.store
            .create_cluster(&request.cluster_name, &request.replicaset_name, request.topology_type)
            .await
            .map_err(|e| e.during(OP, Step::WriteMetadata, MetadataEffect::Untouched))?;
        info!(cluster = %request.cluster_name, %cluster_id, replicaset = %id, "created cluster");

        let manager = Self::new(id, deps, settings);
        match manager.add_instance(request.seed).await {
            Ok(outcome) => Ok((manager, outcome)),
            Err(e) if server_may_have_changed(&e) => {
                warn!(%e, "keeping the new cluster, the seed instance may have started a group");
                Err(e)
            },
            Err(e) => {
                if let Err(drop_err) = manager.deps.store.drop_replicaset(id).await {
                    error!(%drop_err, "could not drop the new cluster after the seed failed");
                    return Err(Error::new(format!("{}; dropping the new cluster also failed: {}", e, drop_err))
                        .during(OP, Step::RemoveMetadata, MetadataEffect::Written));
                }
                Err(e)
            },
        }
    }

    /// Add an instance to the replica set: configure group replication on it, then record it.
    #[instrument(skip(self, request), fields(replicaset = %self.id, target = %request.address))]
    pub async fn add_instance(&self, request: AddInstanceRequest) -> Result<AddInstanceOutcome> {
        const OP: &str = "add_instance";
        let validate = |e: Error| e.during(OP, Step::Validate, MetadataEffect::Untouched);
        let target = &request.address;

        let obs = self.observe(OP).await?;
        self.ensure_enabled(&obs.replicaset, OP)?;
        match obs.classify(target) {
            InstanceState::Unknown => {},
            InstanceState::LiveOnly => return Err(validate(Error::precondition(format!(
                "{} is already an active member of the group but isn't recorded; run rescan with add_discovered to record it",
                target
            )))),
            _ => return Err(validate(Error::duplicate_address(target))),
        }
        // An empty catalog means target bootstraps the group; otherwise it needs an ONLINE peer
        let peers = obs.online_peers(target);
        if peers.is_empty() && !obs.catalog.is_empty() {
            self.ensure_group_observed(&obs, OP)?;
            return Err(validate(Error::precondition(format!(
                "no ONLINE member of replica set {} to add {} to; rejoin its members first",
                obs.replicaset.name, target
            ))));
        }
        self.checkpoint(OP, Step::Validate)?;

        let candidate = self.connect(target, request.connect.as_ref()).await.map_err(validate)?;
        if let Some(group) = self.query(candidate.group_name()).await.map_err(validate)? {
            if obs.live.group_name.as_deref() != Some(group.as_str()) {
                return Err(validate(Error::already_member(target, group)));
            }
            return Err(validate(Error::precondition(format!(
                "{} is already running group replication for this replica set; run rescan", target
            ))));
        }

        let donor = match peers.first() {
            Some(peer) => Some(self.connect(peer, None).await.map_err(validate)?),
            None => None,
        };
        self.check_joinable(&*candidate, donor.as_deref(), false).await.map_err(validate)?;

        self.checkpoint(OP, Step::CreateAccount)?;
        // With no peer the candidate bootstraps the group and holds its own account
        let admin: &dyn ServerConnection = donor.as_deref().unwrap_or(&*candidate);
        let account = self.create_account(admin, target).await
            .map_err(|e| e.during(OP, Step::CreateAccount, MetadataEffect::Untouched))?;

        if let Err(e) = self.checkpoint(OP, Step::Provision) {
            self.drop_account(admin, target).await;
            return Err(e);
        }
        debug!(seeds = ?peers, "configuring group replication");
        let provisioned = provision_step(
            "configure_and_start",
            target,
            self.provisioning_timeout,
            self.deps.provisioner.configure_and_start(target, &peers, &account, obs.replicaset.topology_type),
        ).await;
        let diagnostic = match provisioned {
            Ok(diagnostic) => diagnostic,
            Err(e) => {
                // After a timeout the instance may have joined and still need its account
                if matches!(e.kind(), ErrorKind::ProvisioningFailed{..}) {
                    self.drop_account(admin, target).await;
                }
                return Err(e.during(OP, Step::Provision, MetadataEffect::Untouched));
            },
        };

        let role = obs.replicaset.topology_type.default_role(obs.catalog.len());
        let record = InstanceRecord{
            label: request.label.clone(),
            recovery_account: Some(account.user.clone()),
            ..InstanceRecord::new(target.clone(), role)
        };
        if let Err(e) = self.deps.store.add_instance_record(self.id, record).await {
            error!(%e, "instance joined the group but its metadata could not be written");
            return Err(Error::partial_success(target, e).during(OP, Step::WriteMetadata, MetadataEffect::Untouched));
        }
        info!(%role, "added instance");
        Ok(AddInstanceOutcome{
            address: target.clone(),
            role,
            peer_seeds: peers,
            recovery_account: account.user,
            diagnostic,
            warnings: obs.warnings(),
        })
    }

    /// Bring a recorded instance back into the group, recovering from the earliest-joined ONLINE member.
    /// A no-op if the instance is already ONLINE.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn rejoin_instance(&self, address: &InstanceAddress) -> Result<RejoinOutcome> {
        const OP: &str = "rejoin_instance";
        let validate = |e: Error| e.during(OP, Step::Validate, MetadataEffect::Untouched);

        let obs = self.observe(OP).await?;
        self.ensure_enabled(&obs.replicaset, OP)?;
        match obs.classify(address) {
            InstanceState::Unknown | InstanceState::LiveOnly => {
                return Err(validate(Error::not_found(format!("instance {} in replica set {}", address, obs.replicaset.name))));
            },
            InstanceState::MemberConsistent => {
                info!("instance is already ONLINE, nothing to do");
                return Ok(RejoinOutcome::AlreadyOnline);
            },
            InstanceState::MemberDiverged if obs.live_member(address).map(|m| m.state) == Some(MemberState::Recovering) => {
                return Err(validate(Error::precondition(format!(
                    "{} is still recovering; wait for recovery to finish before rejoining", address
                ))));
            },
            InstanceState::MemberDiverged | InstanceState::CatalogOnly => {},
        }

        let peer = match obs.healthy_peers(address).first() {
            Some(r) => r.address.clone(),
            None => return Err(validate(Error::no_healthy_peer(address))),
        };
        self.checkpoint(OP, Step::Validate)?;
        let target = self.connect(address, None).await.map_err(validate)?;
        let donor = self.connect(&peer, None).await.map_err(validate)?;
        self.check_joinable(&*target, Some(&*donor), true).await.map_err(validate)?;

        self.checkpoint(OP, Step::Provision)?;
        debug!(%peer, "rejoining");
        let diagnostic = provision_step("rejoin", address, self.provisioning_timeout, self.deps.provisioner.rejoin(address, &peer))
            .await
            .map_err(|e| e.during(OP, Step::Provision, MetadataEffect::Untouched))?;
        info!(%peer, "rejoined instance");
        Ok(RejoinOutcome::Rejoined{peer, diagnostic})
    }

    /// Make a recorded instance leave the group and remove its record.
    /// Without force the instance must be reachable; with force the record is removed regardless.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn remove_instance(&self, address: &InstanceAddress, options: RemoveOptions) -> Result<RemoveOutcome> {
        const OP: &str = "remove_instance";
        let validate = |e: Error| e.during(OP, Step::Validate, MetadataEffect::Untouched);

        let obs = self.observe(OP).await?;
        self.ensure_enabled(&obs.replicaset, OP)?;
        let record = match obs.record(address) {
            Some(record) => record,
            None => return Err(validate(Error::not_found(format!("instance {} in replica set {}", address, obs.replicaset.name)))),
        };
        self.checkpoint(OP, Step::Validate)?;

        let mut warnings = Vec::new();
        let reachable = match self.connect(address, None).await {
            Ok(_) => true,
            Err(e) if options.force => {
                warn!(%e, "target is unreachable, removing it from the metadata anyway");
                warnings.push(e.to_string());
                false
            },
            Err(e) if matches!(e.kind(), ErrorKind::Unreachable(_)) => {
                return Err(validate(Error::remove_requires_force(address)));
            },
            Err(e) => return Err(validate(e)),
        };

        let mut left_group = false;
        if reachable && obs.live.contains(address) {
            self.checkpoint(OP, Step::Leave)?;
            match provision_step("leave", address, self.provisioning_timeout, self.deps.provisioner.leave(address)).await {
                Ok(_) => left_group = true,
                Err(e) if options.force => {
                    warn!(%e, "clean leave failed, removing from the metadata anyway");
                    warnings.push(e.to_string());
                },
                Err(e) => return Err(e.during(OP, Step::Leave, MetadataEffect::Untouched)),
            }
        }

        if let Err(e) = self.deps.store.remove_instance_record(self.id, address).await {
            if left_group {
                error!(%e, "instance left the group but its metadata could not be removed");
                return Err(Error::partial_success(address, e).during(OP, Step::RemoveMetadata, MetadataEffect::Untouched));
            }
            return Err(e.during(OP, Step::RemoveMetadata, MetadataEffect::Untouched));
        }
        if record.recovery_account.is_some() {
            if let Some(peer) = obs.healthy_peers(address).first() {
                match self.connect(&peer.address, None).await {
                    Ok(admin) => self.drop_account(&*admin, address).await,
                    Err(e) => warn!(%e, "cannot drop the recovery account"),
                }
            }
        }
        info!(left_group, "removed instance");
        Ok(RemoveOutcome{address: address.clone(), left_group, warnings})
    }

    /// Make every recorded instance leave the group, then drop the replica set and its cluster
    /// from the catalog in one step. ONLINE members leave first, unavailable ones last.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn dissolve(&self, options: DissolveOptions) -> Result<DissolveOutcome> {
        const OP: &str = "dissolve";
        let obs = self.observe(OP).await?;

        let mut order = obs.in_state(InstanceState::MemberConsistent);
        order.extend(obs.in_state(InstanceState::MemberDiverged));
        order.extend(obs.in_state(InstanceState::CatalogOnly));

        let reachable: Vec<bool> = join_all(order.iter().map(|r| self.connect(&r.address, None)))
            .await
            .into_iter()
            .map(|c| c.is_ok())
            .collect();
        let unreachable: Vec<String> = order.iter().zip(&reachable)
            .filter(|(_, ok)| !**ok)
            .map(|(r, _)| r.address.to_string())
            .collect();
        if !unreachable.is_empty() && !options.force {
            return Err(Error::remove_requires_force(unreachable.join(", "))
                .during(OP, Step::Validate, MetadataEffect::Untouched));
        }
        self.checkpoint(OP, Step::Leave)?;

        let mut outcome = DissolveOutcome{unrecorded: obs.newly_discovered(), ..DissolveOutcome::default()};
        if !outcome.unrecorded.is_empty() {
            warn!(unrecorded = ?outcome.unrecorded, "group has members that were never recorded, leaving them running");
        }
        // Instances this call made leave the group; their rows still say they are members
        let mut departed: Vec<String> = Vec::new();
        for (record, reachable) in order.iter().zip(reachable) {
            let address = &record.address;
            if !reachable {
                warn!(%address, "skipping unreachable instance");
                outcome.skipped.push(address.clone());
                continue;
            }
            if !obs.live.contains(address) {
                outcome.left.push(address.clone());
                continue;
            }
            match provision_step("leave", address, self.provisioning_timeout, self.deps.provisioner.leave(address)).await {
                Ok(_) => {
                    departed.push(address.to_string());
                    outcome.left.push(address.clone());
                },
                Err(e) if options.force => {
                    warn!(%address, %e, "instance did not leave cleanly");
                    outcome.skipped.push(address.clone());
                },
                Err(e) if departed.is_empty() => return Err(e.during(OP, Step::Leave, MetadataEffect::Untouched)),
                Err(e) => {
                    error!(%address, %e, departed = ?departed, "dissolve stopped after some instances left the group");
                    return Err(Error::partial_success(departed.join(", "), e)
                        .during(OP, Step::Leave, MetadataEffect::Untouched));
                },
            }
        }

        if let Err(e) = self.deps.store.drop_replicaset(self.id).await {
            if !departed.is_empty() {
                error!(%e, "instances left the group but the replica set metadata could not be dropped");
                return Err(Error::partial_success(departed.join(", "), e)
                    .during(OP, Step::RemoveMetadata, MetadataEffect::Untouched));
            }
            return Err(e.during(OP, Step::RemoveMetadata, MetadataEffect::Untouched));
        }
        info!(left = outcome.left.len(), skipped = outcome.skipped.len(), "dissolved replica set");
        Ok(outcome)
    }

    /// Report the drift between catalog and live group. Only touches the catalog if
    /// options ask for it, and then only after the report is computed.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn rescan(&self, options: RescanOptions) -> Result<RescanReport> {
        const OP: &str = "rescan";
        let obs = self.observe(OP).await?;
        let mut report = rescan_report(&obs);
        info!(
            newly_discovered = report.newly_discovered_instances.len(),
            unavailable = report.unavailable_instances.len(),
            diverged = report.diverged_instances.len(),
            "rescanned replica set"
        );
        if !options.add_discovered && !options.remove_unavailable {
            return Ok(report);
        }
        self.ensure_enabled(&obs.replicaset, OP)?;
        if !obs.catalog.is_empty() {
            self.ensure_group_observed(&obs, OP)?;
        }

        let removed = if options.remove_unavailable {
            report.unavailable_instances.clone()
        } else {
            Vec::new()
        };
        let mut recorded = obs.catalog.len() - removed.len();
        let mut added = Vec::new();
        if options.add_discovered {
            for address in &report.newly_discovered_instances {
                if let Some(member) = obs.live_member(address) {
                    added.push(live_record(obs.replicaset.topology_type, recorded, member));
                    recorded += 1;
                }
            }
        }
        if added.is_empty() && removed.is_empty() {
            return Ok(report);
        }

        report.added = added.iter().map(|r| r.address.clone()).collect();
        self.deps.store.apply_instance_changes(self.id, added, &removed)
            .await
            .map_err(|e| e.during(OP, Step::AutoFix, MetadataEffect::Untouched))?;
        info!(added = ?report.added, removed = ?removed, "applied rescan changes to the metadata");
        report.removed = removed;
        Ok(report)
    }

    /// Refuse further mutating operations, keeping the metadata. Idempotent.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn disable(&self) -> Result<()> {
        self.set_disabled("disable", true).await
    }

    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn enable(&self) -> Result<()> {
        self.set_disabled("enable", false).await
    }

    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn rename_cluster(&self, name: &str) -> Result<()> {
        const OP: &str = "rename_cluster";
        let (rs, _) = self.load(OP).await?;
        self.ensure_enabled(&rs, OP)?;
        self.deps.store.rename_cluster(rs.cluster_id, name)
            .await
            .map_err(|e| e.during(OP, Step::WriteMetadata, MetadataEffect::Untouched))
    }

    /// The classification of one address.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn check_instance_state(&self, address: &InstanceAddress) -> Result<InstanceStateReport> {
        let obs = self.observe("check_instance_state").await?;
        Ok(InstanceStateReport::from_observation(&obs, address))
    }

    /// The classification of one address plus whether its transactions let it recover
    /// from the group. recoverability is None if there's nothing to compare against.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn retrieve_instance_state(&self, address: &InstanceAddress) -> Result<InstanceStateReport> {
        const OP: &str = "retrieve_instance_state";
        let validate = |e: Error| e.during(OP, Step::Validate, MetadataEffect::Untouched);
        let obs = self.observe(OP).await?;
        let mut report = InstanceStateReport::from_observation(&obs, address);

        let authority = obs.live.authority.as_ref()
            .filter(|a| *a != address && obs.live_member(a).map_or(false, |m| m.state.is_online()))
            .cloned();
        let reference = match authority.or_else(|| obs.online_peers(address).into_iter().next()) {
            Some(reference) => reference,
            None => {
                debug!("no ONLINE member to compare against");
                return Ok(report);
            },
        };
        let target = match self.connect(address, None).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(%e, "instance is unreachable, recoverability unknown");
                return Ok(report);
            },
        };
        let peer = self.connect(&reference, None).await.map_err(validate)?;
        let executed = self.query(target.gtid_executed()).await.map_err(validate)?;
        let reference_executed = self.query(peer.gtid_executed()).await.map_err(validate)?;
        let reference_purged = self.query(peer.gtid_purged()).await.map_err(validate)?;

        report.recoverability = Some(Recoverability::assess(&executed, &reference_executed, &reference_purged));
        report.compared_with = Some(reference);
        Ok(report)
    }

    pub async fn get_newly_discovered_instances(&self) -> Result<Vec<InstanceAddress>> {
        Ok(self.observe("get_newly_discovered_instances").await?.newly_discovered())
    }

    pub async fn get_unavailable_instances(&self) -> Result<Vec<InstanceAddress>> {
        Ok(self.observe("get_unavailable_instances").await?.unavailable())
    }

    /// Record a live member without touching any server.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn add_instance_metadata(&self, address: &InstanceAddress) -> Result<()> {
        const OP: &str = "add_instance_metadata";
        let validate = |e: Error| e.during(OP, Step::Validate, MetadataEffect::Untouched);
        let obs = self.observe(OP).await?;
        self.ensure_enabled(&obs.replicaset, OP)?;
        let member = match (obs.classify(address), obs.live_member(address)) {
            (InstanceState::LiveOnly, Some(member)) => member,
            (InstanceState::Unknown, _) => return Err(validate(Error::precondition(format!(
                "{} is not a member of the group; use add_instance to add it", address
            )))),
            _ => return Err(validate(Error::duplicate_address(address))),
        };
        let record = live_record(obs.replicaset.topology_type, obs.catalog.len(), member);
        self.deps.store.add_instance_record(self.id, record)
            .await
            .map_err(|e| e.during(OP, Step::WriteMetadata, MetadataEffect::Untouched))?;
        info!("recorded instance");
        Ok(())
    }

    /// Remove a record without touching any server.
    #[instrument(skip(self), fields(replicaset = %self.id))]
    pub async fn remove_instance_metadata(&self, address: &InstanceAddress) -> Result<()> {
        const OP: &str = "remove_instance_metadata";
        let (rs, _) = self.load(OP).await?;
        self.ensure_enabled(&rs, OP)?;
        self.deps.store.remove_instance_record(self.id, address)
            .await
            .map_err(|e| e.during(OP, Step::RemoveMetadata, MetadataEffect::Untouched))?;
        info!("removed instance record");
        Ok(())
    }

    /// Recorded addresses in join order.
    pub async fn catalog_addresses(&self) -> Result<Vec<InstanceAddress>> {
        let (_, catalog) = self.load("catalog_addresses").await?;
        Ok(catalog.into_iter().map(|r| r.address).collect())
    }

    /// Addresses of the live group, as reported by the authoritative member.
    pub async fn live_addresses(&self) -> Result<Vec<InstanceAddress>> {
        Ok(self.observe("live_addresses").await?.live.addresses())
    }

    pub async fn status(&self) -> Result<ReplicaSetStatus> {
        Ok(status_projection(&self.observe("status").await?))
    }

    /// The recorded topology. Doesn't contact any server.
    pub async fn describe(&self) -> Result<ReplicaSetDescription> {
        let (rs, catalog) = self.load("describe").await?;
        Ok(describe_projection(&rs, &catalog))
    }

    async fn load(&self, operation: &'static str) -> Result<(ReplicaSet, Vec<InstanceRecord>)> {
        let ctx = |e: Error| e.during(operation, Step::LoadCatalog, MetadataEffect::Untouched);
        let replicaset = self.deps.store.load_replicaset(self.id).await.map_err(ctx)?;
        let catalog = self.deps.store.list_instances(self.id).await.map_err(ctx)?;
        Ok((replicaset, catalog))
    }

    /// Load the catalog, then probe every recorded address.
    async fn observe(&self, operation: &'static str) -> Result<Observation> {
        let (replicaset, catalog) = self.load(operation).await?;
        let seeds: Vec<InstanceAddress> = catalog.iter().map(|r| r.address.clone()).collect();
        let mut online: Vec<&InstanceRecord> = catalog.iter().filter(|r| r.recorded_state.is_online()).collect();
        online.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        let preferred: Vec<InstanceAddress> = online.into_iter().map(|r| r.address.clone()).collect();

        match self.probe.probe(&seeds, &preferred).await {
            Ok(live) => {
                debug!(members = live.members.len(), authority = ?live.authority, "probed live group");
                Ok(Observation::new(replicaset, catalog, live))
            },
            Err(e) if matches!(e.kind(), ErrorKind::Unreachable(_)) => {
                warn!(%e, "no recorded instance answered, treating the live group as empty");
                Ok(Observation::unreachable(replicaset, catalog))
            },
            Err(e) => Err(e.during(operation, Step::ProbeLive, MetadataEffect::Untouched)),
        }
    }

    /// Fails unless the live group was seen. Catalog changes derived from the live view
    /// must not be made from a view that is empty only because nothing answered.
    fn ensure_group_observed(&self, obs: &Observation, operation: &'static str) -> Result<()> {
        if obs.probe_failed {
            return Err(Error::unreachable(format!("every recorded instance of replica set {}", obs.replicaset.name))
                .during(operation, Step::ProbeLive, MetadataEffect::Untouched));
        }
        if !obs.group_observed() {
            return Err(Error::precondition(format!(
                "no recorded instance of replica set {} is running group replication; rejoin its members first",
                obs.replicaset.name
            )).during(operation, Step::Validate, MetadataEffect::Untouched));
        }
        Ok(())
    }

    fn ensure_enabled(&self, replicaset: &ReplicaSet, operation: &'static str) -> Result<()> {
        if replicaset.disabled {
            return Err(Error::disabled(&replicaset.name).during(operation, Step::Validate, MetadataEffect::Untouched));
        }
        Ok(())
    }

    fn checkpoint(&self, operation: &'static str, step: Step) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!(%step, "cancelled");
            return Err(Error::cancelled().during(operation, step, MetadataEffect::Untouched));
        }
        Ok(())
    }

    async fn set_disabled(&self, operation: &'static str, disabled: bool) -> Result<()> {
        let previous = self.deps.store.set_replicaset_disabled(self.id, disabled)
            .await
            .map_err(|e| e.during(operation, Step::WriteMetadata, MetadataEffect::Untouched))?;
        if previous == disabled {
            debug!(disabled, "nothing to change");
        } else {
            info!(disabled, "changed replica set state");
        }
        Ok(())
    }

    async fn connect(&self, address: &InstanceAddress, options: Option<&ConnectOptions>) -> Result<Arc<dyn ServerConnection>> {
        connect_bounded(&*self.deps.connector, address, options.unwrap_or(&self.options)).await
    }

    async fn query<T, F>(&self, fut: F) -> Result<T>
        where F: std::future::Future<Output=Result<T>>
    {
        bounded(self.options.timeout, fut).await
    }

    /// Checks that target can join or rejoin by recovering from peer.
    /// require_transactions rejects a target with an empty GTID set (a rejoin needs existing data).
    async fn check_joinable(&self, target: &dyn ServerConnection, peer: Option<&dyn ServerConnection>, require_transactions: bool) -> Result<()> {
        let address = target.address();
        if self.query(target.has_async_replication_channels()).await? {
            return Err(Error::precondition(format!(
                "{} has asynchronous replication configured; remove those channels first", address
            )));
        }
        let peer = match peer {
            Some(peer) => peer,
            None => return Ok(()),
        };
        let executed = self.query(target.gtid_executed()).await?;
        let peer_executed = self.query(peer.gtid_executed()).await?;
        let peer_purged = self.query(peer.gtid_purged()).await?;
        match Recoverability::assess(&executed, &peer_executed, &peer_purged) {
            Recoverability::Recoverable => Ok(()),
            Recoverability::New if !require_transactions => Ok(()),
            Recoverability::New => Err(Error::precondition(format!(
                "{} has an empty GTID set; remove it and add it again", address
            ))),
            Recoverability::Diverged => Err(Error::precondition(format!(
                "{} has errant transactions not present in the group: {}",
                address, executed.subtract(&peer_executed)
            ))),
            Recoverability::LostTransactions => Err(Error::precondition(format!(
                "{} is missing purged transactions {} that {} can no longer provide",
                address, peer_purged.subtract(&executed), peer.address()
            ))),
        }
    }

    async fn create_account(&self, admin: &dyn ServerConnection, target: &InstanceAddress) -> Result<ReplicationAccount> {
        let mut attempt = 1;
        loop {
            match self.accounts.create_recovery_account(admin, target).await {
                Ok(account) => return Ok(account),
                Err(e) if attempt < MAX_ACCOUNT_ATTEMPTS && matches!(e.kind(), ErrorKind::ConnectionError(_)) => {
                    warn!(attempt, %e, "creating the recovery account failed, retrying");
                    tokio::time::sleep(Duration::from_millis(ACCOUNT_RETRY_DELAY_MS)).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn drop_account(&self, admin: &dyn ServerConnection, target: &InstanceAddress) {
        if let Err(e) = self.accounts.drop_recovery_account(admin, target).await {
            warn!(%target, %e, "cannot drop the recovery account");
        }
    }
}

/// The describe projection of every replica set in the catalog.
pub async fn describe_all(store: &dyn MetadataStore) -> Result<Vec<ReplicaSetDescription>> {
    let mut descriptions = Vec::new();
    for rs in store.list_replicasets().await? {
        let catalog = store.list_instances(rs.id).await?;
        descriptions.push(describe_projection(&rs, &catalog));
    }
    Ok(descriptions)
}

/// A catalog row for a member found live. The live role wins over the topology default.
fn live_record(topology_type: TopologyType, recorded: usize, member: &LiveMember) -> InstanceRecord {
    let role = member.role.unwrap_or_else(|| topology_type.default_role(recorded));
    InstanceRecord{
        recorded_state: member.state,
        ..InstanceRecord::new(member.address.clone(), role)
    }
}

fn server_may_have_changed(e: &Error) -> bool {
    e.is_partial_success()
        || matches!(
            (e.kind(), e.context().map(|c| c.step)),
            (ErrorKind::ConnectionError(_), Some(Step::Provision))
        )
}
