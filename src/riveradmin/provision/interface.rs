use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use strum::Display;
use tracing::{debug, warn};

use crate::riveradmin::account::ReplicationAccount;
use crate::riveradmin::metadata::TopologyType;
use crate::riveradmin::server::InstanceAddress;
use crate::riveradmin::{Error, Result};

#[derive(Display, Serialize, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    Ok,
    Error,
}

/// What the provisioning tool reported for one action.
/// diagnostic is free text for humans; it's logged and surfaced, never parsed.
#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct ProvisionOutcome {
    pub status: ProvisionStatus,
    pub diagnostic: String,
}

impl ProvisionOutcome {
    pub fn ok<S: Into<String>>(diagnostic: S) -> Self {
        Self{status: ProvisionStatus::Ok, diagnostic: diagnostic.into()}
    }

    pub fn error<S: Into<String>>(diagnostic: S) -> Self {
        Self{status: ProvisionStatus::Error, diagnostic: diagnostic.into()}
    }

    pub fn is_ok(&self) -> bool {
        self.status == ProvisionStatus::Ok
    }
}

/// Performs the server-side group replication configuration. The action is out of
/// process and may partially succeed; anything other than Ok is a failure of that step.
#[async_trait]
pub trait ProvisioningInterface: Send + Sync {
    /// Configure group replication on target and start it. An empty peer_seeds
    /// bootstraps a new group with target as its only member.
    async fn configure_and_start(
        &self,
        target: &InstanceAddress,
        peer_seeds: &[InstanceAddress],
        recovery_account: &ReplicationAccount,
        topology_type: TopologyType,
    ) -> ProvisionOutcome;

    /// Restart group replication on target, recovering from peer.
    async fn rejoin(&self, target: &InstanceAddress, peer: &InstanceAddress) -> ProvisionOutcome;

    /// Stop group replication on target so it leaves the group.
    async fn leave(&self, target: &InstanceAddress) -> ProvisionOutcome;
}

/// Await a provisioning action bounded by timeout.
/// Returns the diagnostic text on success, ProvisioningFailed on an error outcome, and
/// ConnectionError if the tool didn't answer in time (the server-side outcome is then unknown).
pub async fn provision_step<F>(action: &'static str, target: &InstanceAddress, timeout: Duration, fut: F) -> Result<String>
    where F: Future<Output=ProvisionOutcome>
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(outcome) if outcome.is_ok() => {
            debug!(action, %target, diagnostic = %outcome.diagnostic, "provisioning succeeded");
            Ok(outcome.diagnostic)
        },
        Ok(outcome) => {
            warn!(action, %target, diagnostic = %outcome.diagnostic, "provisioning failed");
            Err(Error::provisioning_failed(target, outcome.diagnostic))
        },
        Err(_) => {
            warn!(action, %target, timeout_secs = timeout.as_secs(), "provisioning timed out");
            Err(Error::connection(format!(
                "{} on {} did not finish within {}s, its outcome is unknown; run rescan before retrying",
                action, target, timeout.as_secs()
            )))
        },
    }
}
