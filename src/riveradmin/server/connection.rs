use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::riveradmin::{Error, ErrorKind, Result};
use crate::riveradmin::server::{GtidSet, InstanceAddress};

/// Group-membership state of a member as reported by the replication group itself.
#[derive(Display, EnumString, Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberState {
    Online,
    Recovering,
    Offline,
    Error,
    Unreachable,
}

impl MemberState {
    pub fn is_online(&self) -> bool {
        matches!(self, MemberState::Online)
    }
}

/// Replication role of a member. Recorded in the catalog and reported live.
#[derive(Display, EnumString, Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberRole {
    Primary,
    Secondary,
}

/// One row of a server's view of its replication group.
#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct GroupMember {
    pub address: InstanceAddress,
    pub state: MemberState,
    pub role: Option<MemberRole>,
}

impl GroupMember {
    pub fn new(address: InstanceAddress, state: MemberState, role: Option<MemberRole>) -> Self {
        Self{address, state, role}
    }
}

/// Credentials and limits used to open an administrative connection.
#[derive(Clone)]
pub struct ConnectOptions {
    pub user: String,
    pub password: String,
    /// Bound on connecting and on every individual query over the connection.
    pub timeout: Duration,
}

impl Debug for ConnectOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("user", &self.user)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// An open administrative session to one server instance.
/// Implementations report a refused statement as ErrorKind::AccessDenied and
/// network failures as ErrorKind::ConnectionError.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    fn address(&self) -> &InstanceAddress;

    /// The name of the replication group this instance belongs to, or None if it
    /// isn't running group replication.
    async fn group_name(&self) -> Result<Option<String>>;

    /// The group membership as seen by this instance's group communication layer.
    async fn group_members(&self) -> Result<Vec<GroupMember>>;

    async fn gtid_executed(&self) -> Result<GtidSet>;

    async fn gtid_purged(&self) -> Result<GtidSet>;

    /// True if asynchronous (source-replica) replication channels are configured.
    async fn has_async_replication_channels(&self) -> Result<bool>;

    /// Execute an administrative statement that returns no rows.
    async fn execute(&self, statement: &str) -> Result<()>;
}

/// Opens ServerConnections. Supplied by the embedding application.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &InstanceAddress, options: &ConnectOptions) -> Result<Arc<dyn ServerConnection>>;
}

/// Connect to address, bounded by options.timeout.
/// A timeout or connection failure is reported as ErrorKind::Unreachable.
pub async fn connect_bounded(
    connector: &dyn Connector,
    address: &InstanceAddress,
    options: &ConnectOptions,
) -> Result<Arc<dyn ServerConnection>> {
    match tokio::time::timeout(options.timeout, connector.connect(address, options)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => match e.kind() {
            ErrorKind::AccessDenied(msg) => Err(Error::privilege(format!("cannot log in to {}: {}", address, msg))),
            _ => {
                debug!(%address, %e, "connect failed");
                Err(Error::unreachable(address))
            }
        },
        Err(_) => {
            debug!(%address, "connect timed out");
            Err(Error::unreachable(address))
        }
    }
}

/// Run a query future bounded by timeout, mapping elapsed time to ErrorKind::Timeout.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T>
    where F: std::future::Future<Output=Result<T>>
{
    tokio::time::timeout(timeout, fut).await?
}
