use std::fmt::{self, Debug, Formatter};
use std::hash::Hasher;
use std::time::Duration;

use fnv::FnvHasher;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use tracing::{debug, info};

use crate::riveradmin::config::{RecoveryAccountSettings, RECOVERY_PASSWORD_LEN};
use crate::riveradmin::server::{bounded, InstanceAddress, ServerConnection};
use crate::riveradmin::{Error, ErrorKind, Result};

/// The credential a joining instance uses to replicate from its peers during recovery.
/// Only exists for the duration of the add or rejoin operation that created it; the
/// catalog records the user name, never the password.
#[derive(Serialize, Clone)]
pub struct ReplicationAccount {
    pub user: String,
    #[serde(skip)]
    pub password: String,
    pub host: String,
}

impl Debug for ReplicationAccount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicationAccount('{}'@'{}')", self.user, self.host)
    }
}

/// Creates and revokes the internal replication accounts used by joining instances.
pub struct ReplicationAccountManager {
    prefix: String,
    host: String,
    timeout: Duration,
}

impl ReplicationAccountManager {
    /// timeout bounds each statement.
    pub fn new(settings: &RecoveryAccountSettings, timeout: Duration) -> Self {
        Self{
            prefix: settings.prefix.clone(),
            host: settings.host.clone(),
            timeout,
        }
    }

    /// The account user name for target. Stable across calls so recreating the account
    /// replaces the previous one instead of accumulating stale accounts.
    pub fn account_user(&self, target: &InstanceAddress) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(target.to_string().as_bytes());
        format!("{}{:016x}", self.prefix, hasher.finish())
    }

    /// Create (or recreate) the recovery account for target using the admin connection.
    /// Fails with PrivilegeError if the admin account can't manage users and
    /// ConnectionError on network failure (retryable).
    pub async fn create_recovery_account(&self, admin: &dyn ServerConnection, target: &InstanceAddress) -> Result<ReplicationAccount> {
        let account = ReplicationAccount{
            user: self.account_user(target),
            password: generate_password(),
            host: self.host.clone(),
        };
        let grantee = format!("'{}'@'{}'", account.user, account.host);
        debug!(%target, via = %admin.address(), user = %account.user, "creating recovery account");

        self.execute(admin, &format!("DROP USER IF EXISTS {}", grantee)).await?;
        self.execute(admin, &format!("CREATE USER {} IDENTIFIED BY '{}'", grantee, account.password)).await?;
        self.execute(admin, &format!("GRANT REPLICATION SLAVE ON *.* TO {}", grantee)).await?;

        info!(%target, user = %account.user, "created recovery account");
        Ok(account)
    }

    /// Revoke the recovery account for target, if it exists.
    pub async fn drop_recovery_account(&self, admin: &dyn ServerConnection, target: &InstanceAddress) -> Result<()> {
        let user = self.account_user(target);
        self.execute(admin, &format!("DROP USER IF EXISTS '{}'@'{}'", user, self.host)).await?;
        debug!(%target, %user, "dropped recovery account");
        Ok(())
    }

    async fn execute(&self, admin: &dyn ServerConnection, statement: &str) -> Result<()> {
        bounded(self.timeout, admin.execute(statement)).await.map_err(|e| match e.kind() {
            ErrorKind::AccessDenied(msg) => Error::privilege(format!(
                "{} cannot manage replication accounts: {}", admin.address(), msg
            )),
            ErrorKind::Timeout | ErrorKind::Unreachable(_) => Error::connection(format!(
                "{} did not respond while managing replication accounts", admin.address()
            )),
            _ => e,
        })
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECOVERY_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ReplicationAccountManager {
        ReplicationAccountManager::new(&RecoveryAccountSettings::default(), Duration::from_secs(1))
    }

    #[test]
    fn test_account_user_is_stable_per_address() {
        let accounts = manager();
        let a: InstanceAddress = "db1:3306".parse().unwrap();
        let b: InstanceAddress = "db2:3306".parse().unwrap();

        let user = accounts.account_user(&a);
        assert!(user.starts_with("riveradmin_r"));
        assert_eq!(user.len(), "riveradmin_r".len() + 16);
        assert_eq!(user, accounts.account_user(&"db1:3306".parse().unwrap()));
        assert_ne!(user, accounts.account_user(&b));
    }

    #[test]
    fn test_password_is_never_shown() {
        let password = generate_password();
        assert_eq!(password.len(), RECOVERY_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_password());

        let account = ReplicationAccount{user: "riveradmin_r1".to_string(), password, host: "%".to_string()};
        let shown = format!("{:?}", account);
        assert!(!shown.contains(&account.password));
        assert!(!serde_yaml::to_string(&account).unwrap().contains(&account.password));
    }
}
