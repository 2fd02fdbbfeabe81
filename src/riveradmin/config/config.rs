use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize};

use crate::riveradmin::config::probe::{ProbeSettings, RecoveryAccountSettings};
use crate::riveradmin::server::{ConnectOptions, DEFAULT_PORT};
use crate::riveradmin::{Error, Result};

// Things that are not configurable, but might be one day
pub const MAX_ACCOUNT_ATTEMPTS: u32 = 3;
pub const ACCOUNT_RETRY_DELAY_MS: u64 = 200;
pub const RECOVERY_PASSWORD_LEN: usize = 32;

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    /// config_path is the path of the loaded config file
    #[serde(skip)]
    pub config_path: PathBuf,
    /// metadata_path is the yaml file holding the metadata catalog. If omitted the catalog is kept in memory.
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,
    /// admin_user is the account used for administrative connections to every instance. Default root.
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    /// admin_password for admin_user
    #[serde(default)]
    pub admin_password: String,
    /// default_port is used for instance addresses given without a port. Default 3306.
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// connect_timeout_ms bounds connecting to a single instance and each query on it. Default 10 seconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u32,
    /// provisioning_timeout_seconds bounds each call to the provisioning tool. Default 10 minutes.
    /// Joining an instance can involve a full data copy, so keep this generous.
    #[serde(default = "default_provisioning_timeout_seconds")]
    pub provisioning_timeout_seconds: u32,
    /// live membership probe settings
    #[serde(default)]
    pub probe: ProbeSettings,
    /// internal replication account settings
    #[serde(default)]
    pub recovery_account: RecoveryAccountSettings,
}

fn default_admin_user() -> String { "root".to_string() }
const fn default_port() -> u16 { DEFAULT_PORT }
const fn default_connect_timeout_ms() -> u32 { 10_000 }
const fn default_provisioning_timeout_seconds() -> u32 { 10 * 60 }

impl Default for Settings {
    fn default() -> Self {
        Self{
            config_path: PathBuf::new(),
            metadata_path: None,
            admin_user: default_admin_user(),
            admin_password: String::new(),
            default_port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            provisioning_timeout_seconds: default_provisioning_timeout_seconds(),
            probe: ProbeSettings::default(),
            recovery_account: RecoveryAccountSettings::default(),
        }
    }
}

impl Settings {
    pub(crate) fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;
        if self.admin_user.is_empty() {
            return Err(Error::new("admin_user cannot be empty"));
        }
        if self.default_port == 0 {
            self.default_port = default_port();
        }
        if self.connect_timeout_ms == 0 {
            self.connect_timeout_ms = default_connect_timeout_ms();
        }
        if self.provisioning_timeout_seconds == 0 {
            return Err(Error::new("provisioning_timeout_seconds cannot be 0"));
        }
        if let Some(metadata_path) = &self.metadata_path {
            // Relative paths are relative to the config file, not the working directory
            if metadata_path.is_relative() {
                if let Some(dir) = self.config_path.parent() {
                    self.metadata_path = Some(dir.join(metadata_path));
                }
            }
        }
        self.probe.load()?;
        self.recovery_account.load()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms as u64)
    }

    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_seconds as u64)
    }

    /// Options for administrative connections made by the manager.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions{
            user: self.admin_user.clone(),
            password: self.admin_password.clone(),
            timeout: self.connect_timeout(),
        }
    }

    /// Options for the per-member connections made while probing live membership.
    pub fn probe_connect_options(&self) -> ConnectOptions {
        ConnectOptions{
            timeout: self.probe.timeout(),
            ..self.connect_options()
        }
    }
}
