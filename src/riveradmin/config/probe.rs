use std::time::Duration;

use serde::{Deserialize};

use crate::riveradmin::config::enums::{DisagreementPolicy, TieBreak};
use crate::riveradmin::{Error, Result};

#[derive(Deserialize, Clone, Debug)]
pub struct ProbeSettings {
    /// timeout_ms bounds connecting to and querying one member. Members are probed in parallel,
    /// so this is also roughly the bound on a whole probe. Default 5000.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u32,
    /// tie_break picks the authoritative member between equally large views: origin or catalog. Default origin.
    #[serde(default)]
    pub tie_break: TieBreak,
    /// disagreement is warn or majority, see DisagreementPolicy. Default warn.
    #[serde(default)]
    pub disagreement: DisagreementPolicy,
}

const fn default_probe_timeout_ms() -> u32 { 5000 }

impl Default for ProbeSettings {
    fn default() -> Self {
        Self{
            timeout_ms: default_probe_timeout_ms(),
            tie_break: TieBreak::default(),
            disagreement: DisagreementPolicy::default(),
        }
    }
}

impl ProbeSettings {
    pub(crate) fn load(&mut self) -> Result<()> {
        if self.timeout_ms == 0 {
            self.timeout_ms = default_probe_timeout_ms();
        }
        if self.timeout_ms > 10 * 60 * 1000 {
            return Err(Error::new("probe timeout_ms cannot be more than 10 minutes"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct RecoveryAccountSettings {
    /// prefix of the generated account user names, followed by 16 hex digits. Default riveradmin_r.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// host the account may connect from. Default %.
    #[serde(default = "default_account_host")]
    pub host: String,
}

fn default_prefix() -> String { "riveradmin_r".to_string() }
fn default_account_host() -> String { "%".to_string() }

impl Default for RecoveryAccountSettings {
    fn default() -> Self {
        Self{
            prefix: default_prefix(),
            host: default_account_host(),
        }
    }
}

impl RecoveryAccountSettings {
    pub(crate) fn load(&mut self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::new("recovery_account prefix cannot be empty"));
        }
        // user names are limited to 32 characters and we append 16 hex digits
        if self.prefix.len() > 16 {
            return Err(Error::new("recovery_account prefix cannot be longer than 16 characters"));
        }
        if !self.prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::new("recovery_account prefix may only contain letters, digits and _"));
        }
        if self.host.is_empty() {
            self.host = default_account_host();
        }
        if self.host.contains('\'') {
            return Err(Error::new("recovery_account host cannot contain quotes"));
        }
        Ok(())
    }
}
