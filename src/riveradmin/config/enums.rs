use serde::{Deserialize};

/// Which responder is authoritative when two live views have the same size.
#[derive(Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    // Origin prefers the first address supplied to the probe (the one the caller connected to)
    Origin,
    // Catalog prefers the instance most recently recorded ONLINE in the metadata, then the origin.
    // recorded_state is written when a row is recorded and not refreshed afterwards, so this is
    // the latest-joined instance that was ONLINE when it was recorded.
    Catalog,
}

impl Default for TieBreak {
    fn default() -> Self {
        TieBreak::Origin
    }
}

/// What to do when reachable members report different membership sets.
#[derive(Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DisagreementPolicy {
    // Warn returns the union of all views flagged inconsistent, with per-address confidence
    Warn,
    // Majority silently uses a view reported identically by a strict majority of responders, else behaves like Warn
    Majority,
}

impl Default for DisagreementPolicy {
    fn default() -> Self {
        DisagreementPolicy::Warn
    }
}
