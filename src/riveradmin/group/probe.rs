use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use strum::Display;
use tracing::{debug, warn};

use crate::riveradmin::config::{DisagreementPolicy, ProbeSettings, TieBreak};
use crate::riveradmin::server::{
    bounded, connect_bounded, ConnectOptions, Connector, GroupMember, InstanceAddress, MemberRole, MemberState,
};
use crate::riveradmin::{Error, ErrorKind, Result};

/// How many responders saw an address when their views were merged.
#[derive(Display, Serialize, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Seen by a strict majority of the responders.
    Quorum,
    Minority,
}

/// A member of the live group, as merged from the responders' views.
#[derive(Serialize, Debug, Clone, Eq, PartialEq)]
pub struct LiveMember {
    pub address: InstanceAddress,
    pub state: MemberState,
    pub role: Option<MemberRole>,
    pub confidence: Confidence,
}

/// The live membership of a replication group at the time it was probed.
#[derive(Serialize, Debug, Clone, Default)]
pub struct LiveMembership {
    pub group_name: Option<String>,
    pub members: Vec<LiveMember>,
    /// The responder whose view was taken as authoritative.
    pub authority: Option<InstanceAddress>,
    /// Probed addresses that answered with a view of the group.
    pub responders: Vec<InstanceAddress>,
    /// Probed addresses that answered but aren't running in the group.
    pub outside_group: Vec<InstanceAddress>,
    /// Probed addresses that could not be reached within the timeout.
    pub unreachable: Vec<InstanceAddress>,
    /// True if the responders disagreed and members is the union of their views.
    pub inconsistent: bool,
}

impl LiveMembership {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &InstanceAddress) -> Option<&LiveMember> {
        self.members.iter().find(|m| &m.address == address)
    }

    pub fn contains(&self, address: &InstanceAddress) -> bool {
        self.get(address).is_some()
    }

    pub fn addresses(&self) -> Vec<InstanceAddress> {
        self.members.iter().map(|m| m.address.clone()).collect()
    }

    /// Returns an Inconsistent error describing the disagreement, to be surfaced as a warning.
    pub fn warning(&self) -> Option<Error> {
        if !self.inconsistent {
            return None;
        }
        let minority: Vec<String> = self.members.iter()
            .filter(|m| m.confidence == Confidence::Minority)
            .map(|m| m.address.to_string())
            .collect();
        Some(Error::inconsistent(format!(
            "{} responders reported different members; seen by a minority only: [{}]",
            self.responders.len(),
            minority.join(", "),
        )))
    }
}

/// The policy used to pick the authoritative view and to resolve disagreements.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbePolicy {
    pub tie_break: TieBreak,
    pub disagreement: DisagreementPolicy,
}

impl From<&ProbeSettings> for ProbePolicy {
    fn from(settings: &ProbeSettings) -> Self {
        Self{
            tie_break: settings.tie_break,
            disagreement: settings.disagreement,
        }
    }
}

struct View {
    origin_index: usize,
    address: InstanceAddress,
    group_name: Option<String>,
    members: Vec<GroupMember>,
}

impl View {
    fn member_set(&self) -> BTreeSet<&InstanceAddress> {
        self.members.iter().map(|m| &m.address).collect()
    }
}

/// Queries instances for their view of the replication group they belong to.
pub struct GroupMembershipProbe {
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    policy: ProbePolicy,
}

impl GroupMembershipProbe {
    /// options.timeout bounds the whole probe of one address (connect plus queries).
    pub fn new(connector: Arc<dyn Connector>, options: ConnectOptions, policy: ProbePolicy) -> Self {
        Self{connector, options, policy}
    }

    pub fn policy(&self) -> ProbePolicy {
        self.policy
    }

    /// Probe every seed concurrently and merge the answers.
    /// seeds[0] is the origin (the instance the caller connected to first).
    /// preferred lists catalog members most recently recorded ONLINE first, for TieBreak::Catalog.
    /// Fails with Unreachable if seeds is non-empty and none of them answer.
    pub async fn probe(&self, seeds: &[InstanceAddress], preferred: &[InstanceAddress]) -> Result<LiveMembership> {
        let mut unique: Vec<&InstanceAddress> = Vec::with_capacity(seeds.len());
        for seed in seeds {
            if !unique.contains(&seed) {
                unique.push(seed);
            }
        }
        if unique.is_empty() {
            return Ok(LiveMembership::empty());
        }

        let answers = join_all(unique.iter().enumerate().map(|(i, addr)| async move {
            let result = match tokio::time::timeout(self.options.timeout, self.probe_one(addr)).await {
                Ok(r) => r,
                Err(_) => Err(Error::unreachable(addr)),
            };
            (i, *addr, result)
        })).await;

        let mut live = LiveMembership::empty();
        let mut views = Vec::new();
        for (origin_index, addr, result) in answers {
            match result {
                Ok(view) if view.members.is_empty() || view.group_name.is_none() => {
                    debug!(address = %addr, "instance is not running group replication");
                    live.outside_group.push(addr.clone());
                },
                Ok(mut view) => {
                    view.origin_index = origin_index;
                    views.push(view);
                },
                Err(e) => {
                    if !matches!(e.kind(), ErrorKind::Unreachable(_) | ErrorKind::Timeout | ErrorKind::ConnectionError(_)) {
                        // e.g. a privilege problem: the member is up but we can't see its view
                        warn!(address = %addr, %e, "cannot read group membership");
                    } else {
                        debug!(address = %addr, %e, "member did not answer the probe");
                    }
                    live.unreachable.push(addr.clone());
                },
            }
        }

        if views.is_empty() {
            if live.outside_group.is_empty() {
                let all: Vec<String> = unique.iter().map(|a| a.to_string()).collect();
                return Err(Error::unreachable(format!("none of [{}]", all.join(", "))));
            }
            return Ok(live);
        }

        let refs: Vec<&View> = views.iter().collect();
        let group_name = refs[self.pick_authority(&refs, preferred)].group_name.clone();
        // Members of some other group have nothing to say about this one
        let (views, foreign): (Vec<View>, Vec<View>) = views.into_iter().partition(|v| v.group_name == group_name);
        for v in foreign {
            warn!(address = %v.address, group = ?v.group_name, expected = ?group_name, "member reports a different group");
            live.outside_group.push(v.address);
        }
        let refs: Vec<&View> = views.iter().collect();
        let authority = self.pick_authority(&refs, preferred);

        live.group_name = group_name;
        live.responders = views.iter().map(|v| v.address.clone()).collect();
        self.merge(&mut live, &views, authority, preferred);
        if let Some(w) = live.warning() {
            warn!(%w, "live membership is inconsistent, using the union of all views");
        }
        Ok(live)
    }

    async fn probe_one(&self, address: &InstanceAddress) -> Result<View> {
        let conn = connect_bounded(&*self.connector, address, &self.options).await?;
        let group_name = bounded(self.options.timeout, conn.group_name()).await?;
        let members = if group_name.is_some() {
            bounded(self.options.timeout, conn.group_members()).await?
        } else {
            Vec::new()
        };
        Ok(View{
            origin_index: 0,
            address: address.clone(),
            group_name,
            members,
        })
    }

    /// Largest view wins, ties are broken by the configured TieBreak. Returns an index into views.
    fn pick_authority(&self, views: &[&View], preferred: &[InstanceAddress]) -> usize {
        let catalog_rank = |v: &View| preferred.iter().position(|p| p == &v.address).unwrap_or(usize::MAX);
        let mut best = 0;
        for (i, v) in views.iter().enumerate().skip(1) {
            let b = views[best];
            let better = match v.members.len().cmp(&b.members.len()) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => match self.policy.tie_break {
                    TieBreak::Origin => v.origin_index < b.origin_index,
                    TieBreak::Catalog => {
                        (catalog_rank(*v), v.origin_index) < (catalog_rank(b), b.origin_index)
                    },
                },
            };
            if better {
                best = i;
            }
        }
        best
    }

    fn merge(&self, live: &mut LiveMembership, views: &[View], authority: usize, preferred: &[InstanceAddress]) {
        let sets: Vec<BTreeSet<&InstanceAddress>> = views.iter().map(View::member_set).collect();
        let n = views.len();

        if sets.iter().all(|s| s == &sets[authority]) {
            self.take_view(live, &views[authority]);
            return;
        }

        if self.policy.disagreement == DisagreementPolicy::Majority {
            for set in &sets {
                let agreeing: Vec<usize> = (0..n).filter(|&j| &sets[j] == set).collect();
                if agreeing.len() * 2 > n {
                    let majority: Vec<&View> = agreeing.iter().map(|&j| &views[j]).collect();
                    let best = self.pick_authority(&majority, preferred);
                    debug!(agreeing = agreeing.len(), responders = n, "majority of responders agree, using their view");
                    self.take_view(live, majority[best]);
                    return;
                }
            }
        }

        // Union of all views, authority's order first
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&j| (j != authority, views[j].origin_index));
        let mut members: Vec<LiveMember> = Vec::new();
        for &j in &order {
            for m in &views[j].members {
                if members.iter().any(|lm| lm.address == m.address) {
                    continue;
                }
                let seen_by = sets.iter().filter(|s| s.contains(&m.address)).count();
                members.push(LiveMember{
                    address: m.address.clone(),
                    state: m.state,
                    role: m.role,
                    confidence: if seen_by * 2 > n { Confidence::Quorum } else { Confidence::Minority },
                });
            }
        }
        live.authority = Some(views[authority].address.clone());
        live.members = members;
        live.inconsistent = true;
    }

    fn take_view(&self, live: &mut LiveMembership, view: &View) {
        live.authority = Some(view.address.clone());
        live.members = view.members.iter().map(|m| LiveMember{
            address: m.address.clone(),
            state: m.state,
            role: m.role,
            confidence: Confidence::Quorum,
        }).collect();
        live.inconsistent = false;
    }
}
