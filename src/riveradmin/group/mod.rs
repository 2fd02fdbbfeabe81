mod probe;

pub use self::probe::{Confidence, GroupMembershipProbe, LiveMember, LiveMembership, ProbePolicy};
