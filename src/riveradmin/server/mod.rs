mod address;
mod connection;
mod gtid;

pub use self::address::{InstanceAddress, DEFAULT_PORT};
pub use self::connection::{
    ConnectOptions, Connector, GroupMember, MemberRole, MemberState, ServerConnection, bounded, connect_bounded,
};
pub use self::gtid::GtidSet;
