mod manager;
mod options;
mod report;
mod state;

pub use manager::{describe_all, Collaborators, ReplicaSetManager};
pub use options::*;
pub use report::*;
pub use state::{InstanceState, Observation};
