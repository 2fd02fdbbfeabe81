mod interface;

pub use self::interface::{provision_step, ProvisionOutcome, ProvisionStatus, ProvisioningInterface};
