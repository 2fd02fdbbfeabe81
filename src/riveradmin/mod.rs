pub mod common;
pub mod config;
pub mod server;
pub mod metadata;
pub mod group;
pub mod provision;
pub mod account;
pub mod replicaset;

pub use common::{Error, ErrorKind, FailureContext, MetadataEffect, Result, Step};
