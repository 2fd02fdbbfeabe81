mod errors;

pub use self::errors::{Error, ErrorKind, FailureContext, MetadataEffect, Result, Step};
