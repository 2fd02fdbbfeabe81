use std::fmt::Display;
use std::{fmt, io, result};
use std::sync::PoisonError;

use strum::Display;

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
    context: Option<Box<FailureContext>>,
}

/// The step of a multi-step operation that produced an error.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    LoadCatalog,
    ProbeLive,
    Validate,
    CreateAccount,
    Provision,
    Leave,
    WriteMetadata,
    RemoveMetadata,
    AutoFix,
}

/// What an operation left behind in the metadata store when it failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MetadataEffect {
    Untouched,
    Written,
}

/// Where a failure happened and what it left behind.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FailureContext {
    pub operation: &'static str,
    pub step: Step,
    pub metadata: MetadataEffect,
}

#[derive(Debug)]
pub enum ErrorKind {
    NotFound(String),
    DuplicateAddress(String),
    DuplicateName(String),
    Unreachable(String),
    ConnectionError(String),
    Timeout,
    Inconsistent(String),
    AlreadyMember { address: String, group: String },
    NoHealthyPeer(String),
    UnreachableRemoveRequiresForce(String),
    /// The server side changed but the metadata bookkeeping did not complete.
    PartialSuccess { address: String, cause: String },
    PrivilegeError(String),
    /// Raised by ServerConnection implementations when the server refused a statement.
    AccessDenied(String),
    ProvisioningFailed { target: String, diagnostic: String },
    PreconditionFailed(String),
    Disabled(String),
    Cancelled,
    InvalidArgument(String),
    PoisonError,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error::from_kind(ErrorKind::StringError(s.to_string()))
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        Error {
            err: Box::new(kind),
            context: None,
        }
    }

    pub fn not_found<S: ToString>(what: S) -> Self {
        Error::from_kind(ErrorKind::NotFound(what.to_string()))
    }

    pub fn duplicate_address<S: ToString>(address: S) -> Self {
        Error::from_kind(ErrorKind::DuplicateAddress(address.to_string()))
    }

    pub fn duplicate_name<S: ToString>(name: S) -> Self {
        Error::from_kind(ErrorKind::DuplicateName(name.to_string()))
    }

    pub fn unreachable<S: ToString>(address: S) -> Self {
        Error::from_kind(ErrorKind::Unreachable(address.to_string()))
    }

    pub fn connection<S: ToString>(msg: S) -> Self {
        Error::from_kind(ErrorKind::ConnectionError(msg.to_string()))
    }

    pub fn timeout() -> Self {
        Error::from_kind(ErrorKind::Timeout)
    }

    pub fn inconsistent<S: ToString>(msg: S) -> Self {
        Error::from_kind(ErrorKind::Inconsistent(msg.to_string()))
    }

    pub fn already_member<A: ToString, G: ToString>(address: A, group: G) -> Self {
        Error::from_kind(ErrorKind::AlreadyMember {
            address: address.to_string(),
            group: group.to_string(),
        })
    }

    pub fn no_healthy_peer<S: ToString>(address: S) -> Self {
        Error::from_kind(ErrorKind::NoHealthyPeer(address.to_string()))
    }

    pub fn remove_requires_force<S: ToString>(address: S) -> Self {
        Error::from_kind(ErrorKind::UnreachableRemoveRequiresForce(address.to_string()))
    }

    pub fn partial_success<A: ToString, C: ToString>(address: A, cause: C) -> Self {
        Error::from_kind(ErrorKind::PartialSuccess {
            address: address.to_string(),
            cause: cause.to_string(),
        })
    }

    pub fn privilege<S: ToString>(msg: S) -> Self {
        Error::from_kind(ErrorKind::PrivilegeError(msg.to_string()))
    }

    pub fn access_denied<S: ToString>(msg: S) -> Self {
        Error::from_kind(ErrorKind::AccessDenied(msg.to_string()))
    }

    pub fn provisioning_failed<T: ToString, D: ToString>(target: T, diagnostic: D) -> Self {
        Error::from_kind(ErrorKind::ProvisioningFailed {
            target: target.to_string(),
            diagnostic: diagnostic.to_string(),
        })
    }

    pub fn precondition<S: ToString>(msg: S) -> Self {
        Error::from_kind(ErrorKind::PreconditionFailed(msg.to_string()))
    }

    pub fn disabled<S: ToString>(name: S) -> Self {
        Error::from_kind(ErrorKind::Disabled(name.to_string()))
    }

    pub fn cancelled() -> Self {
        Error::from_kind(ErrorKind::Cancelled)
    }

    pub fn invalid_argument<S: ToString>(msg: S) -> Self {
        Error::from_kind(ErrorKind::InvalidArgument(msg.to_string()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    pub fn context(&self) -> Option<&FailureContext> {
        self.context.as_deref()
    }

    /// Attach the failing step and metadata effect. The first context attached wins,
    /// so the innermost step that failed is the one reported.
    pub fn during(mut self, operation: &'static str, step: Step, metadata: MetadataEffect) -> Self {
        if self.context.is_none() {
            self.context = Some(Box::new(FailureContext { operation, step, metadata }));
        }
        self
    }

    /// True for network-boundary failures where re-running the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(*self.err, ErrorKind::Unreachable(_) | ErrorKind::ConnectionError(_) | ErrorKind::Timeout)
    }

    /// True if the live system was changed even though an error is being returned.
    pub fn is_partial_success(&self) -> bool {
        matches!(*self.err, ErrorKind::PartialSuccess { .. })
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::new(err)
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::from_kind(ErrorKind::StringError(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_kind(ErrorKind::IOError(err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::from_kind(ErrorKind::YAMLError(err))
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::new(err)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::timeout()
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_: PoisonError<Guard>) -> Self {
        Error::from_kind(ErrorKind::PoisonError)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{}: {} step failed: ", ctx.operation, ctx.step)?;
            Display::fmt(&self.err, f)?;
            write!(f, " ({})", ctx.metadata)
        } else {
            Display::fmt(&self.err, f)
        }
    }
}

impl std::error::Error for Error {}

impl Display for MetadataEffect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MetadataEffect::Untouched => f.write_str("metadata untouched"),
            MetadataEffect::Written => f.write_str("metadata written"),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::NotFound(what) => write!(f, "{} not found", what),
            ErrorKind::DuplicateAddress(addr) => write!(f, "instance {} is already recorded in the replica set", addr),
            ErrorKind::DuplicateName(name) => write!(f, "the name {} is already in use", name),
            ErrorKind::Unreachable(addr) => write!(f, "{} is unreachable", addr),
            ErrorKind::ConnectionError(msg) => write!(f, "connection error: {}", msg),
            ErrorKind::Timeout => f.write_str("operation timed out"),
            ErrorKind::Inconsistent(msg) => write!(f, "group members disagree on membership: {}", msg),
            ErrorKind::AlreadyMember { address, group } => {
                write!(f, "instance {} is already a member of group {}", address, group)
            }
            ErrorKind::NoHealthyPeer(addr) => {
                write!(f, "cannot rejoin {}: no ONLINE member remains to rejoin against", addr)
            }
            ErrorKind::UnreachableRemoveRequiresForce(addr) => {
                write!(f, "target {} is unreachable; retry with force to remove it from the metadata", addr)
            }
            ErrorKind::PartialSuccess { address, cause } => write!(
                f,
                "{} was changed on the server but the metadata was not updated ({}); run rescan to reconcile",
                address, cause
            ),
            ErrorKind::PrivilegeError(msg) => write!(f, "insufficient privileges: {}", msg),
            ErrorKind::AccessDenied(msg) => write!(f, "access denied: {}", msg),
            ErrorKind::ProvisioningFailed { target, diagnostic } => {
                write!(f, "provisioning {} failed: {}", target, diagnostic)
            }
            ErrorKind::PreconditionFailed(msg) => f.write_str(msg),
            ErrorKind::Disabled(name) => write!(f, "replica set {} is disabled", name),
            ErrorKind::Cancelled => f.write_str("operation cancelled"),
            ErrorKind::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the mutex"),
            ErrorKind::StringError(s) => f.write_str(s),
            ErrorKind::IOError(e) => Display::fmt(e, f),
            ErrorKind::YAMLError(e) => Display::fmt(e, f),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
