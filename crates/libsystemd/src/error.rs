//! Error types shared across the unit manager.
//!
//! Two layers, per spec §7 and §9's "Error convention":
//!
//! - [`ManagerErrno`] is the small negative-errno-shaped contract named
//!   throughout spec §4.F.2/§7/§8 (`-EBADR`, `-EALREADY`, ...). It is what
//!   callers of `start`/`stop`/`reload`/`kill` match on to decide whether to
//!   retry.
//! - [`UnitOperationError`]/[`UnitOperationErrorReason`] carry the errno
//!   alongside a human-readable reason and the unit that failed, matching the
//!   shape already used at the `Unit::activate`/`deactivate` call sites this
//!   crate inherited from the teacher.
//!
//! Configuration-value errors are deliberately *not* modeled as `Result` here
//! — per spec §4.C/§7 they are logged and the directive is dropped, never
//! propagated. Allocation failure is the only fatal case, and Rust's default
//! allocator already aborts the process on OOM, so no explicit handling is
//! needed for it.

use std::fmt;

use crate::units::UnitId;

/// The negative-errno contract named in spec §4.F.2 / §7 / §8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerErrno {
    /// `-EBADR` — the unit's type does not support this action.
    BadRequest,
    /// `-EALREADY` — idempotent no-op; the unit is already in the requested state.
    Already,
    /// `-EAGAIN` — an operation is already in flight; retry on the next notification.
    Again,
    /// `-ECANCELED` — too many requests / rate limited.
    Canceled,
    /// `-ENOEXEC` — unit is not loaded, so no operation can run.
    NoExec,
    /// `-ENOTSUP` — the type has no handler for this action at all.
    NotSupported,
    /// `-EEXIST` — a name collision prevents the operation.
    Exist,
    /// `-EINVAL` — malformed input at a boundary that must validate.
    Invalid,
    /// `-ENOMEM` — allocation failure (propagated, loader unwinds).
    NoMemory,
    /// `-ELOOP` — cyclic merge or a symlink chain deeper than `FOLLOW_MAX`.
    Loop,
}

impl ManagerErrno {
    pub const fn as_errno(self) -> i32 {
        match self {
            ManagerErrno::BadRequest => -libc::EBADR,
            ManagerErrno::Already => -libc::EALREADY,
            ManagerErrno::Again => -libc::EAGAIN,
            ManagerErrno::Canceled => -libc::ECANCELED,
            ManagerErrno::NoExec => -libc::ENOEXEC,
            ManagerErrno::NotSupported => -libc::ENOTSUP,
            ManagerErrno::Exist => -libc::EEXIST,
            ManagerErrno::Invalid => -libc::EINVAL,
            ManagerErrno::NoMemory => -libc::ENOMEM,
            ManagerErrno::Loop => -libc::ELOOP,
        }
    }
}

impl fmt::Display for ManagerErrno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} (errno {})", self.as_errno())
    }
}

/// Why a `start`/`stop`/`reload`/`kill` call on a unit failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOperationErrorReason {
    /// The unit's type has no handler for this verb at all (`-ENOTSUP`).
    Unsupported,
    /// An operation is already in flight on this unit (`-EAGAIN`).
    InProgress,
    /// The dependencies listed are not yet ready (waiting on `after`/`requires`).
    DependencyError(Vec<UnitId>),
    /// `reload` was attempted on a unit that is not `active`, or is not loaded
    /// (`-ENOEXEC`/`-EBADR`).
    NotActive,
    /// Generic start failure with a human-readable cause.
    GenericStartError(String),
    /// Generic stop failure with a human-readable cause.
    GenericStopError(String),
    /// `kill` was attempted on a type with no process to signal (`-ENOTSUP`).
    KillUnsupported,
    /// Socket open/close failure.
    SocketOpenError(String),
    SocketCloseError(String),
    /// Service exec failure (surfaced from the `exec_spawn` collaborator).
    ServiceStartError(String),
    ServiceStopError(String),
}

impl UnitOperationErrorReason {
    pub const fn errno(&self) -> ManagerErrno {
        match self {
            UnitOperationErrorReason::Unsupported | UnitOperationErrorReason::KillUnsupported => {
                ManagerErrno::NotSupported
            }
            UnitOperationErrorReason::InProgress => ManagerErrno::Again,
            UnitOperationErrorReason::DependencyError(_) => ManagerErrno::Again,
            UnitOperationErrorReason::NotActive => ManagerErrno::NoExec,
            UnitOperationErrorReason::GenericStartError(_)
            | UnitOperationErrorReason::ServiceStartError(_)
            | UnitOperationErrorReason::SocketOpenError(_) => ManagerErrno::BadRequest,
            UnitOperationErrorReason::GenericStopError(_)
            | UnitOperationErrorReason::ServiceStopError(_)
            | UnitOperationErrorReason::SocketCloseError(_) => ManagerErrno::BadRequest,
        }
    }
}

impl fmt::Display for UnitOperationErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOperationErrorReason::Unsupported => write!(f, "operation not supported by this unit type"),
            UnitOperationErrorReason::InProgress => write!(f, "an operation is already in progress"),
            UnitOperationErrorReason::DependencyError(ids) => {
                write!(f, "waiting on dependencies: {ids:?}")
            }
            UnitOperationErrorReason::NotActive => write!(f, "unit is not loaded or not active"),
            UnitOperationErrorReason::GenericStartError(s)
            | UnitOperationErrorReason::GenericStopError(s)
            | UnitOperationErrorReason::ServiceStartError(s)
            | UnitOperationErrorReason::ServiceStopError(s)
            | UnitOperationErrorReason::SocketOpenError(s)
            | UnitOperationErrorReason::SocketCloseError(s) => write!(f, "{s}"),
            UnitOperationErrorReason::KillUnsupported => write!(f, "unit type has no killable process"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOperationError {
    pub unit_name: String,
    pub unit_id: UnitId,
    pub reason: UnitOperationErrorReason,
}

impl fmt::Display for UnitOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.unit_name, self.reason)
    }
}

impl std::error::Error for UnitOperationError {}

/// Errors from loading a fragment file from disk (spec §4.C "Path resolution").
#[derive(Debug, thiserror::Error)]
pub enum FragmentLoadError {
    #[error("{0} not found in any unit search path")]
    NotFound(String),
    #[error("symlink chain for {name} exceeds FOLLOW_MAX ({max}): -ELOOP")]
    TooManySymlinks { name: String, max: u8 },
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed unit file: {0}")]
    Malformed(String),
}

/// Errors from parsing `/proc/self/mountinfo` (spec §4.K/§6).
#[derive(Debug, thiserror::Error)]
pub enum MountTableError {
    #[error("io error reading mount table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed mountinfo line: {0:?}")]
    Malformed(String),
}

/// Errors from the checkpoint serializer (spec §4.J).
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed checkpoint line: {0:?}")]
    Malformed(String),
}
