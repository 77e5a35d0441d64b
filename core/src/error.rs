//! Errors raised by the bridge.

use thiserror::Error as ThisError;

use crate::host::{ContextId, ErrorRecord, RowShape};
use crate::wire::Oid;

/// Every failure the bridge reports.
///
/// Nothing in the bridge retries; each variant propagates to the caller.
/// [`Error::Host`] is turned back into host error signaling only by the
/// outbound guard.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The host signaled failure through its non-local jump.
    #[error("{0}")]
    Host(ErrorRecord),

    /// The host type has no interpretation as the requested native type.
    #[error("cannot convert value of type {type_oid} to {target}")]
    Conversion { type_oid: Oid, target: &'static str },

    /// SQL NULL where the native type cannot represent it.
    #[error("unexpected null value for {target}")]
    NullValue { target: &'static str },

    /// Argument count or column kinds disagree with what was declared.
    #[error("arity or kind mismatch: {detail}")]
    ArityOrKindMismatch { detail: String },

    /// A set-returning function produced rows of the wrong shape.
    #[error("row shape mismatch: expected {expected}, got {actual}")]
    RowShapeMismatch { expected: RowShape, actual: RowShape },

    /// Payload accessed after its memory context was reset or deleted.
    #[error("memory context {context} ({name}) was reset; its payload is gone")]
    PointerGone { context: ContextId, name: String },

    /// The host allocator reported exhaustion.
    #[error("out of memory: failed to allocate {size} bytes in memory context {context}")]
    AllocationFailure { size: usize, context: ContextId },

    /// Pointer that does not start a chunk in any live memory context.
    #[error("pointer {addr:#x} does not belong to any memory context")]
    ForeignPointer { addr: usize },

    /// SPI returned a negative code.
    #[error("query execution failed: {name} ({code})")]
    Execution { code: i32, name: &'static str },

    #[error("row {index} out of range for result with {len} rows")]
    RowOutOfRange { index: usize, len: usize },

    #[error("type {0} does not exist")]
    UnknownType(Oid),

    /// Attempt to register a conversion for a built-in identifier.
    #[error("type identifier {0} is reserved by the host")]
    ReservedOid(Oid),

    /// A host calling convention was violated (wrong call context or
    /// aggregate phase).
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("worker: {0}")]
    Worker(String),

    /// An application-defined failure.
    #[error("{0}")]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an application error.
    pub fn application(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Application(err.into())
    }

    pub(crate) fn mismatch(detail: impl Into<String>) -> Self {
        Error::ArityOrKindMismatch {
            detail: detail.into(),
        }
    }

    pub(crate) fn conversion<T: ?Sized>(type_oid: Oid) -> Self {
        Error::Conversion {
            type_oid,
            target: core::any::type_name::<T>(),
        }
    }

    pub(crate) fn null_value<T: ?Sized>() -> Self {
        Error::NullValue {
            target: core::any::type_name::<T>(),
        }
    }

    /// The captured host record, if this error came from the host.
    pub fn host_record(&self) -> Option<&ErrorRecord> {
        match self {
            Error::Host(record) => Some(record),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
