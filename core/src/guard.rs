//! The error bridge between host non-local jumps and Rust results.
//!
//! The host reports errors by unwinding to the innermost installed jump
//! target. Two guards translate at the boundary:
//!
//! - [`inbound`] wraps calls the application makes into the host. It installs
//!   a fresh target, and if the host jumps to it, captures the host's error
//!   record and returns [`Error::Host`].
//! - [`outbound`] wraps entry points the host calls. Any error or panic that
//!   reaches it is re-raised through the host's own reporting call, so no
//!   Rust failure ever escapes into host frames.
//!
//! Per call: `Entered -> HostRunning -> {NormalReturn | ErrorCaptured} ->
//! Restored -> {ReturnsValue | RaisesHostError}`. Guards nest; each saves
//! and restores its own pair of pointers.

use core::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::host::{ErrorContextPtr, ErrorRecord, Host, HostJump, JumpTarget, Severity, SqlState};
use crate::session::Session;

/// Restores the exception stack and error context when dropped.
struct SavedSignalState<'h> {
    host: &'h dyn Host,
    exception_stack: Option<JumpTarget>,
    error_context: ErrorContextPtr,
}

impl<'h> SavedSignalState<'h> {
    fn save(host: &'h dyn Host) -> Self {
        SavedSignalState {
            host,
            exception_stack: host.exception_stack(),
            error_context: host.error_context_stack(),
        }
    }
}

impl Drop for SavedSignalState<'_> {
    fn drop(&mut self) {
        self.host.set_exception_stack(self.exception_stack);
        self.host.set_error_context_stack(self.error_context);
    }
}

/// Calls `f` with the host, converting a host error jump into
/// [`Error::Host`].
///
/// Jumps aimed at an outer target and foreign panics pass through untouched
/// after the saved pointers are restored.
pub fn inbound<R>(session: &Session, f: impl FnOnce(&dyn Host) -> R) -> Result<R> {
    let host = session.host();
    let saved = SavedSignalState::save(host);
    let target = host.new_jump_target();
    host.set_exception_stack(Some(target));
    trace!(?target, "entering host");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(host)));
    match outcome {
        Ok(value) => {
            drop(saved);
            trace!(?target, "host returned");
            Ok(value)
        }
        Err(payload) => match payload.downcast::<HostJump>() {
            Ok(jump) if jump.target == target => {
                let record = capture(session, host);
                drop(saved);
                debug!(sqlstate = %record.sqlstate, message = %record.message, "captured host error");
                Err(Error::Host(record))
            }
            Ok(jump) => {
                drop(saved);
                panic::resume_unwind(jump)
            }
            Err(other) => {
                drop(saved);
                panic::resume_unwind(other)
            }
        },
    }
}

/// Copies the pending error out of the host, then flushes the host state.
fn capture(session: &Session, host: &dyn Host) -> ErrorRecord {
    let context = host.create_context(host.top_context(), session.options().capture_context_name);
    let record = host.copy_error_data(context).unwrap_or_else(|| {
        ErrorRecord::error("host signaled an error without error data")
    });
    host.flush_error_state();
    host.delete_context(context);
    record
}

/// Runs an entry point body, reporting any failure to the host.
///
/// Never returns on failure: the host's report call transfers control. If
/// the host violates that contract the process aborts rather than let a
/// failure pass silently.
pub fn outbound<R>(session: &Session, f: impl FnOnce() -> Result<R>) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(Error::Host(record))) => resignal(session, record),
        Ok(Err(err)) => resignal(session, failure_record(&err)),
        Err(payload) => {
            if payload.is::<HostJump>() {
                panic::resume_unwind(payload)
            }
            let message = format!("unhandled panic: {}", panic_message(&*payload));
            resignal(session, ErrorRecord::error(message))
        }
    }
}

fn resignal(session: &Session, mut record: ErrorRecord) -> ! {
    if !record.severity.is_error() {
        record.severity = Severity::Error;
    }
    trace!(message = %record.message, "re-raising error in host");
    session.host().report(record);
    error!("host error report returned control to the caller; aborting");
    std::process::abort()
}

fn failure_record(err: &Error) -> ErrorRecord {
    let sqlstate = match err {
        Error::Conversion { .. }
        | Error::NullValue { .. }
        | Error::ArityOrKindMismatch { .. }
        | Error::RowShapeMismatch { .. } => SqlState::DATATYPE_MISMATCH,
        Error::AllocationFailure { .. } => SqlState::OUT_OF_MEMORY,
        Error::UnknownType(_) | Error::ReservedOid(_) => SqlState::INVALID_PARAMETER_VALUE,
        Error::Protocol(_) => SqlState::FEATURE_NOT_SUPPORTED,
        _ => SqlState::INTERNAL_ERROR,
    };
    ErrorRecord::error(err.to_string()).with_sqlstate(sqlstate)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod guard_test;
