//! The executor side of a function call.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, trace};

use super::SimHost;
use crate::function::{CallContext, CallInfo, EntryPoint, ReturnSetInfo};
use crate::host::{ContextId, ErrorRecord, Host, HostJump, RowShape};
use crate::memory::MemoryContext;
use crate::session::Session;
use crate::wire::{NullableWireValue, WireValue};

impl SimHost {
    /// Calls `entry` the way the executor does: in a fresh per-call context,
    /// inside a recovery point of its own.
    ///
    /// An error the function reports comes back as the host's error record.
    /// Per-call contexts live until [`SimHost::reset_executor`].
    pub fn invoke(
        &self,
        session: &Session,
        entry: &dyn EntryPoint,
        args: &[NullableWireValue],
    ) -> Result<NullableWireValue, ErrorRecord> {
        let mut call = self.new_call(entry, args);
        let value = self.run_call(session, entry, &mut call)?;
        Ok(nullable(value, call.is_null))
    }

    /// Calls a set-returning `entry` in materialize mode and returns the rows
    /// it stored.
    pub fn invoke_set_returning(
        &self,
        session: &Session,
        entry: &dyn EntryPoint,
        args: &[NullableWireValue],
        expected: RowShape,
    ) -> Result<Vec<Vec<NullableWireValue>>, ErrorRecord> {
        let query_context = MemoryContext::from_id(self.executor_context);
        let mut call = self
            .new_call(entry, args)
            .with_context(CallContext::SetReturning(ReturnSetInfo::new(expected, query_context)));
        self.run_call(session, entry, &mut call)?;
        let store = call
            .result_set_info()
            .and_then(|info| info.result())
            .map(|(store, _)| *store)
            .ok_or_else(|| ErrorRecord::error("set-valued function did not return a materialized set"))?;
        Ok(self.tuplestore_rows(store))
    }

    /// Runs an aggregate over `rows`: one transition call per row, then the
    /// final function. The aggregate context is deleted afterwards.
    pub fn run_aggregate(
        &self,
        session: &Session,
        transition: &dyn EntryPoint,
        finalize: &dyn EntryPoint,
        rows: &[Vec<NullableWireValue>],
    ) -> Result<NullableWireValue, ErrorRecord> {
        let aggregate_context = self.create_context(self.executor_context, "AggContext");
        let result = (|| {
            let mut state = NullableWireValue::NULL;
            for row in rows {
                let mut args = Vec::with_capacity(row.len() + 1);
                args.push(state);
                args.extend_from_slice(row);
                state = self.invoke_in_aggregate(session, transition, aggregate_context, &args)?;
            }
            self.invoke_in_aggregate(session, finalize, aggregate_context, &[state])
        })();
        self.delete_context(aggregate_context);
        result
    }

    /// Calls an aggregate support function with `aggregate_context` as its
    /// aggregate memory context.
    pub fn invoke_in_aggregate(
        &self,
        session: &Session,
        entry: &dyn EntryPoint,
        aggregate_context: ContextId,
        args: &[NullableWireValue],
    ) -> Result<NullableWireValue, ErrorRecord> {
        let mut call = self
            .new_call(entry, args)
            .with_context(CallContext::Aggregate(MemoryContext::from_id(aggregate_context)));
        let value = self.run_call(session, entry, &mut call)?;
        Ok(nullable(value, call.is_null))
    }

    /// Frees every per-call context created by the drivers.
    pub fn reset_executor(&self) {
        self.reset_context(self.executor_context);
    }

    fn new_call(&self, entry: &dyn EntryPoint, args: &[NullableWireValue]) -> CallInfo {
        let context = self.create_context(self.executor_context, "ExprContext");
        CallInfo::new(
            MemoryContext::from_id(context),
            args,
            &entry.arg_types(),
            entry.return_type(),
        )
    }

    fn run_call(
        &self,
        session: &Session,
        entry: &dyn EntryPoint,
        call: &mut CallInfo,
    ) -> Result<WireValue, ErrorRecord> {
        let saved = self.exception_stack.get();
        let target = self.new_jump_target();
        self.exception_stack.set(Some(target));
        trace!(function = entry.name(), "calling function");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.call(session, call)));
        self.exception_stack.set(saved);
        match outcome {
            Ok(value) => Ok(value),
            Err(payload) => match payload.downcast::<HostJump>() {
                Ok(jump) if jump.target == target => {
                    let record = self
                        .errors
                        .borrow()
                        .last()
                        .cloned()
                        .unwrap_or_else(|| ErrorRecord::error("error raised without error data"));
                    self.flush_error_state();
                    debug!(function = entry.name(), message = %record.message, "function raised an error");
                    Err(record)
                }
                Ok(jump) => panic::resume_unwind(jump),
                Err(other) => panic::resume_unwind(other),
            },
        }
    }
}

fn nullable(value: WireValue, is_null: bool) -> NullableWireValue {
    if is_null {
        NullableWireValue::NULL
    } else {
        NullableWireValue::new(value)
    }
}
