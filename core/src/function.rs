//! The calling convention for functions the host invokes.
//!
//! The host calls an entry point with a [`CallInfo`]: the arguments with
//! their declared types, the per-call memory context, and, for set-returning
//! and aggregate calls, the extra context those protocols need.

use core::fmt;

use smallvec::SmallVec;

use crate::convert::{ArenaHint, FromWire, IntoWire};
use crate::error::{Error, Result};
use crate::host::{RowShape, TupleStorePtr};
use crate::memory::MemoryContext;
use crate::session::Session;
use crate::wire::{NullableWireValue, Oid, WireValue, oids};

/// Set-returning call state (`ReturnSetInfo`).
#[derive(Clone, Debug)]
pub struct ReturnSetInfo {
    expected: RowShape,
    query_context: MemoryContext,
    result: Option<(TupleStorePtr, RowShape)>,
}

impl ReturnSetInfo {
    pub fn new(expected: RowShape, query_context: MemoryContext) -> Self {
        ReturnSetInfo {
            expected,
            query_context,
            result: None,
        }
    }

    /// Row shape the caller expects back.
    pub fn expected(&self) -> &RowShape {
        &self.expected
    }

    /// Context that outlives the call; the result store goes there.
    pub fn query_context(&self) -> MemoryContext {
        self.query_context
    }

    /// The materialized result, once the function has produced one.
    pub fn result(&self) -> Option<&(TupleStorePtr, RowShape)> {
        self.result.as_ref()
    }

    pub(crate) fn set_result(&mut self, store: TupleStorePtr, shape: RowShape) {
        self.result = Some((store, shape));
    }
}

#[derive(Clone, Debug)]
pub enum CallContext {
    Plain,
    SetReturning(ReturnSetInfo),
    /// Called as an aggregate support function; carries the aggregate's
    /// memory context.
    Aggregate(MemoryContext),
}

/// One invocation of an entry point (`FunctionCallInfo`).
#[derive(Clone, Debug)]
pub struct CallInfo {
    args: SmallVec<[NullableWireValue; 8]>,
    arg_types: SmallVec<[Oid; 8]>,
    result_type: Oid,
    /// Result null flag, read by the host after the call.
    pub is_null: bool,
    memory_context: MemoryContext,
    context: CallContext,
}

impl CallInfo {
    pub fn new(
        memory_context: MemoryContext,
        args: &[NullableWireValue],
        arg_types: &[Oid],
        result_type: Oid,
    ) -> Self {
        CallInfo {
            args: SmallVec::from_slice(args),
            arg_types: SmallVec::from_slice(arg_types),
            result_type,
            is_null: false,
            memory_context,
            context: CallContext::Plain,
        }
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    pub fn arg_type(&self, index: usize) -> Option<Oid> {
        self.arg_types.get(index).copied()
    }

    pub fn arg_types(&self) -> &[Oid] {
        &self.arg_types
    }

    pub fn result_type(&self) -> Oid {
        self.result_type
    }

    /// The per-call context; freed by the host after the call returns.
    pub fn memory_context(&self) -> MemoryContext {
        self.memory_context
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn raw_arg(&self, index: usize) -> Result<NullableWireValue> {
        self.args.get(index).copied().ok_or_else(|| {
            Error::mismatch(format!(
                "argument {} requested, function was called with {}",
                index + 1,
                self.args.len()
            ))
        })
    }

    /// Argument `index`, decoded as `T`.
    pub fn arg<T: FromWire>(&self, session: &Session, index: usize) -> Result<T> {
        let value = self.raw_arg(index)?;
        let oid = self.arg_type(index).unwrap_or(Oid::INVALID);
        if !T::accepts(oid, session) {
            return Err(Error::mismatch(format!(
                "argument {} has type {}, which {} cannot represent",
                index + 1,
                oid,
                core::any::type_name::<T>()
            )));
        }
        T::from_nullable_wire(value, oid, &ArenaHint::new(session))
    }

    /// Encodes the return value and sets the null flag.
    pub fn set_result<T: IntoWire>(&mut self, session: &Session, value: T) -> Result<WireValue> {
        let declared = self.result_type;
        if declared != oids::VOID && !oids::is_polymorphic(declared) && !T::accepts(declared, session) {
            return Err(Error::conversion::<T>(declared));
        }
        let value = value.into_nullable_wire(session)?;
        self.is_null = value.is_null;
        Ok(value.value)
    }

    pub fn return_null(&mut self) -> WireValue {
        self.is_null = true;
        WireValue::NULL
    }

    pub fn aggregate_context(&self) -> Option<MemoryContext> {
        match self.context {
            CallContext::Aggregate(context) => Some(context),
            _ => None,
        }
    }

    pub fn result_set_info(&self) -> Option<&ReturnSetInfo> {
        match &self.context {
            CallContext::SetReturning(info) => Some(info),
            _ => None,
        }
    }

    pub fn result_set_info_mut(&mut self) -> Option<&mut ReturnSetInfo> {
        match &mut self.context {
            CallContext::SetReturning(info) => Some(info),
            _ => None,
        }
    }
}

/// A plain host-callable function (`PGFunction`).
pub type PgFunction = fn(&Session, &mut CallInfo) -> WireValue;

/// Something the host can call by name.
pub trait EntryPoint {
    fn name(&self) -> &str;

    fn arg_types(&self) -> Vec<Oid>;

    fn return_type(&self) -> Oid;

    /// Runs the function. Failures are reported to the host, never returned.
    fn call(&self, session: &Session, call: &mut CallInfo) -> WireValue;
}

/// An [`EntryPoint`] over a bare [`PgFunction`].
#[derive(Clone)]
pub struct NativeEntry {
    name: String,
    arg_types: Vec<Oid>,
    return_type: Oid,
    func: PgFunction,
}

impl NativeEntry {
    pub fn new(name: impl Into<String>, arg_types: &[Oid], return_type: Oid, func: PgFunction) -> Self {
        NativeEntry {
            name: name.into(),
            arg_types: arg_types.to_vec(),
            return_type,
            func,
        }
    }
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntry")
            .field("name", &self.name)
            .field("arg_types", &self.arg_types)
            .field("return_type", &self.return_type)
            .finish()
    }
}

impl EntryPoint for NativeEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn arg_types(&self) -> Vec<Oid> {
        self.arg_types.clone()
    }

    fn return_type(&self) -> Oid {
        self.return_type
    }

    fn call(&self, session: &Session, call: &mut CallInfo) -> WireValue {
        (self.func)(session, call)
    }
}
