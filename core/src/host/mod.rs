//! The host call surface.
//!
//! Everything the bridge needs from the database engine is expressed by the
//! [`Host`] trait. Calls are synchronous and always made from the thread that
//! owns the session. Calls outside the memory group may signal failure by
//! unwinding with a [`HostJump`] payload aimed at the currently installed
//! jump target; those calls must be made through the inbound guard
//! ([`crate::guard::inbound`]).
//!
//! [`sim::SimHost`] is a complete in-process implementation used for tests
//! and for embedding without an engine.

pub mod sim;

use core::alloc::Layout;
use core::fmt;
use core::num::NonZeroUsize;
use core::ptr::NonNull;

use crate::wire::{NullableWireValue, Oid, WireValue, oids};

/// Identity of a host memory context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContextId(NonZeroUsize);

impl ContextId {
    pub const fn new(raw: NonZeroUsize) -> Self {
        ContextId(raw)
    }

    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A recovery point for the host's non-local jump (the `sigjmp_buf`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct JumpTarget(u64);

impl JumpTarget {
    pub const fn new(raw: u64) -> Self {
        JumpTarget(raw)
    }
}

/// Unwind payload raised by the host to resume at `target`.
///
/// This is the only payload the bridge treats as host error signaling; any
/// other panic is an application failure.
#[derive(Debug)]
pub struct HostJump {
    pub target: JumpTarget,
}

/// Head of the host's chained error-context callbacks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct ErrorContextPtr(pub usize);

macro_rules! host_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(NonZeroUsize);

        impl $name {
            pub const fn new(raw: NonZeroUsize) -> Self {
                $name(raw)
            }

            pub const fn get(self) -> usize {
                self.0.get()
            }
        }
    };
}

host_handle!(
    /// A prepared statement owned by the host.
    PlanPtr
);
host_handle!(
    /// A result set produced by the last SPI execution.
    TupleTablePtr
);
host_handle!(
    /// An append-only row store used to return sets.
    TupleStorePtr
);

/// Host error severity, in increasing order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Severity {
    Debug,
    Log,
    Info,
    Notice,
    Warning,
    Error,
    Fatal,
    Panic,
}

impl Severity {
    /// Severities at which `report` transfers control instead of returning.
    pub fn is_error(self) -> bool {
        self >= Severity::Error
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Log => "LOG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Panic => "PANIC",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-character SQLSTATE code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlState([u8; 5]);

impl SqlState {
    pub const SUCCESSFUL_COMPLETION: SqlState = SqlState(*b"00000");
    pub const WARNING: SqlState = SqlState(*b"01000");
    pub const FEATURE_NOT_SUPPORTED: SqlState = SqlState(*b"0A000");
    pub const INVALID_PARAMETER_VALUE: SqlState = SqlState(*b"22023");
    pub const READ_ONLY_SQL_TRANSACTION: SqlState = SqlState(*b"25006");
    pub const SYNTAX_ERROR: SqlState = SqlState(*b"42601");
    pub const DATATYPE_MISMATCH: SqlState = SqlState(*b"42804");
    pub const INDETERMINATE_DATATYPE: SqlState = SqlState(*b"42P18");
    pub const OUT_OF_MEMORY: SqlState = SqlState(*b"53200");
    pub const RAISE_EXCEPTION: SqlState = SqlState(*b"P0001");
    pub const INTERNAL_ERROR: SqlState = SqlState(*b"XX000");

    pub const fn new(code: [u8; 5]) -> Self {
        SqlState(code)
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0).unwrap_or("?????")
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqlState({})", self.as_str())
    }
}

/// Host diagnostic state: what `report` receives and `copy_error_data`
/// returns.
///
/// A captured record owns all of its strings, so it stays readable after
/// the host has flushed its own error state.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ErrorRecord {
    pub severity: Severity,
    pub sqlstate: SqlState,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based character position into `query`.
    pub cursor_position: Option<usize>,
    /// Query text the cursor position refers to.
    pub query: Option<String>,
}

impl ErrorRecord {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        let sqlstate = match severity {
            s if s.is_error() => SqlState::INTERNAL_ERROR,
            Severity::Warning => SqlState::WARNING,
            _ => SqlState::SUCCESSFUL_COMPLETION,
        };
        ErrorRecord {
            severity,
            sqlstate,
            message: message.into(),
            detail: None,
            hint: None,
            cursor_position: None,
            query: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ErrorRecord::new(Severity::Error, message)
    }

    pub fn with_sqlstate(mut self, sqlstate: SqlState) -> Self {
        self.sqlstate = sqlstate;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_cursor(mut self, position: usize, query: impl Into<String>) -> Self {
        self.cursor_position = Some(position);
        self.query = Some(query.into());
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Storage form of a variable-length value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VarlenaForm {
    /// Header followed directly by the payload.
    Plain,
    /// Out-of-line or compressed; must be normalized before reading.
    Indirect,
}

/// Decoded length/flags header of a variable-length value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VarlenaHeader {
    /// Total size of the stored datum, header included.
    pub size: usize,
    pub form: VarlenaForm,
}

/// Catalog class of a type (`pg_type.typtype`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeKind {
    Base,
    Composite,
    Domain,
    Enum,
    Pseudo,
    Range,
}

/// A row of the type catalog, as returned by a syscache lookup.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TypeInfo {
    pub oid: Oid,
    pub name: String,
    /// Storage length in bytes, or -1 for variable-length types.
    pub len: i16,
    pub by_value: bool,
    pub kind: TypeKind,
}

/// One column of a row shape.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Attribute {
    pub name: String,
    pub type_oid: Oid,
}

impl Attribute {
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Attribute {
            name: name.into(),
            type_oid,
        }
    }
}

/// An allocation as the host's context tree sees it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemoryChunk {
    pub context: ContextId,
    /// Requested size in bytes.
    pub size: usize,
}

/// Ordered column descriptor of a row (the host's tuple descriptor).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RowShape {
    attributes: Vec<Attribute>,
}

impl RowShape {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        RowShape { attributes }
    }

    /// Shape with generated column names (`column1`, `column2`, ...).
    pub fn from_type_oids(type_oids: &[Oid]) -> Self {
        RowShape {
            attributes: type_oids
                .iter()
                .enumerate()
                .map(|(i, oid)| Attribute::new(format!("column{}", i + 1), *oid))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attribute(&self, index: usize) -> Option<&Attribute> {
        self.attributes.get(index)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn type_oids(&self) -> impl Iterator<Item = Oid> + '_ {
        self.attributes.iter().map(|a| a.type_oid)
    }

    /// Same width and same column types. Column names are not compared.
    pub fn agrees_with(&self, other: &RowShape) -> bool {
        self.len() == other.len() && self.type_oids().eq(other.type_oids())
    }

    /// Whether values of this shape can fill `columns`. A value column of
    /// type `unknown` (a null) fits any column.
    pub fn fits(&self, columns: &RowShape) -> bool {
        self.len() == columns.len()
            && self
                .type_oids()
                .zip(columns.type_oids())
                .all(|(value, column)| value == column || value == oids::UNKNOWN)
    }
}

impl fmt::Display for RowShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, attribute) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", attribute.name, attribute.type_oid)?;
        }
        f.write_str(")")
    }
}

/// SPI return codes.
pub mod spi_codes {
    pub const ERROR_CONNECT: i32 = -1;
    pub const ERROR_COPY: i32 = -2;
    pub const ERROR_OPUNKNOWN: i32 = -3;
    pub const ERROR_UNCONNECTED: i32 = -4;
    pub const ERROR_ARGUMENT: i32 = -6;
    pub const ERROR_PARAM: i32 = -7;
    pub const ERROR_TRANSACTION: i32 = -8;
    pub const ERROR_NOATTRIBUTE: i32 = -9;

    pub const OK_CONNECT: i32 = 1;
    pub const OK_FINISH: i32 = 2;
    pub const OK_FETCH: i32 = 3;
    pub const OK_UTILITY: i32 = 4;
    pub const OK_SELECT: i32 = 5;
    pub const OK_SELINTO: i32 = 6;
    pub const OK_INSERT: i32 = 7;
    pub const OK_DELETE: i32 = 8;
    pub const OK_UPDATE: i32 = 9;

    /// Symbolic name of a return code, for diagnostics.
    pub fn name(code: i32) -> &'static str {
        match code {
            ERROR_CONNECT => "SPI_ERROR_CONNECT",
            ERROR_COPY => "SPI_ERROR_COPY",
            ERROR_OPUNKNOWN => "SPI_ERROR_OPUNKNOWN",
            ERROR_UNCONNECTED => "SPI_ERROR_UNCONNECTED",
            ERROR_ARGUMENT => "SPI_ERROR_ARGUMENT",
            ERROR_PARAM => "SPI_ERROR_PARAM",
            ERROR_TRANSACTION => "SPI_ERROR_TRANSACTION",
            ERROR_NOATTRIBUTE => "SPI_ERROR_NOATTRIBUTE",
            OK_CONNECT => "SPI_OK_CONNECT",
            OK_FINISH => "SPI_OK_FINISH",
            OK_FETCH => "SPI_OK_FETCH",
            OK_UTILITY => "SPI_OK_UTILITY",
            OK_SELECT => "SPI_OK_SELECT",
            OK_SELINTO => "SPI_OK_SELINTO",
            OK_INSERT => "SPI_OK_INSERT",
            OK_DELETE => "SPI_OK_DELETE",
            OK_UPDATE => "SPI_OK_UPDATE",
            _ => "SPI_UNKNOWN",
        }
    }
}

/// Calls the bridge makes into the host engine.
///
/// Memory calls never signal through the jump channel; exhaustion is
/// reported by `alloc` returning `None`. Every other group may unwind with
/// [`HostJump`] and must be invoked through the inbound guard.
pub trait Host {
    // ------------------------------------------------------------------
    // Memory contexts
    // ------------------------------------------------------------------

    /// The root of the context tree. Never reset or deleted by the bridge.
    fn top_context(&self) -> ContextId;

    fn create_context(&self, parent: ContextId, name: &str) -> ContextId;

    /// Allocates `layout` in `context`; `None` on exhaustion.
    fn alloc(&self, context: ContextId, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a single chunk (`pfree`).
    fn free(&self, ptr: NonNull<u8>);

    /// Deletes all children, runs reset callbacks, frees every allocation
    /// and advances the generation counter. The context stays usable.
    fn reset_context(&self, context: ContextId);

    /// Like `reset_context`, then the context is gone for good.
    fn delete_context(&self, context: ContextId);

    /// Number of resets and deletes `context` has gone through.
    fn context_generation(&self, context: ContextId) -> u64;

    fn context_parent(&self, context: ContextId) -> Option<ContextId>;

    fn context_name(&self, context: ContextId) -> String;

    /// Whether `context` exists (has not been deleted).
    fn context_is_valid(&self, context: ContextId) -> bool;

    /// Schedules `callback` to run exactly once, immediately before the
    /// next reset or delete of `context`.
    fn register_reset_callback(&self, context: ContextId, callback: Box<dyn FnOnce()>);

    /// The chunk starting at `ptr`, if a context handed it out.
    fn chunk_for_pointer(&self, ptr: *const u8) -> Option<MemoryChunk>;

    /// The context owning the chunk starting at `ptr`.
    fn context_for_pointer(&self, ptr: *const u8) -> Option<ContextId> {
        self.chunk_for_pointer(ptr).map(|chunk| chunk.context)
    }

    // ------------------------------------------------------------------
    // Error channel
    // ------------------------------------------------------------------

    fn exception_stack(&self) -> Option<JumpTarget>;

    fn set_exception_stack(&self, target: Option<JumpTarget>);

    fn error_context_stack(&self) -> ErrorContextPtr;

    fn set_error_context_stack(&self, ptr: ErrorContextPtr);

    /// A fresh recovery point, distinct from every other live target.
    fn new_jump_target(&self) -> JumpTarget;

    /// Emits a report. At [`Severity::Error`] and above this does not return:
    /// it unwinds with [`HostJump`] to the installed exception stack.
    fn report(&self, record: ErrorRecord);

    /// Copies the error being handled into `context`.
    fn copy_error_data(&self, context: ContextId) -> Option<ErrorRecord>;

    /// Discards the host's transient error state.
    fn flush_error_state(&self);

    // ------------------------------------------------------------------
    // Variable-length values
    // ------------------------------------------------------------------

    fn varlena_header(&self, value: WireValue) -> VarlenaHeader;

    /// Returns a plain form of `value`, copying into `context` only when the
    /// stored form is indirect.
    fn detoast(&self, context: ContextId, value: WireValue) -> WireValue;

    /// Payload bytes of a plain variable-length value.
    ///
    /// # Safety
    ///
    /// `value` must be a plain varlena whose context has not been reset
    /// since it was obtained, and must stay so for `'a`.
    unsafe fn varlena_payload<'a>(&self, value: WireValue) -> &'a [u8];

    /// Builds a plain varlena holding `bytes` in `context`.
    fn make_varlena(&self, context: ContextId, bytes: &[u8]) -> Option<WireValue>;

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    fn lookup_type(&self, oid: Oid) -> Option<TypeInfo>;

    /// Column layout of a composite type.
    fn composite_shape(&self, type_oid: Oid) -> Option<RowShape>;

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    fn record_type(&self, record: WireValue) -> Oid;

    fn record_shape(&self, record: WireValue) -> RowShape;

    fn record_attribute(&self, record: WireValue, index: usize) -> NullableWireValue;

    fn form_record(
        &self,
        context: ContextId,
        type_oid: Oid,
        shape: &RowShape,
        values: &[NullableWireValue],
    ) -> WireValue;

    // ------------------------------------------------------------------
    // Subtransactions
    // ------------------------------------------------------------------

    /// Starts an internal subtransaction nested in the current one and
    /// returns its transaction context, which a rollback deletes.
    fn begin_internal_subtransaction(&self, name: Option<&str>) -> ContextId;

    /// Ends the innermost subtransaction, keeping its work.
    fn release_current_subtransaction(&self);

    /// Ends the innermost subtransaction, undoing its work.
    fn rollback_and_release_current_subtransaction(&self);

    /// Open internal subtransactions; 0 at top level.
    fn subtransaction_depth(&self) -> usize;

    // ------------------------------------------------------------------
    // SPI
    // ------------------------------------------------------------------

    fn spi_connect(&self) -> i32;

    fn spi_finish(&self) -> i32;

    /// Parses and plans `query`. The plan starts out owned by a context
    /// that dies with the current SPI connection.
    fn spi_prepare(&self, query: &str, arg_types: &[Oid]) -> Result<PlanPtr, i32>;

    fn spi_plan_context(&self, plan: PlanPtr) -> ContextId;

    /// Moves the plan to a context that outlives the SPI connection.
    fn spi_keep_plan(&self, plan: PlanPtr) -> i32;

    fn spi_free_plan(&self, plan: PlanPtr) -> i32;

    /// `count` of 0 means no row limit.
    fn spi_execute_plan(
        &self,
        plan: PlanPtr,
        args: &[NullableWireValue],
        read_only: bool,
        count: u64,
    ) -> i32;

    fn spi_execute_with_args(
        &self,
        query: &str,
        arg_types: &[Oid],
        args: &[NullableWireValue],
        read_only: bool,
        count: u64,
    ) -> i32;

    fn spi_processed(&self) -> u64;

    fn spi_tuptable(&self) -> Option<TupleTablePtr>;

    fn tuptable_context(&self, table: TupleTablePtr) -> ContextId;

    fn tuptable_shape(&self, table: TupleTablePtr) -> RowShape;

    fn tuptable_value(&self, table: TupleTablePtr, row: usize, column: usize) -> NullableWireValue;

    // ------------------------------------------------------------------
    // Tuple stores
    // ------------------------------------------------------------------

    /// Opens a store whose rows follow `shape`; by-reference values put
    /// into it are copied into `context`.
    fn tuplestore_begin(&self, context: ContextId, shape: &RowShape) -> TupleStorePtr;

    fn tuplestore_put(&self, store: TupleStorePtr, values: &[NullableWireValue]);

    fn tuplestore_rows(&self, store: TupleStorePtr) -> Vec<Vec<NullableWireValue>>;
}
