//! An in-process host engine.
//!
//! `SimHost` implements the whole [`Host`] surface with Postgres semantics,
//! so the bridge can run (and be tested) without a database:
//!
//! - memory contexts form a tree, each backed by its own [`bumpalo::Bump`];
//!   reset deletes children, runs callbacks LIFO, frees and bumps the
//!   generation;
//! - `report` at error severity pushes the record on the error stack and
//!   unwinds with [`HostJump`] to the installed target;
//! - queries are registered up front with [`SimHost::define_statement`];
//! - entry points are driven by [`SimHost::invoke`] and friends, which play
//!   the executor's own `PG_TRY`;
//! - internal subtransactions keep the rows written at each level apart
//!   until release.

mod contexts;
mod driver;
mod spi;
mod xact;

pub use spi::{Command, Statement, StatementCall, StatementResult};

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::mem::size_of;
use core::num::NonZeroUsize;
use core::ptr::{self, NonNull};
use std::panic;

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use self::contexts::{ContextTree, id_of, index_of};
use crate::host::{
    ContextId, ErrorContextPtr, ErrorRecord, Host, HostJump, JumpTarget, MemoryChunk, PlanPtr, RowShape,
    Severity, SqlState, TupleStorePtr, TupleTablePtr, TypeInfo, TypeKind, VarlenaForm,
    VarlenaHeader, spi_codes,
};
use crate::wire::{NullableWireValue, Oid, WireValue, oids};

/// Size of the varlena length word.
const VARHDRSZ: usize = size_of::<usize>();

/// Options for a [`SimHost`].
#[derive(Debug, Clone, Default)]
pub struct SimOptions {
    /// Bytes each context may hand out before `alloc` reports exhaustion.
    ///
    /// Default: None (unlimited)
    pub context_allocation_limit: Option<usize>,
}

enum Object {
    Plan(spi::PlanData),
    TupleTable(spi::TupleTableData),
    TupleStore {
        shape: RowShape,
        rows: Vec<Vec<NullableWireValue>>,
    },
    Record {
        type_oid: Oid,
        shape: RowShape,
        values: Vec<NullableWireValue>,
    },
}

struct Entry {
    context: usize,
    object: Object,
}

pub struct SimHost {
    contexts: RefCell<ContextTree>,
    top: ContextId,
    error_context: ContextId,
    executor_context: ContextId,
    objects: RefCell<HashMap<usize, Entry>>,
    exception_stack: Cell<Option<JumpTarget>>,
    error_context_stack: Cell<ErrorContextPtr>,
    next_target: Cell<u64>,
    errors: RefCell<Vec<ErrorRecord>>,
    messages: RefCell<Vec<ErrorRecord>>,
    types: RefCell<HashMap<Oid, TypeInfo>>,
    composites: RefCell<HashMap<Oid, RowShape>>,
    next_oid: Cell<u32>,
    statements: RefCell<HashMap<String, Statement>>,
    spi: RefCell<Vec<spi::SpiFrame>>,
    executions: Cell<u64>,
    subxacts: RefCell<Vec<xact::SubXact>>,
    committed_writes: Cell<u64>,
}

impl Default for SimHost {
    fn default() -> Self {
        SimHost::new(SimOptions::default())
    }
}

impl SimHost {
    pub fn new(options: SimOptions) -> Self {
        let mut tree = ContextTree::new(options.context_allocation_limit);
        let top = tree.create(None, "TopMemoryContext");
        let error_context = tree.create(Some(top), "ErrorContext");
        let executor_context = tree.create(Some(top), "ExecutorState");
        let host = SimHost {
            contexts: RefCell::new(tree),
            top: id_of(top),
            error_context: id_of(error_context),
            executor_context: id_of(executor_context),
            objects: RefCell::new(HashMap::new()),
            exception_stack: Cell::new(None),
            error_context_stack: Cell::new(ErrorContextPtr::default()),
            next_target: Cell::new(1),
            errors: RefCell::new(Vec::new()),
            messages: RefCell::new(Vec::new()),
            types: RefCell::new(HashMap::new()),
            composites: RefCell::new(HashMap::new()),
            next_oid: Cell::new(oids::FIRST_NORMAL_OBJECT_ID.0),
            statements: RefCell::new(HashMap::new()),
            spi: RefCell::new(Vec::new()),
            executions: Cell::new(0),
            subxacts: RefCell::new(Vec::new()),
            committed_writes: Cell::new(0),
        };
        host.install_builtin_types();
        host
    }

    /// Parent of the per-call contexts created by the drivers.
    pub fn executor_context(&self) -> ContextId {
        self.executor_context
    }

    /// Reports below error severity, oldest first.
    pub fn messages(&self) -> Vec<ErrorRecord> {
        self.messages.borrow().clone()
    }

    /// Number of statement executions the SPI layer has performed.
    pub fn execution_count(&self) -> u64 {
        self.executions.get()
    }

    /// Errors raised but not yet flushed.
    pub fn pending_errors(&self) -> usize {
        self.errors.borrow().len()
    }

    /// Rows affected by write statements outside any open subtransaction,
    /// plus those of released subtransactions.
    pub fn committed_writes(&self) -> u64 {
        self.committed_writes.get()
    }

    /// Open SPI connections.
    pub fn spi_depth(&self) -> usize {
        self.spi.borrow().len()
    }

    /// Reset callbacks registered on `context` and not yet run.
    pub fn reset_callback_count(&self, context: ContextId) -> usize {
        self.contexts.borrow().callback_count(index_of(context))
    }

    pub fn allocated_bytes(&self, context: ContextId) -> usize {
        self.contexts.borrow().allocated(index_of(context))
    }

    /// Registers a composite type and returns its identifier.
    pub fn define_composite(&self, name: &str, shape: RowShape) -> Oid {
        let oid = Oid(self.next_oid.get());
        self.next_oid.set(oid.0 + 1);
        self.types.borrow_mut().insert(
            oid,
            TypeInfo {
                oid,
                name: name.to_string(),
                len: -1,
                by_value: false,
                kind: TypeKind::Composite,
            },
        );
        self.composites.borrow_mut().insert(oid, shape);
        oid
    }

    /// Stores `target` behind an indirect varlena, the stand-in for a
    /// compressed or out-of-line value.
    pub fn make_indirect_varlena(&self, context: ContextId, target: WireValue) -> Option<WireValue> {
        let layout = Layout::from_size_align(2 * VARHDRSZ, VARHDRSZ).ok()?;
        let ptr = self.alloc(context, layout)?;
        // SAFETY: two words were just allocated at `ptr`.
        unsafe {
            let words = ptr.as_ptr().cast::<usize>();
            words.write(((2 * VARHDRSZ) << 1) | 1);
            words.add(1).write(target.as_usize());
        }
        Some(WireValue::from_ptr(ptr.as_ptr()))
    }

    fn install_builtin_types(&self) {
        let builtins: [(Oid, &str, i16, bool, TypeKind); 20] = [
            (oids::BOOL, "bool", 1, true, TypeKind::Base),
            (oids::BYTEA, "bytea", -1, false, TypeKind::Base),
            (oids::CHAR, "char", 1, true, TypeKind::Base),
            (oids::NAME, "name", 64, false, TypeKind::Base),
            (oids::INT8, "int8", 8, true, TypeKind::Base),
            (oids::INT2, "int2", 2, true, TypeKind::Base),
            (oids::INT4, "int4", 4, true, TypeKind::Base),
            (oids::TEXT, "text", -1, false, TypeKind::Base),
            (oids::OID, "oid", 4, true, TypeKind::Base),
            (oids::FLOAT4, "float4", 4, true, TypeKind::Base),
            (oids::FLOAT8, "float8", 8, true, TypeKind::Base),
            (oids::UNKNOWN, "unknown", -2, false, TypeKind::Pseudo),
            (oids::BPCHAR, "bpchar", -1, false, TypeKind::Base),
            (oids::VARCHAR, "varchar", -1, false, TypeKind::Base),
            (oids::RECORD, "record", -1, false, TypeKind::Pseudo),
            (oids::CSTRING, "cstring", -2, false, TypeKind::Pseudo),
            (oids::ANY, "any", 4, true, TypeKind::Pseudo),
            (oids::VOID, "void", 4, true, TypeKind::Pseudo),
            (oids::INTERNAL, "internal", 8, true, TypeKind::Pseudo),
            (oids::ANYELEMENT, "anyelement", 4, true, TypeKind::Pseudo),
        ];
        let mut types = self.types.borrow_mut();
        for (oid, name, len, by_value, kind) in builtins {
            types.insert(
                oid,
                TypeInfo {
                    oid,
                    name: name.to_string(),
                    len,
                    by_value,
                    kind,
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // Error signaling
    // ------------------------------------------------------------------

    fn raise(&self, record: ErrorRecord) -> ! {
        if let Ok(layout) = Layout::array::<u8>(record.message.len().max(1)) {
            let _ = self.alloc(self.error_context, layout);
        }
        self.errors.borrow_mut().push(record);
        self.jump()
    }

    fn jump(&self) -> ! {
        match self.exception_stack.get() {
            Some(target) => panic::resume_unwind(Box::new(HostJump { target })),
            None => {
                let message = self
                    .errors
                    .borrow()
                    .last()
                    .map(|r| r.message.clone())
                    .unwrap_or_default();
                panic!("FATAL: error raised with no recovery point installed: {message}")
            }
        }
    }

    fn out_of_memory(&self, size: usize) -> ! {
        self.raise(
            ErrorRecord::error("out of memory")
                .with_sqlstate(SqlState::OUT_OF_MEMORY)
                .with_detail(format!("Failed on request of size {size}.")),
        )
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    fn new_object(&self, context: ContextId, object: Object) -> NonZeroUsize {
        let Some(ptr) = self.alloc(context, Layout::new::<usize>()) else {
            self.out_of_memory(size_of::<usize>())
        };
        let key = ptr.addr();
        self.objects.borrow_mut().insert(
            key.get(),
            Entry {
                context: index_of(context),
                object,
            },
        );
        key
    }

    fn with_object<R>(&self, key: usize, what: &str, f: impl FnOnce(&mut Object) -> Option<R>) -> R {
        let found = {
            let mut objects = self.objects.borrow_mut();
            objects.get_mut(&key).and_then(|entry| f(&mut entry.object))
        };
        match found {
            Some(value) => value,
            None => self.raise(ErrorRecord::error(format!("invalid {what} handle {key:#x}"))),
        }
    }

    fn object_context(&self, key: usize) -> Option<ContextId> {
        self.objects.borrow().get(&key).map(|entry| id_of(entry.context))
    }

    fn release(&self, index: usize, delete: bool) {
        let children = self.contexts.borrow().children(index);
        for child in children {
            self.release(child, true);
        }
        let callbacks = self.contexts.borrow_mut().take_callbacks(index);
        for callback in callbacks.into_iter().rev() {
            callback();
        }
        self.contexts.borrow_mut().release(index, delete);
        self.objects.borrow_mut().retain(|_, entry| entry.context != index);
    }

    // ------------------------------------------------------------------
    // Varlena helpers
    // ------------------------------------------------------------------

    fn checked_header(&self, value: WireValue) -> VarlenaHeader {
        let addr = value.as_usize();
        let chunk = self.contexts.borrow().chunk(addr);
        let chunk_size = match chunk {
            Some((_, size)) if size >= VARHDRSZ => size,
            _ => self.raise(ErrorRecord::error(format!("invalid varlena pointer {addr:#x}"))),
        };
        // SAFETY: the chunk is live and at least one word long.
        let word = unsafe { ptr::read(addr as *const usize) };
        let header = VarlenaHeader {
            size: word >> 1,
            form: if word & 1 == 1 {
                VarlenaForm::Indirect
            } else {
                VarlenaForm::Plain
            },
        };
        if header.size < VARHDRSZ || header.size > chunk_size {
            self.raise(ErrorRecord::error(format!("corrupted varlena header at {addr:#x}")));
        }
        header
    }

    /// Copies the plain form of `value` into `context`.
    fn copy_varlena(&self, context: ContextId, value: WireValue) -> WireValue {
        let mut source = value;
        if self.checked_header(source).form == VarlenaForm::Indirect {
            // SAFETY: indirect values are two words long.
            source = WireValue::from_usize(unsafe { ptr::read(value.as_ptr::<usize>().add(1)) });
            if self.checked_header(source).form == VarlenaForm::Indirect {
                self.raise(ErrorRecord::error("nested indirect varlena"));
            }
        }
        let size = self.checked_header(source).size;
        let Some(target) = Layout::from_size_align(size, VARHDRSZ)
            .ok()
            .and_then(|layout| self.alloc(context, layout))
        else {
            self.out_of_memory(size)
        };
        // SAFETY: both regions are `size` bytes and belong to distinct chunks.
        unsafe { ptr::copy_nonoverlapping(source.as_ptr::<u8>(), target.as_ptr(), size) };
        WireValue::from_ptr(target.as_ptr())
    }

    fn is_varlena_type(&self, oid: Oid) -> bool {
        self.types.borrow().get(&oid).is_some_and(|t| t.len == -1 && t.kind != TypeKind::Composite)
    }

    /// Copies by-reference values of `row` into `context`, like the host does
    /// when it forms a tuple.
    fn copy_row(&self, context: ContextId, shape: &RowShape, values: &[NullableWireValue]) -> Vec<NullableWireValue> {
        shape
            .type_oids()
            .zip(values)
            .map(|(oid, value)| match value.value() {
                Some(v) if self.is_varlena_type(oid) => NullableWireValue::new(self.copy_varlena(context, v)),
                _ => *value,
            })
            .collect()
    }
}

impl Host for SimHost {
    fn top_context(&self) -> ContextId {
        self.top
    }

    fn create_context(&self, parent: ContextId, name: &str) -> ContextId {
        let mut tree = self.contexts.borrow_mut();
        if !tree.is_live(index_of(parent)) {
            warn!(%parent, name, "parent context is gone; creating a root context");
        }
        id_of(tree.create(Some(index_of(parent)), name))
    }

    fn alloc(&self, context: ContextId, layout: Layout) -> Option<NonNull<u8>> {
        self.contexts.borrow_mut().alloc(index_of(context), layout)
    }

    fn free(&self, ptr: NonNull<u8>) {
        self.contexts.borrow_mut().free(ptr.as_ptr() as usize);
    }

    fn reset_context(&self, context: ContextId) {
        if self.contexts.borrow().is_live(index_of(context)) {
            self.release(index_of(context), false);
        }
    }

    fn delete_context(&self, context: ContextId) {
        if context == self.top {
            warn!("refusing to delete the top memory context");
            return;
        }
        if self.contexts.borrow().is_live(index_of(context)) {
            self.release(index_of(context), true);
        }
    }

    fn context_generation(&self, context: ContextId) -> u64 {
        self.contexts.borrow().generation(index_of(context))
    }

    fn context_parent(&self, context: ContextId) -> Option<ContextId> {
        self.contexts.borrow().parent(index_of(context)).map(id_of)
    }

    fn context_name(&self, context: ContextId) -> String {
        self.contexts.borrow().name(index_of(context))
    }

    fn context_is_valid(&self, context: ContextId) -> bool {
        self.contexts.borrow().is_live(index_of(context))
    }

    fn register_reset_callback(&self, context: ContextId, callback: Box<dyn FnOnce()>) {
        if !self.contexts.borrow_mut().register_callback(index_of(context), callback) {
            warn!(%context, "reset callback registered on a deleted context");
        }
    }

    fn chunk_for_pointer(&self, ptr: *const u8) -> Option<MemoryChunk> {
        self.contexts
            .borrow()
            .chunk(ptr as usize)
            .map(|(context, size)| MemoryChunk {
                context: id_of(context),
                size,
            })
    }

    fn exception_stack(&self) -> Option<JumpTarget> {
        self.exception_stack.get()
    }

    fn set_exception_stack(&self, target: Option<JumpTarget>) {
        self.exception_stack.set(target);
    }

    fn error_context_stack(&self) -> ErrorContextPtr {
        self.error_context_stack.get()
    }

    fn set_error_context_stack(&self, ptr: ErrorContextPtr) {
        self.error_context_stack.set(ptr);
    }

    fn new_jump_target(&self) -> JumpTarget {
        let raw = self.next_target.get();
        self.next_target.set(raw + 1);
        JumpTarget::new(raw)
    }

    fn report(&self, record: ErrorRecord) {
        if record.severity.is_error() {
            self.raise(record);
        }
        match record.severity {
            Severity::Warning => warn!(sqlstate = %record.sqlstate, "{}", record.message),
            Severity::Debug => debug!("{}", record.message),
            _ => info!(severity = %record.severity, "{}", record.message),
        }
        self.messages.borrow_mut().push(record);
    }

    fn copy_error_data(&self, context: ContextId) -> Option<ErrorRecord> {
        let record = self.errors.borrow().last().cloned()?;
        if let Ok(layout) = Layout::array::<u8>(record.message.len().max(1)) {
            let _ = self.alloc(context, layout);
        }
        Some(record)
    }

    fn flush_error_state(&self) {
        self.errors.borrow_mut().clear();
        self.release(index_of(self.error_context), false);
    }

    fn varlena_header(&self, value: WireValue) -> VarlenaHeader {
        self.checked_header(value)
    }

    fn detoast(&self, context: ContextId, value: WireValue) -> WireValue {
        match self.checked_header(value).form {
            VarlenaForm::Plain => value,
            VarlenaForm::Indirect => self.copy_varlena(context, value),
        }
    }

    unsafe fn varlena_payload<'a>(&self, value: WireValue) -> &'a [u8] {
        let header = self.checked_header(value);
        if header.form == VarlenaForm::Indirect {
            self.raise(ErrorRecord::error("indirect varlena must be detoasted before reading"));
        }
        // SAFETY: the header was validated against the live chunk size; the
        // caller guarantees the chunk outlives `'a`.
        unsafe {
            core::slice::from_raw_parts(value.as_ptr::<u8>().add(VARHDRSZ), header.size - VARHDRSZ)
        }
    }

    fn make_varlena(&self, context: ContextId, bytes: &[u8]) -> Option<WireValue> {
        let size = VARHDRSZ.checked_add(bytes.len())?;
        let layout = Layout::from_size_align(size, VARHDRSZ).ok()?;
        let ptr = self.alloc(context, layout)?;
        // SAFETY: `size` bytes were just allocated at `ptr`.
        unsafe {
            ptr.as_ptr().cast::<usize>().write(size << 1);
            ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(VARHDRSZ), bytes.len());
        }
        Some(WireValue::from_ptr(ptr.as_ptr()))
    }

    fn lookup_type(&self, oid: Oid) -> Option<TypeInfo> {
        self.types.borrow().get(&oid).cloned()
    }

    fn composite_shape(&self, type_oid: Oid) -> Option<RowShape> {
        self.composites.borrow().get(&type_oid).cloned()
    }

    fn record_type(&self, record: WireValue) -> Oid {
        self.with_object(record.as_usize(), "record", |object| match object {
            Object::Record { type_oid, .. } => Some(*type_oid),
            _ => None,
        })
    }

    fn record_shape(&self, record: WireValue) -> RowShape {
        self.with_object(record.as_usize(), "record", |object| match object {
            Object::Record { shape, .. } => Some(shape.clone()),
            _ => None,
        })
    }

    fn record_attribute(&self, record: WireValue, index: usize) -> NullableWireValue {
        let attribute = self.with_object(record.as_usize(), "record", |object| match object {
            Object::Record { values, .. } => Some(values.get(index).copied()),
            _ => None,
        });
        match attribute {
            Some(value) => value,
            None => self.raise(ErrorRecord::error(format!("invalid attribute number {}", index + 1))),
        }
    }

    fn form_record(
        &self,
        context: ContextId,
        type_oid: Oid,
        shape: &RowShape,
        values: &[NullableWireValue],
    ) -> WireValue {
        if values.len() != shape.len() {
            self.raise(ErrorRecord::error(format!(
                "number of values ({}) does not match row descriptor ({})",
                values.len(),
                shape.len()
            )));
        }
        let values = self.copy_row(context, shape, values);
        let key = self.new_object(
            context,
            Object::Record {
                type_oid,
                shape: shape.clone(),
                values,
            },
        );
        WireValue::from_usize(key.get())
    }

    fn begin_internal_subtransaction(&self, name: Option<&str>) -> ContextId {
        self.begin_subxact(name)
    }

    fn release_current_subtransaction(&self) {
        self.release_subxact();
    }

    fn rollback_and_release_current_subtransaction(&self) {
        self.rollback_subxact();
    }

    fn subtransaction_depth(&self) -> usize {
        self.subxacts.borrow().len()
    }

    fn spi_connect(&self) -> i32 {
        let proc_context = self.create_context(self.top, "SPI Proc");
        self.spi.borrow_mut().push(spi::SpiFrame::new(proc_context));
        spi_codes::OK_CONNECT
    }

    fn spi_finish(&self) -> i32 {
        let Some(frame) = self.spi.borrow_mut().pop() else {
            return spi_codes::ERROR_UNCONNECTED;
        };
        self.delete_context(frame.proc_context);
        spi_codes::OK_FINISH
    }

    fn spi_prepare(&self, query: &str, arg_types: &[Oid]) -> Result<PlanPtr, i32> {
        self.prepare_plan(query, arg_types)
    }

    fn spi_plan_context(&self, plan: PlanPtr) -> ContextId {
        match self.object_context(plan.get()) {
            Some(context) => context,
            None => self.raise(ErrorRecord::error(format!("invalid plan handle {:#x}", plan.get()))),
        }
    }

    fn spi_keep_plan(&self, plan: PlanPtr) -> i32 {
        let Some(context) = self.object_context(plan.get()) else {
            return spi_codes::ERROR_ARGUMENT;
        };
        self.contexts
            .borrow_mut()
            .set_parent(index_of(context), index_of(self.top));
        0
    }

    fn spi_free_plan(&self, plan: PlanPtr) -> i32 {
        let Some(context) = self.object_context(plan.get()) else {
            return spi_codes::ERROR_ARGUMENT;
        };
        self.delete_context(context);
        0
    }

    fn spi_execute_plan(
        &self,
        plan: PlanPtr,
        args: &[NullableWireValue],
        read_only: bool,
        count: u64,
    ) -> i32 {
        self.execute_plan(plan, args, read_only, count)
    }

    fn spi_execute_with_args(
        &self,
        query: &str,
        arg_types: &[Oid],
        args: &[NullableWireValue],
        read_only: bool,
        count: u64,
    ) -> i32 {
        self.execute_text(query, arg_types, args, read_only, count)
    }

    fn spi_processed(&self) -> u64 {
        self.spi.borrow().last().map_or(0, |frame| frame.processed)
    }

    fn spi_tuptable(&self) -> Option<TupleTablePtr> {
        self.spi.borrow().last().and_then(|frame| frame.last_table)
    }

    fn tuptable_context(&self, table: TupleTablePtr) -> ContextId {
        match self.object_context(table.get()) {
            Some(context) => context,
            None => self.raise(ErrorRecord::error(format!(
                "invalid tuple table handle {:#x}",
                table.get()
            ))),
        }
    }

    fn tuptable_shape(&self, table: TupleTablePtr) -> RowShape {
        self.with_object(table.get(), "tuple table", |object| match object {
            Object::TupleTable(data) => Some(data.shape.clone()),
            _ => None,
        })
    }

    fn tuptable_value(&self, table: TupleTablePtr, row: usize, column: usize) -> NullableWireValue {
        let value = self.with_object(table.get(), "tuple table", |object| match object {
            Object::TupleTable(data) => Some(data.rows.get(row).and_then(|r| r.get(column)).copied()),
            _ => None,
        });
        match value {
            Some(value) => value,
            None => self.raise(ErrorRecord::error(format!(
                "tuple table has no value at row {row}, column {column}"
            ))),
        }
    }

    fn tuplestore_begin(&self, context: ContextId, shape: &RowShape) -> TupleStorePtr {
        let key = self.new_object(
            context,
            Object::TupleStore {
                shape: shape.clone(),
                rows: Vec::new(),
            },
        );
        TupleStorePtr::new(key)
    }

    fn tuplestore_put(&self, store: TupleStorePtr, values: &[NullableWireValue]) {
        let shape = self.with_object(store.get(), "tuple store", |object| match object {
            Object::TupleStore { shape, .. } => Some(shape.clone()),
            _ => None,
        });
        if shape.len() != values.len() {
            self.raise(ErrorRecord::error(format!(
                "tuple store expects {} columns, got {}",
                shape.len(),
                values.len()
            )));
        }
        let Some(context) = self.object_context(store.get()) else {
            self.raise(ErrorRecord::error("tuple store vanished"))
        };
        let row = self.copy_row(context, &shape, values);
        self.with_object(store.get(), "tuple store", |object| match object {
            Object::TupleStore { rows, .. } => {
                rows.push(row);
                Some(())
            }
            _ => None,
        })
    }

    fn tuplestore_rows(&self, store: TupleStorePtr) -> Vec<Vec<NullableWireValue>> {
        self.with_object(store.get(), "tuple store", |object| match object {
            Object::TupleStore { rows, .. } => Some(rows.clone()),
            _ => None,
        })
    }
}
