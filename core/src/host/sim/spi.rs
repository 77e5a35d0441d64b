//! Statement catalog and SPI execution for the simulated host.

use std::rc::Rc;

use tracing::{debug, trace};

use super::{Object, SimHost};
use crate::host::{
    ContextId, ErrorRecord, Host, PlanPtr, RowShape, SqlState, TupleTablePtr, spi_codes,
};
use crate::wire::{NullableWireValue, Oid, oids};

/// Rows produced by a statement handler, or the error it raises.
pub type StatementResult = Result<Vec<Vec<NullableWireValue>>, ErrorRecord>;

type Handler = dyn Fn(&StatementCall<'_>) -> StatementResult;

/// Kind of a registered statement; decides the SPI return code and whether
/// read-only execution accepts it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

impl Command {
    fn ok_code(self) -> i32 {
        match self {
            Command::Select => spi_codes::OK_SELECT,
            Command::Insert => spi_codes::OK_INSERT,
            Command::Update => spi_codes::OK_UPDATE,
            Command::Delete => spi_codes::OK_DELETE,
            Command::Utility => spi_codes::OK_UTILITY,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Command::Select => "SELECT",
            Command::Insert => "INSERT",
            Command::Update => "UPDATE",
            Command::Delete => "DELETE",
            Command::Utility => "utility statement",
        }
    }
}

/// A query the simulated planner knows how to run.
#[derive(Clone)]
pub struct Statement {
    params: Vec<Oid>,
    shape: RowShape,
    command: Command,
    handler: Rc<Handler>,
}

impl Statement {
    /// A row-returning statement.
    pub fn select(
        params: &[Oid],
        shape: RowShape,
        handler: impl Fn(&StatementCall<'_>) -> StatementResult + 'static,
    ) -> Self {
        Statement {
            params: params.to_vec(),
            shape,
            command: Command::Select,
            handler: Rc::new(handler),
        }
    }

    /// A data-modifying or utility statement. Its handler returns one
    /// (empty) row per affected tuple.
    pub fn command(
        command: Command,
        params: &[Oid],
        handler: impl Fn(&StatementCall<'_>) -> StatementResult + 'static,
    ) -> Self {
        Statement {
            params: params.to_vec(),
            shape: RowShape::default(),
            command,
            handler: Rc::new(handler),
        }
    }

    /// Adds a `RETURNING` list to a data-modifying statement.
    pub fn returning(mut self, shape: RowShape) -> Self {
        self.shape = shape;
        self
    }
}

/// What a statement handler sees when it runs.
pub struct StatementCall<'a> {
    pub host: &'a SimHost,
    pub args: &'a [NullableWireValue],
    /// Context the result table lives in.
    pub context: ContextId,
}

impl StatementCall<'_> {
    /// Text argument `index`, or `None` for NULL.
    pub fn arg_text(&self, index: usize) -> Option<String> {
        let value = self.args.get(index)?.value()?;
        let plain = self.host.detoast(self.context, value);
        // SAFETY: the argument stays alive for the whole statement.
        let bytes = unsafe { self.host.varlena_payload(plain) };
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// A text value allocated with the result table.
    pub fn text(&self, value: &str) -> Result<NullableWireValue, ErrorRecord> {
        self.host
            .make_varlena(self.context, value.as_bytes())
            .map(NullableWireValue::new)
            .ok_or_else(|| ErrorRecord::error("out of memory").with_sqlstate(SqlState::OUT_OF_MEMORY))
    }
}

pub(super) struct SpiFrame {
    pub(super) proc_context: ContextId,
    pub(super) last_table: Option<TupleTablePtr>,
    pub(super) processed: u64,
}

impl SpiFrame {
    pub(super) fn new(proc_context: ContextId) -> Self {
        SpiFrame {
            proc_context,
            last_table: None,
            processed: 0,
        }
    }
}

pub(super) struct PlanData {
    statement: String,
    arg_types: Vec<Oid>,
}

pub(super) struct TupleTableData {
    pub(super) shape: RowShape,
    pub(super) rows: Vec<Vec<NullableWireValue>>,
}

/// Queries match on their whitespace-normalized text.
fn statement_key(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl SimHost {
    /// Teaches the planner `query`.
    pub fn define_statement(&self, query: &str, statement: Statement) {
        self.statements
            .borrow_mut()
            .insert(statement_key(query), statement);
    }

    fn proc_context(&self) -> Option<ContextId> {
        self.spi.borrow().last().map(|frame| frame.proc_context)
    }

    fn lookup_statement(&self, query: &str) -> (String, Statement) {
        let key = statement_key(query);
        let found = self.statements.borrow().get(&key).cloned();
        match found {
            Some(statement) => (key, statement),
            None => {
                let token = query.split_whitespace().next().unwrap_or("");
                let position = query.find(token).map_or(1, |offset| offset + 1);
                let message = if token.is_empty() {
                    "syntax error at end of input".to_string()
                } else {
                    format!("syntax error at or near \"{token}\"")
                };
                self.raise(
                    ErrorRecord::error(message)
                        .with_sqlstate(SqlState::SYNTAX_ERROR)
                        .with_cursor(position, query),
                )
            }
        }
    }

    fn check_params(&self, declared: &[Oid], supplied: &[Oid]) {
        if supplied.len() < declared.len() {
            self.raise(
                ErrorRecord::error(format!(
                    "could not determine data type of parameter ${}",
                    supplied.len() + 1
                ))
                .with_sqlstate(SqlState::INDETERMINATE_DATATYPE),
            );
        }
        for (index, (expected, actual)) in declared.iter().zip(supplied).enumerate() {
            if expected != actual && !oids::is_polymorphic(*expected) && *actual != oids::UNKNOWN {
                self.raise(
                    ErrorRecord::error(format!(
                        "parameter ${} has type {} but the statement expects {}",
                        index + 1,
                        actual,
                        expected
                    ))
                    .with_sqlstate(SqlState::DATATYPE_MISMATCH),
                );
            }
        }
    }

    pub(super) fn prepare_plan(&self, query: &str, arg_types: &[Oid]) -> Result<PlanPtr, i32> {
        let Some(proc_context) = self.proc_context() else {
            return Err(spi_codes::ERROR_UNCONNECTED);
        };
        let (key, statement) = self.lookup_statement(query);
        self.check_params(&statement.params, arg_types);
        let plan_context = self.create_context(proc_context, "SPI Plan");
        let plan = self.new_object(
            plan_context,
            Object::Plan(PlanData {
                statement: key,
                arg_types: arg_types.to_vec(),
            }),
        );
        debug!(query, "prepared plan");
        Ok(PlanPtr::new(plan))
    }

    pub(super) fn execute_plan(
        &self,
        plan: PlanPtr,
        args: &[NullableWireValue],
        read_only: bool,
        count: u64,
    ) -> i32 {
        if self.proc_context().is_none() {
            return spi_codes::ERROR_UNCONNECTED;
        }
        let data = self
            .objects
            .borrow()
            .get(&plan.get())
            .and_then(|entry| match &entry.object {
                Object::Plan(data) => Some((data.statement.clone(), data.arg_types.len())),
                _ => None,
            });
        let Some((key, nargs)) = data else {
            return spi_codes::ERROR_ARGUMENT;
        };
        if args.len() != nargs {
            return spi_codes::ERROR_PARAM;
        }
        self.run_statement(&key, args, read_only, count)
    }

    pub(super) fn execute_text(
        &self,
        query: &str,
        arg_types: &[Oid],
        args: &[NullableWireValue],
        read_only: bool,
        count: u64,
    ) -> i32 {
        if self.proc_context().is_none() {
            return spi_codes::ERROR_UNCONNECTED;
        }
        if arg_types.len() != args.len() {
            return spi_codes::ERROR_ARGUMENT;
        }
        let (key, statement) = self.lookup_statement(query);
        self.check_params(&statement.params, arg_types);
        self.run_statement(&key, args, read_only, count)
    }

    fn run_statement(&self, key: &str, args: &[NullableWireValue], read_only: bool, count: u64) -> i32 {
        let found = self.statements.borrow().get(key).cloned();
        let (Some(statement), Some(proc_context)) = (found, self.proc_context()) else {
            return spi_codes::ERROR_ARGUMENT;
        };
        self.executions.set(self.executions.get() + 1);
        if read_only && statement.command != Command::Select {
            self.raise(
                ErrorRecord::error(format!(
                    "{} is not allowed in a non-volatile function",
                    statement.command.tag()
                ))
                .with_sqlstate(SqlState::FEATURE_NOT_SUPPORTED),
            );
        }

        let table_context = self.create_context(proc_context, "SPI TupTable");
        let call = StatementCall {
            host: self,
            args,
            context: table_context,
        };
        let mut rows = match (statement.handler)(&call) {
            Ok(rows) => rows,
            Err(record) => self.raise(record),
        };
        if count > 0 {
            rows.truncate(usize::try_from(count).unwrap_or(usize::MAX));
        }
        let processed = rows.len() as u64;

        let table = if statement.shape.is_empty() {
            None
        } else {
            if let Some(row) = rows.iter().find(|row| row.len() != statement.shape.len()) {
                self.raise(ErrorRecord::error(format!(
                    "statement produced a row of {} columns, expected {}",
                    row.len(),
                    statement.shape.len()
                )));
            }
            let rows = rows
                .iter()
                .map(|row| self.copy_row(table_context, &statement.shape, row))
                .collect();
            let ptr = self.new_object(
                table_context,
                Object::TupleTable(TupleTableData {
                    shape: statement.shape.clone(),
                    rows,
                }),
            );
            Some(TupleTablePtr::new(ptr))
        };

        if let Some(frame) = self.spi.borrow_mut().last_mut() {
            frame.last_table = table;
            frame.processed = processed;
        }
        if statement.command != Command::Select {
            self.record_writes(processed);
        }
        trace!(statement = key, processed, "executed statement");
        statement.command.ok_code()
    }
}
