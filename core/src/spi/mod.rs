//! The embedded query client.
//!
//! An [`Executor`] is one SPI connection. Plans and result tables it hands
//! out are owned by host memory contexts that die with the connection,
//! unless a plan is explicitly kept. Both check their owning context before
//! every access and fail with [`Error::PointerGone`] once it is gone.
//!
//! Work can be grouped in a [`Subtransaction`] that is rolled back as a
//! unit, which is also how a caller recovers from a failed statement and
//! keeps querying.
//!
//! [`Error::PointerGone`]: crate::Error::PointerGone

mod plan;
mod result;
mod subtransaction;

pub use plan::PreparedPlan;
pub use result::ResultTable;
pub use subtransaction::Subtransaction;

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::convert::{FromRow, IntoRow};
use crate::error::{Error, Result};
use crate::host::spi_codes;
use crate::memory::MemoryContext;
use crate::options::ExecuteOptions;
use crate::session::Session;
use crate::wire::Oid;

pub(crate) fn execution_error(code: i32) -> Error {
    Error::Execution {
        code,
        name: spi_codes::name(code),
    }
}

/// An open SPI connection. Finishes the connection when dropped.
pub struct Executor {
    session: Session,
}

impl Executor {
    pub fn connect(session: &Session) -> Result<Executor> {
        let code = session.guard(|host| host.spi_connect())?;
        if code < 0 {
            return Err(execution_error(code));
        }
        trace!("SPI connected");
        Ok(Executor {
            session: session.clone(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Parses and plans `query`. The plan dies with this connection unless
    /// [`PreparedPlan::keep`] is called.
    pub fn prepare(&self, query: &str, arg_types: &[Oid]) -> Result<PreparedPlan> {
        let ptr = self
            .session
            .guard(|host| host.spi_prepare(query, arg_types))?
            .map_err(execution_error)?;
        let context = self.session.guard(|host| host.spi_plan_context(ptr))?;
        let owner = self.session.track(MemoryContext::from_id(context));
        trace!(query, "plan prepared");
        Ok(PreparedPlan::new(
            &self.session,
            ptr,
            query,
            SmallVec::from_slice(arg_types),
            owner,
        ))
    }

    /// Runs `plan` with `args`.
    ///
    /// The argument count and kinds are checked against the plan before the
    /// host is asked to execute anything.
    pub fn execute<T: FromRow>(
        &self,
        plan: &PreparedPlan,
        args: impl IntoRow,
        options: ExecuteOptions,
    ) -> Result<ResultTable<T>> {
        let ptr = plan.ptr()?;
        let args = args.into_row(&self.session)?;
        plan.check_args(&args.types)?;
        let code = self.session.guard(|host| {
            host.spi_execute_plan(ptr, &args.values, options.read_only, options.row_limit)
        })?;
        trace!(query = plan.query(), code, "plan executed");
        self.collect(code)
    }

    /// Plans and runs `query` in one step. Argument types come from `args`.
    pub fn query<T: FromRow>(
        &self,
        query: &str,
        args: impl IntoRow,
        options: ExecuteOptions,
    ) -> Result<ResultTable<T>> {
        let args = args.into_row(&self.session)?;
        let code = self.session.guard(|host| {
            host.spi_execute_with_args(
                query,
                &args.types,
                &args.values,
                options.read_only,
                options.row_limit,
            )
        })?;
        trace!(query, code, "query executed");
        self.collect(code)
    }

    /// The session's [`default_execute_options`].
    ///
    /// [`default_execute_options`]: crate::options::SessionOptions::default_execute_options
    pub fn default_options(&self) -> ExecuteOptions {
        self.session.options().default_execute_options
    }

    /// [`Executor::execute`] with the session's default options.
    pub fn execute_default<T: FromRow>(&self, plan: &PreparedPlan, args: impl IntoRow) -> Result<ResultTable<T>> {
        self.execute(plan, args, self.default_options())
    }

    /// [`Executor::query`] with the session's default options.
    pub fn query_default<T: FromRow>(&self, query: &str, args: impl IntoRow) -> Result<ResultTable<T>> {
        self.query(query, args, self.default_options())
    }

    fn collect<T: FromRow>(&self, code: i32) -> Result<ResultTable<T>> {
        if code < 0 {
            return Err(execution_error(code));
        }
        let (processed, table) = self
            .session
            .guard(|host| (host.spi_processed(), host.spi_tuptable()))?;
        ResultTable::new(&self.session, code, processed, table)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        match self.session.guard(|host| host.spi_finish()) {
            Ok(code) if code >= 0 => trace!("SPI finished"),
            Ok(code) => warn!(code, name = spi_codes::name(code), "SPI finish failed"),
            Err(err) => warn!(%err, "SPI finish failed"),
        }
    }
}

#[cfg(test)]
mod executor_test;
