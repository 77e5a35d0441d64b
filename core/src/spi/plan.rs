use core::cell::Cell;
use core::fmt;

use smallvec::SmallVec;
use tracing::debug;

use super::execution_error;
use crate::error::{Error, Result};
use crate::host::PlanPtr;
use crate::memory::TrackedMemoryContext;
use crate::session::Session;
use crate::wire::{Oid, oids};

/// A parsed and planned query owned by the host.
pub struct PreparedPlan {
    session: Session,
    ptr: PlanPtr,
    query: String,
    arg_types: SmallVec<[Oid; 8]>,
    owner: TrackedMemoryContext,
    kept: Cell<bool>,
}

impl PreparedPlan {
    pub(super) fn new(
        session: &Session,
        ptr: PlanPtr,
        query: &str,
        arg_types: SmallVec<[Oid; 8]>,
        owner: TrackedMemoryContext,
    ) -> Self {
        PreparedPlan {
            session: session.clone(),
            ptr,
            query: query.to_string(),
            arg_types,
            owner,
            kept: Cell::new(false),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn arg_types(&self) -> &[Oid] {
        &self.arg_types
    }

    pub fn is_kept(&self) -> bool {
        self.kept.get()
    }

    /// Whether the plan's context is still alive.
    pub fn is_valid(&self) -> bool {
        !self.owner.is_stale()
    }

    /// The host handle, if the plan is still alive.
    pub fn ptr(&self) -> Result<PlanPtr> {
        self.owner.check()?;
        Ok(self.ptr)
    }

    /// Promotes the plan so it survives the end of the SPI connection.
    pub fn keep(&self) -> Result<()> {
        let ptr = self.ptr()?;
        if self.kept.get() {
            return Ok(());
        }
        let code = self.session.guard(|host| host.spi_keep_plan(ptr))?;
        if code < 0 {
            return Err(execution_error(code));
        }
        self.kept.set(true);
        debug!(query = %self.query, "plan kept");
        Ok(())
    }

    /// Releases the plan.
    pub fn free(self) -> Result<()> {
        let ptr = self.ptr()?;
        let code = self.session.guard(|host| host.spi_free_plan(ptr))?;
        if code < 0 {
            return Err(execution_error(code));
        }
        Ok(())
    }

    /// Arity and kind of `types` against the declared argument types.
    pub(super) fn check_args(&self, types: &[Oid]) -> Result<()> {
        if types.len() != self.arg_types.len() {
            return Err(Error::mismatch(format!(
                "plan for \"{}\" takes {} arguments, {} supplied",
                self.query,
                self.arg_types.len(),
                types.len()
            )));
        }
        let mismatch = self
            .arg_types
            .iter()
            .zip(types)
            .position(|(declared, actual)| {
                declared != actual && !oids::is_polymorphic(*declared) && *actual != oids::UNKNOWN
            });
        if let Some(index) = mismatch {
            return Err(Error::mismatch(format!(
                "argument {} of \"{}\" is declared {} but has type {}",
                index + 1,
                self.query,
                self.arg_types[index],
                types[index]
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PreparedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedPlan")
            .field("query", &self.query)
            .field("arg_types", &self.arg_types)
            .field("kept", &self.kept.get())
            .field("valid", &self.is_valid())
            .finish()
    }
}
