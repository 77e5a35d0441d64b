//! Internal subtransactions.
//!
//! A [`Subtransaction`] is either released, keeping its work, or rolled
//! back. One that is dropped while still open is rolled back, so an early
//! return or a panic never leaves the host inside it. Rolling back a level
//! also rolls back every level nested in it.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::memory::MemoryContext;
use crate::session::Session;

/// One open internal subtransaction.
#[must_use = "a subtransaction that is dropped right away is rolled back"]
pub struct Subtransaction {
    session: Session,
    context: MemoryContext,
    depth: usize,
    open: bool,
}

impl Subtransaction {
    pub fn begin(session: &Session) -> Result<Subtransaction> {
        Subtransaction::begin_named(session, None)
    }

    pub fn begin_named(session: &Session, name: Option<&str>) -> Result<Subtransaction> {
        let (context, depth) = session.guard(|host| {
            let context = host.begin_internal_subtransaction(name);
            (context, host.subtransaction_depth())
        })?;
        debug!(depth, name, "subtransaction begun");
        Ok(Subtransaction {
            session: session.clone(),
            context: MemoryContext::from_id(context),
            depth,
            open: true,
        })
    }

    /// The transaction context. A rollback deletes it.
    pub fn context(&self) -> MemoryContext {
        self.context
    }

    /// Nesting level, 1 for the outermost subtransaction.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Keeps the work done inside. If the host fails the release, the
    /// subtransaction is rolled back and the host error returned.
    pub fn release(mut self) -> Result<()> {
        let depth = self.host_depth()?;
        if depth < self.depth {
            self.open = false;
            return Err(Error::Protocol(format!(
                "subtransaction at depth {} was already rolled back with its parent",
                self.depth
            )));
        }
        if depth > self.depth {
            return Err(Error::Protocol(format!(
                "subtransaction at depth {} released while {} nested ones are open",
                self.depth,
                depth - self.depth
            )));
        }
        self.open = false;
        if let Err(err) = self.session.guard(|host| host.release_current_subtransaction()) {
            self.roll_back_levels()?;
            return Err(err);
        }
        debug!(depth = self.depth, "subtransaction released");
        Ok(())
    }

    /// Undoes the work done inside, including that of nested levels.
    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.roll_back_levels()
    }

    fn host_depth(&self) -> Result<usize> {
        self.session.guard(|host| host.subtransaction_depth())
    }

    fn roll_back_levels(&self) -> Result<()> {
        if self.host_depth()? < self.depth {
            return Ok(());
        }
        self.session.assert_not_borrowed(self.context);
        self.session.guard(|host| {
            while host.subtransaction_depth() >= self.depth {
                host.rollback_and_release_current_subtransaction();
            }
        })?;
        debug!(depth = self.depth, "subtransaction rolled back");
        Ok(())
    }
}

impl Drop for Subtransaction {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(err) = self.roll_back_levels() {
                warn!(%err, depth = self.depth, "subtransaction rollback failed");
            }
        }
    }
}

impl Session {
    /// Runs `f` inside an internal subtransaction that is released when `f`
    /// succeeds and rolled back when it fails or panics.
    ///
    /// A host error raised inside `f` surfaces as [`Error::Host`] after the
    /// rollback, and the session stays usable.
    pub fn in_subtransaction<R>(&self, f: impl FnOnce(&Subtransaction) -> Result<R>) -> Result<R> {
        let subtransaction = Subtransaction::begin(self)?;
        match f(&subtransaction) {
            Ok(value) => {
                subtransaction.release()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = subtransaction.rollback() {
                    warn!(%rollback, "subtransaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "subtransaction_test.rs"]
mod subtransaction_test;
