//! Internal subtransactions of the simulated host.
//!
//! Each level owns a `CurTransactionContext` and the count of rows its
//! write statements affected. Release hands both to the parent level;
//! rollback deletes the context and forgets the rows.

use tracing::debug;

use super::SimHost;
use crate::host::{ContextId, ErrorRecord, Host};

pub(super) struct SubXact {
    name: Option<String>,
    context: ContextId,
    writes: u64,
}

impl SimHost {
    pub(super) fn begin_subxact(&self, name: Option<&str>) -> ContextId {
        let parent = self
            .subxacts
            .borrow()
            .last()
            .map_or(self.top, |level| level.context);
        let context = self.create_context(parent, "CurTransactionContext");
        let mut subxacts = self.subxacts.borrow_mut();
        subxacts.push(SubXact {
            name: name.map(str::to_string),
            context,
            writes: 0,
        });
        debug!(depth = subxacts.len(), name, "subtransaction started");
        context
    }

    fn pop_subxact(&self, operation: &str) -> SubXact {
        let popped = self.subxacts.borrow_mut().pop();
        match popped {
            Some(level) => level,
            None => self.raise(ErrorRecord::error(format!(
                "{operation}: no subtransaction in progress"
            ))),
        }
    }

    pub(super) fn release_subxact(&self) {
        let level = self.pop_subxact("ReleaseCurrentSubTransaction");
        self.record_writes(level.writes);
        debug!(name = level.name.as_deref(), writes = level.writes, "subtransaction released");
    }

    pub(super) fn rollback_subxact(&self) {
        let level = self.pop_subxact("RollbackAndReleaseCurrentSubTransaction");
        self.delete_context(level.context);
        debug!(name = level.name.as_deref(), discarded = level.writes, "subtransaction rolled back");
    }

    /// Credits `rows` to the innermost open level, or commits them.
    pub(super) fn record_writes(&self, rows: u64) {
        match self.subxacts.borrow_mut().last_mut() {
            Some(level) => level.writes += rows,
            None => self.committed_writes.set(self.committed_writes.get() + rows),
        }
    }
}
