use core::fmt;

use once_cell::unsync::OnceCell;

use crate::convert::{ArenaHint, FromRow};
use crate::error::{Error, Result};
use crate::host::{RowShape, TupleTablePtr};
use crate::memory::{MemoryContext, TrackedMemoryContext};
use crate::session::Session;

/// Rows returned by one execution, decoded lazily.
///
/// Each row is decoded on first access and memoized; the table's owning
/// context is checked on every access.
pub struct ResultTable<T> {
    session: Session,
    table: Option<TupleTablePtr>,
    owner: Option<TrackedMemoryContext>,
    shape: RowShape,
    status: i32,
    processed: u64,
    rows: Vec<OnceCell<T>>,
}

impl<T: FromRow> ResultTable<T> {
    pub(super) fn new(
        session: &Session,
        status: i32,
        processed: u64,
        table: Option<TupleTablePtr>,
    ) -> Result<Self> {
        let (owner, shape, len) = match table {
            Some(table) => {
                let (context, shape) = session
                    .guard(|host| (host.tuptable_context(table), host.tuptable_shape(table)))?;
                T::check_shape(&shape, session)?;
                let len = usize::try_from(processed).unwrap_or(usize::MAX);
                (Some(session.track(MemoryContext::from_id(context))), shape, len)
            }
            None => (None, RowShape::default(), 0),
        };
        Ok(ResultTable {
            session: session.clone(),
            table,
            owner,
            shape,
            status,
            processed,
            rows: (0..len).map(|_| OnceCell::new()).collect(),
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn shape(&self) -> &RowShape {
        &self.shape
    }

    /// The SPI success code of the execution.
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Rows processed, including rows of commands that return none.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Row `index`, decoded on first access.
    pub fn at(&self, index: usize) -> Result<&T> {
        if let Some(owner) = &self.owner {
            owner.check()?;
        }
        let cell = self.rows.get(index).ok_or(Error::RowOutOfRange {
            index,
            len: self.rows.len(),
        })?;
        cell.get_or_try_init(|| self.decode(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<&T>> + '_ {
        (0..self.rows.len()).map(move |index| self.at(index))
    }

    /// Decodes every row and returns them.
    pub fn into_rows(self) -> Result<Vec<T>> {
        for index in 0..self.rows.len() {
            self.at(index)?;
        }
        Ok(self.rows.into_iter().filter_map(OnceCell::into_inner).collect())
    }

    fn decode(&self, index: usize) -> Result<T> {
        let (Some(table), Some(owner)) = (self.table, &self.owner) else {
            return Err(Error::RowOutOfRange { index, len: 0 });
        };
        let columns = self.shape.len();
        let values = self.session.guard(|host| {
            (0..columns)
                .map(|column| host.tuptable_value(table, index, column))
                .collect::<Vec<_>>()
        })?;
        T::from_row(&values, &self.shape, &ArenaHint::owned_by(&self.session, owner.clone()))
    }
}

impl<T> fmt::Debug for ResultTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultTable")
            .field("shape", &self.shape)
            .field("status", &self.status)
            .field("processed", &self.processed)
            .field("rows", &self.rows.len())
            .finish()
    }
}
