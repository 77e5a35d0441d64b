//! A bridging runtime for a host database engine's native extension ABI.
//!
//! The host speaks in machine words tagged out of band by type identifiers,
//! allocates from resettable memory contexts, and reports errors by jumping
//! to a recovery point. This crate wraps all three:
//!
//! - [`memory`]: scoped context activation, checked allocation and
//!   staleness detection;
//! - [`guard`]: the error bridge between host jumps and [`Result`];
//! - [`convert`]: typed conversions between native values and wire values;
//! - [`spi`], [`srf`], [`aggregate`]: the query client and the host's call
//!   protocols, built on the three above.
//!
//! Everything the crate needs from the engine is the [`host::Host`] trait;
//! [`host::sim::SimHost`] implements it in process.

pub mod aggregate;
pub mod catalog;
pub mod convert;
pub mod error;
pub mod function;
pub mod guard;
pub mod host;
pub mod memory;
pub mod options;
pub mod session;
pub mod spi;
pub mod srf;
pub mod wire;
pub mod worker;

pub use convert::{
    ArenaHint, Bytea, ConversionRegistry, FromRow, FromWire, IntoRow, IntoWire, Record, Row, Text,
    Value, Varlena, WireType,
};
pub use error::{Error, Result};
pub use function::{CallInfo, EntryPoint, NativeEntry, PgFunction};
pub use host::{ErrorRecord, Host, RowShape, Severity, SqlState};
pub use memory::{MemoryContext, MemoryContextScope, Tracked, TrackedMemoryContext};
pub use options::{ExecuteOptions, SessionOptions};
pub use session::Session;
pub use spi::{Executor, PreparedPlan, ResultTable, Subtransaction};
pub use wire::{NullableWireValue, Oid, WireValue, oids};
