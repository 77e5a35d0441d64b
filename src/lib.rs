//! pgbridge - safe native extensions for a Postgres-style host
//!
//! # Overview
//!
//! The host engine calls native functions through a C-level ABI: untyped
//! machine words tagged by type identifiers, resettable memory contexts,
//! and error reporting by non-local jump. pgbridge lets extension code be
//! written as ordinary Rust on top of that ABI:
//!
//! - values convert between native types and wire values, checked against
//!   the declared host types;
//! - payloads remember the memory context that owns them, and accessing one
//!   after a reset is an error instead of a dangling read;
//! - host errors become [`Error::Host`] and Rust failures become host
//!   errors, without either side's unwinding crossing the other's frames;
//! - queries run through a typed client with prepared plans and lazily
//!   decoded results.
//!
//! # Quick Start
//!
//! ```ignore
//! use pgbridge::{ExecuteOptions, Executor, Session, pg_function};
//!
//! #[pg_function(name = "AddOne")]
//! fn add_one(value: Option<i64>) -> i64 {
//!     value.unwrap_or(0) + 1
//! }
//!
//! fn names(session: &Session, min_id: i32) -> pgbridge::Result<Vec<String>> {
//!     let executor = Executor::connect(session)?;
//!     let rows = executor
//!         .query::<(String,)>(
//!             "SELECT name FROM users WHERE id >= $1",
//!             (min_id,),
//!             ExecuteOptions::read_only(),
//!         )?
//!         .into_rows()?;
//!     Ok(rows.into_iter().map(|(name,)| name).collect())
//! }
//! ```
//!
//! Code generated by [`pg_function`] names `pgbridge_core` directly, so
//! crates using the attribute depend on it as well.
//!
//! # Hosts
//!
//! Everything the runtime needs from the engine is the [`Host`] trait.
//! [`host::sim::SimHost`] implements it in process, with a context tree,
//! an error-data stack, a catalog and a scripted query interface, so
//! extensions can be tested without a running server.

mod error_renderer;

// Re-export the runtime modules from pgbridge_core
pub use pgbridge_core::{
    aggregate, catalog, convert, error, function, guard, host, memory, options, session, spi, srf,
    wire, worker,
};

// Re-export commonly used types
pub use pgbridge_core::{
    ArenaHint, Bytea, CallInfo, ConversionRegistry, EntryPoint, Error, ErrorRecord, ExecuteOptions,
    Executor, FromRow, FromWire, Host, IntoRow, IntoWire, MemoryContext, MemoryContextScope,
    NativeEntry, NullableWireValue, Oid, PgFunction, PreparedPlan, Record, Result, ResultTable, Row,
    RowShape, Session, SessionOptions, Severity, SqlState, Subtransaction, Text, Tracked,
    TrackedMemoryContext, Value, Varlena, WireType, WireValue, oids,
};

// Entry-point attribute
pub use pgbridge_macros::pg_function;

pub use error_renderer::{
    render_error, render_error_to, render_error_to_string, render_error_to_string_no_color,
};
