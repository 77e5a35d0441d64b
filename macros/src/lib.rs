//! Procedural macros for host-callable functions
//!
//! This crate provides the `#[pg_function]` attribute macro, which turns a
//! plain Rust function into an entry point the host can call.

extern crate proc_macro;

use proc_macro::TokenStream;

mod pg_function;

/// Generate a host entry point for a Rust function.
///
/// The function is kept as written. Next to it the macro generates a unit
/// struct named after the `name` attribute that implements
/// `pgbridge_core::EntryPoint`, plus an associated `invoke` function usable
/// as a bare `PgFunction`.
///
/// # Example
///
/// ```ignore
/// #[pg_function(name = "AddOne")]
/// fn add_one(value: Option<i64>) -> i64 {
///     value.unwrap_or(0) + 1
/// }
///
/// host.invoke(&session, &AddOne, &[WireValue::from_i64(1).into()])?;
/// ```
///
/// The generated call:
/// 1. runs inside `guard::outbound`, so every failure is reported to the host;
/// 2. activates the per-call memory context;
/// 3. decodes each argument with `CallInfo::arg`;
/// 4. calls the function, propagating `Err` if it returns a `Result`;
/// 5. encodes the return value with `CallInfo::set_result`.
///
/// # Attributes
///
/// - `name` (required): the entry point name. Must be a valid identifier;
///   it also names the generated struct.
/// - `setof`: the function returns an `IntoIterator` of rows, which are
///   materialized into the caller's tuple store.
///
/// # Parameters
///
/// Parameters are bound by identifier and may be any `FromWire` type.
/// A leading `&Session` parameter receives the calling session and is not
/// declared to the host. Generic functions and methods are rejected.
///
/// The generated code refers to `pgbridge_core` by absolute path.
#[proc_macro_attribute]
pub fn pg_function(attr: TokenStream, item: TokenStream) -> TokenStream {
    pg_function::pg_function_impl(attr, item)
}
