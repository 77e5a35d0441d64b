//! The multi-step aggregate protocol.
//!
//! An aggregate's state lives in the aggregate memory context the host
//! provides, not in Rust-owned memory: the host decides how long a group's
//! state lives. The state travels between calls as an `internal` wire value
//! pointing at a tagged slot:
//!
//! ```text
//! Uninitialized --transition--> Accumulating --finalize--> Finalized
//!                               Accumulating --serialize--> bytea --deserialize--> Accumulating
//!                (Accumulating, Accumulating) --combine--> Accumulating
//! ```
//!
//! The slot's destructor runs from a reset callback on that context.

use core::alloc::Layout;
use core::any::{TypeId, type_name};
use core::mem::size_of;
use core::ptr::{self, NonNull};

use tracing::debug;

use crate::convert::{ArenaHint, FromRow, IntoWire};
use crate::error::{Error, Result};
use crate::function::CallInfo;
use crate::guard;
use crate::host::RowShape;
use crate::memory::MemoryContext;
use crate::session::Session;
use crate::wire::{Oid, WireValue, oids};

/// A user-defined aggregate.
///
/// `combine`, `serialize` and `deserialize` are only needed for partial
/// aggregation; the defaults report a protocol violation.
pub trait Aggregate: 'static {
    type State: 'static;
    /// Arguments after the state, decoded per row.
    type Args: FromRow;
    type Output: IntoWire;

    fn initial() -> Self::State;

    fn step(state: &mut Self::State, args: Self::Args) -> Result<()>;

    fn finalize(state: &Self::State) -> Result<Self::Output>;

    fn combine(state: &mut Self::State, other: &Self::State) -> Result<()> {
        let _ = (state, other);
        Err(unsupported::<Self>("combine"))
    }

    fn serialize(state: &Self::State) -> Result<Vec<u8>> {
        let _ = state;
        Err(unsupported::<Self>("serialize"))
    }

    fn deserialize(bytes: &[u8]) -> Result<Self::State> {
        let _ = bytes;
        Err(unsupported::<Self>("deserialize"))
    }
}

fn unsupported<A: ?Sized>(step: &str) -> Error {
    Error::Protocol(format!("aggregate {} does not support {step}", type_name::<A>()))
}

/// Type identifier of the transition state.
pub const STATE_TYPE: Oid = oids::INTERNAL;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Accumulating,
    Finalized,
}

#[repr(C)]
struct Slot<S> {
    tag: TypeId,
    phase: Phase,
    state: S,
}

fn aggregate_context(call: &CallInfo) -> Result<MemoryContext> {
    call.aggregate_context()
        .ok_or_else(|| Error::Protocol("aggregate support function called outside an aggregate".to_string()))
}

fn new_slot<A: Aggregate>(session: &Session, context: MemoryContext, state: A::State) -> Result<NonNull<Slot<A::State>>> {
    let slot = session
        .alloc_layout(context, Layout::new::<Slot<A::State>>())?
        .cast::<Slot<A::State>>();
    // SAFETY: freshly allocated with the slot's layout.
    unsafe {
        slot.as_ptr().write(Slot {
            tag: TypeId::of::<A>(),
            phase: Phase::Accumulating,
            state,
        })
    };
    let raw = slot.as_ptr();
    // SAFETY: the callback runs once, before the memory is released.
    session.register_reset_callback(context, move || unsafe { ptr::drop_in_place(raw) });
    debug!(aggregate = type_name::<A>(), %context, "aggregate state created");
    Ok(slot)
}

/// Validates that `value` is a state slot of `A` in `context`.
fn slot_of<A: Aggregate>(session: &Session, context: MemoryContext, value: WireValue) -> Result<NonNull<Slot<A::State>>> {
    let (owner, size) = session.chunk_for_pointer(value.as_ptr::<u8>())?;
    if owner != context {
        return Err(Error::Protocol(format!(
            "aggregate state belongs to memory context {owner}, not {context}"
        )));
    }
    if size < size_of::<Slot<A::State>>() {
        return Err(Error::Protocol(format!(
            "aggregate state chunk of {size} bytes is too small for {}",
            type_name::<A>()
        )));
    }
    let slot = NonNull::new(value.as_ptr::<Slot<A::State>>()).ok_or(Error::ForeignPointer { addr: 0 })?;
    // SAFETY: the pointer starts a live chunk of the aggregate context large
    // enough for a slot, and the tag is the first field of every slot.
    let tag = unsafe { ptr::addr_of!((*slot.as_ptr()).tag).read() };
    if tag != TypeId::of::<A>() {
        return Err(Error::Protocol(format!(
            "aggregate state was not created by {}",
            type_name::<A>()
        )));
    }
    Ok(slot)
}

fn expect_phase(phase: Phase, step: &str) -> Result<()> {
    if phase == Phase::Accumulating {
        Ok(())
    } else {
        Err(Error::Protocol(format!("{step} called on a finalized aggregate state")))
    }
}

fn decode_args<R: FromRow>(session: &Session, call: &CallInfo) -> Result<R> {
    let types = call.arg_types().get(1..).unwrap_or(&[]);
    let shape = RowShape::from_type_oids(types);
    R::check_shape(&shape, session)?;
    let values = (1..call.nargs())
        .map(|index| call.raw_arg(index))
        .collect::<Result<Vec<_>>>()?;
    R::from_row(&values, &shape, &ArenaHint::new(session))
}

/// Transition function (`sfunc`): folds one row into the state.
pub fn transition<A: Aggregate>(session: &Session, call: &mut CallInfo) -> WireValue {
    guard::outbound(session, || {
        let context = aggregate_context(call)?;
        let _scope = session.activate(call.memory_context());
        let args = decode_args::<A::Args>(session, call)?;
        let slot = match call.raw_arg(0)?.value() {
            Some(value) => slot_of::<A>(session, context, value)?,
            None => new_slot::<A>(session, context, A::initial())?,
        };
        // SAFETY: validated slot; the host passes each state to one call at a time.
        let slot_ref = unsafe { &mut *slot.as_ptr() };
        expect_phase(slot_ref.phase, "transition")?;
        A::step(&mut slot_ref.state, args)?;
        call.is_null = false;
        Ok(WireValue::from_ptr(slot.as_ptr()))
    })
}

/// Final function (`ffunc`). May run more than once; the state is not
/// consumed, but no further transitions are accepted.
pub fn finalize<A: Aggregate>(session: &Session, call: &mut CallInfo) -> WireValue {
    guard::outbound(session, || {
        let context = aggregate_context(call)?;
        let _scope = session.activate(call.memory_context());
        let output = match call.raw_arg(0)?.value() {
            Some(value) => {
                let slot = slot_of::<A>(session, context, value)?;
                // SAFETY: as in `transition`.
                let slot = unsafe { &mut *slot.as_ptr() };
                slot.phase = Phase::Finalized;
                A::finalize(&slot.state)?
            }
            None => A::finalize(&A::initial())?,
        };
        debug!(aggregate = type_name::<A>(), "aggregate finalized");
        call.set_result(session, output)
    })
}

/// Combine function: merges the second partial state into the first.
pub fn combine<A: Aggregate>(session: &Session, call: &mut CallInfo) -> WireValue {
    guard::outbound(session, || {
        let context = aggregate_context(call)?;
        let first = call.raw_arg(0)?.value();
        let second = call.raw_arg(1)?.value();
        let merged = match (first, second) {
            (None, None) => return Ok(call.return_null()),
            (None, Some(value)) | (Some(value), None) => {
                let slot = slot_of::<A>(session, context, value)?;
                // SAFETY: as in `transition`.
                expect_phase(unsafe { (*slot.as_ptr()).phase }, "combine")?;
                slot
            }
            (Some(left), Some(right)) => {
                if left == right {
                    return Err(Error::Protocol("cannot combine an aggregate state with itself".to_string()));
                }
                let target = slot_of::<A>(session, context, left)?;
                let source = slot_of::<A>(session, context, right)?;
                // SAFETY: distinct validated slots.
                let (target_ref, source_ref) = unsafe { (&mut *target.as_ptr(), &*source.as_ptr()) };
                expect_phase(target_ref.phase, "combine")?;
                expect_phase(source_ref.phase, "combine")?;
                A::combine(&mut target_ref.state, &source_ref.state)?;
                target
            }
        };
        call.is_null = false;
        Ok(WireValue::from_ptr(merged.as_ptr()))
    })
}

/// Serialization function: state to `bytea`.
pub fn serialize<A: Aggregate>(session: &Session, call: &mut CallInfo) -> WireValue {
    guard::outbound(session, || {
        let context = aggregate_context(call)?;
        let _scope = session.activate(call.memory_context());
        let Some(value) = call.raw_arg(0)?.value() else {
            return Err(Error::Protocol("serialize called without a state".to_string()));
        };
        let slot = slot_of::<A>(session, context, value)?;
        // SAFETY: as in `transition`.
        let slot = unsafe { &*slot.as_ptr() };
        expect_phase(slot.phase, "serialize")?;
        let bytes = A::serialize(&slot.state)?;
        let encoded = bytes.into_wire(session)?;
        call.is_null = false;
        Ok(encoded)
    })
}

/// Deserialization function: `bytea` back to an accumulating state in the
/// aggregate context.
pub fn deserialize<A: Aggregate>(session: &Session, call: &mut CallInfo) -> WireValue {
    guard::outbound(session, || {
        let context = aggregate_context(call)?;
        let bytes = call.arg::<Vec<u8>>(session, 0)?;
        let state = A::deserialize(&bytes)?;
        let slot = new_slot::<A>(session, context, state)?;
        call.is_null = false;
        Ok(WireValue::from_ptr(slot.as_ptr()))
    })
}

#[cfg(test)]
#[path = "aggregate_test.rs"]
mod aggregate_test;
