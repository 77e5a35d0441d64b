//! Conversions between native values and host wire values.
//!
//! Each native type describes itself to the host through three traits:
//!
//! - [`WireType`]: which host type identifiers it can stand for,
//! - [`FromWire`]: decoding from a (possibly null) wire value,
//! - [`IntoWire`]: encoding into a (possibly null) wire value.
//!
//! Together they form the compile-time descriptor for a type. NULL is only
//! representable by the nullable wrapper, `Option<T>`; every other type
//! fails with [`Error::NullValue`].
//!
//! For conversions selected at run time by type identifier, see
//! [`ConversionRegistry`].

pub mod dynamic;
pub mod record;
mod scalar;
pub mod varlena;

pub use dynamic::{ConversionRegistry, Descriptor, Value};
pub use record::{FromRow, IntoRow, Record, Row, RowValues};
pub use varlena::{Bytea, Text, Varlena};

use crate::error::{Error, Result};
use crate::memory::TrackedMemoryContext;
use crate::session::Session;
use crate::wire::{NullableWireValue, Oid, WireValue};

/// Where the payload of a by-reference value lives.
///
/// Decoders that keep a pointer into the host (text, records) check the
/// owner before every access.
#[derive(Clone, Debug)]
pub struct ArenaHint {
    session: Session,
    owner: Option<TrackedMemoryContext>,
}

impl ArenaHint {
    /// A hint with no known owner; payloads are assumed to outlive their use.
    pub fn new(session: &Session) -> Self {
        ArenaHint {
            session: session.clone(),
            owner: None,
        }
    }

    pub fn owned_by(session: &Session, owner: TrackedMemoryContext) -> Self {
        ArenaHint {
            session: session.clone(),
            owner: Some(owner),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn owner(&self) -> Option<&TrackedMemoryContext> {
        self.owner.as_ref()
    }

    /// Fails with [`Error::PointerGone`] once the owner was reset.
    pub fn check(&self) -> Result<()> {
        match &self.owner {
            Some(owner) => owner.check(),
            None => Ok(()),
        }
    }
}

/// Host types a native type can represent.
pub trait WireType {
    /// The identifier used when this type is declared to the host.
    fn type_oid() -> Oid;

    /// Whether a value of host type `oid` can be read as this type.
    fn accepts(oid: Oid, session: &Session) -> bool {
        let _ = session;
        oid == Self::type_oid()
    }
}

pub trait FromWire: WireType + Sized {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self>;

    fn from_nullable_wire(value: NullableWireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        match value.value() {
            Some(value) => Self::from_wire(value, oid, hint),
            None => Err(Error::null_value::<Self>()),
        }
    }
}

pub trait IntoWire: WireType + Sized {
    fn into_wire(self, session: &Session) -> Result<WireValue>;

    fn into_nullable_wire(self, session: &Session) -> Result<NullableWireValue> {
        self.into_wire(session).map(NullableWireValue::new)
    }

    /// The identifier to declare for this particular value.
    fn wire_type(&self) -> Oid {
        Self::type_oid()
    }
}

/// Fails unless `T` can represent host type `oid`.
pub(crate) fn expect_type<T: WireType>(oid: Oid, session: &Session) -> Result<()> {
    if T::accepts(oid, session) {
        Ok(())
    } else {
        Err(Error::conversion::<T>(oid))
    }
}

pub fn decode<T: FromWire>(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<T> {
    T::from_wire(value, oid, hint)
}

pub fn decode_nullable<T: FromWire>(value: NullableWireValue, oid: Oid, hint: &ArenaHint) -> Result<T> {
    T::from_nullable_wire(value, oid, hint)
}

pub fn encode<T: IntoWire>(value: T, session: &Session) -> Result<WireValue> {
    value.into_wire(session)
}

pub fn encode_nullable<T: IntoWire>(value: T, session: &Session) -> Result<NullableWireValue> {
    value.into_nullable_wire(session)
}

#[cfg(test)]
mod scalar_test;
