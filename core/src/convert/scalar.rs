//! By-value kinds: the wire value is the value.

use super::{ArenaHint, FromWire, IntoWire, WireType, expect_type};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::wire::{NullableWireValue, Oid, WireValue, oids};

macro_rules! by_value {
    ($ty:ty, $oid:expr, $from:ident, $as:ident) => {
        impl WireType for $ty {
            fn type_oid() -> Oid {
                $oid
            }
        }

        impl FromWire for $ty {
            fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
                expect_type::<Self>(oid, hint.session())?;
                Ok(value.$as())
            }
        }

        impl IntoWire for $ty {
            fn into_wire(self, _session: &Session) -> Result<WireValue> {
                Ok(WireValue::$from(self))
            }
        }
    };
}

by_value!(bool, oids::BOOL, from_bool, as_bool);
by_value!(i16, oids::INT2, from_i16, as_i16);
by_value!(f32, oids::FLOAT4, from_f32, as_f32);
by_value!(Oid, oids::OID, from_oid, as_oid);

/// Integer and float types also read their narrower host counterparts.
macro_rules! widening {
    ($ty:ty, $oid:path, $from:ident, { $($narrow:pat => $read:expr),* $(,)? }, $own:expr) => {
        impl WireType for $ty {
            fn type_oid() -> Oid {
                $oid
            }

            fn accepts(oid: Oid, _session: &Session) -> bool {
                matches!(oid, $oid $(| $narrow)*)
            }
        }

        impl FromWire for $ty {
            fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
                expect_type::<Self>(oid, hint.session())?;
                let read: fn(WireValue) -> $ty = match oid {
                    $($narrow => $read,)*
                    _ => $own,
                };
                Ok(read(value))
            }
        }

        impl IntoWire for $ty {
            fn into_wire(self, _session: &Session) -> Result<WireValue> {
                Ok(WireValue::$from(self))
            }
        }
    };
}

widening!(i32, oids::INT4, from_i32, {
    oids::INT2 => |v| i32::from(v.as_i16()),
}, WireValue::as_i32);

widening!(i64, oids::INT8, from_i64, {
    oids::INT2 => |v| i64::from(v.as_i16()),
    oids::INT4 => |v| i64::from(v.as_i32()),
}, WireValue::as_i64);

widening!(f64, oids::FLOAT8, from_f64, {
    oids::FLOAT4 => |v| f64::from(v.as_f32()),
}, WireValue::as_f64);

/// Opaque identity: any type, bits passed through untouched.
impl WireType for WireValue {
    fn type_oid() -> Oid {
        oids::ANY
    }

    fn accepts(_oid: Oid, _session: &Session) -> bool {
        true
    }
}

impl FromWire for WireValue {
    fn from_wire(value: WireValue, _oid: Oid, _hint: &ArenaHint) -> Result<Self> {
        Ok(value)
    }
}

impl IntoWire for WireValue {
    fn into_wire(self, _session: &Session) -> Result<WireValue> {
        Ok(self)
    }
}

/// Result of a function returning `void`.
impl WireType for () {
    fn type_oid() -> Oid {
        oids::VOID
    }
}

impl IntoWire for () {
    fn into_wire(self, _session: &Session) -> Result<WireValue> {
        Ok(WireValue::NULL)
    }
}

/// The nullable wrapper: SQL NULL is `None`.
impl<T: WireType> WireType for Option<T> {
    fn type_oid() -> Oid {
        T::type_oid()
    }

    fn accepts(oid: Oid, session: &Session) -> bool {
        T::accepts(oid, session)
    }
}

impl<T: FromWire> FromWire for Option<T> {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        T::from_wire(value, oid, hint).map(Some)
    }

    fn from_nullable_wire(value: NullableWireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        expect_type::<T>(oid, hint.session())?;
        match value.value() {
            Some(value) => T::from_wire(value, oid, hint).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: IntoWire> IntoWire for Option<T> {
    fn into_wire(self, session: &Session) -> Result<WireValue> {
        match self {
            Some(value) => value.into_wire(session),
            None => Err(Error::null_value::<T>()),
        }
    }

    fn into_nullable_wire(self, session: &Session) -> Result<NullableWireValue> {
        match self {
            Some(value) => value.into_nullable_wire(session),
            None => Ok(NullableWireValue::NULL),
        }
    }

    fn wire_type(&self) -> Oid {
        match self {
            Some(value) => value.wire_type(),
            None => T::type_oid(),
        }
    }
}
