//! Machine-word values exchanged with the host.
//!
//! A [`WireValue`] is the host's `Datum`: one pointer-sized word with no type
//! information of its own. The type travels out of band as an [`Oid`]. For
//! by-value kinds the bits are the value itself; for by-reference kinds the
//! bits are a pointer into a memory context and must only be read through
//! the host's accessors.

use core::fmt;

use static_assertions::assert_eq_size;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("pgbridge requires a 64-bit target: int8 and float8 are passed by value");

/// One host-native machine word.
///
/// Wire values are immutable and never freed individually; their payload
/// (if any) dies with the memory context it was allocated in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct WireValue(usize);

assert_eq_size!(WireValue, usize);

impl WireValue {
    /// The all-zero word. Used as the payload of SQL NULL.
    pub const NULL: WireValue = WireValue(0);

    pub const fn from_usize(bits: usize) -> Self {
        WireValue(bits)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        WireValue(ptr as usize)
    }

    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn from_bool(value: bool) -> Self {
        WireValue(value as usize)
    }

    pub const fn as_bool(self) -> bool {
        self.0 != 0
    }

    /// Sign-extends, like the host's `Int16GetDatum`.
    pub const fn from_i16(value: i16) -> Self {
        WireValue(value as isize as usize)
    }

    /// Truncates to the low 16 bits, like the host's `DatumGetInt16`.
    pub const fn as_i16(self) -> i16 {
        self.0 as i16
    }

    pub const fn from_i32(value: i32) -> Self {
        WireValue(value as isize as usize)
    }

    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }

    pub const fn from_i64(value: i64) -> Self {
        WireValue(value as usize)
    }

    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub const fn from_f32(value: f32) -> Self {
        WireValue(value.to_bits() as usize)
    }

    pub const fn as_f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    pub const fn from_f64(value: f64) -> Self {
        WireValue(value.to_bits() as usize)
    }

    pub const fn as_f64(self) -> f64 {
        f64::from_bits(self.0 as u64)
    }

    pub const fn from_oid(oid: Oid) -> Self {
        WireValue(oid.0 as usize)
    }

    pub const fn as_oid(self) -> Oid {
        Oid(self.0 as u32)
    }
}

impl fmt::Debug for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireValue({:#x})", self.0)
    }
}

/// A wire value paired with the host's null flag.
///
/// The payload is meaningless when `is_null` is set; always check the flag
/// (or use [`NullableWireValue::value`]) before interpreting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct NullableWireValue {
    pub value: WireValue,
    pub is_null: bool,
}

impl NullableWireValue {
    pub const NULL: NullableWireValue = NullableWireValue {
        value: WireValue::NULL,
        is_null: true,
    };

    pub const fn new(value: WireValue) -> Self {
        NullableWireValue {
            value,
            is_null: false,
        }
    }

    pub const fn is_null(&self) -> bool {
        self.is_null
    }

    /// The payload, or `None` for SQL NULL.
    pub const fn value(&self) -> Option<WireValue> {
        if self.is_null { None } else { Some(self.value) }
    }
}

impl From<WireValue> for NullableWireValue {
    fn from(value: WireValue) -> Self {
        NullableWireValue::new(value)
    }
}

/// A host type identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default)]
#[repr(transparent)]
pub struct Oid(pub u32);

impl Oid {
    pub const INVALID: Oid = Oid(0);

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Whether this identifier is in the range the host reserves for its
    /// built-in objects. Reserved identifiers must never be reassigned.
    pub const fn is_reserved(self) -> bool {
        self.0 < oids::FIRST_NORMAL_OBJECT_ID.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known built-in type identifiers.
pub mod oids {
    use super::Oid;

    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const OID: Oid = Oid(26);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    pub const UNKNOWN: Oid = Oid(705);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const RECORD: Oid = Oid(2249);
    pub const CSTRING: Oid = Oid(2275);
    pub const ANY: Oid = Oid(2276);
    pub const VOID: Oid = Oid(2278);
    pub const INTERNAL: Oid = Oid(2281);
    pub const ANYELEMENT: Oid = Oid(2283);

    /// First identifier the host hands out to user-defined objects.
    pub const FIRST_NORMAL_OBJECT_ID: Oid = Oid(16384);

    /// Pseudo-types that accept any concrete argument type.
    pub fn is_polymorphic(oid: Oid) -> bool {
        matches!(oid, ANY | ANYELEMENT)
    }
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod wire_test;
