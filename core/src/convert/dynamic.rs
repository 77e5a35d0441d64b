//! Run-time conversion table keyed by type identifier.

use core::fmt;

use hashbrown::HashMap;

use super::{ArenaHint, FromWire, IntoWire, Record};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::wire::{NullableWireValue, Oid, WireValue, oids};

/// A decoded value of any supported host type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Oid(Oid),
    Text(String),
    Bytea(Vec<u8>),
    Record {
        type_oid: Oid,
        fields: Vec<(String, Value)>,
    },
    /// A type the registry has no descriptor for; bits kept as-is.
    Opaque { type_oid: Oid, value: WireValue },
}

impl Value {
    /// The host type this value encodes as. NULL is `unknown`.
    pub fn type_oid(&self) -> Oid {
        match self {
            Value::Null => oids::UNKNOWN,
            Value::Bool(_) => oids::BOOL,
            Value::Int2(_) => oids::INT2,
            Value::Int4(_) => oids::INT4,
            Value::Int8(_) => oids::INT8,
            Value::Float4(_) => oids::FLOAT4,
            Value::Float8(_) => oids::FLOAT8,
            Value::Oid(_) => oids::OID,
            Value::Text(_) => oids::TEXT,
            Value::Bytea(_) => oids::BYTEA,
            Value::Record { type_oid, .. } | Value::Opaque { type_oid, .. } => *type_oid,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => f.write_str(if *b { "t" } else { "f" }),
            Value::Int2(v) => write!(f, "{v}"),
            Value::Int4(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Float4(v) => write!(f, "{v}"),
            Value::Float8(v) => write!(f, "{v}"),
            Value::Oid(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytea(bytes) => {
                f.write_str("\\x")?;
                bytes.iter().try_for_each(|b| write!(f, "{b:02x}"))
            }
            Value::Record { fields, .. } => {
                f.write_str("(")?;
                for (i, (_, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            Value::Opaque { value, .. } => write!(f, "{value:?}"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

value_from!(bool => Bool, i16 => Int2, i32 => Int4, i64 => Int8, f32 => Float4, f64 => Float8, Oid => Oid, String => Text, Vec<u8> => Bytea);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

pub type DecodeFn = fn(WireValue, Oid, &ArenaHint) -> Result<Value>;
pub type EncodeFn = fn(&Value, &Session) -> Result<WireValue>;

/// Conversion entry for one type identifier.
#[derive(Clone, Copy)]
pub struct Descriptor {
    pub name: &'static str,
    pub decode: DecodeFn,
    pub encode: EncodeFn,
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor").field("name", &self.name).finish_non_exhaustive()
    }
}

fn wrong_variant(value: &Value, target: &'static str) -> Error {
    Error::Conversion {
        type_oid: value.type_oid(),
        target,
    }
}

macro_rules! builtin {
    ($name:literal, $ty:ty, $variant:ident, |$v:ident| $encode:expr) => {
        Descriptor {
            name: $name,
            decode: |value, oid, hint| <$ty>::from_wire(value, oid, hint).map(Value::$variant),
            encode: |value, session| match value {
                Value::$variant($v) => $encode.into_wire(session),
                other => Err(wrong_variant(other, $name)),
            },
        }
    };
}

/// Oid-keyed conversions, consulted when the native type is not known at
/// compile time.
///
/// Built-in types are preinstalled. Extensions register descriptors for
/// their own types, which always have identifiers outside the reserved
/// range.
#[derive(Clone, Debug)]
pub struct ConversionRegistry {
    descriptors: HashMap<Oid, Descriptor>,
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        ConversionRegistry::new()
    }
}

impl ConversionRegistry {
    pub fn new() -> Self {
        let text = builtin!("text", String, Text, |s| s.as_str());
        let builtins = [
            (oids::BOOL, builtin!("bool", bool, Bool, |v| *v)),
            (oids::INT2, builtin!("int2", i16, Int2, |v| *v)),
            (oids::INT4, builtin!("int4", i32, Int4, |v| *v)),
            (oids::INT8, builtin!("int8", i64, Int8, |v| *v)),
            (oids::FLOAT4, builtin!("float4", f32, Float4, |v| *v)),
            (oids::FLOAT8, builtin!("float8", f64, Float8, |v| *v)),
            (oids::OID, builtin!("oid", Oid, Oid, |v| *v)),
            (oids::BYTEA, builtin!("bytea", Vec<u8>, Bytea, |v| v.as_slice())),
            (oids::TEXT, text),
            (oids::VARCHAR, text),
            (oids::BPCHAR, text),
        ];
        ConversionRegistry {
            descriptors: builtins.into_iter().collect(),
        }
    }

    /// Installs a descriptor for a user-defined type.
    pub fn register(&mut self, oid: Oid, descriptor: Descriptor) -> Result<()> {
        if oid.is_reserved() {
            return Err(Error::ReservedOid(oid));
        }
        self.descriptors.insert(oid, descriptor);
        Ok(())
    }

    pub fn get(&self, oid: Oid) -> Option<&Descriptor> {
        self.descriptors.get(&oid)
    }

    /// Decodes a value of host type `oid`.
    ///
    /// Composite types decode field by field; types without a descriptor
    /// are kept as [`Value::Opaque`].
    pub fn decode(&self, value: NullableWireValue, oid: Oid, hint: &ArenaHint) -> Result<Value> {
        let Some(raw) = value.value() else {
            return Ok(Value::Null);
        };
        if let Some(descriptor) = self.descriptors.get(&oid) {
            return (descriptor.decode)(raw, oid, hint);
        }
        if hint.session().is_composite(oid) {
            let record = Record::from_wire(raw, oid, hint)?;
            let values = record.values()?;
            let fields = record
                .attributes()
                .iter()
                .zip(values)
                .map(|(attribute, value)| {
                    Ok((attribute.name.clone(), self.decode(value, attribute.type_oid, hint)?))
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Value::Record {
                type_oid: record.type_oid(),
                fields,
            });
        }
        Ok(Value::Opaque {
            type_oid: oid,
            value: raw,
        })
    }

    /// Encodes `value` into the current memory context.
    pub fn encode(&self, value: &Value, session: &Session) -> Result<NullableWireValue> {
        match value {
            Value::Null => Ok(NullableWireValue::NULL),
            Value::Opaque { value, .. } => Ok(NullableWireValue::new(*value)),
            Value::Record { type_oid, fields } => {
                let values = fields
                    .iter()
                    .map(|(_, field)| field.clone())
                    .collect::<Vec<_>>();
                let record = Record::build(session, *type_oid, values)?;
                Ok(NullableWireValue::new(record.raw()))
            }
            other => {
                let oid = other.type_oid();
                let descriptor = self.descriptors.get(&oid).ok_or(Error::UnknownType(oid))?;
                (descriptor.encode)(other, session).map(NullableWireValue::new)
            }
        }
    }
}
