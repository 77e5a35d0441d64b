//! Rows and composite values.
//!
//! Rows are converted column by column against a [`RowShape`]. Before
//! anything is decoded, [`FromRow::check_shape`] verifies the arity and that
//! every column kind is representable; a mismatch is reported as
//! [`Error::ArityOrKindMismatch`], never as a truncated row.

use core::any::type_name;

use smallvec::SmallVec;

use super::{ArenaHint, FromWire, IntoWire, Value, WireType, expect_type};
use crate::error::{Error, Result};
use crate::host::{Attribute, RowShape};
use crate::session::Session;
use crate::wire::{NullableWireValue, Oid, WireValue, oids};

/// An encoded row: one value and its declared type per column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowValues {
    pub types: SmallVec<[Oid; 8]>,
    pub values: SmallVec<[NullableWireValue; 8]>,
}

impl RowValues {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, type_oid: Oid, value: NullableWireValue) {
        self.types.push(type_oid);
        self.values.push(value);
    }
}

/// Native values that encode as a row (query arguments, set-returning rows).
pub trait IntoRow {
    fn into_row(self, session: &Session) -> Result<RowValues>;
}

/// Native values that decode from a row.
pub trait FromRow: Sized {
    /// Validates arity and the kind of every column.
    fn check_shape(shape: &RowShape, session: &Session) -> Result<()>;

    /// Decodes `values`. Callers run [`FromRow::check_shape`] first.
    fn from_row(values: &[NullableWireValue], shape: &RowShape, hint: &ArenaHint) -> Result<Self>;
}

/// Fails unless `T` can represent column `index` of `shape`.
pub fn check_column<T: WireType>(shape: &RowShape, index: usize, session: &Session) -> Result<()> {
    let Some(attribute) = shape.attribute(index) else {
        return Err(Error::mismatch(format!(
            "row has {} columns, column {} does not exist",
            shape.len(),
            index + 1
        )));
    };
    if T::accepts(attribute.type_oid, session) {
        Ok(())
    } else {
        Err(Error::mismatch(format!(
            "column {} ({}) has type {}, which {} cannot represent",
            index + 1,
            attribute.name,
            attribute.type_oid,
            type_name::<T>()
        )))
    }
}

fn check_arity(shape: &RowShape, expected: usize) -> Result<()> {
    if shape.len() == expected {
        Ok(())
    } else {
        Err(Error::mismatch(format!(
            "expected {expected} columns, row has {}",
            shape.len()
        )))
    }
}

impl IntoRow for () {
    fn into_row(self, _session: &Session) -> Result<RowValues> {
        Ok(RowValues::default())
    }
}

/// Discards the row. Used for commands whose output is not read.
impl FromRow for () {
    fn check_shape(_shape: &RowShape, _session: &Session) -> Result<()> {
        Ok(())
    }

    fn from_row(_values: &[NullableWireValue], _shape: &RowShape, _hint: &ArenaHint) -> Result<Self> {
        Ok(())
    }
}

impl<R: IntoRow, E: Into<Error>> IntoRow for core::result::Result<R, E> {
    fn into_row(self, session: &Session) -> Result<RowValues> {
        self.map_err(Into::into)?.into_row(session)
    }
}

macro_rules! tuple_rows {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: IntoWire),+> IntoRow for ($($name,)+) {
            fn into_row(self, session: &Session) -> Result<RowValues> {
                let mut row = RowValues::default();
                $(
                    let value = self.$idx;
                    row.push(value.wire_type(), value.into_nullable_wire(session)?);
                )+
                Ok(row)
            }
        }

        impl<$($name: FromWire),+> FromRow for ($($name,)+) {
            fn check_shape(shape: &RowShape, session: &Session) -> Result<()> {
                check_arity(shape, $len)?;
                $(check_column::<$name>(shape, $idx, session)?;)+
                Ok(())
            }

            fn from_row(values: &[NullableWireValue], shape: &RowShape, hint: &ArenaHint) -> Result<Self> {
                if values.len() != $len {
                    return Err(Error::mismatch(format!(
                        "expected {} values, row has {}",
                        $len,
                        values.len()
                    )));
                }
                Ok(($(
                    $name::from_nullable_wire(
                        values[$idx],
                        shape.attribute($idx).map_or(Oid::INVALID, |a| a.type_oid),
                        hint,
                    )?,
                )+))
            }
        }
    };
}

tuple_rows!(1; A 0);
tuple_rows!(2; A 0, B 1);
tuple_rows!(3; A 0, B 1, C 2);
tuple_rows!(4; A 0, B 1, C 2, D 3);
tuple_rows!(5; A 0, B 1, C 2, D 3, E 4);
tuple_rows!(6; A 0, B 1, C 2, D 3, E 4, F 5);
tuple_rows!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
tuple_rows!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
tuple_rows!(9; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
tuple_rows!(10; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);
tuple_rows!(11; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10);
tuple_rows!(12; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11);

/// A row decoded through the session's [`ConversionRegistry`].
///
/// [`ConversionRegistry`]: super::ConversionRegistry
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    names: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&Value> {
        let index = self.names.iter().position(|n| n == name)?;
        self.values.get(index)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl FromRow for Row {
    fn check_shape(_shape: &RowShape, _session: &Session) -> Result<()> {
        Ok(())
    }

    fn from_row(values: &[NullableWireValue], shape: &RowShape, hint: &ArenaHint) -> Result<Self> {
        check_arity(shape, values.len())?;
        let registry = hint.session().registry();
        let values = shape
            .type_oids()
            .zip(values)
            .map(|(oid, value)| registry.decode(*value, oid, hint))
            .collect::<Result<Vec<_>>>()?;
        Ok(Row {
            names: shape.attributes().iter().map(|a| a.name.clone()).collect(),
            values,
        })
    }
}

impl IntoRow for Vec<Value> {
    fn into_row(self, session: &Session) -> Result<RowValues> {
        let registry = session.registry();
        let mut row = RowValues::default();
        for value in &self {
            row.push(value.type_oid(), registry.encode(value, session)?);
        }
        Ok(row)
    }
}

/// A composite value, read attribute by attribute.
#[derive(Clone, Debug)]
pub struct Record {
    hint: ArenaHint,
    raw: WireValue,
    type_oid: Oid,
    shape: RowShape,
}

impl Record {
    /// Forms a record of type `type_oid` in the current memory context.
    ///
    /// For an anonymous record (`RECORD`) the shape is taken from `row`;
    /// otherwise `row` must agree with the composite type's columns.
    pub fn build(session: &Session, type_oid: Oid, row: impl IntoRow) -> Result<Record> {
        let row = row.into_row(session)?;
        let shape = if type_oid == oids::RECORD {
            RowShape::from_type_oids(&row.types)
        } else {
            session
                .composite_shape(type_oid)?
                .ok_or(Error::UnknownType(type_oid))?
        };
        let declared = RowShape::from_type_oids(&row.types);
        if !declared.fits(&shape) {
            return Err(Error::mismatch(format!(
                "values {declared} do not fit type {type_oid} {shape}"
            )));
        }
        let context = session.current_context();
        let raw = session.guard(|host| host.form_record(context.id(), type_oid, &shape, &row.values))?;
        Ok(Record {
            hint: ArenaHint::owned_by(session, session.track(context)),
            raw,
            type_oid,
            shape,
        })
    }

    pub fn type_oid(&self) -> Oid {
        self.type_oid
    }

    pub fn shape(&self) -> &RowShape {
        &self.shape
    }

    pub fn raw(&self) -> WireValue {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.shape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// Attribute `index`, decoded as `T`.
    pub fn get<T: FromWire>(&self, index: usize) -> Result<T> {
        let session = self.hint.session();
        check_column::<T>(&self.shape, index, session)?;
        self.hint.check()?;
        let value = session.guard(|host| host.record_attribute(self.raw, index))?;
        let oid = self.shape.attribute(index).map_or(Oid::INVALID, |a| a.type_oid);
        T::from_nullable_wire(value, oid, &self.hint)
    }

    /// Every attribute, undecoded.
    pub fn values(&self) -> Result<Vec<NullableWireValue>> {
        self.hint.check()?;
        self.hint.session().guard(|host| {
            (0..self.shape.len())
                .map(|index| host.record_attribute(self.raw, index))
                .collect()
        })
    }

    /// The whole record as a native row.
    pub fn decode<R: FromRow>(&self) -> Result<R> {
        R::check_shape(&self.shape, self.hint.session())?;
        let values = self.values()?;
        R::from_row(&values, &self.shape, &self.hint)
    }

    pub fn attributes(&self) -> &[Attribute] {
        self.shape.attributes()
    }
}

impl WireType for Record {
    fn type_oid() -> Oid {
        oids::RECORD
    }

    fn accepts(oid: Oid, session: &Session) -> bool {
        session.is_composite(oid)
    }
}

impl FromWire for Record {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        expect_type::<Self>(oid, hint.session())?;
        hint.check()?;
        let (type_oid, shape) = hint
            .session()
            .guard(|host| (host.record_type(value), host.record_shape(value)))?;
        Ok(Record {
            hint: hint.clone(),
            raw: value,
            type_oid,
            shape,
        })
    }
}

impl IntoWire for Record {
    fn into_wire(self, _session: &Session) -> Result<WireValue> {
        self.hint.check()?;
        Ok(self.raw)
    }

    fn wire_type(&self) -> Oid {
        self.type_oid
    }
}

impl IntoRow for Record {
    fn into_row(self, _session: &Session) -> Result<RowValues> {
        let values = self.values()?;
        let mut row = RowValues::default();
        for (oid, value) in self.shape.type_oids().zip(values) {
            row.push(oid, value);
        }
        Ok(row)
    }
}
