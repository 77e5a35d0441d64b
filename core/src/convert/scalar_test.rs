use pretty_assertions::assert_eq;

use super::*;
use crate::test_utils::sim_session;
use crate::wire::oids;

fn round_trip<T: FromWire + IntoWire + Clone>(session: &Session, value: T) -> T {
    let wire = encode_nullable(value.clone(), session).unwrap();
    decode_nullable(wire, value.wire_type(), &ArenaHint::new(session)).unwrap()
}

#[test]
fn test_by_value_kinds() {
    let (_host, session) = sim_session();
    assert!(round_trip(&session, true));
    assert_eq!(round_trip(&session, -7_i16), -7);
    assert_eq!(round_trip(&session, i32::MIN), i32::MIN);
    assert_eq!(round_trip(&session, i64::MAX), i64::MAX);
    assert_eq!(round_trip(&session, 1.5_f32), 1.5);
    assert_eq!(round_trip(&session, -0.25_f64), -0.25);
    assert_eq!(round_trip(&session, oids::TEXT), oids::TEXT);
}

#[test]
fn test_widening_reads() {
    let (_host, session) = sim_session();
    let hint = ArenaHint::new(&session);
    let small = WireValue::from_i16(-3);
    assert_eq!(decode::<i32>(small, oids::INT2, &hint).unwrap(), -3);
    assert_eq!(decode::<i64>(small, oids::INT2, &hint).unwrap(), -3);
    assert_eq!(decode::<i64>(WireValue::from_i32(-70_000), oids::INT4, &hint).unwrap(), -70_000);
    assert_eq!(decode::<f64>(WireValue::from_f32(0.5), oids::FLOAT4, &hint).unwrap(), 0.5);
}

#[test]
fn test_narrowing_is_refused() {
    let (_host, session) = sim_session();
    let hint = ArenaHint::new(&session);
    let err = decode::<i16>(WireValue::from_i32(1), oids::INT4, &hint).unwrap_err();
    assert!(
        matches!(err, Error::Conversion { type_oid, target: "i16" } if type_oid == oids::INT4),
        "{err}"
    );
    assert!(decode::<bool>(WireValue::from_i32(1), oids::INT4, &hint).is_err());
    assert!(decode::<i32>(WireValue::from_i64(1), oids::INT8, &hint).is_err());
}

#[test]
fn test_null_requires_option() {
    let (_host, session) = sim_session();
    let hint = ArenaHint::new(&session);
    let err = decode_nullable::<i32>(NullableWireValue::NULL, oids::INT4, &hint).unwrap_err();
    assert!(matches!(err, Error::NullValue { target: "i32" }), "{err}");

    let value: Option<i32> = decode_nullable(NullableWireValue::NULL, oids::INT4, &hint).unwrap();
    assert_eq!(value, None);
    let value: Option<i32> = decode_nullable(WireValue::from_i32(9).into(), oids::INT4, &hint).unwrap();
    assert_eq!(value, Some(9));
}

#[test]
fn test_option_still_checks_the_type() {
    let (_host, session) = sim_session();
    let hint = ArenaHint::new(&session);
    let err = decode_nullable::<Option<i32>>(NullableWireValue::NULL, oids::TEXT, &hint).unwrap_err();
    assert!(matches!(err, Error::Conversion { .. }), "{err}");
}

#[test]
fn test_encoding_none() {
    let (_host, session) = sim_session();
    assert_eq!(encode_nullable(None::<i64>, &session).unwrap(), NullableWireValue::NULL);
    assert!(matches!(encode(None::<i64>, &session), Err(Error::NullValue { .. })));
    assert_eq!(None::<i64>.wire_type(), oids::INT8);
}

#[test]
fn test_opaque_and_void() {
    let (_host, session) = sim_session();
    let hint = ArenaHint::new(&session);
    let raw = WireValue::from_usize(0xdead_beef);
    assert_eq!(decode::<WireValue>(raw, oids::INTERNAL, &hint).unwrap(), raw);
    assert_eq!(encode((), &session).unwrap(), WireValue::NULL);
    assert_eq!(<()>::type_oid(), oids::VOID);
}
