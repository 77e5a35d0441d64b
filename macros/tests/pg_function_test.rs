//! Test the #[pg_function] macro

use std::rc::Rc;

use pgbridge_core::convert::{ArenaHint, decode};
use pgbridge_core::host::sim::SimHost;
use pgbridge_core::{
    EntryPoint, Error, IntoWire, NullableWireValue, RowShape, Session, SessionOptions, SqlState,
    WireValue, oids,
};
use pgbridge_macros::pg_function;
use pretty_assertions::assert_eq;

/// Adds one, treating NULL as zero
#[pg_function(name = "AddOne")]
fn add_one(value: Option<i64>) -> i64 {
    value.unwrap_or(0) + 1
}

/// Fails on a zero denominator
#[pg_function(name = "Ratio")]
fn ratio(numerator: i64, denominator: i64) -> Result<f64, Error> {
    if denominator == 0 {
        return Err(Error::application("division by zero"));
    }
    Ok(numerator as f64 / denominator as f64)
}

#[pg_function(name = "Greet")]
fn greet(name: String) -> String {
    format!("hello, {name}")
}

#[pg_function(name = "Nothing")]
fn nothing() {}

#[pg_function(name = "MaybeLength")]
fn maybe_length(text: Option<String>) -> Option<i32> {
    text.map(|text| text.len() as i32)
}

#[pg_function(name = "Explode")]
fn explode(depth: i32) -> i32 {
    let items: Vec<i32> = Vec::new();
    items[depth as usize]
}

#[pg_function(name = "Numbered", setof)]
fn numbered(count: i64) -> impl Iterator<Item = (i64, String)> {
    (1..=count).map(|i| (i, format!("item {i}")))
}

#[pg_function(name = "Checked", setof)]
fn checked(count: i32) -> pgbridge_core::Result<Vec<(i32,)>> {
    if count < 0 {
        return Err(Error::application("count must not be negative"));
    }
    Ok((0..count).map(|i| (i,)).collect())
}

#[pg_function(name = "CurrentContextName")]
fn current_context_name(session: &Session, prefix: String) -> String {
    format!("{prefix}{}", session.context_name(session.current_context()))
}

fn session() -> (Rc<SimHost>, Session) {
    let host = Rc::new(SimHost::default());
    let session = Session::new(host.clone(), SessionOptions::default());
    (host, session)
}

#[test]
fn test_macro_generates_entry_point() {
    assert_eq!(AddOne.name(), "AddOne");
    assert_eq!(AddOne.arg_types(), vec![oids::INT8]);
    assert_eq!(AddOne.return_type(), oids::INT8);

    assert_eq!(Ratio.arg_types(), vec![oids::INT8, oids::INT8]);
    assert_eq!(Ratio.return_type(), oids::FLOAT8);
    assert_eq!(Greet.return_type(), oids::TEXT);
    assert!(Nothing.arg_types().is_empty());
    assert_eq!(Nothing.return_type(), oids::VOID);
    assert_eq!(Numbered.return_type(), oids::RECORD);

    // The original function is kept as written.
    assert_eq!(add_one(Some(1)), 2);
}

#[test]
fn test_scalar_call() {
    let (host, session) = session();
    let result = host
        .invoke(&session, &AddOne, &[WireValue::from_i64(41).into()])
        .unwrap();
    assert_eq!(result.value().map(WireValue::as_i64), Some(42));

    let result = host.invoke(&session, &AddOne, &[NullableWireValue::NULL]).unwrap();
    assert_eq!(result.value().map(WireValue::as_i64), Some(1));
}

#[test]
fn test_null_result() {
    let (host, session) = session();
    let result = host
        .invoke(&session, &MaybeLength, &[NullableWireValue::NULL])
        .unwrap();
    assert!(result.is_null());

    let text = "four".into_wire(&session).unwrap();
    let result = host.invoke(&session, &MaybeLength, &[text.into()]).unwrap();
    assert_eq!(result.value().map(WireValue::as_i32), Some(4));
}

#[test]
fn test_result_errors_are_reported_to_the_host() {
    let (host, session) = session();
    let args: [NullableWireValue; 2] = [WireValue::from_i64(1).into(), WireValue::from_i64(0).into()];
    let record = host.invoke(&session, &Ratio, &args).unwrap_err();
    assert_eq!(record.message, "division by zero");
    assert_eq!(record.sqlstate, SqlState::INTERNAL_ERROR);
    assert_eq!(host.pending_errors(), 0);

    let args: [NullableWireValue; 2] = [WireValue::from_i64(3).into(), WireValue::from_i64(4).into()];
    let result = host.invoke(&session, &Ratio, &args).unwrap();
    assert_eq!(result.value().map(WireValue::as_f64), Some(0.75));
}

#[test]
fn test_null_for_non_nullable_parameter() {
    let (host, session) = session();
    let args: [NullableWireValue; 2] = [NullableWireValue::NULL, WireValue::from_i64(1).into()];
    let record = host.invoke(&session, &Ratio, &args).unwrap_err();
    assert_eq!(record.sqlstate, SqlState::DATATYPE_MISMATCH);
    assert!(record.message.starts_with("unexpected null value"), "{}", record.message);
}

#[test]
fn test_wrong_argument_count() {
    let (host, session) = session();
    let record = host
        .invoke(&session, &AddOne, &[NullableWireValue::new(WireValue::from_i64(1)); 2])
        .unwrap_err();
    assert_eq!(record.sqlstate, SqlState::DATATYPE_MISMATCH);
    assert_eq!(
        record.message,
        "arity or kind mismatch: AddOne expects 1 argument(s), got 2"
    );
}

#[test]
fn test_text_result_lives_in_the_call_context() {
    let (host, session) = session();
    let name = "ada".into_wire(&session).unwrap();
    let result = host.invoke(&session, &Greet, &[name.into()]).unwrap();
    let value = result.value().unwrap();
    let context = session.context_for_pointer(value.as_ptr::<u8>()).unwrap();
    assert_eq!(session.context_name(context), "ExprContext");
    assert_eq!(
        decode::<String>(value, oids::TEXT, &ArenaHint::new(&session)).unwrap(),
        "hello, ada"
    );
    // Activation is undone after the call.
    assert_eq!(session.current_context(), session.top_context());
}

#[test]
fn test_void_function() {
    let (host, session) = session();
    let result = host.invoke(&session, &Nothing, &[]).unwrap();
    assert!(!result.is_null());
}

#[test]
fn test_panic_is_reported_to_the_host() {
    let (host, session) = session();
    let record = host
        .invoke(&session, &Explode, &[WireValue::from_i32(3).into()])
        .unwrap_err();
    assert_eq!(record.sqlstate, SqlState::INTERNAL_ERROR);
    assert!(record.message.starts_with("unhandled panic: index out of bounds"), "{}", record.message);
}

#[test]
fn test_set_returning_function() {
    let (host, session) = session();
    let rows = host
        .invoke_set_returning(
            &session,
            &Numbered,
            &[WireValue::from_i64(3).into()],
            RowShape::from_type_oids(&[oids::INT8, oids::TEXT]),
        )
        .unwrap();
    assert_eq!(rows.len(), 3);
    let hint = ArenaHint::new(&session);
    let labels: Vec<String> = rows
        .iter()
        .map(|row| decode::<String>(row[1].value().unwrap(), oids::TEXT, &hint).unwrap())
        .collect();
    assert_eq!(labels, vec!["item 1", "item 2", "item 3"]);
    assert_eq!(rows[2][0].value().map(WireValue::as_i64), Some(3));
}

#[test]
fn test_set_returning_shape_mismatch() {
    let (host, session) = session();
    let record = host
        .invoke_set_returning(
            &session,
            &Numbered,
            &[WireValue::from_i64(3).into()],
            RowShape::from_type_oids(&[oids::INT8]),
        )
        .unwrap_err();
    assert_eq!(record.sqlstate, SqlState::DATATYPE_MISMATCH);
    assert!(record.message.starts_with("row shape mismatch"), "{}", record.message);
}

#[test]
fn test_set_returning_errors() {
    let (host, session) = session();
    let expected = RowShape::from_type_oids(&[oids::INT4]);
    let rows = host
        .invoke_set_returning(&session, &Checked, &[WireValue::from_i32(2).into()], expected.clone())
        .unwrap();
    assert_eq!(rows.len(), 2);

    let record = host
        .invoke_set_returning(&session, &Checked, &[WireValue::from_i32(-1).into()], expected)
        .unwrap_err();
    assert_eq!(record.message, "count must not be negative");

    // Called without a set-returning context.
    let record = host
        .invoke(&session, &Checked, &[WireValue::from_i32(1).into()])
        .unwrap_err();
    assert_eq!(record.sqlstate, SqlState::FEATURE_NOT_SUPPORTED);
}

#[test]
fn test_invoke_is_a_pg_function() {
    let entry = pgbridge_core::NativeEntry::new("add_one", &[oids::INT8], oids::INT8, AddOne::invoke);
    let (host, session) = session();
    let result = host
        .invoke(&session, &entry, &[WireValue::from_i64(1).into()])
        .unwrap();
    assert_eq!(result.value().map(WireValue::as_i64), Some(2));
}

#[test]
fn test_session_parameter_is_not_an_argument() {
    assert_eq!(CurrentContextName.arg_types(), vec![oids::TEXT]);
    let (host, session) = session();
    let prefix = "in ".into_wire(&session).unwrap();
    let result = host
        .invoke(&session, &CurrentContextName, &[prefix.into()])
        .unwrap();
    let text = decode::<String>(result.value().unwrap(), oids::TEXT, &ArenaHint::new(&session)).unwrap();
    assert_eq!(text, "in ExprContext");
}
