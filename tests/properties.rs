//! The bridge's core guarantees, checked through the public API.

mod cases;

use std::panic::{self, AssertUnwindSafe};

use cases::session;
use pgbridge::convert::{decode, decode_nullable, encode, encode_nullable};
use pgbridge::host::{ErrorContextPtr, Host};
use pgbridge::srf::materialize;
use pgbridge::{
    ArenaHint, Error, ErrorRecord, ExecuteOptions, Executor, NullableWireValue, Oid, RowShape,
    Severity, SqlState, guard, oids, pg_function,
};
use pretty_assertions::assert_eq;

macro_rules! round_trip_case {
    ($name:ident, $ty:ty, $oid:expr, [$($value:expr),+ $(,)?]) => {
        #[test]
        fn $name() {
            let (_host, session) = session();
            let hint = ArenaHint::new(&session);
            for value in [$($value),+] {
                let wire = encode::<$ty>(value.clone(), &session).unwrap();
                assert_eq!(decode::<$ty>(wire, $oid, &hint).unwrap(), value);
            }
        }
    };
}

round_trip_case!(round_trip_bool, bool, oids::BOOL, [true, false]);
round_trip_case!(round_trip_i16, i16, oids::INT2, [0_i16, -1, i16::MIN, i16::MAX]);
round_trip_case!(round_trip_i32, i32, oids::INT4, [0_i32, 42, i32::MIN, i32::MAX]);
round_trip_case!(round_trip_i64, i64, oids::INT8, [0_i64, -7, i64::MIN, i64::MAX]);
round_trip_case!(round_trip_f32, f32, oids::FLOAT4, [0.0_f32, -1.5, f32::MAX, f32::MIN_POSITIVE]);
round_trip_case!(round_trip_f64, f64, oids::FLOAT8, [0.0_f64, 2.5e-300, f64::MAX, -0.125]);
round_trip_case!(round_trip_oid, Oid, oids::OID, [oids::TEXT, Oid(16385)]);
round_trip_case!(round_trip_text, String, oids::TEXT, [String::new(), "héllo".to_string()]);
round_trip_case!(round_trip_bytea, Vec<u8>, oids::BYTEA, [vec![], vec![0_u8, 255, 7]]);

#[test]
fn null_propagation() {
    let (_host, session) = session();
    let hint = ArenaHint::new(&session);

    let wire = encode_nullable(None::<i64>, &session).unwrap();
    assert!(wire.is_null());
    let wire = encode_nullable(None::<String>, &session).unwrap();
    assert!(wire.is_null());

    let absent = decode_nullable::<Option<String>>(NullableWireValue::NULL, oids::TEXT, &hint).unwrap();
    assert_eq!(absent, None);
    let err = decode_nullable::<String>(NullableWireValue::NULL, oids::TEXT, &hint).unwrap_err();
    assert!(matches!(err, Error::NullValue { .. }), "{err}");
    let err = decode_nullable::<i32>(NullableWireValue::NULL, oids::INT4, &hint).unwrap_err();
    assert!(matches!(err, Error::NullValue { .. }), "{err}");
}

#[test]
fn arena_generation_is_monotonic() {
    let (_host, session) = session();
    let context = session.create_context("monotonic");
    let child = session.create_context_in(context, "child");
    let mut last = session.generation(context);
    for _ in 0..5 {
        session.reset(context);
        let now = session.generation(context);
        assert_eq!(now, last + 1);
        last = now;
    }
    // Resetting the parent deletes the child: one step for the child.
    assert!(session.generation(child) >= 1);
    session.delete(context);
    assert_eq!(session.generation(context), last + 1);
}

#[test]
fn staleness_detection() {
    let (_host, session) = session();
    let context = session.create_context("A");
    let handle = session.track(context);
    let value = {
        let _scope = session.activate(context);
        session.alloc_value(17_u64).unwrap()
    };
    // Never stale before the reset.
    for _ in 0..3 {
        assert_eq!(value.get().unwrap(), 17);
        assert!(handle.check().is_ok());
    }
    session.reset(context);
    assert_eq!(handle.resets(), 1);
    let err = value.get().unwrap_err();
    assert!(matches!(err, Error::PointerGone { context: id, .. } if id == context.id()), "{err}");
    assert!(matches!(handle.check(), Err(Error::PointerGone { .. })));

    // A handle taken after the reset starts fresh.
    assert!(session.track(context).check().is_ok());
}

#[test]
fn scenario_buffer_after_reset_is_pointer_gone() {
    let (_host, session) = session();
    let arena = session.create_context("A");
    let buffer = {
        let _scope = session.activate(arena);
        session.allocate(16, 4).unwrap()
    };
    assert_eq!(buffer.to_vec().unwrap().len(), 64);
    session.reset(arena);
    assert!(matches!(buffer.to_vec(), Err(Error::PointerGone { .. })));
}

#[test]
fn strict_nesting() {
    let (_host, session) = session();
    let contexts: Vec<_> = (0..8)
        .map(|i| session.create_context(&format!("level {i}")))
        .collect();
    fn descend(session: &pgbridge::Session, contexts: &[pgbridge::MemoryContext]) {
        let Some((first, rest)) = contexts.split_first() else {
            return;
        };
        let before = session.current_context();
        {
            let _scope = session.activate(*first);
            assert_eq!(session.current_context(), *first);
            descend(session, rest);
            assert_eq!(session.current_context(), *first);
        }
        assert_eq!(session.current_context(), before);
    }
    descend(&session, &contexts);
    assert_eq!(session.current_context(), session.top_context());
}

/// One wrapped callable per guard outcome.
#[derive(Clone, Copy, Debug)]
enum Outcome {
    Value,
    HostError,
    ApplicationError,
    Panic,
}

#[pg_function(name = "Symmetric")]
fn symmetric(session: &pgbridge::Session, mode: i32) -> pgbridge::Result<i32> {
    let outcome = [
        Outcome::Value,
        Outcome::HostError,
        Outcome::ApplicationError,
        Outcome::Panic,
    ][mode as usize];
    let inner = guard::inbound(session, |host| match outcome {
        Outcome::Value => 7,
        Outcome::HostError => {
            host.report(ErrorRecord::error("host said no"));
            0
        }
        Outcome::ApplicationError | Outcome::Panic => 0,
    })?;
    match outcome {
        Outcome::ApplicationError => Err(Error::application("application said no")),
        Outcome::Panic => panic!("application panicked"),
        _ => Ok(inner),
    }
}

#[test]
fn guard_symmetry() {
    let (host, session) = session();
    for (mode, expected) in [
        (0, Ok(7)),
        (1, Err("host said no")),
        (2, Err("application said no")),
        (3, Err("unhandled panic: application panicked")),
    ] {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            host.invoke(&session, &Symmetric, &[pgbridge::WireValue::from_i32(mode).into()])
        }));
        let result = outcome.expect("no raw panic escapes the guards");
        match (result, expected) {
            (Ok(value), Ok(expected)) => assert_eq!(value.value().map(|v| v.as_i32()), Some(expected)),
            (Err(record), Err(message)) => {
                assert_eq!(record.message, message);
                assert!(record.severity.is_error());
            }
            (result, expected) => panic!("mode {mode}: got {result:?}, expected {expected:?}"),
        }
        assert_eq!(host.pending_errors(), 0);
        assert_eq!(host.exception_stack(), None);
    }
}

#[test]
fn row_shape_fail_fast() {
    let (host, session) = session();
    let pulled = std::cell::Cell::new(0);
    let rows = (0..100).map(|i| {
        pulled.set(pulled.get() + 1);
        (i as i64, "label")
    });
    let mut call = pgbridge::CallInfo::new(session.current_context(), &[], &[], oids::RECORD)
        .with_context(pgbridge::function::CallContext::SetReturning(
            pgbridge::function::ReturnSetInfo::new(
                RowShape::from_type_oids(&[oids::INT8, oids::INT8]),
                pgbridge::MemoryContext::from_id(host.executor_context()),
            ),
        ));
    let err = materialize(&session, &mut call, rows).unwrap_err();
    assert!(matches!(err, Error::RowShapeMismatch { .. }), "{err}");
    assert_eq!(pulled.get(), 1);
}

#[test]
fn scenario_missing_argument_fails_before_execution() {
    let (host, session) = session();
    host.define_statement(
        "SELECT id FROM accounts WHERE balance BETWEEN $1 AND $2",
        pgbridge::host::sim::Statement::select(
            &[oids::INT8, oids::INT8],
            RowShape::from_type_oids(&[oids::INT4]),
            |_| Ok(Vec::new()),
        ),
    );
    let executor = Executor::connect(&session).unwrap();
    let plan = executor
        .prepare(
            "SELECT id FROM accounts WHERE balance BETWEEN $1 AND $2",
            &[oids::INT8, oids::INT8],
        )
        .unwrap();
    let err = executor
        .execute::<(i32,)>(&plan, (100_i64,), ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ArityOrKindMismatch { .. }), "{err}");
    assert_eq!(host.execution_count(), 0);

    // The same plan runs once the arity is right.
    let table = executor
        .execute::<(i32,)>(&plan, (100_i64, 200_i64), ExecuteOptions::default())
        .unwrap();
    assert!(table.is_empty());
    assert_eq!(host.execution_count(), 1);
}

#[test]
fn scenario_host_error_message_survives_flush() {
    let (host, session) = session();
    host.set_error_context_stack(ErrorContextPtr(0x5eed));
    let err = session
        .guard(|host| {
            host.report(
                ErrorRecord::error("relation \"ledger\" does not exist")
                    .with_sqlstate(SqlState::new(*b"42P01")),
            )
        })
        .unwrap_err();
    // The host's own error state has been flushed.
    assert_eq!(host.pending_errors(), 0);
    let record = err.host_record().unwrap();
    assert_eq!(record.message, "relation \"ledger\" does not exist");
    assert_eq!(record.sqlstate.as_str(), "42P01");
    assert_eq!(record.severity, Severity::Error);
    assert_eq!(err.to_string(), record.message);
    assert_eq!(host.error_context_stack(), ErrorContextPtr(0x5eed));
}
