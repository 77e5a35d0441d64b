use std::rc::Rc;

use pretty_assertions::assert_eq;

use super::*;
use crate::convert::{Row, Value};
use crate::host::sim::{Command, SimHost, Statement};
use crate::host::{Attribute, ErrorRecord, RowShape, SqlState};
use crate::options::SessionOptions;
use crate::test_utils::{init_test_logging, sim_session};
use crate::wire::{WireValue, oids};

const USERS: &str = "SELECT id, name FROM users WHERE id >= $1 ORDER BY id";
const INSERT: &str = "INSERT INTO users (name) VALUES ($1)";

/// A host that knows a tiny `users` table.
fn users_session() -> (Rc<SimHost>, Session) {
    users_session_with(SessionOptions::default())
}

fn users_session_with(options: SessionOptions) -> (Rc<SimHost>, Session) {
    init_test_logging();
    let host = Rc::new(SimHost::default());
    let session = Session::new(host.clone(), options);
    let shape = RowShape::new(vec![
        Attribute::new("id", oids::INT4),
        Attribute::new("name", oids::TEXT),
    ]);
    host.define_statement(
        USERS,
        Statement::select(&[oids::INT4], shape, |call| {
            let from = call.args[0].value.as_i32();
            ["ada", "grace", "edsger"]
                .iter()
                .zip(1..)
                .filter(|(_, id)| *id >= from)
                .map(|(name, id)| Ok(vec![WireValue::from_i32(id).into(), call.text(name)?]))
                .collect()
        }),
    );
    host.define_statement(
        INSERT,
        Statement::command(Command::Insert, &[oids::TEXT], |_| Ok(vec![vec![]])),
    );
    (host, session)
}

#[test]
fn test_prepare_and_execute() {
    let (host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let plan = executor.prepare(USERS, &[oids::INT4]).unwrap();
    assert_eq!(plan.arg_types(), &[oids::INT4]);

    let table = executor
        .execute::<(i32, String)>(&plan, (2_i32,), ExecuteOptions::read_only())
        .unwrap();
    assert_eq!(table.status(), spi_codes::OK_SELECT);
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.shape().attribute(1).map(|a| a.name.as_str()), Some("name"));
    assert_eq!(
        table.into_rows().unwrap(),
        vec![(2, "grace".to_string()), (3, "edsger".to_string())]
    );
    assert_eq!(host.execution_count(), 1);
}

#[test]
fn test_argument_arity_is_checked_before_execution() {
    let (host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let plan = executor.prepare(USERS, &[oids::INT4]).unwrap();

    let err = executor
        .execute::<(i32, String)>(&plan, (1_i32, 2_i32), ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ArityOrKindMismatch { .. }), "{err}");
    let err = executor
        .execute::<(i32, String)>(&plan, (), ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ArityOrKindMismatch { .. }), "{err}");
    let err = executor
        .execute::<(i32, String)>(&plan, ("1",), ExecuteOptions::default())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("arity or kind mismatch: argument 1 of \"{USERS}\" is declared 23 but has type 25")
    );
    assert_eq!(host.execution_count(), 0);
}

#[test]
fn test_null_argument_has_declared_type() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let table = executor
        .query::<()>(INSERT, (None::<String>,), ExecuteOptions::default())
        .unwrap();
    assert_eq!(table.status(), spi_codes::OK_INSERT);
}

#[test]
fn test_result_shape_is_checked() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let err = executor
        .query::<(i32,)>(USERS, (1_i32,), ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ArityOrKindMismatch { .. }), "{err}");
    let err = executor
        .query::<(i32, i64)>(USERS, (1_i32,), ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ArityOrKindMismatch { .. }), "{err}");
}

#[test]
fn test_rows_are_decoded_once() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let table = executor
        .query::<(i32, String)>(USERS, (1_i32,), ExecuteOptions::default())
        .unwrap();
    let first = table.at(0).unwrap();
    let again = table.at(0).unwrap();
    assert!(core::ptr::eq(first, again));
    assert_eq!(first.1, "ada");

    let err = table.at(3).unwrap_err();
    assert!(matches!(err, Error::RowOutOfRange { index: 3, len: 3 }), "{err}");
    let ids: Vec<i32> = table.iter().map(|row| row.unwrap().0).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_row_limit() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let table = executor
        .query::<(i32, String)>(USERS, (1_i32,), ExecuteOptions::default().with_row_limit(1))
        .unwrap();
    assert_eq!(table.processed(), 1);
    assert_eq!(table.row_count(), 1);
}

#[test]
fn test_results_die_with_the_connection() {
    let (_host, session) = users_session();
    let table = {
        let executor = Executor::connect(&session).unwrap();
        executor
            .query::<(i32, String)>(USERS, (1_i32,), ExecuteOptions::default())
            .unwrap()
    };
    let err = table.at(0).unwrap_err();
    assert!(matches!(err, Error::PointerGone { .. }), "{err}");
}

#[test]
fn test_unkept_plan_dies_with_the_connection() {
    let (host, session) = users_session();
    let plan = {
        let executor = Executor::connect(&session).unwrap();
        executor.prepare(USERS, &[oids::INT4]).unwrap()
    };
    assert!(!plan.is_valid());
    let executor = Executor::connect(&session).unwrap();
    let err = executor
        .execute::<(i32, String)>(&plan, (1_i32,), ExecuteOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::PointerGone { .. }), "{err}");
    assert_eq!(host.execution_count(), 0);
}

#[test]
fn test_kept_plan_outlives_the_connection() {
    let (host, session) = users_session();
    let plan = {
        let executor = Executor::connect(&session).unwrap();
        let plan = executor.prepare(USERS, &[oids::INT4]).unwrap();
        plan.keep().unwrap();
        plan.keep().unwrap();
        plan
    };
    assert!(plan.is_kept());
    assert!(plan.is_valid());
    for _ in 0..2 {
        let executor = Executor::connect(&session).unwrap();
        let table = executor
            .execute::<(i32, String)>(&plan, (3_i32,), ExecuteOptions::default())
            .unwrap();
        assert_eq!(table.at(0).unwrap().1, "edsger");
    }
    assert_eq!(host.execution_count(), 2);
    plan.free().unwrap();
}

#[test]
fn test_host_errors_carry_the_query() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let err = executor.prepare("SELEC id FROM users", &[]).unwrap_err();
    let record = err.host_record().unwrap();
    assert_eq!(record.sqlstate, SqlState::SYNTAX_ERROR);
    assert_eq!(record.cursor_position, Some(1));
    assert_eq!(record.query.as_deref(), Some("SELEC id FROM users"));

    // The connection is still usable.
    let table = executor
        .query::<(i32, String)>(USERS, (3_i32,), ExecuteOptions::default())
        .unwrap();
    assert_eq!(table.row_count(), 1);
}

#[test]
fn test_read_only_rejects_writes() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let err = executor
        .query::<()>(INSERT, ("linus",), ExecuteOptions::read_only())
        .unwrap_err();
    assert_eq!(err.host_record().map(|r| r.sqlstate), Some(SqlState::FEATURE_NOT_SUPPORTED));
}

#[test]
fn test_session_defaults_apply_without_explicit_options() {
    let (host, session) = users_session_with(SessionOptions {
        default_execute_options: ExecuteOptions::read_only().with_row_limit(2),
        ..SessionOptions::default()
    });
    let executor = Executor::connect(&session).unwrap();
    assert_eq!(executor.default_options(), ExecuteOptions::read_only().with_row_limit(2));

    let table = executor.query_default::<(i32, String)>(USERS, (1_i32,)).unwrap();
    assert_eq!(table.row_count(), 2);

    let err = executor.query_default::<()>(INSERT, ("linus",)).unwrap_err();
    assert_eq!(err.host_record().map(|r| r.sqlstate), Some(SqlState::FEATURE_NOT_SUPPORTED));

    let plan = executor.prepare(INSERT, &[oids::TEXT]).unwrap();
    assert!(executor.execute_default::<()>(&plan, ("linus",)).is_err());
    // Explicit options still override the defaults.
    executor
        .execute::<()>(&plan, ("linus",), ExecuteOptions::default())
        .unwrap();
    assert_eq!(host.execution_count(), 4);
}

#[test]
fn test_statement_errors_surface() {
    let (host, session) = sim_session();
    host.define_statement(
        "SELECT 1/0",
        Statement::select(&[], RowShape::from_type_oids(&[oids::INT4]), |_| {
            Err(ErrorRecord::error("division by zero").with_sqlstate(SqlState::new(*b"22012")))
        }),
    );
    let executor = Executor::connect(&session).unwrap();
    let err = executor
        .query::<(i32,)>("SELECT 1/0", (), ExecuteOptions::default())
        .unwrap_err();
    assert_eq!(err.host_record().map(|r| r.sqlstate.as_str()), Some("22012"));
}

#[test]
fn test_dynamic_rows() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let rows = executor
        .query::<Row>(USERS, vec![Value::Int4(2)], ExecuteOptions::default())
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].by_name("name"), Some(&Value::from("grace")));
    assert_eq!(rows[1].get(0), Some(&Value::Int4(3)));
}

#[test]
fn test_connection_is_finished_on_drop() {
    let (host, session) = sim_session();
    {
        let _outer = Executor::connect(&session).unwrap();
        let _inner = Executor::connect(&session).unwrap();
        assert_eq!(host.spi_depth(), 2);
    }
    assert_eq!(host.spi_depth(), 0);
}

#[test]
fn test_unconnected_host_reports_code() {
    let (host, session) = sim_session();
    let executor = Executor::connect(&session).unwrap();
    // Close the connection behind the executor's back.
    assert_eq!(session.guard(|h| h.spi_finish()).unwrap(), spi_codes::OK_FINISH);
    let err = executor
        .query::<()>("SELECT 1", (), ExecuteOptions::default())
        .unwrap_err();
    assert!(
        matches!(err, Error::Execution { code, name: "SPI_ERROR_UNCONNECTED" } if code == spi_codes::ERROR_UNCONNECTED),
        "{err}"
    );
    drop(executor);
    assert_eq!(host.spi_depth(), 0);
}

#[test]
fn test_text_values_read_from_results() {
    let (_host, session) = users_session();
    let executor = Executor::connect(&session).unwrap();
    let table = executor
        .query::<(i32, crate::convert::Text)>(USERS, (1_i32,), ExecuteOptions::default())
        .unwrap();
    assert_eq!(table.at(1).unwrap().1.read_string().unwrap(), "grace");
}
