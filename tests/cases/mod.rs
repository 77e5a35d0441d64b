//! Fixtures shared by the integration tests: a simulated host with a small
//! `accounts` table.
#![allow(dead_code)]

use std::rc::Rc;

use pgbridge::host::sim::{Command, SimHost, Statement};
use pgbridge::host::Attribute;
use pgbridge::{RowShape, Session, SessionOptions, WireValue, oids};

pub const ACCOUNTS_BY_BALANCE: &str =
    "SELECT id, owner, balance FROM accounts WHERE balance >= $1 ORDER BY id";
pub const ACCOUNT_OWNER: &str = "SELECT owner FROM accounts WHERE id = $1";
pub const DEPOSIT: &str = "UPDATE accounts SET balance = balance + $2 WHERE id = $1";

/// `(id, owner, balance)`
pub const ACCOUNTS: [(i32, &str, i64); 4] = [
    (1, "ada", 1200),
    (2, "grace", 300),
    (3, "edsger", 4500),
    (4, "barbara", 0),
];

pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

pub fn session() -> (Rc<SimHost>, Session) {
    init_test_logging();
    let host = Rc::new(SimHost::default());
    let session = Session::new(host.clone(), SessionOptions::default());
    (host, session)
}

pub fn accounts_shape() -> RowShape {
    RowShape::new(vec![
        Attribute::new("id", oids::INT4),
        Attribute::new("owner", oids::TEXT),
        Attribute::new("balance", oids::INT8),
    ])
}

/// A session whose host knows the `accounts` statements.
pub fn accounts_session() -> (Rc<SimHost>, Session) {
    let (host, session) = session();
    host.define_statement(
        ACCOUNTS_BY_BALANCE,
        Statement::select(&[oids::INT8], accounts_shape(), |call| {
            let min = call.args[0].value.as_i64();
            ACCOUNTS
                .iter()
                .filter(|(_, _, balance)| *balance >= min)
                .map(|(id, owner, balance)| {
                    Ok(vec![
                        WireValue::from_i32(*id).into(),
                        call.text(owner)?,
                        WireValue::from_i64(*balance).into(),
                    ])
                })
                .collect()
        }),
    );
    host.define_statement(
        ACCOUNT_OWNER,
        Statement::select(
            &[oids::INT4],
            RowShape::new(vec![Attribute::new("owner", oids::TEXT)]),
            |call| {
                let id = call.args[0].value.as_i32();
                ACCOUNTS
                    .iter()
                    .filter(|(account, _, _)| *account == id)
                    .map(|(_, owner, _)| Ok(vec![call.text(owner)?]))
                    .collect()
            },
        ),
    );
    host.define_statement(
        DEPOSIT,
        Statement::command(Command::Update, &[oids::INT4, oids::INT8], |call| {
            let id = call.args[0].value.as_i32();
            Ok(ACCOUNTS
                .iter()
                .filter(|(account, _, _)| *account == id)
                .map(|_| Vec::new())
                .collect())
        }),
    );
    (host, session)
}
