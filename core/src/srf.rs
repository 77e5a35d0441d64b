//! Set-returning functions in materialize mode.

use tracing::{debug, trace};

use crate::convert::IntoRow;
use crate::error::{Error, Result};
use crate::function::CallInfo;
use crate::host::RowShape;
use crate::session::Session;

/// Drains `rows` into a host tuple store and hands it to the caller.
///
/// The first row must fit the shape the caller expects, or this fails with
/// [`Error::RowShapeMismatch`] before pulling another row. Null columns fit
/// any type. Later rows are only checked for width. The sequence is consumed once.
pub fn materialize<I>(session: &Session, call: &mut CallInfo, rows: I) -> Result<u64>
where
    I: IntoIterator,
    I::Item: IntoRow,
{
    let Some(info) = call.result_set_info() else {
        return Err(Error::Protocol(
            "set-valued function called in a context that cannot accept a set".to_string(),
        ));
    };
    let expected = info.expected().clone();
    let query_context = info.query_context();

    let mut rows = rows.into_iter();
    let mut count = 0u64;
    let store = {
        let _scope = session.activate(query_context);
        let store = session.guard(|host| host.tuplestore_begin(query_context.id(), &expected))?;
        if let Some(first) = rows.next() {
            let first = first.into_row(session)?;
            let actual = RowShape::from_type_oids(&first.types);
            if !actual.fits(&expected) {
                return Err(Error::RowShapeMismatch { expected, actual });
            }
            session.guard(|host| host.tuplestore_put(store, &first.values))?;
            count += 1;
            for row in rows {
                let row = row.into_row(session)?;
                if row.len() != expected.len() {
                    return Err(Error::RowShapeMismatch {
                        expected,
                        actual: RowShape::from_type_oids(&row.types),
                    });
                }
                session.guard(|host| host.tuplestore_put(store, &row.values))?;
                count += 1;
                trace!(count, "row materialized");
            }
        }
        store
    };

    if let Some(info) = call.result_set_info_mut() {
        info.set_result(store, expected);
    }
    call.is_null = true;
    debug!(rows = count, "set materialized");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::function::{CallContext, ReturnSetInfo};
    use crate::host::Host;
    use crate::test_utils::sim_session;
    use crate::wire::oids;

    fn srf_call(session: &Session, expected: RowShape) -> CallInfo {
        let query_context = session.create_context("query");
        CallInfo::new(session.current_context(), &[], &[], oids::RECORD).with_context(
            CallContext::SetReturning(ReturnSetInfo::new(expected, query_context)),
        )
    }

    #[test]
    fn test_materialize_rows() {
        let (host, session) = sim_session();
        let mut call = srf_call(&session, RowShape::from_type_oids(&[oids::INT8, oids::TEXT]));
        let rows = (1..=3_i64).map(|i| (i, format!("row {i}")));
        assert_eq!(materialize(&session, &mut call, rows).unwrap(), 3);
        let (store, _) = call.result_set_info().unwrap().result().unwrap().clone();
        let stored = host.tuplestore_rows(store);
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2][0].value.as_i64(), 3);
        assert!(call.is_null);
    }

    #[test]
    fn test_first_row_shape_mismatch_stops_early() {
        let (_host, session) = sim_session();
        let mut call = srf_call(&session, RowShape::from_type_oids(&[oids::INT8]));
        let mut pulled = 0;
        let rows = core::iter::from_fn(|| {
            pulled += 1;
            (pulled <= 5).then_some((true,))
        });
        let err = materialize(&session, &mut call, rows).unwrap_err();
        assert!(matches!(err, Error::RowShapeMismatch { .. }), "{err}");
        assert_eq!(pulled, 1);
        assert!(call.result_set_info().unwrap().result().is_none());
    }

    #[test]
    fn test_later_rows_only_checked_for_width() {
        let (_host, session) = sim_session();
        let mut call = srf_call(&session, RowShape::from_type_oids(&[oids::INT8, oids::INT8]));
        let rows: Vec<Vec<crate::convert::Value>> = vec![
            vec![1_i64.into(), 2_i64.into()],
            vec![3_i64.into()],
        ];
        let err = materialize(&session, &mut call, rows).unwrap_err();
        assert!(matches!(err, Error::RowShapeMismatch { .. }), "{err}");
    }

    #[test]
    fn test_null_first_column_fits_any_type() {
        let (host, session) = sim_session();
        let mut call = srf_call(&session, RowShape::from_type_oids(&[oids::INT8]));
        let rows: Vec<Vec<crate::convert::Value>> = vec![
            vec![crate::convert::Value::Null],
            vec![5_i64.into()],
        ];
        assert_eq!(materialize(&session, &mut call, rows).unwrap(), 2);
        let (store, _) = call.result_set_info().unwrap().result().unwrap().clone();
        let stored = host.tuplestore_rows(store);
        assert!(stored[0][0].is_null);
        assert_eq!(stored[1][0].value.as_i64(), 5);
    }

    #[test]
    fn test_empty_set() {
        let (host, session) = sim_session();
        let mut call = srf_call(&session, RowShape::from_type_oids(&[oids::INT8]));
        assert_eq!(materialize(&session, &mut call, Vec::<(i64,)>::new()).unwrap(), 0);
        let (store, _) = call.result_set_info().unwrap().result().unwrap().clone();
        assert!(host.tuplestore_rows(store).is_empty());
    }

    #[test]
    fn test_requires_set_returning_context() {
        let (_host, session) = sim_session();
        let mut call = CallInfo::new(session.current_context(), &[], &[], oids::INT8);
        let err = materialize(&session, &mut call, vec![(1_i64,)]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{err}");
    }
}
