//! `sea_orm::DbErr` -> [`FailureKind`] translation.
//!
//! Classification reads the SQLSTATE carried by the driver's database error.
//! Message text is never inspected, it changes between server versions and
//! locales.

use sea_orm::{DbErr, RuntimeErr};

use crate::error::{DbInfraError, FailureKind};

fn sqlx_error(err: &DbErr) -> Option<&sqlx::Error> {
    match err {
        DbErr::Conn(RuntimeErr::SqlxError(e))
        | DbErr::Exec(RuntimeErr::SqlxError(e))
        | DbErr::Query(RuntimeErr::SqlxError(e)) => Some(e),
        _ => None,
    }
}

/// SQLSTATE of the underlying server error, if there is one.
pub fn sqlstate(err: &DbErr) -> Option<String> {
    match sqlx_error(err)? {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

pub fn classify_sqlstate(code: &str) -> FailureKind {
    match code {
        // duplicate_database, duplicate_schema, duplicate_table,
        // duplicate_column, duplicate_object
        "42P04" | "42P06" | "42P07" | "42701" | "42710" => FailureKind::DuplicateObject,
        // undefined_object, undefined_table, undefined_column
        "42704" | "42P01" | "42703" => FailureKind::UndefinedObject,
        "3D000" => FailureKind::MissingDatabase,
        "42501" => FailureKind::Permission,
        c if c.starts_with("28") => FailureKind::Permission,
        c if c.starts_with("08") || c.starts_with("57P") => FailureKind::Connectivity,
        c if c.starts_with("23") => FailureKind::IntegrityViolation,
        _ => FailureKind::Other,
    }
}

pub fn classify(err: &DbErr) -> FailureKind {
    if matches!(err, DbErr::ConnectionAcquire(_)) {
        return FailureKind::Connectivity;
    }
    match sqlx_error(err) {
        Some(sqlx::Error::Database(db)) => db
            .code()
            .map(|c| classify_sqlstate(&c))
            .unwrap_or(FailureKind::Other),
        Some(
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed,
        ) => FailureKind::Connectivity,
        _ => FailureKind::Other,
    }
}

pub fn statement_error(step: impl Into<String>, err: DbErr) -> DbInfraError {
    DbInfraError::Statement {
        step: step.into(),
        kind: classify(&err),
        message: err.to_string(),
    }
}

pub fn connect_error(target: impl Into<String>, err: DbErr) -> DbInfraError {
    DbInfraError::Connect {
        target: target.into(),
        kind: classify(&err),
        message: err.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{conn_err, exec_err};
    use super::*;

    #[test]
    fn duplicate_objects_are_recognised_by_code() {
        for code in ["42P04", "42P07", "42701", "42710"] {
            assert_eq!(classify(&exec_err(code)), FailureKind::DuplicateObject, "{code}");
        }
    }

    #[test]
    fn missing_database_on_connect() {
        let err = conn_err("3D000");
        assert_eq!(sqlstate(&err).as_deref(), Some("3D000"));
        assert_eq!(classify(&err), FailureKind::MissingDatabase);
    }

    #[test]
    fn auth_and_privilege_failures_are_permission() {
        assert_eq!(classify(&conn_err("28P01")), FailureKind::Permission);
        assert_eq!(classify(&exec_err("42501")), FailureKind::Permission);
    }

    #[test]
    fn undefined_and_integrity_codes() {
        assert_eq!(classify(&exec_err("42704")), FailureKind::UndefinedObject);
        assert_eq!(classify(&exec_err("42P01")), FailureKind::UndefinedObject);
        assert_eq!(classify(&exec_err("23503")), FailureKind::IntegrityViolation);
        assert_eq!(classify(&exec_err("08006")), FailureKind::Connectivity);
    }

    #[test]
    fn errors_without_sqlstate_are_other() {
        assert_eq!(classify(&DbErr::Custom("boom".into())), FailureKind::Other);
        assert_eq!(sqlstate(&DbErr::Custom("boom".into())), None);
        assert_eq!(
            classify(&DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::PoolTimedOut))),
            FailureKind::Connectivity
        );
    }

    #[test]
    fn statement_error_keeps_step_and_driver_message() {
        let err = statement_error("add_column users.forum_avatar", exec_err("42701"));
        assert_eq!(err.kind(), Some(FailureKind::DuplicateObject));
        let text = err.to_string();
        assert!(text.contains("add_column users.forum_avatar"));
        assert!(text.contains("42701"));
    }
}
