//! Store driver errors and their classification into domain errors.

use std::{borrow::Cow, error::Error as StdError, fmt};

use crate::{
    code::Code,
    error::{Error, chain, sentinel},
};

/// A five character SQLSTATE code reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlState(Cow<'static, str>);

impl SqlState {
    pub const UNIQUE_VIOLATION: SqlState = SqlState::from_static("23505");
    pub const NOT_NULL_VIOLATION: SqlState = SqlState::from_static("23502");
    pub const CHECK_VIOLATION: SqlState = SqlState::from_static("23514");
    pub const FOREIGN_KEY_VIOLATION: SqlState = SqlState::from_static("23503");
    pub const UNDEFINED_TABLE: SqlState = SqlState::from_static("42P01");
    pub const SERIALIZATION_FAILURE: SqlState = SqlState::from_static("40001");
    pub const DEADLOCK_DETECTED: SqlState = SqlState::from_static("40P01");

    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    pub fn new(code: impl Into<String>) -> Self {
        Self(Cow::Owned(code.into()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// The two character class prefix, e.g. `23` for integrity violations.
    pub fn class(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An error reported by the store driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (SQLSTATE {code})")]
pub struct DbError {
    pub code: SqlState,
    pub message: String,
    pub detail: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
}

impl DbError {
    pub fn new(code: SqlState, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            table: None,
            column: None,
            constraint: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }
}

fn find_db_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a DbError> {
    chain(err).find_map(|e| e.downcast_ref::<DbError>())
}

/// Classifies a store failure raised at call site `id`.
///
/// Returns `None` when the chain holds no driver error or its state is not
/// one this crate knows how to classify. The caller then decides how to
/// report the original error.
pub fn convert(err: &(dyn StdError + 'static), id: &str) -> Option<Error> {
    let db = find_db_error(err)?;

    if db.code == SqlState::UNIQUE_VIOLATION {
        return Some(
            Error::new(Code::NotUnique, id)
                .with_msg(db.detail.clone().unwrap_or_default())
                .with_wrap(sentinel::not_unique()),
        );
    }
    if db.code == SqlState::NOT_NULL_VIOLATION {
        let column = db.column.as_deref().unwrap_or_default();
        return Some(
            Error::new(Code::NotNull, id)
                .with_msg(format!("{column} must not be empty"))
                .with_wrap(sentinel::not_null()),
        );
    }
    if db.code == SqlState::CHECK_VIOLATION {
        let constraint = db.constraint.as_deref().unwrap_or_default();
        return Some(
            Error::new(Code::CheckConstraint, id)
                .with_msg(format!("{constraint} constraint failed"))
                .with_wrap(sentinel::check_constraint()),
        );
    }
    if db.code.class() == "23" {
        return Some(Error::new(Code::NotSpecificIntegrity, id));
    }
    if db.code == SqlState::UNDEFINED_TABLE {
        return Some(Error::new(Code::MissingTable, id).with_msg(db.message.clone()));
    }
    None
}

/// Reports whether the chain of `err` holds a transient store failure that
/// is safe to retry.
pub fn is_retryable(err: &(dyn StdError + 'static)) -> bool {
    find_db_error(err).is_some_and(|db| {
        db.code == SqlState::SERIALIZATION_FAILURE || db.code == SqlState::DEADLOCK_DETECTED
    })
}
