//! The domain error type and chain inspection helpers.

use std::error::Error as StdError;

use crate::code::{Code, Info, Kind};

/// Boxed cause carried by an [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// A classified domain error.
///
/// `error_id` is an opaque tag naming the call site that produced the
/// error. It exists for diagnostics only and never drives control flow.
/// `wrapped` preserves the causal chain and is exposed through
/// [`StdError::source`].
#[derive(Debug, thiserror::Error)]
#[error(
    "{}{}: error #{}{}",
    id_prefix(.error_id),
    headline(.code, .msg),
    .code.as_u32(),
    cause(.wrapped)
)]
pub struct Error {
    code: Code,
    error_id: String,
    msg: String,
    #[source]
    wrapped: Option<BoxError>,
}

fn id_prefix(id: &str) -> String {
    if id.is_empty() { String::new() } else { format!("{id}: ") }
}

fn headline(code: &Code, msg: &str) -> String {
    let info = code.info();
    if msg.is_empty() {
        format!("{}, {}", info.message, info.kind)
    } else {
        format!("{msg}: {}", info.kind)
    }
}

fn cause(wrapped: &Option<BoxError>) -> String {
    wrapped.as_ref().map(|e| format!(": \n{e}")).unwrap_or_default()
}

impl Error {
    /// Creates an error with `code` raised at call site `id`.
    pub fn new(code: Code, id: impl Into<String>) -> Self {
        Self { code, error_id: id.into(), msg: String::new(), wrapped: None }
    }

    /// Wraps `err` as raised at call site `id`.
    ///
    /// A domain error keeps its code and becomes the cause. Anything else
    /// becomes the cause of a new [`Code::Unknown`] error.
    pub fn wrap(err: impl Into<BoxError>, id: impl Into<String>) -> Self {
        let boxed: BoxError = err.into();
        let code = match boxed.downcast_ref::<Error>() {
            Some(domain) => domain.code,
            None => Code::Unknown,
        };
        Self { code, error_id: id.into(), msg: String::new(), wrapped: Some(boxed) }
    }

    /// Sets the message, replacing the code's default text in the
    /// rendered string.
    #[must_use]
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    /// Sets the cause. Has no effect when the error already wraps one,
    /// so the cause given to [`Error::wrap`] always wins.
    #[must_use]
    pub fn with_wrap(mut self, err: impl Into<BoxError>) -> Self {
        if self.wrapped.is_none() {
            self.wrapped = Some(err.into());
        }
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn error_id(&self) -> &str {
        &self.error_id
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    pub fn wrapped(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.wrapped.as_deref()
    }

    /// Kind and default message of this error's code.
    pub fn info(&self) -> Info {
        self.code.info()
    }

    pub fn kind(&self) -> Kind {
        self.code.kind()
    }
}

/// Iterates `err` followed by each of its causes.
pub fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |e: &&'a (dyn StdError + 'static)| (*e).source())
}

/// Returns the outermost domain error in the chain of `err`.
pub fn domain<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a Error> {
    chain(err).find_map(|e| e.downcast_ref::<Error>())
}

/// Reports whether any domain error in the chain of `err` has the same
/// code and error id as `target`. Messages are not compared.
pub fn is(err: &(dyn StdError + 'static), target: &Error) -> bool {
    chain(err)
        .filter_map(|e| e.downcast_ref::<Error>())
        .any(|e| e.code == target.code && e.error_id == target.error_id)
}

/// A partial description of an error used with [`matches`].
///
/// Only the fields that are set take part in the comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub code: Option<Code>,
    pub kind: Option<Kind>,
    pub error_id: Option<String>,
}

impl Template {
    pub fn code(code: Code) -> Self {
        Self { code: Some(code), ..Self::default() }
    }

    pub fn kind(kind: Kind) -> Self {
        Self { kind: Some(kind), ..Self::default() }
    }

    #[must_use]
    pub fn with_error_id(mut self, id: impl Into<String>) -> Self {
        self.error_id = Some(id.into());
        self
    }
}

/// Compares `template` against the outermost domain error of `err`.
pub fn matches(template: &Template, err: &(dyn StdError + 'static)) -> bool {
    let Some(e) = domain(err) else {
        return false;
    };
    if template.code.is_some_and(|code| code != e.code) {
        return false;
    }
    if template.kind.is_some_and(|kind| kind != e.kind()) {
        return false;
    }
    if template.error_id.as_deref().is_some_and(|id| id != e.error_id) {
        return false;
    }
    true
}

/// Well-known errors used as causes and as targets for [`is`].
pub mod sentinel {
    use super::Error;
    use crate::code::Code;

    pub fn invalid_parameter() -> Error {
        Error::new(Code::InvalidParameter, "").with_msg("invalid parameter")
    }

    pub fn record_not_found() -> Error {
        Error::new(Code::RecordNotFound, "").with_msg("record not found")
    }

    pub fn not_unique() -> Error {
        Error::new(Code::NotUnique, "").with_msg("unique constraint violation")
    }

    pub fn not_null() -> Error {
        Error::new(Code::NotNull, "").with_msg("not null constraint violated")
    }

    pub fn check_constraint() -> Error {
        Error::new(Code::CheckConstraint, "").with_msg("check constraint violated")
    }
}
