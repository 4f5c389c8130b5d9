//! # Gatehouse errors
//!
//! The domain error taxonomy shared by every gatehouse crate.
//!
//! Each [`Error`] carries a [`Code`] from a closed set. The code selects a
//! [`Kind`] and a default message, and the rendered string has the stable
//! shape `[id: ][msg: | default, ]<kind>: error #<code>` followed by the
//! wrapped cause, if any.
//!
//! Store failures are classified with [`convert`], which inspects the cause
//! chain for a [`DbError`] and maps its SQLSTATE to a domain code. It may
//! decline, in which case the caller reports the failure as
//! [`Code::Unknown`].

#![deny(unsafe_code)]

pub mod code;
pub mod driver;
pub mod error;

pub use code::{Code, Info, Kind};
pub use driver::{DbError, SqlState, convert, is_retryable};
pub use error::{BoxError, Error, Result, Template, chain, domain, is, matches, sentinel};
