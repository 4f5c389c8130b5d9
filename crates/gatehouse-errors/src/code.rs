//! The closed set of domain error codes and their classification.

use std::fmt;

/// Coarse classification of a [`Code`].
///
/// The kind decides how an error is treated at the transport boundary:
/// parameter problems are caller mistakes, integrity problems are
/// constraint violations reported by the store, search problems describe
/// lookups that found too little or too much.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Unclassified.
    Other,
    /// Bad or missing input.
    Parameter,
    /// A store constraint was violated.
    Integrity,
    /// Not found, or more found than expected.
    Search,
}

impl Kind {
    /// Human-readable text used in error strings.
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Other => "unknown",
            Kind::Parameter => "parameter violation",
            Kind::Integrity => "integrity violation",
            Kind::Search => "search issue",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for a [`Code`]: its kind and default message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    pub kind: Kind,
    pub message: &'static str,
}

/// Unique, stable identifier of a domain error.
///
/// Parameter codes live in 100-999, store codes in 1000-1999. The numeric
/// value appears in every rendered error string, so values must never be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Code {
    Unknown = 0,

    InvalidParameter = 100,
    InvalidAddress = 101,
    InvalidFieldMask = 102,
    EmptyFieldMask = 103,
    MissingScopeId = 104,
    MissingPublicId = 105,
    MissingSetId = 106,
    MissingVersion = 107,
    MissingCatalogId = 108,
    MissingHostIds = 109,
    GenerateId = 110,
    Canceled = 111,

    CheckConstraint = 1000,
    NotNull = 1001,
    NotUnique = 1002,
    NotSpecificIntegrity = 1003,
    MissingTable = 1004,

    RecordNotFound = 1100,
    MultipleRecords = 1101,
    MaxRetries = 1103,
    VersionMismatch = 1105,
}

impl Code {
    /// Every code, in numeric order.
    pub const ALL: [Code; 22] = [
        Code::Unknown,
        Code::InvalidParameter,
        Code::InvalidAddress,
        Code::InvalidFieldMask,
        Code::EmptyFieldMask,
        Code::MissingScopeId,
        Code::MissingPublicId,
        Code::MissingSetId,
        Code::MissingVersion,
        Code::MissingCatalogId,
        Code::MissingHostIds,
        Code::GenerateId,
        Code::Canceled,
        Code::CheckConstraint,
        Code::NotNull,
        Code::NotUnique,
        Code::NotSpecificIntegrity,
        Code::MissingTable,
        Code::RecordNotFound,
        Code::MultipleRecords,
        Code::MaxRetries,
        Code::VersionMismatch,
    ];

    /// Numeric value of the code.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Looks up the kind and default message for this code.
    pub const fn info(self) -> Info {
        let (kind, message) = match self {
            Code::Unknown => (Kind::Other, "unknown"),
            Code::InvalidParameter => (Kind::Parameter, "invalid parameter"),
            Code::InvalidAddress => (Kind::Parameter, "invalid address"),
            Code::InvalidFieldMask => (Kind::Parameter, "invalid field mask"),
            Code::EmptyFieldMask => (Kind::Parameter, "empty field"),
            Code::MissingScopeId => (Kind::Parameter, "missing scope id"),
            Code::MissingPublicId => (Kind::Parameter, "missing public id"),
            Code::MissingSetId => (Kind::Parameter, "missing set id"),
            Code::MissingVersion => (Kind::Parameter, "missing version"),
            Code::MissingCatalogId => (Kind::Parameter, "missing catalog id"),
            Code::MissingHostIds => (Kind::Parameter, "missing host ids"),
            Code::GenerateId => (Kind::Parameter, "failed to generate ID"),
            Code::Canceled => (Kind::Other, "operation canceled"),
            Code::CheckConstraint => (Kind::Integrity, "constraint check failed"),
            Code::NotNull => (Kind::Integrity, "must not be empty (null) violation"),
            Code::NotUnique => (Kind::Integrity, "must be unique violation"),
            Code::NotSpecificIntegrity => {
                (Kind::Integrity, "Integrity violation without specific details")
            },
            Code::MissingTable => (Kind::Integrity, "missing table"),
            Code::RecordNotFound => (Kind::Search, "record not found"),
            Code::MultipleRecords => (Kind::Search, "multiple records"),
            Code::MaxRetries => (Kind::Other, "too many retries"),
            Code::VersionMismatch => (Kind::Integrity, "version mismatch"),
        };
        Info { kind, message }
    }

    /// Shorthand for `self.info().kind`.
    pub const fn kind(self) -> Kind {
        self.info().kind
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_numeric_values_are_stable() {
        assert_eq!(Code::Unknown.as_u32(), 0);
        assert_eq!(Code::InvalidParameter.as_u32(), 100);
        assert_eq!(Code::CheckConstraint.as_u32(), 1000);
        assert_eq!(Code::NotUnique.as_u32(), 1002);
        assert_eq!(Code::MissingTable.as_u32(), 1004);
        assert_eq!(Code::RecordNotFound.as_u32(), 1100);
    }

    #[test]
    fn test_codes_are_unique_and_sorted() {
        let values: Vec<u32> = Code::ALL.iter().map(|c| c.as_u32()).collect();
        let unique: HashSet<u32> = values.iter().copied().collect();
        assert_eq!(unique.len(), values.len());
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_kinds_follow_code_ranges() {
        for code in Code::ALL {
            let kind = code.kind();
            match code.as_u32() {
                100..=110 => assert_eq!(kind, Kind::Parameter, "{code:?}"),
                1000..=1004 => assert_eq!(kind, Kind::Integrity, "{code:?}"),
                1100 | 1101 => assert_eq!(kind, Kind::Search, "{code:?}"),
                _ => {},
            }
        }
    }

    #[test]
    fn test_kind_text() {
        assert_eq!(Kind::Other.to_string(), "unknown");
        assert_eq!(Kind::Parameter.to_string(), "parameter violation");
        assert_eq!(Kind::Integrity.to_string(), "integrity violation");
        assert_eq!(Kind::Search.to_string(), "search issue");
    }
}
