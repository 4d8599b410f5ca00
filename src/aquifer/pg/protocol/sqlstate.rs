use strum::Display;

// Error codes the library branches on. The full set lives in the
// PostgreSQL docs, appendix A.
pub const CONNECTION_EXCEPTION: &str = "08000"; // connection_exception
pub const CONNECTION_FAILURE: &str = "08006"; // connection_failure
pub const NOT_NULL_VIOLATION: &str = "23502"; // not_null_violation
pub const FOREIGN_KEY_VIOLATION: &str = "23503"; // foreign_key_violation
pub const UNIQUE_VIOLATION: &str = "23505"; // unique_violation
pub const CHECK_VIOLATION: &str = "23514"; // check_violation
pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02"; // in_failed_sql_transaction
pub const INVALID_PASSWORD: &str = "28P01"; // invalid_password
pub const SERIALIZATION_FAILURE: &str = "40001"; // serialization_failure
pub const DEADLOCK_DETECTED: &str = "40P01"; // deadlock_detected
pub const SYNTAX_ERROR: &str = "42601"; // syntax_error
pub const INSUFFICIENT_PRIVILEGE: &str = "42501"; // insufficient_privilege
pub const UNDEFINED_TABLE: &str = "42P01"; // undefined_table
pub const INTERNAL_ERROR: &str = "XX000"; // internal_error

/// Coarse SQLSTATE classification so callers can branch on
/// "unique violation" vs "deadlock" without string matching.
#[derive(Display, Debug, Copy, Clone, Eq, PartialEq)]
pub enum SqlStateClass {
    ConnectionError,
    SyntaxError,
    UndefinedObject,
    ConstraintViolation,
    UniqueViolation,
    CheckViolation,
    NotNullViolation,
    ForeignKeyViolation,
    Deadlock,
    SerializationFailure,
    PrivilegeError,
    DataException,
    TransactionState,
    InternalError,
    Other,
}

impl SqlStateClass {
    /// Classifies a 5-character SQLSTATE. Exact matches win over the
    /// 2-character class prefix.
    pub fn classify(sqlstate: &str) -> SqlStateClass {
        match sqlstate {
            UNIQUE_VIOLATION => return SqlStateClass::UniqueViolation,
            CHECK_VIOLATION => return SqlStateClass::CheckViolation,
            NOT_NULL_VIOLATION => return SqlStateClass::NotNullViolation,
            FOREIGN_KEY_VIOLATION => return SqlStateClass::ForeignKeyViolation,
            DEADLOCK_DETECTED => return SqlStateClass::Deadlock,
            SERIALIZATION_FAILURE => return SqlStateClass::SerializationFailure,
            UNDEFINED_TABLE => return SqlStateClass::UndefinedObject,
            INSUFFICIENT_PRIVILEGE => return SqlStateClass::PrivilegeError,
            _ => {}
        }
        match sqlstate.get(..2) {
            Some("08") => SqlStateClass::ConnectionError,
            Some("22") => SqlStateClass::DataException,
            Some("23") => SqlStateClass::ConstraintViolation,
            Some("25") | Some("40") => SqlStateClass::TransactionState,
            Some("28") => SqlStateClass::PrivilegeError,
            Some("42") => SqlStateClass::SyntaxError,
            Some("XX") => SqlStateClass::InternalError,
            _ => SqlStateClass::Other,
        }
    }
}

impl Default for SqlStateClass {
    fn default() -> Self {
        SqlStateClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_wins_over_class() {
        assert_eq!(SqlStateClass::classify("23505"), SqlStateClass::UniqueViolation);
        assert_eq!(SqlStateClass::classify("23514"), SqlStateClass::CheckViolation);
        assert_eq!(SqlStateClass::classify("23502"), SqlStateClass::NotNullViolation);
        assert_eq!(SqlStateClass::classify("23503"), SqlStateClass::ForeignKeyViolation);
        assert_eq!(SqlStateClass::classify("23001"), SqlStateClass::ConstraintViolation);
        assert_eq!(SqlStateClass::classify("40P01"), SqlStateClass::Deadlock);
        assert_eq!(SqlStateClass::classify("40001"), SqlStateClass::SerializationFailure);
        assert_eq!(SqlStateClass::classify("40003"), SqlStateClass::TransactionState);
        assert_eq!(SqlStateClass::classify("42P01"), SqlStateClass::UndefinedObject);
        assert_eq!(SqlStateClass::classify("42501"), SqlStateClass::PrivilegeError);
        assert_eq!(SqlStateClass::classify("42601"), SqlStateClass::SyntaxError);
    }

    #[test]
    fn test_class_prefixes() {
        assert_eq!(SqlStateClass::classify("08006"), SqlStateClass::ConnectionError);
        assert_eq!(SqlStateClass::classify("22012"), SqlStateClass::DataException);
        assert_eq!(SqlStateClass::classify("25P02"), SqlStateClass::TransactionState);
        assert_eq!(SqlStateClass::classify("28P01"), SqlStateClass::PrivilegeError);
        assert_eq!(SqlStateClass::classify("XX000"), SqlStateClass::InternalError);
        assert_eq!(SqlStateClass::classify("P0001"), SqlStateClass::Other);
        assert_eq!(SqlStateClass::classify(""), SqlStateClass::Other);
    }
}
