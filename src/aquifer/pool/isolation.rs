use strum::Display;

/// Transaction isolation. Default leaves the server's setting in effect.
#[derive(Display, Debug, Copy, Clone, Eq, PartialEq)]
pub enum IsolationLevel {
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn sql(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::Default => None,
            IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
            IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
            IsolationLevel::Serializable => Some("SERIALIZABLE"),
        }
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Default
    }
}

/// How a transaction is opened.
#[derive(Debug, Copy, Clone, Default)]
pub struct TxConfig {
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub deferrable: bool,
    /// Permit the read-only autocommit optimisation: plain read-only
    /// transactions skip BEGIN entirely and run statements in autocommit.
    pub allow_readonly_autocommit: bool,
}

impl TxConfig {
    pub fn read_only() -> TxConfig {
        TxConfig {
            read_only: true,
            allow_readonly_autocommit: true,
            ..Default::default()
        }
    }

    pub fn serializable() -> TxConfig {
        TxConfig {
            isolation: IsolationLevel::Serializable,
            ..Default::default()
        }
    }

    /// Renders the BEGIN statement for this configuration.
    pub fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(level) = self.isolation.sql() {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(level);
        }
        if self.read_only {
            sql.push_str(" READ ONLY");
        }
        if self.deferrable {
            sql.push_str(" DEFERRABLE");
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_sql() {
        assert_eq!(TxConfig::default().begin_sql(), "BEGIN");
        assert_eq!(
            TxConfig::serializable().begin_sql(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE"
        );
        let cfg = TxConfig {
            isolation: IsolationLevel::RepeatableRead,
            read_only: true,
            deferrable: true,
            allow_readonly_autocommit: false,
        };
        assert_eq!(
            cfg.begin_sql(),
            "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY DEFERRABLE"
        );
    }
}
