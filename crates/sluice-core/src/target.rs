//! The per-statement target database contract.
//!
//! The applier emits parameterized SQL through [`TargetQuerier`], an
//! object-safe facade over whatever driver backs the target cluster.
//! Parameters travel as text: the generated SQL carries an explicit
//! cast per placeholder (`$n::INT8`), so the target parses values
//! without the driver needing native type mapping. [`TargetError`]
//! preserves enough backend detail for the sequencer to tell a
//! retriable foreign-key violation from a fatal statement error.

use std::fmt;

use async_trait::async_trait;

/// One bind parameter in text form; `None` is SQL `NULL`.
pub type SqlParam = Option<String>;

/// Executes parameterized statements against the target database.
#[async_trait]
pub trait TargetQuerier: Send + Sync {
    /// Executes `sql` once with `params`, returning the affected row
    /// count.
    ///
    /// # Errors
    ///
    /// Returns a [`TargetError`] describing the backend failure.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, TargetError>;

    /// Executes `sql` once per row, stopping at the first failure.
    ///
    /// Implementations with pipelining or bulk-bind support may
    /// override this; the default issues sequential round trips.
    ///
    /// # Errors
    ///
    /// Returns the first [`TargetError`] encountered.
    async fn execute_rows(&self, sql: &str, rows: &[Vec<SqlParam>]) -> Result<u64, TargetError> {
        let mut affected = 0;
        for row in rows {
            affected += self.execute(sql, row).await?;
        }
        Ok(affected)
    }
}

/// Backend-specific detail of a target failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetErrorKind {
    /// A PostgreSQL-family error with its five-character SQLSTATE.
    Postgres {
        /// The SQLSTATE code, e.g. `23503`.
        sqlstate: String,
    },
    /// A MySQL server error number.
    MySql {
        /// The server error number, e.g. `1452`.
        errno: u16,
    },
    /// An Oracle error code.
    Oracle {
        /// The ORA error code, e.g. `2291`.
        code: u32,
    },
    /// The connection or pool failed before the statement ran.
    Connection,
    /// The statement exceeded its deadline.
    Timeout,
    /// Anything else.
    Other,
}

/// An error from the target database.
///
/// Carries the offending statement (when known) so sweep logs can show
/// what was being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetError {
    /// The classified backend detail.
    pub kind: TargetErrorKind,
    /// The backend's message text.
    pub message: String,
    /// The statement being executed, when known.
    pub statement: Option<String>,
}

impl TargetError {
    /// A PostgreSQL error with the given SQLSTATE.
    pub fn postgres(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Postgres {
                sqlstate: sqlstate.into(),
            },
            message: message.into(),
            statement: None,
        }
    }

    /// A MySQL error with the given server error number.
    pub fn mysql(errno: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::MySql { errno },
            message: message.into(),
            statement: None,
        }
    }

    /// An Oracle error with the given ORA code.
    pub fn oracle(code: u32, message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Oracle { code },
            message: message.into(),
            statement: None,
        }
    }

    /// A connection-level failure.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Connection,
            message: message.into(),
            statement: None,
        }
    }

    /// An unclassified failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Other,
            message: message.into(),
            statement: None,
        }
    }

    /// Attaches the statement that produced the error.
    #[must_use]
    pub fn with_statement(mut self, sql: impl Into<String>) -> Self {
        self.statement = Some(sql.into());
        self
    }

    /// Returns the SQLSTATE for PostgreSQL-family errors.
    #[must_use]
    pub fn sqlstate(&self) -> Option<&str> {
        match &self.kind {
            TargetErrorKind::Postgres { sqlstate } => Some(sqlstate),
            _ => None,
        }
    }
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TargetErrorKind::Postgres { sqlstate } => {
                write!(f, "target error (SQLSTATE {sqlstate}): {}", self.message)?;
            }
            TargetErrorKind::MySql { errno } => {
                write!(f, "target error (MySQL {errno}): {}", self.message)?;
            }
            TargetErrorKind::Oracle { code } => {
                write!(f, "target error (ORA-{code:05}): {}", self.message)?;
            }
            TargetErrorKind::Connection => write!(f, "target connection error: {}", self.message)?,
            TargetErrorKind::Timeout => write!(f, "target timeout: {}", self.message)?,
            TargetErrorKind::Other => write!(f, "target error: {}", self.message)?,
        }
        if let Some(sql) = &self.statement {
            write!(f, " [{sql}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for TargetError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_accessor() {
        let err = TargetError::postgres("23503", "fk violation");
        assert_eq!(err.sqlstate(), Some("23503"));
        assert_eq!(TargetError::mysql(1452, "fk").sqlstate(), None);
    }

    #[test]
    fn test_display_includes_statement() {
        let err = TargetError::postgres("42P01", "missing table")
            .with_statement("DELETE FROM \"t\"");
        let text = err.to_string();
        assert!(text.contains("42P01"));
        assert!(text.contains("DELETE FROM"));
    }

    #[test]
    fn test_display_oracle_pads_code() {
        let err = TargetError::oracle(1, "unique constraint");
        assert!(err.to_string().contains("ORA-00001"));
    }
}
