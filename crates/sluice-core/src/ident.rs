//! Case-preserving SQL identifiers.
//!
//! Source payload keys are matched against the raw identifier, while SQL
//! rendering always double-quotes, so mixed-case and reserved-word table
//! or column names survive the trip to the target intact.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single SQL identifier with its original case preserved.
///
/// Equality and hashing are case-sensitive; [`fmt::Display`] renders the
/// quoted form with embedded quotes doubled.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ident(String);

impl Ident {
    /// Wraps a raw identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier exactly as it appeared in the source.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl From<&str> for Ident {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Ident {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// A schema-qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId {
    /// The enclosing schema.
    pub schema: Ident,
    /// The table name within the schema.
    pub table: Ident,
}

impl TableId {
    /// Creates a table identifier from its parts.
    pub fn new(schema: impl Into<Ident>, table: impl Into<Ident>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes() {
        assert_eq!(Ident::new("users").to_string(), "\"users\"");
        assert_eq!(Ident::new("MixedCase").to_string(), "\"MixedCase\"");
    }

    #[test]
    fn test_display_doubles_embedded_quotes() {
        assert_eq!(Ident::new("we\"ird").to_string(), "\"we\"\"ird\"");
    }

    #[test]
    fn test_equality_is_case_sensitive() {
        assert_ne!(Ident::new("users"), Ident::new("Users"));
        assert_eq!(Ident::new("users"), Ident::new("users"));
    }

    #[test]
    fn test_table_id_display() {
        let t = TableId::new("public", "orders");
        assert_eq!(t.to_string(), "\"public\".\"orders\"");
    }
}
