//! Schema-related data models.
//!
//! [`ColumnDefinition`] is the portable input for table and column DDL;
//! [`ColumnInfo`] is what catalog introspection returns.

use crate::error::{AdapterError, AdapterResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Portable column constraint token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
    Unique,
    AutoIncrement,
}

impl ColumnConstraint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "PRIMARY KEY",
            Self::NotNull => "NOT NULL",
            Self::Unique => "UNIQUE",
            Self::AutoIncrement => "AUTO_INCREMENT",
        }
    }
}

impl FromStr for ColumnConstraint {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .to_ascii_uppercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match normalized.as_str() {
            "PRIMARY KEY" | "PK" => Ok(Self::PrimaryKey),
            "NOT NULL" => Ok(Self::NotNull),
            "UNIQUE" => Ok(Self::Unique),
            "AUTO INCREMENT" | "AUTOINCREMENT" | "IDENTITY" => Ok(Self::AutoIncrement),
            _ => Err(AdapterError::invalid_input(format!(
                "Unknown column constraint '{}'",
                s
            ))),
        }
    }
}

/// Adapter input describing one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: String,
    #[serde(default)]
    pub constraints: BTreeSet<ColumnConstraint>,
}

impl ColumnDefinition {
    /// Create a new column definition with no constraints.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            constraints: BTreeSet::new(),
        }
    }

    /// Add a constraint.
    pub fn with(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.insert(constraint);
        self
    }

    pub fn primary_key(self) -> Self {
        self.with(ColumnConstraint::PrimaryKey)
    }

    pub fn not_null(self) -> Self {
        self.with(ColumnConstraint::NotNull)
    }

    pub fn unique(self) -> Self {
        self.with(ColumnConstraint::Unique)
    }

    pub fn auto_increment(self) -> Self {
        self.with(ColumnConstraint::AutoIncrement)
    }

    /// Parse constraint tokens such as `["PRIMARY KEY", "NOT NULL"]`.
    pub fn with_tokens<I, S>(mut self, tokens: I) -> AdapterResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            self.constraints.insert(token.as_ref().parse()?);
        }
        Ok(self)
    }

    pub fn has(&self, constraint: ColumnConstraint) -> bool {
        self.constraints.contains(&constraint)
    }

    pub fn is_primary_key(&self) -> bool {
        self.has(ColumnConstraint::PrimaryKey)
    }

    pub fn is_unique(&self) -> bool {
        self.has(ColumnConstraint::Unique)
    }

    pub fn is_auto_increment(&self) -> bool {
        self.has(ColumnConstraint::AutoIncrement)
    }

    /// Primary keys are implicitly NOT NULL on every engine.
    pub fn is_not_null(&self) -> bool {
        self.has(ColumnConstraint::NotNull) || self.is_primary_key()
    }
}

/// Column metadata read back from a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_precision: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<u64>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_expr: None,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    pub fn with_default(mut self, default_expr: Option<String>) -> Self {
        self.default_expr = default_expr;
        self
    }

    pub fn with_max_length(mut self, max_length: Option<u64>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_numeric(mut self, precision: Option<u64>, scale: Option<u64>) -> Self {
        self.numeric_precision = precision;
        self.numeric_scale = scale;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_tokens() {
        let col = ColumnDefinition::new("id", "INTEGER")
            .with_tokens(["PRIMARY KEY", "auto_increment", "not null"])
            .unwrap();
        assert!(col.is_primary_key());
        assert!(col.is_auto_increment());
        assert!(col.has(ColumnConstraint::NotNull));
        assert!(!col.is_unique());
    }

    #[test]
    fn test_unknown_constraint_rejected() {
        let err = ColumnDefinition::new("a", "TEXT").with_tokens(["CHECK"]);
        assert!(matches!(err, Err(AdapterError::InvalidInput { .. })));
    }

    #[test]
    fn test_primary_key_implies_not_null() {
        assert!(ColumnDefinition::new("id", "INT").primary_key().is_not_null());
        assert!(!ColumnDefinition::new("x", "INT").is_not_null());
    }
}
