//! Canonical column types shared by the schema metadata graph, the
//! migration planner, and dialect drivers.

use serde::{Deserialize, Serialize};

/// A canonical (dialect-independent) column type.
///
/// Dialect drivers translate each variant to its own SQL spelling via
/// [`crate::dialect::DatabaseDriver::column_type_sql`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    String,
    Text,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Json,
    /// An enumerated column; the value list is preserved verbatim from the
    /// validation rule that declared it.
    Enum(Vec<String>),
}

impl ColumnType {
    /// Short canonical name, used in diagnostics and plan hashing.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Json => "json",
            ColumnType::Enum(_) => "enum",
        }
    }

    /// Enum value list, order-insensitive for equality/diffing purposes.
    pub fn enum_values(&self) -> Option<&[String]> {
        match self {
            ColumnType::Enum(values) => Some(values),
            _ => None,
        }
    }

    /// Structural equality that treats enum value lists as sets: enum
    /// value order doesn't affect equality.
    pub fn structurally_eq(&self, other: &ColumnType) -> bool {
        match (self, other) {
            (ColumnType::Enum(a), ColumnType::Enum(b)) => {
                let mut a_sorted = a.clone();
                let mut b_sorted = b.clone();
                a_sorted.sort();
                b_sorted.sort();
                a_sorted == b_sorted
            }
            _ => self == other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_equality_is_order_insensitive() {
        let a = ColumnType::Enum(vec!["pending".into(), "completed".into()]);
        let b = ColumnType::Enum(vec!["completed".into(), "pending".into()]);
        assert!(a.structurally_eq(&b));
    }

    #[test]
    fn enum_equality_detects_additions() {
        let a = ColumnType::Enum(vec!["pending".into(), "completed".into()]);
        let b = ColumnType::Enum(vec![
            "pending".into(),
            "processing".into(),
            "completed".into(),
            "cancelled".into(),
        ]);
        assert!(!a.structurally_eq(&b));
    }

    #[test]
    fn non_enum_types_compare_directly() {
        assert!(ColumnType::Integer.structurally_eq(&ColumnType::Integer));
        assert!(!ColumnType::Integer.structurally_eq(&ColumnType::BigInt));
    }
}
