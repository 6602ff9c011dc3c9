//! Stable plan hashing.
//!
//! Grounded on `beads-core::content_hash`'s approach: SHA-256 over a
//! canonical field-by-field serialization with null-byte field separators
//! and a deterministic field order, hex-encoded.

use sha2::{Digest, Sha256};

use crate::plan::{ColumnDefault, ColumnPlan, IndexPlan, MigrationPlan, TablePlan};

const SEP: u8 = 0;

/// Computes a stable hex-encoded SHA-256 digest over `plan`'s canonical
/// serialization. Tables are hashed in declared order (callers that need
/// diff-equivalence across reordered declarations should sort tables
/// before calling this).
pub fn hash_plan(plan: &MigrationPlan) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plan.dialect.id().as_bytes());
    hasher.update([SEP]);
    for table in &plan.tables {
        hash_table(&mut hasher, table);
    }
    format!("{:x}", hasher.finalize())
}

fn hash_table(hasher: &mut Sha256, table: &TablePlan) {
    hasher.update(table.name.as_bytes());
    hasher.update([SEP]);
    for column in &table.columns {
        hash_column(hasher, column);
    }
    hasher.update([SEP]);
    for index in &table.indexes {
        hash_index(hasher, index);
    }
    hasher.update([SEP]);
}

fn hash_column(hasher: &mut Sha256, column: &ColumnPlan) {
    hasher.update(column.name.as_bytes());
    hasher.update([SEP]);
    hasher.update(column.column_type.name().as_bytes());
    hasher.update([SEP]);
    if let Some(values) = column.column_type.enum_values() {
        let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        hasher.update(sorted.join(",").as_bytes());
        hasher.update([SEP]);
    }
    hasher.update([column.nullable as u8]);
    hasher.update([column.unique as u8]);
    hasher.update([column.primary_key as u8]);
    match &column.default {
        ColumnDefault::Absent => hasher.update(b"absent"),
        ColumnDefault::Literal(value) => hasher.update(value.to_string().as_bytes()),
        ColumnDefault::Expression(expr) => hasher.update(expr.as_bytes()),
    }
    hasher.update([SEP]);
    if let Some(reference) = &column.references {
        hasher.update(reference.table.as_bytes());
        hasher.update([SEP]);
        hasher.update(reference.column.as_bytes());
    }
    hasher.update([SEP]);
}

fn hash_index(hasher: &mut Sha256, index: &IndexPlan) {
    hasher.update(index.name.as_bytes());
    hasher.update([SEP]);
    hasher.update(index.columns.join(",").as_bytes());
    hasher.update([SEP]);
    hasher.update([matches!(index.kind, crate::plan::IndexKind::Unique) as u8]);
    hasher.update([SEP]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlforge_core::Dialect;
    use sqlforge_schema::ModelDefinition;

    #[test]
    fn identical_plans_hash_equal() {
        let models = vec![ModelDefinition::new("User")];
        let plan_a = crate::builder::build_plan(&models, Dialect::Postgres).unwrap();
        let plan_b = crate::builder::build_plan(&models, Dialect::Postgres).unwrap();
        assert_eq!(hash_plan(&plan_a), hash_plan(&plan_b));
    }

    #[test]
    fn enum_value_reordering_does_not_change_hash() {
        use crate::plan::{ColumnDefault, ColumnPlan, TablePlan};
        use sqlforge_core::ColumnType;

        let mut table_a = TablePlan::new("orders");
        table_a.columns.push(ColumnPlan {
            name: "status".into(),
            column_type: ColumnType::Enum(vec!["pending".into(), "completed".into()]),
            nullable: false,
            default: ColumnDefault::Absent,
            unique: false,
            primary_key: false,
            references: None,
        });
        let mut table_b = table_a.clone();
        table_b.columns[0].column_type =
            ColumnType::Enum(vec!["completed".into(), "pending".into()]);

        let plan_a = MigrationPlan {
            dialect: Dialect::Postgres,
            tables: vec![table_a],
        };
        let plan_b = MigrationPlan {
            dialect: Dialect::Postgres,
            tables: vec![table_b],
        };
        assert_eq!(hash_plan(&plan_a), hash_plan(&plan_b));
    }

    #[test]
    fn different_plans_hash_differently() {
        let models_a = vec![ModelDefinition::new("User")];
        let models_b = vec![ModelDefinition::new("User").timestamps()];
        let plan_a = crate::builder::build_plan(&models_a, Dialect::Postgres).unwrap();
        let plan_b = crate::builder::build_plan(&models_b, Dialect::Postgres).unwrap();
        assert_ne!(hash_plan(&plan_a), hash_plan(&plan_b));
    }
}
