//! Builds a canonical [`MigrationPlan`] from a model set.

use std::collections::HashMap;

use sqlforge_core::{ColumnType, Dialect};
use sqlforge_schema::{infer_column_type, IndexKind as ModelIndexKind, ModelDefinition};

use crate::error::PlanError;
use crate::plan::{ColumnDefault, ColumnPlan, ForeignKeyRef, IndexKind, IndexPlan, MigrationPlan, TablePlan};

/// Builds the canonical migration plan for `models` under `dialect`.
pub fn build_plan(models: &[ModelDefinition], dialect: Dialect) -> Result<MigrationPlan, PlanError> {
    let model_names: HashMap<String, &ModelDefinition> =
        models.iter().map(|m| (m.name.clone(), m)).collect();

    let mut plan = MigrationPlan::new(dialect);

    for model in models {
        plan.tables.push(build_table_plan(model, &model_names)?);
    }

    validate_foreign_keys(&plan)?;

    Ok(plan)
}

/// Checks the plan-wide invariant that every foreign-key reference names an
/// existing table and column within the same plan.
fn validate_foreign_keys(plan: &MigrationPlan) -> Result<(), PlanError> {
    for table in &plan.tables {
        for column in &table.columns {
            if let Some(reference) = &column.references {
                let target = plan.table(&reference.table).ok_or_else(|| PlanError::DanglingForeignKey {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    ref_table: reference.table.clone(),
                    ref_column: reference.column.clone(),
                })?;
                if target.column(&reference.column).is_none() {
                    return Err(PlanError::DanglingForeignKey {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        ref_table: reference.table.clone(),
                        ref_column: reference.column.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn build_table_plan(
    model: &ModelDefinition,
    model_names: &HashMap<String, &ModelDefinition>,
) -> Result<TablePlan, PlanError> {
    let mut table = TablePlan::new(model.table_name.clone());

    // Step 1: primary key column, auto-added when not declared among the
    // model's attributes.
    if !model.attributes.contains_key(&model.primary_key) {
        let mut pk_column = if model.traits.uuid {
            ColumnPlan::new(model.primary_key.clone(), ColumnType::String)
        } else {
            ColumnPlan::new(model.primary_key.clone(), ColumnType::BigInt)
        };
        pk_column.primary_key = true;
        table.columns.push(pk_column);
    }

    // Step 2: walk attributes in declaration order.
    for (name, descriptor) in &model.attributes {
        let column_type = infer_column_type(name, descriptor);
        let mut column = ColumnPlan::new(name.clone(), column_type);
        column.nullable = descriptor
            .validation
            .iter()
            .any(|r| matches!(r, sqlforge_schema::ValidationRule::Nullable))
            || descriptor.default.is_none() && !descriptor_is_required(descriptor);
        column.unique = descriptor.unique;
        column.primary_key = name == &model.primary_key;
        if let Some(default) = &descriptor.default {
            column.default = ColumnDefault::Literal(default.clone());
        }
        column.references = infer_foreign_key(name, model_names);
        table.columns.push(column);
    }

    // Step 3: traits.
    if model.traits.timestamps {
        if !table.columns.iter().any(|c| c.name == "created_at") {
            let mut created_at = ColumnPlan::new("created_at", ColumnType::DateTime);
            created_at.default = ColumnDefault::Expression("CURRENT_TIMESTAMP".to_string());
            table.columns.push(created_at);
        }
        if !table.columns.iter().any(|c| c.name == "updated_at") {
            let mut updated_at = ColumnPlan::new("updated_at", ColumnType::DateTime);
            updated_at.nullable = true;
            table.columns.push(updated_at);
        }
    }
    if let Some(soft_delete) = &model.traits.soft_deletes {
        if !table.columns.iter().any(|c| c.name == soft_delete.column) {
            let mut deleted_at = ColumnPlan::new(soft_delete.column.clone(), ColumnType::DateTime);
            deleted_at.nullable = true;
            table.columns.push(deleted_at);
        }
    }

    // Step 4: unique indexes for non-PK unique columns, then declared
    // composite indexes verbatim.
    for column in table.columns.iter().filter(|c| c.unique && !c.primary_key) {
        table.indexes.push(IndexPlan {
            name: format!("{}_{}_unique", table.name, column.name),
            columns: vec![column.name.clone()],
            kind: IndexKind::Unique,
        });
    }
    for declared in &model.indexes {
        let kind = match declared.kind {
            ModelIndexKind::Index => IndexKind::Index,
            ModelIndexKind::Unique => IndexKind::Unique,
        };
        let suffix = match kind {
            IndexKind::Index => "index",
            IndexKind::Unique => "unique",
        };
        let name = declared.name.clone().unwrap_or_else(|| {
            format!("{}_{}_{}", table.name, declared.columns.join("_"), suffix)
        });
        table.indexes.push(IndexPlan {
            name,
            columns: declared.columns.clone(),
            kind,
        });
    }

    validate_table(&table)?;

    Ok(table)
}

fn descriptor_is_required(descriptor: &sqlforge_schema::AttributeDescriptor) -> bool {
    descriptor
        .validation
        .iter()
        .any(|r| matches!(r, sqlforge_schema::ValidationRule::Required))
}

/// Infers a foreign-key reference when `name` ends with `_id` and the
/// capitalised prefix exactly matches a known model name. Only a literal
/// first-letter capitalisation is attempted, not a snake_case ->
/// PascalCase conversion, so compound names like `blog_category_id` are a
/// documented limitation rather than resolved.
fn infer_foreign_key(
    name: &str,
    model_names: &HashMap<String, &ModelDefinition>,
) -> Option<ForeignKeyRef> {
    let prefix = name.strip_suffix("_id")?;
    if prefix.is_empty() {
        return None;
    }
    let capitalised = capitalize_first(prefix);

    let exact = model_names.get(&capitalised);
    let target = match exact {
        Some(model) => *model,
        None => {
            // Ambiguous or no exact match: resolve by exact case match
            // only, otherwise silently skip.
            return None;
        }
    };

    Some(ForeignKeyRef {
        table: target.table_name.clone(),
        column: target.primary_key.clone(),
    })
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn validate_table(table: &TablePlan) -> Result<(), PlanError> {
    let mut seen_columns = std::collections::HashSet::new();
    for column in &table.columns {
        if !seen_columns.insert(&column.name) {
            return Err(PlanError::DuplicateColumnName {
                table: table.name.clone(),
                column: column.name.clone(),
            });
        }
    }
    if table.columns.iter().filter(|c| c.primary_key).count() > 1 {
        return Err(PlanError::MultiplePrimaryKeys {
            table: table.name.clone(),
        });
    }
    let mut seen_indexes = std::collections::HashSet::new();
    for index in &table.indexes {
        if !seen_indexes.insert(&index.name) {
            return Err(PlanError::DuplicateIndexName {
                table: table.name.clone(),
                name: index.name.clone(),
            });
        }
    }
    Ok(())
}
