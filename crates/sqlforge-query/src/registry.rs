//! Small lookup tables derived from the model set that the select compiler
//! needs but the schema metadata graph does not carry: `modelToTable`,
//! `relations`, and primary keys, but not trait configuration. Built once
//! alongside [`sqlforge_schema::SchemaMetadataGraph`] and shared the same
//! way: read-only, shared immutably between builders.

use std::collections::HashMap;

use sqlforge_schema::ModelDefinition;

/// Maps table name -> soft-delete column name, for models that declared
/// the soft-deletes trait.
#[derive(Debug, Clone, Default)]
pub struct SoftDeleteRegistry {
    columns: HashMap<String, String>,
}

impl SoftDeleteRegistry {
    pub fn from_models(models: &[ModelDefinition]) -> Self {
        let mut columns = HashMap::new();
        for model in models {
            if let Some(soft_delete) = &model.traits.soft_deletes {
                columns.insert(model.table_name.clone(), soft_delete.column.clone());
            }
        }
        Self { columns }
    }

    pub fn column_for(&self, table: &str) -> Option<&str> {
        self.columns.get(table).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_soft_delete_column_per_table() {
        let models = vec![
            ModelDefinition::new("User").soft_deletes(),
            ModelDefinition::new("Tag"),
        ];
        let registry = SoftDeleteRegistry::from_models(&models);
        assert_eq!(registry.column_for("users"), Some("deleted_at"));
        assert_eq!(registry.column_for("tags"), None);
    }
}
