//! Model definitions: the input to the schema metadata graph and the
//! migration planner.

use indexmap::IndexMap;
use inflector::Inflector;

use crate::attribute::AttributeDescriptor;
use crate::relation::RelationDef;

/// Kind of a composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Index,
    Unique,
}

/// A declared composite index on a model.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    /// Explicit name; derived as `{table}_{col1}_{col2}_{kind}` when absent.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub kind: IndexKind,
}

impl IndexDescriptor {
    pub fn new(columns: Vec<String>, kind: IndexKind) -> Self {
        Self {
            name: None,
            columns,
            kind,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Soft-delete trait configuration: guarantees a nullable datetime column.
#[derive(Debug, Clone)]
pub struct SoftDeleteTrait {
    pub column: String,
    /// Whether `get()` filters the column by default.
    pub default_filter: bool,
}

impl Default for SoftDeleteTrait {
    fn default() -> Self {
        Self {
            column: "deleted_at".to_string(),
            default_filter: true,
        }
    }
}

/// Reusable schema augmentations a model can opt into: timestamps,
/// soft-deletes, UUID primary keys, search indexing.
#[derive(Debug, Clone, Default)]
pub struct Traits {
    /// Guarantees non-nullable `created_at` (server default) and nullable
    /// `updated_at`.
    pub timestamps: bool,
    pub soft_deletes: Option<SoftDeleteTrait>,
    /// Primary key is a UUID rather than an auto-incrementing integer.
    pub uuid: bool,
    /// Model participates in full-text search indexing (ambient; no
    /// dedicated DDL emitted by the planner beyond what indexes declare).
    pub search: bool,
}

/// A model definition: an entity schema with attributes, relationships,
/// traits, and indexes.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub name: String,
    pub table_name: String,
    pub primary_key: String,
    pub attributes: IndexMap<String, AttributeDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub relations: Vec<RelationDef>,
    pub traits: Traits,
}

impl ModelDefinition {
    /// Builds a model with a derived table name (pluralised, lowercased)
    /// and default primary key `id`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table_name = derive_table_name(&name);
        Self {
            name,
            table_name,
            primary_key: "id".to_string(),
            attributes: IndexMap::new(),
            indexes: Vec::new(),
            relations: Vec::new(),
            traits: Traits::default(),
        }
    }

    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, descriptor: AttributeDescriptor) -> Self {
        self.attributes.insert(name.into(), descriptor);
        self
    }

    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn timestamps(mut self) -> Self {
        self.traits.timestamps = true;
        self
    }

    pub fn soft_deletes(mut self) -> Self {
        self.traits.soft_deletes = Some(SoftDeleteTrait::default());
        self
    }

    pub fn soft_deletes_with(mut self, column: impl Into<String>) -> Self {
        self.traits.soft_deletes = Some(SoftDeleteTrait {
            column: column.into(),
            default_filter: true,
        });
        self
    }

    pub fn uuid(mut self) -> Self {
        self.traits.uuid = true;
        self
    }

    pub fn relation_named(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Derives a table name by pluralising the lowercased model name when one
/// isn't declared explicitly.
pub fn derive_table_name(model_name: &str) -> String {
    model_name.to_lowercase().to_plural()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_plural_table_name() {
        assert_eq!(derive_table_name("User"), "users");
        assert_eq!(derive_table_name("Category"), "categories");
    }

    #[test]
    fn default_primary_key_is_id() {
        let model = ModelDefinition::new("User");
        assert_eq!(model.primary_key, "id");
        assert_eq!(model.table_name, "users");
    }

    #[test]
    fn custom_primary_key_overrides_default() {
        let model = ModelDefinition::new("Country").primary_key("code");
        assert_eq!(model.primary_key, "code");
    }
}
