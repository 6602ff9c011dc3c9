//! The schema metadata graph: a derived, immutable index over all models
//!.

use std::collections::HashMap;

use inflector::Inflector;
use tracing::debug;

use crate::error::SchemaError;
use crate::model::ModelDefinition;
use crate::relation::{RelationDef, RelationKind};

/// Strategy used to derive a foreign-key column name from a relation's
/// target via singularisation. `None` disables the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingularizeStrategy {
    #[default]
    Default,
    None,
}

/// A resolved intermediate (`*Through`) hop.
#[derive(Debug, Clone)]
pub struct ThroughSpec {
    pub through_model: String,
    pub through_table: String,
}

/// A resolved pivot table for a many-to-many relation.
#[derive(Debug, Clone)]
pub struct PivotSpec {
    pub table: String,
    pub local_foreign_key: String,
    pub related_foreign_key: String,
}

/// A relation fully resolved against the model set: kind, target, and any
/// through/pivot/morph detail needed to emit a join.
#[derive(Debug, Clone)]
pub struct ResolvedRelation {
    pub kind: RelationKind,
    pub target_model: String,
    pub target_table: String,
    pub foreign_key: String,
    pub local_key: String,
    pub through: Option<ThroughSpec>,
    pub pivot: Option<PivotSpec>,
    pub morph_name: Option<String>,
}

/// A relation name available on a table, surfaced for "did you mean"
/// suggestions when an unknown relation is requested.
pub type AvailableRelation = String;

/// Canonical, immutable index over the full model set.
#[derive(Debug, Clone)]
pub struct SchemaMetadataGraph {
    model_to_table: HashMap<String, String>,
    table_to_model: HashMap<String, String>,
    primary_keys: HashMap<String, String>,
    relations: HashMap<String, HashMap<String, ResolvedRelation>>,
    singularize_strategy: SingularizeStrategy,
}

impl SchemaMetadataGraph {
    /// Builds the metadata graph from the full model set. Fails when two
    /// models declare the same table.
    pub fn build(models: &[ModelDefinition]) -> Result<Self, SchemaError> {
        Self::build_with_strategy(models, SingularizeStrategy::default())
    }

    pub fn build_with_strategy(
        models: &[ModelDefinition],
        singularize_strategy: SingularizeStrategy,
    ) -> Result<Self, SchemaError> {
        let mut model_to_table = HashMap::new();
        let mut table_to_model = HashMap::new();
        let mut primary_keys = HashMap::new();

        for model in models {
            if let Some(existing) = table_to_model.get(&model.table_name) {
                return Err(SchemaError::DuplicateTable {
                    table: model.table_name.clone(),
                    first_model: existing.clone(),
                    second_model: model.name.clone(),
                });
            }
            model_to_table.insert(model.name.clone(), model.table_name.clone());
            table_to_model.insert(model.table_name.clone(), model.name.clone());
            primary_keys.insert(model.table_name.clone(), model.primary_key.clone());
        }

        let mut relations: HashMap<String, HashMap<String, ResolvedRelation>> = HashMap::new();
        for model in models {
            let mut by_name = HashMap::new();
            for relation in &model.relations {
                let resolved = resolve_relation_def(
                    model,
                    relation,
                    &model_to_table,
                    &primary_keys,
                    singularize_strategy,
                );
                by_name.insert(relation.name.clone(), resolved);
            }
            relations.insert(model.table_name.clone(), by_name);
        }

        debug!(
            tables = table_to_model.len(),
            relations = relations.values().map(|m| m.len()).sum::<usize>(),
            "built schema metadata graph"
        );

        Ok(Self {
            model_to_table,
            table_to_model,
            primary_keys,
            relations,
            singularize_strategy,
        })
    }

    pub fn table_for_model(&self, model: &str) -> Option<&str> {
        self.model_to_table.get(model).map(String::as_str)
    }

    pub fn model_for_table(&self, table: &str) -> Option<&str> {
        self.table_to_model.get(table).map(String::as_str)
    }

    pub fn primary_key_of(&self, table: &str) -> Option<&str> {
        self.primary_keys.get(table).map(String::as_str)
    }

    /// Resolves a relation name declared on `table`. Lookup is
    /// case-sensitive on the declared name.
    pub fn resolve_relation(&self, table: &str, relation_name: &str) -> Option<&ResolvedRelation> {
        self.relations.get(table)?.get(relation_name)
    }

    /// All relation names declared on `table`, for "did you mean"
    /// suggestions.
    pub fn available_relations_of(&self, table: &str) -> Vec<AvailableRelation> {
        self.relations
            .get(table)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Derives a foreign-key column name from a table name, e.g. `users` ->
    /// `user_id`. Disabled (returns `{table}_id` verbatim) when the
    /// strategy is `None`.
    pub fn singularise(&self, table_name: &str) -> String {
        match self.singularize_strategy {
            SingularizeStrategy::None => table_name.to_string(),
            SingularizeStrategy::Default => table_name.to_singular(),
        }
    }
}

fn resolve_relation_def(
    owner: &ModelDefinition,
    relation: &RelationDef,
    model_to_table: &HashMap<String, String>,
    primary_keys: &HashMap<String, String>,
    strategy: SingularizeStrategy,
) -> ResolvedRelation {
    let target_table = model_to_table
        .get(&relation.target_model)
        .cloned()
        .unwrap_or_else(|| relation.target_model.to_lowercase());
    let target_pk = primary_keys
        .get(&target_table)
        .cloned()
        .unwrap_or_else(|| "id".to_string());

    let singular_owner = match strategy {
        SingularizeStrategy::None => owner.table_name.clone(),
        SingularizeStrategy::Default => owner.table_name.to_singular(),
    };
    let singular_target = match strategy {
        SingularizeStrategy::None => target_table.clone(),
        SingularizeStrategy::Default => target_table.to_singular(),
    };

    let (foreign_key, local_key) = match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => (
            relation
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{singular_owner}_id")),
            relation.local_key.clone().unwrap_or(owner.primary_key.clone()),
        ),
        RelationKind::BelongsTo => (
            relation
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{singular_target}_id")),
            relation.local_key.clone().unwrap_or(target_pk.clone()),
        ),
        _ => (
            relation
                .foreign_key
                .clone()
                .unwrap_or_else(|| format!("{singular_owner}_id")),
            relation.local_key.clone().unwrap_or(owner.primary_key.clone()),
        ),
    };

    let through = relation.through.as_ref().map(|through_model| ThroughSpec {
        through_model: through_model.clone(),
        through_table: model_to_table
            .get(through_model)
            .cloned()
            .unwrap_or_else(|| through_model.to_lowercase()),
    });

    let pivot = if relation.kind.is_many_to_many() {
        let table = relation.pivot_table.clone().unwrap_or_else(|| {
            pivot_table_name(&singular_owner, &singular_target)
        });
        let (local_fk, related_fk) = if let Some(morph_name) = &relation.morph_name {
            (owner_morph_key(&owner.primary_key), format!("{morph_name}_id"))
        } else {
            (
                format!("{singular_owner}_id"),
                format!("{singular_target}_id"),
            )
        };
        Some(PivotSpec {
            table,
            local_foreign_key: local_fk,
            related_foreign_key: related_fk,
        })
    } else {
        None
    };

    ResolvedRelation {
        kind: relation.kind,
        target_model: relation.target_model.clone(),
        target_table,
        foreign_key,
        local_key,
        through,
        pivot,
        morph_name: relation.morph_name.clone(),
    }
}

fn owner_morph_key(primary_key: &str) -> String {
    primary_key.to_string()
}

/// Derives a pivot table name from two singularised table names by sorting
/// them lexicographically and joining with an underscore, e.g.
/// `role`/`user` -> `role_user`.
fn pivot_table_name(a: &str, b: &str) -> String {
    let mut names = [a.to_string(), b.to_string()];
    names.sort();
    format!("{}_{}", names[0], names[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelDefinition;
    use crate::relation::RelationDef;

    fn sample_models() -> Vec<ModelDefinition> {
        vec![
            ModelDefinition::new("User").relation(RelationDef::new(
                "posts",
                RelationKind::HasMany,
                "Post",
            )),
            ModelDefinition::new("Post").relation(RelationDef::new(
                "author",
                RelationKind::BelongsTo,
                "User",
            )),
        ]
    }

    #[test]
    fn duplicate_table_fails() {
        let models = vec![
            ModelDefinition::new("User").table_name("people"),
            ModelDefinition::new("Person").table_name("people"),
        ];
        let err = SchemaMetadataGraph::build(&models).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTable { .. }));
    }

    #[test]
    fn resolves_has_many_and_belongs_to() {
        let models = sample_models();
        let graph = SchemaMetadataGraph::build(&models).unwrap();

        let has_many = graph.resolve_relation("users", "posts").unwrap();
        assert_eq!(has_many.target_table, "posts");
        assert_eq!(has_many.foreign_key, "user_id");

        let belongs_to = graph.resolve_relation("posts", "author").unwrap();
        assert_eq!(belongs_to.target_table, "users");
        assert_eq!(belongs_to.foreign_key, "user_id");
    }

    #[test]
    fn unknown_relation_lists_available_names() {
        let models = sample_models();
        let graph = SchemaMetadataGraph::build(&models).unwrap();
        assert!(graph.resolve_relation("users", "comments").is_none());
        assert_eq!(graph.available_relations_of("users"), vec!["posts".to_string()]);
    }

    #[test]
    fn singularise_disabled_by_none_strategy() {
        let models = sample_models();
        let graph =
            SchemaMetadataGraph::build_with_strategy(&models, SingularizeStrategy::None).unwrap();
        assert_eq!(graph.singularise("users"), "users");
    }

    #[test]
    fn pivot_table_name_is_lexicographically_sorted() {
        assert_eq!(pivot_table_name("user", "role"), "role_user");
        assert_eq!(pivot_table_name("role", "user"), "role_user");
    }
}
