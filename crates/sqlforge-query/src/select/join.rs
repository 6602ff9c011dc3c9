//! Relation joining: resolves a relation
//! name (flat, dotted path, or `{relation: callback}`) against the schema
//! metadata graph and emits the correct `LEFT JOIN` shape for each of the
//! ten relation kinds, with cycle detection and depth/eager-load limits.

use std::collections::HashSet;

use sqlforge_core::DatabaseDriver;
use sqlforge_schema::{RelationKind, ResolvedRelation, SchemaError, SchemaMetadataGraph};

use crate::config::RelationsConfig;
use crate::error::{QueryError, Result};
use crate::registry::SoftDeleteRegistry;

/// One `table ON condition` hop within a resolved relation. A simple
/// relation (HasOne/HasMany/BelongsTo/morph) is a single segment; pivot and
/// `*Through` relations are two (intermediate table, then target table).
pub struct JoinSegment {
    pub table: String,
    pub on_condition: String,
}

/// A single resolved relation hop, plus the table it lands on so the
/// caller can keep walking a dotted path or apply soft-delete scoping.
/// Exposes both the ready-to-emit `LEFT JOIN` text and the underlying
/// segments, since correlated `EXISTS`/`COUNT` subqueries (for
/// `withCount`/`whereHas`/`whereDoesntHave`/`has`/`doesntHave`) need the
/// first segment's condition rewritten into a `WHERE` rather than an `ON`.
pub struct JoinStep {
    pub segments: Vec<JoinSegment>,
    pub landed_table: String,
}

impl JoinStep {
    /// Renders this step as `LEFT JOIN a ON ... [LEFT JOIN b ON ...]` for
    /// splicing into the outer query's FROM clause.
    pub fn sql(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("LEFT JOIN {} ON {}", s.table, s.on_condition))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Renders this step as a correlated-subquery source: `FROM a [JOIN b
    /// ON ...]`, with the first segment's join condition returned
    /// separately so the caller can place it in the subquery's `WHERE`
    /// clause (the correlation back to the outer table).
    pub fn as_correlated_source(&self) -> (String, String) {
        let first = &self.segments[0];
        let mut from = format!("FROM {}", first.table);
        for segment in &self.segments[1..] {
            from.push_str(&format!(" JOIN {} ON {}", segment.table, segment.on_condition));
        }
        (from, first.on_condition.clone())
    }
}

/// Tracks cross-call state for one `with(...)`/eager-load resolution pass:
/// visited `from -> to` edges (cycle detection), the running eager-load
/// count, and the soft-delete registry used to scope joined tables.
pub struct JoinContext<'a> {
    pub metadata: &'a SchemaMetadataGraph,
    pub driver: &'a dyn DatabaseDriver,
    pub relations_config: &'a RelationsConfig,
    pub soft_deletes: &'a SoftDeleteRegistry,
    pub soft_deletes_enabled: bool,
    pub visited: HashSet<(String, String)>,
    pub eager_load_count: usize,
}

impl<'a> JoinContext<'a> {
    pub fn new(
        metadata: &'a SchemaMetadataGraph,
        driver: &'a dyn DatabaseDriver,
        relations_config: &'a RelationsConfig,
        soft_deletes: &'a SoftDeleteRegistry,
        soft_deletes_enabled: bool,
    ) -> Self {
        Self {
            metadata,
            driver,
            relations_config,
            soft_deletes,
            soft_deletes_enabled,
            visited: HashSet::new(),
            eager_load_count: 0,
        }
    }

    /// Resolves a dotted relation path (`posts.comments`) starting from
    /// `owner_table`, returning one [`JoinStep`] per hop.
    pub fn resolve_path(&mut self, owner_table: &str, path: &str) -> Result<Vec<JoinStep>> {
        let hops: Vec<&str> = path.split('.').collect();
        if hops.len() > self.relations_config.max_depth {
            return Err(SchemaError::MaxDepthExceeded {
                max: self.relations_config.max_depth,
                path: path.to_string(),
            }
            .into());
        }

        let mut steps = Vec::with_capacity(hops.len());
        let mut current_table = owner_table.to_string();

        for hop in hops {
            self.eager_load_count += 1;
            if self.eager_load_count > self.relations_config.max_eager_load {
                return Err(SchemaError::MaxEagerLoadExceeded {
                    max: self.relations_config.max_eager_load,
                }
                .into());
            }

            let edge = (current_table.clone(), hop.to_string());
            if self.relations_config.detect_cycles && !self.visited.insert(edge) {
                return Err(SchemaError::CircularRelationship {
                    path: format!("{current_table}.{hop}"),
                }
                .into());
            }

            let relation = self.metadata.resolve_relation(&current_table, hop).ok_or_else(|| {
                SchemaError::UnknownRelation {
                    table: current_table.clone(),
                    relation: hop.to_string(),
                    suggestions: self.metadata.available_relations_of(&current_table),
                }
            })?;

            let mut step = build_join(self.driver, &current_table, hop, relation)?;
            if self.soft_deletes_enabled {
                if let Some(column) = self.soft_deletes.column_for(&step.landed_table) {
                    let quoted_table = self.driver.quote_identifier(&step.landed_table);
                    let quoted_column = self.driver.quote_identifier(column);
                    if let Some(last) = step.segments.last_mut() {
                        last.on_condition
                            .push_str(&format!(" AND {quoted_table}.{quoted_column} IS NULL"));
                    }
                }
            }
            current_table = step.landed_table.clone();
            steps.push(step);
        }

        Ok(steps)
    }
}

fn q(driver: &dyn DatabaseDriver, name: &str) -> String {
    driver.quote_identifier(name)
}

fn qualified(driver: &dyn DatabaseDriver, table: &str, column: &str) -> String {
    format!("{}.{}", q(driver, table), q(driver, column))
}

fn build_join(
    driver: &dyn DatabaseDriver,
    owner_table: &str,
    relation_name: &str,
    relation: &ResolvedRelation,
) -> Result<JoinStep> {
    match relation.kind {
        RelationKind::HasOne | RelationKind::HasMany => {
            let on = format!(
                "{} = {}",
                qualified(driver, &relation.target_table, &relation.foreign_key),
                qualified(driver, owner_table, &relation.local_key),
            );
            Ok(JoinStep {
                segments: vec![JoinSegment {
                    table: q(driver, &relation.target_table),
                    on_condition: on,
                }],
                landed_table: relation.target_table.clone(),
            })
        }
        RelationKind::BelongsTo => {
            let on = format!(
                "{} = {}",
                qualified(driver, &relation.target_table, &relation.local_key),
                qualified(driver, owner_table, &relation.foreign_key),
            );
            Ok(JoinStep {
                segments: vec![JoinSegment {
                    table: q(driver, &relation.target_table),
                    on_condition: on,
                }],
                landed_table: relation.target_table.clone(),
            })
        }
        RelationKind::HasOneThrough | RelationKind::HasManyThrough => {
            let through = relation.through.as_ref().ok_or_else(|| {
                QueryError::BuilderState(format!(
                    "relation {relation_name:?} declared as *Through without a through spec"
                ))
            })?;
            let through_on = format!(
                "{} = {}",
                qualified(driver, &through.through_table, &relation.foreign_key),
                qualified(driver, owner_table, &relation.local_key),
            );
            let target_on = format!(
                "{} = {}",
                qualified(driver, &relation.target_table, &relation.foreign_key),
                qualified(driver, &through.through_table, &relation.local_key),
            );
            Ok(JoinStep {
                segments: vec![
                    JoinSegment {
                        table: q(driver, &through.through_table),
                        on_condition: through_on,
                    },
                    JoinSegment {
                        table: q(driver, &relation.target_table),
                        on_condition: target_on,
                    },
                ],
                landed_table: relation.target_table.clone(),
            })
        }
        RelationKind::MorphOne | RelationKind::MorphMany => {
            let morph_name = relation.morph_name.as_deref().unwrap_or(relation_name);
            let id_on = format!(
                "{} = {}",
                qualified(driver, &relation.target_table, &format!("{morph_name}_id")),
                qualified(driver, owner_table, &relation.local_key),
            );
            let type_on = format!(
                "{} = {}",
                qualified(driver, &relation.target_table, &format!("{morph_name}_type")),
                quoted_literal(owner_table),
            );
            Ok(JoinStep {
                segments: vec![JoinSegment {
                    table: q(driver, &relation.target_table),
                    on_condition: format!("{id_on} AND {type_on}"),
                }],
                landed_table: relation.target_table.clone(),
            })
        }
        RelationKind::BelongsToMany | RelationKind::MorphToMany | RelationKind::MorphedByMany => {
            let pivot = relation.pivot.as_ref().ok_or_else(|| {
                QueryError::BuilderState(format!(
                    "many-to-many relation {relation_name:?} missing a resolved pivot"
                ))
            })?;
            let mut pivot_on = format!(
                "{} = {}",
                qualified(driver, &pivot.table, &pivot.local_foreign_key),
                qualified(driver, owner_table, &relation.local_key),
            );
            if matches!(relation.kind, RelationKind::MorphToMany) {
                if let Some(morph_name) = &relation.morph_name {
                    pivot_on.push_str(&format!(
                        " AND {} = {}",
                        qualified(driver, &pivot.table, &format!("{morph_name}_type")),
                        quoted_literal(owner_table),
                    ));
                }
            }
            let target_on = format!(
                "{} = {}",
                qualified(driver, &relation.target_table, &relation.foreign_key),
                qualified(driver, &pivot.table, &pivot.related_foreign_key),
            );
            Ok(JoinStep {
                segments: vec![
                    JoinSegment {
                        table: q(driver, &pivot.table),
                        on_condition: pivot_on,
                    },
                    JoinSegment {
                        table: q(driver, &relation.target_table),
                        on_condition: target_on,
                    },
                ],
                landed_table: relation.target_table.clone(),
            })
        }
    }
}

fn quoted_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlforge_core::Dialect;
    use sqlforge_schema::{ModelDefinition, RelationDef};

    fn ctx_models() -> Vec<ModelDefinition> {
        vec![
            ModelDefinition::new("User").relation(RelationDef::new(
                "posts",
                RelationKind::HasMany,
                "Post",
            )),
            ModelDefinition::new("Post")
                .relation(RelationDef::new("author", RelationKind::BelongsTo, "User"))
                .relation(RelationDef::new("tags", RelationKind::BelongsToMany, "Tag")),
            ModelDefinition::new("Tag"),
        ]
    }

    #[test]
    fn has_many_join_uses_owner_pk_and_target_fk() {
        let models = ctx_models();
        let metadata = SchemaMetadataGraph::build(&models).unwrap();
        let driver = crate::test_support::stub_driver(Dialect::Postgres);
        let relations_config = RelationsConfig::default();
        let registry = SoftDeleteRegistry::from_models(&models);
        let mut ctx = JoinContext::new(&metadata, driver.as_ref(), &relations_config, &registry, false);

        let steps = ctx.resolve_path("users", "posts").unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].sql().contains("LEFT JOIN \"posts\""));
        assert!(steps[0].sql().contains("\"posts\".\"user_id\" = \"users\".\"id\""));
    }

    #[test]
    fn many_to_many_emits_pivot_then_target_join() {
        let models = ctx_models();
        let metadata = SchemaMetadataGraph::build(&models).unwrap();
        let driver = crate::test_support::stub_driver(Dialect::Postgres);
        let relations_config = RelationsConfig::default();
        let registry = SoftDeleteRegistry::from_models(&models);
        let mut ctx = JoinContext::new(&metadata, driver.as_ref(), &relations_config, &registry, false);

        let steps = ctx.resolve_path("posts", "tags").unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].sql().contains("LEFT JOIN \"post_tag\""));
        assert!(steps[0].sql().contains("LEFT JOIN \"tags\""));
    }

    #[test]
    fn dotted_path_walks_multiple_hops() {
        let models = ctx_models();
        let metadata = SchemaMetadataGraph::build(&models).unwrap();
        let driver = crate::test_support::stub_driver(Dialect::Postgres);
        let relations_config = RelationsConfig::default();
        let registry = SoftDeleteRegistry::from_models(&models);
        let mut ctx = JoinContext::new(&metadata, driver.as_ref(), &relations_config, &registry, false);

        let steps = ctx.resolve_path("users", "posts.tags").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].landed_table, "tags");
    }

    #[test]
    fn unknown_relation_lists_suggestions() {
        let models = ctx_models();
        let metadata = SchemaMetadataGraph::build(&models).unwrap();
        let driver = crate::test_support::stub_driver(Dialect::Postgres);
        let relations_config = RelationsConfig::default();
        let registry = SoftDeleteRegistry::from_models(&models);
        let mut ctx = JoinContext::new(&metadata, driver.as_ref(), &relations_config, &registry, false);

        let err = ctx.resolve_path("users", "comments").unwrap_err();
        match err {
            QueryError::Schema(SchemaError::UnknownRelation { suggestions, .. }) => {
                assert_eq!(suggestions, vec!["posts".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn depth_limit_is_enforced() {
        let models = ctx_models();
        let metadata = SchemaMetadataGraph::build(&models).unwrap();
        let driver = crate::test_support::stub_driver(Dialect::Postgres);
        let mut relations_config = RelationsConfig::default();
        relations_config.max_depth = 1;
        let registry = SoftDeleteRegistry::from_models(&models);
        let mut ctx = JoinContext::new(&metadata, driver.as_ref(), &relations_config, &registry, false);

        let err = ctx.resolve_path("users", "posts.tags").unwrap_err();
        assert!(matches!(
            err,
            QueryError::Schema(SchemaError::MaxDepthExceeded { .. })
        ));
    }

    #[test]
    fn soft_delete_filter_applied_to_joined_table() {
        let models = vec![
            ModelDefinition::new("User").relation(RelationDef::new(
                "posts",
                RelationKind::HasMany,
                "Post",
            )),
            ModelDefinition::new("Post").soft_deletes(),
        ];
        let metadata = SchemaMetadataGraph::build(&models).unwrap();
        let driver = crate::test_support::stub_driver(Dialect::Postgres);
        let relations_config = RelationsConfig::default();
        let registry = SoftDeleteRegistry::from_models(&models);
        let mut ctx = JoinContext::new(&metadata, driver.as_ref(), &relations_config, &registry, true);

        let steps = ctx.resolve_path("users", "posts").unwrap();
        assert!(steps[0].sql().contains("\"posts\".\"deleted_at\" IS NULL"));
    }

    #[test]
    fn repeated_edge_is_circular() {
        let models = vec![ModelDefinition::new("A")
            .table_name("as")
            .relation(RelationDef::new("b", RelationKind::HasOne, "B"))];
        let metadata = SchemaMetadataGraph::build(&models).unwrap();
        let driver = crate::test_support::stub_driver(Dialect::Postgres);
        let relations_config = RelationsConfig::default();
        let registry = SoftDeleteRegistry::from_models(&models);
        let mut ctx = JoinContext::new(&metadata, driver.as_ref(), &relations_config, &registry, false);

        ctx.resolve_path("as", "b").unwrap();
        let err = ctx.resolve_path("as", "b").unwrap_err();
        assert!(matches!(
            err,
            QueryError::Schema(SchemaError::CircularRelationship { .. })
        ));
    }
}
