//! Relationship declarations on a model, modeled as a tagged union over the
//! relation variants rather than an inheritance hierarchy.

/// The ten relationship kinds a model may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
    HasOneThrough,
    HasManyThrough,
    MorphOne,
    MorphMany,
    MorphToMany,
    MorphedByMany,
}

impl RelationKind {
    pub fn is_morph(&self) -> bool {
        matches!(
            self,
            RelationKind::MorphOne
                | RelationKind::MorphMany
                | RelationKind::MorphToMany
                | RelationKind::MorphedByMany
        )
    }

    pub fn is_through(&self) -> bool {
        matches!(
            self,
            RelationKind::HasOneThrough | RelationKind::HasManyThrough
        )
    }

    pub fn is_many_to_many(&self) -> bool {
        matches!(
            self,
            RelationKind::BelongsToMany | RelationKind::MorphToMany | RelationKind::MorphedByMany
        )
    }
}

/// A declared relationship from one model to another.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    /// Name of the target model (or, for `morphedByMany`, the owning model).
    pub target_model: String,
    /// Explicit foreign key column override; inferred when absent.
    pub foreign_key: Option<String>,
    /// Explicit local key override; defaults to the owning model's PK.
    pub local_key: Option<String>,
    /// Intermediate model name for `*Through` relations.
    pub through: Option<String>,
    /// Explicit pivot table override for many-to-many relations: the
    /// default lexicographic pivot naming can disagree with an existing
    /// table's order, so callers may override it here.
    pub pivot_table: Option<String>,
    /// Polymorphic discriminator prefix (e.g. `"commentable"` produces
    /// `commentable_type`/`commentable_id`) for morph relations.
    pub morph_name: Option<String>,
}

impl RelationDef {
    pub fn new(name: impl Into<String>, kind: RelationKind, target_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target_model: target_model.into(),
            foreign_key: None,
            local_key: None,
            through: None,
            pivot_table: None,
            morph_name: None,
        }
    }

    pub fn foreign_key(mut self, key: impl Into<String>) -> Self {
        self.foreign_key = Some(key.into());
        self
    }

    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = Some(key.into());
        self
    }

    pub fn through(mut self, model: impl Into<String>) -> Self {
        self.through = Some(model.into());
        self
    }

    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot_table = Some(table.into());
        self
    }

    pub fn morph_name(mut self, name: impl Into<String>) -> Self {
        self.morph_name = Some(name.into());
        self
    }
}
