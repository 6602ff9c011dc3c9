//! sqlforge-schema - model definitions, attribute type inference, and the
//! schema metadata graph.
//!
//! Model definitions are the input to both the migration planner
//! (`sqlforge-migrate`) and the select compiler's relation joiner
//! (`sqlforge-query`). This crate owns the canonical, driver-agnostic view
//! of those models; it never depends on either downstream crate.

pub mod attribute;
pub mod error;
pub mod model;
pub mod relation;
pub mod metadata;

pub use attribute::{infer_column_type, AttributeDescriptor, ValidationRule};
pub use error::SchemaError;
pub use model::{IndexDescriptor, IndexKind, ModelDefinition, Traits};
pub use relation::{RelationDef, RelationKind};
pub use metadata::{
    AvailableRelation, PivotSpec, ResolvedRelation, SchemaMetadataGraph, SingularizeStrategy,
    ThroughSpec,
};
