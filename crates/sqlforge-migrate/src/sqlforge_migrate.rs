//! sqlforge-migrate - canonical migration plan construction, diffing, and
//! DDL emission.
//!
//! A [`MigrationPlan`] is derived once from a model set via [`build_plan`];
//! two plans are compared with [`diff`] to produce the ordered DDL
//! statements that reconcile a database, and [`hash_plan`] exposes a stable
//! digest so callers can detect drift without diffing.

pub mod builder;
pub mod diff;
pub mod error;
pub mod hash;
pub mod plan;

pub use builder::build_plan;
pub use diff::{diff as diff_plans, Migration};
pub use error::PlanError;
pub use hash::hash_plan;
pub use plan::{
    ColumnDefault, ColumnPlan, ForeignKeyRef, IndexKind, IndexPlan, MigrationPlan, TablePlan,
};
