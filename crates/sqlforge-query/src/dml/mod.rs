//! DML Compilers: INSERT/UPDATE/DELETE builders plus the
//! convenience helpers (`firstOrCreate`, `updateOrCreate`, `save`,
//! `findOrFail`) specified as compositions of the primitive builders and
//! the select compiler.

pub mod delete;
pub mod helpers;
pub mod insert;
pub mod update;

pub use delete::DeleteBuilder;
pub use helpers::{find_or_fail, first_or_create, save, update_or_create};
pub use insert::InsertBuilder;
pub use update::UpdateBuilder;
