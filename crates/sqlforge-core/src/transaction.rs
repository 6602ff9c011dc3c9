//! Transaction-related types shared by the execution layer and the
//! transaction core (`sqlforge-query`).

pub mod savepoint;
