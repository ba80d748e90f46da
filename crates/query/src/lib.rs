//! `trellis-query`: composable, backend-agnostic query specifications.
//!
//! Two evaluation modes: direct in-memory predicates via
//! [`Specification::is_satisfied_by`], and compilation into a
//! [`QueryPlan`] (filter clauses, order-by clauses, offset/limit) that a
//! repository hands to a storage backend.

pub mod filter;
pub mod plan;
pub mod spec;

pub use filter::{CompareOp, Filter};
pub use plan::{FieldClause, PageWindow, QueryPlan, QuerySpec, SortDirection, SortKey};
pub use spec::{AndSpec, NotSpec, OrSpec, PredicateSpec, Specification};
