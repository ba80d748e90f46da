//! Query shape: filter + ordering + pagination, and the compiled plan.
//!
//! [`QuerySpec`] is the builder-facing shape with construction-time
//! validation. [`QueryPlan`] is what a repository hands to a storage
//! backend: filter clauses, order-by clauses, offset/limit. The plan also
//! carries the reference in-memory execution used by the in-memory backend
//! and by tests.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use trellis_core::{CoreError, CoreResult};

use crate::filter::{CompareOp, Filter, json_cmp};
use crate::spec::Specification;

/// Sort direction for one sort key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One (field, direction) sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Validated pagination window. Page numbering is 1-based.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    page: u32,
    page_size: u32,
}

impl PageWindow {
    /// Construct a window; `page < 1` or `page_size < 1` fails here, at
    /// construction time, never at execution time.
    pub fn new(page: u32, page_size: u32) -> CoreResult<Self> {
        if page < 1 {
            return Err(CoreError::invalid_specification(format!(
                "page must be >= 1, got {page}"
            )));
        }
        if page_size < 1 {
            return Err(CoreError::invalid_specification(format!(
                "page_size must be >= 1, got {page_size}"
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

/// Composable, backend-agnostic query description.
///
/// Composition (`and`, `or`, `not`) is pure: inputs are consumed by value
/// and never mutated, and the same specification always evaluates
/// identically against the same input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    filter: Option<Filter>,
    order: Vec<SortKey>,
    page: Option<PageWindow>,
    include_deleted: bool,
}

impl QuerySpec {
    /// A specification matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fluent filter on `field`: `QuerySpec::where_field("email").eq(...)`.
    pub fn where_field(field: impl Into<String>) -> FieldClause {
        FieldClause {
            spec: Self::new(),
            field: field.into(),
        }
    }

    /// Add a further conjunct on `field` to an existing specification.
    pub fn and_where(self, field: impl Into<String>) -> FieldClause {
        FieldClause {
            spec: self,
            field: field.into(),
        }
    }

    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    /// Append an ascending sort key. Keys apply left-to-right in declared
    /// order; no implicit secondary sort is added.
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order.push(SortKey {
            field: field.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order.push(SortKey {
            field: field.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    /// Set the pagination window (validated at construction).
    pub fn paginate(mut self, page: u32, page_size: u32) -> CoreResult<Self> {
        self.page = Some(PageWindow::new(page, page_size)?);
        Ok(self)
    }

    /// Opt out of the implicit "not soft-deleted" guard that read
    /// operations otherwise add.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn order(&self) -> &[SortKey] {
        &self.order
    }

    pub fn page(&self) -> Option<PageWindow> {
        self.page
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// Conjunction of two specifications' filters. Ordering, pagination and
    /// the deleted-guard opt-out of the left operand are retained.
    pub fn and(mut self, other: QuerySpec) -> QuerySpec {
        self.filter = merge(self.filter, other.filter, Filter::and);
        self
    }

    /// Disjunction of two specifications' filters; left operand's ordering
    /// and pagination are retained.
    pub fn or(mut self, other: QuerySpec) -> QuerySpec {
        self.filter = merge(self.filter, other.filter, Filter::or);
        self
    }

    /// Negate this specification's filter. A filterless specification
    /// matches everything, so its negation matches nothing.
    pub fn not(mut self) -> QuerySpec {
        let filter = self.filter.take().unwrap_or(Filter::And(Vec::new()));
        self.filter = Some(filter.not());
        self
    }

    /// Compile into a store-consumable plan.
    pub fn compile(&self) -> QueryPlan {
        QueryPlan {
            filter: self.filter.clone(),
            order: self.order.clone(),
            offset: self.page.map(|p| p.offset()),
            limit: self.page.map(|p| p.limit()),
        }
    }
}

fn merge(
    left: Option<Filter>,
    right: Option<Filter>,
    combine: impl FnOnce(Filter, Filter) -> Filter,
) -> Option<Filter> {
    match (left, right) {
        (Some(l), Some(r)) => Some(combine(l, r)),
        (Some(f), None) | (None, Some(f)) => Some(f),
        (None, None) => None,
    }
}

/// Direct in-memory predicate evaluation. Filter only; ordering and
/// pagination are not predicates.
impl Specification<JsonValue> for QuerySpec {
    fn is_satisfied_by(&self, candidate: &JsonValue) -> bool {
        match &self.filter {
            Some(f) => f.matches(candidate),
            None => true,
        }
    }
}

/// Fluent filter builder for one field.
#[derive(Debug, Clone)]
pub struct FieldClause {
    spec: QuerySpec,
    field: String,
}

impl FieldClause {
    fn push(mut self, op: CompareOp, value: JsonValue) -> QuerySpec {
        let clause = Filter::compare(self.field, op, value);
        self.spec.filter = merge(self.spec.filter, Some(clause), Filter::and);
        self.spec
    }

    pub fn eq(self, value: JsonValue) -> QuerySpec {
        self.push(CompareOp::Eq, value)
    }

    pub fn neq(self, value: JsonValue) -> QuerySpec {
        self.push(CompareOp::Neq, value)
    }

    pub fn gt(self, value: JsonValue) -> QuerySpec {
        self.push(CompareOp::Gt, value)
    }

    pub fn gte(self, value: JsonValue) -> QuerySpec {
        self.push(CompareOp::Gte, value)
    }

    pub fn lt(self, value: JsonValue) -> QuerySpec {
        self.push(CompareOp::Lt, value)
    }

    pub fn lte(self, value: JsonValue) -> QuerySpec {
        self.push(CompareOp::Lte, value)
    }

    pub fn like(self, pattern: impl Into<String>) -> QuerySpec {
        self.push(CompareOp::Like, JsonValue::String(pattern.into()))
    }

    pub fn is_in(self, values: Vec<JsonValue>) -> QuerySpec {
        self.push(CompareOp::In, JsonValue::Array(values))
    }
}

/// Store-native query plan: filter clauses, order-by clauses, offset/limit.
///
/// Backends interpret the plan however suits them; `execute` is the
/// reference in-memory interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub filter: Option<Filter>,
    pub order: Vec<SortKey>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl QueryPlan {
    /// Add the "not soft-deleted" guard clause. A missing deleted field
    /// evaluates as null, which satisfies the guard.
    pub fn guarded(mut self, deleted_field: &str) -> Self {
        let guard = Filter::compare(deleted_field, CompareOp::Neq, JsonValue::Bool(true));
        self.filter = merge(self.filter, Some(guard), |left, right| right.and(left));
        self
    }

    pub fn matches(&self, doc: &JsonValue) -> bool {
        match &self.filter {
            Some(f) => f.matches(doc),
            None => true,
        }
    }

    /// Stable multi-key sort, keys applied left-to-right.
    pub fn sort(&self, docs: &mut [JsonValue]) {
        if self.order.is_empty() {
            return;
        }
        docs.sort_by(|a, b| self.compare_docs(a, b));
    }

    fn compare_docs(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        for key in &self.order {
            let left = a.get(&key.field).unwrap_or(&JsonValue::Null);
            let right = b.get(&key.field).unwrap_or(&JsonValue::Null);
            let ord = json_cmp(left, right).unwrap_or(Ordering::Equal);
            let ord = match key.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Apply offset/limit. An out-of-range page yields an empty result, not
    /// an error.
    pub fn window(&self, docs: Vec<JsonValue>) -> Vec<JsonValue> {
        let offset = usize::try_from(self.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        docs.into_iter().skip(offset).take(limit).collect()
    }

    /// Reference execution: filter, then sort, then window.
    pub fn execute(&self, docs: impl IntoIterator<Item = JsonValue>) -> Vec<JsonValue> {
        let mut matched: Vec<JsonValue> =
            docs.into_iter().filter(|d| self.matches(d)).collect();
        self.sort(&mut matched);
        self.window(matched)
    }
}
