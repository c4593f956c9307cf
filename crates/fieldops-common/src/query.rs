//! Typed query specification
//!
//! Queries are built from [`Filter`] predicates rather than spliced filter
//! arrays. Tenant scoping is a distinct step: a [`ScopedQuery`] can only be
//! produced by [`Query::scoped_to`], and the tenant predicate is appended when
//! it is lowered back into a plain [`Query`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::principal::TenantId;
use crate::store::{get_path, Document};

/// Field carrying the owning tenant on every tenant-scoped document
pub const TENANT_FIELD: &str = "tenant_id";

/// Filter predicate over a (dotted) field path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In(field.into(), values)
    }

    /// Field the predicate inspects
    pub fn field(&self) -> &str {
        match self {
            Self::Eq(f, _)
            | Self::Ne(f, _)
            | Self::Gt(f, _)
            | Self::Gte(f, _)
            | Self::Lt(f, _)
            | Self::Lte(f, _)
            | Self::In(f, _) => f,
        }
    }

    /// Evaluate against a document. Missing fields never match, except for `Ne`.
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = get_path(doc, self.field());
        match self {
            Self::Eq(_, expected) => actual == Some(expected),
            Self::Ne(_, expected) => actual != Some(expected),
            Self::In(_, values) => actual.map(|v| values.contains(v)).unwrap_or(false),
            Self::Gt(_, bound) => cmp_opt(actual, bound) == Some(Ordering::Greater),
            Self::Gte(_, bound) => matches!(
                cmp_opt(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(_, bound) => cmp_opt(actual, bound) == Some(Ordering::Less),
            Self::Lte(_, bound) => matches!(
                cmp_opt(actual, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

fn cmp_opt(actual: Option<&Value>, bound: &Value) -> Option<Ordering> {
    actual.and_then(|a| compare_values(a, bound))
}

/// Ordering between two JSON scalars of the same kind
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Query against a single collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Does the document pass every filter
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Bind the query to one tenant
    pub fn scoped_to(self, tenant: TenantId) -> ScopedQuery {
        ScopedQuery { tenant, query: self }
    }
}

/// Query bound to exactly one tenant
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery {
    tenant: TenantId,
    query: Query,
}

impl ScopedQuery {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Caller-supplied part of the query, without the tenant predicate
    pub fn inner(&self) -> &Query {
        &self.query
    }

    /// Lower into a store query with the tenant-equality predicate appended
    pub fn into_query(self) -> Query {
        let tenant = Value::String(self.tenant.as_str().to_string());
        self.query.filter(Filter::Eq(TENANT_FIELD.to_string(), tenant))
    }
}
