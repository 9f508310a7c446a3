//! Remote resource gateway: the only way the sync layer talks to the
//! remote multi-table store.
//!
//! ## Design
//! - [`RemoteGateway`] is a thin async trait over read-all / insert /
//!   update / delete / upsert, always addressed by table name
//! - Rows cross this boundary in wire form (flat, snake_case JSON);
//!   translation happens in [`crate::mapper`]
//! - A call either fully succeeds or fails with a [`GatewayError`]; nothing
//!   here retries or applies a multi-row operation partially

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;
use crate::model::RecordId;

pub use memory::MemoryGateway;
pub use postgrest::PostgrestGateway;

// ── Filters ──────────────────────────────────────────────────────

/// Row selector for update and delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every row.
    All,
    Eq(String, Value),
    Neq(String, Value),
    IsNull(String),
    NotNull(String),
}

impl Filter {
    /// `id = <id>`, keeping the id's wire type.
    pub fn by_id(id: &RecordId) -> Self {
        Self::Eq("id".into(), id.to_json())
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Self::Neq(column.into(), value.into())
    }

    /// Whether a wire row is selected by this filter.
    pub fn matches(&self, row: &Value) -> bool {
        let field = |column: &str| row.get(column).filter(|v| !v.is_null());
        match self {
            Self::All => true,
            Self::Eq(column, value) => field(column).is_some_and(|v| loose_eq(v, value)),
            Self::Neq(column, value) => field(column).is_some_and(|v| !loose_eq(v, value)),
            Self::IsNull(column) => field(column).is_none(),
            Self::NotNull(column) => field(column).is_some(),
        }
    }

    /// PostgREST query-string pair (`column`, `operator.value`).
    ///
    /// `All` is expressed as `id=not.is.null` because PostgREST refuses
    /// unfiltered updates and deletes.
    pub fn to_query(&self) -> (String, String) {
        match self {
            Self::All => ("id".into(), "not.is.null".into()),
            Self::Eq(column, value) => (column.clone(), format!("eq.{}", query_value(value))),
            Self::Neq(column, value) => (column.clone(), format!("neq.{}", query_value(value))),
            Self::IsNull(column) => (column.clone(), "is.null".into()),
            Self::NotNull(column) => (column.clone(), "not.is.null".into()),
        }
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality that treats `1` and `"1"` alike, as the remote store's text
/// comparison does.
fn loose_eq(a: &Value, b: &Value) -> bool {
    a == b || query_value(a) == query_value(b)
}

// ── Gateway trait ────────────────────────────────────────────────

/// Async access to the remote tables.
///
/// Insert and upsert return the stored representation, including any
/// server-generated fields.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Every row of a table.
    async fn fetch_all(&self, table: &str) -> Result<Vec<Value>, GatewayError>;

    /// Insert one row.
    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, GatewayError>;

    /// Patch every row selected by `filter`.
    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Delete every row selected by `filter`.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), GatewayError>;

    /// Insert or merge rows by primary key, as one request.
    async fn upsert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, GatewayError>;
}

// ── Tests ────────────────────────────────────────────────────────
