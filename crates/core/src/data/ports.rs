//! Port interface for generic table access

use std::collections::BTreeMap;

use async_trait::async_trait;
use qrgen_domain::Result;
use serde_json::{Map, Value};

/// One table row, column name to value
pub type Row = Map<String, Value>;

/// Column equality constraints, all of which must hold
pub type Filter = BTreeMap<String, Value>;

/// Generic access to a relational store.
///
/// Implementations validate table and column names; callers never build SQL.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Rows matching every pair in `filter` (all rows for an empty filter)
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>>;

    /// Insert `row` and return it as stored
    async fn insert(&self, table: &str, row: Row) -> Result<Row>;

    /// Apply `changes` to matching rows and return them as stored
    async fn update(&self, table: &str, changes: Row, filter: &Filter) -> Result<Vec<Row>>;

    /// Delete matching rows, returning how many were removed
    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64>;
}
