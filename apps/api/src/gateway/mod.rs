//! Data Gateway: the single seam between the service and the relational backend.
//!
//! Every read and write in the service goes through `DataGateway`. Rows travel as
//! JSON objects; callers convert them into the typed rows in `crate::models` with
//! [`row_into`] / [`to_row`].
//!
//! `AppState` holds an `Arc<dyn DataGateway>` (Postgres in production, in-memory in tests).

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
pub mod memory;
pub mod postgres;

/// A single row, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Profiles,
    CvDocuments,
    JobDescriptions,
    CvAnalyses,
    InterviewQuestions,
    CvOptimizations,
    PaymentRecords,
    UserSessions,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Profiles,
        Table::CvDocuments,
        Table::JobDescriptions,
        Table::CvAnalyses,
        Table::InterviewQuestions,
        Table::CvOptimizations,
        Table::PaymentRecords,
        Table::UserSessions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::CvDocuments => "cv_documents",
            Table::JobDescriptions => "job_descriptions",
            Table::CvAnalyses => "cv_analyses",
            Table::InterviewQuestions => "interview_questions",
            Table::CvOptimizations => "cv_optimizations",
            Table::PaymentRecords => "payment_records",
            Table::UserSessions => "user_sessions",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value compared against a column. Always sent to the database as a bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, FilterValue),
    IsNull(String),
    Lt(String, FilterValue),
    Gte(String, FilterValue),
    In(String, Vec<FilterValue>),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(column, _)
            | Condition::IsNull(column)
            | Condition::Lt(column, _)
            | Condition::Gte(column, _)
            | Condition::In(column, _) => column,
        }
    }
}

/// A conjunction of conditions plus an optional row limit (reads only).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.conditions
            .push(Condition::Eq(column.to_string(), value.into()));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull(column.to_string()));
        self
    }

    pub fn lt(mut self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.conditions
            .push(Condition::Lt(column.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.conditions
            .push(Condition::Gte(column.to_string(), value.into()));
        self
    }

    pub fn in_list<V, I>(mut self, column: &str, values: I) -> Self
    where
        V: Into<FilterValue>,
        I: IntoIterator<Item = V>,
    {
        self.conditions.push(Condition::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_unscoped(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// A row locked for the duration of a guarded write, keyed by its `id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLock {
    pub table: Table,
    pub id: Uuid,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid column name: {0:?}")]
    InvalidColumn(String),

    #[error("refusing unscoped {0} on {1}")]
    UnscopedWrite(&'static str, Table),

    #[error("malformed row: {0}")]
    MalformedRow(String),
}

#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, GatewayError>;

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64, GatewayError>;

    /// Deletes every matching row and returns how many were removed.
    /// An empty filter is rejected with `UnscopedWrite`.
    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, GatewayError>;

    /// Inserts the given columns; omitted columns take their database defaults.
    async fn insert(&self, table: Table, row: Row) -> Result<Row, GatewayError>;

    /// Overwrites `changes` on every matching row. An empty filter is rejected.
    async fn update(&self, table: Table, filter: &Filter, changes: Row)
        -> Result<u64, GatewayError>;

    /// Inserts `row` only while fewer than `limit` rows of `table` match `filter`.
    /// The count and the insert run under `lock`, so concurrent callers holding the same
    /// lock see each other's inserts. Returns `None` when the limit is already reached.
    async fn insert_below_limit(
        &self,
        lock: RowLock,
        table: Table,
        filter: &Filter,
        limit: u64,
        row: Row,
    ) -> Result<Option<Row>, GatewayError>;
}

/// Column names are interpolated into SQL, so only plain identifiers pass.
pub fn is_valid_column(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub(crate) fn validate_columns<'a>(
    columns: impl IntoIterator<Item = &'a str>,
) -> Result<(), GatewayError> {
    for column in columns {
        if !is_valid_column(column) {
            return Err(GatewayError::InvalidColumn(column.to_string()));
        }
    }
    Ok(())
}

pub fn row_into<T: DeserializeOwned>(row: Row) -> Result<T, GatewayError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| GatewayError::MalformedRow(e.to_string()))
}

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, GatewayError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(GatewayError::MalformedRow(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(GatewayError::MalformedRow(e.to_string())),
    }
}

/// Collects the UUIDs in `column` of each row, skipping rows without a parseable UUID.
pub fn ids_of(rows: &[Row], column: &str) -> Vec<Uuid> {
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter_map(Value::as_str)
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}
