//! In-memory `DataGateway` used by tests. Mirrors the Postgres semantics closely enough
//! for the maintenance, gating, and webhook flows; can be switched to "unreachable".

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::{
    validate_columns, Condition, DataGateway, Filter, FilterValue, GatewayError, Row, RowLock,
    Table,
};

#[derive(Default)]
pub struct MemoryGateway {
    tables: Mutex<BTreeMap<Table, Vec<Row>>>,
    unreachable: AtomicBool,
    failing_tables: Mutex<Vec<Table>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: Table, row: Value) {
        let row = row.as_object().cloned().expect("seed rows must be objects");
        self.tables.lock().unwrap().entry(table).or_default().push(row);
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call fails like a dropped connection pool.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, AtomicOrdering::SeqCst);
    }

    /// Calls touching `table` fail; everything else keeps working.
    pub fn fail_table(&self, table: Table) {
        self.failing_tables.lock().unwrap().push(table);
    }

    fn check(&self, table: Table) -> Result<(), GatewayError> {
        if self.unreachable.load(AtomicOrdering::SeqCst)
            || self.failing_tables.lock().unwrap().contains(&table)
        {
            return Err(GatewayError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl DataGateway for MemoryGateway {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        self.check(table)?;
        validate_columns(filter.conditions.iter().map(Condition::column))?;
        let tables = self.tables.lock().unwrap();
        let matching = tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches(row, filter))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(match filter.limit {
            Some(limit) => matching.into_iter().take(limit as usize).collect(),
            None => matching,
        })
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64, GatewayError> {
        let unlimited = Filter {
            limit: None,
            ..filter.clone()
        };
        Ok(self.select(table, &unlimited).await?.len() as u64)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, GatewayError> {
        self.check(table)?;
        if filter.is_unscoped() {
            return Err(GatewayError::UnscopedWrite("delete", table));
        }
        validate_columns(filter.conditions.iter().map(Condition::column))?;
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table).or_default();
        let before = rows.len();
        rows.retain(|row| !matches(row, filter));
        Ok((before - rows.len()) as u64)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, GatewayError> {
        self.check(table)?;
        validate_columns(row.keys().map(String::as_str))?;
        let row = with_defaults(row);
        self.tables
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        changes: Row,
    ) -> Result<u64, GatewayError> {
        self.check(table)?;
        if filter.is_unscoped() {
            return Err(GatewayError::UnscopedWrite("update", table));
        }
        validate_columns(changes.keys().map(String::as_str))?;
        let mut tables = self.tables.lock().unwrap();
        let mut updated = 0;
        for row in tables.entry(table).or_default().iter_mut() {
            if matches(row, filter) {
                for (column, value) in &changes {
                    row.insert(column.clone(), value.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_below_limit(
        &self,
        lock: RowLock,
        table: Table,
        filter: &Filter,
        limit: u64,
        row: Row,
    ) -> Result<Option<Row>, GatewayError> {
        self.check(lock.table)?;
        self.check(table)?;
        validate_columns(filter.conditions.iter().map(Condition::column))?;
        validate_columns(row.keys().map(String::as_str))?;

        // One guard over count and insert stands in for the row lock.
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table).or_default();
        let count = rows.iter().filter(|row| matches(row, filter)).count() as u64;
        if count >= limit {
            return Ok(None);
        }
        let row = with_defaults(row);
        rows.push(row.clone());
        Ok(Some(row))
    }
}

/// Fills the columns the schema defaults.
fn with_defaults(mut row: Row) -> Row {
    row.entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    row.entry("created_at")
        .or_insert_with(|| serde_json::to_value(Utc::now()).unwrap_or(Value::Null));
    row
}

fn matches(row: &Row, filter: &Filter) -> bool {
    filter.conditions.iter().all(|condition| match condition {
        Condition::Eq(column, value) => compare(row.get(column), value) == Some(Ordering::Equal),
        Condition::IsNull(column) => row.get(column).map_or(true, Value::is_null),
        Condition::Lt(column, value) => compare(row.get(column), value) == Some(Ordering::Less),
        Condition::Gte(column, value) => matches!(
            compare(row.get(column), value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Condition::In(column, values) => values
            .iter()
            .any(|value| compare(row.get(column), value) == Some(Ordering::Equal)),
    })
}

/// SQL-style comparison: anything against NULL or a mismatched type is unknown.
fn compare(cell: Option<&Value>, value: &FilterValue) -> Option<Ordering> {
    let cell = cell?;
    match value {
        FilterValue::Bool(v) => cell.as_bool().map(|c| c.cmp(v)),
        FilterValue::Int(v) => cell.as_i64().map(|c| c.cmp(v)),
        FilterValue::Text(v) => cell.as_str().map(|c| c.cmp(v.as_str())),
        FilterValue::Uuid(v) => cell
            .as_str()
            .and_then(|c| Uuid::parse_str(c).ok())
            .map(|c| c.cmp(v)),
        FilterValue::Timestamp(v) => cell
            .as_str()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|c| c.with_timezone(&Utc).cmp(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_filters_follow_sql_null_semantics() {
        let gateway = MemoryGateway::new();
        let owner = Uuid::new_v4();
        let old = Utc::now() - Duration::hours(30);
        gateway.seed(
            Table::UserSessions,
            json!({ "id": Uuid::new_v4(), "user_id": null, "created_at": old }),
        );
        gateway.seed(
            Table::UserSessions,
            json!({ "id": Uuid::new_v4(), "user_id": owner, "created_at": old }),
        );

        let guests = gateway
            .select(Table::UserSessions, &Filter::new().is_null("user_id"))
            .await
            .unwrap();
        assert_eq!(guests.len(), 1);

        // NULL never equals anything
        let owned = gateway
            .count(Table::UserSessions, &Filter::new().eq("user_id", owner))
            .await
            .unwrap();
        assert_eq!(owned, 1);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_fails_every_call() {
        let gateway = MemoryGateway::new();
        gateway.set_unreachable(true);
        let result = gateway.count(Table::Profiles, &Filter::new()).await;
        assert!(matches!(result, Err(GatewayError::Database(_))));
    }

    #[tokio::test]
    async fn test_insert_below_limit_stops_at_the_limit() {
        let gateway = MemoryGateway::new();
        let owner = Uuid::new_v4();
        let lock = RowLock {
            table: Table::Profiles,
            id: owner,
        };
        let filter = Filter::new().eq("user_id", owner);
        let row = || json!({ "user_id": owner }).as_object().cloned().unwrap();

        let first = gateway
            .insert_below_limit(lock, Table::CvAnalyses, &filter, 2, row())
            .await
            .unwrap();
        assert!(first.unwrap().contains_key("id"));
        assert!(gateway
            .insert_below_limit(lock, Table::CvAnalyses, &filter, 2, row())
            .await
            .unwrap()
            .is_some());
        assert!(gateway
            .insert_below_limit(lock, Table::CvAnalyses, &filter, 2, row())
            .await
            .unwrap()
            .is_none());
        assert_eq!(gateway.rows(Table::CvAnalyses).len(), 2);
    }

    #[tokio::test]
    async fn test_update_merges_changes() {
        let gateway = MemoryGateway::new();
        let id = Uuid::new_v4();
        gateway.seed(
            Table::Profiles,
            json!({ "id": id, "subscription_status": "free" }),
        );
        let changes = json!({ "subscription_status": "premium" })
            .as_object()
            .cloned()
            .unwrap();
        let updated = gateway
            .update(Table::Profiles, &Filter::new().eq("id", id), changes)
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(
            gateway.rows(Table::Profiles)[0]["subscription_status"],
            json!("premium")
        );
    }
}
