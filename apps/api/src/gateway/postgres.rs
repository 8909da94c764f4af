//! Postgres implementation of `DataGateway`.
//!
//! Rows are read with `to_jsonb(t)` and written through `jsonb_populate_record`, so the
//! gateway never needs per-table Rust structs. Every filter value is a bound parameter;
//! only validated column names are interpolated.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{
    validate_columns, Condition, DataGateway, Filter, FilterValue, GatewayError, Row, RowLock,
    Table,
};

type Builder = QueryBuilder<'static, Postgres>;

#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataGateway for PgGateway {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
        let mut builder = select_query(table, filter)?;
        debug!(table = %table, sql = builder.sql(), "gateway select");
        let values = builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await?;

        values
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(GatewayError::MalformedRow(format!(
                    "{table} returned a non-object row: {other}"
                ))),
            })
            .collect()
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64, GatewayError> {
        let mut builder = count_query(table, filter)?;
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, GatewayError> {
        let mut builder = delete_query(table, filter)?;
        debug!(table = %table, sql = builder.sql(), "gateway delete");
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, GatewayError> {
        let mut builder = insert_query(table, row)?;
        let inserted = builder
            .build_query_scalar::<Value>()
            .fetch_one(&self.pool)
            .await?;
        match inserted {
            Value::Object(row) => Ok(row),
            other => Err(GatewayError::MalformedRow(format!(
                "{table} insert returned {other}"
            ))),
        }
    }

    async fn update(
        &self,
        table: Table,
        filter: &Filter,
        changes: Row,
    ) -> Result<u64, GatewayError> {
        let mut builder = update_query(table, filter, changes)?;
        debug!(table = %table, sql = builder.sql(), "gateway update");
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert_below_limit(
        &self,
        lock: RowLock,
        table: Table,
        filter: &Filter,
        limit: u64,
        row: Row,
    ) -> Result<Option<Row>, GatewayError> {
        let mut lock_builder = lock_query(lock);
        let mut count_builder = count_query(table, filter)?;
        let mut insert_builder = insert_query(table, row)?;

        let mut tx = self.pool.begin().await?;
        // Blocks until any concurrent holder commits; the count below then sees its insert.
        lock_builder.build().execute(&mut *tx).await?;

        let count = count_builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *tx)
            .await?;
        if count.max(0) as u64 >= limit {
            tx.rollback().await?;
            debug!(table = %table, count, limit, "guarded insert refused");
            return Ok(None);
        }

        let inserted = insert_builder
            .build_query_scalar::<Value>()
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        match inserted {
            Value::Object(row) => Ok(Some(row)),
            other => Err(GatewayError::MalformedRow(format!(
                "{table} insert returned {other}"
            ))),
        }
    }
}

fn lock_query(lock: RowLock) -> Builder {
    let mut builder = Builder::new(format!(
        "SELECT 1 FROM {} AS t WHERE t.id = ",
        lock.table
    ));
    builder.push_bind(lock.id);
    builder.push(" FOR UPDATE");
    builder
}

fn select_query(table: Table, filter: &Filter) -> Result<Builder, GatewayError> {
    let mut builder = Builder::new(format!("SELECT to_jsonb(t) FROM {table} AS t"));
    push_where(&mut builder, filter)?;
    if let Some(limit) = filter.limit {
        builder.push(format!(" LIMIT {limit}"));
    }
    Ok(builder)
}

fn count_query(table: Table, filter: &Filter) -> Result<Builder, GatewayError> {
    let mut builder = Builder::new(format!("SELECT COUNT(*) FROM {table} AS t"));
    push_where(&mut builder, filter)?;
    Ok(builder)
}

fn delete_query(table: Table, filter: &Filter) -> Result<Builder, GatewayError> {
    if filter.is_unscoped() {
        return Err(GatewayError::UnscopedWrite("delete", table));
    }
    let mut builder = Builder::new(format!("DELETE FROM {table} AS t"));
    push_where(&mut builder, filter)?;
    Ok(builder)
}

fn insert_query(table: Table, row: Row) -> Result<Builder, GatewayError> {
    if row.is_empty() {
        return Err(GatewayError::MalformedRow(format!("empty insert into {table}")));
    }
    validate_columns(row.keys().map(String::as_str))?;
    let columns = row.keys().cloned().collect::<Vec<_>>().join(", ");

    let mut builder = Builder::new(format!(
        "INSERT INTO {table} AS t ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
    ));
    builder.push_bind(Value::Object(row));
    builder.push(") RETURNING to_jsonb(t)");
    Ok(builder)
}

fn update_query(table: Table, filter: &Filter, changes: Row) -> Result<Builder, GatewayError> {
    if filter.is_unscoped() {
        return Err(GatewayError::UnscopedWrite("update", table));
    }
    if changes.is_empty() {
        return Err(GatewayError::MalformedRow(format!("empty update on {table}")));
    }
    validate_columns(changes.keys().map(String::as_str))?;
    let assignments = changes
        .keys()
        .map(|column| format!("{column} = r.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = Builder::new(format!(
        "UPDATE {table} AS t SET {assignments} FROM jsonb_populate_record(NULL::{table}, "
    ));
    builder.push_bind(Value::Object(changes));
    builder.push(") AS r");
    push_where(&mut builder, filter)?;
    Ok(builder)
}

fn push_where(builder: &mut Builder, filter: &Filter) -> Result<(), GatewayError> {
    validate_columns(filter.conditions.iter().map(Condition::column))?;

    for (i, condition) in filter.conditions.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        match condition {
            Condition::Eq(column, value) => {
                builder.push(format!("t.{column} = "));
                push_value(builder, value);
            }
            Condition::IsNull(column) => {
                builder.push(format!("t.{column} IS NULL"));
            }
            Condition::Lt(column, value) => {
                builder.push(format!("t.{column} < "));
                push_value(builder, value);
            }
            Condition::Gte(column, value) => {
                builder.push(format!("t.{column} >= "));
                push_value(builder, value);
            }
            Condition::In(_, values) if values.is_empty() => {
                builder.push("FALSE");
            }
            Condition::In(column, values) => {
                builder.push(format!("t.{column} = ANY("));
                push_array(builder, column, values)?;
                builder.push(")");
            }
        }
    }
    Ok(())
}

fn push_value(builder: &mut Builder, value: &FilterValue) {
    match value.clone() {
        FilterValue::Bool(v) => builder.push_bind(v),
        FilterValue::Int(v) => builder.push_bind(v),
        FilterValue::Text(v) => builder.push_bind(v),
        FilterValue::Uuid(v) => builder.push_bind(v),
        FilterValue::Timestamp(v) => builder.push_bind(v),
    };
}

/// Binds a whole list as one Postgres array, so list length never counts against the
/// bind-parameter limit. Lists must hold a single value type.
fn push_array(
    builder: &mut Builder,
    column: &str,
    values: &[FilterValue],
) -> Result<(), GatewayError> {
    fn collect<T>(
        column: &str,
        values: &[FilterValue],
        pick: impl Fn(&FilterValue) -> Option<T>,
    ) -> Result<Vec<T>, GatewayError> {
        values
            .iter()
            .map(|value| {
                pick(value).ok_or_else(|| {
                    GatewayError::MalformedRow(format!("mixed value types in list for {column}"))
                })
            })
            .collect()
    }

    match values.first() {
        Some(FilterValue::Bool(_)) => builder.push_bind(collect(column, values, |v| match v {
            FilterValue::Bool(b) => Some(*b),
            _ => None,
        })?),
        Some(FilterValue::Int(_)) => builder.push_bind(collect(column, values, |v| match v {
            FilterValue::Int(i) => Some(*i),
            _ => None,
        })?),
        Some(FilterValue::Text(_)) => builder.push_bind(collect(column, values, |v| match v {
            FilterValue::Text(t) => Some(t.clone()),
            _ => None,
        })?),
        Some(FilterValue::Uuid(_)) => builder.push_bind(collect(column, values, |v| match v {
            FilterValue::Uuid(u) => Some(*u),
            _ => None,
        })?),
        Some(FilterValue::Timestamp(_)) => {
            builder.push_bind(collect(column, values, |v| match v {
                FilterValue::Timestamp(ts) => Some(*ts),
                _ => None,
            })?)
        }
        None => builder.push("'{}'"),
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_select_guest_sessions_sql() {
        let filter = Filter::new()
            .is_null("user_id")
            .lt("created_at", Utc::now());
        let builder = select_query(Table::UserSessions, &filter).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT to_jsonb(t) FROM user_sessions AS t WHERE t.user_id IS NULL AND t.created_at < $1"
        );
    }

    #[test]
    fn test_select_with_limit_and_no_conditions() {
        let builder = select_query(Table::Profiles, &Filter::new().limit(1)).unwrap();
        assert_eq!(builder.sql(), "SELECT to_jsonb(t) FROM profiles AS t LIMIT 1");
    }

    #[test]
    fn test_in_list_binds_one_array() {
        let filter = Filter::new()
            .lt("created_at", Utc::now())
            .in_list("user_id", [Uuid::new_v4(), Uuid::new_v4()]);
        let builder = count_query(Table::CvDocuments, &filter).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM cv_documents AS t WHERE t.created_at < $1 AND t.user_id = ANY($2)"
        );
    }

    #[test]
    fn test_huge_in_list_uses_a_single_parameter() {
        let ids: Vec<Uuid> = (0..70_000u128).map(Uuid::from_u128).collect();
        let filter = Filter::new()
            .lt("created_at", Utc::now())
            .in_list("user_id", ids);
        let builder = delete_query(Table::CvAnalyses, &filter).unwrap();
        assert_eq!(
            builder.sql(),
            "DELETE FROM cv_analyses AS t WHERE t.created_at < $1 AND t.user_id = ANY($2)"
        );
    }

    #[test]
    fn test_mixed_in_list_is_rejected() {
        let filter = Filter {
            conditions: vec![Condition::In(
                "id".to_string(),
                vec![FilterValue::from(Uuid::new_v4()), FilterValue::from("x")],
            )],
            limit: None,
        };
        assert!(matches!(
            select_query(Table::Profiles, &filter),
            Err(GatewayError::MalformedRow(_))
        ));
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let filter = Filter::new().in_list::<Uuid, _>("id", vec![]);
        let builder = delete_query(Table::CvDocuments, &filter).unwrap();
        assert_eq!(builder.sql(), "DELETE FROM cv_documents AS t WHERE FALSE");
    }

    #[test]
    fn test_unscoped_writes_are_rejected() {
        assert!(matches!(
            delete_query(Table::CvAnalyses, &Filter::new()),
            Err(GatewayError::UnscopedWrite("delete", Table::CvAnalyses))
        ));
        assert!(matches!(
            update_query(
                Table::Profiles,
                &Filter::new(),
                row(json!({ "subscription_status": "free" }))
            ),
            Err(GatewayError::UnscopedWrite("update", Table::Profiles))
        ));
    }

    #[test]
    fn test_invalid_filter_column_is_rejected() {
        let filter = Filter::new().eq("id = id OR 1", 1_i64);
        assert!(matches!(
            select_query(Table::Profiles, &filter),
            Err(GatewayError::InvalidColumn(_))
        ));
    }

    #[test]
    fn test_insert_lists_only_provided_columns() {
        let builder = insert_query(
            Table::CvDocuments,
            row(json!({ "id": Uuid::new_v4(), "title": "CV", "user_id": Uuid::new_v4() })),
        )
        .unwrap();
        assert_eq!(
            builder.sql(),
            "INSERT INTO cv_documents AS t (id, title, user_id) SELECT id, title, user_id \
             FROM jsonb_populate_record(NULL::cv_documents, $1) RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn test_lock_query_locks_one_row() {
        let builder = lock_query(RowLock {
            table: Table::Profiles,
            id: Uuid::new_v4(),
        });
        assert_eq!(
            builder.sql(),
            "SELECT 1 FROM profiles AS t WHERE t.id = $1 FOR UPDATE"
        );
    }

    #[test]
    fn test_insert_rejects_bad_column_names() {
        let result = insert_query(Table::Profiles, row(json!({ "id); DROP": 1 })));
        assert!(matches!(result, Err(GatewayError::InvalidColumn(_))));
    }

    #[test]
    fn test_update_binds_changes_before_filter() {
        let builder = update_query(
            Table::Profiles,
            &Filter::new().eq("id", Uuid::new_v4()),
            row(json!({ "stripe_customer_id": "cus_1", "subscription_status": "premium" })),
        )
        .unwrap();
        assert_eq!(
            builder.sql(),
            "UPDATE profiles AS t SET stripe_customer_id = r.stripe_customer_id, \
             subscription_status = r.subscription_status \
             FROM jsonb_populate_record(NULL::profiles, $1) AS r WHERE t.id = $2"
        );
    }
}
