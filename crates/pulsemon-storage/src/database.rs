use crate::classify::{classify, sqlstate, NUMERIC_VALUE_OUT_OF_RANGE};
use crate::entities::metric::{Column, Entity};
use crate::error::{Result, StorageError};
use crate::Storage;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use pulsemon_common::retry::{with_retry, Retryability, RetryPolicy};
use pulsemon_common::types::{Metric, MetricKey, MetricPayload};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, EntityTrait, QueryOrder,
    Statement, TransactionTrait,
};

const UPSERT_SQL: &str = "INSERT INTO metrics (id, type, delta, value) VALUES ($1, $2, $3, $4) \
    ON CONFLICT (id, type) DO UPDATE SET \
    value = EXCLUDED.value, \
    delta = metrics.delta + EXCLUDED.delta \
    RETURNING id, type, delta, value";

fn retryability(err: &StorageError) -> Retryability {
    match err {
        StorageError::Database(db) => classify(db),
        _ => Retryability::NonRetryable,
    }
}

/// An out-of-range accumulation becomes [`StorageError::CounterOverflow`].
fn upsert_error(id: &str, err: DbErr) -> StorageError {
    if sqlstate(&err).as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE) {
        StorageError::CounterOverflow { id: id.to_string() }
    } else {
        StorageError::Database(err)
    }
}

async fn upsert<C: ConnectionTrait>(conn: &C, metric: &Metric) -> Result<Metric> {
    let payload = MetricPayload::from(metric.clone());
    let stmt = Statement::from_sql_and_values(
        DbBackend::Postgres,
        UPSERT_SQL,
        [
            payload.id.into(),
            payload.kind.into(),
            payload.delta.into(),
            payload.value.into(),
        ],
    );
    let row = Entity::find()
        .from_raw_sql(stmt)
        .one(conn)
        .await
        .map_err(|e| upsert_error(&metric.id, e))?
        .ok_or(StorageError::Database(DbErr::RecordNotInserted))?;
    row.into_metric()
}

/// PostgreSQL backend. Every operation runs under the retry policy; only
/// errors classified as transient are retried.
pub struct DatabaseStorage {
    db: DatabaseConnection,
    retry: RetryPolicy,
}

impl DatabaseStorage {
    /// Connects (retrying transient failures) and applies pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// A migration failure is returned as [`StorageError::Migration`] and
    /// must abort startup.
    pub async fn connect(dsn: &str, retry: RetryPolicy) -> Result<Self> {
        let db = with_retry(&retry, || Database::connect(dsn), classify).await?;
        Migrator::up(&db, None)
            .await
            .map_err(StorageError::Migration)?;
        tracing::info!("Connected to database, schema up to date");
        Ok(Self { db, retry })
    }

    /// Checks that the database answers.
    pub async fn ping(&self) -> Result<()> {
        self.db.ping().await?;
        Ok(())
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn save(&self, metric: Metric) -> Result<Metric> {
        let metric = &metric;
        with_retry(
            &self.retry,
            move || async move { upsert(&self.db, metric).await },
            retryability,
        )
        .await
    }

    /// Runs the whole batch in one transaction. A failing row drops the
    /// transaction, which rolls every row back.
    async fn save_all(&self, metrics: &[Metric]) -> Result<Vec<Metric>> {
        if metrics.is_empty() {
            return Ok(Vec::new());
        }
        with_retry(
            &self.retry,
            move || async move {
                let txn = self.db.begin().await?;
                let mut saved = Vec::with_capacity(metrics.len());
                for metric in metrics {
                    saved.push(upsert(&txn, metric).await?);
                }
                txn.commit().await?;
                Ok::<_, StorageError>(saved)
            },
            retryability,
        )
        .await
    }

    async fn get(&self, key: &MetricKey) -> Result<Option<Metric>> {
        let row = with_retry(
            &self.retry,
            move || async move {
                Entity::find_by_id((key.id.clone(), key.kind.to_string()))
                    .one(&self.db)
                    .await
                    .map_err(StorageError::from)
            },
            retryability,
        )
        .await?;
        row.map(|r| r.into_metric()).transpose()
    }

    async fn get_all(&self) -> Result<Vec<Metric>> {
        let rows = with_retry(
            &self.retry,
            move || async move {
                Entity::find()
                    .order_by_asc(Column::Id)
                    .all(&self.db)
                    .await
                    .map_err(StorageError::from)
            },
            retryability,
        )
        .await?;
        let mut metrics = rows
            .into_iter()
            .map(|r| r.into_metric())
            .collect::<Result<Vec<_>>>()?;
        metrics.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_upsert_failures_stay_database_errors() {
        let err = upsert_error("requests", DbErr::Custom("boom".into()));
        assert!(matches!(err, StorageError::Database(_)));
        assert_eq!(retryability(&err), Retryability::NonRetryable);
    }

    #[test]
    fn overflow_is_never_retried() {
        let err = StorageError::CounterOverflow { id: "requests".into() };
        assert_eq!(retryability(&err), Retryability::NonRetryable);
    }
}
