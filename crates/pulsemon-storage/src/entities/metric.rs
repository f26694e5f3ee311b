use pulsemon_common::types::{Metric, MetricPayload};
use sea_orm::entity::prelude::*;

use crate::error::StorageError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(primary_key, auto_increment = false, column_name = "type")]
    pub kind: String,
    pub delta: Option<i64>,
    pub value: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Converts a row into a domain metric, rejecting rows whose type or
    /// value column does not describe a metric.
    pub fn into_metric(self) -> Result<Metric, StorageError> {
        let id = self.id.clone();
        Metric::try_from(MetricPayload {
            id: self.id,
            kind: self.kind,
            delta: self.delta,
            value: self.value,
            hash: None,
        })
        .map_err(|e| StorageError::InvalidRow {
            id,
            reason: e.to_string(),
        })
    }
}
