use std::collections::HashMap;

use async_trait::async_trait;

use offhours_core::{PeriodDefinition, ScheduleDefinition};

use crate::error::StoreError;

/// Persistent store of schedule definitions, keyed by name.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Fetch one schedule by name. `Ok(None)` when it does not exist.
    async fn find_schedule(&self, name: &str) -> Result<Option<ScheduleDefinition>, StoreError>;

    /// Fetch every schedule, keyed by name.
    async fn find_all_schedules(&self) -> Result<HashMap<String, ScheduleDefinition>, StoreError>;

    /// Write a schedule. With `overwrite = false` an existing row fails with
    /// [`StoreError::ConditionalCheckFailed`].
    async fn put_schedule(
        &self,
        definition: &ScheduleDefinition,
        overwrite: bool,
    ) -> Result<(), StoreError>;

    /// Delete a schedule by name. Deleting a missing row is not an error.
    async fn delete_schedule(&self, name: &str) -> Result<(), StoreError>;
}

/// Persistent store of period definitions, keyed by name.
#[async_trait]
pub trait PeriodStore: Send + Sync {
    /// Fetch one period by name. `Ok(None)` when it does not exist.
    async fn find_period(&self, name: &str) -> Result<Option<PeriodDefinition>, StoreError>;

    /// Fetch every period, keyed by name.
    async fn find_all_periods(&self) -> Result<HashMap<String, PeriodDefinition>, StoreError>;

    /// Write a period. With `overwrite = false` an existing row fails with
    /// [`StoreError::ConditionalCheckFailed`].
    async fn put_period(
        &self,
        definition: &PeriodDefinition,
        overwrite: bool,
    ) -> Result<(), StoreError>;

    /// Delete a period by name. Deleting a missing row is not an error.
    async fn delete_period(&self, name: &str) -> Result<(), StoreError>;
}
