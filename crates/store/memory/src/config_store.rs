use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use offhours_core::{PeriodDefinition, ScheduleDefinition};
use offhours_store::{PeriodStore, ScheduleStore, StoreError};

/// In-memory schedule and period store.
///
/// One type implements both traits because the durable backend keeps both
/// row kinds in a single table, and a runner hydrates both from the same
/// payload.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    schedules: RwLock<HashMap<String, ScheduleDefinition>>,
    periods: RwLock<HashMap<String, PeriodDefinition>>,
}

impl InMemoryConfigStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded from deserialized payload lists.
    #[must_use]
    pub fn preloaded(
        schedules: impl IntoIterator<Item = ScheduleDefinition>,
        periods: impl IntoIterator<Item = PeriodDefinition>,
    ) -> Self {
        Self {
            schedules: RwLock::new(
                schedules
                    .into_iter()
                    .map(|def| (def.name.clone(), def))
                    .collect(),
            ),
            periods: RwLock::new(
                periods
                    .into_iter()
                    .map(|def| (def.name.clone(), def))
                    .collect(),
            ),
        }
    }

    fn poisoned(context: &str) -> StoreError {
        StoreError::Unavailable(format!("in-memory config store lock poisoned: {context}"))
    }
}

#[async_trait]
impl ScheduleStore for InMemoryConfigStore {
    async fn find_schedule(&self, name: &str) -> Result<Option<ScheduleDefinition>, StoreError> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| Self::poisoned("schedules"))?;
        Ok(schedules.get(name).cloned())
    }

    async fn find_all_schedules(&self) -> Result<HashMap<String, ScheduleDefinition>, StoreError> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| Self::poisoned("schedules"))?;
        Ok(schedules.clone())
    }

    async fn put_schedule(
        &self,
        definition: &ScheduleDefinition,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let mut schedules = self
            .schedules
            .write()
            .map_err(|_| Self::poisoned("schedules"))?;
        if !overwrite && schedules.contains_key(&definition.name) {
            return Err(StoreError::ConditionalCheckFailed(format!(
                "schedule {}",
                definition.name
            )));
        }
        schedules.insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    async fn delete_schedule(&self, name: &str) -> Result<(), StoreError> {
        let mut schedules = self
            .schedules
            .write()
            .map_err(|_| Self::poisoned("schedules"))?;
        schedules.remove(name);
        Ok(())
    }
}

#[async_trait]
impl PeriodStore for InMemoryConfigStore {
    async fn find_period(&self, name: &str) -> Result<Option<PeriodDefinition>, StoreError> {
        let periods = self.periods.read().map_err(|_| Self::poisoned("periods"))?;
        Ok(periods.get(name).cloned())
    }

    async fn find_all_periods(&self) -> Result<HashMap<String, PeriodDefinition>, StoreError> {
        let periods = self.periods.read().map_err(|_| Self::poisoned("periods"))?;
        Ok(periods.clone())
    }

    async fn put_period(
        &self,
        definition: &PeriodDefinition,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let mut periods = self.periods.write().map_err(|_| Self::poisoned("periods"))?;
        if !overwrite && periods.contains_key(&definition.name) {
            return Err(StoreError::ConditionalCheckFailed(format!(
                "period {}",
                definition.name
            )));
        }
        periods.insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    async fn delete_period(&self, name: &str) -> Result<(), StoreError> {
        let mut periods = self.periods.write().map_err(|_| Self::poisoned("periods"))?;
        periods.remove(name);
        Ok(())
    }
}
