use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;

use offhours_core::{
    InvalidScheduleDefinition, PeriodDefinition, Schedule, ScheduleDefinition, Service,
};
use offhours_store::{PeriodStore, ScheduleStore, StoreError};
use offhours_store_memory::InMemoryConfigStore;

use crate::request::SchedulingRequest;

/// The working set of one runner invocation: the target's identity, the
/// scheduling instant, and the schedule/period definitions hydrated either
/// from the request payload or from the durable store.
///
/// Resolution results are not cached across resources on purpose; a cycle
/// resolves each schedule at most a handful of times and the definitions
/// are immutable for its duration.
pub struct SchedulingContext {
    pub account: String,
    pub region: String,
    pub service: Service,
    pub current_dt: DateTime<Utc>,
    pub scheduling_interval_minutes: u32,
    pub default_timezone: Tz,
    schedules: HashMap<String, ScheduleDefinition>,
    periods: HashMap<String, PeriodDefinition>,
}

impl SchedulingContext {
    /// Hydrate a context for a request: from the inlined stores when
    /// present, otherwise from the durable store.
    pub async fn hydrate(
        request: &SchedulingRequest,
        durable_schedules: &Arc<dyn ScheduleStore>,
        durable_periods: &Arc<dyn PeriodStore>,
        scheduling_interval_minutes: u32,
        default_timezone: Tz,
    ) -> Result<Self, StoreError> {
        let (schedules, periods) = match (&request.schedules, &request.periods) {
            (Some(schedules), Some(periods)) => {
                debug!(
                    schedules = schedules.len(),
                    periods = periods.len(),
                    "hydrating working set from request payload"
                );
                let store =
                    InMemoryConfigStore::preloaded(schedules.clone(), periods.clone());
                (
                    store.find_all_schedules().await?,
                    store.find_all_periods().await?,
                )
            }
            _ => {
                debug!("request omitted inline stores, hydrating from durable store");
                (
                    durable_schedules.find_all_schedules().await?,
                    durable_periods.find_all_periods().await?,
                )
            }
        };

        Ok(Self {
            account: request.account.clone(),
            region: request.region.clone(),
            service: request.service,
            current_dt: request.current_dt,
            scheduling_interval_minutes,
            default_timezone,
            schedules,
            periods,
        })
    }

    /// Build a context directly from definition maps (tests and the
    /// registration path).
    #[must_use]
    pub fn from_definitions(
        account: impl Into<String>,
        region: impl Into<String>,
        service: Service,
        current_dt: DateTime<Utc>,
        scheduling_interval_minutes: u32,
        default_timezone: Tz,
        schedules: HashMap<String, ScheduleDefinition>,
        periods: HashMap<String, PeriodDefinition>,
    ) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            service,
            current_dt,
            scheduling_interval_minutes,
            default_timezone,
            schedules,
            periods,
        }
    }

    /// The schedule definition with the given name, if any.
    #[must_use]
    pub fn schedule_definition(&self, name: &str) -> Option<&ScheduleDefinition> {
        self.schedules.get(name)
    }

    /// The period definition with the given name, if any.
    #[must_use]
    pub fn period_definition(&self, name: &str) -> Option<&PeriodDefinition> {
        self.periods.get(name)
    }

    /// All schedule definitions in the working set.
    #[must_use]
    pub fn schedules(&self) -> &HashMap<String, ScheduleDefinition> {
        &self.schedules
    }

    /// The period definitions referenced by a schedule, in reference order.
    #[must_use]
    pub fn periods_of(&self, definition: &ScheduleDefinition) -> Vec<PeriodDefinition> {
        definition
            .periods
            .iter()
            .filter_map(|period_ref| self.periods.get(&period_ref.name).cloned())
            .collect()
    }

    /// Resolve a schedule by name into its evaluator object.
    pub fn resolve_schedule(&self, name: &str) -> Result<Schedule, InvalidScheduleDefinition> {
        let definition = self
            .schedules
            .get(name)
            .ok_or_else(|| InvalidScheduleDefinition::UnknownSchedule(name.to_owned()))?;
        definition.to_schedule(
            |period_name| self.periods.get(period_name).cloned(),
            self.default_timezone,
        )
    }

    /// Every maintenance-window name referenced by any schedule in the
    /// working set. Drives the reconciliation filter.
    #[must_use]
    pub fn referenced_window_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schedules
            .values()
            .filter_map(|definition| definition.maintenance_windows.as_ref())
            .flatten()
            .cloned()
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
