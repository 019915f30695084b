use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use offhours_aws::asg::{ACTION_TTL_DAYS, check_compatibility, compute_schedule_hash};
use offhours_aws::tagging::InfoTagCode;
use offhours_aws::{AsgRuntimeInfo, AsgScheduler, AssumedRole, InfoTags};
use offhours_core::{
    AsgConfiguration, AsgSize, InstanceState, RegisteredInstance, Service,
};

use crate::service::{
    ActionTaken, ExecuteOutcome, ExecuteRequest, ResourceRuntime, ResourceService, ServiceError,
};

/// Tag recording a group's running size (`min-desired-max`), written at
/// registration so the size survives the group being scaled to zero.
pub const SIZE_TAG_KEY: &str = "offhours:min-desired-max";

/// Auto Scaling implementation of the per-service adapter.
///
/// Groups are not started or stopped per cycle. Their schedule is compiled
/// into recurring scheduled actions owned by the group; the adapter only
/// rewrites them when the schedule hash changed or the sliding TTL
/// expired. Every decision routes through [`execute`](ResourceService),
/// which reduces to that staleness check.
pub struct AsgService {
    scheduler: AsgScheduler,
    info_tags: InfoTags,
    rule_prefix: String,
    /// Groups described this cycle, kept for size resolution in `execute`.
    groups: Mutex<HashMap<String, AsgRuntimeInfo>>,
}

impl AsgService {
    /// Create the adapter for a target's assumed role.
    #[must_use]
    pub fn new(role: &AssumedRole, rule_prefix: impl Into<String>) -> Self {
        Self {
            scheduler: AsgScheduler::new(role),
            info_tags: InfoTags::default(),
            rule_prefix: rule_prefix.into(),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create the adapter over a pre-built scheduler (for testing).
    #[must_use]
    pub fn with_scheduler(scheduler: AsgScheduler, rule_prefix: impl Into<String>) -> Self {
        Self {
            scheduler,
            info_tags: InfoTags::default(),
            rule_prefix: rule_prefix.into(),
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// The size scheduled start actions restore the group to: the size
    /// snapshot tag when present, otherwise the group's current size when
    /// it is not scaled to zero.
    fn running_size(group: &AsgRuntimeInfo) -> Option<AsgSize> {
        if let Some(tagged) = group
            .tags
            .get(SIZE_TAG_KEY)
            .and_then(|value| AsgSize::from_tag_value(value))
        {
            return Some(tagged);
        }
        if group.size.is_stopped() {
            None
        } else {
            Some(group.size)
        }
    }
}

#[async_trait]
impl ResourceService for AsgService {
    fn service(&self) -> Service {
        Service::Autoscaling
    }

    async fn fetch_runtime(
        &self,
        instances: &[RegisteredInstance],
    ) -> Result<HashMap<String, ResourceRuntime>, ServiceError> {
        let names: Vec<String> = instances.iter().map(|i| i.resource_id.clone()).collect();
        let groups = self.scheduler.describe(&names).await?;

        let mut runtime = HashMap::new();
        let mut cache = HashMap::new();
        for group in groups {
            runtime.insert(
                group.name.clone(),
                ResourceRuntime {
                    is_running: !group.size.is_stopped(),
                    is_stopped: group.size.is_stopped(),
                    is_schedulable: true,
                    current_size: Some(group.size.to_tag_value()),
                },
            );
            cache.insert(group.name.clone(), group);
        }
        *self.groups.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = cache;
        Ok(runtime)
    }

    async fn execute(&self, request: &ExecuteRequest<'_>) -> Result<ExecuteOutcome, ServiceError> {
        let group_name = &request.instance.resource_id;

        let schedule_hash =
            compute_schedule_hash(request.schedule_definition, request.period_definitions);

        // Unchanged schedule within the TTL: the existing scheduled
        // actions keep driving the group.
        if let Some(config) = &request.instance.last_configured {
            if config.is_current(&schedule_hash, request.current_dt) {
                debug!(group = %group_name, "scheduled actions are current");
                return Ok(ExecuteOutcome::Done {
                    action_taken: ActionTaken::None,
                    new_stored_state: InstanceState::Configured,
                    new_last_configured: None,
                });
            }
        }

        if let Err(reason) =
            check_compatibility(request.schedule_definition, request.period_definitions)
        {
            self.tag_error(
                request.instance,
                InfoTagCode::IncompatibleSchedule,
                &reason,
                request.current_dt,
            )
            .await?;
            return Err(ServiceError::Other(format!(
                "schedule {} is incompatible with scheduled actions: {reason}",
                request.schedule.name
            )));
        }

        let group = self
            .groups
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(group_name)
            .cloned();
        let Some(group) = group else {
            return Err(ServiceError::Other(format!(
                "group {group_name} was not described this cycle"
            )));
        };
        let Some(running_size) = Self::running_size(&group) else {
            return Err(ServiceError::Other(format!(
                "group {group_name} has no recorded running size; tag it with {SIZE_TAG_KEY}"
            )));
        };

        self.scheduler
            .configure_schedule(
                group_name,
                request.schedule_definition,
                request.period_definitions,
                running_size,
                &self.rule_prefix,
            )
            .await?;

        info!(group = %group_name, schedule = %request.schedule.name, "group reconfigured");
        Ok(ExecuteOutcome::Done {
            action_taken: ActionTaken::Configured,
            new_stored_state: InstanceState::Configured,
            new_last_configured: Some(AsgConfiguration {
                last_updated: request.current_dt,
                min_size: running_size.min_size,
                desired_size: running_size.desired_size,
                max_size: running_size.max_size,
                schedule_hash,
                valid_until: request.current_dt + Duration::days(ACTION_TTL_DAYS),
            }),
        })
    }

    async fn tag_error(
        &self,
        instance: &RegisteredInstance,
        code: InfoTagCode,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let pairs = self.info_tags.error_pairs(code, message, now);
        self.scheduler
            .set_tags(&instance.resource_id, &pairs)
            .await?;
        Ok(())
    }

    async fn clear_error_tags(&self, instance: &RegisteredInstance) -> Result<(), ServiceError> {
        self.scheduler
            .delete_tags(&instance.resource_id, &self.info_tags.clear_keys())
            .await?;
        Ok(())
    }
}
