use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use offhours_aws::tagging::InfoTagCode;
use offhours_aws::{AssumedRole, Ec2Scheduler, InfoTags};
use offhours_core::{InstanceState, RegisteredInstance, RequestedAction, Service};

use crate::service::{
    ActionTaken, ExecuteOutcome, ExecuteRequest, ResourceRuntime, ResourceService, ServiceError,
};

/// EC2 implementation of the per-service adapter.
pub struct Ec2Service {
    scheduler: Ec2Scheduler,
    info_tags: InfoTags,
}

impl Ec2Service {
    /// Create the adapter for a target's assumed role.
    #[must_use]
    pub fn new(role: &AssumedRole) -> Self {
        Self {
            scheduler: Ec2Scheduler::new(role),
            info_tags: InfoTags::default(),
        }
    }

    /// Create the adapter over a pre-built scheduler (for testing).
    #[must_use]
    pub fn with_scheduler(scheduler: Ec2Scheduler) -> Self {
        Self {
            scheduler,
            info_tags: InfoTags::default(),
        }
    }
}

/// The prioritized instance-type list from a requested size. A size is
/// either a single type or a comma-separated fallback list tried in order
/// on insufficient capacity.
fn type_preferences(desired_size: Option<&str>) -> Vec<String> {
    desired_size
        .map(|size| {
            size.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ResourceService for Ec2Service {
    fn service(&self) -> Service {
        Service::Ec2
    }

    async fn fetch_runtime(
        &self,
        instances: &[RegisteredInstance],
    ) -> Result<HashMap<String, ResourceRuntime>, ServiceError> {
        let ids: Vec<String> = instances.iter().map(|i| i.resource_id.clone()).collect();
        let infos = self.scheduler.describe(&ids).await?;
        Ok(infos
            .into_iter()
            .map(|info| {
                (
                    info.instance_id.clone(),
                    ResourceRuntime {
                        is_running: info.is_running(),
                        is_stopped: info.is_stopped(),
                        is_schedulable: info.is_schedulable(),
                        current_size: Some(info.instance_type),
                    },
                )
            })
            .collect())
    }

    async fn execute(&self, request: &ExecuteRequest<'_>) -> Result<ExecuteOutcome, ServiceError> {
        let id = &request.instance.resource_id;
        let done = |action_taken, new_stored_state| ExecuteOutcome::Done {
            action_taken,
            new_stored_state,
            new_last_configured: None,
        };

        match request.decision.action {
            RequestedAction::Start => {
                if request.runtime.is_running {
                    debug!(resource = %id, "already running, nothing to start");
                    return Ok(done(ActionTaken::None, request.decision.new_stored_state));
                }

                let preferences = type_preferences(request.desired_size);
                let current_type = request.runtime.current_size.as_deref().unwrap_or_default();
                match self
                    .scheduler
                    .start_with_type_fallback(id, current_type, &preferences)
                    .await
                {
                    Ok(started_type) => {
                        if started_type != current_type {
                            // The size was rewritten before starting.
                            Ok(done(ActionTaken::Configured, InstanceState::Configured))
                        } else {
                            Ok(done(ActionTaken::Started, request.decision.new_stored_state))
                        }
                    }
                    Err(e) if e.is_insufficient_capacity() => {
                        Ok(ExecuteOutcome::StartFailed {
                            message: e.to_string(),
                        })
                    }
                    Err(e) => Err(e.into()),
                }
            }
            RequestedAction::Stop => {
                if request.runtime.is_stopped {
                    debug!(resource = %id, "already stopped, nothing to stop");
                    return Ok(done(ActionTaken::None, request.decision.new_stored_state));
                }
                let hibernate = request.schedule.hibernate;
                self.scheduler.stop(&[id.clone()], hibernate).await?;
                let taken = if hibernate {
                    ActionTaken::Hibernated
                } else {
                    ActionTaken::Stopped
                };
                Ok(done(taken, request.decision.new_stored_state))
            }
            RequestedAction::Configure | RequestedAction::DoNothing => {
                Ok(done(ActionTaken::None, request.decision.new_stored_state))
            }
        }
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
            .set_info_tags(&[instance.resource_id.clone()], &pairs)
            .await?;
        Ok(())
    }

    async fn clear_error_tags(&self, instance: &RegisteredInstance) -> Result<(), ServiceError> {
        self.scheduler
            .clear_info_tags(&[instance.resource_id.clone()], &self.info_tags)
            .await?;
        Ok(())
    }
}
