use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use offhours_aws::tagging::InfoTagCode;
use offhours_aws::{AssumedRole, InfoTags, RdsScheduler};
use offhours_core::{RegisteredInstance, RequestedAction, Service};

use crate::service::{
    ActionTaken, ExecuteOutcome, ExecuteRequest, ResourceRuntime, ResourceService, ServiceError,
};

/// Whether a registered RDS resource is a cluster, from its ARN.
fn is_cluster(instance: &RegisteredInstance) -> bool {
    instance.arn.resource_type() == "cluster"
}

/// RDS implementation of the per-service adapter, covering DB instances
/// and DB clusters.
pub struct RdsService {
    scheduler: RdsScheduler,
    info_tags: InfoTags,
}

impl RdsService {
    /// Create the adapter for a target's assumed role.
    #[must_use]
    pub fn new(role: &AssumedRole) -> Self {
        Self {
            scheduler: RdsScheduler::new(role),
            info_tags: InfoTags::default(),
        }
    }

    /// Create the adapter over a pre-built scheduler (for testing).
    #[must_use]
    pub fn with_scheduler(scheduler: RdsScheduler) -> Self {
        Self {
            scheduler,
            info_tags: InfoTags::default(),
        }
    }
}

#[async_trait]
impl ResourceService for RdsService {
    fn service(&self) -> Service {
        Service::Rds
    }

    async fn fetch_runtime(
        &self,
        instances: &[RegisteredInstance],
    ) -> Result<HashMap<String, ResourceRuntime>, ServiceError> {
        let mut runtime = HashMap::new();
        for instance in instances {
            let info = self
                .scheduler
                .describe(&instance.resource_id, is_cluster(instance))
                .await?;
            if let Some(info) = info {
                runtime.insert(
                    instance.resource_id.clone(),
                    ResourceRuntime {
                        is_running: info.is_running(),
                        is_stopped: info.is_stopped(),
                        is_schedulable: info.is_schedulable(),
                        current_size: None,
                    },
                );
            }
        }
        Ok(runtime)
    }

    async fn execute(&self, request: &ExecuteRequest<'_>) -> Result<ExecuteOutcome, ServiceError> {
        let id = &request.instance.resource_id;
        let cluster = is_cluster(request.instance);
        let done = |action_taken| ExecuteOutcome::Done {
            action_taken,
            new_stored_state: request.decision.new_stored_state,
            new_last_configured: None,
        };

        match request.decision.action {
            RequestedAction::Start => {
                if request.runtime.is_running {
                    debug!(resource = %id, "already available, nothing to start");
                    return Ok(done(ActionTaken::None));
                }
                self.scheduler.start(id, cluster).await?;
                Ok(done(ActionTaken::Started))
            }
            RequestedAction::Stop => {
                if request.runtime.is_stopped {
                    debug!(resource = %id, "already stopped, nothing to stop");
                    return Ok(done(ActionTaken::None));
                }
                self.scheduler.stop(id, cluster).await?;
                Ok(done(ActionTaken::Stopped))
            }
            RequestedAction::Configure | RequestedAction::DoNothing => {
                Ok(done(ActionTaken::None))
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
        self.scheduler.set_info_tags(&instance.arn, &pairs).await?;
        Ok(())
    }

    async fn clear_error_tags(&self, instance: &RegisteredInstance) -> Result<(), ServiceError> {
        self.scheduler
            .clear_info_tags(&instance.arn, &self.info_tags)
            .await?;
        Ok(())
    }
}
