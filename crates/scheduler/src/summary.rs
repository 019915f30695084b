use serde::{Deserialize, Serialize};

use offhours_aws::{InstanceCountMetric, SchedulingActionEvent};
use offhours_core::{InstanceState, RegisteredInstance, RequestedAction};

use crate::service::ActionTaken;

/// The result of processing one resource in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub resource_id: String,
    pub arn: String,
    pub service: String,
    pub schedule: String,
    pub requested_action: RequestedAction,
    pub action_taken: ActionTaken,
    pub new_stored_state: InstanceState,
    pub reason: String,
    /// The error that interrupted this resource, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The size the resource currently has, for operational counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_size: Option<String>,
}

impl SchedulingResult {
    /// Build a result scaffold for a resource and decision.
    #[must_use]
    pub fn for_instance(
        instance: &RegisteredInstance,
        requested_action: RequestedAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: instance.resource_id.clone(),
            arn: instance.arn.as_str().to_owned(),
            service: instance.arn.service().to_owned(),
            schedule: instance.schedule.clone(),
            requested_action,
            action_taken: ActionTaken::None,
            new_stored_state: instance.stored_state,
            reason: reason.into(),
            error: None,
            current_size: None,
        }
    }

    /// The event emitted for this result.
    #[must_use]
    pub fn to_event(&self, account: &str, region: &str) -> SchedulingActionEvent {
        SchedulingActionEvent {
            account: account.to_owned(),
            region: region.to_owned(),
            service: self.service.clone(),
            resource_id: self.resource_id.clone(),
            requested_action: self.requested_action.as_str().to_owned(),
            action_taken: self.action_taken.as_str().to_owned(),
            schedule: self.schedule.clone(),
            resource_arn: self.arn.clone(),
        }
    }
}

/// Everything that happened in one runner invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingSummary {
    pub results: Vec<SchedulingResult>,
    /// Resources skipped without a decision (unschedulable state, missing
    /// runtime info, deadline), with the reason.
    pub skipped: Vec<(String, String)>,
    /// Whether the runner ran out of wall-clock budget before finishing.
    pub deadline_exceeded: bool,
}

impl SchedulingSummary {
    /// Results where an action was actually performed.
    #[must_use]
    pub fn actions_taken(&self) -> impl Iterator<Item = &SchedulingResult> {
        self.results
            .iter()
            .filter(|r| r.action_taken != ActionTaken::None && r.error.is_none())
    }

    /// Per-(type, state) instance counts for the operational metrics
    /// publisher.
    #[must_use]
    pub fn instance_counts(&self) -> Vec<InstanceCountMetric> {
        let mut counts: std::collections::BTreeMap<(String, String, String), usize> =
            std::collections::BTreeMap::new();
        for result in &self.results {
            let key = (
                result.service.clone(),
                result
                    .current_size
                    .clone()
                    .unwrap_or_else(|| "unknown".to_owned()),
                result.new_stored_state.as_str().to_owned(),
            );
            *counts.entry(key).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|((service, instance_type, state), count)| InstanceCountMetric {
                service,
                instance_type,
                state,
                count,
            })
            .collect()
    }
}
