use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use offhours_aws::tagging::InfoTagCode;
use offhours_aws::AwsError;
use offhours_core::{
    AsgConfiguration, InstanceState, MaintenanceWindow, PeriodDefinition, RegisteredInstance,
    Schedule, ScheduleDefinition, SchedulingDecision, Service,
};

/// Errors from a per-service adapter.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Aws(#[from] AwsError),

    #[error("{0}")]
    Other(String),
}

/// What actually happened to a resource this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    Started,
    Stopped,
    Hibernated,
    Configured,
    None,
}

impl ActionTaken {
    /// Return a string representation of the action taken.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Hibernated => "hibernated",
            Self::Configured => "configured",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of executing one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// The action reached a terminal result; persist this stored state.
    Done {
        action_taken: ActionTaken,
        new_stored_state: InstanceState,
        /// Auto-scaling groups: the refreshed configuration fingerprint.
        new_last_configured: Option<AsgConfiguration>,
    },
    /// The start failed after exhausting the fallback list; persist
    /// `StartFailed` and retry next cycle.
    StartFailed { message: String },
}

/// Snapshot of a resource's actual runtime state, fetched once per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceRuntime {
    pub is_running: bool,
    pub is_stopped: bool,
    /// Whether the resource is in a state the scheduler can act on;
    /// transitional states are skipped until they settle.
    pub is_schedulable: bool,
    /// The current size (instance type, group capacity) when meaningful.
    pub current_size: Option<String>,
}

/// Everything an adapter needs to execute one decision.
pub struct ExecuteRequest<'a> {
    pub instance: &'a RegisteredInstance,
    pub runtime: &'a ResourceRuntime,
    pub decision: &'a SchedulingDecision,
    pub schedule: &'a Schedule,
    /// The raw definitions behind `schedule`; the auto-scaling adapter
    /// hashes and compiles these.
    pub schedule_definition: &'a ScheduleDefinition,
    pub period_definitions: &'a [PeriodDefinition],
    /// The size the authoritative period requested, if any.
    pub desired_size: Option<&'a str>,
    pub current_dt: DateTime<Utc>,
}

/// A per-service adapter: runtime lookup, action execution, and
/// informational tagging for one `(account, region, service)` target.
#[async_trait]
pub trait ResourceService: Send + Sync {
    /// The service this adapter covers.
    fn service(&self) -> Service;

    /// Fetch runtime info for the given resources, keyed by resource id.
    /// A resource absent from the result no longer exists (or is invisible
    /// right now); the runner logs and skips it without deregistering.
    async fn fetch_runtime(
        &self,
        instances: &[RegisteredInstance],
    ) -> Result<HashMap<String, ResourceRuntime>, ServiceError>;

    /// Execute one decision against the provider.
    async fn execute(&self, request: &ExecuteRequest<'_>) -> Result<ExecuteOutcome, ServiceError>;

    /// Tag a resource with an informational error.
    async fn tag_error(
        &self,
        instance: &RegisteredInstance,
        code: InfoTagCode,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    /// Remove informational error tags from a healthy resource.
    async fn clear_error_tags(&self, instance: &RegisteredInstance) -> Result<(), ServiceError>;
}

/// A source of provider-reported maintenance windows for one target.
/// Abstracted so runners can be driven in tests without a provider.
#[async_trait]
pub trait MaintenanceWindowSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<MaintenanceWindow>, ServiceError>;
}

/// A source that reports no windows; used for services and tests that do
/// not consult maintenance windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMaintenanceWindows;

#[async_trait]
impl MaintenanceWindowSource for NoMaintenanceWindows {
    async fn fetch(&self) -> Result<Vec<MaintenanceWindow>, ServiceError> {
        Ok(Vec::new())
    }
}
