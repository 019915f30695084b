use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use offhours_aws::tagging::InfoTagCode;
use offhours_aws::{OpsMetrics, SchedulingEventBus};
use offhours_core::{RegisteredInstance, RequestedAction, make_decision};
use offhours_store::{MaintenanceWindowStore, ResourceRegistry, StoreError};

use crate::context::SchedulingContext;
use crate::events::EventsBuffer;
use crate::maint_win::MaintenanceWindowContext;
use crate::service::{
    ActionTaken, ExecuteOutcome, ExecuteRequest, MaintenanceWindowSource, ResourceService,
    ServiceError,
};
use crate::summary::{SchedulingResult, SchedulingSummary};

/// Errors fatal to a whole target. Anything scoped to a single resource is
/// recorded in the summary instead.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("runtime lookup failed: {0}")]
    RuntimeLookup(ServiceError),
}

/// Processes one `(account, region, service)` target to completion.
///
/// Runners for different targets are independent and safe to run in
/// parallel; within one runner, resources are processed sequentially and
/// the registry write for a resource always happens after its action's
/// terminal result.
pub struct TargetRunner {
    context: SchedulingContext,
    registry: Arc<dyn ResourceRegistry>,
    mw_store: Arc<dyn MaintenanceWindowStore>,
    mw_source: Arc<dyn MaintenanceWindowSource>,
    adapter: Arc<dyn ResourceService>,
    event_buses: Vec<Arc<SchedulingEventBus>>,
    metrics: Option<Arc<OpsMetrics>>,
    /// Wall-clock budget; when exhausted mid-cycle the runner stops issuing
    /// provider calls and returns a partial summary.
    deadline: Option<Instant>,
    /// Optional subset filter from the request.
    schedule_names: Option<Vec<String>>,
}

impl TargetRunner {
    #[must_use]
    pub fn new(
        context: SchedulingContext,
        registry: Arc<dyn ResourceRegistry>,
        mw_store: Arc<dyn MaintenanceWindowStore>,
        mw_source: Arc<dyn MaintenanceWindowSource>,
        adapter: Arc<dyn ResourceService>,
    ) -> Self {
        Self {
            context,
            registry,
            mw_store,
            mw_source,
            adapter,
            event_buses: Vec::new(),
            metrics: None,
            deadline: None,
            schedule_names: None,
        }
    }

    /// Attach event buses flushed after the cycle's registry writes.
    #[must_use]
    pub fn with_event_buses(mut self, buses: Vec<Arc<SchedulingEventBus>>) -> Self {
        self.event_buses = buses;
        self
    }

    /// Attach the operational metrics publisher.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<OpsMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the wall-clock deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Restrict processing to resources tagged with one of these schedules.
    #[must_use]
    pub fn with_schedule_names(mut self, names: Option<Vec<String>>) -> Self {
        self.schedule_names = names;
        self
    }

    fn out_of_budget(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Run the cycle for this target.
    #[instrument(skip(self), fields(
        account = %self.context.account,
        region = %self.context.region,
        service = %self.context.service,
    ))]
    pub async fn run(&self) -> Result<SchedulingSummary, RunnerError> {
        let mut instances = self
            .registry
            .find_by_target(
                &self.context.account,
                &self.context.region,
                self.context.service,
            )
            .await?;
        if let Some(names) = &self.schedule_names {
            instances.retain(|instance| names.contains(&instance.schedule));
        }
        instances.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));

        if instances.is_empty() {
            debug!("no registered resources for target");
            return Ok(SchedulingSummary::default());
        }
        info!(count = instances.len(), "processing registered resources");

        // Reconciliation must complete before any decision that might
        // consult the windows.
        let mw_context = self.reconcile_windows().await?;

        let runtime = self
            .adapter
            .fetch_runtime(&instances)
            .await
            .map_err(RunnerError::RuntimeLookup)?;

        let mut summary = SchedulingSummary::default();
        let mut events = EventsBuffer::new();

        for instance in &instances {
            if self.out_of_budget() {
                summary.deadline_exceeded = true;
                summary.skipped.push((
                    instance.resource_id.clone(),
                    "wall-clock budget exhausted".to_owned(),
                ));
                continue;
            }
            self.process_instance(instance, &runtime, &mw_context, &mut summary, &mut events)
                .await;
        }

        // Events and metrics follow the registry writes.
        events.flush(&self.event_buses).await;
        if let Some(metrics) = &self.metrics {
            let counts = summary.instance_counts();
            if let Err(e) = metrics.publish_instance_counts(&counts).await {
                warn!(error = %e, "failed to publish instance counts");
            }
        }

        info!(
            results = summary.results.len(),
            skipped = summary.skipped.len(),
            deadline_exceeded = summary.deadline_exceeded,
            "target cycle complete"
        );
        Ok(summary)
    }

    async fn reconcile_windows(&self) -> Result<MaintenanceWindowContext, RunnerError> {
        let referenced = self.context.referenced_window_names();
        if referenced.is_empty() {
            return Ok(MaintenanceWindowContext::from_windows(Vec::new()));
        }

        match self.mw_source.fetch().await {
            Ok(provider_windows) => Ok(MaintenanceWindowContext::reconcile(
                &self.mw_store,
                provider_windows,
                &referenced,
                &self.context.account,
                &self.context.region,
                self.context.current_dt,
                self.context.scheduling_interval_minutes,
            )
            .await?),
            Err(e) => {
                // A transient provider failure must not delete mirrored
                // rows; fall back to the mirror as-is.
                warn!(error = %e, "maintenance-window fetch failed, using mirror only");
                let mirrored = self
                    .mw_store
                    .find_by_account_region(&self.context.account, &self.context.region)
                    .await?;
                Ok(MaintenanceWindowContext::from_windows(mirrored))
            }
        }
    }

    async fn process_instance(
        &self,
        instance: &RegisteredInstance,
        runtime: &HashMap<String, crate::service::ResourceRuntime>,
        mw_context: &MaintenanceWindowContext,
        summary: &mut SchedulingSummary,
        events: &mut EventsBuffer,
    ) {
        let Some(runtime_info) = runtime.get(&instance.resource_id) else {
            // Possibly mid-transition or recently terminated; the registry
            // row is kept and the next cycle retries.
            warn!(resource = %instance.resource_id, "no runtime info, skipping");
            summary.skipped.push((
                instance.resource_id.clone(),
                "no runtime info returned by provider".to_owned(),
            ));
            return;
        };
        if !runtime_info.is_schedulable {
            debug!(resource = %instance.resource_id, "not in a schedulable state, skipping");
            summary.skipped.push((
                instance.resource_id.clone(),
                "not in a schedulable state".to_owned(),
            ));
            return;
        }

        let Some(definition) = self.context.schedule_definition(&instance.schedule) else {
            warn!(
                resource = %instance.resource_id,
                schedule = %instance.schedule,
                "schedule not found, tagging resource"
            );
            if let Err(e) = self
                .adapter
                .tag_error(
                    instance,
                    InfoTagCode::UnknownSchedule,
                    &format!("no schedule named {}", instance.schedule),
                    self.context.current_dt,
                )
                .await
            {
                warn!(error = %e, "failed to apply informational tag");
            }
            summary.skipped.push((
                instance.resource_id.clone(),
                format!("unknown schedule {}", instance.schedule),
            ));
            return;
        };
        let period_definitions = self.context.periods_of(definition);

        let schedule = match self.context.resolve_schedule(&instance.schedule) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(
                    resource = %instance.resource_id,
                    schedule = %instance.schedule,
                    error = %e,
                    "schedule failed to resolve, skipping"
                );
                summary
                    .skipped
                    .push((instance.resource_id.clone(), e.to_string()));
                return;
            }
        };

        let mw_schedules = mw_context.schedules_for(
            &schedule.maintenance_windows,
            self.context.scheduling_interval_minutes,
        );

        let decision = make_decision(
            instance.stored_state,
            &schedule,
            self.context.current_dt,
            &mw_schedules,
        );
        debug!(
            resource = %instance.resource_id,
            action = %decision.action,
            new_state = %decision.new_stored_state,
            reason = %decision.reason,
            "decision made"
        );

        let desired_size = schedule
            .desired_state(self.context.current_dt)
            .desired_size;

        let mut result =
            SchedulingResult::for_instance(instance, decision.action, decision.reason.clone());
        result.current_size = runtime_info.current_size.clone();

        if decision.action == RequestedAction::DoNothing
            && self.context.service != offhours_core::Service::Autoscaling
        {
            // No provider call, but marker transitions
            // (e.g. retain-running) still rewrite the stored state.
            result.new_stored_state = decision.new_stored_state;
            if decision.new_stored_state != instance.stored_state {
                if let Err(e) = self.persist_state(instance, decision.new_stored_state).await {
                    result.error = Some(e.to_string());
                }
            }
            if result.error.is_none() {
                self.clear_error_tags(instance).await;
            }
            summary.results.push(result);
            return;
        }

        let request = ExecuteRequest {
            instance,
            runtime: runtime_info,
            decision: &decision,
            schedule: &schedule,
            schedule_definition: definition,
            period_definitions: &period_definitions,
            desired_size: desired_size.as_deref(),
            current_dt: self.context.current_dt,
        };

        match self.adapter.execute(&request).await {
            Ok(ExecuteOutcome::Done {
                action_taken,
                new_stored_state,
                new_last_configured,
            }) => {
                result.action_taken = action_taken;
                result.new_stored_state = new_stored_state;

                let persisted = if new_last_configured.is_some() {
                    let mut updated = instance.clone();
                    updated.stored_state = new_stored_state;
                    updated.last_configured = new_last_configured;
                    self.registry.put(&updated, true).await
                } else if new_stored_state == instance.stored_state {
                    Ok(())
                } else {
                    self.persist_state(instance, new_stored_state).await
                };
                if let Err(e) = persisted {
                    warn!(resource = %instance.resource_id, error = %e, "failed to persist stored state");
                    result.error = Some(e.to_string());
                }

                if result.error.is_none() {
                    if action_taken != ActionTaken::None {
                        events.push(result.to_event(&self.context.account, &self.context.region));
                    }
                    self.clear_error_tags(instance).await;
                }
            }
            Ok(ExecuteOutcome::StartFailed { message }) => {
                warn!(resource = %instance.resource_id, error = %message, "start failed, will retry next cycle");
                result.new_stored_state = offhours_core::InstanceState::StartFailed;
                result.error = Some(message);
                if let Err(e) = self
                    .persist_state(instance, offhours_core::InstanceState::StartFailed)
                    .await
                {
                    warn!(resource = %instance.resource_id, error = %e, "failed to persist start-failed state");
                }
            }
            Err(e) => {
                // The provider call failed; the stored state is not
                // advanced so the next cycle retries the same action.
                warn!(resource = %instance.resource_id, error = %e, "action failed");
                result.new_stored_state = instance.stored_state;
                result.error = Some(e.to_string());
            }
        }

        summary.results.push(result);
    }

    async fn persist_state(
        &self,
        instance: &RegisteredInstance,
        state: offhours_core::InstanceState,
    ) -> Result<(), StoreError> {
        let key = instance
            .key()
            .map_err(|e| StoreError::InvalidItem(e.to_string()))?;
        self.registry.put_state(&key, state).await
    }

    /// A healthy terminal outcome clears any informational tags left over
    /// from earlier cycles, so a fixed misconfiguration stops being
    /// reported. Best-effort: tags are observability, not state.
    async fn clear_error_tags(&self, instance: &RegisteredInstance) {
        if let Err(e) = self.adapter.clear_error_tags(instance).await {
            debug!(resource = %instance.resource_id, error = %e, "failed to clear informational tags");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use offhours_core::{
        Arn, InstanceState, MaintenanceWindow, PeriodDefinition, PeriodRef, ScheduleDefinition,
        Service,
    };
    use offhours_store_memory::{InMemoryMaintenanceWindowStore, InMemoryResourceRegistry};

    use super::*;
    use crate::service::{NoMaintenanceWindows, ResourceRuntime};

    struct MockService {
        runtime: HashMap<String, ResourceRuntime>,
        fail_start_ids: Vec<String>,
        error_ids: Vec<String>,
        executed: Mutex<Vec<(String, RequestedAction)>>,
        tagged: Mutex<Vec<(String, String)>>,
        cleared: Mutex<Vec<String>>,
    }

    impl MockService {
        fn new(runtime: HashMap<String, ResourceRuntime>) -> Self {
            Self {
                runtime,
                fail_start_ids: Vec::new(),
                error_ids: Vec::new(),
                executed: Mutex::new(Vec::new()),
                tagged: Mutex::new(Vec::new()),
                cleared: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<(String, RequestedAction)> {
            self.executed.lock().unwrap().clone()
        }

        fn tagged(&self) -> Vec<(String, String)> {
            self.tagged.lock().unwrap().clone()
        }

        fn cleared(&self) -> Vec<String> {
            self.cleared.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceService for MockService {
        fn service(&self) -> Service {
            Service::Ec2
        }

        async fn fetch_runtime(
            &self,
            _instances: &[RegisteredInstance],
        ) -> Result<HashMap<String, ResourceRuntime>, ServiceError> {
            Ok(self.runtime.clone())
        }

        async fn execute(
            &self,
            request: &ExecuteRequest<'_>,
        ) -> Result<ExecuteOutcome, ServiceError> {
            let id = request.instance.resource_id.clone();
            self.executed
                .lock()
                .unwrap()
                .push((id.clone(), request.decision.action));

            if self.error_ids.contains(&id) {
                return Err(ServiceError::Other("provider call failed".into()));
            }
            if request.decision.action == RequestedAction::Start
                && self.fail_start_ids.contains(&id)
            {
                return Ok(ExecuteOutcome::StartFailed {
                    message: "insufficient capacity for all types".into(),
                });
            }

            let action_taken = match request.decision.action {
                RequestedAction::Start => ActionTaken::Started,
                RequestedAction::Stop => ActionTaken::Stopped,
                RequestedAction::Configure => ActionTaken::Configured,
                RequestedAction::DoNothing => ActionTaken::None,
            };
            Ok(ExecuteOutcome::Done {
                action_taken,
                new_stored_state: request.decision.new_stored_state,
                new_last_configured: None,
            })
        }

        async fn tag_error(
            &self,
            instance: &RegisteredInstance,
            code: InfoTagCode,
            _message: &str,
            _now: DateTime<Utc>,
        ) -> Result<(), ServiceError> {
            self.tagged
                .lock()
                .unwrap()
                .push((instance.resource_id.clone(), code.as_str().to_owned()));
            Ok(())
        }

        async fn clear_error_tags(
            &self,
            instance: &RegisteredInstance,
        ) -> Result<(), ServiceError> {
            self.cleared
                .lock()
                .unwrap()
                .push(instance.resource_id.clone());
            Ok(())
        }
    }

    fn period() -> PeriodDefinition {
        PeriodDefinition {
            name: "office-hours".into(),
            begintime: Some("09:00".into()),
            endtime: Some("17:00".into()),
            weekdays: None,
            monthdays: None,
            months: None,
            description: None,
        }
    }

    fn schedule_def(windows: Option<Vec<String>>) -> ScheduleDefinition {
        ScheduleDefinition {
            name: "biz".into(),
            periods: vec![PeriodRef::named("office-hours")],
            timezone: None,
            override_status: None,
            description: None,
            maintenance_windows: windows,
            stop_new_instances: None,
            use_maintenance_window: None,
            enforced: None,
            hibernate: None,
            retain_running: None,
        }
    }

    fn instance(id: &str, schedule: &str, stored: InstanceState) -> RegisteredInstance {
        RegisteredInstance {
            account: "123456789012".into(),
            region: "us-east-1".into(),
            resource_id: id.into(),
            arn: Arn::parse(format!(
                "arn:aws:ec2:us-east-1:123456789012:instance/{id}"
            ))
            .unwrap(),
            schedule: schedule.into(),
            name: id.into(),
            stored_state: stored,
            last_configured: None,
        }
    }

    fn running() -> ResourceRuntime {
        ResourceRuntime {
            is_running: true,
            is_stopped: false,
            is_schedulable: true,
            current_size: Some("m5.large".into()),
        }
    }

    fn stopped() -> ResourceRuntime {
        ResourceRuntime {
            is_running: false,
            is_stopped: true,
            is_schedulable: true,
            current_size: Some("m5.large".into()),
        }
    }

    fn context(at: DateTime<Utc>, windows: Option<Vec<String>>) -> SchedulingContext {
        SchedulingContext::from_definitions(
            "123456789012",
            "us-east-1",
            Service::Ec2,
            at,
            5,
            chrono_tz::UTC,
            HashMap::from([("biz".to_owned(), schedule_def(windows))]),
            HashMap::from([("office-hours".to_owned(), period())]),
        )
    }

    struct Harness {
        registry: Arc<InMemoryResourceRegistry>,
        adapter: Arc<MockService>,
        runner: TargetRunner,
    }

    async fn harness(
        at: DateTime<Utc>,
        instances: Vec<RegisteredInstance>,
        adapter: MockService,
        windows: Option<Vec<String>>,
    ) -> Harness {
        let registry = Arc::new(InMemoryResourceRegistry::new());
        for i in &instances {
            registry.put(i, true).await.unwrap();
        }
        let adapter = Arc::new(adapter);
        let runner = TargetRunner::new(
            context(at, windows),
            registry.clone(),
            Arc::new(InMemoryMaintenanceWindowStore::new()),
            Arc::new(NoMaintenanceWindows),
            adapter.clone(),
        );
        Harness {
            registry,
            adapter,
            runner,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        // 2024-03-04 is a Monday.
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    async fn stored_state(registry: &InMemoryResourceRegistry, id: &str) -> InstanceState {
        registry
            .find_by_key(
                &instance(id, "biz", InstanceState::Unknown)
                    .key()
                    .unwrap(),
            )
            .await
            .unwrap()
            .unwrap()
            .stored_state
    }

    #[tokio::test]
    async fn starts_at_period_begin() {
        let h = harness(
            at(9, 0),
            vec![instance("i-1", "biz", InstanceState::Stopped)],
            MockService::new(HashMap::from([("i-1".to_owned(), stopped())])),
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert_eq!(summary.results.len(), 1);
        assert_eq!(summary.results[0].action_taken, ActionTaken::Started);
        assert_eq!(h.adapter.executed(), vec![("i-1".into(), RequestedAction::Start)]);
        assert_eq!(stored_state(&h.registry, "i-1").await, InstanceState::Running);
        // A healthy outcome clears stale informational tags.
        assert_eq!(h.adapter.cleared(), vec!["i-1".to_owned()]);
    }

    #[tokio::test]
    async fn stops_at_period_end() {
        let h = harness(
            at(17, 0),
            vec![instance("i-1", "biz", InstanceState::Running)],
            MockService::new(HashMap::from([("i-1".to_owned(), running())])),
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert_eq!(summary.results[0].action_taken, ActionTaken::Stopped);
        assert_eq!(stored_state(&h.registry, "i-1").await, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn manual_stop_during_period_is_left_alone() {
        // Stored Running, runtime stopped: the schedule asked for no
        // change, so nothing happens and stored state stays Running.
        let h = harness(
            at(10, 0),
            vec![instance("i-1", "biz", InstanceState::Running)],
            MockService::new(HashMap::from([("i-1".to_owned(), stopped())])),
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert_eq!(summary.results[0].action_taken, ActionTaken::None);
        assert!(h.adapter.executed().is_empty());
        assert_eq!(stored_state(&h.registry, "i-1").await, InstanceState::Running);
        // A no-op cycle is still a healthy outcome and clears stale tags.
        assert_eq!(h.adapter.cleared(), vec!["i-1".to_owned()]);
    }

    #[tokio::test]
    async fn new_instance_is_stopped_outside_periods() {
        let h = harness(
            at(7, 0),
            vec![instance("i-1", "biz", InstanceState::Unknown)],
            MockService::new(HashMap::from([("i-1".to_owned(), running())])),
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert_eq!(summary.results[0].action_taken, ActionTaken::Stopped);
        assert_eq!(stored_state(&h.registry, "i-1").await, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn unknown_schedule_is_tagged_and_skipped() {
        let h = harness(
            at(10, 0),
            vec![instance("i-1", "ghost", InstanceState::Running)],
            MockService::new(HashMap::from([("i-1".to_owned(), running())])),
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert!(summary.results.is_empty());
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(
            h.adapter.tagged(),
            vec![("i-1".to_owned(), "UnknownSchedule".to_owned())]
        );
        // A tagged resource is not a healthy outcome; nothing is cleared.
        assert!(h.adapter.cleared().is_empty());
        // Stored state untouched.
        assert_eq!(stored_state(&h.registry, "i-1").await, InstanceState::Running);
    }

    #[tokio::test]
    async fn missing_runtime_info_skips_without_deregistering() {
        let h = harness(
            at(10, 0),
            vec![instance("i-1", "biz", InstanceState::Running)],
            MockService::new(HashMap::new()),
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert!(summary.results.is_empty());
        assert_eq!(summary.skipped.len(), 1);
        // Still registered.
        assert_eq!(stored_state(&h.registry, "i-1").await, InstanceState::Running);
    }

    #[tokio::test]
    async fn unschedulable_runtime_state_is_skipped() {
        let transitional = ResourceRuntime {
            is_running: false,
            is_stopped: false,
            is_schedulable: false,
            current_size: None,
        };
        let h = harness(
            at(10, 0),
            vec![instance("i-1", "biz", InstanceState::Stopped)],
            MockService::new(HashMap::from([("i-1".to_owned(), transitional)])),
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert!(summary.results.is_empty());
        assert_eq!(summary.skipped[0].1, "not in a schedulable state");
    }

    #[tokio::test]
    async fn start_failure_marks_start_failed() {
        let mut adapter = MockService::new(HashMap::from([("i-1".to_owned(), stopped())]));
        adapter.fail_start_ids.push("i-1".into());
        let h = harness(
            at(10, 0),
            vec![instance("i-1", "biz", InstanceState::Stopped)],
            adapter,
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert!(summary.results[0].error.is_some());
        assert_eq!(
            stored_state(&h.registry, "i-1").await,
            InstanceState::StartFailed
        );
        assert!(h.adapter.cleared().is_empty());
    }

    #[tokio::test]
    async fn failed_stop_does_not_advance_stored_state() {
        let mut adapter = MockService::new(HashMap::from([("i-1".to_owned(), running())]));
        adapter.error_ids.push("i-1".into());
        let h = harness(
            at(18, 0),
            vec![instance("i-1", "biz", InstanceState::Running)],
            adapter,
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert!(summary.results[0].error.is_some());
        assert_eq!(stored_state(&h.registry, "i-1").await, InstanceState::Running);
        assert!(h.adapter.cleared().is_empty());
    }

    #[tokio::test]
    async fn per_resource_failure_does_not_abort_the_target() {
        let mut adapter = MockService::new(HashMap::from([
            ("i-1".to_owned(), running()),
            ("i-2".to_owned(), running()),
        ]));
        adapter.error_ids.push("i-1".into());
        let h = harness(
            at(18, 0),
            vec![
                instance("i-1", "biz", InstanceState::Running),
                instance("i-2", "biz", InstanceState::Running),
            ],
            adapter,
            None,
        )
        .await;

        let summary = h.runner.run().await.unwrap();
        assert_eq!(summary.results.len(), 2);
        assert!(summary.results[0].error.is_some());
        assert!(summary.results[1].error.is_none());
        assert_eq!(stored_state(&h.registry, "i-2").await, InstanceState::Stopped);
        // Only the healthy resource has its tags cleared.
        assert_eq!(h.adapter.cleared(), vec!["i-2".to_owned()]);
    }

    #[tokio::test]
    async fn retain_running_marker_transition_persists_without_action() {
        // Stored Stopped during a running period with retain_running: the
        // decision is DoNothing but the marker must be persisted.
        let mut def = schedule_def(None);
        def.retain_running = Some(true);
        let ctx = SchedulingContext::from_definitions(
            "123456789012",
            "us-east-1",
            Service::Ec2,
            at(10, 0),
            5,
            chrono_tz::UTC,
            HashMap::from([("biz".to_owned(), def)]),
            HashMap::from([("office-hours".to_owned(), period())]),
        );

        let registry = Arc::new(InMemoryResourceRegistry::new());
        registry
            .put(&instance("i-1", "biz", InstanceState::Stopped), true)
            .await
            .unwrap();
        let adapter = Arc::new(MockService::new(HashMap::from([(
            "i-1".to_owned(),
            running(),
        )])));
        let runner = TargetRunner::new(
            ctx,
            registry.clone(),
            Arc::new(InMemoryMaintenanceWindowStore::new()),
            Arc::new(NoMaintenanceWindows),
            adapter.clone(),
        );

        let summary = runner.run().await.unwrap();
        assert_eq!(summary.results[0].action_taken, ActionTaken::None);
        assert!(adapter.executed().is_empty());
        assert_eq!(
            stored_state(&registry, "i-1").await,
            InstanceState::RetainRunning
        );
    }

    struct StubWindowSource {
        windows: Vec<MaintenanceWindow>,
    }

    #[async_trait]
    impl MaintenanceWindowSource for StubWindowSource {
        async fn fetch(&self) -> Result<Vec<MaintenanceWindow>, ServiceError> {
            Ok(self.windows.clone())
        }
    }

    #[tokio::test]
    async fn active_maintenance_window_starts_outside_periods() {
        let window = MaintenanceWindow {
            account: "123456789012".into(),
            region: "us-east-1".into(),
            window_id: "mw-0123456789abcdef0".into(),
            window_name: "patch".into(),
            timezone: chrono_tz::UTC,
            // 03:00 + 2h window; scheduling at 03:30.
            next_execution_time: Some(at(3, 0)),
            duration_hours: 2,
        };

        let registry = Arc::new(InMemoryResourceRegistry::new());
        registry
            .put(&instance("i-1", "biz", InstanceState::Stopped), true)
            .await
            .unwrap();
        let adapter = Arc::new(MockService::new(HashMap::from([(
            "i-1".to_owned(),
            stopped(),
        )])));
        let runner = TargetRunner::new(
            context(at(3, 30), Some(vec!["patch".to_owned()])),
            registry.clone(),
            Arc::new(InMemoryMaintenanceWindowStore::new()),
            Arc::new(StubWindowSource {
                windows: vec![window],
            }),
            adapter.clone(),
        );

        let summary = runner.run().await.unwrap();
        assert_eq!(summary.results[0].action_taken, ActionTaken::Started);
        assert!(summary.results[0].reason.contains("patch"));
        assert_eq!(stored_state(&registry, "i-1").await, InstanceState::Running);
    }

    #[tokio::test]
    async fn exhausted_deadline_skips_remaining_resources() {
        let h = harness(
            at(9, 0),
            vec![
                instance("i-1", "biz", InstanceState::Stopped),
                instance("i-2", "biz", InstanceState::Stopped),
            ],
            MockService::new(HashMap::from([
                ("i-1".to_owned(), stopped()),
                ("i-2".to_owned(), stopped()),
            ])),
            None,
        )
        .await;

        // A deadline already in the past: nothing may issue provider calls.
        let runner = h.runner.with_deadline(Instant::now());
        let summary = runner.run().await.unwrap();
        assert!(summary.deadline_exceeded);
        assert_eq!(summary.skipped.len(), 2);
        assert!(h.adapter.executed().is_empty());
    }

    #[tokio::test]
    async fn schedule_name_filter_restricts_scope() {
        let h = harness(
            at(9, 0),
            vec![
                instance("i-1", "biz", InstanceState::Stopped),
                instance("i-2", "other", InstanceState::Stopped),
            ],
            MockService::new(HashMap::from([
                ("i-1".to_owned(), stopped()),
                ("i-2".to_owned(), stopped()),
            ])),
            None,
        )
        .await;

        let runner = h.runner.with_schedule_names(Some(vec!["biz".to_owned()]));
        let summary = runner.run().await.unwrap();
        // Only i-1 was considered at all.
        assert_eq!(summary.results.len(), 1);
        assert_eq!(summary.results[0].resource_id, "i-1");
    }
}
