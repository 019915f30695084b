use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use offhours_core::{RegisteredInstance, Service};
use offhours_store::{PeriodStore, ResourceRegistry, ScheduleStore, StoreError};

use crate::request::{DispatchError, SchedulingRequest};

/// Errors fatal to a whole orchestration cycle. Only a failure to read the
/// stores qualifies; everything else degrades to skipped rows or failed
/// targets.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Delivers one request to a per-target runner. Implementations run the
/// runner in-process or hand the payload to an external dispatch channel.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn dispatch(&self, request: SchedulingRequest) -> Result<(), DispatchError>;
}

/// Builds and dispatches per-target scheduling requests.
///
/// The orchestrator decides nothing about individual resources; its job is
/// partitioning work and keeping payloads within the dispatch ceiling.
pub struct Orchestrator {
    registry: Arc<dyn ResourceRegistry>,
    schedule_store: Arc<dyn ScheduleStore>,
    period_store: Arc<dyn PeriodStore>,
    payload_ceiling_bytes: usize,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        schedule_store: Arc<dyn ScheduleStore>,
        period_store: Arc<dyn PeriodStore>,
        payload_ceiling_bytes: usize,
    ) -> Self {
        Self {
            registry,
            schedule_store,
            period_store,
            payload_ceiling_bytes,
        }
    }

    /// Build one request per scheduling target at `now`.
    ///
    /// Definitions that fail validation are logged and skipped; a broken
    /// schedule never aborts the cycle. Each request carries the schedules
    /// its target's resources actually reference, plus the periods those
    /// schedules reference, unless the encoded payload would exceed the
    /// ceiling.
    #[instrument(skip(self))]
    pub async fn build_requests(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SchedulingRequest>, OrchestratorError> {
        let mut schedules = self.schedule_store.find_all_schedules().await?;
        schedules.retain(|name, definition| match definition.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(schedule = %name, error = %e, "skipping invalid schedule definition");
                false
            }
        });

        let mut periods = self.period_store.find_all_periods().await?;
        periods.retain(|name, definition| match definition.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(period = %name, error = %e, "skipping invalid period definition");
                false
            }
        });

        let instances = self.registry.find_all().await?;
        info!(
            instances = instances.len(),
            schedules = schedules.len(),
            periods = periods.len(),
            "building per-target requests"
        );

        // Group resources by scheduling target, deterministically ordered.
        let mut targets: BTreeMap<(String, String, Service), Vec<&RegisteredInstance>> =
            BTreeMap::new();
        for instance in &instances {
            let service = match instance.service() {
                Ok(service) => service,
                Err(e) => {
                    warn!(resource = %instance.resource_id, error = %e, "skipping resource with unknown service");
                    continue;
                }
            };
            targets
                .entry((instance.account.clone(), instance.region.clone(), service))
                .or_default()
                .push(instance);
        }

        let mut requests = Vec::with_capacity(targets.len());
        for ((account, region, service), members) in targets {
            // Only the schedules this target's resources reference, and
            // only the periods those schedules reference.
            let referenced_schedules: BTreeSet<&str> = members
                .iter()
                .filter(|i| schedules.contains_key(&i.schedule))
                .map(|i| i.schedule.as_str())
                .collect();
            let referenced_periods: BTreeSet<&str> = referenced_schedules
                .iter()
                .filter_map(|name| schedules.get(*name))
                .flat_map(|definition| definition.periods.iter())
                .map(|period_ref| period_ref.name.as_str())
                .collect();

            let mut request =
                SchedulingRequest::new(account.clone(), region.clone(), service, now, now);
            request.schedules = Some(
                referenced_schedules
                    .iter()
                    .filter_map(|name| schedules.get(*name).cloned())
                    .collect(),
            );
            request.periods = Some(
                referenced_periods
                    .iter()
                    .filter_map(|name| periods.get(*name).cloned())
                    .collect(),
            );

            // Above the ceiling the runner rehydrates from the store; for
            // large deployments this is the common case.
            if let Err(e) = request.encode_bounded(self.payload_ceiling_bytes) {
                warn!(target = %request.target(), error = %e, "failed to encode request, omitting inline stores");
                request.schedules = None;
                request.periods = None;
            }

            debug!(
                target = %request.target(),
                resources = members.len(),
                inline = request.schedules.is_some(),
                "request built"
            );
            requests.push(request);
        }
        Ok(requests)
    }

    /// Run one full orchestration cycle: build requests and dispatch them
    /// in parallel. A failed target is logged; the others proceed.
    #[instrument(skip(self, dispatcher))]
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        dispatcher: &dyn RequestDispatcher,
    ) -> Result<usize, OrchestratorError> {
        let requests = self.build_requests(now).await?;
        let total = requests.len();

        let dispatches = requests.into_iter().map(|request| {
            let target = request.target();
            async move {
                match dispatcher.dispatch(request).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(target = %target, error = %e, "target dispatch failed");
                        false
                    }
                }
            }
        });
        let succeeded = join_all(dispatches).await.into_iter().filter(|ok| *ok).count();

        info!(targets = total, succeeded, "orchestration cycle complete");
        Ok(succeeded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;
    use offhours_core::{
        Arn, InstanceState, PeriodDefinition, PeriodRef, ScheduleDefinition,
    };
    use offhours_store_memory::{InMemoryConfigStore, InMemoryResourceRegistry};

    use super::*;

    fn period(name: &str) -> PeriodDefinition {
        PeriodDefinition {
            name: name.into(),
            begintime: Some("09:00".into()),
            endtime: Some("17:00".into()),
            weekdays: None,
            monthdays: None,
            months: None,
            description: None,
        }
    }

    fn schedule(name: &str, period_names: &[&str]) -> ScheduleDefinition {
        ScheduleDefinition {
            name: name.into(),
            periods: period_names.iter().map(|p| PeriodRef::named(*p)).collect(),
            timezone: None,
            override_status: None,
            description: None,
            maintenance_windows: None,
            stop_new_instances: None,
            use_maintenance_window: None,
            enforced: None,
            hibernate: None,
            retain_running: None,
        }
    }

    fn instance(account: &str, region: &str, service: &str, id: &str, sched: &str) -> RegisteredInstance {
        let arn = match service {
            "ec2" => format!("arn:aws:ec2:{region}:{account}:instance/{id}"),
            "rds" => format!("arn:aws:rds:{region}:{account}:db:{id}"),
            _ => format!(
                "arn:aws:autoscaling:{region}:{account}:autoScalingGroup:u:autoScalingGroupName/{id}"
            ),
        };
        RegisteredInstance {
            account: account.into(),
            region: region.into(),
            resource_id: id.into(),
            arn: Arn::parse(arn).unwrap(),
            schedule: sched.into(),
            name: id.into(),
            stored_state: InstanceState::Unknown,
            last_configured: None,
        }
    }

    async fn orchestrator_with(
        schedules: Vec<ScheduleDefinition>,
        periods: Vec<PeriodDefinition>,
        instances: Vec<RegisteredInstance>,
        ceiling: usize,
    ) -> Orchestrator {
        let config = Arc::new(InMemoryConfigStore::preloaded(schedules, periods));
        let registry = Arc::new(InMemoryResourceRegistry::new());
        for i in &instances {
            registry.put(i, true).await.unwrap();
        }
        Orchestrator::new(registry, config.clone(), config, ceiling)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn groups_by_account_region_and_service() {
        let orchestrator = orchestrator_with(
            vec![schedule("biz", &["office"])],
            vec![period("office")],
            vec![
                instance("111111111111", "us-east-1", "ec2", "i-1", "biz"),
                instance("111111111111", "us-east-1", "ec2", "i-2", "biz"),
                instance("111111111111", "us-east-1", "rds", "db-1", "biz"),
                instance("111111111111", "eu-west-1", "ec2", "i-3", "biz"),
                instance("222222222222", "us-east-1", "ec2", "i-4", "biz"),
            ],
            usize::MAX,
        )
        .await;

        let requests = orchestrator.build_requests(now()).await.unwrap();
        assert_eq!(requests.len(), 4);
        let targets: Vec<String> = requests.iter().map(SchedulingRequest::target).collect();
        assert!(targets.contains(&"111111111111:us-east-1:ec2".to_owned()));
        assert!(targets.contains(&"111111111111:us-east-1:rds".to_owned()));
        assert!(targets.contains(&"111111111111:eu-west-1:ec2".to_owned()));
        assert!(targets.contains(&"222222222222:us-east-1:ec2".to_owned()));
    }

    #[tokio::test]
    async fn inlines_only_referenced_definitions() {
        let orchestrator = orchestrator_with(
            vec![schedule("biz", &["office"]), schedule("unused", &["other"])],
            vec![period("office"), period("other")],
            vec![instance("111111111111", "us-east-1", "ec2", "i-1", "biz")],
            usize::MAX,
        )
        .await;

        let requests = orchestrator.build_requests(now()).await.unwrap();
        assert_eq!(requests.len(), 1);
        let schedules = requests[0].schedules.as_ref().unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].name, "biz");
        let periods = requests[0].periods.as_ref().unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].name, "office");
    }

    #[tokio::test]
    async fn invalid_definitions_are_skipped_not_fatal() {
        // No periods and no override_status: fails validation.
        let broken = schedule("broken", &[]);
        let orchestrator = orchestrator_with(
            vec![schedule("biz", &["office"]), broken],
            vec![period("office")],
            vec![
                instance("111111111111", "us-east-1", "ec2", "i-1", "biz"),
                instance("111111111111", "us-east-1", "ec2", "i-2", "broken"),
            ],
            usize::MAX,
        )
        .await;

        let requests = orchestrator.build_requests(now()).await.unwrap();
        assert_eq!(requests.len(), 1);
        // The broken schedule is not inlined; the runner will tag i-2.
        let schedules = requests[0].schedules.as_ref().unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].name, "biz");
    }

    #[tokio::test]
    async fn payload_ceiling_omits_inline_stores() {
        let schedules: Vec<ScheduleDefinition> = (0..50)
            .map(|i| schedule(&format!("sched-{i}"), &["office"]))
            .collect();
        let instances: Vec<RegisteredInstance> = (0..50)
            .map(|i| {
                instance(
                    "111111111111",
                    "us-east-1",
                    "ec2",
                    &format!("i-{i}"),
                    &format!("sched-{i}"),
                )
            })
            .collect();
        let orchestrator =
            orchestrator_with(schedules, vec![period("office")], instances, 1024).await;

        let requests = orchestrator.build_requests(now()).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].schedules.is_none());
        assert!(requests[0].periods.is_none());
    }

    struct RecordingDispatcher {
        dispatched: Mutex<Vec<String>>,
        fail_targets: Vec<String>,
    }

    #[async_trait]
    impl RequestDispatcher for RecordingDispatcher {
        async fn dispatch(&self, request: SchedulingRequest) -> Result<(), DispatchError> {
            let target = request.target();
            self.dispatched.lock().unwrap().push(target.clone());
            if self.fail_targets.contains(&target) {
                return Err(DispatchError::Failed {
                    target,
                    message: "simulated failure".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_target_does_not_abort_other_targets() {
        let orchestrator = orchestrator_with(
            vec![schedule("biz", &["office"])],
            vec![period("office")],
            vec![
                instance("111111111111", "us-east-1", "ec2", "i-1", "biz"),
                instance("222222222222", "us-east-1", "ec2", "i-2", "biz"),
            ],
            usize::MAX,
        )
        .await;

        let dispatcher = RecordingDispatcher {
            dispatched: Mutex::new(Vec::new()),
            fail_targets: vec!["111111111111:us-east-1:ec2".to_owned()],
        };
        let succeeded = orchestrator.run_cycle(now(), &dispatcher).await.unwrap();
        assert_eq!(succeeded, 1);
        assert_eq!(dispatcher.dispatched.lock().unwrap().len(), 2);
    }
}
