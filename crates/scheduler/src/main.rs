use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use tracing::{Instrument, error, info};

use offhours_aws::auth::{assume_scheduling_role, build_hub_config};
use offhours_aws::{AwsBaseConfig, OpsMetrics, SchedulingEventBus};
use offhours_core::Service;
use offhours_scheduler::services::{AsgService, Ec2Service, RdsService};
use offhours_scheduler::{
    MaintenanceWindowSource, Orchestrator, RequestDispatcher, ResourceService, SchedulerEnv,
    SchedulingContext, SchedulingRequest, ServiceError, TargetRunner,
    request::DispatchError,
};
use offhours_store::{
    MaintenanceWindowStore, PeriodStore, ResourceRegistry, ScheduleStore,
};
use offhours_store_dynamodb::{
    DynamoConfigStore, DynamoMaintenanceWindowStore, DynamoResourceRegistry, build_client,
};

/// Fraction of the scheduling interval a runner may spend before it stops
/// issuing provider calls.
const RUNNER_BUDGET_FRACTION: f64 = 0.9;

/// Cross-account start/stop scheduler for EC2, RDS, and Auto Scaling.
#[derive(Parser, Debug)]
#[command(name = "offhours", about = "Tag-driven start/stop scheduler for AWS resources")]
struct Cli {
    /// Run a single scheduling cycle and exit.
    #[arg(long)]
    once: bool,

    /// Override the scheduling interval from the environment.
    #[arg(long)]
    interval_minutes: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut env = SchedulerEnv::from_env()?;
    if let Some(interval) = cli.interval_minutes {
        env.scheduling_interval_minutes = interval.max(1);
    }

    let dynamo = build_client(env.region.clone(), env.endpoint_url.as_deref()).await;
    let config_store = Arc::new(DynamoConfigStore::new(dynamo.clone(), &env.config_table));
    let registry: Arc<dyn ResourceRegistry> = Arc::new(DynamoResourceRegistry::new(
        dynamo.clone(),
        &env.registry_table,
    ));
    let mw_store: Arc<dyn MaintenanceWindowStore> = Arc::new(DynamoMaintenanceWindowStore::new(
        dynamo,
        &env.maintenance_window_table,
    ));

    let schedule_store: Arc<dyn ScheduleStore> = config_store.clone();
    let period_store: Arc<dyn PeriodStore> = config_store;

    let orchestrator = Orchestrator::new(
        registry.clone(),
        schedule_store.clone(),
        period_store.clone(),
        env.payload_ceiling_bytes,
    );
    let dispatcher = LocalDispatcher {
        env: env.clone(),
        registry,
        mw_store,
        schedule_store,
        period_store,
    };

    let interval = Duration::from_secs(u64::from(env.scheduling_interval_minutes) * 60);
    info!(
        interval_minutes = env.scheduling_interval_minutes,
        once = cli.once,
        "offhours scheduler starting"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let cycle_span = tracing::info_span!("cycle", correlation_id = %uuid::Uuid::new_v4());
        match orchestrator
            .run_cycle(Utc::now(), &dispatcher)
            .instrument(cycle_span)
            .await
        {
            Ok(succeeded) => info!(targets = succeeded, "cycle dispatched"),
            Err(e) => error!(error = %e, "cycle failed"),
        }
        if cli.once {
            break;
        }
    }
    Ok(())
}

/// Runs per-target runners in-process. Each dispatch assumes the target's
/// scheduling role, builds the service adapter, and drives the runner to
/// completion.
struct LocalDispatcher {
    env: SchedulerEnv,
    registry: Arc<dyn ResourceRegistry>,
    mw_store: Arc<dyn MaintenanceWindowStore>,
    schedule_store: Arc<dyn ScheduleStore>,
    period_store: Arc<dyn PeriodStore>,
}

/// Maintenance windows via SSM in the target account.
struct SsmWindowSource {
    client: offhours_aws::SsmMaintenanceWindows,
}

#[async_trait]
impl MaintenanceWindowSource for SsmWindowSource {
    async fn fetch(
        &self,
    ) -> Result<Vec<offhours_core::MaintenanceWindow>, ServiceError> {
        Ok(self.client.fetch_enabled().await?)
    }
}

#[async_trait]
impl RequestDispatcher for LocalDispatcher {
    async fn dispatch(&self, request: SchedulingRequest) -> Result<(), DispatchError> {
        let target = request.target();
        let fail = |message: String| DispatchError::Failed {
            target: target.clone(),
            message,
        };

        request.validate()?;

        let base = AwsBaseConfig::new(request.region.clone(), &self.env.scheduler_role_name);
        let base = match &self.env.endpoint_url {
            Some(endpoint) => base.with_endpoint_url(endpoint),
            None => base,
        };
        let hub_config = build_hub_config(&base).await;

        // A failed role assumption fails the whole target; scheduling with
        // partial visibility is worse than skipping the cycle.
        let role = assume_scheduling_role(&hub_config, &base, &request.account, &request.region)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let adapter: Arc<dyn ResourceService> = match request.service {
            Service::Ec2 => Arc::new(Ec2Service::new(&role)),
            Service::Rds => Arc::new(RdsService::new(&role)),
            Service::Autoscaling => Arc::new(AsgService::new(&role, &self.env.rule_prefix)),
        };
        let mw_source: Arc<dyn MaintenanceWindowSource> = Arc::new(SsmWindowSource {
            client: offhours_aws::SsmMaintenanceWindows::new(&role),
        });

        let context = SchedulingContext::hydrate(
            &request,
            &self.schedule_store,
            &self.period_store,
            self.env.scheduling_interval_minutes,
            self.env.default_timezone,
        )
        .await
        .map_err(|e| fail(e.to_string()))?;

        let mut event_buses = Vec::new();
        if let Some(bus) = &self.env.local_event_bus {
            event_buses.push(Arc::new(SchedulingEventBus::new(role.sdk_config(), bus)));
        }
        if let Some(bus) = &self.env.global_event_bus {
            event_buses.push(Arc::new(SchedulingEventBus::new(&hub_config, bus)));
        }

        let budget = Duration::from_secs_f64(
            f64::from(self.env.scheduling_interval_minutes) * 60.0 * RUNNER_BUDGET_FRACTION,
        );
        let mut runner = TargetRunner::new(
            context,
            self.registry.clone(),
            self.mw_store.clone(),
            mw_source,
            adapter,
        )
        .with_event_buses(event_buses)
        .with_deadline(Instant::now() + budget)
        .with_schedule_names(request.schedule_names.clone());
        if self.env.enable_ops_metrics {
            runner = runner.with_metrics(Arc::new(OpsMetrics::new(
                &hub_config,
                &self.env.metrics_namespace,
            )));
        }

        let summary = runner.run().await.map_err(|e| fail(e.to_string()))?;
        info!(
            target = %target,
            results = summary.results.len(),
            skipped = summary.skipped.len(),
            deadline_exceeded = summary.deadline_exceeded,
            "target complete"
        );
        Ok(())
    }
}
