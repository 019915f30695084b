use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use offhours_aws::auth::{AssumedRole, assume_scheduling_role, build_hub_config};
use offhours_aws::tagging::InfoTagCode;
use offhours_aws::{AsgScheduler, AwsBaseConfig, Ec2Scheduler, InfoTags, RdsScheduler};
use offhours_core::{RegisteredInstance, RegistryKey, Service};
use offhours_scheduler::SchedulerEnv;
use offhours_scheduler::registration::{
    RegistrationContext, deregister, register_asg_groups, register_ec2_instances,
    register_rds_resources,
};
use offhours_scheduler::services::SIZE_TAG_KEY;
use offhours_store::ResourceRegistry;
use offhours_store_dynamodb::{DynamoResourceRegistry, build_client};

/// Registration sweep for one scheduling target account and region.
///
/// Resources carrying the schedule tag are (re)registered with
/// `stored_state = Unknown`; registry rows whose resource no longer
/// carries the tag are deregistered and their informational tags removed.
/// Run it on a tag-change notification or on a slow timer alongside the
/// `offhours` scheduler.
#[derive(Parser, Debug)]
#[command(
    name = "offhours-register",
    about = "Tag-driven resource registration sweep for the offhours scheduler"
)]
struct Cli {
    /// Target account to sweep.
    #[arg(long)]
    account: String,

    /// Target region to sweep.
    #[arg(long)]
    region: String,

    /// Restrict the sweep to one service (`ec2`, `rds`, `autoscaling`).
    #[arg(long)]
    service: Option<Service>,
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
    let env = SchedulerEnv::from_env()?;

    let dynamo = build_client(env.region.clone(), env.endpoint_url.as_deref()).await;
    let registry: Arc<dyn ResourceRegistry> =
        Arc::new(DynamoResourceRegistry::new(dynamo, &env.registry_table));

    let base = AwsBaseConfig::new(cli.region.clone(), &env.scheduler_role_name);
    let base = match &env.endpoint_url {
        Some(endpoint) => base.with_endpoint_url(endpoint),
        None => base,
    };
    let hub_config = build_hub_config(&base).await;
    let role = assume_scheduling_role(&hub_config, &base, &cli.account, &cli.region).await?;

    let ctx = RegistrationContext {
        registry: registry.clone(),
        schedule_tag_key: env.schedule_tag_key.clone(),
        account: cli.account.clone(),
        region: cli.region.clone(),
    };

    let services = match cli.service {
        Some(service) => vec![service],
        None => vec![Service::Ec2, Service::Rds, Service::Autoscaling],
    };
    for service in services {
        match service {
            Service::Ec2 => sweep_ec2(&role, &ctx, &registry).await?,
            Service::Rds => sweep_rds(&role, &ctx, &registry).await?,
            Service::Autoscaling => {
                sweep_asg(&role, &ctx, &registry, &env.rule_prefix).await?;
            }
        }
    }
    Ok(())
}

/// Registry rows of one target whose resource no longer carries the
/// schedule tag.
async fn stale_rows(
    registry: &Arc<dyn ResourceRegistry>,
    ctx: &RegistrationContext,
    service: Service,
    live_ids: &HashSet<&str>,
) -> Result<Vec<RegisteredInstance>, Box<dyn std::error::Error>> {
    Ok(registry
        .find_by_target(&ctx.account, &ctx.region, service)
        .await?
        .into_iter()
        .filter(|row| !live_ids.contains(row.resource_id.as_str()))
        .collect())
}

fn keys_of(rows: &[RegisteredInstance]) -> Vec<RegistryKey> {
    rows.iter().filter_map(|row| row.key().ok()).collect()
}

async fn sweep_ec2(
    role: &AssumedRole,
    ctx: &RegistrationContext,
    registry: &Arc<dyn ResourceRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = Ec2Scheduler::new(role);
    let tagged = scheduler.describe_tagged(&ctx.schedule_tag_key).await?;
    let outcome = register_ec2_instances(ctx, &tagged).await?;

    let live: HashSet<&str> = tagged.iter().map(|i| i.instance_id.as_str()).collect();
    let stale = stale_rows(registry, ctx, Service::Ec2, &live).await?;
    if !stale.is_empty() {
        deregister(registry, &keys_of(&stale)).await?;
        let ids: Vec<String> = stale.iter().map(|row| row.resource_id.clone()).collect();
        if let Err(e) = scheduler.clear_info_tags(&ids, &InfoTags::default()).await {
            warn!(error = %e, "failed to clear tags on deregistered instances");
        }
    }

    info!(
        registered = outcome.registered.len(),
        deregistered = stale.len(),
        "EC2 registration sweep complete"
    );
    Ok(())
}

async fn sweep_rds(
    role: &AssumedRole,
    ctx: &RegistrationContext,
    registry: &Arc<dyn ResourceRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = RdsScheduler::new(role);
    let info_tags = InfoTags::default();
    let tagged = scheduler.describe_tagged(&ctx.schedule_tag_key).await?;
    let outcome = register_rds_resources(ctx, &tagged).await?;

    // Unsupported shapes are never registered; the tag tells the operator
    // why.
    let now = Utc::now();
    for rejected in &outcome.rejected {
        let Some(resource) = tagged.iter().find(|r| r.identifier == rejected.resource_id)
        else {
            continue;
        };
        let pairs =
            info_tags.error_pairs(InfoTagCode::UnsupportedResource, &rejected.reason, now);
        if let Err(e) = scheduler.set_info_tags(&resource.arn, &pairs).await {
            warn!(resource = %resource.arn, error = %e, "failed to tag unsupported resource");
        }
    }

    let live: HashSet<&str> = tagged.iter().map(|r| r.identifier.as_str()).collect();
    let stale = stale_rows(registry, ctx, Service::Rds, &live).await?;
    if !stale.is_empty() {
        deregister(registry, &keys_of(&stale)).await?;
        for row in &stale {
            if let Err(e) = scheduler.clear_info_tags(&row.arn, &info_tags).await {
                warn!(resource = %row.arn, error = %e, "failed to clear tags on deregistered resource");
            }
        }
    }

    info!(
        registered = outcome.registered.len(),
        rejected = outcome.rejected.len(),
        deregistered = stale.len(),
        "RDS registration sweep complete"
    );
    Ok(())
}

async fn sweep_asg(
    role: &AssumedRole,
    ctx: &RegistrationContext,
    registry: &Arc<dyn ResourceRegistry>,
    rule_prefix: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = AsgScheduler::new(role);
    let info_tags = InfoTags::default();
    let tagged = scheduler.describe_tagged(&ctx.schedule_tag_key).await?;
    let outcome = register_asg_groups(ctx, &tagged).await?;

    // Snapshot the running size while it is still known, so scheduled
    // start actions can restore it after the group is scaled to zero.
    for (group, size) in &outcome.needs_size_tag {
        let pairs = vec![(SIZE_TAG_KEY.to_owned(), size.clone())];
        if let Err(e) = scheduler.set_tags(group, &pairs).await {
            warn!(group = %group, error = %e, "failed to write size snapshot tag");
        }
    }

    let live: HashSet<&str> = tagged.iter().map(|g| g.name.as_str()).collect();
    let stale = stale_rows(registry, ctx, Service::Autoscaling, &live).await?;
    if !stale.is_empty() {
        deregister(registry, &keys_of(&stale)).await?;
        for row in &stale {
            // A deregistered group keeps its own size; only the scheduler's
            // scheduled actions and tags are removed.
            if let Err(e) = scheduler
                .delete_scheduled_actions(&row.resource_id, rule_prefix)
                .await
            {
                warn!(group = %row.resource_id, error = %e, "failed to delete scheduled actions");
            }
            if let Err(e) = scheduler
                .delete_tags(&row.resource_id, &info_tags.clear_keys())
                .await
            {
                warn!(group = %row.resource_id, error = %e, "failed to clear tags on deregistered group");
            }
        }
    }

    info!(
        registered = outcome.registered.len(),
        deregistered = stale.len(),
        "Auto Scaling registration sweep complete"
    );
    Ok(())
}
