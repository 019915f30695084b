use std::sync::Arc;

use tracing::{info, instrument, warn};

use offhours_aws::{AsgRuntimeInfo, Ec2RuntimeInfo, RdsRuntimeInfo};
use offhours_core::{InstanceState, RegisteredInstance, RegistryKey};
use offhours_store::{ResourceRegistry, StoreError};

use crate::services::SIZE_TAG_KEY;

/// Scope for a batch of registrations: one account and region.
pub struct RegistrationContext {
    pub registry: Arc<dyn ResourceRegistry>,
    pub schedule_tag_key: String,
    pub account: String,
    pub region: String,
}

/// A resource that could not be registered, with the reason. Callers
/// surface these as `UnsupportedResource` informational tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedResource {
    pub resource_id: String,
    pub reason: String,
}

/// The outcome of a registration batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub registered: Vec<RegisteredInstance>,
    pub rejected: Vec<RejectedResource>,
    /// Auto-scaling groups that still need the running-size snapshot tag
    /// (`offhours:min-desired-max`) written.
    pub needs_size_tag: Vec<(String, String)>,
}

/// Register EC2 instances carrying the schedule tag. Existing rows are
/// overwritten with `stored_state = Unknown`, so a re-registered instance
/// is treated as new.
#[instrument(skip_all, fields(account = %ctx.account, region = %ctx.region, count = instances.len()))]
pub async fn register_ec2_instances(
    ctx: &RegistrationContext,
    instances: &[Ec2RuntimeInfo],
) -> Result<RegistrationOutcome, StoreError> {
    let mut outcome = RegistrationOutcome::default();
    for instance in instances {
        let Some(schedule) = instance.tags.get(&ctx.schedule_tag_key) else {
            continue;
        };
        let registered = RegisteredInstance {
            account: ctx.account.clone(),
            region: ctx.region.clone(),
            resource_id: instance.instance_id.clone(),
            arn: instance.arn(&ctx.account, &ctx.region),
            schedule: schedule.clone(),
            name: instance.tags.get("Name").cloned().unwrap_or_default(),
            stored_state: InstanceState::Unknown,
            last_configured: None,
        };
        ctx.registry.put(&registered, true).await?;
        info!(resource = %registered.arn, "registered EC2 instance");
        outcome.registered.push(registered);
    }
    Ok(outcome)
}

/// Register RDS instances and clusters carrying the schedule tag.
/// Unsupported shapes are never written; they are returned for tagging and
/// skipped forever after.
#[instrument(skip_all, fields(account = %ctx.account, region = %ctx.region, count = resources.len()))]
pub async fn register_rds_resources(
    ctx: &RegistrationContext,
    resources: &[RdsRuntimeInfo],
) -> Result<RegistrationOutcome, StoreError> {
    let mut outcome = RegistrationOutcome::default();
    for resource in resources {
        let Some(schedule) = resource.tags.get(&ctx.schedule_tag_key) else {
            continue;
        };
        if let Err(reason) = resource.check_supported() {
            warn!(resource = %resource.arn, reason = %reason, "rejecting unsupported RDS resource");
            outcome.rejected.push(RejectedResource {
                resource_id: resource.identifier.clone(),
                reason,
            });
            continue;
        }
        let registered = RegisteredInstance {
            account: ctx.account.clone(),
            region: ctx.region.clone(),
            resource_id: resource.identifier.clone(),
            arn: resource.arn.clone(),
            schedule: schedule.clone(),
            name: resource.identifier.clone(),
            stored_state: InstanceState::Unknown,
            last_configured: None,
        };
        ctx.registry.put(&registered, true).await?;
        info!(resource = %registered.arn, "registered RDS resource");
        outcome.registered.push(registered);
    }
    Ok(outcome)
}

/// Register auto-scaling groups carrying the schedule tag. Groups without
/// the running-size snapshot tag are reported so the caller can write it
/// while the size is still known.
#[instrument(skip_all, fields(account = %ctx.account, region = %ctx.region, count = groups.len()))]
pub async fn register_asg_groups(
    ctx: &RegistrationContext,
    groups: &[AsgRuntimeInfo],
) -> Result<RegistrationOutcome, StoreError> {
    let mut outcome = RegistrationOutcome::default();
    for group in groups {
        let Some(schedule) = group.tags.get(&ctx.schedule_tag_key) else {
            continue;
        };
        let registered = RegisteredInstance {
            account: ctx.account.clone(),
            region: ctx.region.clone(),
            resource_id: group.name.clone(),
            arn: group.arn.clone(),
            schedule: schedule.clone(),
            name: group.name.clone(),
            stored_state: InstanceState::Unknown,
            last_configured: None,
        };
        ctx.registry.put(&registered, true).await?;
        info!(resource = %registered.arn, "registered auto-scaling group");

        if !group.tags.contains_key(SIZE_TAG_KEY) && !group.size.is_stopped() {
            outcome
                .needs_size_tag
                .push((group.name.clone(), group.size.to_tag_value()));
        }
        outcome.registered.push(registered);
    }
    Ok(outcome)
}

/// Deregister resources whose schedule tag was removed. Deleting a row
/// that is already gone is not an error.
#[instrument(skip_all, fields(count = keys.len()))]
pub async fn deregister(
    registry: &Arc<dyn ResourceRegistry>,
    keys: &[RegistryKey],
) -> Result<(), StoreError> {
    for key in keys {
        registry.delete(key).await?;
        info!(resource = %key.sort_key(), "deregistered resource");
    }
    Ok(())
}
