use std::collections::HashMap;

use aws_sdk_ec2::types::Filter;
use tracing::{debug, info, instrument, warn};

use offhours_core::Arn;

use crate::auth::AssumedRole;
use crate::error::{AwsError, classify_sdk_error, is_hibernation_unsupported};
use crate::tagging::InfoTags;

/// Instance states the scheduler can act on. Transitional states
/// (`pending`, `stopping`, ...) are skipped until they settle.
const SCHEDULABLE_STATES: [&str; 2] = ["running", "stopped"];

/// Runtime information for one EC2 instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ec2RuntimeInfo {
    pub instance_id: String,
    pub state: String,
    pub instance_type: String,
    pub tags: HashMap<String, String>,
    pub hibernation_configured: bool,
}

impl Ec2RuntimeInfo {
    /// Whether the instance is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// Whether the instance is currently stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state == "stopped"
    }

    /// Whether the instance is in a state the scheduler can act on.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        SCHEDULABLE_STATES.contains(&self.state.as_str())
    }

    /// The ARN of this instance in the given account and region.
    #[must_use]
    pub fn arn(&self, account: &str, region: &str) -> Arn {
        // Constructed ARNs from well-formed components always parse.
        Arn::parse(format!(
            "arn:aws:ec2:{region}:{account}:instance/{}",
            self.instance_id
        ))
        .unwrap_or_else(|_| unreachable!("constructed EC2 ARN is well-formed"))
    }
}

/// EC2 service adapter for one scheduling target.
pub struct Ec2Scheduler {
    client: aws_sdk_ec2::Client,
    account: String,
    region: String,
}

impl std::fmt::Debug for Ec2Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Scheduler")
            .field("account", &self.account)
            .field("region", &self.region)
            .field("client", &"<Ec2Client>")
            .finish()
    }
}

impl Ec2Scheduler {
    /// Create an adapter using the target's assumed role.
    #[must_use]
    pub fn new(role: &AssumedRole) -> Self {
        Self {
            client: aws_sdk_ec2::Client::new(role.sdk_config()),
            account: role.account.clone(),
            region: role.region.clone(),
        }
    }

    /// Create an adapter with a pre-built client (for testing).
    #[must_use]
    pub fn with_client(
        client: aws_sdk_ec2::Client,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            client,
            account: account.into(),
            region: region.into(),
        }
    }

    /// Describe instances carrying the schedule tag key, in any
    /// non-terminated state.
    #[instrument(skip(self), fields(account = %self.account, region = %self.region))]
    pub async fn describe_tagged(
        &self,
        schedule_tag_key: &str,
    ) -> Result<Vec<Ec2RuntimeInfo>, AwsError> {
        self.describe_with_filters(vec![
            Filter::builder().name("tag-key").values(schedule_tag_key).build(),
        ])
        .await
    }

    /// Describe specific instances by id. Unknown ids are reported by the
    /// service; a missing instance is logged by the caller, not an error
    /// here.
    #[instrument(skip(self, instance_ids), fields(account = %self.account, count = instance_ids.len()))]
    pub async fn describe(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<Ec2RuntimeInfo>, AwsError> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut infos = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let result = self
                .client
                .describe_instances()
                .set_instance_ids(Some(instance_ids.to_vec()))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            infos.extend(
                result
                    .reservations()
                    .iter()
                    .flat_map(aws_sdk_ec2::types::Reservation::instances)
                    .map(runtime_info_from_instance),
            );
            match result.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(infos)
    }

    async fn describe_with_filters(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<Ec2RuntimeInfo>, AwsError> {
        let mut infos = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let result = self
                .client
                .describe_instances()
                .set_filters(Some(filters.clone()))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            infos.extend(
                result
                    .reservations()
                    .iter()
                    .flat_map(aws_sdk_ec2::types::Reservation::instances)
                    .map(runtime_info_from_instance),
            );
            match result.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(infos)
    }

    /// Start instances.
    #[instrument(skip(self, instance_ids), fields(count = instance_ids.len()))]
    pub async fn start(&self, instance_ids: &[String]) -> Result<(), AwsError> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        debug!(instance_ids = ?instance_ids, "starting EC2 instances");
        self.client
            .start_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        info!(count = instance_ids.len(), "EC2 instances starting");
        Ok(())
    }

    /// Stop instances, hibernating when requested.
    ///
    /// Hibernation is best-effort: an instance whose configuration does not
    /// support it is stopped normally instead.
    #[instrument(skip(self, instance_ids), fields(count = instance_ids.len(), hibernate))]
    pub async fn stop(&self, instance_ids: &[String], hibernate: bool) -> Result<(), AwsError> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        debug!(instance_ids = ?instance_ids, hibernate, "stopping EC2 instances");
        let result = self
            .client
            .stop_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .hibernate(hibernate)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(count = instance_ids.len(), hibernate, "EC2 instances stopping");
                Ok(())
            }
            Err(e) if hibernate && is_hibernation_unsupported(&e.to_string()) => {
                warn!(
                    instance_ids = ?instance_ids,
                    "hibernation not supported, falling back to plain stop"
                );
                self.client
                    .stop_instances()
                    .set_instance_ids(Some(instance_ids.to_vec()))
                    .send()
                    .await
                    .map_err(|e| classify_sdk_error(&e.to_string()))?;
                Ok(())
            }
            Err(e) => Err(classify_sdk_error(&e.to_string())),
        }
    }

    /// Change a stopped instance's type.
    #[instrument(skip(self))]
    pub async fn modify_instance_type(
        &self,
        instance_id: &str,
        instance_type: &str,
    ) -> Result<(), AwsError> {
        debug!(instance_id, instance_type, "modifying EC2 instance type");
        self.client
            .modify_instance_attribute()
            .instance_id(instance_id)
            .instance_type(
                aws_sdk_ec2::types::AttributeValue::builder()
                    .value(instance_type)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        Ok(())
    }

    /// Start one instance, falling back through a prioritized list of
    /// instance types on insufficient capacity.
    ///
    /// The first entry is tried with the instance's current type when it
    /// matches; otherwise the instance is resized first. Returns the type
    /// the instance started with. When every type is exhausted the last
    /// capacity error is returned and the caller marks the instance
    /// start-failed.
    #[instrument(skip(self, type_preferences))]
    pub async fn start_with_type_fallback(
        &self,
        instance_id: &str,
        current_type: &str,
        type_preferences: &[String],
    ) -> Result<String, AwsError> {
        let ids = [instance_id.to_owned()];

        // No preference: start as-is.
        if type_preferences.is_empty() {
            self.start(&ids).await?;
            return Ok(current_type.to_owned());
        }

        let mut last_err = None;
        for desired_type in type_preferences {
            if desired_type != current_type || last_err.is_some() {
                if let Err(e) = self.modify_instance_type(instance_id, desired_type).await {
                    warn!(instance_id, desired_type = %desired_type, error = %e, "resize failed, trying next type");
                    last_err = Some(e);
                    continue;
                }
            }
            match self.start(&ids).await {
                Ok(()) => {
                    info!(instance_id, instance_type = %desired_type, "EC2 instance started");
                    return Ok(desired_type.clone());
                }
                Err(e) if e.is_insufficient_capacity() => {
                    warn!(instance_id, instance_type = %desired_type, "insufficient capacity, trying next type");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AwsError::Configuration("empty instance type fallback list".to_owned())
        }))
    }

    /// Apply informational tags to instances.
    pub async fn set_info_tags(
        &self,
        instance_ids: &[String],
        pairs: &[(String, String)],
    ) -> Result<(), AwsError> {
        if instance_ids.is_empty() || pairs.is_empty() {
            return Ok(());
        }
        let tags: Vec<aws_sdk_ec2::types::Tag> = pairs
            .iter()
            .map(|(k, v)| aws_sdk_ec2::types::Tag::builder().key(k).value(v).build())
            .collect();
        self.client
            .create_tags()
            .set_resources(Some(instance_ids.to_vec()))
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        Ok(())
    }

    /// Remove informational tags from instances.
    pub async fn clear_info_tags(
        &self,
        instance_ids: &[String],
        info_tags: &InfoTags,
    ) -> Result<(), AwsError> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let tags: Vec<aws_sdk_ec2::types::Tag> = info_tags
            .clear_keys()
            .into_iter()
            .map(|k| aws_sdk_ec2::types::Tag::builder().key(k).build())
            .collect();
        self.client
            .delete_tags()
            .set_resources(Some(instance_ids.to_vec()))
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        Ok(())
    }
}

fn runtime_info_from_instance(instance: &aws_sdk_ec2::types::Instance) -> Ec2RuntimeInfo {
    Ec2RuntimeInfo {
        instance_id: instance.instance_id().unwrap_or_default().to_owned(),
        state: instance
            .state()
            .and_then(|s| s.name())
            .map(aws_sdk_ec2::types::InstanceStateName::as_str)
            .unwrap_or("unknown")
            .to_owned(),
        instance_type: instance
            .instance_type()
            .map(aws_sdk_ec2::types::InstanceType::as_str)
            .unwrap_or("unknown")
            .to_owned(),
        tags: instance
            .tags()
            .iter()
            .filter_map(|tag| match (tag.key(), tag.value()) {
                (Some(k), Some(v)) => Some((k.to_owned(), v.to_owned())),
                _ => None,
            })
            .collect(),
        hibernation_configured: instance
            .hibernation_options()
            .and_then(|h| h.configured())
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(state: &str) -> Ec2RuntimeInfo {
        Ec2RuntimeInfo {
            instance_id: "i-0abc123".into(),
            state: state.into(),
            instance_type: "m5.large".into(),
            tags: HashMap::new(),
            hibernation_configured: false,
        }
    }

    #[test]
    fn state_predicates() {
        assert!(info("running").is_running());
        assert!(!info("running").is_stopped());
        assert!(info("stopped").is_stopped());
        assert!(info("running").is_schedulable());
        assert!(info("stopped").is_schedulable());
        for transitional in ["pending", "stopping", "shutting-down", "terminated"] {
            assert!(
                !info(transitional).is_schedulable(),
                "{transitional} should not be schedulable"
            );
        }
    }

    #[test]
    fn arn_construction() {
        let arn = info("running").arn("123456789012", "us-east-1");
        assert_eq!(
            arn.as_str(),
            "arn:aws:ec2:us-east-1:123456789012:instance/i-0abc123"
        );
        assert_eq!(arn.resource_id(), "i-0abc123");
    }
}
