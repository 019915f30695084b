use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arn::Arn;
use crate::states::InstanceState;

/// The services whose resources the scheduler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Ec2,
    Rds,
    Autoscaling,
}

impl Service {
    /// Return a string representation of the service.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ec2 => "ec2",
            Self::Rds => "rds",
            Self::Autoscaling => "autoscaling",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Service {
    type Err = RegistryKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ec2" => Ok(Self::Ec2),
            "rds" => Ok(Self::Rds),
            "autoscaling" => Ok(Self::Autoscaling),
            other => Err(RegistryKeyError::UnknownService(other.to_owned())),
        }
    }
}

/// Errors from parsing registry keys.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryKeyError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("malformed registry sort key: {0}")]
    MalformedSortKey(String),
}

/// Composite key of a registry row: account as the partition, and
/// `resource#<region>#<service>#<resource_type>#<resource_id>` as the sort
/// key. The sort key shape supports prefix queries by account and by
/// scheduling target without full scans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryKey {
    pub account: String,
    pub region: String,
    pub service: Service,
    pub resource_type: String,
    pub resource_id: String,
}

impl RegistryKey {
    /// The sort-key string for this key.
    #[must_use]
    pub fn sort_key(&self) -> String {
        format!(
            "resource#{}#{}#{}#{}",
            self.region, self.service, self.resource_type, self.resource_id
        )
    }

    /// The sort-key prefix selecting every resource of a scheduling target.
    #[must_use]
    pub fn target_prefix(region: &str, service: Service) -> String {
        format!("resource#{region}#{service}#")
    }

    /// Parse a sort key back into a registry key.
    pub fn parse_sort_key(account: &str, sort_key: &str) -> Result<Self, RegistryKeyError> {
        let parts: Vec<&str> = sort_key.split('#').collect();
        match parts.as_slice() {
            ["resource", region, service, resource_type, resource_id] => Ok(Self {
                account: account.to_owned(),
                region: (*region).to_owned(),
                service: service.parse()?,
                resource_type: (*resource_type).to_owned(),
                resource_id: (*resource_id).to_owned(),
            }),
            _ => Err(RegistryKeyError::MalformedSortKey(sort_key.to_owned())),
        }
    }
}

/// The size of an auto-scaling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsgSize {
    pub min_size: i32,
    pub desired_size: i32,
    pub max_size: i32,
}

impl AsgSize {
    /// The stopped size: everything scaled to zero.
    #[must_use]
    pub fn stopped() -> Self {
        Self {
            min_size: 0,
            desired_size: 0,
            max_size: 0,
        }
    }

    /// Whether this size is the stopped size.
    #[must_use]
    pub fn is_stopped(self) -> bool {
        self == Self::stopped()
    }

    /// Render as the `min-desired-max` tag format (e.g. `"1-2-4"`).
    #[must_use]
    pub fn to_tag_value(self) -> String {
        format!("{}-{}-{}", self.min_size, self.desired_size, self.max_size)
    }

    /// Parse the `min-desired-max` tag format.
    #[must_use]
    pub fn from_tag_value(value: &str) -> Option<Self> {
        let mut parts = value.split('-');
        let min_size = parts.next()?.trim().parse().ok()?;
        let desired_size = parts.next()?.trim().parse().ok()?;
        let max_size = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            min_size,
            desired_size,
            max_size,
        })
    }
}

/// Fingerprint of the most recent auto-scaling-group configuration written
/// by the scheduler, used to skip rewriting scheduled actions when nothing
/// changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsgConfiguration {
    pub last_updated: DateTime<Utc>,
    pub min_size: i32,
    pub desired_size: i32,
    pub max_size: i32,
    /// Hash of the schedule and period definitions the scheduled actions
    /// were compiled from.
    pub schedule_hash: String,
    /// When the compiled actions expire and must be refreshed even if the
    /// schedule is unchanged.
    pub valid_until: DateTime<Utc>,
}

impl AsgConfiguration {
    /// The group size recorded in this configuration.
    #[must_use]
    pub fn asg_size(&self) -> AsgSize {
        AsgSize {
            min_size: self.min_size,
            desired_size: self.desired_size,
            max_size: self.max_size,
        }
    }

    /// Whether this configuration still covers `schedule_hash` at `now`.
    #[must_use]
    pub fn is_current(&self, schedule_hash: &str, now: DateTime<Utc>) -> bool {
        self.schedule_hash == schedule_hash && now < self.valid_until
    }
}

/// A resource the scheduler manages, as persisted in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredInstance {
    pub account: String,
    pub region: String,
    pub resource_id: String,
    pub arn: Arn,
    /// The schedule name attached via the schedule tag.
    pub schedule: String,
    /// Display name of the resource (typically the `Name` tag).
    pub name: String,
    pub stored_state: InstanceState,
    /// Auto-scaling groups only: the last configuration fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_configured: Option<AsgConfiguration>,
}

impl RegisteredInstance {
    /// The service owning this resource, derived from the ARN.
    pub fn service(&self) -> Result<Service, RegistryKeyError> {
        self.arn.service().parse()
    }

    /// The resource type component of the ARN.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        self.arn.resource_type()
    }

    /// The registry key for this resource.
    pub fn key(&self) -> Result<RegistryKey, RegistryKeyError> {
        Ok(RegistryKey {
            account: self.account.clone(),
            region: self.region.clone(),
            service: self.service()?,
            resource_type: self.resource_type().to_owned(),
            resource_id: self.resource_id.clone(),
        })
    }

    /// `account:region:service:resource_id`, used in logs and events.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.account,
            self.region,
            self.arn.service(),
            self.resource_id
        )
    }
}
