use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing an ARN string.
#[derive(Debug, Clone, Error)]
pub enum ArnError {
    /// The string does not have the `arn:partition:service:region:account:resource` shape.
    #[error("malformed ARN: {0}")]
    Malformed(String),
}

/// An Amazon Resource Name, stored as the original string with accessors for
/// the components the scheduler cares about.
///
/// The resource part may be `type/id` (EC2), `type:id` (RDS), or a bare id.
/// For Auto Scaling groups the resource is
/// `autoScalingGroup:<uuid>:autoScalingGroupName/<name>`, where the group
/// name is the resource id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arn(String);

impl Arn {
    /// Parse an ARN, validating the six-part structure.
    pub fn parse(s: impl Into<String>) -> Result<Self, ArnError> {
        let s = s.into();
        let parts: Vec<&str> = s.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" || parts[2].is_empty() {
            return Err(ArnError::Malformed(s));
        }
        Ok(Self(s))
    }

    /// The raw ARN string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn part(&self, idx: usize) -> &str {
        self.0.splitn(6, ':').nth(idx).unwrap_or("")
    }

    /// The service component (e.g. `"ec2"`, `"rds"`, `"autoscaling"`).
    #[must_use]
    pub fn service(&self) -> &str {
        self.part(2)
    }

    /// The region component.
    #[must_use]
    pub fn region(&self) -> &str {
        self.part(3)
    }

    /// The 12-digit account id component.
    #[must_use]
    pub fn account(&self) -> &str {
        self.part(4)
    }

    /// The resource type: the part before the first `/` or `:` of the
    /// resource component, or `"instance"` when the resource is a bare id.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        let resource = self.part(5);
        match resource.find(['/', ':']) {
            Some(pos) => &resource[..pos],
            None => "instance",
        }
    }

    /// The resource id: the final `/`- or `:`-separated segment of the
    /// resource component.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        let resource = self.part(5);
        resource
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(resource)
    }
}

impl std::fmt::Display for Arn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Arn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
