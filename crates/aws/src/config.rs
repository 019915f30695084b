use serde::{Deserialize, Serialize};

/// Shared base configuration for AWS access.
///
/// Carries the region, the name of the scheduling role to assume in target
/// accounts, and an endpoint URL override for local development (e.g.
/// `LocalStack`).
#[derive(Clone, Serialize, Deserialize)]
pub struct AwsBaseConfig {
    /// AWS region (e.g. `"us-east-1"`).
    pub region: String,

    /// Name of the IAM role assumed in each target account.
    pub scheduler_role_name: String,

    /// Optional endpoint URL override for local development.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Optional STS session name (defaults to `"offhours-scheduler"`).
    #[serde(default)]
    pub session_name: Option<String>,

    /// Optional external ID for cross-account trust policies.
    #[serde(default)]
    pub external_id: Option<String>,
}

impl std::fmt::Debug for AwsBaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsBaseConfig")
            .field("region", &self.region)
            .field("scheduler_role_name", &self.scheduler_role_name)
            .field("endpoint_url", &self.endpoint_url)
            .field("session_name", &self.session_name)
            .field(
                "external_id",
                &self.external_id.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl AwsBaseConfig {
    /// Create a new config with the given region and scheduling role name.
    pub fn new(region: impl Into<String>, scheduler_role_name: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            scheduler_role_name: scheduler_role_name.into(),
            endpoint_url: None,
            session_name: None,
            external_id: None,
        }
    }

    /// Set an endpoint URL override for local development.
    #[must_use]
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Set the STS session name for assume-role.
    #[must_use]
    pub fn with_session_name(mut self, session_name: impl Into<String>) -> Self {
        self.session_name = Some(session_name.into());
        self
    }

    /// Set the external ID for cross-account trust policies.
    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_sets_fields() {
        let config = AwsBaseConfig::new("eu-west-1", "offhours-scheduling-role");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.scheduler_role_name, "offhours-scheduling-role");
        assert!(config.endpoint_url.is_none());
    }

    #[test]
    fn builder_chain() {
        let config = AwsBaseConfig::new("us-east-1", "role")
            .with_endpoint_url("http://localhost:4566")
            .with_session_name("test-session")
            .with_external_id("ext-123");
        assert_eq!(
            config.endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
        assert_eq!(config.session_name.as_deref(), Some("test-session"));
        assert_eq!(config.external_id.as_deref(), Some("ext-123"));
    }

    #[test]
    fn debug_redacts_external_id() {
        let config = AwsBaseConfig::new("us-east-1", "role").with_external_id("secret-ext-id");
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret-ext-id"));
    }

    #[test]
    fn serde_round_trip() {
        let config = AwsBaseConfig::new("ap-southeast-1", "role").with_external_id("ext");
        let json = serde_json::to_string(&config).unwrap();
        let back: AwsBaseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.region, "ap-southeast-1");
        assert_eq!(back.external_id.as_deref(), Some("ext"));
    }
}
