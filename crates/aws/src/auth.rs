use aws_config::SdkConfig;
use tracing::{debug, info};

use crate::config::AwsBaseConfig;
use crate::error::AwsError;

const DEFAULT_SESSION_NAME: &str = "offhours-scheduler";

/// Credentials for one scheduling target: the scheduling role assumed in
/// the target account, scoped to a region.
///
/// All service clients for a target are built from this config, so every
/// provider call a runner makes happens under the target account's own
/// role.
#[derive(Clone)]
pub struct AssumedRole {
    pub account: String,
    pub region: String,
    pub role_arn: String,
    config: SdkConfig,
}

impl std::fmt::Debug for AssumedRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssumedRole")
            .field("account", &self.account)
            .field("region", &self.region)
            .field("role_arn", &self.role_arn)
            .field("config", &"<SdkConfig>")
            .finish()
    }
}

impl AssumedRole {
    /// The SDK config carrying the assumed credentials.
    #[must_use]
    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Build an `AssumedRole` from a pre-built SDK config (for tests and
    /// local development against an endpoint override).
    #[must_use]
    pub fn from_config(
        account: impl Into<String>,
        region: impl Into<String>,
        config: SdkConfig,
    ) -> Self {
        let account = account.into();
        Self {
            role_arn: format!("arn:aws:iam::{account}:role/local"),
            account,
            region: region.into(),
            config,
        }
    }
}

/// Build the hub SDK configuration from the default credential chain.
pub async fn build_hub_config(base: &AwsBaseConfig) -> SdkConfig {
    let mut loader = aws_config::from_env().region(aws_config::Region::new(base.region.clone()));
    if let Some(endpoint) = &base.endpoint_url {
        debug!(endpoint = %endpoint, "using custom AWS endpoint");
        loader = loader.endpoint_url(endpoint);
    }
    loader.load().await
}

/// Assume the scheduling role in a target account and region.
///
/// Unlike a best-effort credential refresh, a failed assumption here is
/// fatal to the whole target: the runner must not fall back to hub
/// credentials and schedule resources it can only partially see.
pub async fn assume_scheduling_role(
    hub_config: &SdkConfig,
    base: &AwsBaseConfig,
    account: &str,
    region: &str,
) -> Result<AssumedRole, AwsError> {
    let role_arn = format!(
        "arn:aws:iam::{account}:role/{}",
        base.scheduler_role_name
    );
    info!(role_arn = %role_arn, region = %region, "assuming scheduling role");

    let sts_client = aws_sdk_sts::Client::new(hub_config);
    let mut request = sts_client
        .assume_role()
        .role_arn(&role_arn)
        .role_session_name(base.session_name.as_deref().unwrap_or(DEFAULT_SESSION_NAME));
    if let Some(external_id) = &base.external_id {
        request = request.external_id(external_id);
    }

    let response = request.send().await.map_err(|e| AwsError::RoleAssumption {
        role_arn: role_arn.clone(),
        message: e.to_string(),
    })?;

    let creds = response
        .credentials()
        .ok_or_else(|| AwsError::RoleAssumption {
            role_arn: role_arn.clone(),
            message: "STS response carried no credentials".to_owned(),
        })?;

    let static_creds = aws_credential_types::Credentials::new(
        creds.access_key_id(),
        creds.secret_access_key(),
        Some(creds.session_token().to_owned()),
        None,
        "offhours-assumed-role",
    );

    let mut loader = aws_config::from_env()
        .region(aws_config::Region::new(region.to_owned()))
        .credentials_provider(static_creds);
    if let Some(endpoint) = &base.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    info!(role_arn = %role_arn, "scheduling role assumed");
    Ok(AssumedRole {
        account: account.to_owned(),
        region: region.to_owned(),
        role_arn,
        config: loader.load().await,
    })
}
