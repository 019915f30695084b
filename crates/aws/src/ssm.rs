use aws_sdk_ssm::types::MaintenanceWindowFilter;
use tracing::{instrument, warn};

use offhours_core::{MaintenanceWindow, maint_win::parse_execution_time};

use crate::auth::AssumedRole;
use crate::error::{AwsError, classify_sdk_error};

/// SSM client for listing the maintenance windows of one scheduling
/// target.
pub struct SsmMaintenanceWindows {
    client: aws_sdk_ssm::Client,
    account: String,
    region: String,
}

impl std::fmt::Debug for SsmMaintenanceWindows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsmMaintenanceWindows")
            .field("account", &self.account)
            .field("region", &self.region)
            .field("client", &"<SsmClient>")
            .finish()
    }
}

impl SsmMaintenanceWindows {
    /// Create a client using the target's assumed role.
    #[must_use]
    pub fn new(role: &AssumedRole) -> Self {
        Self {
            client: aws_sdk_ssm::Client::new(role.sdk_config()),
            account: role.account.clone(),
            region: role.region.clone(),
        }
    }

    /// Create a client with a pre-built SDK client (for testing).
    #[must_use]
    pub fn with_client(
        client: aws_sdk_ssm::Client,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            client,
            account: account.into(),
            region: region.into(),
        }
    }

    /// Fetch every *enabled* maintenance window in the target, paginated.
    ///
    /// Windows the service reports with fields the model rejects are
    /// logged and skipped; one malformed window must not hide the rest.
    #[instrument(skip(self), fields(account = %self.account, region = %self.region))]
    pub async fn fetch_enabled(&self) -> Result<Vec<MaintenanceWindow>, AwsError> {
        let enabled_filter = MaintenanceWindowFilter::builder()
            .key("Enabled")
            .values("true")
            .build();

        let mut windows = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let result = self
                .client
                .describe_maintenance_windows()
                .filters(enabled_filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            for identity in result.window_identities() {
                let window_id = identity.window_id().unwrap_or_default().to_owned();
                let window_name = identity.name().unwrap_or_default().to_owned();

                let timezone = match identity.schedule_timezone() {
                    Some(tz) => match tz.parse() {
                        Ok(tz) => tz,
                        Err(_) => {
                            warn!(window_id = %window_id, timezone = tz, "skipping window with unknown timezone");
                            continue;
                        }
                    },
                    // A window created without an explicit timezone reports
                    // its times in UTC.
                    None => chrono_tz::UTC,
                };

                let next_execution_time = identity
                    .next_execution_time()
                    .and_then(parse_execution_time);

                let window = MaintenanceWindow {
                    account: self.account.clone(),
                    region: self.region.clone(),
                    window_id,
                    window_name,
                    timezone,
                    next_execution_time,
                    duration_hours: identity.duration().unwrap_or(0).unsigned_abs(),
                };

                if let Err(e) = window.validate() {
                    warn!(window_id = %window.window_id, error = %e, "skipping invalid maintenance window");
                    continue;
                }
                windows.push(window);
            }

            match result.next_token() {
                Some(token) => next_token = Some(token.to_owned()),
                None => break,
            }
        }
        Ok(windows)
    }
}
