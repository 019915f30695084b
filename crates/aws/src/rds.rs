use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use offhours_core::Arn;

use crate::auth::AssumedRole;
use crate::error::{AwsError, classify_sdk_error};
use crate::tagging::InfoTags;

/// Statuses the scheduler can act on. Everything else (`starting`,
/// `backing-up`, `modifying`, ...) is skipped until it settles.
const SCHEDULABLE_STATUSES: [&str; 2] = ["available", "stopped"];

/// Engines whose instances are managed through their cluster and must not
/// be started or stopped individually.
const CLUSTER_MANAGED_ENGINES: [&str; 2] = ["aurora-mysql", "aurora-postgresql"];

/// Runtime information for one RDS database instance or cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdsRuntimeInfo {
    /// DB instance identifier or DB cluster identifier.
    pub identifier: String,
    pub arn: Arn,
    pub status: String,
    pub engine: String,
    pub is_cluster: bool,
    pub tags: HashMap<String, String>,
}

impl RdsRuntimeInfo {
    /// Whether the resource is currently available (running).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == "available"
    }

    /// Whether the resource is currently stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.status == "stopped"
    }

    /// Whether the resource is in a state the scheduler can act on.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        SCHEDULABLE_STATUSES.contains(&self.status.as_str())
    }

    /// Whether the scheduler supports this resource at all. Returns the
    /// reason when it does not; checked once at registration, after which
    /// unsupported resources are skipped forever.
    pub fn check_supported(&self) -> Result<(), String> {
        if !self.is_cluster && CLUSTER_MANAGED_ENGINES.contains(&self.engine.as_str()) {
            return Err(format!(
                "DB instance {} uses engine {} and is managed through its cluster",
                self.identifier, self.engine
            ));
        }
        Ok(())
    }
}

/// RDS service adapter for one scheduling target. Covers both DB instances
/// and DB clusters; the `is_cluster` flag on the runtime info routes each
/// call.
pub struct RdsScheduler {
    client: aws_sdk_rds::Client,
    account: String,
    region: String,
}

impl std::fmt::Debug for RdsScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdsScheduler")
            .field("account", &self.account)
            .field("region", &self.region)
            .field("client", &"<RdsClient>")
            .finish()
    }
}

impl RdsScheduler {
    /// Create an adapter using the target's assumed role.
    #[must_use]
    pub fn new(role: &AssumedRole) -> Self {
        Self {
            client: aws_sdk_rds::Client::new(role.sdk_config()),
            account: role.account.clone(),
            region: role.region.clone(),
        }
    }

    /// Create an adapter with a pre-built client (for testing).
    #[must_use]
    pub fn with_client(
        client: aws_sdk_rds::Client,
        account: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            client,
            account: account.into(),
            region: region.into(),
        }
    }

    /// Describe every DB instance and cluster carrying the schedule tag.
    #[instrument(skip(self), fields(account = %self.account, region = %self.region))]
    pub async fn describe_tagged(
        &self,
        schedule_tag_key: &str,
    ) -> Result<Vec<RdsRuntimeInfo>, AwsError> {
        let mut infos = self.describe_instances().await?;
        infos.extend(self.describe_clusters().await?);
        infos.retain(|info| info.tags.contains_key(schedule_tag_key));
        Ok(infos)
    }

    /// Describe every DB instance, paginated.
    async fn describe_instances(&self) -> Result<Vec<RdsRuntimeInfo>, AwsError> {
        let mut infos = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let result = self
                .client
                .describe_db_instances()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            for db in result.db_instances() {
                // Aurora members carry a cluster identifier; the cluster row
                // itself is scheduled, not the member.
                let Some(arn) = db.db_instance_arn() else {
                    continue;
                };
                let Ok(arn) = Arn::parse(arn) else {
                    warn!(arn, "skipping DB instance with unparseable ARN");
                    continue;
                };
                infos.push(RdsRuntimeInfo {
                    identifier: db.db_instance_identifier().unwrap_or_default().to_owned(),
                    arn,
                    status: db.db_instance_status().unwrap_or_default().to_owned(),
                    engine: db.engine().unwrap_or_default().to_owned(),
                    is_cluster: false,
                    tags: tag_map(db.tag_list()),
                });
            }
            match result.marker() {
                Some(m) => marker = Some(m.to_owned()),
                None => break,
            }
        }
        Ok(infos)
    }

    /// Describe every DB cluster, paginated.
    async fn describe_clusters(&self) -> Result<Vec<RdsRuntimeInfo>, AwsError> {
        let mut infos = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let result = self
                .client
                .describe_db_clusters()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            for cluster in result.db_clusters() {
                let Some(arn) = cluster.db_cluster_arn() else {
                    continue;
                };
                let Ok(arn) = Arn::parse(arn) else {
                    warn!(arn, "skipping DB cluster with unparseable ARN");
                    continue;
                };
                infos.push(RdsRuntimeInfo {
                    identifier: cluster
                        .db_cluster_identifier()
                        .unwrap_or_default()
                        .to_owned(),
                    arn,
                    status: cluster.status().unwrap_or_default().to_owned(),
                    engine: cluster.engine().unwrap_or_default().to_owned(),
                    is_cluster: true,
                    tags: tag_map(cluster.tag_list()),
                });
            }
            match result.marker() {
                Some(m) => marker = Some(m.to_owned()),
                None => break,
            }
        }
        Ok(infos)
    }

    /// Describe one resource by identifier.
    pub async fn describe(
        &self,
        identifier: &str,
        is_cluster: bool,
    ) -> Result<Option<RdsRuntimeInfo>, AwsError> {
        if is_cluster {
            let result = self
                .client
                .describe_db_clusters()
                .db_cluster_identifier(identifier)
                .send()
                .await;
            match result {
                Ok(output) => Ok(output.db_clusters().first().and_then(|cluster| {
                    let arn = Arn::parse(cluster.db_cluster_arn()?).ok()?;
                    Some(RdsRuntimeInfo {
                        identifier: identifier.to_owned(),
                        arn,
                        status: cluster.status().unwrap_or_default().to_owned(),
                        engine: cluster.engine().unwrap_or_default().to_owned(),
                        is_cluster: true,
                        tags: tag_map(cluster.tag_list()),
                    })
                })),
                Err(e) if e.to_string().contains("DBClusterNotFound") => Ok(None),
                Err(e) => Err(classify_sdk_error(&e.to_string())),
            }
        } else {
            let result = self
                .client
                .describe_db_instances()
                .db_instance_identifier(identifier)
                .send()
                .await;
            match result {
                Ok(output) => Ok(output.db_instances().first().and_then(|db| {
                    let arn = Arn::parse(db.db_instance_arn()?).ok()?;
                    Some(RdsRuntimeInfo {
                        identifier: identifier.to_owned(),
                        arn,
                        status: db.db_instance_status().unwrap_or_default().to_owned(),
                        engine: db.engine().unwrap_or_default().to_owned(),
                        is_cluster: false,
                        tags: tag_map(db.tag_list()),
                    })
                })),
                Err(e) if e.to_string().contains("DBInstanceNotFound") => Ok(None),
                Err(e) => Err(classify_sdk_error(&e.to_string())),
            }
        }
    }

    /// Start a DB instance or cluster.
    #[instrument(skip(self))]
    pub async fn start(&self, identifier: &str, is_cluster: bool) -> Result<(), AwsError> {
        debug!(identifier, is_cluster, "starting RDS resource");
        if is_cluster {
            self.client
                .start_db_cluster()
                .db_cluster_identifier(identifier)
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;
        } else {
            self.client
                .start_db_instance()
                .db_instance_identifier(identifier)
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;
        }
        info!(identifier, is_cluster, "RDS resource starting");
        Ok(())
    }

    /// Stop a DB instance or cluster.
    #[instrument(skip(self))]
    pub async fn stop(&self, identifier: &str, is_cluster: bool) -> Result<(), AwsError> {
        debug!(identifier, is_cluster, "stopping RDS resource");
        if is_cluster {
            self.client
                .stop_db_cluster()
                .db_cluster_identifier(identifier)
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;
        } else {
            self.client
                .stop_db_instance()
                .db_instance_identifier(identifier)
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;
        }
        info!(identifier, is_cluster, "RDS resource stopping");
        Ok(())
    }

    /// Apply informational tags to a resource by ARN.
    pub async fn set_info_tags(
        &self,
        arn: &Arn,
        pairs: &[(String, String)],
    ) -> Result<(), AwsError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let tags: Vec<aws_sdk_rds::types::Tag> = pairs
            .iter()
            .map(|(k, v)| aws_sdk_rds::types::Tag::builder().key(k).value(v).build())
            .collect();
        self.client
            .add_tags_to_resource()
            .resource_name(arn.as_str())
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        Ok(())
    }

    /// Remove informational tags from a resource by ARN.
    pub async fn clear_info_tags(&self, arn: &Arn, info_tags: &InfoTags) -> Result<(), AwsError> {
        self.client
            .remove_tags_from_resource()
            .resource_name(arn.as_str())
            .set_tag_keys(Some(info_tags.clear_keys()))
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e.to_string()))?;
        Ok(())
    }
}

fn tag_map(tags: &[aws_sdk_rds::types::Tag]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|tag| match (tag.key(), tag.value()) {
            (Some(k), Some(v)) => Some((k.to_owned(), v.to_owned())),
            _ => None,
        })
        .collect()
}
