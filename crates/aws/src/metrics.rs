use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use tracing::{debug, instrument};

use crate::error::{AwsError, classify_sdk_error};

/// `CloudWatch` allows at most this many data points per `put_metric_data`
/// call.
const MAX_DATA_PER_PUT: usize = 20;

/// One instance-count observation: how many resources of a service and
/// instance type are in a given state this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCountMetric {
    pub service: String,
    pub instance_type: String,
    pub state: String,
    pub count: usize,
}

/// Publisher of per-cycle operational metrics.
pub struct OpsMetrics {
    client: aws_sdk_cloudwatch::Client,
    namespace: String,
}

impl std::fmt::Debug for OpsMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsMetrics")
            .field("namespace", &self.namespace)
            .field("client", &"<CloudWatchClient>")
            .finish()
    }
}

impl OpsMetrics {
    /// Create a publisher over an SDK config and metric namespace.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig, namespace: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_cloudwatch::Client::new(config),
            namespace: namespace.into(),
        }
    }

    /// Create a publisher with a pre-built client (for testing).
    #[must_use]
    pub fn with_client(client: aws_sdk_cloudwatch::Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Publish instance counts, chunked to the service's datum limit.
    #[instrument(skip(self, counts), fields(namespace = %self.namespace, count = counts.len()))]
    pub async fn publish_instance_counts(
        &self,
        counts: &[InstanceCountMetric],
    ) -> Result<(), AwsError> {
        for chunk in counts.chunks(MAX_DATA_PER_PUT) {
            let data: Vec<MetricDatum> = chunk.iter().map(to_datum).collect();
            debug!(count = data.len(), "putting instance-count metric data");
            self.client
                .put_metric_data()
                .namespace(&self.namespace)
                .set_metric_data(Some(data))
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;
        }
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_datum(metric: &InstanceCountMetric) -> MetricDatum {
    MetricDatum::builder()
        .metric_name("ManagedInstances")
        .unit(StandardUnit::Count)
        .value(metric.count as f64)
        .dimensions(
            Dimension::builder()
                .name("Service")
                .value(&metric.service)
                .build(),
        )
        .dimensions(
            Dimension::builder()
                .name("InstanceType")
                .value(&metric.instance_type)
                .build(),
        )
        .dimensions(
            Dimension::builder()
                .name("State")
                .value(&metric.state)
                .build(),
        )
        .build()
}
