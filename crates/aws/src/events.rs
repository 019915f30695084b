use aws_sdk_eventbridge::types::PutEventsRequestEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::error::{AwsError, classify_sdk_error};

/// Event source for all scheduler emissions.
pub const EVENT_SOURCE: &str = "instance-scheduler";

/// Detail type for per-action events.
pub const SCHEDULING_ACTION_DETAIL_TYPE: &str = "Scheduling Action";

/// `EventBridge` allows at most this many entries per `put_events` call.
const MAX_ENTRIES_PER_PUT: usize = 10;

/// The detail payload of one scheduling-action event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingActionEvent {
    pub account: String,
    pub region: String,
    pub service: String,
    pub resource_id: String,
    pub requested_action: String,
    pub action_taken: String,
    pub schedule: String,
    /// The resource ARN, carried in the event's `resources` list.
    #[serde(skip)]
    pub resource_arn: String,
}

/// Emitter of scheduling-action events onto one event bus.
///
/// A runner typically holds two of these: the local bus in the target
/// region and the globally aggregated bus in the hub account.
pub struct SchedulingEventBus {
    client: aws_sdk_eventbridge::Client,
    bus_name: String,
}

impl std::fmt::Debug for SchedulingEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingEventBus")
            .field("bus_name", &self.bus_name)
            .field("client", &"<EventBridgeClient>")
            .finish()
    }
}

impl SchedulingEventBus {
    /// Create an emitter over an SDK config and bus name (a name or a bus
    /// ARN; an ARN routes cross-account).
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig, bus_name: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_eventbridge::Client::new(config),
            bus_name: bus_name.into(),
        }
    }

    /// Create an emitter with a pre-built client (for testing).
    #[must_use]
    pub fn with_client(client: aws_sdk_eventbridge::Client, bus_name: impl Into<String>) -> Self {
        Self {
            client,
            bus_name: bus_name.into(),
        }
    }

    /// Publish a batch of scheduling-action events, chunked to the
    /// service's entry limit. Failed entries are reported but do not fail
    /// the cycle; events are best-effort observability.
    #[instrument(skip(self, events), fields(bus = %self.bus_name, count = events.len()))]
    pub async fn publish(&self, events: &[SchedulingActionEvent]) -> Result<(), AwsError> {
        for chunk in events.chunks(MAX_ENTRIES_PER_PUT) {
            let mut entries = Vec::with_capacity(chunk.len());
            for event in chunk {
                let detail = serde_json::to_string(event)
                    .map_err(|e| AwsError::Configuration(e.to_string()))?;
                entries.push(
                    PutEventsRequestEntry::builder()
                        .event_bus_name(&self.bus_name)
                        .source(EVENT_SOURCE)
                        .detail_type(SCHEDULING_ACTION_DETAIL_TYPE)
                        .resources(&event.resource_arn)
                        .detail(detail)
                        .build(),
                );
            }

            debug!(count = entries.len(), "putting scheduling-action events");
            let result = self
                .client
                .put_events()
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| classify_sdk_error(&e.to_string()))?;

            let failed = result.failed_entry_count();
            if failed > 0 {
                let messages: Vec<&str> = result
                    .entries()
                    .iter()
                    .filter_map(|entry| entry.error_message())
                    .collect();
                error!(
                    failed,
                    errors = ?messages,
                    "some scheduling-action events failed to publish"
                );
            }
        }
        if !events.is_empty() {
            info!(count = events.len(), bus = %self.bus_name, "scheduling-action events published");
        }
        Ok(())
    }
}
