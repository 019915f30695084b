use std::sync::Arc;

use tracing::warn;

use offhours_aws::{SchedulingActionEvent, SchedulingEventBus};

/// Buffer of scheduling-action events, flushed after the registry writes
/// of a cycle.
///
/// Events go to the local bus and, when configured, to the globally
/// aggregated bus. Both are best-effort: a publish failure is logged and
/// never fails the cycle.
#[derive(Default)]
pub struct EventsBuffer {
    events: Vec<SchedulingActionEvent>,
}

impl EventsBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one event.
    pub fn push(&mut self, event: SchedulingActionEvent) {
        self.events.push(event);
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Publish all queued events to every bus and drain the buffer.
    pub async fn flush(&mut self, buses: &[Arc<SchedulingEventBus>]) {
        if self.events.is_empty() {
            return;
        }
        for bus in buses {
            if let Err(e) = bus.publish(&self.events).await {
                warn!(error = %e, "failed to publish scheduling-action events");
            }
        }
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> SchedulingActionEvent {
        SchedulingActionEvent {
            account: "123456789012".into(),
            region: "us-east-1".into(),
            service: "ec2".into(),
            resource_id: id.into(),
            requested_action: "start".into(),
            action_taken: "started".into(),
            schedule: "biz".into(),
            resource_arn: format!("arn:aws:ec2:us-east-1:123456789012:instance/{id}"),
        }
    }

    #[test]
    fn buffer_accumulates() {
        let mut buffer = EventsBuffer::new();
        assert!(buffer.is_empty());
        buffer.push(event("i-1"));
        buffer.push(event("i-2"));
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn flush_with_no_buses_drains() {
        let mut buffer = EventsBuffer::new();
        buffer.push(event("i-1"));
        buffer.flush(&[]).await;
        assert!(buffer.is_empty());
    }
}
