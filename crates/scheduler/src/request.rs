use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use offhours_core::{PeriodDefinition, ScheduleDefinition, Service};

/// The only action a runner accepts.
pub const SCHEDULER_RUN_ACTION: &str = "scheduler:run";

/// Errors from building or validating a dispatch request.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("unknown request action {0:?} (expected \"scheduler:run\")")]
    UnknownAction(String),

    #[error("request could not be encoded: {0}")]
    Encoding(String),

    #[error("dispatch to target {target} failed: {message}")]
    Failed { target: String, message: String },
}

/// The orchestrator-to-runner dispatch payload for one scheduling target.
///
/// `schedules` and `periods` carry the target's working set inline; when
/// the encoded request would exceed the payload ceiling they are omitted
/// and the runner hydrates from the durable store instead. For large
/// deployments the omitted form is the common case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingRequest {
    pub action: String,
    pub account: String,
    pub region: String,
    pub service: Service,
    /// The instant the runner schedules against.
    pub current_dt: DateTime<Utc>,
    /// When the orchestrator built this request.
    pub dispatch_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<Vec<ScheduleDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periods: Option<Vec<PeriodDefinition>>,
    /// Optional subset filter: only resources whose schedule is named here
    /// are processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_names: Option<Vec<String>>,
}

impl SchedulingRequest {
    /// Build a request with the working set inlined.
    #[must_use]
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
        service: Service,
        current_dt: DateTime<Utc>,
        dispatch_time: DateTime<Utc>,
    ) -> Self {
        Self {
            action: SCHEDULER_RUN_ACTION.to_owned(),
            account: account.into(),
            region: region.into(),
            service,
            current_dt,
            dispatch_time,
            schedules: None,
            periods: None,
            schedule_names: None,
        }
    }

    /// Validate the action discriminator.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.action != SCHEDULER_RUN_ACTION {
            return Err(DispatchError::UnknownAction(self.action.clone()));
        }
        Ok(())
    }

    /// The target identifier, used in logs and dispatch errors.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}:{}", self.account, self.region, self.service)
    }

    /// Encode the request, dropping the inline stores when the encoded
    /// form exceeds `ceiling_bytes`. Returns the JSON string actually
    /// dispatched; `self` reflects what was sent.
    pub fn encode_bounded(&mut self, ceiling_bytes: usize) -> Result<String, DispatchError> {
        let encoded =
            serde_json::to_string(self).map_err(|e| DispatchError::Encoding(e.to_string()))?;
        if encoded.len() <= ceiling_bytes {
            return Ok(encoded);
        }

        tracing::warn!(
            target = %self.target(),
            encoded_bytes = encoded.len(),
            ceiling_bytes,
            "request exceeds payload ceiling, omitting inline stores"
        );
        self.schedules = None;
        self.periods = None;
        serde_json::to_string(self).map_err(|e| DispatchError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use offhours_core::PeriodRef;

    use super::*;

    fn request() -> SchedulingRequest {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        SchedulingRequest::new("123456789012", "us-east-1", Service::Ec2, now, now)
    }

    fn period(name: &str) -> PeriodDefinition {
        PeriodDefinition {
            name: name.into(),
            begintime: Some("09:00".into()),
            endtime: Some("17:00".into()),
            weekdays: None,
            monthdays: None,
            months: None,
            description: None,
        }
    }

    fn schedule(name: &str) -> ScheduleDefinition {
        ScheduleDefinition {
            name: name.into(),
            periods: vec![PeriodRef::named("office-hours")],
            timezone: None,
            override_status: None,
            description: None,
            maintenance_windows: None,
            stop_new_instances: None,
            use_maintenance_window: None,
            enforced: None,
            hibernate: None,
            retain_running: None,
        }
    }

    #[test]
    fn validate_accepts_run_action() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn validate_rejects_other_actions() {
        let mut req = request();
        req.action = "scheduler:stop".into();
        assert!(matches!(
            req.validate().unwrap_err(),
            DispatchError::UnknownAction(_)
        ));
    }

    #[test]
    fn serde_round_trip() {
        let mut req = request();
        req.schedules = Some(vec![schedule("biz")]);
        req.periods = Some(vec![period("office-hours")]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"action\":\"scheduler:run\""));
        assert!(json.contains("\"service\":\"ec2\""));
        let back: SchedulingRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn small_request_keeps_inline_stores() {
        let mut req = request();
        req.schedules = Some(vec![schedule("biz")]);
        req.periods = Some(vec![period("office-hours")]);
        let encoded = req.encode_bounded(64 * 1024).unwrap();
        assert!(req.schedules.is_some());
        assert!(encoded.contains("office-hours"));
    }

    #[test]
    fn oversized_request_omits_inline_stores() {
        let mut req = request();
        req.schedules = Some((0..500).map(|i| schedule(&format!("sched-{i}"))).collect());
        req.periods = Some(vec![period("office-hours")]);
        let encoded = req.encode_bounded(2048).unwrap();
        assert!(req.schedules.is_none());
        assert!(req.periods.is_none());
        assert!(encoded.len() <= 2048);
        // The target identity always survives.
        assert!(encoded.contains("123456789012"));
    }

    #[test]
    fn target_identifier_shape() {
        assert_eq!(request().target(), "123456789012:us-east-1:ec2");
    }
}
