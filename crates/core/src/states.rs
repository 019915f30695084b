use serde::{Deserialize, Serialize};

/// The state a schedule prescribes for an instant in time.
///
/// `Any` means "no opinion": a period that has a begin time but no end time
/// is `Any` before the begin time so it does not force another period's
/// running resource to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleState {
    Running,
    Stopped,
    Any,
}

impl ScheduleState {
    /// Return a string representation of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Any => "any",
        }
    }
}

impl std::fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The scheduler's memory of what it most recently intended for a resource.
///
/// This is distinct from the resource's actual runtime state. The registry
/// owns this value and rewrites it after every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Never scheduled before (freshly registered).
    Unknown,
    Running,
    Stopped,
    /// Started manually during a running period; preserved past period end
    /// when the schedule carries `retain_running`.
    RetainRunning,
    /// The most recent start attempt failed (e.g. insufficient capacity);
    /// retried on the next running cycle.
    StartFailed,
    /// The resource was reconfigured (resized) rather than started/stopped.
    Configured,
    /// The schedule had no opinion at the last cycle.
    Any,
}

impl InstanceState {
    /// Return a string representation of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::RetainRunning => "retain_running",
            Self::StartFailed => "start_failed",
            Self::Configured => "configured",
            Self::Any => "any",
        }
    }

    /// Parse a stored state string. Unrecognized values map to `Unknown` so
    /// a corrupted registry row degrades to "treat as new" rather than
    /// failing the cycle.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "retain_running" => Self::RetainRunning,
            "start_failed" => Self::StartFailed,
            "configured" => Self::Configured,
            "any" => Self::Any,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The action the decision function requests for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedAction {
    DoNothing,
    Start,
    Stop,
    /// Rewrite the resource size before starting. Only produced by the
    /// service adapters, and only for resource types that carry a desired
    /// size from the schedule.
    Configure,
}

impl RequestedAction {
    /// Return a string representation of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DoNothing => "do_nothing",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Configure => "configure",
        }
    }
}

impl std::fmt::Display for RequestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_state_serde() {
        assert_eq!(
            serde_json::to_string(&ScheduleState::Running).unwrap(),
            "\"running\""
        );
        let back: ScheduleState = serde_json::from_str("\"any\"").unwrap();
        assert_eq!(back, ScheduleState::Any);
    }

    #[test]
    fn instance_state_round_trip() {
        for state in [
            InstanceState::Unknown,
            InstanceState::Running,
            InstanceState::Stopped,
            InstanceState::RetainRunning,
            InstanceState::StartFailed,
            InstanceState::Configured,
            InstanceState::Any,
        ] {
            assert_eq!(InstanceState::parse_lenient(state.as_str()), state);
        }
    }

    #[test]
    fn instance_state_lenient_on_garbage() {
        assert_eq!(
            InstanceState::parse_lenient("definitely-not-a-state"),
            InstanceState::Unknown
        );
    }

    #[test]
    fn requested_action_display() {
        assert_eq!(RequestedAction::DoNothing.to_string(), "do_nothing");
        assert_eq!(RequestedAction::Start.to_string(), "start");
        assert_eq!(RequestedAction::Stop.to_string(), "stop");
        assert_eq!(RequestedAction::Configure.to_string(), "configure");
    }
}
