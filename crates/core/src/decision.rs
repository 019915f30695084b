use chrono::{DateTime, Utc};

use crate::schedule::Schedule;
use crate::states::{InstanceState, RequestedAction, ScheduleState};

/// The outcome of the decision function for one resource: the action to
/// take, the stored state to persist once the action has a terminal result,
/// and a human-readable reason for logs and events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingDecision {
    pub action: RequestedAction,
    pub new_stored_state: InstanceState,
    pub reason: String,
}

impl SchedulingDecision {
    fn new(
        action: RequestedAction,
        new_stored_state: InstanceState,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            new_stored_state,
            reason: reason.into(),
        }
    }
}

/// Decide what to do with a resource given its stored state, its schedule,
/// the current instant, and the currently active maintenance-window
/// schedules.
///
/// A maintenance-window schedule is a synthetic enforced schedule covering
/// the window's time span; when the resource's schedule honors maintenance
/// windows and any of them is running at `dt`, the resource starts
/// regardless of its own periods.
#[must_use]
pub fn make_decision(
    stored_state: InstanceState,
    schedule: &Schedule,
    dt: DateTime<Utc>,
    maintenance_windows: &[Schedule],
) -> SchedulingDecision {
    if schedule.use_maintenance_window {
        for mw in maintenance_windows {
            if mw.desired_state(dt).state == ScheduleState::Running {
                return SchedulingDecision::new(
                    RequestedAction::Start,
                    InstanceState::Running,
                    format!("in active maintenance window {}", mw.name),
                );
            }
        }
    }

    // An override pins the stored state to exactly Running or Stopped; the
    // retain-running and start-failed refinements below do not apply.
    if let Some(override_status) = schedule.override_status {
        return match override_status.as_schedule_state() {
            ScheduleState::Running if stored_state == InstanceState::Running => {
                SchedulingDecision::new(
                    RequestedAction::DoNothing,
                    InstanceState::Running,
                    "override_status is running",
                )
            }
            ScheduleState::Running => SchedulingDecision::new(
                RequestedAction::Start,
                InstanceState::Running,
                "override_status is running",
            ),
            _ if stored_state == InstanceState::Stopped => SchedulingDecision::new(
                RequestedAction::DoNothing,
                InstanceState::Stopped,
                "override_status is stopped",
            ),
            _ => SchedulingDecision::new(
                RequestedAction::Stop,
                InstanceState::Stopped,
                "override_status is stopped",
            ),
        };
    }

    let schedule_state = schedule.desired_state(dt).state;

    match schedule_state {
        ScheduleState::Stopped => {
            if stored_state == InstanceState::Unknown && !schedule.stop_new_instances {
                return SchedulingDecision::new(
                    RequestedAction::DoNothing,
                    InstanceState::Stopped,
                    "stop_new_instances is disabled",
                );
            }

            if schedule.enforced {
                return SchedulingDecision::new(
                    RequestedAction::Stop,
                    InstanceState::Stopped,
                    "enforced is enabled",
                );
            }

            if stored_state == InstanceState::RetainRunning && schedule.retain_running {
                // The retain marker is cleared on the transition to stopped.
                return SchedulingDecision::new(
                    RequestedAction::DoNothing,
                    InstanceState::Stopped,
                    "instance is in the retain_running state",
                );
            }

            if stored_state == InstanceState::Stopped {
                SchedulingDecision::new(
                    RequestedAction::DoNothing,
                    InstanceState::Stopped,
                    format!("no state transition (stored state: {stored_state})"),
                )
            } else {
                SchedulingDecision::new(
                    RequestedAction::Stop,
                    InstanceState::Stopped,
                    format!("state transition from {stored_state} to {schedule_state}"),
                )
            }
        }

        ScheduleState::Running => {
            if schedule.enforced {
                return SchedulingDecision::new(
                    RequestedAction::Start,
                    InstanceState::Running,
                    "enforced is enabled",
                );
            }

            if schedule.retain_running && stored_state == InstanceState::Stopped {
                // Stored says stopped during a running period: an operator
                // already started the resource by hand. Remember that so the
                // period end does not undo it.
                return SchedulingDecision::new(
                    RequestedAction::DoNothing,
                    InstanceState::RetainRunning,
                    "instance appears to have been started manually, applying retain_running",
                );
            }

            if stored_state == InstanceState::RetainRunning {
                return SchedulingDecision::new(
                    RequestedAction::DoNothing,
                    InstanceState::RetainRunning,
                    "instance in retain_running state, keeping the marker",
                );
            }

            if stored_state == InstanceState::StartFailed {
                return SchedulingDecision::new(
                    RequestedAction::Start,
                    InstanceState::Running,
                    "previous start failed, retrying",
                );
            }

            if stored_state == InstanceState::Running {
                SchedulingDecision::new(
                    RequestedAction::DoNothing,
                    InstanceState::Running,
                    format!("no state transition (stored state: {stored_state})"),
                )
            } else {
                SchedulingDecision::new(
                    RequestedAction::Start,
                    InstanceState::Running,
                    format!("state transition from {stored_state} to {schedule_state}"),
                )
            }
        }

        ScheduleState::Any => SchedulingDecision::new(
            RequestedAction::DoNothing,
            InstanceState::Any,
            "schedule is in the any state",
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, TimeZone};

    use super::*;
    use crate::cron::CronRecurrence;
    use crate::period::RunningPeriod;
    use crate::schedule::{OverrideStatus, PeriodEntry};

    fn office_schedule() -> Schedule {
        Schedule {
            name: "biz".into(),
            timezone: chrono_tz::UTC,
            periods: vec![PeriodEntry {
                period: RunningPeriod {
                    name: "office-hours".into(),
                    begintime: NaiveTime::from_hms_opt(9, 0, 0),
                    endtime: NaiveTime::from_hms_opt(17, 0, 0),
                    recurrence: CronRecurrence::default(),
                },
                desired_size: None,
            }],
            override_status: None,
            description: None,
            maintenance_windows: Vec::new(),
            stop_new_instances: true,
            use_maintenance_window: true,
            enforced: false,
            hibernate: false,
            retain_running: false,
        }
    }

    fn mw_schedule(running: bool) -> Schedule {
        let mut sched = office_schedule();
        sched.name = "mw-patching".into();
        sched.enforced = true;
        sched.override_status = Some(if running {
            OverrideStatus::Running
        } else {
            OverrideStatus::Stopped
        });
        sched
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        // 2024-03-04 is a Monday.
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    #[test]
    fn start_at_period_begin() {
        let sched = office_schedule();
        let before = make_decision(InstanceState::Unknown, &sched, at(8, 55), &[]);
        assert_eq!(before.action, RequestedAction::Stop);
        assert_eq!(before.new_stored_state, InstanceState::Stopped);

        let at_begin = make_decision(InstanceState::Stopped, &sched, at(9, 0), &[]);
        assert_eq!(at_begin.action, RequestedAction::Start);
        assert_eq!(at_begin.new_stored_state, InstanceState::Running);
    }

    #[test]
    fn stop_at_period_end() {
        let sched = office_schedule();
        let before = make_decision(InstanceState::Running, &sched, at(16, 55), &[]);
        assert_eq!(before.action, RequestedAction::DoNothing);
        assert_eq!(before.new_stored_state, InstanceState::Running);

        let at_end = make_decision(InstanceState::Running, &sched, at(17, 0), &[]);
        assert_eq!(at_end.action, RequestedAction::Stop);
        assert_eq!(at_end.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn manual_stop_during_period_is_left_alone() {
        // Stored state says Running; the operator stopped it by hand. The
        // schedule state did not transition, so nothing happens and stored
        // state stays Running.
        let sched = office_schedule();
        let decision = make_decision(InstanceState::Running, &sched, at(10, 0), &[]);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::Running);
    }

    #[test]
    fn enforced_corrects_manual_drift() {
        let mut sched = office_schedule();
        sched.enforced = true;

        let inside = make_decision(InstanceState::Running, &sched, at(10, 0), &[]);
        assert_eq!(inside.action, RequestedAction::Start);
        assert_eq!(inside.new_stored_state, InstanceState::Running);

        let outside = make_decision(InstanceState::Stopped, &sched, at(22, 0), &[]);
        assert_eq!(outside.action, RequestedAction::Stop);
        assert_eq!(outside.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn new_instance_with_stop_new_instances_disabled() {
        let mut sched = office_schedule();
        sched.stop_new_instances = false;
        let decision = make_decision(InstanceState::Unknown, &sched, at(3, 0), &[]);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn new_instance_with_stop_new_instances_enabled() {
        let sched = office_schedule();
        let decision = make_decision(InstanceState::Unknown, &sched, at(3, 0), &[]);
        assert_eq!(decision.action, RequestedAction::Stop);
        assert_eq!(decision.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn retain_running_marker_applied_during_running_period() {
        let mut sched = office_schedule();
        sched.retain_running = true;
        // Stored Stopped during a running period: manual start detected.
        let decision = make_decision(InstanceState::Stopped, &sched, at(10, 0), &[]);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::RetainRunning);
    }

    #[test]
    fn retain_running_marker_kept_while_running() {
        let mut sched = office_schedule();
        sched.retain_running = true;
        let decision = make_decision(InstanceState::RetainRunning, &sched, at(12, 0), &[]);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::RetainRunning);
    }

    #[test]
    fn retain_running_marker_cleared_at_period_end() {
        let mut sched = office_schedule();
        sched.retain_running = true;
        let decision = make_decision(InstanceState::RetainRunning, &sched, at(18, 0), &[]);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn retain_running_marker_without_flag_stops() {
        // The stored marker alone does not protect the instance when the
        // schedule no longer carries the flag.
        let sched = office_schedule();
        let decision = make_decision(InstanceState::RetainRunning, &sched, at(18, 0), &[]);
        assert_eq!(decision.action, RequestedAction::Stop);
        assert_eq!(decision.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn start_failed_is_retried() {
        let sched = office_schedule();
        let decision = make_decision(InstanceState::StartFailed, &sched, at(10, 0), &[]);
        assert_eq!(decision.action, RequestedAction::Start);
        assert_eq!(decision.new_stored_state, InstanceState::Running);
    }

    #[test]
    fn any_state_does_nothing() {
        let mut sched = office_schedule();
        // Begin-only period: Any before begintime.
        sched.periods[0].period.endtime = None;
        let decision = make_decision(InstanceState::Running, &sched, at(3, 0), &[]);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::Any);
    }

    #[test]
    fn active_maintenance_window_forces_start() {
        let sched = office_schedule();
        let windows = vec![mw_schedule(true)];
        // 3am, far outside the office period.
        let decision = make_decision(InstanceState::Stopped, &sched, at(3, 0), &windows);
        assert_eq!(decision.action, RequestedAction::Start);
        assert_eq!(decision.new_stored_state, InstanceState::Running);
        assert!(decision.reason.contains("mw-patching"));
    }

    #[test]
    fn inactive_maintenance_window_is_ignored() {
        let sched = office_schedule();
        let windows = vec![mw_schedule(false)];
        let decision = make_decision(InstanceState::Stopped, &sched, at(3, 0), &windows);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn maintenance_window_respects_schedule_opt_out() {
        let mut sched = office_schedule();
        sched.use_maintenance_window = false;
        let windows = vec![mw_schedule(true)];
        let decision = make_decision(InstanceState::Stopped, &sched, at(3, 0), &windows);
        assert_eq!(decision.action, RequestedAction::DoNothing);
        assert_eq!(decision.new_stored_state, InstanceState::Stopped);
    }

    #[test]
    fn override_status_pins_stored_state() {
        let mut sched = office_schedule();
        sched.override_status = Some(OverrideStatus::Running);
        for stored in [
            InstanceState::Unknown,
            InstanceState::Running,
            InstanceState::Stopped,
            InstanceState::RetainRunning,
            InstanceState::StartFailed,
        ] {
            let decision = make_decision(stored, &sched, at(3, 0), &[]);
            assert_eq!(decision.new_stored_state, InstanceState::Running);
            assert!(matches!(
                decision.action,
                RequestedAction::Start | RequestedAction::DoNothing
            ));
        }

        sched.override_status = Some(OverrideStatus::Stopped);
        for stored in [
            InstanceState::Unknown,
            InstanceState::Running,
            InstanceState::Stopped,
        ] {
            let decision = make_decision(stored, &sched, at(12, 0), &[]);
            assert_eq!(decision.new_stored_state, InstanceState::Stopped);
            assert!(matches!(
                decision.action,
                RequestedAction::Stop | RequestedAction::DoNothing
            ));
        }
    }
}
