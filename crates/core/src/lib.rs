//! Core scheduling engine for the offhours scheduler.
//!
//! This crate is pure data and logic: no I/O, no SDK clients. It contains
//! the calendar recurrence grammar and its evaluator, the period and
//! schedule evaluators, the scheduling decision function, the validated
//! configuration forms (period and schedule definitions), and the value
//! objects persisted by the stores (registry records, maintenance windows).
//!
//! Everything here is deterministic given an instant in time, which is what
//! makes the scheduling behavior testable without a cloud account.

pub mod arn;
pub mod cron;
pub mod decision;
pub mod definition;
pub mod maint_win;
pub mod period;
pub mod registry;
pub mod schedule;
pub mod states;

pub use arn::{Arn, ArnError};
pub use cron::{CronExpr, CronRecurrence, CronParseError, RangeEnd};
pub use decision::{SchedulingDecision, make_decision};
pub use definition::{
    InvalidPeriodDefinition, InvalidScheduleDefinition, PeriodDefinition, PeriodRef,
    ScheduleDefinition,
};
pub use maint_win::{MaintenanceWindow, MaintenanceWindowError, parse_execution_time};
pub use period::RunningPeriod;
pub use registry::{
    AsgConfiguration, AsgSize, RegisteredInstance, RegistryKey, RegistryKeyError, Service,
};
pub use schedule::{DesiredState, OverrideStatus, PeriodEntry, Schedule};
pub use states::{InstanceState, RequestedAction, ScheduleState};
