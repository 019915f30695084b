//! AWS integration for the offhours scheduler.
//!
//! This crate provides feature-gated service adapters:
//!
//! - **EC2** (`ec2` feature) — describe/start/stop/resize instances, with
//!   hibernate and capacity-fallback handling
//! - **RDS** (`rds` feature) — describe/start/stop database instances and
//!   clusters, with supported-engine checks
//! - **Auto Scaling** (`autoscaling` feature) — describe groups and compile
//!   schedules into recurring scheduled actions
//! - **SSM** (`ssm` feature) — list enabled maintenance windows
//! - **`EventBridge`** (`events` feature) — emit scheduling-action events
//! - **`CloudWatch`** (`metrics` feature) — publish instance-count metrics
//!
//! All adapters operate on a per-target [`AssumedRole`](auth::AssumedRole):
//! the scheduling role in the resource-owning account and region.

pub mod auth;
pub mod config;
pub mod error;
pub mod tagging;

#[cfg(feature = "ec2")]
pub mod ec2;

#[cfg(feature = "rds")]
pub mod rds;

#[cfg(feature = "autoscaling")]
pub mod asg;

#[cfg(feature = "ssm")]
pub mod ssm;

#[cfg(feature = "events")]
pub mod events;

#[cfg(feature = "metrics")]
pub mod metrics;

// Re-exports for convenience.
pub use auth::AssumedRole;
pub use config::AwsBaseConfig;
pub use error::AwsError;
pub use tagging::{InfoTagCode, InfoTags};

#[cfg(feature = "ec2")]
pub use ec2::{Ec2RuntimeInfo, Ec2Scheduler};

#[cfg(feature = "rds")]
pub use rds::{RdsRuntimeInfo, RdsScheduler};

#[cfg(feature = "autoscaling")]
pub use asg::{AsgRuntimeInfo, AsgScheduler};

#[cfg(feature = "ssm")]
pub use ssm::SsmMaintenanceWindows;

#[cfg(feature = "events")]
pub use events::{SchedulingActionEvent, SchedulingEventBus};

#[cfg(feature = "metrics")]
pub use metrics::{InstanceCountMetric, OpsMetrics};
