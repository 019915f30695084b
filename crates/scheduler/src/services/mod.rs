//! AWS-backed implementations of the per-service adapter trait.

mod asg;
mod ec2;
mod rds;

pub use asg::{AsgService, SIZE_TAG_KEY};
pub use ec2::Ec2Service;
pub use rds::RdsService;
