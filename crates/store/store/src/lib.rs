//! Store traits for the offhours scheduler.
//!
//! Three kinds of persistent state exist across scheduling cycles: the
//! schedule/period configuration, the resource registry (which owns each
//! resource's stored state), and the maintenance-window mirror. Everything
//! else is recomputed each cycle.
//!
//! Backends implement these traits; the scheduler only sees trait objects.
//! Cross-runner consistency relies solely on the backend's per-key
//! atomicity (conditional put for create-vs-overwrite), so implementations
//! need no in-process locking beyond their own data structures.

pub mod config_store;
pub mod error;
pub mod maint_win_store;
pub mod registry_store;

pub use config_store::{PeriodStore, ScheduleStore};
pub use error::StoreError;
pub use maint_win_store::MaintenanceWindowStore;
pub use registry_store::ResourceRegistry;
