//! In-memory store backends.
//!
//! These serve two purposes: hydrating a runner from schedules and periods
//! inlined into the dispatch payload (the common case for small
//! deployments), and standing in for the durable stores in tests. The maps
//! are guarded by plain `RwLock`s; every critical section is a single map
//! operation.

mod config_store;
mod maint_win_store;
mod registry_store;

pub use config_store::InMemoryConfigStore;
pub use maint_win_store::InMemoryMaintenanceWindowStore;
pub use registry_store::InMemoryResourceRegistry;
